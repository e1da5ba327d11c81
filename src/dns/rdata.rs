//! Typed record data
//!
//! Every supported type can be read from and written to the wire, and parsed
//! from its zone file presentation form. Types without a dedicated variant are
//! carried as opaque octets and accept the RFC 3597 `\# <len> <hex>` syntax.

use std::net::{Ipv4Addr, Ipv6Addr};

use derive_more::{Display, Error};

use crate::dns::buffer::{BytePacketBuffer, PacketBuffer};
use crate::dns::names;
use crate::dns::protocol::{ProtocolError, QueryType};

/// Parser and codec errors for record data
#[derive(Debug, Clone, PartialEq, Eq, Display, Error)]
pub enum RdataError {
    #[display(fmt = "{}: invalid syntax: {}", rtype, message)]
    InvalidSyntax { rtype: QueryType, message: String },
    #[display(fmt = "{}: missing field {}", rtype, field)]
    MissingField { rtype: QueryType, field: &'static str },
    #[display(fmt = "{}: unexpected trailing data {:?}", rtype, token)]
    TrailingData { rtype: QueryType, token: String },
    #[display(fmt = "{}: invalid domain name {:?}", rtype, name)]
    InvalidName { rtype: QueryType, name: String },
    #[display(fmt = "character-string of {} octets exceeds 255", len)]
    StringTooLong { len: usize },
    #[display(fmt = "{}: rdata length {} does not match consumed length {}", rtype, expected, actual)]
    BadLength { rtype: QueryType, expected: usize, actual: usize },
    #[display(fmt = "{}: no presentation format, use \\# syntax", _0)]
    #[error(ignore)]
    UnsupportedType(QueryType),
}

type Result<T> = std::result::Result<T, RdataError>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SoaData {
    pub mname: String,
    pub rname: String,
    pub serial: u32,
    pub refresh: u32,
    pub retry: u32,
    pub expire: u32,
    pub minimum: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RecordData {
    A(Ipv4Addr),
    Ns(String),
    Cname(String),
    Soa(SoaData),
    Ptr(String),
    Hinfo {
        cpu: Vec<u8>,
        os: Vec<u8>,
    },
    Mx {
        preference: u16,
        exchange: String,
    },
    Txt(Vec<Vec<u8>>),
    Rp {
        mbox: String,
        txt: String,
    },
    Aaaa(Ipv6Addr),
    Srv {
        priority: u16,
        weight: u16,
        port: u16,
        target: String,
    },
    Naptr {
        order: u16,
        preference: u16,
        flags: Vec<u8>,
        services: Vec<u8>,
        regexp: Vec<u8>,
        replacement: String,
    },
    Dname(String),
    Ds {
        key_tag: u16,
        algorithm: u8,
        digest_type: u8,
        digest: Vec<u8>,
    },
    Sshfp {
        algorithm: u8,
        fp_type: u8,
        fingerprint: Vec<u8>,
    },
    Dnskey {
        flags: u16,
        protocol: u8,
        algorithm: u8,
        public_key: Vec<u8>,
    },
    Tlsa {
        usage: u8,
        selector: u8,
        matching_type: u8,
        data: Vec<u8>,
    },
    Spf(Vec<Vec<u8>>),
    Caa {
        flags: u8,
        tag: String,
        value: Vec<u8>,
    },
    Unknown {
        rtype: u16,
        data: Vec<u8>,
    },
}

impl RecordData {
    pub fn rtype(&self) -> QueryType {
        match self {
            RecordData::A(_) => QueryType::A,
            RecordData::Ns(_) => QueryType::Ns,
            RecordData::Cname(_) => QueryType::Cname,
            RecordData::Soa(_) => QueryType::Soa,
            RecordData::Ptr(_) => QueryType::Ptr,
            RecordData::Hinfo { .. } => QueryType::Hinfo,
            RecordData::Mx { .. } => QueryType::Mx,
            RecordData::Txt(_) => QueryType::Txt,
            RecordData::Rp { .. } => QueryType::Rp,
            RecordData::Aaaa(_) => QueryType::Aaaa,
            RecordData::Srv { .. } => QueryType::Srv,
            RecordData::Naptr { .. } => QueryType::Naptr,
            RecordData::Dname(_) => QueryType::Dname,
            RecordData::Ds { .. } => QueryType::Ds,
            RecordData::Sshfp { .. } => QueryType::Sshfp,
            RecordData::Dnskey { .. } => QueryType::Dnskey,
            RecordData::Tlsa { .. } => QueryType::Tlsa,
            RecordData::Spf(_) => QueryType::Spf,
            RecordData::Caa { .. } => QueryType::Caa,
            RecordData::Unknown { rtype, .. } => QueryType::from_num(*rtype),
        }
    }

    /// Decodes `len` octets of rdata of the given type
    pub fn read<T: PacketBuffer>(
        rtype: QueryType,
        buffer: &mut T,
        len: usize,
    ) -> std::result::Result<RecordData, ProtocolError> {
        let end = buffer.pos() + len;

        let data = match rtype {
            QueryType::A => {
                let octets = buffer.read_bytes(4)?;
                RecordData::A(Ipv4Addr::new(octets[0], octets[1], octets[2], octets[3]))
            }
            QueryType::Aaaa => {
                let mut octets = [0u8; 16];
                octets.copy_from_slice(&buffer.read_bytes(16)?);
                RecordData::Aaaa(Ipv6Addr::from(octets))
            }
            QueryType::Ns => RecordData::Ns(read_name(buffer)?),
            QueryType::Cname => RecordData::Cname(read_name(buffer)?),
            QueryType::Ptr => RecordData::Ptr(read_name(buffer)?),
            QueryType::Dname => RecordData::Dname(read_name(buffer)?),
            QueryType::Soa => RecordData::Soa(SoaData {
                mname: read_name(buffer)?,
                rname: read_name(buffer)?,
                serial: buffer.read_u32()?,
                refresh: buffer.read_u32()?,
                retry: buffer.read_u32()?,
                expire: buffer.read_u32()?,
                minimum: buffer.read_u32()?,
            }),
            QueryType::Hinfo => RecordData::Hinfo {
                cpu: read_character_string(buffer)?,
                os: read_character_string(buffer)?,
            },
            QueryType::Mx => RecordData::Mx {
                preference: buffer.read_u16()?,
                exchange: read_name(buffer)?,
            },
            QueryType::Txt | QueryType::Spf => {
                let mut strings = Vec::new();
                while buffer.pos() < end {
                    strings.push(read_character_string(buffer)?);
                }
                if rtype == QueryType::Txt {
                    RecordData::Txt(strings)
                } else {
                    RecordData::Spf(strings)
                }
            }
            QueryType::Rp => RecordData::Rp {
                mbox: read_name(buffer)?,
                txt: read_name(buffer)?,
            },
            QueryType::Srv => RecordData::Srv {
                priority: buffer.read_u16()?,
                weight: buffer.read_u16()?,
                port: buffer.read_u16()?,
                target: read_name(buffer)?,
            },
            QueryType::Naptr => RecordData::Naptr {
                order: buffer.read_u16()?,
                preference: buffer.read_u16()?,
                flags: read_character_string(buffer)?,
                services: read_character_string(buffer)?,
                regexp: read_character_string(buffer)?,
                replacement: read_name(buffer)?,
            },
            QueryType::Ds => RecordData::Ds {
                key_tag: buffer.read_u16()?,
                algorithm: buffer.read()?,
                digest_type: buffer.read()?,
                digest: read_rest(buffer, rtype, end)?,
            },
            QueryType::Sshfp => RecordData::Sshfp {
                algorithm: buffer.read()?,
                fp_type: buffer.read()?,
                fingerprint: read_rest(buffer, rtype, end)?,
            },
            QueryType::Dnskey => RecordData::Dnskey {
                flags: buffer.read_u16()?,
                protocol: buffer.read()?,
                algorithm: buffer.read()?,
                public_key: read_rest(buffer, rtype, end)?,
            },
            QueryType::Tlsa => RecordData::Tlsa {
                usage: buffer.read()?,
                selector: buffer.read()?,
                matching_type: buffer.read()?,
                data: read_rest(buffer, rtype, end)?,
            },
            QueryType::Caa => {
                let flags = buffer.read()?;
                let tag = read_character_string(buffer)?;
                RecordData::Caa {
                    flags,
                    tag: String::from_utf8_lossy(&tag).into_owned(),
                    value: read_rest(buffer, rtype, end)?,
                }
            }
            _ => RecordData::Unknown {
                rtype: rtype.to_num(),
                data: buffer.read_bytes(len)?,
            },
        };

        if buffer.pos() != end {
            return Err(RdataError::BadLength {
                rtype,
                expected: len,
                actual: buffer.pos() + len - end,
            }
            .into());
        }

        Ok(data)
    }

    /// Writes the rdata without its length prefix
    pub fn write<T: PacketBuffer>(&self, buffer: &mut T) -> std::result::Result<(), ProtocolError> {
        match self {
            RecordData::A(addr) => buffer.write_bytes(&addr.octets())?,
            RecordData::Aaaa(addr) => buffer.write_bytes(&addr.octets())?,
            RecordData::Ns(host)
            | RecordData::Cname(host)
            | RecordData::Ptr(host)
            | RecordData::Dname(host) => buffer.write_qname(host)?,
            RecordData::Soa(soa) => {
                buffer.write_qname(&soa.mname)?;
                buffer.write_qname(&soa.rname)?;
                buffer.write_u32(soa.serial)?;
                buffer.write_u32(soa.refresh)?;
                buffer.write_u32(soa.retry)?;
                buffer.write_u32(soa.expire)?;
                buffer.write_u32(soa.minimum)?;
            }
            RecordData::Hinfo { cpu, os } => {
                write_character_string(buffer, cpu)?;
                write_character_string(buffer, os)?;
            }
            RecordData::Mx {
                preference,
                exchange,
            } => {
                buffer.write_u16(*preference)?;
                buffer.write_qname(exchange)?;
            }
            RecordData::Txt(strings) | RecordData::Spf(strings) => {
                for s in strings {
                    write_character_string(buffer, s)?;
                }
            }
            RecordData::Rp { mbox, txt } => {
                buffer.write_qname(mbox)?;
                buffer.write_qname(txt)?;
            }
            RecordData::Srv {
                priority,
                weight,
                port,
                target,
            } => {
                buffer.write_u16(*priority)?;
                buffer.write_u16(*weight)?;
                buffer.write_u16(*port)?;
                buffer.write_qname(target)?;
            }
            RecordData::Naptr {
                order,
                preference,
                flags,
                services,
                regexp,
                replacement,
            } => {
                buffer.write_u16(*order)?;
                buffer.write_u16(*preference)?;
                write_character_string(buffer, flags)?;
                write_character_string(buffer, services)?;
                write_character_string(buffer, regexp)?;
                buffer.write_qname(replacement)?;
            }
            RecordData::Ds {
                key_tag,
                algorithm,
                digest_type,
                digest,
            } => {
                buffer.write_u16(*key_tag)?;
                buffer.write_u8(*algorithm)?;
                buffer.write_u8(*digest_type)?;
                buffer.write_bytes(digest)?;
            }
            RecordData::Sshfp {
                algorithm,
                fp_type,
                fingerprint,
            } => {
                buffer.write_u8(*algorithm)?;
                buffer.write_u8(*fp_type)?;
                buffer.write_bytes(fingerprint)?;
            }
            RecordData::Dnskey {
                flags,
                protocol,
                algorithm,
                public_key,
            } => {
                buffer.write_u16(*flags)?;
                buffer.write_u8(*protocol)?;
                buffer.write_u8(*algorithm)?;
                buffer.write_bytes(public_key)?;
            }
            RecordData::Tlsa {
                usage,
                selector,
                matching_type,
                data,
            } => {
                buffer.write_u8(*usage)?;
                buffer.write_u8(*selector)?;
                buffer.write_u8(*matching_type)?;
                buffer.write_bytes(data)?;
            }
            RecordData::Caa { flags, tag, value } => {
                buffer.write_u8(*flags)?;
                write_character_string(buffer, tag.as_bytes())?;
                buffer.write_bytes(value)?;
            }
            RecordData::Unknown { data, .. } => buffer.write_bytes(data)?,
        }

        Ok(())
    }

    /// Parses the presentation form of an rdata, completing relative names
    /// against `origin`
    pub fn from_text(rtype: QueryType, text: &str, origin: &str) -> Result<RecordData> {
        let tokens = tokenize(rtype, text)?;

        if tokens.first().map_or(false, |t| !t.quoted && t.raw == "\\#") {
            return parse_generic(rtype, tokens);
        }

        let mut fields = Fields::new(rtype, tokens, origin);

        let data = match rtype {
            QueryType::A => {
                let token = fields.next("address")?;
                RecordData::A(token.raw.parse::<Ipv4Addr>().map_err(|_| {
                    RdataError::InvalidSyntax {
                        rtype,
                        message: format!("invalid IPv4 address {:?}", token.raw),
                    }
                })?)
            }
            QueryType::Aaaa => {
                let token = fields.next("address")?;
                RecordData::Aaaa(token.raw.parse::<Ipv6Addr>().map_err(|_| {
                    RdataError::InvalidSyntax {
                        rtype,
                        message: format!("invalid IPv6 address {:?}", token.raw),
                    }
                })?)
            }
            QueryType::Ns => RecordData::Ns(fields.name("nsdname")?),
            QueryType::Cname => RecordData::Cname(fields.name("cname")?),
            QueryType::Ptr => RecordData::Ptr(fields.name("ptrdname")?),
            QueryType::Dname => RecordData::Dname(fields.name("target")?),
            QueryType::Soa => RecordData::Soa(SoaData {
                mname: fields.name("mname")?,
                rname: fields.name("rname")?,
                serial: fields.number("serial")?,
                refresh: fields.ttl("refresh")?,
                retry: fields.ttl("retry")?,
                expire: fields.ttl("expire")?,
                minimum: fields.ttl("minimum")?,
            }),
            QueryType::Hinfo => RecordData::Hinfo {
                cpu: fields.string("cpu")?,
                os: fields.string("os")?,
            },
            QueryType::Mx => RecordData::Mx {
                preference: fields.number("preference")?,
                exchange: fields.name("exchange")?,
            },
            QueryType::Txt => RecordData::Txt(fields.strings("text")?),
            QueryType::Spf => RecordData::Spf(fields.strings("text")?),
            QueryType::Rp => RecordData::Rp {
                mbox: fields.name("mbox")?,
                txt: fields.name("txt")?,
            },
            QueryType::Srv => RecordData::Srv {
                priority: fields.number("priority")?,
                weight: fields.number("weight")?,
                port: fields.number("port")?,
                target: fields.name("target")?,
            },
            QueryType::Naptr => RecordData::Naptr {
                order: fields.number("order")?,
                preference: fields.number("preference")?,
                flags: fields.string("flags")?,
                services: fields.string("services")?,
                regexp: fields.string("regexp")?,
                replacement: fields.name("replacement")?,
            },
            QueryType::Ds => RecordData::Ds {
                key_tag: fields.number("key tag")?,
                algorithm: fields.number("algorithm")?,
                digest_type: fields.number("digest type")?,
                digest: fields.hex("digest")?,
            },
            QueryType::Sshfp => RecordData::Sshfp {
                algorithm: fields.number("algorithm")?,
                fp_type: fields.number("fingerprint type")?,
                fingerprint: fields.hex("fingerprint")?,
            },
            QueryType::Dnskey => RecordData::Dnskey {
                flags: fields.number("flags")?,
                protocol: fields.number("protocol")?,
                algorithm: fields.number("algorithm")?,
                public_key: fields.base64("public key")?,
            },
            QueryType::Tlsa => RecordData::Tlsa {
                usage: fields.number("usage")?,
                selector: fields.number("selector")?,
                matching_type: fields.number("matching type")?,
                data: fields.hex("certificate data")?,
            },
            QueryType::Caa => {
                let flags = fields.number("flags")?;
                let tag = fields.next("tag")?.raw;
                if tag.is_empty() || !tag.chars().all(|c| c.is_ascii_alphanumeric()) {
                    return Err(RdataError::InvalidSyntax {
                        rtype,
                        message: format!("invalid CAA tag {:?}", tag),
                    });
                }
                let value = decode_escapes(rtype, &fields.next("value")?.raw)?;
                RecordData::Caa { flags, tag, value }
            }
            _ => return Err(RdataError::UnsupportedType(rtype)),
        };

        fields.finish()?;

        Ok(data)
    }
}

fn read_name<T: PacketBuffer>(buffer: &mut T) -> std::result::Result<String, ProtocolError> {
    let mut name = String::new();
    buffer.read_qname(&mut name)?;

    Ok(name)
}

fn read_character_string<T: PacketBuffer>(
    buffer: &mut T,
) -> std::result::Result<Vec<u8>, ProtocolError> {
    let len = buffer.read()? as usize;
    Ok(buffer.read_bytes(len)?)
}

fn read_rest<T: PacketBuffer>(
    buffer: &mut T,
    rtype: QueryType,
    end: usize,
) -> std::result::Result<Vec<u8>, ProtocolError> {
    let remaining = end
        .checked_sub(buffer.pos())
        .ok_or(RdataError::BadLength {
            rtype,
            expected: end,
            actual: buffer.pos(),
        })?;

    Ok(buffer.read_bytes(remaining)?)
}

fn write_character_string<T: PacketBuffer>(
    buffer: &mut T,
    data: &[u8],
) -> std::result::Result<(), ProtocolError> {
    if data.len() > 255 {
        return Err(RdataError::StringTooLong { len: data.len() }.into());
    }

    buffer.write_u8(data.len() as u8)?;
    buffer.write_bytes(data)?;

    Ok(())
}

/// Parses a TTL-style duration such as `3600`, `1h` or `1w2d`
pub fn parse_ttl(text: &str) -> Option<u32> {
    if text.is_empty() {
        return None;
    }

    if text.chars().all(|c| c.is_ascii_digit()) {
        return text.parse::<u32>().ok();
    }

    let mut total: u32 = 0;
    let mut current: Option<u32> = None;

    for c in text.chars() {
        if let Some(digit) = c.to_digit(10) {
            current = Some(current.unwrap_or(0).checked_mul(10)?.checked_add(digit)?);
            continue;
        }

        let unit = match c.to_ascii_uppercase() {
            'S' => 1,
            'M' => 60,
            'H' => 3600,
            'D' => 86400,
            'W' => 604800,
            _ => return None,
        };

        total = total.checked_add(current.take()?.checked_mul(unit)?)?;
    }

    if current.is_some() {
        return None;
    }

    Some(total)
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Token {
    raw: String,
    quoted: bool,
}

/// Splits presentation text into tokens, keeping escape sequences intact
fn tokenize(rtype: QueryType, text: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = text.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() || c == '(' || c == ')' => {
                chars.next();
            }
            ';' => {
                for c in chars.by_ref() {
                    if c == '\n' {
                        break;
                    }
                }
            }
            '"' => {
                chars.next();
                let mut raw = String::new();
                let mut closed = false;
                while let Some(c) = chars.next() {
                    match c {
                        '\\' => {
                            raw.push('\\');
                            match chars.next() {
                                Some(n) => raw.push(n),
                                None => break,
                            }
                        }
                        '"' => {
                            closed = true;
                            break;
                        }
                        c => raw.push(c),
                    }
                }
                if !closed {
                    return Err(RdataError::InvalidSyntax {
                        rtype,
                        message: "unterminated quoted string".to_string(),
                    });
                }
                tokens.push(Token { raw, quoted: true });
            }
            _ => {
                let mut raw = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_whitespace() || matches!(c, '"' | '(' | ')' | ';') {
                        break;
                    }
                    chars.next();
                    raw.push(c);
                    if c == '\\' {
                        if let Some(n) = chars.next() {
                            raw.push(n);
                        }
                    }
                }
                tokens.push(Token { raw, quoted: false });
            }
        }
    }

    Ok(tokens)
}

/// Resolves `\X` and `\DDD` escapes into raw octets
fn decode_escapes(rtype: QueryType, raw: &str) -> Result<Vec<u8>> {
    let bytes = raw.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] != b'\\' {
            out.push(bytes[i]);
            i += 1;
            continue;
        }

        let (octet, used) =
            names::decode_escape(&bytes[i + 1..]).map_err(|e| RdataError::InvalidSyntax {
                rtype,
                message: e.to_string(),
            })?;
        out.push(octet);
        i += 1 + used;
    }

    Ok(out)
}

fn parse_generic(rtype: QueryType, tokens: Vec<Token>) -> Result<RecordData> {
    let mut fields = Fields::new(rtype, tokens, "");
    fields.next("\\#")?;
    let len: usize = fields.number("length")?;

    let mut hex_text = String::new();
    for token in fields.tokens.by_ref() {
        hex_text.push_str(&token.raw);
    }

    let data = hex::decode(&hex_text).map_err(|_| RdataError::InvalidSyntax {
        rtype,
        message: format!("invalid hex data {:?}", hex_text),
    })?;

    if data.len() != len {
        return Err(RdataError::BadLength {
            rtype,
            expected: len,
            actual: data.len(),
        });
    }

    let mut buffer = BytePacketBuffer::new(&data);
    RecordData::read(rtype, &mut buffer, len).map_err(|e| match e {
        ProtocolError::Rdata(e) => e,
        other => RdataError::InvalidSyntax {
            rtype,
            message: other.to_string(),
        },
    })
}

struct Fields<'a> {
    rtype: QueryType,
    tokens: std::vec::IntoIter<Token>,
    origin: &'a str,
}

impl<'a> Fields<'a> {
    fn new(rtype: QueryType, tokens: Vec<Token>, origin: &'a str) -> Fields<'a> {
        Fields {
            rtype,
            tokens: tokens.into_iter(),
            origin,
        }
    }

    fn next(&mut self, field: &'static str) -> Result<Token> {
        self.tokens.next().ok_or(RdataError::MissingField {
            rtype: self.rtype,
            field,
        })
    }

    fn name(&mut self, field: &'static str) -> Result<String> {
        let token = self.next(field)?;
        names::resolve(&token.raw, self.origin).map_err(|_| RdataError::InvalidName {
            rtype: self.rtype,
            name: token.raw,
        })
    }

    fn number<N: std::str::FromStr>(&mut self, field: &'static str) -> Result<N> {
        let token = self.next(field)?;
        token.raw.parse::<N>().map_err(|_| RdataError::InvalidSyntax {
            rtype: self.rtype,
            message: format!("invalid {} {:?}", field, token.raw),
        })
    }

    fn ttl(&mut self, field: &'static str) -> Result<u32> {
        let token = self.next(field)?;
        parse_ttl(&token.raw).ok_or(RdataError::InvalidSyntax {
            rtype: self.rtype,
            message: format!("invalid {} {:?}", field, token.raw),
        })
    }

    fn string(&mut self, field: &'static str) -> Result<Vec<u8>> {
        let token = self.next(field)?;
        let data = decode_escapes(self.rtype, &token.raw)?;
        if data.len() > 255 {
            return Err(RdataError::StringTooLong { len: data.len() });
        }

        Ok(data)
    }

    fn strings(&mut self, field: &'static str) -> Result<Vec<Vec<u8>>> {
        let mut strings = vec![self.string(field)?];
        while self.tokens.len() > 0 {
            strings.push(self.string(field)?);
        }

        Ok(strings)
    }

    fn joined_rest(&mut self, field: &'static str) -> Result<String> {
        let mut text = self.next(field)?.raw;
        for token in self.tokens.by_ref() {
            text.push_str(&token.raw);
        }

        Ok(text)
    }

    fn hex(&mut self, field: &'static str) -> Result<Vec<u8>> {
        let text = self.joined_rest(field)?;
        hex::decode(&text).map_err(|_| RdataError::InvalidSyntax {
            rtype: self.rtype,
            message: format!("invalid hex {} {:?}", field, text),
        })
    }

    fn base64(&mut self, field: &'static str) -> Result<Vec<u8>> {
        let text = self.joined_rest(field)?;
        base64::decode(&text).map_err(|_| RdataError::InvalidSyntax {
            rtype: self.rtype,
            message: format!("invalid base64 {} {:?}", field, text),
        })
    }

    fn finish(mut self) -> Result<()> {
        match self.tokens.next() {
            Some(token) => Err(RdataError::TrailingData {
                rtype: self.rtype,
                token: token.raw,
            }),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::buffer::VectorPacketBuffer;

    fn parse(rtype: QueryType, text: &str) -> RecordData {
        RecordData::from_text(rtype, text, "example.com").unwrap()
    }

    #[test]
    fn test_names_are_completed_with_origin() {
        assert_eq!(
            parse(QueryType::Mx, "10 mail"),
            RecordData::Mx {
                preference: 10,
                exchange: "mail.example.com".to_string()
            }
        );
        assert_eq!(
            parse(QueryType::Cname, "www.example.org."),
            RecordData::Cname("www.example.org".to_string())
        );
        assert_eq!(
            parse(QueryType::Ns, "@"),
            RecordData::Ns("example.com".to_string())
        );
    }

    #[test]
    fn test_soa_accepts_ttl_units() {
        let data = parse(
            QueryType::Soa,
            "ns1 hostmaster ( 2024010101 ; serial\n 1h 15m 2w 300 )",
        );

        assert_eq!(
            data,
            RecordData::Soa(SoaData {
                mname: "ns1.example.com".to_string(),
                rname: "hostmaster.example.com".to_string(),
                serial: 2024010101,
                refresh: 3600,
                retry: 900,
                expire: 1209600,
                minimum: 300,
            })
        );
    }

    #[test]
    fn test_txt_quoting_and_escapes() {
        assert_eq!(
            parse(QueryType::Txt, "\"v=spf1 -all\" \"second; not a comment\""),
            RecordData::Txt(vec![
                b"v=spf1 -all".to_vec(),
                b"second; not a comment".to_vec()
            ])
        );
        assert_eq!(
            parse(QueryType::Txt, "\"say \\\"hi\\\" \\065\""),
            RecordData::Txt(vec![b"say \"hi\" A".to_vec()])
        );
        assert_eq!(
            parse(QueryType::Txt, "unquoted ; trailing comment"),
            RecordData::Txt(vec![b"unquoted".to_vec()])
        );
        assert_eq!(
            RecordData::from_text(QueryType::Txt, "\"\\300\"", "example.com"),
            Err(RdataError::InvalidSyntax {
                rtype: QueryType::Txt,
                message: "escape \\300 out of range".to_string(),
            })
        );
    }

    #[test]
    fn test_long_character_string_is_rejected() {
        let text = format!("\"{}\"", "x".repeat(256));
        assert_eq!(
            RecordData::from_text(QueryType::Txt, &text, "example.com"),
            Err(RdataError::StringTooLong { len: 256 })
        );
    }

    #[test]
    fn test_generic_syntax() {
        assert_eq!(
            parse(QueryType::A, "\\# 4 C0000201"),
            RecordData::A(Ipv4Addr::new(192, 0, 2, 1))
        );
        assert_eq!(
            parse(QueryType::Unknown(65280), "\\# 3 abcdef"),
            RecordData::Unknown {
                rtype: 65280,
                data: vec![0xAB, 0xCD, 0xEF]
            }
        );
        assert!(matches!(
            RecordData::from_text(QueryType::Unknown(65280), "\\# 4 abcdef", ""),
            Err(RdataError::BadLength { .. })
        ));
        assert_eq!(
            RecordData::from_text(QueryType::Unknown(65280), "abcdef", ""),
            Err(RdataError::UnsupportedType(QueryType::Unknown(65280)))
        );
    }

    #[test]
    fn test_hex_and_base64_fields() {
        assert_eq!(
            parse(QueryType::Ds, "60485 5 1 2BB183AF5F22588179A53B0A 98631FAD1A292118"),
            RecordData::Ds {
                key_tag: 60485,
                algorithm: 5,
                digest_type: 1,
                digest: hex::decode("2BB183AF5F22588179A53B0A98631FAD1A292118").unwrap(),
            }
        );
        assert_eq!(
            parse(QueryType::Dnskey, "257 3 13 AQID BA=="),
            RecordData::Dnskey {
                flags: 257,
                protocol: 3,
                algorithm: 13,
                public_key: vec![1, 2, 3, 4],
            }
        );
    }

    #[test]
    fn test_caa_and_trailing_tokens() {
        assert_eq!(
            parse(QueryType::Caa, "0 issue \"letsencrypt.org\""),
            RecordData::Caa {
                flags: 0,
                tag: "issue".to_string(),
                value: b"letsencrypt.org".to_vec(),
            }
        );
        assert!(matches!(
            RecordData::from_text(QueryType::A, "192.0.2.1 192.0.2.2", ""),
            Err(RdataError::TrailingData { .. })
        ));
        assert!(matches!(
            RecordData::from_text(QueryType::Srv, "10 5", "example.com"),
            Err(RdataError::MissingField { field: "port", .. })
        ));
    }

    #[test]
    fn test_wire_codec_for_naptr() {
        let data = parse(
            QueryType::Naptr,
            "100 10 \"S\" \"SIP+D2U\" \"\" _sip._udp",
        );

        let mut buffer = VectorPacketBuffer::new();
        data.write(&mut buffer).unwrap();
        let len = buffer.len();
        buffer.seek(0).unwrap();

        let decoded = RecordData::read(QueryType::Naptr, &mut buffer, len).unwrap();
        assert_eq!(decoded, data);
    }

    #[test]
    fn test_parse_ttl() {
        assert_eq!(parse_ttl("3600"), Some(3600));
        assert_eq!(parse_ttl("1h30m"), Some(5400));
        assert_eq!(parse_ttl("1W"), Some(604800));
        assert_eq!(parse_ttl("10x"), None);
        assert_eq!(parse_ttl("h"), None);
        assert_eq!(parse_ttl("5h3"), None);
    }
}
