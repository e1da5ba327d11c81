//! implements the DNS protocol in a transport agnostic fashion

use std::fmt;

use derive_more::{Display, Error, From};

use crate::dns::buffer::{BufferError, BytePacketBuffer, PacketBuffer, VectorPacketBuffer};
use crate::dns::names;
use crate::dns::rdata::{RdataError, RecordData};
use crate::dns::tsig::TsigRdata;

pub const CLASS_IN: u16 = 1;
pub const CLASS_ANY: u16 = 255;

pub const OPCODE_QUERY: u8 = 0;

/// Size of the fixed DNS header
pub const HEADER_LEN: usize = 12;

#[derive(Debug, Display, From, Error)]
pub enum ProtocolError {
    #[display(fmt = "buffer error: {}", _0)]
    Buffer(BufferError),
    #[display(fmt = "rdata error: {}", _0)]
    Rdata(RdataError),
    #[display(fmt = "TSIG record is not the last additional record")]
    #[from(ignore)]
    MisplacedTsig,
    #[display(fmt = "rdata of {} octets exceeds 65535", _0)]
    #[from(ignore)]
    #[error(ignore)]
    RdataTooLong(usize),
}

impl From<names::NameError> for ProtocolError {
    fn from(err: names::NameError) -> Self {
        ProtocolError::Buffer(BufferError::from(err))
    }
}

type Result<T> = std::result::Result<T, ProtocolError>;

/// `QueryType` represents the requested Record Type of a query
///
/// The specific type Unknown that an integer parameter in order to retain the
/// id of an unknown query when compiling the reply. An integer can be converted
/// to a querytype using the `from_num` function, and back to an integer using
/// the `to_num` method.
#[derive(PartialEq, Eq, Debug, Clone, Hash, Copy, PartialOrd, Ord)]
pub enum QueryType {
    Unknown(u16),
    A,      // 1
    Ns,     // 2
    Cname,  // 5
    Soa,    // 6
    Ptr,    // 12
    Hinfo,  // 13
    Mx,     // 15
    Txt,    // 16
    Rp,     // 17
    Aaaa,   // 28
    Srv,    // 33
    Naptr,  // 35
    Dname,  // 39
    Opt,    // 41
    Ds,     // 43
    Sshfp,  // 44
    Dnskey, // 48
    Tlsa,   // 52
    Spf,    // 99
    Tsig,   // 250
    Ixfr,   // 251
    Axfr,   // 252
    Any,    // 255
    Caa,    // 257
}

const MNEMONICS: &[(QueryType, &str)] = &[
    (QueryType::A, "A"),
    (QueryType::Ns, "NS"),
    (QueryType::Cname, "CNAME"),
    (QueryType::Soa, "SOA"),
    (QueryType::Ptr, "PTR"),
    (QueryType::Hinfo, "HINFO"),
    (QueryType::Mx, "MX"),
    (QueryType::Txt, "TXT"),
    (QueryType::Rp, "RP"),
    (QueryType::Aaaa, "AAAA"),
    (QueryType::Srv, "SRV"),
    (QueryType::Naptr, "NAPTR"),
    (QueryType::Dname, "DNAME"),
    (QueryType::Opt, "OPT"),
    (QueryType::Ds, "DS"),
    (QueryType::Sshfp, "SSHFP"),
    (QueryType::Dnskey, "DNSKEY"),
    (QueryType::Tlsa, "TLSA"),
    (QueryType::Spf, "SPF"),
    (QueryType::Tsig, "TSIG"),
    (QueryType::Ixfr, "IXFR"),
    (QueryType::Axfr, "AXFR"),
    (QueryType::Any, "ANY"),
    (QueryType::Caa, "CAA"),
];

impl QueryType {
    pub fn to_num(&self) -> u16 {
        match *self {
            QueryType::Unknown(x) => x,
            QueryType::A => 1,
            QueryType::Ns => 2,
            QueryType::Cname => 5,
            QueryType::Soa => 6,
            QueryType::Ptr => 12,
            QueryType::Hinfo => 13,
            QueryType::Mx => 15,
            QueryType::Txt => 16,
            QueryType::Rp => 17,
            QueryType::Aaaa => 28,
            QueryType::Srv => 33,
            QueryType::Naptr => 35,
            QueryType::Dname => 39,
            QueryType::Opt => 41,
            QueryType::Ds => 43,
            QueryType::Sshfp => 44,
            QueryType::Dnskey => 48,
            QueryType::Tlsa => 52,
            QueryType::Spf => 99,
            QueryType::Tsig => 250,
            QueryType::Ixfr => 251,
            QueryType::Axfr => 252,
            QueryType::Any => 255,
            QueryType::Caa => 257,
        }
    }

    pub fn from_num(num: u16) -> QueryType {
        match num {
            1 => QueryType::A,
            2 => QueryType::Ns,
            5 => QueryType::Cname,
            6 => QueryType::Soa,
            12 => QueryType::Ptr,
            13 => QueryType::Hinfo,
            15 => QueryType::Mx,
            16 => QueryType::Txt,
            17 => QueryType::Rp,
            28 => QueryType::Aaaa,
            33 => QueryType::Srv,
            35 => QueryType::Naptr,
            39 => QueryType::Dname,
            41 => QueryType::Opt,
            43 => QueryType::Ds,
            44 => QueryType::Sshfp,
            48 => QueryType::Dnskey,
            52 => QueryType::Tlsa,
            99 => QueryType::Spf,
            250 => QueryType::Tsig,
            251 => QueryType::Ixfr,
            252 => QueryType::Axfr,
            255 => QueryType::Any,
            257 => QueryType::Caa,
            _ => QueryType::Unknown(num),
        }
    }

    /// Parses a type mnemonic such as `MX` or the generic `TYPE65280` form
    pub fn from_text(text: &str) -> Option<QueryType> {
        let upper = text.trim().to_ascii_uppercase();

        if let Some(num) = upper.strip_prefix("TYPE") {
            return num.parse::<u16>().ok().map(QueryType::from_num);
        }

        MNEMONICS
            .iter()
            .find(|(_, mnemonic)| *mnemonic == upper)
            .map(|(qtype, _)| *qtype)
    }

    /// True for meta types that never appear as zone data
    pub fn is_meta(&self) -> bool {
        matches!(
            self,
            QueryType::Opt | QueryType::Tsig | QueryType::Ixfr | QueryType::Axfr | QueryType::Any
        )
    }
}

impl fmt::Display for QueryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match MNEMONICS.iter().find(|(qtype, _)| qtype == self) {
            Some((_, mnemonic)) => write!(f, "{}", mnemonic),
            None => write!(f, "TYPE{}", self.to_num()),
        }
    }
}

/// Response code of a DNS message (RFC 1035 section 4.1.1)
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ResultCode {
    NOERROR = 0,
    FORMERR = 1,
    SERVFAIL = 2,
    NXDOMAIN = 3,
    NOTIMP = 4,
    REFUSED = 5,
    NOTAUTH = 9,
}

impl Default for ResultCode {
    fn default() -> Self {
        ResultCode::NOERROR
    }
}

impl ResultCode {
    pub fn from_num(num: u8) -> ResultCode {
        match num {
            1 => ResultCode::FORMERR,
            2 => ResultCode::SERVFAIL,
            3 => ResultCode::NXDOMAIN,
            4 => ResultCode::NOTIMP,
            5 => ResultCode::REFUSED,
            9 => ResultCode::NOTAUTH,
            _ => ResultCode::NOERROR,
        }
    }
}

/// Representation of a DNS header
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DnsHeader {
    pub id: u16, // 16 bits

    pub recursion_desired: bool,    // 1 bit
    pub truncated_message: bool,    // 1 bit
    pub authoritative_answer: bool, // 1 bit
    pub opcode: u8,                 // 4 bits
    pub response: bool,             // 1 bit

    pub rescode: ResultCode,       // 4 bits
    pub checking_disabled: bool,   // 1 bit
    pub authed_data: bool,         // 1 bit
    pub z: bool,                   // 1 bit
    pub recursion_available: bool, // 1 bit

    pub questions: u16,             // 16 bits
    pub answers: u16,               // 16 bits
    pub authoritative_entries: u16, // 16 bits
    pub resource_entries: u16,      // 16 bits
}

impl DnsHeader {
    pub fn new() -> DnsHeader {
        DnsHeader::default()
    }

    /// Header for a reply to `query`: id, opcode and RD are echoed, QR is set
    pub fn response_to(query: &DnsHeader) -> DnsHeader {
        DnsHeader {
            id: query.id,
            opcode: query.opcode,
            recursion_desired: query.recursion_desired,
            response: true,
            ..DnsHeader::default()
        }
    }

    pub fn write<T: PacketBuffer>(&self, buffer: &mut T) -> Result<()> {
        buffer.write_u16(self.id)?;

        buffer.write_u8(
            (self.recursion_desired as u8)
                | ((self.truncated_message as u8) << 1)
                | ((self.authoritative_answer as u8) << 2)
                | ((self.opcode & 0x0F) << 3)
                | ((self.response as u8) << 7),
        )?;

        buffer.write_u8(
            (self.rescode as u8)
                | ((self.checking_disabled as u8) << 4)
                | ((self.authed_data as u8) << 5)
                | ((self.z as u8) << 6)
                | ((self.recursion_available as u8) << 7),
        )?;

        buffer.write_u16(self.questions)?;
        buffer.write_u16(self.answers)?;
        buffer.write_u16(self.authoritative_entries)?;
        buffer.write_u16(self.resource_entries)?;

        Ok(())
    }

    pub fn read<T: PacketBuffer>(&mut self, buffer: &mut T) -> Result<()> {
        self.id = buffer.read_u16()?;

        let flags = buffer.read_u16()?;
        let a = (flags >> 8) as u8;
        let b = (flags & 0xFF) as u8;
        self.recursion_desired = (a & (1 << 0)) > 0;
        self.truncated_message = (a & (1 << 1)) > 0;
        self.authoritative_answer = (a & (1 << 2)) > 0;
        self.opcode = (a >> 3) & 0x0F;
        self.response = (a & (1 << 7)) > 0;

        self.rescode = ResultCode::from_num(b & 0x0F);
        self.checking_disabled = (b & (1 << 4)) > 0;
        self.authed_data = (b & (1 << 5)) > 0;
        self.z = (b & (1 << 6)) > 0;
        self.recursion_available = (b & (1 << 7)) > 0;

        self.questions = buffer.read_u16()?;
        self.answers = buffer.read_u16()?;
        self.authoritative_entries = buffer.read_u16()?;
        self.resource_entries = buffer.read_u16()?;

        Ok(())
    }
}

/// Representation of a DNS question
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsQuestion {
    pub name: String,
    pub qtype: QueryType,
    pub qclass: u16,
}

impl DnsQuestion {
    pub fn new(name: String, qtype: QueryType) -> DnsQuestion {
        DnsQuestion {
            name,
            qtype,
            qclass: CLASS_IN,
        }
    }

    pub fn write<T: PacketBuffer>(&self, buffer: &mut T) -> Result<()> {
        buffer.write_qname(&self.name)?;
        buffer.write_u16(self.qtype.to_num())?;
        buffer.write_u16(self.qclass)?;

        Ok(())
    }

    pub fn read<T: PacketBuffer>(buffer: &mut T) -> Result<DnsQuestion> {
        let mut name = String::new();
        buffer.read_qname(&mut name)?;
        let qtype = QueryType::from_num(buffer.read_u16()?);
        let qclass = buffer.read_u16()?;

        Ok(DnsQuestion {
            name,
            qtype,
            qclass,
        })
    }
}

impl fmt::Display for DnsQuestion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", names::fqdn(&self.name), self.qtype)
    }
}

/// A single resource record with typed data
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsRecord {
    pub domain: String,
    pub class: u16,
    pub ttl: u32,
    pub data: RecordData,
}

impl DnsRecord {
    pub fn new(domain: String, ttl: u32, data: RecordData) -> DnsRecord {
        DnsRecord {
            domain,
            class: CLASS_IN,
            ttl,
            data,
        }
    }

    pub fn qtype(&self) -> QueryType {
        self.data.rtype()
    }

    pub fn read<T: PacketBuffer>(buffer: &mut T) -> Result<DnsRecord> {
        let mut domain = String::new();
        buffer.read_qname(&mut domain)?;

        let qtype = QueryType::from_num(buffer.read_u16()?);
        let class = buffer.read_u16()?;
        let ttl = buffer.read_u32()?;
        let data_len = buffer.read_u16()? as usize;

        let data = RecordData::read(qtype, buffer, data_len)?;

        Ok(DnsRecord {
            domain,
            class,
            ttl,
            data,
        })
    }

    /// Writes the record and returns the number of octets it occupies
    pub fn write<T: PacketBuffer>(&self, buffer: &mut T) -> Result<usize> {
        let start_pos = buffer.pos();

        buffer.write_qname(&self.domain)?;
        buffer.write_u16(self.qtype().to_num())?;
        buffer.write_u16(self.class)?;
        buffer.write_u32(self.ttl)?;

        let len_pos = buffer.pos();
        buffer.write_u16(0)?;

        self.data.write(buffer)?;

        let size = buffer.pos() - (len_pos + 2);
        if size > 0xFFFF {
            return Err(ProtocolError::RdataTooLong(size));
        }
        buffer.set_u16(len_pos, size as u16)?;

        Ok(buffer.pos() - start_pos)
    }
}

/// Trailing TSIG record of a message along with where it started on the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TsigRecord {
    pub key_name: String,
    pub rdata: TsigRdata,
    pub offset: usize,
}

/// Representation of a complete DNS packet
///
/// A TSIG record, when present, is split out of the additional section into
/// `tsig` so that verification can locate the signed portion of the wire data.
#[derive(Clone, Debug, Default)]
pub struct DnsPacket {
    pub header: DnsHeader,
    pub questions: Vec<DnsQuestion>,
    pub answers: Vec<DnsRecord>,
    pub authorities: Vec<DnsRecord>,
    pub resources: Vec<DnsRecord>,
    pub tsig: Option<TsigRecord>,
}

impl DnsPacket {
    pub fn new() -> DnsPacket {
        DnsPacket::default()
    }

    pub fn from_bytes(data: &[u8]) -> Result<DnsPacket> {
        let mut buffer = BytePacketBuffer::new(data);
        DnsPacket::from_buffer(&mut buffer)
    }

    pub fn from_buffer<T: PacketBuffer>(buffer: &mut T) -> Result<DnsPacket> {
        let mut result = DnsPacket::new();
        result.header.read(buffer)?;

        for _ in 0..result.header.questions {
            result.questions.push(DnsQuestion::read(buffer)?);
        }

        for _ in 0..result.header.answers {
            result.answers.push(DnsRecord::read(buffer)?);
        }
        for _ in 0..result.header.authoritative_entries {
            result.authorities.push(DnsRecord::read(buffer)?);
        }

        let additional = result.header.resource_entries as usize;
        for i in 0..additional {
            let offset = buffer.pos();

            let mut domain = String::new();
            buffer.read_qname(&mut domain)?;
            let qtype = QueryType::from_num(buffer.read_u16()?);

            if qtype != QueryType::Tsig {
                buffer.seek(offset)?;
                result.resources.push(DnsRecord::read(buffer)?);
                continue;
            }

            if i + 1 != additional {
                return Err(ProtocolError::MisplacedTsig);
            }

            let _class = buffer.read_u16()?;
            let _ttl = buffer.read_u32()?;
            let data_len = buffer.read_u16()? as usize;
            let rdata = TsigRdata::read(buffer, data_len)?;

            result.tsig = Some(TsigRecord {
                key_name: domain,
                rdata,
                offset,
            });
        }

        Ok(result)
    }

    /// Serializes the packet without any TSIG record, fixing up the counts
    pub fn write<T: PacketBuffer>(&mut self, buffer: &mut T) -> Result<()> {
        self.header.questions = self.questions.len() as u16;
        self.header.answers = self.answers.len() as u16;
        self.header.authoritative_entries = self.authorities.len() as u16;
        self.header.resource_entries = self.resources.len() as u16;

        self.header.write(buffer)?;

        for question in &self.questions {
            question.write(buffer)?;
        }

        for rec in self
            .answers
            .iter()
            .chain(self.authorities.iter())
            .chain(self.resources.iter())
        {
            rec.write(buffer)?;
        }

        Ok(())
    }

    pub fn to_bytes(&mut self) -> Result<Vec<u8>> {
        let mut buffer = VectorPacketBuffer::new();
        self.write(&mut buffer)?;

        Ok(buffer.into_inner())
    }
}
