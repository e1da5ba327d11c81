//! Transaction signatures (RFC 8945)
//!
//! Requests are verified against a [`Keyring`]. Responses are signed through a
//! [`TsigChain`], an accumulator value that carries the previous MAC from one
//! message to the next so that multi-message answers can be produced by
//! threading it through a fold.

use std::collections::HashMap;
use std::fmt;

use derive_more::{Display, Error, From};
use hmac::{Hmac, Mac};
use md5::Md5;
use sha1::Sha1;
use sha2::{Sha224, Sha256, Sha384, Sha512};

use crate::dns::buffer::{BufferError, PacketBuffer, VectorPacketBuffer};
use crate::dns::names::{self, NameError};
use crate::dns::protocol::{ProtocolError, QueryType, TsigRecord, CLASS_ANY, HEADER_LEN};
use crate::dns::rdata::RdataError;

/// Permitted clock skew, in seconds, for everything this server signs
pub const DEFAULT_FUDGE: u16 = 300;

/// Offset of the additional record count in the header
const ARCOUNT_OFFSET: usize = 10;

#[derive(Debug, Display, From, Error)]
pub enum TsigError {
    #[display(fmt = "unknown key or algorithm for {}", _0)]
    #[from(ignore)]
    #[error(ignore)]
    BadKey(String),
    #[display(fmt = "signature mismatch for key {}", _0)]
    #[from(ignore)]
    #[error(ignore)]
    BadSig(String),
    #[display(fmt = "signature time {} outside of {} +/- {}", signed, now, fudge)]
    #[from(ignore)]
    BadTime { signed: u64, now: u64, fudge: u16 },
    #[display(fmt = "message too short to carry a signature")]
    #[from(ignore)]
    Truncated,
    #[display(fmt = "buffer error: {}", _0)]
    Buffer(BufferError),
    #[display(fmt = "protocol error: {}", _0)]
    Protocol(ProtocolError),
}

impl TsigError {
    /// The code to report back in an error TSIG, if any
    pub fn error_code(&self) -> Option<TsigErrorCode> {
        match self {
            TsigError::BadKey(_) => Some(TsigErrorCode::BadKey),
            TsigError::BadSig(_) => Some(TsigErrorCode::BadSig),
            TsigError::BadTime { .. } => Some(TsigErrorCode::BadTime),
            _ => None,
        }
    }
}

type Result<T> = std::result::Result<T, TsigError>;

/// Error field values of the TSIG record
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TsigErrorCode {
    NoError = 0,
    BadSig = 16,
    BadKey = 17,
    BadTime = 18,
}

impl TsigErrorCode {
    pub fn to_num(self) -> u16 {
        self as u16
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum TsigAlgorithm {
    HmacMd5,
    HmacSha1,
    HmacSha224,
    HmacSha256,
    HmacSha384,
    HmacSha512,
}

impl TsigAlgorithm {
    /// Domain name identifying the algorithm on the wire
    pub fn name(self) -> &'static str {
        match self {
            TsigAlgorithm::HmacMd5 => "hmac-md5.sig-alg.reg.int",
            TsigAlgorithm::HmacSha1 => "hmac-sha1",
            TsigAlgorithm::HmacSha224 => "hmac-sha224",
            TsigAlgorithm::HmacSha256 => "hmac-sha256",
            TsigAlgorithm::HmacSha384 => "hmac-sha384",
            TsigAlgorithm::HmacSha512 => "hmac-sha512",
        }
    }

    /// Accepts the wire names as well as the short `hmac-md5` spelling used
    /// in configuration files
    pub fn from_name(name: &str) -> Option<TsigAlgorithm> {
        match names::key(name).as_str() {
            "hmac-md5.sig-alg.reg.int" | "hmac-md5" => Some(TsigAlgorithm::HmacMd5),
            "hmac-sha1" => Some(TsigAlgorithm::HmacSha1),
            "hmac-sha224" => Some(TsigAlgorithm::HmacSha224),
            "hmac-sha256" => Some(TsigAlgorithm::HmacSha256),
            "hmac-sha384" => Some(TsigAlgorithm::HmacSha384),
            "hmac-sha512" => Some(TsigAlgorithm::HmacSha512),
            _ => None,
        }
    }

    pub fn mac_len(self) -> usize {
        match self {
            TsigAlgorithm::HmacMd5 => 16,
            TsigAlgorithm::HmacSha1 => 20,
            TsigAlgorithm::HmacSha224 => 28,
            TsigAlgorithm::HmacSha256 => 32,
            TsigAlgorithm::HmacSha384 => 48,
            TsigAlgorithm::HmacSha512 => 64,
        }
    }
}

impl fmt::Display for TsigAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Brings a key name into the absolute, lowercase form used as lookup key
pub fn normalize_key_name(name: &str) -> std::result::Result<String, NameError> {
    Ok(names::fqdn(&names::normalize(name)?.to_ascii_lowercase()))
}

/// A shared secret along with its name and algorithm
#[derive(Clone, PartialEq, Eq)]
pub struct TsigKey {
    pub name: String,
    pub algorithm: TsigAlgorithm,
    pub secret: Vec<u8>,
}

impl TsigKey {
    pub fn new(
        name: &str,
        algorithm: TsigAlgorithm,
        secret: Vec<u8>,
    ) -> std::result::Result<TsigKey, NameError> {
        Ok(TsigKey {
            name: normalize_key_name(name)?,
            algorithm,
            secret,
        })
    }
}

impl fmt::Debug for TsigKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TsigKey")
            .field("name", &self.name)
            .field("algorithm", &self.algorithm)
            .finish()
    }
}

/// Immutable set of keys indexed by normalized name
#[derive(Clone, Debug, Default)]
pub struct Keyring {
    keys: HashMap<String, TsigKey>,
}

impl Keyring {
    pub fn new() -> Keyring {
        Keyring::default()
    }

    pub fn insert(&mut self, key: TsigKey) -> Option<TsigKey> {
        self.keys.insert(key.name.clone(), key)
    }

    pub fn get(&self, name: &str) -> Option<&TsigKey> {
        let name = normalize_key_name(name).ok()?;
        self.keys.get(&name)
    }

    #[cfg(test)]
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.keys.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// RDATA of a TSIG record
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TsigRdata {
    pub algorithm: String,
    pub time_signed: u64,
    pub fudge: u16,
    pub mac: Vec<u8>,
    pub original_id: u16,
    pub error: u16,
    pub other: Vec<u8>,
}

impl TsigRdata {
    pub fn read<T: PacketBuffer>(
        buffer: &mut T,
        len: usize,
    ) -> std::result::Result<TsigRdata, ProtocolError> {
        let start = buffer.pos();

        let mut algorithm = String::new();
        buffer.read_qname(&mut algorithm)?;

        let time_hi = buffer.read_u16()? as u64;
        let time_lo = buffer.read_u32()? as u64;
        let fudge = buffer.read_u16()?;
        let mac_len = buffer.read_u16()? as usize;
        let mac = buffer.read_bytes(mac_len)?;
        let original_id = buffer.read_u16()?;
        let error = buffer.read_u16()?;
        let other_len = buffer.read_u16()? as usize;
        let other = buffer.read_bytes(other_len)?;

        let consumed = buffer.pos() - start;
        if consumed != len {
            return Err(RdataError::BadLength {
                rtype: QueryType::Tsig,
                expected: len,
                actual: consumed,
            }
            .into());
        }

        Ok(TsigRdata {
            algorithm,
            time_signed: (time_hi << 32) | time_lo,
            fudge,
            mac,
            original_id,
            error,
            other,
        })
    }

    pub fn write<T: PacketBuffer>(&self, buffer: &mut T) -> std::result::Result<(), BufferError> {
        buffer.write_qname(&self.algorithm)?;
        write_time(buffer, self.time_signed)?;
        buffer.write_u16(self.fudge)?;
        buffer.write_u16(self.mac.len() as u16)?;
        buffer.write_bytes(&self.mac)?;
        buffer.write_u16(self.original_id)?;
        buffer.write_u16(self.error)?;
        buffer.write_u16(self.other.len() as u16)?;
        buffer.write_bytes(&self.other)?;

        Ok(())
    }
}

fn write_time<T: PacketBuffer>(buffer: &mut T, time: u64) -> std::result::Result<(), BufferError> {
    buffer.write_u16(((time >> 32) & 0xFFFF) as u16)?;
    buffer.write_u32((time & 0xFFFF_FFFF) as u32)
}

/// Seconds since the epoch as used for `time_signed`
pub fn now() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}

enum MacContext {
    Md5(Hmac<Md5>),
    Sha1(Hmac<Sha1>),
    Sha224(Hmac<Sha224>),
    Sha256(Hmac<Sha256>),
    Sha384(Hmac<Sha384>),
    Sha512(Hmac<Sha512>),
}

impl MacContext {
    fn new(key: &TsigKey) -> Result<MacContext> {
        let secret = &key.secret;
        let bad_key = |_| TsigError::BadKey(key.name.clone());

        Ok(match key.algorithm {
            TsigAlgorithm::HmacMd5 => MacContext::Md5(Hmac::new_from_slice(secret).map_err(bad_key)?),
            TsigAlgorithm::HmacSha1 => MacContext::Sha1(Hmac::new_from_slice(secret).map_err(bad_key)?),
            TsigAlgorithm::HmacSha224 => {
                MacContext::Sha224(Hmac::new_from_slice(secret).map_err(bad_key)?)
            }
            TsigAlgorithm::HmacSha256 => {
                MacContext::Sha256(Hmac::new_from_slice(secret).map_err(bad_key)?)
            }
            TsigAlgorithm::HmacSha384 => {
                MacContext::Sha384(Hmac::new_from_slice(secret).map_err(bad_key)?)
            }
            TsigAlgorithm::HmacSha512 => {
                MacContext::Sha512(Hmac::new_from_slice(secret).map_err(bad_key)?)
            }
        })
    }

    fn update(&mut self, data: &[u8]) {
        match self {
            MacContext::Md5(mac) => mac.update(data),
            MacContext::Sha1(mac) => mac.update(data),
            MacContext::Sha224(mac) => mac.update(data),
            MacContext::Sha256(mac) => mac.update(data),
            MacContext::Sha384(mac) => mac.update(data),
            MacContext::Sha512(mac) => mac.update(data),
        }
    }

    fn finalize(self) -> Vec<u8> {
        match self {
            MacContext::Md5(mac) => mac.finalize().into_bytes().to_vec(),
            MacContext::Sha1(mac) => mac.finalize().into_bytes().to_vec(),
            MacContext::Sha224(mac) => mac.finalize().into_bytes().to_vec(),
            MacContext::Sha256(mac) => mac.finalize().into_bytes().to_vec(),
            MacContext::Sha384(mac) => mac.finalize().into_bytes().to_vec(),
            MacContext::Sha512(mac) => mac.finalize().into_bytes().to_vec(),
        }
    }

    /// Constant time comparison against a received MAC
    fn verify(self, expected: &[u8]) -> bool {
        match self {
            MacContext::Md5(mac) => mac.verify_slice(expected).is_ok(),
            MacContext::Sha1(mac) => mac.verify_slice(expected).is_ok(),
            MacContext::Sha224(mac) => mac.verify_slice(expected).is_ok(),
            MacContext::Sha256(mac) => mac.verify_slice(expected).is_ok(),
            MacContext::Sha384(mac) => mac.verify_slice(expected).is_ok(),
            MacContext::Sha512(mac) => mac.verify_slice(expected).is_ok(),
        }
    }

    fn update_prior_mac(&mut self, mac: &[u8]) {
        self.update(&(mac.len() as u16).to_be_bytes());
        self.update(mac);
    }

    /// Full TSIG variables: key name, class, ttl, algorithm, timers, error
    /// and other data
    fn update_variables(&mut self, key_name: &str, rdata: &TsigRdata) -> Result<()> {
        let mut buffer = VectorPacketBuffer::new();
        buffer.write_canonical_qname(key_name)?;
        buffer.write_u16(CLASS_ANY)?;
        buffer.write_u32(0)?;
        buffer.write_canonical_qname(&rdata.algorithm)?;
        write_time(&mut buffer, rdata.time_signed)?;
        buffer.write_u16(rdata.fudge)?;
        buffer.write_u16(rdata.error)?;
        buffer.write_u16(rdata.other.len() as u16)?;
        buffer.write_bytes(&rdata.other)?;

        self.update(buffer.as_slice());

        Ok(())
    }

    fn update_timers(&mut self, rdata: &TsigRdata) -> Result<()> {
        let mut buffer = VectorPacketBuffer::new();
        write_time(&mut buffer, rdata.time_signed)?;
        buffer.write_u16(rdata.fudge)?;

        self.update(buffer.as_slice());

        Ok(())
    }
}

/// Outcome of a successful request verification
#[derive(Clone, Debug)]
pub struct VerifiedRequest {
    pub key: TsigKey,
    pub mac: Vec<u8>,
    pub time_signed: u64,
}

/// Checks the TSIG of a received message
///
/// `wire` is the message exactly as received and `tsig` the record parsed
/// from it. The key and algorithm are checked first, then the MAC and
/// finally the time window.
pub fn verify_request(
    wire: &[u8],
    tsig: &TsigRecord,
    keyring: &Keyring,
    now: u64,
) -> Result<VerifiedRequest> {
    let key = keyring
        .get(&tsig.key_name)
        .ok_or_else(|| TsigError::BadKey(tsig.key_name.clone()))?;

    if TsigAlgorithm::from_name(&tsig.rdata.algorithm) != Some(key.algorithm) {
        return Err(TsigError::BadKey(tsig.key_name.clone()));
    }

    if tsig.offset < HEADER_LEN || tsig.offset > wire.len() {
        return Err(TsigError::Truncated);
    }

    let mut signed = wire[..tsig.offset].to_vec();
    signed[0..2].copy_from_slice(&tsig.rdata.original_id.to_be_bytes());
    let arcount = u16::from_be_bytes([signed[ARCOUNT_OFFSET], signed[ARCOUNT_OFFSET + 1]]);
    signed[ARCOUNT_OFFSET..ARCOUNT_OFFSET + 2]
        .copy_from_slice(&arcount.saturating_sub(1).to_be_bytes());

    let mut ctx = MacContext::new(key)?;
    ctx.update(&signed);
    ctx.update_variables(&tsig.key_name, &tsig.rdata)?;

    if !ctx.verify(&tsig.rdata.mac) {
        return Err(TsigError::BadSig(tsig.key_name.clone()));
    }

    let signed_at = tsig.rdata.time_signed;
    if now.max(signed_at) - now.min(signed_at) > tsig.rdata.fudge as u64 {
        return Err(TsigError::BadTime {
            signed: signed_at,
            now,
            fudge: tsig.rdata.fudge,
        });
    }

    Ok(VerifiedRequest {
        key: key.clone(),
        mac: tsig.rdata.mac.clone(),
        time_signed: signed_at,
    })
}

#[derive(Clone, Debug)]
enum ChainState {
    /// Signing a request, nothing precedes the message
    Request,
    /// First answer to a request, prefixed with the request MAC
    Answer { prior_mac: Vec<u8> },
    /// Later message of a multi-message answer, timers only
    Continuation { prior_mac: Vec<u8> },
}

/// Signing state threaded through a sequence of messages
#[derive(Clone, Debug)]
pub struct TsigChain {
    key: TsigKey,
    state: ChainState,
    time_signed: u64,
    fudge: u16,
}

impl TsigChain {
    pub fn request(key: TsigKey, time_signed: u64, fudge: u16) -> TsigChain {
        TsigChain {
            key,
            state: ChainState::Request,
            time_signed,
            fudge,
        }
    }

    pub fn answer(request: &VerifiedRequest, time_signed: u64, fudge: u16) -> TsigChain {
        TsigChain {
            key: request.key.clone(),
            state: ChainState::Answer {
                prior_mac: request.mac.clone(),
            },
            time_signed,
            fudge,
        }
    }

    /// MAC of the most recently signed message
    #[cfg(test)]
    pub fn last_mac(&self) -> Option<&[u8]> {
        match &self.state {
            ChainState::Request => None,
            ChainState::Answer { prior_mac } | ChainState::Continuation { prior_mac } => {
                Some(prior_mac)
            }
        }
    }

    /// Signs the complete message in `buffer`, appends its TSIG record and
    /// returns the state for the next message
    pub fn sign(self, buffer: &mut VectorPacketBuffer) -> Result<TsigChain> {
        if buffer.len() < HEADER_LEN {
            return Err(TsigError::Truncated);
        }

        let mut ctx = MacContext::new(&self.key)?;
        match &self.state {
            ChainState::Request => {}
            ChainState::Answer { prior_mac } | ChainState::Continuation { prior_mac } => {
                ctx.update_prior_mac(prior_mac)
            }
        }
        ctx.update(buffer.as_slice());

        let mut rdata = TsigRdata {
            algorithm: self.key.algorithm.name().to_string(),
            time_signed: self.time_signed,
            fudge: self.fudge,
            mac: Vec::new(),
            original_id: u16::from_be_bytes([buffer.get(0)?, buffer.get(1)?]),
            error: TsigErrorCode::NoError.to_num(),
            other: Vec::new(),
        };

        match self.state {
            ChainState::Continuation { .. } => ctx.update_timers(&rdata)?,
            _ => ctx.update_variables(&self.key.name, &rdata)?,
        }

        rdata.mac = ctx.finalize();
        append_tsig(buffer, &self.key.name, &rdata)?;

        let prior_mac = rdata.mac;
        let state = match self.state {
            ChainState::Request => ChainState::Answer { prior_mac },
            _ => ChainState::Continuation { prior_mac },
        };

        Ok(TsigChain { state, ..self })
    }
}

/// Appends an unsigned TSIG record reporting `error`
///
/// Used when the request could not be authenticated, in which case the
/// answer must not carry a MAC.
pub fn append_error_tsig(
    buffer: &mut VectorPacketBuffer,
    key_name: &str,
    algorithm: &str,
    time_signed: u64,
    error: TsigErrorCode,
) -> Result<()> {
    let rdata = TsigRdata {
        algorithm: algorithm.to_string(),
        time_signed,
        fudge: DEFAULT_FUDGE,
        mac: Vec::new(),
        original_id: u16::from_be_bytes([buffer.get(0)?, buffer.get(1)?]),
        error: error.to_num(),
        other: Vec::new(),
    };

    append_tsig(buffer, key_name, &rdata)
}

/// Writes the TSIG record at the end of the message and bumps ARCOUNT
fn append_tsig(buffer: &mut VectorPacketBuffer, key_name: &str, rdata: &TsigRdata) -> Result<()> {
    let end = buffer.len();
    buffer.seek(end)?;

    buffer.write_qname(key_name)?;
    buffer.write_u16(QueryType::Tsig.to_num())?;
    buffer.write_u16(CLASS_ANY)?;
    buffer.write_u32(0)?;

    let len_pos = buffer.pos();
    buffer.write_u16(0)?;
    rdata.write(buffer)?;
    let rdlen = buffer.pos() - (len_pos + 2);
    buffer.set_u16(len_pos, rdlen as u16)?;

    let arcount = u16::from_be_bytes([buffer.get(ARCOUNT_OFFSET)?, buffer.get(ARCOUNT_OFFSET + 1)?]);
    buffer.set_u16(ARCOUNT_OFFSET, arcount + 1)?;

    Ok(())
}
