//! AXFR response rendering
//!
//! A zone is sent as a run of messages. The first record of the first message
//! and the last record of the last message are the zone's SOA. Each message is
//! signed, with its MAC chained to the one before it, so the signing state is
//! threaded through the loop that fills the messages.

use std::iter;

use derive_more::{Display, Error, From};

use crate::dns::buffer::{BufferError, PacketBuffer, VectorPacketBuffer};
use crate::dns::names;
use crate::dns::protocol::{DnsHeader, DnsQuestion, DnsRecord, ProtocolError, QueryType};
use crate::dns::tsig::{TsigChain, TsigError};
use crate::dns::zone::{MaterializedZone, RecordSet};

/// Largest message that fits a TCP length prefix
pub const MAX_WIRE: usize = 65535;

/// Space kept free in every message for its TSIG record
pub const RESERVED_TSIG: usize = 300;

pub const AXFR_FUDGE: u16 = 300;

const ANCOUNT_OFFSET: usize = 6;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RenderLimits {
    pub max_size: usize,
    pub reserved: usize,
}

impl Default for RenderLimits {
    fn default() -> Self {
        RenderLimits {
            max_size: MAX_WIRE,
            reserved: RESERVED_TSIG,
        }
    }
}

#[derive(Debug, Display, From, Error)]
pub enum RenderError {
    #[display(fmt = "zone has no SOA at its origin")]
    #[from(ignore)]
    MissingSoa,
    #[display(fmt = "{} record at {} does not fit in a message", rtype, name)]
    #[from(ignore)]
    RecordTooLarge { name: String, rtype: QueryType },
    Protocol(ProtocolError),
    #[display(fmt = "signing failed: {}", _0)]
    Tsig(TsigError),
}

impl From<BufferError> for RenderError {
    fn from(err: BufferError) -> Self {
        RenderError::Protocol(ProtocolError::Buffer(err))
    }
}

type Result<T> = std::result::Result<T, RenderError>;

/// One message being filled with answers
struct MessageBuilder {
    buffer: VectorPacketBuffer,
    answers: u16,
    limits: RenderLimits,
}

impl MessageBuilder {
    fn new(id: u16, question: &DnsQuestion, limits: RenderLimits) -> Result<MessageBuilder> {
        let header = DnsHeader {
            id,
            response: true,
            authoritative_answer: true,
            questions: 1,
            ..DnsHeader::default()
        };

        let mut buffer = VectorPacketBuffer::new();
        header.write(&mut buffer)?;
        question.write(&mut buffer)?;

        Ok(MessageBuilder {
            buffer,
            answers: 0,
            limits,
        })
    }

    fn fits(&self) -> bool {
        let len = self.buffer.len();
        len <= self.limits.max_size && self.limits.max_size - len >= self.limits.reserved
    }

    /// Appends all of `records` or, if they would crowd out the TSIG
    /// record, none of them
    fn try_append(&mut self, records: &[DnsRecord]) -> Result<bool> {
        let mark = self.buffer.len();
        for record in records {
            record.write(&mut self.buffer)?;
        }

        if !self.fits() || self.answers as usize + records.len() > u16::MAX as usize {
            self.buffer.truncate(mark);
            return Ok(false);
        }

        self.answers += records.len() as u16;

        Ok(true)
    }

    fn is_empty(&self) -> bool {
        self.answers == 0
    }

    fn finish(mut self, chain: TsigChain) -> Result<(Vec<u8>, TsigChain)> {
        self.buffer.set_u16(ANCOUNT_OFFSET, self.answers)?;
        let chain = chain.sign(&mut self.buffer)?;

        Ok((self.buffer.into_inner(), chain))
    }
}

/// Accumulator threaded through the record sets
struct RenderState {
    current: MessageBuilder,
    chain: TsigChain,
    messages: Vec<Vec<u8>>,
}

struct Renderer<'a> {
    id: u16,
    question: &'a DnsQuestion,
    limits: RenderLimits,
}

impl<'a> Renderer<'a> {
    fn start(&self, chain: TsigChain) -> Result<RenderState> {
        Ok(RenderState {
            current: MessageBuilder::new(self.id, self.question, self.limits)?,
            chain,
            messages: Vec::new(),
        })
    }

    fn flush(&self, state: RenderState) -> Result<RenderState> {
        let RenderState {
            current,
            chain,
            mut messages,
        } = state;

        let (wire, chain) = current.finish(chain)?;
        messages.push(wire);

        Ok(RenderState {
            current: MessageBuilder::new(self.id, self.question, self.limits)?,
            chain,
            messages,
        })
    }

    fn push(&self, mut state: RenderState, rrset: &RecordSet) -> Result<RenderState> {
        let records = rrset.records();

        if state.current.try_append(&records)? {
            return Ok(state);
        }

        if !state.current.is_empty() {
            state = self.flush(state)?;
            if state.current.try_append(&records)? {
                return Ok(state);
            }
        }

        // The set does not fit even an empty message, spread it out
        for record in &records {
            let single = std::slice::from_ref(record);
            if state.current.try_append(single)? {
                continue;
            }

            if !state.current.is_empty() {
                state = self.flush(state)?;
                if state.current.try_append(single)? {
                    continue;
                }
            }

            return Err(RenderError::RecordTooLarge {
                name: record.domain.clone(),
                rtype: record.qtype(),
            });
        }

        Ok(state)
    }
}

/// Renders `zone` as a sequence of signed AXFR messages
///
/// The messages are returned without TCP length prefixes.
pub fn render(
    zone: &MaterializedZone,
    id: u16,
    question: &DnsQuestion,
    chain: TsigChain,
    limits: RenderLimits,
) -> Result<Vec<Vec<u8>>> {
    let soa = zone.soa().ok_or(RenderError::MissingSoa)?;
    let origin = zone.origin();

    let body = zone
        .rrsets()
        .filter(|s| !(s.rtype == QueryType::Soa && names::eq(&s.name, origin)));

    let renderer = Renderer {
        id,
        question,
        limits,
    };

    let state = iter::once(soa)
        .chain(body)
        .chain(iter::once(soa))
        .try_fold(renderer.start(chain)?, |state, rrset| {
            renderer.push(state, rrset)
        })?;

    let RenderState {
        current,
        chain,
        mut messages,
    } = state;
    let (wire, _) = current.finish(chain)?;
    messages.push(wire);

    Ok(messages)
}
