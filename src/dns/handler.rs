//! Request handling
//!
//! A query passes through parsing, TSIG verification, the question checks,
//! authorization against the key's view and zone lookup before an SOA or AXFR
//! answer is produced. A failed step either refuses the query or, when there
//! is nothing sensible to answer, drops it. Responses to queries whose
//! signature verified are signed; everything else goes out unsigned.

use std::net::SocketAddr;
use std::sync::Arc;

use crate::dns::axfr::{self, RenderLimits, AXFR_FUDGE};
use crate::dns::buffer::VectorPacketBuffer;
use crate::dns::catalog::{self, CatalogZoneBuilder};
use crate::dns::keyring::ViewMap;
use crate::dns::materializer::ZoneMaterializer;
use crate::dns::protocol::{
    DnsHeader, DnsPacket, QueryType, ResultCode, TsigRecord, OPCODE_QUERY,
};
use crate::dns::provider::View;
use crate::dns::tsig::{
    self, append_error_tsig, Keyring, TsigChain, TsigErrorCode, VerifiedRequest, DEFAULT_FUDGE,
};
use crate::dns::zone::MaterializedZone;

/// Largest SOA answer sent back
pub const MAX_SOA_RESPONSE: usize = 512;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerOutcome {
    /// Messages to send back, in order and without length prefixes
    Respond(Vec<Vec<u8>>),
    Drop,
}

pub struct RequestHandler {
    keyring: Arc<Keyring>,
    views: Arc<ViewMap>,
    catalog: Arc<CatalogZoneBuilder>,
    materializer: ZoneMaterializer,
}

impl RequestHandler {
    pub fn new(
        keyring: Arc<Keyring>,
        views: Arc<ViewMap>,
        catalog: Arc<CatalogZoneBuilder>,
        materializer: ZoneMaterializer,
    ) -> RequestHandler {
        RequestHandler {
            keyring,
            views,
            catalog,
            materializer,
        }
    }

    pub fn handle(&self, wire: &[u8], peer: &SocketAddr) -> HandlerOutcome {
        self.handle_at(wire, peer, tsig::now())
    }

    /// Handles a query as if received at `now`, in seconds since the epoch
    pub fn handle_at(&self, wire: &[u8], peer: &SocketAddr, now: u64) -> HandlerOutcome {
        let packet = match DnsPacket::from_bytes(wire) {
            Ok(packet) => packet,
            Err(e) => {
                log::error!("{}: malformed query: {}", peer, e);
                return HandlerOutcome::Drop;
            }
        };

        if packet.header.response {
            log::error!("{}: dropping message with QR set", peer);
            return HandlerOutcome::Drop;
        }

        let verified = match &packet.tsig {
            Some(record) => match tsig::verify_request(wire, record, &self.keyring, now) {
                Ok(verified) => Some(verified),
                Err(e) => match e.error_code() {
                    Some(code @ TsigErrorCode::BadSig) | Some(code @ TsigErrorCode::BadKey) => {
                        log::warn!("{}: {}", peer, e);
                        return self.deny_bad_tsig(&packet, record, code, now);
                    }
                    _ => {
                        log::warn!("{}: dropping query: {}", peer, e);
                        return HandlerOutcome::Drop;
                    }
                },
            },
            None => None,
        };
        let verified = verified.as_ref();

        if packet.header.opcode != OPCODE_QUERY {
            log::warn!("{}: opcode {} refused", peer, packet.header.opcode);
            return self.deny(&packet, verified, now);
        }

        if packet.questions.len() != 1 {
            log::warn!(
                "{}: {} questions in query, refusing",
                peer,
                packet.questions.len()
            );
            return self.deny(&packet, verified, now);
        }

        let question = &packet.questions[0];
        if question.qtype != QueryType::Soa && question.qtype != QueryType::Axfr {
            log::warn!("{}: {} refused", peer, question);
            return self.deny(&packet, verified, now);
        }

        let verified = match verified {
            Some(verified) => verified,
            None => {
                log::warn!("{}: unsigned {} refused", peer, question);
                return self.deny(&packet, None, now);
            }
        };

        let view = match self.views.get(&verified.key.name) {
            Some(view) => view,
            None => {
                log::warn!(
                    "{}: key {} is not bound to a view",
                    peer,
                    verified.key.name
                );
                return self.deny(&packet, Some(verified), now);
            }
        };

        let zone = match self.resolve_zone(&question.name, view) {
            Ok(Some(zone)) => zone,
            Ok(None) => {
                log::warn!("{}: zone {} not found in view {}", peer, question.name, view.name);
                return self.deny(&packet, Some(verified), now);
            }
            Err(e) => {
                log::error!("{}: failed to build {}/{}: {}", peer, view.name, question.name, e);
                return HandlerOutcome::Drop;
            }
        };

        if zone.soa().is_none() {
            log::error!("{}: zone {}/{} has no SOA", peer, view.name, zone.origin());
            return HandlerOutcome::Drop;
        }

        match question.qtype {
            QueryType::Soa => self.respond_soa(&packet, verified, &zone, now, peer),
            _ => self.respond_axfr(&packet, verified, &zone, view, now, peer),
        }
    }

    fn resolve_zone(
        &self,
        qname: &str,
        view: &View,
    ) -> Result<Option<MaterializedZone>, Box<dyn std::error::Error>> {
        if catalog::is_catalog_name(qname, view) {
            Ok(Some(self.catalog.build(qname, view)?))
        } else {
            Ok(self.materializer.materialize(qname, view)?)
        }
    }

    fn response(query: &DnsPacket) -> DnsPacket {
        DnsPacket {
            header: DnsHeader::response_to(&query.header),
            questions: query.questions.clone(),
            ..DnsPacket::default()
        }
    }

    /// REFUSED, signed if the query's signature verified
    fn deny(
        &self,
        query: &DnsPacket,
        verified: Option<&VerifiedRequest>,
        now: u64,
    ) -> HandlerOutcome {
        let mut response = Self::response(query);
        response.header.rescode = ResultCode::REFUSED;

        let mut buffer = VectorPacketBuffer::new();
        if let Err(e) = response.write(&mut buffer) {
            log::error!("Failed to write refusal: {}", e);
            return HandlerOutcome::Drop;
        }

        if let Some(verified) = verified {
            if let Err(e) = TsigChain::answer(verified, now, DEFAULT_FUDGE).sign(&mut buffer) {
                log::error!("Failed to sign refusal: {}", e);
                return HandlerOutcome::Drop;
            }
        }

        HandlerOutcome::Respond(vec![buffer.into_inner()])
    }

    /// REFUSED carrying an unsigned TSIG that reports `code`
    fn deny_bad_tsig(
        &self,
        query: &DnsPacket,
        record: &TsigRecord,
        code: TsigErrorCode,
        now: u64,
    ) -> HandlerOutcome {
        let mut response = Self::response(query);
        response.header.rescode = ResultCode::REFUSED;

        let mut buffer = VectorPacketBuffer::new();
        if let Err(e) = response.write(&mut buffer) {
            log::error!("Failed to write refusal: {}", e);
            return HandlerOutcome::Drop;
        }

        if let Err(e) = append_error_tsig(
            &mut buffer,
            &record.key_name,
            &record.rdata.algorithm,
            now,
            code,
        ) {
            log::error!("Failed to append error TSIG: {}", e);
            return HandlerOutcome::Drop;
        }

        HandlerOutcome::Respond(vec![buffer.into_inner()])
    }

    fn respond_soa(
        &self,
        query: &DnsPacket,
        verified: &VerifiedRequest,
        zone: &MaterializedZone,
        now: u64,
        peer: &SocketAddr,
    ) -> HandlerOutcome {
        let mut response = Self::response(query);
        response.header.authoritative_answer = true;
        response.answers = zone
            .soa()
            .map(|soa| soa.records().into_iter().take(1).collect())
            .unwrap_or_default();

        let mut buffer = VectorPacketBuffer::new();
        if let Err(e) = response.write(&mut buffer) {
            log::error!("{}: failed to write SOA answer: {}", peer, e);
            return HandlerOutcome::Drop;
        }

        let signed = if self.keyring.get(&verified.key.name).is_some() {
            TsigChain::answer(verified, now, DEFAULT_FUDGE)
                .sign(&mut buffer)
                .map(|_| ())
        } else {
            log::error!(
                "{}: key {} vanished after authorization",
                peer,
                verified.key.name
            );
            append_error_tsig(
                &mut buffer,
                &verified.key.name,
                verified.key.algorithm.name(),
                now,
                TsigErrorCode::BadKey,
            )
        };

        if let Err(e) = signed {
            log::error!("{}: failed to sign SOA answer: {}", peer, e);
            return HandlerOutcome::Drop;
        }

        if buffer.len() > MAX_SOA_RESPONSE {
            log::error!(
                "{}: SOA answer for {} is {} bytes, dropping",
                peer,
                zone.origin(),
                buffer.len()
            );
            return HandlerOutcome::Drop;
        }

        log::debug!("{} SOA {}", peer, zone.origin());

        HandlerOutcome::Respond(vec![buffer.into_inner()])
    }

    fn respond_axfr(
        &self,
        query: &DnsPacket,
        verified: &VerifiedRequest,
        zone: &MaterializedZone,
        view: &View,
        now: u64,
        peer: &SocketAddr,
    ) -> HandlerOutcome {
        let chain = TsigChain::answer(verified, now, AXFR_FUDGE);

        let limits = RenderLimits::default();
        match axfr::render(zone, query.header.id, &query.questions[0], chain, limits) {
            Ok(messages) => {
                log::debug!("{} AXFR {}/{}", peer, view.name, zone.origin());
                HandlerOutcome::Respond(messages)
            }
            Err(e) => {
                log::error!("{}: AXFR of {}/{} failed: {}", peer, view.name, zone.origin(), e);
                HandlerOutcome::Drop
            }
        }
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use crate::dns::identifiers::CatalogIdentifierRegistry;
    use crate::dns::protocol::DnsQuestion;
    use crate::dns::provider::tests::{record, zone};
    use crate::dns::provider::{Inventory, MemoryProvider, ZoneDataProvider};
    use crate::dns::rdata::RecordData;
    use crate::dns::serial::SerialCounter;
    use crate::dns::store::MemoryStore;
    use crate::dns::tsig::{TsigAlgorithm, TsigKey};

    pub const NOW: u64 = 1_700_000_000;

    pub fn key() -> TsigKey {
        TsigKey::new("xfr-internal", TsigAlgorithm::HmacSha256, b"internal-secret".to_vec())
            .unwrap()
    }

    pub fn inventory() -> Inventory {
        Inventory {
            views: vec![
                View {
                    id: 1,
                    name: "internal".to_string(),
                },
                View {
                    id: 2,
                    name: "external".to_string(),
                },
            ],
            zones: vec![
                zone(1, "example.com", "internal", 0),
                zone(2, "other.example", "external", 0),
                zone(3, "broken.example", "internal", 0),
            ],
            records: vec![
                record(1, "", "SOA", "ns1 hostmaster 2024010101 3600 600 86400 60"),
                record(1, "", "NS", "ns1"),
                record(1, "ns1", "A", "192.0.2.53"),
                record(1, "www", "A", "192.0.2.80"),
                record(1, "", "TXT", "v=spf1 -all"),
                record(2, "", "SOA", "ns1 hostmaster 1 3600 600 86400 60"),
                record(3, "www", "A", "192.0.2.1"),
            ],
        }
    }

    pub fn handler() -> RequestHandler {
        let provider = Arc::new(MemoryProvider::new(inventory()));
        let store = Arc::new(MemoryStore::new());
        let registry = Arc::new(CatalogIdentifierRegistry::new(store.clone()));
        registry
            .backfill(&provider.list_all_zones().unwrap())
            .unwrap();

        let mut keyring = Keyring::new();
        keyring.insert(key());
        let mut views = ViewMap::new();
        views.insert(&key().name, inventory().views[0].clone());

        let catalog = Arc::new(CatalogZoneBuilder::new(
            provider.clone(),
            registry,
            SerialCounter::load(store).unwrap(),
        ));

        RequestHandler::new(
            Arc::new(keyring),
            Arc::new(views),
            catalog,
            ZoneMaterializer::new(provider),
        )
    }

    pub fn query(name: &str, qtype: QueryType, key: Option<TsigKey>) -> Vec<u8> {
        let mut packet = DnsPacket::new();
        packet.header.id = 0x1234;
        packet
            .questions
            .push(DnsQuestion::new(name.to_string(), qtype));

        let mut buffer = VectorPacketBuffer::new();
        packet.write(&mut buffer).unwrap();
        if let Some(key) = key {
            TsigChain::request(key, NOW, DEFAULT_FUDGE)
                .sign(&mut buffer)
                .unwrap();
        }
        buffer.into_inner()
    }

    fn peer() -> SocketAddr {
        "192.0.2.200:5300".parse().unwrap()
    }

    fn single(outcome: HandlerOutcome) -> DnsPacket {
        match outcome {
            HandlerOutcome::Respond(messages) => {
                assert_eq!(messages.len(), 1);
                DnsPacket::from_bytes(&messages[0]).unwrap()
            }
            HandlerOutcome::Drop => panic!("query was dropped"),
        }
    }

    fn assert_signed_refusal(packet: &DnsPacket) {
        assert_eq!(packet.header.rescode, ResultCode::REFUSED);
        assert!(packet.answers.is_empty());
        let tsig = packet.tsig.as_ref().unwrap();
        assert_eq!(tsig.rdata.error, 0);
        assert_eq!(tsig.rdata.mac.len(), 32);
    }

    #[test]
    fn test_soa_query() {
        let handler = handler();
        let wire = query("example.com", QueryType::Soa, Some(key()));
        let packet = single(handler.handle_at(&wire, &peer(), NOW));

        assert_eq!(packet.header.id, 0x1234);
        assert_eq!(packet.header.rescode, ResultCode::NOERROR);
        assert!(packet.header.authoritative_answer);
        assert_eq!(packet.answers.len(), 1);
        match &packet.answers[0].data {
            RecordData::Soa(soa) => assert_eq!(soa.serial, 2024010101),
            other => panic!("unexpected answer {:?}", other),
        }

        let tsig = packet.tsig.unwrap();
        assert_eq!(tsig.key_name, "xfr-internal");
        assert_eq!(tsig.rdata.mac.len(), 32);
    }

    #[test]
    fn test_axfr_query() {
        let handler = handler();
        let wire = query("Example.COM", QueryType::Axfr, Some(key()));
        let packet = single(handler.handle_at(&wire, &peer(), NOW));

        assert_eq!(packet.questions[0].name, "Example.COM");
        assert_eq!(packet.questions[0].qtype, QueryType::Axfr);
        assert_eq!(packet.answers.len(), 6);
        assert_eq!(packet.answers[0].qtype(), QueryType::Soa);
        assert_eq!(packet.answers[5].qtype(), QueryType::Soa);
        assert!(packet.tsig.is_some());
    }

    #[test]
    fn test_catalog_axfr() {
        let handler = handler();
        let wire = query("internal.catz", QueryType::Axfr, Some(key()));
        let packet = single(handler.handle_at(&wire, &peer(), NOW));

        let ptrs = packet
            .answers
            .iter()
            .filter_map(|r| match &r.data {
                RecordData::Ptr(target) => Some(target.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>();
        assert_eq!(ptrs, vec!["example.com", "broken.example"]);
    }

    #[test]
    fn test_unsigned_query_is_refused_unsigned() {
        let handler = handler();
        let wire = query("example.com", QueryType::Soa, None);
        let packet = single(handler.handle_at(&wire, &peer(), NOW));

        assert_eq!(packet.header.rescode, ResultCode::REFUSED);
        assert!(packet.tsig.is_none());
    }

    #[test]
    fn test_bad_signature() {
        let handler = handler();
        let mut wire = query("example.com", QueryType::Axfr, Some(key()));
        let last = wire.len() - 10;
        wire[last] ^= 0x01;

        let packet = single(handler.handle_at(&wire, &peer(), NOW));
        assert_eq!(packet.header.rescode, ResultCode::REFUSED);
        assert!(packet.answers.is_empty());

        let tsig = packet.tsig.unwrap();
        assert_eq!(tsig.rdata.error, TsigErrorCode::BadSig.to_num());
        assert!(tsig.rdata.mac.is_empty());
    }

    #[test]
    fn test_unknown_key() {
        let handler = handler();
        let stranger =
            TsigKey::new("stranger", TsigAlgorithm::HmacSha256, b"other".to_vec()).unwrap();
        let wire = query("example.com", QueryType::Soa, Some(stranger));

        let packet = single(handler.handle_at(&wire, &peer(), NOW));
        let tsig = packet.tsig.unwrap();
        assert_eq!(tsig.key_name, "stranger");
        assert_eq!(tsig.rdata.error, TsigErrorCode::BadKey.to_num());
        assert!(tsig.rdata.mac.is_empty());
    }

    #[test]
    fn test_stale_signature_is_dropped() {
        let handler = handler();
        let wire = query("example.com", QueryType::Soa, Some(key()));

        assert_eq!(
            handler.handle_at(&wire, &peer(), NOW + 301),
            HandlerOutcome::Drop
        );
    }

    #[test]
    fn test_signed_refusals() {
        let handler = handler();

        let wire = query("example.com", QueryType::A, Some(key()));
        assert_signed_refusal(&single(handler.handle_at(&wire, &peer(), NOW)));

        let wire = query("missing.example", QueryType::Axfr, Some(key()));
        assert_signed_refusal(&single(handler.handle_at(&wire, &peer(), NOW)));

        // Zone of another view
        let wire = query("other.example", QueryType::Axfr, Some(key()));
        assert_signed_refusal(&single(handler.handle_at(&wire, &peer(), NOW)));

        let wire = query("external.catz", QueryType::Axfr, Some(key()));
        assert_signed_refusal(&single(handler.handle_at(&wire, &peer(), NOW)));
    }

    #[test]
    fn test_question_count_is_checked() {
        let handler = handler();

        let mut packet = DnsPacket::new();
        packet.header.id = 1;
        packet
            .questions
            .push(DnsQuestion::new("example.com".to_string(), QueryType::Soa));
        packet
            .questions
            .push(DnsQuestion::new("example.com".to_string(), QueryType::Axfr));

        let mut buffer = VectorPacketBuffer::new();
        packet.write(&mut buffer).unwrap();
        TsigChain::request(key(), NOW, DEFAULT_FUDGE)
            .sign(&mut buffer)
            .unwrap();

        assert_signed_refusal(&single(handler.handle_at(buffer.as_slice(), &peer(), NOW)));
    }

    #[test]
    fn test_garbage_and_responses_are_dropped() {
        let handler = handler();
        assert_eq!(
            handler.handle_at(&[0x12, 0x34, 0x00], &peer(), NOW),
            HandlerOutcome::Drop
        );

        let mut wire = query("example.com", QueryType::Soa, None);
        wire[2] |= 0x80;
        assert_eq!(handler.handle_at(&wire, &peer(), NOW), HandlerOutcome::Drop);
    }

    #[test]
    fn test_zone_without_soa_is_dropped() {
        let handler = handler();
        let wire = query("broken.example", QueryType::Axfr, Some(key()));

        assert_eq!(handler.handle_at(&wire, &peer(), NOW), HandlerOutcome::Drop);
    }
}
