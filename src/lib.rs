//! Zone transfer endpoint
//!
//! An authoritative-transfer service that answers TSIG-signed `SOA` and `AXFR`
//! queries over UDP and TCP. Zone content is pulled from a zone data provider
//! on every request, and a catalog zone listing the zones of each view is
//! synthesized on the fly so secondaries can discover new zones on their own.
//!
//! # Architecture
//!
//! Everything lives in the `dns` module tree:
//! * wire codec (`buffer`, `protocol`, `rdata`, `names`) and `tsig`
//! * zone assembly (`materializer`, `catalog`, `zone`) and `axfr` rendering
//! * request policy in `handler`, sockets in `server`
//! * startup wiring in `context`

/// DNS transfer endpoint implementation
pub mod dns;
