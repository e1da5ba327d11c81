//! DNS Protocol Implementation
//!
//! # Module Structure
//!
//! * `buffer` - Low-level packet buffer operations
//! * `protocol` - DNS protocol definitions and packet handling
//! * `tsig` - Transaction signatures
//! * `handler` - Query policy and dispatch
//! * `server` - UDP and TCP server implementations
//! * `context` - Server configuration and shared state

/// AXFR response rendering
pub mod axfr;

/// Low-level buffer operations for DNS packet handling
pub mod buffer;

/// Catalog zone synthesis
pub mod catalog;

/// Configuration file handling
pub mod config;

/// Server configuration and shared context
pub mod context;

/// Query authentication, authorization and dispatch
pub mod handler;

/// Catalog member identifiers
pub mod identifiers;

/// TSIG key and view bindings
pub mod keyring;

/// Zone construction from provider records
pub mod materializer;

/// Domain name helpers
pub mod names;

/// Length-prefixed TCP framing
pub mod netutil;

/// DNS protocol definitions and packet structures
pub mod protocol;

/// Zone data sources
pub mod provider;

/// Typed record data
pub mod rdata;

/// Persisted catalog serial
pub mod serial;

/// UDP and TCP DNS server implementations
pub mod server;

/// Durable endpoint state
pub mod store;

/// Transaction signatures (RFC 8945)
pub mod tsig;

/// In-memory zones
pub mod zone;
