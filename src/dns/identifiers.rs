//! Catalog member identifiers
//!
//! Each zone is listed in the catalog under a short random label. The label is
//! created when the zone is created, replaced when the zone is renamed and is
//! otherwise never touched, so secondaries can track members across renames.

use std::sync::Arc;

use data_encoding::BASE32_NOPAD;
use parking_lot::Mutex;
use rand::rngs::OsRng;
use rand::RngCore;

use crate::dns::provider::{ZoneInfo, ZoneRef};
use crate::dns::store::{IdentifierStore, Result, StoreError};

pub const IDENTIFIER_LEN: usize = 26;

/// Rows written per backfill batch
pub const BACKFILL_BATCH: usize = 500;

/// Attempts made before a run of identifier collisions is reported
const MAX_ATTEMPTS: usize = 8;

/// Produces a fresh identifier: 16 random bytes, base32, lowercase
pub fn generate_identifier() -> String {
    let mut bytes = [0u8; 16];
    OsRng.fill_bytes(&mut bytes);

    let mut identifier = BASE32_NOPAD.encode(&bytes).to_ascii_lowercase();
    identifier.truncate(IDENTIFIER_LEN);

    identifier
}

pub struct CatalogIdentifierRegistry {
    store: Arc<dyn IdentifierStore>,
    lock: Mutex<()>,
}

impl CatalogIdentifierRegistry {
    pub fn new(store: Arc<dyn IdentifierStore>) -> CatalogIdentifierRegistry {
        CatalogIdentifierRegistry {
            store,
            lock: Mutex::new(()),
        }
    }

    pub fn identifier(&self, zone: ZoneRef) -> Result<Option<String>> {
        self.store.identifier(zone)
    }

    /// Returns the zone's identifier, creating one if it has none
    pub fn ensure_identifier(&self, zone: &ZoneInfo) -> Result<String> {
        let _guard = self.lock.lock();

        if let Some(existing) = self.store.identifier(zone.id)? {
            return Ok(existing);
        }

        retry_on_conflict(|| self.store.insert_identifier(zone.id, &generate_identifier()))
    }

    /// Replaces the zone's identifier with a new one
    pub fn regenerate(&self, zone: &ZoneInfo) -> Result<String> {
        let _guard = self.lock.lock();

        let identifier = retry_on_conflict(|| {
            let identifier = generate_identifier();
            self.store.replace_identifier(zone.id, &identifier)?;
            Ok(identifier)
        })?;

        log::info!(
            "Regenerated catalog identifier for zone {} ({})",
            zone.name,
            identifier
        );

        Ok(identifier)
    }

    /// Creates identifiers for every zone lacking one and returns how many
    /// were created
    pub fn backfill(&self, zones: &[ZoneInfo]) -> Result<usize> {
        let _guard = self.lock.lock();

        let existing = self.store.zones_with_identifiers()?;
        let missing = zones
            .iter()
            .filter(|z| !existing.contains(&z.id))
            .map(|z| z.id)
            .collect::<Vec<_>>();

        for batch in missing.chunks(BACKFILL_BATCH) {
            retry_on_conflict(|| {
                let rows = batch
                    .iter()
                    .map(|zone| (*zone, generate_identifier()))
                    .collect::<Vec<_>>();
                self.store.insert_identifiers(&rows)
            })?;
        }

        if !missing.is_empty() {
            log::info!("Created catalog identifiers for {} zones", missing.len());
        }

        Ok(missing.len())
    }
}

fn retry_on_conflict<T, F>(mut op: F) -> Result<T>
where
    F: FnMut() -> Result<T>,
{
    let mut attempt = 1;
    loop {
        match op() {
            Err(StoreError::Conflict { zone, .. }) if attempt < MAX_ATTEMPTS => {
                log::debug!("Identifier collision for zone {}, retrying", zone);
                attempt += 1;
            }
            other => return other,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::dns::provider::tests::zone;
    use crate::dns::store::MemoryStore;

    fn registry() -> (Arc<MemoryStore>, CatalogIdentifierRegistry) {
        let store = Arc::new(MemoryStore::new());
        let registry = CatalogIdentifierRegistry::new(store.clone());
        (store, registry)
    }

    #[test]
    fn test_identifier_format() {
        for _ in 0..64 {
            let identifier = generate_identifier();
            assert_eq!(identifier.len(), IDENTIFIER_LEN);
            assert!(identifier
                .chars()
                .all(|c| c.is_ascii_lowercase() || ('2'..='7').contains(&c)));
        }
    }

    #[test]
    fn test_ensure_is_idempotent() {
        let (_, registry) = registry();
        let zone = zone(1, "example.com", "internal", 0);

        let first = registry.ensure_identifier(&zone).unwrap();
        let second = registry.ensure_identifier(&zone).unwrap();
        assert_eq!(first, second);
        assert_eq!(registry.identifier(1).unwrap(), Some(first));
    }

    #[test]
    fn test_regenerate_replaces() {
        let (_, registry) = registry();
        let zone = zone(1, "example.com", "internal", 0);

        let first = registry.ensure_identifier(&zone).unwrap();
        let second = registry.regenerate(&zone).unwrap();
        assert_ne!(first, second);
        assert_eq!(registry.identifier(1).unwrap(), Some(second));
    }

    #[test]
    fn test_backfill_skips_existing() {
        let (store, registry) = registry();
        let zones = (1..=1200)
            .map(|id| zone(id, &format!("z{}.test", id), "internal", 0))
            .collect::<Vec<_>>();

        let kept = registry.ensure_identifier(&zones[0]).unwrap();
        assert_eq!(registry.backfill(&zones).unwrap(), 1199);
        assert_eq!(registry.backfill(&zones).unwrap(), 0);

        assert_eq!(registry.identifier(1).unwrap(), Some(kept));

        let state = store.snapshot();
        assert_eq!(state.identifiers().len(), 1200);
        let unique = state.identifiers().values().collect::<HashSet<_>>();
        assert_eq!(unique.len(), 1200);
    }
}
