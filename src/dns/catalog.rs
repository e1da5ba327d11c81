//! Catalog zone synthesis
//!
//! A catalog zone lists the zones of a view so that secondaries can pick up
//! new members without configuration changes. Each member appears as a PTR
//! record at `<identifier>.zones.<catalog>` pointing at the member zone, with
//! an optional `group` TXT record naming its DNSSEC policy.
//!
//! The catalog serial is global. Every build checks whether any active zone in
//! any view changed since the previous build and bumps the serial once if so.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use derive_more::{Display, Error, From};
use parking_lot::Mutex;

use crate::dns::identifiers::CatalogIdentifierRegistry;
use crate::dns::names::{self, NameError};
use crate::dns::provider::{ProviderError, View, ZoneDataProvider};
use crate::dns::rdata::{RecordData, SoaData};
use crate::dns::serial::SerialCounter;
use crate::dns::store::StoreError;
use crate::dns::zone::{MaterializedZone, ZoneError};

/// Label of the catalog zone, on its own or below a view name
pub const CATALOG_LABEL: &str = "catz";

const CATALOG_REFRESH: u32 = 60;
const CATALOG_RETRY: u32 = 10;
const CATALOG_EXPIRE: u32 = 1_209_600;
const CATALOG_SCHEMA_VERSION: &str = "2";

#[derive(Debug, Display, From, Error)]
pub enum CatalogError {
    Provider(ProviderError),
    Store(StoreError),
    Name(NameError),
    Zone(ZoneError),
    #[display(fmt = "catalog member name {} is outside the catalog", _0)]
    #[from(ignore)]
    #[error(ignore)]
    NotSubdomain(String),
}

type Result<T> = std::result::Result<T, CatalogError>;

/// True if `qname` names the catalog of `view`
pub fn is_catalog_name(qname: &str, view: &View) -> bool {
    names::eq(qname, CATALOG_LABEL)
        || names::eq(qname, &format!("{}.{}", view.name, CATALOG_LABEL))
}

struct CatalogState {
    serial: SerialCounter,
    last_observed: Option<DateTime<Utc>>,
}

pub struct CatalogZoneBuilder {
    provider: Arc<dyn ZoneDataProvider>,
    identifiers: Arc<CatalogIdentifierRegistry>,
    state: Mutex<CatalogState>,
}

impl CatalogZoneBuilder {
    pub fn new(
        provider: Arc<dyn ZoneDataProvider>,
        identifiers: Arc<CatalogIdentifierRegistry>,
        serial: SerialCounter,
    ) -> CatalogZoneBuilder {
        CatalogZoneBuilder {
            provider,
            identifiers,
            state: Mutex::new(CatalogState {
                serial,
                last_observed: None,
            }),
        }
    }

    /// Current serial, without checking for changes
    pub fn serial(&self) -> u32 {
        self.state.lock().serial.peek()
    }

    /// Bumps the serial if the most recently updated active zone differs from
    /// the one seen last time, and returns the serial to publish
    pub fn observe_changes(&self) -> Result<u32> {
        let mut state = self.state.lock();

        let latest = self.provider.most_recently_updated_active_zone()?;
        let latest_update = latest.as_ref().map(|z| z.last_updated);

        if latest_update != state.last_observed {
            if let Some(zone) = &latest {
                log::debug!("Zone {} was updated in view {}", zone.name, zone.view);
            }

            state.serial.bump()?;
            state.last_observed = latest_update;
        }

        Ok(state.serial.peek())
    }

    /// Builds the catalog zone `catalog_name` listing the zones of `view`
    pub fn build(&self, catalog_name: &str, view: &View) -> Result<MaterializedZone> {
        let serial = self.observe_changes()?;

        let origin = names::normalize(catalog_name)?;
        let mut zone = MaterializedZone::new(&origin);

        for member in self.provider.list_active_zones(view)? {
            let identifier = match self.identifiers.identifier(member.id)? {
                Some(identifier) => identifier,
                None => {
                    log::warn!(
                        "Zone {} has no catalog identifier, leaving it out of {}",
                        member.name,
                        origin
                    );
                    continue;
                }
            };

            let ptr_name = names::normalize(&format!("{}.zones.{}", identifier, origin))?;
            if !names::is_subdomain(&ptr_name, &origin) {
                return Err(CatalogError::NotSubdomain(ptr_name));
            }

            let target = names::normalize(&member.name)?;
            zone.add_record(&ptr_name, 0, RecordData::Ptr(target))?;

            if let Some(policy) = &member.dnssec_policy {
                let group = format!("dnssec-policy-{}", policy.trim_end_matches(' '));
                zone.add_record(
                    &format!("group.{}", ptr_name),
                    0,
                    RecordData::Txt(vec![group.into_bytes()]),
                )?;
            }
        }

        let soa = SoaData {
            mname: "invalid".to_string(),
            rname: "invalid".to_string(),
            serial,
            refresh: CATALOG_REFRESH,
            retry: CATALOG_RETRY,
            expire: CATALOG_EXPIRE,
            minimum: 0,
        };
        zone.add_record(&origin, 0, RecordData::Soa(soa))?;
        zone.add_record(&origin, 0, RecordData::Ns("invalid".to_string()))?;
        zone.add_record(
            &names::normalize(&format!("version.{}", origin))?,
            0,
            RecordData::Txt(vec![CATALOG_SCHEMA_VERSION.as_bytes().to_vec()]),
        )?;

        Ok(zone)
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;
    use crate::dns::protocol::QueryType;
    use crate::dns::provider::tests::zone;
    use crate::dns::provider::{Inventory, MemoryProvider};
    use crate::dns::store::MemoryStore;

    struct Fixture {
        provider: Arc<MemoryProvider>,
        registry: Arc<CatalogIdentifierRegistry>,
        builder: CatalogZoneBuilder,
    }

    fn view(id: u64, name: &str) -> View {
        View {
            id,
            name: name.to_string(),
        }
    }

    fn fixture() -> Fixture {
        let mut signed = zone(2, "b.example", "internal", 5);
        signed.dnssec_policy = Some("strict  ".to_string());

        let provider = Arc::new(MemoryProvider::new(Inventory {
            views: vec![view(1, "internal"), view(2, "external")],
            zones: vec![
                zone(1, "a.example", "internal", 0),
                signed,
                zone(3, "c.example", "external", 1),
            ],
            records: Vec::new(),
        }));

        let store = Arc::new(MemoryStore::new());
        let registry = Arc::new(CatalogIdentifierRegistry::new(store.clone()));
        registry
            .backfill(&provider.list_all_zones().unwrap())
            .unwrap();

        let serial = SerialCounter::load(store).unwrap();
        let builder = CatalogZoneBuilder::new(provider.clone(), registry.clone(), serial);

        Fixture {
            provider,
            registry,
            builder,
        }
    }

    fn soa_serial(zone: &MaterializedZone) -> u32 {
        zone.soa_data().unwrap().serial
    }

    #[test]
    fn test_catalog_names() {
        let internal = view(1, "internal");
        assert!(is_catalog_name("catz", &internal));
        assert!(is_catalog_name("CATZ.", &internal));
        assert!(is_catalog_name("internal.catz", &internal));
        assert!(!is_catalog_name("external.catz", &internal));
        assert!(!is_catalog_name("catz.example", &internal));
    }

    #[test]
    fn test_members_and_policy_groups() {
        let f = fixture();
        let catalog = f.builder.build("catz", &view(1, "internal")).unwrap();

        let id_a = f.registry.identifier(1).unwrap().unwrap();
        let id_b = f.registry.identifier(2).unwrap().unwrap();

        let ptr_a = catalog
            .get(&format!("{}.zones.catz", id_a), QueryType::Ptr)
            .unwrap();
        assert_eq!(ptr_a.rdata, vec![RecordData::Ptr("a.example".to_string())]);
        assert_eq!(ptr_a.ttl, 0);

        let ptr_b = catalog
            .get(&format!("{}.zones.catz", id_b), QueryType::Ptr)
            .unwrap();
        assert_eq!(ptr_b.rdata, vec![RecordData::Ptr("b.example".to_string())]);

        let group = catalog
            .get(&format!("group.{}.zones.catz", id_b), QueryType::Txt)
            .unwrap();
        assert_eq!(
            group.rdata,
            vec![RecordData::Txt(vec![b"dnssec-policy-strict".to_vec()])]
        );
        assert!(catalog
            .get(&format!("group.{}.zones.catz", id_a), QueryType::Txt)
            .is_none());

        let ptrs = catalog
            .rrsets()
            .filter(|s| s.rtype == QueryType::Ptr)
            .count();
        assert_eq!(ptrs, 2);
    }

    #[test]
    fn test_apex_records() {
        let f = fixture();
        let catalog = f.builder.build("internal.catz.", &view(1, "internal")).unwrap();
        assert_eq!(catalog.origin(), "internal.catz");

        let soa = catalog.soa_data().unwrap();
        assert_eq!(soa.mname, "invalid");
        assert_eq!(soa.rname, "invalid");
        assert_eq!(
            (soa.refresh, soa.retry, soa.expire, soa.minimum),
            (60, 10, 1_209_600, 0)
        );

        let ns = catalog.get("internal.catz", QueryType::Ns).unwrap();
        assert_eq!(ns.rdata, vec![RecordData::Ns("invalid".to_string())]);

        let version = catalog.get("version.internal.catz", QueryType::Txt).unwrap();
        assert_eq!(version.rdata, vec![RecordData::Txt(vec![b"2".to_vec()])]);
        assert!(catalog.rrsets().all(|s| s.ttl == 0));
    }

    #[test]
    fn test_serial_follows_global_changes() {
        let f = fixture();
        let internal = view(1, "internal");
        let external = view(2, "external");

        let first = soa_serial(&f.builder.build("catz", &internal).unwrap());
        let again = soa_serial(&f.builder.build("catz", &internal).unwrap());
        assert_eq!(first, again);

        f.provider.with_inventory(|inventory| {
            inventory.zones[0].last_updated = "2024-02-01T00:00:00Z".parse().unwrap();
        });

        let bumped = soa_serial(&f.builder.build("catz", &external).unwrap());
        assert_eq!(bumped, first + 1);
        assert_eq!(soa_serial(&f.builder.build("catz", &internal).unwrap()), bumped);
    }

    #[test]
    fn test_no_zones_does_not_bump() {
        let provider = Arc::new(MemoryProvider::new(Inventory::default()));
        let store = Arc::new(MemoryStore::new());
        let registry = Arc::new(CatalogIdentifierRegistry::new(store.clone()));
        let builder =
            CatalogZoneBuilder::new(provider, registry, SerialCounter::load(store).unwrap());

        assert_eq!(builder.observe_changes().unwrap(), 1);
        assert_eq!(builder.observe_changes().unwrap(), 1);
    }

    #[test]
    fn test_member_without_identifier_is_skipped() {
        let f = fixture();
        f.provider.with_inventory(|inventory| {
            inventory.zones.push(zone(4, "d.example", "internal", 2));
        });

        let catalog = f.builder.build("catz", &view(1, "internal")).unwrap();
        let members = catalog
            .rrsets()
            .filter(|s| s.rtype == QueryType::Ptr)
            .count();
        assert_eq!(members, 2);
    }

    #[test]
    fn test_concurrent_builds_bump_once() {
        let f = fixture();
        let before = f.builder.observe_changes().unwrap();

        f.provider.with_inventory(|inventory| {
            inventory.zones[1].last_updated = "2024-03-01T00:00:00Z".parse().unwrap();
        });

        let builder = Arc::new(f.builder);
        let handles = (0..8)
            .map(|_| {
                let builder = builder.clone();
                thread::spawn(move || builder.observe_changes().unwrap())
            })
            .collect::<Vec<_>>();

        for handle in handles {
            assert_eq!(handle.join().unwrap(), before + 1);
        }
    }
}
