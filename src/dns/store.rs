//! Durable state owned by the endpoint
//!
//! Two kinds of state survive restarts: integer settings (the catalog serial)
//! and the table of catalog member identifiers, keyed by zone and unique by
//! value.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use derive_more::{Display, Error, From};
use parking_lot::Mutex;
use serde_derive::{Deserialize, Serialize};

use crate::dns::provider::ZoneRef;

#[derive(Debug, Display, From, Error)]
pub enum StoreError {
    #[display(fmt = "state store i/o failed: {}", _0)]
    Io(std::io::Error),
    #[display(fmt = "state store is malformed: {}", _0)]
    Json(serde_json::Error),
    /// The identifier is already assigned to another zone
    #[display(fmt = "identifier {} for zone {} is already in use", identifier, zone)]
    #[from(ignore)]
    Conflict { zone: ZoneRef, identifier: String },
}

pub type Result<T> = std::result::Result<T, StoreError>;

pub trait SettingsStore: Send + Sync {
    fn get_integer(&self, key: &str) -> Result<Option<i64>>;
    fn set_integer(&self, key: &str, value: i64) -> Result<()>;
}

pub trait IdentifierStore: Send + Sync {
    fn identifier(&self, zone: ZoneRef) -> Result<Option<String>>;

    /// Stores `identifier` unless the zone already has one and returns the
    /// identifier in effect afterwards
    fn insert_identifier(&self, zone: ZoneRef, identifier: &str) -> Result<String>;

    /// Overwrites whatever identifier the zone had
    fn replace_identifier(&self, zone: ZoneRef, identifier: &str) -> Result<()>;

    fn zones_with_identifiers(&self) -> Result<HashSet<ZoneRef>>;

    /// Inserts a batch of new rows, all or nothing
    fn insert_identifiers(&self, rows: &[(ZoneRef, String)]) -> Result<()>;
}

/// Serialized form of everything a store holds
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StoreState {
    #[serde(default)]
    settings: BTreeMap<String, i64>,
    #[serde(default)]
    identifiers: BTreeMap<ZoneRef, String>,
    /// Reverse of `identifiers`
    #[serde(skip)]
    owners: HashMap<String, ZoneRef>,
    /// Bumped by every mutation that changed something
    #[serde(skip)]
    revision: u64,
}

impl StoreState {
    fn read(path: &Path) -> Result<StoreState> {
        let mut state: StoreState = match fs::read_to_string(path) {
            Ok(content) => serde_json::from_str(&content)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StoreState::default(),
            Err(e) => return Err(e.into()),
        };

        state.owners = state
            .identifiers
            .iter()
            .map(|(zone, identifier)| (identifier.clone(), *zone))
            .collect();

        Ok(state)
    }

    pub fn identifiers(&self) -> &BTreeMap<ZoneRef, String> {
        &self.identifiers
    }

    fn set_integer(&mut self, key: &str, value: i64) {
        if self.settings.insert(key.to_string(), value) != Some(value) {
            self.revision += 1;
        }
    }

    fn check_unique(&self, zone: ZoneRef, identifier: &str) -> Result<()> {
        match self.owners.get(identifier) {
            Some(owner) if *owner != zone => Err(StoreError::Conflict {
                zone,
                identifier: identifier.to_string(),
            }),
            _ => Ok(()),
        }
    }

    fn assign(&mut self, zone: ZoneRef, identifier: &str) {
        if let Some(previous) = self.identifiers.insert(zone, identifier.to_string()) {
            if previous == identifier {
                return;
            }
            self.owners.remove(&previous);
        }

        self.owners.insert(identifier.to_string(), zone);
        self.revision += 1;
    }

    fn insert_identifier(&mut self, zone: ZoneRef, identifier: &str) -> Result<String> {
        if let Some(existing) = self.identifiers.get(&zone) {
            return Ok(existing.clone());
        }

        self.check_unique(zone, identifier)?;
        self.assign(zone, identifier);

        Ok(identifier.to_string())
    }

    fn replace_identifier(&mut self, zone: ZoneRef, identifier: &str) -> Result<()> {
        self.check_unique(zone, identifier)?;
        self.assign(zone, identifier);

        Ok(())
    }

    fn insert_identifiers(&mut self, rows: &[(ZoneRef, String)]) -> Result<()> {
        let mut claimed: HashMap<&str, ZoneRef> = HashMap::new();
        let mut zones = HashSet::new();
        let mut accepted = Vec::with_capacity(rows.len());

        // Validate the whole batch before touching the state
        for (zone, identifier) in rows {
            if self.identifiers.contains_key(zone) || !zones.insert(*zone) {
                continue;
            }
            self.check_unique(*zone, identifier)?;
            if claimed.insert(identifier.as_str(), *zone).is_some() {
                return Err(StoreError::Conflict {
                    zone: *zone,
                    identifier: identifier.clone(),
                });
            }
            accepted.push((*zone, identifier.as_str()));
        }

        for (zone, identifier) in accepted {
            self.assign(zone, identifier);
        }

        Ok(())
    }
}

/// Volatile store, for tests and embedding
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<StoreState>,
}

impl MemoryStore {
    pub fn new() -> MemoryStore {
        MemoryStore::default()
    }

    pub fn snapshot(&self) -> StoreState {
        self.state.lock().clone()
    }
}

impl SettingsStore for MemoryStore {
    fn get_integer(&self, key: &str) -> Result<Option<i64>> {
        Ok(self.state.lock().settings.get(key).copied())
    }

    fn set_integer(&self, key: &str, value: i64) -> Result<()> {
        self.state.lock().set_integer(key, value);
        Ok(())
    }
}

impl IdentifierStore for MemoryStore {
    fn identifier(&self, zone: ZoneRef) -> Result<Option<String>> {
        Ok(self.state.lock().identifiers.get(&zone).cloned())
    }

    fn insert_identifier(&self, zone: ZoneRef, identifier: &str) -> Result<String> {
        self.state.lock().insert_identifier(zone, identifier)
    }

    fn replace_identifier(&self, zone: ZoneRef, identifier: &str) -> Result<()> {
        self.state.lock().replace_identifier(zone, identifier)
    }

    fn zones_with_identifiers(&self) -> Result<HashSet<ZoneRef>> {
        Ok(self.state.lock().identifiers.keys().copied().collect())
    }

    fn insert_identifiers(&self, rows: &[(ZoneRef, String)]) -> Result<()> {
        self.state.lock().insert_identifiers(rows)
    }
}

/// Store persisted as a JSON document
///
/// Mutations are applied in place and written to disk. When the write fails
/// the state is read back from the file, so memory and disk stay in agreement.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    state: Mutex<StoreState>,
}

impl JsonFileStore {
    /// Opens the store at `path`, starting empty if the file does not exist
    pub fn open(path: impl AsRef<Path>) -> Result<JsonFileStore> {
        let path = path.as_ref().to_path_buf();
        let state = StoreState::read(&path)?;

        Ok(JsonFileStore {
            path,
            state: Mutex::new(state),
        })
    }

    fn persist(&self, state: &StoreState) -> Result<()> {
        let data = serde_json::to_vec_pretty(state)?;

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        fs::write(&tmp, data)?;
        fs::rename(&tmp, &self.path)?;

        Ok(())
    }

    fn mutate<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut StoreState) -> Result<R>,
    {
        let mut state = self.state.lock();
        let revision = state.revision;
        let result = f(&mut state)?;

        if state.revision != revision {
            if let Err(e) = self.persist(&state) {
                match StoreState::read(&self.path) {
                    Ok(previous) => *state = previous,
                    Err(reload) => log::error!("Failed to reload state store: {}", reload),
                }
                return Err(e);
            }
        }

        Ok(result)
    }
}

impl SettingsStore for JsonFileStore {
    fn get_integer(&self, key: &str) -> Result<Option<i64>> {
        Ok(self.state.lock().settings.get(key).copied())
    }

    fn set_integer(&self, key: &str, value: i64) -> Result<()> {
        self.mutate(|state| {
            state.set_integer(key, value);
            Ok(())
        })
    }
}

impl IdentifierStore for JsonFileStore {
    fn identifier(&self, zone: ZoneRef) -> Result<Option<String>> {
        Ok(self.state.lock().identifiers.get(&zone).cloned())
    }

    fn insert_identifier(&self, zone: ZoneRef, identifier: &str) -> Result<String> {
        self.mutate(|state| state.insert_identifier(zone, identifier))
    }

    fn replace_identifier(&self, zone: ZoneRef, identifier: &str) -> Result<()> {
        self.mutate(|state| state.replace_identifier(zone, identifier))
    }

    fn zones_with_identifiers(&self) -> Result<HashSet<ZoneRef>> {
        Ok(self.state.lock().identifiers.keys().copied().collect())
    }

    fn insert_identifiers(&self, rows: &[(ZoneRef, String)]) -> Result<()> {
        self.mutate(|state| state.insert_identifiers(rows))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_keeps_existing_identifier() {
        let store = MemoryStore::new();
        assert_eq!(store.insert_identifier(1, "aaaa").unwrap(), "aaaa");
        assert_eq!(store.insert_identifier(1, "bbbb").unwrap(), "aaaa");

        store.replace_identifier(1, "cccc").unwrap();
        assert_eq!(store.identifier(1).unwrap().as_deref(), Some("cccc"));
    }

    #[test]
    fn test_identifiers_are_unique() {
        let store = MemoryStore::new();
        store.insert_identifier(1, "aaaa").unwrap();

        assert!(matches!(
            store.insert_identifier(2, "aaaa"),
            Err(StoreError::Conflict { zone: 2, .. })
        ));
        assert!(matches!(
            store.replace_identifier(2, "aaaa"),
            Err(StoreError::Conflict { .. })
        ));
        // Re-assigning a zone its own value is not a conflict
        store.replace_identifier(1, "aaaa").unwrap();

        let err = store.insert_identifier(2, "aaaa").unwrap_err();
        assert_eq!(err.to_string(), "identifier aaaa for zone 2 is already in use");
        assert!(std::error::Error::source(&err).is_none());
    }

    #[test]
    fn test_batch_insert_is_all_or_nothing() {
        let store = MemoryStore::new();
        store.insert_identifier(1, "aaaa").unwrap();

        let rows = vec![(2, "bbbb".to_string()), (3, "aaaa".to_string())];
        assert!(store.insert_identifiers(&rows).is_err());
        assert_eq!(store.identifier(2).unwrap(), None);

        let rows = vec![(1, "zzzz".to_string()), (2, "bbbb".to_string())];
        store.insert_identifiers(&rows).unwrap();
        assert_eq!(store.identifier(1).unwrap().as_deref(), Some("aaaa"));
        assert_eq!(store.identifier(2).unwrap().as_deref(), Some("bbbb"));
        assert_eq!(store.zones_with_identifiers().unwrap().len(), 2);
    }

    #[test]
    fn test_replaced_identifier_is_released() {
        let store = MemoryStore::new();
        store.insert_identifier(1, "aaaa").unwrap();
        store.replace_identifier(1, "bbbb").unwrap();

        assert_eq!(store.insert_identifier(2, "aaaa").unwrap(), "aaaa");
        assert!(matches!(
            store.insert_identifier(3, "bbbb"),
            Err(StoreError::Conflict { zone: 3, .. })
        ));
    }

    #[test]
    fn test_batch_rejects_duplicates_within_itself() {
        let store = MemoryStore::new();

        let rows = vec![(1, "same".to_string()), (2, "same".to_string())];
        assert!(matches!(
            store.insert_identifiers(&rows),
            Err(StoreError::Conflict { zone: 2, .. })
        ));
        assert!(store.snapshot().identifiers().is_empty());
    }

    #[test]
    fn test_large_backfill_batches() {
        let store = MemoryStore::new();

        for batch in (0..50_000u64).collect::<Vec<_>>().chunks(1000) {
            let rows = batch
                .iter()
                .map(|zone| (*zone, format!("{:08x}", zone)))
                .collect::<Vec<_>>();
            store.insert_identifiers(&rows).unwrap();
        }

        assert_eq!(store.snapshot().identifiers().len(), 50_000);
        assert!(matches!(
            store.insert_identifier(50_000, "0000ffff"),
            Err(StoreError::Conflict { .. })
        ));
    }

    #[test]
    fn test_failed_write_keeps_disk_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("state.json");

        let store = JsonFileStore::open(&path).unwrap();
        assert!(matches!(
            store.set_integer("serial", 7),
            Err(StoreError::Io(_))
        ));
        assert_eq!(store.get_integer("serial").unwrap(), None);
    }

    #[test]
    fn test_json_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        {
            let store = JsonFileStore::open(&path).unwrap();
            assert_eq!(store.get_integer("serial").unwrap(), None);
            store.set_integer("serial", 42).unwrap();
            store.insert_identifier(9, "abcdef").unwrap();
        }

        let store = JsonFileStore::open(&path).unwrap();
        assert_eq!(store.get_integer("serial").unwrap(), Some(42));
        assert_eq!(store.identifier(9).unwrap().as_deref(), Some("abcdef"));
        assert!(!dir.path().join("state.json.tmp").exists());
    }

    #[test]
    fn test_json_store_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "not json").unwrap();

        assert!(matches!(JsonFileStore::open(&path), Err(StoreError::Json(_))));
    }
}
