//! Zone data sources
//!
//! The endpoint never owns zone content. Everything it serves is pulled from
//! a `ZoneDataProvider` on each request, so a provider must reflect the live
//! state of whatever backs it.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use derive_more::{Display, Error, From};
use parking_lot::{Mutex, RwLock};
use serde_derive::{Deserialize, Serialize};

use crate::dns::names;

#[derive(Debug, Display, From, Error)]
pub enum ProviderError {
    #[display(fmt = "zone data unavailable: {}", _0)]
    Io(std::io::Error),
    #[display(fmt = "zone data is malformed: {}", _0)]
    Json(serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ProviderError>;

/// Stable reference to a zone in the backing store
pub type ZoneRef = u64;

/// Authorization scope partitioning the zones a key may see
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct View {
    pub id: u64,
    pub name: String,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ZoneStatus {
    Active,
    Reserved,
    Deprecated,
    Parked,
    Dynamic,
}

impl Default for ZoneStatus {
    fn default() -> Self {
        ZoneStatus::Active
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    Active,
    Inactive,
}

impl Default for RecordStatus {
    fn default() -> Self {
        RecordStatus::Active
    }
}

fn default_zone_ttl() -> u32 {
    86400
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneInfo {
    pub id: ZoneRef,
    pub name: String,
    /// Name of the owning view
    pub view: String,
    #[serde(default)]
    pub status: ZoneStatus,
    #[serde(default = "default_zone_ttl")]
    pub default_ttl: u32,
    #[serde(default)]
    pub dnssec_policy: Option<String>,
    pub last_updated: DateTime<Utc>,
}

impl ZoneInfo {
    pub fn is_active(&self) -> bool {
        self.status == ZoneStatus::Active
    }
}

/// A record as stored, with its value in presentation format
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordEntry {
    pub zone: ZoneRef,
    /// Owner name, relative to the zone unless it ends in a dot
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type")]
    pub rtype: String,
    pub value: String,
    #[serde(default)]
    pub ttl: Option<u32>,
    #[serde(default)]
    pub status: RecordStatus,
}

pub trait ViewResolver {
    fn find_view(&self, name: &str) -> Result<Option<View>>;
}

pub trait ZoneDataProvider: ViewResolver + Send + Sync {
    /// Active zones belonging to `view`
    fn list_active_zones(&self, view: &View) -> Result<Vec<ZoneInfo>>;

    /// The active zone called `name` in `view`, if any
    fn get_zone(&self, name: &str, view: &View) -> Result<Option<ZoneInfo>>;

    fn list_active_records(&self, zone: &ZoneInfo) -> Result<Vec<RecordEntry>>;

    /// The active zone updated last, across every view
    fn most_recently_updated_active_zone(&self) -> Result<Option<ZoneInfo>>;

    /// Every zone regardless of status
    fn list_all_zones(&self) -> Result<Vec<ZoneInfo>>;
}

/// Snapshot of views, zones and records
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inventory {
    #[serde(default)]
    pub views: Vec<View>,
    #[serde(default)]
    pub zones: Vec<ZoneInfo>,
    #[serde(default)]
    pub records: Vec<RecordEntry>,
}

impl Inventory {
    pub fn find_view(&self, name: &str) -> Option<View> {
        self.views.iter().find(|v| v.name == name).cloned()
    }

    pub fn list_active_zones(&self, view: &View) -> Vec<ZoneInfo> {
        self.zones
            .iter()
            .filter(|z| z.is_active() && z.view == view.name)
            .cloned()
            .collect()
    }

    pub fn get_zone(&self, name: &str, view: &View) -> Option<ZoneInfo> {
        self.zones
            .iter()
            .find(|z| z.is_active() && z.view == view.name && names::eq(&z.name, name))
            .cloned()
    }

    pub fn list_active_records(&self, zone: &ZoneInfo) -> Vec<RecordEntry> {
        self.records
            .iter()
            .filter(|r| r.zone == zone.id && r.status == RecordStatus::Active)
            .cloned()
            .collect()
    }

    pub fn most_recently_updated_active_zone(&self) -> Option<ZoneInfo> {
        self.zones
            .iter()
            .filter(|z| z.is_active())
            .max_by_key(|z| z.last_updated)
            .cloned()
    }
}

/// Provider over an inventory held in memory
#[derive(Debug, Default)]
pub struct MemoryProvider {
    inventory: RwLock<Inventory>,
}

impl MemoryProvider {
    pub fn new(inventory: Inventory) -> MemoryProvider {
        MemoryProvider {
            inventory: RwLock::new(inventory),
        }
    }

    /// Applies a mutation to the inventory, as the host data layer would
    #[cfg(test)]
    pub fn with_inventory<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&mut Inventory) -> R,
    {
        let mut inventory = self.inventory.write();
        f(&mut inventory)
    }
}

impl ViewResolver for MemoryProvider {
    fn find_view(&self, name: &str) -> Result<Option<View>> {
        Ok(self.inventory.read().find_view(name))
    }
}

impl ZoneDataProvider for MemoryProvider {
    fn list_active_zones(&self, view: &View) -> Result<Vec<ZoneInfo>> {
        Ok(self.inventory.read().list_active_zones(view))
    }

    fn get_zone(&self, name: &str, view: &View) -> Result<Option<ZoneInfo>> {
        Ok(self.inventory.read().get_zone(name, view))
    }

    fn list_active_records(&self, zone: &ZoneInfo) -> Result<Vec<RecordEntry>> {
        Ok(self.inventory.read().list_active_records(zone))
    }

    fn most_recently_updated_active_zone(&self) -> Result<Option<ZoneInfo>> {
        Ok(self.inventory.read().most_recently_updated_active_zone())
    }

    fn list_all_zones(&self) -> Result<Vec<ZoneInfo>> {
        Ok(self.inventory.read().zones.clone())
    }
}

/// Receives zone lifecycle events noticed by a provider
pub trait ZoneObserver: Send + Sync {
    fn zone_created(&self, zone: &ZoneInfo);
    fn zone_renamed(&self, zone: &ZoneInfo);
}

struct Watch {
    observer: Weak<dyn ZoneObserver>,
    /// Zone names by id as of the last read
    known: HashMap<ZoneRef, String>,
}

impl Watch {
    fn observe(&mut self, inventory: &Inventory) {
        let observer = match self.observer.upgrade() {
            Some(observer) => observer,
            None => return,
        };

        for zone in &inventory.zones {
            match self.known.get(&zone.id) {
                None => observer.zone_created(zone),
                Some(name) if !names::eq(name, &zone.name) => observer.zone_renamed(zone),
                Some(_) => continue,
            }
            self.known.insert(zone.id, zone.name.clone());
        }
    }
}

/// Provider reading a JSON inventory file on every call
///
/// The file is edited by something else, so zone creation and renames are
/// only seen as differences between two reads. `watch` turns those
/// differences into `ZoneObserver` calls.
pub struct JsonFileProvider {
    path: PathBuf,
    watch: Mutex<Option<Watch>>,
}

impl JsonFileProvider {
    pub fn new(path: impl AsRef<Path>) -> JsonFileProvider {
        JsonFileProvider {
            path: path.as_ref().to_path_buf(),
            watch: Mutex::new(None),
        }
    }

    /// Reports zones that appear or change name from now on to `observer`
    ///
    /// Zones in the file at the time of the call count as known.
    pub fn watch<O>(&self, observer: &Arc<O>) -> Result<()>
    where
        O: ZoneObserver + 'static,
    {
        let observer: Weak<O> = Arc::downgrade(observer);
        let known = self
            .read()?
            .zones
            .into_iter()
            .map(|zone| (zone.id, zone.name))
            .collect();

        *self.watch.lock() = Some(Watch { observer, known });

        Ok(())
    }

    fn read(&self) -> Result<Inventory> {
        let content = fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&content)?)
    }

    fn load(&self) -> Result<Inventory> {
        let inventory = self.read()?;

        if let Some(watch) = self.watch.lock().as_mut() {
            watch.observe(&inventory);
        }

        Ok(inventory)
    }
}

impl ViewResolver for JsonFileProvider {
    fn find_view(&self, name: &str) -> Result<Option<View>> {
        Ok(self.load()?.find_view(name))
    }
}

impl ZoneDataProvider for JsonFileProvider {
    fn list_active_zones(&self, view: &View) -> Result<Vec<ZoneInfo>> {
        Ok(self.load()?.list_active_zones(view))
    }

    fn get_zone(&self, name: &str, view: &View) -> Result<Option<ZoneInfo>> {
        Ok(self.load()?.get_zone(name, view))
    }

    fn list_active_records(&self, zone: &ZoneInfo) -> Result<Vec<RecordEntry>> {
        Ok(self.load()?.list_active_records(zone))
    }

    fn most_recently_updated_active_zone(&self) -> Result<Option<ZoneInfo>> {
        Ok(self.load()?.most_recently_updated_active_zone())
    }

    fn list_all_zones(&self) -> Result<Vec<ZoneInfo>> {
        Ok(self.load()?.zones)
    }
}
