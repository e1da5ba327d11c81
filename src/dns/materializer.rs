//! Builds zones from provider records
//!
//! Records are stored in presentation format. Each request turns the active
//! records of one zone into a `MaterializedZone`; nothing is cached between
//! requests.

use std::collections::HashMap;
use std::sync::Arc;

use derive_more::{Display, Error, From};

use crate::dns::names::{self, NameError};
use crate::dns::protocol::{QueryType, CLASS_IN};
use crate::dns::provider::{ProviderError, View, ZoneDataProvider};
use crate::dns::rdata::{RdataError, RecordData};
use crate::dns::zone::{MaterializedZone, RecordSet, ZoneError};

/// Longest character-string a TXT record can carry
pub const TXT_CHUNK_LEN: usize = 255;

#[derive(Debug, Display, From, Error)]
pub enum MaterializeError {
    Provider(ProviderError),
    #[display(fmt = "bad {} record at {}: {}", rtype, name, error)]
    #[from(ignore)]
    Rdata {
        name: String,
        rtype: QueryType,
        #[error(source)]
        error: RdataError,
    },
    #[display(fmt = "bad owner name: {}", _0)]
    Name(NameError),
    Zone(ZoneError),
}

type Result<T> = std::result::Result<T, MaterializeError>;

/// Owner name of a stored record
///
/// An empty name is the origin, a name ending in a dot is absolute and any
/// other name is relative to the origin.
pub fn owner_name(name: &str, origin: &str) -> std::result::Result<String, NameError> {
    names::resolve(name, origin)
}

/// Prepares a stored TXT value for the presentation parser
///
/// A value already wrapped in quotes is unwrapped first, joining adjacent
/// quoted strings. The result is quoted again, split into 255 character
/// strings if it is too long for one.
pub fn normalize_txt_value(value: &str) -> String {
    let value = if value.starts_with('"') && value.ends_with('"') {
        let inner = if value.len() >= 2 {
            &value[1..value.len() - 1]
        } else {
            ""
        };
        inner.replace("\" \"", "")
    } else {
        value.to_string()
    };

    let chars = value.chars().collect::<Vec<_>>();
    if chars.len() > TXT_CHUNK_LEN {
        chars
            .chunks(TXT_CHUNK_LEN)
            .map(|chunk| format!("\"{}\"", chunk.iter().collect::<String>()))
            .collect::<Vec<_>>()
            .join(" ")
    } else {
        format!("\"{}\"", value)
    }
}

/// Record sets staged per owner name, in first-seen order
#[derive(Default)]
struct StagedNodes {
    nodes: Vec<(String, Vec<RecordSet>)>,
    index: HashMap<String, usize>,
}

impl StagedNodes {
    fn add(&mut self, name: String, rdata: RecordData, ttl: u32) -> Result<()> {
        let key = names::key(&name);
        let idx = match self.index.get(&key) {
            Some(idx) => *idx,
            None => {
                self.nodes.push((name, Vec::new()));
                self.index.insert(key, self.nodes.len() - 1);
                self.nodes.len() - 1
            }
        };

        let (owner, rrsets) = &mut self.nodes[idx];
        let rtype = rdata.rtype();
        match rrsets.iter_mut().find(|s| s.rtype == rtype) {
            Some(rrset) => rrset.add(rdata, ttl)?,
            None => {
                let mut rrset = RecordSet::new(owner, rtype, CLASS_IN);
                rrset.add(rdata, ttl)?;
                rrsets.push(rrset);
            }
        }

        Ok(())
    }

    fn into_zone(self, origin: &str) -> Result<MaterializedZone> {
        let mut zone = MaterializedZone::new(origin);
        for (_, rrsets) in self.nodes {
            for rrset in rrsets {
                zone.replace_rdataset(rrset)?;
            }
        }

        Ok(zone)
    }
}

#[derive(Clone)]
pub struct ZoneMaterializer {
    provider: Arc<dyn ZoneDataProvider>,
}

impl ZoneMaterializer {
    pub fn new(provider: Arc<dyn ZoneDataProvider>) -> ZoneMaterializer {
        ZoneMaterializer { provider }
    }

    /// Builds the active zone `name` of `view`, or `None` if there is none
    pub fn materialize(&self, name: &str, view: &View) -> Result<Option<MaterializedZone>> {
        let info = match self.provider.get_zone(name, view)? {
            Some(info) => info,
            None => return Ok(None),
        };

        let origin = names::normalize(&info.name)?;
        let mut staged = StagedNodes::default();

        for record in self.provider.list_active_records(&info)? {
            let rtype = match QueryType::from_text(&record.rtype) {
                Some(rtype) => rtype,
                None => {
                    log::warn!(
                        "Skipping record {} in {} with unknown type {}",
                        record.name,
                        origin,
                        record.rtype
                    );
                    continue;
                }
            };

            let owner = owner_name(&record.name, &origin)?;
            let ttl = record.ttl.unwrap_or(info.default_ttl);

            let value = if rtype == QueryType::Txt {
                normalize_txt_value(&record.value)
            } else {
                record.value.clone()
            };

            let rdata = RecordData::from_text(rtype, &value, &origin).map_err(|error| {
                MaterializeError::Rdata {
                    name: owner.clone(),
                    rtype,
                    error,
                }
            })?;

            staged.add(owner, rdata, ttl)?;
        }

        Ok(Some(staged.into_zone(&origin)?))
    }
}
