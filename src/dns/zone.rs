//! In-memory zone built for a single request

use std::collections::HashMap;

use derive_more::{Display, Error};

use crate::dns::names;
use crate::dns::protocol::{DnsRecord, QueryType, CLASS_IN};
use crate::dns::rdata::{RecordData, SoaData};

#[derive(Debug, Clone, PartialEq, Eq, Display, Error)]
pub enum ZoneError {
    #[display(fmt = "{}: class {} does not match zone class {}", name, actual, expected)]
    ClassMismatch { name: String, expected: u16, actual: u16 },
    #[display(fmt = "{} is not a subdomain of {}", name, origin)]
    OutOfZone { name: String, origin: String },
    #[display(fmt = "{}: cannot add {} data to {} set", name, actual, expected)]
    TypeMismatch { name: String, expected: QueryType, actual: QueryType },
}

type Result<T> = std::result::Result<T, ZoneError>;

/// Records sharing owner, class and type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordSet {
    pub name: String,
    pub rtype: QueryType,
    pub class: u16,
    pub ttl: u32,
    pub rdata: Vec<RecordData>,
}

impl RecordSet {
    pub fn new(name: &str, rtype: QueryType, class: u16) -> RecordSet {
        RecordSet {
            name: name.to_string(),
            rtype,
            class,
            ttl: 0,
            rdata: Vec::new(),
        }
    }

    /// Adds one datum, ignoring duplicates; the set keeps the lowest TTL seen
    pub fn add(&mut self, rdata: RecordData, ttl: u32) -> Result<()> {
        if rdata.rtype() != self.rtype {
            return Err(ZoneError::TypeMismatch {
                name: self.name.clone(),
                expected: self.rtype,
                actual: rdata.rtype(),
            });
        }

        if self.rdata.is_empty() || ttl < self.ttl {
            self.ttl = ttl;
        }

        if !self.rdata.contains(&rdata) {
            self.rdata.push(rdata);
        }

        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.rdata.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rdata.len()
    }

    /// Expands the set into individual records
    pub fn records(&self) -> Vec<DnsRecord> {
        self.rdata
            .iter()
            .map(|data| DnsRecord {
                domain: self.name.clone(),
                class: self.class,
                ttl: self.ttl,
                data: data.clone(),
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ZoneNode {
    name: String,
    rrsets: Vec<RecordSet>,
}

/// Zone content keyed by owner name and type
///
/// Names and sets keep the order in which they were first added, which is the
/// order an AXFR emits them in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaterializedZone {
    origin: String,
    class: u16,
    nodes: Vec<ZoneNode>,
    index: HashMap<String, usize>,
}

impl MaterializedZone {
    pub fn new(origin: &str) -> MaterializedZone {
        MaterializedZone {
            origin: origin.to_string(),
            class: CLASS_IN,
            nodes: Vec::new(),
            index: HashMap::new(),
        }
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn class(&self) -> u16 {
        self.class
    }

    fn node_mut(&mut self, name: &str) -> &mut ZoneNode {
        let key = names::key(name);
        let idx = match self.index.get(&key) {
            Some(idx) => *idx,
            None => {
                self.nodes.push(ZoneNode {
                    name: name.to_string(),
                    rrsets: Vec::new(),
                });
                self.index.insert(key, self.nodes.len() - 1);
                self.nodes.len() - 1
            }
        };

        &mut self.nodes[idx]
    }

    fn check_owner(&self, name: &str, class: u16) -> Result<()> {
        if class != self.class {
            return Err(ZoneError::ClassMismatch {
                name: name.to_string(),
                expected: self.class,
                actual: class,
            });
        }

        if !names::is_subdomain(name, &self.origin) {
            return Err(ZoneError::OutOfZone {
                name: name.to_string(),
                origin: self.origin.clone(),
            });
        }

        Ok(())
    }

    /// Stores `rrset`, replacing any set of the same name and type
    ///
    /// Empty sets are not stored; the return value tells whether it was.
    pub fn replace_rdataset(&mut self, rrset: RecordSet) -> Result<bool> {
        self.check_owner(&rrset.name, rrset.class)?;

        if rrset.is_empty() {
            log::debug!(
                "Skipping empty {} set at {} in {}",
                rrset.rtype,
                rrset.name,
                self.origin
            );
            return Ok(false);
        }

        let node = self.node_mut(&rrset.name);
        match node.rrsets.iter_mut().find(|s| s.rtype == rrset.rtype) {
            Some(existing) => *existing = rrset,
            None => node.rrsets.push(rrset),
        }

        Ok(true)
    }

    /// Adds a single record, merging it into an existing set
    pub fn add_record(&mut self, name: &str, ttl: u32, rdata: RecordData) -> Result<()> {
        self.check_owner(name, self.class)?;

        let rtype = rdata.rtype();
        let class = self.class;
        let node = self.node_mut(name);

        match node.rrsets.iter_mut().find(|s| s.rtype == rtype) {
            Some(existing) => existing.add(rdata, ttl),
            None => {
                let mut rrset = RecordSet::new(&node.name, rtype, class);
                rrset.add(rdata, ttl)?;
                node.rrsets.push(rrset);
                Ok(())
            }
        }
    }

    pub fn get(&self, name: &str, rtype: QueryType) -> Option<&RecordSet> {
        let idx = self.index.get(&names::key(name))?;
        self.nodes[*idx].rrsets.iter().find(|s| s.rtype == rtype)
    }

    /// SOA set at the origin
    pub fn soa(&self) -> Option<&RecordSet> {
        self.get(&self.origin, QueryType::Soa)
    }

    /// SOA data at the origin, if present
    pub fn soa_data(&self) -> Option<&SoaData> {
        self.soa()?.rdata.iter().find_map(|data| match data {
            RecordData::Soa(soa) => Some(soa),
            _ => None,
        })
    }

    pub fn rrsets(&self) -> impl Iterator<Item = &RecordSet> {
        self.nodes.iter().flat_map(|node| node.rrsets.iter())
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use super::*;

    fn a(last: u8) -> RecordData {
        RecordData::A(Ipv4Addr::new(192, 0, 2, last))
    }

    #[test]
    fn test_record_set_dedupes_and_keeps_min_ttl() {
        let mut rrset = RecordSet::new("www.example.com", QueryType::A, CLASS_IN);
        rrset.add(a(1), 300).unwrap();
        rrset.add(a(1), 600).unwrap();
        rrset.add(a(2), 60).unwrap();

        assert_eq!(rrset.len(), 2);
        assert_eq!(rrset.ttl, 60);

        let records = rrset.records();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.ttl == 60 && r.domain == "www.example.com"));

        assert!(matches!(
            rrset.add(RecordData::Ns("ns1.example.com".to_string()), 60),
            Err(ZoneError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_add_record_groups_by_name() {
        let mut zone = MaterializedZone::new("example.com");
        zone.add_record("www.example.com", 300, a(1)).unwrap();
        zone.add_record("mail.example.com", 300, a(3)).unwrap();
        zone.add_record("WWW.example.com", 300, a(2)).unwrap();

        let www = zone.get("www.example.com", QueryType::A).unwrap();
        assert_eq!(www.len(), 2);

        let order = zone.rrsets().map(|s| s.name.as_str()).collect::<Vec<_>>();
        assert_eq!(order, vec!["www.example.com", "mail.example.com"]);
    }

    #[test]
    fn test_rejects_foreign_names_and_classes() {
        let mut zone = MaterializedZone::new("example.com");

        assert!(matches!(
            zone.add_record("example.org", 300, a(1)),
            Err(ZoneError::OutOfZone { .. })
        ));

        let mut rrset = RecordSet::new("example.com", QueryType::A, 3);
        rrset.add(a(1), 1).unwrap();
        assert!(matches!(
            zone.replace_rdataset(rrset),
            Err(ZoneError::ClassMismatch { .. })
        ));
    }

    #[test]
    fn test_empty_sets_are_not_stored() {
        let mut zone = MaterializedZone::new("example.com");
        let rrset = RecordSet::new("example.com", QueryType::Ns, CLASS_IN);

        assert!(!zone.replace_rdataset(rrset).unwrap());
        assert!(zone.is_empty());
        assert!(zone.soa().is_none());
    }

    #[test]
    fn test_soa_lookup() {
        let mut zone = MaterializedZone::new("example.com");
        let soa = SoaData {
            mname: "ns1.example.com".to_string(),
            rname: "hostmaster.example.com".to_string(),
            serial: 7,
            refresh: 3600,
            retry: 600,
            expire: 86400,
            minimum: 60,
        };
        zone.add_record("Example.COM", 3600, RecordData::Soa(soa.clone()))
            .unwrap();

        assert_eq!(zone.soa_data(), Some(&soa));
    }
}
