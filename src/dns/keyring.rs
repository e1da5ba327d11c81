//! TSIG keys and the views they grant access to
//!
//! Every configured key is bound to exactly one view. Keys that cannot be
//! used are skipped with an error log; the endpoint refuses to start if no key
//! survives.

use std::collections::{BTreeMap, HashMap};

use derive_more::{Display, Error};

use crate::dns::config::TsigKeyConfig;
use crate::dns::provider::{View, ViewResolver};
use crate::dns::tsig::{normalize_key_name, Keyring, TsigAlgorithm, TsigKey};

#[derive(Debug, Clone, PartialEq, Eq, Display, Error)]
pub enum KeyringError {
    #[display(fmt = "no usable TSIG keys configured")]
    NoUsableKeys,
}

/// Views by normalized key name
#[derive(Clone, Debug, Default)]
pub struct ViewMap {
    views: HashMap<String, View>,
}

impl ViewMap {
    pub fn new() -> ViewMap {
        ViewMap::default()
    }

    pub fn insert(&mut self, key_name: &str, view: View) -> Option<View> {
        self.views.insert(key_name.to_string(), view)
    }

    /// View bound to `key_name`, which need not be normalized
    pub fn get(&self, key_name: &str) -> Option<&View> {
        let key_name = normalize_key_name(key_name).ok()?;
        self.views.get(&key_name)
    }

}

fn build_key(view_name: &str, entry: &TsigKeyConfig) -> Option<TsigKey> {
    if entry.keyname.is_empty() || entry.secret.is_empty() {
        log::error!(
            "TSIG key for view {} needs both keyname and secret, skipping",
            view_name
        );
        return None;
    }

    let secret = match base64::decode(entry.secret.trim()) {
        Ok(secret) => secret,
        Err(e) => {
            log::error!("TSIG key {} has an invalid secret: {}", entry.keyname, e);
            return None;
        }
    };

    let algorithm = match TsigAlgorithm::from_name(&entry.algorithm) {
        Some(algorithm) => algorithm,
        None => {
            log::error!(
                "TSIG key {} uses unsupported algorithm {}",
                entry.keyname,
                entry.algorithm
            );
            return None;
        }
    };

    match TsigKey::new(&entry.keyname, algorithm, secret) {
        Ok(key) => Some(key),
        Err(e) => {
            log::error!("TSIG key name {} is invalid: {}", entry.keyname, e);
            None
        }
    }
}

/// Builds the keyring and the key to view bindings from configuration
pub fn load<R>(
    entries: &BTreeMap<String, TsigKeyConfig>,
    resolver: &R,
) -> Result<(Keyring, ViewMap), KeyringError>
where
    R: ViewResolver + ?Sized,
{
    let mut keyring = Keyring::new();
    let mut views = ViewMap::new();

    for (view_name, entry) in entries {
        let key = match build_key(view_name, entry) {
            Some(key) => key,
            None => continue,
        };

        let view = match resolver.find_view(view_name) {
            Ok(Some(view)) => view,
            Ok(None) => {
                log::error!("View {} for TSIG key {} not found", view_name, key.name);
                continue;
            }
            Err(e) => {
                log::error!("Failed to look up view {}: {}", view_name, e);
                continue;
            }
        };

        if views.get(&key.name).is_some() {
            log::warn!(
                "TSIG key {} is configured more than once, binding it to view {}",
                key.name,
                view_name
            );
        }

        log::info!("Loaded TSIG key {} for view {}", key.name, view.name);
        views.insert(&key.name, view);
        keyring.insert(key);
    }

    if keyring.is_empty() {
        log::error!("No usable TSIG keys, refusing to start");
        return Err(KeyringError::NoUsableKeys);
    }

    Ok((keyring, views))
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::dns::provider::{Inventory, MemoryProvider};

    fn resolver() -> MemoryProvider {
        MemoryProvider::new(Inventory {
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
            ..Inventory::default()
        })
    }

    fn entry(keyname: &str, secret: &str) -> TsigKeyConfig {
        TsigKeyConfig {
            keyname: keyname.to_string(),
            secret: secret.to_string(),
            algorithm: "hmac-sha256".to_string(),
        }
    }

    #[test]
    fn test_keyring_and_views_share_names() {
        let mut entries = BTreeMap::new();
        entries.insert("internal".to_string(), entry("Internal-Key", "c2VjcmV0"));
        entries.insert("external".to_string(), entry("external-key.", "c2VjcmV0Mg=="));

        let (keyring, views) = load(&entries, &resolver()).unwrap();

        let key_names = keyring.names().collect::<HashSet<_>>();
        assert_eq!(key_names.len(), 2);
        assert!(key_names.contains("internal-key."));
        assert!(key_names.iter().all(|name| views.get(name).is_some()));

        assert_eq!(views.get("internal-key").unwrap().name, "internal");
        assert_eq!(keyring.get("external-key").unwrap().secret, b"secret2".to_vec());
    }

    #[test]
    fn test_unusable_entries_are_skipped() {
        let mut entries = BTreeMap::new();
        entries.insert("internal".to_string(), entry("", "c2VjcmV0"));
        entries.insert("external".to_string(), entry("ok-key", "c2VjcmV0"));
        entries.insert("missing".to_string(), entry("lost-key", "c2VjcmV0"));
        entries.insert("broken".to_string(), entry("bad-secret", "%%%"));

        let mut bad_alg = entry("bad-alg", "c2VjcmV0");
        bad_alg.algorithm = "hmac-whirlpool".to_string();
        entries.insert("other".to_string(), bad_alg);

        let (keyring, views) = load(&entries, &resolver()).unwrap();
        assert_eq!(keyring.len(), 1);
        assert!(keyring.get("ok-key").is_some());
        assert_eq!(views.get("ok-key").unwrap().name, "external");
        assert!(views.get("lost-key").is_none());
    }

    #[test]
    fn test_no_usable_keys_is_fatal() {
        let mut entries = BTreeMap::new();
        entries.insert("missing".to_string(), entry("lost-key", "c2VjcmV0"));

        assert_eq!(
            load(&entries, &resolver()).unwrap_err(),
            KeyringError::NoUsableKeys
        );
    }
}
