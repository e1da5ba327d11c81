//! Persisted catalog zone serial

use std::sync::Arc;

use crate::dns::store::{SettingsStore, StoreError};

/// Settings key the serial is stored under
pub const SERIAL_KEY: &str = "catalog-zone-soa-serial";

pub const SERIAL_MAX: u32 = 0xFFFF_FFFF;

/// Successor of `value`, wrapping to 1 so the serial is never 0
pub fn next_serial(value: u32) -> u32 {
    if value > 0 && value < SERIAL_MAX {
        value + 1
    } else {
        1
    }
}

/// Serial counter backed by a settings store
///
/// Not synchronized on its own. The catalog builder owns it behind the same
/// lock that guards change detection.
pub struct SerialCounter {
    store: Arc<dyn SettingsStore>,
    value: u32,
}

impl SerialCounter {
    /// Reads the persisted serial, creating it with value 1 if absent
    pub fn load(store: Arc<dyn SettingsStore>) -> Result<SerialCounter, StoreError> {
        let value = match store.get_integer(SERIAL_KEY)? {
            Some(v) if v > 0 && v <= SERIAL_MAX as i64 => v as u32,
            Some(v) => {
                log::warn!("Stored catalog serial {} is out of range, resetting to 1", v);
                store.set_integer(SERIAL_KEY, 1)?;
                1
            }
            None => {
                store.set_integer(SERIAL_KEY, 1)?;
                1
            }
        };

        Ok(SerialCounter { store, value })
    }

    pub fn peek(&self) -> u32 {
        self.value
    }

    /// Advances the serial, persisting it before the new value is used
    pub fn bump(&mut self) -> Result<u32, StoreError> {
        let next = next_serial(self.value);
        self.store.set_integer(SERIAL_KEY, next as i64)?;

        if next < self.value {
            log::warn!("Catalog serial wrapped around from {} to {}", self.value, next);
        }
        self.value = next;

        Ok(next)
    }
}
