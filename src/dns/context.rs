//! The `ServerContext` holds the state shared by all listener threads

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use derive_more::{Display, Error, From};

use crate::dns::catalog::CatalogZoneBuilder;
use crate::dns::config::Config;
use crate::dns::handler::RequestHandler;
use crate::dns::identifiers::CatalogIdentifierRegistry;
use crate::dns::keyring::{self, KeyringError};
use crate::dns::materializer::ZoneMaterializer;
use crate::dns::provider::{ProviderError, ZoneDataProvider, ZoneInfo, ZoneObserver};
use crate::dns::serial::SerialCounter;
use crate::dns::store::{IdentifierStore, SettingsStore, StoreError};

#[derive(Debug, Display, From, Error)]
pub enum ContextError {
    Keyring(KeyringError),
    Provider(ProviderError),
    Store(StoreError),
}

type Result<T> = std::result::Result<T, ContextError>;

#[derive(Debug, Default)]
pub struct ServerStatistics {
    pub tcp_query_count: AtomicUsize,
    pub udp_query_count: AtomicUsize,
}

impl ServerStatistics {
    pub fn get_tcp_query_count(&self) -> usize {
        self.tcp_query_count.load(Ordering::Acquire)
    }

    pub fn get_udp_query_count(&self) -> usize {
        self.udp_query_count.load(Ordering::Acquire)
    }
}

pub struct ServerContext {
    pub config: Config,
    pub handler: RequestHandler,
    pub identifiers: Arc<CatalogIdentifierRegistry>,
    pub statistics: ServerStatistics,
}

impl ServerContext {
    /// Prepares everything needed to serve queries
    ///
    /// Loads the persisted catalog serial, creates catalog identifiers for
    /// zones that lack one and loads the TSIG keys. Fails if no usable key
    /// remains.
    pub fn initialize<S>(
        config: Config,
        provider: Arc<dyn ZoneDataProvider>,
        store: Arc<S>,
    ) -> Result<ServerContext>
    where
        S: SettingsStore + IdentifierStore + 'static,
    {
        let serial = SerialCounter::load(store.clone())?;
        log::info!("Catalog zone serial is {}", serial.peek());

        let identifiers = Arc::new(CatalogIdentifierRegistry::new(store));
        identifiers.backfill(&provider.list_all_zones()?)?;

        let (keyring, views) = keyring::load(&config.tsig_keys, provider.as_ref())?;
        log::info!("Loaded {} TSIG keys", keyring.len());

        let catalog = Arc::new(CatalogZoneBuilder::new(
            provider.clone(),
            identifiers.clone(),
            serial,
        ));
        let handler = RequestHandler::new(
            Arc::new(keyring),
            Arc::new(views),
            catalog,
            ZoneMaterializer::new(provider),
        );

        Ok(ServerContext {
            config,
            handler,
            identifiers,
            statistics: ServerStatistics::default(),
        })
    }

    /// Called by the data layer once a zone has been created
    pub fn notify_zone_created(&self, zone: &ZoneInfo) -> std::result::Result<String, StoreError> {
        self.identifiers.ensure_identifier(zone)
    }

    /// Called by the data layer once a zone's name has changed
    pub fn notify_zone_renamed(&self, zone: &ZoneInfo) -> std::result::Result<String, StoreError> {
        self.identifiers.regenerate(zone)
    }
}

impl ZoneObserver for ServerContext {
    fn zone_created(&self, zone: &ZoneInfo) {
        match self.notify_zone_created(zone) {
            Ok(identifier) => log::info!("Zone {} is catalog member {}", zone.name, identifier),
            Err(e) => log::error!("Failed to add zone {} to the catalog: {}", zone.name, e),
        }
    }

    fn zone_renamed(&self, zone: &ZoneInfo) {
        if let Err(e) = self.notify_zone_renamed(zone) {
            log::error!("Failed to handle rename of zone {}: {}", zone.name, e);
        }
    }
}
