//! Sled session factory.

use std::sync::Arc;

use sled::Db;

use pollcast::{Session, SessionError, SessionFactory};

use crate::config::SledEngineConfig;
use crate::error::Error;
use crate::log::NotificationLog;
use crate::session::SledSession;

/// Opens [`SledSession`]s over one sled database.
///
/// Sessions opened from the same engine, or from engines sharing a [`Db`],
/// see each other's notifications.
#[derive(Clone)]
pub struct SledEngine {
    db: Db,
    log: NotificationLog,
    config: SledEngineConfig,
}

impl SledEngine {
    /// Open or create the database described by the configuration.
    pub fn new(config: SledEngineConfig) -> Result<Self, Error> {
        let db = config.to_sled_config().open()?;
        Self::with_db(db, config)
    }

    /// Use an already open database.
    pub fn with_db(db: Db, config: SledEngineConfig) -> Result<Self, Error> {
        let log = NotificationLog::open(&db)?;
        Ok(Self { db, log, config })
    }

    /// Open a temporary database with default settings.
    pub fn temporary() -> Result<Self, Error> {
        Self::new(SledEngineConfig::temporary())
    }

    /// Get the underlying database.
    pub fn db(&self) -> &Db {
        &self.db
    }

    /// Get the notification log.
    pub fn log(&self) -> &NotificationLog {
        &self.log
    }

    /// Get the engine configuration.
    pub fn config(&self) -> &SledEngineConfig {
        &self.config
    }

    /// Flush the database to disk.
    pub fn flush(&self) -> Result<(), Error> {
        self.db.flush()?;
        Ok(())
    }
}

impl SessionFactory for SledEngine {
    fn open(&self) -> Result<Arc<dyn Session>, SessionError> {
        let session = SledSession::open(self.log.clone(), &self.config)?;
        Ok(Arc::new(session))
    }
}

impl std::fmt::Debug for SledEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SledEngine")
            .field("config", &self.config)
            .field("notifications", &self.log.len())
            .finish()
    }
}
