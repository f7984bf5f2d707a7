//! DAO Tracker core
//!
//! Tender dossier tracking: repositories over an in-memory or SQLite document
//! store, list numbering, batched change history, notifications with email
//! mirroring, and role checks.

pub mod auth;
pub mod config;
pub mod db;
pub mod errors;
pub mod models;
pub mod services;

use std::sync::Arc;

use config::Config;
use db::{Repositories, StorageSelector};
use errors::AppResult;
use services::{
    ChangeAggregator, DaoService, HistoryStore, Mailer, NotificationCenter, SequenceGenerator,
};

/// Process-lifetime state shared by every caller.
pub struct AppContext {
    pub config: Arc<Config>,
    pub selector: StorageSelector,
    pub repos: Arc<Repositories>,
    pub sequence: Arc<SequenceGenerator>,
    pub history: Arc<HistoryStore>,
    pub aggregator: Arc<ChangeAggregator>,
    pub notifications: NotificationCenter,
    pub daos: DaoService,
}

impl AppContext {
    /// Resolve storage and build every service once. Fails only when the
    /// document store is required and unreachable.
    pub async fn new(config: Config, mailer: Arc<dyn Mailer>) -> AppResult<Arc<Self>> {
        let config = Arc::new(config);
        let selector = StorageSelector::new(config.clone());
        let repos = selector.get().await?;

        let sequence = Arc::new(SequenceGenerator::new());
        let history = Arc::new(HistoryStore::new(config.history_day_capacity));
        let aggregator = Arc::new(ChangeAggregator::new(history.clone()));
        let notifications = NotificationCenter::new(
            repos.notifications.clone(),
            repos.users.clone(),
            mailer,
            config.notification_capacity,
            config.mail_mirror,
        );
        let daos = DaoService::new(
            repos.clone(),
            sequence.clone(),
            aggregator.clone(),
            notifications.clone(),
            config.history_max_lines,
        );

        Ok(Arc::new(Self {
            config,
            selector,
            repos,
            sequence,
            history,
            aggregator,
            notifications,
            daos,
        }))
    }
}
