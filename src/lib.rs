//! Passport assign server - supplier responsibility assignment for product passports

pub mod api;
pub mod assignment;
pub mod config;
pub mod error;
pub mod models;
pub mod schema;
pub mod store;
pub mod websocket;
pub mod wizard;

use sqlx::SqlitePool;
use std::sync::Arc;

use crate::assignment::{InviteLifecycle, LifecycleConfig, NotificationDispatcher};
use crate::schema::SchemaProvider;

/// Application state shared across handlers
pub struct AppState {
    pub lifecycle: Arc<InviteLifecycle>,
    pub dispatcher: Arc<dyn NotificationDispatcher>,
}

impl AppState {
    pub fn new(
        pool: SqlitePool,
        schemas: Arc<dyn SchemaProvider>,
        config: LifecycleConfig,
        dispatcher: Arc<dyn NotificationDispatcher>,
    ) -> Arc<Self> {
        Arc::new(Self {
            lifecycle: Arc::new(InviteLifecycle::new(
                store::Store::new(pool),
                schemas,
                config,
            )),
            dispatcher,
        })
    }
}
