//! Passport assign server - supplier responsibility assignment for product passports

use clap::Parser;
use sqlx::sqlite::SqlitePoolOptions;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use passport_assign::assignment::{LogDispatcher, NotificationDispatcher, WebhookDispatcher};
use passport_assign::config::Config;
use passport_assign::schema::StaticSchemaProvider;
use passport_assign::{api, store, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "passport_assign=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::parse();

    // Database connection
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await?;

    // Run migrations
    store::run_migrations(&pool).await?;

    let schemas = match &config.schema_file {
        Some(path) => {
            tracing::info!("Loading schema catalog from {}", path.display());
            StaticSchemaProvider::from_file(path)?
        }
        None => {
            tracing::warn!("No schema catalog configured; every passport will be unknown");
            StaticSchemaProvider::new()
        }
    };

    let dispatcher: Arc<dyn NotificationDispatcher> = match &config.notify_webhook {
        Some(url) => {
            tracing::info!("Invitations are posted to {}", url);
            Arc::new(WebhookDispatcher::new(url.clone()))
        }
        None => Arc::new(LogDispatcher),
    };

    let state = AppState::new(pool, Arc::new(schemas), config.lifecycle(), dispatcher);

    // Build router
    let app = api::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    // Start server
    let listener = tokio::net::TcpListener::bind(config.bind).await?;
    tracing::info!("Server listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await?;

    Ok(())
}
