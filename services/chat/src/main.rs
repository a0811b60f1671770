use anyhow::Result;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use chat::{
    AppState, Gateway,
    config::{ChatConfig, StorageBackend},
    filter::WordListFilter,
    housekeeping::Housekeeper,
    middleware::JwtConfig,
    routes,
    store::{MemorySessionStore, PgSessionStore, SessionStore},
    users::{PgUserDirectory, UserDirectory},
};
use common::database::{DatabaseConfig, health_check, init_pool};

#[tokio::main]
async fn main() -> Result<()> {
    let config = ChatConfig::load()?;

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("chat=info"));
    if config.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    info!("Starting chat service");

    // User accounts always live in PostgreSQL
    let db_config = DatabaseConfig::from_env()?;
    let pool = init_pool(&db_config).await?;

    if health_check(&pool).await? {
        info!("Database connection successful");
    } else {
        anyhow::bail!("Failed to connect to database");
    }

    let store: Arc<dyn SessionStore> = match config.storage.backend {
        StorageBackend::Postgres => {
            let store = PgSessionStore::new(pool.clone());
            store.ensure_schema().await?;
            Arc::new(store)
        }
        StorageBackend::Memory => {
            warn!("Using in-memory session store, sessions are lost on restart");
            Arc::new(MemorySessionStore::new())
        }
    };
    let users: Arc<dyn UserDirectory> = Arc::new(PgUserDirectory::new(pool));

    let gateway = Arc::new(Gateway::new(
        store,
        users,
        Arc::new(WordListFilter::default()),
    ));

    let housekeeper = Housekeeper::new(gateway.clone(), config.housekeeping.clone());
    let _scheduler = housekeeper.start().await?;

    let app_state = AppState::new(gateway, JwtConfig::from_settings(&config.jwt));
    let app = routes::create_router(app_state);

    let address = config.server.bind_address();
    let listener = TcpListener::bind(&address).await?;
    info!("Chat service listening on {}", address);

    axum::serve(listener, app).await?;

    Ok(())
}
