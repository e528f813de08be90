use prepboard::docserver::{router, Shelf};
use prepboard::settings::Settings;
use std::net::SocketAddr;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // ── Settings ───────────────────────────────────────────────
    let settings = Settings::load().unwrap_or_else(|e| {
        warn!("settings.json not loaded ({e}); using defaults");
        Settings::default()
    });

    // ── Open the document shelf ────────────────────────────────
    let shelf = Shelf::open(&settings.shelf_path)
        .expect("Failed to open document shelf");

    // ── Router ─────────────────────────────────────────────────
    let app = router(shelf);

    // ── Start ──────────────────────────────────────────────────
    let addr: SocketAddr = format!("{}:{}", settings.bind_address, settings.bind_port)
        .parse()
        .expect("Invalid bind address in settings");

    info!("Document store on http://{addr}");
    info!("  GET/PUT http://{addr}/docs/<name>");

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app).await.unwrap();
}
