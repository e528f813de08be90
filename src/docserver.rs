//! Single-document store server — the other half of the wire contract.
//!
//! One JSON document per name: `GET /docs/{name}` returns it (404 until
//! first write), `PUT /docs/{name}` replaces it wholesale. Knowing a
//! document's URL is the only credential; the server adds no auth on top.
//! Bodies must at least parse as JSON and names must be plain slugs, so a
//! client with a typo'd document URL gets a permanent 400 it can show,
//! not an endless retry loop.

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use redb::{Database, ReadableTable, TableDefinition};
use std::sync::Arc;
use thiserror::Error;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

const DOCS: TableDefinition<&str, &str> = TableDefinition::new("docs");

#[derive(Debug, Error)]
pub enum ShelfError {
    #[error("redb: {0}")]
    Redb(String),
}

fn shelf_err<E: std::fmt::Display>(e: E) -> ShelfError {
    ShelfError::Redb(e.to_string())
}

/// Thin handle to the redb file holding the documents. Cloneable
/// (Arc inside); document bodies are stored as the raw JSON text the
/// client sent, byte for byte.
#[derive(Clone)]
pub struct Shelf {
    db: Arc<Database>,
}

impl Shelf {
    pub fn open(path: &str) -> Result<Self, ShelfError> {
        let db = Database::create(path).map_err(shelf_err)?;

        let txn = db.begin_write().map_err(shelf_err)?;
        {
            let _ = txn.open_table(DOCS).map_err(shelf_err)?;
        }
        txn.commit().map_err(shelf_err)?;

        Ok(Shelf { db: Arc::new(db) })
    }

    pub fn load(&self, name: &str) -> Result<Option<String>, ShelfError> {
        let txn = self.db.begin_read().map_err(shelf_err)?;
        let table = txn.open_table(DOCS).map_err(shelf_err)?;
        Ok(table.get(name).map_err(shelf_err)?.map(|v| v.value().to_string()))
    }

    pub fn store(&self, name: &str, body: &str) -> Result<(), ShelfError> {
        let txn = self.db.begin_write().map_err(shelf_err)?;
        {
            let mut table = txn.open_table(DOCS).map_err(shelf_err)?;
            table.insert(name, body).map_err(shelf_err)?;
        }
        txn.commit().map_err(shelf_err)?;
        Ok(())
    }
}

/// Document names are plain slugs. Anything else is permanently invalid,
/// which clients surface differently from a transient failure.
pub fn valid_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 64
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

// ── Handlers ───────────────────────────────────────────────────

async fn fetch_doc(State(shelf): State<Shelf>, Path(name): Path<String>) -> Response {
    if !valid_name(&name) {
        return (StatusCode::BAD_REQUEST, "invalid document name").into_response();
    }
    match shelf.load(&name) {
        Ok(Some(body)) => ([(header::CONTENT_TYPE, "application/json")], body).into_response(),
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

async fn store_doc(
    State(shelf): State<Shelf>,
    Path(name): Path<String>,
    body: String,
) -> Response {
    if !valid_name(&name) {
        return (StatusCode::BAD_REQUEST, "invalid document name").into_response();
    }
    if serde_json::from_str::<serde_json::Value>(&body).is_err() {
        return (StatusCode::BAD_REQUEST, "body is not valid JSON").into_response();
    }
    match shelf.store(&name, &body) {
        Ok(()) => {
            info!(doc = %name, bytes = body.len(), "document replaced");
            StatusCode::NO_CONTENT.into_response()
        }
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

/// The whole HTTP surface. CORS is wide open: the deployment model is
/// browser clients PUTting straight to this endpoint from wherever the
/// board page is hosted.
pub fn router(shelf: Shelf) -> Router {
    Router::new()
        .route("/docs/:name", get(fetch_doc).put(store_doc))
        .with_state(shelf)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}

// ── Tests ──────────────────────────────────────────────────────
