//! `finrag-server` exposes a [`finrag_rag::RagOrchestrator`] over HTTP.
//!
//! Routes: `POST /query`, `GET /health`, `GET /ready`, `POST /admin/reload`.

pub mod error;
pub mod protocol;
pub mod server;

pub use error::ApiError;
pub use server::{AppState, ServerConfig, app_router, run_server};
