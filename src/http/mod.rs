//! HTTP surface of the admission service.

mod envelope;
mod server;
mod service;

pub use envelope::{ApiError, Data, ErrorBody, ErrorEnvelope};
pub use server::HttpServer;
pub use service::{router, AppState};
