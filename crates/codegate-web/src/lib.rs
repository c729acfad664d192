//! HTTP surface for web clients: code redemption and rate-limited chat.

mod error;
pub mod server;

pub use error::ApiError;
pub use server::{router, serve, WebState};
