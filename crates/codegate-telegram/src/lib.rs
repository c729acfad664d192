//! Telegram adapter (teloxide).
//!
//! User commands (`/subscribe`, `/mysub`) and admin commands (`/ban`, `/unban`,
//! `/stats`, `/newcode`, `/codes`) over the `codegate-core` registries, plus
//! plain-text chat for subscribed users.

pub mod handlers;
pub mod router;

pub use router::{run_polling, AppState};
