pub mod auth;
pub mod error;
pub mod messages;
pub mod middleware;
pub mod notifications;
pub mod requests;
pub mod settings;
pub mod storage;
pub mod verification;

pub use auth::{AppState, AppStateInner};
