pub mod auth;
pub mod config;

pub use auth::{CallbackParams, DeviceInfo, LoginOutcome, PrepareResponse, TokenPair};
pub use config::{AppConfig, PopupConfig};
