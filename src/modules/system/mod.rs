pub mod config;
pub mod device;
pub mod logger;
pub mod request_context;
