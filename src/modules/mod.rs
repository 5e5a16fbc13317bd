pub mod auth;
pub mod events;
pub mod persistence;
pub mod system;
