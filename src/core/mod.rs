pub mod config;
pub mod error;
pub mod layout;
pub mod lock;
pub mod target;
pub mod validate;
