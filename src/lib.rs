pub mod config;
pub mod device;
pub mod messages;
pub mod runtime;
pub mod vehicle;
