pub mod error;
pub mod identity;
pub mod routing;
pub mod backend;
pub mod views;
pub mod config;
pub mod server;
