pub mod auth;
pub mod config;
pub mod engine;
pub mod journal;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod protocol;
pub mod server;
pub mod sweeper;
