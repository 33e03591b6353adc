pub mod cache;
pub mod coalesce;
pub mod config;
pub mod error;
pub mod gateway;
pub mod metrics;
pub mod origin;
pub mod policy;
pub mod request;
pub mod server;
