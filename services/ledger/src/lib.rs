pub mod config;
pub mod consumer;
pub mod db;
pub mod models;
pub mod routes;
pub mod service;

pub use consumer::start_captured_consumer;
pub use service::{LedgerError, LedgerService};
