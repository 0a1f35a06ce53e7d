pub mod config;
pub mod consumer;
pub mod db;
pub mod models;
pub mod routes;
pub mod rules;
pub mod service;

pub use consumer::start_payment_requested_consumer;
pub use service::{HttpOrchestratorClient, PaymentStatusClient, RiskService};
