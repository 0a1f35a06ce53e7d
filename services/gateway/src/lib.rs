pub mod config;
pub mod models;
pub mod rate_limit;
pub mod routes;
