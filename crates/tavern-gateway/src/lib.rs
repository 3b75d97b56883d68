pub mod auth;
pub mod config;
pub mod errors;
pub mod metrics;
pub mod pipeline;
pub mod routes;
pub mod state;
