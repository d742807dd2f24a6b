//! service-core: Shared infrastructure for micros microservices.
pub mod config;
pub mod error;
pub mod middleware;
pub mod observability;
