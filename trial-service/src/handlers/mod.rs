pub mod health;
pub mod trial;

pub use health::{health_check, metrics, readiness_check};
