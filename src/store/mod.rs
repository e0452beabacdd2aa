pub mod circuit_breaker;
pub mod client;
pub mod scripts;

pub use circuit_breaker::{BreakerCheck, CircuitBreaker};
pub use client::StoreClient;
