//! HTTP middleware.

pub mod connection_limit;

pub use connection_limit::connection_limit_middleware;
