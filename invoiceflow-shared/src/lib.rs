//! # InvoiceFlow Shared Library
//!
//! Shared types and business logic used by the InvoiceFlow API server and
//! the extraction engine.
//!
//! ## Module Organization
//!
//! - `models`: Database models and their CRUD operations
//! - `auth`: Password hashing, JWT tokens, auth context
//! - `db`: PostgreSQL pool and migration runner
//! - `redis`: Redis client, TTL cache, rate limiting, deduplication
//! - `export`: Accounting export formatters (DGII 606, CSV, QuickBooks, ...)
//! - `webhook`: Outbound webhook delivery with HMAC signatures

pub mod auth;
pub mod db;
pub mod export;
pub mod models;
pub mod redis;
pub mod webhook;

/// Current version of the InvoiceFlow shared library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_is_set() {
        assert!(!VERSION.is_empty());
    }
}
