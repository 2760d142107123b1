//! HTTP API for the invoice intake and bookkeeping service.
//!
//! ## Modules
//!
//! - `app`: Application state and router builder
//! - `config`: Configuration management
//! - `error`: Error handling and HTTP response mapping
//! - `notify`: WebSocket hub and persisted notifications
//! - `processing`: AI extraction pipeline shared by upload, WhatsApp, and
//!   bulk endpoints
//! - `routes`: API route handlers

pub mod app;
pub mod config;
pub mod error;
pub mod middleware;
pub mod notify;
pub mod processing;
pub mod routes;
