/// API route handlers, organized by resource
///
/// - `health`: service health and Redis cache stats
/// - `auth`: register, login, refresh
/// - `upload`: multipart invoice intake
/// - `invoices`: CRUD, processing, webhook re-push
/// - `exports`: accounting export formats
/// - `settings`: org settings (masked secrets)
/// - `notifications`: persisted notification feed
/// - `webhooks`: outbound webhook endpoint management
/// - `statistics`: dashboard aggregates (cached)
/// - `whatsapp`: Evolution gateway webhook and client wrappers
/// - `chat`: finance assistant
/// - `ws`: WebSocket upgrade

pub mod auth;
pub mod chat;
pub mod exports;
pub mod health;
pub mod invoices;
pub mod notifications;
pub mod settings;
pub mod statistics;
pub mod upload;
pub mod webhooks;
pub mod whatsapp;
pub mod ws;
