/// Middleware modules for the API server
///
/// - `security`: response security headers
/// - `rate_limit`: per-organization request limits (Redis-backed)

pub mod rate_limit;
pub mod security;
