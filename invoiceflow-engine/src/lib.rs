//! # InvoiceFlow Engine
//!
//! Invoice understanding for the InvoiceFlow platform: media preparation,
//! AI extraction, Dominican fiscal normalization, spend control, and the
//! WhatsApp gateway integration.
//!
//! ## Modules
//!
//! - `media`: image optimization and PDF text extraction
//! - `openai`: chat completions client (vision and text)
//! - `prompt`: extraction and chat prompts
//! - `normalize`: turning raw model output into validated invoice fields
//! - `fiscal`: NCF, DGII codes, and vendor country detection
//! - `cost`: per-organization AI budget gates and token pricing
//! - `extract`: the orchestrated document-to-invoice pipeline
//! - `evolution`: WhatsApp gateway client and webhook parsing

pub mod cost;
pub mod evolution;
pub mod extract;
pub mod fiscal;
pub mod media;
pub mod normalize;
pub mod openai;
pub mod prompt;
