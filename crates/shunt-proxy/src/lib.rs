//! Shunt: a configurable HTTP request-interception engine.
//!
//! Inbound requests — received directly or tunneled through SOCKS5 — are
//! matched against user-defined endpoints and rules, then answered with a
//! synthesized response (static, templated, or script-computed) or forwarded
//! to a real backend with header/status/body transformation.

// ===== Matching & dispatch =====
pub mod cache;
pub mod matcher;
pub mod pattern;
pub mod validator;

// ===== Response generation =====
pub mod response;
pub mod template;

// ===== Transports =====
pub mod proxy;
pub mod server;
pub mod socks;

// ===== Shared infrastructure =====
pub mod config;
pub mod error;
pub mod logging;
pub mod state;

pub mod scripting;

pub use error::EngineError;
pub use scripting::{ScriptRequest, ScriptResponse};
