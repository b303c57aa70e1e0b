//! Blocking HTTP transport.

pub mod client;

pub use client::{HttpTransport, HttpTransportBuilder, DEFAULT_USER_AGENT};
