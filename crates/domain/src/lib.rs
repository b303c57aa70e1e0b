//! # ghostctl Domain
//!
//! Pure types shared by the ghostctl crates.
//!
//! This crate contains:
//! - Construction-time error types and Result definitions
//! - Client configuration structures with their defaults and validation
//!
//! ## Architecture
//! - No dependencies on other ghostctl crates
//! - Only external dependencies allowed
//! - No I/O

pub mod config;
pub mod errors;

// Re-export commonly used items
pub use config::*;
pub use errors::*;
