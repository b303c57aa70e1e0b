//! Admin API authentication: key parsing, token signing and the token cache.

pub mod cache;
pub mod credential;
pub mod signer;

pub use cache::{CacheStats, TokenCache, DEFAULT_TOKEN_LIFETIME};
pub use credential::{AdminKey, ContentKey};
pub use signer::{AdminClaims, SignedToken, TokenSigner, ADMIN_AUDIENCE};
