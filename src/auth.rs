//! Session token models: the redacting secret wrapper, the token-endpoint grant, and the
//! current token state held by [`crate::store::TokenStore`].

pub mod secret;
pub mod state;

pub use secret::*;
pub use state::*;
