//! Secret handling utilities.
//!
//! Re-exports secrecy types used for the chat token and the queue API key.

pub use secrecy::{ExposeSecret, SecretString};
