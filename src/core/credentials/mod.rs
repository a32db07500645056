//! Credential resolution
//!
//! [`select_credential`] is the pure policy (provider session first, then the
//! system credential); [`CredentialResolver`] feeds it live session state and
//! issues system tokens; [`CredentialLease`] keeps the result fresh.

pub mod resolver;
pub mod select;

pub use resolver::{CredentialLease, CredentialResolver};
pub use select::{select_credential, CredentialChoice};
