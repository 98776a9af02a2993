//! Credential issuance and verification for the three role trust domains.

pub mod password;
pub mod token;

pub use token::{Claims, IssuedToken, TokenError, TokenSecrets, TokenService};
