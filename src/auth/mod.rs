//! Principals, credentials and namespace permissions.

mod credentials;
mod middleware;
mod principal;
pub mod session;

pub use credentials::{
    API_KEY_HEADER, CredentialError, credentials_match, extract_api_key, random_secret,
    resolve_api_key,
};
pub use middleware::{Auth, AuthError, RequireRead};
pub use principal::Principal;
