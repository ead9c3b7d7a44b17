//! `multiroom-auth` — authentication/authorization boundary.
//!
//! Decoupled from HTTP and storage: transports extract the credential, this
//! crate verifies it and decides whether a principal holds a permission.

pub mod authorize;
pub mod cache;
pub mod claims;
pub mod permissions;
pub mod principal;
pub mod token;

pub use authorize::{authorize, AuthorizationClient, LocalAuthorization, PrincipalDirectory};
pub use cache::CachedAuthorization;
pub use claims::{Claims, TokenError, TokenType};
pub use permissions::Permission;
pub use principal::{AuthorityEnvelope, Identity, PermissionGrant, PrincipalRecord};
pub use token::{Hs256TokenVerifier, TokenSigner, TokenVerifier};
