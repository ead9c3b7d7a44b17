//! External service clients.

pub mod authority;

pub use authority::RemoteAuthorization;
