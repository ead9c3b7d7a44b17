use std::borrow::Cow;

use serde::{Deserialize, Serialize};

/// Permission identifier.
///
/// Permissions are opaque, case-sensitive names (e.g. "gestionar_salas").
/// Two permissions are equal only when their names are byte-for-byte equal;
/// there is no wildcard and no normalisation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Permission(Cow<'static, str>);

impl Permission {
    pub const fn from_static(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }

    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for Permission {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Push arbitrary notifications onto a user's queue.
pub const SEND_NOTIFICATIONS: Permission = Permission::from_static("enviar_notificaciones");

/// Run room usage maintenance on demand.
pub const MANAGE_ROOMS: Permission = Permission::from_static("gestionar_salas");
