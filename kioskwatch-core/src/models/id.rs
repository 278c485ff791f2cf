use nanoid::nanoid;
use serde::{Deserialize, Serialize};

/// Generate a 12-character nanoid for connection identifiers
pub fn generate_id() -> String {
    nanoid!(12)
}

macro_rules! string_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            #[must_use]
            pub const fn from_string(id: String) -> Self {
                Self(id)
            }

            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

string_id! {
    /// Identifier of an unattended kiosk endpoint (client-chosen, stable)
    KioskId
}

string_id! {
    /// Identifier of a monitor operator endpoint (client-chosen, stable)
    MonitorId
}

string_id! {
    /// Identifier of a registered CCTV camera
    CameraId
}

string_id! {
    /// Opaque handle for one persistent connection
    ConnectionId
}

impl ConnectionId {
    /// Mint a fresh connection id (12-char nanoid)
    #[must_use]
    pub fn generate() -> Self {
        Self(generate_id())
    }
}
