use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Role of an authenticated signaling client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ClientRole {
    Kiosk,
    Monitor,
}

impl ClientRole {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Kiosk => "KIOSK",
            Self::Monitor => "MONITOR",
        }
    }

    /// The side of a session facing this role
    #[must_use]
    pub const fn peer(self) -> Self {
        match self {
            Self::Kiosk => Self::Monitor,
            Self::Monitor => Self::Kiosk,
        }
    }
}

impl FromStr for ClientRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "KIOSK" => Ok(Self::Kiosk),
            "MONITOR" => Ok(Self::Monitor),
            other => Err(format!("Unknown client role: {other}")),
        }
    }
}

impl std::fmt::Display for ClientRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
