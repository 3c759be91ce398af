//! Closed set of supported media platforms.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Media platform a track request targets.
///
/// The set is closed on purpose: resolver selection and fallback
/// routing match on it exhaustively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Platform {
    Youtube,
    Spotify,
    JioSaavn,
    SoundCloud,
    AppleMusic,
    /// Audio file already hosted on Telegram.
    Telegram,
}

/// Error returned when parsing an unknown platform name.
#[derive(Debug, Clone, thiserror::Error)]
#[error("Unknown platform: {0}")]
pub struct UnknownPlatform(pub String);

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Youtube => "youtube",
            Platform::Spotify => "spotify",
            Platform::JioSaavn => "jiosaavn",
            Platform::SoundCloud => "soundcloud",
            Platform::AppleMusic => "apple_music",
            Platform::Telegram => "telegram",
        }
    }

    /// All platforms, in default fallback priority order.
    pub const fn all() -> [Platform; 6] {
        [
            Platform::Youtube,
            Platform::Spotify,
            Platform::JioSaavn,
            Platform::SoundCloud,
            Platform::AppleMusic,
            Platform::Telegram,
        ]
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = UnknownPlatform;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "youtube" | "yt" => Ok(Platform::Youtube),
            "spotify" => Ok(Platform::Spotify),
            "jiosaavn" | "saavn" => Ok(Platform::JioSaavn),
            "soundcloud" => Ok(Platform::SoundCloud),
            "apple_music" | "apple" => Ok(Platform::AppleMusic),
            "telegram" => Ok(Platform::Telegram),
            other => Err(UnknownPlatform(other.to_string())),
        }
    }
}

impl Serialize for Platform {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Platform {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        Platform::from_str(&value).map_err(serde::de::Error::custom)
    }
}
