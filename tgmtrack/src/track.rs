//! Track requests and resolved source references.

use crate::Platform;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Where the resolved media lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceLocation {
    /// Remote stream or CDN URL.
    Url(String),
    /// File downloaded to the local downloads directory.
    File(PathBuf),
}

/// A playable source produced by a resolver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRef {
    pub location: SourceLocation,
    pub title: String,
    pub duration: Option<Duration>,
}

impl SourceRef {
    pub fn url(url: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            location: SourceLocation::Url(url.into()),
            title: title.into(),
            duration: None,
        }
    }

    pub fn file(path: impl Into<PathBuf>, title: impl Into<String>) -> Self {
        Self {
            location: SourceLocation::File(path.into()),
            title: title.into(),
            duration: None,
        }
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    /// Path of the local file backing this source, if any.
    pub fn local_file(&self) -> Option<&Path> {
        match &self.location {
            SourceLocation::File(path) => Some(path),
            SourceLocation::Url(_) => None,
        }
    }
}

/// A requested playable unit.
///
/// Resolution is lazy: a track carries only the raw request until it
/// is about to become current. `with_resolution` returns a new value,
/// an already-resolved track is never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Track {
    pub platform: Platform,
    /// Raw query or URL as submitted by the requester.
    pub request: String,
    /// Display name of the chat member who asked for the track.
    pub requested_by: String,
    resolved: Option<SourceRef>,
}

impl Track {
    pub fn new(
        platform: Platform,
        request: impl Into<String>,
        requested_by: impl Into<String>,
    ) -> Self {
        Self {
            platform,
            request: request.into(),
            requested_by: requested_by.into(),
            resolved: None,
        }
    }

    /// Attach a resolution, yielding a new resolved track.
    pub fn with_resolution(mut self, source: SourceRef) -> Self {
        self.resolved = Some(source);
        self
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved.is_some()
    }

    pub fn resolved(&self) -> Option<&SourceRef> {
        self.resolved.as_ref()
    }

    /// Resolved title when available, otherwise the raw request.
    pub fn title(&self) -> &str {
        self.resolved
            .as_ref()
            .map(|s| s.title.as_str())
            .unwrap_or(&self.request)
    }

    pub fn duration(&self) -> Option<Duration> {
        self.resolved.as_ref().and_then(|s| s.duration)
    }

    /// Local file backing the resolved source, if any.
    pub fn local_file(&self) -> Option<&Path> {
        self.resolved.as_ref().and_then(|s| s.local_file())
    }
}
