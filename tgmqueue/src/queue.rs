//! ChatQueue : per-chat FIFO with a separate "current" slot.

use crate::{Error, Result};
use std::collections::VecDeque;
use tgmtrack::Track;
use tracing::warn;

/// Ordered sequence of tracks awaiting playback plus at most one
/// current track.
///
/// The current track is never part of the waiting sequence. With loop
/// mode enabled, `advance` re-appends the finished current track to
/// the tail instead of discarding it.
#[derive(Debug, Default)]
pub struct ChatQueue {
    current: Option<Track>,
    waiting: VecDeque<Track>,
    loop_enabled: bool,
    max_size: Option<usize>,
}

impl ChatQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue bounded to `max_size` waiting tracks (None = unbounded).
    pub fn with_capacity(max_size: Option<usize>) -> Self {
        Self {
            max_size,
            ..Self::default()
        }
    }

    /// Append a track to the tail of the waiting sequence.
    ///
    /// Returns the position of the track in the waiting sequence
    /// (0 = next up).
    pub fn enqueue(&mut self, track: Track) -> Result<usize> {
        if let Some(max) = self.max_size {
            if self.waiting.len() >= max {
                return Err(Error::QueueFull(max));
            }
        }
        self.waiting.push_back(track);
        Ok(self.waiting.len() - 1)
    }

    /// Move to the next track.
    ///
    /// Loop on: the current track is re-appended to the tail before
    /// the new head is taken. Loop off: the current track is discarded
    /// (its downloaded file, if any, is removed). Returns the new
    /// current track, or `EmptyQueue` when nothing remains; in that
    /// case the current slot is left empty.
    pub fn advance(&mut self) -> Result<&Track> {
        if let Some(finished) = self.current.take() {
            if self.loop_enabled {
                self.waiting.push_back(finished);
            } else {
                discard(finished);
            }
        }

        match self.waiting.pop_front() {
            Some(next) => {
                self.current = Some(next);
                Ok(self.current.as_ref().unwrap())
            }
            None => Err(Error::EmptyQueue),
        }
    }

    /// Empty the waiting sequence, returning the number of tracks
    /// dropped. The current track is untouched.
    pub fn clear(&mut self) -> usize {
        let removed = self.waiting.len();
        for track in self.waiting.drain(..) {
            discard(track);
        }
        removed
    }

    /// Remove a waiting track by index (0 = next up).
    pub fn remove_at(&mut self, index: usize) -> Result<Track> {
        let len = self.waiting.len();
        self.waiting
            .remove(index)
            .ok_or(Error::OutOfRange { index, len })
    }

    /// Attach a resolution to the current track.
    ///
    /// Resolution is lazy: the session calls this just before starting
    /// playback of the track that `advance` promoted.
    pub fn resolve_current(&mut self, source: tgmtrack::SourceRef) -> Result<&Track> {
        let current = self.current.take().ok_or(Error::EmptyQueue)?;
        self.current = Some(current.with_resolution(source));
        Ok(self.current.as_ref().unwrap())
    }

    /// Drop the current track without promoting a successor.
    pub fn take_current(&mut self) -> Option<Track> {
        self.current.take()
    }

    pub fn current(&self) -> Option<&Track> {
        self.current.as_ref()
    }

    pub fn set_loop(&mut self, enabled: bool) {
        self.loop_enabled = enabled;
    }

    pub fn loop_enabled(&self) -> bool {
        self.loop_enabled
    }

    /// Number of waiting tracks (current excluded).
    pub fn len(&self) -> usize {
        self.waiting.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waiting.is_empty()
    }

    /// Snapshot of the waiting sequence.
    pub fn snapshot(&self) -> Vec<Track> {
        self.waiting.iter().cloned().collect()
    }

    /// Discard everything, current track included, removing any
    /// downloaded files. Used on session teardown.
    pub fn purge(&mut self) {
        if let Some(current) = self.current.take() {
            discard(current);
        }
        self.clear();
    }
}

/// Drop a track, removing its downloaded file if it has one.
fn discard(track: Track) {
    if let Some(path) = track.local_file() {
        if let Err(e) = std::fs::remove_file(path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to remove downloaded file {}: {}", path.display(), e);
            }
        }
    }
}
