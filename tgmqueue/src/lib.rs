//! # tgmqueue - Per-chat track queue for TGMStream
//!
//! This crate provides the queue store used by playback sessions:
//! - FIFO waiting sequence with an optional capacity bound
//! - A separate "current" slot, never duplicated in the waiting list
//! - Loop mode (finished track re-appended to the tail)
//! - Lazy resolution: tracks carry only their raw request until they
//!   are promoted to current
//!
//! # Example
//!
//! ```
//! use tgmqueue::ChatQueue;
//! use tgmtrack::{Platform, Track};
//!
//! let mut queue = ChatQueue::new();
//! queue.enqueue(Track::new(Platform::Youtube, "query b", "bob")).unwrap();
//! queue.enqueue(Track::new(Platform::Youtube, "query c", "bob")).unwrap();
//!
//! assert_eq!(queue.advance().unwrap().request, "query b");
//! assert_eq!(queue.advance().unwrap().request, "query c");
//! assert!(queue.advance().is_err());
//! ```

mod error;
mod queue;

pub use error::{Error, Result};
pub use queue::ChatQueue;
