//! Offscreen Framebuffer Memory Manager
//!
//! A best-fit arena manager for the offscreen region of a framebuffer:
//! the linear byte range between the visible scanout area and the end of
//! video memory. The range is partitioned into an ordered list of areas:
//! allocation splits a free area and freeing merges it back with its
//! free neighbours. When free space runs out, the manager evicts the
//! contiguous run of occupied areas with the lowest eviction cost
//! (preferring large areas that have sat idle the longest).
//!
//! # Features
//!
//! - **First-fit allocation** with per-request alignment, carved from
//!   the tail of the chosen free area
//! - **Cost-based eviction**: a sliding-window search over the area list
//!   minimises the total `size / age` cost of the run that gets evicted
//! - **Locked areas** that the eviction search never touches
//! - **Swap-out/swap-in** lifecycle for VT switches: everything is
//!   evicted (owners notified) and the arena is rebuilt on resume
//!
//! # Optional Features
//!
//! - `stats`: allocation/eviction statistics collection
//! - `release-validate`: keep list consistency checks in release builds
//!
//! # Usage
//!
//! ```ignore
//! use offscreen_alloc::{EvictHandler, OffscreenConfig, OffscreenManager};
//!
//! let mut manager = OffscreenManager::new(pixmaps, OffscreenConfig {
//!     offscreen_base: visible_bytes,
//!     memory_size: fb_bytes,
//! })?;
//!
//! let area = manager.alloc(surface_bytes, 4096, false, Some(surface_id))?;
//! let offset = manager.get(area).offset();
//! ```

#![no_std]

#[cfg(test)]
extern crate alloc;

pub mod area;
pub mod config;
pub mod error;
pub mod manager;
pub mod traits;

#[cfg(feature = "stats")]
pub mod stats;

pub use area::{Area, AreaRef, AreaState};
pub use error::AllocError;
pub use manager::{OffscreenConfig, OffscreenManager};
pub use traits::EvictHandler;
