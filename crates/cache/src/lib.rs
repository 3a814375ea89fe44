//! Multi-view image cache
//!
//! Bounded, thread-safe cache of decoded per-view images for multi-view
//! reconstruction. A fixed pool of slot buffers is sized from a memory
//! budget; misses reuse the least recently used slot; loads can run in the
//! background and are joined at an explicit drain point; resident images
//! are read with bilinear sampling.

pub mod arena;
pub mod cache;
pub mod color;
pub mod config;
pub mod error;
pub mod eviction;
pub mod lease;
pub mod residency;
pub mod sampler;
pub mod sizing;

/// Identifier of a view, in `0..view_count`
pub type ImageId = usize;

pub use arena::{ImageBuffer, SlotArena, SlotIndex};
pub use cache::{CacheStats, DrainReport, ImageCache, ImageDecoder, LoadHandle};
pub use color::Color;
pub use config::{CacheConfig, ConfigError};
pub use error::{CacheError, DecodeError, Result};
pub use eviction::select_victim;
pub use lease::ImageLease;
pub use residency::ResidencyTable;
pub use sampler::sample_bilinear;
pub use sizing::{SlotPlan, ViewSet};
