//! Error types for the image cache.

use crate::ImageId;
use mvs_scheduler::JobError;
use std::io;
use std::sync::Arc;
use thiserror::Error;

/// Convenience alias for results returned by the cache
pub type Result<T> = std::result::Result<T, CacheError>;

/// Error reported by an [`crate::ImageDecoder`] while filling a slot.
#[derive(Debug, Clone, Error)]
pub enum DecodeError {
    /// The image could not be read from storage
    #[error("I/O error: {0}")]
    Io(#[source] Arc<io::Error>),

    /// The image data is malformed or in an unsupported format
    #[error("invalid image data: {0}")]
    Format(String),

    /// The decoded image does not fit in a slot buffer
    #[error("image of {width}x{height} exceeds slot capacity of {max_width}x{max_height}")]
    Dimensions {
        width: u32,
        height: u32,
        max_width: u32,
        max_height: u32,
    },
}

impl From<io::Error> for DecodeError {
    fn from(err: io::Error) -> Self {
        DecodeError::Io(Arc::new(err))
    }
}

/// Errors returned by [`crate::ImageCache`] operations.
///
/// The type is `Clone` so that one failed background load can be observed
/// both through its [`crate::LoadHandle`] and again when the cache is
/// drained.
#[derive(Debug, Clone, Error)]
pub enum CacheError {
    /// Decoding an image failed; the image stays non-resident
    #[error("failed to decode image {id}: {source}")]
    Decode {
        id: ImageId,
        #[source]
        source: DecodeError,
    },

    /// The cache cannot be built with the given sizing
    #[error("invalid cache capacity: {0}")]
    CapacityMisconfiguration(String),

    /// The image is not resident (never loaded, evicted, or still loading)
    #[error("image {id} is not resident in the cache")]
    NotResident { id: ImageId },

    /// The sample point lies outside the image
    #[error("point ({x}, {y}) is outside image {id} of size {width}x{height}")]
    OutOfRange {
        id: ImageId,
        x: f32,
        y: f32,
        width: u32,
        height: u32,
    },

    /// The id does not belong to the view set the cache was built for
    #[error("image id {id} is out of range for a view set of {view_count} images")]
    UnknownImage { id: ImageId, view_count: usize },

    /// Every slot is held by a lease, so nothing can be evicted
    #[error("all {slot_count} cache slots are pinned by leases")]
    AllSlotsPinned { slot_count: usize },

    /// A background load task panicked
    #[error("background load panicked: {message}")]
    LoadPanicked { message: String },

    /// The worker pool could not accept or run a load
    #[error("scheduler error: {0}")]
    Scheduler(#[from] JobError),

    /// One or more background loads failed before a drain
    #[error("{} background load(s) failed", .0.len())]
    AsyncLoadsFailed(Vec<CacheError>),
}

impl CacheError {
    /// Returns the image id the error relates to, when there is one
    pub fn image_id(&self) -> Option<ImageId> {
        match self {
            CacheError::Decode { id, .. }
            | CacheError::NotResident { id }
            | CacheError::OutOfRange { id, .. }
            | CacheError::UnknownImage { id, .. } => Some(*id),
            _ => None,
        }
    }

    /// Returns true for errors caused by a failed decode
    pub fn is_decode_failure(&self) -> bool {
        matches!(self, CacheError::Decode { .. })
    }
}

/// Maps a background job outcome onto the cache's error type.
pub(crate) fn flatten_job_outcome<T>(
    outcome: std::result::Result<Result<T>, JobError>,
) -> Result<T> {
    match outcome {
        Ok(result) => result,
        Err(JobError::Panicked(message)) => Err(CacheError::LoadPanicked { message }),
        Err(other) => Err(CacheError::Scheduler(other)),
    }
}
