//! Scoped pin on a resident image.

use crate::arena::SlotIndex;
use crate::cache::{ImageDecoder, Shared};
use crate::error::{CacheError, Result};
use crate::sampler::sample_bilinear;
use crate::{Color, ImageId};

/// Keeps an image resident for the lifetime of the lease
///
/// While any lease on a slot is alive, the eviction policy skips that slot,
/// so reads through the lease always see the leased image. Dropping the
/// lease releases the pin.
///
/// Holding leases on every slot makes further misses fail with
/// [`CacheError::AllSlotsPinned`].
///
/// # Example
///
/// ```
/// use mvs_image_cache::{CacheConfig, Color, DecodeError, ImageBuffer, ImageCache, ViewSet};
///
/// let decoder = |id: usize, target: &mut ImageBuffer| -> Result<(), DecodeError> {
///     target.prepare(2, 2)?.fill(Color::gray(id as f32));
///     Ok(())
/// };
/// let config = CacheConfig::default()
///     .with_budget_bytes(1)
///     .with_min_slots(1)
///     .with_worker_threads(1);
/// let cache = ImageCache::new(ViewSet::new(4, 2, 2), &config, decoder).unwrap();
///
/// let lease = cache.lease(2).unwrap();
/// assert_eq!(lease.sample(0.5, 0.5).unwrap(), Color::gray(2.0));
///
/// // The only slot is pinned, so nothing else can be loaded
/// assert!(cache.ensure_loaded(3).is_err());
///
/// drop(lease);
/// assert!(cache.ensure_loaded(3).is_ok());
/// ```
pub struct ImageLease<'a, D: ImageDecoder> {
    shared: &'a Shared<D>,
    id: ImageId,
    slot: SlotIndex,
}

impl<'a, D: ImageDecoder> ImageLease<'a, D> {
    /// Wrap a slot the caller has already pinned
    pub(crate) fn new(shared: &'a Shared<D>, id: ImageId, slot: SlotIndex) -> Self {
        Self { shared, id, slot }
    }

    /// The leased image id
    pub fn id(&self) -> ImageId {
        self.id
    }

    /// The pinned slot
    pub fn slot(&self) -> SlotIndex {
        self.slot
    }

    /// Width of the leased image
    pub fn width(&self) -> u32 {
        self.shared.read_slot(self.slot).width()
    }

    /// Height of the leased image
    pub fn height(&self) -> u32 {
        self.shared.read_slot(self.slot).height()
    }

    /// Pixel at integer coordinates, or `None` outside the image
    pub fn pixel(&self, x: u32, y: u32) -> Option<Color> {
        self.shared.read_slot(self.slot).get(x, y)
    }

    /// Bilinear sample at `(x, y)`
    pub fn sample(&self, x: f32, y: f32) -> Result<Color> {
        let image = self.shared.read_slot(self.slot);
        sample_bilinear(&image, x, y).ok_or(CacheError::OutOfRange {
            id: self.id,
            x,
            y,
            width: image.width(),
            height: image.height(),
        })
    }
}

impl<D: ImageDecoder> Drop for ImageLease<'_, D> {
    fn drop(&mut self) {
        self.shared.unpin(self.slot);
    }
}

impl<D: ImageDecoder> std::fmt::Debug for ImageLease<'_, D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageLease")
            .field("id", &self.id)
            .field("slot", &self.slot)
            .finish()
    }
}
