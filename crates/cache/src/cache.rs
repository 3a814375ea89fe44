//! Thread-safe image cache with LRU slot reuse
//!
//! [`ImageCache`] keeps a fixed number of decoded images in memory. Callers
//! make an image resident with [`ImageCache::ensure_loaded`] (blocking) or
//! [`ImageCache::ensure_loaded_async`] (background), then read pixels with
//! [`ImageCache::sample`].
//!
//! All residency metadata sits behind one mutex. A miss claims its victim
//! slot and marks it as loading under that mutex, then decodes with the
//! mutex released, so loads of different images run in parallel while
//! concurrent requests for the same image wait for the single decode in
//! flight.

use crate::arena::{ImageBuffer, SlotArena, SlotIndex};
use crate::config::CacheConfig;
use crate::error::{flatten_job_outcome, CacheError, DecodeError, Result};
use crate::eviction::select_victim;
use crate::lease::ImageLease;
use crate::residency::ResidencyTable;
use crate::sampler::sample_bilinear;
use crate::sizing::{SlotPlan, ViewSet};
use crate::{Color, ImageId};
use mvs_scheduler::{JobHandle, JobOutcome, PendingJobs, WorkerPool, WorkerPoolConfig};
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::sync::Arc;
use std::time::Duration;

/// Source of pixel data for cache misses
///
/// Implementations fill `target` through [`ImageBuffer::prepare`], which
/// sets the image dimensions and exposes the slot's storage without
/// allocating. Any closure with the same signature is a decoder too.
pub trait ImageDecoder: Send + Sync + 'static {
    /// Decode image `id` into `target`
    fn decode(&self, id: ImageId, target: &mut ImageBuffer) -> std::result::Result<(), DecodeError>;
}

impl<F> ImageDecoder for F
where
    F: Fn(ImageId, &mut ImageBuffer) -> std::result::Result<(), DecodeError> + Send + Sync + 'static,
{
    fn decode(&self, id: ImageId, target: &mut ImageBuffer) -> std::result::Result<(), DecodeError> {
        self(id, target)
    }
}

/// Statistics about cache usage
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of slots in the pool
    pub slot_count: usize,

    /// Number of images currently bound to a slot
    pub resident: usize,

    /// Requests served without decoding
    pub hits: u64,

    /// Requests that claimed a slot for decoding
    pub misses: u64,

    /// Successful decodes
    pub loads: u64,

    /// Resident images displaced to make room
    pub evictions: u64,

    /// Decodes that failed (or panicked) and were rolled back
    pub decode_failures: u64,

    /// Background loads waiting for a loader thread
    pub queued_loads: usize,

    /// Registered background loads that have not finished
    pub loads_in_flight: usize,
}

impl CacheStats {
    /// Calculate the cache hit rate (0.0 to 1.0)
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    /// Fraction of slots holding an image (0.0 to 1.0)
    pub fn occupancy(&self) -> f64 {
        if self.slot_count == 0 {
            0.0
        } else {
            self.resident as f64 / self.slot_count as f64
        }
    }
}

/// Per-slot markers guarded by the table lock
#[derive(Debug, Clone, Copy, Default)]
struct SlotState {
    /// A decode is filling this slot
    loading: bool,
    /// Number of live leases on this slot
    pins: usize,
}

impl SlotState {
    fn is_evictable(&self) -> bool {
        !self.loading && self.pins == 0
    }
}

/// Internal cache state
struct TableState {
    table: ResidencyTable,
    slots: Vec<SlotState>,
    stats: CacheStats,
}

impl TableState {
    /// Slot holding `id` if its content can be read right now
    fn readable_slot(&self, id: ImageId) -> Option<SlotIndex> {
        self.table
            .lookup(id)
            .filter(|&slot| !self.slots[slot].loading)
    }
}

/// State shared between the cache handle and its background loads
pub(crate) struct Shared<D> {
    decoder: D,
    arena: SlotArena,
    state: Mutex<TableState>,
    load_finished: Condvar,
    plan: SlotPlan,
}

impl<D: ImageDecoder> Shared<D> {
    fn check_id(&self, id: ImageId) -> Result<()> {
        if id < self.plan.view_count {
            Ok(())
        } else {
            Err(CacheError::UnknownImage {
                id,
                view_count: self.plan.view_count,
            })
        }
    }

    /// Make `id` resident and return its slot
    pub(crate) fn ensure_loaded(&self, id: ImageId) -> Result<SlotIndex> {
        self.check_id(id)?;

        let mut state = self.state.lock();
        let victim = loop {
            if let Some(slot) = state.table.lookup(id) {
                if state.slots[slot].loading {
                    // Another thread is decoding this id; wait for it
                    self.load_finished.wait(&mut state);
                    continue;
                }
                state.table.touch(slot);
                state.stats.hits += 1;
                tracing::trace!(id, slot, "cache hit");
                return Ok(slot);
            }

            let candidate = {
                let slots = &state.slots;
                select_victim(&state.table, |slot| slots[slot].is_evictable())
            };
            match candidate {
                Some(slot) => break slot,
                None if state.slots.iter().any(|slot| slot.loading) => {
                    self.load_finished.wait(&mut state);
                }
                None => {
                    return Err(CacheError::AllSlotsPinned {
                        slot_count: state.slots.len(),
                    });
                }
            }
        };

        let evicted = state.table.bind(id, victim);
        state.slots[victim].loading = true;
        state.stats.misses += 1;
        if evicted.is_some() {
            state.stats.evictions += 1;
        }
        debug_assert!(state.table.check_invariants().is_ok());
        drop(state);

        match evicted {
            Some(old_id) => tracing::debug!(id, slot = victim, evicted = old_id, "loading image"),
            None => tracing::debug!(id, slot = victim, "loading image into free slot"),
        }

        let guard = LoadGuard {
            shared: self,
            id,
            slot: victim,
            armed: true,
        };
        let result = {
            let mut buffer = self.arena.write(victim);
            // Nothing of the evicted image may survive into this load
            buffer.clear();
            let result = self
                .decoder
                .decode(id, &mut buffer)
                .and_then(|()| {
                    if buffer.is_empty() {
                        Err(DecodeError::Format("decoder produced no image".to_string()))
                    } else {
                        Ok(())
                    }
                });
            if result.is_err() {
                buffer.clear();
            }
            result
        };
        guard.finish(result)
    }

    /// Release the loading marker and roll back the binding
    fn roll_back(&self, id: ImageId, slot: SlotIndex) {
        let mut state = self.state.lock();
        state.slots[slot].loading = false;
        if state.table.occupant(slot) == Some(id) {
            state.table.unbind(slot);
        }
        state.stats.decode_failures += 1;
        debug_assert!(state.table.check_invariants().is_ok());
        drop(state);

        self.load_finished.notify_all();
    }

    fn lock(&self) -> MutexGuard<'_, TableState> {
        self.state.lock()
    }
}

/// Completes or rolls back a claimed slot
///
/// If the decoder panics, dropping the armed guard rolls back the binding
/// and wakes waiters so they do not block on a load that will never finish.
struct LoadGuard<'a, D: ImageDecoder> {
    shared: &'a Shared<D>,
    id: ImageId,
    slot: SlotIndex,
    armed: bool,
}

impl<D: ImageDecoder> LoadGuard<'_, D> {
    fn finish(mut self, result: std::result::Result<(), DecodeError>) -> Result<SlotIndex> {
        self.armed = false;
        let (id, slot) = (self.id, self.slot);

        match result {
            Ok(()) => {
                let mut state = self.shared.lock();
                state.slots[slot].loading = false;
                state.stats.loads += 1;
                drop(state);

                self.shared.load_finished.notify_all();
                tracing::debug!(id, slot, "image loaded");
                Ok(slot)
            }
            Err(source) => {
                self.shared.roll_back(id, slot);
                tracing::warn!(id, slot, error = %source, "image decode failed");
                Err(CacheError::Decode { id, source })
            }
        }
    }
}

impl<D: ImageDecoder> Drop for LoadGuard<'_, D> {
    fn drop(&mut self) {
        if self.armed {
            self.shared.arena.write(self.slot).clear();
            self.shared.roll_back(self.id, self.slot);
            tracing::warn!(id = self.id, slot = self.slot, "image decode panicked");
        }
    }
}

/// Handle to an asynchronous load
///
/// Every clone observes the same outcome. Failures are also kept by the
/// cache until [`ImageCache::drain`] reports them.
#[derive(Debug, Clone)]
pub struct LoadHandle {
    inner: JobHandle<Result<()>>,
}

impl LoadHandle {
    /// Check if the load has finished
    pub fn is_finished(&self) -> bool {
        self.inner.is_finished()
    }

    /// Block until the load finishes and return its result
    pub fn wait(&self) -> Result<()> {
        flatten_job_outcome(self.inner.wait())
    }

    /// Block for at most `timeout`; `None` if the load is still running
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<()>> {
        self.inner.wait_timeout(timeout).map(flatten_job_outcome)
    }

    /// Result of the load if it has finished, without blocking
    pub fn try_result(&self) -> Option<Result<()>> {
        self.inner.try_result().map(flatten_job_outcome)
    }
}

/// Outcome of [`ImageCache::drain`]
#[derive(Debug, Clone, Default)]
pub struct DrainReport {
    /// Number of background tasks joined by the drain
    pub joined: usize,

    /// Errors of the tasks that failed
    pub failures: Vec<CacheError>,
}

impl DrainReport {
    /// True when no background load failed
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// Convert into a result, aggregating failures into one error
    pub fn into_result(self) -> Result<usize> {
        if self.failures.is_empty() {
            Ok(self.joined)
        } else {
            Err(CacheError::AsyncLoadsFailed(self.failures))
        }
    }
}

/// Bounded, thread-safe cache of decoded view images
///
/// The slot count is fixed at construction from the memory budget (see
/// [`SlotPlan`]). When every slot is taken, a miss reuses the least recently
/// used slot that is neither loading nor leased.
///
/// Residency is not guaranteed between calls: once other images have been
/// loaded beyond capacity, an image may be evicted. Use
/// [`ImageCache::lease`] to keep an image pinned while reading it.
///
/// # Example
///
/// ```
/// use mvs_image_cache::{CacheConfig, Color, DecodeError, ImageBuffer, ImageCache, ViewSet};
///
/// let decoder = |id: usize, target: &mut ImageBuffer| -> Result<(), DecodeError> {
///     let pixels = target.prepare(4, 4)?;
///     pixels.fill(Color::gray(id as f32));
///     Ok(())
/// };
///
/// let views = ViewSet::new(10, 4, 4);
/// let config = CacheConfig::default().with_min_slots(2).with_worker_threads(1);
/// let cache = ImageCache::new(views, &config, decoder).unwrap();
///
/// cache.ensure_loaded(3).unwrap();
/// assert_eq!(cache.sample(3, 1.5, 2.25).unwrap(), Color::gray(3.0));
///
/// // Prefetch in the background, then join at a drain point
/// cache.ensure_loaded_batch_async(vec![4, 5]).unwrap();
/// cache.drain().into_result().unwrap();
/// assert!(cache.is_resident(5));
/// ```
pub struct ImageCache<D: ImageDecoder> {
    shared: Arc<Shared<D>>,
    pool: WorkerPool,
    pending: PendingJobs<Result<()>>,
}

impl<D: ImageDecoder> ImageCache<D> {
    /// Create a cache for `views`, sized by `config`
    ///
    /// Allocates every slot buffer up front and starts the loader threads.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::CapacityMisconfiguration`] when the sizing is
    /// invalid, or [`CacheError::Scheduler`] if loader threads cannot start.
    pub fn new(views: ViewSet, config: &CacheConfig, decoder: D) -> Result<Self> {
        let plan = SlotPlan::compute(&views, config)?;
        let arena = SlotArena::allocate(plan.slot_count, views.max_width, views.max_height);

        let pool_config = WorkerPoolConfig::new(config.worker_threads)
            .with_thread_name("mvs-image-loader");
        let pool = WorkerPool::new(pool_config)?;

        tracing::info!(
            views = plan.view_count,
            slots = plan.slot_count,
            per_image_bytes = plan.per_image_bytes,
            budget = plan.memory_budget,
            allocated = arena.allocated_bytes(),
            "image cache created"
        );

        let shared = Shared {
            decoder,
            arena,
            state: Mutex::new(TableState {
                table: ResidencyTable::new(plan.view_count, plan.slot_count),
                slots: vec![SlotState::default(); plan.slot_count],
                stats: CacheStats {
                    slot_count: plan.slot_count,
                    ..Default::default()
                },
            }),
            load_finished: Condvar::new(),
            plan,
        };

        Ok(Self {
            shared: Arc::new(shared),
            pool,
            pending: PendingJobs::new(),
        })
    }

    /// Make `id` resident, decoding it if needed
    ///
    /// Blocks while another thread decodes the same id, then returns as a
    /// hit. On a decode failure the id stays non-resident and its slot is
    /// freed; nothing is retried.
    pub fn ensure_loaded(&self, id: ImageId) -> Result<()> {
        self.shared.ensure_loaded(id).map(|_| ())
    }

    /// Load each id in order, stopping at the first error
    pub fn ensure_loaded_batch(&self, ids: &[ImageId]) -> Result<()> {
        for &id in ids {
            self.ensure_loaded(id)?;
        }
        Ok(())
    }

    /// Schedule a background load of `id` and return immediately
    ///
    /// The load is registered with the cache; [`ImageCache::drain`] joins it
    /// and reports its failure if it fails.
    ///
    /// # Errors
    ///
    /// Only fails if the loader pool no longer accepts work.
    pub fn ensure_loaded_async(&self, id: ImageId) -> Result<LoadHandle> {
        let shared = self.shared.clone();
        let handle = self
            .pool
            .spawn(move || shared.ensure_loaded(id).map(|_| ()))?;
        Ok(self.register(handle))
    }

    /// Schedule one background task loading `ids` in order
    pub fn ensure_loaded_batch_async<I>(&self, ids: I) -> Result<LoadHandle>
    where
        I: IntoIterator<Item = ImageId>,
    {
        let ids: Vec<ImageId> = ids.into_iter().collect();
        let shared = self.shared.clone();
        let handle = self.pool.spawn(move || {
            ids.iter()
                .try_for_each(|&id| shared.ensure_loaded(id).map(|_| ()))
        })?;
        Ok(self.register(handle))
    }

    fn register(&self, handle: JobHandle<Result<()>>) -> LoadHandle {
        // Successful loads need no further observation
        self.pending
            .prune(|outcome: &JobOutcome<Result<()>>| matches!(outcome, Ok(Ok(()))));
        self.pending.push(handle.clone());
        LoadHandle { inner: handle }
    }

    /// Block until every outstanding background load has finished
    ///
    /// Returns the failures of all loads registered since the previous
    /// drain.
    pub fn drain(&self) -> DrainReport {
        let outcomes = self.pending.drain();
        let joined = outcomes.len();
        let failures: Vec<CacheError> = outcomes
            .into_iter()
            .filter_map(|outcome| flatten_job_outcome(outcome).err())
            .collect();

        if !failures.is_empty() {
            tracing::warn!(failed = failures.len(), joined, "background loads failed");
        }
        DrainReport { joined, failures }
    }

    /// Number of background loads not yet drained
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Bilinearly sample resident image `id` at `(x, y)`
    ///
    /// Does not load anything.
    ///
    /// # Errors
    ///
    /// [`CacheError::NotResident`] if `id` is not resident (or still
    /// loading), [`CacheError::OutOfRange`] if the point lies outside the
    /// image.
    pub fn sample(&self, id: ImageId, x: f32, y: f32) -> Result<Color> {
        self.with_image(id, |image| {
            sample_bilinear(image, x, y).ok_or(CacheError::OutOfRange {
                id,
                x,
                y,
                width: image.width(),
                height: image.height(),
            })
        })?
    }

    /// Run `f` on the buffer of resident image `id`
    ///
    /// The buffer cannot be overwritten while `f` runs. `f` must not call
    /// back into the cache: a load that picks this slot as its victim would
    /// wait on the read lock held for `f` and deadlock.
    pub fn with_image<F, R>(&self, id: ImageId, f: F) -> Result<R>
    where
        F: FnOnce(&ImageBuffer) -> R,
    {
        self.shared.check_id(id)?;

        let state = self.shared.lock();
        let slot = state
            .readable_slot(id)
            .ok_or(CacheError::NotResident { id })?;
        // A slot that is not loading has no writer, so this never blocks
        let buffer = self.shared.arena.read(slot);
        drop(state);

        Ok(f(&buffer))
    }

    /// Load `id` and pin it until the returned lease is dropped
    ///
    /// # Errors
    ///
    /// Fails like [`ImageCache::ensure_loaded`], or with
    /// [`CacheError::AllSlotsPinned`] when every slot is already leased.
    pub fn lease(&self, id: ImageId) -> Result<ImageLease<'_, D>> {
        loop {
            let slot = self.shared.ensure_loaded(id)?;

            let mut state = self.shared.lock();
            // The image may have been evicted between the load and the pin
            if state.readable_slot(id) == Some(slot) {
                state.slots[slot].pins += 1;
                return Ok(ImageLease::new(&self.shared, id, slot));
            }
        }
    }

    /// True if `id` is resident and readable
    pub fn is_resident(&self, id: ImageId) -> bool {
        self.shared.lock().readable_slot(id).is_some()
    }

    /// Slot currently bound to `id`, including a slot still being filled
    pub fn slot_of(&self, id: ImageId) -> Option<SlotIndex> {
        self.shared.lock().table.lookup(id)
    }

    /// Ids currently resident, in slot order
    pub fn resident_ids(&self) -> Vec<ImageId> {
        let state = self.shared.lock();
        state
            .table
            .resident_ids()
            .into_iter()
            .filter(|&id| state.readable_slot(id).is_some())
            .collect()
    }

    /// Actual `(width, height)` of resident image `id`
    pub fn image_dimensions(&self, id: ImageId) -> Option<(u32, u32)> {
        self.with_image(id, |image| (image.width(), image.height()))
            .ok()
    }

    /// Verify the residency table's mutual-inverse invariant
    pub fn check_invariants(&self) -> std::result::Result<(), String> {
        let state = self.shared.lock();
        state.table.check_invariants()?;
        if state.table.resident_count() > state.slots.len() {
            return Err("more resident ids than slots".to_string());
        }
        Ok(())
    }

    /// Get current cache statistics
    pub fn stats(&self) -> CacheStats {
        let queued_loads = self.pool.queue_stats().queue_size;
        let loads_in_flight = self.pending.in_flight();

        let state = self.shared.lock();
        CacheStats {
            resident: state.table.resident_count(),
            queued_loads,
            loads_in_flight,
            ..state.stats
        }
    }

    /// Bytes held by the slot buffers
    pub fn allocated_bytes(&self) -> usize {
        self.shared.arena.allocated_bytes()
    }

    /// The sizing the cache was built with
    pub fn plan(&self) -> SlotPlan {
        self.shared.plan
    }

    /// Number of slots
    pub fn slot_count(&self) -> usize {
        self.shared.plan.slot_count
    }

    /// Number of views (valid ids are `0..view_count`)
    pub fn view_count(&self) -> usize {
        self.shared.plan.view_count
    }

    /// The decoder used for misses
    pub fn decoder(&self) -> &D {
        &self.shared.decoder
    }
}

impl<D: ImageDecoder> Drop for ImageCache<D> {
    fn drop(&mut self) {
        let unobserved = self.pending.len();
        if unobserved > 0 {
            tracing::warn!(
                unobserved,
                "image cache dropped without draining background loads"
            );
        }
    }
}

// Lease support: pin bookkeeping stays private to this module.
impl<D: ImageDecoder> Shared<D> {
    pub(crate) fn read_slot(&self, slot: SlotIndex) -> parking_lot::RwLockReadGuard<'_, ImageBuffer> {
        self.arena.read(slot)
    }

    pub(crate) fn unpin(&self, slot: SlotIndex) {
        let mut state = self.lock();
        state.slots[slot].pins = state.slots[slot].pins.saturating_sub(1);
        drop(state);

        self.load_finished.notify_all();
    }
}
