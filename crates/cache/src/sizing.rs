//! Slot pool sizing from a memory budget
//!
//! The cache holds a fixed number of slots, each able to store the largest
//! image of the view set. The slot count is derived once, at construction,
//! from the memory budget and the per-image footprint:
//!
//! ```text
//! slots = min(views, max(floor(budget / per_image_bytes), min_slots))
//! ```
//!
//! `min_slots` lets small budgets still keep a useful working set, and the
//! cap at the view count avoids allocating slots that could never be used.

use crate::config::CacheConfig;
use crate::error::{CacheError, Result};
use crate::Color;

/// Dimensions of the view set the cache serves
///
/// This is what the cache needs to know about the cameras: how many views
/// exist and the largest declared image size. Per-view dimensions are
/// reported by the decoder when an image is loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewSet {
    /// Total number of views (image ids are `0..view_count`)
    pub view_count: usize,
    /// Largest image width across all views
    pub max_width: u32,
    /// Largest image height across all views
    pub max_height: u32,
}

impl ViewSet {
    /// Create a view set description
    pub fn new(view_count: usize, max_width: u32, max_height: u32) -> Self {
        Self {
            view_count,
            max_width,
            max_height,
        }
    }

    /// Build a view set from per-view `(width, height)` pairs
    ///
    /// The maximum width and height are taken independently, so the slot
    /// capacity fits every view even when portrait and landscape images mix.
    pub fn from_dimensions<I>(dimensions: I) -> Self
    where
        I: IntoIterator<Item = (u32, u32)>,
    {
        let mut view_count = 0;
        let mut max_width = 0;
        let mut max_height = 0;
        for (width, height) in dimensions {
            view_count += 1;
            max_width = max_width.max(width);
            max_height = max_height.max(height);
        }
        Self::new(view_count, max_width, max_height)
    }

    /// Pixels in one slot buffer
    pub fn pixels_per_image(&self) -> usize {
        self.max_width as usize * self.max_height as usize
    }

    /// Bytes in one slot buffer
    pub fn per_image_bytes(&self) -> usize {
        self.pixels_per_image() * std::mem::size_of::<Color>()
    }
}

/// Result of sizing the slot pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotPlan {
    /// Total number of views
    pub view_count: usize,
    /// Bytes reserved per slot
    pub per_image_bytes: usize,
    /// Configured memory budget in bytes
    pub memory_budget: usize,
    /// Configured slot floor
    pub min_slots: usize,
    /// Number of slots to allocate
    pub slot_count: usize,
}

impl SlotPlan {
    /// Compute the slot count for a view set and configuration
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::CapacityMisconfiguration`] when the budget is
    /// zero, the view set is empty, images have zero area, or the resulting
    /// slot count is below one.
    ///
    /// # Example
    ///
    /// ```
    /// use mvs_image_cache::{CacheConfig, SlotPlan, ViewSet};
    ///
    /// // 100 views of 1000x1000 RGB f32 pixels, 12 MB per image
    /// let views = ViewSet::new(100, 1000, 1000);
    /// let config = CacheConfig::default().with_budget_bytes(120_000_000);
    ///
    /// let plan = SlotPlan::compute(&views, &config).unwrap();
    /// assert_eq!(plan.slot_count, 10);
    /// ```
    pub fn compute(views: &ViewSet, config: &CacheConfig) -> Result<Self> {
        if config.memory_budget == 0 {
            return Err(CacheError::CapacityMisconfiguration(
                "memory budget must be greater than zero".to_string(),
            ));
        }
        if views.view_count == 0 {
            return Err(CacheError::CapacityMisconfiguration(
                "view set is empty".to_string(),
            ));
        }

        let per_image_bytes = views.per_image_bytes();
        if per_image_bytes == 0 {
            return Err(CacheError::CapacityMisconfiguration(format!(
                "maximum image size {}x{} has zero area",
                views.max_width, views.max_height
            )));
        }

        let by_budget = config.memory_budget / per_image_bytes;
        let slot_count = by_budget.max(config.min_slots).min(views.view_count);
        if slot_count == 0 {
            return Err(CacheError::CapacityMisconfiguration(format!(
                "budget of {} bytes cannot hold one image of {} bytes",
                config.memory_budget, per_image_bytes
            )));
        }

        Ok(Self {
            view_count: views.view_count,
            per_image_bytes,
            memory_budget: config.memory_budget,
            min_slots: config.min_slots,
            slot_count,
        })
    }

    /// Bytes actually reserved by the slot pool
    pub fn reserved_bytes(&self) -> usize {
        self.slot_count * self.per_image_bytes
    }

    /// Reserved bytes as a fraction of the budget
    ///
    /// Can exceed 1.0 when the slot floor forces more slots than the budget
    /// allows.
    pub fn budget_utilization(&self) -> f64 {
        if self.memory_budget == 0 {
            0.0
        } else {
            self.reserved_bytes() as f64 / self.memory_budget as f64
        }
    }

    /// True when every view fits in memory at once (no eviction ever needed)
    pub fn covers_all_views(&self) -> bool {
        self.slot_count >= self.view_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MB: usize = 1024 * 1024;

    fn budget(bytes: usize) -> CacheConfig {
        CacheConfig::default().with_budget_bytes(bytes)
    }

    #[test]
    fn test_per_image_bytes() {
        let views = ViewSet::new(10, 640, 480);
        assert_eq!(views.pixels_per_image(), 640 * 480);
        assert_eq!(views.per_image_bytes(), 640 * 480 * 12);
    }

    #[test]
    fn test_from_dimensions_takes_independent_maxima() {
        let views = ViewSet::from_dimensions([(4000, 3000), (3000, 4000), (100, 100)]);
        assert_eq!(views, ViewSet::new(3, 4000, 4000));
    }

    #[test]
    fn test_slot_count_from_budget() {
        let views = ViewSet::new(1000, 1024, 1024); // 12 MB per image
        let plan = SlotPlan::compute(&views, &budget(120 * MB)).unwrap();
        assert_eq!(plan.slot_count, 10);
        assert_eq!(plan.reserved_bytes(), 120 * MB);
        assert!((plan.budget_utilization() - 1.0).abs() < f64::EPSILON);
        assert!(!plan.covers_all_views());
    }

    #[test]
    fn test_slot_count_rounds_down() {
        let views = ViewSet::new(1000, 1024, 1024);
        let plan = SlotPlan::compute(&views, &budget(12 * MB * 7 + 1)).unwrap();
        assert_eq!(plan.slot_count, 7);
    }

    #[test]
    fn test_min_slots_floor() {
        let views = ViewSet::new(1000, 1024, 1024);
        let plan = SlotPlan::compute(&views, &budget(MB)).unwrap();
        assert_eq!(plan.slot_count, 5);
        assert!(plan.budget_utilization() > 1.0);
    }

    #[test]
    fn test_capped_at_view_count() {
        let views = ViewSet::new(3, 64, 64);
        let plan = SlotPlan::compute(&views, &budget(1024 * MB)).unwrap();
        assert_eq!(plan.slot_count, 3);
        assert!(plan.covers_all_views());

        // The floor is capped too
        let plan = SlotPlan::compute(&views, &budget(1)).unwrap();
        assert_eq!(plan.slot_count, 3);
    }

    #[test]
    fn test_zero_budget_is_rejected() {
        let views = ViewSet::new(10, 64, 64);
        let result = SlotPlan::compute(&views, &budget(0));
        assert!(matches!(result, Err(CacheError::CapacityMisconfiguration(_))));
    }

    #[test]
    fn test_empty_view_set_is_rejected() {
        let views = ViewSet::new(0, 64, 64);
        let result = SlotPlan::compute(&views, &budget(MB));
        assert!(matches!(result, Err(CacheError::CapacityMisconfiguration(_))));
    }

    #[test]
    fn test_zero_area_is_rejected() {
        let views = ViewSet::new(10, 0, 64);
        let result = SlotPlan::compute(&views, &budget(MB));
        assert!(matches!(result, Err(CacheError::CapacityMisconfiguration(_))));
    }

    #[test]
    fn test_no_slot_without_floor() {
        let views = ViewSet::new(10, 1024, 1024);
        let config = budget(MB).with_min_slots(0);
        let result = SlotPlan::compute(&views, &config);
        assert!(matches!(result, Err(CacheError::CapacityMisconfiguration(_))));
    }
}
