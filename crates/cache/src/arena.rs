//! Fixed pool of reusable image buffers
//!
//! Every slot owns one [`ImageBuffer`] sized for the largest image of the
//! view set. Buffers are allocated once when the arena is created and are
//! overwritten in place on every load; they are never resized or freed
//! individually.

use crate::error::DecodeError;
use crate::Color;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Slot index in `[0, slot_count)`
pub type SlotIndex = usize;

/// A fixed-capacity pixel buffer
///
/// The buffer records the dimensions of the image it currently holds, which
/// may be smaller than its capacity. Rows are stored contiguously with a
/// stride equal to the current width.
#[derive(Debug)]
pub struct ImageBuffer {
    pixels: Vec<Color>,
    width: u32,
    height: u32,
    max_width: u32,
    max_height: u32,
}

impl ImageBuffer {
    /// Allocate an empty buffer able to hold `max_width x max_height` pixels
    pub fn with_capacity(max_width: u32, max_height: u32) -> Self {
        let capacity = max_width as usize * max_height as usize;
        Self {
            pixels: vec![Color::BLACK; capacity],
            width: 0,
            height: 0,
            max_width,
            max_height,
        }
    }

    /// Set the image dimensions and return the pixel storage to fill
    ///
    /// The returned slice has exactly `width * height` pixels in row-major
    /// order. No allocation takes place.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::Dimensions`] when either dimension exceeds the
    /// buffer's maximum.
    pub fn prepare(&mut self, width: u32, height: u32) -> Result<&mut [Color], DecodeError> {
        if width > self.max_width || height > self.max_height {
            return Err(DecodeError::Dimensions {
                width,
                height,
                max_width: self.max_width,
                max_height: self.max_height,
            });
        }

        self.width = width;
        self.height = height;
        let len = self.len();
        Ok(&mut self.pixels[..len])
    }

    /// Forget the current image
    pub fn clear(&mut self) {
        self.width = 0;
        self.height = 0;
    }

    /// Width of the image currently held
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Height of the image currently held
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Maximum width the buffer can hold
    pub fn max_width(&self) -> u32 {
        self.max_width
    }

    /// Maximum height the buffer can hold
    pub fn max_height(&self) -> u32 {
        self.max_height
    }

    /// Number of pixels of the current image
    pub fn len(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// True when the buffer holds no image
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total pixel capacity
    pub fn capacity(&self) -> usize {
        self.pixels.len()
    }

    /// Pixels of the current image in row-major order
    pub fn pixels(&self) -> &[Color] {
        &self.pixels[..self.len()]
    }

    /// Pixel at `(x, y)`, or `None` outside the current image
    pub fn get(&self, x: u32, y: u32) -> Option<Color> {
        if x < self.width && y < self.height {
            Some(self.at(x, y))
        } else {
            None
        }
    }

    /// Pixel at `(x, y)`; the caller guarantees the coordinate is in bounds
    pub(crate) fn at(&self, x: u32, y: u32) -> Color {
        debug_assert!(x < self.width && y < self.height);
        self.pixels[y as usize * self.width as usize + x as usize]
    }
}

/// Pool of slot buffers, each behind its own read/write lock
///
/// The arena does not decide which slot holds which image; that is the
/// residency table's job. It only hands out guarded access to a slot's
/// buffer.
pub struct SlotArena {
    slots: Vec<RwLock<ImageBuffer>>,
}

impl SlotArena {
    /// Allocate `slot_count` buffers up front
    pub fn allocate(slot_count: usize, max_width: u32, max_height: u32) -> Self {
        let slots = (0..slot_count)
            .map(|_| RwLock::new(ImageBuffer::with_capacity(max_width, max_height)))
            .collect();
        Self { slots }
    }

    /// Number of slots
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// True when the arena has no slots
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Shared access to a slot's buffer
    pub fn read(&self, slot: SlotIndex) -> RwLockReadGuard<'_, ImageBuffer> {
        self.slots[slot].read()
    }

    /// Exclusive access to a slot's buffer for overwriting
    pub fn write(&self, slot: SlotIndex) -> RwLockWriteGuard<'_, ImageBuffer> {
        self.slots[slot].write()
    }

    /// Bytes held by all slot buffers
    pub fn allocated_bytes(&self) -> usize {
        self.slots
            .iter()
            .map(|slot| slot.read().capacity() * std::mem::size_of::<Color>())
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_capacity_is_fixed() {
        let mut buffer = ImageBuffer::with_capacity(8, 4);
        assert_eq!(buffer.capacity(), 32);
        assert!(buffer.is_empty());

        buffer.prepare(4, 2).unwrap();
        assert_eq!(buffer.len(), 8);
        assert_eq!(buffer.capacity(), 32);

        buffer.prepare(8, 4).unwrap();
        assert_eq!(buffer.capacity(), 32);
    }

    #[test]
    fn test_prepare_rejects_oversized_images() {
        let mut buffer = ImageBuffer::with_capacity(8, 4);
        let err = buffer.prepare(9, 1).unwrap_err();
        assert!(matches!(
            err,
            DecodeError::Dimensions { width: 9, height: 1, max_width: 8, max_height: 4 }
        ));

        // A transposed image does not fit either
        assert!(buffer.prepare(4, 8).is_err());
    }

    #[test]
    fn test_row_major_layout() {
        let mut buffer = ImageBuffer::with_capacity(4, 4);
        let pixels = buffer.prepare(3, 2).unwrap();
        for (i, pixel) in pixels.iter_mut().enumerate() {
            *pixel = Color::gray(i as f32);
        }

        assert_eq!(buffer.get(0, 0), Some(Color::gray(0.0)));
        assert_eq!(buffer.get(2, 0), Some(Color::gray(2.0)));
        assert_eq!(buffer.get(0, 1), Some(Color::gray(3.0)));
        assert_eq!(buffer.get(2, 1), Some(Color::gray(5.0)));
        assert_eq!(buffer.get(3, 0), None);
        assert_eq!(buffer.get(0, 2), None);
        assert_eq!(buffer.pixels().len(), 6);
    }

    #[test]
    fn test_clear() {
        let mut buffer = ImageBuffer::with_capacity(4, 4);
        buffer.prepare(4, 4).unwrap();
        buffer.clear();
        assert!(buffer.is_empty());
        assert_eq!(buffer.get(0, 0), None);
    }

    #[test]
    fn test_arena_allocation() {
        let arena = SlotArena::allocate(3, 16, 8);
        assert_eq!(arena.len(), 3);
        assert_eq!(arena.allocated_bytes(), 3 * 16 * 8 * std::mem::size_of::<Color>());

        {
            let mut slot = arena.write(1);
            slot.prepare(2, 2).unwrap()[3] = Color::gray(1.0);
        }
        assert_eq!(arena.read(1).get(1, 1), Some(Color::gray(1.0)));
        assert!(arena.read(0).is_empty());
    }
}
