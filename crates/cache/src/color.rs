//! RGB pixel type stored in slot buffers.

use std::ops::{Add, Mul, Sub};

/// A floating-point RGB pixel
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
}

impl Color {
    /// Black
    pub const BLACK: Color = Color::new(0.0, 0.0, 0.0);

    /// Create a color from its channels
    pub const fn new(r: f32, g: f32, b: f32) -> Self {
        Self { r, g, b }
    }

    /// Create a gray color with all channels set to `value`
    pub const fn gray(value: f32) -> Self {
        Self::new(value, value, value)
    }

    /// Linear interpolation: `self + (other - self) * t`
    ///
    /// Returns `self` exactly when `t == 0`.
    pub fn lerp(self, other: Color, t: f32) -> Color {
        self + (other - self) * t
    }

    /// Channels as an array
    pub fn to_array(self) -> [f32; 3] {
        [self.r, self.g, self.b]
    }
}

impl From<[f32; 3]> for Color {
    fn from([r, g, b]: [f32; 3]) -> Self {
        Self::new(r, g, b)
    }
}

impl Add for Color {
    type Output = Color;

    fn add(self, rhs: Color) -> Color {
        Color::new(self.r + rhs.r, self.g + rhs.g, self.b + rhs.b)
    }
}

impl Sub for Color {
    type Output = Color;

    fn sub(self, rhs: Color) -> Color {
        Color::new(self.r - rhs.r, self.g - rhs.g, self.b - rhs.b)
    }
}

impl Mul<f32> for Color {
    type Output = Color;

    fn mul(self, rhs: f32) -> Color {
        Color::new(self.r * rhs, self.g * rhs, self.b * rhs)
    }
}
