//! 8-bit RGBA colors
//!
//! Pipelines store colors as four bytes so equality is exact and the
//! journal can copy a color straight into its vertex data.

use bytemuck::{Pod, Zeroable};

/// RGBA color with one byte per component
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Pod, Zeroable)]
pub struct Color {
    pub red: u8,
    pub green: u8,
    pub blue: u8,
    pub alpha: u8,
}

impl Color {
    pub const WHITE: Color = Color::from_4ub(0xff, 0xff, 0xff, 0xff);
    pub const BLACK: Color = Color::from_4ub(0, 0, 0, 0xff);
    pub const RED: Color = Color::from_4ub(0xff, 0, 0, 0xff);
    pub const GREEN: Color = Color::from_4ub(0, 0xff, 0, 0xff);
    pub const BLUE: Color = Color::from_4ub(0, 0, 0xff, 0xff);
    pub const TRANSPARENT: Color = Color::from_4ub(0, 0, 0, 0);

    pub const fn from_4ub(red: u8, green: u8, blue: u8, alpha: u8) -> Self {
        Self {
            red,
            green,
            blue,
            alpha,
        }
    }

    /// Build from floats in `[0, 1]`; values outside the range are clamped
    pub fn from_4f(red: f32, green: f32, blue: f32, alpha: f32) -> Self {
        Self::from_4ub(
            float_to_byte(red),
            float_to_byte(green),
            float_to_byte(blue),
            float_to_byte(alpha),
        )
    }

    /// `0xRRGGBB`, fully opaque
    pub const fn from_hex(hex: u32) -> Self {
        Self::from_4ub(
            ((hex >> 16) & 0xff) as u8,
            ((hex >> 8) & 0xff) as u8,
            (hex & 0xff) as u8,
            0xff,
        )
    }

    pub const fn with_alpha(mut self, alpha: u8) -> Self {
        self.alpha = alpha;
        self
    }

    pub const fn is_opaque(&self) -> bool {
        self.alpha == 0xff
    }

    /// Multiply the color components by alpha
    pub fn premultiplied(self) -> Self {
        let a = self.alpha as u32;
        let mul = |c: u8| ((c as u32 * a + 127) / 255) as u8;
        Self::from_4ub(mul(self.red), mul(self.green), mul(self.blue), self.alpha)
    }

    pub const fn to_bytes(self) -> [u8; 4] {
        [self.red, self.green, self.blue, self.alpha]
    }

    pub fn to_array(&self) -> [f32; 4] {
        [
            self.red as f32 / 255.0,
            self.green as f32 / 255.0,
            self.blue as f32 / 255.0,
            self.alpha as f32 / 255.0,
        ]
    }
}

impl Default for Color {
    fn default() -> Self {
        Self::WHITE
    }
}

fn float_to_byte(v: f32) -> u8 {
    (v.clamp(0.0, 1.0) * 255.0).round() as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_float_conversion_rounds() {
        let c = Color::from_4f(1.0, 0.5, 0.0, 2.0);
        assert_eq!(c.to_bytes(), [255, 128, 0, 255]);
    }

    #[test]
    fn test_premultiply() {
        let c = Color::from_4ub(255, 128, 0, 128).premultiplied();
        assert_eq!(c.to_bytes(), [128, 64, 0, 128]);
        assert_eq!(Color::WHITE.premultiplied(), Color::WHITE);
    }

    #[test]
    fn test_from_hex() {
        assert_eq!(Color::from_hex(0x336699).to_bytes(), [0x33, 0x66, 0x99, 0xff]);
        assert!(!Color::from_hex(0).with_alpha(3).is_opaque());
    }
}
