//! Pixel formats and row packing
//!
//! Rows are converted to and from an intermediate RGBA representation
//! whose component type is either `u8` or `u16`. The conversion helpers
//! are generic over that component width; rounding is round-to-nearest
//! and must stay bit-exact since textures are compared against it.

use crate::error::{CoreError, Result};

/// Layout of pixel data in memory
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    A8,
    G8,
    Rg88,
    Rgb888,
    Bgr888,
    Rgba8888,
    Bgra8888,
    Argb8888,
    Abgr8888,
    Rgb565,
    Rgba4444,
    Rgba5551,
    Rgba1010102,
    Bgra1010102,
    Argb2101010,
    Abgr2101010,
    Rgba8888Pre,
    Bgra8888Pre,
    Argb8888Pre,
    Abgr8888Pre,
    Rgba4444Pre,
    Rgba5551Pre,
    Rgba1010102Pre,
    Bgra1010102Pre,
    Argb2101010Pre,
    Abgr2101010Pre,
    Depth16,
    Depth32,
    Depth24Stencil8,
    Any,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        use PixelFormat::*;
        match self {
            A8 | G8 => 1,
            Rg88 | Rgb565 | Rgba4444 | Rgba5551 | Rgba4444Pre | Rgba5551Pre | Depth16 => 2,
            Rgb888 | Bgr888 => 3,
            Any => 0,
            _ => 4,
        }
    }

    pub fn has_alpha(self) -> bool {
        use PixelFormat::*;
        !matches!(
            self,
            G8 | Rg88 | Rgb888 | Bgr888 | Rgb565 | Depth16 | Depth32 | Depth24Stencil8 | Any
        )
    }

    pub fn is_premultiplied(self) -> bool {
        use PixelFormat::*;
        matches!(
            self,
            Rgba8888Pre
                | Bgra8888Pre
                | Argb8888Pre
                | Abgr8888Pre
                | Rgba4444Pre
                | Rgba5551Pre
                | Rgba1010102Pre
                | Bgra1010102Pre
                | Argb2101010Pre
                | Abgr2101010Pre
        )
    }

    /// The same layout without the premultiplied flag
    pub fn unpremultiplied(self) -> Self {
        use PixelFormat::*;
        match self {
            Rgba8888Pre => Rgba8888,
            Bgra8888Pre => Bgra8888,
            Argb8888Pre => Argb8888,
            Abgr8888Pre => Abgr8888,
            Rgba4444Pre => Rgba4444,
            Rgba5551Pre => Rgba5551,
            Rgba1010102Pre => Rgba1010102,
            Bgra1010102Pre => Bgra1010102,
            Argb2101010Pre => Argb2101010,
            Abgr2101010Pre => Abgr2101010,
            other => other,
        }
    }

    fn check_packable(self) -> Result<()> {
        use PixelFormat::*;
        match self {
            Depth16 | Depth32 | Depth24Stencil8 | Any => {
                Err(CoreError::UnpackableFormat(format!("{:?}", self)))
            }
            _ => Ok(()),
        }
    }
}

/// An intermediate RGBA component type
pub trait Component: Copy + Default {
    /// Largest value of the component
    const MAX: u32;

    fn from_u32(v: u32) -> Self;
    fn to_u32(self) -> u32;

    /// Widen an 8-bit channel into this component width
    fn unpack_byte(b: u8) -> Self;
    /// Narrow this component into an 8-bit channel
    fn pack_byte(self) -> u8;
}

impl Component for u8 {
    const MAX: u32 = 0xff;

    fn from_u32(v: u32) -> Self {
        v as u8
    }
    fn to_u32(self) -> u32 {
        self as u32
    }
    fn unpack_byte(b: u8) -> Self {
        b
    }
    fn pack_byte(self) -> u8 {
        self
    }
}

impl Component for u16 {
    const MAX: u32 = 0xffff;

    fn from_u32(v: u32) -> Self {
        v as u16
    }
    fn to_u32(self) -> u32 {
        self as u32
    }
    fn unpack_byte(b: u8) -> Self {
        ((b as u32 * 65535 + 127) / 255) as u16
    }
    fn pack_byte(self) -> u8 {
        ((self as u32 * 255 + 32767) / 65535) as u8
    }
}

/// Expand an n-bit field to a full component
#[inline]
pub fn unpack_bits<C: Component>(b: u32, bits: u32) -> C {
    if bits == 1 {
        return C::from_u32(b * C::MAX);
    }
    let field_max = (1u32 << bits) - 1;
    C::from_u32((b * C::MAX + field_max / 2) / field_max)
}

/// Reduce a component to an n-bit field, rounding to nearest
#[inline]
pub fn pack_bits<C: Component>(v: C, bits: u32) -> u32 {
    let field_max = (1u32 << bits) - 1;
    (v.to_u32() * field_max + (C::MAX + 1) / 2 - 1) / C::MAX
}

fn read_u16(src: &[u8]) -> u32 {
    u16::from_ne_bytes([src[0], src[1]]) as u32
}

fn read_u32(src: &[u8]) -> u32 {
    u32::from_ne_bytes([src[0], src[1], src[2], src[3]])
}

fn check_len(needed: usize, actual: usize) -> Result<()> {
    if actual < needed {
        return Err(CoreError::RowTooShort { needed, actual });
    }
    Ok(())
}

/// Unpack `width` pixels of `format` from `src` into RGBA components
pub fn unpack_row<C: Component>(
    format: PixelFormat,
    src: &[u8],
    dst: &mut [C],
    width: usize,
) -> Result<()> {
    use PixelFormat::*;

    format.check_packable()?;
    let bpp = format.bytes_per_pixel();
    check_len(bpp * width, src.len())?;
    check_len(4 * width, dst.len())?;

    let opaque = C::unpack_byte(255);
    for (s, d) in src.chunks_exact(bpp).zip(dst.chunks_exact_mut(4)).take(width) {
        match format.unpremultiplied() {
            A8 => {
                d[0] = C::default();
                d[1] = C::default();
                d[2] = C::default();
                d[3] = C::unpack_byte(s[0]);
            }
            G8 => {
                let v = C::unpack_byte(s[0]);
                d[0] = v;
                d[1] = v;
                d[2] = v;
                d[3] = opaque;
            }
            Rg88 => {
                d[0] = C::unpack_byte(s[0]);
                d[1] = C::unpack_byte(s[1]);
                d[2] = C::default();
                d[3] = opaque;
            }
            Rgb888 => {
                d[0] = C::unpack_byte(s[0]);
                d[1] = C::unpack_byte(s[1]);
                d[2] = C::unpack_byte(s[2]);
                d[3] = opaque;
            }
            Bgr888 => {
                d[0] = C::unpack_byte(s[2]);
                d[1] = C::unpack_byte(s[1]);
                d[2] = C::unpack_byte(s[0]);
                d[3] = opaque;
            }
            Rgba8888 => {
                for i in 0..4 {
                    d[i] = C::unpack_byte(s[i]);
                }
            }
            Bgra8888 => {
                d[0] = C::unpack_byte(s[2]);
                d[1] = C::unpack_byte(s[1]);
                d[2] = C::unpack_byte(s[0]);
                d[3] = C::unpack_byte(s[3]);
            }
            Argb8888 => {
                d[0] = C::unpack_byte(s[1]);
                d[1] = C::unpack_byte(s[2]);
                d[2] = C::unpack_byte(s[3]);
                d[3] = C::unpack_byte(s[0]);
            }
            Abgr8888 => {
                d[0] = C::unpack_byte(s[3]);
                d[1] = C::unpack_byte(s[2]);
                d[2] = C::unpack_byte(s[1]);
                d[3] = C::unpack_byte(s[0]);
            }
            Rgb565 => {
                let v = read_u16(s);
                d[0] = unpack_bits(v >> 11, 5);
                d[1] = unpack_bits((v >> 5) & 63, 6);
                d[2] = unpack_bits(v & 31, 5);
                d[3] = opaque;
            }
            Rgba4444 => {
                let v = read_u16(s);
                d[0] = unpack_bits(v >> 12, 4);
                d[1] = unpack_bits((v >> 8) & 15, 4);
                d[2] = unpack_bits((v >> 4) & 15, 4);
                d[3] = unpack_bits(v & 15, 4);
            }
            Rgba5551 => {
                let v = read_u16(s);
                d[0] = unpack_bits(v >> 11, 5);
                d[1] = unpack_bits((v >> 6) & 31, 5);
                d[2] = unpack_bits((v >> 1) & 31, 5);
                d[3] = unpack_bits(v & 1, 1);
            }
            Rgba1010102 => {
                let v = read_u32(s);
                d[0] = unpack_bits(v >> 22, 10);
                d[1] = unpack_bits((v >> 12) & 1023, 10);
                d[2] = unpack_bits((v >> 2) & 1023, 10);
                d[3] = unpack_bits(v & 3, 2);
            }
            Bgra1010102 => {
                let v = read_u32(s);
                d[2] = unpack_bits(v >> 22, 10);
                d[1] = unpack_bits((v >> 12) & 1023, 10);
                d[0] = unpack_bits((v >> 2) & 1023, 10);
                d[3] = unpack_bits(v & 3, 2);
            }
            Argb2101010 => {
                let v = read_u32(s);
                d[3] = unpack_bits(v >> 30, 2);
                d[0] = unpack_bits((v >> 20) & 1023, 10);
                d[1] = unpack_bits((v >> 10) & 1023, 10);
                d[2] = unpack_bits(v & 1023, 10);
            }
            Abgr2101010 => {
                let v = read_u32(s);
                d[3] = unpack_bits(v >> 30, 2);
                d[2] = unpack_bits((v >> 20) & 1023, 10);
                d[1] = unpack_bits((v >> 10) & 1023, 10);
                d[0] = unpack_bits(v & 1023, 10);
            }
            _ => unreachable!("premultiplied and unpackable formats handled above"),
        }
    }
    Ok(())
}

/// Pack `width` RGBA pixels from `src` into `format`
pub fn pack_row<C: Component>(
    format: PixelFormat,
    src: &[C],
    dst: &mut [u8],
    width: usize,
) -> Result<()> {
    use PixelFormat::*;

    format.check_packable()?;
    let bpp = format.bytes_per_pixel();
    check_len(4 * width, src.len())?;
    check_len(bpp * width, dst.len())?;

    for (s, d) in src.chunks_exact(4).zip(dst.chunks_exact_mut(bpp)).take(width) {
        match format.unpremultiplied() {
            A8 => d[0] = s[3].pack_byte(),
            G8 => {
                let v = (s[0].to_u32() + s[1].to_u32() + s[2].to_u32()) / 3;
                d[0] = C::from_u32(v).pack_byte();
            }
            Rg88 => {
                d[0] = s[0].pack_byte();
                d[1] = s[1].pack_byte();
            }
            Rgb888 => {
                d[0] = s[0].pack_byte();
                d[1] = s[1].pack_byte();
                d[2] = s[2].pack_byte();
            }
            Bgr888 => {
                d[2] = s[0].pack_byte();
                d[1] = s[1].pack_byte();
                d[0] = s[2].pack_byte();
            }
            Rgba8888 => {
                for i in 0..4 {
                    d[i] = s[i].pack_byte();
                }
            }
            Bgra8888 => {
                d[2] = s[0].pack_byte();
                d[1] = s[1].pack_byte();
                d[0] = s[2].pack_byte();
                d[3] = s[3].pack_byte();
            }
            Argb8888 => {
                d[1] = s[0].pack_byte();
                d[2] = s[1].pack_byte();
                d[3] = s[2].pack_byte();
                d[0] = s[3].pack_byte();
            }
            Abgr8888 => {
                d[3] = s[0].pack_byte();
                d[2] = s[1].pack_byte();
                d[1] = s[2].pack_byte();
                d[0] = s[3].pack_byte();
            }
            Rgb565 => {
                let v = (pack_bits(s[0], 5) << 11) | (pack_bits(s[1], 6) << 5) | pack_bits(s[2], 5);
                d.copy_from_slice(&(v as u16).to_ne_bytes());
            }
            Rgba4444 => {
                let v = (pack_bits(s[0], 4) << 12)
                    | (pack_bits(s[1], 4) << 8)
                    | (pack_bits(s[2], 4) << 4)
                    | pack_bits(s[3], 4);
                d.copy_from_slice(&(v as u16).to_ne_bytes());
            }
            Rgba5551 => {
                let v = (pack_bits(s[0], 5) << 11)
                    | (pack_bits(s[1], 5) << 6)
                    | (pack_bits(s[2], 5) << 1)
                    | pack_bits(s[3], 1);
                d.copy_from_slice(&(v as u16).to_ne_bytes());
            }
            Rgba1010102 => {
                let v = (pack_bits(s[0], 10) << 22)
                    | (pack_bits(s[1], 10) << 12)
                    | (pack_bits(s[2], 10) << 2)
                    | pack_bits(s[3], 2);
                d.copy_from_slice(&v.to_ne_bytes());
            }
            Bgra1010102 => {
                let v = (pack_bits(s[2], 10) << 22)
                    | (pack_bits(s[1], 10) << 12)
                    | (pack_bits(s[0], 10) << 2)
                    | pack_bits(s[3], 2);
                d.copy_from_slice(&v.to_ne_bytes());
            }
            Argb2101010 => {
                let v = (pack_bits(s[3], 2) << 30)
                    | (pack_bits(s[0], 10) << 20)
                    | (pack_bits(s[1], 10) << 10)
                    | pack_bits(s[2], 10);
                d.copy_from_slice(&v.to_ne_bytes());
            }
            Abgr2101010 => {
                let v = (pack_bits(s[3], 2) << 30)
                    | (pack_bits(s[2], 10) << 20)
                    | (pack_bits(s[1], 10) << 10)
                    | pack_bits(s[0], 10);
                d.copy_from_slice(&v.to_ne_bytes());
            }
            _ => unreachable!("premultiplied and unpackable formats handled above"),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unpack_rounding_8bit() {
        assert_eq!(unpack_bits::<u8>(31, 5), 255);
        assert_eq!(unpack_bits::<u8>(1, 5), 8);
        assert_eq!(unpack_bits::<u8>(1, 6), 4);
        assert_eq!(unpack_bits::<u8>(1, 2), 85);
        assert_eq!(unpack_bits::<u8>(1, 1), 255);
        assert_eq!(unpack_bits::<u8>(512, 10), 128);
    }

    #[test]
    fn test_pack_rounding_8bit() {
        assert_eq!(pack_bits(255u8, 5), 31);
        assert_eq!(pack_bits(4u8, 5), 0);
        assert_eq!(pack_bits(5u8, 5), 1);
        assert_eq!(pack_bits(127u8, 1), 0);
        assert_eq!(pack_bits(128u8, 1), 1);
    }

    #[test]
    fn test_16bit_byte_conversion() {
        assert_eq!(u16::unpack_byte(255), 65535);
        assert_eq!(u16::unpack_byte(1), 257);
        assert_eq!(65535u16.pack_byte(), 255);
        assert_eq!(128u16.pack_byte(), 0);
        assert_eq!(unpack_bits::<u16>(31, 5), 65535);
    }

    #[test]
    fn test_rgb565_row() {
        let pixel: u16 = (31 << 11) | (0 << 5) | 16;
        let src = pixel.to_ne_bytes();
        let mut dst = [0u8; 4];
        unpack_row(PixelFormat::Rgb565, &src, &mut dst, 1).unwrap();
        assert_eq!(dst, [255, 0, 132, 255]);
    }

    #[test]
    fn test_bgra_swizzle() {
        let src = [1u8, 2, 3, 4, 5, 6, 7, 8];
        let mut dst = [0u8; 8];
        unpack_row(PixelFormat::Bgra8888Pre, &src, &mut dst, 2).unwrap();
        assert_eq!(dst, [3, 2, 1, 4, 7, 6, 5, 8]);
    }

    #[test]
    fn test_luminance_pack_averages() {
        let src = [30u8, 60, 90, 255];
        let mut dst = [0u8; 1];
        pack_row(PixelFormat::G8, &src, &mut dst, 1).unwrap();
        assert_eq!(dst, [60]);
    }

    #[test]
    fn test_unpackable_and_short_rows() {
        let mut dst = [0u8; 4];
        assert!(matches!(
            unpack_row(PixelFormat::Depth16, &[0, 0], &mut dst, 1),
            Err(CoreError::UnpackableFormat(_))
        ));
        assert_eq!(
            unpack_row(PixelFormat::Rgba8888, &[0, 0], &mut dst, 1),
            Err(CoreError::RowTooShort {
                needed: 4,
                actual: 2
            })
        );
    }
}
