//! Pixel format conversion tests
//!
//! Exercises whole rows through the public packing API, including the
//! 16-bit intermediate path.

use cogl_core::{pack_row, unpack_row, PixelFormat};

/// Every 5-bit value survives unpacking to 8 bits and packing back
#[test]
fn test_rgb565_full_range_is_stable() {
    for r in 0u16..32 {
        let pixel = (r << 11) | (63 << 5) | (31 - r);
        let src = pixel.to_ne_bytes();
        let mut rgba = [0u8; 4];
        unpack_row(PixelFormat::Rgb565, &src, &mut rgba, 1).unwrap();
        let mut out = [0u8; 2];
        pack_row(PixelFormat::Rgb565, &rgba, &mut out, 1).unwrap();
        assert_eq!(u16::from_ne_bytes(out), pixel, "red = {r}");
    }
}

/// 10-bit channels keep their precision through a 16-bit intermediate
#[test]
fn test_2101010_through_u16() {
    let pixel: u32 = (2 << 30) | (1023 << 20) | (512 << 10) | 1;
    let src = pixel.to_ne_bytes();
    let mut rgba = [0u16; 4];
    unpack_row(PixelFormat::Argb2101010, &src, &mut rgba, 1).unwrap();
    assert_eq!(rgba[0], 65535);
    assert_eq!(rgba[3], 43690);

    let mut out = [0u8; 4];
    pack_row(PixelFormat::Argb2101010, &rgba, &mut out, 1).unwrap();
    assert_eq!(u32::from_ne_bytes(out), pixel);
}

/// Alpha-only rows pack from the alpha channel and unpack to black
#[test]
fn test_alpha_only_row() {
    let src = [0u8, 128, 255];
    let mut rgba = [1u8; 12];
    unpack_row(PixelFormat::A8, &src, &mut rgba, 3).unwrap();
    assert_eq!(&rgba[4..8], &[0, 0, 0, 128]);

    let mut out = [0u8; 3];
    pack_row(PixelFormat::A8, &rgba, &mut out, 3).unwrap();
    assert_eq!(out, src);
}

/// Format metadata used by texture alpha checks
#[test]
fn test_format_metadata() {
    assert!(PixelFormat::Rgba8888Pre.has_alpha());
    assert!(PixelFormat::Rgba8888Pre.is_premultiplied());
    assert!(!PixelFormat::Rgb888.has_alpha());
    assert_eq!(PixelFormat::Bgr888.bytes_per_pixel(), 3);
    assert_eq!(
        PixelFormat::Abgr2101010Pre.unpremultiplied(),
        PixelFormat::Abgr2101010
    );
}
