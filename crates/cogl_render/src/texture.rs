//! Texture handles
//!
//! A texture is a cheap-to-clone handle. The engine only needs to know what
//! a texture is bound as (target and GL-style name), its size and format,
//! and whether the sampler can repeat it in hardware. Atlas regions share
//! the name of the atlas they live in, which is what lets the journal batch
//! quads drawn from different regions of one atlas.

use cogl_core::PixelFormat;
use std::rc::Rc;
use std::sync::atomic::{AtomicU32, Ordering};

static NEXT_TEXTURE_NAME: AtomicU32 = AtomicU32::new(1);

fn next_name() -> u32 {
    NEXT_TEXTURE_NAME.fetch_add(1, Ordering::Relaxed)
}

/// What a texture is bound as
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TextureTarget {
    TwoD,
    Rectangle,
    ThreeD,
}

/// How a texture's storage is laid out
#[derive(Clone, Debug, PartialEq)]
pub enum TextureKind {
    /// Single hardware texture covering the whole image
    Plain,
    /// Sub-region of a shared atlas texture
    AtlasRegion {
        x: u32,
        y: u32,
        atlas_width: u32,
        atlas_height: u32,
    },
    /// Image split over several hardware textures
    Sliced { slices_x: u32, slices_y: u32 },
}

#[derive(Debug)]
struct TextureInner {
    name: u32,
    target: TextureTarget,
    width: u32,
    height: u32,
    format: PixelFormat,
    kind: TextureKind,
}

/// Shared texture handle
#[derive(Clone, Debug)]
pub struct Texture(Rc<TextureInner>);

impl Texture {
    fn with(name: u32, target: TextureTarget, width: u32, height: u32, format: PixelFormat, kind: TextureKind) -> Self {
        Texture(Rc::new(TextureInner {
            name,
            target,
            width,
            height,
            format,
            kind,
        }))
    }

    pub fn new_2d(width: u32, height: u32, format: PixelFormat) -> Self {
        Self::with(next_name(), TextureTarget::TwoD, width, height, format, TextureKind::Plain)
    }

    pub fn new_rectangle(width: u32, height: u32, format: PixelFormat) -> Self {
        Self::with(
            next_name(),
            TextureTarget::Rectangle,
            width,
            height,
            format,
            TextureKind::Plain,
        )
    }

    pub fn new_3d(width: u32, height: u32, format: PixelFormat) -> Self {
        Self::with(next_name(), TextureTarget::ThreeD, width, height, format, TextureKind::Plain)
    }

    /// A region of `atlas`. The region is sampled through the atlas texture
    /// so it shares the atlas name and target.
    pub fn new_atlas_region(atlas: &Texture, x: u32, y: u32, width: u32, height: u32) -> Self {
        Self::with(
            atlas.0.name,
            atlas.0.target,
            width,
            height,
            atlas.0.format,
            TextureKind::AtlasRegion {
                x,
                y,
                atlas_width: atlas.0.width,
                atlas_height: atlas.0.height,
            },
        )
    }

    /// A texture too large for one hardware texture, split into slices of
    /// at most `max_slice` pixels per side
    pub fn new_sliced(width: u32, height: u32, max_slice: u32, format: PixelFormat) -> Self {
        let max_slice = max_slice.max(1);
        Self::with(
            next_name(),
            TextureTarget::TwoD,
            width,
            height,
            format,
            TextureKind::Sliced {
                slices_x: width.div_ceil(max_slice).max(1),
                slices_y: height.div_ceil(max_slice).max(1),
            },
        )
    }

    /// GL-style texture name; equal names sample the same storage
    pub fn gl_name(&self) -> u32 {
        self.0.name
    }

    pub fn target(&self) -> TextureTarget {
        self.0.target
    }

    pub fn width(&self) -> u32 {
        self.0.width
    }

    pub fn height(&self) -> u32 {
        self.0.height
    }

    pub fn format(&self) -> PixelFormat {
        self.0.format
    }

    pub fn kind(&self) -> &TextureKind {
        &self.0.kind
    }

    pub fn has_alpha(&self) -> bool {
        self.0.format.has_alpha()
    }

    /// Whether texture coordinates outside `[0, 1]` can be left to the
    /// sampler's wrap mode. Atlas regions have neighbours in the way and
    /// sliced textures have no single texture to repeat.
    pub fn can_hardware_repeat(&self) -> bool {
        matches!(self.0.kind, TextureKind::Plain)
    }

    pub fn is_sliced(&self) -> bool {
        matches!(self.0.kind, TextureKind::Sliced { .. })
    }

    pub fn ptr_eq(&self, other: &Texture) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Map coordinates normalized over this texture to the coordinates its
    /// storage is sampled with. Atlas regions map into the atlas and
    /// rectangle targets take pixel coordinates.
    pub fn transform_coords_to_gl(&self, s: f32, t: f32) -> (f32, f32) {
        let (w, h) = (self.0.width as f32, self.0.height as f32);
        match self.0.kind {
            TextureKind::AtlasRegion {
                x,
                y,
                atlas_width,
                atlas_height,
            } => {
                let (s, t) = (x as f32 + s * w, y as f32 + t * h);
                if self.0.target == TextureTarget::Rectangle {
                    (s, t)
                } else {
                    (s / atlas_width.max(1) as f32, t / atlas_height.max(1) as f32)
                }
            }
            _ if self.0.target == TextureTarget::Rectangle => (s * w, t * h),
            _ => (s, t),
        }
    }
}

/// Texture slot equality as the pipeline sees it: same handle or both empty
pub(crate) fn same_texture(a: Option<&Texture>, b: Option<&Texture>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => a.ptr_eq(b),
        (None, None) => true,
        _ => false,
    }
}

/// Name used when comparing texture data for batching; an empty slot is 0
pub(crate) fn gl_name_of(texture: Option<&Texture>) -> u32 {
    texture.map_or(0, Texture::gl_name)
}
