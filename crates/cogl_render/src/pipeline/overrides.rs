//! Per-flush pipeline overrides
//!
//! Some draws need a variation of the source pipeline: fewer layers, a
//! fallback texture on a layer that can't be used, a different texture on
//! layer 0, or forced wrap modes. The variation is always applied to a
//! private copy of the pipeline, never to the caller's pipeline.

use super::{FogState, PipelineId, PipelineStore, WrapMode};
use crate::texture::{Texture, TextureTarget};
use cogl_core::PixelFormat;
use smallvec::SmallVec;

/// Wrap modes forced on one layer; `None` keeps the layer's own mode
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WrapModeOverride {
    pub s: Option<WrapMode>,
    pub t: Option<WrapMode>,
    pub p: Option<WrapMode>,
}

impl WrapModeOverride {
    pub fn is_empty(&self) -> bool {
        self.s.is_none() && self.t.is_none() && self.p.is_none()
    }
}

/// Changes applied to a copy of a pipeline before drawing with it
///
/// Bit `i` of `disable_layers` and `fallback_layers` refers to the layer
/// at unit `i`.
#[derive(Clone, Debug, Default)]
pub struct FlushOptions {
    /// Layers from the lowest set bit upwards are dropped
    pub disable_layers: u32,
    /// Layers whose texture is replaced by a default texture
    pub fallback_layers: u32,
    /// Texture for the first layer; all other layers are dropped
    pub layer0_override: Option<Texture>,
    /// Wrap modes by layer position
    pub wrap_mode_overrides: SmallVec<[WrapModeOverride; 4]>,
}

impl FlushOptions {
    pub fn is_empty(&self) -> bool {
        self.disable_layers == 0
            && self.fallback_layers == 0
            && self.layer0_override.is_none()
            && self.wrap_mode_overrides.iter().all(WrapModeOverride::is_empty)
    }
}

/// Opaque white textures used in place of unusable layer textures
#[derive(Clone, Debug)]
pub struct FallbackTextures {
    pub two_d: Texture,
    pub rectangle: Texture,
}

impl FallbackTextures {
    pub fn new() -> Self {
        Self {
            two_d: Texture::new_2d(1, 1, PixelFormat::Rgba8888Pre),
            rectangle: Texture::new_rectangle(1, 1, PixelFormat::Rgba8888Pre),
        }
    }
}

impl Default for FallbackTextures {
    fn default() -> Self {
        Self::new()
    }
}

/// Context wide state layered over every pipeline drawn through the
/// context
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct LegacyState {
    pub depth_test_enabled: bool,
    pub fog: FogState,
}

impl LegacyState {
    /// Whether drawing needs a modified copy of the source pipeline
    pub fn is_active(&self) -> bool {
        self.depth_test_enabled || self.fog.enabled
    }
}

impl PipelineStore {
    /// Apply `options` to `p`, which must be a pipeline private to the
    /// caller
    pub fn apply_overrides(&mut self, p: PipelineId, options: &FlushOptions, fallback: &FallbackTextures) {
        if !self.check_live(p, "apply_overrides") {
            return;
        }

        if options.disable_layers != 0 {
            let keep = options.disable_layers.trailing_zeros() as usize;
            self.prune_to_n_layers(p, keep);
        }

        if options.fallback_layers != 0 {
            let indices = self.layer_indices(p);
            for (position, index) in indices.into_iter().enumerate() {
                if position >= u32::BITS as usize {
                    break;
                }
                if options.fallback_layers & (1 << position) == 0 {
                    continue;
                }
                let texture = match self.layer_texture_target(p, index) {
                    Some(TextureTarget::Rectangle) => fallback.rectangle.clone(),
                    Some(TextureTarget::TwoD) | None => fallback.two_d.clone(),
                    Some(target) => {
                        if self.warned.first(format!("fallback-{target:?}")) {
                            tracing::warn!(
                                "We don't have a fallback texture we can use to fill in for an invalid \
                                 pipeline layer with a {:?} target, using a 2D texture",
                                target
                            );
                        }
                        fallback.two_d.clone()
                    }
                };
                self.set_layer_texture(p, index, Some(texture));
            }
        }

        if let Some(texture) = &options.layer0_override {
            self.prune_to_n_layers(p, 1);
            let index = self.layer_indices(p).first().copied().unwrap_or(0);
            self.set_layer_texture_data(p, index, Some(texture.clone()));
        }

        if !options.wrap_mode_overrides.is_empty() {
            let indices = self.layer_indices(p);
            for (index, wrap) in indices.into_iter().zip(options.wrap_mode_overrides.iter()) {
                if let Some(mode) = wrap.s {
                    self.set_layer_wrap_mode_s(p, index, mode);
                }
                if let Some(mode) = wrap.t {
                    self.set_layer_wrap_mode_t(p, index, mode);
                }
                if let Some(mode) = wrap.p {
                    self.set_layer_wrap_mode_p(p, index, mode);
                }
            }
        }
    }

    /// Layer the context's legacy depth and fog state over `p`, which must
    /// be private to the caller
    pub fn apply_legacy_state(&mut self, p: PipelineId, legacy: &LegacyState) {
        if !self.check_live(p, "apply_legacy_state") {
            return;
        }
        if legacy.depth_test_enabled {
            let mut depth = self.depth_state(p);
            depth.test_enabled = true;
            self.set_depth_state(p, depth);
        }
        if legacy.fog.enabled {
            self.set_fog_state(p, legacy.fog);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disable_mask_prunes_from_lowest_bit() {
        let mut store = PipelineStore::new();
        let p = store.new_pipeline();
        for i in 0..4 {
            store.ensure_layer(p, i);
        }
        let copy = store.copy(p);
        let options = FlushOptions {
            disable_layers: !0 << 2,
            ..Default::default()
        };
        store.apply_overrides(copy, &options, &FallbackTextures::new());
        assert_eq!(store.layer_indices(copy), vec![0, 1]);
        assert_eq!(store.layer_count(p), 4);
    }

    #[test]
    fn test_fallback_by_target() {
        let mut store = PipelineStore::new();
        let fallback = FallbackTextures::new();
        let p = store.new_pipeline();
        store.set_layer_texture(p, 0, Some(Texture::new_2d(8, 8, PixelFormat::Rgb888)));
        store.set_layer_texture(p, 3, Some(Texture::new_rectangle(8, 8, PixelFormat::Rgb888)));
        store.set_layer_texture(p, 5, Some(Texture::new_3d(8, 8, PixelFormat::Rgb888)));

        let options = FlushOptions {
            fallback_layers: 0b110,
            ..Default::default()
        };
        store.apply_overrides(p, &options, &fallback);
        assert!(!store.layer_texture(p, 0).unwrap().ptr_eq(&fallback.two_d));
        assert!(store.layer_texture(p, 3).unwrap().ptr_eq(&fallback.rectangle));
        assert!(store.layer_texture(p, 5).unwrap().ptr_eq(&fallback.two_d));
    }

    #[test]
    fn test_layer0_override_and_wraps() {
        let mut store = PipelineStore::new();
        let p = store.new_pipeline();
        store.ensure_layer(p, 2);
        store.ensure_layer(p, 4);
        let replacement = Texture::new_2d(4, 4, PixelFormat::Rgba8888);
        let mut options = FlushOptions {
            layer0_override: Some(replacement.clone()),
            ..Default::default()
        };
        options.wrap_mode_overrides.push(WrapModeOverride {
            s: Some(WrapMode::Repeat),
            t: None,
            p: None,
        });
        assert!(!options.is_empty());
        store.apply_overrides(p, &options, &FallbackTextures::new());

        assert_eq!(store.layer_indices(p), vec![2]);
        assert!(store.layer_texture(p, 2).unwrap().ptr_eq(&replacement));
        assert_eq!(
            store.layer_wrap_modes(p, 2),
            Some([WrapMode::Repeat, WrapMode::Automatic, WrapMode::Automatic])
        );
    }

    #[test]
    fn test_legacy_state() {
        let mut store = PipelineStore::new();
        let p = store.new_pipeline();
        let legacy = LegacyState::default();
        assert!(!legacy.is_active());

        let legacy = LegacyState {
            depth_test_enabled: true,
            fog: FogState {
                enabled: true,
                ..FogState::DEFAULT
            },
        };
        assert!(legacy.is_active());
        store.apply_legacy_state(p, &legacy);
        assert!(store.depth_state(p).test_enabled);
        assert!(store.fog_state(p).enabled);
    }
}
