//! Layers: per texture unit state
//!
//! Layers form their own copy-on-write tree with the same authority
//! scheme as pipelines. A pipeline's layers are found by walking its
//! `LAYERS` authority and that node's ancestors, taking the first layer
//! seen for each texture unit below the authority's layer count.
//!
//! A layer owned by a pipeline, or one with children, is never changed in
//! place: the owner gets a derived copy to change instead. Layers are
//! addressed by their user facing `index`; the texture `unit` is the
//! layer's position after sorting by index.

use super::{diverging_ancestry, PipelineId, PipelineState, PipelineStore};
use crate::texture::{gl_name_of, same_texture, Texture, TextureTarget};
use bitflags::bitflags;
use cogl_core::Matrix;
use slotmap::new_key_type;
use smallvec::{smallvec, SmallVec};

new_key_type! {
    /// Handle to a layer node
    pub struct LayerId;
}

bitflags! {
    /// Layer state groups
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct LayerState: u32 {
        const UNIT = 1 << 0;
        const TEXTURE_TARGET = 1 << 1;
        const TEXTURE_DATA = 1 << 2;
        const FILTERS = 1 << 3;
        const WRAP_MODES = 1 << 4;
        const COMBINE = 1 << 5;
        const COMBINE_CONSTANT = 1 << 6;
        const USER_MATRIX = 1 << 7;
        const POINT_SPRITE_COORDS = 1 << 8;

        const ALL_SPARSE = Self::UNIT.bits()
            | Self::TEXTURE_TARGET.bits()
            | Self::TEXTURE_DATA.bits()
            | Self::FILTERS.bits()
            | Self::WRAP_MODES.bits()
            | Self::COMBINE.bits()
            | Self::COMBINE_CONSTANT.bits()
            | Self::USER_MATRIX.bits()
            | Self::POINT_SPRITE_COORDS.bits();

        const NEEDS_BIG_STATE = Self::COMBINE.bits()
            | Self::COMBINE_CONSTANT.bits()
            | Self::USER_MATRIX.bits()
            | Self::POINT_SPRITE_COORDS.bits();

        const MULTI_PROPERTY = Self::FILTERS.bits()
            | Self::WRAP_MODES.bits()
            | Self::COMBINE.bits();
    }
}

/// Texture sampling filter
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Filter {
    Nearest,
    #[default]
    Linear,
    NearestMipmapNearest,
    LinearMipmapNearest,
    NearestMipmapLinear,
    LinearMipmapLinear,
}

/// How texture coordinates outside `[0, 1]` are treated
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum WrapMode {
    Repeat,
    MirroredRepeat,
    ClampToEdge,
    /// Clamp unless the drawing primitive asks for repeating
    #[default]
    Automatic,
}

impl WrapMode {
    /// Mode the sampler ends up with when nothing overrides `Automatic`
    fn sampler_mode(self) -> WrapMode {
        match self {
            WrapMode::Automatic => WrapMode::ClampToEdge,
            other => other,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CombineFunc {
    Replace,
    Modulate,
    Add,
    AddSigned,
    Interpolate,
    Subtract,
    Dot3Rgb,
    Dot3Rgba,
}

impl CombineFunc {
    /// Number of sources the function reads
    pub fn n_args(self) -> usize {
        match self {
            CombineFunc::Replace => 1,
            CombineFunc::Interpolate => 3,
            _ => 2,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CombineSource {
    Texture,
    Constant,
    PrimaryColor,
    Previous,
    /// Texture of another layer, by unit
    Layer(u32),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CombineOp {
    SrcColor,
    OneMinusSrcColor,
    SrcAlpha,
    OneMinusSrcAlpha,
}

/// One texture combine function with its source arguments
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CombineFunction {
    pub func: CombineFunc,
    pub sources: [CombineSource; 3],
    pub ops: [CombineOp; 3],
}

impl CombineFunction {
    /// Same function and same arguments among those the function reads
    pub fn equivalent(&self, other: &CombineFunction) -> bool {
        let n = self.func.n_args();
        self.func == other.func && self.sources[..n] == other.sources[..n] && self.ops[..n] == other.ops[..n]
    }
}

/// Texture combine state for the color and alpha channels
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CombineState {
    pub rgb: CombineFunction,
    pub alpha: CombineFunction,
}

impl CombineState {
    /// Previous stage modulated by the texture
    pub const DEFAULT: CombineState = CombineState {
        rgb: CombineFunction {
            func: CombineFunc::Modulate,
            sources: [CombineSource::Previous, CombineSource::Texture, CombineSource::Texture],
            ops: [CombineOp::SrcColor, CombineOp::SrcColor, CombineOp::SrcColor],
        },
        alpha: CombineFunction {
            func: CombineFunc::Modulate,
            sources: [CombineSource::Previous, CombineSource::Texture, CombineSource::Texture],
            ops: [CombineOp::SrcAlpha, CombineOp::SrcAlpha, CombineOp::SrcAlpha],
        },
    };

    pub fn equivalent(&self, other: &CombineState) -> bool {
        self.rgb.equivalent(&other.rgb) && self.alpha.equivalent(&other.alpha)
    }

    /// Whether the alpha result is just previous alpha times texture alpha
    fn is_default_alpha(&self) -> bool {
        self.alpha.equivalent(&Self::DEFAULT.alpha)
    }
}

impl Default for CombineState {
    fn default() -> Self {
        Self::DEFAULT
    }
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct LayerBigState {
    combine: CombineState,
    combine_constant: [f32; 4],
    matrix: Matrix,
    point_sprite_coords: bool,
}

impl LayerBigState {
    const DEFAULT: LayerBigState = LayerBigState {
        combine: CombineState::DEFAULT,
        combine_constant: [0.0; 4],
        matrix: Matrix::IDENTITY,
        point_sprite_coords: false,
    };
}

static DEFAULT_LAYER_BIG_STATE: LayerBigState = LayerBigState::DEFAULT;

#[derive(Debug)]
pub(crate) struct LayerNode {
    parent: Option<LayerId>,
    children: SmallVec<[LayerId; 2]>,
    ref_count: u32,
    pub(super) owner: Option<PipelineId>,
    /// User facing layer number, copied to every derived layer
    index: i32,
    differences: LayerState,

    unit_index: usize,
    texture_target: TextureTarget,
    texture: Option<Texture>,
    min_filter: Filter,
    mag_filter: Filter,
    wrap_mode_s: WrapMode,
    wrap_mode_t: WrapMode,
    wrap_mode_p: WrapMode,
    big_state: Option<Box<LayerBigState>>,
}

impl LayerNode {
    fn empty(index: i32) -> Self {
        Self {
            parent: None,
            children: SmallVec::new(),
            ref_count: 1,
            owner: None,
            index,
            differences: LayerState::empty(),
            unit_index: 0,
            texture_target: TextureTarget::TwoD,
            texture: None,
            min_filter: Filter::Linear,
            mag_filter: Filter::Linear,
            wrap_mode_s: WrapMode::Automatic,
            wrap_mode_t: WrapMode::Automatic,
            wrap_mode_p: WrapMode::Automatic,
            big_state: None,
        }
    }

    /// Authority for every layer state group
    pub(super) fn root() -> Self {
        Self {
            differences: LayerState::ALL_SPARSE,
            big_state: Some(Box::new(LayerBigState::DEFAULT)),
            ..Self::empty(0)
        }
    }

    fn big(&self) -> &LayerBigState {
        self.big_state.as_deref().unwrap_or(&DEFAULT_LAYER_BIG_STATE)
    }

    fn big_mut(&mut self) -> &mut LayerBigState {
        self.big_state
            .get_or_insert_with(|| Box::new(LayerBigState::DEFAULT))
    }
}

fn each_layer_group(state: LayerState) -> impl Iterator<Item = LayerState> {
    let bits = state.bits();
    (0..u32::BITS)
        .map(|i| 1u32 << i)
        .filter(move |bit| bits & bit != 0)
        .map(LayerState::from_bits_retain)
}

impl PipelineStore {
    // --- layer graph ---

    pub(super) fn layer_copy(&mut self, src: LayerId) -> LayerId {
        let index = self.layers[src].index;
        let id = self.layers.insert(LayerNode::empty(index));
        self.layer_set_parent(id, src);
        // The fresh node was created with the caller's reference only
        id
    }

    fn retain_layer(&mut self, layer: LayerId) {
        if let Some(node) = self.layers.get_mut(layer) {
            node.ref_count += 1;
        }
    }

    pub(super) fn release_layer(&mut self, layer: LayerId) {
        let Some(node) = self.layers.get_mut(layer) else {
            tracing::warn!("release of freed layer {:?}", layer);
            return;
        };
        debug_assert!(node.ref_count > 0);
        node.ref_count = node.ref_count.saturating_sub(1);
        if node.ref_count == 0 {
            self.layer_unparent(layer);
            self.layers.remove(layer);
        }
    }

    fn layer_set_parent(&mut self, layer: LayerId, parent: LayerId) {
        self.retain_layer(parent);
        self.layer_unparent(layer);
        self.layers[layer].parent = Some(parent);
        self.layers[parent].children.push(layer);
    }

    fn layer_unparent(&mut self, layer: LayerId) {
        let Some(parent) = self.layers[layer].parent.take() else {
            return;
        };
        if let Some(p) = self.layers.get_mut(parent) {
            p.children.retain(|c| *c != layer);
        }
        self.release_layer(parent);
    }

    fn layer_authority(&self, layer: LayerId, state: LayerState) -> LayerId {
        debug_assert_eq!(state.bits().count_ones(), 1);
        let mut current = layer;
        loop {
            let node = &self.layers[current];
            if node.differences.intersects(state) {
                return current;
            }
            match node.parent {
                Some(parent) => current = parent,
                None => return current,
            }
        }
    }

    fn layer_prune_redundant_ancestry(&mut self, layer: LayerId) {
        let differences = self.layers[layer].differences;
        let Some(mut new_parent) = self.layers[layer].parent else {
            return;
        };
        while let Some(grandparent) = self.layers[new_parent].parent {
            if (self.layers[new_parent].differences | differences) != differences {
                break;
            }
            new_parent = grandparent;
        }
        if Some(new_parent) != self.layers[layer].parent {
            self.layer_set_parent(layer, new_parent);
        }
    }

    /// Make `layer` writable for `change` on behalf of `owner`. Returns the
    /// layer to write to, which is a new layer owned by `owner` when
    /// `layer` has dependants.
    fn layer_pre_change(&mut self, owner: Option<PipelineId>, layer: LayerId, change: LayerState) -> LayerId {
        let mut layer = layer;
        let node = &self.layers[layer];

        if !(node.children.is_empty() && node.owner.is_none()) {
            let Some(owner) = owner else {
                debug_assert!(false, "only new layers may be changed without an owner");
                return layer;
            };

            // Changing a layer changes its owner too
            self.pre_change_notify(owner, PipelineState::LAYERS, true);

            let node = &self.layers[layer];
            if !node.children.is_empty() || node.owner != Some(owner) {
                let new = self.layer_copy(layer);
                if self.layers[layer].owner == Some(owner) {
                    self.remove_layer_difference(owner, layer, false);
                }
                self.add_layer_difference(owner, new, false);
                self.release_layer(new);
                layer = new;
            }
        }

        if let Some(owner) = owner {
            self.pipelines[owner].age += 1;
        }

        if change.intersects(LayerState::NEEDS_BIG_STATE) {
            self.layers[layer].big_mut();
        }

        if LayerState::ALL_SPARSE.contains(change) && !self.layers[layer].differences.contains(change) {
            self.layer_init_multi_property_state(layer, change);
            self.layers[layer].differences.insert(change);
        }
        layer
    }

    fn layer_init_multi_property_state(&mut self, layer: LayerId, change: LayerState) {
        if !LayerState::MULTI_PROPERTY.intersects(change) {
            return;
        }
        let authority = self.layer_authority(layer, change);
        let src = &self.layers[authority];
        let (min, mag) = (src.min_filter, src.mag_filter);
        let wraps = (src.wrap_mode_s, src.wrap_mode_t, src.wrap_mode_p);
        let combine = src.big().combine;

        let dest = &mut self.layers[layer];
        if change == LayerState::FILTERS {
            dest.min_filter = min;
            dest.mag_filter = mag;
        } else if change == LayerState::WRAP_MODES {
            (dest.wrap_mode_s, dest.wrap_mode_t, dest.wrap_mode_p) = wraps;
        } else if change == LayerState::COMBINE {
            dest.big_mut().combine = combine;
        }
    }

    /// Single-group layer setter. Returns the layer that now holds the value.
    fn update_layer_state(
        &mut self,
        owner: Option<PipelineId>,
        layer: LayerId,
        change: LayerState,
        matches: impl Fn(&LayerNode) -> bool,
        apply: impl FnOnce(&mut LayerNode),
    ) -> LayerId {
        let authority = self.layer_authority(layer, change);
        if matches(&self.layers[authority]) {
            return layer;
        }

        let new = self.layer_pre_change(owner, layer, change);
        if new == layer && layer == authority {
            if let Some(parent) = self.layers[layer].parent {
                let old_authority = self.layer_authority(parent, change);
                if matches(&self.layers[old_authority]) {
                    self.layers[layer].differences.remove(change);
                    return layer;
                }
            }
        }

        apply(&mut self.layers[new]);

        if new != authority {
            self.layers[new].differences.insert(change);
            self.layer_prune_redundant_ancestry(new);
        }
        new
    }

    /// Change the unit of a layer that has no owner and no children
    pub(super) fn layer_set_unit_in_place(&mut self, layer: LayerId, unit: usize) {
        self.update_layer_state(None, layer, LayerState::UNIT, |n| n.unit_index == unit, |n| {
            n.unit_index = unit
        });
    }

    fn set_layer_unit(&mut self, owner: PipelineId, layer: LayerId, unit: usize) -> LayerId {
        self.update_layer_state(Some(owner), layer, LayerState::UNIT, |n| n.unit_index == unit, |n| {
            n.unit_index = unit
        })
    }

    fn layer_unit(&self, layer: LayerId) -> usize {
        self.layers[self.layer_authority(layer, LayerState::UNIT)].unit_index
    }

    pub(super) fn add_layer_difference(&mut self, p: PipelineId, layer: LayerId, inc_n_layers: bool) {
        debug_assert!(self.layers[layer].owner.is_none());
        self.layers[layer].owner = Some(p);
        self.retain_layer(layer);

        self.pre_change_notify(p, PipelineState::LAYERS, !inc_n_layers);

        let node = &mut self.pipelines[p];
        node.differences.insert(PipelineState::LAYERS);
        node.layer_differences.push(layer);
        if inc_n_layers {
            node.n_layers += 1;
        }
    }

    fn remove_layer_difference(&mut self, p: PipelineId, layer: LayerId, dec_n_layers: bool) {
        debug_assert_eq!(self.layers[layer].owner, Some(p));

        self.pre_change_notify(p, PipelineState::LAYERS, !dec_n_layers);

        self.layers[layer].owner = None;
        let node = &mut self.pipelines[p];
        node.layer_differences.retain(|l| *l != layer);
        node.differences.insert(PipelineState::LAYERS);
        if dec_n_layers {
            node.n_layers = node.n_layers.saturating_sub(1);
        }
        self.release_layer(layer);
    }

    /// Give the layers group back to the parent's authority if `p` no
    /// longer owns layers and agrees on the layer count
    fn try_reverting_layers_authority(&mut self, p: PipelineId) {
        let node = &self.pipelines[p];
        if !node.layer_differences.is_empty() {
            return;
        }
        let Some(parent) = node.parent else {
            return;
        };
        let old_authority = self.authority(parent, PipelineState::LAYERS);
        if self.pipelines[old_authority].n_layers == self.pipelines[p].n_layers {
            self.pipelines[p].differences.remove(PipelineState::LAYERS);
        }
    }

    /// Layers of `p` in unit order
    pub(crate) fn layers_of(&self, p: PipelineId) -> SmallVec<[LayerId; 4]> {
        let authority = self.authority(p, PipelineState::LAYERS);
        let n_layers = self.pipelines[authority].n_layers;
        let mut found: SmallVec<[Option<LayerId>; 4]> = smallvec![None; n_layers];
        let mut remaining = n_layers;

        let mut current = Some(authority);
        while let Some(id) = current {
            if remaining == 0 {
                break;
            }
            let node = &self.pipelines[id];
            if node.differences.contains(PipelineState::LAYERS) {
                for &layer in &node.layer_differences {
                    let unit = self.layer_unit(layer);
                    if unit < n_layers && found[unit].is_none() {
                        found[unit] = Some(layer);
                        remaining -= 1;
                    }
                }
            }
            current = node.parent;
        }

        debug_assert_eq!(remaining, 0, "every unit below n_layers has a layer");
        found.into_iter().flatten().collect()
    }

    fn find_layer(&self, p: PipelineId, index: i32) -> Option<LayerId> {
        self.layers_of(p)
            .into_iter()
            .find(|layer| self.layers[*layer].index == index)
    }

    /// The layer with `index`, creating it (and shifting later layers up a
    /// unit) if `p` doesn't have one yet
    fn get_layer(&mut self, p: PipelineId, index: i32) -> LayerId {
        let authority = self.authority(p, PipelineState::LAYERS);
        let mut insert_after: Option<usize> = None;
        let mut to_shift: SmallVec<[LayerId; 4]> = SmallVec::new();
        for layer in self.layers_of(authority) {
            let layer_index = self.layers[layer].index;
            if layer_index == index {
                return layer;
            } else if layer_index < index {
                insert_after = Some(self.layer_unit(layer));
            } else {
                to_shift.push(layer);
            }
        }

        let unit = insert_after.map_or(0, |u| u + 1);
        let layer = if unit == 0 {
            self.layer_copy(self.default_layer_0)
        } else {
            let layer = self.layer_copy(self.default_layer_n);
            self.layer_set_unit_in_place(layer, unit);
            layer
        };
        self.layers[layer].index = index;

        for shift in to_shift {
            let unit = self.layer_unit(shift);
            // May derive a new layer owned by `p`
            self.set_layer_unit(p, shift, unit + 1);
        }

        self.add_layer_difference(p, layer, true);
        self.release_layer(layer);
        layer
    }

    /// Create or find layer `index` and set one of its state groups
    fn update_layer(
        &mut self,
        p: PipelineId,
        index: i32,
        change: LayerState,
        matches: impl Fn(&LayerNode) -> bool,
        apply: impl FnOnce(&mut LayerNode),
    ) {
        if !self.check_live(p, "layer setter") {
            return;
        }
        let layer = self.get_layer(p, index);
        self.update_layer_state(Some(p), layer, change, matches, apply);
        self.handle_automatic_blend_enable(p, PipelineState::LAYERS);
    }

    // --- public layer API ---

    pub fn layer_count(&self, p: PipelineId) -> usize {
        self.pipelines[self.authority(p, PipelineState::LAYERS)].n_layers
    }

    /// User facing indices of the layers of `p`, in unit order
    pub fn layer_indices(&self, p: PipelineId) -> Vec<i32> {
        self.layers_of(p)
            .into_iter()
            .map(|layer| self.layers[layer].index)
            .collect()
    }

    /// Call `f` with each layer index in unit order until it returns false
    pub fn foreach_layer(&self, p: PipelineId, mut f: impl FnMut(i32) -> bool) {
        for layer in self.layers_of(p) {
            if !f(self.layers[layer].index) {
                break;
            }
        }
    }

    /// Add an empty layer with `index` if it doesn't exist
    pub fn ensure_layer(&mut self, p: PipelineId, index: i32) {
        if self.check_live(p, "ensure_layer") {
            self.get_layer(p, index);
            self.handle_automatic_blend_enable(p, PipelineState::LAYERS);
        }
    }

    pub fn layer_texture(&self, p: PipelineId, index: i32) -> Option<Texture> {
        let layer = self.find_layer(p, index)?;
        self.layers[self.layer_authority(layer, LayerState::TEXTURE_DATA)]
            .texture
            .clone()
    }

    pub fn layer_texture_target(&self, p: PipelineId, index: i32) -> Option<TextureTarget> {
        let layer = self.find_layer(p, index)?;
        Some(self.layers[self.layer_authority(layer, LayerState::TEXTURE_TARGET)].texture_target)
    }

    /// Set the texture of layer `index`; `None` leaves the layer untextured
    pub fn set_layer_texture(&mut self, p: PipelineId, index: i32, texture: Option<Texture>) {
        let target = texture.as_ref().map_or(TextureTarget::TwoD, Texture::target);
        self.update_layer(
            p,
            index,
            LayerState::TEXTURE_TARGET,
            |n| n.texture_target == target,
            |n| n.texture_target = target,
        );
        self.set_layer_texture_data(p, index, texture);
    }

    /// Replace only the texture data, keeping the target
    pub(crate) fn set_layer_texture_data(&mut self, p: PipelineId, index: i32, texture: Option<Texture>) {
        let matching = texture.clone();
        self.update_layer(
            p,
            index,
            LayerState::TEXTURE_DATA,
            move |n| same_texture(n.texture.as_ref(), matching.as_ref()),
            |n| n.texture = texture,
        );
    }

    pub fn layer_filters(&self, p: PipelineId, index: i32) -> Option<(Filter, Filter)> {
        let layer = self.find_layer(p, index)?;
        let node = &self.layers[self.layer_authority(layer, LayerState::FILTERS)];
        Some((node.min_filter, node.mag_filter))
    }

    pub fn set_layer_filters(&mut self, p: PipelineId, index: i32, min_filter: Filter, mag_filter: Filter) {
        if matches!(
            mag_filter,
            Filter::NearestMipmapNearest
                | Filter::LinearMipmapNearest
                | Filter::NearestMipmapLinear
                | Filter::LinearMipmapLinear
        ) {
            tracing::warn!("Mipmap filter {:?} is not valid as a magnification filter", mag_filter);
            return;
        }
        self.update_layer(
            p,
            index,
            LayerState::FILTERS,
            |n| n.min_filter == min_filter && n.mag_filter == mag_filter,
            |n| {
                n.min_filter = min_filter;
                n.mag_filter = mag_filter;
            },
        );
    }

    /// Wrap modes for the s, t and p axes
    pub fn layer_wrap_modes(&self, p: PipelineId, index: i32) -> Option<[WrapMode; 3]> {
        let layer = self.find_layer(p, index)?;
        let node = &self.layers[self.layer_authority(layer, LayerState::WRAP_MODES)];
        Some([node.wrap_mode_s, node.wrap_mode_t, node.wrap_mode_p])
    }

    pub fn set_layer_wrap_modes(&mut self, p: PipelineId, index: i32, s: WrapMode, t: WrapMode, r: WrapMode) {
        self.update_layer(
            p,
            index,
            LayerState::WRAP_MODES,
            |n| n.wrap_mode_s == s && n.wrap_mode_t == t && n.wrap_mode_p == r,
            |n| {
                n.wrap_mode_s = s;
                n.wrap_mode_t = t;
                n.wrap_mode_p = r;
            },
        );
    }

    pub fn set_layer_wrap_mode(&mut self, p: PipelineId, index: i32, mode: WrapMode) {
        self.set_layer_wrap_modes(p, index, mode, mode, mode);
    }

    pub fn set_layer_wrap_mode_s(&mut self, p: PipelineId, index: i32, mode: WrapMode) {
        self.update_layer(p, index, LayerState::WRAP_MODES, |n| n.wrap_mode_s == mode, |n| {
            n.wrap_mode_s = mode
        });
    }

    pub fn set_layer_wrap_mode_t(&mut self, p: PipelineId, index: i32, mode: WrapMode) {
        self.update_layer(p, index, LayerState::WRAP_MODES, |n| n.wrap_mode_t == mode, |n| {
            n.wrap_mode_t = mode
        });
    }

    pub fn set_layer_wrap_mode_p(&mut self, p: PipelineId, index: i32, mode: WrapMode) {
        self.update_layer(p, index, LayerState::WRAP_MODES, |n| n.wrap_mode_p == mode, |n| {
            n.wrap_mode_p = mode
        });
    }

    pub fn layer_combine(&self, p: PipelineId, index: i32) -> Option<CombineState> {
        let layer = self.find_layer(p, index)?;
        Some(self.layers[self.layer_authority(layer, LayerState::COMBINE)].big().combine)
    }

    pub fn set_layer_combine(&mut self, p: PipelineId, index: i32, combine: CombineState) {
        self.update_layer(
            p,
            index,
            LayerState::COMBINE,
            |n| n.big().combine.equivalent(&combine),
            |n| n.big_mut().combine = combine,
        );
    }

    pub fn layer_combine_constant(&self, p: PipelineId, index: i32) -> Option<[f32; 4]> {
        let layer = self.find_layer(p, index)?;
        Some(
            self.layers[self.layer_authority(layer, LayerState::COMBINE_CONSTANT)]
                .big()
                .combine_constant,
        )
    }

    pub fn set_layer_combine_constant(&mut self, p: PipelineId, index: i32, constant: [f32; 4]) {
        self.update_layer(
            p,
            index,
            LayerState::COMBINE_CONSTANT,
            |n| n.big().combine_constant == constant,
            |n| n.big_mut().combine_constant = constant,
        );
    }

    pub fn layer_matrix(&self, p: PipelineId, index: i32) -> Option<Matrix> {
        let layer = self.find_layer(p, index)?;
        Some(self.layers[self.layer_authority(layer, LayerState::USER_MATRIX)].big().matrix)
    }

    pub fn set_layer_matrix(&mut self, p: PipelineId, index: i32, matrix: &Matrix) {
        let matrix = *matrix;
        self.update_layer(
            p,
            index,
            LayerState::USER_MATRIX,
            |n| n.big().matrix == matrix,
            |n| n.big_mut().matrix = matrix,
        );
    }

    pub fn layer_point_sprite_coords(&self, p: PipelineId, index: i32) -> Option<bool> {
        let layer = self.find_layer(p, index)?;
        Some(
            self.layers[self.layer_authority(layer, LayerState::POINT_SPRITE_COORDS)]
                .big()
                .point_sprite_coords,
        )
    }

    pub fn set_layer_point_sprite_coords(&mut self, p: PipelineId, index: i32, enable: bool) {
        self.update_layer(
            p,
            index,
            LayerState::POINT_SPRITE_COORDS,
            |n| n.big().point_sprite_coords == enable,
            |n| n.big_mut().point_sprite_coords = enable,
        );
    }

    /// Whether any layer of `p` has a user texture matrix
    pub(crate) fn has_layer_user_matrix(&self, p: PipelineId) -> bool {
        self.layers_of(p).into_iter().any(|layer| {
            let authority = self.layer_authority(layer, LayerState::USER_MATRIX);
            !self.layers[authority].big().matrix.is_identity()
        })
    }

    /// Remove layer `index`, moving later layers down a unit
    pub fn remove_layer(&mut self, p: PipelineId, index: i32) {
        if !self.check_live(p, "remove_layer") {
            return;
        }
        let authority = self.authority(p, PipelineState::LAYERS);
        let mut removed = None;
        let mut to_shift: SmallVec<[LayerId; 4]> = SmallVec::new();
        for layer in self.layers_of(authority) {
            let layer_index = self.layers[layer].index;
            if layer_index == index {
                removed = Some(layer);
            } else if layer_index > index {
                to_shift.push(layer);
            }
        }
        let Some(removed) = removed else {
            return;
        };

        for shift in to_shift {
            let unit = self.layer_unit(shift);
            self.set_layer_unit(p, shift, unit.saturating_sub(1));
        }

        if self.layers[removed].owner == Some(p) {
            self.remove_layer_difference(p, removed, true);
        } else {
            // Owned by an ancestor: hide it behind the shifted layers and
            // the reduced count
            self.pre_change_notify(p, PipelineState::LAYERS, false);
            let node = &mut self.pipelines[p];
            node.n_layers = node.n_layers.saturating_sub(1);
        }
        self.try_reverting_layers_authority(p);
        self.handle_automatic_blend_enable(p, PipelineState::LAYERS);
    }

    /// Keep only the first `n` layers (in unit order)
    pub fn prune_to_n_layers(&mut self, p: PipelineId, n: usize) {
        if !self.check_live(p, "prune_to_n_layers") {
            return;
        }
        let layers = self.layers_of(p);
        if layers.len() <= n {
            return;
        }
        let first_index_to_prune = self.layers[layers[n]].index;

        self.pre_change_notify(p, PipelineState::LAYERS, false);
        self.pipelines[p].n_layers = n;

        let owned = self.pipelines[p].layer_differences.clone();
        for layer in owned {
            if self.layers[layer].index >= first_index_to_prune {
                self.remove_layer_difference(p, layer, false);
            }
        }
        self.handle_automatic_blend_enable(p, PipelineState::LAYERS);
    }

    // --- comparison ---

    fn layer_compare_differences(&self, l0: LayerId, l1: LayerId) -> LayerState {
        let (below0, below1) = diverging_ancestry(l0, l1, |l| self.layers[l].parent);
        below0
            .iter()
            .chain(below1.iter())
            .fold(LayerState::empty(), |acc, l| acc | self.layers[*l].differences)
    }

    pub(crate) fn layer_equal(&self, l0: LayerId, l1: LayerId, differences: LayerState) -> bool {
        if l0 == l1 {
            return true;
        }
        let to_check = self.layer_compare_differences(l0, l1) & differences & !LayerState::UNIT;
        each_layer_group(to_check).all(|change| {
            let a0 = &self.layers[self.layer_authority(l0, change)];
            let a1 = &self.layers[self.layer_authority(l1, change)];
            if change == LayerState::TEXTURE_TARGET {
                a0.texture_target == a1.texture_target
            } else if change == LayerState::TEXTURE_DATA {
                // Atlas regions share a texture name and may batch together
                gl_name_of(a0.texture.as_ref()) == gl_name_of(a1.texture.as_ref())
            } else if change == LayerState::COMBINE {
                a0.big().combine.equivalent(&a1.big().combine)
            } else if change == LayerState::COMBINE_CONSTANT {
                a0.big().combine_constant == a1.big().combine_constant
            } else if change == LayerState::FILTERS {
                a0.min_filter == a1.min_filter && a0.mag_filter == a1.mag_filter
            } else if change == LayerState::WRAP_MODES {
                a0.wrap_mode_s.sampler_mode() == a1.wrap_mode_s.sampler_mode()
                    && a0.wrap_mode_t.sampler_mode() == a1.wrap_mode_t.sampler_mode()
                    && a0.wrap_mode_p.sampler_mode() == a1.wrap_mode_p.sampler_mode()
            } else if change == LayerState::USER_MATRIX {
                a0.big().matrix == a1.big().matrix
            } else if change == LayerState::POINT_SPRITE_COORDS {
                a0.big().point_sprite_coords == a1.big().point_sprite_coords
            } else {
                true
            }
        })
    }

    /// Same layer count and pairwise equal layers
    pub(super) fn layers_equal(&self, p0: PipelineId, p1: PipelineId, differences: LayerState) -> bool {
        let layers0 = self.layers_of(p0);
        let layers1 = self.layers_of(p1);
        layers0.len() == layers1.len()
            && layers0
                .iter()
                .zip(layers1.iter())
                .all(|(l0, l1)| self.layer_equal(*l0, *l1, differences))
    }

    /// Conservative: true unless the layer provably keeps alpha at 1
    pub(super) fn layer_may_have_alpha(&self, layer: LayerId) -> bool {
        let combine = self.layers[self.layer_authority(layer, LayerState::COMBINE)]
            .big()
            .combine;
        if !combine.is_default_alpha() {
            return true;
        }
        self.layers[self.layer_authority(layer, LayerState::TEXTURE_DATA)]
            .texture
            .as_ref()
            .is_some_and(Texture::has_alpha)
    }

    /// Unit index of each layer, for validation and flushing
    pub(crate) fn layer_units(&self, p: PipelineId) -> SmallVec<[(i32, usize); 4]> {
        self.layers_of(p)
            .into_iter()
            .map(|layer| (self.layers[layer].index, self.layer_unit(layer)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cogl_core::{Color, PixelFormat};

    #[test]
    fn test_layers_sorted_by_index() {
        let mut store = PipelineStore::new();
        let p = store.new_pipeline();
        store.ensure_layer(p, 5);
        store.ensure_layer(p, 1);
        store.ensure_layer(p, 3);
        assert_eq!(store.layer_count(p), 3);
        assert_eq!(store.layer_indices(p), vec![1, 3, 5]);
        let units: Vec<usize> = store.layer_units(p).iter().map(|(_, u)| *u).collect();
        assert_eq!(units, vec![0, 1, 2]);
    }

    #[test]
    fn test_remove_layer_shifts_units() {
        let mut store = PipelineStore::new();
        let p = store.new_pipeline();
        for i in 0..3 {
            store.ensure_layer(p, i);
        }
        store.remove_layer(p, 1);
        assert_eq!(store.layer_indices(p), vec![0, 2]);
        assert_eq!(store.layer_units(p).as_slice(), &[(0, 0), (2, 1)]);
        store.remove_layer(p, 7);
        assert_eq!(store.layer_count(p), 2);
    }

    #[test]
    fn test_child_layer_changes_leave_parent_alone() {
        let mut store = PipelineStore::new();
        let tex_a = Texture::new_2d(4, 4, PixelFormat::Rgb888);
        let tex_b = Texture::new_2d(4, 4, PixelFormat::Rgb888);
        let parent = store.new_pipeline();
        store.set_layer_texture(parent, 0, Some(tex_a.clone()));
        let child = store.copy(parent);

        store.set_layer_texture(child, 0, Some(tex_b.clone()));
        assert!(store.layer_texture(child, 0).unwrap().ptr_eq(&tex_b));
        assert!(store.layer_texture(parent, 0).unwrap().ptr_eq(&tex_a));
        assert_eq!(store.layer_count(child), 1);
    }

    #[test]
    fn test_prune_to_n_layers() {
        let mut store = PipelineStore::new();
        let p = store.new_pipeline();
        for i in [0, 2, 4, 6] {
            store.ensure_layer(p, i);
        }
        let child = store.copy(p);
        store.prune_to_n_layers(child, 2);
        assert_eq!(store.layer_indices(child), vec![0, 2]);
        assert_eq!(store.layer_indices(p), vec![0, 2, 4, 6]);

        store.prune_to_n_layers(p, 1);
        assert_eq!(store.layer_indices(p), vec![0]);
    }

    #[test]
    fn test_texture_alpha_enables_blending() {
        let mut store = PipelineStore::new();
        let p = store.new_pipeline();
        store.set_layer_texture(p, 0, Some(Texture::new_2d(2, 2, PixelFormat::Rgb888)));
        assert!(!store.real_blend_enable(p));
        store.set_layer_texture(p, 0, Some(Texture::new_2d(2, 2, PixelFormat::Rgba8888Pre)));
        assert!(store.real_blend_enable(p));
        store.remove_layer(p, 0);
        assert!(!store.real_blend_enable(p));
    }

    #[test]
    fn test_layer_equality() {
        let mut store = PipelineStore::new();
        let atlas = Texture::new_2d(64, 64, PixelFormat::Rgb888);
        let a = store.new_pipeline();
        let b = store.new_pipeline();
        store.set_layer_texture(a, 0, Some(Texture::new_atlas_region(&atlas, 0, 0, 8, 8)));
        store.set_layer_texture(b, 0, Some(Texture::new_atlas_region(&atlas, 8, 0, 8, 8)));
        let all = PipelineState::ALL_SPARSE;
        assert!(store.equal(a, b, all, LayerState::ALL_SPARSE));

        store.set_layer_filters(b, 0, Filter::Nearest, Filter::Nearest);
        assert!(!store.equal(a, b, all, LayerState::ALL_SPARSE));
        assert!(store.equal(a, b, all, LayerState::ALL_SPARSE - LayerState::FILTERS));

        store.set_layer_filters(b, 0, Filter::Linear, Filter::Linear);
        store.set_layer_wrap_mode(a, 0, WrapMode::ClampToEdge);
        assert!(store.equal(a, b, all, LayerState::ALL_SPARSE));
    }

    #[test]
    fn test_combine_state_and_matrix() {
        let mut store = PipelineStore::new();
        let p = store.new_pipeline();
        let mut combine = CombineState::DEFAULT;
        combine.alpha.func = CombineFunc::Replace;
        combine.alpha.sources[0] = CombineSource::Texture;
        store.set_layer_combine(p, 0, combine);
        assert!(store.real_blend_enable(p));
        assert_eq!(store.layer_combine(p, 0).unwrap().alpha.func, CombineFunc::Replace);

        assert!(!store.has_layer_user_matrix(p));
        store.set_layer_matrix(p, 0, &Matrix::scaling(2.0, 2.0, 1.0));
        assert!(store.has_layer_user_matrix(p));
        store.set_color(p, Color::RED);
        assert_eq!(store.layer_count(p), 1);
    }

    #[test]
    fn test_layer_nodes_freed_with_pipeline() {
        let mut store = PipelineStore::new();
        let base = store.layer_node_count();
        let p = store.new_pipeline();
        store.ensure_layer(p, 0);
        store.ensure_layer(p, 1);
        let child = store.copy(p);
        store.set_layer_filters(child, 1, Filter::Nearest, Filter::Linear);
        store.release(child);
        store.release(p);
        assert_eq!(store.layer_node_count(), base);
    }
}
