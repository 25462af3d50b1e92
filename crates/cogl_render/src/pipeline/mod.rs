//! Pipeline state graph
//!
//! Pipelines are nodes in a copy-on-write tree. Each node stores only the
//! state groups it overrides (its `differences`); every other group is read
//! from the nearest ancestor that does override it, the *authority* for
//! that group. Copying a pipeline allocates an empty node under the source,
//! so copies are cheap and two pipelines that share an authority for a
//! group are known to agree on it without comparing values.
//!
//! Mutating a node that has children first splices a copy of its current
//! state in between it and its children, so children never observe the
//! change. Weak children are destroyed instead of preserved and their
//! destroy callback runs.
//!
//! Nodes live in a [`PipelineStore`] arena and are addressed by
//! [`PipelineId`]. Layers, the per texture unit state, use the same scheme
//! in a second arena (see [`layer`]).
//!
//! # Example
//!
//! ```rust
//! use cogl_core::Color;
//! use cogl_render::pipeline::PipelineStore;
//!
//! let mut store = PipelineStore::new();
//! let parent = store.new_pipeline();
//! store.set_color(parent, Color::RED);
//!
//! let child = store.copy(parent);
//! store.set_color(parent, Color::BLUE);
//!
//! assert_eq!(store.color(child), Color::RED);
//! assert_eq!(store.color(parent), Color::BLUE);
//! ```

pub mod layer;
pub mod overrides;
pub mod state;

use crate::backend::Backend;
use bitflags::bitflags;
use cogl_core::Color;
use slotmap::{new_key_type, SlotMap};
use smallvec::SmallVec;

pub use layer::{
    CombineFunc, CombineFunction, CombineOp, CombineSource, CombineState, Filter, LayerState, WrapMode,
};
pub use overrides::{FallbackTextures, FlushOptions, LegacyState, WrapModeOverride};
pub use state::{
    AlphaFunc, BigState, BlendEnable, BlendEquation, BlendFactor, BlendState, ColorMask, DepthState,
    DepthTestFunction, FogMode, FogState, LightingState, ProgramLanguage, UserProgram,
};

use layer::{LayerId, LayerNode};

new_key_type! {
    /// Handle to a pipeline node
    pub struct PipelineId;
}

bitflags! {
    /// Pipeline state groups
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct PipelineState: u32 {
        const COLOR = 1 << 0;
        const BLEND_ENABLE = 1 << 1;
        const LAYERS = 1 << 2;
        const LIGHTING = 1 << 3;
        const ALPHA_FUNC = 1 << 4;
        const ALPHA_FUNC_REFERENCE = 1 << 5;
        const BLEND = 1 << 6;
        const USER_SHADER = 1 << 7;
        const DEPTH = 1 << 8;
        const FOG = 1 << 9;
        const POINT_SIZE = 1 << 10;
        const LOGIC_OPS = 1 << 11;
        /// Derived from other state, never overridden
        const REAL_BLEND_ENABLE = 1 << 12;

        const ALL_SPARSE = Self::COLOR.bits()
            | Self::BLEND_ENABLE.bits()
            | Self::LAYERS.bits()
            | Self::LIGHTING.bits()
            | Self::ALPHA_FUNC.bits()
            | Self::ALPHA_FUNC_REFERENCE.bits()
            | Self::BLEND.bits()
            | Self::USER_SHADER.bits()
            | Self::DEPTH.bits()
            | Self::FOG.bits()
            | Self::POINT_SIZE.bits()
            | Self::LOGIC_OPS.bits();

        const AFFECTS_BLENDING = Self::COLOR.bits()
            | Self::BLEND_ENABLE.bits()
            | Self::LAYERS.bits()
            | Self::LIGHTING.bits()
            | Self::BLEND.bits()
            | Self::USER_SHADER.bits();

        const NEEDS_BIG_STATE = Self::LIGHTING.bits()
            | Self::ALPHA_FUNC.bits()
            | Self::ALPHA_FUNC_REFERENCE.bits()
            | Self::BLEND.bits()
            | Self::USER_SHADER.bits()
            | Self::DEPTH.bits()
            | Self::FOG.bits()
            | Self::POINT_SIZE.bits()
            | Self::LOGIC_OPS.bits();

        /// Groups holding more than one value
        const MULTI_PROPERTY = Self::LAYERS.bits()
            | Self::LIGHTING.bits()
            | Self::BLEND.bits()
            | Self::DEPTH.bits()
            | Self::FOG.bits()
            | Self::LOGIC_OPS.bits();
    }
}

/// Called with the id of a weak pipeline just before it is destroyed
pub type DestroyCallback = Box<dyn FnOnce(PipelineId)>;

pub(crate) struct PipelineNode {
    parent: Option<PipelineId>,
    children: SmallVec<[PipelineId; 4]>,
    has_parent_reference: bool,
    is_weak: bool,
    destroy_callback: Option<DestroyCallback>,

    ref_count: u32,
    journal_ref_count: u32,

    differences: PipelineState,
    age: u64,
    real_blend_enable: bool,
    backend: Option<Backend>,

    color: Color,
    blend_enable: BlendEnable,
    n_layers: usize,
    layer_differences: SmallVec<[LayerId; 2]>,
    big_state: Option<Box<BigState>>,
}

impl PipelineNode {
    fn new(real_blend_enable: bool, backend: Option<Backend>, is_weak: bool) -> Self {
        Self {
            parent: None,
            children: SmallVec::new(),
            has_parent_reference: false,
            is_weak,
            destroy_callback: None,
            ref_count: 1,
            journal_ref_count: 0,
            differences: PipelineState::empty(),
            age: 0,
            real_blend_enable,
            backend,
            color: Color::WHITE,
            blend_enable: BlendEnable::Automatic,
            n_layers: 0,
            layer_differences: SmallVec::new(),
            big_state: None,
        }
    }

    fn big(&self) -> &BigState {
        self.big_state.as_deref().unwrap_or(&state::DEFAULT_BIG_STATE)
    }

    fn big_mut(&mut self) -> &mut BigState {
        self.big_state.get_or_insert_with(|| Box::new(BigState::DEFAULT))
    }
}

impl std::fmt::Debug for PipelineNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineNode")
            .field("parent", &self.parent)
            .field("is_weak", &self.is_weak)
            .field("ref_count", &self.ref_count)
            .field("journal_ref_count", &self.journal_ref_count)
            .field("differences", &self.differences)
            .field("age", &self.age)
            .finish_non_exhaustive()
    }
}

/// Arena owning every pipeline and layer node of a context
///
/// Pipeline handles are reference counted by hand: [`copy`](Self::copy)
/// and [`new_pipeline`](Self::new_pipeline) return a handle holding one
/// reference, [`retain`](Self::retain) adds one and
/// [`release`](Self::release) drops one. Query methods panic when given a
/// handle whose node has been freed; mutators log a warning and do nothing.
pub struct PipelineStore {
    pub(crate) pipelines: SlotMap<PipelineId, PipelineNode>,
    pub(crate) layers: SlotMap<LayerId, LayerNode>,
    root: PipelineId,
    default_layer_0: LayerId,
    default_layer_n: LayerId,
    warned: crate::error::WarnOnce,
}

impl Default for PipelineStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PipelineStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineStore")
            .field("pipelines", &self.pipelines.len())
            .field("layers", &self.layers.len())
            .finish()
    }
}

impl PipelineStore {
    pub fn new() -> Self {
        let mut pipelines = SlotMap::with_key();
        let mut root_node = PipelineNode::new(false, None, false);
        root_node.differences = PipelineState::ALL_SPARSE;
        root_node.big_state = Some(Box::new(BigState::DEFAULT));
        let root = pipelines.insert(root_node);

        let mut layers = SlotMap::with_key();
        let default_layer_0 = layers.insert(LayerNode::root());

        let mut store = Self {
            pipelines,
            layers,
            root,
            default_layer_0,
            default_layer_n: default_layer_0,
            warned: Default::default(),
        };
        store.default_layer_n = store.layer_copy(default_layer_0);
        store.layer_set_unit_in_place(store.default_layer_n, 1);
        store
    }

    /// A new pipeline with default state: opaque white, no layers,
    /// automatic blending
    pub fn new_pipeline(&mut self) -> PipelineId {
        self.copy(self.root)
    }

    /// Number of live pipeline nodes, including internal ones
    pub fn len(&self) -> usize {
        self.pipelines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pipelines.is_empty()
    }

    /// Number of live layer nodes, including the two defaults
    pub fn layer_node_count(&self) -> usize {
        self.layers.len()
    }

    pub fn is_live(&self, p: PipelineId) -> bool {
        self.pipelines.contains_key(p)
    }

    fn check_live(&self, p: PipelineId, what: &str) -> bool {
        if self.pipelines.contains_key(p) {
            return true;
        }
        tracing::warn!("{} called with a freed pipeline handle {:?}", what, p);
        false
    }

    pub fn parent(&self, p: PipelineId) -> Option<PipelineId> {
        self.pipelines[p].parent
    }

    pub fn ref_count(&self, p: PipelineId) -> u32 {
        self.pipelines.get(p).map_or(0, |node| node.ref_count)
    }

    pub fn journal_ref_count(&self, p: PipelineId) -> u32 {
        self.pipelines.get(p).map_or(0, |node| node.journal_ref_count)
    }

    /// State groups `p` itself overrides
    pub fn differences(&self, p: PipelineId) -> PipelineState {
        self.pipelines[p].differences
    }

    /// Bumped on every change to `p`
    pub fn age(&self, p: PipelineId) -> u64 {
        self.pipelines[p].age
    }

    pub fn is_weak(&self, p: PipelineId) -> bool {
        self.pipelines[p].is_weak
    }

    // --- copies and reference counting ---

    /// New pipeline deriving all of its state from `src`
    pub fn copy(&mut self, src: PipelineId) -> PipelineId {
        self.copy_internal(src, false)
    }

    /// Copy that does not keep `src` alive. When `src` (or any ancestor the
    /// copy depends on) is modified or freed, the copy is destroyed and
    /// `on_destroy` runs exactly once. Its handle is stale afterwards.
    pub fn weak_copy(&mut self, src: PipelineId, on_destroy: impl FnOnce(PipelineId) + 'static) -> PipelineId {
        let id = self.copy_internal(src, true);
        self.pipelines[id].destroy_callback = Some(Box::new(on_destroy));
        id
    }

    fn copy_internal(&mut self, src: PipelineId, is_weak: bool) -> PipelineId {
        let (real_blend_enable, backend) = {
            let node = &self.pipelines[src];
            (node.real_blend_enable, node.backend)
        };
        let id = self.pipelines.insert(PipelineNode::new(real_blend_enable, backend, is_weak));
        self.set_parent(id, src, !is_weak);
        if !is_weak {
            self.promote_weak_ancestors(id);
        }
        id
    }

    /// A strong node whose parent is weak keeps every weak ancestor's
    /// parent alive, so the chain it depends on cannot be freed under it
    fn promote_weak_ancestors(&mut self, strong: PipelineId) {
        let mut n = self.pipelines[strong].parent;
        while let Some(id) = n {
            let node = &self.pipelines[id];
            if !node.is_weak {
                break;
            }
            let grandparent = node.parent;
            if let Some(gp) = grandparent {
                self.retain(gp);
            }
            n = grandparent;
        }
    }

    fn revert_weak_ancestors(&mut self, strong: PipelineId) {
        let mut n = self.pipelines[strong].parent;
        while let Some(id) = n {
            let Some(node) = self.pipelines.get(id) else {
                break;
            };
            if !node.is_weak {
                break;
            }
            let grandparent = node.parent;
            if let Some(gp) = grandparent {
                self.release(gp);
            }
            n = grandparent;
        }
    }

    pub fn retain(&mut self, p: PipelineId) {
        match self.pipelines.get_mut(p) {
            Some(node) => node.ref_count += 1,
            None => tracing::warn!("retain of freed pipeline {:?}", p),
        }
    }

    /// Drop one reference. Returns `false` if the handle was already stale.
    pub fn release(&mut self, p: PipelineId) -> bool {
        let Some(node) = self.pipelines.get_mut(p) else {
            tracing::warn!("release of freed pipeline {:?}", p);
            return false;
        };
        debug_assert!(node.ref_count > 0);
        node.ref_count = node.ref_count.saturating_sub(1);
        if node.ref_count == 0 {
            self.free(p);
        }
        true
    }

    /// Reference held by a journal entry
    pub fn journal_ref(&mut self, p: PipelineId) {
        if let Some(node) = self.pipelines.get_mut(p) {
            node.journal_ref_count += 1;
        }
        self.retain(p);
    }

    pub fn journal_unref(&mut self, p: PipelineId) {
        if let Some(node) = self.pipelines.get_mut(p) {
            debug_assert!(node.journal_ref_count > 0);
            node.journal_ref_count = node.journal_ref_count.saturating_sub(1);
        }
        self.release(p);
    }

    fn free(&mut self, p: PipelineId) {
        if !self.pipelines[p].is_weak {
            self.revert_weak_ancestors(p);
        }
        self.destroy_weak_children(p);
        self.unparent(p);
        let layers = std::mem::take(&mut self.pipelines[p].layer_differences);
        for layer in layers {
            if let Some(node) = self.layers.get_mut(layer) {
                node.owner = None;
            }
            self.release_layer(layer);
        }
        self.pipelines.remove(p);
    }

    fn set_parent(&mut self, node: PipelineId, parent: PipelineId, take_reference: bool) {
        // Retained before unparenting in case `parent` is the current parent
        if take_reference {
            self.retain(parent);
        }
        self.unparent(node);
        let n = &mut self.pipelines[node];
        n.parent = Some(parent);
        n.has_parent_reference = take_reference;
        self.pipelines[parent].children.push(node);
    }

    fn unparent(&mut self, node: PipelineId) {
        let n = &mut self.pipelines[node];
        let Some(parent) = n.parent.take() else {
            return;
        };
        let had_reference = std::mem::take(&mut n.has_parent_reference);
        if let Some(p) = self.pipelines.get_mut(parent) {
            p.children.retain(|c| *c != node);
        }
        if had_reference {
            self.release(parent);
        }
    }

    /// Weak, and nothing strong depends on it
    fn is_effectively_weak(&self, p: PipelineId) -> bool {
        let node = &self.pipelines[p];
        node.is_weak && node.children.iter().all(|c| self.is_effectively_weak(*c))
    }

    fn destroy_weak_children(&mut self, p: PipelineId) {
        let children = self.pipelines[p].children.clone();
        for child in children {
            if !self.pipelines.contains_key(child) || !self.is_effectively_weak(child) {
                continue;
            }
            self.destroy_weak_children(child);
            if let Some(callback) = self.pipelines[child].destroy_callback.take() {
                callback(child);
            }
            self.unparent(child);
            let layers = std::mem::take(&mut self.pipelines[child].layer_differences);
            for layer in layers {
                if let Some(node) = self.layers.get_mut(layer) {
                    node.owner = None;
                }
                self.release_layer(layer);
            }
            tracing::trace!("destroyed weak pipeline {:?}", child);
            self.pipelines.remove(child);
        }
    }

    // --- authority and change notification ---

    /// Nearest ancestor (or `p` itself) that overrides `state`
    pub fn authority(&self, p: PipelineId, state: PipelineState) -> PipelineId {
        debug_assert_eq!(state.bits().count_ones(), 1, "authority of a single state group");
        debug_assert!(PipelineState::ALL_SPARSE.contains(state));
        let mut current = p;
        loop {
            let node = &self.pipelines[current];
            if node.differences.intersects(state) {
                return current;
            }
            match node.parent {
                Some(parent) => current = parent,
                None => return current,
            }
        }
    }

    /// Prepare `p` to change `change`: detach dependants and make `p` the
    /// authority for `change` if it isn't already
    pub(crate) fn pre_change_notify(&mut self, p: PipelineId, change: PipelineState, from_layer_change: bool) {
        // A fixed function choice is re-evaluated after any change
        if self.pipelines[p].backend == Some(Backend::Fixed) {
            self.pipelines[p].backend = None;
        }

        self.destroy_weak_children(p);

        if !self.pipelines[p].children.is_empty() {
            let new_authority = match self.pipelines[p].parent {
                Some(parent) => self.copy(parent),
                None => {
                    let (real_blend_enable, backend) = {
                        let node = &self.pipelines[p];
                        (node.real_blend_enable, node.backend)
                    };
                    self.pipelines
                        .insert(PipelineNode::new(real_blend_enable, backend, false))
                }
            };
            let differences = self.pipelines[p].differences;
            self.copy_differences(new_authority, p, differences);

            let children = self.pipelines[p].children.clone();
            for child in children {
                self.set_parent(child, new_authority, true);
            }
            tracing::trace!(
                "copy-on-write of pipeline {:?} into {:?} (layer change: {})",
                p,
                new_authority,
                from_layer_change
            );
            // The children keep it alive now
            self.release(new_authority);
        }

        let node = &mut self.pipelines[p];
        node.age += 1;

        if change.intersects(PipelineState::NEEDS_BIG_STATE) {
            node.big_mut();
        }

        if PipelineState::ALL_SPARSE.contains(change) && !node.differences.contains(change) {
            self.init_multi_property_state(p, change);
            self.pipelines[p].differences.insert(change);
        }
    }

    /// Seed the values of a multi-value group from the current authority
    fn init_multi_property_state(&mut self, p: PipelineId, change: PipelineState) {
        if !PipelineState::MULTI_PROPERTY.intersects(change) {
            return;
        }
        let authority = self.authority(p, change);
        if change == PipelineState::LAYERS {
            let n_layers = self.pipelines[authority].n_layers;
            let node = &mut self.pipelines[p];
            node.n_layers = n_layers;
            node.layer_differences.clear();
            return;
        }
        let src = self.pipelines[authority].big().clone();
        self.pipelines[p].big_mut().copy_from(&src, change);
    }

    /// Copy the values of `differences` from `src` into `dest` and make
    /// `dest` their authority
    pub(crate) fn copy_differences(&mut self, dest: PipelineId, src: PipelineId, differences: PipelineState) {
        if differences.contains(PipelineState::COLOR) {
            self.pipelines[dest].color = self.pipelines[src].color;
        }
        if differences.contains(PipelineState::BLEND_ENABLE) {
            self.pipelines[dest].blend_enable = self.pipelines[src].blend_enable;
        }
        if differences.contains(PipelineState::LAYERS) {
            let old = std::mem::take(&mut self.pipelines[dest].layer_differences);
            for layer in old {
                self.layers[layer].owner = None;
                self.release_layer(layer);
            }
            let src_layers = self.pipelines[src].layer_differences.clone();
            for layer in src_layers {
                // A layer has a single owner so derive new layers
                let copy = self.layer_copy(layer);
                self.add_layer_difference(dest, copy, false);
                self.release_layer(copy);
            }
            // After adding since adding seeds n_layers from the old authority
            self.pipelines[dest].n_layers = self.pipelines[src].n_layers;
        }
        if differences.intersects(PipelineState::NEEDS_BIG_STATE) {
            let src_big = self.pipelines[src].big().clone();
            self.pipelines[dest].big_mut().copy_from(&src_big, differences);
        }

        self.pipelines[dest].differences |= differences & PipelineState::ALL_SPARSE;

        if differences.intersects(PipelineState::AFFECTS_BLENDING) {
            self.handle_automatic_blend_enable(dest, differences);
        }
    }

    /// After `p` changed `change`: drop the override if the parent's
    /// authority holds the same value, otherwise record it and trim
    /// ancestors that became redundant
    pub(crate) fn update_authority(
        &mut self,
        p: PipelineId,
        old_authority: PipelineId,
        change: PipelineState,
        matches: impl Fn(&PipelineNode) -> bool,
    ) {
        if p == old_authority {
            if let Some(parent) = self.pipelines[p].parent {
                let parent_authority = self.authority(parent, change);
                if matches(&self.pipelines[parent_authority]) {
                    self.pipelines[p].differences.remove(change);
                }
            }
        } else {
            self.pipelines[p].differences.insert(change);
            self.prune_redundant_ancestry(p);
        }
    }

    /// Reparent `p` past ancestors whose every difference `p` overrides
    fn prune_redundant_ancestry(&mut self, p: PipelineId) {
        let node = &self.pipelines[p];
        let differences = node.differences;

        // Layers owned by ancestors still fill units this node doesn't
        if differences.contains(PipelineState::LAYERS) && node.n_layers != node.layer_differences.len() {
            return;
        }

        let Some(mut new_parent) = node.parent else {
            return;
        };
        while let Some(grandparent) = self.pipelines[new_parent].parent {
            if (self.pipelines[new_parent].differences | differences) != differences {
                break;
            }
            new_parent = grandparent;
        }
        if Some(new_parent) != self.pipelines[p].parent {
            let strong = !self.is_effectively_weak(p);
            self.set_parent(p, new_parent, strong);
        }
    }

    /// Generic single-group setter. `matches` tests whether a node already
    /// holds the requested value and `apply` stores it.
    pub(crate) fn update_state(
        &mut self,
        p: PipelineId,
        change: PipelineState,
        matches: impl Fn(&PipelineNode) -> bool,
        apply: impl FnOnce(&mut PipelineNode),
    ) {
        if !self.check_live(p, "pipeline setter") {
            return;
        }
        let authority = self.authority(p, change);
        if matches(&self.pipelines[authority]) {
            return;
        }
        self.pre_change_notify(p, change, false);
        apply(&mut self.pipelines[p]);
        self.update_authority(p, authority, change, matches);
        self.handle_automatic_blend_enable(p, change);
    }

    /// Whether changing `change` on `p` (to `new_color` for a color change)
    /// invalidates quads already logged in a journal
    pub fn needs_journal_flush(&self, p: PipelineId, change: PipelineState, new_color: Option<Color>) -> bool {
        let Some(node) = self.pipelines.get(p) else {
            return false;
        };
        if node.journal_ref_count > 0 {
            // Colors are copied into the vertex data so only a change of
            // blending matters
            let skip = change == PipelineState::COLOR
                && self.needs_blending_enabled(p, PipelineState::COLOR, new_color) == node.real_blend_enable;
            if !skip {
                return true;
            }
        }
        node.children
            .iter()
            .any(|c| self.is_effectively_weak(*c) && self.weak_subtree_journal_referenced(*c))
    }

    fn weak_subtree_journal_referenced(&self, p: PipelineId) -> bool {
        let node = &self.pipelines[p];
        node.journal_ref_count > 0
            || node
                .children
                .iter()
                .any(|c| self.weak_subtree_journal_referenced(*c))
    }

    // --- comparison ---

    /// State groups that may differ between `p0` and `p1`: the differences
    /// of every node below their closest common ancestor
    pub fn compare_differences(&self, p0: PipelineId, p1: PipelineId) -> PipelineState {
        let (below0, below1) = diverging_ancestry(p0, p1, |p| self.pipelines[p].parent);
        below0
            .iter()
            .chain(below1.iter())
            .fold(PipelineState::empty(), |acc, p| acc | self.pipelines[*p].differences)
    }

    /// Shallow equality over `differences` (and `layer_differences` within
    /// each layer)
    ///
    /// Only groups in which the two pipelines have distinct authorities are
    /// compared, and some values are compared by identity. Equivalent
    /// pipelines can therefore compare unequal; they are never reported
    /// equal when they differ.
    pub fn equal(
        &self,
        p0: PipelineId,
        p1: PipelineId,
        differences: PipelineState,
        layer_differences: LayerState,
    ) -> bool {
        if p0 == p1 {
            return true;
        }
        let (n0, n1) = (&self.pipelines[p0], &self.pipelines[p1]);
        if n0.real_blend_enable != n1.real_blend_enable {
            return false;
        }
        let blending = n0.real_blend_enable;

        let to_check = self.compare_differences(p0, p1) & differences & PipelineState::ALL_SPARSE;
        each_state_group(to_check).all(|change| {
            let a0 = &self.pipelines[self.authority(p0, change)];
            let a1 = &self.pipelines[self.authority(p1, change)];
            if change == PipelineState::COLOR {
                a0.color == a1.color
            } else if change == PipelineState::BLEND_ENABLE {
                a0.blend_enable == a1.blend_enable
            } else if change == PipelineState::LAYERS {
                self.layers_equal(p0, p1, layer_differences)
            } else if change == PipelineState::LIGHTING {
                a0.big().lighting == a1.big().lighting
            } else if change == PipelineState::ALPHA_FUNC {
                a0.big().alpha_func == a1.big().alpha_func
            } else if change == PipelineState::ALPHA_FUNC_REFERENCE {
                a0.big().alpha_func_reference == a1.big().alpha_func_reference
            } else if change == PipelineState::BLEND {
                // Blend factors are irrelevant while blending is off
                !blending || a0.big().blend.equivalent(&a1.big().blend)
            } else if change == PipelineState::USER_SHADER {
                a0.big().user_program == a1.big().user_program
            } else if change == PipelineState::DEPTH {
                a0.big().depth.equivalent(&a1.big().depth)
            } else if change == PipelineState::FOG {
                a0.big().fog == a1.big().fog
            } else if change == PipelineState::POINT_SIZE {
                a0.big().point_size == a1.big().point_size
            } else if change == PipelineState::LOGIC_OPS {
                a0.big().color_mask == a1.big().color_mask
            } else {
                true
            }
        })
    }

    // --- backends ---

    /// Backend cached on `p` by the last flush, if still valid
    pub fn backend(&self, p: PipelineId) -> Option<Backend> {
        self.pipelines[p].backend
    }

    pub(crate) fn set_backend(&mut self, p: PipelineId, backend: Backend) {
        self.pipelines[p].backend = Some(backend);
    }
}

/// Single-bit groups contained in `state`, lowest first
pub(crate) fn each_state_group(state: PipelineState) -> impl Iterator<Item = PipelineState> {
    let bits = state.bits();
    (0..u32::BITS)
        .map(|i| 1u32 << i)
        .filter(move |bit| bits & bit != 0)
        .map(PipelineState::from_bits_retain)
}

/// Nodes from `a` and from `b` (each list starting at the node itself)
/// that lie below their closest common ancestor. With no common ancestor
/// every node of both chains is returned.
pub(crate) fn diverging_ancestry<K: Copy + PartialEq>(
    a: K,
    b: K,
    parent: impl Fn(K) -> Option<K>,
) -> (SmallVec<[K; 16]>, SmallVec<[K; 16]>) {
    let chain = |start: K| {
        let mut nodes: SmallVec<[K; 16]> = SmallVec::new();
        let mut current = Some(start);
        while let Some(node) = current {
            nodes.push(node);
            current = parent(node);
        }
        nodes
    };
    let mut chain0 = chain(a);
    let mut chain1 = chain(b);

    // Both chains end at their roots; strip the shared tail
    while let (Some(x), Some(y)) = (chain0.last(), chain1.last()) {
        if x != y {
            break;
        }
        chain0.pop();
        chain1.pop();
    }
    (chain0, chain1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    #[test]
    fn test_copy_inherits() {
        let mut store = PipelineStore::new();
        let parent = store.new_pipeline();
        store.set_color(parent, Color::GREEN);
        let child = store.copy(parent);
        assert_eq!(store.color(child), Color::GREEN);
        assert!(store.differences(child).is_empty());
        assert_eq!(store.authority(child, PipelineState::COLOR), parent);
    }

    #[test]
    fn test_setter_reverts_to_parent_value() {
        let mut store = PipelineStore::new();
        let parent = store.new_pipeline();
        store.set_color(parent, Color::GREEN);
        let child = store.copy(parent);

        store.set_color(child, Color::BLUE);
        assert!(store.differences(child).contains(PipelineState::COLOR));

        store.set_color(child, Color::GREEN);
        assert!(!store.differences(child).contains(PipelineState::COLOR));
        assert_eq!(store.color(child), Color::GREEN);
    }

    #[test]
    fn test_copy_on_write_keeps_children_stable() {
        let mut store = PipelineStore::new();
        let parent = store.new_pipeline();
        store.set_color(parent, Color::RED);
        store.set_point_size(parent, 4.0);
        let a = store.copy(parent);
        let b = store.copy(parent);

        store.set_color(parent, Color::BLUE);
        store.set_point_size(parent, 9.0);

        for child in [a, b] {
            assert_eq!(store.color(child), Color::RED);
            assert_eq!(store.point_size(child), 4.0);
            assert_ne!(store.parent(child), Some(parent));
        }
        assert_eq!(store.color(parent), Color::BLUE);
        assert_eq!(store.point_size(parent), 9.0);
    }

    #[test]
    fn test_age_bumps_on_change() {
        let mut store = PipelineStore::new();
        let p = store.new_pipeline();
        let age = store.age(p);
        store.set_color(p, Color::RED);
        assert!(store.age(p) > age);
        let age = store.age(p);
        store.set_color(p, Color::RED);
        assert_eq!(store.age(p), age);
    }

    #[test]
    fn test_release_frees_chain() {
        let mut store = PipelineStore::new();
        let base = store.len();
        let parent = store.new_pipeline();
        let child = store.copy(parent);
        store.release(parent);
        // The child still holds its parent
        assert!(store.is_live(parent));
        store.release(child);
        assert!(!store.is_live(parent));
        assert_eq!(store.len(), base);
        assert!(!store.release(child));
    }

    #[test]
    fn test_weak_copy_destroyed_on_parent_change() {
        let mut store = PipelineStore::new();
        let parent = store.new_pipeline();
        let fired = Rc::new(Cell::new(0));
        let counter = fired.clone();
        let weak = store.weak_copy(parent, move |_| counter.set(counter.get() + 1));
        assert_eq!(store.ref_count(parent), 1);

        store.set_color(parent, Color::RED);
        assert_eq!(fired.get(), 1);
        assert!(!store.is_live(weak));

        store.set_color(parent, Color::BLUE);
        assert_eq!(fired.get(), 1);
    }

    #[test]
    fn test_strong_copy_of_weak_keeps_chain_alive() {
        let mut store = PipelineStore::new();
        let base = store.new_pipeline();
        let weak = store.weak_copy(base, |_| {});
        let strong = store.copy(weak);
        store.release(base);
        assert!(store.is_live(base));
        assert!(store.is_live(weak));
        store.release(strong);
        store.release(weak);
        assert!(!store.is_live(base));
    }

    #[test]
    fn test_compare_differences() {
        let mut store = PipelineStore::new();
        let parent = store.new_pipeline();
        store.set_point_size(parent, 2.0);
        let a = store.copy(parent);
        let b = store.copy(parent);
        store.set_color(a, Color::RED);
        store.set_blend_enable(b, BlendEnable::Disabled);

        let diff = store.compare_differences(a, b);
        assert!(diff.contains(PipelineState::COLOR));
        assert!(diff.contains(PipelineState::BLEND_ENABLE));
        assert!(!diff.contains(PipelineState::POINT_SIZE));
        assert!(store.compare_differences(a, a).is_empty());
    }

    #[test]
    fn test_equal_distinguishes_state() {
        let mut store = PipelineStore::new();
        let a = store.new_pipeline();
        let b = store.new_pipeline();
        let all = PipelineState::ALL_SPARSE;
        assert!(store.equal(a, b, all, LayerState::ALL_SPARSE));

        store.set_point_size(a, 3.0);
        assert!(!store.equal(a, b, all, LayerState::ALL_SPARSE));
        store.set_point_size(b, 3.0);
        assert!(store.equal(a, b, all, LayerState::ALL_SPARSE));

        store.set_color(a, Color::RED);
        assert!(!store.equal(a, b, all, LayerState::ALL_SPARSE));
        assert!(store.equal(a, b, all - PipelineState::COLOR, LayerState::ALL_SPARSE));
    }

    #[test]
    fn test_diverging_ancestry() {
        let parents = [None, Some(0usize), Some(1), Some(1)];
        let (a, b) = diverging_ancestry(2, 3, |n| parents[n]);
        assert_eq!(a.as_slice(), &[2]);
        assert_eq!(b.as_slice(), &[3]);
        let (a, b) = diverging_ancestry(2, 1, |n| parents[n]);
        assert_eq!(a.as_slice(), &[2]);
        assert!(b.is_empty());
    }
}
