//! Pipeline state values, setters and getters
//!
//! Small, frequently set state (color, blend enable, layer count) lives
//! directly on each node. Everything else sits in a boxed [`BigState`]
//! that is only allocated once a node overrides one of those groups.

use super::{PipelineId, PipelineState, PipelineStore};
use bitflags::bitflags;
use cogl_core::{debug, Color, DebugFlags};
use std::sync::atomic::{AtomicU32, Ordering};

/// Whether blending is enabled
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum BlendEnable {
    /// Enabled only when the rest of the state can produce translucency
    #[default]
    Automatic,
    Enabled,
    Disabled,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BlendEquation {
    Add,
    Subtract,
    ReverseSubtract,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BlendFactor {
    Zero,
    One,
    SrcColor,
    OneMinusSrcColor,
    DstColor,
    OneMinusDstColor,
    SrcAlpha,
    OneMinusSrcAlpha,
    DstAlpha,
    OneMinusDstAlpha,
    ConstantColor,
    OneMinusConstantColor,
    ConstantAlpha,
    OneMinusConstantAlpha,
    SrcAlphaSaturate,
}

impl BlendFactor {
    fn uses_constant(self) -> bool {
        matches!(
            self,
            BlendFactor::ConstantColor
                | BlendFactor::OneMinusConstantColor
                | BlendFactor::ConstantAlpha
                | BlendFactor::OneMinusConstantAlpha
        )
    }
}

/// Blend equations, factors and constant
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BlendState {
    pub equation_rgb: BlendEquation,
    pub equation_alpha: BlendEquation,
    pub src_factor_rgb: BlendFactor,
    pub dst_factor_rgb: BlendFactor,
    pub src_factor_alpha: BlendFactor,
    pub dst_factor_alpha: BlendFactor,
    pub constant: Color,
}

impl BlendState {
    /// Premultiplied "over"
    pub const DEFAULT: BlendState = BlendState {
        equation_rgb: BlendEquation::Add,
        equation_alpha: BlendEquation::Add,
        src_factor_rgb: BlendFactor::One,
        dst_factor_rgb: BlendFactor::OneMinusSrcAlpha,
        src_factor_alpha: BlendFactor::One,
        dst_factor_alpha: BlendFactor::OneMinusSrcAlpha,
        constant: Color::TRANSPARENT,
    };

    /// Equal as far as the GPU is concerned; the constant only matters when
    /// a factor reads it
    pub fn equivalent(&self, other: &BlendState) -> bool {
        if self.equation_rgb != other.equation_rgb
            || self.equation_alpha != other.equation_alpha
            || self.src_factor_rgb != other.src_factor_rgb
            || self.dst_factor_rgb != other.dst_factor_rgb
            || self.src_factor_alpha != other.src_factor_alpha
            || self.dst_factor_alpha != other.dst_factor_alpha
        {
            return false;
        }
        let uses_constant = [
            self.src_factor_rgb,
            self.dst_factor_rgb,
            self.src_factor_alpha,
            self.dst_factor_alpha,
        ]
        .into_iter()
        .any(BlendFactor::uses_constant);
        !uses_constant || self.constant == other.constant
    }

    /// Output equals the source color whenever source alpha is 1
    fn is_default_over(&self) -> bool {
        self.equation_rgb == BlendEquation::Add
            && self.equation_alpha == BlendEquation::Add
            && self.src_factor_alpha == BlendFactor::One
            && self.dst_factor_alpha == BlendFactor::OneMinusSrcAlpha
            && self.src_factor_rgb == BlendFactor::One
            && self.dst_factor_rgb == BlendFactor::OneMinusSrcAlpha
    }
}

/// Comparison used by alpha testing
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum AlphaFunc {
    Never,
    Less,
    Equal,
    Lequal,
    Greater,
    NotEqual,
    Gequal,
    #[default]
    Always,
}

/// Comparison used by depth testing
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum DepthTestFunction {
    Never,
    #[default]
    Less,
    Equal,
    Lequal,
    Greater,
    NotEqual,
    Gequal,
    Always,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DepthState {
    pub test_enabled: bool,
    pub test_function: DepthTestFunction,
    pub write_enabled: bool,
    pub range_near: f32,
    pub range_far: f32,
}

impl DepthState {
    pub const DEFAULT: DepthState = DepthState {
        test_enabled: false,
        test_function: DepthTestFunction::Less,
        write_enabled: true,
        range_near: 0.0,
        range_far: 1.0,
    };

    /// Any two states with testing disabled behave the same
    pub fn equivalent(&self, other: &DepthState) -> bool {
        (!self.test_enabled && !other.test_enabled) || self == other
    }
}

impl Default for DepthState {
    fn default() -> Self {
        Self::DEFAULT
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum FogMode {
    #[default]
    Linear,
    Exponential,
    ExponentialSquared,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FogState {
    pub enabled: bool,
    pub color: Color,
    pub mode: FogMode,
    pub density: f32,
    pub z_near: f32,
    pub z_far: f32,
}

impl FogState {
    pub const DEFAULT: FogState = FogState {
        enabled: false,
        color: Color::TRANSPARENT,
        mode: FogMode::Linear,
        density: 1.0,
        z_near: 1.0,
        z_far: 100.0,
    };
}

impl Default for FogState {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Material colors used by fixed function lighting
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LightingState {
    pub ambient: [f32; 4],
    pub diffuse: [f32; 4],
    pub specular: [f32; 4],
    pub emission: [f32; 4],
    pub shininess: f32,
}

impl LightingState {
    pub const DEFAULT: LightingState = LightingState {
        ambient: [0.2, 0.2, 0.2, 1.0],
        diffuse: [0.8, 0.8, 0.8, 1.0],
        specular: [0.0, 0.0, 0.0, 1.0],
        emission: [0.0, 0.0, 0.0, 1.0],
        shininess: 0.0,
    };
}

bitflags! {
    /// Color channels written to the framebuffer
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct ColorMask: u8 {
        const RED = 1 << 0;
        const GREEN = 1 << 1;
        const BLUE = 1 << 2;
        const ALPHA = 1 << 3;
    }
}

impl Default for ColorMask {
    fn default() -> Self {
        ColorMask::all()
    }
}

/// Language a user program is written in
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ProgramLanguage {
    Glsl,
    Arbfp,
}

static NEXT_PROGRAM_ID: AtomicU32 = AtomicU32::new(1);

/// Handle to an application supplied shader program
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct UserProgram {
    id: u32,
    language: ProgramLanguage,
}

impl UserProgram {
    pub fn new(language: ProgramLanguage) -> Self {
        Self {
            id: NEXT_PROGRAM_ID.fetch_add(1, Ordering::Relaxed),
            language,
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn language(&self) -> ProgramLanguage {
        self.language
    }
}

/// Rarely overridden state
#[derive(Clone, Debug, PartialEq)]
pub struct BigState {
    pub lighting: LightingState,
    pub alpha_func: AlphaFunc,
    pub alpha_func_reference: f32,
    pub blend: BlendState,
    pub user_program: Option<UserProgram>,
    pub depth: DepthState,
    pub fog: FogState,
    pub point_size: f32,
    pub color_mask: ColorMask,
}

impl BigState {
    pub const DEFAULT: BigState = BigState {
        lighting: LightingState::DEFAULT,
        alpha_func: AlphaFunc::Always,
        alpha_func_reference: 0.0,
        blend: BlendState::DEFAULT,
        user_program: None,
        depth: DepthState::DEFAULT,
        fog: FogState::DEFAULT,
        point_size: 1.0,
        color_mask: ColorMask::all(),
    };

    /// Copy the groups in `groups` from `src`
    pub(crate) fn copy_from(&mut self, src: &BigState, groups: PipelineState) {
        if groups.contains(PipelineState::LIGHTING) {
            self.lighting = src.lighting;
        }
        if groups.contains(PipelineState::ALPHA_FUNC) {
            self.alpha_func = src.alpha_func;
        }
        if groups.contains(PipelineState::ALPHA_FUNC_REFERENCE) {
            self.alpha_func_reference = src.alpha_func_reference;
        }
        if groups.contains(PipelineState::BLEND) {
            self.blend = src.blend;
        }
        if groups.contains(PipelineState::USER_SHADER) {
            self.user_program = src.user_program;
        }
        if groups.contains(PipelineState::DEPTH) {
            self.depth = src.depth;
        }
        if groups.contains(PipelineState::FOG) {
            self.fog = src.fog;
        }
        if groups.contains(PipelineState::POINT_SIZE) {
            self.point_size = src.point_size;
        }
        if groups.contains(PipelineState::LOGIC_OPS) {
            self.color_mask = src.color_mask;
        }
    }
}

impl Default for BigState {
    fn default() -> Self {
        Self::DEFAULT
    }
}

pub(crate) static DEFAULT_BIG_STATE: BigState = BigState::DEFAULT;

impl PipelineStore {
    fn big_authority(&self, p: PipelineId, state: PipelineState) -> &BigState {
        self.pipelines[self.authority(p, state)].big()
    }

    pub fn color(&self, p: PipelineId) -> Color {
        self.pipelines[self.authority(p, PipelineState::COLOR)].color
    }

    pub fn set_color(&mut self, p: PipelineId, color: Color) {
        self.update_state(p, PipelineState::COLOR, |n| n.color == color, |n| n.color = color);
    }

    pub fn blend_enable(&self, p: PipelineId) -> BlendEnable {
        self.pipelines[self.authority(p, PipelineState::BLEND_ENABLE)].blend_enable
    }

    pub fn set_blend_enable(&mut self, p: PipelineId, enable: BlendEnable) {
        self.update_state(
            p,
            PipelineState::BLEND_ENABLE,
            |n| n.blend_enable == enable,
            |n| n.blend_enable = enable,
        );
    }

    /// Whether blending is actually on, after resolving `Automatic`
    pub fn real_blend_enable(&self, p: PipelineId) -> bool {
        self.pipelines[p].real_blend_enable
    }

    pub fn blend_state(&self, p: PipelineId) -> BlendState {
        self.big_authority(p, PipelineState::BLEND).blend
    }

    pub fn set_blend_factors(
        &mut self,
        p: PipelineId,
        src_rgb: BlendFactor,
        dst_rgb: BlendFactor,
        src_alpha: BlendFactor,
        dst_alpha: BlendFactor,
    ) {
        let factors = (src_rgb, dst_rgb, src_alpha, dst_alpha);
        self.update_state(
            p,
            PipelineState::BLEND,
            |n| {
                let b = &n.big().blend;
                (b.src_factor_rgb, b.dst_factor_rgb, b.src_factor_alpha, b.dst_factor_alpha) == factors
            },
            |n| {
                let b = &mut n.big_mut().blend;
                b.src_factor_rgb = src_rgb;
                b.dst_factor_rgb = dst_rgb;
                b.src_factor_alpha = src_alpha;
                b.dst_factor_alpha = dst_alpha;
            },
        );
    }

    pub fn set_blend_equations(&mut self, p: PipelineId, rgb: BlendEquation, alpha: BlendEquation) {
        self.update_state(
            p,
            PipelineState::BLEND,
            |n| n.big().blend.equation_rgb == rgb && n.big().blend.equation_alpha == alpha,
            |n| {
                let b = &mut n.big_mut().blend;
                b.equation_rgb = rgb;
                b.equation_alpha = alpha;
            },
        );
    }

    pub fn set_blend_constant(&mut self, p: PipelineId, constant: Color) {
        self.update_state(
            p,
            PipelineState::BLEND,
            |n| n.big().blend.constant == constant,
            |n| n.big_mut().blend.constant = constant,
        );
    }

    pub fn alpha_test_function(&self, p: PipelineId) -> AlphaFunc {
        self.big_authority(p, PipelineState::ALPHA_FUNC).alpha_func
    }

    pub fn alpha_test_reference(&self, p: PipelineId) -> f32 {
        self.big_authority(p, PipelineState::ALPHA_FUNC_REFERENCE)
            .alpha_func_reference
    }

    pub fn set_alpha_test_function(&mut self, p: PipelineId, func: AlphaFunc, reference: f32) {
        self.update_state(
            p,
            PipelineState::ALPHA_FUNC,
            |n| n.big().alpha_func == func,
            |n| n.big_mut().alpha_func = func,
        );
        self.update_state(
            p,
            PipelineState::ALPHA_FUNC_REFERENCE,
            |n| n.big().alpha_func_reference == reference,
            |n| n.big_mut().alpha_func_reference = reference,
        );
    }

    pub fn lighting(&self, p: PipelineId) -> LightingState {
        self.big_authority(p, PipelineState::LIGHTING).lighting
    }

    fn update_lighting(
        &mut self,
        p: PipelineId,
        matches: impl Fn(&LightingState) -> bool,
        apply: impl FnOnce(&mut LightingState),
    ) {
        self.update_state(
            p,
            PipelineState::LIGHTING,
            |n| matches(&n.big().lighting),
            |n| apply(&mut n.big_mut().lighting),
        );
    }

    pub fn set_ambient(&mut self, p: PipelineId, ambient: [f32; 4]) {
        self.update_lighting(p, |l| l.ambient == ambient, |l| l.ambient = ambient);
    }

    pub fn set_diffuse(&mut self, p: PipelineId, diffuse: [f32; 4]) {
        self.update_lighting(p, |l| l.diffuse == diffuse, |l| l.diffuse = diffuse);
    }

    pub fn set_ambient_and_diffuse(&mut self, p: PipelineId, color: [f32; 4]) {
        self.set_ambient(p, color);
        self.set_diffuse(p, color);
    }

    pub fn set_specular(&mut self, p: PipelineId, specular: [f32; 4]) {
        self.update_lighting(p, |l| l.specular == specular, |l| l.specular = specular);
    }

    pub fn set_emission(&mut self, p: PipelineId, emission: [f32; 4]) {
        self.update_lighting(p, |l| l.emission == emission, |l| l.emission = emission);
    }

    pub fn set_shininess(&mut self, p: PipelineId, shininess: f32) {
        if shininess < 0.0 {
            tracing::warn!("Out of range shininess {} supplied for pipeline", shininess);
            return;
        }
        self.update_lighting(p, |l| l.shininess == shininess, |l| l.shininess = shininess);
    }

    pub fn depth_state(&self, p: PipelineId) -> DepthState {
        self.big_authority(p, PipelineState::DEPTH).depth
    }

    pub fn set_depth_state(&mut self, p: PipelineId, depth: DepthState) {
        self.update_state(
            p,
            PipelineState::DEPTH,
            |n| n.big().depth == depth,
            |n| n.big_mut().depth = depth,
        );
    }

    pub fn fog_state(&self, p: PipelineId) -> FogState {
        self.big_authority(p, PipelineState::FOG).fog
    }

    pub fn set_fog_state(&mut self, p: PipelineId, fog: FogState) {
        self.update_state(p, PipelineState::FOG, |n| n.big().fog == fog, |n| n.big_mut().fog = fog);
    }

    pub fn point_size(&self, p: PipelineId) -> f32 {
        self.big_authority(p, PipelineState::POINT_SIZE).point_size
    }

    pub fn set_point_size(&mut self, p: PipelineId, size: f32) {
        self.update_state(
            p,
            PipelineState::POINT_SIZE,
            |n| n.big().point_size == size,
            |n| n.big_mut().point_size = size,
        );
    }

    pub fn color_mask(&self, p: PipelineId) -> ColorMask {
        self.big_authority(p, PipelineState::LOGIC_OPS).color_mask
    }

    pub fn set_color_mask(&mut self, p: PipelineId, mask: ColorMask) {
        self.update_state(
            p,
            PipelineState::LOGIC_OPS,
            |n| n.big().color_mask == mask,
            |n| n.big_mut().color_mask = mask,
        );
    }

    pub fn user_program(&self, p: PipelineId) -> Option<UserProgram> {
        self.big_authority(p, PipelineState::USER_SHADER).user_program
    }

    pub fn set_user_program(&mut self, p: PipelineId, program: Option<UserProgram>) {
        self.update_state(
            p,
            PipelineState::USER_SHADER,
            |n| n.big().user_program == program,
            |n| n.big_mut().user_program = program,
        );
    }

    /// Whether the state in `changes` requires blending. `override_color`
    /// stands in for the stored color, for asking about a color change
    /// before it happens.
    pub(crate) fn needs_blending_enabled(
        &self,
        p: PipelineId,
        changes: PipelineState,
        override_color: Option<Color>,
    ) -> bool {
        self.needs_blending_inner(p, changes, override_color, true)
    }

    fn needs_blending_inner(
        &self,
        p: PipelineId,
        mut changes: PipelineState,
        override_color: Option<Color>,
        recheck_others: bool,
    ) -> bool {
        if debug::enabled(DebugFlags::DISABLE_BLENDING) {
            return false;
        }

        match self.blend_enable(p) {
            BlendEnable::Enabled => return true,
            BlendEnable::Disabled => return false,
            BlendEnable::Automatic => {}
        }

        if !self.blend_state(p).is_default_over() {
            return true;
        }

        // Layer alpha depends on everything feeding the previous stage
        if changes.contains(PipelineState::LAYERS) {
            changes = PipelineState::AFFECTS_BLENDING;
        }

        match override_color {
            Some(color) if color.alpha != 0xff => return true,
            Some(_) => {}
            None => {
                if changes.contains(PipelineState::COLOR) && self.color(p).alpha != 0xff {
                    return true;
                }
            }
        }

        if changes.contains(PipelineState::USER_SHADER) && self.user_program(p).is_some() {
            return true;
        }

        if changes.contains(PipelineState::LAYERS)
            && self.layers_of(p).into_iter().any(|layer| self.layer_may_have_alpha(layer))
        {
            return true;
        }

        // Blending was on for a reason that may not be in `changes`
        if recheck_others && self.pipelines[p].real_blend_enable {
            let others = PipelineState::AFFECTS_BLENDING - changes;
            if !others.is_empty() && self.needs_blending_inner(p, others, None, false) {
                return true;
            }
        }

        false
    }

    pub(crate) fn handle_automatic_blend_enable(&mut self, p: PipelineId, change: PipelineState) {
        let enable = self.needs_blending_enabled(p, change, None);
        if enable != self.pipelines[p].real_blend_enable {
            self.pre_change_notify(p, PipelineState::REAL_BLEND_ENABLE, false);
            self.pipelines[p].real_blend_enable = enable;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_translucent_color_enables_blending() {
        let mut store = PipelineStore::new();
        let p = store.new_pipeline();
        assert!(!store.real_blend_enable(p));

        store.set_color(p, Color::from_4ub(0xff, 0, 0, 0x80));
        assert!(store.real_blend_enable(p));

        store.set_color(p, Color::RED);
        assert!(!store.real_blend_enable(p));
    }

    #[test]
    fn test_explicit_blend_enable_wins() {
        let mut store = PipelineStore::new();
        let p = store.new_pipeline();
        store.set_blend_enable(p, BlendEnable::Enabled);
        assert!(store.real_blend_enable(p));
        store.set_color(p, Color::TRANSPARENT);
        store.set_blend_enable(p, BlendEnable::Disabled);
        assert!(!store.real_blend_enable(p));
    }

    #[test]
    fn test_non_default_blend_factors_enable_blending() {
        let mut store = PipelineStore::new();
        let p = store.new_pipeline();
        store.set_blend_factors(
            p,
            BlendFactor::SrcAlpha,
            BlendFactor::OneMinusSrcAlpha,
            BlendFactor::One,
            BlendFactor::OneMinusSrcAlpha,
        );
        assert!(store.real_blend_enable(p));
        assert_eq!(store.blend_state(p).src_factor_rgb, BlendFactor::SrcAlpha);
    }

    #[test]
    fn test_user_program_enables_blending() {
        let mut store = PipelineStore::new();
        let p = store.new_pipeline();
        let program = UserProgram::new(ProgramLanguage::Glsl);
        store.set_user_program(p, Some(program));
        assert!(store.real_blend_enable(p));
        assert_eq!(store.user_program(p), Some(program));
    }

    #[test]
    fn test_multi_property_groups_keep_other_values() {
        let mut store = PipelineStore::new();
        let parent = store.new_pipeline();
        store.set_specular(parent, [0.5, 0.5, 0.5, 1.0]);
        let child = store.copy(parent);
        store.set_shininess(child, 8.0);

        let lighting = store.lighting(child);
        assert_eq!(lighting.shininess, 8.0);
        assert_eq!(lighting.specular, [0.5, 0.5, 0.5, 1.0]);
        assert_eq!(lighting.ambient, LightingState::DEFAULT.ambient);
    }

    #[test]
    fn test_depth_equivalence_ignores_disabled_state() {
        let a = DepthState {
            write_enabled: false,
            ..DepthState::DEFAULT
        };
        assert!(a.equivalent(&DepthState::DEFAULT));
        let enabled = DepthState {
            test_enabled: true,
            ..a
        };
        assert!(!enabled.equivalent(&DepthState {
            test_enabled: true,
            ..DepthState::DEFAULT
        }));
    }

    #[test]
    fn test_blend_constant_only_matters_when_read() {
        let a = BlendState::DEFAULT;
        let b = BlendState {
            constant: Color::RED,
            ..BlendState::DEFAULT
        };
        assert!(a.equivalent(&b));
        let c = BlendState {
            src_factor_rgb: BlendFactor::ConstantColor,
            ..a
        };
        let d = BlendState {
            src_factor_rgb: BlendFactor::ConstantColor,
            ..b
        };
        assert!(!c.equivalent(&d));
    }

    #[test]
    fn test_alpha_test_and_fog() {
        let mut store = PipelineStore::new();
        let p = store.new_pipeline();
        store.set_alpha_test_function(p, AlphaFunc::Greater, 0.5);
        assert_eq!(store.alpha_test_function(p), AlphaFunc::Greater);
        assert_eq!(store.alpha_test_reference(p), 0.5);

        let fog = FogState {
            enabled: true,
            ..FogState::DEFAULT
        };
        store.set_fog_state(p, fog);
        assert_eq!(store.fog_state(p), fog);
        assert!(store.differences(p).contains(PipelineState::FOG));
    }
}
