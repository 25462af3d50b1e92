//! Vertex attributes
//!
//! An attribute is a typed, strided view into a buffer bound to a named
//! shader input. Names starting with `cogl_` are the built-in inputs and
//! get a fixed meaning and default normalization; anything else is a custom
//! input. Every distinct name is registered once in a process-wide table
//! and given a small stable index.

use crate::buffer::Buffer;
use crate::error::{RenderError, Result};
use bitflags::bitflags;
use rustc_hash::FxHashMap;
use std::cell::Cell;
use std::sync::{Arc, Mutex, PoisonError};

/// Component type of an attribute
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AttributeType {
    Byte,
    UnsignedByte,
    Short,
    UnsignedShort,
    Float,
}

impl AttributeType {
    pub fn size(self) -> usize {
        match self {
            AttributeType::Byte | AttributeType::UnsignedByte => 1,
            AttributeType::Short | AttributeType::UnsignedShort => 2,
            AttributeType::Float => 4,
        }
    }
}

/// Built-in meaning of an attribute name
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AttributeNameId {
    Position,
    Color,
    TextureCoord,
    Normal,
    PointSize,
    Custom,
}

/// Registered facts about one attribute name
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AttributeNameState {
    pub name: String,
    pub name_id: AttributeNameId,
    /// Registration order, stable for the life of the process
    pub name_index: usize,
    pub normalized_default: bool,
    /// Texture unit for texture coordinates, 0 otherwise
    pub layer_number: u32,
}

static NAME_REGISTRY: Mutex<Option<FxHashMap<String, Arc<AttributeNameState>>>> = Mutex::new(None);

fn parse_name(name: &str, index: usize) -> Result<AttributeNameState> {
    let state = |name_id, normalized_default, layer_number| AttributeNameState {
        name: name.to_string(),
        name_id,
        name_index: index,
        normalized_default,
        layer_number,
    };

    let Some(builtin) = name.strip_prefix("cogl_") else {
        return Ok(state(AttributeNameId::Custom, false, 0));
    };

    match builtin {
        "position_in" => Ok(state(AttributeNameId::Position, false, 0)),
        "color_in" => Ok(state(AttributeNameId::Color, true, 0)),
        "tex_coord_in" => Ok(state(AttributeNameId::TextureCoord, false, 0)),
        "normal_in" => Ok(state(AttributeNameId::Normal, true, 0)),
        "point_size_in" => Ok(state(AttributeNameId::PointSize, false, 0)),
        other if other.starts_with("tex_coord") => {
            let unit = other
                .strip_prefix("tex_coord")
                .and_then(|rest| rest.strip_suffix("_in"))
                .and_then(|digits| digits.parse::<u32>().ok());
            match unit {
                Some(unit) => Ok(state(AttributeNameId::TextureCoord, false, unit)),
                None => {
                    tracing::warn!(
                        "Texture coordinate attributes should either be named \"cogl_tex_coord_in\" \
                         or named with a texture unit index like \"cogl_tex_coord2_in\", not \"{}\"",
                        name
                    );
                    Err(RenderError::InvalidAttributeName(name.to_string()))
                }
            }
        }
        _ => {
            tracing::warn!("Unknown cogl_* attribute name {}", name);
            Err(RenderError::InvalidAttributeName(name.to_string()))
        }
    }
}

/// Look up `name`, registering it on first use
pub fn lookup_name(name: &str) -> Result<Arc<AttributeNameState>> {
    let mut guard = NAME_REGISTRY.lock().unwrap_or_else(PoisonError::into_inner);
    let registry = guard.get_or_insert_with(FxHashMap::default);
    if let Some(state) = registry.get(name) {
        return Ok(state.clone());
    }
    let state = Arc::new(parse_name(name, registry.len())?);
    registry.insert(name.to_string(), state.clone());
    Ok(state)
}

/// Number of names registered so far
pub fn registered_name_count() -> usize {
    NAME_REGISTRY
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .as_ref()
        .map_or(0, |registry| registry.len())
}

fn validate_components(state: &AttributeNameState, n_components: u32) -> Result<()> {
    let ok = match state.name_id {
        AttributeNameId::Position => n_components != 1,
        AttributeNameId::Color => n_components == 3 || n_components == 4,
        AttributeNameId::Normal => n_components == 3,
        AttributeNameId::PointSize => n_components == 1,
        AttributeNameId::TextureCoord | AttributeNameId::Custom => true,
    };
    if ok && (1..=4).contains(&n_components) {
        return Ok(());
    }
    match state.name_id {
        AttributeNameId::Position => tracing::warn!(
            "Vertex positions need 2, 3 or 4 components, \"{}\" has {}",
            state.name,
            n_components
        ),
        AttributeNameId::Color => tracing::warn!(
            "Colors need 3 or 4 components, \"{}\" has {}",
            state.name,
            n_components
        ),
        AttributeNameId::Normal => tracing::warn!(
            "Normals need exactly 3 components, \"{}\" has {}",
            state.name,
            n_components
        ),
        _ => tracing::warn!(
            "Attribute \"{}\" cannot have {} components",
            state.name,
            n_components
        ),
    }
    Err(RenderError::InvalidComponentCount {
        name: state.name.clone(),
        n_components,
    })
}

/// A typed, strided span of a buffer bound to a named input
#[derive(Clone, Debug)]
pub struct Attribute {
    buffer: Buffer,
    name_state: Arc<AttributeNameState>,
    stride: usize,
    offset: usize,
    n_components: u32,
    attribute_type: AttributeType,
    normalized: bool,
    immutable_refs: Cell<u32>,
}

impl Attribute {
    pub fn new(
        buffer: &Buffer,
        name: &str,
        stride: usize,
        offset: usize,
        n_components: u32,
        attribute_type: AttributeType,
    ) -> Result<Self> {
        let name_state = lookup_name(name)?;
        validate_components(&name_state, n_components)?;
        Ok(Self {
            buffer: buffer.clone(),
            normalized: name_state.normalized_default,
            name_state,
            stride,
            offset,
            n_components,
            attribute_type,
            immutable_refs: Cell::new(0),
        })
    }

    pub fn buffer(&self) -> &Buffer {
        &self.buffer
    }

    pub fn set_buffer(&mut self, buffer: &Buffer) {
        self.warn_if_immutable();
        self.buffer = buffer.clone();
    }

    pub fn name(&self) -> &str {
        &self.name_state.name
    }

    pub fn name_id(&self) -> AttributeNameId {
        self.name_state.name_id
    }

    pub fn name_index(&self) -> usize {
        self.name_state.name_index
    }

    /// Texture unit of a texture coordinate attribute
    pub fn layer_number(&self) -> u32 {
        self.name_state.layer_number
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn n_components(&self) -> u32 {
        self.n_components
    }

    pub fn attribute_type(&self) -> AttributeType {
        self.attribute_type
    }

    pub fn normalized(&self) -> bool {
        self.normalized
    }

    pub fn set_normalized(&mut self, normalized: bool) {
        self.warn_if_immutable();
        self.normalized = normalized;
    }

    pub(crate) fn immutable_ref(&self) {
        self.immutable_refs.set(self.immutable_refs.get() + 1);
        self.buffer.immutable_ref();
    }

    pub(crate) fn immutable_unref(&self) {
        let refs = self.immutable_refs.get();
        debug_assert!(refs > 0);
        self.immutable_refs.set(refs.saturating_sub(1));
        self.buffer.immutable_unref();
    }

    fn warn_if_immutable(&self) {
        if self.immutable_refs.get() > 0 {
            tracing::warn!("Mid-scene modification of attributes has undefined results");
        }
    }
}

bitflags! {
    /// Options for a single draw
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct DrawFlags: u32 {
        /// Don't flush the journal first
        const SKIP_JOURNAL_FLUSH = 1 << 0;
        /// Don't check layers for textures that need a fallback
        const SKIP_PIPELINE_VALIDATION = 1 << 1;
        /// Don't flush framebuffer state first
        const SKIP_FRAMEBUFFER_FLUSH = 1 << 2;
        /// Don't apply the context's legacy state to the pipeline
        const SKIP_LEGACY_STATE = 1 << 3;
        /// A color attribute never makes the draw translucent
        const COLOR_ATTRIBUTE_IS_OPAQUE = 1 << 4;
    }
}

/// Primitive assembly mode
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum VerticesMode {
    Points,
    Lines,
    LineLoop,
    LineStrip,
    Triangles,
    TriangleStrip,
    TriangleFan,
}
