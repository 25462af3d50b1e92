//! Buffer objects
//!
//! CPU-side stand-ins for GPU buffer objects. A buffer is a shared handle
//! over a byte store; attribute and index data both live in buffers and are
//! handed to the driver by reference when drawing.

use crate::error::{RenderError, Result};
use std::cell::{Cell, Ref, RefCell, RefMut};
use std::ops::{Deref, DerefMut};
use std::rc::Rc;
use std::sync::atomic::{AtomicU32, Ordering};

static NEXT_BUFFER_ID: AtomicU32 = AtomicU32::new(1);

/// What a buffer holds
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BufferKind {
    Attribute,
    Index,
}

/// Where a buffer can be bound
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BufferTarget {
    AttributeBuffer,
    IndexBuffer,
}

impl BufferKind {
    pub fn default_target(self) -> BufferTarget {
        match self {
            BufferKind::Attribute => BufferTarget::AttributeBuffer,
            BufferKind::Index => BufferTarget::IndexBuffer,
        }
    }
}

/// Expected update frequency, passed through to the driver
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum UpdateHint {
    #[default]
    Static,
    Dynamic,
    Stream,
}

/// Access requested when mapping
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BufferAccess {
    Read,
    Write,
    ReadWrite,
}

#[derive(Debug)]
struct BufferInner {
    id: u32,
    kind: BufferKind,
    data: RefCell<Vec<u8>>,
    mapped: Cell<bool>,
    update_hint: Cell<UpdateHint>,
    immutable_refs: Cell<u32>,
}

/// Shared buffer handle
#[derive(Clone, Debug)]
pub struct Buffer(Rc<BufferInner>);

impl Buffer {
    pub fn new(kind: BufferKind, size: usize) -> Self {
        Buffer(Rc::new(BufferInner {
            id: NEXT_BUFFER_ID.fetch_add(1, Ordering::Relaxed),
            kind,
            data: RefCell::new(vec![0; size]),
            mapped: Cell::new(false),
            update_hint: Cell::new(UpdateHint::Static),
            immutable_refs: Cell::new(0),
        }))
    }

    pub fn new_attribute(size: usize) -> Self {
        Self::new(BufferKind::Attribute, size)
    }

    pub fn new_index(size: usize) -> Self {
        Self::new(BufferKind::Index, size)
    }

    pub fn id(&self) -> u32 {
        self.0.id
    }

    pub fn kind(&self) -> BufferKind {
        self.0.kind
    }

    pub fn size(&self) -> usize {
        self.0.data.borrow().len()
    }

    pub fn update_hint(&self) -> UpdateHint {
        self.0.update_hint.get()
    }

    pub fn set_update_hint(&self, hint: UpdateHint) {
        self.0.update_hint.set(hint);
    }

    pub fn is_mapped(&self) -> bool {
        self.0.mapped.get()
    }

    /// Copy `data` into the buffer at `offset`
    pub fn set_data(&self, offset: usize, data: &[u8]) -> Result<()> {
        if self.is_mapped() {
            tracing::warn!("set_data on mapped buffer {}", self.0.id);
            return Err(RenderError::BufferMapped(self.0.id));
        }
        self.warn_if_immutable();
        let mut store = self.0.data.borrow_mut();
        let size = store.len();
        let end = offset
            .checked_add(data.len())
            .filter(|end| *end <= size)
            .ok_or_else(|| {
                tracing::warn!(
                    "Buffer {} write of {} bytes at {} exceeds size {}",
                    self.0.id,
                    data.len(),
                    offset,
                    size
                );
                RenderError::BufferOutOfRange {
                    offset,
                    len: data.len(),
                    size,
                }
            })?;
        store[offset..end].copy_from_slice(data);
        Ok(())
    }

    /// Map the whole buffer. The mapping ends when the guard drops.
    pub fn map(&self, access: BufferAccess) -> Result<BufferMap<'_>> {
        if self.is_mapped() {
            tracing::warn!("Buffer {} mapped twice", self.0.id);
            return Err(RenderError::BufferMapped(self.0.id));
        }
        if access != BufferAccess::Read {
            self.warn_if_immutable();
        }
        self.0.mapped.set(true);
        Ok(BufferMap {
            buffer: self,
            data: self.0.data.borrow_mut(),
        })
    }

    /// Read-only view of the contents
    pub fn contents(&self) -> Ref<'_, [u8]> {
        Ref::map(self.0.data.borrow(), |v| v.as_slice())
    }

    /// Mark the buffer as in use by a draw; writes while in use warn
    pub(crate) fn immutable_ref(&self) {
        self.0.immutable_refs.set(self.0.immutable_refs.get() + 1);
    }

    pub(crate) fn immutable_unref(&self) {
        let refs = self.0.immutable_refs.get();
        debug_assert!(refs > 0);
        self.0.immutable_refs.set(refs.saturating_sub(1));
    }

    fn warn_if_immutable(&self) {
        if self.0.immutable_refs.get() > 0 {
            tracing::warn!("Mid-scene modification of buffer {} has undefined results", self.0.id);
        }
    }

    pub fn ptr_eq(&self, other: &Buffer) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

/// Mapped buffer contents
pub struct BufferMap<'a> {
    buffer: &'a Buffer,
    data: RefMut<'a, Vec<u8>>,
}

impl Deref for BufferMap<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.data
    }
}

impl DerefMut for BufferMap<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

impl Drop for BufferMap<'_> {
    fn drop(&mut self) {
        self.buffer.0.mapped.set(false);
    }
}

/// Which buffer is bound to each target
#[derive(Debug, Default)]
pub struct BufferBindings {
    attribute: Option<Buffer>,
    index: Option<Buffer>,
}

impl BufferBindings {
    fn slot(&mut self, target: BufferTarget) -> &mut Option<Buffer> {
        match target {
            BufferTarget::AttributeBuffer => &mut self.attribute,
            BufferTarget::IndexBuffer => &mut self.index,
        }
    }

    pub fn bind(&mut self, target: BufferTarget, buffer: &Buffer) -> Result<()> {
        let slot = self.slot(target);
        if slot.is_some() {
            tracing::warn!("Buffer {} bound to busy target {:?}", buffer.id(), target);
            return Err(RenderError::BindTargetInUse(target));
        }
        *slot = Some(buffer.clone());
        Ok(())
    }

    pub fn unbind(&mut self, target: BufferTarget) {
        if self.slot(target).take().is_none() {
            tracing::warn!("Unbinding empty buffer target {:?}", target);
        }
    }

    pub fn bound(&self, target: BufferTarget) -> Option<&Buffer> {
        match target {
            BufferTarget::AttributeBuffer => self.attribute.as_ref(),
            BufferTarget::IndexBuffer => self.index.as_ref(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_data_bounds() {
        let buffer = Buffer::new_attribute(8);
        buffer.set_data(4, &[1, 2, 3, 4]).unwrap();
        assert_eq!(&*buffer.contents(), &[0, 0, 0, 0, 1, 2, 3, 4]);
        assert_eq!(
            buffer.set_data(6, &[0; 4]),
            Err(RenderError::BufferOutOfRange {
                offset: 6,
                len: 4,
                size: 8
            })
        );
    }

    #[test]
    fn test_map_twice_fails() {
        let buffer = Buffer::new_index(4);
        {
            let mut map = buffer.map(BufferAccess::Write).unwrap();
            map[0] = 7;
            assert!(buffer.is_mapped());
            assert!(matches!(
                buffer.map(BufferAccess::Read),
                Err(RenderError::BufferMapped(_))
            ));
        }
        assert!(!buffer.is_mapped());
        assert_eq!(buffer.contents()[0], 7);
    }

    #[test]
    fn test_bindings() {
        let mut bindings = BufferBindings::default();
        let a = Buffer::new_attribute(4);
        let b = Buffer::new_attribute(4);
        bindings.bind(BufferTarget::AttributeBuffer, &a).unwrap();
        assert_eq!(
            bindings.bind(BufferTarget::AttributeBuffer, &b),
            Err(RenderError::BindTargetInUse(BufferTarget::AttributeBuffer))
        );
        assert!(bindings.bound(BufferTarget::AttributeBuffer).unwrap().ptr_eq(&a));
        bindings.unbind(BufferTarget::AttributeBuffer);
        assert!(bindings.bound(BufferTarget::AttributeBuffer).is_none());
    }
}
