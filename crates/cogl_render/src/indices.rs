//! Index buffers and the shared quad index pattern
//!
//! Quads are drawn as two triangles sharing a diagonal. The index pattern
//! for quad `n` with first vertex `v = 4n` is `v, v+1, v+2, v, v+2, v+3`.
//! Pattern buffers are generated once per context and grown on demand.

use crate::buffer::Buffer;
use bytemuck::Pod;

/// Index element type
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum IndicesType {
    UnsignedByte,
    UnsignedShort,
    UnsignedInt,
}

impl IndicesType {
    pub fn size(self) -> usize {
        match self {
            IndicesType::UnsignedByte => 1,
            IndicesType::UnsignedShort => 2,
            IndicesType::UnsignedInt => 4,
        }
    }
}

/// A typed view of an index buffer
#[derive(Clone, Debug)]
pub struct Indices {
    buffer: Buffer,
    offset: usize,
    indices_type: IndicesType,
}

impl Indices {
    fn from_slice<T: Pod>(indices_type: IndicesType, indices: &[T]) -> Self {
        let bytes: &[u8] = bytemuck::cast_slice(indices);
        let buffer = Buffer::new_index(bytes.len());
        let written = buffer.set_data(0, bytes);
        debug_assert!(written.is_ok(), "fresh index buffer rejected its data: {written:?}");
        Self {
            buffer,
            offset: 0,
            indices_type,
        }
    }

    pub fn new_u8(indices: &[u8]) -> Self {
        Self::from_slice(IndicesType::UnsignedByte, indices)
    }

    pub fn new_u16(indices: &[u16]) -> Self {
        Self::from_slice(IndicesType::UnsignedShort, indices)
    }

    pub fn new_u32(indices: &[u32]) -> Self {
        Self::from_slice(IndicesType::UnsignedInt, indices)
    }

    pub fn buffer(&self) -> &Buffer {
        &self.buffer
    }

    pub fn indices_type(&self) -> IndicesType {
        self.indices_type
    }

    /// Byte offset of the first index
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn set_offset(&mut self, offset: usize) {
        self.offset = offset;
    }

    /// Number of indices after `offset`
    pub fn len(&self) -> usize {
        self.buffer.size().saturating_sub(self.offset) / self.indices_type.size()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read back index `i` relative to `offset`
    pub fn get(&self, i: usize) -> Option<u32> {
        let size = self.indices_type.size();
        let start = self.offset + i * size;
        let data = self.buffer.contents();
        let bytes = data.get(start..start + size)?;
        Some(match self.indices_type {
            IndicesType::UnsignedByte => bytes[0] as u32,
            IndicesType::UnsignedShort => u16::from_ne_bytes([bytes[0], bytes[1]]) as u32,
            IndicesType::UnsignedInt => u32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
        })
    }
}

/// Quads addressable with byte indices (highest vertex 255)
pub const BYTE_INDEX_MAX_QUADS: usize = 256 / 4;

/// Quads addressable with short indices
pub const SHORT_INDEX_MAX_QUADS: usize = 65536 / 4;

const INITIAL_SHORT_INDICES: usize = 512;

/// Index pattern covering `n_indices` entries, rounded up to whole quads
pub fn rectangle_index_pattern(n_indices: usize) -> impl Iterator<Item = u32> {
    let n_quads = n_indices.div_ceil(6);
    (0..n_quads as u32).flat_map(|quad| {
        let v = quad * 4;
        [v, v + 1, v + 2, v, v + 2, v + 3]
    })
}

/// Cache of shared quad index buffers
#[derive(Debug, Default)]
pub struct RectangleIndices {
    byte: Option<Indices>,
    short: Option<Indices>,
    short_len: usize,
    int: Option<Indices>,
    int_len: usize,
}

impl RectangleIndices {
    pub fn new() -> Self {
        Self::default()
    }

    /// Indices able to draw `n_quads` quads from vertex 0
    pub fn get(&mut self, n_quads: usize) -> Indices {
        let n_indices = n_quads * 6;

        if n_quads <= BYTE_INDEX_MAX_QUADS {
            return self
                .byte
                .get_or_insert_with(|| {
                    let pattern: Vec<u8> = rectangle_index_pattern(BYTE_INDEX_MAX_QUADS * 6)
                        .map(|i| i as u8)
                        .collect();
                    Indices::new_u8(&pattern)
                })
                .clone();
        }

        if n_quads <= SHORT_INDEX_MAX_QUADS {
            if self.short_len < n_indices {
                let mut len = self.short_len.max(INITIAL_SHORT_INDICES);
                while len < n_indices {
                    len *= 2;
                }
                let pattern: Vec<u16> = rectangle_index_pattern(len).map(|i| i as u16).collect();
                self.short = Some(Indices::new_u16(&pattern));
                self.short_len = len;
            }
            if let Some(indices) = &self.short {
                return indices.clone();
            }
        }

        if self.int_len < n_indices || self.int.is_none() {
            let mut len = self.int_len.max(SHORT_INDEX_MAX_QUADS * 6);
            while len < n_indices {
                len *= 2;
            }
            let pattern: Vec<u32> = rectangle_index_pattern(len).collect();
            self.int = Some(Indices::new_u32(&pattern));
            self.int_len = len;
        }
        match &self.int {
            Some(indices) => indices.clone(),
            None => Indices::new_u32(&rectangle_index_pattern(n_indices).collect::<Vec<_>>()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern() {
        let pattern: Vec<u32> = rectangle_index_pattern(12).collect();
        assert_eq!(pattern, vec![0, 1, 2, 0, 2, 3, 4, 5, 6, 4, 6, 7]);
        assert_eq!(rectangle_index_pattern(7).count(), 12);
    }

    #[test]
    fn test_byte_indices_up_to_64_quads() {
        let mut cache = RectangleIndices::new();
        let small = cache.get(1);
        assert_eq!(small.indices_type(), IndicesType::UnsignedByte);
        let max = cache.get(64);
        assert!(small.buffer().ptr_eq(max.buffer()));
        assert_eq!(max.len(), 384);
        assert_eq!(max.get(383), Some(255));
    }

    #[test]
    fn test_short_indices_grow_by_doubling() {
        let mut cache = RectangleIndices::new();
        let a = cache.get(65);
        assert_eq!(a.indices_type(), IndicesType::UnsignedShort);
        assert_eq!(a.len(), 516);
        let b = cache.get(80);
        assert!(a.buffer().ptr_eq(b.buffer()));
        let c = cache.get(100);
        assert_eq!(c.len(), 1026);
        assert_eq!(c.get(6), Some(4));
    }

    #[test]
    fn test_int_indices_past_short_range() {
        let mut cache = RectangleIndices::new();
        let indices = cache.get(SHORT_INDEX_MAX_QUADS + 1);
        assert_eq!(indices.indices_type(), IndicesType::UnsignedInt);
        assert!(indices.len() >= (SHORT_INDEX_MAX_QUADS + 1) * 6);
    }
}
