//! 4x4 matrices and matrix stacks
//!
//! Matrices are column-major, matching what the GL driver expects. The
//! journal transforms quad corners through the current modelview on the
//! CPU, and compares captured matrices byte-for-byte when it has to
//! batch by modelview.

use crate::error::{CoreError, Result};
use bytemuck::{Pod, Zeroable};
use smallvec::SmallVec;

/// 4x4 transformation matrix (column-major)
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct Matrix {
    pub cols: [[f32; 4]; 4],
}

impl Default for Matrix {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Matrix {
    pub const IDENTITY: Matrix = Matrix {
        cols: [
            [1.0, 0.0, 0.0, 0.0],
            [0.0, 1.0, 0.0, 0.0],
            [0.0, 0.0, 1.0, 0.0],
            [0.0, 0.0, 0.0, 1.0],
        ],
    };

    pub fn translation(x: f32, y: f32, z: f32) -> Self {
        Self {
            cols: [
                [1.0, 0.0, 0.0, 0.0],
                [0.0, 1.0, 0.0, 0.0],
                [0.0, 0.0, 1.0, 0.0],
                [x, y, z, 1.0],
            ],
        }
    }

    pub fn scaling(x: f32, y: f32, z: f32) -> Self {
        Self {
            cols: [
                [x, 0.0, 0.0, 0.0],
                [0.0, y, 0.0, 0.0],
                [0.0, 0.0, z, 0.0],
                [0.0, 0.0, 0.0, 1.0],
            ],
        }
    }

    /// Rotation of `degrees` around the axis `(x, y, z)`
    pub fn rotation(degrees: f32, x: f32, y: f32, z: f32) -> Self {
        let len = (x * x + y * y + z * z).sqrt();
        if len == 0.0 {
            return Self::IDENTITY;
        }
        let (x, y, z) = (x / len, y / len, z / len);
        let (s, c) = degrees.to_radians().sin_cos();
        let t = 1.0 - c;
        Self {
            cols: [
                [t * x * x + c, t * x * y + s * z, t * x * z - s * y, 0.0],
                [t * x * y - s * z, t * y * y + c, t * y * z + s * x, 0.0],
                [t * x * z + s * y, t * y * z - s * x, t * z * z + c, 0.0],
                [0.0, 0.0, 0.0, 1.0],
            ],
        }
    }

    pub fn orthographic(left: f32, right: f32, bottom: f32, top: f32, near: f32, far: f32) -> Self {
        let rl = right - left;
        let tb = top - bottom;
        let fnr = far - near;
        Self {
            cols: [
                [2.0 / rl, 0.0, 0.0, 0.0],
                [0.0, 2.0 / tb, 0.0, 0.0],
                [0.0, 0.0, -2.0 / fnr, 0.0],
                [
                    -(right + left) / rl,
                    -(top + bottom) / tb,
                    -(far + near) / fnr,
                    1.0,
                ],
            ],
        }
    }

    pub fn frustum(left: f32, right: f32, bottom: f32, top: f32, near: f32, far: f32) -> Self {
        let rl = right - left;
        let tb = top - bottom;
        let fnr = far - near;
        Self {
            cols: [
                [2.0 * near / rl, 0.0, 0.0, 0.0],
                [0.0, 2.0 * near / tb, 0.0, 0.0],
                [(right + left) / rl, (top + bottom) / tb, -(far + near) / fnr, -1.0],
                [0.0, 0.0, -2.0 * far * near / fnr, 0.0],
            ],
        }
    }

    /// Multiply two matrices (`self * other`)
    pub fn mul(&self, other: &Matrix) -> Matrix {
        let mut result = [[0.0f32; 4]; 4];
        for (i, col) in result.iter_mut().enumerate() {
            for (j, out) in col.iter_mut().enumerate() {
                for k in 0..4 {
                    *out += self.cols[k][j] * other.cols[i][k];
                }
            }
        }
        Matrix { cols: result }
    }

    /// Transform a homogeneous point
    pub fn transform_point(&self, x: f32, y: f32, z: f32, w: f32) -> [f32; 4] {
        let c = &self.cols;
        [
            c[0][0] * x + c[1][0] * y + c[2][0] * z + c[3][0] * w,
            c[0][1] * x + c[1][1] * y + c[2][1] * z + c[3][1] * w,
            c[0][2] * x + c[1][2] * y + c[2][2] * z + c[3][2] * w,
            c[0][3] * x + c[1][3] * y + c[2][3] * z + c[3][3] * w,
        ]
    }

    pub fn is_identity(&self) -> bool {
        self.bitwise_eq(&Self::IDENTITY)
    }

    /// True when x/y map independently (scale and translate only, no
    /// rotation, shear or perspective in the 2D plane)
    pub fn is_axis_aligned_2d(&self) -> bool {
        let c = &self.cols;
        c[0][1] == 0.0
            && c[1][0] == 0.0
            && c[2][0] == 0.0
            && c[2][1] == 0.0
            && c[0][3] == 0.0
            && c[1][3] == 0.0
            && c[2][3] == 0.0
            && c[3][3] == 1.0
    }

    /// Byte-wise comparison; `-0.0` and `0.0` differ, NaNs compare equal
    /// to themselves
    pub fn bitwise_eq(&self, other: &Matrix) -> bool {
        bytemuck::bytes_of(self) == bytemuck::bytes_of(other)
    }
}

/// A stack of matrices with change tracking
///
/// The top entry is the current matrix. `age` increases on every change so
/// a consumer can tell whether the matrix it last flushed is still current.
#[derive(Clone, Debug)]
pub struct MatrixStack {
    stack: SmallVec<[Matrix; 8]>,
    age: u64,
    flushed_age: Option<u64>,
}

impl Default for MatrixStack {
    fn default() -> Self {
        Self::new()
    }
}

impl MatrixStack {
    pub fn new() -> Self {
        let mut stack = SmallVec::new();
        stack.push(Matrix::IDENTITY);
        Self {
            stack,
            age: 0,
            flushed_age: None,
        }
    }

    pub fn push(&mut self) {
        let top = self.get();
        self.stack.push(top);
    }

    pub fn pop(&mut self) -> Result<()> {
        if self.stack.len() <= 1 {
            tracing::warn!("Matrix stack pop without a matching push");
            return Err(CoreError::StackUnderflow);
        }
        self.stack.pop();
        self.touch();
        Ok(())
    }

    /// Current matrix
    pub fn get(&self) -> Matrix {
        self.stack.last().copied().unwrap_or_default()
    }

    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    pub fn age(&self) -> u64 {
        self.age
    }

    pub fn set(&mut self, matrix: &Matrix) {
        *self.top_mut() = *matrix;
        self.touch();
    }

    pub fn load_identity(&mut self) {
        self.set(&Matrix::IDENTITY);
    }

    pub fn multiply(&mut self, matrix: &Matrix) {
        let product = self.get().mul(matrix);
        self.set(&product);
    }

    pub fn translate(&mut self, x: f32, y: f32, z: f32) {
        self.multiply(&Matrix::translation(x, y, z));
    }

    pub fn scale(&mut self, x: f32, y: f32, z: f32) {
        self.multiply(&Matrix::scaling(x, y, z));
    }

    pub fn rotate(&mut self, degrees: f32, x: f32, y: f32, z: f32) {
        self.multiply(&Matrix::rotation(degrees, x, y, z));
    }

    /// Whether the current matrix differs from the last one marked flushed
    pub fn needs_flush(&self) -> bool {
        self.flushed_age != Some(self.age)
    }

    pub fn mark_flushed(&mut self) {
        self.flushed_age = Some(self.age);
    }

    /// Forget what was flushed, e.g. after another user of the driver
    /// changed the matrix behind our back
    pub fn dirty(&mut self) {
        self.flushed_age = None;
    }

    fn top_mut(&mut self) -> &mut Matrix {
        if self.stack.is_empty() {
            self.stack.push(Matrix::IDENTITY);
        }
        let last = self.stack.len() - 1;
        &mut self.stack[last]
    }

    fn touch(&mut self) {
        self.age += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_translate_then_scale() {
        let m = Matrix::translation(10.0, 20.0, 0.0).mul(&Matrix::scaling(2.0, 3.0, 1.0));
        assert_eq!(m.transform_point(1.0, 1.0, 0.0, 1.0), [12.0, 23.0, 0.0, 1.0]);
        assert!(m.is_axis_aligned_2d());
    }

    #[test]
    fn test_rotation_is_not_axis_aligned() {
        let m = Matrix::rotation(90.0, 0.0, 0.0, 1.0);
        let p = m.transform_point(1.0, 0.0, 0.0, 1.0);
        assert!(p[0].abs() < 1e-6);
        assert!((p[1] - 1.0).abs() < 1e-6);
        assert!(!m.is_axis_aligned_2d());
    }

    #[test]
    fn test_stack_push_pop() {
        let mut stack = MatrixStack::new();
        stack.push();
        stack.translate(5.0, 0.0, 0.0);
        assert_eq!(stack.get().cols[3][0], 5.0);
        stack.pop().unwrap();
        assert!(stack.get().is_identity());
        assert_eq!(stack.pop(), Err(CoreError::StackUnderflow));
    }

    #[test]
    fn test_flush_tracking() {
        let mut stack = MatrixStack::new();
        assert!(stack.needs_flush());
        stack.mark_flushed();
        assert!(!stack.needs_flush());
        stack.scale(2.0, 2.0, 1.0);
        assert!(stack.needs_flush());
    }

    #[test]
    fn test_bitwise_eq_distinguishes_signed_zero() {
        let a = Matrix::translation(0.0, 0.0, 0.0);
        let b = Matrix::translation(-0.0, 0.0, 0.0);
        assert_eq!(a, b);
        assert!(!a.bitwise_eq(&b));
    }
}
