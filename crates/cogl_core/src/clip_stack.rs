//! Persistent clip stacks
//!
//! A clip stack is an immutable linked list of clip entries. Pushing a clip
//! returns a new top that shares its parent with every other stack pushed
//! from the same base, so identical clip state is the same allocation and
//! can be compared by pointer. `None` stands for "no clipping".

use crate::matrix::Matrix;
use std::rc::Rc;

/// What a single clip entry restricts drawing to
#[derive(Clone, Debug, PartialEq)]
pub enum ClipEntryKind {
    /// Rectangle in model space, with the modelview it was pushed under
    Rect {
        x0: f32,
        y0: f32,
        x1: f32,
        y1: f32,
        modelview: Matrix,
    },
    /// Rectangle already in device coordinates
    WindowRect { x0: i32, y0: i32, x1: i32, y1: i32 },
    /// Arbitrary shape drawn into the stencil buffer. Only its bounds are
    /// known here; `shape_id` identifies the geometry to the driver.
    Primitive {
        shape_id: u64,
        x0: f32,
        y0: f32,
        x1: f32,
        y1: f32,
        modelview: Matrix,
    },
}

/// Device-space bounds, `x1`/`y1` exclusive
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClipBounds {
    pub x0: i32,
    pub y0: i32,
    pub x1: i32,
    pub y1: i32,
}

impl ClipBounds {
    pub const UNBOUNDED: ClipBounds = ClipBounds {
        x0: i32::MIN,
        y0: i32::MIN,
        x1: i32::MAX,
        y1: i32::MAX,
    };

    pub fn intersect(&self, other: &ClipBounds) -> ClipBounds {
        ClipBounds {
            x0: self.x0.max(other.x0),
            y0: self.y0.max(other.y0),
            x1: self.x1.min(other.x1),
            y1: self.y1.min(other.y1),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.x1 <= self.x0 || self.y1 <= self.y0
    }

    /// Whether these bounds lie entirely inside the given rectangle
    pub fn within(&self, x0: f32, y0: f32, x1: f32, y1: f32) -> bool {
        self.x0 as f32 >= x0 && self.y0 as f32 >= y0 && self.x1 as f32 <= x1 && self.y1 as f32 <= y1
    }
}

#[derive(Debug)]
struct ClipStackNode {
    parent: Option<ClipStack>,
    kind: ClipEntryKind,
    /// Bounds of this entry intersected with all of its ancestors
    bounds: ClipBounds,
}

/// Reference-counted handle to the top entry of a clip stack
#[derive(Clone, Debug)]
pub struct ClipStack(Rc<ClipStackNode>);

impl ClipStack {
    fn push(parent: Option<&ClipStack>, kind: ClipEntryKind) -> ClipStack {
        let own = entry_bounds(&kind);
        let bounds = match parent {
            Some(p) => own.intersect(&p.0.bounds),
            None => own,
        };
        ClipStack(Rc::new(ClipStackNode {
            parent: parent.cloned(),
            kind,
            bounds,
        }))
    }

    pub fn push_rectangle(
        parent: Option<&ClipStack>,
        x0: f32,
        y0: f32,
        x1: f32,
        y1: f32,
        modelview: &Matrix,
    ) -> ClipStack {
        Self::push(
            parent,
            ClipEntryKind::Rect {
                x0,
                y0,
                x1,
                y1,
                modelview: *modelview,
            },
        )
    }

    pub fn push_window_rectangle(
        parent: Option<&ClipStack>,
        x: i32,
        y: i32,
        width: i32,
        height: i32,
    ) -> ClipStack {
        Self::push(
            parent,
            ClipEntryKind::WindowRect {
                x0: x,
                y0: y,
                x1: x.saturating_add(width),
                y1: y.saturating_add(height),
            },
        )
    }

    pub fn push_primitive(
        parent: Option<&ClipStack>,
        shape_id: u64,
        bounds: [f32; 4],
        modelview: &Matrix,
    ) -> ClipStack {
        let [x0, y0, x1, y1] = bounds;
        Self::push(
            parent,
            ClipEntryKind::Primitive {
                shape_id,
                x0,
                y0,
                x1,
                y1,
                modelview: *modelview,
            },
        )
    }

    /// The stack with the top entry removed
    pub fn pop(&self) -> Option<ClipStack> {
        self.0.parent.clone()
    }

    pub fn parent(&self) -> Option<&ClipStack> {
        self.0.parent.as_ref()
    }

    pub fn kind(&self) -> &ClipEntryKind {
        &self.0.kind
    }

    /// Bounds of the whole stack from this entry down
    pub fn bounds(&self) -> ClipBounds {
        self.0.bounds
    }

    /// Identity comparison, which is how batching decides clip state is shared
    pub fn ptr_eq(a: Option<&ClipStack>, b: Option<&ClipStack>) -> bool {
        match (a, b) {
            (Some(a), Some(b)) => Rc::ptr_eq(&a.0, &b.0),
            (None, None) => true,
            _ => false,
        }
    }

    /// Iterate entries from the top of the stack to the bottom
    pub fn iter(&self) -> ClipStackIter<'_> {
        ClipStackIter { next: Some(self) }
    }

    /// Whether `ancestor` is this entry or one below it
    pub fn has_ancestor(&self, ancestor: &ClipStack) -> bool {
        self.iter().any(|entry| Rc::ptr_eq(&entry.0, &ancestor.0))
    }

    pub fn depth(&self) -> usize {
        self.iter().count()
    }

    pub fn ref_count(&self) -> usize {
        Rc::strong_count(&self.0)
    }
}

pub struct ClipStackIter<'a> {
    next: Option<&'a ClipStack>,
}

impl<'a> Iterator for ClipStackIter<'a> {
    type Item = &'a ClipStack;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next?;
        self.next = current.parent();
        Some(current)
    }
}

fn entry_bounds(kind: &ClipEntryKind) -> ClipBounds {
    match kind {
        ClipEntryKind::WindowRect { x0, y0, x1, y1 } => ClipBounds {
            x0: *x0,
            y0: *y0,
            x1: *x1,
            y1: *y1,
        },
        ClipEntryKind::Rect {
            x0,
            y0,
            x1,
            y1,
            modelview,
        }
        | ClipEntryKind::Primitive {
            x0,
            y0,
            x1,
            y1,
            modelview,
            ..
        } => transformed_bounds(modelview, *x0, *y0, *x1, *y1),
    }
}

fn transformed_bounds(modelview: &Matrix, x0: f32, y0: f32, x1: f32, y1: f32) -> ClipBounds {
    let mut min_x = f32::INFINITY;
    let mut min_y = f32::INFINITY;
    let mut max_x = f32::NEG_INFINITY;
    let mut max_y = f32::NEG_INFINITY;
    for (x, y) in [(x0, y0), (x0, y1), (x1, y1), (x1, y0)] {
        let [tx, ty, _, tw] = modelview.transform_point(x, y, 0.0, 1.0);
        let (tx, ty) = if tw != 0.0 && tw != 1.0 {
            (tx / tw, ty / tw)
        } else {
            (tx, ty)
        };
        min_x = min_x.min(tx);
        min_y = min_y.min(ty);
        max_x = max_x.max(tx);
        max_y = max_y.max(ty);
    }
    ClipBounds {
        x0: min_x.floor() as i32,
        y0: min_y.floor() as i32,
        x1: max_x.ceil() as i32,
        y1: max_y.ceil() as i32,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_not_structure() {
        let a = ClipStack::push_window_rectangle(None, 0, 0, 10, 10);
        let b = ClipStack::push_window_rectangle(None, 0, 0, 10, 10);
        assert!(!ClipStack::ptr_eq(Some(&a), Some(&b)));
        let a2 = a.clone();
        assert!(ClipStack::ptr_eq(Some(&a), Some(&a2)));
        assert!(ClipStack::ptr_eq(None, None));
    }

    #[test]
    fn test_bounds_intersect_with_parent() {
        let outer = ClipStack::push_window_rectangle(None, 0, 0, 100, 100);
        let inner =
            ClipStack::push_rectangle(Some(&outer), 50.0, 50.0, 150.0, 80.0, &Matrix::IDENTITY);
        assert_eq!(
            inner.bounds(),
            ClipBounds {
                x0: 50,
                y0: 50,
                x1: 100,
                y1: 80
            }
        );
        assert_eq!(inner.depth(), 2);
        assert!(inner.has_ancestor(&outer));
        assert!(ClipStack::ptr_eq(inner.pop().as_ref(), Some(&outer)));
    }

    #[test]
    fn test_rect_bounds_follow_modelview() {
        let mv = Matrix::translation(10.0, 5.0, 0.0);
        let clip = ClipStack::push_rectangle(None, 0.0, 0.0, 4.5, 4.5, &mv);
        assert_eq!(
            clip.bounds(),
            ClipBounds {
                x0: 10,
                y0: 5,
                x1: 15,
                y1: 10
            }
        );
    }
}
