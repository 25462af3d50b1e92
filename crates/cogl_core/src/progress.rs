//! Registry of per-type interpolation functions
//!
//! Property animation interpolates between two values of some type. Types
//! that cannot be interpolated component-wise register a progress function
//! here. The table is process-wide and guarded by one mutex; it is read
//! while animating, never while rendering.

use rustc_hash::FxHashMap;
use std::any::{Any, TypeId};
use std::sync::{Mutex, PoisonError};

/// Interpolate from `initial` to `final_value` at `progress` in `[0, 1]`
pub type ProgressFn<T> = fn(&T, &T, f64) -> T;

struct ProgressEntry {
    type_name: &'static str,
    func: Box<dyn Any + Send>,
}

static PROGRESS_FUNCS: Mutex<Option<FxHashMap<TypeId, ProgressEntry>>> = Mutex::new(None);

/// Install, replace or (with `None`) remove the progress function for `T`
pub fn register_progress_func<T: 'static>(func: Option<ProgressFn<T>>) {
    let mut guard = PROGRESS_FUNCS.lock().unwrap_or_else(PoisonError::into_inner);
    let table = guard.get_or_insert_with(FxHashMap::default);
    match func {
        Some(func) => {
            table.insert(
                TypeId::of::<T>(),
                ProgressEntry {
                    type_name: std::any::type_name::<T>(),
                    func: Box::new(func),
                },
            );
        }
        None => {
            if let Some(old) = table.remove(&TypeId::of::<T>()) {
                tracing::debug!("Removed progress function for {}", old.type_name);
            }
        }
    }
}

/// Whether a progress function is registered for `T`
pub fn has_progress_func<T: 'static>() -> bool {
    let guard = PROGRESS_FUNCS.lock().unwrap_or_else(PoisonError::into_inner);
    guard
        .as_ref()
        .is_some_and(|table| table.contains_key(&TypeId::of::<T>()))
}

/// Run the registered function for `T`; `None` if there is none
pub fn run_progress_func<T: 'static>(initial: &T, final_value: &T, progress: f64) -> Option<T> {
    // Copy the fn pointer out so the lock is not held while it runs
    let func = {
        let guard = PROGRESS_FUNCS.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = guard.as_ref()?.get(&TypeId::of::<T>())?;
        *entry.func.downcast_ref::<ProgressFn<T>>()?
    };
    Some(func(initial, final_value, progress))
}

/// Drop every registration
pub fn clear_progress_funcs() {
    let mut guard = PROGRESS_FUNCS.lock().unwrap_or_else(PoisonError::into_inner);
    *guard = None;
}
