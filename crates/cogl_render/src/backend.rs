//! Pipeline backends
//!
//! A backend turns pipeline state into driver state: fixed function, ARB
//! fragment programs or generated GLSL. The context holds an ordered
//! preference list; the first backend able to handle a pipeline is used and
//! the choice is cached on the pipeline until its state changes.

use crate::pipeline::{PipelineId, PipelineStore, ProgramLanguage};

/// Backend used to flush a pipeline
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Backend {
    Fixed,
    Arbfp,
    Glsl,
}

impl Backend {
    pub const DEFAULT_PREFERENCE: [Backend; 3] = [Backend::Glsl, Backend::Arbfp, Backend::Fixed];

    /// Whether this backend can express the state of `p`
    pub fn can_handle(self, store: &PipelineStore, p: PipelineId) -> bool {
        let program = store.user_program(p).map(|program| program.language());
        match self {
            Backend::Fixed => program.is_none(),
            Backend::Arbfp => matches!(program, None | Some(ProgramLanguage::Arbfp)),
            Backend::Glsl => matches!(program, None | Some(ProgramLanguage::Glsl)),
        }
    }
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Backend::Fixed => "fixed",
            Backend::Arbfp => "arbfp",
            Backend::Glsl => "glsl",
        };
        f.write_str(name)
    }
}

impl PipelineStore {
    /// Backend to flush `p` with, reusing the cached choice if any
    pub fn resolve_backend(&mut self, p: PipelineId, preference: &[Backend]) -> Backend {
        if let Some(backend) = self.backend(p) {
            return backend;
        }
        let backend = match preference.iter().copied().find(|b| b.can_handle(self, p)) {
            Some(backend) => backend,
            None => {
                tracing::warn!(
                    "No usable backend for pipeline {:?} among {:?}, falling back to fixed function",
                    p,
                    preference
                );
                Backend::Fixed
            }
        };
        tracing::trace!("pipeline {:?} uses the {} backend", p, backend);
        self.set_backend(p, backend);
        backend
    }
}
