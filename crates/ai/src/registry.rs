use std::collections::HashMap;
use std::sync::Arc;

use typhoon_core::ModelTypeId;

use crate::backend::ModelBackend;

/// Maps model type ids to the backend that trains them.
///
/// Populated once at startup; new model kinds register here without touching
/// the scheduler or executor.
#[derive(Default, Clone)]
pub struct BackendRegistry {
    backends: HashMap<ModelTypeId, Arc<dyn ModelBackend>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the backend for a model type.
    pub fn register_backend<B>(&mut self, model_type_id: ModelTypeId, backend: B)
    where
        B: ModelBackend,
    {
        self.backends.insert(model_type_id, Arc::new(backend));
    }

    pub fn register_shared(&mut self, model_type_id: ModelTypeId, backend: Arc<dyn ModelBackend>) {
        self.backends.insert(model_type_id, backend);
    }

    pub fn get_backend(&self, model_type_id: ModelTypeId) -> Option<Arc<dyn ModelBackend>> {
        self.backends.get(&model_type_id).cloned()
    }

    pub fn model_type_ids(&self) -> impl Iterator<Item = ModelTypeId> + '_ {
        self.backends.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }
}

impl core::fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let mut ids: Vec<_> = self.backends.keys().map(|id| id.get()).collect();
        ids.sort_unstable();
        f.debug_struct("BackendRegistry")
            .field("model_type_ids", &ids)
            .finish()
    }
}
