//! Frame Graph Blackboard
//!
//! A per-frame typed key-value store for loose data shared between
//! render modules (resolution-dependent handles, pass outputs, etc.).
//! Cleared at the start of every frame; anything left in it never
//! outlives the frame that wrote it.

use std::any::{Any, TypeId};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

/// Typed per-frame storage shared by all builders of a frame.
#[derive(Default)]
pub struct Blackboard {
    entries: Mutex<FxHashMap<TypeId, Box<dyn Any + Send + Sync>>>,
}

impl Blackboard {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a value, replacing any previous value of the same type.
    pub fn insert<T: Any + Send + Sync>(&self, value: T) {
        self.entries
            .lock()
            .insert(TypeId::of::<T>(), Box::new(value));
    }

    /// Clones the stored value of type `T` out of the blackboard.
    #[must_use]
    pub fn get<T: Any + Send + Sync + Clone>(&self) -> Option<T> {
        self.entries
            .lock()
            .get(&TypeId::of::<T>())
            .and_then(|value| value.downcast_ref::<T>())
            .cloned()
    }

    /// Runs `f` against the stored value of type `T`, if present.
    pub fn with<T: Any + Send + Sync, R>(&self, f: impl FnOnce(&T) -> R) -> Option<R> {
        self.entries
            .lock()
            .get(&TypeId::of::<T>())
            .and_then(|value| value.downcast_ref::<T>())
            .map(f)
    }

    /// `true` if a value of type `T` is stored.
    #[must_use]
    pub fn contains<T: Any + Send + Sync>(&self) -> bool {
        self.entries.lock().contains_key(&TypeId::of::<T>())
    }

    /// Drops every entry. Called at the start of each frame.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, PartialEq, Debug)]
    struct ShadowAtlasIndex(u32);

    #[test]
    fn test_insert_get_clear() {
        let blackboard = Blackboard::new();
        assert!(blackboard.get::<ShadowAtlasIndex>().is_none());

        blackboard.insert(ShadowAtlasIndex(7));
        assert_eq!(blackboard.get::<ShadowAtlasIndex>(), Some(ShadowAtlasIndex(7)));
        assert!(blackboard.contains::<ShadowAtlasIndex>());

        blackboard.clear();
        assert!(blackboard.get::<ShadowAtlasIndex>().is_none());
    }
}
