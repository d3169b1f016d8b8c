// Copyright 2026 the Strato Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Registry of externally produced textures.
//!
//! Platforms register video frames, camera previews and similar content
//! under an integer id; texture layers look the id up at paint time. An id
//! that is missing (the platform unregistered it mid-frame) is a defined
//! no-op, never an error.

use std::collections::HashMap;
use std::sync::Arc;

use peniko::kurbo::Rect;

use crate::canvas::Canvas;

/// Identifier assigned by the platform side when registering a texture.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct TextureId(pub i64);

/// Externally rendered content that can be painted into a frame.
pub trait ExternalTexture: Send + Sync {
    /// Paints the current contents into `bounds`.
    ///
    /// `freeze` asks the texture to keep presenting the frame it already
    /// has instead of latching a newer one (used while screenshotting).
    fn paint(&self, canvas: &mut dyn Canvas, bounds: Rect, freeze: bool);

    /// Notifies the texture that the owning device context was lost and any
    /// device resources it holds are invalid.
    fn on_context_destroyed(&self) {}
}

/// Maps [`TextureId`]s to live textures.
#[derive(Default)]
pub struct TextureRegistry {
    textures: HashMap<TextureId, Arc<dyn ExternalTexture>>,
}

impl TextureRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `texture`, replacing any previous registration of the id.
    pub fn register(&mut self, id: TextureId, texture: Arc<dyn ExternalTexture>) {
        if self.textures.insert(id, texture).is_some() {
            log::debug!("texture {id:?} re-registered, replacing previous entry");
        }
    }

    pub fn unregister(&mut self, id: TextureId) {
        if self.textures.remove(&id).is_none() {
            log::debug!("unregister of unknown texture {id:?} ignored");
        }
    }

    pub fn get(&self, id: TextureId) -> Option<Arc<dyn ExternalTexture>> {
        self.textures.get(&id).cloned()
    }

    /// Broadcasts a device-context loss to every registered texture.
    pub fn on_context_destroyed(&self) {
        for texture in self.textures.values() {
            texture.on_context_destroyed();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingTexture(AtomicUsize);

    impl ExternalTexture for CountingTexture {
        fn paint(&self, _canvas: &mut dyn Canvas, _bounds: Rect, _freeze: bool) {
            self.0.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[test]
    fn lookup_miss_is_none() {
        let registry = TextureRegistry::new();
        assert!(registry.get(TextureId(42)).is_none());
    }

    #[test]
    fn register_and_unregister() {
        let mut registry = TextureRegistry::new();
        registry.register(TextureId(1), Arc::new(CountingTexture(AtomicUsize::new(0))));
        assert!(registry.get(TextureId(1)).is_some());
        registry.unregister(TextureId(1));
        assert!(registry.get(TextureId(1)).is_none());
    }
}
