//! Background loads that fill the [MetadataCache].

use crate::cache::MetadataCache;
use crate::metadata::MetadataEntity;
use crate::remote::Remote;
use crate::tasks::{Callback, Operation, Outcome};
use smbdoc_types::ResourceKey;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Load a document that isn't cached yet.
///
/// The entity is cached on success, even if the task was cancelled
/// meanwhile. A failure is stored with [MetadataCache::put_error].
pub struct LoadDocumentTask {
    key: ResourceKey,
    remote: Remote,
    cache: Arc<MetadataCache>,
    callback: Callback<ResourceKey>,
}

impl LoadDocumentTask {
    pub fn new(
        key: ResourceKey,
        remote: Remote,
        cache: Arc<MetadataCache>,
        callback: Callback<ResourceKey>,
    ) -> Self {
        Self {
            key,
            remote,
            cache,
            callback,
        }
    }
}

impl Operation for LoadDocumentTask {
    type Output = Arc<MetadataEntity>;

    fn run(&mut self, _cancel: &CancellationToken) -> Outcome<Arc<MetadataEntity>> {
        match MetadataEntity::from_remote(&self.key, &self.remote) {
            Ok(entity) => Outcome::Succeeded(Arc::new(entity)),
            Err(err) => Outcome::Failed(err),
        }
    }

    fn merge(&mut self, outcome: &Outcome<Arc<MetadataEntity>>) {
        match outcome {
            Outcome::Succeeded(entity) | Outcome::Cancelled(Some(entity)) => {
                self.cache.put(Arc::clone(entity));
            }
            Outcome::Failed(err) => {
                log::warn!("{}: failed to load: {err}", self.key);
                self.cache.put_error(&self.key, err.clone());
            }
            Outcome::Cancelled(None) => {}
        }
    }

    fn finish(self, outcome: Outcome<Arc<MetadataEntity>>) {
        (self.callback)(outcome.completion(self.key));
    }
}

/// List a cached container and cache its children.
///
/// Children obtained before a cancellation are still cached.
pub struct LoadChildrenTask {
    entity: Arc<MetadataEntity>,
    remote: Remote,
    cache: Arc<MetadataCache>,
    callback: Callback<Arc<MetadataEntity>>,
}

impl LoadChildrenTask {
    pub fn new(
        entity: Arc<MetadataEntity>,
        remote: Remote,
        cache: Arc<MetadataCache>,
        callback: Callback<Arc<MetadataEntity>>,
    ) -> Self {
        Self {
            entity,
            remote,
            cache,
            callback,
        }
    }
}

impl Operation for LoadChildrenTask {
    type Output = Vec<Arc<MetadataEntity>>;

    fn run(&mut self, _cancel: &CancellationToken) -> Outcome<Vec<Arc<MetadataEntity>>> {
        match self.entity.load_children(&self.remote) {
            Ok(children) => Outcome::Succeeded(children),
            Err(err) => Outcome::Failed(err),
        }
    }

    fn merge(&mut self, outcome: &Outcome<Vec<Arc<MetadataEntity>>>) {
        if let Outcome::Succeeded(children) | Outcome::Cancelled(Some(children)) = outcome {
            for child in children {
                self.cache.put(Arc::clone(child));
            }
        }
    }

    fn finish(self, outcome: Outcome<Vec<Arc<MetadataEntity>>>) {
        (self.callback)(outcome.completion(self.entity));
    }
}

/// Stat a set of entities, one after the other.
///
/// A failure on one entity doesn't stop the others; it is only
/// recorded on the entity. Cancellation is checked between
/// entities.
pub struct LoadStatTask {
    entities: Vec<Arc<MetadataEntity>>,
    remote: Remote,
    callback: Callback<Vec<Arc<MetadataEntity>>>,
}

impl LoadStatTask {
    pub fn new(
        entities: Vec<Arc<MetadataEntity>>,
        remote: Remote,
        callback: Callback<Vec<Arc<MetadataEntity>>>,
    ) -> Self {
        Self {
            entities,
            remote,
            callback,
        }
    }
}

impl Operation for LoadStatTask {
    /// Number of entities whose stat was loaded.
    type Output = usize;

    fn run(&mut self, cancel: &CancellationToken) -> Outcome<usize> {
        let mut loaded = 0;
        for entity in &self.entities {
            if cancel.is_cancelled() {
                return Outcome::Cancelled(Some(loaded));
            }
            // Failures are logged and remembered by the entity.
            if entity.load_stat(&self.remote).is_ok() {
                loaded += 1;
            }
        }
        log::debug!("stat loaded for {loaded}/{} entities", self.entities.len());

        Outcome::Succeeded(loaded)
    }

    fn finish(self, outcome: Outcome<usize>) {
        (self.callback)(outcome.completion(self.entities));
    }
}
