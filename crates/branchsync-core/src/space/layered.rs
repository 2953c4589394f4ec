//! Prefix-routing space
//!
//! Mounts child spaces under name prefixes, the way a repository mounts a
//! remote peer under `origin/`. Point operations strip the first matching
//! prefix and delegate; enumeration merges the children's (already sorted)
//! listings into one globally sorted, de-duplicated stream so the ordering
//! invariant holds even when prefixes interleave lexicographically.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;

use crate::branch::{Branch, Params};
use crate::error::{SyncError, SyncResult};

use super::{Space, Span, Visit};

/// One mount: a child space visible under `prefix`
#[derive(Clone)]
pub struct Layer {
    pub prefix: String,
    pub target: Arc<dyn Space>,
}

/// Space routing by name prefix; earlier layers shadow later ones
pub struct LayeredSpace {
    layers: Vec<Layer>,
}

impl LayeredSpace {
    /// Build from mounts, searched in order. Include a final `""` layer to
    /// catch unprefixed names.
    pub fn new(layers: Vec<Layer>) -> Self {
        Self { layers }
    }

    fn route<'a>(&'a self, name: &'a str) -> Option<(&'a Layer, &'a str)> {
        self.layers.iter().find_map(|layer| {
            name.strip_prefix(layer.prefix.as_str())
                .map(|rest| (layer, rest))
        })
    }
}

#[async_trait]
impl Space for LayeredSpace {
    async fn create(&self, name: &str, params: Params) -> SyncResult<Branch> {
        match self.route(name) {
            Some((layer, rest)) => layer.target.create(rest, params).await,
            None => Err(SyncError::InvalidOperation(format!(
                "no space mounted for name {:?}",
                name
            ))),
        }
    }

    async fn get(&self, name: &str) -> SyncResult<Branch> {
        match self.route(name) {
            Some((layer, rest)) => layer.target.get(rest).await,
            None => Err(SyncError::NotExist(name.to_string())),
        }
    }

    async fn delete(&self, name: &str) -> SyncResult<()> {
        match self.route(name) {
            Some((layer, rest)) => layer.target.delete(rest).await,
            None => Err(SyncError::NotExist(name.to_string())),
        }
    }

    async fn exists(&self, name: &str) -> SyncResult<bool> {
        match self.route(name) {
            Some((layer, rest)) => layer.target.exists(rest).await,
            None => Ok(false),
        }
    }

    async fn for_each(&self, span: Span, visit: Visit<'_>) -> SyncResult<()> {
        let mut merged = BTreeSet::new();
        for layer in &self.layers {
            let mut qualified = Vec::new();
            layer
                .target
                .for_each(Span::all(), &mut |name| {
                    qualified.push(format!("{}{}", layer.prefix, name));
                    Ok(())
                })
                .await?;
            for name in qualified {
                if span.contains(&name) {
                    merged.insert(name);
                }
            }
        }
        for name in merged {
            visit(&name)?;
        }
        Ok(())
    }
}
