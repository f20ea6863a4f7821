//! Scene documents and asset enumeration
//!
//! The orchestrator never parses scene internals itself; it asks a
//! [`SceneReader`] for the asset references of a document. This module also
//! ships [`SceneDocument`], a minimal structured document with nodes,
//! materials and texture slots, and [`StructuredSceneReader`] to walk it.

use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use thiserror::Error;

use crate::source::AssetSource;

/// One asset a scene needs
#[derive(Debug, Clone)]
pub struct AssetReference {
    pub asset_id: String,
    pub source: AssetSource,
}

impl AssetReference {
    pub fn new(asset_id: impl Into<String>, source: AssetSource) -> Self {
        Self {
            asset_id: asset_id.into(),
            source,
        }
    }

    /// Reference whose id is derived from the source itself
    pub fn from_source(source: AssetSource) -> Self {
        Self {
            asset_id: source.derive_asset_id(),
            source,
        }
    }
}

/// Error type for scene enumeration
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SceneError {
    #[error("Malformed scene document: {0}")]
    Malformed(String),

    #[error("Invalid asset reference at {path}: {reason}")]
    InvalidReference { path: String, reason: String },
}

/// Yields the asset references of a scene document
pub trait SceneReader<D: ?Sized>: Send + Sync {
    fn extract_asset_references(&self, document: &D) -> Result<Vec<AssetReference>, SceneError>;
}

impl<D, F> SceneReader<D> for F
where
    D: ?Sized,
    F: Fn(&D) -> Result<Vec<AssetReference>, SceneError> + Send + Sync,
{
    fn extract_asset_references(&self, document: &D) -> Result<Vec<AssetReference>, SceneError> {
        self(document)
    }
}

/// Where one asset slot gets its bytes
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AssetSlot {
    /// Explicit cache id; derived from `uri` when absent
    #[serde(default)]
    pub id: Option<String>,
    /// Remote URL or `data:` URL
    pub uri: String,
    #[serde(default)]
    pub size: Option<u64>,
}

impl AssetSlot {
    /// Slot for `uri` with a derived id
    pub fn remote(uri: impl Into<String>) -> Self {
        Self {
            id: None,
            uri: uri.into(),
            size: None,
        }
    }

    /// Use `id` as the cache key instead of the derived one
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    fn to_reference(&self, path: &str) -> Result<AssetReference, SceneError> {
        let uri = self.uri.trim();
        if uri.is_empty() {
            return Err(SceneError::InvalidReference {
                path: path.to_string(),
                reason: "empty uri".to_string(),
            });
        }

        let source = if uri.starts_with("data:") {
            AssetSource::data_url(uri)
        } else {
            match self.size {
                Some(size) => AssetSource::remote_with_size(uri, size),
                None => AssetSource::remote(uri),
            }
        };

        Ok(match self.id.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => AssetReference::new(id, source),
            _ => AssetReference::from_source(source),
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct MaterialDef {
    pub name: String,
    /// Texture slots keyed by slot name (`base_color`, `normal`, ...)
    #[serde(default)]
    pub textures: BTreeMap<String, AssetSlot>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SceneNode {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub mesh: Option<AssetSlot>,
    /// Index into [`SceneDocument::materials`]
    #[serde(default)]
    pub material: Option<usize>,
    #[serde(default)]
    pub children: Vec<SceneNode>,
}

/// A scene: a forest of nodes plus a shared material table
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SceneDocument {
    #[serde(default)]
    pub nodes: Vec<SceneNode>,
    #[serde(default)]
    pub materials: Vec<MaterialDef>,
}

impl SceneDocument {
    /// Parse a scene from TOML
    pub fn from_toml_str(input: &str) -> Result<Self, SceneError> {
        toml::from_str(input).map_err(|e| SceneError::Malformed(e.to_string()))
    }
}

/// Walks a [`SceneDocument`] depth-first
///
/// References come out in pre-order: a node's mesh, then its material's
/// textures in slot-name order, then its children. The first occurrence of
/// an asset id wins.
#[derive(Debug, Default, Clone, Copy)]
pub struct StructuredSceneReader;

impl SceneReader<SceneDocument> for StructuredSceneReader {
    fn extract_asset_references(
        &self,
        document: &SceneDocument,
    ) -> Result<Vec<AssetReference>, SceneError> {
        let mut seen = HashSet::new();
        let mut refs = Vec::new();
        let mut push = |reference: AssetReference| {
            if seen.insert(reference.asset_id.clone()) {
                refs.push(reference);
            }
        };

        let mut stack: Vec<(&SceneNode, String)> = document
            .nodes
            .iter()
            .enumerate()
            .rev()
            .map(|(i, node)| (node, format!("nodes[{i}]")))
            .collect();

        while let Some((node, path)) = stack.pop() {
            if let Some(mesh) = &node.mesh {
                push(mesh.to_reference(&format!("{path}.mesh"))?);
            }

            if let Some(index) = node.material {
                let material = document.materials.get(index).ok_or_else(|| {
                    SceneError::InvalidReference {
                        path: format!("{path}.material"),
                        reason: format!(
                            "material index {index} out of range ({} defined)",
                            document.materials.len()
                        ),
                    }
                })?;
                for (slot, texture) in &material.textures {
                    push(texture.to_reference(&format!("materials[{index}].textures.{slot}"))?);
                }
            }

            for (i, child) in node.children.iter().enumerate().rev() {
                stack.push((child, format!("{path}.children[{i}]")));
            }
        }

        Ok(refs)
    }
}
