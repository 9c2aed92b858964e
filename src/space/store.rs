//! Regulatory item records and the store that owns their content.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::coordinate::{Coordinate4D, NurembergNumber};
use super::mapper::{CoordinateMapper, ItemMetadata};
use crate::error::{Error, Result};

/// Sample corpus compiled into the binary for offline use.
const BUNDLED_CORPUS: &str = include_str!("../../data/sample_corpus.json");

/// A typed, directed edge to another regulatory item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Crosswalk {
    pub target_id: String,
    /// e.g. "implements", "modifies", "references"
    pub relationship_type: String,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl Crosswalk {
    pub fn new(target_id: impl Into<String>, relationship_type: impl Into<String>) -> Self {
        Self {
            target_id: target_id.into(),
            relationship_type: relationship_type.into(),
            created_at: Utc::now(),
        }
    }
}

/// A regulation, clause or guidance note positioned in the 4D space.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegulatoryItem {
    pub id: String,
    pub tag: String,
    pub content: String,
    pub coordinate: Coordinate4D,
    pub crosswalks: Vec<Crosswalk>,
    /// Attribute name -> exact value an entity must carry
    pub requirements: BTreeMap<String, String>,
    /// Items whose compliance this item's compliance is inferred from
    pub prerequisites: Vec<String>,
}

impl RegulatoryItem {
    pub fn new(id: impl Into<String>, coordinate: Coordinate4D) -> Self {
        Self {
            id: id.into(),
            tag: String::new(),
            content: String::new(),
            coordinate,
            crosswalks: Vec::new(),
            requirements: BTreeMap::new(),
            prerequisites: Vec::new(),
        }
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = tag.into();
        self
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = content.into();
        self
    }

    pub fn with_requirement(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.requirements.insert(key.into(), value.into());
        self
    }

    pub fn with_prerequisite(mut self, id: impl Into<String>) -> Self {
        self.prerequisites.push(id.into());
        self
    }

    pub fn with_crosswalk(mut self, target_id: impl Into<String>, relationship_type: impl Into<String>) -> Self {
        self.crosswalks.push(Crosswalk::new(target_id, relationship_type));
        self
    }

    pub fn nuremberg(&self) -> NurembergNumber {
        self.coordinate.nuremberg()
    }
}

/// One corpus record as written on disk. Position comes from, in order:
/// an explicit coordinate, a Nuremberg code, or mapped metadata.
#[derive(Debug, Deserialize)]
struct CorpusEntry {
    id: String,
    #[serde(default)]
    nuremberg: Option<NurembergNumber>,
    #[serde(default)]
    coordinate: Option<Coordinate4D>,
    #[serde(default)]
    metadata: Option<ItemMetadata>,
    #[serde(default)]
    tag: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    crosswalks: Vec<Crosswalk>,
    #[serde(default)]
    requirements: BTreeMap<String, String>,
    #[serde(default)]
    prerequisites: Vec<String>,
}

impl CorpusEntry {
    fn into_item(self, mapper: &CoordinateMapper) -> Result<RegulatoryItem> {
        let coordinate = match (self.coordinate, self.nuremberg, self.metadata.as_ref()) {
            (Some(c), _, _) => c,
            (None, Some(n), _) => n.coordinate(),
            (None, None, Some(m)) => mapper.map(m)?,
            (None, None, None) => {
                return Err(Error::InvalidMetadata {
                    message: format!(
                        "item '{}' needs a coordinate, nuremberg code or metadata",
                        self.id
                    ),
                })
            }
        };

        Ok(RegulatoryItem {
            id: self.id,
            tag: self.tag,
            content: self.content,
            coordinate,
            crosswalks: self.crosswalks,
            requirements: self.requirements,
            prerequisites: self.prerequisites,
        })
    }
}

// ─────────────────────────────────────────────────────────────────
// Store Trait
// ─────────────────────────────────────────────────────────────────

/// Read access by id and full scan; append-only writes.
pub trait RegulatoryStore: Send + Sync {
    fn get(&self, id: &str) -> Option<Arc<RegulatoryItem>>;

    /// All items in identifier order.
    fn items(&self) -> Vec<Arc<RegulatoryItem>>;

    fn insert(&self, item: RegulatoryItem);

    fn len(&self) -> usize {
        self.items().len()
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-process store backed by a sorted map.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    items: RwLock<BTreeMap<String, Arc<RegulatoryItem>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_items(items: impl IntoIterator<Item = RegulatoryItem>) -> Self {
        let store = Self::new();
        for item in items {
            store.insert(item);
        }
        store
    }

    /// Parse a JSON array of corpus records.
    pub fn from_json(source_name: &str, json: &str, mapper: &CoordinateMapper) -> Result<Self> {
        let entries: Vec<CorpusEntry> =
            serde_json::from_str(json).map_err(|e| Error::CorpusLoad {
                source_name: source_name.to_string(),
                message: e.to_string(),
            })?;

        let store = Self::new();
        for entry in entries {
            let id = entry.id.clone();
            let item = entry.into_item(mapper).map_err(|e| Error::CorpusLoad {
                source_name: source_name.to_string(),
                message: format!("{}: {}", id, e),
            })?;
            if store.get(&item.id).is_some() {
                return Err(Error::CorpusLoad {
                    source_name: source_name.to_string(),
                    message: format!("duplicate item id '{}'", item.id),
                });
            }
            store.insert(item);
        }

        debug!(source = source_name, items = store.len(), "Corpus parsed");
        Ok(store)
    }

    pub fn from_json_file(path: &Path, mapper: &CoordinateMapper) -> Result<Self> {
        let json = std::fs::read_to_string(path).map_err(|e| Error::IoRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        let store = Self::from_json(&path.display().to_string(), &json, mapper)?;
        info!(path = %path.display(), items = store.len(), "Loaded regulatory corpus");
        Ok(store)
    }

    /// The sample corpus shipped inside the binary.
    pub fn bundled(mapper: &CoordinateMapper) -> Result<Self> {
        Self::from_json("bundled sample corpus", BUNDLED_CORPUS, mapper)
    }
}

impl RegulatoryStore for InMemoryStore {
    fn get(&self, id: &str) -> Option<Arc<RegulatoryItem>> {
        self.items.read().get(id).cloned()
    }

    fn items(&self) -> Vec<Arc<RegulatoryItem>> {
        self.items.read().values().cloned().collect()
    }

    fn insert(&self, item: RegulatoryItem) {
        self.items.write().insert(item.id.clone(), Arc::new(item));
    }

    fn len(&self) -> usize {
        self.items.read().len()
    }
}
