//! GeoJSON-flavoured text format for project trees.
//! 專案樹的 GeoJSON 風格文字格式。
//!
//! The top-level `FeatureCollection` is the root node, its `features` are the
//! root's children and every feature may nest further nodes in `children`.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::config::CodecConfig;
use crate::metadata::{MetadataStore, MetadataValue};
use crate::node::{
    is_valid_type_tag, BoundingBox, Geometry, GeometryType, NodeId, NodeType, TreeNode,
};
use crate::tree::{NodeSeed, ProjectTree};

const COLLECTION_TYPE: &str = "FeatureCollection";
const FEATURE_TYPE: &str = "Feature";
const MAX_ID_LEN: usize = 36;

/// Errors raised while building a tree from text.
/// 由文字建立專案樹時的錯誤。
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LoadError {
    #[error("malformed project text: {0}")]
    Malformed(String),
    #[error("project nesting exceeds the depth limit of {limit}")]
    TooDeep { limit: usize },
}

impl LoadError {
    fn malformed(message: impl Into<String>) -> Self {
        LoadError::Malformed(message.into())
    }
}

/// Errors raised while writing a tree as text.
/// 將專案樹輸出為文字時的錯誤。
#[derive(Debug, Error)]
pub enum SaveError {
    /// The tree nests deeper than the codec would accept when reading it back.
    #[error("project nesting of {depth} exceeds the depth limit of {limit}")]
    TooDeep { depth: usize, limit: usize },
    #[error("failed to serialize project tree: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Serialize, Deserialize)]
struct CollectionDoc {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    #[serde(default)]
    properties: PropertiesDoc,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    bbox: Option<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    geometry: Option<GeometryDoc>,
    #[serde(default)]
    features: Vec<FeatureDoc>,
}

#[derive(Debug, Serialize, Deserialize)]
struct FeatureDoc {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    #[serde(default)]
    properties: PropertiesDoc,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    bbox: Option<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    geometry: Option<GeometryDoc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    children: Vec<FeatureDoc>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct PropertiesDoc {
    #[serde(default)]
    name: String,
    #[serde(default)]
    uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    itemtype: Option<String>,
    #[serde(rename = "lastUpdate", default)]
    last_update: f64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    metadata: BTreeMap<String, MetadataEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeometryDoc {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    coordinates: Vec<f64>,
}

/// Tagged entries are what we write; plain scalars come from other tools.
#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum MetadataEntry {
    Tagged(MetadataValue),
    Plain(serde_json::Value),
}

/// Converts between [`ProjectTree`] and the text format.
/// 專案樹與文字格式之間的轉換器。
#[derive(Debug, Clone, Default)]
pub struct TextCodec {
    config: CodecConfig,
}

impl TextCodec {
    pub fn new(mut config: CodecConfig) -> Self {
        config.sanitize();
        Self { config }
    }

    /// Effective settings, after sanitizing.
    pub fn config(&self) -> &CodecConfig {
        &self.config
    }

    /// Builds a tree from `text`. Either the whole document loads or nothing
    /// does; the returned tree starts without unsaved changes.
    /// 解析文字並建立專案樹；失敗時不會留下部分結果。
    pub fn parse<U>(&self, text: &str) -> Result<ProjectTree<U>, LoadError> {
        let limit = self.config.max_depth;
        // Each feature level costs two containers (object + children array)
        // plus a few for properties, metadata and geometry.
        if exceeds_nesting(text, limit * 2 + 6) {
            debug!(limit, "rejected project text: nesting too deep");
            return Err(LoadError::TooDeep { limit });
        }

        let doc: CollectionDoc =
            serde_json::from_str(text).map_err(|err| LoadError::malformed(err.to_string()))?;
        if doc.kind != COLLECTION_TYPE {
            return Err(LoadError::malformed(format!(
                "expected a {COLLECTION_TYPE}, found {:?}",
                doc.kind
            )));
        }

        let mut seen = HashSet::new();
        let root_type = doc.properties.itemtype.as_deref().unwrap_or("Folder");
        let root_type = parse_type_tag(root_type)?;
        let seed = node_seed(
            doc.id,
            doc.properties,
            doc.bbox,
            doc.geometry,
            root_type,
            &mut seen,
        )?;
        let mut tree = ProjectTree::from_root(seed);
        let root = tree.root_id();
        self.attach_features(&mut tree, root, doc.features, 1, &mut seen)?;

        debug!(nodes = tree.len(), "parsed project tree");
        Ok(tree)
    }

    fn attach_features<U>(
        &self,
        tree: &mut ProjectTree<U>,
        parent: NodeId,
        features: Vec<FeatureDoc>,
        depth: usize,
        seen: &mut HashSet<String>,
    ) -> Result<(), LoadError> {
        if features.is_empty() {
            return Ok(());
        }
        if depth > self.config.max_depth {
            return Err(LoadError::TooDeep {
                limit: self.config.max_depth,
            });
        }

        let mut previous = None;
        for feature in features {
            if feature.kind != FEATURE_TYPE {
                return Err(LoadError::malformed(format!(
                    "expected a {FEATURE_TYPE}, found {:?}",
                    feature.kind
                )));
            }
            let tag = feature.properties.itemtype.as_deref().ok_or_else(|| {
                LoadError::malformed(format!(
                    "feature {:?} has no itemtype",
                    feature.properties.name
                ))
            })?;
            let node_type = parse_type_tag(tag)?;
            let seed = node_seed(
                feature.id,
                feature.properties,
                feature.bbox,
                feature.geometry,
                node_type,
                seen,
            )?;
            let id = tree
                .insert_after(parent, previous, seed)
                .map_err(|err| LoadError::malformed(err.to_string()))?;
            self.attach_features(tree, id, feature.children, depth + 1, seen)?;
            previous = Some(id);
        }
        Ok(())
    }

    /// Writes the tree depth-first, children in sibling order.
    /// 以深度優先順序輸出整棵專案樹。
    ///
    /// Trees nested deeper than `max_depth` are refused, so everything this
    /// writes can be parsed again with the same config.
    pub fn serialize<U>(&self, tree: &ProjectTree<U>) -> Result<String, SaveError> {
        let limit = self.config.max_depth;
        let depth = tree.depth_first().map(|(_, depth)| depth).max().unwrap_or(0);
        if depth > limit {
            debug!(depth, limit, "refused to serialize project tree: nesting too deep");
            return Err(SaveError::TooDeep { depth, limit });
        }

        let root = tree.root();
        let doc = CollectionDoc {
            kind: COLLECTION_TYPE.to_string(),
            id: Some(root.uuid().to_string()),
            properties: properties_of(root),
            bbox: root.bounding_box().map(|bbox| bbox.to_array().to_vec()),
            geometry: geometry_of(root),
            features: features_of(tree, root.id()),
        };
        let text = if self.config.pretty {
            serde_json::to_string_pretty(&doc)?
        } else {
            serde_json::to_string(&doc)?
        };
        debug!(nodes = tree.len(), bytes = text.len(), "serialized project tree");
        Ok(text)
    }
}

fn features_of<U>(tree: &ProjectTree<U>, parent: NodeId) -> Vec<FeatureDoc> {
    tree.children(parent)
        .into_iter()
        .flatten()
        .map(|child| FeatureDoc {
            kind: FEATURE_TYPE.to_string(),
            id: Some(child.uuid().to_string()),
            properties: properties_of(child),
            bbox: child.bounding_box().map(|bbox| bbox.to_array().to_vec()),
            geometry: geometry_of(child),
            children: features_of(tree, child.id()),
        })
        .collect()
}

fn properties_of(node: &TreeNode) -> PropertiesDoc {
    PropertiesDoc {
        name: node.name().to_string(),
        uri: node.uri().to_string(),
        itemtype: Some(node.node_type().tag().to_string()),
        last_update: node.last_update(),
        metadata: node
            .metadata()
            .iter()
            .map(|(key, value)| (key.to_string(), MetadataEntry::Tagged(value.clone())))
            .collect(),
    }
}

fn geometry_of(node: &TreeNode) -> Option<GeometryDoc> {
    let geometry = node.geometry();
    geometry.geometry_type().name().map(|name| GeometryDoc {
        kind: name.to_string(),
        coordinates: geometry.coordinates().to_vec(),
    })
}

fn parse_type_tag(tag: &str) -> Result<NodeType, LoadError> {
    if !is_valid_type_tag(tag) {
        return Err(LoadError::malformed(format!("invalid itemtype {tag:?}")));
    }
    Ok(NodeType::from_tag(tag))
}

fn node_seed(
    id: Option<String>,
    properties: PropertiesDoc,
    bbox: Option<Vec<f64>>,
    geometry: Option<GeometryDoc>,
    node_type: NodeType,
    seen: &mut HashSet<String>,
) -> Result<NodeSeed, LoadError> {
    let uuid = match id {
        Some(id) => {
            let well_formed = !id.is_empty()
                && id.len() <= MAX_ID_LEN
                && id.bytes().all(|byte| byte.is_ascii_graphic());
            if !well_formed {
                return Err(LoadError::malformed(format!("invalid feature id {id:?}")));
            }
            id
        }
        None => Uuid::new_v4().to_string(),
    };
    if !seen.insert(uuid.clone()) {
        return Err(LoadError::malformed(format!("duplicate feature id {uuid:?}")));
    }

    let bounding_box = match bbox {
        Some(values) => {
            let values: [f64; 6] = values.try_into().map_err(|values: Vec<f64>| {
                LoadError::malformed(format!(
                    "bbox of {uuid:?} has {} values, expected 6",
                    values.len()
                ))
            })?;
            Some(BoundingBox::from_array(values))
        }
        None => None,
    };

    let geometry = match geometry {
        Some(doc) => {
            let geometry_type = GeometryType::from_name(&doc.kind).ok_or_else(|| {
                LoadError::malformed(format!("unknown geometry type {:?}", doc.kind))
            })?;
            let count = doc.coordinates.len();
            Geometry::new(geometry_type, doc.coordinates).ok_or_else(|| {
                LoadError::malformed(format!(
                    "{count} coordinates do not fit a {geometry_type} geometry on {uuid:?}"
                ))
            })?
        }
        None => Geometry::default(),
    };

    let metadata = properties
        .metadata
        .into_iter()
        .map(|(key, entry)| {
            let value = metadata_value(&key, entry)?;
            Ok((key, value))
        })
        .collect::<Result<MetadataStore, LoadError>>()?;

    Ok(NodeSeed {
        uuid,
        last_update: properties.last_update,
        node_type,
        name: properties.name,
        uri: properties.uri,
        bounding_box,
        geometry,
        metadata,
    })
}

fn metadata_value(key: &str, entry: MetadataEntry) -> Result<MetadataValue, LoadError> {
    use serde_json::Value;

    let value = match entry {
        MetadataEntry::Tagged(value) => value,
        MetadataEntry::Plain(Value::Bool(flag)) => MetadataValue::Bool(flag),
        MetadataEntry::Plain(Value::String(text)) => MetadataValue::String(text),
        MetadataEntry::Plain(Value::Number(number)) => {
            if let Some(int) = number.as_i64() {
                if let Ok(small) = i32::try_from(int) {
                    MetadataValue::Int32(small)
                } else if let Ok(unsigned) = u32::try_from(int) {
                    MetadataValue::UInt32(unsigned)
                } else {
                    MetadataValue::Int64(int)
                }
            } else {
                MetadataValue::Double(number.as_f64().unwrap_or(f64::NAN))
            }
        }
        MetadataEntry::Plain(_) => {
            return Err(LoadError::malformed(format!(
                "metadata entry {key:?} is not a typed scalar"
            )))
        }
    };
    Ok(value)
}

/// Linear scan for container nesting deeper than `limit`, ignoring brackets
/// inside strings.
fn exceeds_nesting(text: &str, limit: usize) -> bool {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for byte in text.bytes() {
        if in_string {
            if escaped {
                escaped = false;
            } else if byte == b'\\' {
                escaped = true;
            } else if byte == b'"' {
                in_string = false;
            }
            continue;
        }
        match byte {
            b'"' => in_string = true,
            b'{' | b'[' => {
                depth += 1;
                if depth > limit {
                    return true;
                }
            }
            b'}' | b']' => depth = depth.saturating_sub(1),
            _ => {}
        }
    }
    false
}
