use std::fmt;

use crate::metadata::MetadataStore;

/// Handle to a node stored in a [`ProjectTree`](crate::ProjectTree) arena.
/// 專案樹節點在 arena 中的控制代碼。
///
/// The handle carries the owning tree's tag plus a slot generation, so a
/// handle from another tree or to a removed node never resolves.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId {
    pub(crate) tree: u64,
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

impl NodeId {
    pub(crate) fn new(tree: u64, index: u32, generation: u32) -> Self {
        Self {
            tree,
            index,
            generation,
        }
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}:{}v{}", self.tree, self.index, self.generation)
    }
}

/// Kind of asset a node represents.
/// 節點所代表的資產類型。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NodeType {
    PointCloud,
    PointOfInterest,
    Folder,
    LiveFeed,
    Media,
    Viewpoint,
    VisualisationSettings,
    Custom(String),
}

impl NodeType {
    /// Maps a type tag to its variant; unknown tags become [`NodeType::Custom`].
    /// 將類型字串轉為列舉；未知字串保留為自訂類型。
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "UDS" => NodeType::PointCloud,
            "POI" => NodeType::PointOfInterest,
            "Folder" => NodeType::Folder,
            "IOT" => NodeType::LiveFeed,
            "Media" => NodeType::Media,
            "Camera" => NodeType::Viewpoint,
            "VizSet" => NodeType::VisualisationSettings,
            other => NodeType::Custom(other.to_string()),
        }
    }

    /// Returns the tag written to the text format.
    /// 取得文字格式中使用的類型字串。
    pub fn tag(&self) -> &str {
        match self {
            NodeType::PointCloud => "UDS",
            NodeType::PointOfInterest => "POI",
            NodeType::Folder => "Folder",
            NodeType::LiveFeed => "IOT",
            NodeType::Media => "Media",
            NodeType::Viewpoint => "Camera",
            NodeType::VisualisationSettings => "VizSet",
            NodeType::Custom(tag) => tag,
        }
    }

    pub fn is_custom(&self) -> bool {
        matches!(self, NodeType::Custom(_))
    }

    /// Folds a custom tag that spells a known type back onto that type.
    pub(crate) fn normalized(self) -> Self {
        match self {
            NodeType::Custom(tag) => NodeType::from_tag(&tag),
            known => known,
        }
    }
}

/// Longest type tag, in bytes, a node may carry. Every known tag fits.
/// 節點類型字串的最大位元組長度。
pub const MAX_TYPE_TAG_LEN: usize = 7;

/// Returns `true` when `tag` may be stored as a node type: 1 to
/// [`MAX_TYPE_TAG_LEN`] bytes with no whitespace or control characters.
pub(crate) fn is_valid_type_tag(tag: &str) -> bool {
    !tag.is_empty()
        && tag.len() <= MAX_TYPE_TAG_LEN
        && tag.chars().all(|ch| !ch.is_whitespace() && !ch.is_control())
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Shape of the geometry attached to a node.
/// 節點幾何形狀的類型。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum GeometryType {
    #[default]
    None,
    Point,
    MultiPoint,
    LineString,
    MultiLineString,
    Polygon,
    MultiPolygon,
    GeometryCollection,
}

impl GeometryType {
    /// GeoJSON name of the geometry, `None` for [`GeometryType::None`].
    pub fn name(&self) -> Option<&'static str> {
        match self {
            GeometryType::None => None,
            GeometryType::Point => Some("Point"),
            GeometryType::MultiPoint => Some("MultiPoint"),
            GeometryType::LineString => Some("LineString"),
            GeometryType::MultiLineString => Some("MultiLineString"),
            GeometryType::Polygon => Some("Polygon"),
            GeometryType::MultiPolygon => Some("MultiPolygon"),
            GeometryType::GeometryCollection => Some("GeometryCollection"),
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        let geometry_type = match name {
            "Point" => GeometryType::Point,
            "MultiPoint" => GeometryType::MultiPoint,
            "LineString" => GeometryType::LineString,
            "MultiLineString" => GeometryType::MultiLineString,
            "Polygon" => GeometryType::Polygon,
            "MultiPolygon" => GeometryType::MultiPolygon,
            "GeometryCollection" => GeometryType::GeometryCollection,
            _ => return None,
        };
        Some(geometry_type)
    }

    /// Checks a flattened XYZ coordinate count against this geometry's shape.
    /// 依幾何類型檢查座標數量是否合法。
    pub fn accepts_coordinate_count(&self, count: usize) -> bool {
        match self {
            GeometryType::None => count == 0,
            GeometryType::Point => count == 3,
            GeometryType::MultiPoint | GeometryType::LineString => count > 0 && count % 3 == 0,
            // Members of these live on child nodes.
            GeometryType::MultiLineString
            | GeometryType::Polygon
            | GeometryType::MultiPolygon
            | GeometryType::GeometryCollection => count == 0,
        }
    }
}

impl fmt::Display for GeometryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name().unwrap_or("None"))
    }
}

/// Geometry type plus flattened `[x0, y0, z0, .. xn, yn, zn]` coordinates.
/// 幾何類型與攤平的三維座標。
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Geometry {
    geometry_type: GeometryType,
    coordinates: Vec<f64>,
}

impl Geometry {
    /// Validates and builds a geometry; returns `None` when the coordinates
    /// do not fit the type or contain non-finite values.
    pub fn new(geometry_type: GeometryType, coordinates: Vec<f64>) -> Option<Self> {
        if !geometry_type.accepts_coordinate_count(coordinates.len()) {
            return None;
        }
        if coordinates.iter().any(|value| !value.is_finite()) {
            return None;
        }
        Some(Self {
            geometry_type,
            coordinates,
        })
    }

    pub fn geometry_type(&self) -> GeometryType {
        self.geometry_type
    }

    pub fn coordinates(&self) -> &[f64] {
        &self.coordinates
    }

    /// Iterates the coordinates as `[x, y, z]` triples.
    pub fn points(&self) -> impl Iterator<Item = [f64; 3]> + '_ {
        self.coordinates
            .chunks_exact(3)
            .map(|chunk| [chunk[0], chunk[1], chunk[2]])
    }

    pub fn is_none(&self) -> bool {
        self.geometry_type == GeometryType::None
    }
}

/// Axis-aligned bounds ordered as `[west, south, floor, east, north, ceiling]`.
/// 依 [西, 南, 底, 東, 北, 頂] 排列的邊界盒。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub west: f64,
    pub south: f64,
    pub floor: f64,
    pub east: f64,
    pub north: f64,
    pub ceiling: f64,
}

impl BoundingBox {
    pub fn from_array(values: [f64; 6]) -> Self {
        let [west, south, floor, east, north, ceiling] = values;
        Self {
            west,
            south,
            floor,
            east,
            north,
            ceiling,
        }
    }

    pub fn to_array(&self) -> [f64; 6] {
        [
            self.west,
            self.south,
            self.floor,
            self.east,
            self.north,
            self.ceiling,
        ]
    }

    pub fn is_finite(&self) -> bool {
        self.to_array().iter().all(|value| value.is_finite())
    }
}

/// One entry of the project tree.
/// 專案樹中的單一節點。
///
/// Nodes are only mutated through [`ProjectTree`](crate::ProjectTree); the
/// accessors here form the read-only view handed to rendering hosts.
#[derive(Debug, Clone, PartialEq)]
pub struct TreeNode {
    pub(crate) id: NodeId,
    pub(crate) uuid: String,
    pub(crate) last_update: f64,
    pub(crate) node_type: NodeType,
    pub(crate) name: String,
    pub(crate) uri: String,
    pub(crate) bounding_box: Option<BoundingBox>,
    pub(crate) geometry: Geometry,
    pub(crate) metadata: MetadataStore,
    pub(crate) parent: Option<NodeId>,
    pub(crate) first_child: Option<NodeId>,
    pub(crate) next_sibling: Option<NodeId>,
}

impl TreeNode {
    pub(crate) fn new(
        id: NodeId,
        uuid: String,
        node_type: NodeType,
        name: String,
        uri: String,
    ) -> Self {
        Self {
            id,
            uuid,
            last_update: 0.0,
            node_type,
            name,
            uri,
            bounding_box: None,
            geometry: Geometry::default(),
            metadata: MetadataStore::new(),
            parent: None,
            first_child: None,
            next_sibling: None,
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Identifier carried by the text format.
    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    /// Seconds since the Unix epoch (UTC) of the last content change.
    pub fn last_update(&self) -> f64 {
        self.last_update
    }

    pub fn node_type(&self) -> &NodeType {
        &self.node_type
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn bounding_box(&self) -> Option<&BoundingBox> {
        self.bounding_box.as_ref()
    }

    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    pub fn metadata(&self) -> &MetadataStore {
        &self.metadata
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn first_child(&self) -> Option<NodeId> {
        self.first_child
    }

    pub fn next_sibling(&self) -> Option<NodeId> {
        self.next_sibling
    }

    pub fn has_children(&self) -> bool {
        self.first_child.is_some()
    }
}
