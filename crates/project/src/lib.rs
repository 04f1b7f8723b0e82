//! Project tree primitives for geospatial scenes: an arena-backed node
//! hierarchy with typed metadata and a GeoJSON-flavoured text codec.
//! 地理空間場景的專案樹核心：以 arena 管理節點、具型別中繼資料與文字編解碼。

mod change;
pub mod codec;
pub mod config;
pub mod metadata;
pub mod node;
pub mod tree;

pub use change::ChangeTracker;
pub use codec::{LoadError, SaveError, TextCodec};
pub use config::{CodecConfig, MAX_SUPPORTED_DEPTH};
pub use metadata::{MetadataStore, MetadataType, MetadataValue};
pub use node::{
    BoundingBox, Geometry, GeometryType, NodeId, NodeType, TreeNode, MAX_TYPE_TAG_LEN,
};
pub use tree::{Children, DepthFirst, ProjectTree, ProjectTreeError};
