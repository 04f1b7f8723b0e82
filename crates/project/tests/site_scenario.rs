use geotree_project::{
    BoundingBox, GeometryType, LoadError, MetadataValue, NodeType, ProjectTree, ProjectTreeError,
};

const SITE: &str = r#"{
    "type": "FeatureCollection",
    "properties": { "name": "Site", "itemtype": "Folder" },
    "features": [
        {
            "type": "Feature",
            "properties": { "name": "Scan1", "itemtype": "UDS" },
            "bbox": [0, 0, 0, 10, 10, 5]
        }
    ]
}"#;

#[test]
fn removing_the_only_scan_leaves_an_empty_site() {
    let mut tree = ProjectTree::load(SITE).unwrap();
    assert_eq!(tree.len(), 2);
    assert!(!tree.has_unsaved_changes());

    let root = tree.root_id();
    let scan = tree.children(root).unwrap().next().unwrap();
    assert_eq!(scan.name(), "Scan1");
    assert_eq!(scan.node_type(), &NodeType::PointCloud);
    assert_eq!(
        scan.bounding_box(),
        Some(&BoundingBox::from_array([0.0, 0.0, 0.0, 10.0, 10.0, 5.0]))
    );
    let scan = scan.id();

    tree.remove_child(root, scan).unwrap();
    assert_eq!(tree.len(), 1);
    assert!(tree.has_unsaved_changes());
    assert_eq!(tree.node(scan).unwrap_err(), ProjectTreeError::NodeNotFound(scan));

    let text = tree.serialize().unwrap();
    // Serializing does not commit the save.
    assert!(tree.has_unsaved_changes());

    let value: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(value["properties"]["name"], "Site");
    assert_eq!(value["features"].as_array().map(Vec::len), Some(0));

    let reloaded = ProjectTree::load(&text).unwrap();
    assert_eq!(reloaded.len(), 1);
    assert_eq!(reloaded.root().name(), "Site");
}

#[test]
fn host_walks_a_loaded_tree_read_only() {
    let mut tree = ProjectTree::load(SITE).unwrap();
    let root = tree.root_id();
    let folder = tree
        .create_child(root, NodeType::Folder, "Annotations", "")
        .unwrap();
    let poi = tree
        .create_child(folder, NodeType::PointOfInterest, "Gate", "")
        .unwrap();
    tree.set_geometry(poi, GeometryType::Point, vec![1.0, 2.0, 3.0])
        .unwrap();
    tree.set_metadata(poi, "colour", 0xff00ffu32).unwrap();

    let outline: Vec<String> = tree
        .depth_first()
        .map(|(node, depth)| format!("{}{} [{}]", "  ".repeat(depth), node.name(), node.node_type()))
        .collect();
    assert_eq!(
        outline,
        [
            "Site [Folder]",
            "  Scan1 [UDS]",
            "  Annotations [Folder]",
            "    Gate [POI]",
        ]
    );

    let leaves: Vec<&str> = tree
        .depth_first()
        .filter(|(node, _)| !node.has_children())
        .map(|(node, _)| node.name())
        .collect();
    assert_eq!(leaves, ["Scan1", "Gate"]);

    let gate = tree.node(poi).unwrap();
    assert_eq!(gate.geometry().points().collect::<Vec<_>>(), [[1.0, 2.0, 3.0]]);
    assert_eq!(
        gate.metadata().get_value("colour"),
        Some(&MetadataValue::UInt32(0xff00ff))
    );
    assert_eq!(gate.metadata().get("colour", 0i32), 0);
}

#[test]
fn failed_load_returns_no_tree() {
    let broken = SITE.replace("[0, 0, 0, 10, 10, 5]", "[0, 0, 0, 10, 10]");
    assert!(matches!(
        ProjectTree::load(&broken),
        Err(LoadError::Malformed(_))
    ));
}
