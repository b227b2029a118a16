use queues::tree::CAPACITY_PREFIX;
use queues::{ConfigProperty, QueueParams, QueueTree, StagedChanges};
use queueviz_layout::*;

fn prop(key: &str, value: &str) -> ConfigProperty {
    ConfigProperty::new(format!("{CAPACITY_PREFIX}{key}"), value)
}

fn cluster() -> QueueTree {
    QueueTree::build(vec![
        prop("root.queues", "default,production,adhoc"),
        prop("root.default.capacity", "20"),
        prop("root.production.capacity", "70"),
        prop("root.adhoc.capacity", "10"),
        prop("root.production.queues", "team1,team2"),
        prop("root.production.team1.capacity", "2w"),
        prop("root.production.team2.capacity", "6w"),
    ])
}

fn options() -> LayoutOptions {
    LayoutOptions {
        node_width: 100.0,
        node_height: 40.0,
        level_spacing: 50.0,
        sibling_spacing: 10.0,
        padding: 20.0,
        ..Default::default()
    }
}

#[test]
fn test_horizontal_tidy_tree() {
    let engine = TreeLayoutEngine::new(options());
    let layout = engine.compute_layout(&cluster()).unwrap();

    let ids: Vec<&str> = layout.nodes.iter().map(|n| n.id.as_str()).collect();
    assert_eq!(
        ids,
        vec![
            "root",
            "root.default",
            "root.production",
            "root.production.team1",
            "root.production.team2",
            "root.adhoc"
        ]
    );

    let y = |id: &str| find_node(&layout.nodes, id).unwrap().position.y;
    let x = |id: &str| find_node(&layout.nodes, id).unwrap().position.x;
    // leaves take consecutive slots of node_height + sibling_spacing
    assert_eq!(y("root.default"), 0.0);
    assert_eq!(y("root.production.team1"), 50.0);
    assert_eq!(y("root.production.team2"), 100.0);
    assert_eq!(y("root.adhoc"), 150.0);
    // parents sit centred over their children
    assert_eq!(y("root.production"), 75.0);
    assert_eq!(y("root"), 75.0);
    assert_eq!(x("root.production.team2"), 300.0);

    assert_eq!(get_max_depth(&layout.nodes), 2);
    assert_eq!(get_nodes_at_depth(&layout.nodes, 1).len(), 3);
    assert_eq!(layout.bounds, Rect::new(-20.0, -20.0, 440.0, 230.0));
}

#[test]
fn test_vertical_orientation_swaps_axes() {
    let engine = TreeLayoutEngine::new(LayoutOptions {
        orientation: Orientation::Vertical,
        ..options()
    });
    let layout = engine.compute_layout(&cluster()).unwrap();
    let team2 = find_node(&layout.nodes, "root.production.team2").unwrap();
    assert_eq!(team2.position.y, 2.0 * (40.0 + 50.0));
    assert_eq!(team2.position.x, 2.0 * (100.0 + 10.0));
    let flow = layout
        .flows
        .iter()
        .find(|f| f.target == "root.production.team2")
        .unwrap();
    assert_eq!(flow.end, Position::new(team2.position.x + 50.0, team2.position.y));
}

#[test]
fn test_collapsed_subtree_is_excluded() {
    let mut engine = TreeLayoutEngine::new(options());
    engine.toggle("root.production");
    let layout = engine.compute_layout(&cluster()).unwrap();
    assert_eq!(layout.nodes.len(), 4);
    assert!(find_node(&layout.nodes, "root.production.team1").is_none());
    assert!(
        layout
            .flows
            .iter()
            .all(|f| !f.target.starts_with("root.production."))
    );
    let production = find_node(&layout.nodes, "root.production").unwrap();
    assert!(production.collapsed && production.has_children);
}

#[test]
fn test_flow_widths_follow_capacity() {
    let engine = TreeLayoutEngine::new(options());
    let layout = engine.compute_layout(&cluster()).unwrap();
    assert_eq!(layout.flows.len(), layout.nodes.len() - 1);

    let width = |target: &str| {
        layout
            .flows
            .iter()
            .find(|f| f.target == target)
            .map(|f| f.width)
            .unwrap()
    };
    assert!(width("root.production") > width("root.default"));
    assert!(width("root.default") > width("root.adhoc"));
    // 6w of 8w is a 75% share
    assert!(width("root.production.team2") > width("root.production"));
    for flow in &layout.flows {
        assert!(flow.width >= 2.0 && flow.width <= 40.0);
    }
}

#[test]
fn test_ribbons_stack_at_parent_edge() {
    let engine = TreeLayoutEngine::new(LayoutOptions {
        flow_style: FlowStyle::Ribbon,
        ..options()
    });
    let layout = engine.compute_layout(&cluster()).unwrap();
    let root = find_node(&layout.nodes, "root").unwrap();
    let from_root: Vec<&FlowPath> = layout.flows.iter().filter(|f| f.source == "root").collect();
    assert_eq!(from_root.len(), 3);
    let total: f64 = from_root.iter().map(|f| f.width).sum();
    let top = root.center().y - total / 2.0;
    assert!((from_root[0].start.y - (top + from_root[0].width / 2.0)).abs() < 1e-9);
    assert!(from_root[0].start.y < from_root[1].start.y);
    assert!(from_root[1].start.y < from_root[2].start.y);
    assert!(from_root.iter().all(|f| f.path.ends_with('Z')));
}

#[test]
fn test_staged_overlay_flags_reach_layout() {
    let mut staged = StagedChanges::new(cluster());
    let mut params = QueueParams::new();
    params.insert("capacity".to_string(), "0".to_string());
    staged.stage_add("root", "analytics", &params).unwrap();
    staged.stage_delete("root.adhoc").unwrap();

    let layout = TreeLayoutEngine::new(options())
        .compute_layout(&staged.effective_tree())
        .unwrap();
    assert!(find_node(&layout.nodes, "root.analytics").unwrap().is_new);
    assert!(find_node(&layout.nodes, "root.adhoc").unwrap().is_deleted);
}

#[test]
fn test_hit_testing() {
    let layout = TreeLayoutEngine::new(options())
        .compute_layout(&cluster())
        .unwrap();
    let hit = node_at(&layout.nodes, Position::new(160.0, 20.0)).unwrap();
    assert_eq!(hit.id, "root.default");
    assert!(node_at(&layout.nodes, Position::new(125.0, 20.0)).is_none());
}

#[test]
fn test_culling_inside_outside_and_boundary() {
    let layout = TreeLayoutEngine::new(options())
        .compute_layout(&cluster())
        .unwrap();
    let culler = ViewportCuller::new(5.0);
    // covers the depth-1 column only
    let viewport = Viewport::new(150.0, 0.0, 100.0, 40.0);
    let result = culler.cull_nodes(&layout.nodes, &viewport);
    let visible: Vec<&str> = result.visible.iter().map(|n| n.id.as_str()).collect();
    assert_eq!(visible, vec!["root.default"]);
    assert_eq!(result.visible.len() + result.culled.len(), layout.nodes.len());

    // root's top edge is 75, so a viewport ending at 72 reaches it only
    // through the padding
    let spanning = culler.cull_nodes(&layout.nodes, &Viewport::new(0.0, 0.0, 50.0, 72.0));
    assert!(spanning.visible.iter().any(|n| n.id == "root"));
    let far = culler.cull_nodes(&layout.nodes, &Viewport::new(5000.0, 5000.0, 10.0, 10.0));
    assert!(far.visible.is_empty());
    assert_eq!(culler.get_visible_bounds(&layout.nodes, &Viewport::new(5000.0, 5000.0, 10.0, 10.0)), None);

    let flows = culler.cull_flows(&layout.flows, &result.visible);
    let visible_flows: Vec<String> = flows.visible.iter().map(|f| f.id()).collect();
    assert_eq!(visible_flows, vec!["root->root.default"]);
}

#[test]
fn test_spatial_index_agrees_with_linear_scan() {
    let mut properties = vec![prop("root.queues", &(0..40).map(|i| format!("q{i}")).collect::<Vec<_>>().join(","))];
    for i in 0..40 {
        properties.push(prop(
            &format!("root.q{i}.queues"),
            &(0..10).map(|j| format!("l{j}")).collect::<Vec<_>>().join(","),
        ));
    }
    let tree = QueueTree::build(properties);
    let layout = TreeLayoutEngine::new(options()).compute_layout(&tree).unwrap();
    assert_eq!(layout.nodes.len(), 441);

    let viewport = Viewport::new(150.0, 2000.0, 400.0, 900.0);
    let linear = ViewportCuller::new(10.0).with_threshold(usize::MAX);
    let indexed = ViewportCuller::new(10.0).with_threshold(1);
    let a: Vec<&str> = linear
        .cull_nodes(&layout.nodes, &viewport)
        .visible
        .iter()
        .map(|n| n.id.as_str())
        .collect();
    let b: Vec<&str> = indexed
        .cull_nodes(&layout.nodes, &viewport)
        .visible
        .iter()
        .map(|n| n.id.as_str())
        .collect();
    assert!(!a.is_empty());
    assert_eq!(a, b);

    let index = create_spatial_index(&layout.nodes);
    assert_eq!(index.len(), layout.nodes.len());
}

#[test]
fn test_animation_between_layouts() {
    let tree = cluster();
    let mut engine = TreeLayoutEngine::new(options());
    let before = engine.compute_layout(&tree).unwrap();
    engine.collapse("root.production");
    let after = engine.compute_layout(&tree).unwrap();

    let frames = animate_to_new_layout(&before.nodes, &after, 250.0);
    assert_eq!(frames.len(), FRAME_COUNT);
    let last = frames.last().unwrap();
    // collapsed children fade out
    let team1 = last
        .nodes
        .iter()
        .find(|n| n.id == "root.production.team1")
        .unwrap();
    assert_eq!(team1.opacity, 0.0);
    let adhoc = last.nodes.iter().find(|n| n.id == "root.adhoc").unwrap();
    assert_eq!(adhoc.position, find_node(&after.nodes, "root.adhoc").unwrap().position);
}
