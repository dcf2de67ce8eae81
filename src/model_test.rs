use super::*;

// =============================================================================
// normalize_rotation
// =============================================================================

#[test]
fn rotation_wraps_above_360() {
    assert!((normalize_rotation(400.0) - 40.0).abs() < f64::EPSILON);
    assert!((normalize_rotation(720.0)).abs() < f64::EPSILON);
}

#[test]
fn rotation_wraps_negative() {
    assert!((normalize_rotation(-90.0) - 270.0).abs() < f64::EPSILON);
    assert!((normalize_rotation(-360.0)).abs() < f64::EPSILON);
}

#[test]
fn rotation_in_range_unchanged() {
    assert!((normalize_rotation(0.0)).abs() < f64::EPSILON);
    assert!((normalize_rotation(359.5) - 359.5).abs() < f64::EPSILON);
}

// =============================================================================
// Bounds
// =============================================================================

#[test]
fn bounds_contains_edges_count_as_inside() {
    let outer = Bounds { x: 0.0, y: 0.0, width: 100.0, height: 100.0 };
    let inner = Bounds { x: 0.0, y: 0.0, width: 100.0, height: 100.0 };
    assert!(outer.contains(&inner));

    let overhang = Bounds { x: 50.0, y: 50.0, width: 60.0, height: 10.0 };
    assert!(!outer.contains(&overhang));
}

#[test]
fn bounds_union_covers_both() {
    let a = Bounds { x: 0.0, y: 0.0, width: 10.0, height: 10.0 };
    let b = Bounds { x: 20.0, y: 30.0, width: 10.0, height: 10.0 };
    let u = a.union(&b);
    assert!(u.contains(&a));
    assert!(u.contains(&b));
    assert!((u.width - 30.0).abs() < f64::EPSILON);
    assert!((u.height - 40.0).abs() < f64::EPSILON);
}

// =============================================================================
// Endpoints
// =============================================================================

#[test]
fn endpoint_constructors_are_exclusive() {
    let id = Uuid::new_v4();
    let attached = Endpoint::attached(id, Anchor::Port(Port::Top));
    assert!(attached.is_attached());
    assert!(attached.point.is_none());

    let detached = Endpoint::at_point(Point::new(5.0, 6.0));
    assert!(!detached.is_attached());
    assert!(detached.object_id.is_none());
    assert!(detached.anchor.is_none());
}

#[test]
fn endpoint_deserialize_normalizes_conflicting_payloads() {
    let id = Uuid::new_v4();
    let both = serde_json::json!({
        "object_id": id,
        "anchor": { "port": "top" },
        "point": { "x": 1.0, "y": 2.0 },
    });
    let endpoint: Endpoint = serde_json::from_value(both).unwrap();
    assert_eq!(endpoint.object_id, Some(id));
    assert_eq!(endpoint.anchor, Some(Anchor::Port(Port::Top)));
    assert!(endpoint.point.is_none());

    // An anchor without a target is not an attachment.
    let dangling = serde_json::json!({
        "anchor": { "t": 0.5 },
        "point": { "x": 3.0, "y": 4.0 },
    });
    let endpoint: Endpoint = serde_json::from_value(dangling).unwrap();
    assert!(endpoint.object_id.is_none());
    assert!(endpoint.anchor.is_none());
    assert_eq!(endpoint.point, Some(Point::new(3.0, 4.0)));
}

#[test]
fn endpoint_resolves_port_against_target_bounds() {
    let mut objects = HashMap::new();
    let obj = BoardObject::new(10.0, 20.0, 100.0, 40.0, ObjectProps::defaults(ObjectKind::Rectangle), None);
    let id = obj.id;
    objects.insert(id, obj);

    let p = Endpoint::attached(id, Anchor::Port(Port::Right))
        .resolve(&objects)
        .unwrap();
    assert!((p.x - 110.0).abs() < f64::EPSILON);
    assert!((p.y - 40.0).abs() < f64::EPSILON);
}

#[test]
fn endpoint_resolve_missing_target_is_none() {
    let objects = HashMap::new();
    let endpoint = Endpoint::attached(Uuid::new_v4(), Anchor::Port(Port::Top));
    assert!(endpoint.resolve(&objects).is_none());
}

#[test]
fn perimeter_point_walks_clockwise() {
    let b = Bounds { x: 0.0, y: 0.0, width: 100.0, height: 100.0 };
    // t=0 is the top-left corner, t=0.25 is the top-right.
    let start = perimeter_point(&b, 0.0);
    assert!((start.x).abs() < f64::EPSILON);
    assert!((start.y).abs() < f64::EPSILON);
    let quarter = perimeter_point(&b, 0.25);
    assert!((quarter.x - 100.0).abs() < f64::EPSILON);
    assert!((quarter.y).abs() < f64::EPSILON);
}

#[test]
fn nearest_perimeter_t_projects_onto_closest_edge() {
    let b = Bounds { x: 0.0, y: 0.0, width: 100.0, height: 100.0 };
    let (t, d) = nearest_perimeter_t(&b, Point::new(50.0, -10.0));
    assert!((d - 10.0).abs() < f64::EPSILON);
    let p = perimeter_point(&b, t);
    assert!((p.x - 50.0).abs() < 1e-9);
    assert!((p.y).abs() < 1e-9);
}

// =============================================================================
// BoardObject
// =============================================================================

#[test]
fn new_object_floors_size_and_zeroes_rotation() {
    let obj = BoardObject::new(0.0, 0.0, 5.0, 5.0, ObjectProps::defaults(ObjectKind::Sticky), None);
    assert!((obj.width - MIN_SIZE).abs() < f64::EPSILON);
    assert!((obj.height - MIN_SIZE).abs() < f64::EPSILON);
    assert!((obj.rotation).abs() < f64::EPSILON);
    assert!(obj.parent_frame_id.is_none());
}

#[test]
fn props_serde_uses_type_tag() {
    let props = ObjectProps::defaults(ObjectKind::Sticky);
    let json = serde_json::to_value(&props).unwrap();
    assert_eq!(json.get("type").unwrap().as_str().unwrap(), "sticky");

    let restored: ObjectProps = serde_json::from_value(json).unwrap();
    assert_eq!(restored.kind(), ObjectKind::Sticky);
}

#[test]
fn object_serde_round_trip() {
    let obj = BoardObject::new(1.0, 2.0, 30.0, 40.0, ObjectProps::defaults(ObjectKind::Table), None);
    let json = serde_json::to_string(&obj).unwrap();
    let restored: BoardObject = serde_json::from_str(&json).unwrap();
    assert_eq!(restored, obj);
}
