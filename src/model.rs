//! Board object model — typed variants, geometry, and invariant helpers.
//!
//! DESIGN
//! ======
//! Every visual entity on a board is a `BoardObject`: shared base fields
//! (position, size, rotation, parent frame) plus a tagged `ObjectProps`
//! variant carrying the type-specific payload. Invariants enforced here:
//! sizes never drop below `MIN_SIZE`, rotation always normalizes into
//! [0, 360), and a connector endpoint is either a live attachment or an
//! absolute point — never both.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Minimum width/height of any object after create, resize, or update.
pub const MIN_SIZE: f64 = 24.0;

/// Wrap an angle in degrees into [0, 360).
#[must_use]
pub fn normalize_rotation(degrees: f64) -> f64 {
    let wrapped = degrees % 360.0;
    if wrapped < 0.0 { wrapped + 360.0 } else { wrapped }
}

// =============================================================================
// GEOMETRY
// =============================================================================

/// A point in world units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    #[must_use]
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    #[must_use]
    pub fn translated(self, dx: f64, dy: f64) -> Self {
        Self { x: self.x + dx, y: self.y + dy }
    }
}

/// Axis-aligned bounds in world units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Bounds {
    /// Whether `other` lies fully inside these bounds (edges count as inside).
    #[must_use]
    pub fn contains(&self, other: &Bounds) -> bool {
        self.x <= other.x
            && self.y <= other.y
            && self.x + self.width >= other.x + other.width
            && self.y + self.height >= other.y + other.height
    }

    #[must_use]
    pub fn area(&self) -> f64 {
        self.width * self.height
    }

    #[must_use]
    pub fn center(&self) -> Point {
        Point::new(self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    /// Union of two bounds.
    #[must_use]
    pub fn union(&self, other: &Bounds) -> Bounds {
        let x = self.x.min(other.x);
        let y = self.y.min(other.y);
        let right = (self.x + self.width).max(other.x + other.width);
        let bottom = (self.y + self.height).max(other.y + other.height);
        Bounds { x, y, width: right - x, height: bottom - y }
    }
}

// =============================================================================
// CONNECTOR ENDPOINTS
// =============================================================================

/// Discrete attachment port on an object's unrotated bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Port {
    Top,
    Right,
    Bottom,
    Left,
}

/// Where on the target object an endpoint attaches: a discrete port or a
/// normalized perimeter position `t` in [0, 1).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Anchor {
    Port(Port),
    T(f64),
}

/// One end of a connector. Either `object_id` + `anchor` (live attachment)
/// or `point` (absolute position) is set; the constructors keep the two
/// mutually exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Endpoint {
    pub object_id: Option<Uuid>,
    pub anchor: Option<Anchor>,
    pub point: Option<Point>,
}

/// Deserialization normalizes conflicting payloads so externally-supplied
/// snapshots (paste, hydration of old rows) uphold the exclusivity
/// invariant: a present `object_id` wins and clears the point, and an
/// anchor without a target is dropped.
impl<'de> Deserialize<'de> for Endpoint {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct Wire {
            #[serde(default)]
            object_id: Option<Uuid>,
            #[serde(default)]
            anchor: Option<Anchor>,
            #[serde(default)]
            point: Option<Point>,
        }
        let wire = Wire::deserialize(deserializer)?;
        Ok(match wire.object_id {
            Some(object_id) => Self { object_id: Some(object_id), anchor: wire.anchor, point: None },
            None => Self { object_id: None, anchor: None, point: wire.point },
        })
    }
}

impl Endpoint {
    /// An endpoint attached to a live object. Clears any absolute point.
    #[must_use]
    pub fn attached(object_id: Uuid, anchor: Anchor) -> Self {
        Self { object_id: Some(object_id), anchor: Some(anchor), point: None }
    }

    /// A detached endpoint at an absolute position. Clears any attachment.
    #[must_use]
    pub fn at_point(point: Point) -> Self {
        Self { object_id: None, anchor: None, point: Some(point) }
    }

    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.object_id.is_some()
    }

    /// Resolve the endpoint to a world position. Attached endpoints resolve
    /// against the target's current bounds; a missing anchor falls back to
    /// the target's center. Returns `None` only when the endpoint references
    /// an object absent from `objects` and carries no fallback point.
    #[must_use]
    pub fn resolve(&self, objects: &HashMap<Uuid, BoardObject>) -> Option<Point> {
        if let Some(target_id) = self.object_id {
            let target = objects.get(&target_id)?;
            let bounds = target.bounds();
            return Some(match self.anchor {
                Some(Anchor::Port(port)) => port_position(&bounds, port),
                Some(Anchor::T(t)) => perimeter_point(&bounds, t),
                None => bounds.center(),
            });
        }
        self.point
    }
}

/// Midpoint of one side of the unrotated bounds.
#[must_use]
pub fn port_position(bounds: &Bounds, port: Port) -> Point {
    match port {
        Port::Top => Point::new(bounds.x + bounds.width / 2.0, bounds.y),
        Port::Right => Point::new(bounds.x + bounds.width, bounds.y + bounds.height / 2.0),
        Port::Bottom => Point::new(bounds.x + bounds.width / 2.0, bounds.y + bounds.height),
        Port::Left => Point::new(bounds.x, bounds.y + bounds.height / 2.0),
    }
}

/// Position at normalized perimeter parameter `t` in [0, 1), walking
/// clockwise from the top-left corner.
#[must_use]
pub fn perimeter_point(bounds: &Bounds, t: f64) -> Point {
    let t = t.rem_euclid(1.0);
    let perimeter = 2.0 * (bounds.width + bounds.height);
    let mut dist = t * perimeter;

    if dist <= bounds.width {
        return Point::new(bounds.x + dist, bounds.y);
    }
    dist -= bounds.width;
    if dist <= bounds.height {
        return Point::new(bounds.x + bounds.width, bounds.y + dist);
    }
    dist -= bounds.height;
    if dist <= bounds.width {
        return Point::new(bounds.x + bounds.width - dist, bounds.y + bounds.height);
    }
    dist -= bounds.width;
    Point::new(bounds.x, bounds.y + bounds.height - dist)
}

/// Nearest perimeter position to `p`. Returns the normalized parameter and
/// its distance to `p`.
#[must_use]
pub fn nearest_perimeter_t(bounds: &Bounds, p: Point) -> (f64, f64) {
    let perimeter = 2.0 * (bounds.width + bounds.height);
    if perimeter <= 0.0 {
        let corner = Point::new(bounds.x, bounds.y);
        return (0.0, distance(corner, p));
    }

    // (distance along perimeter to segment start, segment start, segment end)
    let tl = Point::new(bounds.x, bounds.y);
    let tr = Point::new(bounds.x + bounds.width, bounds.y);
    let br = Point::new(bounds.x + bounds.width, bounds.y + bounds.height);
    let bl = Point::new(bounds.x, bounds.y + bounds.height);
    let edges = [
        (0.0, tl, tr),
        (bounds.width, tr, br),
        (bounds.width + bounds.height, br, bl),
        (2.0 * bounds.width + bounds.height, bl, tl),
    ];

    let mut best_t = 0.0;
    let mut best_dist = f64::INFINITY;
    for (offset, a, b) in edges {
        let len = distance(a, b);
        let along = if len > 0.0 {
            (((p.x - a.x) * (b.x - a.x) + (p.y - a.y) * (b.y - a.y)) / (len * len)).clamp(0.0, 1.0)
        } else {
            0.0
        };
        let nearest = Point::new(a.x + (b.x - a.x) * along, a.y + (b.y - a.y) * along);
        let d = distance(nearest, p);
        if d < best_dist {
            best_dist = d;
            best_t = (offset + along * len) / perimeter;
        }
    }
    (best_t.rem_euclid(1.0), best_dist)
}

#[must_use]
pub fn distance(a: Point, b: Point) -> f64 {
    ((a.x - b.x).powi(2) + (a.y - b.y).powi(2)).sqrt()
}

// =============================================================================
// OBJECT PROPS
// =============================================================================

/// Text formatting for text objects.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TextStyle {
    pub bold: bool,
    pub italic: bool,
    pub size: f64,
}

impl Default for TextStyle {
    fn default() -> Self {
        Self { bold: false, italic: false, size: 14.0 }
    }
}

/// Discriminant of an object's type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectKind {
    Sticky,
    Rectangle,
    Ellipse,
    Text,
    Connector,
    Frame,
    Shape,
    Table,
}

/// Type-specific payload of a board object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ObjectProps {
    Sticky {
        text: String,
        color: String,
    },
    Rectangle {
        color: String,
        stroke_color: String,
    },
    Ellipse {
        color: String,
        stroke_color: String,
    },
    Text {
        content: String,
        style: TextStyle,
    },
    Connector {
        from: Endpoint,
        to: Endpoint,
        style: String,
        points: Vec<Point>,
    },
    Frame {
        title: String,
        color: String,
    },
    Shape {
        color: String,
        stroke_color: String,
        shape_kind: String,
    },
    Table {
        title: String,
        columns: Vec<String>,
        rows: Vec<String>,
        column_widths: Vec<f64>,
        row_heights: Vec<f64>,
        /// Cell text keyed by `"row:col"`.
        cells: HashMap<String, String>,
    },
}

impl ObjectProps {
    #[must_use]
    pub fn kind(&self) -> ObjectKind {
        match self {
            Self::Sticky { .. } => ObjectKind::Sticky,
            Self::Rectangle { .. } => ObjectKind::Rectangle,
            Self::Ellipse { .. } => ObjectKind::Ellipse,
            Self::Text { .. } => ObjectKind::Text,
            Self::Connector { .. } => ObjectKind::Connector,
            Self::Frame { .. } => ObjectKind::Frame,
            Self::Shape { .. } => ObjectKind::Shape,
            Self::Table { .. } => ObjectKind::Table,
        }
    }

    /// Default payload for a freshly created object of `kind`.
    #[must_use]
    pub fn defaults(kind: ObjectKind) -> Self {
        match kind {
            ObjectKind::Sticky => Self::Sticky { text: String::new(), color: "#FFEB3B".into() },
            ObjectKind::Rectangle => {
                Self::Rectangle { color: "#90CAF9".into(), stroke_color: "#1E88E5".into() }
            }
            ObjectKind::Ellipse => {
                Self::Ellipse { color: "#A5D6A7".into(), stroke_color: "#43A047".into() }
            }
            ObjectKind::Text => Self::Text { content: String::new(), style: TextStyle::default() },
            ObjectKind::Connector => Self::Connector {
                from: Endpoint::at_point(Point::new(0.0, 0.0)),
                to: Endpoint::at_point(Point::new(0.0, 0.0)),
                style: "solid".into(),
                points: Vec::new(),
            },
            ObjectKind::Frame => Self::Frame { title: "Frame".into(), color: "#F5F5F5".into() },
            ObjectKind::Shape => Self::Shape {
                color: "#FFCC80".into(),
                stroke_color: "#FB8C00".into(),
                shape_kind: "diamond".into(),
            },
            ObjectKind::Table => Self::Table {
                title: "Table".into(),
                columns: vec!["A".into(), "B".into()],
                rows: vec!["1".into(), "2".into()],
                column_widths: vec![120.0, 120.0],
                row_heights: vec![32.0, 32.0],
                cells: HashMap::new(),
            },
        }
    }
}

// =============================================================================
// BOARD OBJECT
// =============================================================================

/// One visual entity on a board.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoardObject {
    pub id: Uuid,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    /// Degrees, always in [0, 360).
    pub rotation: f64,
    pub created_by: Option<Uuid>,
    /// Back-reference to the containing frame, if any. Not ownership: frame
    /// `children` lists are derived from this field, never stored.
    pub parent_frame_id: Option<Uuid>,
    pub props: ObjectProps,
}

impl BoardObject {
    /// Build a new object with invariants applied: fresh id, size floored at
    /// [`MIN_SIZE`], rotation zero, no parent (containment is computed by the
    /// object store at create time).
    #[must_use]
    pub fn new(
        x: f64,
        y: f64,
        width: f64,
        height: f64,
        props: ObjectProps,
        created_by: Option<Uuid>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            x,
            y,
            width: width.max(MIN_SIZE),
            height: height.max(MIN_SIZE),
            rotation: 0.0,
            created_by,
            parent_frame_id: None,
            props,
        }
    }

    #[must_use]
    pub fn kind(&self) -> ObjectKind {
        self.props.kind()
    }

    #[must_use]
    pub fn is_frame(&self) -> bool {
        self.kind() == ObjectKind::Frame
    }

    #[must_use]
    pub fn is_connector(&self) -> bool {
        self.kind() == ObjectKind::Connector
    }

    #[must_use]
    pub fn bounds(&self) -> Bounds {
        Bounds { x: self.x, y: self.y, width: self.width, height: self.height }
    }

    #[must_use]
    pub fn center(&self) -> Point {
        self.bounds().center()
    }
}

#[cfg(test)]
#[path = "model_test.rs"]
mod tests;
