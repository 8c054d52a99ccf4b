// R-tree spatial index (§4.7). Grounded in the teacher's `RTree<T>` shape
// (Arc<RwLock<Node>>, leaf/internal split on overflow) generalized from
// `T: Clone` payloads to row-ID lists keyed by bounding box.

use parking_lot::RwLock;

use crate::index::btree::RowId;

const DEFAULT_MAX_ENTRIES: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Geometry {
    Point(Point),
    Line(Point, Point),
    Polygon(Vec<Point>),
    Box(BoundingBox),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl BoundingBox {
    pub fn from_points(points: &[Point]) -> Self {
        let mut min_x = f64::INFINITY;
        let mut min_y = f64::INFINITY;
        let mut max_x = f64::NEG_INFINITY;
        let mut max_y = f64::NEG_INFINITY;
        for p in points {
            min_x = min_x.min(p.x);
            min_y = min_y.min(p.y);
            max_x = max_x.max(p.x);
            max_y = max_y.max(p.y);
        }
        Self { min_x, min_y, max_x, max_y }
    }

    pub fn of(geom: &Geometry) -> Self {
        match geom {
            Geometry::Point(p) => BoundingBox::from_points(&[*p]),
            Geometry::Line(a, b) => BoundingBox::from_points(&[*a, *b]),
            Geometry::Polygon(pts) => BoundingBox::from_points(pts),
            Geometry::Box(b) => *b,
        }
    }

    pub fn intersects(&self, other: &BoundingBox) -> bool {
        self.min_x <= other.max_x && self.max_x >= other.min_x && self.min_y <= other.max_y && self.max_y >= other.min_y
    }

    pub fn contains(&self, other: &BoundingBox) -> bool {
        self.min_x <= other.min_x && self.min_y <= other.min_y && self.max_x >= other.max_x && self.max_y >= other.max_y
    }

    pub fn area(&self) -> f64 {
        (self.max_x - self.min_x).max(0.0) * (self.max_y - self.min_y).max(0.0)
    }

    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        BoundingBox {
            min_x: self.min_x.min(other.min_x),
            min_y: self.min_y.min(other.min_y),
            max_x: self.max_x.max(other.max_x),
            max_y: self.max_y.max(other.max_y),
        }
    }

    fn enlargement(&self, other: &BoundingBox) -> f64 {
        self.union(other).area() - self.area()
    }

    fn margin(&self) -> f64 {
        (self.max_x - self.min_x).max(0.0) + (self.max_y - self.min_y).max(0.0)
    }
}

enum Node {
    Leaf(Vec<(BoundingBox, RowId)>),
    Internal(Vec<(BoundingBox, Box<Node>)>),
}

impl Node {
    fn bbox(entries_bbox: impl Iterator<Item = BoundingBox>) -> Option<BoundingBox> {
        entries_bbox.reduce(|a, b| a.union(&b))
    }
}

pub struct RTree {
    root: RwLock<Node>,
    max_entries: usize,
}

impl RTree {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_ENTRIES)
    }

    pub fn with_capacity(max_entries: usize) -> Self {
        Self {
            root: RwLock::new(Node::Leaf(Vec::new())),
            max_entries: max_entries.max(2),
        }
    }

    pub fn insert(&self, geom: &Geometry, row_id: RowId) {
        let bbox = BoundingBox::of(geom);
        let mut root = self.root.write();
        insert_into(&mut root, bbox, row_id, self.max_entries);
        if let Some(new_root) = split_if_needed(&mut root, self.max_entries) {
            *root = new_root;
        }
    }

    pub fn search_intersects(&self, query: &BoundingBox) -> Vec<RowId> {
        let mut out = Vec::new();
        collect(&self.root.read(), query, false, &mut out);
        out.sort_unstable();
        out.dedup();
        out
    }

    pub fn search_contains(&self, query: &BoundingBox) -> Vec<RowId> {
        let mut out = Vec::new();
        collect(&self.root.read(), query, true, &mut out);
        out.sort_unstable();
        out.dedup();
        out
    }

    pub fn find(&self, geom: &Geometry) -> Vec<RowId> {
        self.search_intersects(&BoundingBox::of(geom))
    }

    pub fn find_range(&self, box_min: Point, box_max: Point) -> Vec<RowId> {
        self.search_intersects(&BoundingBox {
            min_x: box_min.x,
            min_y: box_min.y,
            max_x: box_max.x,
            max_y: box_max.y,
        })
    }

    pub fn delete(&self, geom: &Geometry, row_id: RowId) {
        let bbox = BoundingBox::of(geom);
        let mut root = self.root.write();
        delete_from(&mut root, &bbox, row_id);
    }

    pub fn reset(&self) {
        *self.root.write() = Node::Leaf(Vec::new());
    }

    pub fn size(&self) -> usize {
        count(&self.root.read())
    }
}

impl Default for RTree {
    fn default() -> Self {
        Self::new()
    }
}

fn insert_into(node: &mut Node, bbox: BoundingBox, row_id: RowId, max_entries: usize) {
    match node {
        Node::Leaf(entries) => entries.push((bbox, row_id)),
        Node::Internal(children) => {
            let best = children
                .iter()
                .enumerate()
                .min_by(|(_, (a, _)), (_, (b, _))| {
                    a.enlargement(&bbox)
                        .partial_cmp(&b.enlargement(&bbox))
                        .unwrap_or(std::cmp::Ordering::Equal)
                        .then(a.area().partial_cmp(&b.area()).unwrap_or(std::cmp::Ordering::Equal))
                })
                .map(|(i, _)| i)
                .expect("internal node always has at least one child");

            insert_into(&mut children[best].1, bbox, row_id, max_entries);
            if let Some(new_child) = split_if_needed(&mut children[best].1, max_entries) {
                children[best] = (child_bbox(&new_child), Box::new(new_child));
            } else {
                children[best].0 = children[best].0.union(&bbox);
            }
        }
    }
}

fn child_bbox(node: &Node) -> BoundingBox {
    match node {
        Node::Leaf(entries) => Node::bbox(entries.iter().map(|(b, _)| *b)).unwrap_or(BoundingBox {
            min_x: 0.0,
            min_y: 0.0,
            max_x: 0.0,
            max_y: 0.0,
        }),
        Node::Internal(children) => Node::bbox(children.iter().map(|(b, _)| *b)).unwrap_or(BoundingBox {
            min_x: 0.0,
            min_y: 0.0,
            max_x: 0.0,
            max_y: 0.0,
        }),
    }
}

/// If `node` is over capacity, returns a replacement internal node wrapping
/// the two split halves; the caller installs it in place of `node`. Returns
/// `None` when no split is needed.
fn split_if_needed(node: &mut Node, max_entries: usize) -> Option<Node> {
    let over = match node {
        Node::Leaf(entries) => entries.len() > max_entries,
        Node::Internal(children) => children.len() > max_entries,
    };
    if !over {
        return None;
    }

    match node {
        Node::Leaf(entries) => {
            let (left, right) = split_entries(std::mem::take(entries));
            Some(Node::Internal(vec![
                (Node::bbox(left.iter().map(|(b, _)| *b)).unwrap(), Box::new(Node::Leaf(left))),
                (Node::bbox(right.iter().map(|(b, _)| *b)).unwrap(), Box::new(Node::Leaf(right))),
            ]))
        }
        Node::Internal(children) => {
            let (left, right) = split_children(std::mem::take(children));
            Some(Node::Internal(vec![
                (Node::bbox(left.iter().map(|(b, _)| *b)).unwrap(), Box::new(Node::Internal(left))),
                (Node::bbox(right.iter().map(|(b, _)| *b)).unwrap(), Box::new(Node::Internal(right))),
            ]))
        }
    }
}

/// Chooses whichever axis (x or y) yields the smaller total margin when the
/// entries are sorted along it and split at the midpoint — the R*-tree
/// "minimize margin" heuristic, simplified to a single candidate split per
/// axis rather than every possible distribution.
fn split_entries(mut entries: Vec<(BoundingBox, RowId)>) -> (Vec<(BoundingBox, RowId)>, Vec<(BoundingBox, RowId)>) {
    let mid = entries.len() / 2;

    entries.sort_by(|a, b| a.0.min_x.partial_cmp(&b.0.min_x).unwrap());
    let margin_x = margin_of_split(&entries, mid);

    let mut by_y = entries.clone();
    by_y.sort_by(|a, b| a.0.min_y.partial_cmp(&b.0.min_y).unwrap());
    let margin_y = margin_of_split(&by_y, mid);

    let mut sorted = if margin_x <= margin_y { entries } else { by_y };
    let right = sorted.split_off(mid);
    (sorted, right)
}

fn margin_of_split(sorted: &[(BoundingBox, RowId)], mid: usize) -> f64 {
    let left_bbox = Node::bbox(sorted[..mid].iter().map(|(b, _)| *b));
    let right_bbox = Node::bbox(sorted[mid..].iter().map(|(b, _)| *b));
    left_bbox.map(|b| b.margin()).unwrap_or(0.0) + right_bbox.map(|b| b.margin()).unwrap_or(0.0)
}

fn split_children(
    mut children: Vec<(BoundingBox, Box<Node>)>,
) -> (Vec<(BoundingBox, Box<Node>)>, Vec<(BoundingBox, Box<Node>)>) {
    let mid = children.len() / 2;
    children.sort_by(|a, b| a.0.min_x.partial_cmp(&b.0.min_x).unwrap());
    let right = children.split_off(mid);
    (children, right)
}

fn collect(node: &Node, query: &BoundingBox, require_contains: bool, out: &mut Vec<RowId>) {
    match node {
        Node::Leaf(entries) => {
            for (bbox, row_id) in entries {
                let matches = if require_contains { query.contains(bbox) } else { bbox.intersects(query) };
                if matches {
                    out.push(*row_id);
                }
            }
        }
        Node::Internal(children) => {
            for (bbox, child) in children {
                if bbox.intersects(query) {
                    collect(child, query, require_contains, out);
                }
            }
        }
    }
}

fn delete_from(node: &mut Node, bbox: &BoundingBox, row_id: RowId) -> bool {
    match node {
        Node::Leaf(entries) => {
            let before = entries.len();
            entries.retain(|(b, id)| !(*id == row_id && b.intersects(bbox)));
            entries.len() != before
        }
        Node::Internal(children) => {
            let mut changed = false;
            for (child_bbox, child) in children.iter_mut() {
                if child_bbox.intersects(bbox) && delete_from(child, bbox, row_id) {
                    changed = true;
                }
            }
            changed
        }
    }
}

fn count(node: &Node) -> usize {
    match node {
        Node::Leaf(entries) => entries.len(),
        Node::Internal(children) => children.iter().map(|(_, c)| count(c)).sum(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bx(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Geometry {
        Geometry::Box(BoundingBox { min_x, min_y, max_x, max_y })
    }

    #[test]
    fn intersects_and_contains() {
        let tree = RTree::new();
        tree.insert(&bx(0.0, 0.0, 1.0, 1.0), 0);
        tree.insert(&bx(5.0, 5.0, 6.0, 6.0), 1);

        let hits = tree.search_intersects(&BoundingBox { min_x: 0.5, min_y: 0.5, max_x: 5.5, max_y: 5.5 });
        assert_eq!(hits, vec![0, 1]);

        let contained = tree.search_contains(&BoundingBox { min_x: -1.0, min_y: -1.0, max_x: 2.0, max_y: 2.0 });
        assert_eq!(contained, vec![0]);
    }

    #[test]
    fn splits_when_capacity_exceeded() {
        let tree = RTree::with_capacity(4);
        for i in 0..20 {
            let f = i as f64;
            tree.insert(&bx(f, f, f + 0.5, f + 0.5), i);
        }
        assert_eq!(tree.size(), 20);
        let all = tree.search_intersects(&BoundingBox {
            min_x: -1.0,
            min_y: -1.0,
            max_x: 100.0,
            max_y: 100.0,
        });
        assert_eq!(all.len(), 20);
    }

    #[test]
    fn delete_removes_entry() {
        let tree = RTree::new();
        let geom = bx(0.0, 0.0, 1.0, 1.0);
        tree.insert(&geom, 42);
        assert_eq!(tree.size(), 1);
        tree.delete(&geom, 42);
        assert_eq!(tree.size(), 0);
    }

    #[test]
    fn reset_clears_tree() {
        let tree = RTree::new();
        tree.insert(&bx(0.0, 0.0, 1.0, 1.0), 0);
        tree.reset();
        assert_eq!(tree.size(), 0);
    }
}
