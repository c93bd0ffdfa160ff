use crate::my_types::*;

/// Scale of the enclosing triangle relative to the point cloud extent
const SUPER_TRIANGLE_SCALE: f64 = 1000.;

/// Triangles with a smaller doubled area are treated as degenerate
const DEGENERATE_AREA: f64 = 1e-9;

/// A connected set of 2D vertices with Delaunay triangles and the implied edges.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Mesh {
    pub points: Vec<Vector2d>,
    pub triangles: Vec<[usize; 3]>,
    /// Unique undirected edges, `[a, b]` with `a < b`
    pub edges: Vec<[usize; 2]>,
}

impl Mesh {
    /// Triangulate a point set. Exact duplicates are dropped, the first
    /// occurrence wins. Collinear input has no triangles; its points are
    /// chained in sorted order instead.
    pub fn build(points: &[Vector2d]) -> Mesh {
        let mut unique: Vec<Vector2d> = Vec::with_capacity(points.len());
        for p in points {
            if !unique.iter().any(|q| q == p) {
                unique.push(*p);
            }
        }

        let triangles = triangulate(&unique);
        let edges = if triangles.is_empty() {
            chain_edges(&unique)
        } else {
            triangle_edges(&triangles)
        };

        Mesh {
            points: unique,
            triangles,
            edges,
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Mean of the vertices, `None` for an empty mesh
    pub fn centroid(&self) -> Option<Vector2d> {
        if self.points.is_empty() {
            return None;
        }
        let n = self.points.len() as f64;
        let sum = self
            .points
            .iter()
            .fold(Vector2d::zeros(), |acc, p| acc + p);
        if sum.iter().all(|v| v.is_finite()) {
            return Some(sum / n);
        }
        // coordinates near f64::MAX
        Some(
            self.points
                .iter()
                .fold(Vector2d::zeros(), |acc, p| acc + p / n),
        )
    }

    pub fn edge_length(&self, edge: [usize; 2]) -> f64 {
        (self.points[edge[0]] - self.points[edge[1]]).norm()
    }

    /// Length of the longest edge, 0 for a mesh without edges
    pub fn longest_edge(&self) -> f64 {
        self.edges
            .iter()
            .map(|e| self.edge_length(*e))
            .fold(0., f64::max)
    }

    /// Copy of the mesh moved by `offset`
    pub fn translated(&self, offset: Vector2d) -> Mesh {
        Mesh {
            points: self.points.iter().map(|p| p + offset).collect(),
            triangles: self.triangles.clone(),
            edges: self.edges.clone(),
        }
    }

    /// Cut every edge longer than `max_edge_length` and return the connected
    /// components, ordered by their smallest vertex index in `self`.
    /// Triangles survive only when all three of their edges do.
    pub fn split(&self, max_edge_length: f64) -> Vec<Mesh> {
        let kept: Vec<[usize; 2]> = self
            .edges
            .iter()
            .filter(|e| self.edge_length(**e) <= max_edge_length)
            .cloned()
            .collect();

        let mut components = DisjointSet::new(self.points.len());
        for e in kept.iter() {
            components.union(e[0], e[1]);
        }

        // component root -> output mesh index, plus vertex -> local index
        let mut mesh_of_root = vec![usize::MAX; self.points.len()];
        let mut local_index = vec![0; self.points.len()];
        let mut meshes: Vec<Mesh> = vec![];
        for (i, p) in self.points.iter().enumerate() {
            let root = components.find(i);
            if mesh_of_root[root] == usize::MAX {
                mesh_of_root[root] = meshes.len();
                meshes.push(Mesh::default());
            }
            let mesh = &mut meshes[mesh_of_root[root]];
            local_index[i] = mesh.points.len();
            mesh.points.push(*p);
        }

        for e in kept.iter() {
            let mesh = &mut meshes[mesh_of_root[components.find(e[0])]];
            mesh.edges.push([local_index[e[0]], local_index[e[1]]]);
        }
        for t in self.triangles.iter() {
            let all_kept = [[t[0], t[1]], [t[1], t[2]], [t[2], t[0]]]
                .iter()
                .all(|e| (self.points[e[0]] - self.points[e[1]]).norm() <= max_edge_length);
            if all_kept {
                let mesh = &mut meshes[mesh_of_root[components.find(t[0])]];
                mesh.triangles
                    .push([local_index[t[0]], local_index[t[1]], local_index[t[2]]]);
            }
        }

        for mesh in meshes.iter_mut() {
            for e in mesh.edges.iter_mut() {
                e.sort_unstable();
            }
            mesh.edges.sort_unstable();
        }
        meshes
    }
}

/// Twice the signed area of (a, b, c), positive for counter-clockwise order
fn orientation(a: &Vector2d, b: &Vector2d, c: &Vector2d) -> f64 {
    (b.x - a.x) * (c.y - a.y) - (b.y - a.y) * (c.x - a.x)
}

/// True when `p` lies strictly inside the circumcircle of the
/// counter-clockwise triangle (a, b, c)
fn in_circumcircle(a: &Vector2d, b: &Vector2d, c: &Vector2d, p: &Vector2d) -> bool {
    let (ax, ay) = (a.x - p.x, a.y - p.y);
    let (bx, by) = (b.x - p.x, b.y - p.y);
    let (cx, cy) = (c.x - p.x, c.y - p.y);
    let det = (ax * ax + ay * ay) * (bx * cy - cx * by) - (bx * bx + by * by) * (ax * cy - cx * ay)
        + (cx * cx + cy * cy) * (ax * by - bx * ay);
    det > 0.
}

fn counter_clockwise(vertices: &[Vector2d], t: [usize; 3]) -> [usize; 3] {
    if orientation(&vertices[t[0]], &vertices[t[1]], &vertices[t[2]]) < 0. {
        [t[0], t[2], t[1]]
    } else {
        t
    }
}

/// Bowyer-Watson incremental Delaunay triangulation.
/// ref https://en.wikipedia.org/wiki/Bowyer%E2%80%93Watson_algorithm
fn triangulate(points: &[Vector2d]) -> Vec<[usize; 3]> {
    let n = points.len();
    if n < 3 {
        return vec![];
    }

    let (mut min, mut max) = (points[0], points[0]);
    for p in points.iter() {
        min = min.inf(p);
        max = max.sup(p);
    }
    let extent = f64::max(max.x - min.x, max.y - min.y).max(1.);
    let mid = 0.5 * (min + max);
    let s = SUPER_TRIANGLE_SCALE * extent;

    let mut vertices = points.to_vec();
    vertices.push(mid + Vector2d::new(-s, -s));
    vertices.push(mid + Vector2d::new(s, -s));
    vertices.push(mid + Vector2d::new(0., s));

    let mut triangles = vec![counter_clockwise(&vertices, [n, n + 1, n + 2])];
    for i in 0..n {
        let p = vertices[i];
        let (bad, good): (Vec<[usize; 3]>, Vec<[usize; 3]>) = triangles
            .into_iter()
            .partition(|t| in_circumcircle(&vertices[t[0]], &vertices[t[1]], &vertices[t[2]], &p));

        // cavity boundary: edges of bad triangles not shared with another bad triangle
        let mut boundary: Vec<[usize; 2]> = vec![];
        for t in bad.iter() {
            for e in [[t[0], t[1]], [t[1], t[2]], [t[2], t[0]]] {
                let shared = bad.iter().filter(|u| has_edge(u, e)).count() > 1;
                if !shared {
                    boundary.push(e);
                }
            }
        }

        triangles = good;
        for e in boundary {
            triangles.push(counter_clockwise(&vertices, [e[0], e[1], i]));
        }
    }

    let mut triangles: Vec<[usize; 3]> = triangles
        .into_iter()
        .filter(|t| t.iter().all(|&v| v < n))
        .filter(|t| orientation(&points[t[0]], &points[t[1]], &points[t[2]]).abs() > DEGENERATE_AREA)
        .collect();

    // a finite super triangle can swallow thin triangles along the hull
    if !triangles.is_empty() && fill_hull_pockets(points, &mut triangles) {
        legalize(points, &mut triangles);
    }
    triangles
}

/// Directed edges of counter-clockwise triangles that have no twin, so the
/// covered region lies on their left.
fn boundary_edges(triangles: &[[usize; 3]]) -> Vec<[usize; 2]> {
    let directed: Vec<[usize; 2]> = triangles
        .iter()
        .flat_map(|t| [[t[0], t[1]], [t[1], t[2]], [t[2], t[0]]])
        .collect();
    let mut boundary: Vec<[usize; 2]> = directed
        .iter()
        .filter(|e| !directed.contains(&[e[1], e[0]]))
        .cloned()
        .collect();
    boundary.sort_unstable();
    boundary
}

/// No point other than the corners lies inside or on the counter-clockwise triangle
fn is_empty_triangle(points: &[Vector2d], t: [usize; 3]) -> bool {
    let [a, b, c] = t.map(|i| points[i]);
    points.iter().enumerate().all(|(i, p)| {
        t.contains(&i)
            || orientation(&a, &b, p) < 0.
            || orientation(&b, &c, p) < 0.
            || orientation(&c, &a, p) < 0.
    })
}

/// The open segments (p0, p1) and (q0, q1) cross at a single interior point
fn segments_cross(p0: &Vector2d, p1: &Vector2d, q0: &Vector2d, q1: &Vector2d) -> bool {
    orientation(p0, p1, q0) * orientation(p0, p1, q1) < 0.
        && orientation(q0, q1, p0) * orientation(q0, q1, p1) < 0.
}

/// Next triangle that closes a notch in the boundary or attaches a point no
/// triangle uses yet.
fn next_pocket_triangle(points: &[Vector2d], triangles: &[[usize; 3]]) -> Option<[usize; 3]> {
    let boundary = boundary_edges(triangles);

    // reflex boundary vertex v between u -> v -> w
    for &[u, v] in boundary.iter() {
        let mut outgoing = boundary.iter().filter(|e| e[0] == v);
        let incoming = boundary.iter().filter(|e| e[1] == v).count();
        let (Some(&[_, w]), None) = (outgoing.next(), outgoing.next()) else {
            continue;
        };
        if incoming != 1 || w == u {
            continue;
        }
        if orientation(&points[u], &points[v], &points[w]) < -DEGENERATE_AREA
            && is_empty_triangle(points, [u, w, v])
        {
            return Some([u, w, v]);
        }
    }

    let edges = triangle_edges(triangles);
    let crosses_any = |a: usize, b: usize| {
        edges.iter().any(|e| {
            !e.contains(&a)
                && !e.contains(&b)
                && segments_cross(&points[a], &points[b], &points[e[0]], &points[e[1]])
        })
    };
    for p in 0..points.len() {
        if triangles.iter().any(|t| t.contains(&p)) {
            continue;
        }
        for &[a, b] in boundary.iter() {
            if orientation(&points[a], &points[b], &points[p]) < -DEGENERATE_AREA
                && is_empty_triangle(points, [b, a, p])
                && !crosses_any(a, p)
                && !crosses_any(b, p)
            {
                return Some([b, a, p]);
            }
        }
    }
    None
}

/// Add triangles until the boundary has no notch left. Returns whether
/// anything was added.
fn fill_hull_pockets(points: &[Vector2d], triangles: &mut Vec<[usize; 3]>) -> bool {
    let mut filled = false;
    // a triangulation of n points has fewer than 2n triangles
    for _ in 0..2 * points.len() {
        match next_pocket_triangle(points, triangles) {
            Some(t) => {
                triangles.push(t);
                filled = true;
            }
            None => break,
        }
    }
    filled
}

/// Lawson flips until every interior edge is locally Delaunay.
fn legalize(points: &[Vector2d], triangles: &mut [[usize; 3]]) {
    let max_passes = triangles.len() * triangles.len() + 1;
    for _ in 0..max_passes {
        let mut flipped = false;
        for a in 0..triangles.len() {
            for b in a + 1..triangles.len() {
                let (ta, tb) = (triangles[a], triangles[b]);
                let shared: Vec<usize> = ta.iter().filter(|v| tb.contains(v)).cloned().collect();
                if shared.len() != 2 {
                    continue;
                }
                let (Some(&pa), Some(&pb)) = (
                    ta.iter().find(|v| !tb.contains(v)),
                    tb.iter().find(|v| !ta.contains(v)),
                ) else {
                    continue;
                };
                if !in_circumcircle(&points[ta[0]], &points[ta[1]], &points[ta[2]], &points[pb]) {
                    continue;
                }
                let first = [pa, pb, shared[0]];
                let second = [pb, pa, shared[1]];
                let area = |t: [usize; 3]| orientation(&points[t[0]], &points[t[1]], &points[t[2]]).abs();
                if area(first) <= DEGENERATE_AREA || area(second) <= DEGENERATE_AREA {
                    continue;
                }
                triangles[a] = counter_clockwise(points, first);
                triangles[b] = counter_clockwise(points, second);
                flipped = true;
            }
        }
        if !flipped {
            return;
        }
    }
}

fn has_edge(t: &[usize; 3], e: [usize; 2]) -> bool {
    t.contains(&e[0]) && t.contains(&e[1])
}

fn triangle_edges(triangles: &[[usize; 3]]) -> Vec<[usize; 2]> {
    let mut edges: Vec<[usize; 2]> = triangles
        .iter()
        .flat_map(|t| [[t[0], t[1]], [t[1], t[2]], [t[2], t[0]]])
        .map(|e| [e[0].min(e[1]), e[0].max(e[1])])
        .collect();
    edges.sort_unstable();
    edges.dedup();
    edges
}

/// Edges between consecutive points in lexicographic order
fn chain_edges(points: &[Vector2d]) -> Vec<[usize; 2]> {
    let mut order: Vec<usize> = (0..points.len()).collect();
    order.sort_by(|&a, &b| {
        points[a]
            .x
            .total_cmp(&points[b].x)
            .then(points[a].y.total_cmp(&points[b].y))
    });
    let mut edges: Vec<[usize; 2]> = order
        .windows(2)
        .map(|w| [w[0].min(w[1]), w[0].max(w[1])])
        .collect();
    edges.sort_unstable();
    edges
}

struct DisjointSet {
    parent: Vec<usize>,
}

impl DisjointSet {
    fn new(n: usize) -> Self {
        DisjointSet {
            parent: (0..n).collect(),
        }
    }

    fn find(&mut self, mut i: usize) -> usize {
        while self.parent[i] != i {
            self.parent[i] = self.parent[self.parent[i]];
            i = self.parent[i];
        }
        i
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        // smaller root wins so component order follows vertex order
        if ra < rb {
            self.parent[rb] = ra;
        } else if rb < ra {
            self.parent[ra] = rb;
        }
    }
}
