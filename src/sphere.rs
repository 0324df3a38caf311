//! Unit direction sets with adjacency for discretized spherical search
//! and numerical integration
//!
//! Two constructions are provided: an icosahedron subdivision mesh with
//! exact triangulation edges, and a golden-spiral (Fibonacci) point set
//! with nearest-neighbor adjacency for arbitrary direction counts.

use std::collections::HashMap;

/// Golden ratio, used by both constructions
const PHI: f64 = 1.618033988749894848;

/// A set of unit directions plus an undirected edge structure. The edges
/// drive local-maximum detection; the vertices alone serve as an
/// integration rule.
#[derive(Debug, Clone)]
pub struct Sphere {
    pub vertices: Vec<[f64; 3]>,
    pub edges: Vec<[usize; 2]>,
    neighbors: Vec<Vec<usize>>,
}

impl Sphere {
    /// Build from vertices and an edge list; neighbor lists are derived
    /// once here
    pub fn new(vertices: Vec<[f64; 3]>, edges: Vec<[usize; 2]>) -> Self {
        let mut neighbors: Vec<Vec<usize>> = vec![Vec::new(); vertices.len()];
        for &[a, b] in &edges {
            if !neighbors[a].contains(&b) {
                neighbors[a].push(b);
            }
            if !neighbors[b].contains(&a) {
                neighbors[b].push(a);
            }
        }
        Sphere {
            vertices,
            edges,
            neighbors,
        }
    }

    /// Graph neighbors of a vertex
    pub fn neighbors(&self, vertex: usize) -> &[usize] {
        &self.neighbors[vertex]
    }

    /// Number of directions
    pub fn len(&self) -> usize {
        self.vertices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    /// Icosahedron subdivision sphere. Subdivision 0 is the plain
    /// icosahedron (12 vertices); each level quadruples the face count
    /// (42, 162, 642... vertices). Edges come from the triangulation.
    pub fn icosphere(subdivisions: u32) -> Self {
        let t = PHI;
        let mut vertices: Vec<[f64; 3]> = vec![
            [-1.0, t, 0.0],
            [1.0, t, 0.0],
            [-1.0, -t, 0.0],
            [1.0, -t, 0.0],
            [0.0, -1.0, t],
            [0.0, 1.0, t],
            [0.0, -1.0, -t],
            [0.0, 1.0, -t],
            [t, 0.0, -1.0],
            [t, 0.0, 1.0],
            [-t, 0.0, -1.0],
            [-t, 0.0, 1.0],
        ]
        .into_iter()
        .map(normalize)
        .collect();

        let mut faces: Vec<[usize; 3]> = vec![
            [0, 11, 5],
            [0, 5, 1],
            [0, 1, 7],
            [0, 7, 10],
            [0, 10, 11],
            [1, 5, 9],
            [5, 11, 4],
            [11, 10, 2],
            [10, 7, 6],
            [7, 1, 8],
            [3, 9, 4],
            [3, 4, 2],
            [3, 2, 6],
            [3, 6, 8],
            [3, 8, 9],
            [4, 9, 5],
            [2, 4, 11],
            [6, 2, 10],
            [8, 6, 7],
            [9, 8, 1],
        ];

        for _ in 0..subdivisions {
            let mut midpoint_cache: HashMap<(usize, usize), usize> = HashMap::new();
            let mut new_faces = Vec::with_capacity(faces.len() * 4);

            let mut midpoint = |a: usize, b: usize, vertices: &mut Vec<[f64; 3]>| -> usize {
                let key = (a.min(b), a.max(b));
                if let Some(&idx) = midpoint_cache.get(&key) {
                    return idx;
                }
                let va = vertices[a];
                let vb = vertices[b];
                let mid = normalize([
                    (va[0] + vb[0]) / 2.0,
                    (va[1] + vb[1]) / 2.0,
                    (va[2] + vb[2]) / 2.0,
                ]);
                vertices.push(mid);
                let idx = vertices.len() - 1;
                midpoint_cache.insert(key, idx);
                idx
            };

            for &[a, b, c] in &faces {
                let ab = midpoint(a, b, &mut vertices);
                let bc = midpoint(b, c, &mut vertices);
                let ca = midpoint(c, a, &mut vertices);
                new_faces.push([a, ab, ca]);
                new_faces.push([b, bc, ab]);
                new_faces.push([c, ca, bc]);
                new_faces.push([ab, bc, ca]);
            }
            faces = new_faces;
        }

        let edges = edges_from_faces(&faces);
        Sphere::new(vertices, edges)
    }

    /// Golden-spiral point set with 6-nearest-neighbor adjacency
    ///
    /// Points are near-uniform on the sphere for any count; adjacency is
    /// symmetrized so the neighbor relation is undirected.
    pub fn fibonacci(n: usize) -> Self {
        let golden_angle = 2.0 * std::f64::consts::PI * (1.0 - 1.0 / PHI);
        let mut vertices = Vec::with_capacity(n);
        for i in 0..n {
            let y = 1.0 - 2.0 * (i as f64 + 0.5) / n as f64;
            let r = (1.0 - y * y).max(0.0).sqrt();
            let phi = golden_angle * i as f64;
            vertices.push([r * phi.cos(), y, r * phi.sin()]);
        }

        // 6 nearest neighbors per vertex, deduplicated into an edge list
        let k = 6.min(n.saturating_sub(1));
        let mut edges = Vec::new();
        for i in 0..n {
            let mut dists: Vec<(usize, f64)> = (0..n)
                .filter(|&j| j != i)
                .map(|j| {
                    let d = [
                        vertices[i][0] - vertices[j][0],
                        vertices[i][1] - vertices[j][1],
                        vertices[i][2] - vertices[j][2],
                    ];
                    (j, d[0] * d[0] + d[1] * d[1] + d[2] * d[2])
                })
                .collect();
            dists.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap());
            for &(j, _) in dists.iter().take(k) {
                edges.push([i.min(j), i.max(j)]);
            }
        }
        edges.sort();
        edges.dedup();

        Sphere::new(vertices, edges)
    }

    /// Default coarse-search direction set (100 directions)
    pub fn search_default() -> Self {
        Sphere::fibonacci(100)
    }

    /// Default numerical-integration direction set (45 directions)
    pub fn integration_default() -> Self {
        Sphere::fibonacci(45)
    }
}

fn normalize(v: [f64; 3]) -> [f64; 3] {
    let n = (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt();
    [v[0] / n, v[1] / n, v[2] / n]
}

fn edges_from_faces(faces: &[[usize; 3]]) -> Vec<[usize; 2]> {
    let mut edges = Vec::with_capacity(faces.len() * 3);
    for &[a, b, c] in faces {
        for (u, v) in [(a, b), (b, c), (c, a)] {
            edges.push([u.min(v), u.max(v)]);
        }
    }
    edges.sort();
    edges.dedup();
    edges
}

/// Indices of vertices whose value strictly exceeds the value at every
/// graph neighbor
pub fn local_maxima(values: &[f64], sphere: &Sphere) -> Vec<usize> {
    let mut maxima = Vec::new();
    for v in 0..sphere.len() {
        let is_max = sphere
            .neighbors(v)
            .iter()
            .all(|&u| values[v] > values[u]);
        if is_max && !sphere.neighbors(v).is_empty() {
            maxima.push(v);
        }
    }
    maxima
}

/// Generate `num` unit directions evenly spaced in the plane
/// perpendicular to `v`
///
/// With `half` set, the directions span half a turn; otherwise a full
/// turn. Used by the numerical radial kurtosis estimator.
pub fn perpendicular_directions(v: &[f64; 3], num: usize, half: bool) -> Vec<[f64; 3]> {
    let span = if half {
        std::f64::consts::PI
    } else {
        2.0 * std::f64::consts::PI
    };
    let er = f64::EPSILON * 1e3;

    let mut out = Vec::with_capacity(num);
    for i in 0..num {
        let a = span * i as f64 / num as f64;
        let (sina, cosa) = a.sin_cos();
        if (v[0].abs() - 1.0).abs() > er {
            // general case: rotate around v starting from a vector in
            // the plane spanned by the non-x components
            let sq = (v[1] * v[1] + v[2] * v[2]).sqrt();
            out.push([
                -sq * sina,
                (v[0] * v[1] * sina - v[2] * cosa) / sq,
                (v[0] * v[2] * sina + v[1] * cosa) / sq,
            ]);
        } else {
            // v is (anti)parallel to x: the perpendicular plane is yz
            out.push([0.0, cosa, sina]);
        }
    }
    out
}

/// Cartesian unit vector to polar angles (theta from +z, phi in xy)
pub fn cart2sphere(v: &[f64; 3]) -> (f64, f64) {
    let r = (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt();
    if r == 0.0 {
        return (0.0, 0.0);
    }
    let theta = (v[2] / r).clamp(-1.0, 1.0).acos();
    let phi = v[1].atan2(v[0]);
    (theta, phi)
}

/// Polar angles back to a Cartesian unit vector
pub fn sphere2cart(theta: f64, phi: f64) -> [f64; 3] {
    let (st, ct) = theta.sin_cos();
    let (sp, cp) = phi.sin_cos();
    [st * cp, st * sp, ct]
}
