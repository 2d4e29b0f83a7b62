//! Exact outlines of labeled components along pixel edges.
//!
//! Vertices are pixel corners `(x = col, y = row)` with row 0 south. Every
//! boundary edge is directed with its own label on the left, so exteriors
//! come out counter-clockwise and holes clockwise. Where two pixels of one
//! label touch only at a corner the walk turns right, keeping the
//! 8-connected component in a single ring pinched at that corner.

use std::collections::{BTreeMap, HashMap};

use geo::Contains;

use super::label::Labels;
use crate::geometry::{LineString, Point, Polygon};

type Vertex = (i64, i64);

#[derive(Debug, Clone, Copy)]
struct Edge {
    from: Vertex,
    to: Vertex,
}

impl Edge {
    fn dir(&self) -> (i64, i64) {
        (self.to.0 - self.from.0, self.to.1 - self.from.1)
    }
}

/// Rings of one component in pixel-corner coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct Outline {
    pub exterior: Vec<Vertex>,
    pub holes: Vec<Vec<Vertex>>,
}

/// Outlines of every label, keyed by label. A component normally yields one
/// outline; each exterior ring gets the holes that fall inside it.
pub fn trace_outlines(labels: &Labels) -> BTreeMap<u32, Vec<Outline>> {
    let mut edges: BTreeMap<u32, Vec<Edge>> = BTreeMap::new();
    for r in 0..labels.height {
        for c in 0..labels.width {
            let l = labels.get(r, c);
            if l == 0 {
                continue;
            }
            let (ri, ci) = (r as isize, c as isize);
            let (x, y) = (c as i64, r as i64);
            let out = edges.entry(l).or_default();
            if labels.get_signed(ri - 1, ci) != l {
                out.push(Edge { from: (x, y), to: (x + 1, y) });
            }
            if labels.get_signed(ri, ci + 1) != l {
                out.push(Edge { from: (x + 1, y), to: (x + 1, y + 1) });
            }
            if labels.get_signed(ri + 1, ci) != l {
                out.push(Edge { from: (x + 1, y + 1), to: (x, y + 1) });
            }
            if labels.get_signed(ri, ci - 1) != l {
                out.push(Edge { from: (x, y + 1), to: (x, y) });
            }
        }
    }
    edges
        .into_iter()
        .map(|(label, e)| (label, assemble(link_rings(&e))))
        .collect()
}

/// Walk directed edges into closed rings, collinear vertices removed.
fn link_rings(edges: &[Edge]) -> Vec<Vec<Vertex>> {
    let mut outgoing: HashMap<Vertex, Vec<usize>> = HashMap::with_capacity(edges.len());
    for (i, e) in edges.iter().enumerate() {
        outgoing.entry(e.from).or_default().push(i);
    }
    let mut used = vec![false; edges.len()];
    let mut rings = Vec::new();

    for start in 0..edges.len() {
        if used[start] {
            continue;
        }
        let mut ring = Vec::new();
        let mut cur = start;
        loop {
            used[cur] = true;
            ring.push(edges[cur].from);
            let Some(next) = next_edge(&edges[cur], &outgoing, edges, &used) else {
                break;
            };
            cur = next;
        }
        rings.push(simplify(&ring));
    }
    rings
}

/// Unused edge leaving `e.to`, preferring a right turn, then straight on.
fn next_edge(e: &Edge, outgoing: &HashMap<Vertex, Vec<usize>>, edges: &[Edge], used: &[bool]) -> Option<usize> {
    let candidates = outgoing.get(&e.to)?;
    let (dx, dy) = e.dir();
    let rank = |i: &usize| {
        let d = edges[*i].dir();
        if d == (dy, -dx) {
            0
        } else if d == (dx, dy) {
            1
        } else {
            2
        }
    };
    candidates.iter().copied().filter(|&i| !used[i]).min_by_key(|i| rank(i))
}

/// Drop vertices where the walk goes straight on.
fn simplify(ring: &[Vertex]) -> Vec<Vertex> {
    let n = ring.len();
    (0..n)
        .filter(|&i| {
            let prev = ring[(i + n - 1) % n];
            let cur = ring[i];
            let next = ring[(i + 1) % n];
            let a = (cur.0 - prev.0, cur.1 - prev.1);
            let b = (next.0 - cur.0, next.1 - cur.1);
            a.0 * b.1 - a.1 * b.0 != 0
        })
        .map(|i| ring[i])
        .collect()
}

/// Twice the shoelace area, positive for counter-clockwise rings.
fn twice_area(ring: &[Vertex]) -> i64 {
    let n = ring.len();
    (0..n)
        .map(|i| {
            let (a, b) = (ring[i], ring[(i + 1) % n]);
            a.0 * b.1 - b.0 * a.1
        })
        .sum()
}

fn to_polygon(ring: &[Vertex]) -> Polygon {
    let coords: Vec<(f64, f64)> = ring.iter().map(|&(x, y)| (x as f64, y as f64)).collect();
    Polygon::new(LineString::from(coords), Vec::new())
}

/// Pair each hole with the smallest exterior containing it.
fn assemble(rings: Vec<Vec<Vertex>>) -> Vec<Outline> {
    let (exteriors, holes): (Vec<_>, Vec<_>) = rings.into_iter().partition(|r| twice_area(r) > 0);
    let shapes: Vec<(Polygon, i64)> = exteriors.iter().map(|r| (to_polygon(r), twice_area(r))).collect();
    let mut outlines: Vec<Outline> =
        exteriors.into_iter().map(|exterior| Outline { exterior, holes: Vec::new() }).collect();

    for hole in holes {
        let inner = point_inside(&hole);
        let owner = shapes
            .iter()
            .enumerate()
            .filter(|(_, (shape, _))| shape.contains(&inner))
            .min_by_key(|(_, (_, area))| *area)
            .map(|(i, _)| i);
        if let Some(i) = owner {
            outlines[i].holes.push(hole);
        }
    }
    outlines
}

/// Centre of the pixel on the right of a hole's first edge.
fn point_inside(hole: &[Vertex]) -> Point {
    let a = hole[0];
    let b = hole[1 % hole.len()];
    let (dx, dy) = ((b.0 - a.0).signum() as f64, (b.1 - a.1).signum() as f64);
    Point::new(a.0 as f64 + 0.5 * dx + 0.5 * dy, a.1 as f64 + 0.5 * dy - 0.5 * dx)
}
