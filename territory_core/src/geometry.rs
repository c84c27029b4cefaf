//! Polygon validity checks and repair.
//!
//! A territory boundary is a single exterior ring. It is valid when it is
//! closed, has at least three distinct vertices, encloses a non-zero area
//! and never touches itself except at neighbouring edges' shared vertex.

use crate::projection::ProjectionError;
use geo::algorithm::line_intersection::{line_intersection, LineIntersection};
use geo::algorithm::orient::{Direction, Orient};
use geo::{Area, BoundingRect, Coord, Line, LineString, Polygon};
use std::fmt;
use thiserror::Error;

/// Why a ring failed validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidReason {
    NonFinite,
    TooFewVertices,
    ZeroArea,
    SelfIntersection,
}

impl fmt::Display for InvalidReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            InvalidReason::NonFinite => "non-finite coordinate",
            InvalidReason::TooFewVertices => "fewer than 3 distinct vertices",
            InvalidReason::ZeroArea => "zero area",
            InvalidReason::SelfIntersection => "ring self-intersection",
        };
        write!(f, "{}", text)
    }
}

/// Errors while turning a boundary into a usable polygon.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GeometryError {
    #[error("Unparseable boundary literal: {0}")]
    Parse(String),
    
    #[error("Boundary has {0} vertices, need at least 3")]
    TooFewVertices(usize),
    
    #[error("Invalid geometry: {0}")]
    Invalid(InvalidReason),
    
    #[error("Projection failed: {0}")]
    Projection(#[from] ProjectionError),
    
    #[error("Territory invalid after projection: {0}")]
    InvalidAfterProjection(InvalidReason),
}

/// Relative tolerance for collinearity and zero-area tests
const TOLERANCE: f64 = 1e-12;

fn cross(o: Coord<f64>, a: Coord<f64>, b: Coord<f64>) -> f64 {
    (a.x - o.x) * (b.y - o.y) - (a.y - o.y) * (b.x - o.x)
}

fn is_collinear(p: Coord<f64>, v: Coord<f64>, n: Coord<f64>) -> bool {
    let scale = ((v.x - p.x).hypot(v.y - p.y)) * ((n.x - v.x).hypot(n.y - v.y));
    cross(p, v, n).abs() <= TOLERANCE * scale.max(f64::MIN_POSITIVE)
}

/// Ring vertices without the closing duplicate.
fn open_ring(ring: &LineString<f64>) -> Vec<Coord<f64>> {
    let mut coords = ring.0.clone();
    if coords.len() > 1 && coords.first() == coords.last() {
        coords.pop();
    }
    coords
}

/// Checks a polygon's exterior ring.
pub fn check(polygon: &Polygon<f64>) -> Result<(), InvalidReason> {
    let ring = polygon.exterior();
    if ring.0.iter().any(|c| !c.x.is_finite() || !c.y.is_finite()) {
        return Err(InvalidReason::NonFinite);
    }
    
    let vertices = open_ring(ring);
    let mut distinct = vertices.clone();
    distinct.sort_by(|a, b| a.x.total_cmp(&b.x).then(a.y.total_cmp(&b.y)));
    distinct.dedup();
    if distinct.len() < 3 {
        return Err(InvalidReason::TooFewVertices);
    }
    
    let edges: Vec<Line<f64>> = ring.lines().collect();
    let n = edges.len();
    for i in 0..n {
        for j in (i + 1)..n {
            let adjacent = j == i + 1 || (i == 0 && j == n - 1);
            match line_intersection(edges[i], edges[j]) {
                None => {}
                Some(LineIntersection::SinglePoint { .. }) if adjacent => {}
                Some(LineIntersection::Collinear { intersection })
                    if adjacent && intersection.start == intersection.end => {}
                Some(_) => return Err(InvalidReason::SelfIntersection),
            }
        }
    }
    
    let bbox_area = polygon
        .bounding_rect()
        .map(|r| r.width() * r.height())
        .unwrap_or(0.0);
    if polygon.unsigned_area() <= TOLERANCE * bbox_area || bbox_area == 0.0 {
        return Err(InvalidReason::ZeroArea);
    }
    
    Ok(())
}

/// Removes repeated vertices and zero-width spikes from an open ring.
fn drop_spikes(coords: &mut Vec<Coord<f64>>) {
    coords.dedup();
    while coords.len() > 1 && coords.first() == coords.last() {
        coords.pop();
    }
    
    loop {
        let n = coords.len();
        if n < 3 {
            break;
        }
        let removable = (0..n).find(|&i| {
            let prev = coords[(i + n - 1) % n];
            let next = coords[(i + 1) % n];
            prev == next || is_collinear(prev, coords[i], next)
        });
        match removable {
            Some(i) => {
                coords.remove(i);
                coords.dedup();
            }
            None => break,
        }
    }
}

/// Inserts every crossing between non-adjacent edges as a vertex on both
/// edges, so the ring only touches itself at shared vertices.
fn node_ring(coords: &[Coord<f64>]) -> Vec<Coord<f64>> {
    let n = coords.len();
    let edges: Vec<Line<f64>> = (0..n).map(|i| Line::new(coords[i], coords[(i + 1) % n])).collect();
    let mut splits: Vec<Vec<Coord<f64>>> = vec![Vec::new(); n];
    for i in 0..n {
        for j in (i + 2)..n {
            if i == 0 && j == n - 1 {
                continue;
            }
            match line_intersection(edges[i], edges[j]) {
                Some(LineIntersection::SinglePoint { intersection, .. }) => {
                    splits[i].push(intersection);
                    splits[j].push(intersection);
                }
                Some(LineIntersection::Collinear { intersection }) => {
                    for point in [intersection.start, intersection.end] {
                        splits[i].push(point);
                        splits[j].push(point);
                    }
                }
                None => {}
            }
        }
    }
    
    let mut noded = Vec::with_capacity(n);
    for (edge, mut points) in edges.iter().zip(splits) {
        let origin = edge.start;
        let distance = |c: &Coord<f64>| (c.x - origin.x).powi(2) + (c.y - origin.y).powi(2);
        points.sort_by(|a, b| distance(a).total_cmp(&distance(b)));
        noded.push(origin);
        noded.extend(points);
    }
    noded.dedup();
    while noded.len() > 1 && noded.first() == noded.last() {
        noded.pop();
    }
    noded
}

/// Splits a noded ring into simple loops at every repeated vertex.
fn split_loops(noded: Vec<Coord<f64>>) -> Vec<Vec<Coord<f64>>> {
    let mut loops = Vec::new();
    let mut stack: Vec<Coord<f64>> = Vec::with_capacity(noded.len());
    for point in noded {
        match stack.iter().position(|c| *c == point) {
            Some(k) => {
                loops.push(stack[k..].to_vec());
                stack.truncate(k + 1);
            }
            None => stack.push(point),
        }
    }
    loops.push(stack);
    loops
}

/// Repairs a ring.
///
/// Drops repeated vertices and zero-width spikes, nodes the ring at its
/// crossings and keeps the largest valid loop, closed counter-clockwise.
/// When no loop is valid the spike-free ring is returned and still fails
/// `check`.
pub fn repair(polygon: &Polygon<f64>) -> Polygon<f64> {
    let mut coords = open_ring(polygon.exterior());
    drop_spikes(&mut coords);
    let cleaned = Polygon::new(LineString::from(coords.clone()), vec![]).orient(Direction::Default);
    if coords.len() < 3 {
        return cleaned;
    }
    
    split_loops(node_ring(&coords))
        .into_iter()
        .filter_map(|mut ring| {
            drop_spikes(&mut ring);
            let candidate = Polygon::new(LineString::from(ring), vec![]);
            check(&candidate).ok().map(|_| candidate)
        })
        .max_by(|a, b| a.unsigned_area().total_cmp(&b.unsigned_area()))
        .map(|largest| largest.orient(Direction::Default))
        .unwrap_or(cleaned)
}

/// Validates, repairing once if needed.
///
/// Returns the usable polygon and whether repair was applied.
pub fn make_valid(polygon: Polygon<f64>) -> Result<(Polygon<f64>, bool), InvalidReason> {
    if check(&polygon).is_ok() {
        return Ok((polygon, false));
    }
    let repaired = repair(&polygon);
    check(&repaired)?;
    Ok((repaired, true))
}
