// src/geometry.rs
//
// Planar helpers: points, polygon containment and a reference path that
// maps Cartesian positions to (s, d) = (arc length, signed lateral offset).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn sub(self, other: Point) -> Point {
        Point::new(self.x - other.x, self.y - other.y)
    }

    pub fn add(self, other: Point) -> Point {
        Point::new(self.x + other.x, self.y + other.y)
    }

    pub fn scale(self, k: f64) -> Point {
        Point::new(self.x * k, self.y * k)
    }

    pub fn dot(self, other: Point) -> f64 {
        self.x * other.x + self.y * other.y
    }

    pub fn cross(self, other: Point) -> f64 {
        self.x * other.y - self.y * other.x
    }

    pub fn norm(self) -> f64 {
        self.x.hypot(self.y)
    }

    pub fn distance(self, other: Point) -> f64 {
        self.sub(other).norm()
    }

    pub fn midpoint(self, other: Point) -> Point {
        Point::new((self.x + other.x) * 0.5, (self.y + other.y) * 0.5)
    }

    /// Unit vector pointing along `orientation` (rad).
    pub fn heading(orientation: f64) -> Point {
        Point::new(orientation.cos(), orientation.sin())
    }
}

/// Closed interval on the real line. Empty when `lo > hi`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Interval {
    pub lo: f64,
    pub hi: f64,
}

impl Interval {
    pub const fn new(lo: f64, hi: f64) -> Self {
        Self { lo, hi }
    }

    pub const fn point(x: f64) -> Self {
        Self { lo: x, hi: x }
    }

    pub fn is_empty(&self) -> bool {
        self.lo > self.hi
    }

    pub fn length(&self) -> f64 {
        (self.hi - self.lo).max(0.0)
    }

    pub fn overlaps(&self, other: &Interval) -> bool {
        self.lo <= other.hi && other.lo <= self.hi
    }

    pub fn intersect(&self, other: &Interval) -> Interval {
        Interval::new(self.lo.max(other.lo), self.hi.min(other.hi))
    }

    pub fn hull(&self, other: &Interval) -> Interval {
        Interval::new(self.lo.min(other.lo), self.hi.max(other.hi))
    }

    pub fn inflate(&self, margin: f64) -> Interval {
        Interval::new(self.lo - margin, self.hi + margin)
    }

    /// Removes `cut` and returns the non-empty remainders (at most two).
    pub fn subtract(&self, cut: &Interval) -> Vec<Interval> {
        if !self.overlaps(cut) {
            return vec![*self];
        }
        let mut parts = Vec::with_capacity(2);
        if self.lo < cut.lo {
            parts.push(Interval::new(self.lo, cut.lo));
        }
        if cut.hi < self.hi {
            parts.push(Interval::new(cut.hi, self.hi));
        }
        parts
    }
}

/// Ray-casting point-in-polygon test. Boundary points may resolve either way.
pub fn polygon_contains(polygon: &[Point], p: Point) -> bool {
    if polygon.len() < 3 {
        return false;
    }
    let mut inside = false;
    let mut j = polygon.len() - 1;
    for i in 0..polygon.len() {
        let (a, b) = (polygon[i], polygon[j]);
        if (a.y > p.y) != (b.y > p.y) {
            let x_cross = (b.x - a.x) * (p.y - a.y) / (b.y - a.y) + a.x;
            if p.x < x_cross {
                inside = !inside;
            }
        }
        j = i;
    }
    inside
}

pub fn polyline_length(points: &[Point]) -> f64 {
    points.windows(2).map(|w| w[0].distance(w[1])).sum()
}

/// Frenet-style projection onto a polyline. Positions before the first or
/// past the last vertex extrapolate along the end segments.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferencePath {
    points: Vec<Point>,
    cumulative: Vec<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Projection {
    pub s: f64,
    pub d: f64,
}

impl ReferencePath {
    /// Returns `None` for fewer than two distinct vertices.
    pub fn new(points: Vec<Point>) -> Option<Self> {
        let mut deduped: Vec<Point> = Vec::with_capacity(points.len());
        for p in points {
            if deduped.last().map_or(true, |last| last.distance(p) > 1e-9) {
                deduped.push(p);
            }
        }
        if deduped.len() < 2 {
            return None;
        }
        let mut cumulative = Vec::with_capacity(deduped.len());
        let mut acc = 0.0;
        cumulative.push(0.0);
        for w in deduped.windows(2) {
            acc += w[0].distance(w[1]);
            cumulative.push(acc);
        }
        Some(Self {
            points: deduped,
            cumulative,
        })
    }

    pub fn length(&self) -> f64 {
        self.cumulative.last().copied().unwrap_or(0.0)
    }

    pub fn points(&self) -> &[Point] {
        &self.points
    }

    pub fn project(&self, p: Point) -> Projection {
        let last_segment = self.points.len() - 2;
        let mut best = Projection { s: 0.0, d: 0.0 };
        let mut best_dist = f64::INFINITY;

        for (i, w) in self.points.windows(2).enumerate() {
            let (a, b) = (w[0], w[1]);
            let ab = b.sub(a);
            let len_sq = ab.dot(ab);
            let mut t = p.sub(a).dot(ab) / len_sq;
            if i > 0 {
                t = t.max(0.0);
            }
            if i < last_segment {
                t = t.min(1.0);
            }
            let foot = a.add(ab.scale(t));
            let dist = p.distance(foot);
            if dist < best_dist {
                best_dist = dist;
                let len = len_sq.sqrt();
                best = Projection {
                    s: self.cumulative[i] + t * len,
                    d: ab.cross(p.sub(a)).signum() * dist,
                };
            }
        }
        best
    }

    /// Unit tangent at arc length `s` (clamped to the path).
    pub fn tangent_at(&self, s: f64) -> Point {
        let idx = self
            .cumulative
            .windows(2)
            .position(|w| s < w[1])
            .unwrap_or(self.points.len() - 2);
        let dir = self.points[idx + 1].sub(self.points[idx]);
        dir.scale(1.0 / dir.norm())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interval_subtract() {
        let base = Interval::new(0.0, 10.0);
        assert_eq!(
            base.subtract(&Interval::new(3.0, 5.0)),
            vec![Interval::new(0.0, 3.0), Interval::new(5.0, 10.0)]
        );
        assert_eq!(
            base.subtract(&Interval::new(-1.0, 4.0)),
            vec![Interval::new(4.0, 10.0)]
        );
        assert!(base.subtract(&Interval::new(-1.0, 11.0)).is_empty());
        assert_eq!(base.subtract(&Interval::new(12.0, 13.0)), vec![base]);
    }

    #[test]
    fn test_polygon_contains() {
        let square = [
            Point::new(0.0, 0.0),
            Point::new(10.0, 0.0),
            Point::new(10.0, 4.0),
            Point::new(0.0, 4.0),
        ];
        assert!(polygon_contains(&square, Point::new(5.0, 2.0)));
        assert!(!polygon_contains(&square, Point::new(5.0, 5.0)));
        assert!(!polygon_contains(&square, Point::new(-1.0, 2.0)));
    }

    #[test]
    fn test_projection_straight_path() {
        let path =
            ReferencePath::new(vec![Point::new(0.0, 0.0), Point::new(100.0, 0.0)]).unwrap();
        let p = path.project(Point::new(40.0, 3.0));
        assert!((p.s - 40.0).abs() < 1e-9);
        assert!((p.d - 3.0).abs() < 1e-9);

        let right = path.project(Point::new(10.0, -2.0));
        assert!((right.d + 2.0).abs() < 1e-9);

        // extrapolates past both ends
        assert!((path.project(Point::new(-5.0, 0.0)).s + 5.0).abs() < 1e-9);
        assert!((path.project(Point::new(120.0, 0.0)).s - 120.0).abs() < 1e-9);
    }

    #[test]
    fn test_projection_polyline_corner() {
        let path = ReferencePath::new(vec![
            Point::new(0.0, 0.0),
            Point::new(10.0, 0.0),
            Point::new(10.0, 10.0),
        ])
        .unwrap();
        assert!((path.length() - 20.0).abs() < 1e-9);
        let p = path.project(Point::new(10.0, 5.0));
        assert!((p.s - 15.0).abs() < 1e-9);
        let t = path.tangent_at(15.0);
        assert!((t.y - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_degenerate_path_rejected() {
        assert!(ReferencePath::new(vec![Point::new(1.0, 1.0), Point::new(1.0, 1.0)]).is_none());
    }
}
