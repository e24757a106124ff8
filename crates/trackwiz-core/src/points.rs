//! Annotation points collected on the preview frame.
//!
//! Points are kept in insertion order. Order only affects display; the
//! service treats the set as one prompt. Ids come from a per-set counter and
//! are never reused, so a stale id from the presentation layer can at worst
//! miss.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ValidationError;

/// Whether a point marks the object to track or a region to exclude.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PointKind {
    Positive,
    Negative,
}

impl PointKind {
    /// Label value expected by the service (`1` positive, `0` negative).
    #[must_use]
    pub const fn label(self) -> u8 {
        match self {
            Self::Positive => 1,
            Self::Negative => 0,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Positive => "positive",
            Self::Negative => "negative",
        }
    }
}

impl fmt::Display for PointKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifier of a point within one [`PointSet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PointId(pub u64);

impl fmt::Display for PointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "p{}", self.0)
    }
}

/// A single annotation point in frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Point {
    pub id: PointId,
    pub x: u32,
    pub y: u32,
    pub kind: PointKind,
}

/// Coordinates as typed by a user: `x,y`.
///
/// Fractional input is rounded to the nearest pixel. Negative values are
/// rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PointSpec {
    pub x: u32,
    pub y: u32,
}

impl FromStr for PointSpec {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (x, y) = s
            .split_once(',')
            .ok_or_else(|| ValidationError::InvalidPoint(format!("expected x,y, got {s:?}")))?;
        Ok(Self {
            x: parse_coord(x, s)?,
            y: parse_coord(y, s)?,
        })
    }
}

fn parse_coord(raw: &str, whole: &str) -> Result<u32, ValidationError> {
    let value: f64 = raw
        .trim()
        .parse()
        .map_err(|_| ValidationError::InvalidPoint(format!("bad coordinate in {whole:?}")))?;
    if !value.is_finite() || value < 0.0 || value > f64::from(u32::MAX) {
        return Err(ValidationError::InvalidPoint(format!(
            "coordinate out of range in {whole:?}"
        )));
    }
    Ok(value.round() as u32)
}

/// Wire form of a confirmed point set: parallel coordinate and label lists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointSelection {
    pub coords: Vec<[u32; 2]>,
    pub labels: Vec<u8>,
}

/// Ordered collection of annotation points.
#[derive(Debug, Clone, Default)]
pub struct PointSet {
    points: Vec<Point>,
    next_id: u64,
}

impl PointSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a point and return its id.
    pub fn add(&mut self, x: u32, y: u32, kind: PointKind) -> PointId {
        let id = PointId(self.next_id);
        self.next_id += 1;
        self.points.push(Point { id, x, y, kind });
        id
    }

    /// Remove the point with `id`. Returns the removed point, if any.
    pub fn remove(&mut self, id: PointId) -> Option<Point> {
        let index = self.points.iter().position(|p| p.id == id)?;
        Some(self.points.remove(index))
    }

    pub fn clear(&mut self) {
        self.points.clear();
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    #[must_use]
    pub fn points(&self) -> &[Point] {
        &self.points
    }

    pub fn iter(&self) -> impl Iterator<Item = &Point> {
        self.points.iter()
    }

    /// Count of points of the given kind.
    #[must_use]
    pub fn count(&self, kind: PointKind) -> usize {
        self.points.iter().filter(|p| p.kind == kind).count()
    }

    /// Split into the coordinate and label lists the service expects.
    #[must_use]
    pub fn selection(&self) -> PointSelection {
        let (coords, labels) = self
            .points
            .iter()
            .map(|p| ([p.x, p.y], p.kind.label()))
            .unzip();
        PointSelection { coords, labels }
    }
}
