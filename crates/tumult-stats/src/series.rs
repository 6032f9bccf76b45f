//! Append-only point series for plot and report collaborators.

use serde::{Deserialize, Serialize};

use crate::error::StatsError;

/// A single coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    /// Horizontal coordinate (usually seconds since start of run).
    pub x: f64,
    /// Vertical coordinate.
    pub y: f64,
}

/// Named, ordered sequence of points. Points can only be appended, and the x
/// coordinate never decreases.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Series {
    name: String,
    points: Vec<Point>,
}

impl Series {
    /// Create an empty series.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), points: Vec::new() }
    }

    /// Series name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Points in insertion order.
    pub fn points(&self) -> &[Point] {
        &self.points
    }

    /// Number of points.
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// True if the series has no points.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Append a point.
    ///
    /// # Errors
    ///
    /// Returns `StatsError::NonMonotonic` if `x` is smaller than the last x,
    /// and `StatsError::NonFinite` if either coordinate is not finite.
    pub fn push(&mut self, x: f64, y: f64) -> Result<(), StatsError> {
        if !x.is_finite() {
            return Err(StatsError::NonFinite { value: x });
        }
        if !y.is_finite() {
            return Err(StatsError::NonFinite { value: y });
        }
        if let Some(last) = self.points.last() {
            if x < last.x {
                return Err(StatsError::NonMonotonic { series: self.name.clone(), x, last: last.x });
            }
        }

        self.points.push(Point { x, y });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_keeps_order() {
        let mut series = Series::new("s");
        series.push(0.0, 1.0).unwrap();
        series.push(0.0, 2.0).unwrap();
        series.push(1.5, 3.0).unwrap();
        assert_eq!(series.len(), 3);
    }

    #[test]
    fn push_rejects_going_backwards() {
        let mut series = Series::new("s");
        series.push(2.0, 1.0).unwrap();
        let err = series.push(1.0, 1.0).unwrap_err();
        assert!(matches!(err, StatsError::NonMonotonic { .. }));
        assert_eq!(series.len(), 1);
    }
}
