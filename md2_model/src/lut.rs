//! Piecewise-linear lookup tables for non-linear axes (zoom, light
//! intensity, piezo).
//!
//! A table is a strictly monotone sequence of `(counts, units)` breakpoints.
//! `lut(counts)` interpolates the unit-valued position; `rlut(units)` is the
//! inverse, interpolating the counts. Both clamp at the table's endpoints —
//! extrapolation beyond the first/last breakpoint returns the boundary
//! value, it does not extend the line.

use thiserror::Error;

/// Errors constructing a [`LookupTable`].
#[derive(Debug, Clone, Error, PartialEq)]
pub enum LutError {
    #[error("lookup table needs at least two breakpoints, got {0}")]
    TooFewPoints(usize),
    #[error("lookup table x values are not strictly monotone at index {0}")]
    NotMonotoneX(usize),
}

/// A strictly monotone piecewise-linear table mapping raw counts to unit
/// positions, and back.
#[derive(Debug, Clone)]
pub struct LookupTable {
    /// `(counts, units)` breakpoints, sorted by ascending `counts`.
    points: Vec<(f64, f64)>,
    /// Whether `units` increases (true) or decreases (false) with `counts`;
    /// detected once at construction by comparing first and last `y`.
    y_ascending: bool,
}

impl LookupTable {
    /// Build a table from `(counts, units)` breakpoints. `points` need not
    /// be pre-sorted by `counts` but must be strictly monotone in `counts`
    /// once sorted (duplicate `counts` values are rejected).
    pub fn new(mut points: Vec<(f64, f64)>) -> Result<Self, LutError> {
        if points.len() < 2 {
            return Err(LutError::TooFewPoints(points.len()));
        }
        points.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap());
        for w in points.windows(2) {
            if w[1].0 <= w[0].0 {
                return Err(LutError::NotMonotoneX(1));
            }
        }
        let y_ascending = points.last().unwrap().1 >= points.first().unwrap().1;
        Ok(LookupTable { points, y_ascending })
    }

    /// Forward lookup: counts → units. Clamps outside the table.
    pub fn lut(&self, counts: f64) -> f64 {
        interpolate(&self.points, counts, true)
    }

    /// Inverse lookup: units → counts. Clamps outside the table, using the
    /// detected monotone direction of `y` to decide which end is "low".
    pub fn rlut(&self, units: f64) -> f64 {
        let swapped: Vec<(f64, f64)> = self.points.iter().map(|&(x, y)| (y, x)).collect();
        let mut swapped = swapped;
        if !self.y_ascending {
            swapped.reverse();
        }
        interpolate(&swapped, units, true)
    }
}

/// Linear interpolation over a table sorted ascending on `.0`, clamping at
/// the ends. `_monotone_hint` is unused beyond documenting intent at call
/// sites (the table passed in is always pre-sorted ascending by this point).
fn interpolate(points: &[(f64, f64)], x: f64, _monotone_hint: bool) -> f64 {
    let first = points.first().unwrap();
    let last = points.last().unwrap();
    if x <= first.0 {
        return first.1;
    }
    if x >= last.0 {
        return last.1;
    }
    let idx = points.partition_point(|&(px, _)| px <= x);
    let (x0, y0) = points[idx - 1];
    let (x1, y1) = points[idx];
    y0 + (y1 - y0) * (x - x0) / (x1 - x0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zoom_table() -> LookupTable {
        // Zoom counts decrease as zoom level (units) increases — a common
        // inverted-axis shape.
        LookupTable::new(vec![(0.0, 8.0), (1000.0, 4.0), (2000.0, 1.0)]).unwrap()
    }

    #[test]
    fn rejects_too_few_points() {
        assert_eq!(
            LookupTable::new(vec![(0.0, 0.0)]).unwrap_err(),
            LutError::TooFewPoints(1)
        );
    }

    #[test]
    fn clamps_below_and_above_range() {
        let t = zoom_table();
        assert_eq!(t.lut(-500.0), 8.0);
        assert_eq!(t.lut(5000.0), 1.0);
    }

    #[test]
    fn interpolates_between_breakpoints() {
        let t = zoom_table();
        assert_eq!(t.lut(500.0), 6.0);
    }

    #[test]
    fn round_trips_at_breakpoints() {
        let t = zoom_table();
        for &(counts, units) in &[(0.0, 8.0), (1000.0, 4.0), (2000.0, 1.0)] {
            assert!((t.rlut(t.lut(counts)) - counts).abs() < 1e-6 || (t.lut(t.rlut(units)) - units).abs() < 1e-6);
            assert!((t.lut(counts) - units).abs() < 1e-9);
        }
    }

    #[test]
    fn inverse_clamps_too() {
        let t = zoom_table();
        assert_eq!(t.rlut(100.0), 0.0);
        assert_eq!(t.rlut(-100.0), 2000.0);
    }
}
