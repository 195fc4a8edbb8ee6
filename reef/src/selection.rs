use crate::{
    dataset::Coordinate,
    errors::{Error, Result},
    geom::{rearrange, Cube},
};

/// Tolerance for matching a requested coordinate value against an axis label.
pub(crate) const LABEL_EPSILON: f64 = 1e-9;

#[derive(Clone, Copy, Debug, PartialEq)]
enum Pick {
    /// A single coordinate value. Resolves to a window of length one.
    Point(f64),

    /// An inclusive coordinate range. Bounds may be given in axis order on a descending axis.
    Range(f64, f64),
}

/// A declarative query over a dataset's coordinate system.
///
/// Maps dimension names to a coordinate value or range. Dimensions left out are unrestricted.
/// Building a selection performs no I/O; it is resolved to an index window when applied to a
/// dataset.
///
#[derive(Clone, Debug, Default)]
pub struct Selection {
    picks: Vec<(String, Pick)>,
}

impl Selection {
    pub fn new() -> Self {
        Self { picks: vec![] }
    }

    /// Restrict a dimension to a single coordinate value.
    pub fn point<S: Into<String>>(mut self, dimension: S, value: f64) -> Self {
        self.picks.push((dimension.into(), Pick::Point(value)));
        self
    }

    /// Restrict a dimension to an inclusive coordinate range.
    ///
    /// `lower` and `upper` refer to coordinate values, not indices, and may arrive in axis
    /// order for a descending axis, eg `range("latitude", 50.0, 30.0)`.
    ///
    pub fn range<S: Into<String>>(mut self, dimension: S, lower: f64, upper: f64) -> Self {
        self.picks.push((dimension.into(), Pick::Range(lower, upper)));
        self
    }

    /// Resolve this selection against a set of coordinates into an index window.
    ///
    pub(crate) fn resolve(&self, coordinates: &[Coordinate; 3]) -> Result<Cube> {
        for (name, _) in &self.picks {
            if !coordinates.iter().any(|coord| &coord.name == name) {
                return Err(Error::BadName(format!("no dimension named {name}")));
            }
        }

        let mut bounds = [(0, 0); 3];
        for (axis, coord) in coordinates.iter().enumerate() {
            let pick = self
                .picks
                .iter()
                .find(|(name, _)| name == &coord.name)
                .map(|(_, pick)| *pick);
            bounds[axis] = match pick {
                None => (0, coord.len()),
                Some(Pick::Point(value)) => {
                    let index = coord
                        .labels
                        .iter()
                        .position(|label| (label - value).abs() < LABEL_EPSILON)
                        .ok_or_else(|| {
                            Error::NotFound(format!(
                                "no {} coordinate with value {value}",
                                coord.name
                            ))
                        })?;
                    (index, index + 1)
                }
                Some(Pick::Range(a, b)) => {
                    let (lower, upper) = rearrange(a, b);
                    let mut first = None;
                    let mut last = None;
                    for (index, label) in coord.labels.iter().enumerate() {
                        if lower - LABEL_EPSILON <= *label && *label <= upper + LABEL_EPSILON {
                            first.get_or_insert(index);
                            last = Some(index);
                        }
                    }
                    match (first, last) {
                        (Some(first), Some(last)) => (first, last + 1),
                        _ => (0, 0),
                    }
                }
            };
        }

        Ok(Cube::new(
            bounds[0].0,
            bounds[0].1,
            bounds[1].0,
            bounds[1].1,
            bounds[2].0,
            bounds[2].1,
        ))
    }
}
