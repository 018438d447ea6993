//! Partitioning of the vehicle sequence into car groups, each simulated as one
//! lumped mass behind one equivalent coupler.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};

/// Preload (kips) at or above which a cushioned coupler counts as high preload.
pub const HIGH_PRELOAD_THRESHOLD: f64 = 75.0;

/// Coupler category of a vehicle, as far as grouping is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CouplerCategory {
    Standard,
    CushionedHigh,
    CushionedLow,
}

impl CouplerCategory {
    /// Category of a coupler with the given preload in kips.
    pub fn from_preload(preload: f64) -> Self {
        if preload == 0.0 {
            CouplerCategory::Standard
        } else if preload >= HIGH_PRELOAD_THRESHOLD {
            CouplerCategory::CushionedHigh
        } else {
            CouplerCategory::CushionedLow
        }
    }

    fn symbol(self) -> char {
        match self {
            CouplerCategory::Standard => '1',
            CouplerCategory::CushionedHigh => '2',
            CouplerCategory::CushionedLow => '3',
        }
    }
}

/// Maximum number of vehicles per group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GroupLimit {
    /// One limit for every vehicle; coupler categories are not separated.
    Uniform { vehicles: usize },
    /// Standard and cushioned couplers are grouped separately.
    ByCategory { standard: usize, cushioned: usize },
    /// High and low preload cushioned couplers are also kept apart.
    ByPreload {
        standard: usize,
        high_preload: usize,
        low_preload: usize,
    },
}

impl Default for GroupLimit {
    fn default() -> Self {
        GroupLimit::ByCategory {
            standard: 15,
            cushioned: 5,
        }
    }
}

impl GroupLimit {
    /// Interprets a list of limits: one entry for all vehicles, two for
    /// `[standard, cushioned]`, three for `[standard, high, low]`.
    pub fn from_limits(limits: &[usize]) -> Result<Self, ConfigError> {
        let limit = match limits {
            &[vehicles] => GroupLimit::Uniform { vehicles },
            &[standard, cushioned] => GroupLimit::ByCategory {
                standard,
                cushioned,
            },
            &[standard, high_preload, low_preload] => GroupLimit::ByPreload {
                standard,
                high_preload,
                low_preload,
            },
            _ => return Err(ConfigError::InvalidGroupLimit(limits.len())),
        };
        limit.validate()?;
        Ok(limit)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let entries: Vec<(&'static str, usize)> = match *self {
            GroupLimit::Uniform { vehicles } => vec![("all", vehicles)],
            GroupLimit::ByCategory {
                standard,
                cushioned,
            } => vec![("standard", standard), ("cushioned", cushioned)],
            GroupLimit::ByPreload {
                standard,
                high_preload,
                low_preload,
            } => vec![
                ("standard", standard),
                ("high preload", high_preload),
                ("low preload", low_preload),
            ],
        };
        match entries.iter().find(|(_, limit)| *limit == 0) {
            Some(&(category, _)) => Err(ConfigError::ZeroGroupLimit { category }),
            None => Ok(()),
        }
    }

    /// Grouping key of a category: vehicles with different keys never share a group.
    fn key(&self, category: CouplerCategory) -> usize {
        match (self, category) {
            (GroupLimit::Uniform { .. }, _) => 0,
            (_, CouplerCategory::Standard) => 0,
            (GroupLimit::ByCategory { .. }, _) => 1,
            (GroupLimit::ByPreload { .. }, CouplerCategory::CushionedHigh) => 1,
            (GroupLimit::ByPreload { .. }, CouplerCategory::CushionedLow) => 2,
        }
    }

    fn limit(&self, key: usize) -> usize {
        match *self {
            GroupLimit::Uniform { vehicles } => vehicles,
            GroupLimit::ByCategory {
                standard,
                cushioned,
            } => [standard, cushioned][key],
            GroupLimit::ByPreload {
                standard,
                high_preload,
                low_preload,
            } => [standard, high_preload, low_preload][key],
        }
    }
}

/// Splits the vehicle sequence into groups and returns the exclusive end
/// index of each group (equivalently the 1-based position of its last vehicle).
///
/// A group is closed when it would exceed its category's limit or when the
/// grouping key changes between neighbours. With `equalize`, boundaries inside
/// each run of same-key groups are re-spaced evenly.
pub fn partition(
    limit: &GroupLimit,
    categories: &[CouplerCategory],
    equalize: bool,
) -> Result<Vec<usize>, ConfigError> {
    limit.validate()?;
    if categories.is_empty() {
        return Err(ConfigError::InvalidInput(
            "Cannot group an empty train.".to_string(),
        ));
    }

    let keys: Vec<usize> = categories.iter().map(|&c| limit.key(c)).collect();
    let mut ends = vec![1usize];
    let mut size = 1usize;
    for i in 1..keys.len() {
        if size + 1 > limit.limit(keys[i - 1]) || keys[i - 1] != keys[i] {
            ends.push(i + 1);
            size = 1;
        } else {
            size += 1;
            if let Some(last) = ends.last_mut() {
                *last = i + 1;
            }
        }
    }

    if equalize {
        ends = equalize_runs(&ends, &keys);
    }

    log::debug!(
        "Grouped {} vehicles into {} groups\n{}",
        categories.len(),
        ends.len(),
        describe(categories, &ends)
    );
    Ok(ends)
}

fn equalize_runs(ends: &[usize], keys: &[usize]) -> Vec<usize> {
    let mut equalized = ends.to_vec();
    let starts: Vec<usize> = std::iter::once(0).chain(ends.iter().copied()).collect();
    let key_of = |group: usize| keys[ends[group] - 1];

    let mut i = 0;
    while i + 1 < ends.len() {
        let first = i;
        let last = (first + 1..ends.len())
            .find(|&j| key_of(j) != key_of(first))
            .map_or(ends.len() - 1, |j| j - 1);

        let lo = starts[first] as f64;
        let hi = starts[last + 1] as f64;
        let spacing = (hi - lo) / (last - first + 1) as f64;
        for j in first..last {
            let boundary = lo + (j - first + 1) as f64 * spacing;
            equalized[j] = boundary.round_ties_even() as usize;
        }
        i = last + 1;
    }
    equalized
}

/// Two-line rendering of categories with a `|` under the last vehicle of each group.
pub fn describe(categories: &[CouplerCategory], ends: &[usize]) -> String {
    let types: String = categories.iter().map(|c| c.symbol()).collect();
    let mut marks = vec![' '; categories.len()];
    for &end in ends {
        if let Some(mark) = end.checked_sub(1).and_then(|i| marks.get_mut(i)) {
            *mark = '|';
        }
    }
    let marks: String = marks.into_iter().collect();
    format!("{types}\n{marks}")
}
