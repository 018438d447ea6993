//! Coupler force-displacement specifications and the construction of merged,
//! per-group hysteresis envelopes.
//!
//! Tables are built in the units of the coupler specifications (kips and
//! inches for the built-in draft gear and cushioned units) and converted to SI
//! with [`GroupedCouplers::to_si`] before they reach the dynamics.

use crate::envelope::{max_abs, perturb_increasing, BreakpointEnvelope};
use crate::error::ConfigError;
use crate::grid::{interp_extrapolate, sorted_union};
use crate::units::{ForceUnit, LengthUnit};
use serde::{Deserialize, Serialize};

/// Stroke (in) assumed for a cushioned coupler given without one.
pub const DEFAULT_STROKE: f64 = 28.0;

/// Coupler fitted to a vehicle: a preload of zero selects a standard draft
/// gear, anything else an end-of-car cushioning unit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CouplerType {
    /// Preload in kips.
    pub preload: f64,
    /// Stroke in inches; ignored for draft gear.
    #[serde(default)]
    pub stroke: Option<f64>,
}

impl CouplerType {
    pub fn draft_gear() -> Self {
        Self {
            preload: 0.0,
            stroke: None,
        }
    }

    pub fn cushioned(preload: f64, stroke: f64) -> Self {
        Self {
            preload,
            stroke: Some(stroke),
        }
    }

    pub fn is_draft_gear(&self) -> bool {
        self.preload == 0.0
    }

    /// `(preload, stroke)` identifying this type; draft gear always has a zero stroke.
    pub fn key(&self) -> (f64, f64) {
        if self.is_draft_gear() {
            (0.0, 0.0)
        } else {
            (self.preload, self.stroke.unwrap_or(DEFAULT_STROKE))
        }
    }
}

impl Default for CouplerType {
    fn default() -> Self {
        Self::draft_gear()
    }
}

/// Positive-quadrant force-displacement breakpoints of one coupler type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CouplerSpec {
    pub name: String,
    pub force_unit: ForceUnit,
    pub length_unit: LengthUnit,
    pub xmax: Vec<f64>,
    pub fmax: Vec<f64>,
    pub xmin: Vec<f64>,
    pub fmin: Vec<f64>,
    /// Spring rate while the coupler is locked between its envelope bounds.
    pub klocked: f64,
    /// Linear damping.
    pub damping: f64,
    /// Displacement/force coupled damping of cushioning units.
    pub cushion_damping: f64,
}

impl CouplerSpec {
    /// Standard draft gear (kips, inches).
    pub fn draft_gear() -> Self {
        Self {
            name: "standard".to_string(),
            force_unit: ForceUnit::Kips,
            length_unit: LengthUnit::Inches,
            xmax: vec![0.0, 0.47, 0.74, 1.95, 4.94],
            fmax: vec![0.0, 0.0, 27.0, 153.0, 304.0],
            xmin: vec![0.0, 0.47, 0.74, 4.7],
            fmin: vec![0.0, 0.0, 27.0, 58.0 * 1.1],
            // quarter of the measured rate keeps the system less stiff
            klocked: (103.0 - 35.0) / (1.5 - 1.44) / 4.0,
            damping: 0.2 * 15.0,
            cushion_damping: 0.00001,
        }
    }

    /// End-of-car cushioning unit parameterized by preload (kips) and stroke (in).
    pub fn cushioned(preload: f64, stroke: f64) -> Result<Self, ConfigError> {
        if !preload.is_finite() || preload <= 0.0 {
            return Err(ConfigError::InvalidInput(format!(
                "Cushioned coupler preload must be positive, got {preload}."
            )));
        }
        if !stroke.is_finite() {
            return Err(ConfigError::InvalidInput(format!(
                "Cushioned coupler stroke must be finite, got {stroke}."
            )));
        }

        let df0 = 0.015;
        let df1 = 10.0 * preload / 100.0 * stroke / 28.0;
        let df2 = 1.0;
        let df3 = 25.0;
        let df4 = 30.0;
        let xdeadzone = 0.43;
        let k1 = 100.0 / (0.61 - 0.43);
        let x1 = preload / k1 + xdeadzone;
        let dx1 = (-1.5 + 0.62) * stroke / 28.0;
        let dx2 = 0.62;
        let dx3 = 0.68;

        if stroke + dx1 <= x1 {
            return Err(ConfigError::StrokeTooSmall {
                preload,
                stroke,
                required: x1 - dx1,
            });
        }

        let xmax = vec![
            0.0,
            xdeadzone,
            x1,
            stroke + dx1,
            stroke + dx2,
            stroke + dx3,
        ];
        let fmax = vec![
            0.0,
            df0,
            preload,
            preload + df1,
            preload + df1 + df3,
            preload + df4 + df1 + df3,
        ];

        // Unloading stays at df2 until it meets the final loading slope.
        let slope = (fmax[5] - fmax[4]) / (xmax[5] - xmax[4]);
        let intercept = fmax[4] - slope * xmax[4];
        let x_meet = (df2 - intercept) / slope;
        let xmin = vec![0.0, x_meet, xmax[5]];
        let fmin = vec![0.0, df2, slope * xmax[5] + intercept];

        Ok(Self {
            name: format!("cushioned-{preload}-{stroke}"),
            force_unit: ForceUnit::Kips,
            length_unit: LengthUnit::Inches,
            xmax,
            fmax,
            xmin,
            fmin,
            klocked: 575.0,
            damping: 0.04 * 7.0,
            cushion_damping: 0.15 * 5.0 * 100.0 / preload,
        })
    }

    pub fn from_type(coupler: &CouplerType) -> Result<Self, ConfigError> {
        if coupler.is_draft_gear() {
            Ok(Self::draft_gear())
        } else {
            let (preload, stroke) = coupler.key();
            Self::cushioned(preload, stroke)
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let pairs = [("max", &self.xmax, &self.fmax), ("min", &self.xmin, &self.fmin)];
        for (label, xs, fs) in pairs {
            if xs.len() != fs.len() || xs.len() < 2 {
                return Err(ConfigError::InvalidInput(format!(
                    "Coupler \"{}\" needs matching {label} tables of at least two points.",
                    self.name
                )));
            }
            if xs.windows(2).any(|w| !(w[1] > w[0])) {
                return Err(ConfigError::InvalidInput(format!(
                    "Coupler \"{}\" {label} displacements must be strictly increasing.",
                    self.name
                )));
            }
            if fs.windows(2).any(|w| w[1] < w[0]) {
                return Err(ConfigError::InvalidInput(format!(
                    "Coupler \"{}\" {label} forces must be non-decreasing.",
                    self.name
                )));
            }
        }
        Ok(())
    }
}

/// Every type's envelope resampled onto the union of all displacement breakpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommonTable {
    pub x: Vec<f64>,
    /// One row per coupler type.
    pub fmax: Vec<Vec<f64>>,
    pub fmin: Vec<Vec<f64>>,
}

/// Displacement as a function of force over the union of all force breakpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InverseTable {
    pub force: Vec<f64>,
    /// One row per coupler type.
    pub xmax: Vec<Vec<f64>>,
    pub xmin: Vec<Vec<f64>>,
}

/// The coupler types present in a train, with their shared lookup tables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CouplerCatalog {
    specs: Vec<CouplerSpec>,
    common: CommonTable,
    inverse: InverseTable,
}

impl CouplerCatalog {
    pub fn new(specs: Vec<CouplerSpec>) -> Result<Self, ConfigError> {
        let first = specs.first().ok_or_else(|| {
            ConfigError::InvalidInput("At least one coupler type is required.".to_string())
        })?;
        for spec in &specs {
            if spec.force_unit != first.force_unit {
                return Err(ConfigError::InconsistentForceUnits {
                    first: first.force_unit.to_string(),
                    other: spec.force_unit.to_string(),
                });
            }
            if spec.length_unit != first.length_unit {
                return Err(ConfigError::InconsistentLengthUnits {
                    first: first.length_unit.to_string(),
                    other: spec.length_unit.to_string(),
                });
            }
            spec.validate()?;
        }

        let x = sorted_union(
            specs
                .iter()
                .flat_map(|s| s.xmax.iter().chain(s.xmin.iter()).copied()),
        );
        let common = CommonTable {
            fmax: specs
                .iter()
                .map(|s| x.iter().map(|&xi| interp_extrapolate(&s.xmax, &s.fmax, xi)).collect())
                .collect(),
            fmin: specs
                .iter()
                .map(|s| x.iter().map(|&xi| interp_extrapolate(&s.xmin, &s.fmin, xi)).collect())
                .collect(),
            x,
        };

        let force = sorted_union(
            specs
                .iter()
                .flat_map(|s| s.fmax.iter().chain(s.fmin.iter()).copied()),
        );
        let invert = |fs: &[f64], xs: &[f64]| -> Vec<f64> {
            let nudged = perturb_increasing(fs, 2.0 * f64::EPSILON * max_abs(fs).max(1.0), 0);
            force
                .iter()
                .map(|&f| interp_extrapolate(&nudged, xs, f))
                .collect()
        };
        let inverse = InverseTable {
            xmax: specs.iter().map(|s| invert(&s.fmax, &s.xmax)).collect(),
            xmin: specs.iter().map(|s| invert(&s.fmin, &s.xmin)).collect(),
            force: force.clone(),
        };

        Ok(Self {
            specs,
            common,
            inverse,
        })
    }

    /// Catalog for the given coupler types, in order.
    pub fn from_types(types: &[CouplerType]) -> Result<Self, ConfigError> {
        let specs = types
            .iter()
            .map(CouplerSpec::from_type)
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(specs)
    }

    pub fn specs(&self) -> &[CouplerSpec] {
        &self.specs
    }

    pub fn common(&self) -> &CommonTable {
        &self.common
    }

    pub fn inverse(&self) -> &InverseTable {
        &self.inverse
    }

    /// Merges the couplers of each group into one equivalent coupler.
    ///
    /// `counts[g][k]` is the number of couplers of type `k` in group `g`.
    /// Couplers in a group carry the same force, so displacements add at each
    /// common force level and stiffness and damping combine in series.
    pub fn group(&self, counts: &[Vec<usize>]) -> Result<GroupedCouplers, ConfigError> {
        let ntypes = self.specs.len();
        let nforce = self.inverse.force.len();
        let mut grouped = GroupedCouplers {
            force_unit: self.specs[0].force_unit,
            length_unit: self.specs[0].length_unit,
            force: self.inverse.force.clone(),
            xmax: Vec::with_capacity(counts.len()),
            xmin: Vec::with_capacity(counts.len()),
            klocked: Vec::with_capacity(counts.len()),
            damping: Vec::with_capacity(counts.len()),
            cushion_damping: Vec::with_capacity(counts.len()),
        };

        for (g, row) in counts.iter().enumerate() {
            if row.len() != ntypes {
                return Err(ConfigError::DimensionMismatch {
                    what: "coupler type counts",
                    expected: ntypes,
                    actual: row.len(),
                });
            }
            if row.iter().all(|&c| c == 0) {
                return Err(ConfigError::InvalidInput(format!(
                    "Group {g} contains no couplers."
                )));
            }

            let mut xmax = vec![0.0; nforce];
            let mut xmin = vec![0.0; nforce];
            let mut compliance = 0.0;
            let mut damping = 0.0;
            let mut cushion = 0.0;
            for (k, &count) in row.iter().enumerate() {
                if count == 0 {
                    continue;
                }
                let weight = count as f64;
                for j in 0..nforce {
                    xmax[j] += weight * self.inverse.xmax[k][j];
                    xmin[j] += weight * self.inverse.xmin[k][j];
                }
                let spec = &self.specs[k];
                compliance += weight / spec.klocked;
                damping += weight / spec.damping;
                cushion += weight / spec.cushion_damping;
            }

            grouped.xmax.push(xmax);
            grouped.xmin.push(xmin);
            grouped.klocked.push(1.0 / compliance);
            grouped.damping.push(1.0 / damping);
            grouped.cushion_damping.push(1.0 / cushion);
        }

        Ok(grouped)
    }
}

/// One equivalent coupler per group, tabulated as displacement vs force in
/// the positive quadrant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupedCouplers {
    pub force_unit: ForceUnit,
    pub length_unit: LengthUnit,
    /// Common force levels, starting at zero.
    pub force: Vec<f64>,
    /// One row per group.
    pub xmax: Vec<Vec<f64>>,
    pub xmin: Vec<Vec<f64>>,
    pub klocked: Vec<f64>,
    pub damping: Vec<f64>,
    pub cushion_damping: Vec<f64>,
}

impl GroupedCouplers {
    pub fn groups(&self) -> usize {
        self.klocked.len()
    }

    /// Converts forces to newtons and displacements to meters. Stiffness and
    /// linear damping follow; the cushion coefficient is left as is.
    pub fn to_si(mut self) -> Self {
        let fs = self.force_unit.to_si();
        let ls = self.length_unit.to_si();
        self.force.iter_mut().for_each(|f| *f *= fs);
        for row in self.xmax.iter_mut().chain(self.xmin.iter_mut()) {
            row.iter_mut().for_each(|x| *x *= ls);
        }
        self.klocked.iter_mut().for_each(|k| *k *= fs / ls);
        self.damping.iter_mut().for_each(|b| *b *= fs / ls);
        self.force_unit = ForceUnit::Newtons;
        self.length_unit = LengthUnit::Meters;
        self
    }

    /// Full hysteresis loop of every group: the positive-quadrant tables are
    /// mirrored into compression, the upper bound mirroring the unloading
    /// curve and the lower bound mirroring the loading curve.
    pub fn hysteresis(&self) -> BreakpointEnvelope {
        let m = self.force.len();
        let mirrored_force: Vec<f64> = self.force[1..]
            .iter()
            .rev()
            .map(|f| -f)
            .chain(self.force.iter().copied())
            .collect();

        let mirror = |negative: &[f64], positive: &[f64]| -> Vec<f64> {
            negative[1..m]
                .iter()
                .rev()
                .map(|x| -x)
                .chain(positive.iter().copied())
                .collect()
        };

        let upper: Vec<(Vec<f64>, Vec<f64>)> = (0..self.groups())
            .map(|g| (mirror(&self.xmin[g], &self.xmax[g]), mirrored_force.clone()))
            .collect();
        let lower: Vec<(Vec<f64>, Vec<f64>)> = (0..self.groups())
            .map(|g| (mirror(&self.xmax[g], &self.xmin[g]), mirrored_force.clone()))
            .collect();

        BreakpointEnvelope::from_curves(&upper, &lower)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::HysteresisEnvelope;

    #[test]
    fn cushioned_breakpoints_follow_preload_and_stroke() {
        let spec = CouplerSpec::cushioned(100.0, 28.0).expect("spec");
        assert_eq!(spec.xmax.len(), 6);
        assert!((spec.xmax[2] - (100.0 * 0.18 / 100.0 + 0.43)).abs() < 1e-12);
        assert!((spec.xmax[3] - 27.12).abs() < 1e-12);
        assert_eq!(spec.fmax, vec![0.0, 0.015, 100.0, 110.0, 135.0, 165.0]);
        // unloading meets the last loading segment and ends with it
        assert_eq!(spec.fmin[1], 1.0);
        assert!((spec.fmin[2] - 165.0).abs() < 1e-9);
        assert!((spec.xmin[1] - 28.352).abs() < 1e-9);
        assert!((spec.cushion_damping - 0.75).abs() < 1e-12);
    }

    #[test]
    fn short_stroke_is_rejected() {
        let err = CouplerSpec::cushioned(100.0, 0.5).expect_err("stroke too small");
        assert!(matches!(err, ConfigError::StrokeTooSmall { .. }));
    }

    #[test]
    fn mixed_units_are_rejected() {
        let mut metric = CouplerSpec::draft_gear();
        metric.force_unit = ForceUnit::Newtons;
        let err = CouplerCatalog::new(vec![CouplerSpec::draft_gear(), metric]).expect_err("units");
        assert!(matches!(err, ConfigError::InconsistentForceUnits { .. }));

        let mut metric = CouplerSpec::draft_gear();
        metric.length_unit = LengthUnit::Meters;
        let err = CouplerCatalog::new(vec![CouplerSpec::draft_gear(), metric]).expect_err("units");
        assert!(matches!(err, ConfigError::InconsistentLengthUnits { .. }));
    }

    #[test]
    fn common_table_spans_all_breakpoints() {
        let catalog = CouplerCatalog::from_types(&[
            CouplerType::draft_gear(),
            CouplerType::cushioned(100.0, 28.0),
        ])
        .expect("catalog");
        let common = catalog.common();
        assert!(common.x.windows(2).all(|w| w[1] > w[0]));
        assert_eq!(common.fmax.len(), 2);
        let at = |v: f64| common.x.iter().position(|&x| x == v).expect("breakpoint");
        assert!((common.fmax[0][at(1.95)] - 153.0).abs() < 1e-9);
        assert!((common.fmin[0][at(4.7)] - 58.0 * 1.1).abs() < 1e-9);
    }

    #[test]
    fn inverse_handles_flat_segments() {
        let catalog = CouplerCatalog::from_types(&[CouplerType::draft_gear()]).expect("catalog");
        let inverse = catalog.inverse();
        assert_eq!(inverse.force, vec![0.0, 27.0, 58.0 * 1.1, 153.0, 304.0]);
        assert_eq!(inverse.xmax[0][0], 0.0);
        assert!((inverse.xmax[0][1] - 0.74).abs() < 1e-9);
        assert!((inverse.xmax[0][3] - 1.95).abs() < 1e-9);
        assert!((inverse.xmin[0][2] - 4.7).abs() < 1e-9);
    }

    #[test]
    fn grouping_adds_displacement_and_combines_in_series() {
        let catalog = CouplerCatalog::from_types(&[
            CouplerType::draft_gear(),
            CouplerType::cushioned(100.0, 28.0),
        ])
        .expect("catalog");
        let grouped = catalog.group(&[vec![3, 0], vec![2, 1]]).expect("grouped");
        let inverse = catalog.inverse();
        for j in 0..grouped.force.len() {
            assert!((grouped.xmax[0][j] - 3.0 * inverse.xmax[0][j]).abs() < 1e-9);
            let mixed = 2.0 * inverse.xmax[0][j] + inverse.xmax[1][j];
            assert!((grouped.xmax[1][j] - mixed).abs() < 1e-9);
        }
        let k_draft = CouplerSpec::draft_gear().klocked;
        assert!((grouped.klocked[0] - k_draft / 3.0).abs() < 1e-9);
        let expected = 1.0 / (2.0 / k_draft + 1.0 / 575.0);
        assert!((grouped.klocked[1] - expected).abs() < 1e-9);
    }

    #[test]
    fn grouping_rejects_bad_counts() {
        let catalog = CouplerCatalog::from_types(&[CouplerType::draft_gear()]).expect("catalog");
        assert!(matches!(
            catalog.group(&[vec![1, 2]]),
            Err(ConfigError::DimensionMismatch { .. })
        ));
        assert!(catalog.group(&[vec![0]]).is_err());
    }

    #[test]
    fn mirrored_envelope_is_antisymmetric() {
        let catalog = CouplerCatalog::from_types(&[CouplerType::draft_gear()]).expect("catalog");
        let table = catalog.group(&[vec![2]]).expect("grouped").hysteresis();
        let x = &table.x;
        assert!(x.windows(2).all(|w| w[1] > w[0]));
        for (k, &xk) in x.iter().enumerate() {
            let mirror = x.iter().position(|&v| (v + xk).abs() < 1e-12).expect("mirror");
            assert!((table.fmax[(k, 0)] + table.fmin[(mirror, 0)]).abs() < 1e-6);
        }
    }

    #[test]
    fn uniform_envelope_never_crosses() {
        let catalog = CouplerCatalog::from_types(&[
            CouplerType::draft_gear(),
            CouplerType::cushioned(50.0, 28.0),
            CouplerType::cushioned(100.0, 28.0),
        ])
        .expect("catalog");
        let grouped = catalog
            .group(&[vec![4, 0, 0], vec![1, 3, 0], vec![0, 0, 5]])
            .expect("grouped")
            .to_si();
        let envelope =
            HysteresisEnvelope::from_breakpoints(&grouped.hysteresis(), 0.01).expect("envelope");
        for g in 0..envelope.groups() {
            let upper = envelope.fmax_column(g);
            let lower = envelope.fmin_column(g);
            assert!(upper.iter().zip(lower).all(|(hi, lo)| hi >= lo));
        }
        assert!((envelope.grid().step() - 0.01).abs() < 1e-15);
    }
}
