//! Assembly of the lumped train model from a vehicle consist.

use crate::coupler::{CouplerCatalog, CouplerType};
use crate::dynamics::GroupParameters;
use crate::envelope::HysteresisEnvelope;
use crate::error::ConfigError;
use crate::grouping::{partition, CouplerCategory, GroupLimit};
use crate::units::TON;
use serde::{Deserialize, Serialize};

/// One locomotive or car, front to rear.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Vehicle {
    /// Gross mass in short tons.
    pub mass_tons: f64,
    #[serde(default)]
    pub locomotive: bool,
    /// Coupler at the rear of the vehicle.
    #[serde(default)]
    pub coupler: CouplerType,
}

impl Vehicle {
    pub fn car(mass_tons: f64, coupler: CouplerType) -> Self {
        Self {
            mass_tons,
            locomotive: false,
            coupler,
        }
    }

    pub fn locomotive(mass_tons: f64) -> Self {
        Self {
            mass_tons,
            locomotive: true,
            coupler: CouplerType::draft_gear(),
        }
    }

    /// Locomotives always run on draft gear, whatever coupler was given.
    pub fn effective_coupler(&self) -> CouplerType {
        if self.locomotive {
            CouplerType::draft_gear()
        } else {
            self.coupler
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSettings {
    pub group_limit: GroupLimit,
    pub equalize_groups: bool,
    /// Displacement spacing (m) of the envelope lookup grid.
    pub grid_step: f64,
    /// Anti-windup gain as a fraction of the locked stiffness.
    pub antiwindup_ratio: f64,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            group_limit: GroupLimit::default(),
            equalize_groups: true,
            grid_step: 0.01,
            antiwindup_ratio: 2e-6,
        }
    }
}

/// Grouped train: per-group parameters in SI and the merged hysteresis
/// envelope. Immutable once built and shareable between runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainModel {
    group_ends: Vec<usize>,
    coupler_types: Vec<CouplerType>,
    type_counts: Vec<Vec<usize>>,
    params: GroupParameters,
    envelope: HysteresisEnvelope,
}

impl TrainModel {
    pub fn build(vehicles: &[Vehicle], settings: &ModelSettings) -> Result<Self, ConfigError> {
        if vehicles.is_empty() {
            return Err(ConfigError::InvalidInput(
                "Train must contain at least one vehicle.".to_string(),
            ));
        }
        if let Some(i) = vehicles
            .iter()
            .position(|v| !(v.mass_tons > 0.0) || !v.mass_tons.is_finite())
        {
            return Err(ConfigError::InvalidInput(format!(
                "Vehicle {} has non-positive mass {}.",
                i, vehicles[i].mass_tons
            )));
        }

        let couplers: Vec<CouplerType> = vehicles.iter().map(Vehicle::effective_coupler).collect();
        let categories: Vec<CouplerCategory> = couplers
            .iter()
            .map(|c| CouplerCategory::from_preload(c.preload))
            .collect();
        let group_ends = partition(&settings.group_limit, &categories, settings.equalize_groups)?;

        let (coupler_types, type_index) = unique_types(&couplers);
        let mut type_counts = Vec::with_capacity(group_ends.len());
        let mut mass = Vec::with_capacity(group_ends.len());
        let mut start = 0;
        for &end in &group_ends {
            let mut counts = vec![0usize; coupler_types.len()];
            for &k in &type_index[start..end] {
                counts[k] += 1;
            }
            type_counts.push(counts);
            mass.push(vehicles[start..end].iter().map(|v| v.mass_tons).sum::<f64>() * TON);
            start = end;
        }

        let grouped = CouplerCatalog::from_types(&coupler_types)?
            .group(&type_counts)?
            .to_si();
        let envelope = HysteresisEnvelope::from_breakpoints(&grouped.hysteresis(), settings.grid_step)?;

        let kawu = grouped
            .klocked
            .iter()
            .map(|k| settings.antiwindup_ratio * k)
            .collect();
        let params = GroupParameters {
            mass,
            damping: grouped.damping,
            cushion_damping: grouped.cushion_damping,
            klocked: grouped.klocked,
            kawu,
        };
        params.validate()?;

        log::debug!(
            "Built train model: {} vehicles, {} groups, {} coupler types, {} envelope nodes.",
            vehicles.len(),
            group_ends.len(),
            coupler_types.len(),
            envelope.grid().len()
        );

        Ok(Self {
            group_ends,
            coupler_types,
            type_counts,
            params,
            envelope,
        })
    }

    pub fn groups(&self) -> usize {
        self.group_ends.len()
    }

    /// Exclusive end vehicle index of each group.
    pub fn group_ends(&self) -> &[usize] {
        &self.group_ends
    }

    /// Index of the coupler behind the last vehicle of each group, i.e. the
    /// rope force column each group reacts against.
    pub fn coupler_indices(&self) -> Vec<usize> {
        self.group_ends.iter().map(|&end| end - 1).collect()
    }

    /// Distinct coupler types, sorted by preload then stroke.
    pub fn coupler_types(&self) -> &[CouplerType] {
        &self.coupler_types
    }

    /// `type_counts()[g][k]`: couplers of type `k` in group `g`.
    pub fn type_counts(&self) -> &[Vec<usize>] {
        &self.type_counts
    }

    pub fn params(&self) -> &GroupParameters {
        &self.params
    }

    pub fn envelope(&self) -> &HysteresisEnvelope {
        &self.envelope
    }
}

fn unique_types(couplers: &[CouplerType]) -> (Vec<CouplerType>, Vec<usize>) {
    let mut keys: Vec<(f64, f64)> = couplers.iter().map(CouplerType::key).collect();
    keys.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.total_cmp(&b.1)));
    keys.dedup();

    let types = keys
        .iter()
        .map(|&(preload, stroke)| {
            if preload == 0.0 {
                CouplerType::draft_gear()
            } else {
                CouplerType::cushioned(preload, stroke)
            }
        })
        .collect();
    let index = couplers
        .iter()
        .map(|c| {
            let key = c.key();
            keys.iter().position(|k| *k == key).unwrap_or(0)
        })
        .collect();
    (types, index)
}
