//! Conversion factors to SI units.
//!
//! Multiply a value in the named unit by the factor to obtain SI.

/// Pound-force to newtons.
pub const LBF: f64 = 4.44822;
/// Pound (mass) to kilograms.
pub const LB: f64 = 0.453592;
/// Kilopound-force to newtons.
pub const KIPS: f64 = 1000.0 * LBF;
/// Short (US) ton to kilograms.
pub const TON: f64 = 2000.0 * LB;
/// Inches to meters.
pub const INCH: f64 = 0.0254;
/// Millimeters to meters.
pub const MM: f64 = 0.001;
pub const SECOND: f64 = 1.0;
pub const MINUTE: f64 = 60.0;
pub const HOUR: f64 = 3600.0;

/// Units a coupler force table is expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ForceUnit {
    Newtons,
    Kips,
}

impl ForceUnit {
    pub fn to_si(self) -> f64 {
        match self {
            ForceUnit::Newtons => 1.0,
            ForceUnit::Kips => KIPS,
        }
    }
}

impl std::fmt::Display for ForceUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ForceUnit::Newtons => write!(f, "N"),
            ForceUnit::Kips => write!(f, "kips"),
        }
    }
}

/// Units a coupler displacement table is expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum LengthUnit {
    Meters,
    Inches,
}

impl LengthUnit {
    pub fn to_si(self) -> f64 {
        match self {
            LengthUnit::Meters => 1.0,
            LengthUnit::Inches => INCH,
        }
    }
}

impl std::fmt::Display for LengthUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LengthUnit::Meters => write!(f, "m"),
            LengthUnit::Inches => write!(f, "in"),
        }
    }
}
