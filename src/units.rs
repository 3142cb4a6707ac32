//! Unit conversion and display formatting.

use serde::{Deserialize, Serialize};
use std::fmt;

pub const METERS_PER_KILOMETER: f64 = 1000.0;
pub const METERS_PER_MILE: f64 = 1609.344;
pub const KILOJOULES_PER_KILOCALORIE: f64 = 4.184;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum UnitSystem {
    #[default]
    Metric,
    Imperial,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum EnergyUnit {
    #[default]
    Kilocalories,
    Kilojoules,
}

/// A display value and the unit it is expressed in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FormattedUnitPair {
    pub value: String,
    pub unit: &'static str,
}

impl fmt::Display for FormattedUnitPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.value, self.unit)
    }
}

pub fn meters_to_kilometers(meters: f64) -> f64 {
    meters / METERS_PER_KILOMETER
}

pub fn meters_to_miles(meters: f64) -> f64 {
    meters / METERS_PER_MILE
}

pub fn kilocalories_to_kilojoules(kcal: f64) -> f64 {
    kcal * KILOJOULES_PER_KILOCALORIE
}

pub fn format_distance(meters: f64, system: UnitSystem) -> FormattedUnitPair {
    match system {
        UnitSystem::Metric => FormattedUnitPair {
            value: format!("{:.2}", meters_to_kilometers(meters)),
            unit: "km",
        },
        UnitSystem::Imperial => FormattedUnitPair {
            value: format!("{:.2}", meters_to_miles(meters)),
            unit: "mi",
        },
    }
}

pub fn format_energy(kcal: f64, unit: EnergyUnit) -> FormattedUnitPair {
    match unit {
        EnergyUnit::Kilocalories => FormattedUnitPair {
            value: format!("{kcal:.1}"),
            unit: "kcal",
        },
        EnergyUnit::Kilojoules => FormattedUnitPair {
            value: format!("{:.1}", kilocalories_to_kilojoules(kcal)),
            unit: "kJ",
        },
    }
}

/// Metres per second as km/h or mph.
pub fn format_speed(meters_per_second: f64, system: UnitSystem) -> FormattedUnitPair {
    let per_hour = meters_per_second * 3600.0;
    match system {
        UnitSystem::Metric => FormattedUnitPair {
            value: format!("{:.1}", meters_to_kilometers(per_hour)),
            unit: "km/h",
        },
        UnitSystem::Imperial => FormattedUnitPair {
            value: format!("{:.1}", meters_to_miles(per_hour)),
            unit: "mph",
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distances_format_per_unit_system() {
        assert_eq!(format_distance(1234.0, UnitSystem::Metric).to_string(), "1.23 km");
        assert_eq!(format_distance(1609.344, UnitSystem::Imperial).to_string(), "1.00 mi");
        assert_eq!(format_distance(0.0, UnitSystem::Metric).value, "0.00");
    }

    #[test]
    fn energy_converts_to_kilojoules() {
        assert!((kilocalories_to_kilojoules(100.0) - 418.4).abs() < 1e-9);
        assert_eq!(format_energy(100.0, EnergyUnit::Kilojoules).to_string(), "418.4 kJ");
        assert_eq!(format_energy(17.5, EnergyUnit::Kilocalories).to_string(), "17.5 kcal");
    }

    #[test]
    fn speed_is_shown_per_hour() {
        assert_eq!(format_speed(1.0, UnitSystem::Metric).to_string(), "3.6 km/h");
        assert_eq!(format_speed(1.0, UnitSystem::Imperial).unit, "mph");
    }
}
