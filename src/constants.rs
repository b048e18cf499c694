// Physical constants and unit conversions for the box model

pub const BOLTZMANN_J_PER_K: f64 = 1.380649e-23;
pub const AVOGADRO_PER_MOL: f64 = 6.02214076e23;
pub const GAS_CONSTANT_J_PER_MOL_K: f64 = BOLTZMANN_J_PER_K * AVOGADRO_PER_MOL;

// Environment fallbacks when no conditions record ever supplies them
pub const DEFAULT_TEMPERATURE_K: f64 = 298.15;
pub const DEFAULT_PRESSURE_PA: f64 = 101325.0;

// Time-unit multipliers accepted in box-model option keys
pub const SECONDS_PER_MINUTE: f64 = 60.0;
pub const SECONDS_PER_HOUR: f64 = 3600.0;
pub const SECONDS_PER_DAY: f64 = 86400.0;

/// Convert a value in the given time unit to seconds.
/// Recognized units: `s`, `min`, `hr`, `day`.
pub fn time_unit_to_seconds(unit: &str) -> Option<f64> {
    match unit {
        "s" => Some(1.0),
        "min" => Some(SECONDS_PER_MINUTE),
        "hr" => Some(SECONDS_PER_HOUR),
        "day" => Some(SECONDS_PER_DAY),
        _ => None,
    }
}

/// Ideal-gas molar air density in mol/m³ for the given temperature and pressure.
pub fn air_density_mol_m3(temperature_k: f64, pressure_pa: f64) -> f64 {
    pressure_pa / (GAS_CONSTANT_J_PER_MOL_K * temperature_k)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_time_unit_multipliers() {
        assert_eq!(time_unit_to_seconds("s"), Some(1.0));
        assert_eq!(time_unit_to_seconds("min"), Some(60.0));
        assert_eq!(time_unit_to_seconds("hr"), Some(3600.0));
        assert_eq!(time_unit_to_seconds("day"), Some(86400.0));
        assert_eq!(time_unit_to_seconds("fortnight"), None);
    }

    #[test]
    fn test_air_density_at_standard_conditions() {
        // 101325 Pa / (8.314 J/mol/K * 298.15 K) ≈ 40.87 mol/m³
        let n = air_density_mol_m3(DEFAULT_TEMPERATURE_K, DEFAULT_PRESSURE_PA);
        assert_abs_diff_eq!(n, 40.87, epsilon = 0.05);
    }
}
