// Time-varying boundary conditions for the box model.
//
// Heterogeneous, asynchronously-sampled records (temperature, pressure,
// photolysis/emission/loss rate parameters, discrete concentration resets)
// are merged at build time into one step-function state queryable at any
// simulation time, plus a separate exact-time concentration-event map.

use crate::constants::{air_density_mol_m3, DEFAULT_PRESSURE_PA, DEFAULT_TEMPERATURE_K};
use crate::error::ConfigError;
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// A flat record: dotted column name → scalar value.
///
/// Column grammar: `<CATEGORY>.<name>.<unit>` (e.g. `ENV.temperature.K`,
/// `PHOTO.O2_1.s-1`) or `CONC.<species>.<unit>`, plus a mandatory `time.s`.
pub type Record = BTreeMap<String, f64>;

/// The mandatory sample-time column.
pub const TIME_COLUMN: &str = "time.s";

const ENV_CATEGORY: &str = "ENV";
const CONC_CATEGORY: &str = "CONC";

/// Fallback environment used before the first sample (and for fields no
/// record ever supplies). Passed in explicitly so instances can override;
/// never process-wide mutable state.
#[derive(Debug, Clone, Copy)]
pub struct ConditionsDefaults {
    pub temperature_k: f64,
    pub pressure_pa: f64,
}

impl Default for ConditionsDefaults {
    fn default() -> Self {
        ConditionsDefaults {
            temperature_k: DEFAULT_TEMPERATURE_K,
            pressure_pa: DEFAULT_PRESSURE_PA,
        }
    }
}

/// Environmental snapshot at a query time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnvironmentalState {
    pub temperature_k: f64,
    pub pressure_pa: f64,
    pub air_density_mol_m3: f64,
}

impl EnvironmentalState {
    fn new(temperature_k: f64, pressure_pa: f64) -> Self {
        EnvironmentalState {
            temperature_k,
            pressure_pa,
            air_density_mol_m3: air_density_mol_m3(temperature_k, pressure_pa),
        }
    }
}

/// Everything `get_conditions_at_time` exposes: the environmental snapshot
/// and the carry-forward union of rate parameters. Concentration data is
/// deliberately unreachable from here.
#[derive(Debug, Clone)]
pub struct Conditions {
    pub environment: EnvironmentalState,
    pub rate_parameters: BTreeMap<String, f64>,
}

/// Step-hold lookup over merged conditions records. Built once, immutable
/// for the run's duration.
#[derive(Debug)]
pub struct ConditionsManager {
    defaults: ConditionsDefaults,
    /// Strictly increasing sample instants, deduplicated.
    times: Vec<f64>,
    /// Cumulative state at `times[i]`: most recent environment plus the
    /// last-write-wins union of every rate parameter seen so far.
    snapshots: Vec<Conditions>,
    /// Exact-time species-concentration overrides, sorted by time.
    /// Never interpolated, never carried forward.
    concentration_events: Vec<(f64, BTreeMap<String, f64>)>,
}

impl ConditionsManager {
    /// Build from flat records with the standard defaults (298.15 K, 101325 Pa).
    pub fn build(records: &[Record]) -> Result<Self, ConfigError> {
        Self::build_with_defaults(records, ConditionsDefaults::default())
    }

    /// Build from flat records, sorted by `time.s` (stable: ties keep input
    /// order). Columns are partitioned by category: `ENV.*` feeds the
    /// environmental state, `CONC.*` feeds the event map, and every other
    /// category (`PHOTO.`, `EMIS.`, `LOSS.`, ...) is a rate parameter whose
    /// key is canonicalized by stripping the trailing unit segment.
    pub fn build_with_defaults(
        records: &[Record],
        defaults: ConditionsDefaults,
    ) -> Result<Self, ConfigError> {
        let mut order: Vec<usize> = Vec::new();
        for (i, record) in records.iter().enumerate() {
            if !record.contains_key(TIME_COLUMN) {
                return Err(ConfigError::MissingField(TIME_COLUMN.to_string()));
            }
            order.push(i);
        }
        // sort_by is stable, so records sharing a timestamp keep input order
        order.sort_by(|&a, &b| {
            let ta = records[a][TIME_COLUMN];
            let tb = records[b][TIME_COLUMN];
            ta.partial_cmp(&tb).unwrap_or(Ordering::Equal)
        });

        let mut manager = ConditionsManager {
            defaults,
            times: Vec::new(),
            snapshots: Vec::new(),
            concentration_events: Vec::new(),
        };

        let mut temperature_k: Option<f64> = None;
        let mut pressure_pa: Option<f64> = None;
        let mut rate_parameters: BTreeMap<String, f64> = BTreeMap::new();

        for &index in &order {
            let record = &records[index];
            let time_s = record[TIME_COLUMN];

            for (column, &value) in record {
                if column == TIME_COLUMN {
                    continue;
                }
                let parts = split_column(column)?;
                match parts.category.as_str() {
                    ENV_CATEGORY => match parts.name.as_str() {
                        "temperature" => temperature_k = Some(value),
                        "pressure" => pressure_pa = Some(value),
                        _ => {}
                    },
                    CONC_CATEGORY => {
                        manager.record_event(time_s, parts.name, value);
                    }
                    _ => {
                        // Carry-forward union: the canonical key keeps its
                        // previous value until a later record reassigns it.
                        let canonical = format!("{}.{}", parts.category, parts.name);
                        rate_parameters.insert(canonical, value);
                    }
                }
            }

            let snapshot = Conditions {
                environment: EnvironmentalState::new(
                    temperature_k.unwrap_or(defaults.temperature_k),
                    pressure_pa.unwrap_or(defaults.pressure_pa),
                ),
                rate_parameters: rate_parameters.clone(),
            };
            // Records sharing a timestamp collapse into one snapshot
            if manager.times.last() == Some(&time_s) {
                *manager.snapshots.last_mut().unwrap() = snapshot;
            } else {
                manager.times.push(time_s);
                manager.snapshots.push(snapshot);
            }
        }

        Ok(manager)
    }

    fn record_event(&mut self, time_s: f64, species: String, value: f64) {
        match self
            .concentration_events
            .iter_mut()
            .find(|(t, _)| *t == time_s)
        {
            Some((_, overrides)) => {
                overrides.insert(species, value);
            }
            None => {
                let mut overrides = BTreeMap::new();
                overrides.insert(species, value);
                self.concentration_events.push((time_s, overrides));
                self.concentration_events
                    .sort_by(|(a, _), (b, _)| a.partial_cmp(b).unwrap_or(Ordering::Equal));
            }
        }
    }

    /// Step-hold lookup: the state at the latest sample at or before `time_s`.
    ///
    /// Before the first sample (or with no samples at all) the defaults are
    /// returned with an empty rate-parameter set. After the last sample its
    /// values hold indefinitely. Concentration data never appears here.
    pub fn get_conditions_at_time(&self, time_s: f64) -> Conditions {
        match self.times.partition_point(|&t| t <= time_s) {
            0 => Conditions {
                environment: EnvironmentalState::new(
                    self.defaults.temperature_k,
                    self.defaults.pressure_pa,
                ),
                rate_parameters: BTreeMap::new(),
            },
            i => self.snapshots[i - 1].clone(),
        }
    }

    /// Species-concentration overrides applying exactly at `time_s`, if any.
    pub fn concentration_events_at(&self, time_s: f64) -> Option<&BTreeMap<String, f64>> {
        self.concentration_events
            .iter()
            .find(|(t, _)| *t == time_s)
            .map(|(_, overrides)| overrides)
    }

    /// The deduplicated, strictly increasing sample instants.
    pub fn sample_times(&self) -> &[f64] {
        &self.times
    }

    pub fn event_count(&self) -> usize {
        self.concentration_events.len()
    }
}

struct ColumnParts {
    category: String,
    name: String,
}

/// Split a dotted column into category and canonical name (unit stripped).
/// A key with fewer than two segments after the category is malformed.
fn split_column(column: &str) -> Result<ColumnParts, ConfigError> {
    let segments: Vec<&str> = column.split('.').collect();
    if segments.len() < 3 {
        return Err(ConfigError::MalformedRateKey(column.to_string()));
    }
    // Everything between the category and the trailing unit segment is the
    // name (species names may themselves contain dots).
    Ok(ColumnParts {
        category: segments[0].to_string(),
        name: segments[1..segments.len() - 1].join("."),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn record(pairs: &[(&str, f64)]) -> Record {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), *v))
            .collect()
    }

    #[test]
    fn test_step_hold_temperature() {
        let records = vec![
            record(&[("time.s", 0.0), ("ENV.temperature.K", 220.0)]),
            record(&[("time.s", 3600.0), ("ENV.temperature.K", 240.0)]),
        ];
        let manager = ConditionsManager::build(&records).unwrap();

        assert_abs_diff_eq!(
            manager.get_conditions_at_time(1800.0).environment.temperature_k,
            220.0
        );
        assert_abs_diff_eq!(
            manager.get_conditions_at_time(3600.0).environment.temperature_k,
            240.0
        );
        // open right-hold: the last sample holds indefinitely
        assert_abs_diff_eq!(
            manager.get_conditions_at_time(7200.0).environment.temperature_k,
            240.0
        );
    }

    #[test]
    fn test_rate_parameter_carry_forward_union() {
        let records = vec![
            record(&[
                ("time.s", 0.0),
                ("PHOTO.O3_1.s-1", 1.0e-4),
                ("PHOTO.O2_1.s-1", 2.0e-5),
            ]),
            record(&[("time.s", 3600.0), ("PHOTO.O2_1.s-1", 4.0e-5)]),
        ];
        let manager = ConditionsManager::build(&records).unwrap();

        let later = manager.get_conditions_at_time(3600.0);
        // O3_1 was only defined at t=0 but must survive the later sample
        assert_abs_diff_eq!(later.rate_parameters["PHOTO.O3_1"], 1.0e-4);
        assert_abs_diff_eq!(later.rate_parameters["PHOTO.O2_1"], 4.0e-5);
    }

    #[test]
    fn test_concentrations_only_reachable_through_events() {
        let records = vec![record(&[
            ("time.s", 100.0),
            ("CONC.O3.mol m-3", 2.5),
            ("ENV.temperature.K", 250.0),
        ])];
        let manager = ConditionsManager::build(&records).unwrap();

        let conditions = manager.get_conditions_at_time(100.0);
        assert!(conditions.rate_parameters.is_empty());

        assert_eq!(manager.event_count(), 1);
        let events = manager.concentration_events_at(100.0).unwrap();
        assert_abs_diff_eq!(events["O3"], 2.5);

        // exact match only: neither before, after, nor held forward
        assert!(manager.concentration_events_at(99.0).is_none());
        assert!(manager.concentration_events_at(101.0).is_none());
    }

    #[test]
    fn test_malformed_rate_key_names_offender() {
        let records = vec![record(&[("time.s", 0.0), ("PHOTO", 1.0)])];
        let err = ConditionsManager::build(&records).unwrap_err();
        assert!(err.to_string().contains("PHOTO"));

        let records = vec![record(&[("time.s", 0.0), ("PHOTO.O2_1", 1.0)])];
        assert!(ConditionsManager::build(&records).is_err());
    }

    #[test]
    fn test_empty_input_and_query_before_first_sample() {
        let manager = ConditionsManager::build(&[]).unwrap();
        let conditions = manager.get_conditions_at_time(50.0);
        assert_abs_diff_eq!(conditions.environment.temperature_k, 298.15);
        assert_abs_diff_eq!(conditions.environment.pressure_pa, 101325.0);
        assert!(conditions.rate_parameters.is_empty());

        // a query before the first sample returns defaults, not that sample
        let records = vec![record(&[("time.s", 60.0), ("ENV.temperature.K", 180.0)])];
        let manager = ConditionsManager::build(&records).unwrap();
        assert_abs_diff_eq!(
            manager.get_conditions_at_time(0.0).environment.temperature_k,
            298.15
        );
    }

    #[test]
    fn test_overridden_defaults() {
        let defaults = ConditionsDefaults {
            temperature_k: 310.0,
            pressure_pa: 90000.0,
        };
        let manager = ConditionsManager::build_with_defaults(&[], defaults).unwrap();
        let env = manager.get_conditions_at_time(0.0).environment;
        assert_abs_diff_eq!(env.temperature_k, 310.0);
        assert_abs_diff_eq!(env.pressure_pa, 90000.0);
        assert_abs_diff_eq!(env.air_density_mol_m3, 90000.0 / (8.31446 * 310.0), epsilon = 1e-3);
    }

    #[test]
    fn test_records_sharing_a_timestamp_collapse() {
        let records = vec![
            record(&[("time.s", 10.0), ("ENV.temperature.K", 200.0)]),
            record(&[("time.s", 10.0), ("ENV.pressure.Pa", 50000.0)]),
        ];
        let manager = ConditionsManager::build(&records).unwrap();
        assert_eq!(manager.sample_times(), &[10.0]);
        let env = manager.get_conditions_at_time(10.0).environment;
        assert_abs_diff_eq!(env.temperature_k, 200.0);
        assert_abs_diff_eq!(env.pressure_pa, 50000.0);
    }

    #[test]
    fn test_missing_time_column_is_rejected() {
        let records = vec![record(&[("ENV.temperature.K", 200.0)])];
        let err = ConditionsManager::build(&records).unwrap_err();
        assert!(err.to_string().contains("time.s"));
    }
}
