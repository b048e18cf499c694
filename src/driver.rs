// Box-model driver: owns the simulation clock, reconciles the chemistry,
// output, and conditions timings, and assembles the output time series.

use crate::conditions::{ConditionsManager, EnvironmentalState};
use crate::config::{
    parse_box_model_options, parse_conditions, parse_initial_concentrations, parse_mechanism,
    BoxModelOptions, CONDITIONS_KEY, MECHANISM_KEY,
};
use crate::error::{ConfigError, SolverError};
use crate::mechanism::Mechanism;
use crate::solver::{ChemistrySolver, SolverBackend};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Cooperative cancellation flag, honored once per chemistry-step boundary.
/// Clones share the flag, so one copy can be handed to another thread.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        CancelToken::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    Uninitialized,
    Configured,
    Running,
    Completed,
    Failed,
    Cancelled,
}

/// One output step: simulation time, environmental snapshot, and every
/// (non-third-body) species concentration.
#[derive(Debug, Clone)]
pub struct OutputRow {
    pub time_s: f64,
    pub environment: EnvironmentalState,
    pub concentrations: BTreeMap<String, f64>,
}

impl OutputRow {
    /// The row as a flat record in the output column grammar.
    pub fn flat_columns(&self) -> Vec<(String, f64)> {
        let mut columns = vec![
            ("time.s".to_string(), self.time_s),
            ("ENV.temperature.K".to_string(), self.environment.temperature_k),
            ("ENV.pressure.Pa".to_string(), self.environment.pressure_pa),
            (
                "ENV.air_density.mol m-3".to_string(),
                self.environment.air_density_mol_m3,
            ),
        ];
        for (species, &value) in &self.concentrations {
            columns.push((format!("CONC.{}.mol m-3", species), value));
        }
        columns
    }
}

/// How a run ended. Rows accumulated before a failure or cancellation are
/// preserved in the accompanying `RunResult`.
#[derive(Debug, Clone)]
pub enum RunStatus {
    Completed,
    Failed(SolverError),
    Cancelled { time_s: f64 },
}

#[derive(Debug)]
pub struct RunResult {
    pub rows: Vec<OutputRow>,
    pub status: RunStatus,
    pub steps: u64,
}

/// Drives one box-model run: `load` parses and validates the whole
/// configuration (any failure leaves the driver `Uninitialized`), `solve`
/// walks the clock from 0 to the simulation length.
pub struct BoxModelDriver {
    state: DriverState,
    options: Option<BoxModelOptions>,
    mechanism: Option<Mechanism>,
    conditions: Option<ConditionsManager>,
    initial_concentrations: Vec<(String, f64)>,
    solver: Option<Box<dyn ChemistrySolver>>,
    pub debug: bool,
}

impl BoxModelDriver {
    pub fn new() -> Self {
        BoxModelDriver {
            state: DriverState::Uninitialized,
            options: None,
            mechanism: None,
            conditions: None,
            initial_concentrations: Vec::new(),
            solver: None,
            debug: false,
        }
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    pub fn options(&self) -> Option<&BoxModelOptions> {
        self.options.as_ref()
    }

    pub fn mechanism(&self) -> Option<&Mechanism> {
        self.mechanism.as_ref()
    }

    /// Parse options, mechanism, and conditions, build the conditions
    /// lookup, and ask the backend for a solver handle. Everything is
    /// parsed into locals first and committed only on success, so a
    /// failing load leaves the driver exactly as it was.
    pub fn load(&mut self, config: &Value, backend: &SolverBackend) -> Result<(), ConfigError> {
        let options = parse_box_model_options(config)?;
        let mechanism = parse_mechanism(config.get(MECHANISM_KEY))?;
        let records = parse_conditions(config.get(CONDITIONS_KEY))?;
        let initial_concentrations = parse_initial_concentrations(config)?;
        let conditions = ConditionsManager::build(&records)?;
        let solver = backend
            .create(&mechanism)
            .map_err(|e| ConfigError::InvalidValue {
                key: "solver backend".to_string(),
                message: e.to_string(),
            })?;

        self.options = Some(options);
        self.mechanism = Some(mechanism);
        self.conditions = Some(conditions);
        self.initial_concentrations = initial_concentrations;
        self.solver = Some(Box::new(solver));
        self.state = DriverState::Configured;
        Ok(())
    }

    /// Load a configuration from a JSON file (reads are cached).
    pub fn load_from_file<P: AsRef<std::path::Path>>(
        &mut self,
        path: P,
        backend: &SolverBackend,
    ) -> Result<(), ConfigError> {
        let config = crate::json_loader::load_config_file(path)?;
        self.load(&config, backend)
    }

    /// Run to completion without external cancellation.
    pub fn solve(&mut self) -> RunResult {
        self.solve_with_cancel(&CancelToken::new())
    }

    /// Walk the clock in chemistry steps: apply any exact-time
    /// concentration event, push conditions into the solver, integrate one
    /// step, and emit an output row whenever an output boundary is reached
    /// (within half a chemistry step). A solver failure or a cancellation
    /// ends the run, returning the rows accumulated so far.
    pub fn solve_with_cancel(&mut self, cancel: &CancelToken) -> RunResult {
        if self.state != DriverState::Configured {
            panic!("BoxModelDriver.solve requires a successfully loaded configuration");
        }
        self.state = DriverState::Running;

        let options = self.options.clone().unwrap();
        let conditions = self.conditions.as_ref().unwrap();
        let solver = self.solver.as_mut().unwrap();

        for (species, value) in &self.initial_concentrations {
            solver.set_concentration(species, *value);
        }

        let chem_step = options.chem_time_step_s;
        let boundary_tolerance = chem_step * 0.5;
        let mut current_time = 0.0_f64;
        let mut next_output_time = 0.0_f64;
        let mut rows: Vec<OutputRow> = Vec::new();
        let mut steps: u64 = 0;
        let started = Instant::now();

        let status = loop {
            if current_time >= options.simulation_length_s {
                break RunStatus::Completed;
            }
            if cancel.is_cancelled() {
                break RunStatus::Cancelled {
                    time_s: current_time,
                };
            }
            if let Some(max) = options.max_iterations {
                if steps >= max {
                    break RunStatus::Completed;
                }
            }

            if let Some(events) = conditions.concentration_events_at(current_time) {
                for (species, &value) in events {
                    solver.set_concentration(species, value);
                }
            }

            let now = conditions.get_conditions_at_time(current_time);
            solver.set_environment(now.environment.temperature_k, now.environment.pressure_pa);
            for (name, &value) in &now.rate_parameters {
                // names with no matching reaction slot are ignored by policy
                let _ = solver.set_rate_parameter(name, value);
            }

            if let Err(e) = solver.integrate(chem_step) {
                break RunStatus::Failed(SolverError::new(current_time, e.message));
            }
            steps += 1;

            if current_time >= next_output_time - boundary_tolerance {
                rows.push(OutputRow {
                    time_s: current_time,
                    environment: now.environment,
                    concentrations: solver.concentrations(),
                });
                next_output_time += options.output_time_step_s;
            }

            current_time += chem_step;
        };

        // a boundary reached exactly at loop exit still gets its row (for a
        // zero-length run that is the seeded t=0 state); a pending boundary
        // past the simulated span does not
        if matches!(status, RunStatus::Completed)
            && current_time >= next_output_time - boundary_tolerance
        {
            let now = conditions.get_conditions_at_time(current_time);
            rows.push(OutputRow {
                time_s: current_time,
                environment: now.environment,
                concentrations: solver.concentrations(),
            });
        }

        self.state = match &status {
            RunStatus::Completed => DriverState::Completed,
            RunStatus::Failed(_) => DriverState::Failed,
            RunStatus::Cancelled { .. } => DriverState::Cancelled,
        };

        if self.debug {
            self.print_run_report(&rows, &status, steps, started.elapsed().as_secs_f64());
        }

        RunResult {
            rows,
            status,
            steps,
        }
    }

    fn print_run_report(&self, rows: &[OutputRow], status: &RunStatus, steps: u64, wall_s: f64) {
        println!("\n=== BOX MODEL RUN REPORT ===");
        println!("status: {:?}", status);
        println!("chemistry steps: {}", steps);
        println!("output rows: {}", rows.len());
        println!("wall time: {:.3}s", wall_s);
        if steps > 0 {
            println!("steps per second: {:.1}", steps as f64 / wall_s.max(1e-9));
        }
        println!("=== END RUN REPORT ===\n");
    }
}

impl Default for BoxModelDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use serde_json::json;

    fn ready_backend() -> SolverBackend {
        let mut backend = SolverBackend::new();
        backend.initialize().unwrap();
        backend
    }

    fn decay_config() -> Value {
        json!({
            "box model options": {
                "chemistry time step [s]": 1.0,
                "output time step [s]": 5.0,
                "simulation length [s]": 10.0,
            },
            "mechanism": {
                "species": [{"name": "X"}, {"name": "Y"}],
                "phases": [{"name": "gas", "species": ["X", "Y"]}],
                "reactions": [{
                    "type": "ARRHENIUS",
                    "reactants": [{"species name": "X"}],
                    "products": [{"species name": "Y"}],
                    "A": 0.01,
                }]
            },
            "initial conditions": {
                "CONC.X.mol m-3": 1.0,
            }
        })
    }

    #[test]
    fn test_load_failure_leaves_driver_uninitialized() {
        let mut driver = BoxModelDriver::new();
        let config = json!({
            "box model options": {
                "chemistry time step [s]": 1.0,
                "simulation length [s]": 10.0,
            }
            // no mechanism
        });
        let err = driver.load(&config, &ready_backend()).unwrap_err();
        assert!(err.to_string().contains("mechanism"));
        assert_eq!(driver.state(), DriverState::Uninitialized);
    }

    #[test]
    fn test_load_then_solve_completes() {
        let mut driver = BoxModelDriver::new();
        driver.load(&decay_config(), &ready_backend()).unwrap();
        assert_eq!(driver.state(), DriverState::Configured);

        let result = driver.solve();
        assert!(matches!(result.status, RunStatus::Completed));
        assert_eq!(driver.state(), DriverState::Completed);
        assert_eq!(result.steps, 10);

        // rows at t = 0, 5, and the final boundary at 10
        let times: Vec<f64> = result.rows.iter().map(|r| r.time_s).collect();
        assert_eq!(times, vec![0.0, 5.0, 10.0]);
        for pair in result.rows.windows(2) {
            assert!(pair[1].time_s >= pair[0].time_s);
        }
    }

    #[test]
    fn test_initial_concentrations_seed_the_run() {
        let mut driver = BoxModelDriver::new();
        driver.load(&decay_config(), &ready_backend()).unwrap();
        let result = driver.solve();
        let first = &result.rows[0];
        let last = result.rows.last().unwrap();
        // X decays, Y grows, mass conserved
        assert!(first.concentrations["X"] < 1.0);
        assert!(last.concentrations["X"] < first.concentrations["X"]);
        assert_abs_diff_eq!(
            last.concentrations["X"] + last.concentrations["Y"],
            1.0,
            epsilon = 1e-9
        );
    }

    #[test]
    fn test_concentration_event_overrides_state_mid_run() {
        let mut config = decay_config();
        config["conditions"] = json!({
            "data": [{
                "headers": ["time.s", "CONC.X.mol m-3"],
                "rows": [[5.0, 40.0]]
            }]
        });
        let mut driver = BoxModelDriver::new();
        driver.load(&config, &ready_backend()).unwrap();
        let result = driver.solve();
        // the row at t=5 reflects the override (minus one step of decay)
        let at_five = result
            .rows
            .iter()
            .find(|r| r.time_s == 5.0)
            .expect("row at t=5");
        assert!(at_five.concentrations["X"] > 30.0);
    }

    #[test]
    fn test_environmental_conditions_reach_output_rows() {
        let mut config = decay_config();
        config["conditions"] = json!({
            "data": [{
                "headers": ["time.s", "ENV.temperature.K", "ENV.pressure.Pa"],
                "rows": [[0.0, 250.0, 90000.0], [6.0, 260.0, 91000.0]]
            }]
        });
        let mut driver = BoxModelDriver::new();
        driver.load(&config, &ready_backend()).unwrap();
        let result = driver.solve();
        assert_abs_diff_eq!(result.rows[0].environment.temperature_k, 250.0);
        let last = result.rows.last().unwrap();
        assert_abs_diff_eq!(last.environment.temperature_k, 260.0);
        assert_abs_diff_eq!(last.environment.pressure_pa, 91000.0);
    }

    #[test]
    fn test_pre_cancelled_run_returns_no_rows() {
        let mut driver = BoxModelDriver::new();
        driver.load(&decay_config(), &ready_backend()).unwrap();
        let token = CancelToken::new();
        token.cancel();
        let result = driver.solve_with_cancel(&token);
        assert!(matches!(
            result.status,
            RunStatus::Cancelled { time_s } if time_s == 0.0
        ));
        assert!(result.rows.is_empty());
        assert_eq!(driver.state(), DriverState::Cancelled);
    }

    #[test]
    fn test_load_from_file() {
        let path = std::env::temp_dir().join("chem_box_driver_load_test.json");
        std::fs::write(&path, decay_config().to_string()).unwrap();

        let mut driver = BoxModelDriver::new();
        driver.load_from_file(&path, &ready_backend()).unwrap();
        assert_eq!(driver.state(), DriverState::Configured);
        let result = driver.solve();
        assert!(matches!(result.status, RunStatus::Completed));
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_zero_length_run_emits_seeded_row() {
        let mut config = decay_config();
        config["box model options"]["simulation length [s]"] = json!(0.0);
        let mut driver = BoxModelDriver::new();
        driver.load(&config, &ready_backend()).unwrap();
        let result = driver.solve();
        assert!(matches!(result.status, RunStatus::Completed));
        assert_eq!(result.steps, 0);

        // the t=0 row is still there, carrying the untouched seed state
        assert_eq!(result.rows.len(), 1);
        assert_abs_diff_eq!(result.rows[0].time_s, 0.0);
        assert_abs_diff_eq!(result.rows[0].concentrations["X"], 1.0);
    }

    #[test]
    fn test_non_aligned_output_step_picks_nearest_grid_row() {
        let mut config = decay_config();
        config["box model options"]["output time step [s]"] = json!(2.5);
        let mut driver = BoxModelDriver::new();
        driver.load(&config, &ready_backend()).unwrap();
        let result = driver.solve();
        assert!(matches!(result.status, RunStatus::Completed));

        // boundaries at 0, 2.5, 5, 7.5, 10 land on the closest chemistry
        // grid point, each within half a step
        let times: Vec<f64> = result.rows.iter().map(|r| r.time_s).collect();
        assert_eq!(times, vec![0.0, 2.0, 5.0, 7.0, 10.0]);
    }

    #[test]
    fn test_max_iterations_caps_the_run() {
        let mut config = decay_config();
        config["box model options"]["maximum iterations"] = json!(3);
        let mut driver = BoxModelDriver::new();
        driver.load(&config, &ready_backend()).unwrap();
        let result = driver.solve();
        assert_eq!(result.steps, 3);
        assert!(matches!(result.status, RunStatus::Completed));
    }

    #[test]
    fn test_unknown_rate_parameter_names_are_ignored() {
        let mut config = decay_config();
        config["conditions"] = json!({
            "data": [{
                "headers": ["time.s", "PHOTO.NO2_1.s-1"],
                "rows": [[0.0, 1.0e-3]]
            }]
        });
        let mut driver = BoxModelDriver::new();
        driver.load(&config, &ready_backend()).unwrap();
        let result = driver.solve();
        assert!(matches!(result.status, RunStatus::Completed));
    }

    #[test]
    fn test_flat_columns_follow_output_grammar() {
        let mut driver = BoxModelDriver::new();
        driver.load(&decay_config(), &ready_backend()).unwrap();
        let result = driver.solve();
        let columns = result.rows[0].flat_columns();
        let names: Vec<&str> = columns.iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(names[0], "time.s");
        assert!(names.contains(&"ENV.temperature.K"));
        assert!(names.contains(&"CONC.X.mol m-3"));
        assert!(names.contains(&"CONC.Y.mol m-3"));
    }
}
