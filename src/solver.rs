// Chemistry-solver collaborator seam.
//
// The driver only ever talks to the `ChemistrySolver` trait; the bundled
// `ReferenceSolver` integrates mass-action kinetics with an explicit
// sub-stepped Euler scheme, which is enough to run whole mechanisms
// end-to-end without an external backend.

use crate::constants::{air_density_mol_m3, AVOGADRO_PER_MOL};
use crate::error::SolverError;
use crate::mechanism::{Mechanism, RateLaw};
use std::collections::{BTreeMap, HashMap};

/// Contract the box-model driver needs from a chemistry solver. One driver
/// instance exclusively owns one solver handle for its run's lifetime;
/// independent instances may run in separate threads, hence `Send`.
pub trait ChemistrySolver: Send {
    fn set_environment(&mut self, temperature_k: f64, pressure_pa: f64);

    /// Bind a user-set rate parameter (e.g. `PHOTO.O2_1`) to its reaction
    /// slot. Returns false when no slot answers to `name`; by policy the
    /// caller ignores that rather than treating it as an error.
    fn set_rate_parameter(&mut self, name: &str, value: f64) -> bool;

    /// Overwrite one species' concentration directly, bypassing
    /// integration. Returns false for an unknown species.
    fn set_concentration(&mut self, species: &str, value: f64) -> bool;

    /// Advance the chemistry by `time_step_s`, returning the updated
    /// concentrations.
    fn integrate(&mut self, time_step_s: f64) -> Result<BTreeMap<String, f64>, SolverError>;

    fn concentrations(&self) -> BTreeMap<String, f64>;
}

/// One-time backend warm-up, completed before any driver may solve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendState {
    Uninitialized,
    Ready,
    Failed,
}

/// Factory for solver handles. `initialize` must succeed once before
/// `create` will hand out solvers.
#[derive(Debug)]
pub struct SolverBackend {
    state: BackendState,
}

impl SolverBackend {
    pub fn new() -> Self {
        SolverBackend {
            state: BackendState::Uninitialized,
        }
    }

    /// The reference backend has no external library to warm up, so this
    /// always succeeds; the transition is still tracked so `create` can
    /// enforce the ordering.
    pub fn initialize(&mut self) -> Result<(), SolverError> {
        self.state = BackendState::Ready;
        Ok(())
    }

    pub fn state(&self) -> BackendState {
        self.state
    }

    pub fn create(&self, mechanism: &Mechanism) -> Result<ReferenceSolver, SolverError> {
        if self.state != BackendState::Ready {
            return Err(SolverError::new(0.0, "solver backend not initialized"));
        }
        Ok(ReferenceSolver::new(mechanism))
    }
}

impl Default for SolverBackend {
    fn default() -> Self {
        Self::new()
    }
}

struct SolverReaction {
    /// (species index, stoichiometric coefficient) per reactant; third-body
    /// reactants resolve to air density at evaluation time.
    reactants: Vec<(usize, f64)>,
    /// Net stoichiometry (products minus reactants) per affected species.
    net: Vec<(usize, f64)>,
    rate_law: RateLaw,
    /// Most recent user-set rate parameter for parameterized laws.
    user_rate: f64,
}

/// Explicit mass-action integrator over a validated mechanism.
pub struct ReferenceSolver {
    species_names: Vec<String>,
    third_body: Vec<bool>,
    concentrations: Vec<f64>,
    reactions: Vec<SolverReaction>,
    /// `PHOTO.<name>` / `EMIS.<name>` / `LOSS.<name>` / `SURF.<name>` →
    /// reaction index.
    parameter_slots: HashMap<String, usize>,
    species_index: HashMap<String, usize>,
    temperature_k: f64,
    pressure_pa: f64,
    /// Accumulated simulation time across `integrate` calls, so failures
    /// carry a meaningful time even without the driver's clock.
    time_s: f64,
}

const MAX_SUBSTEPS: usize = 10_000;

impl ReferenceSolver {
    pub fn new(mechanism: &Mechanism) -> Self {
        let species_names: Vec<String> =
            mechanism.species.iter().map(|s| s.name.clone()).collect();
        let third_body: Vec<bool> = mechanism.species.iter().map(|s| s.is_third_body).collect();
        let species_index: HashMap<String, usize> = species_names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect();

        let mut reactions = Vec::new();
        let mut parameter_slots = HashMap::new();
        for reaction in &mechanism.reactions {
            let reactants: Vec<(usize, f64)> = reaction
                .reactants
                .iter()
                .map(|term| (species_index[&term.species], term.coefficient))
                .collect();

            let mut net: HashMap<usize, f64> = HashMap::new();
            for term in &reaction.reactants {
                *net.entry(species_index[&term.species]).or_insert(0.0) -= term.coefficient;
            }
            for term in &reaction.products {
                *net.entry(species_index[&term.species]).or_insert(0.0) += term.coefficient;
            }
            // third-body concentrations are environmental, never integrated
            let net: Vec<(usize, f64)> = net
                .into_iter()
                .filter(|&(i, delta)| !third_body[i] && delta != 0.0)
                .collect();

            if let Some(category) = reaction.rate_law.parameter_category() {
                if !reaction.name.is_empty() {
                    parameter_slots
                        .insert(format!("{}.{}", category, reaction.name), reactions.len());
                }
            }
            reactions.push(SolverReaction {
                reactants,
                net,
                rate_law: reaction.rate_law.clone(),
                user_rate: 0.0,
            });
        }

        ReferenceSolver {
            species_names,
            third_body,
            concentrations: vec![0.0; mechanism.species.len()],
            reactions,
            parameter_slots,
            species_index,
            temperature_k: crate::constants::DEFAULT_TEMPERATURE_K,
            pressure_pa: crate::constants::DEFAULT_PRESSURE_PA,
            time_s: 0.0,
        }
    }

    fn air_density(&self) -> f64 {
        air_density_mol_m3(self.temperature_k, self.pressure_pa)
    }

    fn species_concentration(&self, index: usize) -> f64 {
        if self.third_body[index] {
            self.air_density()
        } else {
            self.concentrations[index]
        }
    }

    /// Rate constant for one reaction at the current environment.
    fn rate_constant(&self, reaction: &SolverReaction) -> f64 {
        let t = self.temperature_k;
        let p = self.pressure_pa;
        match &reaction.rate_law {
            RateLaw::Arrhenius(k) => k.a * (k.c / t).exp() * (t / k.d).powf(k.b) * (1.0 + k.e * p),
            RateLaw::Photolysis { scaling_factor }
            | RateLaw::Emission { scaling_factor }
            | RateLaw::FirstOrderLoss { scaling_factor } => scaling_factor * reaction.user_rate,
            RateLaw::Surface(params) => params.reaction_probability * reaction.user_rate,
            RateLaw::Tunneling(k) => k.a * (-k.b / t + k.c / (t * t * t)).exp(),
            RateLaw::Troe(k) => {
                let m = self.air_density();
                let k0 = k.k0_a * (k.k0_c / t).exp() * (t / 300.0).powf(k.k0_b);
                let kinf = k.kinf_a * (k.kinf_c / t).exp() * (t / 300.0).powf(k.kinf_b);
                let ratio = k0 * m / kinf;
                let broadening = k
                    .fc
                    .powf(1.0 / (1.0 + (ratio.log10() / k.n).powi(2)));
                k0 * m / (1.0 + ratio) * broadening
            }
            RateLaw::Branched(k) => {
                // alkoxy channel of the Wennberg branching scheme; a0 is the
                // channel weight against the nitrate yield term z
                let m_molec_cm3 = self.air_density() * AVOGADRO_PER_MOL / 1.0e6;
                let a = 2.0e-22 * k.n.exp() * m_molec_cm3;
                let b = 0.43 * (t / 298.0).powf(-8.0);
                let z = a / (1.0 + a / b)
                    * 0.41_f64.powf(1.0 / (1.0 + (a / b).log10().powi(2)));
                k.x * (-k.y / t).exp() * k.a0 / (k.a0 + z)
            }
        }
    }

    /// Net production rate d[c]/dt for every species at the current state.
    fn net_rates(&self) -> Vec<f64> {
        let mut rates = vec![0.0; self.concentrations.len()];
        for reaction in &self.reactions {
            let mut velocity = self.rate_constant(reaction);
            for &(index, coefficient) in &reaction.reactants {
                velocity *= self.species_concentration(index).powf(coefficient);
            }
            for &(index, delta) in &reaction.net {
                rates[index] += delta * velocity;
            }
        }
        rates
    }

    /// Choose a substep count keeping each species' loss per substep under
    /// half its current concentration (explicit-Euler positivity guard).
    fn stable_substeps(&self, time_step_s: f64) -> usize {
        let rates = self.net_rates();
        let mut substeps = 1usize;
        for (index, &rate) in rates.iter().enumerate() {
            if self.third_body[index] || rate >= 0.0 {
                continue;
            }
            let concentration = self.concentrations[index];
            if concentration <= 0.0 {
                continue;
            }
            let needed = (-rate * time_step_s / (0.5 * concentration)).ceil();
            if needed.is_finite() && needed > substeps as f64 {
                substeps = (needed as usize).min(MAX_SUBSTEPS);
            }
        }
        substeps
    }
}

impl ChemistrySolver for ReferenceSolver {
    fn set_environment(&mut self, temperature_k: f64, pressure_pa: f64) {
        self.temperature_k = temperature_k;
        self.pressure_pa = pressure_pa;
    }

    fn set_rate_parameter(&mut self, name: &str, value: f64) -> bool {
        match self.parameter_slots.get(name) {
            Some(&index) => {
                self.reactions[index].user_rate = value;
                true
            }
            None => false,
        }
    }

    fn set_concentration(&mut self, species: &str, value: f64) -> bool {
        match self.species_index.get(species) {
            Some(&index) => {
                self.concentrations[index] = value;
                true
            }
            None => false,
        }
    }

    fn integrate(&mut self, time_step_s: f64) -> Result<BTreeMap<String, f64>, SolverError> {
        if !(time_step_s > 0.0) {
            return Err(SolverError::new(
                self.time_s,
                format!("non-positive time step: {}", time_step_s),
            ));
        }

        let substeps = self.stable_substeps(time_step_s);
        let h = time_step_s / substeps as f64;
        for _ in 0..substeps {
            let rates = self.net_rates();
            for (index, rate) in rates.into_iter().enumerate() {
                if self.third_body[index] {
                    continue;
                }
                let updated = self.concentrations[index] + h * rate;
                if !updated.is_finite() {
                    return Err(SolverError::new(
                        self.time_s,
                        format!(
                            "concentration of {} diverged",
                            self.species_names[index]
                        ),
                    ));
                }
                // round float undershoot up to zero; a real excursion below
                // zero means the step was unstable
                if updated < -1.0e-9 {
                    return Err(SolverError::new(
                        self.time_s,
                        format!(
                            "concentration of {} went negative",
                            self.species_names[index]
                        ),
                    ));
                }
                self.concentrations[index] = updated.max(0.0);
            }
            self.time_s += h;
        }
        Ok(self.concentrations())
    }

    fn concentrations(&self) -> BTreeMap<String, f64> {
        self.species_names
            .iter()
            .enumerate()
            .filter(|&(index, _)| !self.third_body[index])
            .map(|(index, name)| (name.clone(), self.concentrations[index]))
            .collect()
    }
}
