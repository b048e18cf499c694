// Canonical, solver-ready mechanism description.
//
// Entities reference each other by name through flat, name-keyed tables
// validated once at construction, rather than nested owning references.

use crate::error::ConfigError;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq)]
pub struct Species {
    pub name: String,
    /// Third-body marker: concentration is taken from air density rather
    /// than integrated.
    pub is_third_body: bool,
    pub absolute_tolerance: Option<f64>,
}

impl Species {
    pub fn named(name: impl Into<String>) -> Self {
        Species {
            name: name.into(),
            is_third_body: false,
            absolute_tolerance: None,
        }
    }
}

/// A phase member entry. Bare-name and `{name}` forms in raw input both
/// normalize to this.
#[derive(Debug, Clone, PartialEq)]
pub struct PhaseSpecies {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Phase {
    pub name: String,
    pub species: Vec<PhaseSpecies>,
}

/// Modified Arrhenius parameters: k(T, P) = a·exp(c/T)·(T/d)^b·(1 + e·P).
/// `c` is in Kelvin; an activation energy in joules is converted during
/// normalization and never survives into this struct.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ArrheniusParams {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
    pub e: f64,
}

/// Pressure-dependent falloff: low- and high-pressure Arrhenius limits
/// blended with the broadening factor fc.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TroeParams {
    pub k0_a: f64,
    pub k0_b: f64,
    pub k0_c: f64,
    pub kinf_a: f64,
    pub kinf_b: f64,
    pub kinf_c: f64,
    pub fc: f64,
    pub n: f64,
}

/// Quantum tunneling correction: k(T) = a·exp(-b/T + c/T³).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TunnelingParams {
    pub a: f64,
    pub b: f64,
    pub c: f64,
}

/// Two-channel branched reaction (alkoxy / nitrate split).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BranchedParams {
    pub x: f64,
    pub y: f64,
    pub a0: f64,
    pub n: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SurfaceParams {
    pub reaction_probability: f64,
}

/// The closed set of rate-law variants. Exhaustive matching everywhere a
/// reaction is interpreted keeps additions honest.
#[derive(Debug, Clone, PartialEq)]
pub enum RateLaw {
    Arrhenius(ArrheniusParams),
    Photolysis { scaling_factor: f64 },
    Emission { scaling_factor: f64 },
    FirstOrderLoss { scaling_factor: f64 },
    Branched(BranchedParams),
    Troe(TroeParams),
    Tunneling(TunnelingParams),
    Surface(SurfaceParams),
}

impl RateLaw {
    /// The conditions column category this variant's user-set rate
    /// parameter arrives under, if it takes one at all.
    pub fn parameter_category(&self) -> Option<&'static str> {
        match self {
            RateLaw::Photolysis { .. } => Some("PHOTO"),
            RateLaw::Emission { .. } => Some("EMIS"),
            RateLaw::FirstOrderLoss { .. } => Some("LOSS"),
            RateLaw::Surface { .. } => Some("SURF"),
            RateLaw::Arrhenius(_)
            | RateLaw::Branched(_)
            | RateLaw::Troe(_)
            | RateLaw::Tunneling(_) => None,
        }
    }

    pub fn variant_name(&self) -> &'static str {
        match self {
            RateLaw::Arrhenius(_) => "ARRHENIUS",
            RateLaw::Photolysis { .. } => "PHOTOLYSIS",
            RateLaw::Emission { .. } => "EMISSION",
            RateLaw::FirstOrderLoss { .. } => "FIRST_ORDER_LOSS",
            RateLaw::Branched(_) => "BRANCHED",
            RateLaw::Troe(_) => "TROE",
            RateLaw::Tunneling(_) => "TUNNELING",
            RateLaw::Surface(_) => "SURFACE",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReactionTerm {
    pub species: String,
    pub coefficient: f64,
}

impl ReactionTerm {
    pub fn new(species: impl Into<String>, coefficient: f64) -> Self {
        ReactionTerm {
            species: species.into(),
            coefficient,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Reaction {
    /// Slot label binding a user-set rate parameter (e.g. `O2_1` answers to
    /// the `PHOTO.O2_1` conditions column). Empty for purely thermal laws.
    pub name: String,
    pub gas_phase: String,
    pub reactants: Vec<ReactionTerm>,
    pub products: Vec<ReactionTerm>,
    pub rate_law: RateLaw,
}

/// A validated mechanism: species, phases, and reactions with referential
/// integrity checked once at construction. Read-only after that.
#[derive(Debug, Clone)]
pub struct Mechanism {
    pub name: String,
    pub species: Vec<Species>,
    pub phases: Vec<Phase>,
    pub reactions: Vec<Reaction>,
    species_index: HashMap<String, usize>,
    phase_index: HashMap<String, usize>,
}

impl Mechanism {
    /// Build the name indexes and check that every species referenced by a
    /// phase or reaction is declared, and every reaction's gas phase exists.
    pub fn new(
        name: String,
        species: Vec<Species>,
        phases: Vec<Phase>,
        reactions: Vec<Reaction>,
    ) -> Result<Self, ConfigError> {
        let species_index: HashMap<String, usize> = species
            .iter()
            .enumerate()
            .map(|(i, s)| (s.name.clone(), i))
            .collect();
        let phase_index: HashMap<String, usize> = phases
            .iter()
            .enumerate()
            .map(|(i, p)| (p.name.clone(), i))
            .collect();

        for phase in &phases {
            for member in &phase.species {
                if !species_index.contains_key(&member.name) {
                    return Err(ConfigError::UndeclaredSpecies {
                        referrer: format!("phase '{}'", phase.name),
                        species: member.name.clone(),
                    });
                }
            }
        }
        for reaction in &reactions {
            let referrer = format!("reaction '{}'", reaction.label());
            if !phase_index.contains_key(&reaction.gas_phase) {
                return Err(ConfigError::UndeclaredPhase {
                    referrer,
                    phase: reaction.gas_phase.clone(),
                });
            }
            for term in reaction.reactants.iter().chain(&reaction.products) {
                if !species_index.contains_key(&term.species) {
                    return Err(ConfigError::UndeclaredSpecies {
                        referrer: format!("reaction '{}'", reaction.label()),
                        species: term.species.clone(),
                    });
                }
            }
        }

        Ok(Mechanism {
            name,
            species,
            phases,
            reactions,
            species_index,
            phase_index,
        })
    }

    pub fn species_named(&self, name: &str) -> Option<&Species> {
        self.species_index.get(name).map(|&i| &self.species[i])
    }

    pub fn species_index_of(&self, name: &str) -> Option<usize> {
        self.species_index.get(name).copied()
    }

    pub fn phase_named(&self, name: &str) -> Option<&Phase> {
        self.phase_index.get(name).map(|&i| &self.phases[i])
    }
}

impl Reaction {
    /// Human-readable identifier for error messages: the slot name when one
    /// exists, otherwise the reactant list.
    pub fn label(&self) -> String {
        if !self.name.is_empty() {
            return self.name.clone();
        }
        let reactants: Vec<&str> = self.reactants.iter().map(|t| t.species.as_str()).collect();
        reactants.join(" + ")
    }
}
