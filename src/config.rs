// Normalizes raw JSON configuration into solver-ready values: box-model
// options (time fields to seconds), the mechanism (validated and
// canonicalized), inline conditions blocks (flattened to records), and
// optional initial concentrations.
//
// Parsing never mutates the caller's JSON; everything is deep-copied into
// owned structures.

use crate::constants::{time_unit_to_seconds, BOLTZMANN_J_PER_K};
use crate::conditions::Record;
use crate::error::ConfigError;
use crate::mechanism::{
    ArrheniusParams, BranchedParams, Mechanism, Phase, PhaseSpecies, RateLaw, Reaction,
    ReactionTerm, Species, SurfaceParams, TroeParams, TunnelingParams,
};
use serde::Deserialize;
use serde_json::Value;

pub const OPTIONS_KEY: &str = "box model options";
pub const MECHANISM_KEY: &str = "mechanism";
pub const CONDITIONS_KEY: &str = "conditions";
pub const INITIAL_CONDITIONS_KEY: &str = "initial conditions";

const CHEM_STEP_FIELD: &str = "chemistry time step";
const OUTPUT_STEP_FIELD: &str = "output time step";
const SIMULATION_LENGTH_FIELD: &str = "simulation length";
const MAX_ITERATIONS_FIELD: &str = "maximum iterations";

/// Run-control options, all times normalized to seconds.
#[derive(Debug, Clone, PartialEq)]
pub struct BoxModelOptions {
    pub chem_time_step_s: f64,
    pub output_time_step_s: f64,
    pub simulation_length_s: f64,
    pub max_iterations: Option<u64>,
}

/// Parse the `box model options` block. Time fields carry unit suffixes in
/// their keys (`"chemistry time step [min]"`); units among {s, min, hr, day}
/// convert with fixed multipliers. The chemistry time step and simulation
/// length are required; the output time step defaults to the chemistry step.
pub fn parse_box_model_options(config: &Value) -> Result<BoxModelOptions, ConfigError> {
    let options = config
        .get(OPTIONS_KEY)
        .ok_or_else(|| ConfigError::MissingField(OPTIONS_KEY.to_string()))?;

    let chem_time_step_s = timed_field(options, CHEM_STEP_FIELD)?
        .ok_or_else(|| ConfigError::MissingField(CHEM_STEP_FIELD.to_string()))?;
    let simulation_length_s = timed_field(options, SIMULATION_LENGTH_FIELD)?
        .ok_or_else(|| ConfigError::MissingField(SIMULATION_LENGTH_FIELD.to_string()))?;
    let output_time_step_s = timed_field(options, OUTPUT_STEP_FIELD)?.unwrap_or(chem_time_step_s);

    let max_iterations = match options.get(MAX_ITERATIONS_FIELD) {
        None => None,
        Some(value) => Some(value.as_u64().ok_or_else(|| ConfigError::InvalidValue {
            key: MAX_ITERATIONS_FIELD.to_string(),
            message: "expected a non-negative integer".to_string(),
        })?),
    };

    Ok(BoxModelOptions {
        chem_time_step_s,
        output_time_step_s,
        simulation_length_s,
        max_iterations,
    })
}

/// Find a time field whose key is `base` (implied seconds) or
/// `"<base> [<unit>]"`, returning its value in seconds.
fn timed_field(options: &Value, base: &str) -> Result<Option<f64>, ConfigError> {
    let object = options.as_object().ok_or_else(|| ConfigError::InvalidValue {
        key: OPTIONS_KEY.to_string(),
        message: "expected an object".to_string(),
    })?;

    for (key, value) in object {
        let unit = if key == base {
            "s"
        } else if let Some(rest) = key.strip_prefix(base) {
            let rest = rest.trim();
            match rest.strip_prefix('[').and_then(|r| r.strip_suffix(']')) {
                Some(unit) => unit,
                None => continue,
            }
        } else {
            continue;
        };

        let multiplier =
            time_unit_to_seconds(unit).ok_or_else(|| ConfigError::InvalidTimeUnit {
                key: key.clone(),
                unit: unit.to_string(),
            })?;
        let number = value.as_f64().ok_or_else(|| ConfigError::InvalidValue {
            key: key.clone(),
            message: "expected a number".to_string(),
        })?;
        return Ok(Some(number * multiplier));
    }
    Ok(None)
}

// ---------------------------------------------------------------------------
// Mechanism
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RawMechanism {
    #[serde(default)]
    name: String,
    #[serde(default)]
    species: Vec<RawSpecies>,
    #[serde(default)]
    phases: Vec<RawPhase>,
    #[serde(default)]
    reactions: Vec<RawReaction>,
}

#[derive(Debug, Deserialize)]
struct RawSpecies {
    name: String,
    #[serde(rename = "third body", default)]
    third_body: bool,
    #[serde(rename = "absolute tolerance", default)]
    absolute_tolerance: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct RawPhase {
    name: String,
    #[serde(default)]
    species: Vec<RawPhaseSpecies>,
}

/// Phase members arrive either as bare names or as `{name}` objects; both
/// normalize to the same canonical entry.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawPhaseSpecies {
    Bare(String),
    Entry { name: String },
}

#[derive(Debug, Deserialize)]
struct RawReaction {
    #[serde(default)]
    name: String,
    #[serde(rename = "gas phase", default = "default_gas_phase")]
    gas_phase: String,
    #[serde(default)]
    reactants: Vec<RawTerm>,
    #[serde(default)]
    products: Vec<RawTerm>,
    #[serde(flatten)]
    rate: RawRateLaw,
}

#[derive(Debug, Deserialize)]
struct RawTerm {
    #[serde(rename = "species name")]
    species: String,
    #[serde(default = "default_coefficient")]
    coefficient: f64,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
enum RawRateLaw {
    Arrhenius {
        #[serde(rename = "A")]
        a: Option<f64>,
        #[serde(rename = "B")]
        b: Option<f64>,
        #[serde(rename = "C")]
        c: Option<f64>,
        #[serde(rename = "D")]
        d: Option<f64>,
        #[serde(rename = "E")]
        e: Option<f64>,
        #[serde(rename = "Ea")]
        ea: Option<f64>,
    },
    Photolysis {
        #[serde(rename = "scaling factor", default = "default_scaling")]
        scaling_factor: f64,
    },
    Emission {
        #[serde(rename = "scaling factor", default = "default_scaling")]
        scaling_factor: f64,
    },
    FirstOrderLoss {
        #[serde(rename = "scaling factor", default = "default_scaling")]
        scaling_factor: f64,
    },
    Branched {
        #[serde(rename = "X")]
        x: f64,
        #[serde(rename = "Y")]
        y: f64,
        a0: f64,
        n: f64,
    },
    Troe {
        #[serde(rename = "k0_A", default = "default_scaling")]
        k0_a: f64,
        #[serde(rename = "k0_B", default)]
        k0_b: f64,
        #[serde(rename = "k0_C", default)]
        k0_c: f64,
        #[serde(rename = "kinf_A", default = "default_scaling")]
        kinf_a: f64,
        #[serde(rename = "kinf_B", default)]
        kinf_b: f64,
        #[serde(rename = "kinf_C", default)]
        kinf_c: f64,
        #[serde(rename = "Fc", default = "default_troe_fc")]
        fc: f64,
        #[serde(rename = "N", default = "default_scaling")]
        n: f64,
    },
    Tunneling {
        #[serde(rename = "A", default = "default_scaling")]
        a: f64,
        #[serde(rename = "B", default)]
        b: f64,
        #[serde(rename = "C", default)]
        c: f64,
    },
    Surface {
        #[serde(rename = "reaction probability", default = "default_scaling")]
        reaction_probability: f64,
    },
}

fn default_gas_phase() -> String {
    "gas".to_string()
}

fn default_coefficient() -> f64 {
    1.0
}

fn default_scaling() -> f64 {
    1.0
}

fn default_troe_fc() -> f64 {
    0.6
}

/// Parse and normalize the mechanism. Fails if `raw` is absent. The
/// caller's JSON is never mutated; the result is a deep copy.
///
/// Arrhenius-family reactions carrying an activation energy `Ea` (joules)
/// get `C = -Ea / k_B` derived and `Ea` dropped; missing parameters default
/// to `A=1, B=0, D=300, E=0`, and `C=0` only when no `Ea` was present.
/// Explicitly supplied parameters are never overwritten.
pub fn parse_mechanism(raw: Option<&Value>) -> Result<Mechanism, ConfigError> {
    let raw = raw.ok_or_else(|| ConfigError::MissingField(MECHANISM_KEY.to_string()))?;
    let parsed: RawMechanism = serde_json::from_value(raw.clone())?;

    let species = parsed
        .species
        .into_iter()
        .map(|s| Species {
            name: s.name,
            is_third_body: s.third_body,
            absolute_tolerance: s.absolute_tolerance,
        })
        .collect();

    let phases = parsed
        .phases
        .into_iter()
        .map(|p| Phase {
            name: p.name,
            species: p
                .species
                .into_iter()
                .map(|entry| match entry {
                    RawPhaseSpecies::Bare(name) => PhaseSpecies { name },
                    RawPhaseSpecies::Entry { name } => PhaseSpecies { name },
                })
                .collect(),
        })
        .collect();

    let reactions = parsed
        .reactions
        .into_iter()
        .map(|r| Reaction {
            name: r.name,
            gas_phase: r.gas_phase,
            reactants: r.reactants.into_iter().map(term).collect(),
            products: r.products.into_iter().map(term).collect(),
            rate_law: normalize_rate_law(r.rate),
        })
        .collect();

    Mechanism::new(parsed.name, species, phases, reactions)
}

fn term(raw: RawTerm) -> ReactionTerm {
    ReactionTerm::new(raw.species, raw.coefficient)
}

fn normalize_rate_law(raw: RawRateLaw) -> RateLaw {
    match raw {
        RawRateLaw::Arrhenius { a, b, c, d, e, ea } => RateLaw::Arrhenius(ArrheniusParams {
            a: a.unwrap_or(1.0),
            b: b.unwrap_or(0.0),
            c: match ea {
                Some(ea) => -ea / BOLTZMANN_J_PER_K,
                None => c.unwrap_or(0.0),
            },
            d: d.unwrap_or(300.0),
            e: e.unwrap_or(0.0),
        }),
        RawRateLaw::Photolysis { scaling_factor } => RateLaw::Photolysis { scaling_factor },
        RawRateLaw::Emission { scaling_factor } => RateLaw::Emission { scaling_factor },
        RawRateLaw::FirstOrderLoss { scaling_factor } => {
            RateLaw::FirstOrderLoss { scaling_factor }
        }
        RawRateLaw::Branched { x, y, a0, n } => RateLaw::Branched(BranchedParams { x, y, a0, n }),
        RawRateLaw::Troe {
            k0_a,
            k0_b,
            k0_c,
            kinf_a,
            kinf_b,
            kinf_c,
            fc,
            n,
        } => RateLaw::Troe(TroeParams {
            k0_a,
            k0_b,
            k0_c,
            kinf_a,
            kinf_b,
            kinf_c,
            fc,
            n,
        }),
        RawRateLaw::Tunneling { a, b, c } => RateLaw::Tunneling(TunnelingParams { a, b, c }),
        RawRateLaw::Surface {
            reaction_probability,
        } => RateLaw::Surface(SurfaceParams {
            reaction_probability,
        }),
    }
}

// ---------------------------------------------------------------------------
// Conditions
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RawConditions {
    #[serde(default)]
    data: Option<Vec<RawDataBlock>>,
    // A legacy `filepaths` list may be present; file-backed loading belongs
    // to an external collaborator, so it is ignored here.
}

#[derive(Debug, Deserialize)]
struct RawDataBlock {
    headers: Vec<String>,
    rows: Vec<Vec<f64>>,
}

/// Flatten inline conditions blocks into records: each block's headers are
/// zipped to each of its rows, blocks concatenated in order, rows in order
/// within each block. Absent input (or input without a data collection)
/// yields an empty sequence.
pub fn parse_conditions(raw: Option<&Value>) -> Result<Vec<Record>, ConfigError> {
    let Some(raw) = raw else {
        return Ok(Vec::new());
    };
    let parsed: RawConditions = serde_json::from_value(raw.clone())?;
    let Some(blocks) = parsed.data else {
        return Ok(Vec::new());
    };

    let mut records = Vec::new();
    for block in blocks {
        for row in &block.rows {
            if row.len() != block.headers.len() {
                return Err(ConfigError::InvalidValue {
                    key: "rows".to_string(),
                    message: format!(
                        "row has {} values but there are {} headers",
                        row.len(),
                        block.headers.len()
                    ),
                });
            }
            let record: Record = block
                .headers
                .iter()
                .cloned()
                .zip(row.iter().copied())
                .collect();
            records.push(record);
        }
    }
    Ok(records)
}

/// Parse the optional `initial conditions` block: `CONC.<species>.<unit>`
/// keys seed the solver state at t=0. Non-concentration keys are ignored.
pub fn parse_initial_concentrations(config: &Value) -> Result<Vec<(String, f64)>, ConfigError> {
    let Some(block) = config.get(INITIAL_CONDITIONS_KEY).and_then(|v| v.as_object()) else {
        return Ok(Vec::new());
    };

    let mut seeds = Vec::new();
    for (key, value) in block {
        let segments: Vec<&str> = key.split('.').collect();
        if segments[0] != "CONC" {
            continue;
        }
        if segments.len() < 3 {
            return Err(ConfigError::MalformedRateKey(key.clone()));
        }
        let species = segments[1..segments.len() - 1].join(".");
        let number = value.as_f64().ok_or_else(|| ConfigError::InvalidValue {
            key: key.clone(),
            message: "expected a number".to_string(),
        })?;
        seeds.push((species, number));
    }
    Ok(seeds)
}
