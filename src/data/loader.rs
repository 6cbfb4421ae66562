use std::io::Read;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::{Map, Value as JsonValue};

use super::elements;
use super::model::{
    parse_state, DoseRateType, GammaSpectrum, NuclideEntry, NuclideId, ParsedRun, RunData,
    TimeStep,
};
use crate::error::ParseError;

/// Timestamp layout of the `run_data` header, e.g. `01:25:52 18 May 2022`.
pub const TIMESTAMP_FORMAT: &str = "%H:%M:%S %d %B %Y";

/// Avogadro constant, mol⁻¹.
pub const AVOGADRO: f64 = 6.022_140_76e23;

// ---------------------------------------------------------------------------
// Public entry-points
// ---------------------------------------------------------------------------

/// Parse one run's JSON output.
///
/// Expected layout:
///
/// ```json
/// {
///   "run_data": { "timestamp": "...", "run_name": "...", "flux_name": "..." },
///   "inventory_data": [
///     {
///       "irradiation_time": 0.0, "cooling_time": 0.0, "flux": 1e10,
///       "total_heat": ..., "beta_heat": ..., "gamma_heat": ...,
///       "ingestion_dose": ..., "inhalation_dose": ...,
///       "dose_rate": { "type": "Point source", "distance": 1.0, "dose": ... },
///       "nuclides": [ { "element": "Co", "isotope": 60, "state": "", "half_life": ..., ... } ],
///       "gamma_spectrum": { "boundaries": [...], "values": [...] }
///     }
///   ]
/// }
/// ```
///
/// The run is rejected wholesale on the first malformed field.
pub fn parse_run(bytes: &[u8]) -> Result<ParsedRun, ParseError> {
    let root: JsonValue = serde_json::from_slice(bytes)?;
    parse_document(&root)
}

pub fn parse_run_str(text: &str) -> Result<ParsedRun, ParseError> {
    let root: JsonValue = serde_json::from_str(text)?;
    parse_document(&root)
}

pub fn parse_run_reader<R: Read>(reader: R) -> Result<ParsedRun, ParseError> {
    let root: JsonValue = serde_json::from_reader(reader)?;
    parse_document(&root)
}

/// Parse an already decoded JSON document.
pub fn parse_document(root: &JsonValue) -> Result<ParsedRun, ParseError> {
    let doc = Fields::from_value(root, String::new())?;

    let header = doc.object("run_data")?;
    let timestamp = parse_timestamp(header.str("timestamp")?, &header.path_of("timestamp"))?;
    let run_name = header.str("run_name")?.to_string();
    let flux_name = header.str("flux_name")?.to_string();

    let raw_steps = doc.array("inventory_data")?;
    if raw_steps.is_empty() {
        return Err(ParseError::invalid(
            doc.path_of("inventory_data"),
            "no time steps",
        ));
    }

    let mut clock = StepClock::default();
    let mut time_steps = Vec::with_capacity(raw_steps.len());
    let mut last_dose_rate = None;
    for (i, raw) in raw_steps.iter().enumerate() {
        let path = format!("{}[{i}]", doc.path_of("inventory_data"));
        let step = Fields::from_value(raw, path)?;
        let (ts, dose_rate) = parse_time_step(&step, &mut clock)?;
        time_steps.push(ts);
        last_dose_rate = Some(dose_rate);
    }

    // The first step's dose-rate header may be blank; the last one is authoritative.
    let Some(dose_rate) = last_dose_rate else {
        return Err(ParseError::invalid(doc.path_of("inventory_data"), "no time steps"));
    };
    let dose_rate_type = DoseRateType::parse(&dose_rate.kind).ok_or_else(|| {
        ParseError::invalid(
            dose_rate.type_path.clone(),
            format!("unknown dose rate type '{}'", dose_rate.kind),
        )
    })?;

    Ok(ParsedRun {
        run_data: RunData {
            timestamp,
            run_name,
            flux_name,
            dose_rate_type,
            dose_rate_distance: round_to(dose_rate.distance, 5),
        },
        time_steps,
    })
}

// ---------------------------------------------------------------------------
// Time steps
// ---------------------------------------------------------------------------

/// Derives number, duration and elapsed time from the cumulative
/// irradiation/cooling times of consecutive steps.
#[derive(Debug, Default)]
struct StepClock {
    number: u32,
    irradiation_time: f64,
    cooling_time: f64,
    elapsed_time: f64,
}

impl StepClock {
    /// Returns `(number, duration, elapsed_time)` or `None` if time went backwards.
    fn advance(&mut self, irradiation_time: f64, cooling_time: f64) -> Option<(u32, f64, f64)> {
        let mut duration = irradiation_time - self.irradiation_time;
        if duration == 0.0 {
            duration = cooling_time - self.cooling_time;
        }
        if duration < 0.0 {
            return None;
        }
        self.number += 1;
        self.elapsed_time += duration;
        self.irradiation_time = irradiation_time;
        self.cooling_time = cooling_time;
        Some((self.number, duration, self.elapsed_time))
    }
}

struct DoseRateHeader {
    kind: String,
    type_path: String,
    distance: f64,
}

fn parse_time_step(
    step: &Fields<'_>,
    clock: &mut StepClock,
) -> Result<(TimeStep, DoseRateHeader), ParseError> {
    let irradiation_time = step.f64("irradiation_time")?;
    let cooling_time = step.f64("cooling_time")?;
    let (number, duration, elapsed_time) = clock
        .advance(irradiation_time, cooling_time)
        .ok_or_else(|| {
            ParseError::invalid(
                step.path_of("irradiation_time"),
                "irradiation and cooling times must not decrease",
            )
        })?;
    let mut flux = step.f64("flux")?;
    if duration == 0.0 {
        flux = 0.0;
    }

    let dose_rate = step.object("dose_rate")?;
    let header = DoseRateHeader {
        kind: dose_rate.opt_str("type")?.unwrap_or_default().to_string(),
        type_path: dose_rate.path_of("type"),
        distance: dose_rate.f64_or_zero("distance")?,
    };
    let dose = dose_rate.f64_or_zero("dose")?;

    let nuclides = match step.get("nuclides") {
        None => return Err(ParseError::Missing { path: step.path_of("nuclides") }),
        Some(JsonValue::Null) => Vec::new(),
        Some(_) => step
            .array("nuclides")?
            .iter()
            .enumerate()
            .map(|(j, raw)| {
                let path = format!("{}[{j}]", step.path_of("nuclides"));
                parse_nuclide(&Fields::from_value(raw, path)?)
            })
            .collect::<Result<Vec<_>, _>>()?,
    };

    let gamma = match step.get("gamma_spectrum") {
        None | Some(JsonValue::Null) => None,
        Some(_) => parse_gamma(&step.object("gamma_spectrum")?)?,
    };

    let mut ts = TimeStep {
        number,
        irradiation_time,
        cooling_time,
        duration,
        elapsed_time,
        flux,
        atoms: step.f64_or_zero("total_atoms")?,
        activity: step.f64_or_zero("total_activity")?,
        alpha_activity: step.f64_or_zero("alpha_activity")?,
        beta_activity: step.f64_or_zero("beta_activity")?,
        gamma_activity: step.f64_or_zero("gamma_activity")?,
        mass: step.f64_or_zero("total_mass")?,
        heat: step.f64_or_zero("total_heat")?,
        alpha_heat: step.opt_f64("alpha_heat")?,
        beta_heat: step.f64_or_zero("beta_heat")?,
        gamma_heat: step.f64_or_zero("gamma_heat")?,
        ingestion: step.f64_or_zero("ingestion_dose")?,
        inhalation: step.f64_or_zero("inhalation_dose")?,
        dose,
        nuclides,
        gamma,
    };
    fill_missing_totals(&mut ts);
    Ok((ts, header))
}

/// Older activation codes leave these totals at zero; rebuild them from the inventory.
fn fill_missing_totals(ts: &mut TimeStep) {
    let sum = |f: fn(&NuclideEntry) -> f64| ts.nuclides.iter().map(f).sum::<f64>();
    if ts.mass == 0.0 {
        ts.mass = 1e-3 * sum(|n| n.grams);
    }
    if ts.atoms == 0.0 {
        ts.atoms = sum(|n| n.atoms);
    }
    if ts.activity == 0.0 {
        ts.activity = sum(|n| n.activity);
    }
    if ts.alpha_activity == 0.0 {
        ts.alpha_activity = sum(|n| n.alpha_activity);
    }
    if ts.beta_activity == 0.0 {
        ts.beta_activity = sum(|n| n.beta_activity);
    }
    if ts.gamma_activity == 0.0 {
        ts.gamma_activity = sum(|n| n.gamma_activity);
    }
}

// ---------------------------------------------------------------------------
// Nuclides
// ---------------------------------------------------------------------------

fn parse_nuclide(n: &Fields<'_>) -> Result<NuclideEntry, ParseError> {
    let element = n.str("element")?.trim();
    if element.is_empty() {
        return Err(ParseError::invalid(n.path_of("element"), "empty element symbol"));
    }
    let mass_number = n.u16("isotope")?;
    let state_symbol = n.str("state")?;
    let state = parse_state(state_symbol).ok_or_else(|| {
        ParseError::invalid(n.path_of("state"), format!("unknown state '{state_symbol}'"))
    })?;

    let z = elements::atomic_number(element);
    let zai = match (n.opt_u32("zai")?, z) {
        (Some(zai), _) if zai != 0 => zai,
        (_, Some(z)) => elements::zai(z, mass_number, state),
        (_, None) => {
            return Err(ParseError::invalid(
                n.path_of("element"),
                format!("unknown element '{element}'"),
            ))
        }
    };
    let element = z.and_then(elements::symbol).unwrap_or(element);

    let half_life = n.f64("half_life")?;
    if half_life < 0.0 {
        return Err(ParseError::invalid(n.path_of("half_life"), "negative half-life"));
    }

    let grams = n.f64_or_zero("grams")?;
    let mut atoms = n.f64_or_zero("atoms")?;
    if atoms == 0.0 && grams > 0.0 {
        atoms = atoms_from_grams(grams, mass_number);
    }

    Ok(NuclideEntry {
        id: NuclideId::new(element, mass_number, state),
        zai,
        half_life,
        atoms,
        grams,
        activity: n.f64_or_zero("activity")?,
        alpha_activity: n.f64_or_zero("alpha_activity")?,
        beta_activity: n.f64_or_zero("beta_activity")?,
        gamma_activity: n.f64_or_zero("gamma_activity")?,
        heat: n.f64_or_zero("heat")?,
        alpha_heat: n.f64_or_zero("alpha_heat")?,
        beta_heat: n.f64_or_zero("beta_heat")?,
        gamma_heat: n.f64_or_zero("gamma_heat")?,
        dose: n.f64_or_zero("dose")?,
        ingestion: n.f64_or_zero("ingestion")?,
        inhalation: n.f64_or_zero("inhalation")?,
    })
}

/// Older activation codes report only the mass. The molar mass is taken as
/// the mass number in g/mol.
fn atoms_from_grams(grams: f64, mass_number: u16) -> f64 {
    if mass_number == 0 {
        return 0.0;
    }
    AVOGADRO * grams / f64::from(mass_number)
}

// ---------------------------------------------------------------------------
// Gamma spectrum
// ---------------------------------------------------------------------------

/// Accepts either one upper boundary per value, or `values + 1` boundaries
/// where the first is the lower edge of the grid.
fn parse_gamma(g: &Fields<'_>) -> Result<Option<GammaSpectrum>, ParseError> {
    let boundaries = g.f64_array("boundaries")?;
    let rates = g.f64_array("values")?;
    if boundaries.is_empty() && rates.is_empty() {
        return Ok(None);
    }

    let (lower_edge, boundaries) = if boundaries.len() == rates.len() {
        (None, boundaries)
    } else if boundaries.len() == rates.len() + 1 {
        (Some(boundaries[0]), boundaries[1..].to_vec())
    } else {
        return Err(ParseError::invalid(
            g.path_of("values"),
            format!(
                "{} values do not match {} boundaries",
                rates.len(),
                boundaries.len()
            ),
        ));
    };

    let offset = usize::from(lower_edge.is_some());
    let mut previous = lower_edge;
    for (i, &b) in boundaries.iter().enumerate() {
        if b < 0.0 || previous.is_some_and(|p| b <= p) {
            return Err(ParseError::invalid(
                format!("{}[{}]", g.path_of("boundaries"), i + offset),
                "boundaries must be non-negative and strictly increasing",
            ));
        }
        previous = Some(b);
    }

    Ok(Some(GammaSpectrum {
        lower_edge,
        boundaries,
        rates,
    }))
}

// ---------------------------------------------------------------------------
// Small helpers
// ---------------------------------------------------------------------------

fn parse_timestamp(text: &str, path: &str) -> Result<DateTime<Utc>, ParseError> {
    NaiveDateTime::parse_from_str(text.trim(), TIMESTAMP_FORMAT)
        .map(|naive| naive.and_utc())
        .map_err(|e| ParseError::invalid(path, format!("bad timestamp '{text}': {e}")))
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let scale = 10f64.powi(decimals);
    (value * scale).round() / scale
}

/// A JSON object together with its field path, for error reporting.
struct Fields<'a> {
    map: &'a Map<String, JsonValue>,
    path: String,
}

impl<'a> Fields<'a> {
    fn from_value(value: &'a JsonValue, path: String) -> Result<Self, ParseError> {
        let map = value.as_object().ok_or_else(|| ParseError::Type {
            path: if path.is_empty() { "<root>".into() } else { path.clone() },
            expected: "an object",
        })?;
        Ok(Fields { map, path })
    }

    fn path_of(&self, key: &str) -> String {
        if self.path.is_empty() {
            key.to_string()
        } else {
            format!("{}.{key}", self.path)
        }
    }

    fn get(&self, key: &str) -> Option<&'a JsonValue> {
        self.map.get(key)
    }

    fn required(&self, key: &str) -> Result<&'a JsonValue, ParseError> {
        match self.map.get(key) {
            None | Some(JsonValue::Null) => Err(ParseError::Missing {
                path: self.path_of(key),
            }),
            Some(v) => Ok(v),
        }
    }

    fn type_error(&self, key: &str, expected: &'static str) -> ParseError {
        ParseError::Type {
            path: self.path_of(key),
            expected,
        }
    }

    fn object(&self, key: &str) -> Result<Fields<'a>, ParseError> {
        Fields::from_value(self.required(key)?, self.path_of(key))
    }

    fn array(&self, key: &str) -> Result<&'a [JsonValue], ParseError> {
        self.required(key)?
            .as_array()
            .map(Vec::as_slice)
            .ok_or_else(|| self.type_error(key, "an array"))
    }

    fn str(&self, key: &str) -> Result<&'a str, ParseError> {
        self.required(key)?
            .as_str()
            .ok_or_else(|| self.type_error(key, "a string"))
    }

    fn opt_str(&self, key: &str) -> Result<Option<&'a str>, ParseError> {
        match self.map.get(key) {
            None | Some(JsonValue::Null) => Ok(None),
            Some(v) => v
                .as_str()
                .map(Some)
                .ok_or_else(|| self.type_error(key, "a string")),
        }
    }

    fn f64(&self, key: &str) -> Result<f64, ParseError> {
        self.required(key)?
            .as_f64()
            .ok_or_else(|| self.type_error(key, "a number"))
    }

    fn opt_f64(&self, key: &str) -> Result<Option<f64>, ParseError> {
        match self.map.get(key) {
            None | Some(JsonValue::Null) => Ok(None),
            Some(v) => v
                .as_f64()
                .map(Some)
                .ok_or_else(|| self.type_error(key, "a number")),
        }
    }

    fn f64_or_zero(&self, key: &str) -> Result<f64, ParseError> {
        Ok(self.opt_f64(key)?.unwrap_or(0.0))
    }

    fn u16(&self, key: &str) -> Result<u16, ParseError> {
        self.required(key)?
            .as_u64()
            .and_then(|v| u16::try_from(v).ok())
            .ok_or_else(|| self.type_error(key, "an integer in 0..=65535"))
    }

    fn opt_u32(&self, key: &str) -> Result<Option<u32>, ParseError> {
        match self.map.get(key) {
            None | Some(JsonValue::Null) => Ok(None),
            Some(v) => v
                .as_u64()
                .and_then(|v| u32::try_from(v).ok())
                .map(Some)
                .ok_or_else(|| self.type_error(key, "a non-negative 32-bit integer")),
        }
    }

    fn f64_array(&self, key: &str) -> Result<Vec<f64>, ParseError> {
        self.array(key)?
            .iter()
            .enumerate()
            .map(|(j, v)| {
                v.as_f64().ok_or_else(|| ParseError::Type {
                    path: format!("{}[{j}]", self.path_of(key)),
                    expected: "a number",
                })
            })
            .collect()
    }
}
