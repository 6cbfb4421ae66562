use std::fmt;

use chrono::{DateTime, Utc};

// ---------------------------------------------------------------------------
// RunKey – (material_id, case_id), unique within a collection session
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RunKey {
    pub material_id: u32,
    pub case_id: u32,
}

impl RunKey {
    pub fn new(material_id: u32, case_id: u32) -> Self {
        Self {
            material_id,
            case_id,
        }
    }
}

impl fmt::Display for RunKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(material {}, case {})", self.material_id, self.case_id)
    }
}

// ---------------------------------------------------------------------------
// NuclideId – the identity triple (element, mass number, state)
// ---------------------------------------------------------------------------

/// Identity of a nuclide species.
///
/// `state` is 0 for the ground state, 1 for the first metastable state (`m`)
/// and 2 for the second (`n`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NuclideId {
    pub element: String,
    pub mass_number: u16,
    pub state: u8,
}

impl NuclideId {
    pub fn new(element: impl Into<String>, mass_number: u16, state: u8) -> Self {
        Self {
            element: element.into(),
            mass_number,
            state,
        }
    }

    /// State suffix as written in activation output: `""`, `"m"` or `"n"`.
    pub fn state_symbol(&self) -> &'static str {
        match self.state {
            0 => "",
            1 => "m",
            _ => "n",
        }
    }
}

impl fmt::Display for NuclideId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.element, self.mass_number, self.state_symbol())
    }
}

/// Parse a state suffix. Anything but ground, `m` and `n` is rejected.
pub fn parse_state(symbol: &str) -> Option<u8> {
    match symbol.trim() {
        "" => Some(0),
        "m" | "M" => Some(1),
        "n" | "N" => Some(2),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// RunData – one per run
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DoseRateType {
    PointSource,
    PlaneSource,
}

impl DoseRateType {
    pub fn as_str(self) -> &'static str {
        match self {
            DoseRateType::PointSource => "Point source",
            DoseRateType::PlaneSource => "Plane source",
        }
    }

    pub fn parse(text: &str) -> Option<Self> {
        match text.trim() {
            "Point source" => Some(DoseRateType::PointSource),
            "Plane source" => Some(DoseRateType::PlaneSource),
            _ => None,
        }
    }
}

impl fmt::Display for DoseRateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunData {
    pub timestamp: DateTime<Utc>,
    pub run_name: String,
    pub flux_name: String,
    pub dose_rate_type: DoseRateType,
    /// Meters; meaningful for point sources only.
    pub dose_rate_distance: f64,
}

// ---------------------------------------------------------------------------
// TimeStep and its per-nuclide / gamma content
// ---------------------------------------------------------------------------

/// Aggregate quantities of one time step.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TimeStep {
    /// 1-based, contiguous within a run.
    pub number: u32,
    pub irradiation_time: f64,
    pub cooling_time: f64,
    pub duration: f64,
    pub elapsed_time: f64,
    pub flux: f64,
    pub atoms: f64,
    pub activity: f64,
    pub alpha_activity: f64,
    pub beta_activity: f64,
    pub gamma_activity: f64,
    /// kg
    pub mass: f64,
    pub heat: f64,
    /// Not reported by older activation codes.
    pub alpha_heat: Option<f64>,
    pub beta_heat: f64,
    pub gamma_heat: f64,
    pub ingestion: f64,
    pub inhalation: f64,
    pub dose: f64,
    pub nuclides: Vec<NuclideEntry>,
    pub gamma: Option<GammaSpectrum>,
}

/// Inventory of a single nuclide at one time step.
#[derive(Debug, Clone, PartialEq)]
pub struct NuclideEntry {
    pub id: NuclideId,
    pub zai: u32,
    /// Seconds; zero for stable nuclides.
    pub half_life: f64,
    pub atoms: f64,
    pub grams: f64,
    pub activity: f64,
    pub alpha_activity: f64,
    pub beta_activity: f64,
    pub gamma_activity: f64,
    pub heat: f64,
    pub alpha_heat: f64,
    pub beta_heat: f64,
    pub gamma_heat: f64,
    pub dose: f64,
    pub ingestion: f64,
    pub inhalation: f64,
}

/// Gamma emission spectrum of one time step.
///
/// `boundaries[i]` is the upper energy boundary (MeV) of the bin whose
/// emission rate is `rates[i]`; both vectors have the same length.
#[derive(Debug, Clone, PartialEq)]
pub struct GammaSpectrum {
    /// Lower edge of the first bin, when the source reports it.
    pub lower_edge: Option<f64>,
    pub boundaries: Vec<f64>,
    pub rates: Vec<f64>,
}

impl GammaSpectrum {
    /// (upper boundary, rate) pairs in increasing energy order.
    pub fn pairs(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.boundaries.iter().copied().zip(self.rates.iter().copied())
    }

    pub fn len(&self) -> usize {
        self.rates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rates.is_empty()
    }
}

// ---------------------------------------------------------------------------
// ParsedRun – the single normalized shape the collector accepts
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedRun {
    pub run_data: RunData,
    pub time_steps: Vec<TimeStep>,
}

impl ParsedRun {
    pub fn nuclide_count(&self) -> usize {
        self.time_steps.iter().map(|ts| ts.nuclides.len()).sum()
    }

    pub fn gamma_count(&self) -> usize {
        self.time_steps
            .iter()
            .filter_map(|ts| ts.gamma.as_ref())
            .map(GammaSpectrum::len)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nuclide_id_display_includes_state_suffix() {
        assert_eq!(NuclideId::new("Ag", 108, 1).to_string(), "Ag108m");
        assert_eq!(NuclideId::new("Co", 60, 0).to_string(), "Co60");
        assert_eq!(NuclideId::new("Hf", 178, 2).to_string(), "Hf178n");
    }

    #[test]
    fn state_symbols() {
        assert_eq!(parse_state(""), Some(0));
        assert_eq!(parse_state("m"), Some(1));
        assert_eq!(parse_state("n"), Some(2));
        assert_eq!(parse_state("x"), None);
    }

    #[test]
    fn dose_rate_type_round_trips_through_text() {
        for t in [DoseRateType::PointSource, DoseRateType::PlaneSource] {
            assert_eq!(DoseRateType::parse(t.as_str()), Some(t));
        }
        assert_eq!(DoseRateType::parse("Contact"), None);
    }
}
