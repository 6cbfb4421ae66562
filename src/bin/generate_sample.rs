use std::path::{Path, PathBuf};

use activation_collector::config::{Config, ExportConfig};
use activation_collector::ingest::{collect_parallel, RunSource};
use activation_collector::{write_parquets, Collector, Table};
use anyhow::{bail, Context, Result};
use arrow::util::pretty::pretty_format_batches;
use serde_json::{json, Value as JsonValue};

/// (element, mass number, state, half-life in seconds, gamma line in MeV)
const INVENTORY: [(&str, u16, &str, f64, f64); 6] = [
    ("H", 3, "", 3.888e8, 0.0),
    ("Mn", 54, "", 2.696e7, 0.835),
    ("Fe", 55, "", 8.6e7, 0.0),
    ("Co", 60, "", 1.6634e8, 1.25),
    ("Cu", 64, "", 4.572e4, 0.511),
    ("Ag", 108, "m", 1.3e10, 0.434),
];

/// Cumulative (irradiation, cooling) times in seconds.
const SCHEDULE: [(f64, f64); 5] = [
    (3.1536e7, 0.0),
    (3.1536e7, 1.0),
    (3.1536e7, 3600.0),
    (3.1536e7, 8.64e4),
    (3.1536e7, 3.1536e7),
];

const GAMMA_GROUPS: usize = 24;

/// Minimal deterministic PRNG (xoshiro256**)
struct SimpleRng {
    state: [u64; 4],
}

impl SimpleRng {
    fn new(seed: u64) -> Self {
        let mut s = [0u64; 4];
        let mut x = seed;
        for slot in &mut s {
            x = x.wrapping_mul(6364136223846793005).wrapping_add(1);
            *slot = x;
        }
        SimpleRng { state: s }
    }

    fn next_u64(&mut self) -> u64 {
        let result = (self.state[1].wrapping_mul(5))
            .rotate_left(7)
            .wrapping_mul(9);
        let t = self.state[1] << 17;
        self.state[2] ^= self.state[0];
        self.state[3] ^= self.state[1];
        self.state[1] ^= self.state[2];
        self.state[0] ^= self.state[3];
        self.state[2] ^= t;
        self.state[3] = self.state[3].rotate_left(45);
        result
    }

    fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    /// Log-uniform sample in [lo, hi)
    fn log_uniform(&mut self, lo: f64, hi: f64) -> f64 {
        (lo.ln() + self.next_f64() * (hi.ln() - lo.ln())).exp()
    }
}

/// Gamma group boundaries in MeV, lower edge first.
fn gamma_boundaries() -> Vec<f64> {
    (0..=GAMMA_GROUPS).map(|i| 0.1 * i as f64).collect()
}

fn gamma_values(boundaries: &[f64], lines: &[(f64, f64)]) -> Vec<f64> {
    boundaries
        .windows(2)
        .map(|w| {
            lines
                .iter()
                .filter(|&&(energy, _)| energy > w[0] && energy <= w[1])
                .map(|&(energy, activity)| energy * activity)
                .sum()
        })
        .collect()
}

fn synthesize_run(material_id: u32, case_id: u32, rng: &mut SimpleRng) -> JsonValue {
    let flux = rng.log_uniform(1e10, 1e14);
    let atoms0: Vec<f64> = INVENTORY.iter().map(|_| rng.log_uniform(1e12, 1e20)).collect();
    let boundaries = gamma_boundaries();

    let steps: Vec<JsonValue> = SCHEDULE
        .iter()
        .map(|&(irradiation_time, cooling_time)| {
            let mut lines = Vec::new();
            let nuclides: Vec<JsonValue> = INVENTORY
                .iter()
                .zip(&atoms0)
                .map(|(&(element, isotope, state, half_life, line), &n0)| {
                    let lambda = std::f64::consts::LN_2 / half_life;
                    let atoms = n0 * (-lambda * cooling_time).exp();
                    let activity = lambda * atoms;
                    if line > 0.0 {
                        lines.push((line, activity));
                    }
                    json!({
                        "element": element, "isotope": isotope, "state": state,
                        "half_life": half_life,
                        "atoms": atoms,
                        "grams": atoms * f64::from(isotope) / 6.02214076e23,
                        "activity": activity,
                        "beta_activity": activity,
                        "heat": activity * 1.6e-13,
                        "dose": activity * 1e-15,
                        "ingestion": activity * 1e-11,
                        "inhalation": activity * 2e-11,
                    })
                })
                .collect();
            let dose: f64 = lines.iter().map(|(e, a)| e * a * 1e-15).sum();
            json!({
                "irradiation_time": irradiation_time,
                "cooling_time": cooling_time,
                "flux": flux,
                "total_heat": 0.0,
                "alpha_heat": 0.0,
                "beta_heat": 0.0,
                "gamma_heat": 0.0,
                "dose_rate": { "type": "Point source", "distance": 1.0, "dose": dose },
                "nuclides": nuclides,
                "gamma_spectrum": {
                    "boundaries": boundaries,
                    "values": gamma_values(&boundaries, &lines),
                },
            })
        })
        .collect();

    json!({
        "run_data": {
            "timestamp": "09:30:00 18 May 2022",
            "run_name": format!("* Material {material_id}, flux {case_id}"),
            "flux_name": format!("flux-{case_id}"),
        },
        "inventory_data": steps,
    })
}

fn main() -> Result<()> {
    env_logger::init();

    let mut args = std::env::args().skip(1);
    let output_dir = PathBuf::from(args.next().unwrap_or_else(|| "sample_data".to_string()));
    let config = match args.next() {
        Some(path) => Config::load(Path::new(&path)).context("loading configuration")?,
        None => Config::default(),
    };

    let mut rng = SimpleRng::new(42);
    let mut sources = Vec::new();
    for material_id in 1..=3u32 {
        for case_id in 1..=4u32 {
            let doc = synthesize_run(material_id, case_id, &mut rng);
            let bytes = serde_json::to_vec(&doc).context("serializing synthetic run")?;
            sources.push(RunSource::new(material_id, case_id, bytes));
        }
    }

    let mut collector = Collector::new(&config.collector);
    let report = collect_parallel(sources, &config.ingest, &mut collector);
    if let Some((key, e)) = report.rejected.first() {
        bail!("synthetic run {key} was rejected: {e}");
    }
    let dataset = collector.get_result();

    let export = ExportConfig {
        overwrite: true,
        ..config.export
    };
    let paths = write_parquets(&dataset, &output_dir, &export).context("writing parquet files")?;

    for (name, rows) in dataset.row_counts() {
        println!("{name:>18}: {rows} rows");
    }
    let preview = dataset
        .timestep
        .to_record_batch()
        .context("building timestep preview")?
        .slice(0, SCHEDULE.len());
    println!("{}", pretty_format_batches(&[preview]).context("formatting preview")?);
    println!(
        "Wrote {} runs to {} files in {}",
        report.committed.len(),
        paths.len(),
        output_dir.display()
    );
    Ok(())
}
