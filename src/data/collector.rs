use std::collections::HashSet;
use std::sync::Arc;

use log::debug;
use parking_lot::Mutex;

use super::model::{ParsedRun, RunKey};
use super::registry::{GammaBinRegistry, GammaGrid, NuclideConflict, NuclideRegistry};
use super::tables::{
    Dataset, GammaBinRow, GammaBinTable, NuclideRow, NuclideTable, RunDataRow, RunDataTable,
    TimeStepGammaRow, TimeStepGammaTable, TimeStepNuclideRow, TimeStepNuclideTable, TimeStepRow,
    TimeStepTable,
};
use crate::config::CollectorConfig;
use crate::error::CollectError;

// ---------------------------------------------------------------------------
// Collector – the single writer of a collection session
// ---------------------------------------------------------------------------

/// Accumulates parsed runs into column-oriented tables.
///
/// Every [`append`](Collector::append) is all-or-nothing: the run is fully
/// validated against the registries before the first row is written.
#[derive(Debug, Clone)]
pub struct Collector {
    runs: HashSet<RunKey>,
    nuclides: NuclideRegistry,
    gamma_bins: GammaBinRegistry,
    rundata: RunDataTable,
    timestep: TimeStepTable,
    timestep_nuclide: TimeStepNuclideTable,
    timestep_gamma: TimeStepGammaTable,
}

impl Default for Collector {
    fn default() -> Self {
        Self::new(&CollectorConfig::default())
    }
}

impl Collector {
    pub fn new(config: &CollectorConfig) -> Self {
        Self {
            runs: HashSet::new(),
            nuclides: NuclideRegistry::new(config.half_life_tolerance()),
            gamma_bins: GammaBinRegistry::new(config.boundary_tolerance()),
            rundata: RunDataTable::default(),
            timestep: TimeStepTable::default(),
            timestep_nuclide: TimeStepNuclideTable::default(),
            timestep_gamma: TimeStepGammaTable::default(),
        }
    }

    /// Add one run under `(material_id, case_id)`.
    ///
    /// Fails without changing anything if the key was already collected, a
    /// nuclide disagrees with the registered reference data, or a gamma
    /// spectrum is on a different grid.
    pub fn append(
        &mut self,
        run: &ParsedRun,
        material_id: u32,
        case_id: u32,
    ) -> Result<&mut Self, CollectError> {
        let key = RunKey::new(material_id, case_id);
        if self.runs.contains(&key) {
            return Err(CollectError::DuplicateRun(key));
        }

        // Validate: nothing below touches self until the commit.
        let mut stage = self.nuclides.stage();
        let mut zais = Vec::with_capacity(run.nuclide_count());
        for ts in &run.time_steps {
            for n in &ts.nuclides {
                let handle = stage
                    .resolve(&n.id, n.zai, n.half_life)
                    .map_err(|conflict| nuclide_error(key, conflict))?;
                zais.push(stage.zai(handle));
            }
        }
        let new_nuclides = stage.finish();

        let mut new_grid: Option<GammaGrid> = None;
        for ts in &run.time_steps {
            let Some(spectrum) = &ts.gamma else { continue };
            match self.gamma_bins.check(spectrum, new_grid.as_ref()) {
                Ok(Some(grid)) => new_grid = Some(grid),
                Ok(None) => {}
                Err(detail) => {
                    return Err(CollectError::GridMismatch {
                        key,
                        time_step_number: ts.number,
                        detail,
                    })
                }
            }
        }

        // Commit: infallible from here on.
        self.runs.insert(key);
        self.nuclides.commit(new_nuclides);
        if let Some(grid) = new_grid {
            self.gamma_bins.adopt(grid);
        }
        self.push_rows(run, key, &zais);

        debug!(
            "collected run {key}: {} time steps, {} nuclide rows, {} gamma rows",
            run.time_steps.len(),
            zais.len(),
            run.gamma_count()
        );
        Ok(self)
    }

    fn push_rows(&mut self, run: &ParsedRun, key: RunKey, zais: &[u32]) {
        let RunKey {
            material_id,
            case_id,
        } = key;
        let rd = &run.run_data;
        self.rundata.push(RunDataRow {
            material_id,
            case_id,
            timestamp: rd.timestamp,
            run_name: rd.run_name.clone(),
            flux_name: rd.flux_name.clone(),
            dose_rate_type: rd.dose_rate_type.as_str().to_string(),
            dose_rate_distance: rd.dose_rate_distance as f32,
        });

        self.timestep.reserve(run.time_steps.len());
        self.timestep_nuclide.reserve(zais.len());
        self.timestep_gamma.reserve(run.gamma_count());

        let mut zais = zais.iter().copied();
        for ts in &run.time_steps {
            let time_step_number = ts.number;
            self.timestep.push(TimeStepRow {
                material_id,
                case_id,
                time_step_number,
                elapsed_time: ts.elapsed_time as f32,
                irradiation_time: ts.irradiation_time as f32,
                cooling_time: ts.cooling_time as f32,
                duration: ts.duration as f32,
                flux: ts.flux as f32,
                atoms: ts.atoms as f32,
                activity: ts.activity as f32,
                alpha_activity: ts.alpha_activity as f32,
                beta_activity: ts.beta_activity as f32,
                gamma_activity: ts.gamma_activity as f32,
                mass: ts.mass as f32,
                heat: ts.heat as f32,
                alpha_heat: ts.alpha_heat.map(|v| v as f32),
                beta_heat: ts.beta_heat as f32,
                gamma_heat: ts.gamma_heat as f32,
                ingestion: ts.ingestion as f32,
                inhalation: ts.inhalation as f32,
                dose: ts.dose as f32,
            });

            for (n, zai) in ts.nuclides.iter().zip(&mut zais) {
                self.timestep_nuclide.push(TimeStepNuclideRow {
                    material_id,
                    case_id,
                    time_step_number,
                    zai,
                    atoms: n.atoms as f32,
                    grams: n.grams as f32,
                    activity: n.activity as f32,
                    alpha_activity: n.alpha_activity as f32,
                    beta_activity: n.beta_activity as f32,
                    gamma_activity: n.gamma_activity as f32,
                    heat: n.heat as f32,
                    alpha_heat: n.alpha_heat as f32,
                    beta_heat: n.beta_heat as f32,
                    gamma_heat: n.gamma_heat as f32,
                    dose: n.dose as f32,
                    ingestion: n.ingestion as f32,
                    inhalation: n.inhalation as f32,
                });
            }

            // The grid matched the registry, so bin g is the g-th pair.
            if let Some(spectrum) = &ts.gamma {
                for (g, (boundary, rate)) in spectrum.pairs().enumerate() {
                    debug_assert_eq!(self.gamma_bins.resolve(boundary), Some(g as u16));
                    self.timestep_gamma.push(TimeStepGammaRow {
                        material_id,
                        case_id,
                        time_step_number,
                        g: g as u16,
                        rate: rate as f32,
                    });
                }
            }
        }
    }

    pub fn contains(&self, key: RunKey) -> bool {
        self.runs.contains(&key)
    }

    /// Number of runs collected so far.
    pub fn len(&self) -> usize {
        self.runs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    pub fn nuclides(&self) -> &NuclideRegistry {
        &self.nuclides
    }

    pub fn gamma_bins(&self) -> &GammaBinRegistry {
        &self.gamma_bins
    }

    /// Snapshot of the collected tables. Later appends are not reflected in
    /// the returned value.
    pub fn get_result(&self) -> Dataset {
        let mut nuclide = NuclideTable::default();
        nuclide.reserve(self.nuclides.len());
        for r in self.nuclides.records() {
            nuclide.push(NuclideRow {
                zai: r.zai,
                element: r.id.element.clone(),
                mass_number: r.id.mass_number,
                state: r.id.state,
                half_life: r.half_life as f32,
            });
        }

        let mut gbins = GammaBinTable::default();
        let grid = self.gamma_bins.grid();
        let boundaries = grid.map(|grid| grid.boundaries.as_slice()).unwrap_or_default();
        for (g, &boundary) in boundaries.iter().enumerate() {
            gbins.push(GammaBinRow {
                g: g as u16,
                boundary: boundary as f32,
            });
        }

        Dataset {
            rundata: self.rundata.clone(),
            timestep: self.timestep.clone(),
            nuclide,
            timestep_nuclide: self.timestep_nuclide.clone(),
            gbins,
            timestep_gamma: self.timestep_gamma.clone(),
            gamma_lower_edge: grid.and_then(|grid| grid.lower_edge),
        }
    }
}

fn nuclide_error(key: RunKey, conflict: NuclideConflict) -> CollectError {
    match conflict {
        NuclideConflict::HalfLife {
            nuclide,
            recorded,
            supplied,
        } => CollectError::ReferenceDataConflict {
            key,
            nuclide,
            recorded,
            supplied,
        },
        NuclideConflict::Zai {
            zai,
            recorded,
            supplied,
        } => CollectError::ZaiCollision {
            key,
            zai,
            recorded,
            supplied,
        },
    }
}

// ---------------------------------------------------------------------------
// SharedCollector – one lock held for a whole run's commit
// ---------------------------------------------------------------------------

/// A [`Collector`] that many threads can append to.
///
/// The lock is held for the duration of one append, so rows of different
/// runs never interleave.
#[derive(Debug, Clone, Default)]
pub struct SharedCollector {
    inner: Arc<Mutex<Collector>>,
}

impl SharedCollector {
    pub fn new(collector: Collector) -> Self {
        Self {
            inner: Arc::new(Mutex::new(collector)),
        }
    }

    pub fn append(
        &self,
        run: &ParsedRun,
        material_id: u32,
        case_id: u32,
    ) -> Result<(), CollectError> {
        self.inner.lock().append(run, material_id, case_id)?;
        Ok(())
    }

    pub fn get_result(&self) -> Dataset {
        self.inner.lock().get_result()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// The collector back, if this is the last handle.
    pub fn into_inner(self) -> Option<Collector> {
        Arc::try_unwrap(self.inner).ok().map(Mutex::into_inner)
    }
}
