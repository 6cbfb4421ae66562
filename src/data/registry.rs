//! Reference data shared by all runs of a collection session.
//!
//! Both registries are arenas: table rows refer to entries by a dense integer
//! handle and never hold the records themselves. Resolution is split into a
//! read-only staging step and a commit, so a run that fails validation part
//! way through leaves the registry untouched.

use std::collections::HashMap;

use super::model::{GammaSpectrum, NuclideId};

// ---------------------------------------------------------------------------
// Tolerance
// ---------------------------------------------------------------------------

/// `|a - b| <= atol + rtol * max(|a|, |b|)`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tolerance {
    pub rtol: f64,
    pub atol: f64,
}

impl Tolerance {
    pub const fn new(rtol: f64, atol: f64) -> Self {
        Self { rtol, atol }
    }

    pub fn close(&self, a: f64, b: f64) -> bool {
        a == b || (a - b).abs() <= self.atol + self.rtol * a.abs().max(b.abs())
    }
}

// ---------------------------------------------------------------------------
// Nuclide registry
// ---------------------------------------------------------------------------

/// Dense index into the [`NuclideRegistry`], allocated in first-seen order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NuclideHandle(u32);

impl NuclideHandle {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NuclideRecord {
    pub id: NuclideId,
    pub zai: u32,
    pub half_life: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NuclideConflict {
    HalfLife {
        nuclide: NuclideId,
        recorded: f64,
        supplied: f64,
    },
    Zai {
        zai: u32,
        recorded: NuclideId,
        supplied: NuclideId,
    },
}

#[derive(Debug, Clone)]
pub struct NuclideRegistry {
    tolerance: Tolerance,
    records: Vec<NuclideRecord>,
    by_id: HashMap<NuclideId, NuclideHandle>,
    by_zai: HashMap<u32, NuclideHandle>,
}

impl NuclideRegistry {
    pub fn new(tolerance: Tolerance) -> Self {
        Self {
            tolerance,
            records: Vec::new(),
            by_id: HashMap::new(),
            by_zai: HashMap::new(),
        }
    }

    /// Resolve and immediately commit a single nuclide.
    pub fn resolve(
        &mut self,
        id: &NuclideId,
        zai: u32,
        half_life: f64,
    ) -> Result<NuclideHandle, NuclideConflict> {
        let mut stage = self.stage();
        let handle = stage.resolve(id, zai, half_life)?;
        let added = stage.finish();
        self.commit(added);
        Ok(handle)
    }

    /// Start resolving a batch without touching the registry.
    pub fn stage(&self) -> NuclideStage<'_> {
        NuclideStage {
            registry: self,
            added: Vec::new(),
            by_id: HashMap::new(),
            by_zai: HashMap::new(),
        }
    }

    /// Append records produced by [`NuclideStage::finish`] on this registry.
    ///
    /// The handles handed out by the stage are only valid if no other
    /// commit happened in between.
    pub fn commit(&mut self, added: Vec<NuclideRecord>) {
        for record in added {
            let handle = NuclideHandle(self.records.len() as u32);
            self.by_id.insert(record.id.clone(), handle);
            self.by_zai.insert(record.zai, handle);
            self.records.push(record);
        }
    }

    pub fn get(&self, handle: NuclideHandle) -> &NuclideRecord {
        &self.records[handle.index()]
    }

    pub fn lookup(&self, id: &NuclideId) -> Option<NuclideHandle> {
        self.by_id.get(id).copied()
    }

    pub fn records(&self) -> &[NuclideRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Pending resolutions against a borrowed [`NuclideRegistry`].
pub struct NuclideStage<'r> {
    registry: &'r NuclideRegistry,
    added: Vec<NuclideRecord>,
    by_id: HashMap<NuclideId, NuclideHandle>,
    by_zai: HashMap<u32, NuclideHandle>,
}

impl NuclideStage<'_> {
    pub fn resolve(
        &mut self,
        id: &NuclideId,
        zai: u32,
        half_life: f64,
    ) -> Result<NuclideHandle, NuclideConflict> {
        if let Some(handle) = self.lookup(id) {
            let recorded = self.record(handle);
            if zai != 0 && zai != recorded.zai {
                return Err(NuclideConflict::Zai {
                    zai,
                    recorded: recorded.id.clone(),
                    supplied: id.clone(),
                });
            }
            if !self.registry.tolerance.close(recorded.half_life, half_life) {
                return Err(NuclideConflict::HalfLife {
                    nuclide: id.clone(),
                    recorded: recorded.half_life,
                    supplied: half_life,
                });
            }
            return Ok(handle);
        }

        let claimed = self
            .registry
            .by_zai
            .get(&zai)
            .or_else(|| self.by_zai.get(&zai))
            .copied();
        if let Some(other) = claimed {
            return Err(NuclideConflict::Zai {
                zai,
                recorded: self.record(other).id.clone(),
                supplied: id.clone(),
            });
        }

        let handle = NuclideHandle((self.registry.records.len() + self.added.len()) as u32);
        self.by_id.insert(id.clone(), handle);
        self.by_zai.insert(zai, handle);
        self.added.push(NuclideRecord {
            id: id.clone(),
            zai,
            half_life,
        });
        Ok(handle)
    }

    /// zai of a handle returned by this stage.
    pub fn zai(&self, handle: NuclideHandle) -> u32 {
        self.record(handle).zai
    }

    pub fn finish(self) -> Vec<NuclideRecord> {
        self.added
    }

    fn lookup(&self, id: &NuclideId) -> Option<NuclideHandle> {
        self.registry
            .by_id
            .get(id)
            .or_else(|| self.by_id.get(id))
            .copied()
    }

    fn record(&self, handle: NuclideHandle) -> &NuclideRecord {
        let committed = self.registry.records.len();
        match handle.index().checked_sub(committed) {
            Some(i) => &self.added[i],
            None => &self.registry.records[handle.index()],
        }
    }
}

// ---------------------------------------------------------------------------
// Gamma-bin registry
// ---------------------------------------------------------------------------

/// The ordered upper-boundary grid shared by all spectra of a session.
#[derive(Debug, Clone, PartialEq)]
pub struct GammaGrid {
    pub lower_edge: Option<f64>,
    pub boundaries: Vec<f64>,
}

impl GammaGrid {
    pub fn of(spectrum: &GammaSpectrum) -> Self {
        Self {
            lower_edge: spectrum.lower_edge,
            boundaries: spectrum.boundaries.clone(),
        }
    }

    /// Describe the first disagreement with `spectrum`, if any.
    pub fn mismatch(&self, spectrum: &GammaSpectrum, tolerance: Tolerance) -> Option<String> {
        if self.boundaries.len() != spectrum.boundaries.len() {
            return Some(format!(
                "{} bins registered, {} presented",
                self.boundaries.len(),
                spectrum.boundaries.len()
            ));
        }
        match (self.lower_edge, spectrum.lower_edge) {
            (Some(a), Some(b)) if !tolerance.close(a, b) => {
                return Some(format!("lower edge {a} registered, {b} presented"));
            }
            (Some(_), None) | (None, Some(_)) => {
                return Some("lower edge presence differs".to_string());
            }
            _ => {}
        }
        self.boundaries
            .iter()
            .zip(&spectrum.boundaries)
            .enumerate()
            .find(|(_, (a, b))| !tolerance.close(**a, **b))
            .map(|(g, (a, b))| format!("bin {g}: boundary {a} registered, {b} presented"))
    }

    /// Mid energy of bin `g`; the first bin starts at the lower edge, or 0.
    pub fn mid(&self, g: usize) -> Option<f64> {
        let upper = *self.boundaries.get(g)?;
        let lower = match g {
            0 => self.lower_edge.unwrap_or(0.0),
            _ => self.boundaries[g - 1],
        };
        Some(0.5 * (lower + upper))
    }
}

#[derive(Debug, Clone)]
pub struct GammaBinRegistry {
    tolerance: Tolerance,
    grid: Option<GammaGrid>,
}

impl GammaBinRegistry {
    /// Largest number of bins a bin index can address.
    pub const MAX_BINS: usize = u16::MAX as usize + 1;

    pub fn new(tolerance: Tolerance) -> Self {
        Self {
            tolerance,
            grid: None,
        }
    }

    pub fn tolerance(&self) -> Tolerance {
        self.tolerance
    }

    pub fn grid(&self) -> Option<&GammaGrid> {
        self.grid.as_ref()
    }

    /// Check `spectrum` against the registered grid, or against `pending`
    /// when nothing is registered yet. Returns the grid the spectrum defines
    /// if it is the first one seen.
    pub fn check(
        &self,
        spectrum: &GammaSpectrum,
        pending: Option<&GammaGrid>,
    ) -> Result<Option<GammaGrid>, String> {
        if spectrum.boundaries.len() > Self::MAX_BINS {
            return Err(format!(
                "{} bins exceed the limit of {}",
                spectrum.boundaries.len(),
                Self::MAX_BINS
            ));
        }
        match self.grid.as_ref().or(pending) {
            Some(grid) => match grid.mismatch(spectrum, self.tolerance) {
                Some(detail) => Err(detail),
                None => Ok(None),
            },
            None => Ok(Some(GammaGrid::of(spectrum))),
        }
    }

    /// Register the canonical grid. Only the first call has an effect.
    pub fn adopt(&mut self, grid: GammaGrid) {
        if self.grid.is_none() {
            self.grid = Some(grid);
        }
    }

    /// Index of the registered bin whose upper boundary is `boundary`.
    pub fn resolve(&self, boundary: f64) -> Option<u16> {
        let grid = self.grid.as_ref()?;
        let i = grid.boundaries.partition_point(|&b| b < boundary);
        [i.checked_sub(1), Some(i)]
            .into_iter()
            .flatten()
            .find(|&g| {
                grid.boundaries
                    .get(g)
                    .is_some_and(|&b| self.tolerance.close(b, boundary))
            })
            .map(|g| g as u16)
    }

    pub fn len(&self) -> usize {
        self.grid.as_ref().map_or(0, |g| g.boundaries.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOL: Tolerance = Tolerance::new(1e-6, 0.0);

    fn spectrum(boundaries: &[f64]) -> GammaSpectrum {
        GammaSpectrum {
            lower_edge: None,
            boundaries: boundaries.to_vec(),
            rates: vec![0.0; boundaries.len()],
        }
    }

    #[test]
    fn resolving_same_nuclide_is_idempotent() {
        let mut reg = NuclideRegistry::new(TOL);
        let co60 = NuclideId::new("Co", 60, 0);
        let first = reg.resolve(&co60, 270_600, 1.66e8).unwrap();
        for _ in 0..10 {
            assert_eq!(reg.resolve(&co60, 270_600, 1.66e8).unwrap(), first);
        }
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn handles_follow_first_seen_order() {
        let mut reg = NuclideRegistry::new(TOL);
        let a = reg.resolve(&NuclideId::new("U", 238, 0), 922_380, 1.4e17).unwrap();
        let b = reg.resolve(&NuclideId::new("H", 1, 0), 10_010, 0.0).unwrap();
        assert_eq!((a.index(), b.index()), (0, 1));
        assert_eq!(reg.get(b).zai, 10_010);
    }

    #[test]
    fn half_life_drift_is_a_conflict() {
        let mut reg = NuclideRegistry::new(TOL);
        let co60 = NuclideId::new("Co", 60, 0);
        reg.resolve(&co60, 270_600, 1.66e8).unwrap();
        // within tolerance
        reg.resolve(&co60, 270_600, 1.66e8 * (1.0 + 1e-9)).unwrap();
        let err = reg.resolve(&co60, 270_600, 1.70e8).unwrap_err();
        assert_eq!(
            err,
            NuclideConflict::HalfLife {
                nuclide: co60,
                recorded: 1.66e8,
                supplied: 1.70e8
            }
        );
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn zai_claimed_twice_is_a_conflict() {
        let mut reg = NuclideRegistry::new(TOL);
        reg.resolve(&NuclideId::new("Co", 60, 0), 270_600, 1.66e8).unwrap();
        let err = reg
            .resolve(&NuclideId::new("Ni", 60, 0), 270_600, 0.0)
            .unwrap_err();
        assert_eq!(
            err,
            NuclideConflict::Zai {
                zai: 270_600,
                recorded: NuclideId::new("Co", 60, 0),
                supplied: NuclideId::new("Ni", 60, 0),
            }
        );
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn known_nuclide_with_another_zai_is_a_conflict() {
        let mut reg = NuclideRegistry::new(TOL);
        let co60 = NuclideId::new("Co", 60, 0);
        reg.resolve(&co60, 270_600, 1.66e8).unwrap();
        let err = reg.resolve(&co60, 270_601, 1.66e8).unwrap_err();
        assert!(matches!(err, NuclideConflict::Zai { zai: 270_601, .. }));
        // zero means "not supplied"
        reg.resolve(&co60, 0, 1.66e8).unwrap();
        assert_eq!(reg.records()[0].zai, 270_600);
    }

    #[test]
    fn staged_resolutions_are_dropped_without_commit() {
        let reg = NuclideRegistry::new(TOL);
        let mut stage = reg.stage();
        let h = stage.resolve(&NuclideId::new("Fe", 55, 0), 260_550, 8.6e7).unwrap();
        assert_eq!(stage.zai(h), 260_550);
        // conflicts are detected within one stage as well
        assert!(stage.resolve(&NuclideId::new("Fe", 55, 0), 260_550, 1.0).is_err());
        drop(stage);
        assert!(reg.is_empty());
    }

    #[test]
    fn staged_handles_survive_commit() {
        let mut reg = NuclideRegistry::new(TOL);
        reg.resolve(&NuclideId::new("H", 3, 0), 10_030, 3.9e8).unwrap();
        let mut stage = reg.stage();
        let h = stage.resolve(&NuclideId::new("C", 14, 0), 60_140, 1.8e11).unwrap();
        let added = stage.finish();
        reg.commit(added);
        assert_eq!(reg.get(h).id, NuclideId::new("C", 14, 0));
        assert_eq!(reg.lookup(&NuclideId::new("C", 14, 0)), Some(h));
    }

    #[test]
    fn first_grid_defines_the_registry() {
        let mut reg = GammaBinRegistry::new(TOL);
        let s = spectrum(&[1.0, 2.0, 3.0]);
        let defined = reg.check(&s, None).unwrap().unwrap();
        reg.adopt(defined);
        assert_eq!(reg.len(), 3);
        assert_eq!(reg.check(&s, None).unwrap(), None);
        assert_eq!(reg.resolve(2.0), Some(1));
        assert_eq!(reg.resolve(3.0 + 1e-9), Some(2));
        assert_eq!(reg.resolve(2.5), None);
    }

    #[test]
    fn different_grid_is_rejected() {
        let mut reg = GammaBinRegistry::new(TOL);
        reg.adopt(GammaGrid::of(&spectrum(&[1.0, 2.0, 3.0])));
        let detail = reg.check(&spectrum(&[1.0, 2.5, 3.0]), None).unwrap_err();
        assert!(detail.contains("bin 1"), "{detail}");
        let detail = reg.check(&spectrum(&[1.0, 2.0]), None).unwrap_err();
        assert!(detail.contains("3 bins registered"), "{detail}");
    }

    #[test]
    fn different_lower_edge_is_rejected() {
        let mut reg = GammaBinRegistry::new(TOL);
        let mut first = spectrum(&[1.0, 2.0, 3.0]);
        first.lower_edge = Some(0.0);
        reg.adopt(GammaGrid::of(&first));

        let mut shifted = first.clone();
        shifted.lower_edge = Some(0.5);
        let detail = reg.check(&shifted, None).unwrap_err();
        assert_eq!(detail, "lower edge 0 registered, 0.5 presented");

        let bare = spectrum(&[1.0, 2.0, 3.0]);
        let detail = reg.check(&bare, None).unwrap_err();
        assert_eq!(detail, "lower edge presence differs");
        assert!(reg.check(&first, None).unwrap().is_none());
    }

    #[test]
    fn lower_edge_presence_is_checked_both_ways() {
        let reg = GammaBinRegistry::new(TOL);
        let pending = GammaGrid::of(&spectrum(&[1.0, 2.0]));
        let mut edged = spectrum(&[1.0, 2.0]);
        edged.lower_edge = Some(0.0);
        assert_eq!(
            reg.check(&edged, Some(&pending)).unwrap_err(),
            "lower edge presence differs"
        );
    }

    #[test]
    fn pending_grid_is_used_before_adoption() {
        let reg = GammaBinRegistry::new(TOL);
        let pending = GammaGrid::of(&spectrum(&[1.0, 2.0]));
        assert!(reg.check(&spectrum(&[1.0, 2.0]), Some(&pending)).unwrap().is_none());
        assert!(reg.check(&spectrum(&[1.0, 4.0]), Some(&pending)).is_err());
    }

    #[test]
    fn mid_energies() {
        let grid = GammaGrid {
            lower_edge: Some(0.5),
            boundaries: vec![1.0, 2.0],
        };
        assert_eq!(grid.mid(0), Some(0.75));
        assert_eq!(grid.mid(1), Some(1.5));
        assert_eq!(grid.mid(2), None);
    }
}
