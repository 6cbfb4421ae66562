use std::path::Path;

use log::{debug, info};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};

use crate::config::CollectorConfig;
use crate::data::registry::Tolerance;
use crate::data::tables::{
    Dataset, GammaBinTable, NuclideTable, RunDataTable, Table, TimeStepGammaTable,
    TimeStepNuclideTable, TimeStepTable, TimeStepTimesTable,
};
use crate::error::ExportError;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS rundata (
    material_id        INTEGER NOT NULL,
    case_id            INTEGER NOT NULL,
    timestamp          TEXT    NOT NULL,
    run_name           TEXT    NOT NULL,
    flux_name          TEXT    NOT NULL,
    dose_rate_type     TEXT    NOT NULL,
    dose_rate_distance REAL    NOT NULL,
    PRIMARY KEY (material_id, case_id)
);

CREATE TABLE IF NOT EXISTS timestep (
    material_id      INTEGER NOT NULL,
    case_id          INTEGER NOT NULL,
    time_step_number INTEGER NOT NULL,
    elapsed_time     REAL NOT NULL,
    irradiation_time REAL NOT NULL,
    cooling_time     REAL NOT NULL,
    duration         REAL NOT NULL,
    flux             REAL NOT NULL,
    atoms            REAL NOT NULL,
    activity         REAL NOT NULL,
    alpha_activity   REAL NOT NULL,
    beta_activity    REAL NOT NULL,
    gamma_activity   REAL NOT NULL,
    mass             REAL NOT NULL,
    heat             REAL NOT NULL,
    alpha_heat       REAL,
    beta_heat        REAL NOT NULL,
    gamma_heat       REAL NOT NULL,
    ingestion        REAL NOT NULL,
    inhalation       REAL NOT NULL,
    dose             REAL NOT NULL,
    PRIMARY KEY (material_id, case_id, time_step_number),
    FOREIGN KEY (material_id, case_id) REFERENCES rundata (material_id, case_id)
);

CREATE TABLE IF NOT EXISTS nuclide (
    zai         INTEGER PRIMARY KEY,
    element     TEXT    NOT NULL,
    mass_number INTEGER NOT NULL,
    state       INTEGER NOT NULL,
    half_life   REAL    NOT NULL,
    UNIQUE (element, mass_number, state)
);

CREATE TABLE IF NOT EXISTS gbins (
    g        INTEGER PRIMARY KEY,
    boundary REAL NOT NULL
);

CREATE TABLE IF NOT EXISTS timestep_nuclide (
    material_id      INTEGER NOT NULL,
    case_id          INTEGER NOT NULL,
    time_step_number INTEGER NOT NULL,
    zai              INTEGER NOT NULL REFERENCES nuclide (zai),
    atoms            REAL NOT NULL,
    grams            REAL NOT NULL,
    activity         REAL NOT NULL,
    alpha_activity   REAL NOT NULL,
    beta_activity    REAL NOT NULL,
    gamma_activity   REAL NOT NULL,
    heat             REAL NOT NULL,
    alpha_heat       REAL NOT NULL,
    beta_heat        REAL NOT NULL,
    gamma_heat       REAL NOT NULL,
    dose             REAL NOT NULL,
    ingestion        REAL NOT NULL,
    inhalation       REAL NOT NULL,
    PRIMARY KEY (material_id, case_id, time_step_number, zai),
    FOREIGN KEY (material_id, case_id, time_step_number)
        REFERENCES timestep (material_id, case_id, time_step_number)
);

CREATE TABLE IF NOT EXISTS timestep_gamma (
    material_id      INTEGER NOT NULL,
    case_id          INTEGER NOT NULL,
    time_step_number INTEGER NOT NULL,
    g                INTEGER NOT NULL REFERENCES gbins (g),
    rate             REAL NOT NULL,
    PRIMARY KEY (material_id, case_id, time_step_number, g),
    FOREIGN KEY (material_id, case_id, time_step_number)
        REFERENCES timestep (material_id, case_id, time_step_number)
);

CREATE TABLE IF NOT EXISTS time_step_times (
    time_step_number INTEGER PRIMARY KEY,
    elapsed_time     REAL    NOT NULL,
    irradiation_time REAL    NOT NULL,
    cooling_time     REAL    NOT NULL,
    duration         REAL    NOT NULL,
    with_flux        INTEGER NOT NULL
);
";

/// Children first, so foreign keys never dangle while dropping.
const DROP_ORDER: [&str; 7] = [
    TimeStepGammaTable::NAME,
    TimeStepNuclideTable::NAME,
    TimeStepTimesTable::NAME,
    TimeStepTable::NAME,
    GammaBinTable::NAME,
    NuclideTable::NAME,
    RunDataTable::NAME,
];

/// The collected tables in an embedded SQLite database.
pub struct SqliteStore {
    conn: Connection,
    half_life: Tolerance,
    boundary: Tolerance,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self, ExportError> {
        Self::from_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, ExportError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    pub fn from_connection(conn: Connection) -> Result<Self, ExportError> {
        conn.pragma_update(None, "foreign_keys", true)?;
        let tolerances = CollectorConfig::default();
        Ok(Self {
            conn,
            half_life: tolerances.half_life_tolerance(),
            boundary: tolerances.boundary_tolerance(),
        })
    }

    /// Compare reference data against stored rows with these tolerances.
    pub fn with_tolerances(mut self, config: &CollectorConfig) -> Self {
        self.half_life = config.half_life_tolerance();
        self.boundary = config.boundary_tolerance();
        self
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn has_schema(&self) -> Result<bool, ExportError> {
        let mut stmt = self
            .conn
            .prepare("SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1")?;
        for name in DROP_ORDER {
            if stmt.query_row([name], |_| Ok(())).optional()?.is_none() {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Create every table that does not exist yet.
    pub fn create_schema(&self) -> Result<(), ExportError> {
        self.conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    pub fn drop_schema(&self) -> Result<(), ExportError> {
        for name in DROP_ORDER {
            self.conn.execute(&format!("DROP TABLE IF EXISTS {name}"), [])?;
        }
        Ok(())
    }

    /// Insert every row of `dataset` in one transaction.
    ///
    /// Reference tables (`nuclide`, `gbins`, `time_step_times`) are merged:
    /// rows already present are kept. A stored nuclide or gamma grid that
    /// disagrees with the dataset fails the save with [`ExportError::Schema`].
    /// Run-keyed rows must be new, so saving a run that is already stored
    /// fails as well. Nothing is written on failure.
    pub fn save(&mut self, dataset: &Dataset) -> Result<(), ExportError> {
        self.create_schema()?;
        let tx = self.conn.transaction()?;
        check_nuclides(&tx, &dataset.nuclide, self.half_life)?;
        check_gbins(&tx, &dataset.gbins, self.boundary)?;
        insert(&tx, &dataset.rundata, false)?;
        insert(&tx, &dataset.timestep, false)?;
        insert(&tx, &dataset.nuclide, true)?;
        insert(&tx, &dataset.gbins, true)?;
        insert(&tx, &dataset.timestep_times(), true)?;
        insert(&tx, &dataset.timestep_nuclide, false)?;
        insert(&tx, &dataset.timestep_gamma, false)?;
        tx.commit()?;
        info!("saved {} runs to the embedded store", dataset.rundata.len());
        Ok(())
    }

    /// Every stored table, rows in storage order.
    pub fn load_dataset(&self) -> Result<Dataset, ExportError> {
        Ok(Dataset {
            rundata: self.select("", [])?,
            timestep: self.select("", [])?,
            nuclide: self.select("", [])?,
            timestep_nuclide: self.select("", [])?,
            gbins: self.select("", [])?,
            timestep_gamma: self.select("", [])?,
            gamma_lower_edge: None,
        })
    }

    /// Gamma rows of every run, restricted to one time step when given.
    pub fn load_gamma(&self, time_step_number: Option<u32>) -> Result<TimeStepGammaTable, ExportError> {
        self.select(
            "WHERE ?1 IS NULL OR time_step_number = ?1 \
             ORDER BY material_id, case_id, time_step_number, g",
            params![time_step_number],
        )
    }

    /// `(g, rate)` of one time step, ordered by bin index.
    pub fn gamma_rates(
        &self,
        material_id: u32,
        case_id: u32,
        time_step_number: u32,
    ) -> Result<Vec<(u16, f32)>, ExportError> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT g, rate FROM timestep_gamma \
             WHERE material_id = ?1 AND case_id = ?2 AND time_step_number = ?3 \
             ORDER BY g",
        )?;
        let rows = stmt.query_map(params![material_id, case_id, time_step_number], |row| {
            Ok((row.get::<_, u16>(0)?, row.get::<_, f32>(1)?))
        })?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    fn select<T: Table>(&self, clause: &str, params: impl rusqlite::Params) -> Result<T, ExportError> {
        let sql = format!("SELECT {} FROM {} {clause}", T::COLUMNS.join(", "), T::NAME);
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params)?;
        let mut table = T::default();
        while let Some(row) = rows.next()? {
            table.push_sql_row(row)?;
        }
        Ok(table)
    }
}

/// Stored nuclides sharing a zai or an identity with `nuclides` must be the
/// same nuclide with the same half-life.
fn check_nuclides(
    conn: &Connection,
    nuclides: &NuclideTable,
    tolerance: Tolerance,
) -> Result<(), ExportError> {
    let mut stmt = conn.prepare_cached(
        "SELECT zai, element, mass_number, state, half_life FROM nuclide \
         WHERE zai = ?1 OR (element = ?2 AND mass_number = ?3 AND state = ?4)",
    )?;
    for n in nuclides.rows() {
        let mut rows = stmt.query(params![n.zai, n.element, n.mass_number, n.state])?;
        while let Some(row) = rows.next()? {
            let zai: u32 = row.get(0)?;
            let element: String = row.get(1)?;
            let mass_number: u16 = row.get(2)?;
            let state: u8 = row.get(3)?;
            let half_life: f64 = row.get(4)?;
            if (zai, element.as_str(), mass_number, state)
                != (n.zai, n.element.as_str(), n.mass_number, n.state)
            {
                return Err(ExportError::schema(
                    NuclideTable::NAME,
                    format!(
                        "zai {} stored as {element}{mass_number} state {state} with zai {zai}, \
                         saving {}{} state {}",
                        n.zai, n.element, n.mass_number, n.state
                    ),
                ));
            }
            if !tolerance.close(half_life, f64::from(n.half_life)) {
                return Err(ExportError::schema(
                    NuclideTable::NAME,
                    format!(
                        "zai {zai}: half-life {half_life} stored, {} saving",
                        n.half_life
                    ),
                ));
            }
        }
    }
    Ok(())
}

/// A stored gamma grid must be the grid of `gbins`.
fn check_gbins(
    conn: &Connection,
    gbins: &GammaBinTable,
    tolerance: Tolerance,
) -> Result<(), ExportError> {
    if gbins.is_empty() {
        return Ok(());
    }
    let stored: i64 = conn.query_row("SELECT count(*) FROM gbins", [], |row| row.get(0))?;
    if stored != 0 && stored != gbins.len() as i64 {
        return Err(ExportError::schema(
            GammaBinTable::NAME,
            format!("{stored} bins stored, {} saving", gbins.len()),
        ));
    }
    let mut stmt = conn.prepare_cached("SELECT boundary FROM gbins WHERE g = ?1")?;
    for bin in gbins.rows() {
        let boundary: Option<f64> = stmt.query_row([bin.g], |row| row.get(0)).optional()?;
        match boundary {
            Some(b) if !tolerance.close(b, f64::from(bin.boundary)) => {
                return Err(ExportError::schema(
                    GammaBinTable::NAME,
                    format!("bin {}: boundary {b} stored, {} saving", bin.g, bin.boundary),
                ));
            }
            _ => {}
        }
    }
    Ok(())
}

fn insert<T: Table>(conn: &Connection, table: &T, merge: bool) -> Result<(), ExportError> {
    let placeholders = vec!["?"; T::COLUMNS.len()].join(", ");
    let sql = format!(
        "INSERT {}INTO {} ({}) VALUES ({placeholders})",
        if merge { "OR IGNORE " } else { "" },
        T::NAME,
        T::COLUMNS.join(", "),
    );
    let mut stmt = conn.prepare_cached(&sql)?;
    for i in 0..table.len() {
        stmt.execute(params_from_iter(table.sql_row(i)))?;
    }
    debug!("inserted {} rows into {}", table.len(), T::NAME);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::tables::{GammaBinRow, NuclideRow, TimeStepGammaRow};

    fn gamma_dataset() -> Dataset {
        let mut ds = Dataset::default();
        for (g, boundary) in [1.0f32, 2.0, 3.0].into_iter().enumerate() {
            ds.gbins.push(GammaBinRow {
                g: g as u16,
                boundary,
            });
        }
        ds
    }

    #[test]
    fn schema_is_created_once_and_dropped() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert!(!store.has_schema().unwrap());
        store.create_schema().unwrap();
        store.create_schema().unwrap();
        assert!(store.has_schema().unwrap());
        store.drop_schema().unwrap();
        assert!(!store.has_schema().unwrap());
    }

    #[test]
    fn reference_rows_are_merged() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let mut ds = gamma_dataset();
        ds.nuclide.push(NuclideRow {
            zai: 270_600,
            element: "Co".into(),
            mass_number: 60,
            state: 0,
            half_life: 1.66e8,
        });
        store.save(&ds).unwrap();
        store.save(&ds).unwrap();
        let loaded = store.load_dataset().unwrap();
        assert_eq!(loaded.nuclide, ds.nuclide);
        assert_eq!(loaded.gbins, ds.gbins);
    }

    #[test]
    fn stored_reference_rows_must_agree() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let mut ds = gamma_dataset();
        ds.nuclide.push(NuclideRow {
            zai: 270_600,
            element: "Co".into(),
            mass_number: 60,
            state: 0,
            half_life: 1.66e8,
        });
        store.save(&ds).unwrap();

        let mut drifted = Dataset::default();
        let mut row = ds.nuclide.row(0).unwrap();
        row.half_life = 1.70e8;
        drifted.nuclide.push(row.clone());
        let err = store.save(&drifted).unwrap_err();
        assert!(matches!(err, ExportError::Schema { table: "nuclide", .. }), "{err}");

        let mut renamed = Dataset::default();
        row.half_life = 1.66e8;
        row.zai = 270_601;
        renamed.nuclide.push(row);
        let err = store.save(&renamed).unwrap_err();
        assert!(matches!(err, ExportError::Schema { table: "nuclide", .. }), "{err}");

        let mut shorter = Dataset::default();
        shorter.gbins.push(GammaBinRow {
            g: 0,
            boundary: 1.0,
        });
        let err = store.save(&shorter).unwrap_err();
        assert!(matches!(err, ExportError::Schema { table: "gbins", .. }), "{err}");

        assert_eq!(store.load_dataset().unwrap().nuclide, ds.nuclide);
    }

    #[test]
    fn dangling_bin_reference_is_refused() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let mut ds = Dataset::default();
        ds.timestep_gamma.push(TimeStepGammaRow {
            material_id: 1,
            case_id: 1,
            time_step_number: 1,
            g: 0,
            rate: 1.0,
        });
        assert!(matches!(store.save(&ds), Err(ExportError::Sqlite(_))));
        assert!(store.load_dataset().unwrap().timestep_gamma.is_empty());
    }

    #[test]
    fn missing_tables_fail_to_load() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert!(store.load_dataset().is_err());
    }
}
