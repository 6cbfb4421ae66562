use std::sync::Arc;

use arrow::datatypes::{Field, Schema, SchemaRef};
use arrow::error::ArrowError;
use arrow::record_batch::RecordBatch;
use chrono::{DateTime, Utc};
use rusqlite::types::Value as SqlValue;

use super::column::ColumnValue;
use super::registry::GammaGrid;
use crate::error::ExportError;

// ---------------------------------------------------------------------------
// Table – what every column-oriented table can do
// ---------------------------------------------------------------------------

/// A column-oriented table with a fixed schema.
pub trait Table: Default {
    /// Table name in the store, also the stem of its parquet artifact.
    const NAME: &'static str;
    const COLUMNS: &'static [&'static str];

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn schema() -> SchemaRef;

    fn to_record_batch(&self) -> Result<RecordBatch, ArrowError>;

    /// Append the rows of `batch`; columns are matched by name.
    /// Nothing is appended if any column is missing or mistyped.
    fn append_batch(&mut self, batch: &RecordBatch) -> Result<(), ExportError>;

    /// Row `i` as SQL values, in [`Table::COLUMNS`] order.
    fn sql_row(&self, i: usize) -> Vec<SqlValue>;

    /// Append a row selected with [`Table::COLUMNS`].
    fn push_sql_row(&mut self, row: &rusqlite::Row<'_>) -> Result<(), ExportError>;
}

/// Declares a table as one `Vec` per column, a matching row type, and its
/// [`Table`] implementation.
macro_rules! columnar_table {
    (
        $(#[$meta:meta])*
        $table:ident / $row:ident = $name:literal {
            $( $col:ident : $ty:ty ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Default, PartialEq)]
        pub struct $table {
            $( pub $col: Vec<$ty>, )+
        }

        #[derive(Debug, Clone, PartialEq)]
        pub struct $row {
            $( pub $col: $ty, )+
        }

        impl $table {
            pub fn push(&mut self, row: $row) {
                $( self.$col.push(row.$col); )+
            }

            pub fn reserve(&mut self, additional: usize) {
                $( self.$col.reserve(additional); )+
            }

            pub fn row(&self, i: usize) -> Option<$row> {
                if i >= Table::len(self) {
                    return None;
                }
                Some($row { $( $col: self.$col[i].clone(), )+ })
            }

            pub fn rows(&self) -> impl Iterator<Item = $row> + '_ {
                (0..Table::len(self)).filter_map(move |i| self.row(i))
            }
        }

        impl Table for $table {
            const NAME: &'static str = $name;
            const COLUMNS: &'static [&'static str] = &[ $( stringify!($col) ),+ ];

            fn len(&self) -> usize {
                [ $( self.$col.len() ),+ ][0]
            }

            fn schema() -> SchemaRef {
                Arc::new(Schema::new(vec![
                    $( Field::new(
                        stringify!($col),
                        <$ty as ColumnValue>::data_type(),
                        <$ty as ColumnValue>::nullable(),
                    ), )+
                ]))
            }

            fn to_record_batch(&self) -> Result<RecordBatch, ArrowError> {
                RecordBatch::try_new(
                    Self::schema(),
                    vec![ $( <$ty as ColumnValue>::to_array(&self.$col), )+ ],
                )
            }

            fn append_batch(&mut self, batch: &RecordBatch) -> Result<(), ExportError> {
                $(
                    let column = batch.column_by_name(stringify!($col)).ok_or_else(|| {
                        ExportError::schema($name, concat!("missing column ", stringify!($col)))
                    })?;
                    let $col = <$ty as ColumnValue>::from_array(column.as_ref()).ok_or_else(|| {
                        ExportError::schema(
                            $name,
                            format!(
                                "column {} is {}, expected {}",
                                stringify!($col),
                                column.data_type(),
                                <$ty as ColumnValue>::data_type(),
                            ),
                        )
                    })?;
                )+
                $( self.$col.extend($col); )+
                Ok(())
            }

            fn sql_row(&self, i: usize) -> Vec<SqlValue> {
                vec![ $( ColumnValue::to_sql(&self.$col[i]), )+ ]
            }

            fn push_sql_row(&mut self, row: &rusqlite::Row<'_>) -> Result<(), ExportError> {
                $(
                    let value = row.get_ref(stringify!($col))?;
                    let $col = <$ty as ColumnValue>::from_sql(value).ok_or_else(|| {
                        ExportError::schema(
                            $name,
                            format!("column {} holds {:?}", stringify!($col), value.data_type()),
                        )
                    })?;
                )+
                $( self.$col.push($col); )+
                Ok(())
            }
        }
    };
}

// ---------------------------------------------------------------------------
// The tables
// ---------------------------------------------------------------------------

columnar_table! {
    /// One row per run.
    RunDataTable / RunDataRow = "rundata" {
        material_id: u32,
        case_id: u32,
        timestamp: DateTime<Utc>,
        run_name: String,
        flux_name: String,
        dose_rate_type: String,
        dose_rate_distance: f32,
    }
}

columnar_table! {
    /// One row per (run, time step).
    TimeStepTable / TimeStepRow = "timestep" {
        material_id: u32,
        case_id: u32,
        time_step_number: u32,
        elapsed_time: f32,
        irradiation_time: f32,
        cooling_time: f32,
        duration: f32,
        flux: f32,
        atoms: f32,
        activity: f32,
        alpha_activity: f32,
        beta_activity: f32,
        gamma_activity: f32,
        mass: f32,
        heat: f32,
        alpha_heat: Option<f32>,
        beta_heat: f32,
        gamma_heat: f32,
        ingestion: f32,
        inhalation: f32,
        dose: f32,
    }
}

columnar_table! {
    /// Reference table of every nuclide seen in the session.
    NuclideTable / NuclideRow = "nuclide" {
        zai: u32,
        element: String,
        mass_number: u16,
        state: u8,
        half_life: f32,
    }
}

columnar_table! {
    /// One row per (run, time step, nuclide).
    TimeStepNuclideTable / TimeStepNuclideRow = "timestep_nuclide" {
        material_id: u32,
        case_id: u32,
        time_step_number: u32,
        zai: u32,
        atoms: f32,
        grams: f32,
        activity: f32,
        alpha_activity: f32,
        beta_activity: f32,
        gamma_activity: f32,
        heat: f32,
        alpha_heat: f32,
        beta_heat: f32,
        gamma_heat: f32,
        dose: f32,
        ingestion: f32,
        inhalation: f32,
    }
}

columnar_table! {
    /// Upper boundaries of the shared gamma grid, MeV.
    GammaBinTable / GammaBinRow = "gbins" {
        g: u16,
        boundary: f32,
    }
}

columnar_table! {
    /// One row per (run, time step, gamma bin).
    TimeStepGammaTable / TimeStepGammaRow = "timestep_gamma" {
        material_id: u32,
        case_id: u32,
        time_step_number: u32,
        g: u16,
        rate: f32,
    }
}

columnar_table! {
    /// Timing of the time steps, shared by all runs of a session.
    TimeStepTimesTable / TimeStepTimesRow = "time_step_times" {
        time_step_number: u32,
        elapsed_time: f32,
        irradiation_time: f32,
        cooling_time: f32,
        duration: f32,
        with_flux: bool,
    }
}

// ---------------------------------------------------------------------------
// Dataset – the finished tables of a collection session
// ---------------------------------------------------------------------------

/// Immutable snapshot of everything a collector has accumulated.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    pub rundata: RunDataTable,
    pub timestep: TimeStepTable,
    pub nuclide: NuclideTable,
    pub timestep_nuclide: TimeStepNuclideTable,
    pub gbins: GammaBinTable,
    pub timestep_gamma: TimeStepGammaTable,
    /// Lower edge of the first gamma bin, when the source reported one.
    pub gamma_lower_edge: Option<f64>,
}

impl Dataset {
    pub fn is_empty(&self) -> bool {
        self.rundata.is_empty()
    }

    /// Time step timing of the first collected run.
    pub fn timestep_times(&self) -> TimeStepTimesTable {
        let mut times = TimeStepTimesTable::default();
        let Some(first) = self.rundata.row(0) else {
            return times;
        };
        let mut rows: Vec<TimeStepRow> = self
            .timestep
            .rows()
            .filter(|r| r.material_id == first.material_id && r.case_id == first.case_id)
            .collect();
        rows.sort_by_key(|r| r.time_step_number);
        times.reserve(rows.len());
        for r in rows {
            times.push(TimeStepTimesRow {
                time_step_number: r.time_step_number,
                elapsed_time: r.elapsed_time,
                irradiation_time: r.irradiation_time,
                cooling_time: r.cooling_time,
                duration: r.duration,
                with_flux: r.flux > 0.0,
            });
        }
        times
    }

    /// Gamma emission converted from MeV/s to photon/s: every rate divided
    /// by the mid energy of its bin. Rows of a bin without a positive mid
    /// energy have no photon rate and are left out.
    pub fn photon_rates(&self) -> TimeStepGammaTable {
        let grid = GammaGrid {
            lower_edge: self.gamma_lower_edge,
            boundaries: self.gbins.boundary.iter().map(|&b| f64::from(b)).collect(),
        };
        let mut out = TimeStepGammaTable::default();
        out.reserve(self.timestep_gamma.len());
        for mut row in self.timestep_gamma.rows() {
            let Some(mid) = grid.mid(usize::from(row.g)).filter(|&m| m > 0.0) else {
                continue;
            };
            row.rate = (f64::from(row.rate) / mid) as f32;
            out.push(row);
        }
        out
    }

    /// Row count per table name, in export order.
    pub fn row_counts(&self) -> [(&'static str, usize); 6] {
        [
            (RunDataTable::NAME, self.rundata.len()),
            (TimeStepTable::NAME, self.timestep.len()),
            (NuclideTable::NAME, self.nuclide.len()),
            (GammaBinTable::NAME, self.gbins.len()),
            (TimeStepNuclideTable::NAME, self.timestep_nuclide.len()),
            (TimeStepGammaTable::NAME, self.timestep_gamma.len()),
        ]
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn gamma_row(case_id: u32, g: u16, rate: f32) -> TimeStepGammaRow {
        TimeStepGammaRow {
            material_id: 1,
            case_id,
            time_step_number: 1,
            g,
            rate,
        }
    }

    #[test]
    fn rows_are_views_across_columns() {
        let mut t = TimeStepGammaTable::default();
        t.push(gamma_row(54, 0, 10.0));
        t.push(gamma_row(54, 1, 20.0));
        assert_eq!(t.len(), 2);
        assert_eq!(t.row(1), Some(gamma_row(54, 1, 20.0)));
        assert_eq!(t.row(2), None);
        assert_eq!(t.rows().map(|r| r.rate).collect::<Vec<_>>(), [10.0, 20.0]);
    }

    #[test]
    fn schema_follows_declaration_order() {
        let schema = TimeStepTable::schema();
        let names: Vec<&str> = schema.fields().iter().map(|f| f.name().as_str()).collect();
        assert_eq!(names, TimeStepTable::COLUMNS);
        assert!(schema.field_with_name("alpha_heat").unwrap().is_nullable());
        assert!(!schema.field_with_name("heat").unwrap().is_nullable());
    }

    #[test]
    fn record_batch_round_trip() {
        let mut t = RunDataTable::default();
        t.push(RunDataRow {
            material_id: 2,
            case_id: 1,
            timestamp: Utc.with_ymd_and_hms(2022, 5, 18, 1, 25, 52).unwrap(),
            run_name: "run".into(),
            flux_name: "flux".into(),
            dose_rate_type: "Point source".into(),
            dose_rate_distance: 1.0,
        });
        let batch = t.to_record_batch().unwrap();
        let mut back = RunDataTable::default();
        back.append_batch(&batch).unwrap();
        assert_eq!(back, t);
    }

    #[test]
    fn append_batch_is_all_or_nothing() {
        let mut gamma = TimeStepGammaTable::default();
        gamma.push(gamma_row(1, 0, 1.0));
        let batch = gamma.to_record_batch().unwrap();

        let mut bins = GammaBinTable::default();
        let err = bins.append_batch(&batch).unwrap_err();
        assert!(err.to_string().contains("boundary"), "{err}");
        assert!(bins.is_empty());
    }

    #[test]
    fn photon_rates_divide_by_bin_mid() {
        let mut ds = Dataset {
            gamma_lower_edge: Some(0.0),
            ..Dataset::default()
        };
        for (g, b) in [(0u16, 1.0f32), (1, 3.0)] {
            ds.gbins.push(GammaBinRow { g, boundary: b });
        }
        ds.timestep_gamma.push(gamma_row(1, 0, 10.0));
        ds.timestep_gamma.push(gamma_row(1, 1, 20.0));
        let photons = ds.photon_rates();
        assert_eq!(photons.rate, [20.0, 10.0]);
        // the stored table keeps raw rates
        assert_eq!(ds.timestep_gamma.rate, [10.0, 20.0]);
    }

    #[test]
    fn photon_rates_skip_bins_without_mid_energy() {
        let mut ds = Dataset {
            gamma_lower_edge: Some(-1.0),
            ..Dataset::default()
        };
        for (g, b) in [(0u16, 1.0f32), (1, 3.0)] {
            ds.gbins.push(GammaBinRow { g, boundary: b });
        }
        ds.timestep_gamma.push(gamma_row(1, 0, 10.0));
        ds.timestep_gamma.push(gamma_row(1, 1, 20.0));
        ds.timestep_gamma.push(gamma_row(1, 7, 30.0));
        let photons = ds.photon_rates();
        assert_eq!(photons.g, [1]);
        assert_eq!(photons.rate, [10.0]);
    }
}
