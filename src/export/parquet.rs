use std::fs::File;
use std::path::{Path, PathBuf};

use arrow::record_batch::RecordBatch;
use log::{debug, info};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::basic::{Compression as ParquetCompression, ZstdLevel};
use parquet::file::properties::WriterProperties;
use parquet::format::KeyValue;

use crate::config::{Compression, ExportConfig};
use crate::data::tables::{
    Dataset, GammaBinTable, NuclideTable, RunDataTable, Table, TimeStepGammaTable,
    TimeStepNuclideTable, TimeStepTable, TimeStepTimesTable,
};
use crate::error::ExportError;

/// File-level metadata key carrying the lower edge of the first gamma bin.
const LOWER_EDGE_KEY: &str = "gamma_lower_edge";

/// Where the artifact of table `name` lives inside `dir`.
pub fn artifact_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{name}.parquet"))
}

fn temp_path(target: &Path) -> PathBuf {
    target.with_extension("parquet.tmp")
}

// ---------------------------------------------------------------------------
// Writing
// ---------------------------------------------------------------------------

/// Write one parquet file per table into `dir` and return their paths.
///
/// Unless `config.overwrite` is set, an existing artifact fails the export
/// before anything is written. Files are written under temporary names and
/// only renamed into place once every table has been written.
pub fn write_parquets(
    dataset: &Dataset,
    dir: &Path,
    config: &ExportConfig,
) -> Result<Vec<PathBuf>, ExportError> {
    let batches = [
        (RunDataTable::NAME, dataset.rundata.to_record_batch()?),
        (TimeStepTable::NAME, dataset.timestep.to_record_batch()?),
        (NuclideTable::NAME, dataset.nuclide.to_record_batch()?),
        (GammaBinTable::NAME, dataset.gbins.to_record_batch()?),
        (TimeStepNuclideTable::NAME, dataset.timestep_nuclide.to_record_batch()?),
        (TimeStepGammaTable::NAME, dataset.timestep_gamma.to_record_batch()?),
        (TimeStepTimesTable::NAME, dataset.timestep_times().to_record_batch()?),
    ];
    let targets: Vec<PathBuf> = batches
        .iter()
        .map(|(name, _)| artifact_path(dir, name))
        .collect();

    if !config.overwrite {
        if let Some(existing) = targets.iter().find(|p| p.exists()) {
            return Err(ExportError::Exists(existing.clone()));
        }
    }
    std::fs::create_dir_all(dir).map_err(|e| ExportError::io(dir, e))?;

    let mut staged = Vec::with_capacity(targets.len());
    let written = batches
        .iter()
        .zip(&targets)
        .try_for_each(|((name, batch), target)| {
            let tmp = temp_path(target);
            staged.push(tmp.clone());
            let lower_edge = dataset.gamma_lower_edge.filter(|_| *name == GammaBinTable::NAME);
            write_batch(&tmp, batch, writer_properties(config, lower_edge))?;
            debug!("wrote {} rows of {name}", batch.num_rows());
            Ok(())
        });
    if let Err(e) = written {
        remove_all(&staged);
        return Err(e);
    }

    for (tmp, target) in staged.iter().zip(&targets) {
        if let Err(source) = std::fs::rename(tmp, target) {
            remove_all(&staged);
            return Err(ExportError::io(target, source));
        }
    }

    info!("exported {} tables to {}", targets.len(), dir.display());
    Ok(targets)
}

fn writer_properties(config: &ExportConfig, lower_edge: Option<f64>) -> WriterProperties {
    let compression = match config.compression {
        Compression::None => ParquetCompression::UNCOMPRESSED,
        Compression::Snappy => ParquetCompression::SNAPPY,
        Compression::Zstd => ParquetCompression::ZSTD(ZstdLevel::default()),
    };
    WriterProperties::builder()
        .set_compression(compression)
        .set_max_row_group_size(config.row_group_size.max(1))
        .set_key_value_metadata(
            lower_edge.map(|v| vec![KeyValue::new(LOWER_EDGE_KEY.to_string(), v.to_string())]),
        )
        .build()
}

fn write_batch(
    path: &Path,
    batch: &RecordBatch,
    props: WriterProperties,
) -> Result<(), ExportError> {
    let file = File::create(path).map_err(|e| ExportError::io(path, e))?;
    let mut writer = ArrowWriter::try_new(file, batch.schema(), Some(props))?;
    writer.write(batch)?;
    writer.close()?;
    Ok(())
}

fn remove_all(paths: &[PathBuf]) {
    for path in paths {
        // Missing files are fine: some were never created or already renamed.
        let _ = std::fs::remove_file(path);
    }
}

// ---------------------------------------------------------------------------
// Reading
// ---------------------------------------------------------------------------

/// Load a [`Dataset`] back from artifacts written by [`write_parquets`].
pub fn read_parquets(dir: &Path) -> Result<Dataset, ExportError> {
    let gbins = open::<GammaBinTable>(dir)?;
    let gamma_lower_edge = gbins
        .metadata()
        .file_metadata()
        .key_value_metadata()
        .and_then(|kv| kv.iter().find(|e| e.key == LOWER_EDGE_KEY))
        .and_then(|e| e.value.as_deref())
        .map(|v| {
            v.parse::<f64>()
                .map_err(|e| ExportError::schema(GammaBinTable::NAME, format!("{LOWER_EDGE_KEY}: {e}")))
        })
        .transpose()?;

    let dataset = Dataset {
        rundata: read_table(open::<RunDataTable>(dir)?)?,
        timestep: read_table(open::<TimeStepTable>(dir)?)?,
        nuclide: read_table(open::<NuclideTable>(dir)?)?,
        timestep_nuclide: read_table(open::<TimeStepNuclideTable>(dir)?)?,
        gbins: read_table(gbins)?,
        timestep_gamma: read_table(open::<TimeStepGammaTable>(dir)?)?,
        gamma_lower_edge,
    };
    info!("loaded {} runs from {}", dataset.rundata.len(), dir.display());
    Ok(dataset)
}

fn open<T: Table>(dir: &Path) -> Result<ParquetRecordBatchReaderBuilder<File>, ExportError> {
    let path = artifact_path(dir, T::NAME);
    let file = File::open(&path).map_err(|e| ExportError::io(&path, e))?;
    Ok(ParquetRecordBatchReaderBuilder::try_new(file)?)
}

fn read_table<T: Table>(builder: ParquetRecordBatchReaderBuilder<File>) -> Result<T, ExportError> {
    let mut table = T::default();
    for batch in builder.build()? {
        table.append_batch(&batch?)?;
    }
    Ok(table)
}
