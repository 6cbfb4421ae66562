//! Parallel ingestion: run documents are parsed on a pool of worker threads
//! while a single writer commits them to the [`Collector`].
//!
//! ```text
//!  sources ──▶ [job queue] ──▶ worker × N (parse) ──▶ [done queue] ──▶ writer
//! ```
//!
//! The writer commits runs in input order, whatever order the workers
//! finish in, so the collected tables do not depend on thread scheduling.

use std::collections::BTreeMap;

use crossbeam_channel::bounded;
use log::{debug, info, warn};

use crate::config::IngestConfig;
use crate::data::collector::Collector;
use crate::data::loader::parse_run;
use crate::data::model::{ParsedRun, RunKey};
use crate::error::{Error, ParseError};

/// One unparsed run document and the key it is collected under.
#[derive(Debug, Clone)]
pub struct RunSource {
    pub material_id: u32,
    pub case_id: u32,
    pub bytes: Vec<u8>,
}

impl RunSource {
    pub fn new(material_id: u32, case_id: u32, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            material_id,
            case_id,
            bytes: bytes.into(),
        }
    }

    pub fn key(&self) -> RunKey {
        RunKey::new(self.material_id, self.case_id)
    }
}

/// Outcome of a [`collect_parallel`] call, in input order.
#[derive(Debug, Default)]
pub struct IngestReport {
    pub committed: Vec<RunKey>,
    pub rejected: Vec<(RunKey, Error)>,
}

impl IngestReport {
    pub fn is_clean(&self) -> bool {
        self.rejected.is_empty()
    }
}

type Parsed = (usize, RunKey, Result<ParsedRun, ParseError>);

/// Parse `sources` concurrently and append them to `collector`.
///
/// A source that fails to parse or is rejected by the collector is reported
/// and skipped; the remaining sources are still collected.
pub fn collect_parallel(
    sources: Vec<RunSource>,
    config: &IngestConfig,
    collector: &mut Collector,
) -> IngestReport {
    let mut report = IngestReport::default();
    if sources.is_empty() {
        return report;
    }
    let workers = config.worker_count().clamp(1, sources.len());
    let capacity = config.queue_capacity.max(1);
    let (job_tx, job_rx) = bounded::<(usize, RunSource)>(capacity);
    let (done_tx, done_rx) = bounded::<Parsed>(capacity);
    debug!("ingesting {} runs on {workers} workers", sources.len());

    std::thread::scope(|s| {
        for _ in 0..workers {
            let job_rx = job_rx.clone();
            let done_tx = done_tx.clone();
            s.spawn(move || {
                for (i, source) in job_rx {
                    let parsed = parse_run(&source.bytes);
                    if done_tx.send((i, source.key(), parsed)).is_err() {
                        break;
                    }
                }
            });
        }
        drop(job_rx);
        drop(done_tx);

        s.spawn(move || {
            for job in sources.into_iter().enumerate() {
                if job_tx.send(job).is_err() {
                    break;
                }
            }
        });

        // Hold early finishers until every run before them is committed.
        let mut pending = BTreeMap::new();
        let mut next = 0;
        for (i, key, parsed) in done_rx {
            pending.insert(i, (key, parsed));
            while let Some((key, parsed)) = pending.remove(&next) {
                next += 1;
                commit(collector, &mut report, key, parsed);
            }
        }
    });

    info!(
        "ingested {} runs, {} rejected",
        report.committed.len(),
        report.rejected.len()
    );
    report
}

fn commit(
    collector: &mut Collector,
    report: &mut IngestReport,
    key: RunKey,
    parsed: Result<ParsedRun, ParseError>,
) {
    let outcome = parsed.map_err(Error::from).and_then(|run| {
        collector
            .append(&run, key.material_id, key.case_id)
            .map(|_| ())
            .map_err(Error::from)
    });
    match outcome {
        Ok(()) => report.committed.push(key),
        Err(e) => {
            warn!("skipping run {key}: {e}");
            report.rejected.push((key, e));
        }
    }
}
