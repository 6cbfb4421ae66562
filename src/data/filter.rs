use std::collections::BTreeSet;

use super::model::RunKey;
use super::tables::Dataset;

// ---------------------------------------------------------------------------
// Row selection: which runs and time steps to keep
// ---------------------------------------------------------------------------

/// Selection over `(material_id, case_id, time_step_number)` key columns.
/// `None` means "no filter" for that axis; an empty set selects nothing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowFilter {
    pub runs: Option<BTreeSet<RunKey>>,
    pub time_steps: Option<BTreeSet<u32>>,
}

impl RowFilter {
    pub fn run(material_id: u32, case_id: u32) -> Self {
        Self {
            runs: Some(BTreeSet::from([RunKey::new(material_id, case_id)])),
            time_steps: None,
        }
    }

    pub fn time_step(mut self, number: u32) -> Self {
        self.time_steps
            .get_or_insert_with(BTreeSet::new)
            .insert(number);
        self
    }

    pub fn matches(&self, key: RunKey, time_step_number: u32) -> bool {
        self.runs.as_ref().map_or(true, |runs| runs.contains(&key))
            && self
                .time_steps
                .as_ref()
                .map_or(true, |steps| steps.contains(&time_step_number))
    }
}

/// Return indices of rows whose key columns pass `filter`.
pub fn filtered_indices(
    material_id: &[u32],
    case_id: &[u32],
    time_step_number: &[u32],
    filter: &RowFilter,
) -> Vec<usize> {
    material_id
        .iter()
        .zip(case_id)
        .zip(time_step_number)
        .enumerate()
        .filter(|(_, ((&m, &c), &t))| filter.matches(RunKey::new(m, c), t))
        .map(|(i, _)| i)
        .collect()
}

/// Photon rates of one time step as `(g, rate)`, ordered by bin index.
pub fn gamma_rates(
    dataset: &Dataset,
    material_id: u32,
    case_id: u32,
    time_step_number: u32,
) -> Vec<(u16, f32)> {
    let table = &dataset.timestep_gamma;
    let filter = RowFilter::run(material_id, case_id).time_step(time_step_number);
    let mut rates: Vec<(u16, f32)> = filtered_indices(
        &table.material_id,
        &table.case_id,
        &table.time_step_number,
        &filter,
    )
    .into_iter()
    .map(|i| (table.g[i], table.rate[i]))
    .collect();
    rates.sort_by_key(|&(g, _)| g);
    rates
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::tables::TimeStepGammaRow;

    fn gamma_row(case_id: u32, time_step_number: u32, g: u16, rate: f32) -> TimeStepGammaRow {
        TimeStepGammaRow {
            material_id: 1,
            case_id,
            time_step_number,
            g,
            rate,
        }
    }

    #[test]
    fn default_filter_keeps_everything() {
        let idx = filtered_indices(&[1, 1, 2], &[1, 2, 1], &[1, 1, 1], &RowFilter::default());
        assert_eq!(idx, vec![0, 1, 2]);
    }

    #[test]
    fn empty_selection_keeps_nothing() {
        let filter = RowFilter {
            runs: Some(BTreeSet::new()),
            time_steps: None,
        };
        assert!(filtered_indices(&[1], &[1], &[1], &filter).is_empty());
    }

    #[test]
    fn run_and_step_both_apply() {
        let filter = RowFilter::run(1, 2).time_step(3);
        let idx = filtered_indices(&[1, 1, 1, 2], &[2, 2, 1, 2], &[3, 4, 3, 3], &filter);
        assert_eq!(idx, vec![0]);
    }

    #[test]
    fn gamma_rates_come_back_in_bin_order() {
        let mut ds = Dataset::default();
        for row in [
            gamma_row(54, 1, 1, 20.0),
            gamma_row(54, 1, 0, 10.0),
            gamma_row(55, 1, 0, 99.0),
            gamma_row(54, 2, 0, 5.0),
            gamma_row(54, 1, 2, 30.0),
        ] {
            ds.timestep_gamma.push(row);
        }
        assert_eq!(
            gamma_rates(&ds, 1, 54, 1),
            vec![(0, 10.0), (1, 20.0), (2, 30.0)]
        );
        assert!(gamma_rates(&ds, 9, 54, 1).is_empty());
    }
}
