use activation_collector::data::filter::gamma_rates;
use activation_collector::{
    parse_run_str, CollectError, Collector, ParseError, ParsedRun, RunKey, Table,
};
use pretty_assertions::assert_eq;
use serde_json::{json, Value as JsonValue};

fn nuclide(element: &str, isotope: u16, half_life: f64) -> JsonValue {
    json!({
        "element": element, "isotope": isotope, "state": "",
        "half_life": half_life, "atoms": 1.0e18, "grams": 1.0e-4, "activity": 2.0e9,
    })
}

fn document(steps: usize, nuclides: Vec<JsonValue>, rates: [f64; 3]) -> String {
    let inventory: Vec<JsonValue> = (1..=steps)
        .map(|i| {
            json!({
                "irradiation_time": 3600.0, "cooling_time": 60.0 * (i - 1) as f64,
                "flux": 1.0e12,
                "dose_rate": { "type": "Plane source", "distance": 0.0, "dose": 1.0 },
                "nuclides": nuclides,
                "gamma_spectrum": { "boundaries": [1.0, 2.0, 3.0], "values": rates },
            })
        })
        .collect();
    json!({
        "run_data": {
            "timestamp": "08:00:00 02 March 2021",
            "run_name": "* integration",
            "flux_name": "fw-1"
        },
        "inventory_data": inventory,
    })
    .to_string()
}

fn parse(steps: usize, nuclides: Vec<JsonValue>, rates: [f64; 3]) -> ParsedRun {
    parse_run_str(&document(steps, nuclides, rates)).unwrap()
}

#[test]
fn gamma_rates_of_one_run_come_back_by_bin() {
    let mut collector = Collector::default();
    collector
        .append(&parse(1, vec![], [10.0, 20.0, 30.0]), 1, 54)
        .unwrap()
        .append(&parse(1, vec![], [11.0, 21.0, 31.0]), 1, 55)
        .unwrap();

    let ds = collector.get_result();
    assert_eq!(gamma_rates(&ds, 1, 54, 1), vec![(0, 10.0), (1, 20.0), (2, 30.0)]);
    assert_eq!(gamma_rates(&ds, 1, 55, 1), vec![(0, 11.0), (1, 21.0), (2, 31.0)]);
    assert_eq!(ds.gbins.boundary, [1.0, 2.0, 3.0]);
}

#[test]
fn row_counts_are_sums_over_runs() {
    let runs = [
        parse(3, vec![nuclide("Co", 60, 1.66e8), nuclide("Fe", 55, 8.6e7)], [1.0; 3]),
        parse(1, vec![nuclide("Co", 60, 1.66e8)], [1.0; 3]),
        parse(2, vec![], [1.0; 3]),
    ];
    let mut collector = Collector::default();
    for (case_id, run) in runs.iter().enumerate() {
        collector.append(run, 7, case_id as u32).unwrap();
    }

    let ds = collector.get_result();
    assert_eq!(ds.rundata.len(), runs.len());
    assert_eq!(ds.timestep.len(), runs.iter().map(|r| r.time_steps.len()).sum::<usize>());
    assert_eq!(ds.timestep_nuclide.len(), runs.iter().map(ParsedRun::nuclide_count).sum::<usize>());
    assert_eq!(ds.timestep_gamma.len(), runs.iter().map(ParsedRun::gamma_count).sum::<usize>());
    assert_eq!(ds.nuclide.len(), 2);
}

#[test]
fn repeated_nuclide_resolves_to_one_row() {
    let mut collector = Collector::default();
    for case_id in 0..10 {
        let run = parse(2, vec![nuclide("Co", 60, 1.66e8)], [1.0; 3]);
        collector.append(&run, 1, case_id).unwrap();
    }
    let ds = collector.get_result();
    assert_eq!(ds.nuclide.len(), 1);
    assert_eq!(ds.nuclide.zai, [270_600]);
    assert!(ds.timestep_nuclide.zai.iter().all(|&z| z == 270_600));
}

#[test]
fn element_case_does_not_split_a_nuclide() {
    let mut collector = Collector::default();
    collector
        .append(&parse(1, vec![nuclide("Co", 60, 1.66e8)], [1.0; 3]), 1, 1)
        .unwrap()
        .append(&parse(1, vec![nuclide("CO", 60, 1.66e8)], [1.0; 3]), 1, 2)
        .unwrap()
        .append(&parse(1, vec![nuclide("co", 60, 1.66e8)], [1.0; 3]), 1, 3)
        .unwrap();
    let ds = collector.get_result();
    assert_eq!(ds.nuclide.len(), 1);
    assert_eq!(ds.nuclide.element, ["Co"]);
    assert_eq!(ds.timestep_nuclide.zai, [270_600; 3]);
}

#[test]
fn duplicate_key_leaves_every_table_untouched() {
    let mut collector = Collector::default();
    collector
        .append(&parse(1, vec![nuclide("Co", 60, 1.66e8)], [1.0; 3]), 2, 1)
        .unwrap();
    let before = collector.get_result();

    let again = parse(4, vec![nuclide("H", 3, 3.89e8)], [5.0; 3]);
    match collector.append(&again, 2, 1) {
        Err(CollectError::DuplicateRun(key)) => assert_eq!(key, RunKey::new(2, 1)),
        other => panic!("expected a duplicate-run error, got {other:?}"),
    }
    assert_eq!(collector.get_result(), before);
}

#[test]
fn half_life_conflict_leaves_every_table_untouched() {
    let mut collector = Collector::default();
    collector
        .append(&parse(1, vec![nuclide("Co", 60, 1.66e8)], [1.0; 3]), 1, 1)
        .unwrap();
    let before = collector.get_result();

    let drifted = parse(1, vec![nuclide("H", 3, 3.89e8), nuclide("Co", 60, 1.7e8)], [1.0; 3]);
    let err = collector.append(&drifted, 1, 2).unwrap_err();
    assert!(matches!(err, CollectError::ReferenceDataConflict { .. }));
    assert_eq!(err.key(), RunKey::new(1, 2));
    assert!(err.to_string().contains("Co60"));
    assert_eq!(collector.get_result(), before);
}

#[test]
fn half_life_within_tolerance_is_accepted() {
    let mut collector = Collector::default();
    collector
        .append(&parse(1, vec![nuclide("Co", 60, 1.66e8)], [1.0; 3]), 1, 1)
        .unwrap()
        .append(&parse(1, vec![nuclide("Co", 60, 1.66e8 * (1.0 + 1e-9))], [1.0; 3]), 1, 2)
        .unwrap();
    assert_eq!(collector.get_result().nuclide.half_life, [1.66e8f32]);
}

#[test]
fn parse_errors_name_the_field() {
    let text = document(2, vec![nuclide("Co", 60, 1.0)], [1.0; 3]);
    let mut doc: JsonValue = serde_json::from_str(&text).unwrap();
    doc["inventory_data"][1]["nuclides"][0]["half_life"] = json!("soon");
    let err = parse_run_str(&doc.to_string()).unwrap_err();
    assert!(matches!(err, ParseError::Type { .. }));
    assert_eq!(err.path(), Some("inventory_data[1].nuclides[0].half_life"));
}
