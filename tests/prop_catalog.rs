use proptest::prelude::*;
use tempfile::TempDir;

use imagedb::linalg::{dot, l2_normalized};
use imagedb::storage::{load_catalog, save_catalog, LoadOutcome};
use imagedb::Catalog;

const DIM: usize = 4;

#[derive(Debug, Clone)]
enum Step {
    Append(Vec<f32>),
    AppendWrongDim(usize),
    Search { query: Vec<f32>, k: usize },
}

fn vector_strategy() -> impl Strategy<Value = Vec<f32>> {
    prop::collection::vec(-1.0f32..1.0, DIM)
}

fn step_strategy() -> impl Strategy<Value = Step> {
    prop_oneof![
        4 => vector_strategy().prop_map(Step::Append),
        1 => (0usize..8)
            .prop_filter("wrong dim", |d| *d != DIM)
            .prop_map(Step::AppendWrongDim),
        2 => (vector_strategy(), 0usize..12).prop_map(|(query, k)| Step::Search { query, k }),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]

    #[test]
    fn prop_catalog_stays_aligned_and_ranked(steps in prop::collection::vec(step_strategy(), 1..60)) {
        let mut catalog = Catalog::new(DIM);
        let mut model: Vec<Vec<f32>> = Vec::new();

        for step in &steps {
            match step {
                Step::Append(raw) => {
                    let Some(v) = l2_normalized(raw.clone()) else { continue };
                    let entry = catalog.append(format!("img/{}.png", model.len()), &v)
                        .map_err(|e| TestCaseError::fail(format!("{e:#}")))?;
                    prop_assert_eq!(entry.id as usize, model.len());
                    model.push(v);
                }
                Step::AppendWrongDim(dim) => {
                    prop_assert!(catalog.append("bad.png", &vec![0.5; *dim]).is_err());
                }
                Step::Search { query, k } => {
                    let hits = catalog.search(query, *k);
                    prop_assert_eq!(hits.len(), (*k).min(model.len()));
                    for pair in hits.windows(2) {
                        let ordered = pair[0].score > pair[1].score
                            || (pair[0].score == pair[1].score && pair[0].position < pair[1].position);
                        prop_assert!(ordered, "hits out of order: {:?}", pair);
                    }
                    if let Some(best) = hits.first() {
                        let top = model.iter().map(|v| dot(query, v)).fold(f32::MIN, f32::max);
                        prop_assert!((best.score - top).abs() < 1e-5);
                    }
                }
            }
            prop_assert_eq!(catalog.len(), model.len());
            prop_assert_eq!(catalog.cache().len(), model.len());
            prop_assert_eq!(catalog.store().len(), model.len());
        }
        prop_assert!(catalog.check_aligned().is_ok());
    }

    #[test]
    fn prop_persisted_catalog_round_trips(rows in prop::collection::vec(vector_strategy(), 1..24)) {
        let mut catalog = Catalog::new(DIM);
        for (i, raw) in rows.into_iter().enumerate() {
            if let Some(v) = l2_normalized(raw) {
                catalog.append(format!("img/{i}.png"), &v)
                    .map_err(|e| TestCaseError::fail(format!("{e:#}")))?;
            }
        }
        let dir = TempDir::new().map_err(|e| TestCaseError::fail(e.to_string()))?;
        let saved = save_catalog(dir.path(), &catalog)
            .map_err(|e| TestCaseError::fail(format!("{e:#}")))?;
        prop_assert_eq!(saved, !catalog.is_empty());

        match load_catalog(dir.path(), DIM).map_err(|e| TestCaseError::fail(format!("{e:#}")))? {
            LoadOutcome::Loaded(back) => prop_assert_eq!(back, catalog),
            LoadOutcome::Fresh => prop_assert!(catalog.is_empty()),
        }
    }
}
