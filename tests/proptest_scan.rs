//! Property-based tests using proptest
//!
//! These tests verify the concurrency bound of the scanner, target filter
//! semantics, and normalizer robustness using randomized inputs.

use cloudventory::resource::{get_registry, normalize, FieldValue};
use cloudventory::scan::{scan, RowSink, ScanOptions, ScanTarget};
use proptest::prelude::*;
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Generate a region name such as "us-east1"
fn arb_region() -> impl Strategy<Value = String> {
    "[a-z]{2,8}-[a-z]{3,9}[1-9]"
}

/// Generate a zone of a region, e.g. "us-east1-b" or "us-central1-ai1a"
fn arb_zone() -> impl Strategy<Value = (String, String)> {
    (arb_region(), "[a-f]|ai[1-9][a-f]").prop_map(|(region, suffix)| (format!("{region}-{suffix}"), region))
}

/// Generate arbitrary JSON, nested a few levels deep
fn arb_json() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(|n| json!(n)),
        "[a-zA-Z0-9/._-]{0,20}".prop_map(Value::String),
    ];
    leaf.prop_recursive(3, 32, 6, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..6).prop_map(Value::Array),
            prop::collection::btree_map("[a-zA-Z]{1,12}", inner, 0..6)
                .prop_map(|m| Value::Object(m.into_iter().collect())),
        ]
    })
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .enable_time()
        .build()
        .expect("runtime")
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// In-flight target scans never exceed the concurrency limit, and every target runs once
    #[test]
    fn prop_concurrency_never_exceeds_limit(target_count in 0usize..40, limit in 1usize..8) {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let targets: Vec<ScanTarget> =
            (0..target_count).map(|i| ScanTarget::new(format!("target-{i}"))).collect();
        let options = ScanOptions { concurrency_limit: limit, ..ScanOptions::default() };

        let (tracked, seen) = (in_flight.clone(), peak.clone());
        let result = runtime().block_on(scan(
            targets,
            &options,
            &CancellationToken::new(),
            move |target, sink: RowSink<String>| {
                let (in_flight, peak) = (tracked.clone(), seen.clone());
                async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(2)).await;
                    sink.push(target.to_string());
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                }
            },
        ));

        let result = result.expect("scan should succeed");
        prop_assert!(peak.load(Ordering::SeqCst) <= limit);
        prop_assert_eq!(result.rows.len(), target_count);
        prop_assert_eq!(result.targets_scanned, target_count);
        prop_assert!(result.is_clean());
    }

    /// A region in the filter selects its zones; an unrelated filter excludes them
    #[test]
    fn prop_region_filter_selects_zones((zone, region) in arb_zone(), other in arb_region()) {
        let target = ScanTarget::new(zone.clone());
        prop_assert_eq!(target.region(), region.as_str());

        let by_region: BTreeSet<String> = [region.clone()].into();
        let by_zone: BTreeSet<String> = [zone.clone()].into();
        prop_assert!(target.matches(&by_region));
        prop_assert!(target.matches(&by_zone));
        prop_assert!(target.matches(&BTreeSet::new()));

        prop_assume!(other != region);
        let unrelated: BTreeSet<String> = [other].into();
        prop_assert!(!target.matches(&unrelated));
    }

    /// The global target is selected by every filter
    #[test]
    fn prop_global_always_selected(filter in prop::collection::btree_set(arb_region(), 0..5)) {
        prop_assert!(ScanTarget::global().matches(&filter));
    }

    /// Normalizing arbitrary JSON never panics, and a kept row has every declared column
    #[test]
    fn prop_normalize_is_total(record in arb_json(), key in "[a-z0-9-]{1,20}") {
        for def in get_registry() {
            let target = ScanTarget::new("us-east1-b");
            let _ = normalize(def, "inventory-test", &target, &record);

            let mut keyed = match record.clone() {
                Value::Object(map) => Value::Object(map),
                _ => json!({}),
            };
            keyed[def.natural_key.json_path.as_str()] = json!(key.clone());

            let row = normalize(def, "inventory-test", &target, &keyed);
            let row = row.expect("record with a natural key is kept");
            prop_assert_eq!(&row.natural_key, &key);
            prop_assert_eq!(row.project.as_str(), "inventory-test");
            for column in &def.columns {
                let value = row.field(&column.column);
                prop_assert!(value.is_some(), "missing column {}", column.column);
                let kind_matches = matches!(
                    (value.unwrap(), column.kind),
                    (FieldValue::Text(_), cloudventory::resource::ColumnKind::Text)
                        | (FieldValue::Integer(_), cloudventory::resource::ColumnKind::Integer)
                        | (FieldValue::Bool(_), cloudventory::resource::ColumnKind::Boolean)
                );
                prop_assert!(kind_matches, "column {} has the wrong kind", column.column);
            }
        }
    }
}
