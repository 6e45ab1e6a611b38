// tests/dedup_convergence.rs
//! Bucket protocol against both store backends:
//! - many detections in one minute converge to the newest one
//! - neighbouring minutes and other sources stay independent
//! - unknown sources land under the fallback location

mod common;

use std::sync::Arc;
use std::time::Duration;

use camwatch::event::{DetectionRecord, LocationMap, UNKNOWN_LOCATION};
use camwatch::store::{EventStore, ListQuery, MemoryEventStore, SqliteEventStore};
use camwatch::Deduplicator;

use common::{at, TZ};

async fn backends() -> Vec<Arc<dyn EventStore>> {
    let sqlite = SqliteEventStore::connect("sqlite::memory:", TZ)
        .await
        .expect("in-memory sqlite");
    vec![Arc::new(MemoryEventStore::new()), Arc::new(sqlite)]
}

fn dedup(store: &Arc<dyn EventStore>) -> Deduplicator {
    Deduplicator::new(store.clone(), Duration::from_secs(5))
}

async fn all(store: &Arc<dyn EventStore>) -> Vec<camwatch::DetectionEvent> {
    store
        .list_recent(&ListQuery {
            limit: 1000,
            ..Default::default()
        })
        .await
        .unwrap()
}

#[tokio::test]
async fn burst_in_one_minute_leaves_newest() {
    for store in backends().await {
        let d = dedup(&store);
        for secs in [3, 17, 29, 44, 58] {
            d.record(&DetectionRecord::new("camA", "Gate1", at(secs)))
                .await
                .unwrap();
        }

        let rows = all(&store).await;
        assert_eq!(rows.len(), 1, "backend {}", store.name());
        assert_eq!(rows[0].record.time_key, "12:00:58");
        assert_eq!(rows[0].record.date_key, "01/06/2024");
    }
}

#[tokio::test]
async fn worked_example_two_cameras() {
    // camA hits at 12:00:10 and 12:00:50, camB at 12:00:40.
    for store in backends().await {
        let d = dedup(&store);
        d.record(&DetectionRecord::new("camA", "Gate1", at(10))).await.unwrap();
        d.record(&DetectionRecord::new("camB", "Gate2", at(40))).await.unwrap();
        let last = d
            .record(&DetectionRecord::new("camA", "Gate1", at(50)))
            .await
            .unwrap();
        assert_eq!(last.pruned, 1);

        let rows = all(&store).await;
        let summary: Vec<(&str, &str)> = rows
            .iter()
            .map(|e| (e.record.source.as_str(), e.record.time_key.as_str()))
            .collect();
        assert_eq!(summary, vec![("camA", "12:00:50"), ("camB", "12:00:40")]);
    }
}

#[tokio::test]
async fn adjacent_minutes_are_independent() {
    for store in backends().await {
        let d = dedup(&store);
        d.record(&DetectionRecord::new("camA", "Gate1", at(59))).await.unwrap();
        let next = d
            .record(&DetectionRecord::new("camA", "Gate1", at(60)))
            .await
            .unwrap();
        assert_eq!(next.previous, None);
        assert_eq!(next.pruned, 0);

        let times: Vec<String> = all(&store)
            .await
            .into_iter()
            .map(|e| e.record.time_key)
            .collect();
        assert_eq!(times, vec!["12:01:00".to_string(), "12:00:59".to_string()]);
    }
}

#[tokio::test]
async fn unknown_source_uses_fallback_location() {
    let locations: LocationMap = [("camA".to_string(), "Gate1".to_string())]
        .into_iter()
        .collect();

    for store in backends().await {
        let d = dedup(&store);
        for (source, secs) in [("camA", 5), ("camZ", 6)] {
            let record = DetectionRecord::new(source, locations.resolve(source), at(secs));
            d.record(&record).await.unwrap();
        }

        let unknown = store
            .list_recent(&ListQuery {
                location: Some(UNKNOWN_LOCATION.to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(unknown.len(), 1);
        assert_eq!(unknown[0].record.source, "camZ");
    }
}

#[tokio::test]
async fn concurrent_workers_on_same_bucket_converge() {
    for store in backends().await {
        let d = dedup(&store);
        let mut tasks = Vec::new();
        for secs in 0..20 {
            let d = d.clone();
            tasks.push(tokio::spawn(async move {
                d.record(&DetectionRecord::new("camA", "Gate1", at(secs * 2)))
                    .await
            }));
        }
        for t in tasks {
            t.await.unwrap().unwrap();
        }
        // A final pass settles any interleaving left between reread and prune.
        d.record(&DetectionRecord::new("camA", "Gate1", at(39))).await.unwrap();

        let rows = all(&store).await;
        assert_eq!(rows.len(), 1, "backend {}", store.name());
        assert_eq!(rows[0].record.time_key, "12:00:39");
    }
}
