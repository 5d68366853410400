use std::hint::black_box;
use std::sync::Arc;

use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use picatalog::{CatalogBuilder, Direction, IndexName, IngestRecord, QueryParams, Session};
use rand::prelude::*;
use tokio::runtime::Runtime;

const N: usize = 2000;

fn bench_scan(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let temp_dir = tempfile::tempdir().unwrap();
    let session = Arc::new(Session::new(Some("/bench".to_owned()), None));

    let catalog = rt.block_on(async {
        let catalog = CatalogBuilder::new(temp_dir.path().join("db"))
            .map_size(1 << 28)
            .session(session)
            .open()
            .await
            .unwrap();
        let mut rng = rand::rng();
        let records = (0..N)
            .map(|i| {
                IngestRecord::new(format!("/bench/{i:05}.jpg"))
                    .with_exif_created(rng.random_range(1.0..1e9))
                    .with_size(rng.random_range(1..1 << 24))
                    .with_tag("category", if i % 3 == 0 { "cat" } else { "dog" })
            })
            .collect();
        for outcome in catalog.store_many(records).await {
            outcome.into_result().unwrap();
        }
        catalog
    });

    let catalog = &catalog;
    let mut group = c.benchmark_group("Scan");
    group.throughput(Throughput::Elements(N as u64));
    for index in [IndexName::Name, IndexName::Date, IndexName::Size] {
        group.bench_function(index.as_str(), |b| {
            b.to_async(&rt).iter(|| async move {
                let params = QueryParams::new(index, Direction::Descending);
                black_box(catalog.query_all(params).await.unwrap())
            });
        });
    }
    group.bench_function("page_20", |b| {
        b.to_async(&rt).iter(|| async move {
            let params = QueryParams::new(IndexName::Date, Direction::Ascending).range(101, 120);
            black_box(catalog.query_all(params).await.unwrap())
        });
    });
    group.finish();
}

criterion_group!(benches, bench_scan);
criterion_main!(benches);
