//! Hot paths of ingestion: price parsing, title heuristics and a whole
//! in-memory batch

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use std::sync::Arc;
use tokio::runtime::Runtime;
use tokio_util::sync::CancellationToken;

use price_tracker_lib::application::{IngestOptions, IngestionPipeline};
use price_tracker_lib::domain::{ProgressSink, ScrapedRecord};
use price_tracker_lib::infrastructure::{MemoryStore, VariantSignalExtractor, parse_price};

const PRICES: &[&str] = &["€ 19,49", "US $1,234.56", "1.234,56", "$19.99", "N/A", "12,59€"];

const TITLES: &[&str] = &[
    "SUNLU PLA Filament 1.75mm 1kg Black",
    "Mini PC N100 16GB DDR4 512GB SSD WiFi 6",
    "ELEGOO PETG Filament 25M Transparent",
    "USB-C Charger 65W Type-C GaN",
];

fn bench_parse_price(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse_price");
    for price in PRICES {
        group.bench_with_input(BenchmarkId::from_parameter(price), price, |b, price| {
            b.iter(|| parse_price(black_box(price)));
        });
    }
    group.finish();
}

fn bench_title_extraction(c: &mut Criterion) {
    let extractor = VariantSignalExtractor::default();
    c.bench_function("extract_from_title", |b| {
        b.iter(|| {
            for title in TITLES {
                black_box(extractor.extract_from_title(black_box(title)));
            }
        });
    });
}

fn bench_ingest_batch(c: &mut Criterion) {
    let rt = match Runtime::new() {
        Ok(rt) => rt,
        Err(e) => panic!("tokio runtime: {e}"),
    };
    let records: Vec<ScrapedRecord> = (0..100)
        .map(|i| ScrapedRecord {
            base_product_id: Some(format!("{}", 1000 + i / 4)),
            title: Some(TITLES[i % TITLES.len()].to_string()),
            variant_label: Some(format!("Variant {}", i % 4)),
            sale_price: Some(PRICES[i % PRICES.len()].to_string()),
            ..ScrapedRecord::default()
        })
        .collect();

    c.bench_function("ingest_100_records", |b| {
        b.iter(|| {
            rt.block_on(async {
                let pipeline = IngestionPipeline::new(Arc::new(MemoryStore::new()));
                pipeline
                    .ingest_records(
                        "bench",
                        records.clone(),
                        IngestOptions::default(),
                        &CancellationToken::new(),
                        &ProgressSink::disabled(),
                    )
                    .await
            })
        });
    });
}

criterion_group!(benches, bench_parse_price, bench_title_extraction, bench_ingest_batch);
criterion_main!(benches);
