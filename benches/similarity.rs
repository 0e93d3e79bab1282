use std::sync::Arc;
use std::time::Instant;

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};

use coletor::storage::{InMemoryCanonicalStore, InMemoryProgressLedger};
use coletor::{
    CanonicalStore, EntityType, Pipeline, PipelineConfig, SimilarityScorer, VecSource,
};

const SURNAMES: [&str; 16] = [
    "SILVA", "SANTOS", "FORZZA", "VILELA", "NOGUEIRA", "BRAZ", "LIMA", "ROCHA", "SOUZA", "PRADO",
    "OLIVEIRA", "PEREIRA", "COSTA", "ALMEIDA", "CARVALHO", "RIBEIRO",
];

fn name(i: usize) -> String {
    let initial = char::from(b'A' + (i % 26) as u8);
    format!("{}, {initial}.", SURNAMES[i % SURNAMES.len()])
}

fn bench_score_pair(c: &mut Criterion) {
    let scorer = SimilarityScorer::default();
    c.bench_function("similarity/score_pair", |b| {
        b.iter(|| scorer.score(black_box("FORZZA, R.C."), black_box("FORZZA, R.")));
    });
}

fn bench_fuzzy_scan(c: &mut Criterion) {
    // 1000 stored people so the scan measures a realistic per-type table.
    let store = InMemoryCanonicalStore::new();
    for i in 0..1000 {
        let entity = coletor::CanonicalEntity::seed(
            format!("{} {i}", name(i)),
            EntityType::Pessoa,
            0.9,
            &name(i),
        );
        store.upsert(entity).unwrap();
    }
    let scorer = SimilarityScorer::default();

    let mut group = c.benchmark_group("similarity/find_similar");
    group.throughput(Throughput::Elements(1000));
    group.bench_function("pessoa_1000", |b| {
        b.iter(|| {
            store
                .find_similar(black_box("FORZA, R.C."), EntityType::Pessoa, 0.70, &scorer)
                .unwrap()
        });
    });
    group.finish();
}

fn bench_pipeline_throughput(c: &mut Criterion) {
    let collectors: Vec<String> = (0..500)
        .map(|i| match i % 4 {
            0 => name(i),
            1 => format!("{}; {}", name(i), name(i + 7)),
            2 => "EMBRAPA".to_string(),
            _ => format!("{}. {}", char::from(b'A' + (i % 26) as u8), SURNAMES[i % SURNAMES.len()]),
        })
        .collect();
    let dir = tempfile::tempdir().unwrap();

    let mut group = c.benchmark_group("pipeline");
    group.throughput(Throughput::Elements(collectors.len() as u64));
    group.sample_size(10);
    group.bench_function("in_memory_500", |b| {
        b.iter_custom(|iters| {
            let mut total = std::time::Duration::ZERO;
            for _ in 0..iters {
                // Fresh stores per iteration so the ledger does not skip everything.
                let pipeline = Pipeline::new(
                    PipelineConfig {
                        batch_size: 100,
                        output_path: dir.path().join("bench.csv"),
                        ..PipelineConfig::default()
                    },
                    Arc::new(InMemoryCanonicalStore::new()),
                    Arc::new(InMemoryProgressLedger::new()),
                )
                .unwrap();
                let source = VecSource::from_collectors(collectors.iter().map(String::as_str));
                let start = Instant::now();
                pipeline.run(&source).unwrap();
                total += start.elapsed();
            }
            total
        });
    });
    group.finish();
}

criterion_group!(similarity, bench_score_pair, bench_fuzzy_scan, bench_pipeline_throughput);
criterion_main!(similarity);
