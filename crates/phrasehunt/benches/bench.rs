use core::hint::black_box;
use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use num_bigint::BigUint;
use phrasehunt::{
    CombinationIndexer, DeriveError, DerivedKey, IndexRange, PhraseDeriver, ProgressPolicy,
    ScanSink, SearchJob, SearchSpace, Wordlist, scan_range,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

// Number of indices visited per benchmark iteration.
const TOTAL_INDICES: u64 = 4096;

fn synthetic(n: usize) -> Vec<Arc<str>> {
    (0..n).map(|i| Arc::from(format!("w{i:04}"))).collect()
}

/// Rejects everything, so the bench measures indexing and splicing only.
struct RejectAll;

impl PhraseDeriver for RejectAll {
    fn is_valid_mnemonic(&self, _phrase: &str) -> bool {
        false
    }

    fn derive_address(&self, _phrase: &str) -> Result<DerivedKey, DeriveError> {
        Err(DeriveError::new("unreachable"))
    }
}

struct Discard;

impl ScanSink for Discard {
    fn progress(&mut self, next: &BigUint, processed: u64, _last_phrase: &str) {
        black_box((next, processed));
    }

    fn found(&mut self, result: phrasehunt::FoundResult) {
        black_box(result);
    }
}

fn bench_decode(c: &mut Criterion) {
    let indexer = CombinationIndexer::new(vec![synthetic(2048); 12]);
    let start = indexer.total() / 3u32;

    let mut group = c.benchmark_group("indexer");
    group.throughput(Throughput::Elements(TOTAL_INDICES));

    group.bench_function(format!("decode/{TOTAL_INDICES}"), |b| {
        b.iter(|| {
            let mut index = start.clone();
            for _ in 0..TOTAL_INDICES {
                black_box(indexer.decode(&index).unwrap());
                index += 1u32;
            }
        });
    });

    group.bench_function(format!("cursor/{TOTAL_INDICES}"), |b| {
        b.iter(|| {
            let mut cursor = indexer.cursor(&start).unwrap();
            for _ in 0..TOTAL_INDICES {
                black_box(cursor.words());
                cursor.advance();
            }
        });
    });

    group.finish();
}

fn bench_scan(c: &mut Criterion) {
    let words: Vec<String> = (0..2048).map(|i| format!("w{i:04}")).collect();
    let list = Wordlist::from_words(&words).unwrap();
    let space = SearchSpace::full(12, &list).unwrap();
    let job = SearchJob::new(space, "none", Arc::new(RejectAll));
    let range = IndexRange::new(BigUint::from(0u32), BigUint::from(TOTAL_INDICES));
    let cancel = CancellationToken::new();

    let mut group = c.benchmark_group("scan_range");
    group.throughput(Throughput::Elements(TOTAL_INDICES));
    group.bench_function(format!("reject_all/{TOTAL_INDICES}"), |b| {
        b.iter(|| {
            scan_range(
                &job,
                &range,
                ProgressPolicy::EveryCount(1024),
                &cancel,
                &mut Discard,
            )
        });
    });
    group.finish();
}

criterion_group!(benches, bench_decode, bench_scan);
criterion_main!(benches);
