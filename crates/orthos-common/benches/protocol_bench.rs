// Criterion benchmarks for orthos-common
//
// Run benchmarks with:
//   cargo bench -p orthos-common

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use orthos_common::transport::JsonCodec;
use orthos_common::{Document, Replacement, Request, Response, RunParameters, Suggestion};

const PARAGRAPH: &str = "Teh quick brown fox jumpd over the lazy dog, and then it went home. \
    \"Where are you going?\" asked the cat; the fox did not anser.";

fn bench_tokenize(c: &mut Criterion) {
    let mut group = c.benchmark_group("tokenize");

    group.bench_function("paragraph", |b| {
        b.iter(|| Document::from_text("p", black_box(PARAGRAPH)));
    });

    let long = PARAGRAPH.repeat(200);
    group.bench_function("long_text", |b| {
        b.iter(|| Document::from_text("p", black_box(&long)));
    });

    group.finish();
}

fn bench_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("codec");
    let doc = Document::from_text("p", PARAGRAPH);

    group.bench_function("encode_run_request", |b| {
        let request = Request::run("errorlist", doc.clone(), RunParameters::default());
        b.iter(|| JsonCodec::encode_request(black_box(&request)));
    });

    group.bench_function("decode_suggestions", |b| {
        let suggestions: Vec<Suggestion> = doc
            .tokens
            .iter()
            .map(|t| Suggestion::for_token(t, vec![Replacement::new("x").with_confidence(0.5)]))
            .collect();
        let encoded = JsonCodec::encode_response(&Response::suggestions(1, suggestions)).unwrap();
        b.iter(|| JsonCodec::decode_response(black_box(&encoded)));
    });

    group.finish();
}

criterion_group!(benches, bench_tokenize, bench_codec);
criterion_main!(benches);
