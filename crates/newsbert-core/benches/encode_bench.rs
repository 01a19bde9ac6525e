use criterion::{black_box, criterion_group, criterion_main, Criterion};
use newsbert_core::{FeatureEncoder, LabeledExample, WordpieceTokenizer};

const VOCAB: &[&str] = &[
    "[PAD]", "[UNK]", "[CLS]", "[SEP]", "[MASK]", "the", "new", "phone", "launched", "today",
    "government", "passes", "bill", "election", "results", "announced", "market", "shares",
    "##s", "##ed", ".", ",",
];

fn bench_feature_encoding(c: &mut Criterion) {
    let tokenizer = WordpieceTokenizer::from_vocab(VOCAB, true).unwrap();
    let encoder = FeatureEncoder::new(&tokenizer, 128);

    let stories = vec![
        "The government passes new bills today.",
        "New phone launched, shares announced.",
        "Election results announced as market shares launched.",
        "The new government bill passed today, election results announced.",
    ];
    let examples: Vec<LabeledExample> = stories
        .iter()
        .enumerate()
        .map(|(i, s)| LabeledExample::new(*s, i % 4))
        .collect();
    let long = LabeledExample::new(stories.join(" ").repeat(20), 0);

    c.bench_function("encode_single", |b| {
        b.iter(|| encoder.encode(black_box(&examples[0])).unwrap());
    });

    c.bench_function("encode_truncated_long_story", |b| {
        b.iter(|| encoder.encode(black_box(&long)).unwrap());
    });

    c.bench_function("encode_batch_4", |b| {
        b.iter(|| encoder.encode_all(black_box(&examples)).unwrap());
    });
}

criterion_group!(benches, bench_feature_encoding);
criterion_main!(benches);
