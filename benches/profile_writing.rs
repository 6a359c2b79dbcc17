use casp::instrumentation_profile::types::NamedInstrProfRecord;
use casp::instrumentation_profile::{ProfileSink, ProfileWriter};
use casp::ProfileFormat;
use criterion::{criterion_group, criterion_main, Criterion};

fn writer(format: ProfileFormat) -> ProfileWriter {
    let mut writer = ProfileWriter::new(format);
    for i in 0..5000u64 {
        let counts = (0..(i % 16 + 1)).map(|x| 100 / (x + 1)).collect();
        let record = NamedInstrProfRecord::new(format!("function_{}", i), i, counts);
        writer.add_record(record, 1).unwrap();
    }
    writer
}

pub fn write_profiles(c: &mut Criterion) {
    let indexed = writer(ProfileFormat::Indexed);
    c.bench_function("write_indexed_5000", |b| {
        b.iter(|| {
            let mut out = vec![];
            indexed.write_to(&mut out).unwrap();
            out
        })
    });
    let text = writer(ProfileFormat::Text);
    c.bench_function("write_text_5000", |b| {
        b.iter(|| {
            let mut out = vec![];
            text.write_to(&mut out).unwrap();
            out
        })
    });
}

criterion_group!(benches, write_profiles);

criterion_main!(benches);
