//! Benchmarks for influxdb-flux.
//!
//! These run offline: the annotated CSV parser reads from memory and the
//! write path only serializes points.
//!
//! Run with: `cargo bench`

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use influxdb_flux::{AnnotatedCsvParser, Point, WritePrecision};
use rand::Rng;
use tokio::runtime::Runtime;

const HEADER: &str = "\
#datatype,string,long,dateTime:RFC3339,dateTime:RFC3339,dateTime:RFC3339,double,string,string,string,string
#group,false,false,true,true,false,false,true,true,true,true
#default,_result,,,,,,,,,
,result,table,_start,_stop,_time,_value,_field,_measurement,host,region
";

/// Build an annotated CSV body with `rows` records.
fn generate_csv(rows: usize) -> String {
    let mut rng = rand::thread_rng();
    let mut csv = String::with_capacity(HEADER.len() + rows * 140);
    csv.push_str(HEADER);
    for i in 0..rows {
        csv.push_str(&format!(
            ",,0,2023-01-01T00:00:00Z,2024-01-01T00:00:00Z,2023-11-14T22:{:02}:{:02}.{:03}Z,{},value,bench,server{},us-east\n",
            (i / 60) % 60,
            i % 60,
            i % 1000,
            rng.gen_range(0.0..100.0),
            i % 10
        ));
    }
    csv
}

fn generate_points(count: usize) -> Vec<Point> {
    let mut rng = rand::thread_rng();
    (0..count)
        .map(|i| {
            Point::builder("bench")
                .tag("host", format!("server{}", i % 10))
                .tag("region", "us-east")
                .field("value", rng.gen_range(0.0..100.0))
                .field("count", i as i64)
                .timestamp_nanos(1_700_000_000_000_000_000 + i as i64)
                .build()
                .unwrap()
        })
        .collect()
}

/// Benchmark parsing throughput of the streaming CSV parser
fn bench_parse(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    let mut group = c.benchmark_group("annotated_csv");
    for size in [1_000, 10_000, 50_000] {
        let csv = generate_csv(size);
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::new("records", size), &csv, |b, csv| {
            b.to_async(&rt).iter(|| async {
                let mut parser = AnnotatedCsvParser::new(csv.as_bytes());
                let mut count = 0;
                while let Some(record) = parser.next().await.unwrap() {
                    std::hint::black_box(record);
                    count += 1;
                }
                count
            });
        });
    }
    group.finish();
}

/// Benchmark first-record latency, which should not depend on result size
fn bench_first_record(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let csv = generate_csv(50_000);

    c.bench_function("time_to_first_record", |b| {
        b.to_async(&rt).iter(|| async {
            let mut parser = AnnotatedCsvParser::new(csv.as_bytes());
            parser.next().await.unwrap().unwrap()
        });
    });
}

/// Benchmark line-protocol serialization
fn bench_line_protocol(c: &mut Criterion) {
    let points = generate_points(10_000);

    let mut group = c.benchmark_group("line_protocol");
    group.throughput(Throughput::Elements(points.len() as u64));
    group.bench_function("10k_points", |b| {
        b.iter(|| {
            points
                .iter()
                .map(|p| p.to_line_protocol(WritePrecision::Nanos).len())
                .sum::<usize>()
        });
    });
    group.finish();
}

criterion_group!(benches, bench_parse, bench_first_record, bench_line_protocol);

criterion_main!(benches);
