use cloudwatch_emf_exporter::batch::{Metric, MetricData, NumberDataPoint, ResourceMetrics};
use cloudwatch_emf_exporter::{Builder, DimensionRollupOption, MetricBatch, OutputDestination};
use criterion::{criterion_group, criterion_main, Criterion};
use tokio_util::sync::CancellationToken;

fn criterion_benchmark(c: &mut Criterion) {
    let exporter = Builder::new()
        .namespace("MyApplication")
        .dimension_rollup_option(DimensionRollupOption::ZeroAndSingleDimensionRollup)
        .output_destination(OutputDestination::Stdout)
        .output_writer(std::io::sink())
        .build()
        .unwrap();

    let mut resource = ResourceMetrics::new().with_attribute("service.name", "bench");
    for name in ["four", "score", "andseven", "years"] {
        let points = ["Default", "Another", "YetAnother"]
            .iter()
            .map(|method| NumberDataPoint::new(1687657545423, 1.0).with_attribute("Method", *method))
            .collect();
        resource = resource.with_metric(Metric::new(name, MetricData::Gauge(points)));
    }
    let batch = MetricBatch::new().with_resource(resource);
    let cancel = CancellationToken::new();
    let runtime = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("push", |b| b.to_async(&runtime).iter(|| exporter.push(&batch, &cancel)));
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
