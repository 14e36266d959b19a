#![allow(non_snake_case)]
use cloudwatch_emf_exporter::batch::{HistogramDataPoint, Metric, MetricData, NumberDataPoint, ResourceMetrics};
use cloudwatch_emf_exporter::{Builder, Config, Error, MetricBatch};
use tokio_util::sync::CancellationToken;

const CONFIG: &str = r#"{
    "namespace": "EmfStdout",
    "log_group_name": "/aws/ecs/containerinsights/{ClusterName}/performance",
    "log_stream_name": "{TaskId}",
    "output_destination": "stdout",
    "dimension_rollup_option": "SingleDimensionRollupOnly"
}"#;

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::filter::EnvFilter::from_default_env())
        .with_target(false)
        .without_time()
        .compact()
        .init();

    let config: Config = serde_json::from_str(CONFIG)?;
    let exporter = Builder::new().with_config(config).build()?;

    let resource = ResourceMetrics::new()
        .with_attribute("aws.ecs.cluster.name", "demo-cluster")
        .with_attribute("aws.ecs.task.id", "demo-task")
        .with_metric(
            Metric::new(
                "requests",
                MetricData::Sum(vec![NumberDataPoint::new(0, 1.0).with_attribute("Method", "Default")]),
            )
            .with_unit(metrics::Unit::Count),
        )
        .with_metric(Metric::new(
            "latency",
            MetricData::Histogram(vec![HistogramDataPoint {
                attributes: [("Method".to_string(), "Default".to_string())].into(),
                count: 3,
                sum: 42.0,
                bucket_counts: vec![1, 2, 0],
                explicit_bounds: vec![10.0, 20.0],
                ..Default::default()
            }]),
        ));

    let cancel = CancellationToken::new();
    exporter.push(&MetricBatch::new().with_resource(resource), &cancel).await?;
    exporter.shutdown(&cancel).await?;

    Ok(())
}
