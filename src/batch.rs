//! # Batch
//!
//! The dimensional metric data handed to [Exporter::push](super::Exporter::push)

use std::collections::BTreeMap;

/// Attribute map, ordered so that grouping and dimension names are deterministic
pub type Attributes = BTreeMap<String, String>;

/// A batch of metrics, grouped by the resource that produced them
#[derive(Clone, Debug, Default)]
pub struct MetricBatch {
    pub resource_metrics: Vec<ResourceMetrics>,
}

impl MetricBatch {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn with_resource(mut self, resource: ResourceMetrics) -> Self {
        self.resource_metrics.push(resource);
        self
    }

    /// Total number of data points across every resource and metric
    pub fn data_point_count(&self) -> usize {
        self.resource_metrics
            .iter()
            .flat_map(|resource| resource.metrics.iter())
            .map(|metric| metric.data.len())
            .sum()
    }
}

/// Metrics sharing one set of resource attributes
///
/// The resource attributes supply the values for log group / log stream placeholders
#[derive(Clone, Debug, Default)]
pub struct ResourceMetrics {
    pub resource_attributes: Attributes,
    pub metrics: Vec<Metric>,
}

impl ResourceMetrics {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.resource_attributes.insert(key.into(), value.into());
        self
    }

    pub fn with_metric(mut self, metric: Metric) -> Self {
        self.metrics.push(metric);
        self
    }
}

#[derive(Clone, Debug)]
pub struct Metric {
    pub name: String,
    pub unit: Option<metrics::Unit>,
    pub data: MetricData,
}

impl Metric {
    pub fn new(name: impl Into<String>, data: MetricData) -> Self {
        Self {
            name: name.into(),
            unit: None,
            data,
        }
    }

    pub fn with_unit(mut self, unit: metrics::Unit) -> Self {
        self.unit = Some(unit);
        self
    }
}

#[derive(Clone, Debug)]
pub enum MetricData {
    Gauge(Vec<NumberDataPoint>),
    Sum(Vec<NumberDataPoint>),
    Histogram(Vec<HistogramDataPoint>),
    ExponentialHistogram(Vec<ExponentialHistogramDataPoint>),
    Summary(Vec<SummaryDataPoint>),
}

impl MetricData {
    pub fn len(&self) -> usize {
        match self {
            MetricData::Gauge(points) | MetricData::Sum(points) => points.len(),
            MetricData::Histogram(points) => points.len(),
            MetricData::ExponentialHistogram(points) => points.len(),
            MetricData::Summary(points) => points.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Clone, Debug, Default)]
pub struct NumberDataPoint {
    pub attributes: Attributes,
    /// Milliseconds since the unix epoch
    pub timestamp: u64,
    pub value: f64,
}

impl NumberDataPoint {
    pub fn new(timestamp: u64, value: f64) -> Self {
        Self {
            attributes: Attributes::new(),
            timestamp,
            value,
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

#[derive(Clone, Debug, Default)]
pub struct HistogramDataPoint {
    pub attributes: Attributes,
    pub timestamp: u64,
    pub count: u64,
    pub sum: f64,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub bucket_counts: Vec<u64>,
    pub explicit_bounds: Vec<f64>,
}

#[derive(Clone, Debug, Default)]
pub struct ExponentialHistogramDataPoint {
    pub attributes: Attributes,
    pub timestamp: u64,
    pub count: u64,
    pub sum: f64,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub scale: i32,
    pub zero_count: u64,
    pub positive: ExponentialBuckets,
    pub negative: ExponentialBuckets,
}

/// Bucket `i` of `bucket_counts` covers `(base^(offset + i), base^(offset + i + 1)]`
/// where `base = 2^(2^-scale)`
#[derive(Clone, Debug, Default)]
pub struct ExponentialBuckets {
    pub offset: i32,
    pub bucket_counts: Vec<u64>,
}

#[derive(Clone, Debug, Default)]
pub struct SummaryDataPoint {
    pub attributes: Attributes,
    pub timestamp: u64,
    pub count: u64,
    pub sum: f64,
    pub quantile_values: Vec<ValueAtQuantile>,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct ValueAtQuantile {
    pub quantile: f64,
    pub value: f64,
}
