//! # Translate
//!
//! Turns a [MetricBatch] into EMF log events grouped by destination
//!
//! Data points of one resource sharing a timestamp and attribute set become one EMF document.
//! Values containing NaN or infinity are kept as fields with string encoded numbers (see
//! [emf::encode_number]) but never declared as CloudWatch metrics.

use super::batch::{
    Attributes, ExponentialHistogramDataPoint, HistogramDataPoint, Metric, MetricBatch, MetricData, ResourceMetrics,
    SummaryDataPoint,
};
use super::client::LogEvent;
use super::declaration::MetricDeclaration;
use super::emf::{self, EncodedValue};
use super::error::ResolutionError;
use super::resolver::{self, DestinationKey};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

/// The Embedded Metric Format supports a maximum of 30 dimensions per dimension set
const MAX_DIMENSIONS: usize = 30;

/// The Embedded Metric Format supports a maximum of 100 values per distribution
const MAX_DISTRIBUTION_VALUES: usize = 100;

/// Extra dimension sets published next to the full attribute set when no metric declarations
/// are configured
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
pub enum DimensionRollupOption {
    NoDimensionRollup,
    SingleDimensionRollupOnly,
    #[default]
    ZeroAndSingleDimensionRollup,
}

/// What the translation needs from the exporter configuration
#[derive(Clone, Copy, Debug)]
pub struct Rules<'a> {
    pub namespace: &'a str,
    pub log_group_name: &'a str,
    pub log_stream_name: &'a str,
    pub dimension_rollup_option: DimensionRollupOption,
    pub metric_declarations: &'a [MetricDeclaration],
}

/// Events of a resource whose destination could not be resolved
#[derive(Debug)]
pub struct Unresolved {
    /// The destination as configured, placeholders left in place
    pub key: DestinationKey,
    pub error: ResolutionError,
    pub events: Vec<LogEvent>,
}

#[derive(Debug, Default)]
pub struct Translated {
    pub resolved: BTreeMap<DestinationKey, Vec<LogEvent>>,
    pub unresolved: Vec<Unresolved>,
}

impl Translated {
    /// Every event regardless of destination, in batch order per destination
    pub fn into_events(self) -> impl Iterator<Item = LogEvent> {
        self.resolved
            .into_values()
            .flatten()
            .chain(self.unresolved.into_iter().flat_map(|unresolved| unresolved.events))
    }
}

/// Translate a batch and resolve the destination of each resource
pub fn translate(batch: &MetricBatch, rules: &Rules<'_>) -> Result<Translated, serde_json::Error> {
    let mut translated = Translated::default();

    for resource in &batch.resource_metrics {
        let events = translate_resource(resource, rules)?;
        if events.is_empty() {
            continue;
        }

        match resolver::resolve(rules.log_group_name, rules.log_stream_name, &resource.resource_attributes) {
            Ok(key) => translated.resolved.entry(key).or_default().extend(events),
            Err(error) => {
                warn!(
                    log_group_name = rules.log_group_name,
                    log_stream_name = rules.log_stream_name,
                    "Failed to resolve log destination: {error}"
                );
                translated.unresolved.push(Unresolved {
                    key: DestinationKey::new(rules.log_group_name, rules.log_stream_name),
                    error,
                    events,
                });
            }
        }
    }

    Ok(translated)
}

struct GroupedValue<'a> {
    name: &'a str,
    unit: Option<&'static str>,
    encoded: EncodedValue,
}

/// Translate the metrics of one resource into EMF log events
pub fn translate_resource(resource: &ResourceMetrics, rules: &Rules<'_>) -> Result<Vec<LogEvent>, serde_json::Error> {
    let mut groups: BTreeMap<(u64, &Attributes), BTreeMap<&str, GroupedValue>> = BTreeMap::new();

    for metric in &resource.metrics {
        for (timestamp, attributes, encoded) in encode_metric(metric) {
            let values = groups.entry((timestamp, attributes)).or_default();
            let replaced = values.insert(
                &metric.name,
                GroupedValue {
                    name: &metric.name,
                    unit: metric.unit.as_ref().map(emf::unit_to_str),
                    encoded,
                },
            );
            if replaced.is_some() {
                debug!(metric = %metric.name, timestamp, "Duplicate data point replaced");
            }
        }
    }

    groups
        .into_iter()
        .map(|((timestamp, attributes), values)| build_event(timestamp, attributes, values, rules))
        .collect()
}

fn build_event(
    timestamp: u64,
    attributes: &Attributes,
    values: BTreeMap<&str, GroupedValue>,
    rules: &Rules<'_>,
) -> Result<LogEvent, serde_json::Error> {
    let timestamp = if timestamp == 0 { now_millis() } else { timestamp };

    // Metrics sharing the same dimension sets share one directive
    let mut directives: BTreeMap<Vec<Vec<&str>>, Vec<emf::EmbeddedMetric>> = BTreeMap::new();
    for value in values.values() {
        if !value.encoded.finite {
            debug!(metric = value.name, "Non-finite value written as a field only");
            continue;
        }
        let dimensions = dimension_sets(value.name, attributes, rules);
        if dimensions.is_empty() {
            continue;
        }
        directives.entry(dimensions).or_default().push(emf::EmbeddedMetric {
            name: value.name,
            unit: value.unit,
        });
    }

    let document = emf::EmbeddedMetrics {
        aws: emf::EmbeddedMetricsAws {
            timestamp,
            cloudwatch_metrics: directives
                .into_iter()
                .map(|(dimensions, metrics)| emf::EmbeddedNamespace {
                    namespace: rules.namespace,
                    dimensions,
                    metrics,
                })
                .collect(),
        },
        dimensions: attributes
            .iter()
            .filter(|(name, _)| !values.contains_key(name.as_str()))
            .map(|(name, value)| (name.as_str(), value.as_str()))
            .collect(),
        values: values
            .iter()
            .map(|(name, value)| (*name, value.encoded.value.clone()))
            .collect(),
    };

    Ok(LogEvent::new(timestamp, serde_json::to_vec(&document)?))
}

/// Dimension sets `metric_name` is published under, empty when it is not published
fn dimension_sets<'a>(metric_name: &str, attributes: &'a Attributes, rules: &Rules<'_>) -> Vec<Vec<&'a str>> {
    let mut sets: Vec<Vec<&'a str>> = Vec::new();
    let mut add = |set: Vec<&'a str>| {
        if !sets.contains(&set) {
            sets.push(set);
        }
    };

    if !rules.metric_declarations.is_empty() {
        for declaration in rules.metric_declarations.iter().filter(|d| d.matches(metric_name)) {
            for set in declaration.dimensions_for(attributes) {
                // Names resolve to the attribute keys so the borrow outlives the declaration copy
                let set = set
                    .iter()
                    .filter_map(|name| attributes.get_key_value(name).map(|(key, _)| key.as_str()))
                    .collect();
                add(set);
            }
        }
        return sets;
    }

    let names: Vec<&'a str> = attributes.keys().map(String::as_str).collect();
    if names.len() > MAX_DIMENSIONS {
        warn!(
            metric = metric_name,
            count = names.len(),
            "More than {MAX_DIMENSIONS} attributes, only the first {MAX_DIMENSIONS} become dimensions"
        );
    }
    add(names.iter().copied().take(MAX_DIMENSIONS).collect());

    match rules.dimension_rollup_option {
        DimensionRollupOption::NoDimensionRollup => {}
        DimensionRollupOption::SingleDimensionRollupOnly => names.iter().for_each(|name| add(vec![*name])),
        DimensionRollupOption::ZeroAndSingleDimensionRollup => {
            add(Vec::new());
            names.iter().for_each(|name| add(vec![*name]));
        }
    }

    sets
}

/// (timestamp, data point attributes, value) for every data point of a metric
fn encode_metric(metric: &Metric) -> Vec<(u64, &Attributes, EncodedValue)> {
    match &metric.data {
        MetricData::Gauge(points) | MetricData::Sum(points) => points
            .iter()
            .map(|point| (point.timestamp, &point.attributes, emf::single_value(point.value)))
            .collect(),
        MetricData::Histogram(points) => points
            .iter()
            .map(|point| (point.timestamp, &point.attributes, encode_histogram(point)))
            .collect(),
        MetricData::ExponentialHistogram(points) => points
            .iter()
            .map(|point| (point.timestamp, &point.attributes, encode_exponential_histogram(point)))
            .collect(),
        MetricData::Summary(points) => points
            .iter()
            .map(|point| (point.timestamp, &point.attributes, encode_summary(point)))
            .collect(),
    }
}

fn encode_histogram(point: &HistogramDataPoint) -> EncodedValue {
    let (estimated_min, estimated_max) = histogram_bounds(point);
    emf::statistic_set(
        point.count,
        point.sum,
        point.min.unwrap_or(estimated_min),
        point.max.unwrap_or(estimated_max),
    )
}

/// Estimate min / max from the lowest and highest populated buckets
fn histogram_bounds(point: &HistogramDataPoint) -> (f64, f64) {
    let mean = if point.count > 0 { point.sum / point.count as f64 } else { 0.0 };
    let bounds = &point.explicit_bounds;
    let populated = || point.bucket_counts.iter().enumerate().filter(|(_, count)| **count > 0);

    let min = match populated().next() {
        Some((0, _)) => bounds.first().copied().unwrap_or(mean).min(mean),
        Some((index, _)) => bounds.get(index - 1).copied().unwrap_or(mean),
        None => mean,
    };
    let max = match populated().last() {
        Some((index, _)) if index < bounds.len() => bounds[index],
        Some(_) => bounds.last().copied().unwrap_or(mean).max(mean),
        None => mean,
    };

    (min, max)
}

fn encode_summary(point: &SummaryDataPoint) -> EncodedValue {
    let quantile = |q: f64| {
        point
            .quantile_values
            .iter()
            .find(|value| value.quantile == q)
            .map(|value| value.value)
    };
    let lowest = point.quantile_values.iter().map(|value| value.value).reduce(f64::min);
    let highest = point.quantile_values.iter().map(|value| value.value).reduce(f64::max);

    emf::statistic_set(
        point.count,
        point.sum,
        quantile(0.0).or(lowest).unwrap_or(0.0),
        quantile(1.0).or(highest).unwrap_or(0.0),
    )
}

fn encode_exponential_histogram(point: &ExponentialHistogramDataPoint) -> EncodedValue {
    let mut scale = point.scale;
    let mut positive = populated_buckets(point.positive.offset, &point.positive.bucket_counts);
    let mut negative = populated_buckets(point.negative.offset, &point.negative.bucket_counts);
    let zero = usize::from(point.zero_count > 0);

    // Halve the resolution until the buckets fit into one distribution
    while positive.len() + negative.len() + zero > MAX_DISTRIBUTION_VALUES {
        scale -= 1;
        positive = downscale(positive);
        negative = downscale(negative);
    }

    let base = 2f64.powf(2f64.powi(-scale));
    let midpoint = |index: i64| {
        let lower = base.powf(index as f64);
        let upper = base.powf((index + 1) as f64);
        (lower + upper) / 2.0
    };

    let mut values = Vec::with_capacity(positive.len() + negative.len() + zero);
    let mut counts = Vec::with_capacity(values.capacity());
    for (index, count) in positive.iter().rev() {
        values.push(midpoint(*index));
        counts.push(*count);
    }
    if point.zero_count > 0 {
        values.push(0.0);
        counts.push(point.zero_count);
    }
    for (index, count) in &negative {
        values.push(-midpoint(*index));
        counts.push(*count);
    }

    let min = point.min.or_else(|| values.iter().copied().reduce(f64::min)).unwrap_or(0.0);
    let max = point.max.or_else(|| values.iter().copied().reduce(f64::max)).unwrap_or(0.0);

    emf::distribution(&values, &counts, point.count, point.sum, min, max)
}

fn populated_buckets(offset: i32, bucket_counts: &[u64]) -> Vec<(i64, u64)> {
    bucket_counts
        .iter()
        .enumerate()
        .filter(|(_, count)| **count > 0)
        .map(|(i, count)| (i64::from(offset) + i as i64, *count))
        .collect()
}

fn downscale(buckets: Vec<(i64, u64)>) -> Vec<(i64, u64)> {
    let mut merged: Vec<(i64, u64)> = Vec::with_capacity(buckets.len() / 2 + 1);
    for (index, count) in buckets {
        let index = index.div_euclid(2);
        match merged.last_mut() {
            Some((last, total)) if *last == index => *total += count,
            _ => merged.push((index, count)),
        }
    }
    merged
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or_default()
}
