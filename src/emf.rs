//! # EMF
//!
//! Helpers for serializing CloudWatch Embedded Metrics via serde_json
//!
//! <https://docs.aws.amazon.com/AmazonCloudWatch/latest/monitoring/CloudWatch_Embedded_Metric_Format_Specification.html>

use serde::Serialize;
use serde_json::value::Value;
use std::collections::BTreeMap;

#[derive(Serialize)]
pub struct EmbeddedMetrics<'a> {
    #[serde(rename = "_aws")]
    pub aws: EmbeddedMetricsAws<'a>,
    #[serde(flatten)]
    pub dimensions: BTreeMap<&'a str, &'a str>,
    #[serde(flatten)]
    pub values: BTreeMap<&'a str, Value>,
}

#[derive(Serialize)]
pub struct EmbeddedMetricsAws<'a> {
    #[serde(rename = "Timestamp")]
    pub timestamp: u64,
    // One directive per distinct set of dimension sets
    #[serde(rename = "CloudWatchMetrics")]
    pub cloudwatch_metrics: Vec<EmbeddedNamespace<'a>>,
}

#[derive(Serialize)]
pub struct EmbeddedNamespace<'a> {
    #[serde(rename = "Namespace")]
    pub namespace: &'a str,
    #[serde(rename = "Dimensions")]
    pub dimensions: Vec<Vec<&'a str>>,
    #[serde(rename = "Metrics")]
    pub metrics: Vec<EmbeddedMetric<'a>>,
}

#[derive(Serialize)]
pub struct EmbeddedMetric<'a> {
    #[serde(rename = "Name")]
    pub name: &'a str,
    #[serde(rename = "Unit")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<&'a str>,
}

/// Convert a metrics::Unit into the cloudwatch string
///
/// <https://docs.aws.amazon.com/AmazonCloudWatch/latest/APIReference/API_MetricDatum.html>
pub fn unit_to_str(unit: &metrics::Unit) -> &'static str {
    match unit {
        metrics::Unit::Count => "Count",
        metrics::Unit::Percent => "Percent",
        metrics::Unit::Seconds => "Seconds",
        metrics::Unit::Milliseconds => "Milliseconds",
        metrics::Unit::Microseconds => "Microseconds",
        metrics::Unit::Nanoseconds => "Nanoseconds",
        metrics::Unit::Tebibytes => "Terabytes",
        metrics::Unit::Gibibytes => "Gigabytes",
        metrics::Unit::Mebibytes => "Megabytes",
        metrics::Unit::Kibibytes => "Kilobytes",
        metrics::Unit::Bytes => "Bytes",
        metrics::Unit::TerabitsPerSecond => "Terabits/Second",
        metrics::Unit::GigabitsPerSecond => "Gigabits/Second",
        metrics::Unit::MegabitsPerSecond => "Megabits/Second",
        metrics::Unit::KilobitsPerSecond => "Kilobits/Second",
        metrics::Unit::BitsPerSecond => "Bits/Second",
        metrics::Unit::CountPerSecond => "Count/Second",
    }
}

/// A metric value ready to be written as a field of an EMF document
#[derive(Clone, Debug, PartialEq)]
pub struct EncodedValue {
    pub value: Value,
    /// False when any number in `value` was NaN or infinite, such values are written as
    /// strings and can not be declared as CloudWatch metrics
    pub finite: bool,
}

/// JSON has no representation for NaN or infinity, those are written as "NaN", "+Inf" and "-Inf"
pub fn encode_number(value: f64) -> Value {
    if value.is_finite() {
        Value::from(value)
    } else if value.is_nan() {
        Value::from("NaN")
    } else if value.is_sign_positive() {
        Value::from("+Inf")
    } else {
        Value::from("-Inf")
    }
}

pub fn single_value(value: f64) -> EncodedValue {
    EncodedValue {
        value: encode_number(value),
        finite: value.is_finite(),
    }
}

/// CloudWatch statistic set
pub fn statistic_set(count: u64, sum: f64, min: f64, max: f64) -> EncodedValue {
    let mut set = serde_json::Map::new();
    set.insert("Count".into(), Value::from(count));
    set.insert("Sum".into(), encode_number(sum));
    set.insert("Min".into(), encode_number(min));
    set.insert("Max".into(), encode_number(max));

    EncodedValue {
        value: Value::Object(set),
        finite: sum.is_finite() && min.is_finite() && max.is_finite(),
    }
}

/// CloudWatch values / counts distribution together with its statistic set
pub fn distribution(values: &[f64], counts: &[u64], count: u64, sum: f64, min: f64, max: f64) -> EncodedValue {
    let EncodedValue { value, finite } = statistic_set(count, sum, min, max);
    let mut set = match value {
        Value::Object(set) => set,
        _ => serde_json::Map::new(),
    };
    set.insert("Values".into(), values.iter().copied().map(encode_number).collect());
    set.insert("Counts".into(), counts.iter().copied().map(Value::from).collect());

    EncodedValue {
        value: Value::Object(set),
        finite: finite && values.iter().all(|value| value.is_finite()),
    }
}
