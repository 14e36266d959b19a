//! # Metric declarations
//!
//! Rules selecting which metrics are published to CloudWatch and under which dimension sets

use super::batch::Attributes;
use regex::Regex;
use serde::Deserialize;
use std::collections::BTreeSet;
use tracing::warn;

/// CloudWatch accepts at most 10 dimensions in a declared dimension set
pub const MAX_DECLARED_DIMENSIONS: usize = 10;

#[derive(Debug, thiserror::Error)]
pub enum DeclarationError {
    #[error("invalid metric declaration: no metric name selectors defined")]
    NoSelectors,
    #[error("invalid metric declaration: invalid metric name selector {selector}: {source}")]
    InvalidSelector {
        selector: String,
        #[source]
        source: regex::Error,
    },
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct MetricDeclaration {
    /// Dimension sets, each a list of attribute names
    pub dimensions: Vec<Vec<String>>,
    /// Regular expressions matched against the whole metric name
    pub metric_name_selectors: Vec<String>,
    #[serde(skip)]
    selectors: Vec<Regex>,
}

impl MetricDeclaration {
    pub fn new<S: Into<String>>(metric_name_selectors: impl IntoIterator<Item = S>) -> Self {
        Self {
            metric_name_selectors: metric_name_selectors.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn with_dimensions<S: Into<String>>(mut self, dimensions: impl IntoIterator<Item = S>) -> Self {
        self.dimensions.push(dimensions.into_iter().map(Into::into).collect());
        self
    }

    /// Compile the selectors and clean up the dimension sets
    ///
    /// Dimension sets with more than [MAX_DECLARED_DIMENSIONS] names are dropped with a warning,
    /// names within a set are sorted and duplicate sets removed
    pub fn init(&mut self) -> Result<(), DeclarationError> {
        if self.metric_name_selectors.is_empty() {
            return Err(DeclarationError::NoSelectors);
        }

        self.selectors = self
            .metric_name_selectors
            .iter()
            .map(|selector| {
                Regex::new(&format!("^(?:{selector})$")).map_err(|source| DeclarationError::InvalidSelector {
                    selector: selector.clone(),
                    source,
                })
            })
            .collect::<Result<_, _>>()?;

        let mut seen = BTreeSet::new();
        let mut dimensions = Vec::with_capacity(self.dimensions.len());
        for set in self.dimensions.drain(..) {
            if set.len() > MAX_DECLARED_DIMENSIONS {
                warn!(
                    dimensions = %set.join(","),
                    "Dropped dimension set: > {MAX_DECLARED_DIMENSIONS} dimensions specified."
                );
                continue;
            }

            let set: Vec<String> = set.into_iter().collect::<BTreeSet<_>>().into_iter().collect();
            if seen.insert(set.clone()) {
                dimensions.push(set);
            }
        }
        self.dimensions = dimensions;

        Ok(())
    }

    pub fn matches(&self, metric_name: &str) -> bool {
        self.selectors.iter().any(|selector| selector.is_match(metric_name))
    }

    /// Dimension sets of this declaration whose names are all present in `attributes`
    pub fn dimensions_for(&self, attributes: &Attributes) -> Vec<Vec<String>> {
        self.dimensions
            .iter()
            .filter(|set| set.iter().all(|name| attributes.contains_key(name)))
            .cloned()
            .collect()
    }
}

/// Initialize every declaration, dropping invalid ones with a warning
pub fn validate(declarations: Vec<MetricDeclaration>) -> Vec<MetricDeclaration> {
    declarations
        .into_iter()
        .filter_map(|mut declaration| match declaration.init() {
            Ok(()) => Some(declaration),
            Err(err) => {
                warn!(error = %err, "Dropped metric declaration.");
                None
            }
        })
        .collect()
}
