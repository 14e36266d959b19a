//! Pushes dimensional metric batches to CloudWatch Logs as Embedded Metric Format events
//!
//! Log group and log stream names are templates filled from resource attributes, each resolved
//! destination gets its own batching [pusher::LogPusher] with bounded retries. Errors carry a
//! permanent / transient tag so the caller's own retry layer knows what to give up on.

pub type Error = Box<dyn std::error::Error + Send + Sync + 'static>;

pub use {
    batch::MetricBatch,
    builder::{Builder, Config, OutputDestination},
    declaration::MetricDeclaration,
    error::{ExportError, Permanence, PushError, StartupError},
    exporter::Exporter,
    translate::DimensionRollupOption,
};

pub mod batch;
mod builder;
pub mod client;
pub mod declaration;
mod emf;
pub mod error;
mod exporter;
pub mod middleware;
pub mod pusher;
pub mod registry;
pub mod resolver;
mod translate;
#[cfg(test)]
mod test;
