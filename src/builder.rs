use super::client::{ClientFactory, ClientSettings, LogsService};
use super::declaration::{self, MetricDeclaration};
use super::exporter::Exporter;
use super::pusher::RetryPolicy;
use super::resolver;
use super::translate::DimensionRollupOption;
use super::Error;
use serde::Deserialize;
use std::io::Write;
use std::time::Duration;
use tracing::warn;

/// Where the EMF log events go
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputDestination {
    /// PutLogEvents through the client built at [Exporter::start]
    #[default]
    CloudWatch,
    /// One JSON line per event on the output writer
    Stdout,
}

/// Exporter configuration, deserializable from the host's config file
///
/// Every field has a default so partial documents are accepted
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    pub namespace: String,
    /// Required to start in [OutputDestination::CloudWatch] mode
    pub region: Option<String>,
    pub max_retries: usize,
    /// Delay before the first retry in milliseconds
    pub retry_backoff: u64,
    /// Upper bound of the retry delay in milliseconds
    pub max_retry_backoff: u64,
    /// May contain `{Placeholder}`s filled from resource attributes
    pub log_group_name: String,
    /// May contain `{Placeholder}`s filled from resource attributes
    pub log_stream_name: String,
    pub output_destination: OutputDestination,
    pub dimension_rollup_option: DimensionRollupOption,
    pub metric_declarations: Vec<MetricDeclaration>,
    /// Id of the host extension providing request / response handlers
    pub middleware_id: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        let retry = RetryPolicy::default();
        Self {
            namespace: "default".into(),
            region: None,
            max_retries: retry.max_retries,
            retry_backoff: retry.backoff.as_millis() as u64,
            max_retry_backoff: retry.max_backoff.as_millis() as u64,
            log_group_name: "/metrics/default".into(),
            log_stream_name: "otel-stream".into(),
            output_destination: OutputDestination::default(),
            dimension_rollup_option: DimensionRollupOption::default(),
            metric_declarations: Vec::new(),
            middleware_id: None,
        }
    }
}

impl Config {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            backoff: Duration::from_millis(self.retry_backoff),
            max_backoff: Duration::from_millis(self.max_retry_backoff),
        }
    }
}

/// Builder for the CloudWatch EMF Exporter
///
/// # Example
/// ```
///  let exporter = cloudwatch_emf_exporter::Builder::new()
///      .namespace("MyApplication")
///      .log_group_name("/aws/ecs/containerinsights/{ClusterName}/performance")
///      .log_stream_name("{TaskId}")
///      .output_destination(cloudwatch_emf_exporter::OutputDestination::Stdout)
///      .build()
///      .unwrap();
/// ```
pub struct Builder {
    config: Config,
    client_factory: Option<ClientFactory>,
    output_writer: Option<Box<dyn Write + Send>>,
}

impl Builder {
    pub fn new() -> Self {
        Builder {
            config: Default::default(),
            client_factory: None,
            output_writer: None,
        }
    }

    /// Replaces every option with a deserialized [Config]
    pub fn with_config(self, config: Config) -> Self {
        Self { config, ..self }
    }

    /// Sets the CloudWatch namespace for all metrics
    /// * Must not be empty or build() will return Err("namespace missing")
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.config.namespace = namespace.into();
        self
    }

    pub fn region(mut self, region: impl Into<String>) -> Self {
        self.config.region = Some(region.into());
        self
    }

    /// Retries of a failed send after the first attempt, 0 disables retrying
    pub fn max_retries(mut self, max_retries: usize) -> Self {
        self.config.max_retries = max_retries;
        self
    }

    /// Delay before the first retry, doubled for every further retry up to `max_backoff`
    pub fn retry_backoff(mut self, backoff: Duration, max_backoff: Duration) -> Self {
        self.config.retry_backoff = backoff.as_millis() as u64;
        self.config.max_retry_backoff = max_backoff.as_millis() as u64;
        self
    }

    /// Log group template, e.g. `/aws/ecs/containerinsights/{ClusterName}/performance`
    pub fn log_group_name(mut self, log_group_name: impl Into<String>) -> Self {
        self.config.log_group_name = log_group_name.into();
        self
    }

    /// Log stream template, e.g. `{TaskId}`
    pub fn log_stream_name(mut self, log_stream_name: impl Into<String>) -> Self {
        self.config.log_stream_name = log_stream_name.into();
        self
    }

    pub fn output_destination(mut self, output_destination: OutputDestination) -> Self {
        self.config.output_destination = output_destination;
        self
    }

    pub fn dimension_rollup_option(mut self, option: DimensionRollupOption) -> Self {
        self.config.dimension_rollup_option = option;
        self
    }

    /// Adds a metric declaration
    /// * This method can be called multiple times
    /// * Once any declaration is set only declared metrics are published as CloudWatch metrics
    pub fn with_metric_declaration(mut self, declaration: MetricDeclaration) -> Self {
        self.config.metric_declarations.push(declaration);
        self
    }

    /// Id of the middleware extension looked up on the host at start
    pub fn middleware_id(mut self, id: impl Into<String>) -> Self {
        self.config.middleware_id = Some(id.into());
        self
    }

    /// Constructs the ingestion client at start, required for [OutputDestination::CloudWatch]
    pub fn client_factory<F>(mut self, factory: F) -> Self
    where
        F: Fn(&ClientSettings) -> Result<LogsService, Error> + Send + Sync + 'static,
    {
        self.client_factory = Some(Box::new(factory));
        self
    }

    /// Writer for [OutputDestination::Stdout], defaults to stdout
    pub fn output_writer(mut self, writer: impl Write + Send + 'static) -> Self {
        self.output_writer = Some(Box::new(writer));
        self
    }

    /// Validate the configuration and create the exporter
    ///
    /// Invalid metric declarations and dimension sets are dropped with a warning, they never
    /// fail the build
    pub fn build(self) -> Result<Exporter, Error> {
        let mut config = self.config;
        if config.namespace.is_empty() {
            return Err("namespace missing".into());
        }
        if config.log_group_name.is_empty() || config.log_stream_name.is_empty() {
            return Err("log_group_name and log_stream_name must not be empty".into());
        }

        if config.dimension_rollup_option == DimensionRollupOption::ZeroAndSingleDimensionRollup {
            warn!(
                "the default value for DimensionRollupOption will be changing to NoDimensionRollup in a future \
                 release. See https://github.com/open-telemetry/opentelemetry-collector-contrib/issues/23997 for \
                 more information"
            );
        }

        config.metric_declarations = declaration::validate(std::mem::take(&mut config.metric_declarations));

        for template in [&config.log_group_name, &config.log_stream_name] {
            for placeholder in resolver::unknown_placeholders(template) {
                warn!(template = %template, placeholder = %placeholder, "Unknown placeholder in log destination");
            }
        }

        let writer = self.output_writer.unwrap_or_else(|| Box::new(std::io::stdout()));

        Ok(Exporter::new(config, self.client_factory, writer))
    }
}

impl Default for Builder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[test]
    fn config_defaults() {
        let config: Config = serde_json::from_str("{}").unwrap();

        assert_eq!(config.namespace, "default");
        assert_eq!(config.region, None);
        assert_eq!(config.log_group_name, "/metrics/default");
        assert_eq!(config.log_stream_name, "otel-stream");
        assert_eq!(config.output_destination, OutputDestination::CloudWatch);
        assert_eq!(
            config.dimension_rollup_option,
            DimensionRollupOption::ZeroAndSingleDimensionRollup
        );
        assert_eq!(config.retry_policy(), RetryPolicy::default());
    }

    #[test]
    fn config_from_document() {
        let config: Config = serde_json::from_str(
            r#"{
                "namespace": "ContainerInsights",
                "region": "us-west-2",
                "max_retries": 5,
                "retry_backoff": 50,
                "log_group_name": "/aws/ecs/containerinsights/{ClusterName}/performance",
                "log_stream_name": "{TaskId}",
                "output_destination": "stdout",
                "dimension_rollup_option": "NoDimensionRollup",
                "metric_declarations": [{"metric_name_selectors": ["^cpu_"], "dimensions": [["ClusterName"]]}],
                "middleware_id": "awsmiddleware/test"
            }"#,
        )
        .unwrap();

        assert_eq!(config.region.as_deref(), Some("us-west-2"));
        assert_eq!(config.output_destination, OutputDestination::Stdout);
        assert_eq!(config.dimension_rollup_option, DimensionRollupOption::NoDimensionRollup);
        assert_eq!(config.metric_declarations.len(), 1);
        assert_eq!(config.middleware_id.as_deref(), Some("awsmiddleware/test"));

        let retry = config.retry_policy();
        assert_eq!(retry.max_retries, 5);
        assert_eq!(retry.backoff, Duration::from_millis(50));
        assert_eq!(retry.max_backoff, Duration::from_secs(10));
    }

    #[test]
    fn empty_namespace_fails() {
        assert!(Builder::new().namespace("").build().is_err());
    }

    #[test]
    #[traced_test]
    fn default_rollup_is_deprecated() {
        Builder::new().build().unwrap();
        assert!(logs_contain("the default value for DimensionRollupOption will be changing"));
    }

    #[test]
    #[traced_test]
    fn unknown_placeholders_warn() {
        Builder::new()
            .dimension_rollup_option(DimensionRollupOption::NoDimensionRollup)
            .log_group_name("/aws/{WrongKey}")
            .build()
            .unwrap();

        assert!(logs_contain("Unknown placeholder in log destination"));
        assert!(logs_contain("WrongKey"));
        assert!(!logs_contain("DimensionRollupOption"));
    }
}
