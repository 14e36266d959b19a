use super::batch::{Attributes, Metric, MetricBatch, MetricData, NumberDataPoint, ResourceMetrics};
use super::client::{ClientError, LogEvent, LogsService, PutLogEventsRequest, PutLogEventsResponse};
use super::error::PushError;
use super::middleware::{Extension, ExtensionHost, Middleware, RequestHandler, ResponseHandler};
use super::pusher::Pusher;
use super::Error;
use async_trait::async_trait;
use http::StatusCode;
use std::collections::{HashMap, VecDeque};
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tokio_util::sync::CancellationToken;
use tower::util::BoxCloneService;

pub const TIMESTAMP: u64 = 1687657545423;

/// One resource with the given attributes and a gauge per name sharing one data point shape
pub fn generate_test_metrics(names: &[&str], resource_attributes: &[(&str, &str)]) -> MetricBatch {
    let mut resource = ResourceMetrics::new();
    for (key, value) in resource_attributes {
        resource = resource.with_attribute(*key, *value);
    }
    for (i, name) in names.iter().enumerate() {
        resource = resource.with_metric(Metric::new(
            *name,
            MetricData::Gauge(vec![
                NumberDataPoint::new(TIMESTAMP, (i + 1) as f64 * 100.0).with_attribute("label1", "value1")
            ]),
        ));
    }
    MetricBatch::new().with_resource(resource)
}

pub fn parse_event(event: &LogEvent) -> serde_json::Value {
    serde_json::from_slice(&event.message).unwrap()
}

/// Ingestion client answering from a script, `Ok` once the script runs out
#[derive(Clone, Default)]
pub struct ScriptedClient {
    script: Arc<Mutex<VecDeque<Result<PutLogEventsResponse, ClientError>>>>,
    requests: Arc<Mutex<Vec<PutLogEventsRequest>>>,
    failing_streams: Arc<Mutex<HashMap<String, ClientError>>>,
}

impl ScriptedClient {
    pub fn new(script: Vec<Result<PutLogEventsResponse, ClientError>>) -> Self {
        Self {
            script: Arc::new(Mutex::new(script.into())),
            ..Default::default()
        }
    }

    pub fn succeeding() -> Self {
        Self::default()
    }

    /// Every request to `log_stream_name` fails with `err`, ahead of the script
    pub fn fail_stream(self, log_stream_name: &str, err: ClientError) -> Self {
        self.failing_streams.lock().unwrap().insert(log_stream_name.to_string(), err);
        self
    }

    pub fn service(&self) -> LogsService {
        BoxCloneService::new(self.clone())
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<PutLogEventsRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl tower::Service<PutLogEventsRequest> for ScriptedClient {
    type Response = PutLogEventsResponse;
    type Error = ClientError;
    type Future = futures::future::Ready<Result<PutLogEventsResponse, ClientError>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: PutLogEventsRequest) -> Self::Future {
        let failure = self.failing_streams.lock().unwrap().get(&req.log_stream_name).cloned();
        self.requests.lock().unwrap().push(req);
        if let Some(err) = failure {
            return futures::future::ready(Err(err));
        }
        let outcome = self.script.lock().unwrap().pop_front().unwrap_or_else(|| Ok(Default::default()));
        futures::future::ready(outcome)
    }
}

/// Pusher failing the scripted calls, `false` fails that call with a 400
#[derive(Default)]
pub struct ScriptedPusher {
    adds: Mutex<VecDeque<bool>>,
    flushes: Mutex<VecDeque<bool>>,
    added: Mutex<Vec<LogEvent>>,
    flush_count: AtomicUsize,
}

impl ScriptedPusher {
    pub fn new(adds: Vec<bool>, flushes: Vec<bool>) -> Self {
        Self {
            adds: Mutex::new(adds.into()),
            flushes: Mutex::new(flushes.into()),
            ..Default::default()
        }
    }

    pub fn flushes(&self) -> usize {
        self.flush_count.load(Ordering::SeqCst)
    }

    pub fn added(&self) -> usize {
        self.added.lock().unwrap().len()
    }

    fn outcome(script: &Mutex<VecDeque<bool>>) -> Result<(), PushError> {
        match script.lock().unwrap().pop_front() {
            Some(false) => Err(PushError::Rejected(ClientError::new(
                StatusCode::BAD_REQUEST,
                "InvalidParameterException",
                "scripted failure",
            ))),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl Pusher for ScriptedPusher {
    async fn add_log_entry(&self, event: LogEvent, _cancel: &CancellationToken) -> Result<(), PushError> {
        Self::outcome(&self.adds)?;
        self.added.lock().unwrap().push(event);
        Ok(())
    }

    async fn force_flush(&self, _cancel: &CancellationToken) -> Result<(), PushError> {
        self.flush_count.fetch_add(1, Ordering::SeqCst);
        Self::outcome(&self.flushes)
    }
}

/// Handler appending `name:request`, `name:response` or `name:error` to a shared log
pub struct RecordingHandler {
    name: String,
    calls: Arc<Mutex<Vec<String>>>,
    fail: bool,
}

impl RecordingHandler {
    pub fn new(name: &str, calls: Arc<Mutex<Vec<String>>>) -> Self {
        Self {
            name: name.to_string(),
            calls,
            fail: false,
        }
    }

    /// Records like [RecordingHandler::new] and then reports a failure
    pub fn failing(name: &str, calls: Arc<Mutex<Vec<String>>>) -> Self {
        Self {
            fail: true,
            ..Self::new(name, calls)
        }
    }

    fn record(&self, what: &str) -> Result<(), Error> {
        self.calls.lock().unwrap().push(format!("{}:{what}", self.name));
        if self.fail {
            return Err(format!("{} failed", self.name).into());
        }
        Ok(())
    }
}

impl RequestHandler for RecordingHandler {
    fn id(&self) -> &str {
        &self.name
    }

    fn handle_request(&self, _request: &mut PutLogEventsRequest) -> Result<(), Error> {
        self.record("request")
    }
}

impl ResponseHandler for RecordingHandler {
    fn id(&self) -> &str {
        &self.name
    }

    fn handle_response(&self, outcome: &Result<PutLogEventsResponse, ClientError>) -> Result<(), Error> {
        match outcome {
            Ok(_) => self.record("response"),
            Err(_) => self.record("error"),
        }
    }
}

pub struct TestMiddleware {
    handler: Arc<RecordingHandler>,
}

impl TestMiddleware {
    pub fn new(handler: Arc<RecordingHandler>) -> Self {
        Self { handler }
    }
}

impl Middleware for TestMiddleware {
    fn handlers(&self) -> (Vec<Arc<dyn RequestHandler>>, Vec<Arc<dyn ResponseHandler>>) {
        let request: Arc<dyn RequestHandler> = self.handler.clone();
        let response: Arc<dyn ResponseHandler> = self.handler.clone();
        (vec![request], vec![response])
    }
}

impl Extension for TestMiddleware {
    fn as_middleware(&self) -> Option<&dyn Middleware> {
        Some(self)
    }
}

/// Extension without any capability
pub struct PlainExtension;

impl Extension for PlainExtension {}

#[derive(Default)]
pub struct TestHost {
    extensions: HashMap<String, Arc<dyn Extension>>,
}

impl TestHost {
    pub fn with_middleware(id: &str, middleware: TestMiddleware) -> Self {
        let mut host = Self::default();
        host.extensions.insert(id.to_string(), Arc::new(middleware));
        host
    }

    pub fn with_plain_extension(id: &str) -> Self {
        let mut host = Self::default();
        host.extensions.insert(id.to_string(), Arc::new(PlainExtension));
        host
    }
}

impl ExtensionHost for TestHost {
    fn get_extensions(&self) -> HashMap<String, Arc<dyn Extension>> {
        self.extensions.clone()
    }
}

/// Output writer whose contents stay readable after it is moved into the exporter
#[derive(Clone, Default)]
pub struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    pub fn lines(&self) -> Vec<String> {
        let buffer = self.0.lock().unwrap();
        String::from_utf8_lossy(&buffer).lines().map(str::to_string).collect()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Resource attributes of an ECS task
pub fn ecs_attributes() -> Attributes {
    [("aws.ecs.cluster.name", "test-cluster-name"), ("aws.ecs.task.id", "test-task-id")]
        .into_iter()
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::{
        ExponentialBuckets, ExponentialHistogramDataPoint, HistogramDataPoint, SummaryDataPoint, ValueAtQuantile,
    };
    use crate::error::StartupError;
    use crate::resolver::DestinationKey;
    use crate::{Builder, DimensionRollupOption, MetricDeclaration, OutputDestination};
    use tracing_test::traced_test;

    const ECS_LOG_GROUP: &str = "/aws/ecs/containerinsights/{ClusterName}/performance";

    fn builder(client: &ScriptedClient) -> Builder {
        let client = client.clone();
        Builder::new()
            .namespace("namespace")
            .region("us-west-2")
            .max_retries(0)
            .dimension_rollup_option(DimensionRollupOption::NoDimensionRollup)
            .log_group_name("test-logGroupName")
            .log_stream_name("test-logStreamName")
            .client_factory(move |_| Ok(client.service()))
    }

    fn ecs_batch() -> MetricBatch {
        generate_test_metrics(
            &["metric_1", "metric_2"],
            &[("aws.ecs.cluster.name", "test-cluster-name"), ("aws.ecs.task.id", "test-task-id")],
        )
    }

    #[tokio::test]
    async fn ecs_templates_resolve_to_the_task_destination() {
        let client = ScriptedClient::succeeding();
        let exporter = builder(&client)
            .log_group_name(ECS_LOG_GROUP)
            .log_stream_name("{TaskId}")
            .build()
            .unwrap();
        exporter.start(&TestHost::default()).unwrap();

        exporter.push(&ecs_batch(), &CancellationToken::new()).await.unwrap();

        let requests = client.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(
            requests[0].log_group_name,
            "/aws/ecs/containerinsights/test-cluster-name/performance"
        );
        assert_eq!(requests[0].log_stream_name, "test-task-id");
        assert_eq!(requests[0].log_events.len(), 1);
        assert!(exporter.registry().contains(&DestinationKey::new(
            "/aws/ecs/containerinsights/test-cluster-name/performance",
            "test-task-id"
        )));
    }

    #[tokio::test]
    async fn failing_destination_does_not_stop_the_others() {
        let client = ScriptedClient::succeeding().fail_stream(
            "task-b",
            ClientError::new(StatusCode::SERVICE_UNAVAILABLE, "ServiceUnavailableException", "try again"),
        );
        let exporter = builder(&client)
            .log_group_name(ECS_LOG_GROUP)
            .log_stream_name("{TaskId}")
            .build()
            .unwrap();
        exporter.start(&TestHost::default()).unwrap();

        let task = |id: &str| {
            generate_test_metrics(
                &["metric_1"],
                &[("aws.ecs.cluster.name", "test-cluster-name"), ("aws.ecs.task.id", id)],
            )
            .resource_metrics
            .remove(0)
        };
        let batch = MetricBatch::new().with_resource(task("task-a")).with_resource(task("task-b"));

        let err = exporter.push(&batch, &CancellationToken::new()).await.unwrap_err();

        assert_eq!(err.errors().len(), 1);
        assert!(!err.is_permanent());
        let mut streams: Vec<String> = client.requests().into_iter().map(|req| req.log_stream_name).collect();
        streams.sort();
        assert_eq!(streams, vec!["task-a", "task-b"]);
        assert_eq!(exporter.registry().len(), 2);
    }

    #[tokio::test]
    async fn concurrent_pushes_share_one_pusher() {
        let client = ScriptedClient::succeeding();
        let exporter = builder(&client).build().unwrap();
        exporter.start(&TestHost::default()).unwrap();

        let cancel = CancellationToken::new();
        let batch = ecs_batch();
        let (first, second) = tokio::join!(exporter.push(&batch, &cancel), exporter.push(&batch, &cancel));

        first.unwrap();
        second.unwrap();
        assert_eq!(exporter.registry().len(), 1);
        let shipped: usize = client.requests().iter().map(|req| req.log_events.len()).sum();
        assert_eq!(shipped, 2);
    }

    #[tokio::test]
    async fn unknown_placeholder_registers_literal_key_without_sending() {
        let client = ScriptedClient::succeeding();
        let exporter = builder(&client)
            .log_group_name("/aws/ecs/containerinsights/{WrongKey}/performance")
            .log_stream_name("{TaskId}")
            .build()
            .unwrap();
        exporter.start(&TestHost::default()).unwrap();

        let err = exporter
            .push(&ecs_batch(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(err.is_permanent());
        assert!(matches!(err.errors(), [PushError::Resolution(_)]));
        assert_eq!(
            exporter.registry().keys(),
            vec![DestinationKey::new(
                "/aws/ecs/containerinsights/{WrongKey}/performance",
                "{TaskId}"
            )]
        );
        assert_eq!(client.calls(), 0);
    }

    #[tokio::test]
    async fn literal_log_group_and_stream() {
        let client = ScriptedClient::succeeding();
        let exporter = builder(&client).build().unwrap();
        exporter.start(&TestHost::default()).unwrap();

        exporter.push(&ecs_batch(), &CancellationToken::new()).await.unwrap();

        assert_eq!(
            exporter.registry().keys(),
            vec![DestinationKey::new("test-logGroupName", "test-logStreamName")]
        );
        assert_eq!(exporter.config().log_group_name, "test-logGroupName");
        assert_eq!(exporter.config().log_stream_name, "test-logStreamName");
    }

    #[tokio::test]
    async fn pusher_failures_surface_per_push() {
        let client = ScriptedClient::succeeding();
        let exporter = builder(&client).build().unwrap();
        exporter.start(&TestHost::default()).unwrap();

        let pusher = Arc::new(ScriptedPusher::new(vec![false, true, true], vec![false, true]));
        exporter.registry().insert(
            DestinationKey::new("test-logGroupName", "test-logStreamName"),
            pusher.clone(),
        );

        let cancel = CancellationToken::new();
        let batch = ecs_batch();
        let results = [
            exporter.push(&batch, &cancel).await,
            exporter.push(&batch, &cancel).await,
            exporter.push(&batch, &cancel).await,
        ];

        assert!(results[0].is_err());
        assert!(results[1].is_err());
        assert!(results[2].is_ok());
        // The failed add stops the first push before its flush
        assert_eq!(pusher.flushes(), 2);
        assert_eq!(pusher.added(), 2);
        assert_eq!(client.calls(), 0);
    }

    #[tokio::test]
    async fn bad_request_fails_one_push_only() {
        let client = ScriptedClient::new(vec![
            Err(ClientError::new(StatusCode::BAD_REQUEST, "InvalidParameterException", "")),
            Ok(Default::default()),
            Ok(Default::default()),
        ]);
        let exporter = builder(&client).max_retries(1).build().unwrap();
        exporter.start(&TestHost::default()).unwrap();

        let cancel = CancellationToken::new();
        let batch = ecs_batch();
        let first = exporter.push(&batch, &cancel).await;
        let second = exporter.push(&batch, &cancel).await;
        let third = exporter.push(&batch, &cancel).await;

        assert!(first.unwrap_err().is_permanent());
        assert!(second.is_ok());
        assert!(third.is_ok());
        assert_eq!(client.calls(), 3);
    }

    #[tokio::test]
    async fn aggregate_is_permanent_when_any_destination_is() {
        let unavailable = || ClientError::new(StatusCode::SERVICE_UNAVAILABLE, "ServiceUnavailableException", "");
        let client = ScriptedClient::new(vec![Err(unavailable()), Err(unavailable())]);
        let exporter = builder(&client)
            .log_group_name(ECS_LOG_GROUP)
            .log_stream_name("{TaskId}")
            .build()
            .unwrap();
        exporter.start(&TestHost::default()).unwrap();
        let cancel = CancellationToken::new();

        let err = exporter.push(&ecs_batch(), &cancel).await.unwrap_err();
        assert!(!err.is_permanent());

        let orphan = Metric::new("orphan", MetricData::Gauge(vec![NumberDataPoint::new(TIMESTAMP, 1.0)]));
        let batch = ecs_batch().with_resource(ResourceMetrics::new().with_metric(orphan));
        let err = exporter.push(&batch, &cancel).await.unwrap_err();
        assert_eq!(err.errors().len(), 2);
        assert!(err.is_permanent());
        assert!(err.to_string().starts_with("Permanent error: "));
    }

    #[tokio::test]
    async fn middleware_runs_around_every_request() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let handler = Arc::new(RecordingHandler::new("test", calls.clone()));
        let host = TestHost::with_middleware("awsmiddleware/test", TestMiddleware::new(handler));

        let client = ScriptedClient::succeeding();
        let exporter = builder(&client).middleware_id("awsmiddleware/test").build().unwrap();
        exporter.start(&host).unwrap();

        let cancel = CancellationToken::new();
        exporter.push(&ecs_batch(), &cancel).await.unwrap();
        exporter.push(&ecs_batch(), &cancel).await.unwrap();

        assert_eq!(
            *calls.lock().unwrap(),
            vec!["test:request", "test:response", "test:request", "test:response"]
        );
    }

    #[test]
    fn missing_middleware_fails_start() {
        let exporter = builder(&ScriptedClient::succeeding())
            .middleware_id("awsmiddleware/missing")
            .build()
            .unwrap();

        assert!(matches!(
            exporter.start(&TestHost::default()),
            Err(StartupError::MiddlewareNotFound(_))
        ));
        assert!(!exporter.is_client_initialized());
    }

    #[tokio::test]
    async fn start_without_region_fails() {
        let client = ScriptedClient::succeeding();
        let exporter = Builder::new()
            .client_factory(move |_| Ok(client.service()))
            .build()
            .unwrap();

        assert!(matches!(
            exporter.start(&TestHost::default()),
            Err(StartupError::MissingRegion)
        ));
        assert!(!exporter.is_client_initialized());

        let err = exporter
            .push(&ecs_batch(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err.errors(), [PushError::NotRunning]));
    }

    #[test]
    fn failed_start_can_be_retried() {
        let client = ScriptedClient::succeeding();
        let attempts = Arc::new(AtomicUsize::new(0));
        let factory_attempts = attempts.clone();
        let exporter = builder(&client)
            .client_factory(move |settings| {
                assert_eq!(settings.region, "us-west-2");
                match factory_attempts.fetch_add(1, Ordering::SeqCst) {
                    0 => Err("no credentials".into()),
                    _ => Ok(client.service()),
                }
            })
            .build()
            .unwrap();
        let host = TestHost::default();

        assert!(matches!(exporter.start(&host), Err(StartupError::Client(_))));
        assert!(!exporter.is_client_initialized());

        exporter.start(&host).unwrap();
        assert!(exporter.is_client_initialized());
        assert!(matches!(exporter.start(&host), Err(StartupError::AlreadyStarted)));
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn shutdown_rejects_further_pushes() {
        let client = ScriptedClient::succeeding();
        let exporter = builder(&client).build().unwrap();
        exporter.start(&TestHost::default()).unwrap();
        let cancel = CancellationToken::new();

        exporter.push(&ecs_batch(), &cancel).await.unwrap();
        exporter.shutdown(&cancel).await.unwrap();

        let err = exporter.push(&ecs_batch(), &cancel).await.unwrap_err();
        assert!(matches!(err.errors(), [PushError::NotRunning]));
        assert!(matches!(
            exporter.start(&TestHost::default()),
            Err(StartupError::ShutDown)
        ));
        // Entries outlive the shutdown
        assert_eq!(exporter.registry().len(), 1);
    }

    #[tokio::test]
    async fn shutdown_reports_flush_failures() {
        let exporter = builder(&ScriptedClient::succeeding()).build().unwrap();
        exporter.start(&TestHost::default()).unwrap();
        let failing = Arc::new(ScriptedPusher::new(Vec::new(), vec![false]));
        let healthy = Arc::new(ScriptedPusher::default());
        exporter.registry().insert(DestinationKey::new("group", "a"), failing.clone());
        exporter.registry().insert(DestinationKey::new("group", "b"), healthy.clone());

        let err = exporter.shutdown(&CancellationToken::new()).await.unwrap_err();

        assert_eq!(err.errors().len(), 1);
        assert_eq!(failing.flushes(), 1);
        assert_eq!(healthy.flushes(), 1);
        assert!(exporter.shutdown(&CancellationToken::new()).await.is_ok());
    }

    #[tokio::test]
    async fn stdout_mode_needs_no_start() {
        let output = SharedBuffer::default();
        let exporter = Builder::new()
            .namespace("namespace")
            .dimension_rollup_option(DimensionRollupOption::NoDimensionRollup)
            .output_destination(OutputDestination::Stdout)
            .output_writer(output.clone())
            .build()
            .unwrap();

        exporter.push(&ecs_batch(), &CancellationToken::new()).await.unwrap();

        assert_eq!(
            output.lines(),
            vec![
                r#"{"_aws":{"Timestamp":1687657545423,"CloudWatchMetrics":[{"Namespace":"namespace","Dimensions":[["label1"]],"Metrics":[{"Name":"metric_1"},{"Name":"metric_2"}]}]},"label1":"value1","metric_1":100.0,"metric_2":200.0}"#
            ]
        );
        assert!(exporter.registry().is_empty());
        exporter.shutdown(&CancellationToken::new()).await.unwrap();
    }

    #[tokio::test]
    async fn non_finite_values_stay_valid_json() {
        let output = SharedBuffer::default();
        let exporter = Builder::new()
            .output_destination(OutputDestination::Stdout)
            .output_writer(output.clone())
            .build()
            .unwrap();

        let resource = ResourceMetrics::new()
            .with_metric(Metric::new(
                "gauge",
                MetricData::Gauge(vec![NumberDataPoint::new(TIMESTAMP, f64::NAN)]),
            ))
            .with_metric(Metric::new(
                "sum",
                MetricData::Sum(vec![NumberDataPoint::new(TIMESTAMP, f64::NEG_INFINITY)]),
            ))
            .with_metric(Metric::new(
                "histogram",
                MetricData::Histogram(vec![HistogramDataPoint {
                    timestamp: TIMESTAMP,
                    count: 2,
                    sum: f64::INFINITY,
                    min: Some(f64::NAN),
                    bucket_counts: vec![1, 1],
                    explicit_bounds: vec![f64::INFINITY],
                    ..Default::default()
                }]),
            ))
            .with_metric(Metric::new(
                "summary",
                MetricData::Summary(vec![SummaryDataPoint {
                    timestamp: TIMESTAMP,
                    count: 1,
                    sum: f64::NAN,
                    quantile_values: vec![ValueAtQuantile {
                        quantile: 1.0,
                        value: f64::INFINITY,
                    }],
                    ..Default::default()
                }]),
            ))
            .with_metric(Metric::new(
                "exponential",
                MetricData::ExponentialHistogram(vec![ExponentialHistogramDataPoint {
                    timestamp: TIMESTAMP,
                    count: 1,
                    sum: f64::NAN,
                    positive: ExponentialBuckets {
                        offset: 0,
                        bucket_counts: vec![1],
                    },
                    ..Default::default()
                }]),
            ))
            .with_metric(Metric::new(
                "finite",
                MetricData::Gauge(vec![NumberDataPoint::new(TIMESTAMP, 1.0)]),
            ));

        exporter
            .push(&MetricBatch::new().with_resource(resource), &CancellationToken::new())
            .await
            .unwrap();

        let lines = output.lines();
        assert_eq!(lines.len(), 1);
        let document: serde_json::Value = serde_json::from_str(&lines[0]).unwrap();
        assert_eq!(document["gauge"], "NaN");
        assert_eq!(document["sum"], "-Inf");
        assert_eq!(document["histogram"]["Sum"], "+Inf");
        assert_eq!(document["summary"]["Max"], "+Inf");
        assert_eq!(document["exponential"]["Sum"], "NaN");

        let declared: Vec<&str> = document["_aws"]["CloudWatchMetrics"]
            .as_array()
            .unwrap()
            .iter()
            .flat_map(|directive| directive["Metrics"].as_array().unwrap())
            .map(|metric| metric["Name"].as_str().unwrap())
            .collect();
        assert_eq!(declared, vec!["finite"]);
    }

    #[test]
    #[traced_test]
    fn invalid_declarations_are_dropped_at_build() {
        let exporter = Builder::new()
            .region("us-west-2")
            .log_group_name("test-logGroupName")
            .log_stream_name("test-logStreamName")
            .with_metric_declaration(MetricDeclaration::new(["a", "b"]))
            .with_metric_declaration(MetricDeclaration::new(["c", "d"]))
            .with_metric_declaration(MetricDeclaration::new(Vec::<String>::new()))
            .with_metric_declaration(
                MetricDeclaration::new(["a"])
                    .with_dimensions(["foo"])
                    .with_dimensions(["a", "b", "c", "d", "e", "f", "g", "h", "i", "j", "k"]),
            )
            .build()
            .unwrap();

        let declarations = &exporter.config().metric_declarations;
        assert_eq!(declarations.len(), 3);
        assert_eq!(declarations[2].dimensions.len(), 1);

        assert!(logs_contain("the default value for DimensionRollupOption will be changing"));
        assert!(logs_contain("Dropped metric declaration."));
        assert!(logs_contain("invalid metric declaration: no metric name selectors defined"));
        assert!(logs_contain("Dropped dimension set: > 10 dimensions specified."));
        assert!(logs_contain("a,b,c,d,e,f,g,h,i,j,k"));
    }

    #[tokio::test]
    async fn declared_dimensions_follow_resource_destination() {
        let client = ScriptedClient::succeeding();
        let mut attributes = ecs_attributes();
        attributes.insert("service.name".into(), "checkout".into());
        let exporter = builder(&client)
            .log_stream_name("{ServiceName}")
            .with_metric_declaration(MetricDeclaration::new(["metric_.*"]).with_dimensions(["label1"]))
            .build()
            .unwrap();
        exporter.start(&TestHost::default()).unwrap();

        let batch = MetricBatch::new().with_resource(ResourceMetrics {
            resource_attributes: attributes,
            ..ecs_batch().resource_metrics.remove(0)
        });
        exporter.push(&batch, &CancellationToken::new()).await.unwrap();

        let requests = client.requests();
        assert_eq!(requests[0].log_stream_name, "checkout");
        let document = parse_event(&requests[0].log_events[0]);
        assert_eq!(document["_aws"]["CloudWatchMetrics"][0]["Dimensions"], serde_json::json!([["label1"]]));
    }
}
