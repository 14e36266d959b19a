//! # Middleware
//!
//! Request / response interceptors run around every call to the ingestion client
//!
//! Handlers come from an [Extension] looked up once by id on the [ExtensionHost] during
//! [Exporter::start](super::Exporter::start). The chain wraps the client as a [tower::Layer],
//! request handlers run before the inner call and response handlers once it resolves, both in
//! registration order. Handlers are best effort instrumentation: a failing handler is logged
//! and otherwise ignored.

use super::client::{ClientError, PutLogEventsRequest, PutLogEventsResponse};
use super::error::StartupError;
use super::Error;
use pin_project::pin_project;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tracing::warn;

pub trait RequestHandler: Send + Sync {
    fn id(&self) -> &str;

    fn handle_request(&self, request: &mut PutLogEventsRequest) -> Result<(), Error>;
}

pub trait ResponseHandler: Send + Sync {
    fn id(&self) -> &str;

    fn handle_response(&self, outcome: &Result<PutLogEventsResponse, ClientError>) -> Result<(), Error>;
}

/// Capability of an extension that contributes handlers
pub trait Middleware: Send + Sync {
    fn handlers(&self) -> (Vec<Arc<dyn RequestHandler>>, Vec<Arc<dyn ResponseHandler>>);
}

/// A component registered with the host
pub trait Extension: Send + Sync {
    /// `Some` when this extension provides middleware
    fn as_middleware(&self) -> Option<&dyn Middleware> {
        None
    }
}

/// The process hosting the exporter
pub trait ExtensionHost {
    fn get_extensions(&self) -> HashMap<String, Arc<dyn Extension>>;
}

/// Ordered request and response handlers
#[derive(Clone, Default)]
pub struct MiddlewareChain {
    request_handlers: Vec<Arc<dyn RequestHandler>>,
    response_handlers: Vec<Arc<dyn ResponseHandler>>,
}

impl MiddlewareChain {
    pub fn new() -> Self {
        Default::default()
    }

    /// Look up the middleware extension `id` on the host
    ///
    /// An absent id or an extension without the middleware capability fails the start
    pub fn from_host(host: &dyn ExtensionHost, id: &str) -> Result<Self, StartupError> {
        let extensions = host.get_extensions();
        let extension = extensions
            .get(id)
            .ok_or_else(|| StartupError::MiddlewareNotFound(id.to_string()))?;
        let middleware = extension
            .as_middleware()
            .ok_or_else(|| StartupError::NotMiddleware(id.to_string()))?;

        let mut chain = Self::new();
        let (request_handlers, response_handlers) = middleware.handlers();
        for handler in request_handlers {
            chain.register_handler(Some(handler), None);
        }
        for handler in response_handlers {
            chain.register_handler(None, Some(handler));
        }
        Ok(chain)
    }

    pub fn register_handler(
        &mut self,
        request_handler: Option<Arc<dyn RequestHandler>>,
        response_handler: Option<Arc<dyn ResponseHandler>>,
    ) -> &mut Self {
        if let Some(handler) = request_handler {
            self.request_handlers.push(handler);
        }
        if let Some(handler) = response_handler {
            self.response_handlers.push(handler);
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.request_handlers.is_empty() && self.response_handlers.is_empty()
    }

    fn handle_request(&self, request: &mut PutLogEventsRequest) {
        for handler in &self.request_handlers {
            if let Err(err) = handler.handle_request(request) {
                warn!(handler = handler.id(), "request handler failed: {err}");
            }
        }
    }

    fn handle_response(&self, outcome: &Result<PutLogEventsResponse, ClientError>) {
        for handler in &self.response_handlers {
            if let Err(err) = handler.handle_response(outcome) {
                warn!(handler = handler.id(), "response handler failed: {err}");
            }
        }
    }
}

impl<S> tower::Layer<S> for MiddlewareChain {
    type Service = MiddlewareService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        MiddlewareService {
            chain: Arc::new(self.clone()),
            inner,
        }
    }
}

/// [tower::Service] running a [MiddlewareChain] around an inner ingestion client
#[derive(Clone)]
pub struct MiddlewareService<S> {
    chain: Arc<MiddlewareChain>,
    inner: S,
}

impl<S> tower::Service<PutLogEventsRequest> for MiddlewareService<S>
where
    S: tower::Service<PutLogEventsRequest, Response = PutLogEventsResponse, Error = ClientError>,
{
    type Response = PutLogEventsResponse;
    type Error = ClientError;
    type Future = MiddlewareFuture<S::Future>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: PutLogEventsRequest) -> Self::Future {
        self.chain.handle_request(&mut req);

        // Wrap the inner Future so the response handlers see the outcome
        MiddlewareFuture {
            chain: self.chain.clone(),
            inner: self.inner.call(req),
        }
    }
}

#[pin_project]
#[doc(hidden)]
pub struct MiddlewareFuture<F> {
    chain: Arc<MiddlewareChain>,
    #[pin]
    inner: F,
}

impl<F> Future for MiddlewareFuture<F>
where
    F: Future<Output = Result<PutLogEventsResponse, ClientError>>,
{
    type Output = F::Output;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();

        if let Poll::Ready(result) = this.inner.poll(cx) {
            this.chain.handle_response(&result);
            return Poll::Ready(result);
        }

        Poll::Pending
    }
}
