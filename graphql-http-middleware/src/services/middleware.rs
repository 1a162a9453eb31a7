//! The middleware contract: given a request, produce a response.
use std::convert::Infallible;
use std::sync::Arc;
use std::task::Poll;

use axum::body::Body as AxumBody;
use bytes::Bytes;
use futures::future::BoxFuture;
use http::request::Parts;
use http_body::Body;
use static_assertions::assert_impl_all;
use tower::BoxError;
use tower::Service;
use tracing::Instrument;

use crate::configuration::ConfigurationSource;
use crate::configuration::ResolvedConfiguration;
use crate::error::HttpError;
use crate::reporting::ErrorReporter;
use crate::reporting::TracingErrorReporter;
use crate::services::body::decode_request;
use crate::services::body::DEFAULT_MAX_REQUEST_BYTES;
use crate::services::execution;
use crate::services::executor::Executor;
use crate::services::executor::RootValueExecutor;
use crate::services::parameters::url_parameters;
use crate::services::parameters::Parameters;
use crate::services::render::render;
use crate::services::render::Payload;
use crate::services::render::RenderMode;

/// Which of the two endpoints a request was sent to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Endpoint {
    /// Always answers with JSON.
    Json,
    /// Answers with the interactive HTML page, unless the request asks for `raw` output or the
    /// configuration disables the page.
    GraphiQL,
}

impl Endpoint {
    fn render_mode(
        self,
        configuration: Option<&ResolvedConfiguration>,
        parameters: Option<&Parameters>,
    ) -> RenderMode {
        let graphiql = configuration.map_or(true, |configuration| configuration.graphiql);
        let raw = parameters.is_some_and(|parameters| parameters.raw);
        match self {
            Endpoint::GraphiQL if graphiql && !raw => RenderMode::Html,
            _ => RenderMode::Json,
        }
    }
}

/// Runs the whole request pipeline: configuration, parameters, execution, rendering.
#[derive(Clone)]
pub struct GraphQLHandler {
    configuration: ConfigurationSource,
    executor: Arc<dyn Executor>,
    reporter: Arc<dyn ErrorReporter>,
    max_request_bytes: usize,
}

#[buildstructor::buildstructor]
impl GraphQLHandler {
    /// `executor` defaults to [`RootValueExecutor`] and `reporter` to [`TracingErrorReporter`].
    /// Bodies larger than `max_request_bytes` are refused with a 413.
    #[builder(visibility = "pub")]
    fn new(
        configuration: ConfigurationSource,
        executor: Option<Arc<dyn Executor>>,
        reporter: Option<Arc<dyn ErrorReporter>>,
        max_request_bytes: Option<usize>,
    ) -> Self {
        Self {
            configuration,
            executor: executor.unwrap_or_else(|| Arc::new(RootValueExecutor)),
            reporter: reporter.unwrap_or_else(|| Arc::new(TracingErrorReporter)),
            max_request_bytes: max_request_bytes.unwrap_or(DEFAULT_MAX_REQUEST_BYTES),
        }
    }

    /// A [`Service`] answering for `endpoint`.
    pub fn service(&self, endpoint: Endpoint) -> GraphQLService {
        GraphQLService {
            handler: self.clone(),
            endpoint,
        }
    }

    /// Answer `request` as `endpoint` would. Failures are rendered, never returned.
    pub async fn handle<B>(
        &self,
        endpoint: Endpoint,
        request: http::Request<B>,
    ) -> http::Response<AxumBody>
    where
        B: Body<Data = Bytes>,
        B::Error: Into<BoxError>,
    {
        let (parts, body) = request.into_parts();
        let span = tracing::debug_span!(
            "graphql_request",
            endpoint = ?endpoint,
            method = %parts.method,
            path = %parts.uri.path(),
        );
        self.handle_parts(endpoint, Arc::new(parts), body)
            .instrument(span)
            .await
    }

    async fn handle_parts<B>(
        &self,
        endpoint: Endpoint,
        parts: Arc<Parts>,
        body: B,
    ) -> http::Response<AxumBody>
    where
        B: Body<Data = Bytes>,
        B::Error: Into<BoxError>,
    {
        let configuration = match self.configuration.resolve(&parts).await {
            Ok(configuration) => configuration,
            Err(error) => return self.respond(endpoint, Err(error.into()), None, None),
        };
        let parameters = match read_parameters(&parts, body, self.max_request_bytes).await {
            Ok(parameters) => parameters,
            Err(error) => return self.respond(endpoint, Err(error), Some(&configuration), None),
        };
        tracing::debug!(
            operation_name = parameters.operation_name.as_deref(),
            raw = parameters.raw,
            "parameters resolved"
        );

        let outcome =
            execution::execute(&configuration, &*self.executor, &parts, &parameters).await;
        self.respond(endpoint, outcome, Some(&configuration), Some(&parameters))
    }

    fn respond(
        &self,
        endpoint: Endpoint,
        outcome: Result<crate::graphql::Response, HttpError>,
        configuration: Option<&ResolvedConfiguration>,
        parameters: Option<&Parameters>,
    ) -> http::Response<AxumBody> {
        let mode = endpoint.render_mode(configuration, parameters);
        let payload = Payload::new(outcome, mode, configuration, &*self.reporter);
        render(payload, mode, configuration, parameters)
    }
}

async fn read_parameters<B>(
    parts: &Parts,
    body: B,
    max_request_bytes: usize,
) -> Result<Parameters, HttpError>
where
    B: Body<Data = Bytes>,
    B::Error: Into<BoxError>,
{
    let url = url_parameters(parts.uri.query())?;
    let body = decode_request(parts, body, max_request_bytes).await?;
    Ok(Parameters::resolve(&url, &body)?)
}

/// One endpoint of a [`GraphQLHandler`] as a tower service.
#[derive(Clone)]
pub struct GraphQLService {
    handler: GraphQLHandler,
    endpoint: Endpoint,
}

assert_impl_all!(GraphQLService: Send, Sync, Clone);

impl<B> Service<http::Request<B>> for GraphQLService
where
    B: Body<Data = Bytes> + Send + 'static,
    B::Error: Into<BoxError>,
{
    type Response = http::Response<AxumBody>;
    type Error = Infallible;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut std::task::Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: http::Request<B>) -> Self::Future {
        let handler = self.handler.clone();
        let endpoint = self.endpoint;
        Box::pin(async move { Ok(handler.handle(endpoint, request).await) })
    }
}
