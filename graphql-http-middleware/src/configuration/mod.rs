//! Per-request configuration of the middleware.
//!
//! A [`ConfigurationSource`] is either a fixed [`Configuration`] or a function of the inbound
//! request. Either way it is resolved once per request into a [`ResolvedConfiguration`].
pub mod server;

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use apollo_compiler::validation::Valid;
use apollo_compiler::ExecutableDocument;
use apollo_compiler::Schema;
use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use http::request::Parts;
use serde_json_bytes::json;
use tower::BoxError;

use crate::context::Context;
use crate::error::ServerError;
use crate::graphql;
use crate::json_ext::Object;
use crate::json_ext::Value;

pub(crate) const MISSING_SCHEMA_MESSAGE: &str =
    "GraphQL middleware configuration must contain a schema.";
pub(crate) const NOT_A_CONFIGURATION_MESSAGE: &str =
    "GraphQL middleware configuration function must return a configuration.";

/// Turns an error into the value placed in the response's `errors` list.
pub type FormatError = Arc<dyn Fn(&graphql::Error) -> Value + Send + Sync>;

/// The default error formatter: `{message, locations?, path?, extensions?}`.
pub fn default_format_error(error: &graphql::Error) -> Value {
    serde_json_bytes::to_value(error).unwrap_or_else(|_| json!({ "message": error.message }))
}

/// A validation rule run in addition to the engine's own rules.
///
/// Any `Fn(&Valid<Schema>, &ExecutableDocument) -> Vec<graphql::Error>` is a rule.
pub trait ValidationRule: Send + Sync + 'static {
    fn validate(&self, schema: &Valid<Schema>, document: &ExecutableDocument)
        -> Vec<graphql::Error>;
}

impl<F> ValidationRule for F
where
    F: Fn(&Valid<Schema>, &ExecutableDocument) -> Vec<graphql::Error> + Send + Sync + 'static,
{
    fn validate(
        &self,
        schema: &Valid<Schema>,
        document: &ExecutableDocument,
    ) -> Vec<graphql::Error> {
        self(schema, document)
    }
}

/// What the extensions hook is given once the result is known.
#[derive(Clone, Copy, Debug)]
pub struct RequestInfo<'a> {
    pub document: &'a Valid<ExecutableDocument>,
    pub variables: &'a Object,
    pub operation_name: Option<&'a str>,
    pub result: &'a graphql::Response,
}

/// Computes the `extensions` of a response.
///
/// Only object values are attached. An error turns the whole response into a server error.
#[async_trait]
pub trait ExtensionsHook: Send + Sync + 'static {
    async fn extensions(&self, info: RequestInfo<'_>) -> Result<Value, BoxError>;
}

#[async_trait]
impl<F> ExtensionsHook for F
where
    F: for<'a> Fn(&RequestInfo<'a>) -> Result<Value, BoxError> + Send + Sync + 'static,
{
    async fn extensions(&self, info: RequestInfo<'_>) -> Result<Value, BoxError> {
        self(&info)
    }
}

/// Configuration of a single request.
#[derive(Clone, Default)]
pub struct Configuration {
    /// Required. Resolution fails without it.
    pub schema: Option<Arc<Valid<Schema>>>,
    /// Handed to the executor. The inbound request is used when absent.
    pub context: Option<Context>,
    pub root_value: Option<Value>,
    pub pretty: bool,
    pub format_error: Option<FormatError>,
    pub validation_rules: Vec<Arc<dyn ValidationRule>>,
    pub extensions: Option<Arc<dyn ExtensionsHook>>,
    /// Serve HTML on the interactive endpoint. Defaults to `true`.
    pub graphiql: Option<bool>,
}

#[buildstructor::buildstructor]
impl Configuration {
    #[builder(visibility = "pub")]
    #[allow(clippy::too_many_arguments)]
    fn new(
        schema: Option<Arc<Valid<Schema>>>,
        context: Option<Context>,
        root_value: Option<Value>,
        pretty: Option<bool>,
        format_error: Option<FormatError>,
        validation_rules: Vec<Arc<dyn ValidationRule>>,
        extensions: Option<Arc<dyn ExtensionsHook>>,
        graphiql: Option<bool>,
    ) -> Self {
        Self {
            schema,
            context,
            root_value,
            pretty: pretty.unwrap_or_default(),
            format_error,
            validation_rules,
            extensions,
            graphiql,
        }
    }
}

impl fmt::Debug for Configuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Configuration")
            .field("schema", &self.schema.is_some())
            .field("context", &self.context)
            .field("root_value", &self.root_value)
            .field("pretty", &self.pretty)
            .field("format_error", &self.format_error.is_some())
            .field("validation_rules", &self.validation_rules.len())
            .field("extensions", &self.extensions.is_some())
            .field("graphiql", &self.graphiql)
            .finish()
    }
}

/// Builds a configuration from the inbound request.
///
/// `Ok(None)` means the function produced no configuration.
pub type ComputeConfiguration = Arc<
    dyn Fn(&Parts) -> BoxFuture<'static, Result<Option<Configuration>, BoxError>> + Send + Sync,
>;

/// Where the configuration of a request comes from.
#[derive(Clone)]
pub enum ConfigurationSource {
    Static(Configuration),
    Computed(ComputeConfiguration),
}

impl ConfigurationSource {
    /// A source computed per request by `compute`.
    pub fn computed<F, Fut>(compute: F) -> Self
    where
        F: Fn(&Parts) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<Configuration>, BoxError>> + Send + 'static,
    {
        ConfigurationSource::Computed(Arc::new(move |parts| compute(parts).boxed()))
    }

    /// Resolve the configuration for one request.
    ///
    /// Nothing is cached: a static configuration is re-validated on every call.
    pub async fn resolve(&self, parts: &Parts) -> Result<ResolvedConfiguration, ServerError> {
        let configuration = match self {
            ConfigurationSource::Static(configuration) => configuration.clone(),
            ConfigurationSource::Computed(compute) => compute(parts)
                .await
                .map_err(|error| ServerError::wrap("could not compute the configuration", error))?
                .ok_or_else(|| ServerError::new(NOT_A_CONFIGURATION_MESSAGE))?,
        };
        ResolvedConfiguration::try_from(configuration)
    }
}

impl From<Configuration> for ConfigurationSource {
    fn from(configuration: Configuration) -> Self {
        ConfigurationSource::Static(configuration)
    }
}

impl fmt::Debug for ConfigurationSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigurationSource::Static(configuration) => {
                f.debug_tuple("Static").field(configuration).finish()
            }
            ConfigurationSource::Computed(_) => f.write_str("Computed"),
        }
    }
}

/// A configuration known to carry a schema.
#[derive(Clone)]
pub struct ResolvedConfiguration {
    pub schema: Arc<Valid<Schema>>,
    pub context: Option<Context>,
    pub root_value: Option<Value>,
    pub pretty: bool,
    pub format_error: FormatError,
    pub validation_rules: Vec<Arc<dyn ValidationRule>>,
    pub extensions: Option<Arc<dyn ExtensionsHook>>,
    pub graphiql: bool,
}

impl ResolvedConfiguration {
    pub fn format_error(&self, error: &graphql::Error) -> Value {
        (self.format_error)(error)
    }
}

impl fmt::Debug for ResolvedConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedConfiguration")
            .field("context", &self.context)
            .field("root_value", &self.root_value)
            .field("pretty", &self.pretty)
            .field("validation_rules", &self.validation_rules.len())
            .field("extensions", &self.extensions.is_some())
            .field("graphiql", &self.graphiql)
            .finish_non_exhaustive()
    }
}

impl TryFrom<Configuration> for ResolvedConfiguration {
    type Error = ServerError;

    fn try_from(configuration: Configuration) -> Result<Self, Self::Error> {
        let Configuration {
            schema,
            context,
            root_value,
            pretty,
            format_error,
            validation_rules,
            extensions,
            graphiql,
        } = configuration;
        Ok(Self {
            schema: schema.ok_or_else(|| ServerError::new(MISSING_SCHEMA_MESSAGE))?,
            context,
            root_value,
            pretty,
            format_error: format_error.unwrap_or_else(|| Arc::new(default_format_error)),
            validation_rules,
            extensions,
            graphiql: graphiql.unwrap_or(true),
        })
    }
}
