//! The execution pipeline.
//!
//! Stages run strictly in order and the first failure ends the request:
//! require a query, parse, validate, check the HTTP method, execute, then compute extensions.
use std::sync::Arc;

use apollo_compiler::ast;
use apollo_compiler::ast::OperationType;
use apollo_compiler::validation::Valid;
use apollo_compiler::ExecutableDocument;
use apollo_compiler::Schema;
use http::request::Parts;
use http::Method;
use http::StatusCode;

use crate::configuration::RequestInfo;
use crate::configuration::ResolvedConfiguration;
use crate::configuration::ValidationRule;
use crate::error::diagnostics_to_errors;
use crate::error::ClientError;
use crate::error::HttpError;
use crate::error::ServerError;
use crate::graphql;
use crate::json_ext::Value;
use crate::services::executor::ExecutionContext;
use crate::services::executor::ExecutionRequest;
use crate::services::executor::Executor;
use crate::services::parameters::Parameters;

const PARSE_FAILED: &str = "GRAPHQL_PARSE_FAILED";
const VALIDATION_FAILED: &str = "GRAPHQL_VALIDATION_FAILED";

/// Run one request through every stage.
pub async fn execute(
    configuration: &ResolvedConfiguration,
    executor: &dyn Executor,
    parts: &Arc<Parts>,
    parameters: &Parameters,
) -> Result<graphql::Response, HttpError> {
    let query = require_query(parameters)?;
    let document = parse(query)?;
    let document = validate(
        &configuration.schema,
        &document,
        &configuration.validation_rules,
    )?;
    check_method(&parts.method, &document, parameters.operation_name.as_deref())?;

    let document = Arc::new(document);
    let variables = parameters.variables();
    let context = match &configuration.context {
        Some(context) => ExecutionContext::Configured(context.clone()),
        None => ExecutionContext::Request(parts.clone()),
    };
    let mut response = executor
        .execute(ExecutionRequest {
            schema: configuration.schema.clone(),
            document: document.clone(),
            root_value: configuration.root_value.clone(),
            context,
            variables: variables.clone(),
            operation_name: parameters.operation_name.clone(),
        })
        .await
        .map_err(|error| {
            tracing::debug!(%error, "execution failed");
            ClientError::new(StatusCode::BAD_REQUEST, error.to_string(), "EXECUTION_FAILED")
        })?;
    tracing::debug!(errors = response.errors.len(), "operation executed");

    if let Some(hook) = &configuration.extensions {
        let extensions = hook
            .extensions(RequestInfo {
                document: &document,
                variables: &variables,
                operation_name: parameters.operation_name.as_deref(),
                result: &response,
            })
            .await
            .map_err(|error| {
                ServerError::wrap("could not compute the response extensions", error)
            })?;
        if let Value::Object(extensions) = extensions {
            response.extensions = extensions;
        }
    }

    Ok(response)
}

fn require_query(parameters: &Parameters) -> Result<&str, HttpError> {
    parameters
        .query
        .as_deref()
        .filter(|query| !query.trim().is_empty())
        .ok_or_else(HttpError::empty_query)
}

fn parse(query: &str) -> Result<ast::Document, ClientError> {
    ast::Document::parse(query, "query.graphql").map_err(|with_errors| {
        tracing::debug!(errors = with_errors.errors.len(), "query failed to parse");
        ClientError::from_diagnostics(
            StatusCode::BAD_REQUEST,
            &with_errors.errors,
            PARSE_FAILED,
        )
    })
}

/// The engine's own rules, followed by the configured ones.
fn validate(
    schema: &Valid<Schema>,
    document: &ast::Document,
    rules: &[Arc<dyn ValidationRule>],
) -> Result<Valid<ExecutableDocument>, ClientError> {
    let (document, mut errors) = match document.to_executable_validate(schema) {
        Ok(document) => (Ok(document), Vec::new()),
        Err(with_errors) => {
            let errors = diagnostics_to_errors(&with_errors.errors, VALIDATION_FAILED);
            (Err(with_errors.partial), errors)
        }
    };
    let executable: &ExecutableDocument = match &document {
        Ok(document) => document,
        Err(partial) => partial,
    };
    for rule in rules {
        errors.extend(rule.validate(schema, executable).into_iter().map(|mut error| {
            error
                .extensions
                .entry("code")
                .or_insert_with(|| VALIDATION_FAILED.into());
            error
        }));
    }

    match document {
        Ok(document) if errors.is_empty() => Ok(document),
        _ => {
            tracing::debug!(errors = errors.len(), "query failed to validate");
            Err(ClientError::from_errors(StatusCode::BAD_REQUEST, errors))
        }
    }
}

/// Only queries may be sent with GET.
///
/// When no operation can be selected the check is skipped and execution reports the problem.
fn check_method(
    method: &Method,
    document: &ExecutableDocument,
    operation_name: Option<&str>,
) -> Result<(), ClientError> {
    if method != Method::GET {
        return Ok(());
    }
    match document.operations.get(operation_name) {
        Ok(operation) if operation.operation_type != OperationType::Query => {
            Err(ClientError::new(
                StatusCode::METHOD_NOT_ALLOWED,
                format!(
                    "Can only perform a {} operation from a POST request.",
                    operation.operation_type.name()
                ),
                "METHOD_NOT_ALLOWED",
            ))
        }
        _ => Ok(()),
    }
}
