//! The boundary with the query engine's execution step.
use std::sync::Arc;

use apollo_compiler::ast::OperationType;
use apollo_compiler::resolvers::Execution;
use apollo_compiler::resolvers::FieldError;
use apollo_compiler::resolvers::ObjectValue;
use apollo_compiler::resolvers::ResolveInfo;
use apollo_compiler::resolvers::ResolvedValue;
use apollo_compiler::response::GraphQLError;
use apollo_compiler::validation::Valid;
use apollo_compiler::ExecutableDocument;
use apollo_compiler::Schema;
use async_trait::async_trait;
use http::request::Parts;
use tower::BoxError;

use crate::context::Context;
use crate::graphql;
use crate::json_ext::Object;
use crate::json_ext::Value;

/// The context value handed to the executor.
#[derive(Clone, Debug)]
pub enum ExecutionContext {
    /// The context supplied by the configuration.
    Configured(Context),
    /// No context was configured: the inbound request stands in for it.
    Request(Arc<Parts>),
}

/// Everything the executor is given for one operation.
#[derive(Clone, Debug)]
pub struct ExecutionRequest {
    pub schema: Arc<Valid<Schema>>,
    pub document: Arc<Valid<ExecutableDocument>>,
    pub root_value: Option<Value>,
    pub context: ExecutionContext,
    pub variables: Object,
    pub operation_name: Option<String>,
}

/// Executes a validated document.
///
/// Errors found while executing belong in the response's `errors`. An `Err` means execution
/// could not take place at all and is reported to the client as a bad request.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Executor: Send + Sync + 'static {
    async fn execute(&self, request: ExecutionRequest) -> Result<graphql::Response, BoxError>;
}

/// Resolves every field by looking its name up in the parent JSON object, starting from the
/// root value.
///
/// Missing keys resolve to null. An object's concrete type is read from its `__typename` key,
/// and falls back to the field's declared type.
#[derive(Clone, Copy, Debug, Default)]
pub struct RootValueExecutor;

#[async_trait]
impl Executor for RootValueExecutor {
    async fn execute(&self, request: ExecutionRequest) -> Result<graphql::Response, BoxError> {
        Ok(execute_root_value(&request))
    }
}

fn execute_root_value(request: &ExecutionRequest) -> graphql::Response {
    let schema = &request.schema;
    let document = &request.document;
    let error_response = |error: GraphQLError| {
        graphql::Response::builder()
            .error(graphql::Error::from(error))
            .build()
    };

    let operation = match document
        .operations
        .get(request.operation_name.as_deref())
    {
        Ok(operation) => operation,
        Err(error) => return error_response(error.to_graphql_error(&document.sources)),
    };
    if operation.operation_type == OperationType::Subscription {
        return error_response(GraphQLError::new(
            "subscriptions are not supported",
            operation.location(),
            &document.sources,
        ));
    }
    let Some(root_type) = schema.root_operation(operation.operation_type) else {
        return error_response(GraphQLError::new(
            format!("the schema has no {} type", operation.operation_type.name()),
            operation.location(),
            &document.sources,
        ));
    };

    let empty = Object::new();
    let root = match &request.root_value {
        Some(Value::Object(root)) => root,
        _ => &empty,
    };
    let root = JsonObject {
        type_name: root_type.as_str(),
        fields: root,
    };

    match Execution::new(schema, document)
        .operation(operation)
        .raw_variable_values(&request.variables)
        .execute_sync(&root)
    {
        Ok(response) => graphql::Response::builder()
            .data(Value::from(response.data))
            .errors(response.errors.into_iter().map(Into::into).collect())
            .build(),
        Err(request_error) => error_response(request_error.to_graphql_error(&document.sources)),
    }
}

struct JsonObject<'a> {
    type_name: &'a str,
    fields: &'a Object,
}

impl ObjectValue for JsonObject<'_> {
    fn type_name(&self) -> &str {
        self.type_name
    }

    fn resolve_field<'a>(
        &'a self,
        info: &'a ResolveInfo<'a>,
    ) -> Result<ResolvedValue<'a>, FieldError> {
        match self.fields.get(info.field_name()) {
            Some(value) => resolve_value(value, info),
            None => Ok(ResolvedValue::leaf(Value::Null)),
        }
    }
}

fn resolve_value<'a>(
    value: &'a Value,
    info: &'a ResolveInfo<'a>,
) -> Result<ResolvedValue<'a>, FieldError> {
    match value {
        Value::Object(fields) => {
            let type_name = match fields.get("__typename") {
                Some(Value::String(type_name)) => type_name.as_str(),
                Some(_) => {
                    return Err(FieldError {
                        message: "`__typename` is not a string".into(),
                    })
                }
                None => info.field_definition().ty.inner_named_type().as_str(),
            };
            Ok(ResolvedValue::object(JsonObject { type_name, fields }))
        }
        Value::Array(values) => Ok(ResolvedValue::List(Box::new(
            values.iter().map(move |value| resolve_value(value, info)),
        ))),
        leaf => Ok(ResolvedValue::leaf(leaf.clone())),
    }
}
