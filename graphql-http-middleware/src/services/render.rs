//! Rendering of pipeline outcomes.
//!
//! Both endpoints build the same payload from the outcome. The JSON endpoint serializes it
//! directly, the interactive endpoint embeds it in an HTML page next to the request
//! parameters.
use axum::body::Body;
use http::header::ALLOW;
use http::header::CONTENT_TYPE;
use http::HeaderValue;
use http::StatusCode;

use crate::configuration::default_format_error;
use crate::configuration::ResolvedConfiguration;
use crate::error::HttpError;
use crate::graphql;
use crate::json_ext::Object;
use crate::json_ext::Value;
use crate::reporting::ErrorReporter;
use crate::services::parameters::Parameters;

pub(crate) const APPLICATION_JSON_UTF_8: &str = "application/json; charset=utf-8";
pub(crate) const TEXT_HTML_UTF_8: &str = "text/html; charset=utf-8";
pub(crate) const INTERNAL_SERVER_ERROR_MESSAGE: &str = "internal server error.";

/// The shape of a rendered response.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RenderMode {
    Json,
    Html,
}

/// Status and body of a response, before serialization.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Payload {
    pub(crate) status: StatusCode,
    pub(crate) body: Object,
}

impl Payload {
    /// Build the payload for an outcome.
    ///
    /// Server errors are handed to the reporter and replaced with a generic message. An empty
    /// query is not an error in [`RenderMode::Html`].
    pub(crate) fn new(
        outcome: Result<graphql::Response, HttpError>,
        mode: RenderMode,
        configuration: Option<&ResolvedConfiguration>,
        reporter: &dyn ErrorReporter,
    ) -> Self {
        let format_error = |error: &graphql::Error| match configuration {
            Some(configuration) => configuration.format_error(error),
            None => default_format_error(error),
        };
        let mut body = Object::new();
        let status = match outcome {
            Ok(response) => {
                let graphql::Response {
                    data,
                    errors,
                    extensions,
                } = response;
                if let Some(data) = data {
                    body.insert("data", data);
                }
                if !errors.is_empty() {
                    body.insert("errors", Value::Array(errors.iter().map(format_error).collect()));
                }
                if !extensions.is_empty() {
                    body.insert("extensions", Value::Object(extensions));
                }
                StatusCode::OK
            }
            Err(HttpError::EmptyQuery(_)) if mode == RenderMode::Html => {
                body.insert("data", Value::Object(Object::new()));
                StatusCode::OK
            }
            Err(HttpError::Client(error) | HttpError::EmptyQuery(error)) => {
                tracing::debug!(status = %error.status, %error, "client error");
                body.insert(
                    "errors",
                    Value::Array(error.errors.iter().map(format_error).collect()),
                );
                error.status
            }
            Err(HttpError::Server(error)) => {
                reporter.report(&error);
                body.insert(
                    "errors",
                    Value::Array(vec![Value::from(INTERNAL_SERVER_ERROR_MESSAGE)]),
                );
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        Self { status, body }
    }

    /// Serialize as the JSON endpoint does.
    pub(crate) fn into_json(self, pretty: bool) -> http::Response<Body> {
        let body = Value::Object(self.body);
        let bytes = if pretty {
            serde_json::to_vec_pretty(&body)
        } else {
            serde_json::to_vec(&body)
        };
        match bytes {
            Ok(bytes) => response(self.status, APPLICATION_JSON_UTF_8, bytes),
            Err(error) => {
                tracing::error!(%error, "could not serialize the response");
                response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    APPLICATION_JSON_UTF_8,
                    format!(r#"{{"errors":["{INTERNAL_SERVER_ERROR_MESSAGE}"]}}"#).into_bytes(),
                )
            }
        }
    }

    /// Embed in the interactive page along with the request parameters.
    pub(crate) fn into_html(self, parameters: Option<&Parameters>) -> http::Response<Body> {
        let page = graphiql_page_content(
            parameters.and_then(|parameters| parameters.query.as_deref()),
            parameters.and_then(|parameters| parameters.variables.as_ref()),
            parameters.and_then(|parameters| parameters.operation_name.as_deref()),
            &Value::Object(self.body),
        );
        response(self.status, TEXT_HTML_UTF_8, page.into_bytes())
    }
}

/// Render a payload in the given mode.
pub(crate) fn render(
    payload: Payload,
    mode: RenderMode,
    configuration: Option<&ResolvedConfiguration>,
    parameters: Option<&Parameters>,
) -> http::Response<Body> {
    match mode {
        RenderMode::Json => payload.into_json(configuration.is_some_and(|c| c.pretty)),
        RenderMode::Html => payload.into_html(parameters),
    }
}

fn response(status: StatusCode, content_type: &'static str, body: Vec<u8>) -> http::Response<Body> {
    let mut response = http::Response::new(Body::from(body));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    if status == StatusCode::METHOD_NOT_ALLOWED {
        response
            .headers_mut()
            .insert(ALLOW, HeaderValue::from_static("POST"));
    }
    response
}

/// Fill the page template in a single pass, so substituted text is never scanned for
/// placeholders.
pub(crate) fn graphiql_page_content(
    query: Option<&str>,
    variables: Option<&Object>,
    operation_name: Option<&str>,
    result: &Value,
) -> String {
    const TEMPLATE: &str = include_str!("../../templates/graphiql_index.html");
    let variables = variables.map(|variables| pretty(&Value::Object(variables.clone())));
    let substitutions = [
        ("{{QUERY}}", embed(query)),
        ("{{VARIABLES}}", embed(variables.as_deref())),
        ("{{OPERATION_NAME}}", embed(operation_name)),
        ("{{RESULT}}", embed(Some(&pretty(result)))),
    ];

    let mut page = String::with_capacity(TEMPLATE.len());
    let mut rest = TEMPLATE;
    while let Some(start) = rest.find("{{") {
        page.push_str(&rest[..start]);
        let tail = &rest[start..];
        match substitutions
            .iter()
            .find(|(placeholder, _)| tail.starts_with(placeholder))
        {
            Some((placeholder, value)) => {
                page.push_str(value);
                rest = &tail[placeholder.len()..];
            }
            None => {
                page.push_str("{{");
                rest = &tail[2..];
            }
        }
    }
    page.push_str(rest);
    page
}

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| String::from("null"))
}

/// A JavaScript string literal that cannot close the enclosing script element.
fn embed(text: Option<&str>) -> String {
    match text {
        Some(text) => serde_json::to_string(text)
            .unwrap_or_else(|_| String::from("null"))
            .replace('/', "\\/"),
        None => String::from("null"),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use apollo_compiler::Schema;
    use http_body_util::BodyExt;
    use serde_json_bytes::json;

    use super::*;
    use crate::configuration::Configuration;
    use crate::error::ClientError;
    use crate::error::ServerError;
    use crate::json_ext::into_object;
    use crate::reporting::MockErrorReporter;

    fn configuration(pretty: bool) -> ResolvedConfiguration {
        let schema = Schema::parse_and_validate("type Query { ships: [String] }", "schema.graphql")
            .unwrap();
        ResolvedConfiguration::try_from(
            Configuration::builder()
                .schema(Arc::new(schema))
                .pretty(pretty)
                .build(),
        )
        .unwrap()
    }

    fn quiet() -> MockErrorReporter {
        let mut reporter = MockErrorReporter::new();
        reporter.expect_report().never();
        reporter
    }

    async fn body(response: http::Response<Body>) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn success_is_compact_json_by_default() {
        let outcome = Ok(graphql::Response::builder()
            .data(json!({ "ships": ["X-Wing"] }))
            .build());

        let payload = Payload::new(outcome, RenderMode::Json, Some(&configuration(false)), &quiet());
        let response = render(payload, RenderMode::Json, Some(&configuration(false)), None);

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[CONTENT_TYPE], APPLICATION_JSON_UTF_8);
        assert_eq!(body(response).await, r#"{"data":{"ships":["X-Wing"]}}"#);
    }

    #[tokio::test]
    async fn pretty_json_is_indented_with_two_spaces() {
        let outcome = Ok(graphql::Response::builder()
            .data(json!({ "ships": null }))
            .build());
        let configuration = configuration(true);

        let payload = Payload::new(outcome, RenderMode::Json, Some(&configuration), &quiet());
        let response = render(payload, RenderMode::Json, Some(&configuration), None);

        assert_eq!(
            body(response).await,
            "{\n  \"data\": {\n    \"ships\": null\n  }\n}"
        );
    }

    #[test]
    fn result_errors_go_through_the_formatter() {
        let mut configuration = configuration(false);
        configuration.format_error =
            Arc::new(|error: &graphql::Error| json!({ "msg": error.message.to_uppercase() }));
        let outcome = Ok(graphql::Response::builder()
            .data(Value::Null)
            .error(graphql::Error::builder().message("ship not found").build())
            .extension("cost", 3)
            .build());

        let payload = Payload::new(outcome, RenderMode::Json, Some(&configuration), &quiet());

        assert_eq!(
            Value::Object(payload.body),
            json!({
                "data": null,
                "errors": [{ "msg": "SHIP NOT FOUND" }],
                "extensions": { "cost": 3 },
            })
        );
    }

    #[test]
    fn client_errors_keep_their_status() {
        let outcome = Err(HttpError::from(ClientError::bad_request("Variables are invalid JSON.")));

        let payload = Payload::new(outcome, RenderMode::Html, None, &quiet());

        assert_eq!(payload.status, StatusCode::BAD_REQUEST);
        assert_eq!(
            Value::Object(payload.body),
            json!({ "errors": [{
                "message": "Variables are invalid JSON.",
                "extensions": { "code": "BAD_REQUEST" },
            }] })
        );
    }

    #[test]
    fn empty_query_is_an_error_only_for_json() {
        let json = Payload::new(Err(HttpError::empty_query()), RenderMode::Json, None, &quiet());
        let html = Payload::new(Err(HttpError::empty_query()), RenderMode::Html, None, &quiet());

        assert_eq!(json.status, StatusCode::BAD_REQUEST);
        assert_eq!(
            json.body.get("errors").and_then(|errors| errors.as_array()).map(Vec::len),
            Some(1)
        );
        assert_eq!(html.status, StatusCode::OK);
        assert_eq!(Value::Object(html.body), json!({ "data": {} }));
    }

    #[tokio::test]
    async fn server_errors_are_reported_and_hidden() {
        let mut reporter = MockErrorReporter::new();
        reporter
            .expect_report()
            .withf(|error| error.message == "could not compute the response extensions")
            .times(1)
            .return_const(());
        let outcome = Err(HttpError::from(ServerError::wrap(
            "could not compute the response extensions",
            "database password is hunter2",
        )));

        let payload = Payload::new(outcome, RenderMode::Json, None, &reporter);
        let response = render(payload, RenderMode::Json, None, None);

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body(response).await, r#"{"errors":["internal server error."]}"#);
    }

    #[tokio::test]
    async fn method_not_allowed_advertises_post() {
        let outcome = Err(HttpError::from(ClientError::new(
            StatusCode::METHOD_NOT_ALLOWED,
            "Can only perform a mutation operation from a POST request.",
            "METHOD_NOT_ALLOWED",
        )));

        let payload = Payload::new(outcome, RenderMode::Json, None, &quiet());
        let response = render(payload, RenderMode::Json, None, None);

        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(response.headers()[ALLOW], "POST");
    }

    #[tokio::test]
    async fn html_embeds_parameters_and_result() {
        let parameters = Parameters {
            query: Some("{ ships }".to_string()),
            variables: crate::json_ext::into_object(json!({ "first": 2 })),
            operation_name: Some("Ships".to_string()),
            raw: false,
        };
        let outcome = Ok(graphql::Response::builder()
            .data(json!({ "ships": ["X-Wing"] }))
            .build());

        let payload = Payload::new(outcome, RenderMode::Html, None, &quiet());
        let response = render(payload, RenderMode::Html, None, Some(&parameters));

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[CONTENT_TYPE], TEXT_HTML_UTF_8);
        let page = body(response).await;
        assert!(page.contains(r#"var query = "{ ships }";"#));
        assert!(page.contains(r#"var variables = "{\n  \"first\": 2\n}";"#));
        assert!(page.contains(r#"var operationName = "Ships";"#));
        assert!(page.contains("\\\"X-Wing\\\""));
    }

    #[test]
    fn html_embedding_cannot_close_the_script() {
        let page = graphiql_page_content(
            Some("{ ships } </script><script>alert(1)</script>"),
            None,
            None,
            &Value::Null,
        );

        assert!(!page.contains("</script><script>alert(1)"));
        assert!(page.contains(r#"<\/script><script>alert(1)<\/script>"#));
        assert!(page.contains("var variables = null;"));
        assert!(page.contains("var operationName = null;"));
    }

    #[test]
    fn placeholders_in_request_data_are_left_alone() {
        let variables = into_object(json!({ "name": "{{RESULT}}" })).unwrap();

        let page = graphiql_page_content(
            Some("{{OPERATION_NAME}}"),
            Some(&variables),
            Some("+alert(document.domain)+"),
            &json!({ "data": { "echo": "{{QUERY}}" } }),
        );

        assert!(page.contains(r#"var query = "{{OPERATION_NAME}}";"#));
        assert!(page.contains(r#"var operationName = "+alert(document.domain)+";"#));
        assert_eq!(page.matches("alert(document.domain)").count(), 1);
        assert!(page.contains(r#"\"name\": \"{{RESULT}}\""#));
        assert!(page.contains(r#"\"echo\": \"{{QUERY}}\""#));
    }
}
