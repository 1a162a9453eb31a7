use http::StatusCode;
use serde_json_bytes::ByteString;

use crate::error::ClientError;
use crate::json_ext::into_object;
use crate::json_ext::Object;
use crate::json_ext::Value;
use crate::services::body::pairs_to_object;

const QUERY: &str = "query";
const VARIABLES: &str = "variables";
const OPERATION_NAME: &str = "operationName";
const RAW: &str = "raw";

/// The GraphQL parameters of one request, merged from the URL and the body.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Parameters {
    pub query: Option<String>,
    pub variables: Option<Object>,
    pub operation_name: Option<String>,
    /// Set when either source carries a `raw` key, whatever its value.
    pub raw: bool,
}

impl Parameters {
    /// Merge the URL parameters with the decoded body parameters.
    ///
    /// A URL value wins over the body value unless it is an empty string. A key repeated in
    /// the URL still wins, and then resolves to nothing since it is not a single string.
    pub fn resolve(url: &Object, body: &Object) -> Result<Self, ClientError> {
        let query = pick(url, body, QUERY).and_then(as_string);
        let operation_name = pick(url, body, OPERATION_NAME).and_then(as_string);
        let variables = match pick(url, body, VARIABLES) {
            Some(Value::String(variables)) => parse_variables(variables)?,
            Some(variables) => into_object(variables.clone()),
            None => None,
        };
        let raw = url.contains_key(RAW) || body.contains_key(RAW);

        Ok(Self {
            query,
            variables,
            operation_name,
            raw,
        })
    }

    /// The variables, or an empty mapping.
    pub fn variables(&self) -> Object {
        self.variables.clone().unwrap_or_default()
    }
}

/// Decode a URL query string into a parameter mapping.
pub(crate) fn url_parameters(query: Option<&str>) -> Result<Object, ClientError> {
    let Some(query) = query else {
        return Ok(Object::new());
    };
    let pairs: Vec<(String, String)> = serde_urlencoded::from_str(query).map_err(|error| {
        ClientError::bad_request(format!("Invalid query string: {error}"))
    })?;
    Ok(pairs_to_object(pairs))
}

/// The URL value unless it is missing, null or an empty string.
fn pick<'a>(url: &'a Object, body: &'a Object, key: &str) -> Option<&'a Value> {
    match url.get(key) {
        None | Some(Value::Null) => body.get(key),
        Some(Value::String(value)) if value.as_str().is_empty() => body.get(key),
        value => value,
    }
}

fn as_string(value: &Value) -> Option<String> {
    value.as_str().map(str::to_string)
}

fn parse_variables(variables: &ByteString) -> Result<Option<Object>, ClientError> {
    let variables: Value = serde_json::from_str(variables.as_str()).map_err(|_| {
        ClientError::new(
            StatusCode::BAD_REQUEST,
            "Variables are invalid JSON.",
            "VARIABLES_INVALID_JSON",
        )
    })?;
    Ok(into_object(variables))
}

#[cfg(test)]
mod tests {
    use serde_json_bytes::json;

    use super::*;
    use crate::services::body::decode;

    fn object(value: Value) -> Object {
        into_object(value).unwrap()
    }

    #[test]
    fn graphql_body_without_url_parameters() {
        let body = decode(
            b"{ ships { edges { node { name } } } }",
            None,
            Some("application/graphql"),
        )
        .unwrap();

        let parameters = Parameters::resolve(&Object::new(), &body).unwrap();

        assert_eq!(
            parameters,
            Parameters {
                query: Some("{ ships { edges { node { name } } } }".to_string()),
                variables: None,
                operation_name: None,
                raw: false,
            }
        );
    }

    #[test]
    fn url_query_takes_precedence() {
        let url = url_parameters(Some("query=%7B+rebels+%7B+name+%7D+%7D")).unwrap();
        let body = object(json!({ "query": "{ empire { name } }", "operationName": "Body" }));

        let parameters = Parameters::resolve(&url, &body).unwrap();

        assert_eq!(parameters.query.as_deref(), Some("{ rebels { name } }"));
        assert_eq!(parameters.operation_name.as_deref(), Some("Body"));
    }

    #[test]
    fn repeated_url_keys_still_take_precedence() {
        let url = url_parameters(Some("query=%7Brebels%7Bname%7D%7D&query=%7Bempire%7Bname%7D%7D"))
            .unwrap();
        let body = object(json!({ "query": "{ ships { edges { cursor } } }" }));

        let parameters = Parameters::resolve(&url, &body).unwrap();

        assert_eq!(parameters.query, None);
    }

    #[test]
    fn empty_url_values_fall_through_to_the_body() {
        let url = url_parameters(Some("query=&operationName=")).unwrap();
        let body = object(json!({ "query": "{ empire { name } }", "operationName": "Empire" }));

        let parameters = Parameters::resolve(&url, &body).unwrap();

        assert_eq!(parameters.query.as_deref(), Some("{ empire { name } }"));
        assert_eq!(parameters.operation_name.as_deref(), Some("Empire"));
    }

    #[test]
    fn variables_given_as_a_string_are_decoded() {
        let url = url_parameters(Some("variables=%7B%22first%22%3A2%7D")).unwrap();
        let body = object(json!({ "variables": "{\"first\":2}" }));

        let from_url = Parameters::resolve(&url, &Object::new()).unwrap();
        let from_body = Parameters::resolve(&Object::new(), &body).unwrap();

        assert_eq!(from_url.variables, Some(object(json!({ "first": 2 }))));
        assert_eq!(from_url.variables, from_body.variables);
    }

    #[test]
    fn structured_variables_are_kept() {
        let body = object(json!({ "variables": { "shipName": "B-Wing", "factionId": "1" } }));

        let parameters = Parameters::resolve(&Object::new(), &body).unwrap();

        assert_eq!(
            parameters.variables(),
            object(json!({ "shipName": "B-Wing", "factionId": "1" }))
        );
    }

    #[test]
    fn malformed_variables_fail_the_same_way_from_any_source() {
        let url = url_parameters(Some("variables=%7Bfirst")).unwrap();
        let body = object(json!({ "variables": "{first" }));

        let from_url = Parameters::resolve(&url, &Object::new()).unwrap_err();
        let from_body = Parameters::resolve(&Object::new(), &body).unwrap_err();

        assert_eq!(from_url, from_body);
        assert_eq!(from_url.status, StatusCode::BAD_REQUEST);
        assert_eq!(from_url.errors[0].message, "Variables are invalid JSON.");
        assert_eq!(
            from_url.errors[0].extension_code().as_deref(),
            Some("VARIABLES_INVALID_JSON")
        );
    }

    #[test]
    fn non_mapping_variables_are_absent() {
        for variables in [json!("[1, 2]"), json!("null"), json!(3), Value::Null] {
            let body = object(json!({ "variables": variables }));

            let parameters = Parameters::resolve(&Object::new(), &body).unwrap();

            assert_eq!(parameters.variables, None);
        }
    }

    #[test]
    fn non_text_values_are_absent() {
        let body = object(json!({ "query": 42, "operationName": ["A", "B"] }));

        let parameters = Parameters::resolve(&Object::new(), &body).unwrap();

        assert_eq!(parameters.query, None);
        assert_eq!(parameters.operation_name, None);
    }

    #[test]
    fn raw_is_set_by_either_source() {
        let url = url_parameters(Some("raw")).unwrap();
        let body = object(json!({ "raw": false }));

        assert!(Parameters::resolve(&url, &Object::new()).unwrap().raw);
        assert!(Parameters::resolve(&Object::new(), &body).unwrap().raw);
        assert!(!Parameters::resolve(&Object::new(), &Object::new()).unwrap().raw);
    }
}
