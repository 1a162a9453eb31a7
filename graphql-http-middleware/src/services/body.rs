//! Request body decoding.
//!
//! The body is buffered in full, then decoded by [`decode`], which only sees bytes and
//! header values.
use std::borrow::Cow;
use std::io::Read;

use bytes::Bytes;
use flate2::read::GzDecoder;
use flate2::read::ZlibDecoder;
use http::header::CONTENT_ENCODING;
use http::header::CONTENT_TYPE;
use http::request::Parts;
use http::StatusCode;
use http_body::Body;
use http_body_util::BodyExt;
use http_body_util::LengthLimitError;
use http_body_util::Limited;
use mime::Mime;
use tower::BoxError;

use crate::error::ClientError;
use crate::error::HttpError;
use crate::error::ServerError;
use crate::json_ext::into_object;
use crate::json_ext::Object;
use crate::json_ext::Value;

pub(crate) const APPLICATION_GRAPHQL: &str = "application/graphql";

/// Largest body accepted, before and after decompression.
pub const DEFAULT_MAX_REQUEST_BYTES: usize = 2_000_000;

/// Media types a body may be sent as.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum BodyType {
    /// The whole text is the query.
    Graphql,
    Json,
    Form,
}

impl BodyType {
    fn new(mime: &Mime) -> Option<Self> {
        match mime.essence_str() {
            APPLICATION_GRAPHQL => Some(BodyType::Graphql),
            "application/json" => Some(BodyType::Json),
            "application/x-www-form-urlencoded" => Some(BodyType::Form),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ContentEncoding {
    Identity,
    Gzip,
    Deflate,
}

impl ContentEncoding {
    fn new(header: Option<&str>) -> Option<Self> {
        match header.map(|value| value.trim().to_ascii_lowercase()).as_deref() {
            None | Some("") | Some("identity") => Some(ContentEncoding::Identity),
            Some("gzip") => Some(ContentEncoding::Gzip),
            Some("deflate") => Some(ContentEncoding::Deflate),
            Some(_) => None,
        }
    }

    /// Inflate `body`, reading at most `max_bytes` of output.
    fn decompress<'a>(
        &self,
        body: &'a [u8],
        max_bytes: usize,
    ) -> Result<Cow<'a, [u8]>, ClientError> {
        let limit = max_bytes as u64 + 1;
        let mut decoded = Vec::new();
        match self {
            ContentEncoding::Identity if body.len() > max_bytes => return Err(too_large()),
            ContentEncoding::Identity => return Ok(Cow::Borrowed(body)),
            ContentEncoding::Gzip => GzDecoder::new(body)
                .take(limit)
                .read_to_end(&mut decoded)
                .map_err(invalid_body)?,
            ContentEncoding::Deflate => ZlibDecoder::new(body)
                .take(limit)
                .read_to_end(&mut decoded)
                .map_err(invalid_body)?,
        };
        if decoded.len() > max_bytes {
            return Err(too_large());
        }
        Ok(Cow::Owned(decoded))
    }
}

/// Read and decode the body of a request into a parameter mapping.
///
/// Requests without a `Content-Type` header decode to an empty mapping. Their body is still
/// drained.
pub(crate) async fn decode_request<B>(
    parts: &Parts,
    body: B,
    max_bytes: usize,
) -> Result<Object, HttpError>
where
    B: Body<Data = Bytes>,
    B::Error: Into<BoxError>,
{
    let Some(content_type) = parts.headers.get(CONTENT_TYPE) else {
        let discarded = read_body(body, max_bytes).await?;
        tracing::trace!(length = discarded.len(), "body without content-type discarded");
        return Ok(Object::new());
    };
    let content_type = String::from_utf8_lossy(content_type.as_bytes());
    let content_encoding = parts
        .headers
        .get(CONTENT_ENCODING)
        .map(|value| String::from_utf8_lossy(value.as_bytes()));

    let bytes = read_body(body, max_bytes).await?;
    tracing::trace!(length = bytes.len(), %content_type, "request body read");

    Ok(decode_with_limit(
        &bytes,
        content_encoding.as_deref(),
        Some(&*content_type),
        max_bytes,
    )?)
}

async fn read_body<B>(body: B, max_bytes: usize) -> Result<Bytes, HttpError>
where
    B: Body<Data = Bytes>,
    B::Error: Into<BoxError>,
{
    match Limited::new(body, max_bytes).collect().await {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(error) if error.is::<LengthLimitError>() => Err(too_large().into()),
        Err(error) => Err(ServerError::wrap("could not read the request body", error).into()),
    }
}

/// Decode a buffered body according to its `Content-Encoding` and `Content-Type` headers.
///
/// Checks run in order: media type, charset, content encoding, then the body itself.
pub fn decode(
    body: &[u8],
    content_encoding: Option<&str>,
    content_type: Option<&str>,
) -> Result<Object, ClientError> {
    decode_with_limit(
        body,
        content_encoding,
        content_type,
        DEFAULT_MAX_REQUEST_BYTES,
    )
}

/// [`decode`] with a custom cap on the body size, checked on the received and on the
/// decompressed body.
pub fn decode_with_limit(
    body: &[u8],
    content_encoding: Option<&str>,
    content_type: Option<&str>,
    max_bytes: usize,
) -> Result<Object, ClientError> {
    let Some(content_type) = content_type else {
        return Ok(Object::new());
    };
    let unsupported_type =
        || ClientError::bad_request(format!("Unsupported content-type \"{content_type}\"."));
    let mime: Mime = content_type.parse().map_err(|_| unsupported_type())?;
    let body_type = BodyType::new(&mime).ok_or_else(unsupported_type)?;

    if let Some(charset) = mime.get_param(mime::CHARSET) {
        if !charset.as_str().eq_ignore_ascii_case("utf-8") {
            return Err(ClientError::bad_request(format!(
                "Unsupported charset \"{}\".",
                charset.as_str().to_ascii_uppercase()
            )));
        }
    }

    let encoding = ContentEncoding::new(content_encoding).ok_or_else(|| {
        ClientError::bad_request(format!(
            "Unsupported content-encoding \"{}\".",
            content_encoding.unwrap_or_default()
        ))
    })?;
    let body = encoding.decompress(body, max_bytes)?;
    let text = std::str::from_utf8(&body).map_err(invalid_body)?;

    match body_type {
        BodyType::Graphql => {
            let mut parameters = Object::new();
            parameters.insert("query", Value::from(text));
            Ok(parameters)
        }
        BodyType::Json => {
            let value: Value = serde_json::from_str(text)
                .map_err(|_| ClientError::bad_request("POST body sent invalid JSON."))?;
            Ok(into_object(value).unwrap_or_default())
        }
        BodyType::Form => {
            let pairs: Vec<(String, String)> =
                serde_urlencoded::from_str(text).map_err(invalid_body)?;
            Ok(pairs_to_object(pairs))
        }
    }
}

fn too_large() -> ClientError {
    ClientError::new(
        StatusCode::PAYLOAD_TOO_LARGE,
        "Request body is too large.",
        "PAYLOAD_TOO_LARGE",
    )
}

fn invalid_body(error: impl std::fmt::Display) -> ClientError {
    ClientError::bad_request(format!("Invalid body: {error}"))
}

/// Collect decoded key/value pairs. A key given more than once maps to the list of its values.
pub(crate) fn pairs_to_object(pairs: Vec<(String, String)>) -> Object {
    let mut object = Object::new();
    for (key, value) in pairs {
        let value = Value::from(value);
        match object.get_mut(key.as_str()) {
            Some(Value::Array(values)) => values.push(value),
            Some(existing) => {
                let first = std::mem::replace(existing, Value::Null);
                *existing = Value::Array(vec![first, value]);
            }
            None => {
                object.insert(key, value);
            }
        }
    }
    object
}

#[cfg(test)]
mod tests {
    use std::convert::Infallible;
    use std::io::Write;
    use std::sync::atomic::AtomicBool;
    use std::sync::atomic::Ordering;
    use std::sync::Arc;

    use flate2::write::GzEncoder;
    use flate2::write::ZlibEncoder;
    use flate2::Compression;
    use futures::StreamExt;
    use http_body::Frame;
    use http_body_util::StreamBody;
    use serde_json_bytes::json;

    use super::*;

    const JSON_BODY: &str = r#"{"query":"{ ships { edges { node { name } } } }","variables":{"first":2}}"#;

    fn message(error: ClientError) -> String {
        assert_eq!(error.status, http::StatusCode::BAD_REQUEST);
        error.errors[0].message.clone()
    }

    #[test]
    fn graphql_body_is_the_query() {
        let parameters = decode(
            b"{ ships { edges { node { name } } } }",
            None,
            Some("application/graphql"),
        )
        .unwrap();

        assert_eq!(
            Value::Object(parameters),
            json!({ "query": "{ ships { edges { node { name } } } }" })
        );
    }

    #[test]
    fn compressed_bodies_decode_like_plain_ones() {
        let plain = decode(JSON_BODY.as_bytes(), None, Some("application/json")).unwrap();

        let mut gzip = GzEncoder::new(Vec::new(), Compression::default());
        gzip.write_all(JSON_BODY.as_bytes()).unwrap();
        let gzip = gzip.finish().unwrap();
        let mut deflate = ZlibEncoder::new(Vec::new(), Compression::default());
        deflate.write_all(JSON_BODY.as_bytes()).unwrap();
        let deflate = deflate.finish().unwrap();

        assert_eq!(
            decode(&gzip, Some("gzip"), Some("application/json")).unwrap(),
            plain
        );
        assert_eq!(
            decode(&deflate, Some("deflate"), Some("application/json")).unwrap(),
            plain
        );
        assert_eq!(
            decode(JSON_BODY.as_bytes(), Some("identity"), Some("application/json")).unwrap(),
            plain
        );
    }

    #[test]
    fn form_bodies_group_repeated_keys() {
        let parameters = decode(
            b"query=%7B+ships+%7D&operationName=Ships&tag=a&tag=b&tag=c",
            None,
            Some("application/x-www-form-urlencoded"),
        )
        .unwrap();

        assert_eq!(
            Value::Object(parameters),
            json!({
                "query": "{ ships }",
                "operationName": "Ships",
                "tag": ["a", "b", "c"],
            })
        );
    }

    #[test]
    fn missing_content_type_is_an_empty_mapping() {
        assert!(decode(b"ignored", None, None).unwrap().is_empty());
    }

    #[test]
    fn json_that_is_not_an_object_is_an_empty_mapping() {
        assert!(decode(b"[1, 2]", None, Some("application/json"))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn charset_is_case_insensitive() {
        let parameters = decode(
            JSON_BODY.as_bytes(),
            None,
            Some("application/json; charset=UTF-8"),
        )
        .unwrap();

        assert!(parameters.contains_key("query"));
    }

    #[test]
    fn unsupported_media_type() {
        let error = decode(b"<query/>", None, Some("text/xml")).unwrap_err();

        assert_eq!(message(error), "Unsupported content-type \"text/xml\".");
    }

    #[test]
    fn unsupported_charset() {
        let error = decode(
            JSON_BODY.as_bytes(),
            None,
            Some("application/json; charset=utf-16"),
        )
        .unwrap_err();

        assert_eq!(message(error), "Unsupported charset \"UTF-16\".");
    }

    #[test]
    fn media_type_is_checked_before_encoding() {
        let error = decode(b"", Some("br"), Some("text/plain")).unwrap_err();

        assert_eq!(message(error), "Unsupported content-type \"text/plain\".");
    }

    #[test]
    fn unsupported_encoding() {
        let error = decode(JSON_BODY.as_bytes(), Some("br"), Some("application/json")).unwrap_err();

        assert_eq!(message(error), "Unsupported content-encoding \"br\".");
    }

    #[test]
    fn malformed_json() {
        let error = decode(b"{\"query\":", None, Some("application/json")).unwrap_err();

        assert_eq!(message(error), "POST body sent invalid JSON.");
    }

    #[test]
    fn corrupt_gzip_body() {
        let error = decode(JSON_BODY.as_bytes(), Some("gzip"), Some("application/json")).unwrap_err();

        assert!(message(error).starts_with("Invalid body: "));
    }

    #[tokio::test]
    async fn request_without_content_type_is_drained() {
        let polled = Arc::new(AtomicBool::new(false));
        let seen = polled.clone();
        let chunks = futures::stream::iter([Bytes::from_static(b"{")]).map(move |chunk| {
            seen.store(true, Ordering::SeqCst);
            Ok::<_, Infallible>(Frame::data(chunk))
        });
        let (parts, body) = http::Request::builder()
            .method("POST")
            .uri("/graphql")
            .body(StreamBody::new(chunks))
            .unwrap()
            .into_parts();

        let parameters = decode_request(&parts, body, DEFAULT_MAX_REQUEST_BYTES)
            .await
            .unwrap();

        assert!(parameters.is_empty());
        assert!(polled.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn oversized_request_is_rejected_while_reading() {
        let (parts, body) = http::Request::builder()
            .method("POST")
            .uri("/graphql")
            .header(CONTENT_TYPE, "application/json")
            .body(http_body_util::Full::new(Bytes::from_static(
                JSON_BODY.as_bytes(),
            )))
            .unwrap()
            .into_parts();

        let error = decode_request(&parts, body, 16).await.unwrap_err();

        let error = error.as_client().unwrap();
        assert_eq!(error.status, StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(
            error.errors[0].extension_code().as_deref(),
            Some("PAYLOAD_TOO_LARGE")
        );
    }

    #[test]
    fn decompression_stops_at_the_limit() {
        let inflated = format!(
            r#"{{"query":"{{ ships }}","padding":"{}"}}"#,
            " ".repeat(64 * 1024)
        );
        let mut gzip = GzEncoder::new(Vec::new(), Compression::best());
        gzip.write_all(inflated.as_bytes()).unwrap();
        let gzip = gzip.finish().unwrap();
        assert!(gzip.len() < 1024);

        let error =
            decode_with_limit(&gzip, Some("gzip"), Some("application/json"), 1024).unwrap_err();
        let accepted = decode_with_limit(
            &gzip,
            Some("gzip"),
            Some("application/json"),
            inflated.len(),
        )
        .unwrap();

        assert_eq!(error.status, StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(accepted.get("query"), Some(&json!("{ ships }")));
    }

    #[tokio::test]
    async fn request_body_is_decoded() {
        let (parts, body) = http::Request::builder()
            .method("POST")
            .uri("/graphql")
            .header(CONTENT_TYPE, "application/json")
            .body(http_body_util::Full::new(Bytes::from_static(
                JSON_BODY.as_bytes(),
            )))
            .unwrap()
            .into_parts();

        let parameters = decode_request(&parts, body, DEFAULT_MAX_REQUEST_BYTES)
            .await
            .unwrap();

        assert_eq!(parameters.get("variables"), Some(&json!({ "first": 2 })));
    }
}
