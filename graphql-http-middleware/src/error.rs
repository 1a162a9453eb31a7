//! Errors raised while turning an HTTP request into a GraphQL result.
//!
//! Every failure leaving the pipeline is an [`HttpError`], which is one of three kinds:
//! a client error, the empty-query refinement of a client error, or a server error.
use std::fmt;

use apollo_compiler::validation::DiagnosticList;
use displaydoc::Display;
use http::StatusCode;
use thiserror::Error;
use tower::BoxError;

use crate::graphql;

pub(crate) const MISSING_QUERY_MESSAGE: &str = "Must provide query string.";

/// Discriminant of an [`HttpError`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    /// Caused by malformed or invalid input.
    Client,
    /// No query text was supplied. A refinement of [`ErrorKind::Client`].
    EmptyQuery,
    /// Caused by misconfiguration or an unexpected failure.
    Server,
}

/// A classified pipeline failure.
#[derive(Debug, Error, Display)]
pub enum HttpError {
    /// {0}
    Client(ClientError),
    /// {0}
    EmptyQuery(ClientError),
    /// {0}
    Server(ServerError),
}

impl HttpError {
    /// The error raised when no query text is available.
    pub fn empty_query() -> Self {
        HttpError::EmptyQuery(ClientError::new(
            StatusCode::BAD_REQUEST,
            MISSING_QUERY_MESSAGE,
            "MISSING_QUERY_STRING",
        ))
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            HttpError::Client(_) => ErrorKind::Client,
            HttpError::EmptyQuery(_) => ErrorKind::EmptyQuery,
            HttpError::Server(_) => ErrorKind::Server,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            HttpError::Client(error) | HttpError::EmptyQuery(error) => error.status,
            HttpError::Server(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The client error carried by both client kinds.
    pub fn as_client(&self) -> Option<&ClientError> {
        match self {
            HttpError::Client(error) | HttpError::EmptyQuery(error) => Some(error),
            HttpError::Server(_) => None,
        }
    }
}

impl From<ClientError> for HttpError {
    fn from(error: ClientError) -> Self {
        HttpError::Client(error)
    }
}

impl From<ServerError> for HttpError {
    fn from(error: ServerError) -> Self {
        HttpError::Server(error)
    }
}

/// An error caused by the request itself.
///
/// It carries the GraphQL errors reported back to the client, one entry each.
#[derive(Clone, Debug, PartialEq)]
pub struct ClientError {
    pub status: StatusCode,
    pub errors: Vec<graphql::Error>,
}

impl ClientError {
    pub fn new(status: StatusCode, message: impl Into<String>, code: &str) -> Self {
        Self {
            status,
            errors: vec![graphql::Error::builder()
                .message(message)
                .extension_code(code)
                .build()],
        }
    }

    /// A `400 Bad Request` with a single message.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message, "BAD_REQUEST")
    }

    pub fn from_errors(status: StatusCode, errors: Vec<graphql::Error>) -> Self {
        Self { status, errors }
    }

    /// Convert compiler diagnostics, tagging each with `code`.
    pub(crate) fn from_diagnostics(
        status: StatusCode,
        diagnostics: &DiagnosticList,
        code: &str,
    ) -> Self {
        Self::from_errors(status, diagnostics_to_errors(diagnostics, code))
    }
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, error) in self.errors.iter().enumerate() {
            if index > 0 {
                f.write_str("\n")?;
            }
            match error.locations.first() {
                Some(location) => {
                    write!(f, "[{}:{}] {}", location.line, location.column, error.message)?
                }
                None => write!(f, "{}", error.message)?,
            }
        }
        Ok(())
    }
}

impl std::error::Error for ClientError {}

/// An error the client is not responsible for.
///
/// Never serialized to the client: only a generic message leaves the process.
#[derive(Debug)]
pub struct ServerError {
    pub message: String,
    pub source: Option<BoxError>,
}

impl ServerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Wrap an unrecognized failure.
    pub fn wrap(message: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// The message followed by every error in the source chain.
    pub fn chain(&self) -> String {
        let mut chain = self.message.clone();
        let mut source = std::error::Error::source(self);
        while let Some(error) = source {
            chain.push_str(": ");
            chain.push_str(&error.to_string());
            source = error.source();
        }
        chain
    }
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for ServerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|error| error as &(dyn std::error::Error + 'static))
    }
}

pub(crate) fn diagnostics_to_errors(
    diagnostics: &DiagnosticList,
    code: &str,
) -> Vec<graphql::Error> {
    diagnostics
        .iter()
        .map(|diagnostic| {
            let mut error = graphql::Error::from(diagnostic.to_json());
            error
                .extensions
                .entry("code")
                .or_insert_with(|| code.into());
            error
        })
        .collect()
}
