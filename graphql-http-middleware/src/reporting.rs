//! Reporting of server errors.
//!
//! Server errors never reach the client in detail. The handler hands them to an
//! [`ErrorReporter`] supplied at construction instead.
use crate::error::ServerError;

/// Receives every server error before the generic response is rendered.
#[cfg_attr(test, mockall::automock)]
pub trait ErrorReporter: Send + Sync + 'static {
    fn report(&self, error: &ServerError);
}

/// Emits each server error as a `tracing` error event with its full source chain.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingErrorReporter;

impl ErrorReporter for TracingErrorReporter {
    fn report(&self, error: &ServerError) {
        tracing::error!(error = %error.chain(), "graphql request failed with a server error");
    }
}
