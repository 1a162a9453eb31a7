//! A GraphQL HTTP middleware.
//!
//! Turns HTTP requests into executions of a GraphQL document and renders the result, either as
//! JSON or as an interactive GraphiQL page.

#![warn(unreachable_pub)]

pub mod json_ext;

pub mod configuration;
mod context;
pub mod error;
mod executable;
pub mod graphql;
pub mod http_server;
pub mod reporting;
pub mod services;

pub use configuration::Configuration;
pub use configuration::ConfigurationSource;
pub use context::Context;
pub use executable::main;
pub use executable::Executable;
pub use services::Endpoint;
pub use services::GraphQLHandler;
pub use services::GraphQLService;
