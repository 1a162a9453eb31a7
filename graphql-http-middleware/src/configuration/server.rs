//! Deployment configuration of the standalone server.
use std::net::SocketAddr;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use apollo_compiler::validation::Valid;
use apollo_compiler::Schema;
use displaydoc::Display;
use schemars::gen::SchemaSettings;
use schemars::schema::RootSchema;
use schemars::JsonSchema;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use super::Configuration;
use crate::json_ext::Value;
use crate::services::body::DEFAULT_MAX_REQUEST_BYTES;

/// Configuration error.
#[derive(Debug, Error, Display)]
#[non_exhaustive]
pub enum ConfigurationError {
    /// could not read {path}: {error}
    CannotRead {
        path: PathBuf,
        error: std::io::Error,
    },
    /// could not deserialize configuration: {0}
    Deserialize(serde_yaml::Error),
    /// could not deserialize the root value in {path}: {error}
    RootValue {
        path: PathBuf,
        error: serde_yaml::Error,
    },
    /// invalid schema in {path}: {message}
    Schema { path: PathBuf, message: String },
    /// {message}: {error}
    InvalidConfiguration {
        message: &'static str,
        error: String,
    },
}

/// Configuration of the standalone server, read from YAML.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ServerConfiguration {
    /// The socket address and port to listen on.
    /// Defaults to 127.0.0.1:4000
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,

    /// Path to the schema definition (SDL) file.
    pub schema: PathBuf,

    /// Optional JSON or YAML file holding the root value.
    #[serde(default)]
    pub root_value: Option<PathBuf>,

    /// Pretty print JSON responses.
    #[serde(default)]
    pub pretty: bool,

    /// Serve the interactive HTML page.
    /// enabled by default
    #[serde(default = "default_graphiql")]
    pub graphiql: bool,

    #[serde(default)]
    pub paths: Paths,

    #[serde(default)]
    pub limits: Limits,
}

/// Paths the two endpoints are mounted on.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct Paths {
    /// The JSON endpoint.
    /// default: "/graphql"
    #[serde(default = "default_graphql_path")]
    pub graphql: String,

    /// The interactive endpoint.
    /// default: "/graphiql"
    #[serde(default = "default_graphiql_path")]
    pub graphiql: String,
}

impl Default for Paths {
    fn default() -> Self {
        Self {
            graphql: default_graphql_path(),
            graphiql: default_graphiql_path(),
        }
    }
}

/// Request limits.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct Limits {
    /// Largest accepted request body in bytes, also applied after decompression.
    /// default: 2000000
    #[serde(default = "default_http_max_request_bytes")]
    pub http_max_request_bytes: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            http_max_request_bytes: default_http_max_request_bytes(),
        }
    }
}

fn default_http_max_request_bytes() -> usize {
    DEFAULT_MAX_REQUEST_BYTES
}

fn default_listen() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 4000))
}

fn default_graphiql() -> bool {
    true
}

fn default_graphql_path() -> String {
    String::from("/graphql")
}

fn default_graphiql_path() -> String {
    String::from("/graphiql")
}

#[buildstructor::buildstructor]
impl ServerConfiguration {
    #[builder(visibility = "pub")]
    fn new(
        listen: Option<SocketAddr>,
        schema: PathBuf,
        root_value: Option<PathBuf>,
        pretty: Option<bool>,
        graphiql: Option<bool>,
        paths: Option<Paths>,
        limits: Option<Limits>,
    ) -> Self {
        Self {
            listen: listen.unwrap_or_else(default_listen),
            schema,
            root_value,
            pretty: pretty.unwrap_or_default(),
            graphiql: graphiql.unwrap_or_else(default_graphiql),
            paths: paths.unwrap_or_default(),
            limits: limits.unwrap_or_default(),
        }
    }

    /// Read a configuration file. Relative paths inside it are relative to the file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigurationError> {
        let path = path.as_ref();
        let raw = read(path)?;
        let mut configuration = Self::parse(&raw)?;
        if let Some(base) = path.parent() {
            configuration.schema = base.join(&configuration.schema);
            configuration.root_value = configuration.root_value.map(|root| base.join(root));
        }
        Ok(configuration)
    }

    pub fn parse(raw: &str) -> Result<Self, ConfigurationError> {
        let configuration: Self =
            serde_yaml::from_str(raw).map_err(ConfigurationError::Deserialize)?;
        configuration.validate()?;
        Ok(configuration)
    }

    fn validate(&self) -> Result<(), ConfigurationError> {
        for path in [&self.paths.graphql, &self.paths.graphiql] {
            if !path.starts_with('/') {
                return Err(ConfigurationError::InvalidConfiguration {
                    message: "endpoint paths must start with a slash",
                    error: format!("{path} is not a valid path"),
                });
            }
        }
        if self.limits.http_max_request_bytes == 0 {
            return Err(ConfigurationError::InvalidConfiguration {
                message: "limits.http_max_request_bytes must be positive",
                error: String::from("0 would refuse every request body"),
            });
        }
        if self.paths.graphql == self.paths.graphiql {
            return Err(ConfigurationError::InvalidConfiguration {
                message: "endpoint paths must differ",
                error: format!("both endpoints are mounted on {}", self.paths.graphql),
            });
        }
        Ok(())
    }

    /// Load the schema and the root value into a middleware configuration.
    pub fn middleware_configuration(&self) -> Result<Configuration, ConfigurationError> {
        let schema = schema_from_file(&self.schema)?;
        let root_value = self
            .root_value
            .as_ref()
            .map(|path| {
                let raw = read(path)?;
                serde_yaml::from_str::<serde_json::Value>(&raw)
                    .map(Value::from)
                    .map_err(|error| ConfigurationError::RootValue {
                        path: path.clone(),
                        error,
                    })
            })
            .transpose()?;

        Ok(Configuration::builder()
            .schema(schema)
            .and_root_value(root_value)
            .pretty(self.pretty)
            .graphiql(self.graphiql)
            .build())
    }
}

fn read(path: &Path) -> Result<String, ConfigurationError> {
    std::fs::read_to_string(path).map_err(|error| ConfigurationError::CannotRead {
        path: path.to_path_buf(),
        error,
    })
}

/// The JSON schema of the configuration file.
pub fn generate_config_schema() -> RootSchema {
    let settings = SchemaSettings::draft2019_09().with(|s| {
        s.option_nullable = true;
        s.option_add_null_type = false;
        s.inline_subschemas = true;
    });
    settings
        .into_generator()
        .into_root_schema_for::<ServerConfiguration>()
}

/// Read and validate an SDL file.
pub(crate) fn schema_from_file(path: &Path) -> Result<Arc<Valid<Schema>>, ConfigurationError> {
    let sdl = read(path)?;
    Schema::parse_and_validate(sdl, path)
        .map(Arc::new)
        .map_err(|errors| ConfigurationError::Schema {
            path: path.to_path_buf(),
            message: errors.errors.to_string(),
        })
}
