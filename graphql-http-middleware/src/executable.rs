//! Main entry point for CLI command to start server.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::anyhow;
use anyhow::Context;
use anyhow::Result;
use clap::Parser;
use clap::ValueEnum;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use crate::configuration::server::generate_config_schema;
use crate::configuration::server::ServerConfiguration;
use crate::configuration::ConfigurationSource;
use crate::http_server;
use crate::services::Executor;
use crate::services::GraphQLHandler;

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Options for the server
#[derive(Parser, Debug)]
#[command(
    name = "graphql-http-middleware",
    about = "Serve a GraphQL schema over HTTP",
    version
)]
pub(crate) struct Opt {
    /// Log level (off|error|warn|info|debug|trace).
    #[arg(
        long = "log",
        default_value = "info",
        alias = "log-level",
        env = "GRAPHQL_HTTP_LOG"
    )]
    log_level: String,

    /// Log output format.
    #[arg(
        long = "log-format",
        value_enum,
        default_value_t = LogFormat::Text,
        env = "GRAPHQL_HTTP_LOG_FORMAT"
    )]
    log_format: LogFormat,

    /// Configuration location relative to the current directory.
    #[arg(short, long = "config", env = "GRAPHQL_HTTP_CONFIG_PATH")]
    config_path: Option<PathBuf>,

    /// Schema location relative to the current directory. Overrides the configuration file.
    #[arg(short, long = "schema", env = "GRAPHQL_HTTP_SCHEMA_PATH")]
    schema_path: Option<PathBuf>,

    /// Address to listen on. Overrides the configuration file.
    #[arg(long, env = "GRAPHQL_HTTP_LISTEN")]
    listen: Option<SocketAddr>,

    /// Prints the configuration schema.
    #[arg(long)]
    config_schema: bool,
}

impl Opt {
    fn server_configuration(&self) -> Result<ServerConfiguration> {
        let mut configuration = match (&self.config_path, &self.schema_path) {
            (Some(config_path), _) => ServerConfiguration::load(config_path)
                .with_context(|| format!("could not load {}", config_path.display()))?,
            (None, Some(schema_path)) => ServerConfiguration::builder()
                .schema(schema_path.clone())
                .build(),
            (None, None) => {
                return Err(anyhow!(
                    "a schema is required: pass '--schema <file>' or '--config <file>'"
                ))
            }
        };
        if let Some(schema_path) = &self.schema_path {
            configuration.schema = schema_path.clone();
        }
        if let Some(listen) = self.listen {
            configuration.listen = listen;
        }
        Ok(configuration)
    }
}

/// This is the main server entrypoint.
pub fn main() -> Result<()> {
    let mut builder = tokio::runtime::Builder::new_multi_thread();
    builder.enable_all();
    if let Some(nb) = std::env::var("GRAPHQL_HTTP_NUM_CORES")
        .ok()
        .and_then(|value| value.parse::<usize>().ok())
    {
        builder.worker_threads(nb);
    }
    let runtime = builder.build()?;
    runtime.block_on(Executable::builder().start())
}

/// Entry point into creating a server executable.
pub struct Executable {}

#[buildstructor::buildstructor]
impl Executable {
    /// Parse the command line, set up logging and serve until Ctrl-C.
    ///
    /// `executor` replaces the built-in root value executor.
    #[builder(entry = "builder", exit = "start", visibility = "pub")]
    async fn start(executor: Option<Arc<dyn Executor>>) -> Result<()> {
        let opt = Opt::parse();

        if opt.config_schema {
            let schema = generate_config_schema();
            println!("{}", serde_json::to_string_pretty(&schema)?);
            return Ok(());
        }

        let builder = tracing_subscriber::fmt::fmt().with_env_filter(
            EnvFilter::try_new(&opt.log_level).context("could not parse log configuration")?,
        );
        match opt.log_format {
            LogFormat::Text => builder.try_init(),
            LogFormat::Json => builder.json().try_init(),
        }
        .map_err(|error| anyhow!("could not install the log subscriber: {error}"))?;

        let server_configuration = opt.server_configuration()?;
        let configuration = server_configuration.middleware_configuration()?;
        let handler = GraphQLHandler::builder()
            .configuration(ConfigurationSource::Static(configuration))
            .and_executor(executor)
            .max_request_bytes(server_configuration.limits.http_max_request_bytes)
            .build();
        let router = http_server::routes(&handler, &server_configuration.paths);

        let listener = TcpListener::bind(server_configuration.listen)
            .await
            .with_context(|| format!("could not listen on {}", server_configuration.listen))?;
        tracing::info!(
            "GraphQL endpoint on http://{}{}, GraphiQL on http://{}{}",
            server_configuration.listen,
            server_configuration.paths.graphql,
            server_configuration.listen,
            server_configuration.paths.graphiql,
        );

        if let Err(err) =
            http_server::serve(listener, router, http_server::shutdown_signal()).await
        {
            tracing::error!("{}", err);
            return Err(err.into());
        }
        Ok(())
    }
}
