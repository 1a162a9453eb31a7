//! The steps of the request pipeline.

pub mod body;
pub mod execution;
pub mod executor;
pub mod middleware;
pub mod parameters;
pub mod render;

pub use self::executor::ExecutionContext;
pub use self::executor::ExecutionRequest;
pub use self::executor::Executor;
pub use self::executor::RootValueExecutor;
pub use self::middleware::Endpoint;
pub use self::middleware::GraphQLHandler;
pub use self::middleware::GraphQLService;
pub use self::parameters::Parameters;
pub use self::render::RenderMode;
