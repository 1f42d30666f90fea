use async_trait::async_trait;

use crate::error::Error;
use crate::migration::Migration;
use crate::session::Target;

/// Executes SQL on one open target connection. Execution carries no
/// driver-side timeout; the session's cancellation token is the only bound
/// on duration.
#[async_trait]
pub trait AsyncExecutor {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Run one batch of SQL to completion, discarding any rows it returns.
    async fn execute(&mut self, sql: &str) -> Result<(), Self::Error>;
}

/// Reads the applied-migration registry of a target database.
#[async_trait]
pub trait AsyncQueryRegistry: AsyncExecutor {
    /// Run the registry query and map its `(Name, Hash, State)` rows to
    /// applied migrations, ordered by name. A missing registry table yields
    /// an empty list.
    async fn query_registry(&mut self, query: &str) -> Result<Vec<Migration>, Self::Error>;
}

/// Opens connections to target databases.
#[async_trait]
pub trait Connect: Send + Sync {
    type Executor: AsyncQueryRegistry + Send;

    async fn connect(&self, target: &Target) -> Result<Self::Executor, Error>;
}
