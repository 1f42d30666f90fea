use async_trait::async_trait;
use futures::{
    io::{AsyncRead, AsyncWrite},
    TryStreamExt,
};
use tiberius::{error::Error, Client, QueryItem};

use crate::executor::{AsyncExecutor, AsyncQueryRegistry};
use crate::migration::{Migration, MigrationState};

#[async_trait]
impl<S> AsyncExecutor for Client<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    type Error = Error;

    async fn execute(&mut self, sql: &str) -> Result<(), Self::Error> {
        // drain the stream so every statement in the batch runs to
        // completion and server errors surface here
        self.simple_query(sql).await?.into_results().await.map(drop)
    }
}

#[async_trait]
impl<S> AsyncQueryRegistry for Client<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn query_registry(&mut self, query: &str) -> Result<Vec<Migration>, Self::Error> {
        let mut rows = self.simple_query(query).await?;
        let mut applied = Vec::new();
        // `Row::get` maps to Option<T>, hence the unwraps on NOT NULL columns
        while let Some(item) = rows.try_next().await? {
            if let QueryItem::Row(row) = item {
                let name = row.get::<&str, usize>(0).unwrap().to_string();
                let hash = row.get::<&str, usize>(1).unwrap_or("").to_string();
                let state = row.get::<i32, usize>(2).unwrap();
                let state = MigrationState::from_i32(state)
                    .expect("registry State must be between 0 and 3");
                applied.push(Migration::applied(name, hash, state));
            }
        }
        Ok(applied)
    }
}

#[cfg(feature = "tiberius-config")]
mod connector {
    use async_trait::async_trait;
    use tiberius::{Client, Config};
    use tokio::net::TcpStream;
    use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};

    use crate::error::{Error, WrapDeployError};
    use crate::executor::Connect;
    use crate::session::Target;

    /// Opens TCP connections to targets with the tiberius client.
    pub struct TiberiusConnector;

    #[async_trait]
    impl Connect for TiberiusConnector {
        type Executor = Client<Compat<TcpStream>>;

        async fn connect(&self, target: &Target) -> Result<Self::Executor, Error> {
            let config = Config::from_ado_string(&target.connection)
                .deploy_err(&format!("invalid connection string for {target}"))?;
            let tcp = TcpStream::connect(config.get_addr())
                .await
                .deploy_err(&format!("could not reach {target}"))?;
            tcp.set_nodelay(true)
                .deploy_err("could not configure the connection socket")?;
            Client::connect(config, tcp.compat_write())
                .await
                .deploy_err(&format!("could not open a connection to {target}"))
        }
    }
}

#[cfg(feature = "tiberius-config")]
pub use connector::TiberiusConnector;
