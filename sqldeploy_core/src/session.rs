use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::apply::MigrationApplicator;
use crate::discover::{discover_migrations, SourceMigration};
use crate::error::{Error, Kind};
use crate::executor::Connect;
use crate::migration::MigrationPhase;

/// One target database: display names for logging plus the driver
/// connection string.
#[derive(Clone, Debug)]
pub struct Target {
    pub server: String,
    pub database: String,
    pub connection: String,
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.server, self.database)
    }
}

/// Databases deployed together under one parallelism bound. Sets run
/// concurrently with each other without limit; within a set at most
/// `max_parallelism` databases deploy at once.
#[derive(Clone, Debug)]
pub struct ParallelSet {
    pub max_parallelism: usize,
    pub targets: Vec<Target>,
}

/// Options for a deployment session.
#[derive(Clone, Debug)]
pub struct SessionOptions {
    /// Directory containing the `Migrations` tree.
    pub source: PathBuf,
    /// Directory receiving the per-database deployment logs.
    pub log_dir: PathBuf,
    /// Caller assertion that an outage window is in effect, permitting
    /// disruptive Core content to run.
    pub allow_core_phase: bool,
    /// Plan, validate, and report without executing any SQL.
    pub what_if: bool,
}

pub(crate) struct SessionContext<C: Connect> {
    pub(crate) connector: C,
    pub(crate) defined: Vec<SourceMigration>,
    pub(crate) earliest_defined: Option<String>,
    pub(crate) log_dir: PathBuf,
    pub(crate) allow_core_phase: bool,
    pub(crate) what_if: bool,
    pub(crate) cancel: CancellationToken,
    errors: AtomicUsize,
}

impl<C: Connect> SessionContext<C> {
    pub(crate) fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn has_errors(&self) -> bool {
        self.error_count() != 0
    }

    pub(crate) fn error_count(&self) -> usize {
        self.errors.load(Ordering::SeqCst)
    }
}

/// Coordinates one deployment across every target database. The defined
/// migration list is discovered once and shared immutably by every target;
/// the error counter and cancellation token span the whole session, so a
/// failure or cancellation on one target winds down the rest.
pub struct MigrationSession<C: Connect + 'static> {
    context: Arc<SessionContext<C>>,
}

impl<C: Connect + 'static> MigrationSession<C> {
    /// Discover the defined migrations and prepare a session.
    pub fn new(connector: C, options: SessionOptions) -> Result<MigrationSession<C>, Error> {
        let defined = discover_migrations(&options.source, None)?;
        let earliest_defined = defined
            .iter()
            .find(|migration| !migration.is_pseudo())
            .map(|migration| migration.name().to_string());
        Ok(MigrationSession {
            context: Arc::new(SessionContext {
                connector,
                defined,
                earliest_defined,
                log_dir: options.log_dir,
                allow_core_phase: options.allow_core_phase,
                what_if: options.what_if,
                cancel: CancellationToken::new(),
                errors: AtomicUsize::new(0),
            }),
        })
    }

    /// Token canceling every in-flight target of this session.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.context.cancel.clone()
    }

    /// Whether any target of this session has failed so far.
    pub fn has_errors(&self) -> bool {
        self.context.has_errors()
    }

    pub fn defined_migrations(&self) -> &[SourceMigration] {
        &self.context.defined
    }

    /// Run the Pre, Core, and Post sweeps in order, stopping at the first
    /// phase that fails.
    pub async fn run(&self, sets: &[ParallelSet]) -> Result<(), Error> {
        for phase in MigrationPhase::ALL {
            self.run_phase(phase, sets).await?;
        }
        Ok(())
    }

    /// Run a single deployment sweep across every parallel set.
    pub async fn run_phase(
        &self,
        phase: MigrationPhase,
        sets: &[ParallelSet],
    ) -> Result<(), Error> {
        let mut handles = Vec::new();
        for set in sets {
            let permits = Arc::new(Semaphore::new(set.max_parallelism.max(1)));
            for target in set.targets.clone() {
                let context = Arc::clone(&self.context);
                let permits = Arc::clone(&permits);
                handles.push(tokio::spawn(async move {
                    // safe to call unwrap as the semaphore is never closed
                    let _permit = permits.acquire_owned().await.unwrap();
                    if context.cancel.is_cancelled() {
                        return Err(Error::new(Kind::Canceled));
                    }
                    let applicator = MigrationApplicator::new(&context, &target, phase);
                    let result = applicator.apply().await;
                    if let Err(err) = &result {
                        if !err.is_canceled() {
                            context.record_error();
                        }
                    }
                    result.map(drop)
                }));
            }
        }

        let total = handles.len();
        let mut canceled = false;
        for joined in futures::future::join_all(handles).await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(err)) if err.is_canceled() => canceled = true,
                Ok(Err(_)) => {}
                Err(join_error) => {
                    log::error!("a deployment task panicked: {join_error}");
                    self.context.record_error();
                }
            }
        }

        let failed = self.context.error_count();
        if failed > 0 {
            return Err(Error::new(Kind::PhaseFailed {
                phase,
                failed,
                total,
            }));
        }
        if canceled {
            return Err(Error::new(Kind::Canceled));
        }
        Ok(())
    }
}
