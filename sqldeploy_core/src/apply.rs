use std::future::Future;
use std::time::Instant;

use crate::error::{Error, Kind, WrapDeployError};
use crate::executor::{AsyncExecutor, AsyncQueryRegistry, Connect};
use crate::merge::{merge_migrations, resolve_references};
use crate::migration::MigrationPhase;
use crate::plan::plan_migrations;
use crate::registry::applied_migrations_query;
use crate::report::{pending_table, TargetLog};
use crate::session::{SessionContext, Target};
use crate::validate::validate_migrations;

/// Terminal outcome of one target's deployment sweep.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Everything applicable ran, or there was nothing to do.
    Successful,
    /// The sweep stopped early after a cancellation or a parallel peer
    /// failure.
    Incomplete,
    /// A migration failed on this target.
    Failed,
}

/// Applies one deployment sweep to a single target database: reads the
/// registry, merges, plans, validates, then executes the sweep's plan
/// entries in order over one connection, logging everything to the target's
/// deployment log.
pub struct MigrationApplicator<'a, C: Connect> {
    context: &'a SessionContext<C>,
    target: &'a Target,
    phase: MigrationPhase,
}

impl<'a, C: Connect> MigrationApplicator<'a, C> {
    pub(crate) fn new(
        context: &'a SessionContext<C>,
        target: &'a Target,
        phase: MigrationPhase,
    ) -> MigrationApplicator<'a, C> {
        MigrationApplicator {
            context,
            target,
            phase,
        }
    }

    pub async fn apply(&self) -> Result<ApplyOutcome, Error> {
        let started = Instant::now();
        let mut log = TargetLog::create(
            &self.context.log_dir,
            &self.target.server,
            &self.target.database,
            self.phase,
        )
        .await?;
        log::info!("{}: starting {} phase", self.target, self.phase);
        log.write_header(self.phase, &self.target.server, &self.target.database)
            .await?;

        let mut applied = 0usize;
        let result = self.apply_inner(&mut log, &mut applied).await;

        let marker = match &result {
            Ok(ApplyOutcome::Incomplete) => " [INCOMPLETE]",
            Ok(_) => "",
            Err(err) if err.is_canceled() => " [INCOMPLETE]",
            Err(_) => " [EXCEPTION]",
        };
        if let Err(err) = &result {
            if !err.is_canceled() {
                log.line(&format!("ERROR: {err}")).await.ok();
                log::error!("{}: {}", self.target, err);
            }
        }
        let footer = format!(
            "Applied {} migration(s) in {:.3} seconds{}",
            applied,
            started.elapsed().as_secs_f64(),
            marker
        );
        log.blank().await.ok();
        log.line(&footer).await.ok();
        log::info!("{}: {}", self.target, footer);

        result
    }

    async fn apply_inner(
        &self,
        log: &mut TargetLog,
        applied: &mut usize,
    ) -> Result<ApplyOutcome, Error> {
        let mut executor = self.context.connector.connect(self.target).await?;

        let earliest = self.context.earliest_defined.as_deref();
        let query = applied_migrations_query(earliest);
        let applied_rows = self
            .checked(
                executor.query_registry(&query),
                "could not read the applied-migration registry",
            )
            .await?;

        let mut pending = merge_migrations(&self.context.defined, applied_rows)?;
        resolve_references(&mut pending);
        let plan = plan_migrations(&mut pending);
        let valid = validate_migrations(&mut pending, self.phase, earliest);

        log.blank().await?;
        for line in pending_table(&pending) {
            log.line(&line).await?;
        }
        log.blank().await?;
        log.line("Validation Results:").await?;
        let mut reported = false;
        for migration in &pending {
            for diagnostic in migration.diagnostics() {
                reported = true;
                if diagnostic.is_error() {
                    log.line(&format!("    ERROR: {}", diagnostic.message())).await?;
                    log::error!("{}: {}", self.target, diagnostic.message());
                } else {
                    log.line(&format!("    WARNING: {}", diagnostic.message())).await?;
                    log::warn!("{}: {}", self.target, diagnostic.message());
                }
            }
        }
        if !reported {
            log.line("    (none)").await?;
        }
        if self.phase == MigrationPhase::Core
            && (plan.has_pre_content_in_core() || plan.has_post_content_in_core())
        {
            log.line(
                "The Core window includes content hoisted from other phases to \
                 satisfy dependencies.",
            )
            .await?;
        }

        if pending.is_empty() {
            log.line("Nothing to deploy; the target is up to date.").await?;
            return Ok(ApplyOutcome::Successful);
        }
        if !valid {
            self.context.record_error();
            log.line("Validation failed; nothing was executed.").await?;
            return Ok(ApplyOutcome::Successful);
        }
        if plan.is_empty(self.phase) {
            log.line(&format!("Nothing to do in the {} phase.", self.phase))
                .await?;
            return Ok(ApplyOutcome::Successful);
        }
        if self.phase == MigrationPhase::Core
            && plan.is_core_required()
            && !self.context.allow_core_phase
        {
            self.context.record_error();
            let message = "The plan contains disruptive Core content, but the session \
                           was not given permission to run a Core phase; re-run with \
                           the core phase allowed during an outage window.";
            log.line(message).await?;
            log::error!("{}: {}", self.target, message);
            return Ok(ApplyOutcome::Successful);
        }
        if self.context.what_if {
            log.line("What-if mode; skipping execution.").await?;
            return Ok(ApplyOutcome::Successful);
        }

        log.blank().await?;
        log.line("Execution Log:").await?;
        for entry in plan.entries(self.phase) {
            if self.context.has_errors() {
                log.line("A parallel target failed; stopping early.").await?;
                return Ok(ApplyOutcome::Incomplete);
            }
            let migration = &pending[entry.migration];
            let sql = migration.content(entry.phase).sql();
            if sql.trim().is_empty() {
                continue;
            }
            log.blank().await?;
            log.line(&format!("[{} {}]", migration.name(), entry.phase))
                .await?;
            self.checked(
                executor.execute(sql),
                &format!(
                    "error applying migration {} ({} content)",
                    migration.name(),
                    entry.phase
                ),
            )
            .await?;
            *applied += 1;
        }
        Ok(ApplyOutcome::Successful)
    }

    /// Run one I/O future under the session's cancellation token, mapping
    /// driver errors into connection errors.
    async fn checked<T, E>(
        &self,
        operation: impl Future<Output = Result<T, E>>,
        message: &str,
    ) -> Result<T, Error>
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        tokio::select! {
            _ = self.context.cancel.cancelled() => Err(Error::new(Kind::Canceled)),
            result = operation => result.deploy_err(message),
        }
    }
}
