//! End-to-end session tests over an in-memory stub executor that keeps a
//! tiny registry of its own, so registration batches advance migration
//! state between sweeps the way a real target would.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use sqldeploy_core::{
    discover_migrations, AsyncExecutor, AsyncQueryRegistry, Connect, Migration, MigrationPhase,
    MigrationSession, MigrationState, ParallelSet, SessionOptions, Target,
};
use tempfile::TempDir;

#[derive(Debug)]
struct StubError(String);

impl fmt::Display for StubError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for StubError {}

type Registry = HashMap<String, BTreeMap<String, (String, MigrationState)>>;

/// Hands out in-memory executors that record every executed batch as
/// `(database, sql)` pairs and honor registration upserts.
#[derive(Default)]
struct StubConnector {
    registry: Arc<Mutex<Registry>>,
    executed: Arc<Mutex<Vec<(String, String)>>>,
    fail_matching: Option<&'static str>,
}

impl StubConnector {
    fn seed(&self, database: &str, name: &str, hash: &str, state: MigrationState) {
        self.registry
            .lock()
            .unwrap()
            .entry(database.to_string())
            .or_default()
            .insert(name.to_string(), (hash.to_string(), state));
    }
}

struct StubExecutor {
    database: String,
    registry: Arc<Mutex<Registry>>,
    executed: Arc<Mutex<Vec<(String, String)>>>,
    fail_matching: Option<&'static str>,
}

impl StubExecutor {
    /// Interpret a registration `MERGE` the way the real table would.
    fn apply_registration(&self, sql: &str) {
        if !sql.contains("MERGE _deploy.Migration") {
            return;
        }
        let Some(name) = extract(sql, "SELECT N'", "' AS Name") else {
            return;
        };
        let Some(hash) = extract(sql, "Hash = '", "'") else {
            return;
        };
        let state = if sql.contains("PostRunDate") {
            MigrationState::AppliedPost
        } else if sql.contains("CoreRunDate") {
            MigrationState::AppliedCore
        } else {
            MigrationState::AppliedPre
        };

        let mut registry = self.registry.lock().unwrap();
        let rows = registry.entry(self.database.clone()).or_default();
        let row = rows
            .entry(name.to_string())
            .or_insert_with(|| (hash.to_string(), state));
        row.0 = hash.to_string();
        row.1 = row.1.max(state);
    }
}

fn extract<'a>(sql: &'a str, prefix: &str, suffix: &str) -> Option<&'a str> {
    let start = sql.find(prefix)? + prefix.len();
    let end = sql[start..].find(suffix)?;
    Some(&sql[start..start + end])
}

#[async_trait]
impl AsyncExecutor for StubExecutor {
    type Error = StubError;

    async fn execute(&mut self, sql: &str) -> Result<(), StubError> {
        if let Some(marker) = self.fail_matching {
            if sql.contains(marker) {
                return Err(StubError(format!("forced failure on '{marker}'")));
            }
        }
        self.apply_registration(sql);
        self.executed
            .lock()
            .unwrap()
            .push((self.database.clone(), sql.to_string()));
        Ok(())
    }
}

#[async_trait]
impl AsyncQueryRegistry for StubExecutor {
    async fn query_registry(&mut self, _query: &str) -> Result<Vec<Migration>, StubError> {
        let registry = self.registry.lock().unwrap();
        let rows = registry.get(&self.database);
        Ok(rows
            .map(|rows| {
                rows.iter()
                    .map(|(name, (hash, state))| Migration::applied(name, hash, *state))
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[async_trait]
impl Connect for StubConnector {
    type Executor = StubExecutor;

    async fn connect(&self, target: &Target) -> Result<StubExecutor, sqldeploy_core::Error> {
        Ok(StubExecutor {
            database: target.database.clone(),
            registry: Arc::clone(&self.registry),
            executed: Arc::clone(&self.executed),
            fail_matching: self.fail_matching,
        })
    }
}

fn write_migration(root: &Path, name: &str, main_sql: &str) {
    let dir = root.join("Migrations").join(name);
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("_Main.sql"), main_sql).unwrap();
}

fn target(database: &str) -> Target {
    Target {
        server: "stub".to_string(),
        database: database.to_string(),
        connection: String::new(),
    }
}

fn one_set(databases: &[&str]) -> Vec<ParallelSet> {
    vec![ParallelSet {
        max_parallelism: 4,
        targets: databases.iter().map(|db| target(db)).collect(),
    }]
}

fn options(tmp_dir: &TempDir) -> SessionOptions {
    SessionOptions {
        source: tmp_dir.path().to_path_buf(),
        log_dir: tmp_dir.path().join("logs"),
        allow_core_phase: false,
        what_if: false,
    }
}

#[tokio::test]
async fn pre_sweep_applies_pre_content_in_order() {
    let tmp_dir = TempDir::new().unwrap();
    write_migration(
        tmp_dir.path(),
        "M1",
        "--# PRE\nSELECT 'pre one';\n--# CORE\nSELECT 'core one';\n",
    );
    write_migration(
        tmp_dir.path(),
        "M2",
        "--# PRE\nSELECT 'pre two';\n--# CORE\nSELECT 'core two';\n",
    );

    let connector = StubConnector::default();
    let executed = Arc::clone(&connector.executed);
    let session = MigrationSession::new(connector, options(&tmp_dir)).unwrap();
    session
        .run_phase(MigrationPhase::Pre, &one_set(&["app"]))
        .await
        .unwrap();

    let executed = executed.lock().unwrap();
    assert_eq!(executed.len(), 2);
    assert!(executed[0].1.contains("pre one"));
    assert!(executed[1].1.contains("pre two"));
    // each phase execution carries its own registration
    assert!(executed[0].1.contains("MERGE _deploy.Migration"));
    assert!(executed[0].1.contains("PreRunDate"));
    assert!(!executed[0].1.contains("core one"));
    assert!(!session.has_errors());

    let log = fs::read_to_string(tmp_dir.path().join("logs").join("stub.app.Pre.log")).unwrap();
    assert!(log.contains("Pending Migrations: 2"));
    assert!(log.contains("[M1 Pre]"));
    assert!(log.contains("Applied 2 migration(s)"));
}

#[tokio::test]
async fn what_if_mode_reports_without_executing() {
    let tmp_dir = TempDir::new().unwrap();
    write_migration(tmp_dir.path(), "M1", "--# PRE\nSELECT 'pre';\n");

    let connector = StubConnector::default();
    let executed = Arc::clone(&connector.executed);
    let session = MigrationSession::new(
        connector,
        SessionOptions {
            what_if: true,
            ..options(&tmp_dir)
        },
    )
    .unwrap();
    session
        .run_phase(MigrationPhase::Pre, &one_set(&["app"]))
        .await
        .unwrap();

    assert!(executed.lock().unwrap().is_empty());
    assert!(!session.has_errors());
    let log = fs::read_to_string(tmp_dir.path().join("logs").join("stub.app.Pre.log")).unwrap();
    assert!(log.contains("What-if mode"));
}

#[tokio::test]
async fn disruptive_core_content_needs_permission() {
    let tmp_dir = TempDir::new().unwrap();
    write_migration(tmp_dir.path(), "M1", "ALTER TABLE t DROP COLUMN c;\n");

    let connector = StubConnector::default();
    let executed = Arc::clone(&connector.executed);
    let session = MigrationSession::new(connector, options(&tmp_dir)).unwrap();
    let err = session
        .run_phase(MigrationPhase::Core, &one_set(&["app"]))
        .await
        .unwrap_err();

    assert!(err.to_string().contains("Core phase failed"));
    assert!(executed.lock().unwrap().is_empty());
    assert!(session.has_errors());
    let log = fs::read_to_string(tmp_dir.path().join("logs").join("stub.app.Core.log")).unwrap();
    assert!(log.contains("not given permission"));
}

#[tokio::test]
async fn allowed_core_content_executes() {
    let tmp_dir = TempDir::new().unwrap();
    write_migration(tmp_dir.path(), "M1", "ALTER TABLE t DROP COLUMN c;\n");

    let connector = StubConnector::default();
    let executed = Arc::clone(&connector.executed);
    let session = MigrationSession::new(
        connector,
        SessionOptions {
            allow_core_phase: true,
            ..options(&tmp_dir)
        },
    )
    .unwrap();
    session
        .run_phase(MigrationPhase::Core, &one_set(&["app"]))
        .await
        .unwrap();

    let executed = executed.lock().unwrap();
    assert_eq!(executed.len(), 1);
    assert!(executed[0].1.contains("DROP COLUMN"));
    assert!(executed[0].1.contains("CoreRunDate"));
}

#[tokio::test]
async fn changed_applied_migrations_fail_validation() {
    let tmp_dir = TempDir::new().unwrap();
    write_migration(tmp_dir.path(), "M1", "SELECT 1;\n");

    let connector = StubConnector::default();
    connector.seed(
        "app",
        "M1",
        "0000000000000000000000000000000000000000",
        MigrationState::AppliedCore,
    );
    let executed = Arc::clone(&connector.executed);
    let session = MigrationSession::new(connector, options(&tmp_dir)).unwrap();
    let err = session
        .run_phase(MigrationPhase::Post, &one_set(&["app"]))
        .await
        .unwrap_err();

    assert!(err.to_string().contains("failed on 1 of 1 database(s)"));
    assert!(executed.lock().unwrap().is_empty());
    assert!(session.has_errors());
    let log = fs::read_to_string(tmp_dir.path().join("logs").join("stub.app.Post.log")).unwrap();
    assert!(log.contains("has changed after being applied"));
    assert!(log.contains("Validation failed; nothing was executed."));
    assert!(log.contains("Applied 0 migration(s)"));
}

#[tokio::test]
async fn vanished_incomplete_migrations_fail_validation() {
    let tmp_dir = TempDir::new().unwrap();
    write_migration(tmp_dir.path(), "M1", "SELECT 1;\n");

    let connector = StubConnector::default();
    connector.seed("app", "M9", "", MigrationState::AppliedPre);
    let executed = Arc::clone(&connector.executed);
    let session = MigrationSession::new(connector, options(&tmp_dir)).unwrap();
    let err = session
        .run_phase(MigrationPhase::Core, &one_set(&["app"]))
        .await
        .unwrap_err();

    assert!(!err.is_canceled());
    assert!(executed.lock().unwrap().is_empty());
    let log = fs::read_to_string(tmp_dir.path().join("logs").join("stub.app.Core.log")).unwrap();
    assert!(log.contains("M9"));
    assert!(log.contains("no longer present"));
}

#[tokio::test]
async fn completed_deployments_replay_as_no_ops() {
    let tmp_dir = TempDir::new().unwrap();
    write_migration(tmp_dir.path(), "M1", "SELECT 1;\n");
    let hash = discover_migrations(tmp_dir.path(), None).unwrap()[0]
        .hash()
        .to_string();

    let connector = StubConnector::default();
    connector.seed("app", "M1", &hash, MigrationState::AppliedPost);
    let executed = Arc::clone(&connector.executed);
    let session = MigrationSession::new(connector, options(&tmp_dir)).unwrap();

    for phase in MigrationPhase::ALL {
        session.run_phase(phase, &one_set(&["app"])).await.unwrap();
    }
    assert!(executed.lock().unwrap().is_empty());
    assert!(!session.has_errors());
    let log = fs::read_to_string(tmp_dir.path().join("logs").join("stub.app.Pre.log")).unwrap();
    assert!(log.contains("Pending Migrations: 0"));
    assert!(log.contains("Nothing to deploy"));
}

#[tokio::test]
async fn cancellation_stops_dispatch_without_failing() {
    let tmp_dir = TempDir::new().unwrap();
    write_migration(tmp_dir.path(), "M1", "--# PRE\nSELECT 'pre';\n");

    let connector = StubConnector::default();
    let executed = Arc::clone(&connector.executed);
    let session = MigrationSession::new(connector, options(&tmp_dir)).unwrap();
    session.cancellation_token().cancel();

    let err = session
        .run_phase(MigrationPhase::Pre, &one_set(&["app"]))
        .await
        .unwrap_err();
    assert!(err.is_canceled());
    assert!(executed.lock().unwrap().is_empty());
    assert!(!session.has_errors());
}

#[tokio::test]
async fn every_target_in_a_set_is_deployed() {
    let tmp_dir = TempDir::new().unwrap();
    write_migration(tmp_dir.path(), "M1", "--# PRE\nSELECT 'pre';\n");

    let connector = StubConnector::default();
    let executed = Arc::clone(&connector.executed);
    let session = MigrationSession::new(connector, options(&tmp_dir)).unwrap();
    session
        .run_phase(MigrationPhase::Pre, &one_set(&["app1", "app2"]))
        .await
        .unwrap();

    let executed = executed.lock().unwrap();
    let mut databases: Vec<&str> = executed.iter().map(|(db, _)| db.as_str()).collect();
    databases.sort();
    databases.dedup();
    assert_eq!(databases, vec!["app1", "app2"]);
}

#[tokio::test]
async fn a_failing_batch_fails_the_phase() {
    let tmp_dir = TempDir::new().unwrap();
    write_migration(tmp_dir.path(), "M1", "--# PRE\nSELECT 'boom';\n");

    let connector = StubConnector {
        fail_matching: Some("boom"),
        ..StubConnector::default()
    };
    let session = MigrationSession::new(connector, options(&tmp_dir)).unwrap();
    let err = session
        .run_phase(MigrationPhase::Pre, &one_set(&["app"]))
        .await
        .unwrap_err();

    assert!(err.to_string().contains("Pre phase failed"));
    assert!(session.has_errors());
    let log = fs::read_to_string(tmp_dir.path().join("logs").join("stub.app.Pre.log")).unwrap();
    assert!(log.contains("[EXCEPTION]"));
    assert!(log.contains("forced failure"));
}

#[tokio::test]
async fn the_full_run_sweeps_all_three_phases() {
    let tmp_dir = TempDir::new().unwrap();
    write_migration(
        tmp_dir.path(),
        "M1",
        "--# PRE\nSELECT 'pre';\n--# POST\nSELECT 'post';\n",
    );

    let connector = StubConnector::default();
    let executed = Arc::clone(&connector.executed);
    let session = MigrationSession::new(connector, options(&tmp_dir)).unwrap();
    session.run(&one_set(&["app"])).await.unwrap();

    let executed = executed.lock().unwrap();
    // the Pre sweep ran the pre content, the Post sweep the post content,
    // and the Core sweep skipped the empty core slot
    assert_eq!(executed.len(), 2);
    assert!(executed[0].1.contains("'pre'"));
    assert!(executed[1].1.contains("'post'"));
}
