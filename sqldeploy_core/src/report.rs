use std::path::{Path, PathBuf};

use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

use crate::error::{Error, Kind};
use crate::migration::{Migration, MigrationPhase};

/// Writes the per-database deployment log: one UTF-8 text file per target
/// and sweep, named `{server}.{database}.{phase}.log`.
pub struct TargetLog {
    path: PathBuf,
    file: File,
}

impl TargetLog {
    pub async fn create(
        directory: &Path,
        server: &str,
        database: &str,
        phase: MigrationPhase,
    ) -> Result<TargetLog, Error> {
        tokio::fs::create_dir_all(directory)
            .await
            .map_err(|err| Error::new(Kind::LogFile(directory.to_path_buf(), err)))?;
        let path = directory.join(format!(
            "{}.{}.{}.log",
            sanitize(server),
            sanitize(database),
            phase
        ));
        let file = File::create(&path)
            .await
            .map_err(|err| Error::new(Kind::LogFile(path.clone(), err)))?;
        Ok(TargetLog { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn line(&mut self, text: &str) -> Result<(), Error> {
        self.write(text).await?;
        self.write("\n").await
    }

    pub async fn blank(&mut self) -> Result<(), Error> {
        self.write("\n").await
    }

    async fn write(&mut self, text: &str) -> Result<(), Error> {
        self.file
            .write_all(text.as_bytes())
            .await
            .map_err(|err| Error::new(Kind::LogFile(self.path.clone(), err)))
    }

    /// System-identity header recorded at the top of every deployment log.
    pub async fn write_header(
        &mut self,
        phase: MigrationPhase,
        server: &str,
        database: &str,
    ) -> Result<(), Error> {
        let timestamp = OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .unwrap_or_default();
        let cpus = std::thread::available_parallelism()
            .map(std::num::NonZeroUsize::get)
            .unwrap_or(1);
        let lines = [
            format!("Deployment Phase:  {phase}"),
            format!("Server:            {server}"),
            format!("Database:          {database}"),
            format!("Start Time (UTC):  {timestamp}"),
            format!("Machine:           {}", env_or("HOSTNAME", "COMPUTERNAME")),
            format!("Logical CPUs:      {cpus}"),
            format!("User:              {}", env_or("USER", "USERNAME")),
            format!("Process ID:        {}", std::process::id()),
            format!(
                "Operating System:  {} {}",
                std::env::consts::OS,
                std::env::consts::ARCH
            ),
            format!(
                "Runtime:           {} {}",
                env!("CARGO_PKG_NAME"),
                env!("CARGO_PKG_VERSION")
            ),
        ];
        for line in lines {
            self.line(&line).await?;
        }
        Ok(())
    }
}

fn env_or(first: &str, second: &str) -> String {
    std::env::var(first)
        .or_else(|_| std::env::var(second))
        .unwrap_or_else(|_| "unknown".to_string())
}

/// Replace characters that cannot appear in a file name.
fn sanitize(component: &str) -> String {
    component
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect()
}

/// Render the pending-migrations table written to the log after planning:
/// one row per migration with its registry state and the sweep each content
/// slot was planned into.
pub(crate) fn pending_table(pending: &[Migration]) -> Vec<String> {
    let name_width = pending
        .iter()
        .map(|m| m.name().chars().count())
        .max()
        .unwrap_or(0)
        .max("Name".len());

    let mut lines = Vec::with_capacity(pending.len() + 2);
    lines.push(format!("Pending Migrations: {}", pending.len()));
    if pending.is_empty() {
        return lines;
    }
    lines.push(String::new());
    lines.push(format!(
        "{:<name_width$}  {:<11}  {:<4}  {:<4}  {:<4}  Depends-On",
        "Name", "State", "Pre", "Core", "Post"
    ));
    for migration in pending {
        let depends_on = if migration.depends_on().is_empty() {
            "(none)".to_string()
        } else {
            migration
                .depends_on()
                .iter()
                .map(|reference| reference.name())
                .collect::<Vec<_>>()
                .join(" ")
        };
        lines.push(format!(
            "{:<name_width$}  {:<11}  {:<4}  {:<4}  {:<4}  {}",
            migration.name(),
            migration.state().to_string(),
            planned_cell(migration, MigrationPhase::Pre),
            planned_cell(migration, MigrationPhase::Core),
            planned_cell(migration, MigrationPhase::Post),
            depends_on,
        ));
    }
    lines
}

fn planned_cell(migration: &Migration, phase: MigrationPhase) -> &'static str {
    match migration.content(phase).planned_phase() {
        Some(planned) => planned.as_str(),
        None => "-",
    }
}
