use std::fs;
use std::sync::OnceLock;

use regex::Regex;

use crate::discover::SourceMigration;
use crate::error::{Error, Kind};
use crate::migration::{
    cmp_ignore_case, eq_ignore_case, MigrationPhase, BEGIN_PSEUDO_MIGRATION, END_PSEUDO_MIGRATION,
};
use crate::preprocess::Preprocessor;
use crate::registry;

/// Matches a magic comment line: `--# NAME` or `--# NAME: ARG ARG`.
fn magic_comment_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^--#[ \t]*([^\s:]+)[ \t]*(?::[ \t]*(.*))?$").unwrap())
}

/// A migration script partitioned into its three phases, with dependency
/// declarations extracted.
#[derive(Clone, Debug, Default)]
pub struct LoadedContent {
    pre: PhaseContent,
    core: PhaseContent,
    post: PhaseContent,
    depends_on: Vec<String>,
}

impl LoadedContent {
    pub fn phase(&self, phase: MigrationPhase) -> &PhaseContent {
        match phase {
            MigrationPhase::Pre => &self.pre,
            MigrationPhase::Core => &self.core,
            MigrationPhase::Post => &self.post,
        }
    }

    fn phase_mut(&mut self, phase: MigrationPhase) -> &mut PhaseContent {
        match phase {
            MigrationPhase::Pre => &mut self.pre,
            MigrationPhase::Core => &mut self.core,
            MigrationPhase::Post => &mut self.post,
        }
    }

    /// Dependency names, deduplicated case-insensitively and sorted
    /// ascending.
    pub fn depends_on(&self) -> &[String] {
        &self.depends_on
    }
}

/// One phase's SQL as produced by the loader.
#[derive(Clone, Debug, Default)]
pub struct PhaseContent {
    sql: String,
    is_required: bool,
}

impl PhaseContent {
    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn is_required(&self) -> bool {
        self.is_required
    }
}

/// Read and partition a migration's entry script. Reached through
/// [`SourceMigration::content`], which guarantees at most one load per
/// migration.
pub(crate) fn load_content(source: &SourceMigration) -> Result<LoadedContent, Error> {
    let text = fs::read_to_string(source.path())
        .map_err(|err| Error::new(Kind::InvalidMigrationFile(source.path().to_path_buf(), err)))?;
    let directory = source.directory().to_string_lossy().into_owned();
    let batches = Preprocessor::new().define("Path", &directory).process(&text);
    Ok(partition_batches(
        source.name(),
        source.hash(),
        source.is_pseudo(),
        &batches,
    ))
}

/// Partition preprocessed batches into phase content. The accumulator starts
/// at Pre for `_Begin`, Post for `_End`, and Core otherwise; magic comments
/// switch it or declare dependencies.
pub(crate) fn partition_batches(
    name: &str,
    hash: &str,
    is_pseudo: bool,
    batches: &[String],
) -> LoadedContent {
    let mut partition = Partition::new(initial_phase(name));
    for batch in batches {
        partition.scan_batch(batch, is_pseudo);
    }
    partition.finish(name, hash, is_pseudo)
}

fn initial_phase(name: &str) -> MigrationPhase {
    if eq_ignore_case(name, BEGIN_PSEUDO_MIGRATION) {
        MigrationPhase::Pre
    } else if eq_ignore_case(name, END_PSEUDO_MIGRATION) {
        MigrationPhase::Post
    } else {
        MigrationPhase::Core
    }
}

struct Partition {
    phase: MigrationPhase,
    batches: [Vec<String>; 3],
    depends_on: Vec<String>,
}

impl Partition {
    fn new(phase: MigrationPhase) -> Partition {
        Partition {
            phase,
            batches: Default::default(),
            depends_on: Vec::new(),
        }
    }

    fn scan_batch(&mut self, batch: &str, is_pseudo: bool) {
        let mut state = ScanState::Normal;
        let mut chunk = String::new();
        for line in batch.lines() {
            if state == ScanState::Normal {
                if let Some(caps) = magic_comment_re().captures(line) {
                    let args = caps.get(2).map(|m| m.as_str()).unwrap_or("");
                    match &caps[1] {
                        "PRE" => self.switch_phase(MigrationPhase::Pre, &mut chunk),
                        "CORE" => self.switch_phase(MigrationPhase::Core, &mut chunk),
                        "POST" => self.switch_phase(MigrationPhase::Post, &mut chunk),
                        "REQUIRES" => {
                            // pseudo-migrations cannot declare dependencies
                            if !is_pseudo {
                                self.depends_on
                                    .extend(args.split_whitespace().map(str::to_string));
                            }
                        }
                        _ => {
                            // not our command, keep it in the current phase
                            chunk.push_str(line);
                            chunk.push('\n');
                        }
                    }
                    continue;
                }
            }
            state = advance_scan(state, line);
            chunk.push_str(line);
            chunk.push('\n');
        }
        self.flush_chunk(&mut chunk);
    }

    fn switch_phase(&mut self, phase: MigrationPhase, chunk: &mut String) {
        self.flush_chunk(chunk);
        self.phase = phase;
    }

    fn flush_chunk(&mut self, chunk: &mut String) {
        if chunk.trim().is_empty() {
            chunk.clear();
        } else {
            self.batches[self.phase as usize].push(std::mem::take(chunk));
        }
    }

    fn finish(mut self, name: &str, hash: &str, is_pseudo: bool) -> LoadedContent {
        self.depends_on.sort_by(|a, b| cmp_ignore_case(a, b));
        self.depends_on.dedup_by(|a, b| eq_ignore_case(a, b));

        let mut content = LoadedContent {
            depends_on: self.depends_on,
            ..LoadedContent::default()
        };
        for phase in MigrationPhase::ALL {
            let mut batches = std::mem::take(&mut self.batches[phase as usize]);
            let is_required = !batches.is_empty();
            if is_required && !is_pseudo {
                batches.push(print_batch(name, phase));
                batches.push(registration_batch(name, hash, phase));
            }
            *content.phase_mut(phase) = PhaseContent {
                sql: batches.join("\n"),
                is_required,
            };
        }
        content
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum ScanState {
    Normal,
    StringLiteral,
    QuotedIdentifier,
    BlockComment,
}

/// Advance the scanner over one line so magic comments inside string
/// literals, quoted identifiers, and block comments are not honored. Line
/// comments end at the newline; block comments do not nest.
fn advance_scan(mut state: ScanState, line: &str) -> ScanState {
    let bytes = line.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match state {
            ScanState::Normal => match bytes[i] {
                b'\'' => {
                    state = ScanState::StringLiteral;
                    i += 1;
                }
                b'[' => {
                    state = ScanState::QuotedIdentifier;
                    i += 1;
                }
                b'-' if bytes.get(i + 1) == Some(&b'-') => break,
                b'/' if bytes.get(i + 1) == Some(&b'*') => {
                    state = ScanState::BlockComment;
                    i += 2;
                }
                _ => i += 1,
            },
            ScanState::StringLiteral => match bytes[i] {
                b'\'' if bytes.get(i + 1) == Some(&b'\'') => i += 2,
                b'\'' => {
                    state = ScanState::Normal;
                    i += 1;
                }
                _ => i += 1,
            },
            ScanState::QuotedIdentifier => match bytes[i] {
                b']' if bytes.get(i + 1) == Some(&b']') => i += 2,
                b']' => {
                    state = ScanState::Normal;
                    i += 1;
                }
                _ => i += 1,
            },
            ScanState::BlockComment => match bytes[i] {
                b'*' if bytes.get(i + 1) == Some(&b'/') => {
                    state = ScanState::Normal;
                    i += 2;
                }
                _ => i += 1,
            },
        }
    }
    state
}

fn print_batch(name: &str, phase: MigrationPhase) -> String {
    format!(
        "PRINT N'Migration {}: {} phase complete.';",
        registry::sql_escape(name),
        phase
    )
}

/// Registry upsert recording that one phase of a migration ran, guarded so a
/// lost row surfaces as an error instead of a silent no-op.
fn registration_batch(name: &str, hash: &str, phase: MigrationPhase) -> String {
    let column = phase.run_date_column();
    format!(
        concat!(
            "MERGE {table} WITH (HOLDLOCK) AS target\n",
            "USING (SELECT N'{name}' AS Name) AS source\n",
            "    ON target.Name = source.Name\n",
            "WHEN MATCHED THEN\n",
            "    UPDATE SET Hash = '{hash}', {column} = SYSUTCDATETIME()\n",
            "WHEN NOT MATCHED THEN\n",
            "    INSERT (Name, Hash, {column}) VALUES (source.Name, '{hash}', SYSUTCDATETIME());\n",
            "IF @@ROWCOUNT <> 1\n",
            "    THROW 50001, N'Migration registration affected an unexpected number of rows.', 1;"
        ),
        table = registry::REGISTRY_TABLE,
        name = registry::sql_escape(name),
        hash = registry::sql_escape(hash),
        column = column,
    )
}
