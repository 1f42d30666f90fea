use std::cmp::Ordering;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::loader::LoadedContent;

/// Name of the pseudo-migration that brackets the start of a deployment.
pub const BEGIN_PSEUDO_MIGRATION: &str = "_Begin";

/// Name of the pseudo-migration that brackets the end of a deployment.
pub const END_PSEUDO_MIGRATION: &str = "_End";

/// A deployment sweep, and equally the phase a piece of migration content
/// belongs to. Pre runs while applications are live, Core runs during a
/// downtime window, Post runs once applications have been upgraded.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MigrationPhase {
    Pre,
    Core,
    Post,
}

impl MigrationPhase {
    pub const ALL: [MigrationPhase; 3] = [
        MigrationPhase::Pre,
        MigrationPhase::Core,
        MigrationPhase::Post,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            MigrationPhase::Pre => "Pre",
            MigrationPhase::Core => "Core",
            MigrationPhase::Post => "Post",
        }
    }

    /// Registry column recording when this phase ran on a target.
    pub(crate) fn run_date_column(self) -> &'static str {
        match self {
            MigrationPhase::Pre => "PreRunDate",
            MigrationPhase::Core => "CoreRunDate",
            MigrationPhase::Post => "PostRunDate",
        }
    }
}

impl fmt::Display for MigrationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How far a migration has advanced on a target database. Advances only;
/// the numeric values match the registry's computed `State` column.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum MigrationState {
    #[default]
    NotApplied = 0,
    AppliedPre = 1,
    AppliedCore = 2,
    AppliedPost = 3,
}

impl MigrationState {
    pub fn from_i32(value: i32) -> Option<MigrationState> {
        match value {
            0 => Some(MigrationState::NotApplied),
            1 => Some(MigrationState::AppliedPre),
            2 => Some(MigrationState::AppliedCore),
            3 => Some(MigrationState::AppliedPost),
            _ => None,
        }
    }

    /// Whether this state means the given phase content has already run.
    pub fn covers(self, phase: MigrationPhase) -> bool {
        self as i32 > phase as i32
    }
}

impl fmt::Display for MigrationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MigrationState::NotApplied => "NotApplied",
            MigrationState::AppliedPre => "AppliedPre",
            MigrationState::AppliedCore => "AppliedCore",
            MigrationState::AppliedPost => "AppliedPost",
        })
    }
}

/// One phase's worth of a migration's SQL.
#[derive(Clone, Debug, Default)]
pub struct MigrationContent {
    sql: String,
    is_required: bool,
    planned_phase: Option<MigrationPhase>,
}

impl MigrationContent {
    pub(crate) fn new(sql: String, is_required: bool) -> MigrationContent {
        MigrationContent {
            sql,
            is_required,
            planned_phase: None,
        }
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// True iff the phase contained authored SQL, as opposed to synthesized
    /// registration batches only.
    pub fn is_required(&self) -> bool {
        self.is_required
    }

    /// The deployment sweep the planner scheduled this content into, if any.
    pub fn planned_phase(&self) -> Option<MigrationPhase> {
        self.planned_phase
    }

    pub(crate) fn set_planned_phase(&mut self, phase: MigrationPhase) {
        self.planned_phase = Some(phase);
    }
}

/// A dependency declared with `--# REQUIRES`, bound to the pending-list
/// index of its target by the reference resolver when the target exists.
#[derive(Clone, Debug)]
pub struct MigrationReference {
    name: String,
    target: Option<usize>,
}

impl MigrationReference {
    pub(crate) fn new(name: String) -> MigrationReference {
        MigrationReference { name, target: None }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn target(&self) -> Option<usize> {
        self.target
    }

    pub(crate) fn bind(&mut self, target: Option<usize>) {
        self.target = target;
    }
}

/// A single validation finding for a migration.
#[derive(Clone, Debug)]
pub struct Diagnostic {
    is_error: bool,
    message: String,
}

impl Diagnostic {
    pub(crate) fn error(message: String) -> Diagnostic {
        Diagnostic {
            is_error: true,
            message,
        }
    }

    pub(crate) fn warning(message: String) -> Diagnostic {
        Diagnostic {
            is_error: false,
            message,
        }
    }

    pub fn is_error(&self) -> bool {
        self.is_error
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// A migration as seen by one target database: an applied registry row, a
/// defined script directory, or the merge of both.
#[derive(Clone, Debug, Default)]
pub struct Migration {
    name: String,
    path: Option<PathBuf>,
    hash: String,
    state: MigrationState,
    has_changed: bool,
    is_content_loaded: bool,
    pre: MigrationContent,
    core: MigrationContent,
    post: MigrationContent,
    depends_on: Vec<MigrationReference>,
    diagnostics: Vec<Diagnostic>,
}

impl Migration {
    /// A migration read back from a target's registry table. A blank hash
    /// means the row opted out of change detection.
    pub fn applied(
        name: impl Into<String>,
        hash: impl Into<String>,
        state: MigrationState,
    ) -> Migration {
        let hash: String = hash.into();
        Migration {
            name: name.into(),
            hash: if hash.trim().is_empty() {
                String::new()
            } else {
                hash
            },
            state,
            ..Migration::default()
        }
    }

    /// A migration defined on disk and not yet recorded on the target.
    pub(crate) fn defined(name: &str, path: &Path, hash: &str) -> Migration {
        Migration {
            name: name.to_string(),
            path: Some(path.to_path_buf()),
            hash: hash.to_string(),
            ..Migration::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Path to the migration's entry script, absent when the migration is
    /// applied on the target but its source has been removed.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    pub fn state(&self) -> MigrationState {
        self.state
    }

    /// True iff the applied hash exists, is non-blank, and differs from the
    /// defined hash.
    pub fn has_changed(&self) -> bool {
        self.has_changed
    }

    pub fn is_content_loaded(&self) -> bool {
        self.is_content_loaded
    }

    pub fn is_pseudo(&self) -> bool {
        name_rank(&self.name) != 0
    }

    pub fn content(&self, phase: MigrationPhase) -> &MigrationContent {
        match phase {
            MigrationPhase::Pre => &self.pre,
            MigrationPhase::Core => &self.core,
            MigrationPhase::Post => &self.post,
        }
    }

    pub(crate) fn content_mut(&mut self, phase: MigrationPhase) -> &mut MigrationContent {
        match phase {
            MigrationPhase::Pre => &mut self.pre,
            MigrationPhase::Core => &mut self.core,
            MigrationPhase::Post => &mut self.post,
        }
    }

    pub fn depends_on(&self) -> &[MigrationReference] {
        &self.depends_on
    }

    pub(crate) fn depends_on_mut(&mut self) -> &mut [MigrationReference] {
        &mut self.depends_on
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub(crate) fn add_diagnostic(&mut self, diagnostic: Diagnostic) {
        self.diagnostics.push(diagnostic);
    }

    #[cfg(test)]
    pub(crate) fn set_state_for_tests(&mut self, state: MigrationState) {
        self.state = state;
    }

    /// Copy the definition-only fields onto an applied instance.
    pub(crate) fn adopt_definition(&mut self, path: &Path, hash: &str, has_changed: bool) {
        self.path = Some(path.to_path_buf());
        self.hash = hash.to_string();
        self.has_changed = has_changed;
    }

    /// Copy loaded phase content and dependency declarations from a
    /// definition.
    pub(crate) fn install_content(&mut self, content: &LoadedContent) {
        for phase in MigrationPhase::ALL {
            let source = content.phase(phase);
            *self.content_mut(phase) =
                MigrationContent::new(source.sql().to_string(), source.is_required());
        }
        self.depends_on = content
            .depends_on()
            .iter()
            .map(|name| MigrationReference::new(name.clone()))
            .collect();
        self.is_content_loaded = true;
    }
}

impl fmt::Display for Migration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

impl Eq for Migration {}

impl PartialEq for Migration {
    fn eq(&self, other: &Migration) -> bool {
        compare_names(&self.name, &other.name) == Ordering::Equal
    }
}

impl Ord for Migration {
    fn cmp(&self, other: &Migration) -> Ordering {
        compare_names(&self.name, &other.name)
    }
}

impl PartialOrd for Migration {
    fn partial_cmp(&self, other: &Migration) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

fn name_rank(name: &str) -> i8 {
    if eq_ignore_case(name, BEGIN_PSEUDO_MIGRATION) {
        -1
    } else if eq_ignore_case(name, END_PSEUDO_MIGRATION) {
        1
    } else {
        0
    }
}

/// Total order over migration names: `_Begin` sorts before every plain name
/// and `_End` after; otherwise names compare case-insensitively.
pub fn compare_names(a: &str, b: &str) -> Ordering {
    name_rank(a)
        .cmp(&name_rank(b))
        .then_with(|| cmp_ignore_case(a, b))
}

pub(crate) fn cmp_ignore_case(a: &str, b: &str) -> Ordering {
    a.chars()
        .flat_map(char::to_uppercase)
        .cmp(b.chars().flat_map(char::to_uppercase))
}

pub fn eq_ignore_case(a: &str, b: &str) -> bool {
    cmp_ignore_case(a, b) == Ordering::Equal
}

/// Case-folded map key for name lookups.
pub(crate) fn fold_name(name: &str) -> String {
    name.chars().flat_map(char::to_uppercase).collect()
}
