use std::cmp::Ordering;

use crate::migration::{
    cmp_ignore_case, Diagnostic, Migration, MigrationPhase, MigrationState,
};

/// Whether a migration participates in the current deployment sweep.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Applicability {
    /// Nothing of this migration is planned at or before the current sweep.
    None,
    /// Some content is planned for the current sweep.
    Allowed,
    /// Required content was planned for an earlier sweep that has not run.
    Blocked,
}

/// Annotate the pending list with diagnostics for the given deployment
/// sweep. Returns true when no errors were found. Pseudo-migrations are
/// exempt; they carry no hash, no dependencies, and no registry row.
pub fn validate_migrations(
    pending: &mut [Migration],
    phase: MigrationPhase,
    earliest_defined: Option<&str>,
) -> bool {
    let mut valid = true;
    for migration in pending.iter_mut() {
        if migration.is_pseudo() {
            continue;
        }
        let diagnostics = validate_one(migration, phase, earliest_defined);
        for diagnostic in diagnostics {
            valid &= !diagnostic.is_error();
            migration.add_diagnostic(diagnostic);
        }
    }
    valid
}

fn validate_one(
    migration: &Migration,
    phase: MigrationPhase,
    earliest_defined: Option<&str>,
) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();

    if migration.state() != MigrationState::NotApplied && migration.has_changed() {
        diagnostics.push(Diagnostic::error(format!(
            "Migration '{}' has changed after being applied through its {} phase; \
             revert the change or update the registered hash.",
            migration.name(),
            last_applied_phase(migration.state()),
        )));
    }

    for reference in migration.depends_on() {
        if reference.target().is_some() {
            continue;
        }
        let name = reference.name();
        if earliest_defined
            .is_some_and(|earliest| cmp_ignore_case(name, earliest) == Ordering::Less)
        {
            diagnostics.push(Diagnostic::warning(format!(
                "Migration '{}' depends on '{}', which is older than the earliest \
                 migration on disk; the dependency is assumed satisfied and ignored.",
                migration.name(),
                name,
            )));
            continue;
        }
        match cmp_ignore_case(name, migration.name()) {
            Ordering::Less => diagnostics.push(Diagnostic::error(format!(
                "Migration '{}' depends on '{}', which was not found; \
                 the dependency cannot be satisfied.",
                migration.name(),
                name,
            ))),
            Ordering::Greater => diagnostics.push(Diagnostic::error(format!(
                "Migration '{}' depends on '{}', which must run later in the \
                 sequence; a dependency must sort before its referrer.",
                migration.name(),
                name,
            ))),
            Ordering::Equal => diagnostics.push(Diagnostic::error(format!(
                "Migration '{}' depends on itself.",
                migration.name(),
            ))),
        }
    }

    let applicability = applicability(migration, phase);
    if applicability == Applicability::Blocked {
        diagnostics.push(Diagnostic::error(format!(
            "Migration '{}' cannot be applied in the {} phase because it has \
             required content planned for an earlier phase.",
            migration.name(),
            phase,
        )));
    }

    if applicability != Applicability::None && migration.path().is_none() {
        diagnostics.push(Diagnostic::error(format!(
            "Migration '{}' is applied through its {} phase but its source is \
             no longer present; it cannot be advanced further.",
            migration.name(),
            last_applied_phase(migration.state()),
        )));
    }

    diagnostics
}

fn applicability(migration: &Migration, current: MigrationPhase) -> Applicability {
    let mut result = Applicability::None;
    for phase in MigrationPhase::ALL {
        let content = migration.content(phase);
        let Some(planned) = content.planned_phase() else {
            continue;
        };
        if planned > current {
            continue;
        }
        if planned < current && content.is_required() {
            return Applicability::Blocked;
        }
        if planned == current {
            result = Applicability::Allowed;
        }
    }
    result
}

fn last_applied_phase(state: MigrationState) -> &'static str {
    match state {
        MigrationState::NotApplied => "(none)",
        MigrationState::AppliedPre => "Pre",
        MigrationState::AppliedCore => "Core",
        MigrationState::AppliedPost => "Post",
    }
}
