use std::cmp::Ordering;
use std::collections::HashMap;

use crate::discover::SourceMigration;
use crate::error::Error;
use crate::migration::{compare_names, eq_ignore_case, fold_name, Migration, MigrationState};

/// Merge the defined and applied migration lists, both sorted by name order,
/// into the ordered pending list: everything validation or execution might
/// touch. Completed work with no remaining definition, and unchanged
/// completed pairs, are elided.
pub fn merge_migrations(
    defined: &[SourceMigration],
    applied: Vec<Migration>,
) -> Result<Vec<Migration>, Error> {
    let mut pending = Vec::with_capacity(defined.len() + applied.len());
    let mut defined = defined.iter().peekable();
    let mut applied = applied.into_iter().peekable();

    loop {
        let order = match (defined.peek(), applied.peek()) {
            (None, None) => break,
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (Some(def), Some(app)) => compare_names(def.name(), app.name()),
        };
        // safe to call unwrap below as the comparison already peeked the heads
        match order {
            Ordering::Less => {
                // defined only: not recorded on the target yet
                let def = defined.next().unwrap();
                pending.push(defined_only(def)?);
            }
            Ordering::Greater => {
                // applied only: the definition was removed; completed rows
                // are done, incomplete ones stay visible so validation can
                // warn
                let app = applied.next().unwrap();
                if app.state() != MigrationState::AppliedPost {
                    pending.push(app);
                }
            }
            Ordering::Equal => {
                let def = defined.next().unwrap();
                let app = applied.next().unwrap();
                if let Some(merged) = merge_pair(def, app)? {
                    pending.push(merged);
                }
            }
        }
    }

    // pseudo-migrations only bracket non-trivial deployments
    if pending.iter().all(Migration::is_pseudo) {
        pending.clear();
    }
    Ok(pending)
}

fn defined_only(def: &SourceMigration) -> Result<Migration, Error> {
    let content = def.content()?;
    let mut migration = Migration::defined(def.name(), def.path(), def.hash());
    migration.install_content(content);
    Ok(migration)
}

fn merge_pair(def: &SourceMigration, mut app: Migration) -> Result<Option<Migration>, Error> {
    // a blank applied hash opts out of change detection
    let has_changed = !app.hash().is_empty() && !eq_ignore_case(app.hash(), def.hash());
    if !has_changed && app.state() == MigrationState::AppliedPost {
        // complete and unchanged, not worth reporting
        return Ok(None);
    }
    app.adopt_definition(def.path(), def.hash(), has_changed);
    if app.state() != MigrationState::AppliedPost {
        app.install_content(def.content()?);
    }
    Ok(Some(app))
}

/// Bind textual dependency references to pending-list indexes. A valid
/// dependency sorts strictly earlier than its referrer, so a single forward
/// pass resolves everything resolvable; the rest stay unbound for the
/// validator to interpret.
pub fn resolve_references(pending: &mut [Migration]) {
    let mut seen: HashMap<String, usize> = HashMap::new();
    for index in 0..pending.len() {
        if pending[index].is_pseudo() {
            continue;
        }
        for reference in pending[index].depends_on_mut() {
            let target = seen.get(&fold_name(reference.name())).copied();
            reference.bind(target);
        }
        let key = fold_name(pending[index].name());
        seen.insert(key, index);
    }
}
