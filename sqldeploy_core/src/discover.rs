use std::cmp::Ordering;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use once_cell::sync::OnceCell;
use sha1::{Digest, Sha1};
use walkdir::WalkDir;

use crate::error::{Error, Kind};
use crate::loader::{self, LoadedContent};
use crate::migration::{
    cmp_ignore_case, compare_names, eq_ignore_case, BEGIN_PSEUDO_MIGRATION, END_PSEUDO_MIGRATION,
};

/// Subdirectory of the source tree that holds migration directories.
pub const MIGRATIONS_DIR: &str = "Migrations";

/// Entry script every migration directory must contain.
pub const MAIN_SCRIPT: &str = "_Main.sql";

/// A migration defined on disk: a directory under `Migrations/` containing
/// `_Main.sql`. Content is loaded lazily and at most once, so a session can
/// share one defined list across many concurrent targets.
#[derive(Debug)]
pub struct SourceMigration {
    name: String,
    path: PathBuf,
    hash: String,
    is_pseudo: bool,
    content: OnceCell<LoadedContent>,
}

impl SourceMigration {
    pub(crate) fn new(name: String, path: PathBuf, hash: String) -> SourceMigration {
        let is_pseudo = eq_ignore_case(&name, BEGIN_PSEUDO_MIGRATION)
            || eq_ignore_case(&name, END_PSEUDO_MIGRATION);
        SourceMigration {
            name,
            path,
            hash,
            is_pseudo,
            content: OnceCell::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Path to the migration's entry script.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The migration directory itself.
    pub fn directory(&self) -> &Path {
        // safe to call unwrap as the entry script always sits inside the
        // migration directory
        self.path.parent().unwrap()
    }

    /// Uppercase-hex SHA-1 fingerprint of every `*.sql` file in the
    /// migration directory.
    pub fn hash(&self) -> &str {
        &self.hash
    }

    pub fn is_pseudo(&self) -> bool {
        self.is_pseudo
    }

    /// Partitioned phase content, loaded on first use. Concurrent callers
    /// perform exactly one load; the rest observe the loaded value.
    pub fn content(&self) -> Result<&LoadedContent, Error> {
        self.content.get_or_try_init(|| loader::load_content(self))
    }
}

/// Discover the migrations defined under `<source>/Migrations`, hashed and
/// sorted by the migration name order. `max_name` drops directories whose
/// names compare greater than the bound (case-insensitive, without pseudo
/// ranking).
pub fn discover_migrations(
    source: impl AsRef<Path>,
    max_name: Option<&str>,
) -> Result<Vec<SourceMigration>, Error> {
    let location = source.as_ref().join(MIGRATIONS_DIR);
    let location = location
        .canonicalize()
        .map_err(|err| Error::new(Kind::InvalidSourcePath(location.clone(), err)))?;

    let mut migrations = Vec::new();
    for entry in WalkDir::new(&location).min_depth(1).max_depth(1) {
        let entry =
            entry.map_err(|err| Error::new(Kind::InvalidSourcePath(location.clone(), err.into())))?;
        if !entry.file_type().is_dir() {
            continue;
        }
        let Some(name) = entry.file_name().to_str() else {
            continue;
        };
        if let Some(max) = max_name {
            if cmp_ignore_case(name, max) == Ordering::Greater {
                continue;
            }
        }
        let main = entry.path().join(MAIN_SCRIPT);
        if !main.is_file() {
            log::warn!(
                "Directory \"{}\" has no {} entry script and is not a migration.",
                name,
                MAIN_SCRIPT
            );
            continue;
        }
        let hash = hash_migration_directory(entry.path())?;
        migrations.push(SourceMigration::new(name.to_string(), main, hash));
    }

    migrations.sort_by(|a, b| compare_names(a.name(), b.name()));
    for pair in migrations.windows(2) {
        if eq_ignore_case(pair[0].name(), pair[1].name()) {
            return Err(Error::new(Kind::RepeatedName(pair[1].name().to_string())));
        }
    }
    Ok(migrations)
}

/// Change-detection fingerprint of a migration directory, not a security
/// primitive: the uppercase-hex SHA-1 of the newline-joined uppercase-hex
/// SHA-1s of every `*.sql` file, any depth, paths sorted ordinal ascending.
fn hash_migration_directory(directory: &Path) -> Result<String, Error> {
    let mut files: Vec<PathBuf> = WalkDir::new(directory)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .map(walkdir::DirEntry::into_path)
        .filter(|path| {
            path.extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("sql"))
        })
        .collect();
    // ordinal order of the full path string, not Path's component-wise
    // order: `sub-a/x.sql` must sort before `sub/y.sql`
    files.sort_by(|a, b| a.to_string_lossy().cmp(&b.to_string_lossy()));

    let mut file_hashes = Vec::with_capacity(files.len());
    for path in &files {
        let bytes = fs::read(path)
            .map_err(|err| Error::new(Kind::InvalidMigrationFile(path.clone(), err)))?;
        file_hashes.push(hex_upper(&Sha1::digest(&bytes)));
    }
    Ok(hex_upper(&Sha1::digest(file_hashes.join("\n").as_bytes())))
}

fn hex_upper(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        // writing to a String cannot fail
        let _ = write!(out, "{byte:02X}");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write_migration(root: &Path, name: &str, main_sql: &str) -> PathBuf {
        let dir = root.join(MIGRATIONS_DIR).join(name);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(MAIN_SCRIPT), main_sql).unwrap();
        dir
    }

    #[test]
    fn finds_migrations_with_an_entry_script() {
        let tmp_dir = TempDir::new().unwrap();
        write_migration(tmp_dir.path(), "M2", "SELECT 2;");
        write_migration(tmp_dir.path(), "M1", "SELECT 1;");

        let migrations = discover_migrations(tmp_dir.path(), None).unwrap();
        let names: Vec<&str> = migrations.iter().map(SourceMigration::name).collect();
        assert_eq!(names, vec!["M1", "M2"]);
    }

    #[test]
    fn ignores_directories_without_an_entry_script() {
        let tmp_dir = TempDir::new().unwrap();
        write_migration(tmp_dir.path(), "M1", "SELECT 1;");
        fs::create_dir_all(tmp_dir.path().join(MIGRATIONS_DIR).join("NotAMigration")).unwrap();

        let migrations = discover_migrations(tmp_dir.path(), None).unwrap();
        assert_eq!(migrations.len(), 1);
    }

    #[test]
    fn sorts_pseudo_migrations_at_the_endpoints() {
        let tmp_dir = TempDir::new().unwrap();
        write_migration(tmp_dir.path(), "M1", "SELECT 1;");
        write_migration(tmp_dir.path(), "_End", "PRINT 'end';");
        write_migration(tmp_dir.path(), "_Begin", "PRINT 'begin';");

        let migrations = discover_migrations(tmp_dir.path(), None).unwrap();
        let names: Vec<&str> = migrations.iter().map(SourceMigration::name).collect();
        assert_eq!(names, vec!["_Begin", "M1", "_End"]);
        assert!(migrations[0].is_pseudo());
        assert!(!migrations[1].is_pseudo());
        assert!(migrations[2].is_pseudo());
    }

    #[test]
    fn max_name_bounds_discovery_without_pseudo_ranking() {
        let tmp_dir = TempDir::new().unwrap();
        write_migration(tmp_dir.path(), "M1", "SELECT 1;");
        write_migration(tmp_dir.path(), "M2", "SELECT 2;");
        write_migration(tmp_dir.path(), "M3", "SELECT 3;");

        let migrations = discover_migrations(tmp_dir.path(), Some("m2")).unwrap();
        let names: Vec<&str> = migrations.iter().map(SourceMigration::name).collect();
        assert_eq!(names, vec!["M1", "M2"]);
    }

    #[test]
    fn missing_migrations_directory_is_an_error() {
        let tmp_dir = TempDir::new().unwrap();
        let err = discover_migrations(tmp_dir.path(), None).unwrap_err();
        assert!(matches!(err.kind(), Kind::InvalidSourcePath(_, _)));
    }

    #[test]
    fn hashing_the_same_directory_twice_is_stable() {
        let tmp_dir = TempDir::new().unwrap();
        let dir = write_migration(tmp_dir.path(), "M1", "SELECT 1;");
        fs::create_dir(dir.join("sub")).unwrap();
        fs::write(dir.join("sub").join("extra.sql"), "SELECT 2;").unwrap();

        let first = discover_migrations(tmp_dir.path(), None).unwrap();
        let second = discover_migrations(tmp_dir.path(), None).unwrap();
        assert_eq!(first[0].hash(), second[0].hash());
        assert_eq!(first[0].hash().len(), 40);
        assert!(first[0]
            .hash()
            .chars()
            .all(|c| c.is_ascii_hexdigit() && !c.is_ascii_lowercase()));
    }

    #[test]
    fn hash_reflects_every_sql_file_in_the_tree() {
        let tmp_dir = TempDir::new().unwrap();
        let dir = write_migration(tmp_dir.path(), "M1", "SELECT 1;");
        fs::write(dir.join("extra.sql"), "SELECT 2;").unwrap();
        let before = discover_migrations(tmp_dir.path(), None).unwrap()[0]
            .hash()
            .to_string();

        fs::write(dir.join("extra.sql"), "SELECT 3;").unwrap();
        let after = discover_migrations(tmp_dir.path(), None).unwrap()[0]
            .hash()
            .to_string();
        assert_ne!(before, after);
    }

    #[test]
    fn file_hashes_are_ordered_by_the_full_path_string() {
        let tmp_dir = TempDir::new().unwrap();
        let dir = write_migration(tmp_dir.path(), "M1", "SELECT 0;");
        fs::create_dir(dir.join("sub")).unwrap();
        fs::create_dir(dir.join("sub-a")).unwrap();
        fs::write(dir.join("sub-a").join("x.sql"), "SELECT 1;").unwrap();
        fs::write(dir.join("sub").join("y.sql"), "SELECT 2;").unwrap();

        // ordinal order of the full path strings: `_Main.sql`, then
        // `sub-a/x.sql` before `sub/y.sql` ('-' sorts before the separator)
        let file_hashes = ["SELECT 0;", "SELECT 1;", "SELECT 2;"]
            .map(|sql| hex_upper(&Sha1::digest(sql.as_bytes())));
        let expected = hex_upper(&Sha1::digest(file_hashes.join("\n").as_bytes()));

        let migrations = discover_migrations(tmp_dir.path(), None).unwrap();
        assert_eq!(migrations[0].hash(), expected);
    }

    #[test]
    fn hash_ignores_non_sql_files() {
        let tmp_dir = TempDir::new().unwrap();
        let dir = write_migration(tmp_dir.path(), "M1", "SELECT 1;");
        let before = discover_migrations(tmp_dir.path(), None).unwrap()[0]
            .hash()
            .to_string();

        fs::write(dir.join("README.md"), "notes").unwrap();
        let after = discover_migrations(tmp_dir.path(), None).unwrap()[0]
            .hash()
            .to_string();
        assert_eq!(before, after);
    }

    #[test]
    fn content_loads_once_and_is_partitioned() {
        let tmp_dir = TempDir::new().unwrap();
        write_migration(tmp_dir.path(), "M1", "--# PRE\nSELECT 1;\n");

        let migrations = discover_migrations(tmp_dir.path(), None).unwrap();
        let first = migrations[0].content().unwrap();
        assert!(first.phase(crate::migration::MigrationPhase::Pre).is_required());
        let again = migrations[0].content().unwrap();
        assert!(std::ptr::eq(first, again));
    }

    #[test]
    fn content_substitutes_the_path_variable() {
        let tmp_dir = TempDir::new().unwrap();
        write_migration(tmp_dir.path(), "M1", "PRINT '$(Path)';\n");

        let migrations = discover_migrations(tmp_dir.path(), None).unwrap();
        let content = migrations[0].content().unwrap();
        let sql = content.phase(crate::migration::MigrationPhase::Core).sql();
        assert!(sql.contains("M1"));
        assert!(!sql.contains("$(Path)"));
    }
}
