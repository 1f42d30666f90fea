//! The applied-migration registry kept on each target database.

/// Fully qualified name of the registry table.
pub(crate) const REGISTRY_TABLE: &str = "_deploy.Migration";

/// Canonical DDL for the registry table. The engine never runs this itself:
/// registration batches assume the table exists, and deployments
/// conventionally create it in `_Begin/_Main.sql`.
pub const REGISTRY_TABLE_DDL: &str = "\
IF OBJECT_ID(N'_deploy.Migration', N'U') IS NULL
BEGIN
    IF SCHEMA_ID(N'_deploy') IS NULL EXEC(N'CREATE SCHEMA _deploy;');
    CREATE TABLE _deploy.Migration (
        Name        sysname      NOT NULL PRIMARY KEY,
        Hash        char(40)     NOT NULL,
        PreRunDate  datetime2(3)     NULL,
        CoreRunDate datetime2(3)     NULL,
        PostRunDate datetime2(3)     NULL,
        State AS
            CASE
                WHEN PostRunDate IS NOT NULL THEN 3
                WHEN CoreRunDate IS NOT NULL THEN 2
                WHEN PreRunDate  IS NOT NULL THEN 1
                ELSE 0
            END
    );
END";

/// Build the query that reads `(Name, Hash, State)` rows from the registry,
/// ordered by name. The `EXEC` wrapper keeps the batch compilable when the
/// table does not exist yet, in which case no rows come back. Completed rows
/// are filtered out unless they sort at or after the earliest defined
/// migration, so stale history does not grow the result forever.
pub fn applied_migrations_query(earliest_defined: Option<&str>) -> String {
    let filter = match earliest_defined {
        Some(name) => format!("State < 3 OR Name >= N'{}'", sql_escape(name)),
        None => "State < 3".to_string(),
    };
    let select =
        format!("SELECT Name, Hash, State FROM {REGISTRY_TABLE} WHERE {filter} ORDER BY Name;");
    format!(
        "IF OBJECT_ID(N'{REGISTRY_TABLE}', N'U') IS NOT NULL\nEXEC(N'{}');",
        select.replace('\'', "''")
    )
}

/// Escape a value for inclusion in a single-quoted T-SQL literal.
pub(crate) fn sql_escape(value: &str) -> String {
    value.replace('\'', "''")
}
