// src/sql/views.rs
//
// Materialized views over the loaded field list. They are created WITH NO DATA
// and must be refreshed, in `VIEW_NAMES` order, after every reload of the table.

use super::literal::{qualified, quote_literal};
use crate::schema::layout::EcsColumn;

pub const SCHEMA_VERSIONS: &str = "schema_versions";
pub const SCHEMA_VERSIONS_FIELDS: &str = "schema_versions_fields";
pub const SCHEMA_VERSIONS_LEVELS: &str = "schema_versions_levels";

/// Refresh order: each view reads the one before it.
pub const VIEW_NAMES: [&str; 3] = [SCHEMA_VERSIONS, SCHEMA_VERSIONS_FIELDS, SCHEMA_VERSIONS_LEVELS];

/// Same shape as `SchemaVersion`'s parser.
const VERSION_PATTERN: &str =
    r"^(0|[1-9][0-9]*)\.(0|[1-9][0-9]*)\.(0|[1-9][0-9]*)(-[0-9A-Za-z][0-9A-Za-z.+-]*)?$";

fn col(c: EcsColumn) -> String {
    format!("t.\"{}\"", c.canonical())
}

/// Drop statements, dependents first.
pub fn drop_views(schema: &str) -> String {
    VIEW_NAMES
        .iter()
        .rev()
        .map(|v| format!("DROP MATERIALIZED VIEW IF EXISTS {};\n", qualified(schema, v)))
        .collect()
}

/// `CREATE MATERIALIZED VIEW ... WITH NO DATA` for all three views.
pub fn create_views(schema: &str, table: &str) -> String {
    let source = qualified(schema, table);
    let versions = qualified(schema, SCHEMA_VERSIONS);
    let fields = qualified(schema, SCHEMA_VERSIONS_FIELDS);
    let levels = qualified(schema, SCHEMA_VERSIONS_LEVELS);
    let version = col(EcsColumn::Version);

    // A malformed version survives into `core` with a prefix, so the bigint
    // cast fails the refresh instead of yielding a partial tuple.
    let schema_versions = format!(
        "CREATE MATERIALIZED VIEW {versions} AS\n\
SELECT\n    \
    v.version,\n    \
    split_part(v.core, '.', 1)::bigint AS major,\n    \
    split_part(v.core, '.', 2)::bigint AS minor,\n    \
    split_part(v.core, '.', 3)::bigint AS build,\n    \
    v.release\n\
FROM (\n    \
    SELECT DISTINCT\n        \
        {version}::text AS version,\n        \
        CASE WHEN {version}::text ~ {pattern}\n            \
            THEN split_part({version}::text, '-', 1)\n            \
            ELSE 'malformed version: ' || {version}::text\n        \
        END AS core,\n        \
        NULLIF(substring({version}::text from '^[^-]*-(.*)$'), '') AS release\n    \
    FROM {source} t\n\
) v\n\
WITH NO DATA;\n",
        pattern = quote_literal(VERSION_PATTERN),
    );

    let schema_versions_fields = format!(
        "CREATE MATERIALIZED VIEW {fields} AS\n\
SELECT\n    \
    v.version,\n    \
    v.major,\n    \
    v.minor,\n    \
    v.build,\n    \
    v.release,\n    \
    lower({indexed}::text) = 'true' AS indexed,\n    \
    {field_set}::text AS field_set,\n    \
    {field}::text AS field,\n    \
    {ty}::text AS type,\n    \
    {level}::text AS level,\n    \
    {normalization}::text AS normalization\n\
FROM {source} t\n\
JOIN {versions} v ON v.version = {version}::text\n\
WITH NO DATA;\n",
        indexed = col(EcsColumn::Indexed),
        field_set = col(EcsColumn::FieldSet),
        field = col(EcsColumn::Field),
        ty = col(EcsColumn::Type),
        level = col(EcsColumn::Level),
        normalization = col(EcsColumn::Normalization),
    );

    // First pass collapses each field to one row per (type, level,
    // normalization) variant; second pass counts fields per group.
    let schema_versions_levels = format!(
        "CREATE MATERIALIZED VIEW {levels} AS\n\
WITH per_field AS (\n    \
    SELECT version, field_set, field, level, type, normalization,\n           \
           bool_or(indexed) AS indexed\n    \
    FROM {fields}\n    \
    GROUP BY version, field_set, field, level, type, normalization\n\
)\n\
SELECT\n    \
    v.version,\n    \
    v.major,\n    \
    v.minor,\n    \
    v.build,\n    \
    v.release,\n    \
    f.level,\n    \
    f.field_set,\n    \
    f.type,\n    \
    f.normalization,\n    \
    count(*) AS field_count,\n    \
    count(*) FILTER (WHERE f.indexed) AS indexed_field_count\n\
FROM per_field f\n\
JOIN {versions} v ON v.version = f.version\n\
GROUP BY v.version, v.major, v.minor, v.build, v.release,\n         \
         f.level, f.field_set, f.type, f.normalization\n\
WITH NO DATA;\n"
    );

    format!("{schema_versions}\n{schema_versions_fields}\n{schema_versions_levels}")
}

pub fn refresh_views(schema: &str) -> String {
    VIEW_NAMES
        .iter()
        .map(|v| format!("REFRESH MATERIALIZED VIEW {};\n", qualified(schema, v)))
        .collect()
}

/// Standalone script: drop, recreate empty, refresh.
pub fn views_script(schema: &str, table: &str) -> String {
    format!(
        "BEGIN;\n\n{}\n{}\n{}\nCOMMIT;\n",
        drop_views(schema),
        create_views(schema, table),
        refresh_views(schema)
    )
}
