// src/sql/ddl.rs

use std::collections::{BTreeSet, HashMap};

use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use super::literal::{qualified, quote_ident, quote_literal, render_value};
use super::views;
use crate::error::{Error, Result};
use crate::schema::derive::{accumulate, ColumnAccumulator, InferenceOptions, TypeConflict};
use crate::schema::layout::EcsColumn;
use crate::schema::table::RawTable;
use crate::schema::types::{Column, ColumnClass};

/// Columns identifying one row of an ECS field list table. A field may be
/// listed once per normalization; an empty normalization is a value of its own.
pub const ECS_UNIQUE_KEY: [EcsColumn; 6] = [
    EcsColumn::Version,
    EcsColumn::FieldSet,
    EcsColumn::Field,
    EcsColumn::Type,
    EcsColumn::Level,
    EcsColumn::Normalization,
];

/// Columns restricted to the values observed in the input.
pub const ECS_ONE_OF: [EcsColumn; 3] = [EcsColumn::Type, EcsColumn::FieldSet, EcsColumn::Level];

#[derive(Debug, Clone)]
pub struct TableOptions {
    pub schema: String,
    pub table: String,
    pub owner: Option<String>,
    /// Rows per INSERT statement.
    pub batch_size: usize,
    pub inference: InferenceOptions,
    /// Unique key and one-of checks for ECS field lists.
    pub constraints: bool,
    /// Recreate and refresh the materialized views inside the same script.
    pub with_views: bool,
}

impl Default for TableOptions {
    fn default() -> Self {
        TableOptions {
            schema: "ecs".to_string(),
            table: "elastic_log_schema".to_string(),
            owner: None,
            batch_size: 1,
            inference: InferenceOptions::default(),
            constraints: true,
            with_views: false,
        }
    }
}

/// A column whose per-file inference disagreed between inputs.
#[derive(Debug, Clone, Serialize)]
pub struct ClassDisagreement {
    pub column: String,
    pub per_file: Vec<(String, ColumnClass)>,
    pub resolved: ColumnClass,
}

#[derive(Debug, Clone, Serialize)]
pub struct Script {
    #[serde(skip)]
    pub sql: String,
    pub rows: usize,
    pub columns: Vec<Column>,
    pub versions: Vec<String>,
    pub conflicts: Vec<TypeConflict>,
    pub disagreements: Vec<ClassDisagreement>,
}

/// Reorder `table` so its columns follow `names`.
fn align(table: &RawTable, names: &[String], first: &RawTable) -> Result<RawTable> {
    let own = table.column_names();
    if own == names {
        return Ok(table.clone());
    }
    let mismatch = || {
        Error::malformed(
            &table.source,
            Some(1),
            format!(
                "columns {:?} do not match {:?} from {}",
                own,
                names,
                first.source.display()
            ),
        )
    };
    if own.len() != names.len() {
        return Err(mismatch());
    }
    let order: Vec<usize> = names
        .iter()
        .map(|n| own.iter().position(|o| o == n).ok_or_else(mismatch))
        .collect::<Result<_>>()?;

    let mut aligned = table.clone();
    aligned.header = order.iter().map(|i| table.header[*i].clone()).collect();
    aligned.rows = table
        .rows
        .iter()
        .map(|row| order.iter().map(|i| row[*i].clone()).collect())
        .collect();
    aligned.layout = first.layout.clone();
    Ok(aligned)
}

fn file_label(table: &RawTable) -> String {
    table
        .source
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| table.source.display().to_string())
}

/// Rows of all inputs with exact repeats dropped, so overlapping files of the
/// same version load cleanly. Two different rows sharing a key are fatal.
fn unique_rows<'a>(tables: &'a [RawTable], names: &[String]) -> Result<Vec<&'a Vec<Option<String>>>> {
    let key_idx: Vec<usize> = ECS_UNIQUE_KEY
        .iter()
        .filter_map(|c| names.iter().position(|n| n == c.canonical()))
        .collect();

    let mut seen: HashMap<Vec<Option<&str>>, (&RawTable, usize, &Vec<Option<String>>)> = HashMap::new();
    let mut rows = Vec::new();
    let mut repeats = 0usize;
    for t in tables {
        for (row, line) in t.rows.iter().zip(&t.lines) {
            let key: Vec<Option<&str>> = key_idx.iter().map(|i| row[*i].as_deref()).collect();
            match seen.get(&key) {
                Some((_, _, prev)) if *prev == row => repeats += 1,
                Some((prev_table, prev_line, _)) => {
                    return Err(Error::malformed(
                        &t.source,
                        Some(*line),
                        format!(
                            "same version, field set, field, type, level and normalization as {} row {} but different values",
                            prev_table.source.display(),
                            prev_line
                        ),
                    ));
                }
                None => {
                    seen.insert(key, (t, *line, row));
                    rows.push(row);
                }
            }
        }
    }
    if repeats > 0 {
        info!(repeats, "dropped rows repeated across inputs");
    }
    Ok(rows)
}

/// Build the complete load script for one or more field list files.
#[instrument(level = "info", skip(tables, opts), fields(inputs = tables.len(), table = %opts.table))]
pub fn build_script(tables: &[RawTable], opts: &TableOptions) -> Result<Script> {
    let first = tables.first().ok_or(Error::NoInput)?;
    let names = first.column_names();
    let aligned = tables
        .iter()
        .map(|t| align(t, &names, first))
        .collect::<Result<Vec<_>>>()?;

    for t in &aligned {
        for (row, line) in t.rows.iter().zip(&t.lines) {
            if row.iter().flatten().any(|v| v.contains('\0')) {
                return Err(Error::malformed(&t.source, Some(*line), "value contains a NUL byte"));
            }
        }
    }

    // Fold each file separately so disagreements between files can be flagged,
    // then merge: the merged fold is the type every file's values fit.
    let per_file: Vec<Vec<ColumnAccumulator>> =
        aligned.iter().map(|t| accumulate(&names, t)).collect();
    let mut joint: Vec<ColumnAccumulator> = names.iter().map(ColumnAccumulator::new).collect();
    for file_acc in &per_file {
        for (j, a) in joint.iter_mut().zip(file_acc) {
            j.merge(a);
        }
    }

    let columns: Vec<Column> = joint.iter().map(|a| a.finish(&opts.inference)).collect();
    let conflicts: Vec<TypeConflict> = joint.iter().filter_map(|a| a.conflict().cloned()).collect();

    let mut disagreements = Vec::new();
    if aligned.len() > 1 {
        for (i, col) in columns.iter().enumerate() {
            let classes: Vec<(String, ColumnClass)> = aligned
                .iter()
                .zip(&per_file)
                .map(|(t, acc)| (file_label(t), acc[i].finish(&opts.inference).class))
                .filter(|(_, c)| *c != ColumnClass::Empty)
                .collect();
            let distinct: BTreeSet<ColumnClass> = classes.iter().map(|(_, c)| *c).collect();
            if distinct.len() > 1 {
                warn!(column = %col.name, per_file = ?classes, resolved = ?col.class, "inputs disagree on column type");
                disagreements.push(ClassDisagreement {
                    column: col.name.clone(),
                    per_file: classes,
                    resolved: col.class,
                });
            }
        }
    }

    let ecs = first.layout.is_some();
    if ecs {
        // bad indexed flags and empty key cells fail here, with their row
        for t in &aligned {
            t.field_records()?;
        }
    }

    let rows: Vec<&Vec<Option<String>>> = if ecs && opts.constraints {
        unique_rows(&aligned, &names)?
    } else {
        aligned.iter().flat_map(|t| t.rows.iter()).collect()
    };

    let version_idx = names.iter().position(|n| n == EcsColumn::Version.canonical());
    let versions: Vec<String> = match (ecs, version_idx) {
        (true, Some(idx)) => rows
            .iter()
            .filter_map(|r| r[idx].clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect(),
        _ => Vec::new(),
    };

    let target = qualified(&opts.schema, &opts.table);
    let mut sql = String::new();

    sql.push_str("-- Generated by ecs-schema; do not edit.\n");
    let labels: Vec<String> = aligned.iter().map(file_label).collect();
    sql.push_str(&format!("-- source: {}\n", labels.join(", ")));
    if !versions.is_empty() {
        sql.push_str(&format!("-- versions: {}\n", versions.join(", ")));
    }
    sql.push_str(&format!("-- rows: {}\n\n", rows.len()));

    sql.push_str("BEGIN;\n\n");
    sql.push_str(&format!("CREATE SCHEMA IF NOT EXISTS {};\n\n", quote_ident(&opts.schema)));
    if opts.with_views {
        sql.push_str(&views::drop_views(&opts.schema));
        sql.push('\n');
    }
    sql.push_str(&format!("DROP TABLE IF EXISTS {} CASCADE;\n\n", target));
    sql.push_str(&create_table(&target, &columns, &rows, opts, ecs));

    if let Some(owner) = &opts.owner {
        sql.push_str(&format!(
            "ALTER TABLE IF EXISTS {}\n    OWNER TO {};\n\n",
            target,
            quote_ident(owner)
        ));
    }

    let column_list = columns
        .iter()
        .map(|c| quote_ident(&c.name))
        .collect::<Vec<_>>()
        .join(", ");
    for chunk in rows.chunks(opts.batch_size.max(1)) {
        let values: Vec<String> = chunk
            .iter()
            .map(|row| {
                let cells: Vec<String> = row
                    .iter()
                    .zip(&columns)
                    .map(|(cell, col)| render_value(cell.as_deref(), col.class))
                    .collect();
                format!("    ({})", cells.join(", "))
            })
            .collect();
        sql.push_str(&format!(
            "INSERT INTO {} ({}) VALUES\n{};\n",
            target,
            column_list,
            values.join(",\n")
        ));
    }

    if opts.with_views {
        if ecs {
            sql.push('\n');
            sql.push_str(&views::create_views(&opts.schema, &opts.table));
            sql.push('\n');
            sql.push_str(&views::refresh_views(&opts.schema));
        } else {
            warn!("input is not an ECS field list; skipping views");
        }
    }
    sql.push_str("\nCOMMIT;\n");

    info!(
        rows = rows.len(),
        columns = columns.len(),
        conflicts = conflicts.len(),
        "built load script"
    );
    Ok(Script {
        sql,
        rows: rows.len(),
        columns,
        versions,
        conflicts,
        disagreements,
    })
}

fn create_table(
    target: &str,
    columns: &[Column],
    rows: &[&Vec<Option<String>>],
    opts: &TableOptions,
    ecs: bool,
) -> String {
    let mut defs: Vec<String> = columns
        .iter()
        .map(|c| {
            let null = if c.nullable { "" } else { " NOT NULL" };
            format!("    {} {}{}", quote_ident(&c.name), c.ty.to_sql(), null)
        })
        .collect();

    if ecs && opts.constraints {
        let prefix = format!("{}_{}", opts.schema, opts.table);
        let key: Vec<String> = ECS_UNIQUE_KEY
            .iter()
            .map(|c| quote_ident(c.canonical()))
            .collect();
        defs.push(format!(
            "    CONSTRAINT {} UNIQUE NULLS NOT DISTINCT ({})",
            quote_ident(&format!("{}_key", prefix)),
            key.join(", ")
        ));

        for col in ECS_ONE_OF {
            let idx = match columns.iter().position(|c| c.name == col.canonical()) {
                Some(i) => i,
                None => continue,
            };
            let allowed: BTreeSet<&str> = rows.iter().filter_map(|r| r[idx].as_deref()).collect();
            let list = allowed
                .iter()
                .map(|v| quote_literal(v))
                .collect::<Vec<_>>()
                .join(", ");
            debug!(column = col.canonical(), values = allowed.len(), "one-of constraint");
            defs.push(format!(
                "    CONSTRAINT {}\n        CHECK ({} = ANY (ARRAY[{}]))",
                quote_ident(&format!("{}_{}_oneof", prefix, col.canonical())),
                quote_ident(col.canonical()),
                list
            ));
        }
    }

    format!("CREATE TABLE {} (\n{}\n);\n\n", target, defs.join(",\n"))
}
