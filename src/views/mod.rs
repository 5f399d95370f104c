//! In-process counterpart of the SQL materialized views.
//!
//! `FieldTable` stands in for the loaded table and counts reloads;
//! `MaterializedViews` holds snapshots that only change on `refresh`, so after
//! a reload they keep describing the previous load until refreshed again.

use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    path::Path,
};

use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::error::{Error, Result};
use crate::schema::{table::RawTable, FieldRecord, SchemaVersion};
use crate::sql::views::{SCHEMA_VERSIONS, SCHEMA_VERSIONS_FIELDS, SCHEMA_VERSIONS_LEVELS};

/// The loaded field list. Every `reload` bumps the generation.
#[derive(Debug, Default, Clone)]
pub struct FieldTable {
    records: Vec<FieldRecord>,
    generation: u64,
}

impl FieldTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read and concatenate several field list files.
    pub fn load<P: AsRef<Path>>(paths: &[P]) -> Result<Self> {
        let mut table = FieldTable::new();
        let mut records = Vec::new();
        for p in paths {
            records.extend(RawTable::read(p.as_ref())?.field_records()?);
        }
        table.reload(records);
        Ok(table)
    }

    /// Replace the contents wholesale.
    pub fn reload(&mut self, records: Vec<FieldRecord>) -> u64 {
        self.records = records;
        self.generation += 1;
        debug!(generation = self.generation, rows = self.records.len(), "table reloaded");
        self.generation
    }

    pub fn records(&self) -> &[FieldRecord] {
        &self.records
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VersionRow {
    pub version: String,
    #[serde(flatten)]
    pub parts: SchemaVersion,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldVersionRow {
    pub version: String,
    #[serde(flatten)]
    pub parts: SchemaVersion,
    pub indexed: bool,
    pub field_set: String,
    pub field: String,
    #[serde(rename = "type")]
    pub ty: String,
    pub level: String,
    pub normalization: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LevelRow {
    pub version: String,
    #[serde(flatten)]
    pub parts: SchemaVersion,
    pub level: String,
    pub field_set: String,
    #[serde(rename = "type")]
    pub ty: String,
    pub normalization: Option<String>,
    pub field_count: usize,
    pub indexed_field_count: usize,
}

#[derive(Debug, Clone)]
struct Snapshot<T> {
    rows: Vec<T>,
    generation: u64,
}

/// The three views; each starts unpopulated.
#[derive(Debug, Clone, Default)]
pub struct MaterializedViews {
    versions: Option<Snapshot<VersionRow>>,
    fields: Option<Snapshot<FieldVersionRow>>,
    levels: Option<Snapshot<LevelRow>>,
}

fn populated<'a, T>(view: &'a Option<Snapshot<T>>, name: &'static str) -> Result<&'a [T]> {
    view.as_ref()
        .map(|s| s.rows.as_slice())
        .ok_or(Error::NotPopulated(name))
}

impl MaterializedViews {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refresh all three views in dependency order. A failed refresh leaves
    /// every view as it was.
    #[instrument(level = "info", skip_all, fields(generation = table.generation()))]
    pub fn refresh(&mut self, table: &FieldTable) -> Result<()> {
        let versions = compute_versions(table.records())?;
        let fields = compute_fields(table.records(), &versions);
        let levels = compute_levels(&fields);
        info!(
            versions = versions.len(),
            fields = fields.len(),
            levels = levels.len(),
            "views refreshed"
        );

        let generation = table.generation();
        self.versions = Some(Snapshot {
            rows: versions,
            generation,
        });
        self.fields = Some(Snapshot {
            rows: fields,
            generation,
        });
        self.levels = Some(Snapshot {
            rows: levels,
            generation,
        });
        Ok(())
    }

    /// Refresh only `schema_versions`. The dependent views keep their rows.
    pub fn refresh_versions(&mut self, table: &FieldTable) -> Result<()> {
        let rows = compute_versions(table.records())?;
        self.versions = Some(Snapshot {
            rows,
            generation: table.generation(),
        });
        Ok(())
    }

    /// Refresh only `schema_versions_fields`, joining against whatever
    /// `schema_versions` currently holds.
    pub fn refresh_fields(&mut self, table: &FieldTable) -> Result<()> {
        let versions = populated(&self.versions, SCHEMA_VERSIONS)?;
        let rows = compute_fields(table.records(), versions);
        self.fields = Some(Snapshot {
            rows,
            generation: table.generation(),
        });
        Ok(())
    }

    /// Refresh only `schema_versions_levels` from `schema_versions_fields`.
    pub fn refresh_levels(&mut self) -> Result<()> {
        let fields = self
            .fields
            .as_ref()
            .ok_or(Error::NotPopulated(SCHEMA_VERSIONS_FIELDS))?;
        let generation = fields.generation;
        let rows = compute_levels(&fields.rows);
        self.levels = Some(Snapshot { rows, generation });
        Ok(())
    }

    pub fn schema_versions(&self) -> Result<&[VersionRow]> {
        populated(&self.versions, SCHEMA_VERSIONS)
    }

    pub fn schema_versions_fields(&self) -> Result<&[FieldVersionRow]> {
        populated(&self.fields, SCHEMA_VERSIONS_FIELDS)
    }

    pub fn schema_versions_levels(&self) -> Result<&[LevelRow]> {
        populated(&self.levels, SCHEMA_VERSIONS_LEVELS)
    }

    /// True when any view is unpopulated or reflects an older load of `table`.
    pub fn is_stale(&self, table: &FieldTable) -> bool {
        let current = Some(table.generation());
        self.versions.as_ref().map(|s| s.generation) != current
            || self.fields.as_ref().map(|s| s.generation) != current
            || self.levels.as_ref().map(|s| s.generation) != current
    }
}

/// Distinct versions, oldest first.
pub fn compute_versions(records: &[FieldRecord]) -> Result<Vec<VersionRow>> {
    let distinct: BTreeSet<&str> = records.iter().map(|r| r.ecs_version.as_str()).collect();
    let mut rows = distinct
        .into_iter()
        .map(|v| {
            Ok(VersionRow {
                version: v.to_string(),
                parts: SchemaVersion::parse(v)?,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    rows.sort_by(|a, b| a.parts.cmp(&b.parts).then_with(|| a.version.cmp(&b.version)));
    Ok(rows)
}

/// Every record joined to its decomposed version. Records whose version is
/// absent from `versions` drop out, as in an inner join.
pub fn compute_fields(records: &[FieldRecord], versions: &[VersionRow]) -> Vec<FieldVersionRow> {
    let by_version: HashMap<&str, &SchemaVersion> = versions
        .iter()
        .map(|v| (v.version.as_str(), &v.parts))
        .collect();

    let mut missing = 0usize;
    let mut rows: Vec<FieldVersionRow> = records
        .iter()
        .filter_map(|r| match by_version.get(r.ecs_version.as_str()) {
            Some(parts) => Some(FieldVersionRow {
                version: r.ecs_version.clone(),
                parts: (*parts).clone(),
                indexed: r.indexed,
                field_set: r.field_set.clone(),
                field: r.field.clone(),
                ty: r.ty.clone(),
                level: r.level.clone(),
                normalization: r.normalization.clone(),
            }),
            None => {
                missing += 1;
                None
            }
        })
        .collect();
    if missing > 0 {
        warn!(missing, "rows reference versions not yet in schema_versions");
    }
    rows.sort_by(|a, b| {
        a.parts
            .cmp(&b.parts)
            .then_with(|| a.field_set.cmp(&b.field_set))
            .then_with(|| a.field.cmp(&b.field))
            .then_with(|| a.ty.cmp(&b.ty))
            .then_with(|| a.level.cmp(&b.level))
            .then_with(|| a.normalization.cmp(&b.normalization))
    });
    rows
}

type FieldKey<'a> = (&'a str, &'a str, &'a str);
type Variant<'a> = (&'a str, &'a str, Option<&'a str>);
type GroupKey<'a> = (&'a str, &'a str, &'a str, &'a str, Option<&'a str>);

/// Two passes: first collapse each (version, field set, field) to its
/// (level, type, normalization) variants with their indexed flag; then count
/// fields per (version, level, field set, type, normalization). A field listed
/// under two types lands in two groups, each counting only its own variant.
pub fn compute_levels(fields: &[FieldVersionRow]) -> Vec<LevelRow> {
    let mut per_field: BTreeMap<FieldKey, BTreeMap<Variant, bool>> = BTreeMap::new();
    let mut parts: HashMap<&str, &SchemaVersion> = HashMap::new();
    for f in fields {
        parts.insert(f.version.as_str(), &f.parts);
        let indexed = per_field
            .entry((f.version.as_str(), f.field_set.as_str(), f.field.as_str()))
            .or_default()
            .entry((f.level.as_str(), f.ty.as_str(), f.normalization.as_deref()))
            .or_insert(false);
        *indexed |= f.indexed;
    }

    let mut groups: BTreeMap<GroupKey, (usize, usize)> = BTreeMap::new();
    for (&(version, field_set, _field), variants) in &per_field {
        for (&(level, ty, normalization), &indexed) in variants {
            let counts = groups
                .entry((version, level, field_set, ty, normalization))
                .or_insert((0, 0));
            counts.0 += 1;
            if indexed {
                counts.1 += 1;
            }
        }
    }

    let mut rows: Vec<LevelRow> = groups
        .into_iter()
        .map(
            |((version, level, field_set, ty, normalization), (total, indexed))| LevelRow {
                version: version.to_string(),
                parts: parts[version].clone(),
                level: level.to_string(),
                field_set: field_set.to_string(),
                ty: ty.to_string(),
                normalization: normalization.map(str::to_string),
                field_count: total,
                indexed_field_count: indexed,
            },
        )
        .collect();
    rows.sort_by(|a, b| {
        a.parts
            .cmp(&b.parts)
            .then_with(|| a.level.cmp(&b.level))
            .then_with(|| a.field_set.cmp(&b.field_set))
            .then_with(|| a.ty.cmp(&b.ty))
            .then_with(|| a.normalization.cmp(&b.normalization))
    });
    rows
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(version: &str, set: &str, field: &str, ty: &str, norm: Option<&str>, indexed: bool) -> FieldRecord {
        FieldRecord {
            ecs_version: version.into(),
            indexed,
            field_set: set.into(),
            field: field.into(),
            ty: ty.into(),
            level: "core".into(),
            normalization: norm.map(Into::into),
            example: Some("ignored".into()),
            description: Some("ignored".into()),
        }
    }

    fn loaded(records: Vec<FieldRecord>) -> FieldTable {
        let mut t = FieldTable::new();
        t.reload(records);
        t
    }

    #[test]
    fn views_hold_no_data_until_refreshed() {
        let table = loaded(vec![rec("9.0.0", "base", "message", "keyword", None, true)]);
        let mut views = MaterializedViews::new();
        assert!(matches!(
            views.schema_versions(),
            Err(Error::NotPopulated(SCHEMA_VERSIONS))
        ));
        assert!(views.is_stale(&table));
        views.refresh(&table).unwrap();
        assert_eq!(views.schema_versions().unwrap().len(), 1);
        assert!(!views.is_stale(&table));
    }

    #[test]
    fn reload_leaves_views_stale_until_refresh() {
        let mut table = loaded(vec![rec("8.17.0", "base", "message", "keyword", None, true)]);
        let mut views = MaterializedViews::new();
        views.refresh(&table).unwrap();

        table.reload(vec![
            rec("8.17.0", "base", "message", "keyword", None, true),
            rec("9.0.0", "base", "message", "keyword", None, true),
        ]);
        assert!(views.is_stale(&table));
        assert_eq!(views.schema_versions().unwrap().len(), 1);

        views.refresh(&table).unwrap();
        let versions: Vec<&str> = views
            .schema_versions()
            .unwrap()
            .iter()
            .map(|v| v.version.as_str())
            .collect();
        assert_eq!(versions, vec!["8.17.0", "9.0.0"]);
    }

    #[test]
    fn release_suffix_is_null_when_absent() {
        let rows = compute_versions(&[
            rec("9.3.0-dev", "base", "a", "keyword", None, true),
            rec("9.2.0", "base", "a", "keyword", None, true),
        ])
        .unwrap();
        assert_eq!(rows[0].parts.release, None);
        assert_eq!(rows[1].parts.release.as_deref(), Some("dev"));
    }

    #[test]
    fn malformed_version_fails_refresh_and_keeps_old_rows() {
        let mut table = loaded(vec![rec("9.0.0", "base", "a", "keyword", None, true)]);
        let mut views = MaterializedViews::new();
        views.refresh(&table).unwrap();
        table.reload(vec![rec("9.0", "base", "a", "keyword", None, true)]);
        assert!(matches!(views.refresh(&table), Err(Error::Version(_))));
        assert_eq!(views.schema_versions().unwrap()[0].version, "9.0.0");
    }

    #[test]
    fn fields_view_joins_versions_and_drops_prose() {
        let table = loaded(vec![rec("9.3.0-dev", "user", "user.name", "keyword", None, true)]);
        let mut views = MaterializedViews::new();
        views.refresh(&table).unwrap();
        let row = &views.schema_versions_fields().unwrap()[0];
        assert_eq!((row.parts.major, row.parts.minor, row.parts.build), (9, 3, 0));
        let json = serde_json::to_value(row).unwrap();
        assert!(json.get("description").is_none());
        assert!(json.get("example").is_none());
        assert_eq!(json["release"], "dev");
        assert_eq!(json["type"], "keyword");
    }

    #[test]
    fn indexed_counts_are_not_shared_across_types() {
        // `tags` appears under two types in one version; only the keyword variant is indexed.
        let table = loaded(vec![
            rec("9.0.0", "base", "tags", "keyword", Some("array"), true),
            rec("9.0.0", "base", "tags", "text", Some("array"), false),
            rec("9.0.0", "base", "labels", "keyword", Some("array"), true),
            rec("9.0.0", "base", "message", "keyword", None, false),
        ]);
        let mut views = MaterializedViews::new();
        views.refresh(&table).unwrap();
        let levels = views.schema_versions_levels().unwrap();
        let find = |ty: &str, norm: Option<&str>| {
            levels
                .iter()
                .find(|l| l.ty == ty && l.normalization.as_deref() == norm)
                .unwrap()
        };

        let keyword_array = find("keyword", Some("array"));
        assert_eq!(keyword_array.field_count, 2);
        assert_eq!(keyword_array.indexed_field_count, 2);

        let text_array = find("text", Some("array"));
        assert_eq!(text_array.field_count, 1);
        assert_eq!(text_array.indexed_field_count, 0);

        let keyword_plain = find("keyword", None);
        assert_eq!(keyword_plain.field_count, 1);
        assert_eq!(keyword_plain.indexed_field_count, 0);
        assert_eq!(levels.len(), 3);
    }

    #[test]
    fn stale_versions_view_limits_field_refresh() {
        let mut table = loaded(vec![rec("8.0.0", "base", "a", "keyword", None, true)]);
        let mut views = MaterializedViews::new();
        assert!(matches!(
            views.refresh_fields(&table),
            Err(Error::NotPopulated(SCHEMA_VERSIONS))
        ));
        views.refresh_versions(&table).unwrap();

        table.reload(vec![
            rec("8.0.0", "base", "a", "keyword", None, true),
            rec("9.0.0", "base", "a", "keyword", None, true),
        ]);
        // versions was not refreshed, so the 9.0.0 row drops out of the join
        views.refresh_fields(&table).unwrap();
        views.refresh_levels().unwrap();
        assert_eq!(views.schema_versions_fields().unwrap().len(), 1);
        assert!(views.is_stale(&table));
    }
}
