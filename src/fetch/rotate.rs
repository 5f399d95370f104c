// src/fetch/rotate.rs
//
// Archive-if-exists, else write. The archive name is derived from the version
// embedded in the file being replaced and never reuses an existing name.

use std::{
    collections::HashSet,
    fs,
    path::{Path, PathBuf},
};

use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::error::{Error, Result};
use crate::schema::{table::RawTable, write, EcsColumn, SchemaVersion};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FetchOutcome {
    /// Nothing was at the destination before.
    Created { version: String },
    /// Same content as the local copy; nothing touched.
    Unchanged { version: String },
    /// The previous copy was moved to `archived`.
    Rotated {
        archived: PathBuf,
        previous_version: String,
        version: String,
    },
}

/// `<stem>.<version>.<ext>`, or `<stem>.<version>_<n>.<ext>` with the
/// smallest `n` that is still free.
pub fn archive_path(dest: &Path, version: &SchemaVersion) -> PathBuf {
    let stem = dest
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let ext = dest
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();

    let candidate = dest.with_file_name(format!("{}.{}{}", stem, version, ext));
    if !candidate.exists() {
        return candidate;
    }
    (1u32..)
        .map(|n| dest.with_file_name(format!("{}.{}_{}{}", stem, version, n, ext)))
        .find(|p| !p.exists())
        .unwrap_or(candidate)
}

fn versions(table: &RawTable) -> HashSet<&str> {
    match &table.layout {
        Some(layout) => {
            let idx = layout.position(EcsColumn::Version);
            table.rows.iter().filter_map(|r| r[idx].as_deref()).collect()
        }
        None => HashSet::new(),
    }
}

/// Row count, version set, columns, or any row differ.
pub fn content_changed(old: &RawTable, new: &RawTable) -> bool {
    if old.rows.len() != new.rows.len() {
        debug!(old = old.rows.len(), new = new.rows.len(), "row count changed");
        return true;
    }
    if old.column_names() != new.column_names() {
        debug!("columns changed");
        return true;
    }
    if versions(old) != versions(new) {
        debug!("version set changed");
        return true;
    }
    let seen: HashSet<&Vec<Option<String>>> = old.rows.iter().collect();
    let changed = new.rows.iter().any(|r| !seen.contains(r));
    if changed {
        debug!("row contents changed");
    }
    changed
}

fn embedded_version(table: &RawTable) -> Result<SchemaVersion> {
    let raw = table.embedded_version().ok_or_else(|| {
        Error::malformed(&table.source, None, "no schema version in the last data row")
    })?;
    SchemaVersion::parse(raw).map_err(|_| {
        Error::malformed(
            &table.source,
            table.lines.last().copied(),
            format!("`{}` is not a MAJOR.MINOR.BUILD[-RELEASE] version", raw),
        )
    })
}

/// Put `content` (already parsed as `incoming`) at `dest`, archiving whatever
/// was there first. On any error the destination is left as it was.
#[instrument(level = "info", skip(content, incoming), fields(dest = %dest.display()))]
pub fn install(dest: &Path, content: &[u8], incoming: &RawTable, force: bool) -> Result<FetchOutcome> {
    let version = embedded_version(incoming)?.to_string();

    if !dest.exists() {
        write::write_atomic(dest, content)?;
        info!(%version, "created");
        return Ok(FetchOutcome::Created { version });
    }

    let current = RawTable::read(dest)?;
    if !force && !content_changed(&current, incoming) {
        info!(%version, "no changes detected");
        return Ok(FetchOutcome::Unchanged { version });
    }
    let previous = embedded_version(&current)?;

    // Stage first so a full disk fails before the old copy moves.
    let staged = write::stage(dest, content)?;
    let archived = archive_path(dest, &previous);
    if let Err(e) = fs::rename(dest, &archived) {
        let _ = fs::remove_file(&staged);
        return Err(Error::fs(&archived, e));
    }
    if let Err(e) = fs::rename(&staged, dest) {
        warn!(error = %e, "could not move new content into place; restoring previous copy");
        let _ = fs::rename(&archived, dest);
        let _ = fs::remove_file(&staged);
        return Err(Error::fs(dest, e));
    }

    info!(
        previous = %previous,
        %version,
        archived = %archived.display(),
        "rotated"
    );
    Ok(FetchOutcome::Rotated {
        archived,
        previous_version: previous.to_string(),
        version,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::table::tests::SAMPLE;
    use tempfile::tempdir;

    fn parse(text: &str) -> RawTable {
        RawTable::from_reader(Path::new("fields.csv"), text.as_bytes()).unwrap()
    }

    fn newer() -> String {
        SAMPLE.replace("9.3.0-dev", "9.4.0-dev")
    }

    #[test]
    fn archive_names_never_collide() {
        let tmp = tempdir().unwrap();
        let dest = tmp.path().join("ecs.csv");
        let v = SchemaVersion::parse("9.3.0-dev").unwrap();
        let first = archive_path(&dest, &v);
        assert_eq!(first.file_name().unwrap(), "ecs.9.3.0-dev.csv");
        fs::write(&first, "x").unwrap();
        let second = archive_path(&dest, &v);
        assert_eq!(second.file_name().unwrap(), "ecs.9.3.0-dev_1.csv");
        fs::write(&second, "x").unwrap();
        assert_eq!(
            archive_path(&dest, &v).file_name().unwrap(),
            "ecs.9.3.0-dev_2.csv"
        );
    }

    #[test]
    fn first_install_creates_file() {
        let tmp = tempdir().unwrap();
        let dest = tmp.path().join("data").join("ecs.csv");
        let outcome = install(&dest, SAMPLE.as_bytes(), &parse(SAMPLE), false).unwrap();
        assert_eq!(
            outcome,
            FetchOutcome::Created {
                version: "9.3.0-dev".into()
            }
        );
        assert_eq!(fs::read_to_string(&dest).unwrap(), SAMPLE);
    }

    #[test]
    fn identical_content_is_left_alone() {
        let tmp = tempdir().unwrap();
        let dest = tmp.path().join("ecs.csv");
        fs::write(&dest, SAMPLE).unwrap();
        let outcome = install(&dest, SAMPLE.as_bytes(), &parse(SAMPLE), false).unwrap();
        assert!(matches!(outcome, FetchOutcome::Unchanged { .. }));
        assert_eq!(fs::read_dir(tmp.path()).unwrap().count(), 1);
    }

    #[test]
    fn changed_content_rotates_previous_copy() {
        let tmp = tempdir().unwrap();
        let dest = tmp.path().join("ecs.csv");
        fs::write(&dest, SAMPLE).unwrap();
        let text = newer();
        let outcome = install(&dest, text.as_bytes(), &parse(&text), false).unwrap();

        let archived = tmp.path().join("ecs.9.3.0-dev.csv");
        assert_eq!(
            outcome,
            FetchOutcome::Rotated {
                archived: archived.clone(),
                previous_version: "9.3.0-dev".into(),
                version: "9.4.0-dev".into(),
            }
        );
        assert_eq!(fs::read_to_string(&archived).unwrap(), SAMPLE);
        assert_eq!(fs::read_to_string(&dest).unwrap(), text);
    }

    #[test]
    fn repeated_rotation_at_same_version_keeps_every_copy() {
        let tmp = tempdir().unwrap();
        let dest = tmp.path().join("ecs.csv");
        fs::write(&dest, SAMPLE).unwrap();
        install(&dest, SAMPLE.as_bytes(), &parse(SAMPLE), true).unwrap();
        install(&dest, SAMPLE.as_bytes(), &parse(SAMPLE), true).unwrap();
        assert!(tmp.path().join("ecs.9.3.0-dev.csv").exists());
        assert!(tmp.path().join("ecs.9.3.0-dev_1.csv").exists());
        assert_eq!(fs::read_to_string(&dest).unwrap(), SAMPLE);
    }

    #[test]
    fn unversioned_local_copy_aborts_without_touching_it() {
        let tmp = tempdir().unwrap();
        let dest = tmp.path().join("ecs.csv");
        let broken = SAMPLE.replace("9.3.0-dev", "latest");
        fs::write(&dest, &broken).unwrap();
        let text = newer();
        let err = install(&dest, text.as_bytes(), &parse(&text), false).unwrap_err();
        assert!(matches!(err, Error::MalformedInput { .. }));
        assert_eq!(fs::read_to_string(&dest).unwrap(), broken);
        assert_eq!(fs::read_dir(tmp.path()).unwrap().count(), 1);
    }

    #[test]
    fn change_detection_covers_rows_and_versions() {
        let old = parse(SAMPLE);
        assert!(!content_changed(&old, &parse(SAMPLE)));
        assert!(content_changed(&old, &parse(&newer())));
        let edited = SAMPLE.replace("Hello World", "Hello there");
        assert!(content_changed(&old, &parse(&edited)));
    }
}
