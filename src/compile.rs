// src/compile.rs

use std::path::PathBuf;

use tracing::{info, instrument};

use crate::error::{Error, Result};
use crate::schema::{table::RawTable, write};
use crate::sql::{build_script, ddl::Script, views_script, TableOptions};

#[derive(Debug, Clone)]
pub struct CompileConfig {
    /// Field list files, loaded in order.
    pub inputs: Vec<PathBuf>,
    pub output: PathBuf,
    pub table: TableOptions,
}

/// Read every input, build the load script and write it to `cfg.output`.
///
/// The output is replaced atomically; if anything fails the previous script
/// stays as it was.
#[instrument(level = "info", skip(cfg), fields(output = %cfg.output.display()))]
pub fn compile(cfg: &CompileConfig) -> Result<Script> {
    if cfg.inputs.is_empty() {
        return Err(Error::NoInput);
    }
    if write::clear_stale_staging(&cfg.output)? {
        info!("removed staging file from an earlier run");
    }

    let tables = cfg
        .inputs
        .iter()
        .map(|p| RawTable::read(p))
        .collect::<Result<Vec<_>>>()?;
    let script = build_script(&tables, &cfg.table)?;

    write::write_atomic(&cfg.output, script.sql.as_bytes())?;
    info!(
        rows = script.rows,
        columns = script.columns.len(),
        conflicts = script.conflicts.len(),
        "compiled"
    );
    Ok(script)
}

/// Write the standalone view script for `schema.table`.
#[instrument(level = "info", fields(output = %output.display()))]
pub fn write_views(output: &std::path::Path, schema: &str, table: &str) -> Result<()> {
    write::write_atomic(output, views_script(schema, table).as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::table::tests::SAMPLE;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn writes_script_for_field_list() {
        let tmp = tempdir().unwrap();
        let input = tmp.path().join("ecs.csv");
        fs::write(&input, SAMPLE).unwrap();
        let cfg = CompileConfig {
            inputs: vec![input],
            output: tmp.path().join("out").join("DDL-ecs.sql"),
            table: TableOptions::default(),
        };
        let script = compile(&cfg).unwrap();
        assert_eq!(script.rows, 4);
        assert_eq!(script.versions, vec!["9.3.0-dev".to_string()]);

        let written = fs::read_to_string(&cfg.output).unwrap();
        assert_eq!(written, script.sql);
        assert!(written.contains("CREATE TABLE"));
        assert!(written.trim_end().ends_with("COMMIT;"));
    }

    #[test]
    fn failed_compile_keeps_previous_output() {
        let tmp = tempdir().unwrap();
        let input = tmp.path().join("ecs.csv");
        fs::write(&input, "a,b\n1,2\n3\n").unwrap();
        let output = tmp.path().join("DDL-ecs.sql");
        fs::write(&output, "-- previous\n").unwrap();

        let cfg = CompileConfig {
            inputs: vec![input],
            output: output.clone(),
            table: TableOptions::default(),
        };
        assert!(matches!(compile(&cfg), Err(Error::MalformedInput { .. })));
        assert_eq!(fs::read_to_string(&output).unwrap(), "-- previous\n");
    }

    #[test]
    fn empty_input_list_is_rejected() {
        let tmp = tempdir().unwrap();
        let cfg = CompileConfig {
            inputs: Vec::new(),
            output: tmp.path().join("DDL-ecs.sql"),
            table: TableOptions::default(),
        };
        let err = compile(&cfg).unwrap_err();
        assert!(matches!(err, Error::NoInput));
        assert_eq!(err.to_string(), "no input files given");
    }

    #[test]
    fn missing_input_is_filesystem_error() {
        let tmp = tempdir().unwrap();
        let cfg = CompileConfig {
            inputs: vec![tmp.path().join("nope.csv")],
            output: tmp.path().join("DDL-ecs.sql"),
            table: TableOptions::default(),
        };
        assert!(matches!(compile(&cfg), Err(Error::Filesystem { .. })));
        assert!(!cfg.output.exists());
    }

    #[test]
    fn views_script_written_standalone() {
        let tmp = tempdir().unwrap();
        let output = tmp.path().join("views.sql");
        write_views(&output, "ecs", "elastic_log_schema").unwrap();
        let text = fs::read_to_string(&output).unwrap();
        assert!(text.starts_with("BEGIN;"));
        assert!(text.contains("REFRESH MATERIALIZED VIEW"));
    }
}
