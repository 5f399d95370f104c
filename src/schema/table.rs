// src/schema/table.rs

use std::{
    collections::HashSet,
    fs::File,
    io::Read,
    path::{Path, PathBuf},
};

use tracing::{debug, instrument};

use super::layout::{EcsColumn, FieldListLayout};
use super::types::FieldRecord;
use crate::error::{Error, Result};

/// A CSV file read into memory. Empty cells are `None`.
#[derive(Debug, Clone)]
pub struct RawTable {
    pub source: PathBuf,
    pub header: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
    /// 1-based source line of each row, parallel to `rows`.
    pub lines: Vec<usize>,
    pub layout: Option<FieldListLayout>,
}

impl RawTable {
    #[instrument(level = "debug")]
    pub fn read(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| Error::fs(path, e))?;
        Self::from_reader(path, file)
    }

    /// Parse CSV text. `source` is only used to label errors.
    pub fn from_reader<R: Read>(source: &Path, reader: R) -> Result<Self> {
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(reader);

        let header: Vec<String> = rdr
            .headers()
            .map_err(|e| csv_error(source, e))?
            .iter()
            .map(|h| h.trim_start_matches('\u{feff}').trim().to_string())
            .collect();

        if header.is_empty() || header.iter().all(|h| h.is_empty()) {
            return Err(Error::malformed(source, Some(1), "missing header row"));
        }
        let mut seen = HashSet::new();
        for (idx, h) in header.iter().enumerate() {
            if h.is_empty() {
                return Err(Error::malformed(
                    source,
                    Some(1),
                    format!("header at index {} is empty", idx),
                ));
            }
            if !seen.insert(h.as_str()) {
                return Err(Error::malformed(
                    source,
                    Some(1),
                    format!("duplicate header `{}`", h),
                ));
            }
        }

        let mut rows = Vec::new();
        let mut lines = Vec::new();
        for record in rdr.records() {
            let record = record.map_err(|e| csv_error(source, e))?;
            let line = record
                .position()
                .map(|p| p.line() as usize)
                .unwrap_or(rows.len() + 2);
            if record.len() != header.len() {
                return Err(Error::malformed(
                    source,
                    Some(line),
                    format!("expected {} columns, found {}", header.len(), record.len()),
                ));
            }
            rows.push(
                record
                    .iter()
                    .map(|v| if v.is_empty() { None } else { Some(v.to_string()) })
                    .collect(),
            );
            lines.push(line);
        }

        if rows.is_empty() {
            return Err(Error::malformed(source, None, "no data rows"));
        }

        let layout = FieldListLayout::recognize(&header);
        debug!(
            rows = rows.len(),
            columns = header.len(),
            ecs = layout.is_some(),
            "read table"
        );
        Ok(RawTable {
            source: source.to_path_buf(),
            header,
            rows,
            lines,
            layout,
        })
    }

    /// Column names for the generated table: canonical ECS names when the
    /// header is recognized, the header itself otherwise.
    pub fn column_names(&self) -> Vec<String> {
        match &self.layout {
            Some(layout) => (0..self.header.len())
                .map(|i| match layout.column_at(i) {
                    Some(col) => col.canonical().to_string(),
                    None => self.header[i].clone(),
                })
                .collect(),
            None => self.header.clone(),
        }
    }

    /// Version string of the last data row, the one an archive is named after.
    pub fn embedded_version(&self) -> Option<&str> {
        let idx = self.layout.as_ref()?.position(EcsColumn::Version);
        self.rows.last()?.get(idx)?.as_deref()
    }

    /// Interpret every row as an ECS field record.
    pub fn field_records(&self) -> Result<Vec<FieldRecord>> {
        let layout = self.layout.as_ref().ok_or_else(|| {
            Error::malformed(&self.source, Some(1), "header is not an ECS field list")
        })?;

        self.rows
            .iter()
            .zip(&self.lines)
            .map(|(row, line)| {
                let get = |col: EcsColumn| row[layout.position(col)].clone();
                let required = |col: EcsColumn| {
                    get(col).ok_or_else(|| {
                        Error::malformed(
                            &self.source,
                            Some(*line),
                            format!("`{}` is empty", col.canonical()),
                        )
                    })
                };
                let indexed = match get(EcsColumn::Indexed).as_deref().map(str::to_ascii_lowercase) {
                    Some(v) if v == "true" => true,
                    Some(v) if v == "false" => false,
                    other => {
                        return Err(Error::malformed(
                            &self.source,
                            Some(*line),
                            format!("`Indexed` must be true or false, got {:?}", other),
                        ))
                    }
                };
                Ok(FieldRecord {
                    ecs_version: required(EcsColumn::Version)?,
                    indexed,
                    field_set: required(EcsColumn::FieldSet)?,
                    field: required(EcsColumn::Field)?,
                    ty: required(EcsColumn::Type)?,
                    level: required(EcsColumn::Level)?,
                    normalization: get(EcsColumn::Normalization),
                    example: get(EcsColumn::Example),
                    description: get(EcsColumn::Description),
                })
            })
            .collect()
    }
}

fn csv_error(source: &Path, err: csv::Error) -> Error {
    let line = err.position().map(|p| p.line() as usize);
    Error::malformed(source, line, err.to_string())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) const SAMPLE: &str = "\
ECS_Version,Indexed,Field_Set,Field,Type,Level,Normalization,Example,Description
9.3.0-dev,true,base,@timestamp,date,core,,2016-05-23T08:05:34.853Z,Date/time when the event originated.
9.3.0-dev,true,base,message,match_only_text,core,,Hello World,\"For log events, the message field.\"
9.3.0-dev,false,base,tags,keyword,core,array,\"[\"\"production\"\", \"\"env2\"\"]\",List of keywords.
9.3.0-dev,true,user,user.name,keyword,core,,O'Brien,Short name or login of the user.
";

    fn read(text: &str) -> Result<RawTable> {
        RawTable::from_reader(Path::new("ecs.csv"), text.as_bytes())
    }

    #[test]
    fn reads_quoted_cells_and_nulls() {
        let t = read(SAMPLE).unwrap();
        assert_eq!(t.rows.len(), 4);
        assert!(t.layout.is_some());
        assert_eq!(t.rows[0][6], None);
        assert_eq!(t.rows[2][7].as_deref(), Some(r#"["production", "env2"]"#));
        assert_eq!(t.lines, vec![2, 3, 4, 5]);
        assert_eq!(t.embedded_version(), Some("9.3.0-dev"));
    }

    #[test]
    fn column_count_mismatch_reports_line() {
        let text = "a,b,c\n1,2,3\n4,5\n";
        match read(text) {
            Err(Error::MalformedInput { row, reason, .. }) => {
                assert_eq!(row, Some(3));
                assert!(reason.contains("expected 3 columns, found 2"));
            }
            other => panic!("expected malformed input, got {:?}", other),
        }
    }

    #[test]
    fn header_only_file_is_malformed() {
        assert!(matches!(
            read("a,b,c\n"),
            Err(Error::MalformedInput { row: None, .. })
        ));
        assert!(matches!(read(""), Err(Error::MalformedInput { .. })));
    }

    #[test]
    fn duplicate_header_is_malformed() {
        assert!(matches!(
            read("a,b,a\n1,2,3\n"),
            Err(Error::MalformedInput { row: Some(1), .. })
        ));
    }

    #[test]
    fn field_records_follow_layout() {
        let records = read(SAMPLE).unwrap().field_records().unwrap();
        assert_eq!(records.len(), 4);
        assert!(!records[2].indexed);
        assert_eq!(records[2].normalization.as_deref(), Some("array"));
        assert_eq!(records[3].example.as_deref(), Some("O'Brien"));
        assert_eq!(records[3].field_set, "user");
    }

    #[test]
    fn bad_indexed_flag_names_row() {
        let text = SAMPLE.replace("9.3.0-dev,false,base", "9.3.0-dev,maybe,base");
        match read(&text).unwrap().field_records() {
            Err(Error::MalformedInput { row, .. }) => assert_eq!(row, Some(4)),
            other => panic!("expected malformed input, got {:?}", other),
        }
    }

    #[test]
    fn generic_table_keeps_header_names() {
        let t = read("name,amount\nx,1\n").unwrap();
        assert!(t.layout.is_none());
        assert_eq!(t.column_names(), vec!["name", "amount"]);
        assert!(t.field_records().is_err());
    }
}
