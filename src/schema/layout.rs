// src/schema/layout.rs

use serde::Serialize;
use tracing::{debug, warn};

/// The nine columns of an ECS field list, in the order the upstream CSV uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum EcsColumn {
    Version,
    Indexed,
    FieldSet,
    Field,
    Type,
    Level,
    Normalization,
    Example,
    Description,
}

impl EcsColumn {
    pub const ALL: [EcsColumn; 9] = [
        EcsColumn::Version,
        EcsColumn::Indexed,
        EcsColumn::FieldSet,
        EcsColumn::Field,
        EcsColumn::Type,
        EcsColumn::Level,
        EcsColumn::Normalization,
        EcsColumn::Example,
        EcsColumn::Description,
    ];

    /// Column name used in the generated table and by the views.
    pub fn canonical(&self) -> &'static str {
        match self {
            EcsColumn::Version => "ECS_Version",
            EcsColumn::Indexed => "Indexed",
            EcsColumn::FieldSet => "Field_Set",
            EcsColumn::Field => "Field",
            EcsColumn::Type => "Type",
            EcsColumn::Level => "Level",
            EcsColumn::Normalization => "Normalization",
            EcsColumn::Example => "Example",
            EcsColumn::Description => "Description",
        }
    }

    fn aliases(&self) -> &'static [&'static str] {
        match self {
            EcsColumn::Version => &["ecsversion", "version", "schemaversion"],
            EcsColumn::Indexed => &["indexed", "indexedflag"],
            EcsColumn::FieldSet => &["fieldset"],
            EcsColumn::Field => &["field", "fieldname"],
            EcsColumn::Type => &["type", "typename"],
            EcsColumn::Level => &["level"],
            EcsColumn::Normalization => &["normalization", "normalisation"],
            EcsColumn::Example => &["example", "examplevalue"],
            EcsColumn::Description => &["description"],
        }
    }

    fn matches(&self, header: &str) -> bool {
        let key = normalize(header);
        self.aliases().iter().any(|a| *a == key)
    }
}

fn normalize(header: &str) -> String {
    header
        .trim()
        .chars()
        .filter(|c| !matches!(c, ' ' | '_' | '-'))
        .flat_map(char::to_lowercase)
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Recognition {
    ByName,
    Positional,
}

/// Where each ECS column sits in a particular file's header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldListLayout {
    positions: [usize; 9],
    pub recognition: Recognition,
}

impl FieldListLayout {
    /// Match a header against the ECS columns, first by name and then, for a
    /// nine-column header that names none of them, by position.
    pub fn recognize(header: &[String]) -> Option<Self> {
        let mut positions = [usize::MAX; 9];
        for (slot, col) in EcsColumn::ALL.iter().enumerate() {
            let found: Vec<usize> = header
                .iter()
                .enumerate()
                .filter(|(_, h)| col.matches(h))
                .map(|(i, _)| i)
                .collect();
            if found.len() == 1 {
                positions[slot] = found[0];
            } else if found.len() > 1 {
                warn!(column = col.canonical(), "header names this column more than once");
                return None;
            }
        }

        if positions.iter().all(|p| *p != usize::MAX) {
            debug!("recognized ECS field list by header names");
            return Some(FieldListLayout {
                positions,
                recognition: Recognition::ByName,
            });
        }

        let named = positions.iter().filter(|p| **p != usize::MAX).count();
        if header.len() == EcsColumn::ALL.len() && named == 0 {
            debug!("recognized ECS field list by column position");
            return Some(FieldListLayout {
                positions: [0, 1, 2, 3, 4, 5, 6, 7, 8],
                recognition: Recognition::Positional,
            });
        }
        None
    }

    pub fn position(&self, col: EcsColumn) -> usize {
        self.positions[col as usize]
    }

    /// The ECS column held at header index `idx`, if any.
    pub fn column_at(&self, idx: usize) -> Option<EcsColumn> {
        EcsColumn::ALL
            .iter()
            .copied()
            .find(|c| self.position(*c) == idx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn recognizes_upstream_header() {
        let h = header(&[
            "ECS_Version",
            "Indexed",
            "Field_Set",
            "Field",
            "Type",
            "Level",
            "Normalization",
            "Example",
            "Description",
        ]);
        let layout = FieldListLayout::recognize(&h).unwrap();
        assert_eq!(layout.recognition, Recognition::ByName);
        assert_eq!(layout.position(EcsColumn::Field), 3);
    }

    #[test]
    fn recognizes_reordered_names_with_spacing() {
        let h = header(&[
            "version",
            "field set",
            "Field Name",
            "TYPE",
            "level",
            "normalization",
            "indexed",
            "description",
            "example",
        ]);
        let layout = FieldListLayout::recognize(&h).unwrap();
        assert_eq!(layout.recognition, Recognition::ByName);
        assert_eq!(layout.position(EcsColumn::Indexed), 6);
        assert_eq!(layout.position(EcsColumn::Example), 8);
        assert_eq!(layout.column_at(1), Some(EcsColumn::FieldSet));
    }

    #[test]
    fn falls_back_to_position_for_unnamed_header() {
        let h = header(&["a", "b", "c", "d", "e", "f", "g", "h", "i"]);
        let layout = FieldListLayout::recognize(&h).unwrap();
        assert_eq!(layout.recognition, Recognition::Positional);
        assert_eq!(layout.position(EcsColumn::Description), 8);
    }

    #[test]
    fn rejects_partial_or_foreign_headers() {
        assert!(FieldListLayout::recognize(&header(&["name", "amount", "note"])).is_none());
        // nine columns, some named: neither rule applies
        let h = header(&["ECS_Version", "b", "c", "d", "e", "f", "g", "h", "i"]);
        assert!(FieldListLayout::recognize(&h).is_none());
    }
}
