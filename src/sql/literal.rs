// src/sql/literal.rs

use crate::schema::types::ColumnClass;

/// Double-quote an identifier, doubling any embedded double quotes.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// `"schema"."table"`
pub fn qualified(schema: &str, name: &str) -> String {
    format!("{}.{}", quote_ident(schema), quote_ident(name))
}

/// Single-quote a string literal. Backslashes force the `E''` form so the
/// literal means the same thing whatever `standard_conforming_strings` is set to.
pub fn quote_literal(value: &str) -> String {
    let doubled = value.replace('\'', "''");
    if value.contains('\\') {
        format!("E'{}'", doubled.replace('\\', "\\\\"))
    } else {
        format!("'{}'", doubled)
    }
}

/// Render one cell for a column of the given class. `None` is SQL `NULL`.
pub fn render_value(value: Option<&str>, class: ColumnClass) -> String {
    let v = match value {
        Some(v) => v,
        None => return "NULL".to_string(),
    };
    match class {
        ColumnClass::Boolean if v.eq_ignore_ascii_case("true") => "TRUE".to_string(),
        ColumnClass::Boolean if v.eq_ignore_ascii_case("false") => "FALSE".to_string(),
        ColumnClass::Integer | ColumnClass::Decimal => v.to_string(),
        _ => quote_literal(v),
    }
}
