pub mod ddl;
pub mod literal;
pub mod views;

pub use ddl::{build_script, TableOptions};
pub use literal::{quote_ident, quote_literal, render_value};
pub use views::views_script;
