pub mod derive;
pub mod layout;
pub mod table;
pub mod types;
pub mod version;
pub mod write;

pub use derive::{derive_types, InferenceOptions};
pub use layout::{EcsColumn, FieldListLayout, Recognition};
pub use table::RawTable;
pub use types::{Column, ColumnClass, FieldRecord, SqlType};
pub use version::SchemaVersion;
pub use write::write_atomic;
