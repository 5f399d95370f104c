//! Fetch the Elastic Common Schema field list and compile it into a
//! PostgreSQL load script with summary views.

pub mod compile;
pub mod error;
pub mod fetch;
pub mod schema;
pub mod sql;
pub mod views;

pub use error::{Error, Result};
