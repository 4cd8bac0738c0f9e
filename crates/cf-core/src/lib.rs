//! # cf-core
//!
//! Shared vocabulary for the cutflow workspace: the error type, column and
//! partition identifiers, and the record-source traits that the engine reads
//! records through.
//!
//! Concrete sources live in `cf-data`; the execution engine lives in
//! `cf-engine` and depends only on the traits defined here.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod traits;
pub mod types;

pub use error::{Error, Result};
pub use traits::{RecordCursor, RecordSource, RecordView};
pub use types::{ColumnIndex, ColumnInfo, ColumnKind, PartitionId, Schema};
