//! # cf-data
//!
//! In-memory record source for cutflow.
//!
//! A [`Dataset`] is an ordered list of partitions (typically one per input
//! file). Each partition stores named columns that are either scalar (one
//! value per record) or jagged (a variable number of instances per record).
//!
//! ## Example
//!
//! ```
//! use cf_core::RecordSource;
//! use cf_data::{Column, Dataset, Partition};
//!
//! let part = Partition::new("sample_a")
//!     .with_column("weight", Column::scalar(vec![1.0, 0.5]))
//!     .with_column("jet_pt", Column::jagged(vec![vec![40.0, 25.0], vec![]]));
//! let ds = Dataset::new(vec![part]).unwrap();
//! assert_eq!(ds.entry_count(), 2);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod column;
pub mod dataset;
pub mod json;

pub use column::{Column, JaggedCol};
pub use dataset::{Dataset, DatasetCursor, Partition};
