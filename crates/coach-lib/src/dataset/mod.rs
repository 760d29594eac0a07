//! Training dataset capture
//!
//! Completed jobs that carry a caption become labelled feature sequences:
//! - `labels`: free text to the closed technique-error label set
//! - `features`: fixed-order per-frame vectors
//! - `recorder`: append-only JSON-lines persistence
//! - `preprocess`: offline centering and smoothing for training

pub mod features;
pub mod labels;
pub mod preprocess;
pub mod record;
pub mod recorder;

pub use labels::{canonicalize, Label, LabelInvalid, LabelSet};
pub use record::{DatasetRecord, FrameSample, VideoLine, SCHEMA_VERSION};
pub use recorder::{DatasetSink, JsonlDatasetRecorder, RecordError, RecordLocation};
