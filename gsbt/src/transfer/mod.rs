//! Byte accounting and progress rendering for downloads.

pub mod progress;
pub mod progress_writer;
pub mod reporter;

pub use progress_writer::ProgressWriter;
pub use reporter::{
    reporter_for, shared_multi_progress, NullReporter, ProgressReporter, RichReporter, TextReporter,
};
