pub mod ingest;

pub use ingest::{validate, ReadingSubmission, ValidationError};
