pub mod error;

pub use error::{report_error, FileIOError, NonUtf8PathError};
