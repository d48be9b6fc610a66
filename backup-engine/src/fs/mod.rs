//! File system operations: enumeration, classification and timestamps.

pub mod classify;
pub mod metadata;
pub mod walker;

pub use classify::{Classifier, ExtensionSet, FileClass};
pub use metadata::FileTimes;
pub use walker::{enumerate, Enumeration, FileEntry};
