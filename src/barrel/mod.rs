//! A sealed barrel: term dictionary, postings, field metadata (§4.4). A
//! barrel is immutable once written; `writer` builds one from an in-memory
//! field set, `reader` opens one back up for term lookups.

pub mod dictionary;
pub mod field_info;
pub mod reader;
pub mod writer;

pub use dictionary::{TermDictEntry, TermDictionary};
pub use field_info::{FieldDescriptor, FieldFlags, FieldInfo};
pub use reader::{BarrelReader, TermReader};
pub use writer::{BarrelStats, BarrelWriter, InMemoryField};

/// The set of file extensions that make up one barrel (§6).
pub const BARREL_EXTENSIONS: [&str; 5] = ["fdi", "voc", "dfp", "pop", "skp"];

/// Every file name belonging to the barrel named `stem`.
pub fn barrel_file_names(stem: &str) -> Vec<String> {
    BARREL_EXTENSIONS.iter().map(|ext| format!("{stem}.{ext}")).collect()
}

/// Physically remove every file of barrel `stem` from `directory` (§A
/// "Barrel-level remove"; see DESIGN.md). Missing files are not an
/// error — a barrel whose write was interrupted may not have every
/// extension present.
pub fn remove_barrel_files(directory: &dyn crate::directory::Directory, stem: &str) -> crate::core::error::Result<()> {
    for name in barrel_file_names(stem) {
        if directory.exists(&name) {
            directory.delete(&name)?;
        }
    }
    Ok(())
}
