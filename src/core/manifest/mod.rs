mod file_lists;
mod loader;

pub use file_lists::{parse_manifest, FileLists, ManifestKind};
pub use loader::ManifestLoader;
