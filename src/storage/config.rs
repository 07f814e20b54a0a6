use std::path::PathBuf;

use envmnt::{ExpandOptions, ExpansionType};

use super::filesystem::FileSystem;

#[derive(serde::Deserialize, serde::Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "type")]
pub enum StorageConfig {
    FileSystem { base_path: PathBuf },
}
impl StorageConfig {
    pub fn build_fs(&self) -> FileSystem {
        match self {
            StorageConfig::FileSystem { base_path } => {
                // Expand environment variables as appropriate
                let mut options = ExpandOptions::new();
                options.expansion_type = Some(ExpansionType::Unix);
                let base_path = envmnt::expand(&base_path.to_string_lossy(), Some(options));

                FileSystem::new(PathBuf::from(base_path))
            }
        }
    }
}
