use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct VaultConfig {
    /// Root directory under which every principal gets a private subdirectory.
    pub storage_root: PathBuf,
    /// Directory holding the metadata catalog database.
    pub data_dir: PathBuf,
    /// Maximum size in bytes accepted for a single uploaded object.
    pub max_object_size: u64,
}

impl VaultConfig {
    #[must_use]
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("strongbox.db")
    }
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            storage_root: PathBuf::from("./data/vault"),
            data_dir: PathBuf::from("./data"),
            max_object_size: 500 * 1024 * 1024,
        }
    }
}
