use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::core::error::Result;

/// Directory structure of the database.
#[derive(Debug, Clone)]
pub struct DbLayout {
    pub base_dir: PathBuf,
    pub segments_dir: PathBuf,   // one file per sealed segment
    pub meta_index_dir: PathBuf, // one file per partition synopsis
}

impl DbLayout {
    pub fn new(base_dir: impl Into<PathBuf>) -> Result<Self> {
        let base_dir = base_dir.into();
        let segments_dir = base_dir.join("segments");
        let meta_index_dir = base_dir.join("meta-index");
        fs::create_dir_all(&segments_dir)?;
        fs::create_dir_all(&meta_index_dir)?;
        Ok(DbLayout {
            base_dir,
            segments_dir,
            meta_index_dir,
        })
    }

    pub fn segment_path(&self, id: &Uuid) -> PathBuf {
        self.segments_dir.join(id.to_string())
    }

    pub fn schema_path(&self) -> PathBuf {
        self.base_dir.join("schema.bin")
    }

    pub fn type_registry_path(&self) -> PathBuf {
        self.base_dir.join("type-registry.bin")
    }

    pub fn meta_index_dir(&self) -> &Path {
        &self.meta_index_dir
    }
}
