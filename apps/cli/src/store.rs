use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use geotree_project::{CodecConfig, LoadError, ProjectTree, SaveError};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::debug;

/// Reads and writes a project document on disk.
/// 讀寫磁碟上的專案文件。
#[derive(Debug)]
pub struct ProjectFile {
    path: PathBuf,
    config: CodecConfig,
}

impl ProjectFile {
    pub fn new(path: impl AsRef<Path>, config: CodecConfig) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            config,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Loads the project tree stored at this path.
    /// 從此路徑載入專案樹。
    pub fn load(&self) -> Result<ProjectTree, ProjectFileError> {
        let contents = fs::read_to_string(&self.path).map_err(|source| ProjectFileError::Io {
            path: self.path.clone(),
            source,
        })?;
        let tree =
            ProjectTree::load_with(&contents, &self.config).map_err(|source| ProjectFileError::Load {
                path: self.path.clone(),
                source,
            })?;
        debug!(path = %self.path.display(), nodes = tree.len(), "loaded project file");
        Ok(tree)
    }

    /// Writes the tree atomically and marks it as saved.
    /// 以原子方式寫入並清除變更旗標。
    pub fn save(&self, tree: &mut ProjectTree) -> Result<(), ProjectFileError> {
        let text = tree.serialize_with(&self.config)?;
        write_atomic(&self.path, text.as_bytes()).map_err(|source| ProjectFileError::Io {
            path: self.path.clone(),
            source,
        })?;
        tree.mark_saved();
        debug!(path = %self.path.display(), bytes = text.len(), "saved project file");
        Ok(())
    }
}

/// Errors emitted by [`ProjectFile`].
#[derive(Debug, Error)]
pub enum ProjectFileError {
    #[error("project file IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid project file {path}: {source}")]
    Load {
        path: PathBuf,
        #[source]
        source: LoadError,
    },
    #[error(transparent)]
    Save(#[from] SaveError),
}

/// Writes data to a uniquely named temporary file in the target directory,
/// then renames it over `path`.
fn write_atomic(path: &Path, data: &[u8]) -> io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;
    let mut file = NamedTempFile::new_in(dir)?;
    file.write_all(data)?;
    file.as_file().sync_all()?;
    file.persist(path).map_err(|err| err.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use geotree_project::NodeType;
    use tempfile::tempdir;

    #[test]
    fn save_and_load_roundtrip() {
        let dir = tempdir().unwrap();
        let file = ProjectFile::new(dir.path().join("site.json"), CodecConfig::default());

        let mut tree = ProjectTree::new_empty("Site");
        let root = tree.root_id();
        tree.create_child(root, NodeType::PointCloud, "Scan1", "scan1.uds")
            .unwrap();
        assert!(tree.has_unsaved_changes());

        file.save(&mut tree).unwrap();
        assert!(!tree.has_unsaved_changes());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);

        let loaded = file.load().unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.root().name(), "Site");
    }

    #[test]
    fn save_leaves_unrelated_siblings_alone() {
        let dir = tempdir().unwrap();
        let notes = dir.path().join("site.tmp");
        fs::write(&notes, "user notes").unwrap();

        let file = ProjectFile::new(dir.path().join("site.json"), CodecConfig::default());
        let mut tree = ProjectTree::new_empty("Site");
        file.save(&mut tree).unwrap();
        file.save(&mut tree).unwrap();

        assert_eq!(fs::read_to_string(&notes).unwrap(), "user notes");
        assert_eq!(file.load().unwrap().root().name(), "Site");
    }

    #[test]
    fn save_works_for_tmp_named_projects() {
        let dir = tempdir().unwrap();
        let file = ProjectFile::new(dir.path().join("draft.tmp"), CodecConfig::default());
        let mut tree = ProjectTree::new_empty("Draft");
        file.save(&mut tree).unwrap();
        assert_eq!(file.load().unwrap().root().name(), "Draft");
    }

    #[test]
    fn save_refuses_trees_the_config_cannot_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("site.json");
        let file = ProjectFile::new(&path, CodecConfig::default().with_max_depth(1));
        let mut tree = ProjectTree::new_empty("Site");
        let root = tree.root_id();
        let outer = tree
            .create_child(root, NodeType::Folder, "Outer", "")
            .unwrap();
        file.save(&mut tree).unwrap();
        let before = fs::read_to_string(&path).unwrap();

        tree.create_child(outer, NodeType::Folder, "Inner", "")
            .unwrap();
        assert!(matches!(
            file.save(&mut tree),
            Err(ProjectFileError::Save(SaveError::TooDeep { depth: 2, limit: 1 }))
        ));
        assert!(tree.has_unsaved_changes());
        assert_eq!(fs::read_to_string(&path).unwrap(), before);
        assert_eq!(file.load().unwrap().len(), 2);
    }

    #[test]
    fn load_missing_file_is_an_io_error() {
        let dir = tempdir().unwrap();
        let file = ProjectFile::new(dir.path().join("absent.json"), CodecConfig::default());
        assert!(!file.exists());
        assert!(matches!(file.load(), Err(ProjectFileError::Io { .. })));
    }

    #[test]
    fn load_reports_malformed_text() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.json");
        fs::write(&path, "{\"type\":\"Feature\"}").unwrap();
        let file = ProjectFile::new(&path, CodecConfig::default());
        assert!(matches!(
            file.load(),
            Err(ProjectFileError::Load {
                source: LoadError::Malformed(_),
                ..
            })
        ));
    }
}
