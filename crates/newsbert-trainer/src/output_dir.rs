//! Output directory reset before a run.

use std::io;
use std::path::Path;

use tracing::{info, warn};

/// What happened to a pre-existing output directory.
#[derive(Debug)]
pub enum DirReset {
    /// Deletion was not requested, or nothing was there to delete.
    Kept,
    /// The directory and its contents were removed.
    Deleted,
    /// Removal was requested but failed; the run may proceed against the
    /// old contents.
    DeleteFailed(io::Error),
}

impl DirReset {
    pub fn is_failure(&self) -> bool {
        matches!(self, DirReset::DeleteFailed(_))
    }
}

/// Optionally delete `dir` with `remove`, then make sure it exists.
///
/// A failed deletion is reported in the returned [`DirReset`], not as an
/// error. Failing to create the directory is an error.
pub fn prepare_output_dir<F>(dir: &Path, delete: bool, remove: F) -> io::Result<DirReset>
where
    F: FnOnce(&Path) -> io::Result<()>,
{
    let reset = if delete && dir.exists() {
        match remove(dir) {
            Ok(()) => DirReset::Deleted,
            Err(e) => DirReset::DeleteFailed(e),
        }
    } else {
        DirReset::Kept
    };

    match &reset {
        DirReset::Deleted => info!("Deleted previous output directory {}", dir.display()),
        DirReset::DeleteFailed(e) => warn!("Could not delete {}: {e}", dir.display()),
        DirReset::Kept => {}
    }

    std::fs::create_dir_all(dir)?;
    info!("Model output directory: {}", dir.display());
    Ok(reset)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn remove_dir_all(dir: &Path) -> io::Result<()> {
        std::fs::remove_dir_all(dir)
    }

    #[test]
    fn creates_missing_directory() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("trainedModel").join("predictNewsCategory");

        let reset = prepare_output_dir(&dir, false, remove_dir_all).unwrap();
        assert!(matches!(reset, DirReset::Kept));
        assert!(dir.is_dir());
    }

    #[test]
    fn keeps_contents_without_delete_flag() {
        let root = tempfile::tempdir().unwrap();
        std::fs::write(root.path().join("checkpoint.json"), "{}").unwrap();

        prepare_output_dir(root.path(), false, remove_dir_all).unwrap();
        assert!(root.path().join("checkpoint.json").exists());
    }

    #[test]
    fn delete_flag_clears_previous_run() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("out");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("model.ckpt-300.safetensors"), "stale").unwrap();

        let reset = prepare_output_dir(&dir, true, remove_dir_all).unwrap();
        assert!(matches!(reset, DirReset::Deleted));
        assert!(!reset.is_failure());
        assert!(dir.is_dir());
        assert_eq!(std::fs::read_dir(&dir).unwrap().count(), 0);
    }

    #[test]
    fn delete_of_absent_directory_is_kept() {
        let root = tempfile::tempdir().unwrap();
        let reset = prepare_output_dir(&root.path().join("fresh"), true, remove_dir_all).unwrap();
        assert!(matches!(reset, DirReset::Kept));
    }

    #[test]
    fn file_in_place_of_directory_is_an_error() {
        let root = tempfile::tempdir().unwrap();
        let path = root.path().join("not-a-dir");
        std::fs::write(&path, "x").unwrap();

        // Deletion fails softly, but the directory still cannot be created.
        assert!(prepare_output_dir(&path, true, remove_dir_all).is_err());
    }

    #[test]
    fn failed_removal_keeps_old_contents() {
        let root = tempfile::tempdir().unwrap();
        std::fs::write(root.path().join("checkpoint.json"), "{}").unwrap();

        let reset = prepare_output_dir(root.path(), true, |_| {
            Err(io::Error::new(io::ErrorKind::PermissionDenied, "read-only"))
        })
        .unwrap();
        assert!(reset.is_failure());
        assert!(root.path().join("checkpoint.json").exists());
    }

    #[test]
    fn delete_failure_is_a_value() {
        let reset = DirReset::DeleteFailed(io::Error::new(io::ErrorKind::PermissionDenied, "busy"));
        assert!(reset.is_failure());
        assert!(!DirReset::Kept.is_failure());
    }
}
