use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use uuid::Uuid;

use crate::error::WorkspaceError;
use crate::language::SourceFilename;

/// Shared parent of every job directory. Created once at startup.
#[derive(Clone, Debug)]
pub struct WorkspaceRoot {
    path: PathBuf,
}

impl WorkspaceRoot {
    pub fn init(path: &Path) -> Result<Self, WorkspaceError> {
        let root_err = |source| WorkspaceError::Root {
            path: path.to_path_buf(),
            source,
        };
        fs::create_dir_all(path).map_err(root_err)?;
        // the runtime needs an absolute host path for the bind mount
        let path = fs::canonicalize(path).map_err(root_err)?;
        tracing::info!(root = %path.display(), "workspace root ready");
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Creates a fresh directory for `job_id`. An existing directory is an error, never reused.
    pub fn prepare(&self, job_id: &Uuid) -> Result<Workspace, WorkspaceError> {
        let path = self.path.join(job_id.hyphenated().to_string());
        fs::create_dir(&path).map_err(|source| WorkspaceError::Create {
            path: path.clone(),
            source,
        })?;
        let workspace = Workspace {
            path,
            cleaned: AtomicBool::new(false),
        };
        // container users are not necessarily the host user
        if let Some(perms) = permissions(DIR_MODE) {
            fs::set_permissions(&workspace.path, perms).map_err(|source| {
                WorkspaceError::Create {
                    path: workspace.path.clone(),
                    source,
                }
            })?;
        }
        Ok(workspace)
    }
}

/// One job's directory. Removed exactly once, at the latest when dropped.
#[derive(Debug)]
pub struct Workspace {
    path: PathBuf,
    cleaned: AtomicBool,
}

impl Workspace {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write_source(
        &self,
        filename: SourceFilename,
        content: &str,
    ) -> Result<PathBuf, WorkspaceError> {
        let name = filename.as_str();
        if !is_plain_file_name(name) {
            return Err(WorkspaceError::InvalidFilename(name.to_string()));
        }
        let path = self.path.join(name);
        let write_err = |source| WorkspaceError::Write {
            path: path.clone(),
            source,
        };
        let mut file = File::create(&path).map_err(write_err)?;
        file.write_all(content.as_bytes()).map_err(write_err)?;
        file.flush().map_err(write_err)?;
        if let Some(perms) = permissions(SOURCE_MODE) {
            fs::set_permissions(&path, perms).map_err(write_err)?;
        }
        Ok(path)
    }

    /// Removes the directory tree. Only the first call does anything; errors are logged.
    pub fn cleanup(&self) {
        if self.cleaned.swap(true, Ordering::AcqRel) {
            return;
        }
        match fs::remove_dir_all(&self.path) {
            Ok(()) => tracing::debug!(path = %self.path.display(), "workspace removed"),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => {
                tracing::warn!(path = %self.path.display(), error = %err, "failed to remove workspace")
            }
        }
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        self.cleanup();
    }
}

fn is_plain_file_name(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

const DIR_MODE: u32 = 0o755;

const SOURCE_MODE: u32 = 0o644;

#[cfg_attr(not(unix), allow(unused_variables))]
fn permissions(mode: u32) -> Option<fs::Permissions> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        Some(fs::Permissions::from_mode(mode))
    }

    #[cfg(not(unix))]
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::language::Language;

    fn root() -> (tempfile::TempDir, WorkspaceRoot) {
        let dir = tempfile::tempdir().unwrap();
        let root = WorkspaceRoot::init(&dir.path().join("temp")).unwrap();
        (dir, root)
    }

    #[test]
    fn init_is_idempotent_and_absolute() {
        let dir = tempfile::tempdir().unwrap();
        let first = WorkspaceRoot::init(&dir.path().join("temp")).unwrap();
        let second = WorkspaceRoot::init(&dir.path().join("temp")).unwrap();
        assert!(first.path().is_absolute());
        assert_eq!(first.path(), second.path());
    }

    #[test]
    fn source_is_written_verbatim_under_registry_name() {
        let (_dir, root) = root();
        let workspace = root.prepare(&Uuid::new_v4()).unwrap();
        let code = "public class Main { public static void main(String[] a) {} }\n";

        let path = workspace.write_source(Language::Java.filename(), code).unwrap();

        assert_eq!(path, workspace.path().join("Main.java"));
        assert_eq!(fs::read_to_string(&path).unwrap(), code);
        assert_eq!(fs::read_dir(workspace.path()).unwrap().count(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn source_is_readable_but_not_writable_by_others() {
        use std::os::unix::fs::PermissionsExt;

        let (_dir, root) = root();
        let workspace = root.prepare(&Uuid::new_v4()).unwrap();
        let path = workspace.write_source(Language::C.filename(), "int main(){}").unwrap();

        let mode = |p: &Path| fs::metadata(p).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode(&path), 0o644);
        assert_eq!(mode(workspace.path()), 0o755);
    }

    #[test]
    fn duplicate_job_id_is_refused() {
        let (_dir, root) = root();
        let id = Uuid::new_v4();
        let _first = root.prepare(&id).unwrap();
        assert!(matches!(
            root.prepare(&id),
            Err(WorkspaceError::Create { .. })
        ));
    }

    #[test]
    fn cleanup_fires_once_and_tolerates_missing_dir() {
        let (_dir, root) = root();
        let workspace = root.prepare(&Uuid::new_v4()).unwrap();
        let path = workspace.path().to_path_buf();

        fs::remove_dir_all(&path).unwrap();
        workspace.cleanup();

        // a directory recreated after the first cleanup is not touched again
        fs::create_dir(&path).unwrap();
        workspace.cleanup();
        assert!(path.exists());
    }

    #[test]
    fn drop_removes_directory() {
        let (_dir, root) = root();
        let workspace = root.prepare(&Uuid::new_v4()).unwrap();
        workspace
            .write_source(Language::Python.filename(), "print('hi')")
            .unwrap();
        let path = workspace.path().to_path_buf();

        drop(workspace);

        assert!(!path.exists());
        assert_eq!(fs::read_dir(root.path()).unwrap().count(), 0);
    }

    #[test]
    fn plain_file_names_only() {
        assert!(is_plain_file_name("code.py"));
        assert!(!is_plain_file_name("../code.py"));
        assert!(!is_plain_file_name("/etc/passwd"));
        assert!(!is_plain_file_name("a/b.py"));
        assert!(!is_plain_file_name(""));
    }
}
