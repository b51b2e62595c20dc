use std::path::{Component, Path, PathBuf};

use ade_core::{ConfigurationId, DocumentId, EnvironmentId, RunId, WorkspaceId};

/// Strips a `file:` prefix used by some engine manifests to point at paths
/// relative to a config package (`file:rel/path`) or absolute (`file:///abs`).
pub fn strip_file_uri(value: &str) -> &str {
    if let Some(rest) = value.strip_prefix("file:///") {
        return rest;
    }
    if let Some(rest) = value.strip_prefix("file://") {
        return rest;
    }
    value.strip_prefix("file:").unwrap_or(value)
}

/// Joins `base` with `parts`, rejecting any component that would escape
/// `base`: empty/`.`/`..` segments, absolute segments, and (on platforms
/// with drive prefixes) prefix components are all rejected before touching
/// the filesystem. The target need not exist.
pub fn safe_join<P: AsRef<Path>>(base: &Path, parts: &[P]) -> ade_core::Result<PathBuf> {
    let mut out = base.to_path_buf();
    for part in parts {
        let part = part.as_ref();
        if part.as_os_str().is_empty() {
            return Err(ade_core::Error::UnsafePath(format!(
                "empty path segment under {}",
                base.display()
            )));
        }
        for component in part.components() {
            match component {
                Component::Normal(segment) => out.push(segment),
                Component::CurDir => {}
                Component::ParentDir => {
                    return Err(ade_core::Error::UnsafePath(format!(
                        "parent-dir segment not allowed: {}",
                        part.display()
                    )));
                }
                Component::RootDir | Component::Prefix(_) => {
                    return Err(ade_core::Error::UnsafePath(format!(
                        "absolute segment not allowed: {}",
                        part.display()
                    )));
                }
            }
        }
    }

    if !out.starts_with(base) {
        return Err(ade_core::Error::UnsafePath(format!(
            "resolved path escapes root: {}",
            out.display()
        )));
    }
    Ok(out)
}

/// Resolves every filesystem path the worker and API need, rooted at a
/// single workspaces directory. All methods are pure path composition —
/// nothing here touches disk.
#[derive(Debug, Clone)]
pub struct PathManager {
    workspaces_dir: PathBuf,
    documents_dir: PathBuf,
    configs_dir: PathBuf,
    runs_dir: PathBuf,
    venvs_dir: PathBuf,
}

impl PathManager {
    pub fn new(
        workspaces_dir: impl Into<PathBuf>,
        documents_dir: impl Into<PathBuf>,
        configs_dir: impl Into<PathBuf>,
        runs_dir: impl Into<PathBuf>,
        venvs_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            workspaces_dir: workspaces_dir.into(),
            documents_dir: documents_dir.into(),
            configs_dir: configs_dir.into(),
            runs_dir: runs_dir.into(),
            venvs_dir: venvs_dir.into(),
        }
    }

    pub fn workspace_root(&self, workspace_id: WorkspaceId) -> ade_core::Result<PathBuf> {
        safe_join(&self.workspaces_dir, &[workspace_id.to_string()])
    }

    pub fn configuration_root(
        &self,
        workspace_id: WorkspaceId,
        configuration_id: ConfigurationId,
    ) -> ade_core::Result<PathBuf> {
        safe_join(
            &self.configs_dir,
            &[workspace_id.to_string(), configuration_id.to_string()],
        )
    }

    pub fn configuration_file(
        &self,
        workspace_id: WorkspaceId,
        configuration_id: ConfigurationId,
        relative: &str,
    ) -> ade_core::Result<PathBuf> {
        let root = self.configuration_root(workspace_id, configuration_id)?;
        let relative = strip_file_uri(relative);
        safe_join(&root, &[relative])
    }

    pub fn document_path(
        &self,
        workspace_id: WorkspaceId,
        document_id: DocumentId,
        filename: &str,
    ) -> ade_core::Result<PathBuf> {
        safe_join(
            &self.documents_dir,
            &[workspace_id.to_string(), document_id.to_string(), filename.to_string()],
        )
    }

    pub fn run_root(&self, workspace_id: WorkspaceId, run_id: RunId) -> ade_core::Result<PathBuf> {
        safe_join(&self.runs_dir, &[workspace_id.to_string(), run_id.to_string()])
    }

    pub fn run_input_path(
        &self,
        workspace_id: WorkspaceId,
        run_id: RunId,
        filename: &str,
    ) -> ade_core::Result<PathBuf> {
        let root = self.run_root(workspace_id, run_id)?;
        safe_join(&root, &["input", filename])
    }

    pub fn run_output_dir(
        &self,
        workspace_id: WorkspaceId,
        run_id: RunId,
    ) -> ade_core::Result<PathBuf> {
        let root = self.run_root(workspace_id, run_id)?;
        safe_join(&root, &["output"])
    }

    pub fn run_event_log_path(
        &self,
        workspace_id: WorkspaceId,
        run_id: RunId,
    ) -> ade_core::Result<PathBuf> {
        let root = self.run_root(workspace_id, run_id)?;
        safe_join(&root, &["events.ndjson"])
    }

    pub fn environment_root(&self, environment_id: EnvironmentId) -> ade_core::Result<PathBuf> {
        safe_join(&self.venvs_dir, &[environment_id.to_string()])
    }

    pub fn environment_event_log_path(
        &self,
        environment_id: EnvironmentId,
    ) -> ade_core::Result<PathBuf> {
        let root = self.environment_root(environment_id)?;
        safe_join(&root, &["events.ndjson"])
    }

    pub fn environment_venv_dir(&self, environment_id: EnvironmentId) -> ade_core::Result<PathBuf> {
        let root = self.environment_root(environment_id)?;
        safe_join(&root, &[".venv"])
    }

    /// Path to the interpreter inside the environment's `.venv`,
    /// platform-aware: `bin/python` on Unix, `Scripts\python.exe` on
    /// Windows.
    pub fn venv_python(&self, environment_id: EnvironmentId) -> ade_core::Result<PathBuf> {
        let venv = self.environment_venv_dir(environment_id)?;
        if cfg!(windows) {
            Ok(venv.join("Scripts").join("python.exe"))
        } else {
            Ok(venv.join("bin").join("python"))
        }
    }

    /// Path to the `engine` console script installed into the environment's
    /// `.venv` alongside the interpreter, per the engine CLI contract
    /// (`engine config validate` / `engine process file`).
    pub fn venv_engine_binary(&self, environment_id: EnvironmentId) -> ade_core::Result<PathBuf> {
        let venv = self.environment_venv_dir(environment_id)?;
        if cfg!(windows) {
            Ok(venv.join("Scripts").join("engine.exe"))
        } else {
            Ok(venv.join("bin").join("engine"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> PathManager {
        PathManager::new(
            "/data/workspaces",
            "/data/workspaces",
            "/data/workspaces",
            "/data/workspaces",
            "/data/venvs",
        )
    }

    #[test]
    fn rejects_parent_dir_segments() {
        let base = Path::new("/data/configs");
        let err = safe_join(base, &["../escape"]).unwrap_err();
        assert!(matches!(err, ade_core::Error::UnsafePath(_)));
    }

    #[test]
    fn rejects_absolute_segments() {
        let base = Path::new("/data/configs");
        let err = safe_join(base, &["/etc/passwd"]).unwrap_err();
        assert!(matches!(err, ade_core::Error::UnsafePath(_)));
    }

    #[test]
    fn accepts_nested_normal_segments() {
        let base = Path::new("/data/configs");
        let joined = safe_join(base, &["a/b/c.json"]).unwrap();
        assert_eq!(joined, Path::new("/data/configs/a/b/c.json"));
    }

    #[test]
    fn strips_file_uri_variants() {
        assert_eq!(strip_file_uri("file:rel/path"), "rel/path");
        assert_eq!(strip_file_uri("file:///abs/path"), "/abs/path");
        assert_eq!(strip_file_uri("plain/path"), "plain/path");
    }

    #[test]
    fn configuration_file_rejects_escape_via_file_uri() {
        let manager = manager();
        let workspace_id = WorkspaceId::new();
        let configuration_id = ConfigurationId::new();
        let err = manager
            .configuration_file(workspace_id, configuration_id, "file:../../etc/passwd")
            .unwrap_err();
        assert!(matches!(err, ade_core::Error::UnsafePath(_)));
    }

    #[test]
    fn venv_python_is_platform_aware() {
        let manager = manager();
        let path = manager.venv_python(EnvironmentId::new()).unwrap();
        if cfg!(windows) {
            assert!(path.ends_with("Scripts/python.exe") || path.ends_with("Scripts\\python.exe"));
        } else {
            assert!(path.ends_with("bin/python"));
        }
    }

    #[test]
    fn venv_engine_binary_is_platform_aware() {
        let manager = manager();
        let path = manager.venv_engine_binary(EnvironmentId::new()).unwrap();
        if cfg!(windows) {
            assert!(path.ends_with("Scripts/engine.exe") || path.ends_with("Scripts\\engine.exe"));
        } else {
            assert!(path.ends_with("bin/engine"));
        }
    }
}
