//! Private, disposable copies of a module tree.
//!
//! Every call to [`materialize`] creates a new uniquely named directory, so
//! concurrent runs of the same module never share files. The provisioning tool
//! writes its plugin directory and local state into the copy, never into the
//! canonical source.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use infratest_domain::ModuleSource;
use time::OffsetDateTime;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::core::fs::{copy_file, copy_file_unshared, replace_file, CopyError, ScratchDir};

mod filter;

pub use filter::CopyFilter;
use filter::rewritten_by_tool;

const WORKSPACE_PREFIX: &str = "infratest-";

#[derive(Debug, thiserror::Error)]
pub enum IsolationError {
    #[error("module directory {path} is not readable: {source}")]
    ModuleUnavailable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("module path {path} is not a directory")]
    NotADirectory { path: PathBuf },
    #[error("failed to create workspace under {root}: {reason}")]
    Create { root: PathBuf, reason: String },
    #[error("failed to walk module tree: {0}")]
    Walk(#[from] walkdir::Error),
    #[error("failed to create {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to copy {from} into the workspace: {source}")]
    Copy {
        from: PathBuf,
        #[source]
        source: CopyError,
    },
    #[error("overlay {path} does not name a file")]
    InvalidOverlay { path: PathBuf },
}

#[derive(Debug, Clone, Default)]
pub struct MaterializeOptions {
    /// Parent directory for the workspace.
    pub root: PathBuf,
    /// Files copied into the workspace root after the tree copy. Relative
    /// paths resolve against the module directory.
    pub overlays: Vec<PathBuf>,
    pub filter: CopyFilter,
}

/// An isolated working copy of one module, owned by a single run.
///
/// Dropping a workspace removes its directory; [`Workspace::release`] does
/// the same but reports failures.
#[derive(Debug)]
pub struct Workspace {
    dir: ScratchDir,
    created_from: ModuleSource,
    created_at: OffsetDateTime,
}

impl Workspace {
    #[must_use]
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    #[must_use]
    pub fn created_from(&self) -> &ModuleSource {
        &self.created_from
    }

    #[must_use]
    pub fn created_at(&self) -> OffsetDateTime {
        self.created_at
    }

    /// Names of the entries at the workspace root, sorted.
    pub fn root_entries(&self) -> io::Result<Vec<String>> {
        let mut names = fs::read_dir(self.path())?
            .map(|entry| entry.map(|entry| entry.file_name().to_string_lossy().into_owned()))
            .collect::<io::Result<Vec<_>>>()?;
        names.sort();
        Ok(names)
    }

    /// Removes the workspace directory.
    ///
    /// # Errors
    ///
    /// Returns an error when the directory exists but cannot be removed.
    pub fn release(self) -> anyhow::Result<()> {
        let path = self.path().to_path_buf();
        self.dir.release()?;
        debug!(workspace = %path.display(), "workspace removed");
        Ok(())
    }

    /// Leaves the directory on disk and returns its path.
    #[must_use]
    pub fn keep(self) -> PathBuf {
        self.dir.keep()
    }
}

/// Copies `source` into a fresh directory under `options.root`, then applies
/// overlays.
///
/// On error the partially built directory is removed before returning.
///
/// # Errors
///
/// Returns [`IsolationError`] when the module cannot be read or any file
/// cannot be copied.
pub fn materialize(
    source: &ModuleSource,
    options: &MaterializeOptions,
) -> Result<Workspace, IsolationError> {
    let module_dir = source.module_dir();
    let meta = fs::metadata(&module_dir).map_err(|source| IsolationError::ModuleUnavailable {
        path: module_dir.clone(),
        source,
    })?;
    if !meta.is_dir() {
        return Err(IsolationError::NotADirectory { path: module_dir });
    }

    let prefix = format!("{WORKSPACE_PREFIX}{}-", source.label());
    let dir = ScratchDir::new_in(&options.root, &prefix).map_err(|err| IsolationError::Create {
        root: options.root.clone(),
        reason: format!("{err:#}"),
    })?;

    let copied = copy_tree(&module_dir, dir.path(), options.filter)?;
    for overlay in &options.overlays {
        apply_overlay(&module_dir, overlay, dir.path())?;
    }

    let workspace = Workspace {
        dir,
        created_from: source.clone(),
        created_at: OffsetDateTime::now_utc(),
    };
    info!(
        module = %source,
        workspace = %workspace.path().display(),
        files = copied,
        overlays = options.overlays.len(),
        "materialized workspace"
    );
    if let Ok(entries) = workspace.root_entries() {
        debug!(workspace = %workspace.path().display(), entries = ?entries, "workspace contents");
    }
    Ok(workspace)
}

fn copy_tree(module_dir: &Path, dest: &Path, filter: CopyFilter) -> Result<usize, IsolationError> {
    let walker = WalkDir::new(module_dir)
        .min_depth(1)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            entry
                .path()
                .strip_prefix(module_dir)
                .map_or(true, |rel| filter.admits(rel, entry.file_type().is_dir()))
        });

    let mut copied = 0;
    for entry in walker {
        let entry = entry?;
        let Ok(rel) = entry.path().strip_prefix(module_dir) else {
            continue;
        };
        let target = dest.join(rel);
        let file_type = entry.file_type();
        if file_type.is_dir() {
            fs::create_dir_all(&target).map_err(|source| IsolationError::CreateDir {
                path: target.clone(),
                source,
            })?;
        } else if file_type.is_symlink() {
            copy_symlink(entry.path(), &target)?;
            copied += 1;
        } else {
            let copied_file = if rewritten_by_tool(rel) {
                copy_file_unshared(entry.path(), &target)
            } else {
                copy_file(entry.path(), &target)
            };
            copied_file.map_err(|source| IsolationError::Copy {
                from: entry.path().to_path_buf(),
                source,
            })?;
            copied += 1;
        }
    }
    Ok(copied)
}

#[cfg(unix)]
fn copy_symlink(src: &Path, dst: &Path) -> Result<(), IsolationError> {
    let copy_err = |source: io::Error| IsolationError::Copy {
        from: src.to_path_buf(),
        source: CopyError::Io {
            op: "link",
            path: dst.to_path_buf(),
            source,
        },
    };
    let target = fs::read_link(src).map_err(copy_err)?;
    std::os::unix::fs::symlink(&target, dst).map_err(copy_err)
}

#[cfg(not(unix))]
fn copy_symlink(src: &Path, dst: &Path) -> Result<(), IsolationError> {
    copy_file(src, dst)
        .map(|_| ())
        .map_err(|source| IsolationError::Copy {
            from: src.to_path_buf(),
            source,
        })
}

fn apply_overlay(module_dir: &Path, overlay: &Path, dest: &Path) -> Result<(), IsolationError> {
    let src = if overlay.is_absolute() {
        overlay.to_path_buf()
    } else {
        module_dir.join(overlay)
    };
    let name = overlay
        .file_name()
        .ok_or_else(|| IsolationError::InvalidOverlay {
            path: overlay.to_path_buf(),
        })?;
    let target = dest.join(name);
    debug!(from = %src.display(), to = %target.display(), "copying overlay");
    // The tree copy may have linked a same-named module file here.
    replace_file(&src, &target).map_err(|source| IsolationError::Copy { from: src, source })?;
    Ok(())
}
