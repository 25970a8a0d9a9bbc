use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};
use tracing::{debug, trace};

/// How `copy_file` satisfied a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyMethod {
    /// `dst` already was `src`; nothing was touched.
    AlreadyPresent,
    /// `dst` is a hard link to `src`. Writes through one path show up in the other.
    Linked,
    /// Bytes were streamed into `dst` and synced to disk.
    Copied,
}

#[derive(Debug, thiserror::Error)]
pub enum CopyError {
    #[error("cannot stat source {path}: {source}")]
    SourceUnavailable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{path} is not a regular file ({kind})")]
    NotRegularFile { path: PathBuf, kind: &'static str },
    #[error("failed to {op} {path}: {source}")]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Copies a single regular file from `src` to `dst`.
///
/// A hard link is tried first; when that fails for any reason (other
/// filesystem, `dst` already present, unsupported) the contents are streamed
/// and `sync_all` runs before the handle is released. If `dst` already refers
/// to the same file as `src` the call does nothing.
///
/// # Errors
///
/// `SourceUnavailable` when `src` cannot be stat'ed, `NotRegularFile` when
/// either side exists but is not a regular file, `Io` when the content copy
/// fails part way.
pub fn copy_file(src: &Path, dst: &Path) -> Result<CopyMethod, CopyError> {
    let src_meta = source_metadata(src)?;

    match fs::metadata(dst) {
        Ok(dst_meta) => {
            if !dst_meta.is_file() {
                return Err(CopyError::NotRegularFile {
                    path: dst.to_path_buf(),
                    kind: describe_file_type(&dst_meta.file_type()),
                });
            }
            if is_same_file(src, &src_meta, dst, &dst_meta) {
                trace!(src = %src.display(), dst = %dst.display(), "copy skipped, same file");
                return Ok(CopyMethod::AlreadyPresent);
            }
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(source) => {
            return Err(CopyError::Io {
                op: "stat",
                path: dst.to_path_buf(),
                source,
            })
        }
    }

    match fs::hard_link(src, dst) {
        Ok(()) => return Ok(CopyMethod::Linked),
        Err(err) => {
            trace!(
                src = %src.display(),
                dst = %dst.display(),
                error = %err,
                "hard link failed; copying contents"
            );
        }
    }

    copy_contents(src, dst)?;
    Ok(CopyMethod::Copied)
}

/// Puts a copy of `src` at `dst` without writing through whatever `dst` was.
///
/// An existing file or symlink at `dst` is unlinked first, so a `dst` that
/// shares its inode with another path leaves that path untouched.
pub(crate) fn replace_file(src: &Path, dst: &Path) -> Result<CopyMethod, CopyError> {
    let src_meta = source_metadata(src)?;
    if refers_to_source(src, &src_meta, dst) {
        return Ok(CopyMethod::AlreadyPresent);
    }
    unlink_destination(dst)?;
    copy_file(src, dst)
}

/// Streams `src` into a fresh inode at `dst`, never hard-linking.
///
/// For files the provisioning tool rewrites in place.
pub(crate) fn copy_file_unshared(src: &Path, dst: &Path) -> Result<CopyMethod, CopyError> {
    let src_meta = source_metadata(src)?;
    if refers_to_source(src, &src_meta, dst) {
        return Ok(CopyMethod::AlreadyPresent);
    }
    unlink_destination(dst)?;
    copy_contents(src, dst)?;
    Ok(CopyMethod::Copied)
}

fn source_metadata(src: &Path) -> Result<fs::Metadata, CopyError> {
    let src_meta = fs::metadata(src).map_err(|source| CopyError::SourceUnavailable {
        path: src.to_path_buf(),
        source,
    })?;
    if !src_meta.is_file() {
        return Err(CopyError::NotRegularFile {
            path: src.to_path_buf(),
            kind: describe_file_type(&src_meta.file_type()),
        });
    }
    Ok(src_meta)
}

// Same path spelled differently; unlinking `dst` would delete the source.
fn refers_to_source(src: &Path, src_meta: &fs::Metadata, dst: &Path) -> bool {
    let Ok(dst_meta) = fs::metadata(dst) else {
        return false;
    };
    if !is_same_file(src, src_meta, dst, &dst_meta) {
        return false;
    }
    match (fs::canonicalize(src), fs::canonicalize(dst)) {
        (Ok(src), Ok(dst)) => src == dst,
        _ => false,
    }
}

fn unlink_destination(dst: &Path) -> Result<(), CopyError> {
    let meta = match fs::symlink_metadata(dst) {
        Ok(meta) => meta,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(source) => {
            return Err(CopyError::Io {
                op: "stat",
                path: dst.to_path_buf(),
                source,
            })
        }
    };
    if meta.is_dir() {
        return Err(CopyError::NotRegularFile {
            path: dst.to_path_buf(),
            kind: "directory",
        });
    }
    fs::remove_file(dst).map_err(|source| CopyError::Io {
        op: "remove",
        path: dst.to_path_buf(),
        source,
    })
}

// Both handles drop on every return path; `sync_all` precedes the drop of `output`.
fn copy_contents(src: &Path, dst: &Path) -> Result<(), CopyError> {
    fn io_err(op: &'static str, path: &Path) -> impl FnOnce(io::Error) -> CopyError {
        let path = path.to_path_buf();
        move |source| CopyError::Io { op, path, source }
    }
    let mut input = File::open(src).map_err(io_err("open", src))?;
    let mut output = File::create(dst).map_err(io_err("create", dst))?;
    io::copy(&mut input, &mut output).map_err(io_err("write", dst))?;
    output.sync_all().map_err(io_err("sync", dst))?;
    Ok(())
}

#[cfg(unix)]
fn is_same_file(_src: &Path, src_meta: &fs::Metadata, _dst: &Path, dst_meta: &fs::Metadata) -> bool {
    use std::os::unix::fs::MetadataExt;
    src_meta.dev() == dst_meta.dev() && src_meta.ino() == dst_meta.ino()
}

#[cfg(not(unix))]
fn is_same_file(src: &Path, _src_meta: &fs::Metadata, dst: &Path, _dst_meta: &fs::Metadata) -> bool {
    match (fs::canonicalize(src), fs::canonicalize(dst)) {
        (Ok(src), Ok(dst)) => src == dst,
        _ => false,
    }
}

fn describe_file_type(file_type: &fs::FileType) -> &'static str {
    if file_type.is_dir() {
        return "directory";
    }
    if file_type.is_symlink() {
        return "symlink";
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::FileTypeExt;
        if file_type.is_block_device() {
            return "block device";
        }
        if file_type.is_char_device() {
            return "character device";
        }
        if file_type.is_fifo() {
            return "fifo";
        }
        if file_type.is_socket() {
            return "socket";
        }
    }
    "special file"
}

/// Best-effort recursive chmod for directories a module or tool left read-only.
///
/// Files are left alone: their mode never blocks unlinking on unix, and they
/// may be hard links shared with the module source.
#[cfg(unix)]
pub(crate) fn make_writable_recursive(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    let Ok(meta) = fs::symlink_metadata(path) else {
        return;
    };
    if !meta.is_dir() {
        return;
    }
    let mode = meta.permissions().mode() | 0o700;
    let _ = fs::set_permissions(path, fs::Permissions::from_mode(mode));
    if let Ok(entries) = fs::read_dir(path) {
        for entry in entries.flatten() {
            make_writable_recursive(&entry.path());
        }
    }
}

#[cfg(not(unix))]
pub(crate) fn make_writable_recursive(path: &Path) {
    let Ok(meta) = fs::symlink_metadata(path) else {
        return;
    };
    if meta.file_type().is_symlink() {
        return;
    }
    let mut perms = meta.permissions();
    if perms.readonly() {
        perms.set_readonly(false);
        let _ = fs::set_permissions(path, perms);
    }
    if meta.is_dir() {
        if let Ok(entries) = fs::read_dir(path) {
            for entry in entries.flatten() {
                make_writable_recursive(&entry.path());
            }
        }
    }
}

pub(crate) fn remove_dir_all_writable(path: &Path) -> Result<()> {
    let meta = match fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(err) => return Err(err).with_context(|| format!("failed to stat {}", path.display())),
    };
    if meta.file_type().is_symlink() {
        fs::remove_file(path)
            .with_context(|| format!("failed to remove symlink {}", path.display()))?;
        return Ok(());
    }
    make_writable_recursive(path);
    fs::remove_dir_all(path).with_context(|| format!("failed to remove {}", path.display()))?;
    Ok(())
}

/// A uniquely named directory that is removed when released or dropped.
#[derive(Debug)]
pub(crate) struct ScratchDir {
    inner: Option<tempfile::TempDir>,
    path: PathBuf,
}

impl ScratchDir {
    pub(crate) fn new_in(root: &Path, prefix: &str) -> Result<Self> {
        fs::create_dir_all(root).with_context(|| format!("failed to create {}", root.display()))?;
        prune_stale_dirs(root, prefix, Duration::from_secs(24 * 60 * 60));
        let dir = tempfile::Builder::new()
            .prefix(prefix)
            .tempdir_in(root)
            .with_context(|| format!("failed to create temp dir under {}", root.display()))?;
        let path = dir.path().to_path_buf();
        Ok(Self {
            inner: Some(dir),
            path,
        })
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    /// Removes the directory now and reports failures instead of swallowing them.
    pub(crate) fn release(mut self) -> Result<()> {
        match self.inner.take() {
            Some(dir) => remove_dir_all_writable(&dir.keep()),
            None => Ok(()),
        }
    }

    /// Disarms removal and hands back the path.
    pub(crate) fn keep(mut self) -> PathBuf {
        if let Some(dir) = self.inner.take() {
            let _ = dir.keep();
        }
        self.path.clone()
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        let Some(dir) = self.inner.take() else {
            return;
        };
        let path = dir.keep();
        let _ = remove_dir_all_writable(&path);
    }
}

/// Removes `prefix*` directories under `root` older than `max_age`; these are
/// left behind by processes killed before their cleanup ran.
fn prune_stale_dirs(root: &Path, prefix: &str, max_age: Duration) {
    let Ok(entries) = fs::read_dir(root) else {
        return;
    };
    let now = SystemTime::now();
    for entry in entries.flatten() {
        let Ok(file_type) = entry.file_type() else {
            continue;
        };
        if !file_type.is_dir() {
            continue;
        }
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if !name.starts_with(prefix) {
            continue;
        }
        let Ok(meta) = entry.metadata() else {
            continue;
        };
        let Some(modified) = meta.modified().ok() else {
            continue;
        };
        let age = now.duration_since(modified).unwrap_or_default();
        if age < max_age {
            continue;
        }
        debug!(path = %entry.path().display(), "pruning stale workspace");
        let _ = remove_dir_all_writable(&entry.path());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read(path: &Path) -> Vec<u8> {
        fs::read(path).expect("read file")
    }

    #[test]
    fn copy_into_missing_destination_links_or_copies() {
        let temp = tempfile::tempdir().expect("tempdir");
        let src = temp.path().join("main.tf");
        let dst = temp.path().join("copy.tf");
        fs::write(&src, b"resource \"null_resource\" \"x\" {}\n").expect("write src");

        let method = copy_file(&src, &dst).expect("copy");
        assert_ne!(method, CopyMethod::AlreadyPresent);
        assert_eq!(read(&dst), read(&src));
    }

    #[test]
    fn copy_onto_itself_is_a_no_op() {
        let temp = tempfile::tempdir().expect("tempdir");
        let src = temp.path().join("vars.tfvars");
        fs::write(&src, b"name = \"x\"\n").expect("write src");

        let method = copy_file(&src, &src).expect("self copy");
        assert_eq!(method, CopyMethod::AlreadyPresent);
        assert_eq!(read(&src), b"name = \"x\"\n");
    }

    #[cfg(unix)]
    #[test]
    fn copy_onto_existing_hard_link_is_a_no_op() {
        let temp = tempfile::tempdir().expect("tempdir");
        let src = temp.path().join("a");
        let dst = temp.path().join("b");
        fs::write(&src, b"shared").expect("write src");
        fs::hard_link(&src, &dst).expect("link");

        let method = copy_file(&src, &dst).expect("copy");
        assert_eq!(method, CopyMethod::AlreadyPresent);
        assert_eq!(read(&dst), b"shared");
    }

    #[test]
    fn existing_distinct_destination_is_overwritten_with_source_bytes() {
        let temp = tempfile::tempdir().expect("tempdir");
        let src = temp.path().join("src");
        let dst = temp.path().join("dst");
        fs::write(&src, b"fresh contents").expect("write src");
        fs::write(&dst, b"stale contents that are longer").expect("write dst");

        let method = copy_file(&src, &dst).expect("copy");
        assert_eq!(method, CopyMethod::Copied);
        assert_eq!(read(&dst), b"fresh contents");
    }

    #[test]
    fn fallback_copy_is_readable_immediately() {
        let temp = tempfile::tempdir().expect("tempdir");
        let src = temp.path().join("src.bin");
        let dst = temp.path().join("dst.bin");
        let payload: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        fs::write(&src, &payload).expect("write src");
        fs::write(&dst, b"").expect("pre-create dst so the link path fails");

        assert_eq!(copy_file(&src, &dst).expect("copy"), CopyMethod::Copied);
        assert_eq!(read(&dst), payload);
    }

    #[test]
    fn directory_source_is_rejected_without_touching_destination() {
        let temp = tempfile::tempdir().expect("tempdir");
        let src = temp.path().join("module");
        fs::create_dir(&src).expect("mkdir");
        let dst = temp.path().join("out");

        let err = copy_file(&src, &dst).unwrap_err();
        assert!(matches!(err, CopyError::NotRegularFile { ref path, kind: "directory" } if path == &src));
        assert!(!dst.exists());
    }

    #[test]
    fn directory_destination_is_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        let src = temp.path().join("file");
        fs::write(&src, b"x").expect("write src");
        let dst = temp.path().join("dir");
        fs::create_dir(&dst).expect("mkdir");

        let err = copy_file(&src, &dst).unwrap_err();
        assert!(matches!(err, CopyError::NotRegularFile { ref path, .. } if path == &dst));
    }

    #[test]
    fn missing_source_is_unavailable() {
        let temp = tempfile::tempdir().expect("tempdir");
        let err = copy_file(&temp.path().join("nope"), &temp.path().join("dst")).unwrap_err();
        assert!(matches!(err, CopyError::SourceUnavailable { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn replace_file_leaves_other_links_to_destination_alone() {
        let temp = tempfile::tempdir().expect("tempdir");
        let canonical = temp.path().join("module-dev.tfvars");
        let dst = temp.path().join("workspace-dev.tfvars");
        let overlay = temp.path().join("ci-dev.tfvars");
        fs::write(&canonical, b"cidr = \"canonical\"\n").expect("write canonical");
        fs::write(&overlay, b"cidr = \"from-test\"\n").expect("write overlay");
        fs::hard_link(&canonical, &dst).expect("link");

        replace_file(&overlay, &dst).expect("replace");
        assert_eq!(read(&dst), b"cidr = \"from-test\"\n");
        assert_eq!(read(&canonical), b"cidr = \"canonical\"\n");
    }

    #[test]
    fn replace_file_onto_itself_keeps_the_source() {
        let temp = tempfile::tempdir().expect("tempdir");
        let src = temp.path().join("vars.tfvars");
        fs::write(&src, b"x").expect("write src");
        let spelled = temp.path().join(".").join("vars.tfvars");

        assert_eq!(replace_file(&src, &spelled).expect("replace"), CopyMethod::AlreadyPresent);
        assert_eq!(read(&src), b"x");
    }

    #[cfg(unix)]
    #[test]
    fn unshared_copy_gets_its_own_inode() {
        use std::os::unix::fs::MetadataExt;

        let temp = tempfile::tempdir().expect("tempdir");
        let src = temp.path().join("terraform.tfstate");
        let dst = temp.path().join("copy.tfstate");
        fs::write(&src, b"{}\n").expect("write src");

        assert_eq!(copy_file_unshared(&src, &dst).expect("copy"), CopyMethod::Copied);
        fs::write(&dst, b"{\"serial\":2}").expect("rewrite in place");
        assert_eq!(read(&src), b"{}\n");
        let inode = |path: &Path| fs::metadata(path).expect("meta").ino();
        assert_ne!(inode(&src), inode(&dst));
    }

    #[test]
    fn scratch_dir_release_removes_read_only_children() {
        let root = tempfile::tempdir().expect("root tempdir");
        let dir = ScratchDir::new_in(root.path(), "infratest-test-").expect("scratch dir");
        let path = dir.path().to_path_buf();
        let nested = path.join("nested");
        fs::create_dir_all(&nested).expect("nested dir");
        fs::write(nested.join("file.txt"), b"hello").expect("write file");
        let mut perms = fs::metadata(&nested).expect("meta").permissions();
        perms.set_readonly(true);
        fs::set_permissions(&nested, perms).expect("harden perms");

        dir.release().expect("release");
        assert!(!path.exists(), "scratch dir should be gone after release");
    }

    #[test]
    fn scratch_dir_drop_removes_directory() {
        let root = tempfile::tempdir().expect("root tempdir");
        let dir = ScratchDir::new_in(root.path(), "infratest-test-").expect("scratch dir");
        let path = dir.path().to_path_buf();
        fs::write(path.join("main.tf"), b"").expect("write");
        drop(dir);
        assert!(!path.exists());
    }

    #[test]
    fn prune_keeps_fresh_directories() {
        let root = tempfile::tempdir().expect("root tempdir");
        let fresh = root.path().join("infratest-fresh");
        let other = root.path().join("unrelated");
        fs::create_dir_all(&fresh).expect("mkdir");
        fs::create_dir_all(&other).expect("mkdir");

        prune_stale_dirs(root.path(), "infratest-", Duration::from_secs(3600));
        assert!(fresh.exists());

        prune_stale_dirs(root.path(), "infratest-", Duration::ZERO);
        assert!(!fresh.exists());
        assert!(other.exists(), "only prefixed dirs are pruned");
    }
}
