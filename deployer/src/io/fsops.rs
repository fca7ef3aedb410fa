//! Filesystem primitives used by probes and building blocks.
//!
//! Edits of files other software also touches go through [`edit_locked`],
//! which holds an exclusive OS lock (`fs2`) for the whole read-modify-write.

use std::fs::{self, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use thiserror::Error;
use tracing::debug;

/// Write `contents` to `path`, creating missing parent directories.
///
/// Returns the directories that had to be created, outermost first, so a
/// caller can remove exactly those again.
pub fn write_file_creating_dirs(path: &Path, contents: &[u8]) -> io::Result<Vec<PathBuf>> {
    let mut missing = Vec::new();
    let mut cursor = path.parent();
    while let Some(dir) = cursor {
        if dir.as_os_str().is_empty() || dir.exists() {
            break;
        }
        missing.push(dir.to_path_buf());
        cursor = dir.parent();
    }
    missing.reverse();
    for (created, dir) in missing.iter().enumerate() {
        if let Err(err) = fs::create_dir(dir) {
            remove_empty_dirs(&missing[..created]);
            return Err(err);
        }
    }
    if let Err(err) = fs::write(path, contents) {
        remove_empty_dirs(&missing);
        return Err(err);
    }
    Ok(missing)
}

/// Remove `path` if present. Returns whether a file was removed.
pub fn remove_file_if_exists(path: &Path) -> io::Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err),
    }
}

/// Remove directories innermost first, stopping silently at the first one
/// that is not empty.
pub fn remove_empty_dirs(dirs: &[PathBuf]) {
    for dir in dirs.iter().rev() {
        if let Err(err) = fs::remove_dir(dir) {
            debug!(dir = %dir.display(), err = %err, "leaving directory in place");
            break;
        }
    }
}

/// Read a file, treating a missing file as `None`.
pub fn read_optional(path: &Path) -> io::Result<Option<Vec<u8>>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err),
    }
}

/// What [`edit_locked`] did to the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EditOutcome {
    /// The file existed before the edit.
    pub existed: bool,
    /// New contents were written.
    pub changed: bool,
    /// The file is empty after the edit.
    pub now_empty: bool,
}

#[derive(Debug, Error)]
pub enum EditError {
    #[error(transparent)]
    Io(#[from] io::Error),
    /// The edit function refused the current contents.
    #[error("{0}")]
    Rejected(String),
}

/// Read-modify-write `path` under an exclusive lock.
///
/// `edit` receives the current text and returns the replacement, or `None`
/// to leave the file untouched. A missing file is treated as empty when
/// `create` is set; otherwise the edit is skipped. A file created only to be
/// left untouched is removed again.
pub fn edit_locked<F>(path: &Path, create: bool, edit: F) -> Result<EditOutcome, EditError>
where
    F: FnOnce(&str) -> Result<Option<String>, String>,
{
    let existed = path.exists();
    if !existed && !create {
        return Ok(EditOutcome {
            existed,
            changed: false,
            now_empty: false,
        });
    }

    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(create)
        .truncate(false)
        .open(path)?;
    file.lock_exclusive()?;

    let result = apply_edit(&mut file, edit);
    let unlock = FileExt::unlock(&file);
    let (changed, now_empty) = match result {
        Ok(pair) => pair,
        Err(err) => {
            drop(file);
            if !existed {
                remove_file_if_exists(path)?;
            }
            return Err(err);
        }
    };
    unlock?;
    drop(file);

    if !existed && !changed {
        remove_file_if_exists(path)?;
    }
    debug!(path = %path.display(), existed, changed, "locked edit finished");
    Ok(EditOutcome {
        existed,
        changed,
        now_empty,
    })
}

fn apply_edit<F>(file: &mut fs::File, edit: F) -> Result<(bool, bool), EditError>
where
    F: FnOnce(&str) -> Result<Option<String>, String>,
{
    let mut current = String::new();
    file.read_to_string(&mut current)?;
    match edit(&current).map_err(EditError::Rejected)? {
        Some(next) => {
            file.set_len(0)?;
            file.seek(SeekFrom::Start(0))?;
            file.write_all(next.as_bytes())?;
            file.sync_all()?;
            Ok((true, next.is_empty()))
        }
        None => Ok((false, current.is_empty())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_reports_created_dirs_for_exact_removal() {
        let temp = tempfile::tempdir().expect("tempdir");
        let target = temp.path().join(".well-known").join("nested").join("ai.json");
        let created = write_file_creating_dirs(&target, b"{}").expect("write");
        assert_eq!(
            created,
            vec![
                temp.path().join(".well-known"),
                temp.path().join(".well-known").join("nested")
            ]
        );

        assert!(remove_file_if_exists(&target).expect("remove"));
        remove_empty_dirs(&created);
        assert!(!temp.path().join(".well-known").exists());
        assert!(!remove_file_if_exists(&target).expect("remove again"));
    }

    #[test]
    fn remove_empty_dirs_keeps_foreign_content() {
        let temp = tempfile::tempdir().expect("tempdir");
        let dir = temp.path().join("a");
        fs::create_dir(&dir).expect("mkdir");
        fs::write(dir.join("other.txt"), "keep").expect("write");
        remove_empty_dirs(&[dir.clone()]);
        assert!(dir.join("other.txt").exists());
    }

    #[test]
    fn edit_locked_rewrites_in_place() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("robots.txt");
        fs::write(&path, "User-agent: *\n").expect("write");
        let outcome = edit_locked(&path, false, |text| Ok(Some(format!("{text}Allow: /\n"))))
            .expect("edit");
        assert!(outcome.existed && outcome.changed && !outcome.now_empty);
        assert_eq!(
            fs::read_to_string(&path).expect("read"),
            "User-agent: *\nAllow: /\n"
        );
    }

    #[test]
    fn edit_locked_skips_missing_file_without_create() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("absent.txt");
        let outcome = edit_locked(&path, false, |_| Ok(Some("x".to_string()))).expect("edit");
        assert!(!outcome.existed && !outcome.changed);
        assert!(!path.exists());
    }

    #[test]
    fn rejected_edit_leaves_no_new_file() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("new.txt");
        let err = edit_locked(&path, true, |_| Err("nope".to_string())).unwrap_err();
        assert!(matches!(err, EditError::Rejected(_)));
        assert!(!path.exists());
    }

    #[test]
    fn untouched_created_file_is_removed() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("new.txt");
        let outcome = edit_locked(&path, true, |_| Ok(None)).expect("edit");
        assert!(!outcome.changed);
        assert!(!path.exists());
    }
}
