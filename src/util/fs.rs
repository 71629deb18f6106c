use std::ffi::OsString;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Returns the sibling in-progress path used while `path` is being written.
///
/// `outputs/curated.m3u` becomes `outputs/curated.m3u.part`.
pub fn part_path(path: &Path) -> PathBuf {
    let mut name: OsString = path.file_name().map(OsString::from).unwrap_or_default();
    name.push(".part");
    path.with_file_name(name)
}

/// Atomically writes a file using the write-to-temp-then-rename pattern.
///
/// Readers of `path` (a player polling the curated playlist, the next
/// pipeline stage) never observe a partially written file. Parent
/// directories are created as needed.
///
/// # Errors
///
/// Returns any I/O error from creating the directory, writing or syncing the
/// temporary file, or renaming it into place. The temporary file is removed
/// on failure.
pub fn atomic_write(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let temp_path = part_path(path);

    let result = (|| {
        let mut temp_file = std::fs::File::create(&temp_path)?;
        temp_file.write_all(contents)?;
        // Sync before rename so the data is on disk when the name flips
        temp_file.sync_all()?;
        drop(temp_file);

        // On Windows, rename fails if destination exists, so remove it first
        #[cfg(windows)]
        if path.exists() {
            std::fs::remove_file(path)?;
        }

        std::fs::rename(&temp_path, path)
    })();

    if result.is_err() {
        let _ = std::fs::remove_file(&temp_path);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_part_path_appends_suffix() {
        assert_eq!(
            part_path(Path::new("outputs/curated.m3u")),
            PathBuf::from("outputs/curated.m3u.part")
        );
    }

    #[test]
    fn test_atomic_write_creates_and_replaces() {
        let dir = std::env::temp_dir().join(format!("streamledger_fs_{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        let path = dir.join("nested").join("out.txt");

        atomic_write(&path, b"first").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"first");

        atomic_write(&path, b"second").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"second");
        assert!(!part_path(&path).exists());

        let _ = std::fs::remove_dir_all(&dir);
    }
}
