//! File opens for the execution step that refuse a final-component symlink.

use std::fs::File;
use std::path::Path;

use rustix::fs::{Mode, OFlags};
use rustix::io::Errno;

use super::SecurityError;

fn map_errno(path: &Path, e: Errno) -> SecurityError {
    if e == Errno::LOOP {
        return SecurityError::ResolutionChanged {
            path: path.to_path_buf(),
        };
    }
    SecurityError::Io(std::io::Error::from_raw_os_error(e.raw_os_error()))
}

pub fn open_read(path: &Path) -> Result<File, SecurityError> {
    let fd = rustix::fs::open(
        path,
        OFlags::RDONLY | OFlags::NOFOLLOW | OFlags::CLOEXEC,
        Mode::empty(),
    )
    .map_err(|e| map_errno(path, e))?;
    Ok(File::from(fd))
}

/// Opens for writing, truncating. With `create_new` an existing file is an error.
pub fn open_write(path: &Path, create_new: bool) -> Result<File, SecurityError> {
    let mut flags =
        OFlags::WRONLY | OFlags::CREATE | OFlags::TRUNC | OFlags::NOFOLLOW | OFlags::CLOEXEC;
    if create_new {
        flags |= OFlags::EXCL;
    }
    let fd = rustix::fs::open(path, flags, Mode::from_raw_mode(0o644))
        .map_err(|e| map_errno(path, e))?;
    Ok(File::from(fd))
}

/// Removes a regular file. Symlinks and directories are refused.
pub fn remove_file(path: &Path) -> Result<(), SecurityError> {
    let meta = std::fs::symlink_metadata(path)?;
    if meta.file_type().is_symlink() {
        return Err(SecurityError::ResolutionChanged {
            path: path.to_path_buf(),
        });
    }
    if !meta.is_file() {
        return Err(SecurityError::InvalidPath(format!(
            "not a file: {}",
            path.display()
        )));
    }
    std::fs::remove_file(path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use tempfile::tempdir;

    #[test]
    fn test_write_then_read() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.txt");

        let mut file = open_write(&path, false).unwrap();
        file.write_all(b"hello").unwrap();
        drop(file);

        let mut content = String::new();
        open_read(&path).unwrap().read_to_string(&mut content).unwrap();
        assert_eq!(content, "hello");
    }

    #[test]
    fn test_create_new_refuses_existing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, "x").unwrap();

        let result = open_write(&path, true);
        assert!(matches!(result, Err(SecurityError::Io(_))));
    }

    #[test]
    fn test_symlink_not_followed() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("target.txt");
        let link = dir.path().join("link.txt");
        std::fs::write(&target, "original").unwrap();
        std::os::unix::fs::symlink(&target, &link).unwrap();

        assert!(matches!(
            open_write(&link, false),
            Err(SecurityError::ResolutionChanged { .. })
        ));
        assert!(matches!(
            remove_file(&link),
            Err(SecurityError::ResolutionChanged { .. })
        ));
        assert_eq!(std::fs::read_to_string(&target).unwrap(), "original");
    }

    #[test]
    fn test_remove_directory_refused() {
        let dir = tempdir().unwrap();
        let sub = dir.path().join("sub");
        std::fs::create_dir(&sub).unwrap();
        assert!(matches!(
            remove_file(&sub),
            Err(SecurityError::InvalidPath(_))
        ));
    }
}
