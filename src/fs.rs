//! Filesystem capability used by extraction and insertion.
//!
//! The archive engine never touches `std::fs` for member data directly; it
//! goes through a [`FileSystem`] so callers (and tests) can substitute their
//! own implementation.

use chrono::{DateTime, Local, NaiveDateTime, TimeZone};
use std::fs;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::zip::EntryType;

pub trait FileSystem {
    fn exists(&self, path: &Path) -> bool;

    /// Create `path` and any missing parents.
    fn create_directory(&self, path: &Path) -> io::Result<()>;

    fn create_symlink(&self, path: &Path, target: &Path) -> io::Result<()>;

    /// Type of the item at `path`, without following a final symlink.
    fn entry_type(&self, path: &Path) -> io::Result<EntryType>;

    fn size(&self, path: &Path) -> io::Result<u64>;

    fn modified(&self, path: &Path) -> io::Result<NaiveDateTime>;

    fn set_modified(&self, path: &Path, modified: NaiveDateTime) -> io::Result<()>;

    /// Permission bits (`0o7777` mask).
    fn permissions(&self, path: &Path) -> io::Result<u16>;

    fn set_permissions(&self, path: &Path, permissions: u16) -> io::Result<()>;

    fn open_read(&self, path: &Path) -> io::Result<Box<dyn Read>>;

    /// Create or truncate a file for writing.
    fn open_write(&self, path: &Path) -> io::Result<Box<dyn Write>>;

    fn read_link(&self, path: &Path) -> io::Result<PathBuf>;

    fn remove_file(&self, path: &Path) -> io::Result<()>;

    /// Children of the directory at `path`, sorted by name.
    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>>;
}

/// [`FileSystem`] backed by `std::fs`.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdFileSystem;

impl FileSystem for StdFileSystem {
    fn exists(&self, path: &Path) -> bool {
        fs::symlink_metadata(path).is_ok()
    }

    fn create_directory(&self, path: &Path) -> io::Result<()> {
        fs::create_dir_all(path)
    }

    #[cfg(unix)]
    fn create_symlink(&self, path: &Path, target: &Path) -> io::Result<()> {
        std::os::unix::fs::symlink(target, path)
    }

    #[cfg(windows)]
    fn create_symlink(&self, path: &Path, target: &Path) -> io::Result<()> {
        std::os::windows::fs::symlink_file(target, path)
    }

    #[cfg(not(any(unix, windows)))]
    fn create_symlink(&self, _path: &Path, _target: &Path) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "symbolic links are not supported on this platform",
        ))
    }

    fn entry_type(&self, path: &Path) -> io::Result<EntryType> {
        let file_type = fs::symlink_metadata(path)?.file_type();
        Ok(if file_type.is_symlink() {
            EntryType::Symlink
        } else if file_type.is_dir() {
            EntryType::Directory
        } else {
            EntryType::File
        })
    }

    fn size(&self, path: &Path) -> io::Result<u64> {
        Ok(fs::symlink_metadata(path)?.len())
    }

    fn modified(&self, path: &Path) -> io::Result<NaiveDateTime> {
        let modified = fs::symlink_metadata(path)?.modified()?;
        Ok(DateTime::<Local>::from(modified).naive_local())
    }

    fn set_modified(&self, path: &Path, modified: NaiveDateTime) -> io::Result<()> {
        let Some(local) = Local.from_local_datetime(&modified).earliest() else {
            return Ok(());
        };
        let file = fs::OpenOptions::new().write(true).open(path)?;
        file.set_modified(SystemTime::from(local))
    }

    #[cfg(unix)]
    fn permissions(&self, path: &Path) -> io::Result<u16> {
        use std::os::unix::fs::PermissionsExt;
        Ok((fs::symlink_metadata(path)?.permissions().mode() & 0o7777) as u16)
    }

    #[cfg(not(unix))]
    fn permissions(&self, path: &Path) -> io::Result<u16> {
        let metadata = fs::symlink_metadata(path)?;
        let writable = if metadata.permissions().readonly() { 0 } else { 0o200 };
        let base = if metadata.is_dir() { 0o555 } else { 0o444 };
        Ok(base | writable)
    }

    #[cfg(unix)]
    fn set_permissions(&self, path: &Path, permissions: u16) -> io::Result<()> {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(permissions as u32))
    }

    #[cfg(not(unix))]
    fn set_permissions(&self, path: &Path, permissions: u16) -> io::Result<()> {
        let mut current = fs::metadata(path)?.permissions();
        current.set_readonly(permissions & 0o200 == 0);
        fs::set_permissions(path, current)
    }

    fn open_read(&self, path: &Path) -> io::Result<Box<dyn Read>> {
        Ok(Box::new(BufReader::new(fs::File::open(path)?)))
    }

    fn open_write(&self, path: &Path) -> io::Result<Box<dyn Write>> {
        Ok(Box::new(BufWriter::new(fs::File::create(path)?)))
    }

    fn read_link(&self, path: &Path) -> io::Result<PathBuf> {
        fs::read_link(path)
    }

    fn remove_file(&self, path: &Path) -> io::Result<()> {
        fs::remove_file(path)
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        let mut children = fs::read_dir(path)?
            .map(|entry| entry.map(|entry| entry.path()))
            .collect::<io::Result<Vec<_>>>()?;
        children.sort();
        Ok(children)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn std_file_system_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let fs = StdFileSystem;

        let nested = dir.path().join("a/b");
        fs.create_directory(&nested).unwrap();
        assert_eq!(fs.entry_type(&nested).unwrap(), EntryType::Directory);

        let file = nested.join("f.txt");
        {
            let mut writer = fs.open_write(&file).unwrap();
            writer.write_all(b"content").unwrap();
            writer.flush().unwrap();
        }
        assert_eq!(fs.size(&file).unwrap(), 7);
        assert_eq!(fs.entry_type(&file).unwrap(), EntryType::File);

        let mut read_back = String::new();
        fs.open_read(&file)
            .unwrap()
            .read_to_string(&mut read_back)
            .unwrap();
        assert_eq!(read_back, "content");

        assert_eq!(fs.read_dir(&nested).unwrap(), vec![file.clone()]);
        fs.remove_file(&file).unwrap();
        assert!(!fs.exists(&file));
    }

    #[cfg(unix)]
    #[test]
    fn symlinks_and_permissions() {
        let dir = tempfile::tempdir().unwrap();
        let fs = StdFileSystem;

        let file = dir.path().join("script.sh");
        fs.open_write(&file).unwrap().flush().unwrap();
        fs.set_permissions(&file, 0o750).unwrap();
        assert_eq!(fs.permissions(&file).unwrap(), 0o750);

        let link = dir.path().join("link");
        fs.create_symlink(&link, Path::new("script.sh")).unwrap();
        assert_eq!(fs.entry_type(&link).unwrap(), EntryType::Symlink);
        assert_eq!(fs.read_link(&link).unwrap(), PathBuf::from("script.sh"));
    }
}
