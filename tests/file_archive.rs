mod common;

use common::{add_file, listing, sample_payload};
use std::fs;
use tempfile::tempdir;

use rezip::{
    AccessMode, AddOptions, Archive, ArchiveError, CompressionMethod, ExtractOptions, Location,
    StdFileSystem,
};

#[test]
fn create_add_reopen_remove() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("test.zip");
    let payload = sample_payload(70_000);

    {
        let mut archive = Archive::create(&path).unwrap();
        assert_eq!(archive.location(), &Location::File(path.clone()));
        add_file(&mut archive, "one.txt", b"first", CompressionMethod::Stored);
        add_file(&mut archive, "two.bin", &payload, CompressionMethod::Deflate);
    }

    let mut archive = Archive::open(&path, AccessMode::Update).unwrap();
    assert_eq!(archive.total_entries(), 2);
    let one = archive.get("one.txt").unwrap();
    archive.remove(&one, None).unwrap();

    // The archive is usable after the file was swapped underneath it.
    add_file(&mut archive, "three.txt", b"third", CompressionMethod::Deflate);
    drop(archive);

    let archive = Archive::open(&path, AccessMode::Read).unwrap();
    let names: Vec<String> = listing(&archive).into_iter().map(|(name, _)| name).collect();
    assert_eq!(names, ["two.bin", "three.txt"]);

    let entry = archive.get("two.bin").unwrap();
    assert_eq!(entry.header_offset(), 0);
    assert_eq!(archive.read(&entry).unwrap(), payload);

    // No temporary files are left next to the archive.
    let leftovers = fs::read_dir(dir.path()).unwrap().count();
    assert_eq!(leftovers, 1);
}

#[test]
fn create_refuses_existing_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("exists.zip");
    fs::write(&path, b"something").unwrap();

    let err = Archive::create(&path).unwrap_err();
    assert!(matches!(err, ArchiveError::Io(_)));
    assert_eq!(fs::read(&path).unwrap(), b"something");
}

#[test]
fn read_mode_rejects_mutation() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("ro.zip");
    {
        let mut archive = Archive::create(&path).unwrap();
        add_file(&mut archive, "a", b"a", CompressionMethod::Stored);
    }
    let before = fs::read(&path).unwrap();

    let mut archive = Archive::open(&path, AccessMode::Read).unwrap();
    assert!(archive.is_read_only());
    let entry = archive.get("a").unwrap();
    assert!(matches!(archive.remove(&entry, None), Err(ArchiveError::ReadOnly)));
    drop(archive);

    assert_eq!(fs::read(&path).unwrap(), before);
}

#[test]
fn cancelled_add_restores_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("cancel.zip");
    {
        let mut archive = Archive::create(&path).unwrap();
        add_file(&mut archive, "keep.txt", b"keep", CompressionMethod::Deflate);
    }
    let before = fs::read(&path).unwrap();

    let payload = sample_payload(200_000);
    let progress = rezip::Progress::new();
    let options = AddOptions::default().progress(progress.clone());
    let mut archive = Archive::open(&path, AccessMode::Update).unwrap();
    let err = archive
        .add_entry("big.bin", rezip::EntryType::File, payload.len() as u64, &options, |pos, buf| {
            if pos > 50_000 {
                progress.cancel();
            }
            let start = pos as usize;
            let len = buf.len().min(payload.len() - start);
            buf[..len].copy_from_slice(&payload[start..start + len]);
            Ok(len)
        })
        .unwrap_err();
    assert!(err.is_cancelled());
    drop(archive);

    assert_eq!(fs::read(&path).unwrap(), before);
}

#[test]
fn missing_file_fails_to_open() {
    let dir = tempdir().unwrap();
    let err = Archive::open(dir.path().join("missing.zip"), AccessMode::Read).unwrap_err();
    assert!(matches!(err, ArchiveError::Io(_)));
}

#[cfg(unix)]
#[test]
fn add_tree_and_extract_all_round_trip() {
    use std::os::unix::fs::{PermissionsExt, symlink};

    let source = tempdir().unwrap();
    let docs = source.path().join("docs");
    fs::create_dir_all(docs.join("sub")).unwrap();
    fs::write(docs.join("a.txt"), b"alpha").unwrap();
    fs::write(docs.join("sub/b.sh"), sample_payload(5_000)).unwrap();
    fs::set_permissions(docs.join("sub/b.sh"), fs::Permissions::from_mode(0o755)).unwrap();
    symlink("a.txt", docs.join("link")).unwrap();

    let mut archive = Archive::in_memory().unwrap();
    let added = archive
        .add_tree("docs".as_ref(), source.path(), &StdFileSystem, &AddOptions::default())
        .unwrap();
    assert_eq!(added, 5);

    let names: Vec<String> = listing(&archive).into_iter().map(|(name, _)| name).collect();
    assert_eq!(
        names,
        ["docs/", "docs/a.txt", "docs/link", "docs/sub/", "docs/sub/b.sh"]
    );
    assert_eq!(archive.get("docs/sub/b.sh").unwrap().permissions(), 0o755);
    assert!(archive.get("docs/link").unwrap().is_symlink());

    let target = tempdir().unwrap();
    let count = archive
        .extract_all(target.path(), &StdFileSystem, &ExtractOptions::default())
        .unwrap();
    assert_eq!(count, 5);

    let out = target.path().join("docs");
    assert_eq!(fs::read(out.join("a.txt")).unwrap(), b"alpha");
    assert_eq!(fs::read(out.join("sub/b.sh")).unwrap(), sample_payload(5_000));
    assert_eq!(
        fs::metadata(out.join("sub/b.sh")).unwrap().permissions().mode() & 0o777,
        0o755
    );
    assert_eq!(fs::read_link(out.join("link")).unwrap(), std::path::PathBuf::from("a.txt"));
    assert_eq!(fs::read(out.join("link")).unwrap(), b"alpha");
}
