//! Main entry point for the rezip CLI application.
//!
//! Lists and extracts local or remote ZIP archives, and adds or removes
//! entries of local archives in place.

use anyhow::{Context, Result, bail};
use clap::Parser;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

use rezip::cli::{Command, ExtractArgs, is_http_url};
use rezip::{
    AccessMode, AddOptions, Archive, CompressionMethod, Entry, EntryType, ExtractOptions,
    FileSystem, StdFileSystem,
};

/// Application entry point.
fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = rezip::Cli::parse();

    match cli.command {
        Command::List { archive, verbose } => {
            let archive = open_for_reading(&archive)?;
            list_files(&archive, verbose)
        }
        Command::Extract(args) => {
            let archive = open_for_reading(&args.archive)?;
            extract_files(&archive, &args)
        }
        Command::Add {
            archive,
            paths,
            store,
            base,
        } => add_files(&archive, &paths, &base, store),
        Command::Remove { archive, names } => remove_files(&archive, &names),
        Command::Create { archive } => {
            Archive::create(&archive)
                .with_context(|| format!("cannot create {}", archive.display()))?;
            Ok(())
        }
    }
}

/// Open a local path or an HTTP URL read-only.
fn open_for_reading(location: &str) -> Result<Archive> {
    let archive = if is_http_url(location) {
        Archive::open_remote(location)
    } else {
        Archive::open(location, AccessMode::Read)
    };
    archive.with_context(|| format!("cannot open {location}"))
}

/// List files in the ZIP archive.
///
/// Supports two output formats:
/// - Simple format: Just entry names, one per line
/// - Verbose format (`-v`): Detailed table with size, compression ratio, and timestamps
fn list_files(archive: &Archive, verbose: bool) -> Result<()> {
    if verbose {
        println!(
            "{:>10}  {:>10}  {:>5}  {:>10}  {:>5}  Name",
            "Length", "Size", "Cmpr", "Date", "Time"
        );
        println!("{}", "-".repeat(70));
    }

    let mut total_uncompressed = 0u64;
    let mut total_compressed = 0u64;
    let mut file_count = 0usize;

    for entry in archive.entries() {
        if !verbose {
            println!("{}", entry.path());
            continue;
        }

        let modified = entry.modified();
        println!(
            "{:>10}  {:>10}  {}  {}  {}  {}",
            entry.uncompressed_size(),
            entry.compressed_size(),
            ratio(entry.compressed_size(), entry.uncompressed_size()),
            modified.format("%Y-%m-%d"),
            modified.format("%H:%M"),
            entry.path()
        );

        if entry.entry_type() != EntryType::Directory {
            total_uncompressed += entry.uncompressed_size();
            total_compressed += entry.compressed_size();
            file_count += 1;
        }
    }

    if verbose {
        println!("{}", "-".repeat(70));
        println!(
            "{:>10}  {:>10}  {}  {:>17}  {} files",
            total_uncompressed,
            total_compressed,
            ratio(total_compressed, total_uncompressed),
            "",
            file_count
        );
    }

    Ok(())
}

/// Compression ratio as percentage saved.
fn ratio(compressed: u64, uncompressed: u64) -> String {
    if uncompressed > 0 && compressed <= uncompressed {
        format!("{:>4}%", 100 - (compressed * 100 / uncompressed))
    } else {
        "  0%".to_string()
    }
}

/// Extract the entries selected by the positional filters and `-x` patterns.
fn extract_files(archive: &Archive, args: &ExtractArgs) -> Result<()> {
    let entries = archive.sorted_entries()?;

    let selected: Vec<&Entry> = entries
        .iter()
        .filter(|e| {
            if !args.files.is_empty() {
                let matches = args.files.iter().any(|f| {
                    if has_glob_chars(f) {
                        glob_match(f, e.path())
                    } else {
                        let basename = Path::new(e.path())
                            .file_name()
                            .map(|s| s.to_string_lossy())
                            .unwrap_or_default();
                        e.path() == f || e.path().trim_end_matches('/') == f || basename == *f
                    }
                });
                if !matches {
                    return false;
                }
            }

            !args
                .exclude
                .iter()
                .any(|x| e.path().contains(x.as_str()) || glob_match(x, e.path()))
        })
        .collect();

    let options = ExtractOptions::default().verify_checksum(args.verify);

    if args.pipe {
        let mut stdout = std::io::stdout().lock();
        let show_names = selected.iter().filter(|e| !e.is_directory()).count() > 1;
        for entry in selected.into_iter().filter(|e| !e.is_directory()) {
            if show_names {
                writeln!(stdout, "--- {} ---", entry.path())?;
            }
            archive.extract(entry, &options, |chunk| Ok(stdout.write_all(chunk)?))?;
        }
        stdout.flush()?;
        return Ok(());
    }

    let destination = args.extract_dir.clone().unwrap_or_default();
    let fs = StdFileSystem;
    for entry in selected {
        extract_entry(archive, entry, &destination, &fs, args, &options)?;
    }

    Ok(())
}

/// Extract one entry, honouring the overwrite options.
fn extract_entry(
    archive: &Archive,
    entry: &Entry,
    destination: &Path,
    fs: &StdFileSystem,
    args: &ExtractArgs,
    options: &ExtractOptions,
) -> Result<()> {
    let output_path = destination.join(rezip::zip::entry_relative_path(entry.path())?);

    if entry.entry_type() != EntryType::Directory && fs.exists(&output_path) {
        if args.never_overwrite {
            if !args.is_very_quiet() {
                eprintln!("Skipping: {} (file exists)", entry.path());
            }
            return Ok(());
        }

        if !args.overwrite {
            if !args.is_very_quiet() {
                eprintln!("Skipping: {} (use -o to overwrite)", entry.path());
            }
            return Ok(());
        }

        fs.remove_file(&output_path)
            .with_context(|| format!("cannot replace {}", output_path.display()))?;
    }

    if !args.is_quiet() {
        let action = match entry.entry_type() {
            EntryType::Directory => "   creating",
            EntryType::Symlink => "    linking",
            EntryType::File if entry.is_compressed() => "  inflating",
            EntryType::File => " extracting",
        };
        println!("{}: {}", action, entry.path());
    }

    archive
        .extract_to(entry, destination, fs, options)
        .with_context(|| format!("cannot extract {}", entry.path()))?;
    Ok(())
}

/// Add paths below `base`, creating the archive when it does not exist.
fn add_files(location: &Path, paths: &[PathBuf], base: &Path, store: bool) -> Result<()> {
    let mut archive = if location.exists() {
        Archive::open(location, AccessMode::Update)
    } else {
        Archive::create(location)
    }
    .with_context(|| format!("cannot open {}", location.display()))?;

    let method = if store {
        CompressionMethod::Stored
    } else {
        CompressionMethod::Deflate
    };
    let options = AddOptions::default().compression_method(method);
    let fs = StdFileSystem;

    for path in paths {
        if path.is_absolute() {
            bail!("{} must be relative to {}", path.display(), base.display());
        }
        let added = archive
            .add_tree(path, base, &fs, &options)
            .with_context(|| format!("cannot add {}", path.display()))?;
        println!("  adding: {} ({} entries)", path.display(), added);
    }

    Ok(())
}

/// Remove entries by exact name. Directory names may omit the trailing `/`.
fn remove_files(location: &Path, names: &[String]) -> Result<()> {
    let mut archive = Archive::open(location, AccessMode::Update)
        .with_context(|| format!("cannot open {}", location.display()))?;

    for name in names {
        let entry = archive
            .get(name)
            .or_else(|| archive.get(&format!("{name}/")));
        let Some(entry) = entry else {
            bail!("{name}: not found in {}", location.display());
        };
        archive.remove(&entry, None)?;
        println!("deleting: {}", entry.path());
    }

    Ok(())
}

/// Check if a pattern contains glob wildcard characters.
fn has_glob_chars(pattern: &str) -> bool {
    pattern.contains('*') || pattern.contains('?')
}

/// Simple glob pattern matching supporting `*` and `?` wildcards.
///
/// - `*` matches zero or more characters
/// - `?` matches exactly one character
fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern_chars: Vec<char> = pattern.chars().collect();
    let text_chars: Vec<char> = text.chars().collect();

    fn do_match(pattern: &[char], text: &[char]) -> bool {
        match (pattern.first(), text.first()) {
            (None, None) => true,
            // Star matches zero characters, or one more character
            (Some('*'), _) => {
                do_match(&pattern[1..], text) || (!text.is_empty() && do_match(pattern, &text[1..]))
            }
            (Some('?'), Some(_)) => do_match(&pattern[1..], &text[1..]),
            (Some(p), Some(t)) if *p == *t => do_match(&pattern[1..], &text[1..]),
            _ => false,
        }
    }

    do_match(&pattern_chars, &text_chars)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn glob_patterns() {
        assert!(glob_match("*.txt", "readme.txt"));
        assert!(glob_match("file?.dat", "file1.dat"));
        assert!(glob_match("docs/*", "docs/a/b.md"));
        assert!(!glob_match("*.txt", "readme.md"));
    }

    #[test]
    fn ratios() {
        assert_eq!(ratio(25, 100), "  75%");
        assert_eq!(ratio(0, 0), "  0%");
        assert_eq!(ratio(120, 100), "  0%");
    }
}
