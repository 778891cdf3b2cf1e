use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "rezip")]
#[command(version)]
#[command(about = "Read, create and update ZIP archives in place", long_about = None)]
#[command(after_help = "Examples:\n  \
  rezip list -v data1.zip                      list data1.zip with sizes and dates\n  \
  rezip extract data1.zip -x joe               extract all files except joe\n  \
  rezip extract -p foo.zip | more              send contents of foo.zip via pipe into more\n  \
  rezip list https://example.com/archive.zip   list files from remote ZIP\n  \
  rezip add -C src archive.zip lib.rs docs     add lib.rs and the docs tree from src/")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List archive contents
    List {
        /// ZIP file path or HTTP URL
        #[arg(value_name = "ARCHIVE")]
        archive: String,

        /// List verbosely
        #[arg(short = 'v')]
        verbose: bool,
    },

    /// Extract entries
    Extract(ExtractArgs),

    /// Add files, directories and symlinks, creating the archive if needed
    Add {
        #[arg(value_name = "ARCHIVE")]
        archive: PathBuf,

        /// Paths to add, relative to the base directory
        #[arg(value_name = "PATHS", required = true)]
        paths: Vec<PathBuf>,

        /// Store files without compression
        #[arg(short = '0')]
        store: bool,

        /// Base directory the paths are relative to
        #[arg(short = 'C', value_name = "DIR", default_value = ".")]
        base: PathBuf,
    },

    /// Remove entries by name
    Remove {
        #[arg(value_name = "ARCHIVE")]
        archive: PathBuf,

        #[arg(value_name = "NAMES", required = true)]
        names: Vec<String>,
    },

    /// Create an empty archive
    Create {
        #[arg(value_name = "ARCHIVE")]
        archive: PathBuf,
    },
}

#[derive(clap::Args, Debug)]
pub struct ExtractArgs {
    /// ZIP file path or HTTP URL
    #[arg(value_name = "ARCHIVE")]
    pub archive: String,

    /// Files to extract (default: all)
    #[arg(value_name = "FILES")]
    pub files: Vec<String>,

    /// Extract files to pipe, no messages
    #[arg(short = 'p')]
    pub pipe: bool,

    /// Extract files into exdir
    #[arg(short = 'd', value_name = "DIR")]
    pub extract_dir: Option<PathBuf>,

    /// Exclude files that follow
    #[arg(short = 'x', value_name = "FILE", num_args = 1..)]
    pub exclude: Vec<String>,

    /// Never overwrite existing files
    #[arg(short = 'n')]
    pub never_overwrite: bool,

    /// Overwrite files WITHOUT prompting
    #[arg(short = 'o', conflicts_with = "never_overwrite")]
    pub overwrite: bool,

    /// Verify checksums while extracting
    #[arg(short = 't')]
    pub verify: bool,

    /// Quiet mode (-qq => quieter)
    #[arg(short = 'q', action = clap::ArgAction::Count)]
    pub quiet: u8,
}

impl ExtractArgs {
    pub fn is_quiet(&self) -> bool {
        self.quiet > 0 || self.pipe
    }

    pub fn is_very_quiet(&self) -> bool {
        self.quiet > 1
    }
}

pub fn is_http_url(location: &str) -> bool {
    location.starts_with("http://") || location.starts_with("https://")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_extract_flags() {
        let cli = Cli::parse_from([
            "rezip", "extract", "-d", "out", "-o", "-q", "a.zip", "one.txt", "-x", "skip",
        ]);
        let Command::Extract(args) = cli.command else {
            panic!("expected extract");
        };
        assert_eq!(args.archive, "a.zip");
        assert_eq!(args.files, vec!["one.txt"]);
        assert_eq!(args.exclude, vec!["skip"]);
        assert_eq!(args.extract_dir, Some(PathBuf::from("out")));
        assert!(args.overwrite && args.is_quiet() && !args.is_very_quiet());
    }

    #[test]
    fn add_requires_paths() {
        assert!(Cli::try_parse_from(["rezip", "add", "a.zip"]).is_err());
        let cli = Cli::parse_from(["rezip", "add", "-0", "-C", "src", "a.zip", "lib.rs"]);
        assert!(matches!(cli.command, Command::Add { store: true, .. }));
    }

    #[test]
    fn recognizes_urls() {
        assert!(is_http_url("https://example.com/a.zip"));
        assert!(!is_http_url("archive.zip"));
    }
}
