use std::ffi::OsString;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "zipstream")]
#[command(version)]
#[command(about = "Streaming zip/unzip with encryption, Zip64 and HTTP URL support", long_about = None)]
#[command(after_help = "Examples:\n  \
  zipstream data1.zip -x joe             extract all files except joe from data1.zip\n  \
  zipstream -p foo.zip | more            send contents of foo.zip via pipe into more\n  \
  zipstream -l https://example.com/a.zip list files from remote ZIP\n  \
  zipstream -c -9 -P pw out.zip src/     create out.zip from src/ with AES-256")]
pub struct Cli {
    /// ZIP file path or HTTP URL (the archive to write with -c)
    #[arg(value_name = "FILE")]
    pub file: String,

    /// Files to extract (default: all), or inputs to add with -c
    #[arg(value_name = "FILES")]
    pub files: Vec<String>,

    /// List files (short format)
    #[arg(short = 'l')]
    pub list: bool,

    /// List verbosely/show version info
    #[arg(short = 'v')]
    pub verbose: bool,

    /// Extract files to pipe, no messages
    #[arg(short = 'p')]
    pub pipe: bool,

    /// Extract files into exdir
    #[arg(short = 'd', value_name = "DIR")]
    pub extract_dir: Option<String>,

    /// Exclude files that follow
    #[arg(short = 'x', value_name = "FILE", num_args = 1..)]
    pub exclude: Vec<String>,

    /// Never overwrite existing files
    #[arg(short = 'n')]
    pub never_overwrite: bool,

    /// Overwrite files WITHOUT prompting
    #[arg(short = 'o')]
    pub overwrite: bool,

    /// Junk paths (do not make directories / do not record directories)
    #[arg(short = 'j')]
    pub junk_paths: bool,

    /// Quiet mode (-qq => quieter)
    #[arg(short = 'q', action = clap::ArgAction::Count)]
    pub quiet: u8,

    /// Password for encrypted entries
    #[arg(short = 'P', value_name = "PASSWORD")]
    pub password: Option<String>,

    /// Create FILE from the FILES that follow
    #[arg(short = 'c')]
    pub create: bool,

    /// Compression level, also given as -0 (store) .. -9 (best)
    #[arg(long, value_name = "N", value_parser = clap::value_parser!(u32).range(0..=9))]
    pub level: Option<u32>,

    /// Encrypt with traditional PKWARE encryption instead of AES
    #[arg(long)]
    pub zip_crypto: bool,

    /// AES key strength: 1 (128-bit), 2 (192-bit) or 3 (256-bit)
    #[arg(long, value_name = "1|2|3", value_parser = clap::value_parser!(u8).range(1..=3))]
    pub aes: Option<u8>,

    /// Always write Zip64 records
    #[arg(long)]
    pub zip64: bool,

    /// Archive comment
    #[arg(long, value_name = "TEXT")]
    pub comment: Option<String>,
}

impl Cli {
    /// Parse the process arguments, accepting zip-style `-0` .. `-9`.
    pub fn parse_args() -> Self {
        Self::parse_from(normalize_args(std::env::args_os()))
    }

    pub fn is_http_url(&self) -> bool {
        self.file.starts_with("http://") || self.file.starts_with("https://")
    }

    pub fn is_quiet(&self) -> bool {
        self.quiet > 0 || self.pipe
    }

    pub fn is_very_quiet(&self) -> bool {
        self.quiet > 1
    }
}

/// Rewrites `-N` into `--level=N`.
fn normalize_args(args: impl IntoIterator<Item = OsString>) -> Vec<OsString> {
    args.into_iter()
        .map(|arg| match arg.to_str() {
            Some(s) if s.len() == 2 && s.starts_with('-') && s.as_bytes()[1].is_ascii_digit() => {
                OsString::from(format!("--level={}", &s[1..]))
            }
            _ => arg,
        })
        .collect()
}
