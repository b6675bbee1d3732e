//! Command-line front end for zipstream.
//!
//! Lists and extracts archives from local files or HTTP URLs, and creates
//! archives from local files with `-c`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use chrono::{DateTime, Local};
use tokio::io::AsyncWriteExt;

use zipstream::{
    Cli, EntryOptions, ExtractOptions, HttpRangeReader, LocalFileReader, LocalFileWriter, ReadAt,
    ReaderOptions, WriteSink, WriterOptions, ZipEntry, ZipReader, ZipWriter,
};

/// Application entry point.
///
/// Dispatches to archive creation, or to listing/extraction over a local
/// file or an HTTP URL.
#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse_args();

    if cli.create {
        return create_archive(&cli).await;
    }

    if cli.is_http_url() {
        // Handle remote ZIP file via HTTP Range requests
        let reader = Arc::new(HttpRangeReader::new(cli.file.as_str())?);
        process_zip(reader.clone(), &cli).await?;

        if !cli.is_quiet() {
            eprintln!(
                "\nTotal bytes transferred: {}",
                format_size(reader.transferred_bytes())
            );
        }
    } else {
        let reader = Arc::new(LocalFileReader::new(Path::new(&cli.file))?);
        process_zip(reader, &cli).await?;
    }

    Ok(())
}

/// Standard output as a byte sink, for `-p`
struct StdoutSink(tokio::io::Stdout);

#[async_trait]
impl WriteSink for StdoutSink {
    async fn write_bytes(&mut self, data: &[u8]) -> Result<()> {
        self.0.write_all(data).await?;
        Ok(())
    }

    async fn flush(&mut self) -> Result<()> {
        self.0.flush().await?;
        Ok(())
    }
}

/// List or extract the archive behind `reader`, depending on the CLI options.
async fn process_zip<R: ReadAt + 'static>(reader: Arc<R>, cli: &Cli) -> Result<()> {
    let options = ReaderOptions {
        password: cli.password.as_ref().map(|p| p.as_bytes().to_vec()),
        ..Default::default()
    };
    let mut archive = ZipReader::new(reader, options);
    archive.read_directory().await?;

    if cli.list || cli.verbose {
        list_files(&archive, cli.verbose);
        return Ok(());
    }

    // Directories are created on demand while extracting files
    let files_to_extract: Vec<&ZipEntry> = archive
        .entries()
        .iter()
        .filter(|e| !e.directory && is_selected(e, cli))
        .collect();

    let multiple_files = cli.pipe && files_to_extract.len() > 1;
    for entry in files_to_extract {
        extract_file(&archive, entry, cli, multiple_files)
            .await
            .with_context(|| format!("Failed to extract {}", entry.filename))?;
    }

    Ok(())
}

/// Positional names (exact, basename or glob) and `-x` exclusions.
fn is_selected(entry: &ZipEntry, cli: &Cli) -> bool {
    if !cli.files.is_empty() {
        let matches = cli.files.iter().any(|f| {
            if has_glob_chars(f) {
                glob_match(f, &entry.filename)
            } else {
                entry.filename == *f || base_name(&entry.filename) == *f
            }
        });
        if !matches {
            return false;
        }
    }

    !cli
        .exclude
        .iter()
        .any(|x| entry.filename.contains(x.as_str()) || glob_match(x, &entry.filename))
}

fn list_files<R: ReadAt + 'static>(archive: &ZipReader<R>, verbose: bool) {
    let entries = archive.entries();

    if !verbose {
        for entry in entries {
            println!("{}", entry.filename);
        }
        return;
    }

    if !archive.comment().is_empty() {
        println!("{}", archive.comment());
    }
    println!(
        "{:>10}  {:>10}  {:>5}  {:>10}  {:>5}  Name",
        "Length", "Size", "Cmpr", "Date", "Time"
    );
    println!("{}", "-".repeat(70));

    let mut total_uncompressed = 0u64;
    let mut total_compressed = 0u64;
    let mut file_count = 0usize;

    for entry in entries {
        let date = entry
            .last_modified
            .map(|t| t.format("%Y-%m-%d  %H:%M").to_string())
            .unwrap_or_else(|| "----------  --:--".to_string());
        println!(
            "{:>10}  {:>10}  {}  {}  {}{}",
            entry.uncompressed_size,
            entry.compressed_size,
            ratio(entry.compressed_size, entry.uncompressed_size),
            date,
            entry.filename,
            if entry.encrypted { " *" } else { "" }
        );

        if !entry.directory {
            total_uncompressed += entry.uncompressed_size;
            total_compressed += entry.compressed_size;
            file_count += 1;
        }
    }

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

/// Space saved, as a right-aligned percentage
fn ratio(compressed: u64, uncompressed: u64) -> String {
    if uncompressed > 0 && compressed <= uncompressed {
        format!("{:>4}%", 100 - (compressed * 100 / uncompressed))
    } else {
        "  0%".to_string()
    }
}

/// Extract a single file, honouring `-p`, `-d`, `-j`, `-n` and `-o`.
async fn extract_file<R: ReadAt + 'static>(
    archive: &ZipReader<R>,
    entry: &ZipEntry,
    cli: &Cli,
    show_filename: bool,
) -> Result<()> {
    if cli.pipe {
        let mut stdout = StdoutSink(tokio::io::stdout());
        if show_filename {
            stdout
                .write_bytes(format!("--- {} ---\n", entry.filename).as_bytes())
                .await?;
        }
        archive
            .extract(entry, &mut stdout, ExtractOptions::default())
            .await?;
        return Ok(());
    }

    let file_name = if cli.junk_paths {
        base_name(&entry.filename)
    } else {
        entry.filename.clone()
    };
    if Path::new(&file_name)
        .components()
        .any(|c| !matches!(c, std::path::Component::Normal(_)))
    {
        bail!("Refusing to extract outside the target directory: {}", entry.filename);
    }
    let output_path = match &cli.extract_dir {
        Some(dir) => PathBuf::from(dir).join(&file_name),
        None => PathBuf::from(&file_name),
    };

    if output_path.exists() {
        if cli.never_overwrite {
            if !cli.is_quiet() {
                eprintln!("Skipping: {} (file exists)", entry.filename);
            }
            return Ok(());
        }
        if !cli.overwrite {
            if !cli.is_quiet() {
                eprintln!("Skipping: {} (use -o to overwrite)", entry.filename);
            }
            return Ok(());
        }
    }

    if !cli.is_quiet() {
        println!("  extracting: {}", entry.filename);
    }
    archive
        .extract_to_file(entry, &output_path, ExtractOptions::default())
        .await?;

    Ok(())
}

/// One input of `-c`: where it lives on disk and the name it gets in the archive
struct Input {
    path: PathBuf,
    name: String,
    directory: bool,
}

/// Create `cli.file` from `cli.files`, recursing into directories.
async fn create_archive(cli: &Cli) -> Result<()> {
    if cli.is_http_url() {
        bail!("Cannot create an archive at a URL");
    }
    if cli.files.is_empty() {
        bail!("Nothing to add: give the files to put into {}", cli.file);
    }

    let mut inputs = Vec::new();
    for file in &cli.files {
        collect_inputs(Path::new(file), cli.junk_paths, &mut inputs)?;
    }

    let options = WriterOptions {
        password: cli.password.as_ref().map(|p| p.as_bytes().to_vec()),
        level: cli.level.unwrap_or(WriterOptions::default().level),
        encryption_strength: cli.aes.unwrap_or(3),
        zip_crypto: cli.zip_crypto,
        zip64: cli.zip64,
        ..Default::default()
    };
    let sink = LocalFileWriter::create(Path::new(&cli.file)).await?;
    let writer = ZipWriter::new(sink, options).await?;

    for input in inputs {
        let metadata = std::fs::metadata(&input.path)?;
        let entry_options = EntryOptions {
            last_modified: metadata
                .modified()
                .ok()
                .map(|t| DateTime::<Local>::from(t).naive_local()),
            ..Default::default()
        };
        let added = if input.directory {
            writer.add_directory(&input.name, entry_options).await?
        } else {
            let reader = LocalFileReader::new(&input.path)?;
            writer.add(&input.name, &reader, entry_options).await?
        };
        if !cli.is_quiet() {
            if added.directory {
                println!("  adding: {} (stored 0%)", added.name);
            } else {
                println!(
                    "  adding: {} ({} {})",
                    added.name,
                    if added.compressed_size < added.uncompressed_size {
                        "deflated"
                    } else {
                        "stored"
                    },
                    ratio(added.compressed_size, added.uncompressed_size).trim()
                );
            }
        }
    }

    writer.close(cli.comment.as_deref()).await?;
    Ok(())
}

fn collect_inputs(path: &Path, junk_paths: bool, inputs: &mut Vec<Input>) -> Result<()> {
    let name = if junk_paths {
        base_name(&path.to_string_lossy())
    } else {
        path.to_string_lossy().replace('\\', "/")
    };
    let name = name.trim_start_matches("./").trim_start_matches('/').to_string();

    if path.is_dir() {
        if !junk_paths && !name.is_empty() {
            inputs.push(Input {
                path: path.to_path_buf(),
                name,
                directory: true,
            });
        }
        let mut children: Vec<PathBuf> = std::fs::read_dir(path)?
            .map(|e| e.map(|e| e.path()))
            .collect::<std::io::Result<_>>()?;
        children.sort();
        for child in children {
            collect_inputs(&child, junk_paths, inputs)?;
        }
    } else {
        inputs.push(Input {
            path: path.to_path_buf(),
            name,
            directory: false,
        });
    }
    Ok(())
}

fn base_name(name: &str) -> String {
    Path::new(name)
        .file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| name.to_string())
}

/// Check if a pattern contains glob wildcard characters.
fn has_glob_chars(pattern: &str) -> bool {
    pattern.contains('*') || pattern.contains('?')
}

/// Glob matching with `*` (any run, including empty) and `?` (one character).
fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();

    // Iterative matcher that backtracks to the last `*`
    let (mut p, mut t) = (0, 0);
    let mut star: Option<(usize, usize)> = None;
    while t < text.len() {
        match pattern.get(p) {
            Some('*') => {
                star = Some((p, t));
                p += 1;
            }
            Some(&c) if c == '?' || c == text[t] => {
                p += 1;
                t += 1;
            }
            _ => match star {
                Some((sp, st)) => {
                    p = sp + 1;
                    t = st + 1;
                    star = Some((sp, st + 1));
                }
                None => return false,
            },
        }
    }
    pattern[p..].iter().all(|&c| c == '*')
}

/// Format a byte size into a human-readable string.
fn format_size(size: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if size >= GB {
        format!("{:.2} GB", size as f64 / GB as f64)
    } else if size >= MB {
        format!("{:.2} MB", size as f64 / MB as f64)
    } else if size >= KB {
        format!("{:.2} KB", size as f64 / KB as f64)
    } else {
        format!("{} bytes", size)
    }
}
