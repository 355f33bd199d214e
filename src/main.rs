//! Main entry point for the iscab CLI application.
//!
//! This binary lists and extracts the contents of installer cabinet
//! archives, one member at a time.

use anyhow::{Context, Result, bail};
use clap::Parser;
use std::path::{Path, PathBuf};
use tracing::error;
use tracing_subscriber::EnvFilter;

use iscab::cab::LINK_NEXT;
use iscab::{Catalog, Cli};

/// Application entry point.
///
/// Parses command-line arguments, opens the archive and dispatches to
/// listing or extraction.
fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli);

    let catalog = Catalog::open_with(&cli.file, cli.open_options()?)
        .with_context(|| format!("Failed to open {}", cli.file))?;

    if cli.is_listing() {
        if cli.components {
            list_components(&catalog);
        }
        if cli.file_groups {
            list_file_groups(&catalog);
        }
        if cli.list || cli.verbose {
            list_files(&catalog, &cli)?;
        }
        return Ok(());
    }

    extract_files(&catalog, &cli)
}

/// Install a stderr subscriber filtered by `RUST_LOG`, falling back to the
/// level implied by `-q`/`-D`.
fn init_logging(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cli.log_filter()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Member indices selected by the group, name patterns and exclusions.
///
/// Members without a valid name or data are skipped.
fn selected_files(catalog: &Catalog, cli: &Cli) -> Result<Vec<(usize, String)>> {
    let range = match &cli.group {
        Some(name) => match catalog.file_group_find(name) {
            Some(group) => group.files(),
            None => bail!("File group not found: {name}"),
        },
        None => 0..=catalog.file_count().saturating_sub(1),
    };

    let selected = range
        .filter(|&index| catalog.file_is_valid(index))
        .filter_map(|index| catalog.file_path(index).map(|path| (index, path)))
        .filter(|(_, path)| {
            // If specific files are requested, only include matching entries
            if !cli.files.is_empty() {
                let matches = cli.files.iter().any(|f| {
                    if has_glob_chars(f) {
                        glob_match(f, path)
                    } else {
                        path == f || base_name(path) == f
                    }
                });
                if !matches {
                    return false;
                }
            }

            // Exclude files matching the -x patterns
            !cli
                .exclude
                .iter()
                .any(|x| path.contains(x.as_str()) || glob_match(x, path))
        })
        .collect();

    Ok(selected)
}

fn list_components(catalog: &Catalog) {
    for component in catalog.components() {
        println!("{}", component.name);
        for group in &component.file_group_names {
            println!("  {group}");
        }
    }
    println!("-------\n{} components", catalog.component_count());
}

fn list_file_groups(catalog: &Catalog) {
    for group in catalog.file_groups() {
        println!("{} ({}-{})", group.name, group.first_file, group.last_file);
    }
    println!("-------\n{} file groups", catalog.file_group_count());
}

/// List files in the archive.
///
/// Supports two output formats:
/// - Simple format (`-l`): Just member paths, one per line
/// - Verbose format (`-v`): Sizes, flags and starting volume
fn list_files(catalog: &Catalog, cli: &Cli) -> Result<()> {
    let files = selected_files(catalog, cli)?;

    if cli.verbose {
        println!(
            "{:>10}  {:>10}  {:<5}  {:>3}  Name",
            "Length", "Stored", "Flags", "Vol"
        );
        println!("{}", "-".repeat(70));
    }

    let mut total_expanded = 0u64;
    let mut total_stored = 0u64;

    for (index, path) in &files {
        if cli.verbose {
            let fd = catalog.file_descriptor(*index)?;
            let flags: String = [
                (fd.is_compressed(), 'c'),
                (fd.is_obfuscated(), 'o'),
                (fd.is_split(), 's'),
                (fd.links_previous(), '<'),
                (fd.link_flags & LINK_NEXT != 0, '>'),
            ]
            .iter()
            .map(|&(set, c)| if set { c } else { '-' })
            .collect();

            println!(
                "{:>10}  {:>10}  {:<5}  {:>3}  {}",
                fd.expanded_size,
                fd.stored_size(),
                flags,
                fd.volume,
                path
            );
            total_expanded += fd.expanded_size as u64;
            total_stored += fd.stored_size() as u64;
        } else {
            println!("{path}");
        }
    }

    if cli.verbose {
        println!("{}", "-".repeat(70));
        println!(
            "{:>10}  {:>10}  {} files ({} stored)",
            total_expanded,
            total_stored,
            files.len(),
            format_size(total_stored)
        );
    }

    Ok(())
}

/// Extract (or test) every selected file.
///
/// A failing member is reported and skipped; the run fails at the end if
/// any member failed.
fn extract_files(catalog: &Catalog, cli: &Cli) -> Result<()> {
    let files = selected_files(catalog, cli)?;
    let mode = cli.extract_mode();
    let mut failures = 0usize;

    for (index, path) in &files {
        let result = if cli.test {
            if !cli.is_quiet() {
                println!("  testing: {path}");
            }
            catalog
                .extract_with(*index, &mut std::io::sink(), mode)
                .map(|_| ())
        } else {
            let output_path = output_path(cli, path);

            if output_path.exists() {
                if cli.never_overwrite || !cli.overwrite {
                    if !cli.is_quiet() {
                        let hint = if cli.never_overwrite { "file exists" } else { "use -o to overwrite" };
                        eprintln!("Skipping: {path} ({hint})");
                    }
                    continue;
                }
            }

            if !cli.is_quiet() {
                println!("  extracting: {path}");
            }
            catalog
                .extract_to_file(*index, &output_path, mode)
                .map(|_| ())
        };

        if let Err(e) = result {
            error!("{}: {}", path, e);
            if e.hints_legacy_format() && mode != iscab::ExtractMode::Legacy {
                error!("The archive may use the old compression, try -O");
            }
            failures += 1;
        }
    }

    if !cli.is_very_quiet() {
        println!(
            "{} {} files, {} failed",
            if cli.test { "Tested" } else { "Extracted" },
            files.len() - failures,
            failures
        );
    }

    if failures > 0 {
        bail!("{failures} of {} files failed", files.len());
    }
    Ok(())
}

/// Where a member is written, honouring `-d` and `-j`.
fn output_path(cli: &Cli, path: &str) -> PathBuf {
    let relative = if cli.junk_paths {
        base_name(path).to_string()
    } else {
        path.to_string()
    };

    match &cli.extract_dir {
        Some(dir) => PathBuf::from(dir).join(relative),
        None => PathBuf::from(relative),
    }
}

fn base_name(path: &str) -> &str {
    Path::new(path)
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or(path)
}

/// Check if a pattern contains glob wildcard characters.
fn has_glob_chars(pattern: &str) -> bool {
    pattern.contains('*') || pattern.contains('?')
}

/// Simple glob pattern matching supporting `*` and `?` wildcards.
///
/// - `*` matches zero or more characters
/// - `?` matches exactly one character
///
/// # Examples
///
/// ```ignore
/// assert!(glob_match("*.dll", "system/mfc42.dll"));
/// assert!(glob_match("setup?.ini", "setup1.ini"));
/// assert!(!glob_match("*.dll", "readme.txt"));
/// ```
fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern_chars: Vec<char> = pattern.chars().collect();
    let text_chars: Vec<char> = text.chars().collect();

    fn do_match(pattern: &[char], text: &[char]) -> bool {
        match (pattern.first(), text.first()) {
            (None, None) => true,
            // Star matches zero characters, or one and stays for more
            (Some('*'), _) => {
                do_match(&pattern[1..], text) || (!text.is_empty() && do_match(pattern, &text[1..]))
            }
            (Some('?'), Some(_)) => do_match(&pattern[1..], &text[1..]),
            (Some(p), Some(t)) if p.eq_ignore_ascii_case(t) => do_match(&pattern[1..], &text[1..]),
            _ => false,
        }
    }

    do_match(&pattern_chars, &text_chars)
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
