//! machscope - A hardened Mach-O inspector.
//!
//! Inspect the structure and security posture of Mach-O and fat binaries.

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use serde::Serialize;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use machscope::classify::{classify, BuiltinClassifier, ClassifierInput};
use machscope::macho::{load_command_name, CommandKind};
use machscope::reader::ByteSource;
use machscope::util::format_uuid;
use machscope::{Analysis, AnalysisOptions, Analyzer, FileReport, SignatureStatus};

/// A hardened Mach-O inspector and security-posture analyzer.
#[derive(Parser, Debug)]
#[command(name = "machscope")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Verbosity level (0=quiet, 1=warnings, 2=info, 3=debug)
    #[arg(short, long, global = true, default_value = "1")]
    verbosity: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Full security report for one or more binaries
    Analyze {
        /// Binaries to analyze
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,

        /// Analyze fat slices one at a time
        #[arg(long)]
        sequential: bool,

        /// Skip the unsafe API scan
        #[arg(long)]
        no_unsafe_apis: bool,

        /// Skip code signature checks
        #[arg(long)]
        no_signature: bool,

        /// Number of parallel jobs (default: number of CPUs)
        #[arg(short, long)]
        jobs: Option<usize>,
    },

    /// Show the Mach-O header of each architecture
    Header {
        /// Binary to inspect
        path: PathBuf,
    },

    /// List load commands
    Commands {
        /// Binary to inspect
        path: PathBuf,
    },

    /// List symbols
    Symbols {
        /// Only show undefined external symbols
        #[arg(short, long)]
        imports: bool,

        /// Filter symbols by substring match
        #[arg(short, long)]
        filter: Option<String>,

        /// Binary to inspect
        path: PathBuf,
    },

    /// List linked libraries and runtime search paths
    Dylibs {
        /// Binary to inspect
        path: PathBuf,
    },

    /// Guess the source language and compiler
    Language {
        /// Binary to inspect
        path: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbosity);

    match cli.command {
        Commands::Analyze {
            paths,
            json,
            sequential,
            no_unsafe_apis,
            no_signature,
            jobs,
        } => {
            let options = AnalysisOptions {
                parallel: !sequential,
                scan_unsafe_apis: !no_unsafe_apis,
                verify_signature: !no_signature,
                ..Default::default()
            };
            cmd_analyze(paths, json, options, jobs)
        }
        Commands::Header { path } => cmd_header(&path),
        Commands::Commands { path } => cmd_commands(&path),
        Commands::Symbols {
            path,
            imports,
            filter,
        } => cmd_symbols(&path, imports, filter),
        Commands::Dylibs { path } => cmd_dylibs(&path),
        Commands::Language { path } => cmd_language(&path),
    }
}

fn setup_logging(verbosity: u8) {
    let level = match verbosity {
        0 => Level::ERROR,
        1 => Level::WARN,
        2 => Level::INFO,
        _ => Level::DEBUG,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber).ok();
}

/// Opens and analyzes a single file with default options.
fn open(path: &Path) -> Result<FileReport> {
    Analyzer::default()
        .analyze_path(path)
        .with_context(|| format!("Failed to analyze: {}", path.display()))
}

/// Runs `f` for every analyzed architecture, reporting failed slices.
fn for_each_arch(report: &FileReport, mut f: impl FnMut(&str, &Analysis)) {
    let multiple = report.is_fat();
    for (arch, analysis) in report.analyses() {
        if multiple {
            println!("\n[{}]", arch);
        }
        f(arch, analysis);
    }

    if let FileReport::Fat(fat) = report {
        for (arch, err) in fat.failed() {
            error!("{} slice at {:#x}: {}", arch.arch_name(), arch.offset, err);
        }
    }
}

// =============================================================================
// analyze
// =============================================================================

#[derive(Serialize)]
struct JsonEntry<'a> {
    path: &'a Path,
    #[serde(flatten)]
    outcome: JsonOutcome<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "snake_case")]
enum JsonOutcome<'a> {
    Report(&'a FileReport),
    Error(String),
}

fn cmd_analyze(
    paths: Vec<PathBuf>,
    json: bool,
    options: AnalysisOptions,
    jobs: Option<usize>,
) -> Result<()> {
    let start = Instant::now();

    // Configure thread pool
    if let Some(n) = jobs {
        rayon::ThreadPoolBuilder::new()
            .num_threads(n)
            .build_global()
            .ok();
    }

    let analyzer = Analyzer::new(options);

    let progress = if paths.len() > 1 && !json {
        let progress = ProgressBar::new(paths.len() as u64);
        progress.set_style(
            ProgressStyle::default_bar()
                .template(
                    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})",
                )
                .context("Invalid progress template")?
                .progress_chars("#>-"),
        );
        Some(progress)
    } else {
        None
    };

    let results: Vec<_> = paths
        .par_iter()
        .map(|path| {
            let result = analyzer.analyze_path(path);
            if let Some(progress) = &progress {
                progress.inc(1);
            }
            (path, result)
        })
        .collect();

    if let Some(progress) = progress {
        progress.finish_and_clear();
    }

    let failures = results.iter().filter(|(_, r)| r.is_err()).count();

    if json {
        let entries: Vec<_> = results
            .iter()
            .map(|(path, result)| JsonEntry {
                path,
                outcome: match result {
                    Ok(report) => JsonOutcome::Report(report),
                    Err(e) => JsonOutcome::Error(e.to_string()),
                },
            })
            .collect();
        let text = if entries.len() == 1 {
            serde_json::to_string_pretty(&entries[0])?
        } else {
            serde_json::to_string_pretty(&entries)?
        };
        println!("{}", text);
    } else {
        for (path, result) in &results {
            println!("{}", path.display());
            println!("{}", "=".repeat(path.display().to_string().len()));
            match result {
                Ok(report) => for_each_arch(report, print_analysis),
                Err(e) => error!("{}: {}", path.display(), e),
            }
            println!();
        }
    }

    info!(
        "Analyzed {} files in {:.2}s",
        results.len(),
        start.elapsed().as_secs_f64()
    );

    check_failures(failures, results.len())
}

/// Turns per-file failures into a non-zero exit status.
fn check_failures(failures: usize, total: usize) -> Result<()> {
    if failures > 0 {
        warn!("{} of {} files failed to parse", failures, total);
        bail!("{} of {} files failed to parse", failures, total);
    }
    Ok(())
}

fn yes_no(value: bool) -> &'static str {
    if value {
        "yes"
    } else {
        "no"
    }
}

fn print_analysis(_arch: &str, analysis: &Analysis) {
    let header = &analysis.macho.header;
    println!(
        "Type:          {} ({}, {}, {})",
        header.file_type_name(),
        header.arch_name(),
        header.width,
        header.endian
    );
    println!("Load commands: {}", analysis.macho.commands.len());
    println!("Symbols:       {}", analysis.macho.symbols.len());
    if let Some(starts) = &analysis.function_starts {
        println!("Functions:     {}", starts.len());
    }

    println!("\nSecurity:");
    for (label, value) in analysis.posture.entries() {
        println!("  {:<26} {}", label, yes_no(value));
    }

    println!("\nCode signature:");
    match &analysis.signature {
        SignatureStatus::Absent => println!("  none"),
        SignatureStatus::Consistent(info) => {
            println!("  Identifier:  {}", info.identifier);
            if let Some(team) = &info.team_id {
                println!("  Team:        {}", team);
            }
            println!(
                "  Directory:   v{:#x} {} ({} code slots)",
                info.directory.version, info.hash_type, info.directory.n_code_slots
            );
            println!("  CDHash:      {}", info.digest);
            println!(
                "  CMS:         {}",
                if info.has_cms_signature {
                    "present"
                } else {
                    "absent (ad-hoc)"
                }
            );
            if info.outdated {
                println!("  Outdated CodeDirectory version");
            }
        }
        SignatureStatus::Inconsistent { offset, reason } => {
            println!("  INCONSISTENT at {:#x}: {}", offset, reason)
        }
    }

    if !analysis.unsafe_apis.is_empty() {
        println!("\nUnsafe APIs ({}):", analysis.unsafe_apis.len());
        for finding in &analysis.unsafe_apis {
            println!(
                "  {:<28} {:<26} {}",
                finding.symbol, finding.category, finding.severity
            );
        }
    }

    if !analysis.section_findings.is_empty() {
        println!("\nSection findings:");
        for finding in &analysis.section_findings {
            println!("  {:<28} {}", finding.location(), finding.issue);
        }
    }

    if !analysis.macho.warnings.is_empty() {
        println!("\nWarnings:");
        for warning in &analysis.macho.warnings {
            println!("  {}", warning);
        }
    }
}

// =============================================================================
// header / commands / symbols / dylibs
// =============================================================================

fn cmd_header(path: &Path) -> Result<()> {
    let report = open(path)?;

    for_each_arch(&report, |_, analysis| {
        let h = &analysis.macho.header;
        println!("Magic:       {:#010x}", h.magic);
        println!("Format:      {} {}", h.width, h.endian);
        println!("CPU:         {} ({:#x}/{:#x})", h.arch_name(), h.cputype, h.cpusubtype);
        println!("File type:   {}", h.file_type_name());
        println!("Commands:    {} ({} bytes)", h.ncmds, h.sizeofcmds);
        println!("Flags:       {:#010x} {:?}", h.flags, h.flags());
        if let Some(uuid) = analysis.macho.uuid() {
            println!("UUID:        {}", format_uuid(uuid));
        }
        if let Some(bv) = analysis.macho.build_version() {
            println!(
                "Platform:    {} {} (SDK {})",
                machscope::macho::platform_name(bv.platform),
                bv.minos,
                bv.sdk
            );
        }
        if let Some((entryoff, _)) = analysis.macho.entry_point() {
            println!("Entry:       {:#x}", entryoff);
        }
    });

    Ok(())
}

fn cmd_commands(path: &Path) -> Result<()> {
    let report = open(path)?;

    for_each_arch(&report, |_, analysis| {
        for cmd in &analysis.macho.commands {
            let detail = match &cmd.kind {
                CommandKind::Segment(seg) => format!(
                    "{:<16} {:#018x} {:#10x} {}/{} {} sections",
                    seg.name,
                    seg.vmaddr,
                    seg.vmsize,
                    seg.init_prot().to_rwx(),
                    seg.max_prot().to_rwx(),
                    seg.sections.len()
                ),
                CommandKind::Dylib(d) => d.name.clone(),
                CommandKind::Dylinker { name } => name.clone(),
                CommandKind::Rpath { path } => path.clone(),
                CommandKind::Uuid(uuid) => format_uuid(uuid),
                CommandKind::Malformed { reason } => format!("MALFORMED: {}", reason),
                _ => String::new(),
            };
            println!(
                "{:>3} {:#08x} {:<28} {:>6} {}",
                cmd.index,
                cmd.offset,
                load_command_name(cmd.cmd),
                cmd.cmdsize,
                detail
            );
        }
    });

    Ok(())
}

fn cmd_symbols(path: &Path, imports: bool, filter: Option<String>) -> Result<()> {
    let report = open(path)?;

    for_each_arch(&report, |_, analysis| {
        for sym in &analysis.macho.symbols {
            if imports && !(sym.is_external() && sym.is_undefined()) {
                continue;
            }
            if let Some(ref f) = filter {
                if !sym.name.contains(f.as_str()) {
                    continue;
                }
            }
            println!("{:#018x} {:<6} {}", sym.value, sym.type_name(), sym.name);
        }
    });

    Ok(())
}

fn cmd_dylibs(path: &Path) -> Result<()> {
    let report = open(path)?;

    for_each_arch(&report, |_, analysis| {
        if let Some(id) = analysis.macho.id_dylib() {
            println!("id       {} ({})", id.name, id.current_version);
        }
        for dylib in analysis.macho.dylibs() {
            println!(
                "{:<8} {} (compatibility {}, current {})",
                dylib.kind, dylib.name, dylib.compatibility_version, dylib.current_version
            );
        }
        for rpath in analysis.macho.rpaths() {
            println!("rpath    {}", rpath);
        }
    });

    Ok(())
}

fn cmd_language(path: &Path) -> Result<()> {
    // Section contents are needed, so keep the bytes alive alongside the report
    let source = ByteSource::open(path, AnalysisOptions::default().limits.max_file_size)
        .with_context(|| format!("Failed to open: {}", path.display()))?;
    let report = Analyzer::default()
        .analyze_bytes(source.as_bytes())
        .with_context(|| format!("Failed to analyze: {}", path.display()))?;

    let reader = source.reader();
    let slices: Vec<_> = match &report {
        FileReport::Thin(analysis) => vec![(analysis, 0, reader.len())],
        FileReport::Fat(fat) => fat
            .succeeded()
            .map(|(arch, analysis)| (analysis, arch.offset, arch.size))
            .collect(),
    };

    for (analysis, offset, size) in slices {
        let image = reader.sub_reader(offset, size)?;
        let input = ClassifierInput::new(&analysis.macho, &image);
        let detection = classify(&BuiltinClassifier, &input);
        println!(
            "{:<8} {} ({})",
            analysis.macho.header.arch_name(),
            detection.language,
            detection.compiler
        );
    }

    Ok(())
}
