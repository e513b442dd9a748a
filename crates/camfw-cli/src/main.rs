//! camfw - List, extract and patch sections of camera firmware containers
//!
//! This tool validates the global and per-section CRCs of a firmware image,
//! dumps section payloads to files, and replaces a single section while
//! keeping every checksum consistent.

use anyhow::{bail, Context, Result};
use camfw_core::{
    Error as CoreError, FirmwareImage, ParseError, Parser as ImageParser, ParserConfig,
    PatchError, Patcher, Section, DEFAULT_MAX_SECTIONS, GLOBAL_HEADER_SIZE,
};
use clap::{Args, Parser, Subcommand};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{debug, error, info, trace, warn, Level};
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

/// Exit code for usage and I/O failures
const EXIT_IO: u8 = 1;
/// Exit code for images that fail structural validation
const EXIT_INVALID: u8 = 2;
/// Exit code for rejected patches
const EXIT_REJECTED: u8 = 3;

/// List, extract and patch sections of camera firmware containers
#[derive(Parser, Debug)]
#[command(name = "camfw")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Reject images with more sections than this
    #[arg(long, global = true, default_value_t = DEFAULT_MAX_SECTIONS)]
    max_sections: usize,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show the sections of one image or a directory of images
    List(ListArgs),
    /// Write every section payload to its own file
    Extract(ExtractArgs),
    /// Replace one section payload and write the patched image
    Patch(PatchArgs),
}

#[derive(Args, Debug)]
struct ListArgs {
    #[command(flatten)]
    input: InputMode,

    /// Report CRC mismatches instead of stopping at the first one
    #[arg(long)]
    no_verify: bool,

    /// Show a short blake3 digest of each payload
    #[arg(long)]
    digest: bool,

    /// Also show version, build date, flags and magic of each section
    #[arg(short, long)]
    long: bool,
}

#[derive(Args, Debug)]
#[group(required = true, multiple = false)]
struct InputMode {
    /// Path to a single firmware image
    #[arg(short, long)]
    file: Option<PathBuf>,

    /// Path to a directory of firmware images
    #[arg(short, long)]
    directory: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct ExtractArgs {
    /// Firmware image to extract from
    firmware: PathBuf,

    /// Output directory for section files
    #[arg(short, long, default_value = ".")]
    output: PathBuf,

    /// Overwrite existing files
    #[arg(long)]
    force: bool,

    /// Dry run - don't write files, just show what would be extracted
    #[arg(long)]
    dry_run: bool,
}

#[derive(Args, Debug)]
struct PatchArgs {
    /// Original, unpatched firmware image
    firmware: PathBuf,

    /// File holding the replacement section payload
    section_file: PathBuf,

    /// Index of the section to replace, counting from 0
    index: usize,

    /// Where to write the patched image
    output: PathBuf,

    /// Zero-pad a replacement that is shorter than the section
    #[arg(long)]
    allow_padding: bool,

    /// Overwrite the output file if it exists
    #[arg(long)]
    force: bool,

    /// Dry run - patch and verify in memory, but don't write the output
    #[arg(long)]
    dry_run: bool,
}

/// A shorter replacement was given without `--allow-padding`
#[derive(Debug, thiserror::Error)]
#[error(
    "replacement for section {index} is {padding} bytes shorter than the section; \
     pass --allow-padding to zero-pad it"
)]
struct PaddingDeclined {
    index: usize,
    padding: usize,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize tracing
    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.into()))
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::from(exit_code(&e))
        }
    }
}

fn run(cli: &Cli) -> Result<()> {
    match &cli.command {
        Command::List(args) => {
            if let Some(ref file) = args.input.file {
                list_file(cli, args, file)
            } else if let Some(ref directory) = args.input.directory {
                list_directory(cli, args, directory)
            } else {
                bail!("Either --file or --directory must be specified")
            }
        }
        Command::Extract(args) => extract(cli, args),
        Command::Patch(args) => patch(cli, args),
    }
}

/// Maps an error chain onto the process exit code
fn exit_code(err: &anyhow::Error) -> u8 {
    for cause in err.chain() {
        if let Some(e) = cause.downcast_ref::<CoreError>() {
            return match e {
                CoreError::Parse(_) | CoreError::Patch(PatchError::Parse(_)) => EXIT_INVALID,
                CoreError::Patch(_) => EXIT_REJECTED,
                _ => EXIT_IO,
            };
        }
        if cause.is::<ParseError>() {
            return EXIT_INVALID;
        }
        if let Some(e) = cause.downcast_ref::<PatchError>() {
            return match e {
                PatchError::Parse(_) => EXIT_INVALID,
                _ => EXIT_REJECTED,
            };
        }
        if cause.is::<PaddingDeclined>() {
            return EXIT_REJECTED;
        }
    }
    EXIT_IO
}

fn parser(cli: &Cli) -> ImageParser {
    ImageParser::with_config(ParserConfig::new().max_sections(cli.max_sections))
}

/// List the sections of a single image
fn list_file(cli: &Cli, args: &ListArgs, file: &Path) -> Result<()> {
    if !file.is_file() {
        bail!("Input path is not a file: {}", file.display());
    }

    let image = FirmwareImage::load(file)?;
    let parser = parser(cli);

    let (global_ok, sections) = if args.no_verify {
        let survey = parser
            .survey(image.as_bytes())
            .with_context(|| format!("Failed to walk {}", file.display()))?;
        (survey.global_crc_ok(), survey.sections)
    } else {
        let sections = parser
            .parse(image.as_bytes())
            .with_context(|| format!("Invalid firmware image: {}", file.display()))?;
        (true, sections)
    };

    println!(
        "{}: {} bytes, {} sections",
        file.display(),
        image.len(),
        sections.len()
    );
    println!(
        "Global CRC: 0x{:08x} ({})",
        image.global_crc().unwrap_or_default(),
        status(global_ok)
    );
    print!("{}", render_table(&sections, image.as_bytes(), args.into()));

    Ok(())
}

/// List every image in a directory tree, continuing past invalid ones
fn list_directory(cli: &Cli, args: &ListArgs, directory: &Path) -> Result<()> {
    if !directory.is_dir() {
        bail!("Path is not a directory: {}", directory.display());
    }

    info!("Scanning directory: {}", directory.display());

    let mut listed = 0;
    let mut failed = 0;

    for entry in WalkDir::new(directory)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
    {
        let path = entry.path();

        if !path.is_file() || is_hidden(path) {
            continue;
        }

        if !could_be_image(path) {
            trace!("Skipping small file: {}", path.display());
            continue;
        }

        debug!("Listing image: {}", path.display());
        match list_file(cli, args, path) {
            Ok(()) => listed += 1,
            Err(e) => {
                // Log error but continue with other files
                warn!("{}: {:#}", path.display(), e);
                failed += 1;
            }
        }
        println!();
    }

    info!("Listed {} images, {} failed", listed, failed);
    Ok(())
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with('.'))
        .unwrap_or(false)
}

/// Files shorter than the global header cannot be images
fn could_be_image(path: &Path) -> bool {
    fs::metadata(path)
        .map(|m| m.len() >= GLOBAL_HEADER_SIZE as u64)
        .unwrap_or(false)
}

fn status(ok: bool) -> &'static str {
    if ok {
        "OK"
    } else {
        "MISMATCH!"
    }
}

/// Short content digest (first 8 bytes of blake3)
fn digest(payload: &[u8]) -> String {
    blake3::hash(payload).to_hex()[..16].to_string()
}

/// Optional columns of the section table
#[derive(Debug, Clone, Copy, Default)]
struct Columns {
    header_words: bool,
    digest: bool,
}

impl From<&ListArgs> for Columns {
    fn from(args: &ListArgs) -> Self {
        Self {
            header_words: args.long,
            digest: args.digest,
        }
    }
}

/// Render the section table
fn render_table(sections: &[Section], image: &[u8], columns: Columns) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "{:<12}{:>10}{:>10}",
        "Section", "Offset", "Length"
    ));
    if columns.header_words {
        out.push_str(&format!(
            "{:>12}{:>12}{:>12}{:>12}",
            "Version", "Build", "Flags", "Magic"
        ));
    }
    out.push_str(&format!("{:>12}", "CRC"));
    if columns.digest {
        out.push_str(&format!("  {:<16}", "Digest"));
    }
    out.push('\n');

    for section in sections {
        out.push_str(&format!(
            "{:<12}{:>10}{:>10}",
            section_file_name(section.index),
            section.offset,
            section.length
        ));
        if columns.header_words {
            out.push_str(&format!(
                "  0x{:08x}  0x{:08x}  0x{:08x}  0x{:08x}",
                section.version, section.build_date, section.flags, section.magic
            ));
        }
        out.push_str(&format!(
            "  0x{:08x} ({})",
            section.header_crc,
            status(section.is_valid())
        ));
        if columns.digest {
            out.push_str(&format!("  {}", digest(section.payload(image))));
        }
        out.push('\n');
    }

    out
}

fn section_file_name(index: usize) -> String {
    format!("section_{}", index)
}

/// Write every section payload to `section_N` files
fn extract(cli: &Cli, args: &ExtractArgs) -> Result<()> {
    let image = FirmwareImage::load(&args.firmware)?;
    let sections = parser(cli)
        .parse(image.as_bytes())
        .with_context(|| format!("Invalid firmware image: {}", args.firmware.display()))?;

    if sections.is_empty() {
        warn!("No sections found in {}", args.firmware.display());
        return Ok(());
    }

    for section in &sections {
        let output_path = args.output.join(section_file_name(section.index));

        if args.dry_run {
            println!(
                "Would write section {} to {} ({} bytes)",
                section.index,
                output_path.display(),
                section.length
            );
            continue;
        }

        write_section(&output_path, section.payload(image.as_bytes()), args.force)?;
        println!(
            "Saved section {} to {} at offset {} len {} CRC 0x{:08x}",
            section.index,
            output_path.display(),
            section.offset,
            section.length,
            section.header_crc
        );
    }

    Ok(())
}

/// Write a section payload to disk
fn write_section(output_path: &Path, payload: &[u8], force: bool) -> Result<()> {
    // Create parent directories
    if let Some(parent) = output_path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }

    // Check if file exists
    if output_path.exists() && !force {
        bail!(
            "File already exists: {} (use --force to overwrite)",
            output_path.display()
        );
    }

    let mut file = fs::File::create(output_path)
        .with_context(|| format!("Failed to create file: {}", output_path.display()))?;

    file.write_all(payload)
        .with_context(|| format!("Failed to write file: {}", output_path.display()))?;

    Ok(())
}

/// Replace one section and save the verified image
fn patch(cli: &Cli, args: &PatchArgs) -> Result<()> {
    let mut image = FirmwareImage::load(&args.firmware)?;
    let replacement = fs::read(&args.section_file).with_context(|| {
        format!(
            "Failed to read replacement section: {}",
            args.section_file.display()
        )
    })?;

    if args.output.exists() && !args.force && !args.dry_run {
        bail!(
            "File already exists: {} (use --force to overwrite)",
            args.output.display()
        );
    }

    let patcher = Patcher::with_parser(parser(cli));
    let plan = patcher
        .plan(image.as_bytes(), args.index, replacement.len())
        .with_context(|| {
            format!(
                "Cannot replace section {} of {}",
                args.index,
                args.firmware.display()
            )
        })?;

    info!(
        "Replacing section {} ({} bytes at offset {}) with {} ({} bytes)",
        plan.index,
        plan.length,
        plan.offset,
        args.section_file.display(),
        plan.replacement_len
    );

    if plan.is_padded() {
        warn!(
            "Replacement is smaller than section {} by {} bytes",
            plan.index, plan.padding
        );
        if !args.allow_padding {
            return Err(PaddingDeclined {
                index: plan.index,
                padding: plan.padding,
            }
            .into());
        }
    }

    let report = image
        .patch_with(&patcher, args.index, &replacement)
        .with_context(|| format!("Patching section {} failed", args.index))?;

    println!(
        "Section {} CRC: 0x{:08x} -> 0x{:08x}",
        report.index, report.old_crc, report.new_crc
    );
    println!(
        "Global CRC: 0x{:08x} -> 0x{:08x}",
        report.old_global_crc, report.new_global_crc
    );
    if report.is_padded() {
        println!("Zero-padded by {} bytes", report.padding);
    }

    if args.dry_run {
        println!("Would write: {}", args.output.display());
        return Ok(());
    }

    image.save(&args.output)?;
    println!("Wrote {}", args.output.display());

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use camfw_core::{ImageBuilder, SectionSpec};
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn cli(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("camfw").chain(args.iter().copied())).unwrap()
    }

    fn write_image(dir: &Path) -> PathBuf {
        let image = ImageBuilder::new()
            .section(vec![0x11; 32])
            .section(vec![0x22; 48])
            .build();
        let path = dir.join("firmware.bin");
        fs::write(&path, image).unwrap();
        path
    }

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_exit_codes() {
        let io = anyhow::Error::new(CoreError::file_read(
            "/tmp/x",
            std::io::Error::new(std::io::ErrorKind::NotFound, "missing"),
        ));
        assert_eq!(exit_code(&io), EXIT_IO);

        let invalid = anyhow::Error::new(ParseError::TooManySections { max: 1 })
            .context("Invalid firmware image");
        assert_eq!(exit_code(&invalid), EXIT_INVALID);

        let rejected = anyhow::Error::new(PatchError::ReplacementTooLarge {
            index: 0,
            size: 2,
            capacity: 1,
        });
        assert_eq!(exit_code(&rejected), EXIT_REJECTED);

        let declined = anyhow::Error::new(PaddingDeclined {
            index: 0,
            padding: 4,
        });
        assert_eq!(exit_code(&declined), EXIT_REJECTED);

        assert_eq!(exit_code(&anyhow::anyhow!("plain")), EXIT_IO);
    }

    #[test]
    fn test_render_table() {
        let image = ImageBuilder::new().section(b"abc".to_vec()).build();
        let sections = ImageParser::new().parse(&image).unwrap();

        let columns = Columns {
            digest: true,
            ..Columns::default()
        };
        let table = render_table(&sections, &image, columns);
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("Section"));
        assert!(lines[0].contains("Digest"));
        assert!(!lines[0].contains("Version"));
        assert!(lines[1].starts_with("section_0"));
        assert!(lines[1].contains("(OK)"));
        assert!(lines[1].ends_with(&digest(b"abc")));
    }

    #[test]
    fn test_render_table_long() {
        let image = ImageBuilder::new()
            .section_with(
                SectionSpec::new(b"abc".to_vec())
                    .version(0x0102_0304)
                    .build_date(0x2014_0611)
                    .flags(0x80),
            )
            .build();
        let sections = ImageParser::new().parse(&image).unwrap();

        let args = cli(&["list", "--file", "firmware.bin", "--long"]);
        let Command::List(args) = &args.command else {
            panic!("expected list command");
        };
        let table = render_table(&sections, &image, args.into());
        let lines: Vec<&str> = table.lines().collect();

        let header: Vec<&str> = lines[0].split_whitespace().collect();
        assert_eq!(
            header,
            vec!["Section", "Offset", "Length", "Version", "Build", "Flags", "Magic", "CRC"]
        );

        let row: Vec<&str> = lines[1].split_whitespace().collect();
        assert_eq!(
            &row[3..7],
            &["0x01020304", "0x20140611", "0x00000080", "0xa324eb90"]
        );
        assert_eq!(row[8], "(OK)");
    }

    #[test]
    fn test_extract_writes_sections() {
        let temp_dir = TempDir::new().unwrap();
        let firmware = write_image(temp_dir.path());
        let out = temp_dir.path().join("out");

        let cli = cli(&[
            "extract",
            firmware.to_str().unwrap(),
            "-o",
            out.to_str().unwrap(),
        ]);
        run(&cli).unwrap();

        assert_eq!(fs::read(out.join("section_0")).unwrap(), vec![0x11; 32]);
        assert_eq!(fs::read(out.join("section_1")).unwrap(), vec![0x22; 48]);

        // Second run refuses to overwrite
        assert!(run(&cli).is_err());
    }

    #[test]
    fn test_patch_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let firmware = write_image(temp_dir.path());
        let section = temp_dir.path().join("section.bin");
        let output = temp_dir.path().join("patched.bin");
        fs::write(&section, vec![0x99; 48]).unwrap();

        run(&cli(&[
            "patch",
            firmware.to_str().unwrap(),
            section.to_str().unwrap(),
            "1",
            output.to_str().unwrap(),
        ]))
        .unwrap();

        let patched = FirmwareImage::load(&output).unwrap();
        let sections = patched.parse().unwrap();
        assert_eq!(sections.len(), 2);
        assert_eq!(sections[1].payload(patched.as_bytes()), vec![0x99; 48].as_slice());
    }

    #[test]
    fn test_patch_padding_requires_flag() {
        let temp_dir = TempDir::new().unwrap();
        let firmware = write_image(temp_dir.path());
        let section = temp_dir.path().join("section.bin");
        let output = temp_dir.path().join("patched.bin");
        fs::write(&section, b"tiny").unwrap();

        let args = [
            "patch",
            firmware.to_str().unwrap(),
            section.to_str().unwrap(),
            "0",
            output.to_str().unwrap(),
        ];

        let err = run(&cli(&args)).unwrap_err();
        assert_eq!(exit_code(&err), EXIT_REJECTED);
        assert!(!output.exists());

        let mut with_flag = args.to_vec();
        with_flag.push("--allow-padding");
        run(&cli(&with_flag)).unwrap();

        let patched = FirmwareImage::load(&output).unwrap();
        let sections = patched.parse().unwrap();
        let payload = sections[0].payload(patched.as_bytes());
        assert_eq!(&payload[..4], b"tiny");
        assert!(payload[4..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_patch_oversized_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let firmware = write_image(temp_dir.path());
        let section = temp_dir.path().join("section.bin");
        let output = temp_dir.path().join("patched.bin");
        fs::write(&section, vec![0u8; 33]).unwrap();

        let err = run(&cli(&[
            "patch",
            firmware.to_str().unwrap(),
            section.to_str().unwrap(),
            "0",
            output.to_str().unwrap(),
        ]))
        .unwrap_err();

        assert_eq!(exit_code(&err), EXIT_REJECTED);
        assert!(!output.exists());
    }

    #[test]
    fn test_list_invalid_image() {
        let temp_dir = TempDir::new().unwrap();
        let firmware = write_image(temp_dir.path());
        let mut data = fs::read(&firmware).unwrap();
        let last = data.len() - 1;
        data[last] ^= 0xFF;
        fs::write(&firmware, data).unwrap();

        let err = run(&cli(&["list", "-f", firmware.to_str().unwrap()])).unwrap_err();
        assert_eq!(exit_code(&err), EXIT_INVALID);

        run(&cli(&["list", "-f", firmware.to_str().unwrap(), "--no-verify"])).unwrap();
    }

    #[test]
    fn test_list_directory_continues_past_failures() {
        let temp_dir = TempDir::new().unwrap();
        write_image(temp_dir.path());
        fs::write(temp_dir.path().join("garbage.bin"), vec![0xFFu8; 512]).unwrap();
        fs::write(temp_dir.path().join("tiny.bin"), b"x").unwrap();

        run(&cli(&["list", "-d", temp_dir.path().to_str().unwrap()])).unwrap();
    }

    #[test]
    fn test_is_hidden() {
        assert!(is_hidden(Path::new("/tmp/.firmware.bin")));
        assert!(!is_hidden(Path::new("/tmp/firmware.bin")));
    }
}
