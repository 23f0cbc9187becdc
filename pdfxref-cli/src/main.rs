use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pdfxref::parser::{InputDevice, Parser as XRefParser, StreamDevice};
use pdfxref::{Document, ParseOptions, XRefEntryType};
use std::fs::File;
use std::io::{BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "pdfxref",
    about = "Inspect and rewrite the cross-reference structure of PDF files",
    version
)]
struct Cli {
    /// Reject files that break the file structure rules
    #[arg(long, global = true)]
    strict: bool,

    /// Leave stream bodies on disk until needed
    #[arg(long, global = true)]
    lazy: bool,

    /// Log parser decisions
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version, trailer and revision information
    Info {
        /// Input PDF file
        input: PathBuf,
    },

    /// Dump the merged cross-reference table
    Xref {
        /// Input PDF file
        input: PathBuf,
    },

    /// Drop unreachable objects and save a compacted copy
    Gc {
        /// Input PDF file
        input: PathBuf,

        /// Output file path
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Find where the previous revision of an updated file ends
    PrevRevision {
        /// Input PDF file
        input: PathBuf,

        /// Write the previous revision to this file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn init_logging(verbose: bool) {
    let default = if verbose { "pdfxref=debug" } else { "pdfxref=warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn parse_options(cli: &Cli) -> ParseOptions {
    let base = if cli.strict {
        ParseOptions::strict()
    } else {
        ParseOptions::lenient()
    };
    ParseOptions {
        load_on_demand: cli.lazy,
        collect_warnings: true,
        ..base
    }
}

fn open(input: &Path, options: ParseOptions) -> Result<Document<BufReader<File>>> {
    Document::open(input, options).with_context(|| format!("Failed to load {}", input.display()))
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    let options = parse_options(&cli);
    debug!(?options, "Parse options");

    match &cli.command {
        Commands::Info { input } => {
            let doc = open(input, options)?;
            print_info(input, &doc);
        }

        Commands::Xref { input } => {
            let doc = open(input, options)?;
            print_xref(input, &doc);
        }

        Commands::Gc { input, output } => {
            let mut doc = open(input, options)?;
            let before = doc.objects().len();
            let removed = doc.collect_garbage();
            doc.save(output)
                .with_context(|| format!("Failed to write {}", output.display()))?;

            println!("Removed {removed} of {before} objects");
            println!("Saved to: {}", output.display());
        }

        Commands::PrevRevision { input, output } => {
            let file = File::open(input)
                .with_context(|| format!("Failed to open {}", input.display()))?;
            let mut device = StreamDevice::new(BufReader::new(file))?;
            let len = device.len();

            let mut parser = XRefParser::new(options);
            match parser.try_get_previous_revision_offset(&mut device, len)? {
                Some(offset) => {
                    println!("Previous revision ends at offset {offset}");
                    if let Some(output) = output {
                        let data = std::fs::read(input)?;
                        let end = usize::try_from(offset)?.min(data.len());
                        let mut out = File::create(output)
                            .with_context(|| format!("Failed to create {}", output.display()))?;
                        out.write_all(&data[..end])?;
                        println!("Saved to: {}", output.display());
                    }
                }
                None => println!("No previous revision"),
            }
        }
    }

    Ok(())
}

fn print_info(input: &Path, doc: &Document<BufReader<File>>) {
    println!("PDF Information for: {}", input.display());
    println!("==========================================");
    println!("PDF Version: {}", doc.version());
    println!("Objects: {}", doc.objects().len());
    println!("Free objects: {}", doc.objects().free_objects().count());
    println!("Incremental updates: {}", doc.incremental_updates());
    println!(
        "Cross-reference streams: {}",
        if doc.has_xref_stream() { "yes" } else { "no" }
    );
    if doc.is_encrypted() {
        println!("Encrypted: yes");
    }

    let mut keys: Vec<&String> = doc.trailer().dict().keys().collect();
    keys.sort();
    let keys: Vec<&str> = keys.into_iter().map(String::as_str).collect();
    println!("Trailer keys: {}", keys.join(", "));

    println!("\nRevisions:");
    for (i, revision) in doc.revisions().iter().enumerate() {
        println!("  #{i} {:?} at offset {}", revision.kind, revision.offset);
    }

    if !doc.warnings().is_empty() {
        println!("\nWarnings:");
        for warning in doc.warnings() {
            println!("  {warning}");
        }
    }
}

fn print_xref(input: &Path, doc: &Document<BufReader<File>>) {
    println!("Cross-reference table for: {}", input.display());
    for (number, entry) in doc.xref_entries().iter() {
        if !entry.parsed {
            println!("{number:>8} -");
            continue;
        }
        match entry.entry_type {
            XRefEntryType::InUse => println!(
                "{number:>8} n offset {:>10} gen {:>5}",
                entry.offset, entry.generation
            ),
            XRefEntryType::Free => println!(
                "{number:>8} f next   {:>10} gen {:>5}",
                entry.object_number, entry.generation
            ),
            XRefEntryType::Compressed => println!(
                "{number:>8} c stream {:>10} idx {:>5}",
                entry.object_number, entry.index
            ),
        }
    }
}
