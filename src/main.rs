use clap::{ArgAction, Args, Parser, Subcommand};
use star::analyze::{FragmentationInfo, Issue, Owner};
use star::header::{DEFAULT_BLOCK_SIZE, DEFAULT_MAX_ENTRIES, DEFAULT_NAME_LEN};
use star::{Archive, Geometry, StarError, NO_BLOCK};
use std::path::PathBuf;
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "star", version, about = "Block-chained archive tool")]
struct Cli {
    /// Log more (-v info, -vv debug, -vvv trace); RUST_LOG takes precedence
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
    #[command(flatten)]
    geometry: GeometryArgs,
    #[command(subcommand)]
    command: Commands,
}

/// Host layout.  Must match the values the archive was created with.
#[derive(Args)]
struct GeometryArgs {
    /// Block size in bytes, including the 4-byte link
    #[arg(long, global = true, default_value_t = DEFAULT_BLOCK_SIZE)]
    block_size: u32,
    /// Number of header entry slots
    #[arg(long, global = true, default_value_t = DEFAULT_MAX_ENTRIES)]
    max_entries: usize,
    /// Bytes reserved per member name, terminator included
    #[arg(long, global = true, default_value_t = DEFAULT_NAME_LEN)]
    name_len: usize,
}

impl From<&GeometryArgs> for Geometry {
    fn from(args: &GeometryArgs) -> Self {
        Geometry {
            block_size:  args.block_size,
            max_entries: args.max_entries,
            name_len:    args.name_len,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new archive from the given files
    Create {
        #[arg(short = 'f', long)]
        file: PathBuf,
        #[arg(required = true, num_args = 1..)]
        inputs: Vec<PathBuf>,
    },
    /// Extract every member
    Extract {
        #[arg(short = 'f', long)]
        file: PathBuf,
        #[arg(short = 'C', long, default_value = ".")]
        output_dir: PathBuf,
    },
    /// List members
    List {
        #[arg(short = 'f', long)]
        file: PathBuf,
        /// -v adds sizes, -vv adds block counts and start blocks
        #[arg(short, long, action = ArgAction::Count)]
        verbose: u8,
    },
    /// Remove members by name
    Delete {
        #[arg(short = 'f', long)]
        file: PathBuf,
        #[arg(required = true, num_args = 1..)]
        names: Vec<String>,
    },
    /// Add files to an existing archive
    Append {
        #[arg(short = 'f', long)]
        file: PathBuf,
        #[arg(required = true, num_args = 1..)]
        inputs: Vec<PathBuf>,
    },
    /// Replace existing members with the current file contents
    Update {
        #[arg(short = 'f', long)]
        file: PathBuf,
        #[arg(required = true, num_args = 1..)]
        inputs: Vec<PathBuf>,
    },
    /// Compact the archive in place
    Pack {
        #[arg(short = 'f', long)]
        file: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Show block usage and fragmentation
    Stats {
        #[arg(short = 'f', long)]
        file: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Check that every block has exactly one owner
    Verify {
        #[arg(short = 'f', long)]
        file: PathBuf,
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let geometry = Geometry::from(&cli.geometry);

    match cli.command {

        // ── Create ───────────────────────────────────────────────────────────
        Commands::Create { file, inputs } => {
            check_sources(&inputs)?;
            let mut ar = Archive::create(&file, geometry)?;
            add_all(&mut ar, &inputs)?;
            println!("Created: {} ({} member(s))", file.display(), ar.len());
        }

        // ── Extract ──────────────────────────────────────────────────────────
        Commands::Extract { file, output_dir } => {
            let mut ar = Archive::open_read_only(&file, geometry)?;
            for path in ar.extract_all(&output_dir)? {
                println!("  extracted  {}", path.display());
            }
        }

        // ── List ─────────────────────────────────────────────────────────────
        Commands::List { file, verbose } => {
            let ar = Archive::open_read_only(&file, geometry)?;
            match verbose {
                0 => {
                    for entry in ar.list() {
                        println!("{}", entry.name);
                    }
                }
                1 => {
                    for entry in ar.list() {
                        println!("{:>12}  {}", entry.size, entry.name);
                    }
                }
                _ => {
                    println!("{:>12} {:>8} {:>10}  Name", "Size", "Blocks", "Start");
                    for entry in ar.list() {
                        let start = if entry.start_block == NO_BLOCK {
                            "-".to_string()
                        } else {
                            entry.start_block.to_string()
                        };
                        println!("{:>12} {:>8} {:>10}  {}",
                            entry.size, geometry.blocks_for(entry.size), start, entry.name);
                    }
                }
            }
        }

        // ── Delete ───────────────────────────────────────────────────────────
        Commands::Delete { file, names } => {
            let mut ar = Archive::open(&file, geometry)?;
            for name in &names {
                if ar.remove(name)? {
                    println!("  deleted  {name}");
                } else {
                    warn!(name = %name, "no such member, skipping");
                }
            }
        }

        // ── Append ───────────────────────────────────────────────────────────
        Commands::Append { file, inputs } => {
            check_sources(&inputs)?;
            let mut ar = Archive::open(&file, geometry)?;
            add_all(&mut ar, &inputs)?;
        }

        // ── Update ───────────────────────────────────────────────────────────
        Commands::Update { file, inputs } => {
            check_sources(&inputs)?;
            let mut ar = Archive::open(&file, geometry)?;
            for path in &inputs {
                match ar.update_path(path) {
                    Ok(entry) => println!("  updated  {} ({} bytes)", entry.name, entry.size),
                    Err(e) if e.is_recoverable() => {
                        warn!(path = %path.display(), "{e}, skipping");
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        }

        // ── Pack ─────────────────────────────────────────────────────────────
        Commands::Pack { file, json } => {
            let mut ar = Archive::open(&file, geometry)?;
            let report = ar.pack()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("── Before ──────────────────────────────────────────────");
                print_stats(&report.before);
                println!("── After ───────────────────────────────────────────────");
                print_stats(&report.after);
                println!("  Moved blocks   {}", report.moved_blocks);
                println!("  Size           {} B -> {} B", report.bytes_before, report.bytes_after);
            }
        }

        // ── Stats ────────────────────────────────────────────────────────────
        Commands::Stats { file, json } => {
            let mut ar = Archive::open_read_only(&file, geometry)?;
            let info = ar.stats()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&info)?);
            } else {
                println!("── {} ", file.display());
                print_stats(&info);
            }
        }

        // ── Verify ───────────────────────────────────────────────────────────
        Commands::Verify { file, json } => {
            let mut ar = Archive::open_read_only(&file, geometry)?;
            let report = ar.verify()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                for issue in &report.issues {
                    println!("  {}", describe(issue));
                }
                if !report.orphans.is_empty() {
                    println!("  orphaned blocks: {:?}", report.orphans);
                }
                println!("{}", report.summary());
            }
            if !report.is_clean() {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

// ── helpers ──────────────────────────────────────────────────────────────────

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn check_sources(inputs: &[PathBuf]) -> Result<(), Box<dyn std::error::Error>> {
    for path in inputs {
        if !path.is_file() {
            return Err(format!("{}: no such file", path.display()).into());
        }
    }
    Ok(())
}

/// Add each input; duplicates are skipped, a full table stops the batch.
fn add_all(ar: &mut Archive, inputs: &[PathBuf]) -> Result<(), Box<dyn std::error::Error>> {
    for path in inputs {
        match ar.add_path(path) {
            Ok(entry) => println!("  added  {} ({} bytes)", entry.name, entry.size),
            Err(e @ StarError::CapacityExceeded { .. }) => return Err(e.into()),
            Err(e) if e.is_recoverable() => {
                warn!(path = %path.display(), "{e}, skipping");
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

fn print_stats(info: &FragmentationInfo) {
    println!("  Total blocks   {} ({} header)", info.total_blocks, info.header_blocks);
    println!("  Used blocks    {}", info.used_blocks);
    println!("  Free blocks    {} ({} on free list)", info.free_blocks, info.free_list_len);
    println!("  Free runs      {}", info.free_runs);
    if info.free_runs > 0 {
        println!("  Run length     {}..={}", info.smallest_free_run, info.largest_free_run);
    }
    println!("  Fragmentation  {:.1}%", info.fragmentation_ratio * 100.0);
}

fn describe(issue: &Issue) -> String {
    let owner = |o: &Owner| match o {
        Owner::Member(name) => format!("member '{name}'"),
        Owner::FreeList     => "free list".to_string(),
    };
    match issue {
        Issue::OutOfRange { owner: o, block } => {
            format!("{} links to block {block}, outside the block region", owner(o))
        }
        Issue::SharedBlock { block, first, second } => {
            format!("block {block} claimed by {} and {}", owner(first), owner(second))
        }
        Issue::ChainTooShort { name, missing } => {
            format!("member '{name}' chain ends {missing} byte(s) early")
        }
        Issue::ExcessBlocks { name, extra } => {
            format!("member '{name}' chain has {extra} block(s) past its size")
        }
    }
}
