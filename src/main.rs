use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::Level;

use diskboard::{
    AccessFlags, DiscoveryOptions, NodeId, PartitionCatalog, PartitionDiscoveryService,
};

#[derive(Parser)]
#[command(name = "diskboard")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "List physical disks and their partitions")]
struct Cli {
    /// Highest disk index to probe
    #[arg(long)]
    max_disk: Option<u32>,

    /// Probe disks one at a time
    #[arg(long)]
    sequential: bool,

    /// Use the OS page cache instead of direct I/O
    #[arg(long)]
    buffered: bool,

    /// Print the catalog as JSON
    #[arg(long)]
    json: bool,

    /// JSON file with discovery options
    #[arg(long)]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let options = load_options(&cli)?;
    let catalog = PartitionDiscoveryService::new(options).discover();

    if cli.json {
        let json = serde_json::to_string_pretty(&catalog.summary())
            .context("Failed to serialize catalog")?;
        println!("{}", json);
    } else {
        print_catalog(&catalog);
    }
    Ok(())
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        _ => Level::DEBUG,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_file(true)
        .with_line_number(true)
        .with_writer(std::io::stderr)
        .init();
}

fn load_options(cli: &Cli) -> Result<DiscoveryOptions> {
    let mut options = match &cli.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config {}", path.display()))?;
            serde_json::from_str(&text)
                .with_context(|| format!("Invalid config {}", path.display()))?
        }
        None => DiscoveryOptions::default(),
    };

    if let Some(max_disk) = cli.max_disk {
        options = options.with_max_disk_index(max_disk);
    }
    if cli.sequential {
        options = options.sequential();
    }
    if cli.buffered {
        options = options.with_access(AccessFlags::read_only().buffered());
    }
    Ok(options)
}

fn print_catalog(catalog: &PartitionCatalog) {
    if catalog.is_empty() {
        println!("No accessible disks found. Raw device access usually needs root.");
        return;
    }

    for disk in catalog.disks() {
        let Some(entry) = catalog.disk(disk) else {
            continue;
        };
        let model = entry
            .drive
            .as_ref()
            .and_then(|d| d.model.as_deref())
            .unwrap_or("-");
        println!(
            "disk {:<2} {:<24} {:<8} {}",
            entry.disk_index,
            entry.path.as_deref().unwrap_or("-"),
            format!("{:?}", entry.scheme).to_lowercase(),
            model
        );
        print_partitions(catalog, disk);
    }
}

fn print_partitions(catalog: &PartitionCatalog, disk: NodeId) {
    for (i, node) in catalog.partitions(disk).enumerate() {
        let Some(part) = catalog.partition(node) else {
            continue;
        };
        println!(
            "  {:>2}  {:<38} {:<18} start {:>12}  sectors {:>12}",
            i,
            part.partition_type.to_string(),
            part.flags.to_string(),
            part.start_sector,
            part.sector_count
        );
    }
}
