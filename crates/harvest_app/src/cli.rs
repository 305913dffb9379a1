use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use harvest_core::{RegionId, DEFAULT_MAX_RESULTS_PER_COMBINATION, DEFAULT_PAGE_SIZE};

#[derive(Debug, Parser)]
#[command(name = "bnmp-harvest")]
#[command(about = "Resumable bulk harvester for the BNMP portal", version)]
pub struct Cli {
    /// Cookie file saved after the browser login
    #[arg(long, global = true, default_value = "cookies.json")]
    pub cookies_file: PathBuf,

    /// Directory receiving every artifact and completion record
    #[arg(long, global = true, default_value = "data-raw")]
    pub data_dir: PathBuf,

    /// Platform base URL
    #[arg(long, global = true)]
    pub base_url: Option<String>,

    /// Delay before every request, per worker, in milliseconds
    #[arg(long, global = true, default_value_t = 500)]
    pub delay_ms: u64,

    /// Concurrent workers
    #[arg(long, global = true, default_value_t = 1)]
    pub workers: usize,

    /// Attempts per unit for throttled or transient failures
    #[arg(long, global = true, default_value_t = 4)]
    pub max_attempts: u32,

    /// Also append the log to harvest.log in the data directory
    #[arg(long, global = true)]
    pub log_file: bool,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Walk states and municipalities, saving every result page
    Harvest(HarvestArgs),
    /// Download one CSV export per state, then merge them
    Exports(ExportArgs),
    /// Merge the downloaded per-state CSV exports
    Merge {
        /// Defaults to csvs_merged.csv in the data directory
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Fetch case results and certificates for every row of the merged CSV
    Cases(CaseArgs),
    /// Show credential expiry and completion record counts
    Status,
}

#[derive(Debug, Args)]
pub struct HarvestArgs {
    #[arg(long, default_value_t = DEFAULT_PAGE_SIZE)]
    pub page_size: u32,

    /// Results the platform returns at most for one filter
    #[arg(long, default_value_t = DEFAULT_MAX_RESULTS_PER_COMBINATION)]
    pub max_results: u64,

    /// Resume from this state id
    #[arg(long)]
    pub start_uf: Option<RegionId>,

    /// Resume from this municipality id inside the start state
    #[arg(long, requires = "start_uf")]
    pub start_municipio: Option<RegionId>,

    /// Descend into municipalities even for states under the cap
    #[arg(long)]
    pub no_skip_small: bool,

    /// Only store result pages; leave the certificates they list
    #[arg(long)]
    pub no_pdfs: bool,
}

#[derive(Debug, Args)]
pub struct ExportArgs {
    /// Only states with an id >= this one
    #[arg(long)]
    pub start_uf: Option<RegionId>,

    #[arg(long)]
    pub skip_merge: bool,
}

#[derive(Debug, Args)]
pub struct CaseArgs {
    /// Defaults to csvs_merged.csv in the data directory
    #[arg(long)]
    pub csv_file: Option<PathBuf>,

    /// Zero-based row to resume from
    #[arg(long, default_value_t = 0)]
    pub start_row: usize,

    #[arg(long)]
    pub max_rows: Option<usize>,
}
