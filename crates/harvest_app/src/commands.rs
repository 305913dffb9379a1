use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use harvest_core::{HaltReason, RetryPolicy, CSV_DIR, MERGED_CSV};
use harvest_engine::{
    merge_exports, read_case_rows, ApiGateway, CheckpointStore, Credential, CredentialStore,
    GatewaySettings, HarvestConfig, Harvester, MergeReport, ReqwestGateway, RunReport, Traversal,
};
use harvest_log::{harvest_info, harvest_warn};
use tokio_util::sync::CancellationToken;

use crate::cli::{CaseArgs, Cli, Command, ExportArgs, HarvestArgs};

/// Exit status of a run that stopped before its sequence was exhausted.
const HALTED: u8 = 2;

pub async fn run(cli: Cli, shutdown: CancellationToken) -> anyhow::Result<ExitCode> {
    match &cli.command {
        Command::Harvest(args) => harvest(&cli, args, shutdown).await,
        Command::Exports(args) => exports(&cli, args, shutdown).await,
        Command::Merge { output } => {
            let output = output.clone().unwrap_or_else(|| cli.data_dir.join(MERGED_CSV));
            merge(&cli.data_dir, &output)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Cases(args) => cases(&cli, args, shutdown).await,
        Command::Status => status(&cli),
    }
}

async fn harvest(cli: &Cli, args: &HarvestArgs, shutdown: CancellationToken) -> anyhow::Result<ExitCode> {
    let mut config = harvest_config(cli);
    config.page_size = args.page_size.max(1);
    config.max_results_per_combination = args.max_results;
    config.skip_small_states = !args.no_skip_small;
    config.download_certificates = !args.no_pdfs;

    let report = harvester(cli, config, shutdown)?
        .run(Traversal::Hierarchy {
            start_state: args.start_uf,
            start_municipality: args.start_municipio,
        })
        .await?;
    Ok(finish(&report))
}

async fn exports(cli: &Cli, args: &ExportArgs, shutdown: CancellationToken) -> anyhow::Result<ExitCode> {
    let report = harvester(cli, harvest_config(cli), shutdown)?
        .run(Traversal::Exports {
            start_state: args.start_uf,
        })
        .await?;
    let code = finish(&report);
    if report.is_completed() && !args.skip_merge {
        merge(&cli.data_dir, &cli.data_dir.join(MERGED_CSV))?;
    }
    Ok(code)
}

async fn cases(cli: &Cli, args: &CaseArgs, shutdown: CancellationToken) -> anyhow::Result<ExitCode> {
    let csv_file = args
        .csv_file
        .clone()
        .unwrap_or_else(|| cli.data_dir.join(MERGED_CSV));
    let rows = read_case_rows(&csv_file)
        .with_context(|| format!("cannot read case list {}; run `exports` first", csv_file.display()))?;

    let report = harvester(cli, harvest_config(cli), shutdown)?
        .run(Traversal::Cases {
            rows,
            start_row: args.start_row,
            max_rows: args.max_rows,
        })
        .await?;
    Ok(finish(&report))
}

fn merge(data_dir: &Path, output: &Path) -> anyhow::Result<MergeReport> {
    let report = merge_exports(&data_dir.join(CSV_DIR), output).context("csv merge failed")?;
    println!(
        "merged {} rows from {} files into {} ({} lines skipped)",
        report.rows,
        report.files,
        report.output.display(),
        report.warnings.len()
    );
    for source in &report.skipped {
        println!(
            "left out state {} ({}): {}",
            source.state_id,
            source.state_abbrev,
            source.path.display()
        );
    }
    Ok(report)
}

fn status(cli: &Cli) -> anyhow::Result<ExitCode> {
    match CredentialStore::new(&cli.cookies_file).load() {
        Ok(credential) => match credential.expires_at() {
            Some(expiry) if expiry <= Utc::now() => {
                println!("credential: expired at {}", expiry.to_rfc3339())
            }
            Some(expiry) => println!("credential: valid until {}", expiry.to_rfc3339()),
            None => println!(
                "credential: {} cookies, no known expiry",
                credential.cookies().len()
            ),
        },
        Err(err) => println!("credential: {err}"),
    }

    let checkpoints = CheckpointStore::open_existing(&cli.data_dir)
        .with_context(|| format!("cannot open records in {}", cli.data_dir.display()))?;
    match checkpoints {
        Some(checkpoints) => {
            let (succeeded, permanent) = checkpoints.counts();
            println!("completed units: {succeeded} succeeded, {permanent} permanent errors");
        }
        None => println!("completed units: none yet in {}", cli.data_dir.display()),
    }
    Ok(ExitCode::SUCCESS)
}

fn harvest_config(cli: &Cli) -> HarvestConfig {
    let mut config = HarvestConfig::default_with_data_dir(cli.data_dir.clone());
    config.request_delay = Duration::from_millis(cli.delay_ms);
    config.workers = cli.workers.max(1);
    config.retry = RetryPolicy {
        max_attempts: cli.max_attempts.max(1),
        ..RetryPolicy::default()
    }
    .with_base_delay(config.request_delay);
    config
}

fn harvester(cli: &Cli, config: HarvestConfig, shutdown: CancellationToken) -> anyhow::Result<Harvester> {
    let credential = load_credential(&cli.cookies_file)?;

    let mut settings = GatewaySettings::default();
    if let Some(base_url) = &cli.base_url {
        settings.base_url = base_url.clone();
    }
    let gateway: Arc<dyn ApiGateway> =
        Arc::new(ReqwestGateway::new(settings).context("failed to build the http client")?);

    Ok(Harvester::new(gateway, credential, config, shutdown)?)
}

fn load_credential(path: &Path) -> anyhow::Result<Credential> {
    let credential = CredentialStore::new(path)
        .load()
        .context("log in through the browser and save the session cookies first")?;
    match credential.expires_at() {
        Some(expiry) if expiry <= Utc::now() => harvest_warn!(
            "Session expired at {}; requests will be refused",
            expiry.to_rfc3339()
        ),
        Some(expiry) => harvest_info!("Session valid until {}", expiry.to_rfc3339()),
        None => harvest_info!("Session has no known expiry"),
    }
    Ok(credential)
}

fn finish(report: &RunReport) -> ExitCode {
    println!("{}", report.summary);
    match report.halt_reason() {
        None => {
            if report.summary.total_errors() > 0 {
                println!(
                    "completed with {} errors; rerun the same command to retry failed units",
                    report.summary.total_errors()
                );
            }
            ExitCode::SUCCESS
        }
        Some(reason @ HaltReason::AuthExpired { .. }) => {
            eprintln!("halted: {reason}");
            ExitCode::from(HALTED)
        }
        Some(HaltReason::Cancelled) => {
            eprintln!("cancelled; rerun the same command to resume");
            ExitCode::from(HALTED)
        }
    }
}
