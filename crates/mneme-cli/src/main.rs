use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use dotenvy::dotenv;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use mneme_cli::config::{DEFAULT_LEDGER, DEFAULT_OUTPUT};
use mneme_cli::{Command, Config, LedgerCommand, read_targets};
use mneme_client::TimelineApiClient;
use mneme_core::{
    AddressMode, ApiConfig, AppError, BatchValidator, HarvestConfig, HarvestService,
    HarvestSummary, Identity, Profile, ProgressLedger, RetryPolicy, TracingReporter, load_profile,
};
use mneme_store::{JsonlSink, LedgerRepository};

const RULE: &str = "═══════════════════════════════════════════════════════";
const THIN_RULE: &str = "───────────────────────────────────────────────────────";

#[tokio::main]
async fn main() -> ExitCode {
    dotenv().ok();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("setting default subscriber failed: {}", e);
    }

    let config = Config::parse();

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            match err.downcast_ref::<AppError>() {
                Some(app_err) => error!("{}", app_err.user_message()),
                None => error!("{:#}", err),
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(config: Config) -> anyhow::Result<()> {
    let profile = load_profile(config.profile.clone())?.unwrap_or_default();
    let ledger_path = resolve_path(
        config.ledger.clone(),
        profile.harvest.ledger.as_ref(),
        DEFAULT_LEDGER,
    );

    match config.command {
        Command::Harvest {
            targets_file,
            ids,
            validate,
            retry_failed,
            page_size,
            concurrency,
            output,
        } => {
            let batch = read_targets(&targets_file, address_mode(ids))?;
            let client = api_client(
                config.api_url.as_deref(),
                config.bearer_token.as_deref(),
                &profile,
            )?;

            // Flags override the profile, which overrides the defaults.
            let mut harvest_config = profile.harvest.apply(HarvestConfig::default());
            if let Some(page_size) = page_size {
                harvest_config = harvest_config.with_page_size(page_size);
            }
            if let Some(concurrency) = concurrency {
                harvest_config = harvest_config.with_concurrency(concurrency);
            }
            if retry_failed {
                harvest_config = harvest_config.with_retry_policy(RetryPolicy::RetryFailed);
            }
            if validate {
                harvest_config = harvest_config.with_validation();
            }

            let output = resolve_path(output, profile.harvest.output.as_ref(), DEFAULT_OUTPUT);
            harvest(
                client,
                harvest_config,
                batch.identities(),
                &output,
                &ledger_path,
            )
            .await?;
        }
        Command::Validate { targets_file, ids } => {
            let batch = read_targets(&targets_file, address_mode(ids))?;
            let client = api_client(
                config.api_url.as_deref(),
                config.bearer_token.as_deref(),
                &profile,
            )?;
            validate_targets(client, batch.identities()).await?;
        }
        Command::Ledger { action } => {
            let repo = LedgerRepository::open(&ledger_path)
                .await
                .with_context(|| format!("Failed to open ledger {}", ledger_path.display()))?;
            let mut ledger = ProgressLedger::load(repo).await?;

            match action {
                LedgerCommand::Status => print_ledger_status(&ledger, &ledger_path),
                LedgerCommand::Reset { identity, ids } => {
                    let identity = Identity::parse(&identity, address_mode(ids))?;
                    if ledger.reset(&identity).await? {
                        info!(%identity, "Removed from ledger; the next harvest starts from scratch");
                    } else {
                        warn!(%identity, "Not found in ledger");
                    }
                }
                LedgerCommand::ResetFailed => {
                    let removed = ledger.reset_failed().await?;
                    info!(removed, "Removed failed identities from ledger");
                }
            }
        }
    }

    Ok(())
}

fn address_mode(ids: bool) -> AddressMode {
    if ids {
        AddressMode::Ids
    } else {
        AddressMode::Handles
    }
}

/// Command line value, else profile value, else the built-in default.
fn resolve_path(cli: Option<PathBuf>, profile: Option<&PathBuf>, default: &str) -> PathBuf {
    cli.or_else(|| profile.cloned())
        .unwrap_or_else(|| PathBuf::from(default))
}

fn api_client(
    api_url: Option<&str>,
    bearer_token: Option<&str>,
    profile: &Profile,
) -> anyhow::Result<TimelineApiClient> {
    let token = bearer_token.ok_or_else(|| {
        anyhow::anyhow!("No bearer token. Set MNEME_BEARER_TOKEN or pass --bearer-token")
    })?;

    let mut api_config = ApiConfig::new(token);
    if let Some(base_url) = api_url.or(profile.api.base_url.as_deref()) {
        api_config = api_config.with_base_url(base_url);
    }

    let client = TimelineApiClient::new(api_config)?;
    info!(api = %client.base_url(), "Using timeline API");
    Ok(client)
}

async fn harvest(
    client: TimelineApiClient,
    config: HarvestConfig,
    requested: &BTreeSet<Identity>,
    output: &Path,
    ledger_path: &Path,
) -> anyhow::Result<()> {
    let repo = LedgerRepository::open(ledger_path)
        .await
        .with_context(|| format!("Failed to open ledger {}", ledger_path.display()))?;
    let mut ledger = ProgressLedger::load(repo).await?;
    let sink = JsonlSink::open(output)
        .await
        .with_context(|| format!("Failed to open output {}", output.display()))?;

    info!(
        requested = requested.len(),
        recorded = ledger.len(),
        output = %output.display(),
        ledger = %ledger_path.display(),
        "Starting harvest"
    );

    let service = HarvestService::with_config(client, sink, config);
    let summary = service
        .run_with_progress(requested, &mut ledger, &TracingReporter)
        .await?;

    print_harvest_summary(&summary, output);
    Ok(())
}

async fn validate_targets(
    client: TimelineApiClient,
    requested: &BTreeSet<Identity>,
) -> anyhow::Result<()> {
    info!(requested = requested.len(), "Looking up identities");

    let report = BatchValidator::new(client).validate(requested).await?;

    println!();
    println!("  Requested:             {}", requested.len());
    println!("  Found:                 {}", report.valid.len());
    println!("  Not found:             {}", report.invalid.len());
    if !report.all_valid() {
        println!();
        for identity in &report.invalid {
            println!("    {}", identity);
        }
    }
    println!();

    Ok(())
}

/// Print a summary of one harvest run.
fn print_harvest_summary(summary: &HarvestSummary, output: &Path) {
    let stats = &summary.stats;

    info!("");
    info!("{}", RULE);
    info!("Harvest complete: {}", output.display());
    info!("{}", RULE);
    info!("  + Succeeded:         {}", stats.succeeded);
    info!("  ✗ Failed:            {}", stats.failed);
    info!("  = Skipped:           {}", stats.skipped);
    if stats.invalid > 0 {
        info!("  ? Not found:         {}", stats.invalid);
    }
    info!("{}", THIN_RULE);
    info!("  Items written:       {}", stats.items);
    info!("  Identities:          {}", stats.total());

    if !summary.is_clean() {
        info!("{}", THIN_RULE);
        info!("Failed identities:");
        for result in summary.failures() {
            if let Some(err) = &result.error {
                error!("  - {}: {}", result.identity, err);
            }
        }
        info!("Rerun with --retry-failed to try them again.");
    }
    info!("{}", RULE);
}

fn print_ledger_status(ledger: &ProgressLedger<LedgerRepository>, path: &Path) {
    let counts = ledger.counts();

    println!("\nLedger: {}\n", path.display());
    println!("  Identities recorded:   {}", counts.total());
    println!("  Succeeded:             {}", counts.succeeded);
    println!("  Failed:                {}", counts.failed);

    let mut failed: Vec<_> = ledger
        .entries()
        .iter()
        .filter(|(_, entry)| entry.failed)
        .collect();
    failed.sort_by(|a, b| a.0.cmp(b.0));

    if !failed.is_empty() {
        println!("\n  Failures:");
        for (identity, entry) in failed {
            println!(
                "    {:<24} {} ({})",
                identity.to_string(),
                entry.error_message.as_deref().unwrap_or("unknown error"),
                entry.updated_at.format("%Y-%m-%d %H:%M")
            );
        }
    }
    println!();
}
