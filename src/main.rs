use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use survey_sync::classify::ZoneClassifier;
use survey_sync::config::AppConfig;
use survey_sync::infra::{self, KoboClient};
use survey_sync::pipeline::{RunOutcome, SyncPipeline, WarehouseStatus};
use survey_sync::{logging, metrics};
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "survey_sync")]
#[command(about = "Classify geotagged survey records by zone and sync new ones to the sheet and warehouse")]
#[command(version = "0.1.0")]
struct Cli {
    /// Path to the TOML configuration
    #[arg(long, global = true, default_value = "config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch, classify and append new records
    Sync,
    /// Recompute zone and corridor for every row already in the sheet
    Reclassify {
        /// Confirm that the sheet will be rewritten
        #[arg(long)]
        yes: bool,
        /// Where the pre-rewrite CSV backup goes
        #[arg(long, default_value = "backups")]
        backup_dir: PathBuf,
    },
    /// Load every layer and report what was found
    CheckLayers,
}

fn print_warehouse(status: &WarehouseStatus) {
    match status {
        WarehouseStatus::NotConfigured => {}
        WarehouseStatus::Skipped => println!("   Warehouse: skipped"),
        WarehouseStatus::Loaded { rows } => println!("   Warehouse: {} rows loaded", rows),
        WarehouseStatus::Failed { message } => println!("⚠️  Warehouse failed: {}", message),
    }
}

fn build_pipeline(config: &AppConfig) -> Result<SyncPipeline> {
    let zones = ZoneClassifier::load(&config.zones).context("Failed to load zone layers")?;
    let sheet = infra::text_sink(&config.sheet).context("Failed to set up the sheet")?;
    let warehouse = infra::typed_sink(config.warehouse.as_ref());
    Ok(SyncPipeline::new(config, zones, sheet, warehouse))
}

async fn run_sync(config: &AppConfig) -> Result<()> {
    let source = KoboClient::from_config(&config.source).context("Failed to set up the survey source")?;
    let pipeline = build_pipeline(config)?.with_source(Arc::new(source));

    println!("🔄 Running sync...");
    let summary = pipeline.run().await.context("Sync failed")?;

    match summary.outcome {
        RunOutcome::NothingFetched => println!("✅ Source returned no records"),
        RunOutcome::UpToDate => println!("✅ Everything up to date, no new records"),
        RunOutcome::Synced => println!("✅ Wrote {} new records", summary.written),
    }
    println!("\n📊 Sync results:");
    println!("   Fetched: {}", summary.fetched);
    println!("   Dropped (no coordinates): {}", summary.dropped_without_coordinates);
    println!("   Dropped (no identifier): {}", summary.dropped_without_identifier);
    println!("   Unparseable timestamps: {}", summary.unparseable_timestamps);
    println!("   Already synced: {}", summary.already_synced);
    for (layer, count) in &summary.zones.special {
        println!("   Zone {}: {}", layer, count);
    }
    for (code, count) in &summary.zones.partition {
        println!("   Code {}: {}", code, count);
    }
    println!("   No resolvable code: {}", summary.unresolved_zone_codes);
    println!("   Outside every zone: {}", summary.zones.unclassified);
    print_warehouse(&summary.warehouse);
    info!(outcome = ?summary.outcome, written = summary.written, "Sync finished in {:.2}s", summary.duration_secs);
    Ok(())
}

async fn run_reclassify(config: &AppConfig, yes: bool, backup_dir: PathBuf) -> Result<()> {
    if !yes {
        anyhow::bail!("reclassify rewrites the whole sheet; pass --yes to confirm");
    }
    let pipeline = build_pipeline(config)?;

    println!("🔨 Reclassifying sheet rows...");
    let summary = pipeline
        .reclassify(&backup_dir)
        .await
        .context("Reclassification failed")?;

    println!("\n📊 Reclassify results:");
    println!("   Rows: {}", summary.rows);
    println!("   Zone changes: {}", summary.changed);
    println!("   Without coordinates: {}", summary.without_coordinates);
    if let Some(backup) = &summary.backup {
        println!("   Backup: {}", backup.display());
    }
    print_warehouse(&summary.warehouse);
    Ok(())
}

fn check_layers(config: &AppConfig) -> Result<()> {
    let zones = ZoneClassifier::load(&config.zones).context("Failed to load zone layers")?;
    for layer in zones.special_layers() {
        println!("   {} (code {}): {} polygons", layer.name, layer.code, layer.polygon_count());
    }
    let partition = zones.partition();
    println!(
        "   {} (partition): {} polygons, code attribute {}",
        partition.name,
        partition.polygon_count(),
        partition.code_attribute.as_deref().unwrap_or("<none>")
    );
    for corridor in &config.corridors {
        println!("   {} (corridor): {} vertices", corridor.name, corridor.ring.len());
    }
    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    let config = AppConfig::load_from_file(&cli.config)
        .with_context(|| format!("Failed to load config from {}", cli.config.display()))?;
    if config.metrics.is_some() {
        metrics::init_metrics();
    }

    let (instance, result) = match cli.command {
        Commands::Sync => ("sync", run_sync(&config).await),
        Commands::Reclassify { yes, backup_dir } => {
            ("reclassify", run_reclassify(&config, yes, backup_dir).await)
        }
        Commands::CheckLayers => return check_layers(&config),
    };

    // Pushed on failure too so the gateway sees partial counters
    if let Some(m) = &config.metrics {
        match metrics::push_metrics(m, instance).await {
            Ok(()) => println!("📈 Metrics pushed to {}", m.pushgateway_url),
            Err(e) => warn!("Failed to push metrics: {}", e),
        }
    }
    result
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();
    logging::init_logging();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("❌ {:#}", e);
            ExitCode::FAILURE
        }
    }
}
