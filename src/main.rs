//! Avatar Configurator - command line front end
//!
//! Loads the customization catalog and drives the store from the terminal.

use clap::{Parser, Subcommand};
use rand::{rngs::StdRng, SeedableRng};
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use avatar_configurator::{
    avatar::{asset_icon, asset_label, AssetUrlService, CustomizationStore},
    backend::{MemoryRecordStore, PocketBaseClient, RecordStore},
    config::Config,
    export::{ExportService, GlbScene, GltfBackend},
};

/// Avatar Configurator - browse, randomize and export avatar customizations
#[derive(Parser, Debug)]
#[command(name = "avatar-configurator", version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Read records from a JSON fixture instead of the backend
    #[arg(short, long)]
    records: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print categories and the default selection
    Show,
    /// Pick a random outfit and print it
    Randomize {
        /// Seed for a reproducible outfit
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Optimize a GLB scene and save it as a download
    Export {
        /// GLB file produced by the renderer
        #[arg(long)]
        scene: PathBuf,

        /// Output directory (overrides config)
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(
            EnvFilter::builder()
                .with_default_directive(log_level.into())
                .from_env_lossy(),
        )
        .init();

    info!(
        "Starting {} v{}",
        avatar_configurator::NAME,
        avatar_configurator::VERSION
    );

    // Load configuration
    let config = if let Some(ref path) = args.config {
        Config::from_file(path)?
    } else {
        Config::load()?
    };
    let config = config.with_env_overrides();

    // Validate configuration
    config.validate()?;

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(run(&args, &config))
}

/// Pick the record source and run the command against it
async fn run(args: &Args, config: &Config) -> anyhow::Result<()> {
    let base_url = config.backend.url.as_deref().unwrap_or_default();

    if let Some(ref path) = args.records {
        info!("Reading records from {}", path.display());
        let backend = MemoryRecordStore::from_file(path, base_url)?;
        execute(&args.command, config, &backend).await
    } else {
        info!("Backend: {}", base_url);
        let backend = PocketBaseClient::new(&config.backend)?;
        execute(&args.command, config, &backend).await
    }
}

async fn execute<S: RecordStore>(
    command: &Command,
    config: &Config,
    backend: &S,
) -> anyhow::Result<()> {
    let mut store = CustomizationStore::new(config);
    store.fetch_categories(backend).await?;

    match command {
        Command::Show => print_selection(&store, backend),
        Command::Randomize { seed } => {
            match seed {
                Some(seed) => store.randomize_with(&mut StdRng::seed_from_u64(*seed)),
                None => store.randomize(),
            };
            print_selection(&store, backend);
        }
        Command::Export { scene, out } => {
            let mut export_config = config.export.clone();
            if let Some(out) = out {
                export_config.output_dir = out.clone();
            }

            let (service, capabilities) = ExportService::new(
                GltfBackend::new(),
                GlbScene::File(scene.clone()),
                &export_config,
            );
            let worker = tokio::spawn(service.run());

            store.register_capabilities(capabilities);
            let path = store.download()?.finished().await?;
            println!("{}", path.display());

            // closes the request channel so the service stops
            drop(store);
            worker.await?;
        }
    }

    Ok(())
}

fn print_selection<S: RecordStore>(store: &CustomizationStore, backend: &S) {
    let urls = AssetUrlService::new(backend);
    let snapshot = store.snapshot();

    println!("Skin: {}\n", snapshot.skin_color);

    for category in store.categories() {
        let entry = snapshot.customization.get(&category.name);
        let color = entry.map(|e| e.color.as_str()).unwrap_or_default();

        match entry.and_then(|e| e.asset.as_ref()) {
            Some(asset) => {
                println!(
                    "  {} [{}] {} ({}, {})",
                    category.name,
                    color,
                    asset.name(),
                    asset_label(asset, true),
                    asset_icon(asset, true)
                );
                if let Some(url) = urls.model_url(asset) {
                    println!("      model: {}", url);
                }
                if let Some(url) = urls.thumbnail_url(asset) {
                    println!("      thumbnail: {}", url);
                }
            }
            None => println!("  {} [{}] -", category.name, color),
        }

        if let Some(locks) = snapshot.locked_groups.get(&category.name) {
            for lock in locks {
                println!("      locked by {} in {}", lock.name, lock.category_name);
            }
        }
    }
}
