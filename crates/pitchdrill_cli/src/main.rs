use clap::{Parser, Subcommand};
use pitchdrill_core::{PersonaCatalog, PitchDrillConfig};
use tracing_subscriber::EnvFilter;

mod analyses;
mod chat;

#[derive(Parser, Debug)]
#[command(name = "pitchdrill", author, version, about, long_about = None)]
struct Args {
    /// Path to the config file
    #[arg(short, long, default_value = "pitchdrill.toml")]
    config: String,

    /// Path to the analysis database (overrides the config file)
    #[arg(long)]
    db: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the available personas
    Personas,

    /// Start a practice call with a persona
    Chat {
        /// Persona id, e.g. sarah-skeptic
        #[arg(short, long)]
        persona: String,

        /// Save an analysis when the call ends
        #[arg(long)]
        save: bool,

        /// Ask the sales coach to review the call when it ends
        #[arg(long)]
        coach: bool,
    },

    /// Review saved analyses
    Analyses {
        #[command(subcommand)]
        action: AnalysesAction,
    },
}

#[derive(Subcommand, Debug)]
pub(crate) enum AnalysesAction {
    /// List saved analyses, oldest first
    List {
        /// Only show analyses for this persona id
        #[arg(short, long)]
        persona: Option<String>,
    },
    /// Print one saved analysis
    Show {
        /// Storage key, as printed by `analyses list`
        key: String,
    },
}

fn init_tracing() {
    // Logs go to stderr so the conversation on stdout stays readable.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn load_catalog(config: &PitchDrillConfig) -> anyhow::Result<PersonaCatalog> {
    let mut catalog = PersonaCatalog::default();
    catalog.extend(config.personas.iter().cloned());
    let extra = catalog.load_dir(&config.storage.persona_dir).await?;
    if extra > 0 {
        tracing::info!(
            "Loaded {} persona file(s) from {}",
            extra,
            config.storage.persona_dir
        );
    }
    Ok(catalog)
}

fn list_personas(catalog: &PersonaCatalog) {
    println!(
        "{:<16} {:<18} {:<8} {:<16} {}",
        "ID", "NAME", "VOICE", "AFFECT", "START"
    );
    for p in catalog.iter() {
        println!(
            "{:<16} {:<18} {:<8} {:<16} {}",
            p.id,
            p.name,
            p.voice.as_str(),
            p.affect.label(),
            p.initial_level
        );
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_tracing();
    let args = Args::parse();

    let mut config = PitchDrillConfig::load_or_default(&args.config);
    if let Some(db) = args.db {
        config.storage.db_path = db;
    }
    let catalog = load_catalog(&config).await?;

    match args.command {
        Command::Personas => {
            list_personas(&catalog);
            Ok(())
        }
        Command::Chat {
            persona,
            save,
            coach,
        } => chat::run(&config, &catalog, &persona, save, coach).await,
        Command::Analyses { action } => analyses::run(&config, action).await,
    }
}
