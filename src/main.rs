use anyhow::{anyhow, Context, Result};
use clap::{CommandFactory, Parser, Subcommand, ValueHint};
use clap_complete::{generate, Shell};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

use flock_genetics::inbreeding::risk_level;
use flock_genetics::{
    BreedingEngine, EngineConfig, FlockLoader, Report, ReportFormat, ReportGenerator, RiskLevel,
};

/// Pedigree, inbreeding and mate selection for poultry flocks
#[derive(Parser, Debug)]
#[command(
    name = "flock-genetics",
    version,
    about = "Poultry pedigree analysis, inbreeding coefficients and mate ranking",
    long_about = r#"
Breeding analysis over a flock snapshot:
- Pedigree trees with guest parents for unknown ancestry
- Wright coefficient of inbreeding with per-ancestor breakdown
- Pairing compatibility and offspring trait prediction
- Breeding value index and ranked mate recommendations

Birds are read from a JSON snapshot, trait history from CSV or TSV.
"#
)]
#[command(arg_required_else_help = true)]
struct Cli {
    /// Flock snapshot (JSON)
    #[arg(long, value_name = "FILE", value_hint = ValueHint::FilePath, env = "FLOCK_FILE", global = true)]
    flock: Option<PathBuf>,

    /// Trait history (CSV or TSV)
    #[arg(long, value_name = "FILE", value_hint = ValueHint::FilePath, env = "FLOCK_TRAITS", global = true)]
    traits: Option<PathBuf>,

    /// Engine configuration (TOML)
    #[arg(short, long, value_name = "FILE", value_hint = ValueHint::FilePath, env = "FLOCK_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Number of threads (0 = auto-detect)
    #[arg(short, long, default_value = "0", global = true, help = "Number of threads (0 = auto)")]
    threads: usize,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text", global = true)]
    format: ReportFormat,

    /// Write the report into this directory instead of stdout
    #[arg(short, long, value_name = "DIR", value_hint = ValueHint::DirPath, global = true)]
    output: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Ancestor tree of a bird
    Pedigree {
        bird: String,
        /// Generations to walk (capped by the configured maximum)
        #[arg(short, long)]
        depth: Option<u32>,
    },
    /// Coefficient of inbreeding for a prospective pairing
    Coi { sire: String, dam: String },
    /// Score a sire/dam pairing
    Compatibility { sire: String, dam: String },
    /// Predict offspring traits
    Predict { sire: String, dam: String },
    /// Breeding value index of a bird
    Bvi { bird: String },
    /// Rank the best mates for a bird
    Mates {
        bird: String,
        #[arg(short = 'n', long, default_value = "5")]
        top: usize,
    },
    /// Offspring and later generations of a bird
    Descendants {
        bird: String,
        #[arg(short, long, default_value = "3")]
        depth: u32,
    },
    /// Print the effective configuration as TOML
    ShowConfig,
    /// Generate shell completions
    Completions { shell: Shell },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::Completions { shell } = cli.command {
        generate_completions(shell);
        return Ok(());
    }

    init_logging(cli.verbose);

    let config = match &cli.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };

    if let Commands::ShowConfig = cli.command {
        let rendered = toml::to_string_pretty(&config).context("Failed to render configuration")?;
        println!("{}", rendered);
        return Ok(());
    }

    init_thread_pool(cli.threads)?;
    info!("Using {} threads", rayon::current_num_threads());

    run(&cli, config)
}

fn run(cli: &Cli, config: EngineConfig) -> Result<()> {
    let flock = cli
        .flock
        .as_ref()
        .ok_or_else(|| anyhow!("A flock snapshot is required (--flock or FLOCK_FILE)"))?;

    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {msg}")?);
    pb.enable_steady_tick(Duration::from_millis(100));

    pb.set_message("Loading flock...");
    let store = FlockLoader::new().load(flock, cli.traits.as_deref())?;
    let engine = BreedingEngine::from_store(store, config)?;

    pb.set_message("Analyzing...");
    let report = match &cli.command {
        Commands::Pedigree { bird, depth } => {
            let depth = depth.unwrap_or(engine.config().pedigree.max_depth);
            Report::Pedigree(engine.compute_pedigree(bird, depth)?)
        }
        Commands::Coi { sire, dam } => {
            let breakdown = engine.coi_breakdown(sire, dam)?;
            let risk = risk_level(breakdown.coi_percent, &engine.config().risk);
            Report::Coi {
                sire_id: sire.clone(),
                dam_id: dam.clone(),
                breakdown,
                risk,
            }
        }
        Commands::Compatibility { sire, dam } => {
            Report::Compatibility(engine.compute_compatibility(sire, dam)?)
        }
        Commands::Predict { sire, dam } => Report::Prediction {
            sire_id: sire.clone(),
            dam_id: dam.clone(),
            prediction: engine.predict_offspring(sire, dam)?,
        },
        Commands::Bvi { bird } => Report::BreedingValue(engine.compute_breeding_value(bird)?),
        Commands::Mates { bird, top } => Report::Mates(engine.find_best_mates(bird, *top)?),
        Commands::Descendants { bird, depth } => Report::Descendants {
            bird_id: bird.clone(),
            entries: engine.descendant_tree(bird, *depth)?,
        },
        Commands::ShowConfig | Commands::Completions { .. } => {
            pb.finish_and_clear();
            return Ok(());
        }
    };
    pb.finish_and_clear();

    let generator = ReportGenerator::new(cli.format);
    match &cli.output {
        Some(dir) => {
            let path = generator.write_to_dir(&report, dir)?;
            println!(
                "{} Report saved to: {}",
                style("✓").green().bold(),
                style(path).cyan()
            );
        }
        None => {
            if cli.format == ReportFormat::Text {
                print_headline(&report);
            }
            print!("{}", generator.render(&report)?);
        }
    }

    Ok(())
}

/// Colored one-line summary ahead of text reports
fn print_headline(report: &Report) {
    let risk = match report {
        Report::Compatibility(r) => Some(r.risk_level),
        Report::Coi { risk, .. } => Some(*risk),
        _ => None,
    };
    if let Some(risk) = risk {
        let label = match risk {
            RiskLevel::Low => style(risk.label()).green(),
            RiskLevel::Moderate => style(risk.label()).yellow(),
            RiskLevel::High => style(risk.label()).red(),
            RiskLevel::Critical => style(risk.label()).red().bold(),
        };
        println!("{} inbreeding risk", label);
    }
    if let Report::Compatibility(r) = report {
        if r.rejected {
            println!("{}", style("Pairing rejected").red().bold());
        }
    }
}

fn generate_completions(shell: Shell) {
    let mut cmd = Cli::command();
    let name = cmd.get_name().to_string();
    generate(shell, &mut cmd, name, &mut io::stdout());
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(format!("flock_genetics={}", level))
        .with_writer(io::stderr)
        .init();
}

fn init_thread_pool(threads: usize) -> Result<()> {
    let num_threads = if threads == 0 {
        num_cpus::get()
    } else {
        threads
    };

    rayon::ThreadPoolBuilder::new()
        .num_threads(num_threads)
        .build_global()
        .map_err(|e| anyhow::anyhow!("Failed to initialize thread pool: {}", e))?;

    Ok(())
}
