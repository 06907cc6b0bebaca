use clap::{Parser, Subcommand};
use refcheck::{reporter::ReportFormat, Analyzer, Config, Reporter};
use std::io::Write;
use std::path::PathBuf;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "refcheck")]
#[command(about = "Checks that every .NET assembly in a directory can resolve its references")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check the assemblies in a directory
    Check {
        /// Directory containing the assemblies
        #[arg(short = 'd', long)]
        directory: PathBuf,

        /// Verbose logging
        #[arg(short, long)]
        verbose: bool,

        /// Write the reference graph to this file
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Graph format (defaults to the output file extension, else dgml)
        #[arg(long, value_enum)]
        format: Option<ReportFormat>,

        /// Semicolon-delimited wildcards for references allowed to be missing
        #[arg(short, long)]
        exclusions: Option<String>,

        /// Semicolon-delimited wildcards for assemblies to leave out entirely
        #[arg(short, long)]
        ignores: Option<String>,

        /// Semicolon-delimited names of the assemblies expected to be roots
        #[arg(short = 'r', long)]
        expected_roots: Option<String>,

        /// Accept a local file of any version for a reference
        #[arg(long)]
        no_version_check: bool,

        /// Do not consult the global assembly cache
        #[arg(long)]
        no_registry: bool,

        /// Assembly cache root to search (repeatable)
        #[arg(long = "gac")]
        gac_roots: Vec<PathBuf>,

        /// Worker threads (0 = one per CPU)
        #[arg(short = 'j', long)]
        workers: Option<usize>,

        /// Configuration file path
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Generate a default configuration file
    Config {
        /// Output path for the config file (defaults to ~/.refcheck.toml)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("refcheck=debug")
    } else {
        EnvFilter::try_from_env("REFCHECK_LOG").unwrap_or_else(|_| EnvFilter::new("refcheck=info"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false).compact())
        .init();
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Check {
            directory,
            verbose,
            output,
            format,
            exclusions,
            ignores,
            expected_roots,
            no_version_check,
            no_registry,
            gac_roots,
            workers,
            config,
        } => {
            init_logging(verbose);

            let mut config = if let Some(config_path) = config {
                Config::from_file(&config_path)?
            } else {
                Config::load()?
            };

            config.target_directory = directory;
            Config::extend_list(&mut config.exclusions, exclusions.as_deref());
            Config::extend_list(&mut config.ignores, ignores.as_deref());
            Config::extend_list(&mut config.expected_roots, expected_roots.as_deref());
            if no_version_check {
                config.check_version = false;
            }
            if no_registry {
                config.registry.enabled = false;
            }
            if !gac_roots.is_empty() {
                config.registry.gac_roots = gac_roots;
            }
            if let Some(workers) = workers {
                config.workers = workers;
            }

            if !config.target_directory.is_dir() {
                anyhow::bail!(
                    "Target directory does not exist: {}",
                    config.target_directory.display()
                );
            }

            let code = check_directory(config, output, format)?;
            std::io::stdout().flush()?;
            std::process::exit(code.min(255) as i32);
        }
        Commands::Config { output } => {
            generate_config(output)?;
        }
    }

    Ok(())
}

fn check_directory(config: Config, output: Option<PathBuf>, format: Option<ReportFormat>) -> anyhow::Result<usize> {
    let analyzer = Analyzer::new(config)?;
    let result = analyzer.check()?;

    let reporter = Reporter::new();
    print!("{}", reporter.text_report(&result.classification));

    if let Some(output) = output {
        let format = format.unwrap_or_else(|| ReportFormat::from_path(&output));
        reporter.export_graph(&result, &output, format)?;
    }

    Ok(result.exit_code())
}

fn generate_config(output_path: Option<PathBuf>) -> anyhow::Result<()> {
    let config_path = output_path.unwrap_or_else(|| {
        Config::default_config_path().unwrap_or_else(|_| PathBuf::from("refcheck.toml"))
    });

    std::fs::write(&config_path, Config::create_documented_config())?;
    println!("Configuration file created: {}", config_path.display());

    Ok(())
}
