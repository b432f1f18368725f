use std::error::Error;
use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand};
use sqlgen::{parse_files, ExpansionStats, Generator, GeneratorConfig, GrammarBuilder, Registry};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Grammar-driven random SQL generator
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace); RUST_LOG wins when set
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate random text from a grammar
    Generate {
        /// Grammar files; productions with the same name are merged
        #[arg(required = true)]
        grammar_files: Vec<PathBuf>,

        /// Starting non-terminal symbol
        #[arg(short, long)]
        start: Option<String>,

        /// Number of texts to generate
        #[arg(short = 'n', long)]
        count: Option<usize>,

        /// Seed for reproducible output
        #[arg(long)]
        seed: Option<u64>,

        /// Loop bound for productions without an annotation
        #[arg(long)]
        max_loop: Option<usize>,

        /// Text placed between tokens
        #[arg(long)]
        separator: Option<String>,

        /// Replace a production with constant text, as NAME=VALUE
        #[arg(long = "replace", value_parser = parse_replacement)]
        replacements: Vec<(String, String)>,

        /// JSON settings file; command-line flags take precedence
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Print dead-end statistics to stderr after generating
        #[arg(long)]
        stats: bool,
    },

    /// List the productions reachable from a start symbol
    Reachable {
        #[arg(required = true)]
        grammar_files: Vec<PathBuf>,

        #[arg(short, long)]
        start: String,

        /// List the unreachable productions instead
        #[arg(long)]
        dead: bool,
    },

    /// Print the minimal sub-grammar needed to expand a start symbol
    Export {
        #[arg(required = true)]
        grammar_files: Vec<PathBuf>,

        #[arg(short, long)]
        start: String,
    },
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Generate {
            grammar_files,
            start,
            count,
            seed,
            max_loop,
            separator,
            replacements,
            config,
            stats,
        } => {
            let mut config = match config {
                Some(path) => GeneratorConfig::from_json_file(path)?,
                None => GeneratorConfig::default(),
            };
            config.start = start.or(config.start);
            config.count = count.unwrap_or(config.count);
            config.seed = seed.or(config.seed);
            config.default_loop_bound = max_loop.or(config.default_loop_bound);
            config.separator = separator.unwrap_or(config.separator);
            for (name, value) in replacements {
                config.sequences.remove(&name);
                config.replace.insert(name, value);
            }
            config.validate()?;
            generate(&grammar_files, &config, stats)
        }
        Commands::Reachable {
            grammar_files,
            start,
            dead,
        } => {
            let registry = load_registry(&grammar_files, &GeneratorConfig::default())?;
            if dead {
                for name in registry.unreachable(&start)? {
                    println!("{}", name);
                }
            } else {
                for name in registry.reachable(&start)? {
                    println!("{}", name);
                }
            }
            Ok(())
        }
        Commands::Export {
            grammar_files,
            start,
        } => {
            let registry = load_registry(&grammar_files, &GeneratorConfig::default())?;
            print!("{}", registry.subgrammar(&start)?);
            Ok(())
        }
    }
}

fn generate(
    grammar_files: &[PathBuf],
    config: &GeneratorConfig,
    show_stats: bool,
) -> Result<(), Box<dyn Error>> {
    let start = config.start.as_deref().ok_or("Start symbol required")?;
    let registry = load_registry(grammar_files, config)?;
    let replacer = config.replacer();
    if !replacer.contains(start) {
        registry.ensure_defined(start)?;
    }

    let mut generator = match config.seed {
        Some(seed) => Generator::with_seed(&registry, &replacer, seed),
        None => Generator::new(&registry, &replacer),
    };
    let mut stats = ExpansionStats::new();
    let mut failures = 0;

    for i in 0..config.count {
        let tokens = (0..config.max_attempts)
            .find_map(|_| generator.generate_observed(start, &mut stats));
        match tokens {
            Some(tokens) => println!("{}", tokens.join(&config.separator)),
            None => {
                failures += 1;
                warn!(
                    "output {} of {} reached a dead end {} times in a row",
                    i + 1,
                    start,
                    config.max_attempts
                );
            }
        }
    }

    if show_stats {
        eprintln!(
            "{} productions entered, {} dead ends",
            stats.total_entries(),
            stats.total_dead_ends()
        );
        for (name, count) in stats.top_dead_ends(20) {
            eprintln!("{:>8}  {}", count, name);
        }
    }

    if config.count > 0 && failures == config.count {
        return Err(format!("no expansion of `{}` completed; try raising loop bounds", start).into());
    }
    Ok(())
}

fn load_registry(
    grammar_files: &[PathBuf],
    config: &GeneratorConfig,
) -> Result<Registry, Box<dyn Error>> {
    let productions = parse_files(grammar_files)?;
    let registry = config
        .apply(GrammarBuilder::new().productions(productions))
        .build()?;
    info!(
        "loaded {} productions from {} file(s)",
        registry.len(),
        grammar_files.len()
    );
    Ok(registry)
}

fn parse_replacement(arg: &str) -> Result<(String, String), String> {
    arg.split_once('=')
        .map(|(name, value)| (name.trim().to_string(), value.to_string()))
        .filter(|(name, _)| !name.is_empty())
        .ok_or_else(|| format!("expected NAME=VALUE, got `{}`", arg))
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
