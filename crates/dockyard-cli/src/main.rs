mod commands;
mod report;

use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use commands::EXIT_FAILURE;
use dockyard_core::{install_signal_handler, ResourceScope, Shutdown};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

#[derive(Debug, Parser)]
#[command(
    name = "dockyard",
    version,
    about = "Run declarative integration-test suites in ephemeral container environments",
    args_conflicts_with_subcommands = true
)]
struct Cli {
    /// Show unit lifecycle progress and info-level logs.
    #[arg(short, long, default_value_t = false, global = true)]
    verbose: bool,

    /// Enable debug-level logging (more detailed than --verbose).
    #[arg(long, default_value_t = false, global = true)]
    debug: bool,

    /// Arguments for `run` when no subcommand is given.
    #[command(flatten)]
    run: RunArgs,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Clone, Args)]
struct RunArgs {
    /// Comma-separated suite filters: exact name, `prefix*` or `*suffix`.
    #[arg(long)]
    suite: Option<String>,
    /// Run suites concurrently.
    #[arg(long, default_value_t = false)]
    parallel: bool,
    /// Write an HTML report to this path.
    #[arg(long, value_name = "PATH")]
    html: Option<PathBuf>,
    /// Write a JSON report to this path.
    #[arg(long, value_name = "PATH")]
    json: Option<PathBuf>,
    /// Directory searched for `*.suite.toml` files and `dockyard.toml`.
    #[arg(long, default_value = ".")]
    base_dir: PathBuf,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Execute all or filtered suites (the default).
    Run(RunArgs),
    /// Parse and validate suites without starting containers.
    DryRun {
        /// A single suite file; every discovered suite when omitted.
        file: Option<PathBuf>,
        #[arg(long, default_value = ".")]
        base_dir: PathBuf,
        /// Print results as JSON.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// List suites discoverable under the base directory.
    ListSuites {
        #[arg(long, default_value = ".")]
        base_dir: PathBuf,
        /// Print results as JSON.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Generate a starter suite document from named templates.
    ScaffoldTest {
        /// Suite name; the file is written as `<name>.suite.toml`.
        name: String,
        /// Comma-separated template keys (http, container, postgres, mongo, minio).
        #[arg(long, value_delimiter = ',')]
        tmpl: Vec<String>,
        /// Directory to write the suite into.
        #[arg(long, default_value = ".")]
        out_dir: PathBuf,
        /// Overwrite an existing file.
        #[arg(long, default_value_t = false)]
        force: bool,
        /// Print results as JSON.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Find and remove containers and networks left behind by earlier runs.
    Cleanup {
        /// Which resources to consider: networks, containers or all.
        #[arg(default_value = "all")]
        scope: ResourceScope,
        /// Only report what would be removed.
        #[arg(long, default_value_t = false)]
        dry_run: bool,
        /// Remove without asking for confirmation.
        #[arg(long, default_value_t = false)]
        force: bool,
        /// Ignore the age threshold and consider every untracked resource.
        #[arg(long, default_value_t = false)]
        all: bool,
        /// Only consider resources at least this old (e.g. 30m, 1h30m).
        #[arg(long, value_name = "DURATION")]
        older_than: Option<String>,
        /// Print results as JSON.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Print build metadata.
    Version {
        /// Print results as JSON.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Generate shell completions for bash, zsh, fish, elvish, or powershell.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}

#[allow(clippy::too_many_lines)]
fn main() -> ExitCode {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let msg = info.to_string();
        if msg.contains("Broken pipe")
            || msg.contains("broken pipe")
            || msg.contains("os error 32")
            || msg.contains("failed printing to stdout")
        {
            std::process::exit(0);
        }
        default_hook(info);
    }));

    let cli = Cli::parse();

    let default_level = if cli.debug {
        "debug"
    } else if cli.verbose {
        "info"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("DOCKYARD_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .init();

    let shutdown = Arc::new(Shutdown::new());
    install_signal_handler(shutdown.clone());

    let verbose = cli.verbose || cli.debug;
    let result = match cli.command.unwrap_or(Commands::Run(cli.run)) {
        Commands::Run(args) => commands::run::run(
            &commands::run::RunOptions {
                base_dir: &args.base_dir,
                suite: args.suite.as_deref(),
                parallel: args.parallel,
                html: args.html.as_deref(),
                json: args.json.as_deref(),
                verbose,
            },
            shutdown.token(),
        ),
        Commands::DryRun {
            file,
            base_dir,
            json,
        } => commands::dry_run::run(file.as_deref(), &base_dir, verbose, json),
        Commands::ListSuites { base_dir, json } => commands::list_suites::run(&base_dir, json),
        Commands::ScaffoldTest {
            name,
            tmpl,
            out_dir,
            force,
            json,
        } => commands::scaffold::run(&name, &tmpl, &out_dir, force, json),
        Commands::Cleanup {
            scope,
            dry_run,
            force,
            all,
            older_than,
            json,
        } => commands::cleanup::run(
            &commands::cleanup::CleanupOptions {
                scope,
                dry_run,
                force,
                include_all: all,
                older_than: older_than.as_deref(),
                verbose,
                json,
            },
            &shutdown.token(),
        ),
        Commands::Version { json } => commands::version::run(json),
        Commands::Completions { shell } => commands::completions::run::<Cli>(shell),
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(msg) => {
            eprintln!("error: {msg}");
            ExitCode::from(EXIT_FAILURE)
        }
    }
}
