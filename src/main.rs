use clap::{CommandFactory, Parser};
use clap_complete::aot::generate;
use proxyme::cli::{Cli, Commands};
use proxyme::commands;

#[tokio::main]
async fn main() {
    // Initialize tracing subscriber with env-filter support.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let config_file = cli.global.config_file.as_deref();

    let result = match cli.command {
        Commands::Start => commands::start::run(config_file).await,
        Commands::Stop => commands::stop::run(config_file).await,
        Commands::Restart => commands::restart::run(config_file),
        Commands::Status => commands::status::run(config_file).await,
        Commands::Install { force } => commands::install::run(config_file, force).await,
        Commands::Doctor => commands::doctor::run(config_file).await,
        Commands::Generate => commands::generate::run(config_file),
        Commands::Validate => commands::validate::run(config_file),
        Commands::Logs { lines } => commands::logs::run(config_file, lines),
        Commands::Init => commands::init::run(),
        Commands::Completions { shell } => {
            generate(shell, &mut Cli::command(), "proxyme", &mut std::io::stdout());
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
