use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use colored::*;
use resolver_sweep::api::{self, AppState};
use resolver_sweep::{catalog, Exchange, QueryRequest, ServerInventory, Settings};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "resolver-sweep")]
#[command(about = "Compare the answers of hundreds of public DNS resolvers")]
#[command(long_about = "Basically dig, if dig asked hundreds of resolvers at once and collated their answers.")]
#[command(version, args_conflicts_with_subcommands = true, arg_required_else_help = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    #[command(flatten)]
    query: QueryArgs,

    /// Probes per second across all workers
    #[arg(short, long, global = true)]
    rate: Option<u32>,

    /// Number of concurrent workers
    #[arg(long, global = true)]
    threads: Option<usize>,

    /// Settings file (YAML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log probe activity to stderr
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Args, Debug)]
struct QueryArgs {
    /// Domain to look up
    domain: Option<String>,

    /// DNS record type to query
    #[arg(short = 't', long = "type", default_value = "A")]
    record_type: String,

    /// Only ask servers in this two letter country code
    #[arg(short, long)]
    country: Option<String>,

    /// Number of servers to ask
    #[arg(short = 'q', long = "servers")]
    servers: Option<usize>,

    /// Location of the local YAML resolvers file
    #[arg(long)]
    resolverfile: Option<PathBuf>,

    /// Print every server's answer as JSON instead of the summary
    #[arg(long)]
    json: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Rebuild the resolvers file from the public catalog
    ///
    /// Every catalog entry is health checked and only the ones that respond
    /// are written out.
    Update {
        /// URL of the nameserver catalog
        #[arg(long)]
        csvurl: Option<String>,

        #[arg(long)]
        resolverfile: Option<PathBuf>,
    },
    /// Start the HTTP API
    Serve {
        /// Address to bind to. The PORT environment variable takes precedence.
        #[arg(short, long, default_value = ":3000")]
        port: String,

        /// URL of the nameserver catalog, used when no resolvers file is given
        #[arg(long)]
        csvurl: Option<String>,

        /// Pre-validated resolvers file
        #[arg(long)]
        resolverfile: Option<PathBuf>,
    },
    /// Show version information
    Version,
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("warn,resolver_sweep=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {:#}", "error:".red().bold(), e);
            let validation = e
                .downcast_ref::<resolver_sweep::Error>()
                .map_or(false, |e| e.is_validation());
            ExitCode::from(if validation { 2 } else { 1 })
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut settings = match &cli.config {
        Some(path) => Settings::from_file(path)
            .with_context(|| format!("loading settings from {}", path.display()))?,
        None => Settings::default(),
    };
    if let Some(rate) = cli.rate {
        settings.probe.rate = Some(rate);
    }
    if let Some(threads) = cli.threads {
        settings.probe.threads = threads;
        settings.query.threads = threads;
    }

    match cli.command {
        Some(Command::Update {
            csvurl,
            resolverfile,
        }) => {
            let url = csvurl.unwrap_or_else(|| settings.catalog_url.clone());
            let path = resolverfile.unwrap_or_else(|| settings.resolver_file.clone());
            update(&settings, &url, &path).await
        }
        Some(Command::Serve {
            port,
            csvurl,
            resolverfile,
        }) => {
            let url = csvurl.unwrap_or_else(|| settings.catalog_url.clone());
            serve(&settings, &port, &url, resolverfile).await
        }
        Some(Command::Version) => {
            version();
            Ok(())
        }
        None => query(&settings, cli.query).await,
    }
}

async fn query(settings: &Settings, args: QueryArgs) -> anyhow::Result<()> {
    let domain = args.domain.context("a domain to look up is required")?;
    let path = args
        .resolverfile
        .unwrap_or_else(|| settings.resolver_file.clone());

    let inventory = ServerInventory::from_file(&path)
        .with_context(|| format!("loading resolvers from {}", path.display()))?;

    let request = QueryRequest {
        domain,
        record_type: Some(args.record_type),
        country: args.country,
        servers: args.servers,
    };
    let (query, servers) = request.plan(&inventory, settings.query.limits())?;

    if !args.json {
        eprintln!(
            "{} {} {} records from {} servers",
            "▶".green().bold(),
            query.domain().yellow(),
            query.record_type().to_string().cyan(),
            servers.len()
        );
    }

    // Ctrl-C stops new lookups; whatever already came back is still shown.
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            token.cancel();
        }
    });

    let start = Instant::now();
    let engine = settings.query.engine(&settings.probe);
    let exchanger = Arc::new(settings.probe.exchanger());
    let result = query
        .execute_until_cancelled(&servers, &engine, &exchanger, cancel)
        .await;

    if args.json {
        println!("{}", result.to_json()?);
    } else {
        print!("{}", result.to_text_summary(&query));
        eprintln!("{} {:.2?}", "Total time:".dimmed(), start.elapsed());
    }

    Ok(())
}

async fn fetch_and_validate(settings: &Settings, url: &str) -> anyhow::Result<(usize, ServerInventory)> {
    let candidates = catalog::fetch(url)
        .await
        .with_context(|| format!("fetching nameserver catalog from {}", url))?;

    println!(
        "{} {} nameservers",
        "▶ Testing".green().bold(),
        candidates.len()
    );

    let exchanger = Arc::new(settings.probe.exchanger());
    let working = candidates
        .validate(&settings.probe.engine(), &exchanger)
        .await;
    Ok((candidates.len(), working))
}

async fn update(settings: &Settings, url: &str, path: &std::path::Path) -> anyhow::Result<()> {
    let start = Instant::now();
    let (tested, working) = fetch_and_validate(settings, url).await?;

    working
        .persist(path)
        .with_context(|| format!("saving resolvers to {}", path.display()))?;

    println!(
        "  {} Updated {}: {} active, {} disabled",
        "✓".green().bold(),
        path.display().to_string().yellow(),
        working.len().to_string().green(),
        (tested - working.len()).to_string().red()
    );
    println!("{} {:.2?}", "Total time:".dimmed(), start.elapsed());
    Ok(())
}

async fn serve(
    settings: &Settings,
    port: &str,
    url: &str,
    resolverfile: Option<PathBuf>,
) -> anyhow::Result<()> {
    let inventory = match resolverfile {
        Some(path) => ServerInventory::from_file(&path)
            .with_context(|| format!("loading resolvers from {}", path.display()))?,
        None => fetch_and_validate(settings, url).await?.1,
    };

    let addr = bind_address(port, std::env::var("PORT").ok());

    let exchanger: Arc<dyn Exchange> = Arc::new(settings.probe.exchanger());
    let state = AppState::new(
        inventory,
        exchanger,
        settings.query.limits(),
        settings.query.engine(&settings.probe),
    );

    println!(
        "{} {} with {} nameservers",
        "▶ Listening on".green().bold(),
        addr.cyan(),
        state.inventory.len()
    );

    api::serve(&addr, state)
        .await
        .with_context(|| format!("serving on {}", addr))
}

/// `PORT` from the environment wins over the `--port` flag.
fn bind_address(flag: &str, env_port: Option<String>) -> String {
    match env_port.filter(|p| !p.trim().is_empty()) {
        Some(port) => listen_address(&port),
        None => listen_address(flag),
    }
}

/// Accept `:3000` and bare `3000` as well as `host:port`.
fn listen_address(port: &str) -> String {
    let port = port.trim();
    if let Some(rest) = port.strip_prefix(':') {
        format!("0.0.0.0:{}", rest)
    } else if port.chars().all(|c| c.is_ascii_digit()) {
        format!("0.0.0.0:{}", port)
    } else {
        port.to_string()
    }
}

fn version() {
    println!("{}", env!("CARGO_PKG_NAME").bold().cyan());
    println!("  {:<12}: {}", "version", env!("CARGO_PKG_VERSION"));
    println!(
        "  {:<12}: {}/{}",
        "platform",
        std::env::consts::OS,
        std::env::consts::ARCH
    );
    println!(
        "  {:<12}: {}",
        "build",
        if cfg!(debug_assertions) { "debug" } else { "release" }
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listen_address() {
        assert_eq!(listen_address(":3000"), "0.0.0.0:3000");
        assert_eq!(listen_address("8080"), "0.0.0.0:8080");
        assert_eq!(listen_address("127.0.0.1:9000"), "127.0.0.1:9000");
    }

    #[test]
    fn test_port_env_overrides_flag() {
        assert_eq!(bind_address(":3000", Some("8080".into())), "0.0.0.0:8080");
        assert_eq!(bind_address(":3000", Some("  ".into())), "0.0.0.0:3000");
        assert_eq!(bind_address("127.0.0.1:9000", None), "127.0.0.1:9000");
    }

    #[test]
    fn test_cli_parses_query() {
        let cli = Cli::try_parse_from([
            "resolver-sweep",
            "example.com",
            "-t",
            "MX",
            "-c",
            "GB",
            "-q",
            "20",
            "-r",
            "100",
        ])
        .unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.query.domain.as_deref(), Some("example.com"));
        assert_eq!(cli.query.record_type, "MX");
        assert_eq!(cli.query.servers, Some(20));
        assert_eq!(cli.rate, Some(100));
    }

    #[test]
    fn test_cli_parses_subcommands() {
        let cli = Cli::try_parse_from(["resolver-sweep", "update", "--csvurl", "http://x/ns.csv"]).unwrap();
        assert!(matches!(cli.command, Some(Command::Update { csvurl: Some(_), .. })));

        let cli = Cli::try_parse_from(["resolver-sweep", "serve", "-p", ":8053", "--threads", "10"]).unwrap();
        assert!(matches!(cli.command, Some(Command::Serve { ref port, .. }) if port == ":8053"));
        assert_eq!(cli.threads, Some(10));
    }

    #[test]
    fn test_cli_debug_assert() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
