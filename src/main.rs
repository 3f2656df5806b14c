use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use patent_master::config::{
    find_config_file, get_config, load_config, Config, GCP_CREDENTIALS_VAR, GCP_PROJECT_VAR,
    ODP_API_KEY_VAR,
};
use patent_master::mcp::{McpServer, ToolRegistry};
use patent_master::service::PatentService;
use patent_master::sources::{Source, SourceRegistry};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Patent Master - search and retrieve patents from USPTO and Google Patents over MCP
#[derive(Parser, Debug)]
#[command(name = "patent-master")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(author = "hongkongkiwi")]
#[command(about = "MCP server for USPTO Patent Public Search, the USPTO Open Data Portal and Google Patents", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose logging (-v for debug, -vv for trace)
    #[arg(long, short, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only log errors
    #[arg(long, short, global = true)]
    quiet: bool,

    /// Configuration file path
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the MCP server (stdio unless --http is given)
    Serve {
        /// Serve streamable HTTP on this address instead of stdio
        #[arg(long, value_name = "ADDR")]
        http: Option<String>,
    },

    /// List the available tools
    Tools,

    /// Call one tool and print its JSON result
    Call {
        /// Tool name, e.g. ppubs_search_patents
        tool: String,

        /// Tool arguments as a JSON object
        #[arg(long, default_value = "{}")]
        args: String,
    },

    /// Show the environment variables patent-master reads
    Env,
}

fn print_env_vars() {
    println!("Patent Master - Environment Variables");
    println!();
    println!("Credentials:");
    println!("  {:<32}API key for the USPTO Open Data Portal", ODP_API_KEY_VAR);
    println!("  {:<32}Google Cloud project billed for BigQuery queries", GCP_PROJECT_VAR);
    println!("  {:<32}Service-account key file for BigQuery", GCP_CREDENTIALS_VAR);
    println!();
    println!("Configuration overrides (PATENT_MASTER__<SECTION>__<KEY>):");
    println!("  PATENT_MASTER__PPUBS__BASE_URL          Patent Public Search base URL");
    println!("  PATENT_MASTER__PPUBS__SEARCH_TIMEOUT_SECS  Bound on a ppubs search (default: 120)");
    println!("  PATENT_MASTER__ODP__TIMEOUT_SECS        Bound on an ODP call (default: 30)");
    println!("  PATENT_MASTER__BIGQUERY__DATASET        Publications table (default: patents-public-data.patents.publications)");
    println!("  PATENT_MASTER__RETRY__MAX_ATTEMPTS      Attempts per upstream call (default: 3)");
    println!("  PATENT_MASTER__DOWNLOADS__DEFAULT_PATH  Directory for PDFs and CSV exports (default: ./downloads)");
    println!();
    println!("Other Settings:");
    println!("  RUST_LOG                        Log filter, overrides -v/-q (e.g. patent_master=debug)");
    println!();
    println!("Example:");
    println!("  {}=... patent-master call get_app_metadata --args '{{\"app_num\": \"14412875\"}}'", ODP_API_KEY_VAR);
}

fn init_logging(cli: &Cli) {
    let level = if cli.quiet {
        "error"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| format!("patent_master={}", level)),
    );

    // stdout carries the MCP protocol; logs go to stderr
    let registry = tracing_subscriber::registry().with(filter);
    if cli.log_json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

fn resolve_config(path: Option<&PathBuf>) -> Result<Config> {
    let config = match path {
        Some(path) => load_config(path).with_context(|| format!("loading {}", path.display()))?,
        None => match find_config_file() {
            Some(path) => {
                tracing::info!("Using config file: {}", path.display());
                load_config(&path).with_context(|| format!("loading {}", path.display()))?
            }
            None => get_config().context("reading configuration from the environment")?,
        },
    };
    Ok(config)
}

fn build_tools(config_path: Option<&PathBuf>) -> Result<ToolRegistry> {
    let config = resolve_config(config_path)?;
    let sources = SourceRegistry::from_config(&config).context("initializing sources")?;
    for source in sources.all() {
        tracing::debug!("{} ready: {:?}", source.name(), source.capabilities());
    }
    for (tag, reason) in sources.unavailable() {
        tracing::warn!("{} tools unavailable: {}", tag, reason);
    }
    let service = PatentService::new(Arc::new(sources), &config);
    Ok(ToolRegistry::new(service, config.downloads.default_path.clone()))
}

async fn serve(tools: &ToolRegistry, http: Option<String>) -> Result<()> {
    let server = McpServer::new(tools)?;
    match http {
        Some(addr) => {
            let (bound_addr, handle) = server.run_http(&addr).await?;
            tracing::info!("MCP server listening on {}", bound_addr);
            handle
                .await
                .map_err(|e| anyhow::anyhow!("Server task failed: {}", e))?;
        }
        None => server.run().await?,
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli);
    let config_path = cli.config.as_ref();

    match cli.command {
        Some(Commands::Env) => print_env_vars(),

        Some(Commands::Tools) => {
            let tools = build_tools(config_path)?;
            for tool in tools.all() {
                println!("{:<32} {}", tool.name, tool.description);
            }
        }

        Some(Commands::Call { ref tool, ref args }) => {
            let args: serde_json::Value =
                serde_json::from_str(args).context("--args must be a JSON object")?;
            let tools = build_tools(config_path)?;
            let value = tools.call(tool, args).await;
            println!("{}", serde_json::to_string_pretty(&value)?);
            if value.get("error").and_then(|v| v.as_bool()) == Some(true) {
                std::process::exit(1);
            }
        }

        Some(Commands::Serve { ref http }) => serve(&build_tools(config_path)?, http.clone()).await?,

        None => serve(&build_tools(config_path)?, None).await?,
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_serve_defaults_to_stdio() {
        let cli = Cli::parse_from(["patent-master", "serve"]);
        match &cli.command {
            Some(Commands::Serve { http }) => assert!(http.is_none()),
            _ => panic!("Expected Serve command"),
        }
    }

    #[test]
    fn test_cli_serve_http() {
        let cli = Cli::parse_from(["patent-master", "serve", "--http", "127.0.0.1:3000"]);
        match &cli.command {
            Some(Commands::Serve { http }) => assert_eq!(http.as_deref(), Some("127.0.0.1:3000")),
            _ => panic!("Expected Serve command"),
        }
    }

    #[test]
    fn test_cli_call_with_args() {
        let cli = Cli::parse_from([
            "patent-master",
            "-vv",
            "call",
            "get_app_metadata",
            "--args",
            r#"{"app_num": "14412875"}"#,
        ]);
        assert_eq!(cli.verbose, 2);
        match &cli.command {
            Some(Commands::Call { tool, args }) => {
                assert_eq!(tool, "get_app_metadata");
                assert!(args.contains("14412875"));
            }
            _ => panic!("Expected Call command"),
        }
    }

    #[test]
    fn test_cli_global_flags_after_subcommand() {
        let cli = Cli::parse_from(["patent-master", "tools", "--config", "custom.toml", "--log-json", "-q"]);
        assert!(matches!(cli.command, Some(Commands::Tools)));
        assert_eq!(cli.config, Some(PathBuf::from("custom.toml")));
        assert!(cli.log_json);
        assert!(cli.quiet);
    }

    #[test]
    fn test_cli_env_command() {
        let cli = Cli::parse_from(["patent-master", "env"]);
        assert!(matches!(cli.command, Some(Commands::Env)));
    }
}
