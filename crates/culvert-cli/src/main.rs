//! culvert CLI
//!
//! One-shot HTTP requests against services that listen on named pipes
//! instead of TCP. Service names are mapped to pipe paths with `--map` or
//! a config file, then addressed as `http+pipe://NAME/PATH`.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use bytes::Bytes;
use clap::{Args, Parser, Subcommand};
use http::header::{HeaderName, HeaderValue};
use http::{Method, Request};
use tokio::io::AsyncWriteExt;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use culvert::Transport;

mod config;

use config::ConfigFile;

#[derive(Parser)]
#[command(name = "culvert")]
#[command(author, version, about = "HTTP client for services behind named pipes")]
#[command(propagate_version = true)]
struct Cli {
    /// Map a service name to a pipe path (repeatable)
    #[arg(short, long, global = true, value_name = "NAME=PATH")]
    map: Vec<String>,

    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Dial timeout in seconds
    #[arg(long, global = true, value_name = "SECS", env = "CULVERT_DIAL_TIMEOUT")]
    dial_timeout: Option<u64>,

    /// Request write timeout in seconds
    #[arg(long, global = true, value_name = "SECS", env = "CULVERT_REQUEST_TIMEOUT")]
    request_timeout: Option<u64>,

    /// Response header timeout in seconds
    #[arg(
        long,
        global = true,
        value_name = "SECS",
        env = "CULVERT_RESPONSE_HEADER_TIMEOUT"
    )]
    response_header_timeout: Option<u64>,

    /// Include the status line and headers in the output
    #[arg(short, long, global = true)]
    include: bool,

    /// Enable verbose output
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Request a URL with GET
    Get {
        #[command(flatten)]
        request: RequestArgs,
    },

    /// Request a URL with HEAD and print the response head
    Head {
        #[command(flatten)]
        request: RequestArgs,
    },

    /// Request a URL with an arbitrary method and optional body
    Request {
        /// HTTP method
        #[arg(short = 'X', long, default_value = "GET")]
        method: String,

        /// Request body
        #[arg(short, long)]
        data: Option<String>,

        #[command(flatten)]
        request: RequestArgs,
    },
}

#[derive(Args)]
struct RequestArgs {
    /// Target URL, e.g. http+pipe://engine/v1/info
    url: String,

    /// Add a request header (repeatable)
    #[arg(short = 'H', long = "header", value_name = "NAME: VALUE")]
    headers: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    let log_level = match (cli.quiet, cli.verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "info",
        (false, 2) => "debug",
        (false, _) => "trace",
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let config = match &cli.config {
        Some(path) => ConfigFile::load(path)?,
        None => ConfigFile::default(),
    };

    let transport = build_transport(&cli, &config)?;

    let (request, print_head) = match &cli.command {
        Commands::Get { request } => (build_request(Method::GET, request, None)?, cli.include),
        Commands::Head { request } => (build_request(Method::HEAD, request, None)?, true),
        Commands::Request {
            method,
            data,
            request,
        } => {
            let method = Method::from_bytes(method.to_uppercase().as_bytes())
                .with_context(|| format!("Invalid HTTP method: {}", method))?;
            (build_request(method, request, data.clone())?, cli.include)
        }
    };

    execute(&transport, request, print_head).await
}

/// Merge config-file and command-line service mappings (the command line
/// wins), then register each name once on a fresh transport.
fn build_transport(cli: &Cli, config: &ConfigFile) -> Result<Transport> {
    let mut services: HashMap<String, String> = config.services.clone();
    for mapping in &cli.map {
        let (name, path) = mapping
            .split_once('=')
            .with_context(|| format!("Invalid --map value (expected NAME=PATH): {}", mapping))?;
        if name.is_empty() || path.is_empty() {
            bail!("Invalid --map value (expected NAME=PATH): {}", mapping);
        }
        if services
            .insert(name.to_string(), path.to_string())
            .is_some()
        {
            tracing::debug!("Service {} overridden from the command line", name);
        }
    }
    if services.is_empty() {
        bail!("No services mapped; use --map NAME=PATH or a config file");
    }

    let mut transport = Transport::new();
    if let Some(timeout) = cli
        .dial_timeout
        .map(Duration::from_secs)
        .or(config.timeouts.dial)
    {
        transport = transport.with_dial_timeout(timeout);
    }
    if let Some(timeout) = cli
        .request_timeout
        .map(Duration::from_secs)
        .or(config.timeouts.request)
    {
        transport = transport.with_request_timeout(timeout);
    }
    if let Some(timeout) = cli
        .response_header_timeout
        .map(Duration::from_secs)
        .or(config.timeouts.response_header)
    {
        transport = transport.with_response_header_timeout(timeout);
    }

    for (name, path) in &services {
        transport.register_service(name, path);
    }
    Ok(transport)
}

fn build_request(
    method: Method,
    args: &RequestArgs,
    data: Option<String>,
) -> Result<Request<Bytes>> {
    let mut builder = Request::builder().method(method).uri(args.url.as_str());
    for header in &args.headers {
        let (name, value) = header
            .split_once(':')
            .with_context(|| format!("Invalid header (expected 'NAME: VALUE'): {}", header))?;
        let name: HeaderName = name
            .trim()
            .parse()
            .with_context(|| format!("Invalid header name: {}", name))?;
        let value: HeaderValue = value
            .trim()
            .parse()
            .with_context(|| format!("Invalid header value for {}", name))?;
        builder = builder.header(name, value);
    }

    let body = data.map(|data| Bytes::from(data.into_bytes())).unwrap_or_default();
    builder
        .body(body)
        .with_context(|| format!("Invalid request for {}", args.url))
}

async fn execute(transport: &Transport, request: Request<Bytes>, print_head: bool) -> Result<()> {
    let url = request.uri().to_string();
    let response = transport
        .round_trip(request)
        .await
        .with_context(|| format!("Request to {} failed", url))?;

    let mut stdout = tokio::io::stdout();
    if print_head {
        let mut head = format!("{:?} {}\r\n", response.version(), response.status());
        for (name, value) in response.headers() {
            head.push_str(name.as_str());
            head.push_str(": ");
            head.push_str(&String::from_utf8_lossy(value.as_bytes()));
            head.push_str("\r\n");
        }
        head.push_str("\r\n");
        stdout.write_all(head.as_bytes()).await?;
    }

    let mut body = response.into_body();
    tokio::io::copy(&mut body, &mut stdout)
        .await
        .context("Failed to stream response body")?;
    stdout.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).unwrap()
    }

    #[test]
    fn test_map_flags_override_config_services() {
        let cli = cli(&[
            "culvert",
            "--map",
            "engine=/run/cli.sock",
            "get",
            "http+pipe://engine/",
        ]);
        let mut config = ConfigFile::default();
        config
            .services
            .insert("engine".to_string(), "/run/file.sock".to_string());
        config
            .services
            .insert("metrics".to_string(), "/run/metrics.sock".to_string());

        // Both names register exactly once each; a duplicate would panic.
        let transport = build_transport(&cli, &config).unwrap();
        drop(transport);
    }

    #[test]
    fn test_malformed_map_rejected() {
        let cli = cli(&["culvert", "--map", "engine", "get", "http+pipe://engine/"]);
        let err = build_transport(&cli, &ConfigFile::default()).unwrap_err();
        assert!(err.to_string().contains("expected NAME=PATH"));
    }

    #[test]
    fn test_no_services_rejected() {
        let cli = cli(&["culvert", "get", "http+pipe://engine/"]);
        let err = build_transport(&cli, &ConfigFile::default()).unwrap_err();
        assert!(err.to_string().contains("No services mapped"));
    }

    #[test]
    fn test_request_headers_parsed() {
        let args = RequestArgs {
            url: "http+pipe://engine/v1/exec".to_string(),
            headers: vec!["Accept: application/json".to_string()],
        };
        let request = build_request(Method::POST, &args, Some("payload".to_string())).unwrap();
        assert_eq!(request.headers()["accept"], "application/json");
        assert_eq!(request.body().as_ref(), b"payload");
    }

    #[test]
    fn test_invalid_header_rejected() {
        let args = RequestArgs {
            url: "http+pipe://engine/".to_string(),
            headers: vec!["no-colon-here".to_string()],
        };
        let err = build_request(Method::GET, &args, None).unwrap_err();
        assert!(err.to_string().contains("Invalid header"));
    }
}
