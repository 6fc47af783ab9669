use std::{collections::BTreeMap, net::SocketAddr, path::PathBuf};

use clap::{Parser, Subcommand};
use http::{HeaderName, HeaderValue};
use remote_ip::{
    config::Config,
    forwarded::{Exchange, RemoteIpResolver},
    middleware::{ForwardedRequest, RemoteIpState},
    observability::init_tracing,
    routes,
};
use serde::Serialize;
use tower_http::trace::TraceLayer;

#[derive(Parser, Debug)]
#[command(version, about = "Forwarded-chain client address resolver", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Path to config file (defaults are used when omitted)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start an echo server that reports the resolved view at /whoami
    Serve,
    /// Resolve a single request offline
    Resolve {
        /// Address of the connecting peer
        #[arg(long)]
        peer: String,
        /// Request header as "Name: value" (repeatable)
        #[arg(long = "header", short = 'H')]
        headers: Vec<String>,
        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => match Config::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Failed to load config from {}: {}", path.display(), e);
                std::process::exit(1);
            }
        },
        None => Config::default(),
    };

    if let Err(e) = init_tracing(&config.observability.logging) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    let resolver = match config.resolver() {
        Ok(resolver) => resolver,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    match args.command {
        Command::Serve => run_server(&config, resolver).await,
        Command::Resolve {
            peer,
            headers,
            json,
        } => run_resolve(with_lookup(RemoteIpState::new(resolver)), peer, &headers, json).await,
    }
}

async fn run_server(config: &Config, resolver: RemoteIpResolver) {
    let bind_addr = config.server.bind_addr();
    let state = with_lookup(RemoteIpState::new(resolver)).with_local_addr(bind_addr);
    let app = routes::router(state).layer(TraceLayer::new_for_http());

    let listener = match tokio::net::TcpListener::bind(bind_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            eprintln!("Failed to bind to {}: {}", bind_addr, e);
            std::process::exit(1);
        }
    };

    tracing::info!("Server listening on http://{}", bind_addr);

    if let Err(e) = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    {
        tracing::error!(error = %e, "Server error");
        std::process::exit(1);
    }
}

#[cfg(feature = "dns")]
fn with_lookup(state: RemoteIpState) -> RemoteIpState {
    if !state.resolver().enable_lookups() {
        return state;
    }
    match remote_ip::forwarded::DnsLookup::from_system() {
        Ok(lookup) => state.with_lookup(std::sync::Arc::new(lookup)),
        Err(e) => {
            tracing::warn!(error = %e, "Reverse lookups disabled");
            state
        }
    }
}

#[cfg(not(feature = "dns"))]
fn with_lookup(state: RemoteIpState) -> RemoteIpState {
    if state.resolver().enable_lookups() {
        tracing::warn!(
            "enable_lookups is set but the 'dns' feature is not compiled. \
            Rebuild with: cargo build --features dns"
        );
    }
    state
}

#[derive(Serialize)]
struct ResolveOutput {
    #[serde(flatten)]
    request: ForwardedRequest,
    headers: BTreeMap<String, Vec<String>>,
}

async fn run_resolve(state: RemoteIpState, peer: String, raw_headers: &[String], json: bool) {
    let mut exchange = Exchange::new(peer);
    for raw in raw_headers {
        match parse_header_arg(raw) {
            Some((name, value)) => {
                exchange.headers.append(name, value);
            }
            None => {
                eprintln!("Invalid header {:?}, expected \"Name: value\"", raw);
                std::process::exit(2);
            }
        }
    }

    let resolver = state.resolver();
    let snapshot = match state.lookup() {
        Some(lookup) => resolver.enter_with_lookup(&mut exchange, lookup).await,
        None => resolver.enter(&mut exchange),
    };
    resolver.exit(&mut exchange, snapshot, false);

    let mut headers: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (name, value) in &exchange.headers {
        headers
            .entry(name.to_string())
            .or_default()
            .push(String::from_utf8_lossy(value.as_bytes()).into_owned());
    }
    let output = ResolveOutput {
        request: ForwardedRequest::from(&exchange),
        headers,
    };

    if json {
        match serde_json::to_string_pretty(&output) {
            Ok(s) => println!("{}", s),
            Err(e) => {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        }
        return;
    }

    let request = &output.request;
    println!("remote_addr:  {}", request.remote_addr);
    println!("remote_host:  {}", request.remote_host);
    println!("scheme:       {}", request.scheme);
    println!("secure:       {}", request.secure);
    println!("server_name:  {}", request.server_name);
    println!("server_port:  {}", request.server_port);
    println!("forwarded:    {}", request.forwarded);
    for (name, values) in &output.headers {
        for value in values {
            println!("{}: {}", name, value);
        }
    }
}

fn parse_header_arg(raw: &str) -> Option<(HeaderName, HeaderValue)> {
    let (name, value) = raw.split_once(':')?;
    let name = HeaderName::try_from(name.trim()).ok()?;
    let value = HeaderValue::try_from(value.trim()).ok()?;
    Some((name, value))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
