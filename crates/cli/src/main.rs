use std::str::FromStr;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use tokio::signal;
use tracing::{info, warn};

use remora_api::{Event, Informer};
use remora_core::path;
use remora_kubehub::KubeListWatcher;
use remora_reflect::ListPager;

#[derive(Parser, Debug)]
#[command(name = "remoractl", version, about = "Remora cache CLI")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// Namespace to bind to (default: all namespaces)
    #[arg(long = "ns", global = true)]
    namespace: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output {
    Human,
    Json,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// One-shot paged list for a group/version/kind key
    Ls {
        /// GVK key, e.g. "v1/ConfigMap" or "cert-manager.io/v1/Certificate"
        gvk: String,
    },
    /// Mirror a GVK into a local cache and print change events
    Watch {
        /// GVK key, e.g. "v1/ConfigMap" or "cert-manager.io/v1/Certificate"
        gvk: String,
    },
}

fn init_tracing() {
    let env = std::env::var("REMORA_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("REMORA_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid REMORA_METRICS_ADDR; expected host:port");
        }
    }
}

fn page_limit() -> u32 {
    std::env::var("REMORA_PAGE_LIMIT")
        .ok()
        .and_then(|s| s.parse::<u32>().ok())
        .unwrap_or(remora_reflect::DEFAULT_PAGE_SIZE)
}

fn locate(obj: &serde_json::Value) -> String {
    let name = path::lookup(obj, "metadata.name").and_then(|v| v.as_str()).unwrap_or("?");
    match path::lookup(obj, "metadata.namespace").and_then(|v| v.as_str()) {
        Some(ns) => format!("{}/{}", ns, name),
        None => name.to_string(),
    }
}

fn print_event(output: Output, event: &Event) {
    match output {
        Output::Json => match serde_json::to_string(event) {
            Ok(line) => println!("{}", line),
            Err(e) => warn!(error = %e, "failed to encode event"),
        },
        Output::Human => match event {
            Event::Replace(items) => println!("* REPLACE ({} objects)", items.len()),
            Event::Add(o) => println!("+ {}", locate(o)),
            Event::Update(o) => println!("~ {}", locate(o)),
            Event::Delete(o) => println!("- {}", locate(o)),
        },
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();

    let client = kube::Client::try_default().await?;

    match cli.command {
        Commands::Ls { gvk } => {
            let ns = cli.namespace.as_deref();
            info!(gvk = %gvk, ns = ?ns, "ls invoked");
            let lw = KubeListWatcher::new(client, &gvk, ns).await?;
            let listed = ListPager::new(&lw).page_size(page_limit()).list("").await?;
            match cli.output {
                Output::Human => {
                    for obj in &listed.items {
                        println!("{}", locate(obj));
                    }
                    println!(
                        "{} objects at rv {} ({})",
                        listed.items.len(),
                        listed.resource_version,
                        if listed.paginated { "paginated" } else { "single page" }
                    );
                }
                Output::Json => println!("{}", serde_json::to_string_pretty(&listed.items)?),
            }
        }
        Commands::Watch { gvk } => {
            let ns = cli.namespace.as_deref();
            info!(gvk = %gvk, ns = ?ns, "watch invoked");
            let lw = KubeListWatcher::new(client, &gvk, ns).await?;
            let informer = Informer::new(lw);
            let mut events = informer.subscribe();
            let handle = informer.run();

            informer.synced().await;
            info!(rv = %informer.last_sync_resource_version(), objects = informer.store().len(), "cache primed");

            loop {
                tokio::select! {
                    _ = signal::ctrl_c() => {
                        info!("interrupt received; shutting down");
                        break;
                    }
                    ev = events.recv() => match ev {
                        Some(ev) => print_event(cli.output, &ev),
                        None => break,
                    },
                }
            }
            handle.join().await;
        }
    }
    Ok(())
}
