//! Cluster probe entry point
//!
//! Seeds a cluster, prints the discovered nodes and, with `--watch`, keeps
//! tending and logging every cycle until interrupted.

use anyhow::{Context, Result};
use clap::Parser;
use client_config::{defaults, ClientPolicy};
use cluster::{Cluster, ClusterConfigListener, ClusterServices, Host, TendReport};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Seed hosts, `host[:tls_name]:port` separated by commas
    #[arg(long, default_value = "127.0.0.1:3000")]
    hosts: String,

    /// Client policy file
    #[arg(short, long)]
    policy: Option<PathBuf>,

    /// Environment overlay for the policy file
    #[arg(short, long)]
    env: Option<String>,

    /// Keep tending and report each cycle
    #[arg(long)]
    watch: bool,

    /// Emit JSON logs
    #[arg(long)]
    json: bool,
}

/// Logs membership changes as the cluster sees them
struct MembershipLogger;

impl ClusterConfigListener for MembershipLogger {
    fn on_cluster_config_changed(&self, cluster: &Cluster) {
        let nodes = cluster.nodes();
        let names: Vec<&str> = nodes.iter().map(|n| n.name()).collect();
        info!(count = nodes.len(), nodes = ?names, "Cluster membership changed");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.json);

    info!("Starting cluster probe");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let policy = match &args.policy {
        Some(path) => ClientPolicy::load(Some(path.as_path()), args.env.as_deref())
            .with_context(|| format!("Failed to load policy from {}", path.display()))?,
        None => ClientPolicy::default(),
    };
    let seeds = Host::parse(&args.hosts, defaults::DEFAULT_PORT).context("Invalid --hosts")?;

    let cluster = Cluster::new(policy, seeds, ClusterServices::new())?;
    cluster.add_cluster_config_change_listener(Arc::new(MembershipLogger));
    cluster.connect().await?;

    print_nodes(&cluster);

    if args.watch {
        tokio::select! {
            _ = watch(&cluster) => {}
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    warn!(error = %e, "Failed to listen for shutdown signal");
                }
                info!("Shutdown signal received");
            }
        }
    }

    cluster.close().await;
    Ok(())
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "cluster=info,cluster_probe=info,warn".into());

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Tend on the policy interval and log what each cycle did
async fn watch(cluster: &Arc<Cluster>) {
    let mut interval = tokio::time::interval(cluster.policy().tend_interval());
    interval.tick().await;

    loop {
        interval.tick().await;
        match cluster.tend().await {
            Ok(report) => log_report(&report),
            Err(e) => {
                warn!(error = %e, "Tend failed");
                if cluster.is_closed() {
                    break;
                }
            }
        }
    }
}

fn log_report(report: &TendReport) {
    for failure in &report.failures {
        warn!(
            node = %failure.node,
            step = %failure.step,
            category = failure.category,
            "{}",
            failure.message
        );
    }
    info!(
        nodes = report.nodes,
        responded = report.responded,
        failures = report.failures.len(),
        added = ?report.added,
        removed = ?report.removed,
        "Tend cycle"
    );
}

fn print_nodes(cluster: &Cluster) {
    let nodes = cluster.nodes();
    println!("{:<20} {:<24} {:<7} {:>6} {:>6}  ALIASES", "NAME", "HOST", "ACTIVE", "HEALTH", "PEERS");
    for node in nodes.iter() {
        let aliases: Vec<String> = node.aliases().iter().map(ToString::to_string).collect();
        println!(
            "{:<20} {:<24} {:<7} {:>6} {:>6}  {}",
            node.name(),
            node.host().to_string(),
            node.is_active(),
            node.health(),
            node.peers_count(),
            aliases.join(",")
        );
    }

    let mut features: Vec<String> = cluster.features().iter().cloned().collect();
    features.sort();
    println!();
    println!("connected: {}  tls: {}", cluster.connected(), cluster.tls_enabled());
    println!("features:  {}", features.join(","));
    println!("namespaces: {}", cluster.partitions().namespaces().collect::<Vec<_>>().join(","));
}
