//! Command-line interface for the `docmesh` binary.

use crate::render;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use docmesh_repl::config::is_valid_database_name;
use docmesh_repl::{
    ClusterConfig, ConflictResolver, ConflictScanner, ConsistencyMonitor, ReplError,
    ReplicationTopologyManager,
};
use docmesh_store::http::DEFAULT_TIMEOUT;
use docmesh_store::{Connector, HttpConnector, Node, StoreClient};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Top-level arguments.
#[derive(Parser, Debug)]
#[command(name = "docmesh", version)]
#[command(about = "Conflict resolution and consistency monitoring for a replicated document store", long_about = None)]
pub struct Cli {
    /// Cluster configuration file (.toml or .json).
    #[arg(long, global = true, env = "DOCMESH_CONFIG", default_value = "docmesh.toml")]
    pub config: PathBuf,

    /// User name, overriding the configuration file.
    #[arg(long, global = true, env = "DOCMESH_USER")]
    pub user: Option<String>,

    /// Password, overriding the configuration file.
    #[arg(long, global = true, env = "DOCMESH_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Subcommand to run.
    #[command(subcommand)]
    pub command: Command,
}

/// Operator subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// List or resolve conflicted documents.
    Resolve {
        /// Logical database.
        #[arg(short, long)]
        database: String,
        /// Resolve only this document.
        #[arg(long)]
        doc: Option<String>,
        /// List conflicted documents instead of resolving them. With
        /// `--doc`, show that document's conflicting revisions.
        #[arg(short, long)]
        list: bool,
        /// Re-check documents after resolution.
        #[arg(short, long)]
        verbose: bool,
        /// Node to operate on, by id or URL. Defaults to the first node.
        #[arg(long)]
        node: Option<String>,
    },
    /// Report cluster consistency once or continuously.
    Monitor {
        /// Seconds between rounds in continuous mode.
        #[arg(short, long)]
        interval: Option<u64>,
        /// Keep running until interrupted.
        #[arg(short, long)]
        continuous: bool,
        /// Only this logical database.
        #[arg(short, long)]
        database: Option<String>,
        /// Include deleted counts and disk and data sizes.
        #[arg(short, long)]
        verbose: bool,
        /// Divergent rounds before a database is reported stuck.
        #[arg(long)]
        stuck_after: Option<u32>,
    },
    /// Wait for nodes, create databases and declare the replication mesh.
    Setup {
        /// Also list every established link.
        #[arg(short, long)]
        verbose: bool,
    },
    /// Audit the replication mesh and document counts.
    Verify {
        /// Also list present links and per-database sizes.
        #[arg(short, long)]
        verbose: bool,
    },
}

impl Cli {
    /// Whether the selected subcommand asked for verbose output.
    pub fn verbose(&self) -> bool {
        match self.command {
            Command::Resolve { verbose, .. }
            | Command::Monitor { verbose, .. }
            | Command::Setup { verbose }
            | Command::Verify { verbose } => verbose,
        }
    }

    /// True for commands that run until interrupted.
    pub fn is_continuous(&self) -> bool {
        matches!(self.command, Command::Monitor { continuous: true, .. })
    }

    /// Load the configuration file, or the built-in layout when it does not
    /// exist, then apply credential overrides and validate.
    pub fn load_config(&self) -> Result<ClusterConfig> {
        let mut config = if self.config.exists() {
            ClusterConfig::from_file(&self.config)?
        } else {
            tracing::warn!(
                "Config file not found, using built-in cluster layout: {}",
                self.config.display()
            );
            ClusterConfig::default()
        };
        if let Some(ref user) = self.user {
            config.credentials.username = user.clone();
        }
        if let Some(ref password) = self.password {
            config.credentials.password = Some(password.clone());
        }
        config.validate()?;
        Ok(config)
    }

    /// Load configuration, connect over HTTP and run the command.
    pub async fn run(self, token: CancellationToken) -> Result<()> {
        let config = self.load_config()?;
        if config.credentials.password.is_none() {
            tracing::warn!("no password configured; set DOCMESH_PASSWORD or --password");
        }
        let connector = HttpConnector::new(config.credentials.clone(), DEFAULT_TIMEOUT)
            .context("cannot build HTTP client")?;
        self.execute(&config, Arc::new(connector), token).await
    }

    /// Run the command against an already loaded configuration.
    pub async fn execute(
        &self,
        config: &ClusterConfig,
        connector: Arc<dyn Connector>,
        token: CancellationToken,
    ) -> Result<()> {
        match self.command {
            Command::Resolve {
                ref database,
                ref doc,
                list,
                verbose,
                ref node,
            } => {
                self.resolve(config, connector, database, doc.as_deref(), list, verbose, node.as_deref())
                    .await
            }
            Command::Monitor {
                interval,
                continuous,
                ref database,
                verbose,
                stuck_after,
            } => {
                let interval = interval
                    .map(Duration::from_secs)
                    .unwrap_or_else(|| config.monitor.interval());
                let stuck_after = stuck_after.unwrap_or(config.monitor.stuck_after_rounds);
                self.monitor(config, connector, token, interval, continuous, database.as_deref(), verbose, stuck_after)
                    .await
            }
            Command::Setup { verbose } => self.setup(config, connector, verbose).await,
            Command::Verify { verbose } => self.verify(config, connector, verbose).await,
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn resolve(
        &self,
        config: &ClusterConfig,
        connector: Arc<dyn Connector>,
        database: &str,
        doc: Option<&str>,
        list: bool,
        verbose: bool,
        node: Option<&str>,
    ) -> Result<()> {
        if !is_valid_database_name(database) {
            anyhow::bail!("invalid database name: {}", database);
        }
        let client = connect_target(config, connector.as_ref(), node).await?;

        if list {
            match doc {
                Some(doc_id) => match client.fetch_with_conflicts(database, doc_id).await {
                    Ok(snapshot) => render::print_document_conflicts(database, &snapshot),
                    Err(e) => match ReplError::from(e) {
                        e @ ReplError::Connection { .. } => return Err(e.into()),
                        e => println!("{}/{}: {}", database, doc_id, e),
                    },
                },
                None => {
                    let scanner = ConflictScanner::new(client, config.scan.concurrency);
                    render::print_conflict_list(&scanner.scan(database).await?);
                }
            }
            return Ok(());
        }

        if let Some(doc_id) = doc {
            let resolver = ConflictResolver::new(client);
            match resolver.resolve(database, doc_id).await {
                Ok(resolution) => render::print_resolution(&resolution),
                Err(e @ ReplError::Connection { .. }) => return Err(e.into()),
                Err(e) => {
                    println!("{}/{}: {}", database, doc_id, e);
                    return Ok(());
                }
            }
            if verbose {
                let remaining = resolver.remaining_conflicts(database, doc_id).await?;
                if remaining.is_empty() {
                    println!("verified: {}/{} has no conflicts", database, doc_id);
                } else {
                    println!(
                        "{}/{} still has {} conflict(s), a concurrent write landed; rerun later",
                        database,
                        doc_id,
                        remaining.len()
                    );
                }
            }
            return Ok(());
        }

        let scanner = ConflictScanner::new(client.clone(), config.scan.concurrency);
        let scan = scanner.scan(database).await?;
        if scan.is_clean() {
            render::print_conflict_list(&scan);
            return Ok(());
        }

        let resolver = ConflictResolver::new(client);
        let summary = resolver.resolve_all(&scan).await;
        if verbose {
            for resolution in &summary.resolutions {
                render::print_resolution(resolution);
            }
        }
        render::print_resolve_summary(&scan, &summary);
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn monitor(
        &self,
        config: &ClusterConfig,
        connector: Arc<dyn Connector>,
        token: CancellationToken,
        interval: Duration,
        continuous: bool,
        database: Option<&str>,
        verbose: bool,
        stuck_after: u32,
    ) -> Result<()> {
        let databases = match database {
            Some(db) => vec![db.to_string()],
            None => config.databases.clone(),
        };
        let mut monitor =
            ConsistencyMonitor::new(connector, config.nodes.clone(), databases, stuck_after)?;

        if continuous {
            tracing::info!(interval_secs = interval.as_secs(), "starting continuous monitoring");
            let rounds = monitor
                .run(token, interval, |report| render::print_consistency(report, verbose))
                .await;
            println!("Stopped after {} round(s)", rounds);
        } else {
            let report = monitor.check().await;
            render::print_consistency(&report, verbose);
        }
        Ok(())
    }

    async fn setup(
        &self,
        config: &ClusterConfig,
        connector: Arc<dyn Connector>,
        verbose: bool,
    ) -> Result<()> {
        let topology = ReplicationTopologyManager::new(connector, config.credentials.clone());

        let readiness = topology
            .wait_for_nodes(
                &config.nodes,
                config.setup.wait_retries,
                Duration::from_millis(config.setup.wait_delay_ms),
            )
            .await;
        render::print_readiness(&readiness);

        let ready: Vec<Node> = config
            .nodes
            .iter()
            .filter(|n| readiness.ready.iter().any(|(id, _)| *id == n.id))
            .cloned()
            .collect();
        if !ready.is_empty() {
            let databases = topology.ensure_databases(&ready, &config.databases).await?;
            render::print_database_setup(&databases);
        }

        let report = topology
            .establish_full_mesh(&config.nodes, &config.databases)
            .await?;
        render::print_mesh_report(&report, verbose);
        Ok(())
    }

    async fn verify(
        &self,
        config: &ClusterConfig,
        connector: Arc<dyn Connector>,
        verbose: bool,
    ) -> Result<()> {
        let topology = ReplicationTopologyManager::new(connector.clone(), config.credentials.clone());
        let audit = topology.audit_mesh(&config.nodes, &config.databases).await?;
        render::print_mesh_audit(&audit, verbose);

        let mut monitor = ConsistencyMonitor::new(
            connector,
            config.nodes.clone(),
            config.databases.clone(),
            config.monitor.stuck_after_rounds,
        )?;
        let report = monitor.check().await;
        render::print_consistency(&report, verbose);
        Ok(())
    }
}

/// Pick the node named by `--node` (id or URL), or the first configured
/// node, and make sure it answers. An unreachable target is fatal.
async fn connect_target(
    config: &ClusterConfig,
    connector: &dyn Connector,
    selector: Option<&str>,
) -> Result<Arc<dyn StoreClient>> {
    let node = match selector {
        Some(sel) => config
            .node(sel)
            .or_else(|| {
                config
                    .nodes
                    .iter()
                    .find(|n| n.url.trim_end_matches('/') == sel.trim_end_matches('/'))
            })
            .with_context(|| format!("unknown node: {}", sel))?,
        None => config.nodes.first().context("no nodes configured")?,
    };
    let client = connector.connect(node)?;
    let status = client.node_health().await?;
    if !status.reachable {
        return Err(ReplError::Connection {
            node: node.id.clone(),
            msg: format!("{} is unreachable", node.url),
        }
        .into());
    }
    tracing::debug!(node = %node.id, label = node.label(), version = ?status.version, "target node reachable");
    Ok(client)
}
