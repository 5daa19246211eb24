//! ethos-mcp: MCP server over the belief-revision core.
//!
//! Serves the tool surface (dissonance checks, SMF consent workflow, sector
//! reclassification, insight writes) over stdio JSON-RPC. Postgres is the
//! durable backend; `--in-memory` runs against the in-process store for
//! local experiments.

mod protocol;
mod server;
mod tools;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use ethos_core::{
    AnthropicClient, AppContext, CostMeter, MemoryStore, PgStore, ProjectScope, Settings,
};

use crate::protocol::stdio::StdioTransport;
use crate::server::McpServer;
use crate::tools::ToolContext;

#[derive(Parser, Debug)]
#[command(name = "ethos-mcp", version, about = "Cognitive knowledge-graph MCP server")]
struct Args {
    /// Path to the YAML settings file
    #[arg(long, default_value = "config/settings.yaml")]
    config: PathBuf,

    /// Project identity scoping every read and write
    #[arg(long, default_value = "ethr_memory")]
    project: String,

    /// Use the in-process store instead of Postgres (local experiments)
    #[arg(long)]
    in_memory: bool,

    /// Emit logs as JSON lines (stderr)
    #[arg(long)]
    log_json: bool,

    /// Maximum Postgres connections
    #[arg(long, default_value_t = 16)]
    max_connections: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // stdout carries the protocol; logs go to stderr
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if args.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }

    let settings = Settings::load(&args.config);
    info!(config = %args.config.display(), project = %args.project, "starting ethos-mcp");

    let context = if args.in_memory {
        let store = Arc::new(MemoryStore::new());
        let meter = Arc::new(CostMeter::new(store.clone(), &settings));
        let llm = Arc::new(
            AnthropicClient::new(&settings, "haiku_classify", store.clone(), meter)
                .context("classifier client construction failed")?,
        );
        AppContext::build(settings, store, llm)
    } else {
        let database_url = std::env::var("DATABASE_URL")
            .context("DATABASE_URL is required unless --in-memory is set")?;
        let store = Arc::new(
            PgStore::connect(&database_url, args.max_connections)
                .await
                .context("postgres connection failed")?,
        );
        let meter = Arc::new(CostMeter::new(store.clone(), &settings));
        let llm = Arc::new(
            AnthropicClient::new(&settings, "haiku_classify", store.clone(), meter)
                .context("classifier client construction failed")?,
        );
        AppContext::build(settings, store, llm)
    };

    let cancel = CancellationToken::new();
    let health = context.spawn_health_monitor(cancel.clone());

    let tool_context = ToolContext {
        app: Arc::new(context),
        scope: ProjectScope::new(args.project),
        cancel: cancel.clone(),
    };
    let server = McpServer::new(tool_context);

    let result = StdioTransport::new().run(server).await;

    cancel.cancel();
    let _ = health.await;
    result.context("stdio transport failed")
}
