//! Blockforge - headless block script host
//!
//! Loads graphs and persistent variables from the data directory, fires
//! `server_start`, then drives the tick clock until Ctrl+C or the tick budget
//! runs out.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use blockforge::{TickDriver, register_builtin_actions, register_dynamic_variables};
use clap::Parser;
use codeblock_runtime::{
    EngineConfig, HeadlessHost, JsonFileStore, ScriptEngine, TickQueue, TriggerEvent,
};
use codeblock_types::{CodeBlock, CodeGraph};
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "blockforge")]
#[command(about = "Headless host for block scripts")]
struct Args {
    /// Engine configuration file
    #[arg(short, long, default_value = "blockforge.toml")]
    config: PathBuf,

    /// Overrides `storage.data_dir` from the config
    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    /// Stop after this many ticks instead of waiting for Ctrl+C
    #[arg(short, long)]
    ticks: Option<u64>,

    /// Install a sample graph and have a demo actor join
    #[arg(long)]
    demo: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("blockforge=info,codeblock_runtime=info,host=info")
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    info!("Starting Blockforge v{}", env!("CARGO_PKG_VERSION"));

    let mut config = if args.config.exists() {
        EngineConfig::load(&args.config)?
    } else {
        info!(path = %args.config.display(), "No config file, using defaults");
        EngineConfig::default()
    };
    if let Some(dir) = args.data_dir {
        config.storage.data_dir = dir;
    }

    let store = JsonFileStore::open(&config.storage.data_dir).with_context(|| {
        format!("Failed to open data directory {}", config.storage.data_dir.display())
    })?;
    let host = Arc::new(HeadlessHost::new());
    let queue = Arc::new(TickQueue::new());
    let engine = Arc::new(
        ScriptEngine::new(config.clone(), host.clone(), queue.clone()).with_store(Arc::new(store)),
    );

    register_builtin_actions(engine.registry());
    register_dynamic_variables(&engine);

    match engine.variables().load_persistent() {
        Ok(count) => info!("Loaded {} persistent variables", count),
        Err(e) => warn!(error = %e, "Failed to load persistent variables"),
    }
    let graphs = engine.load_all_from_store()?;
    info!("Loaded {} graphs from {}", graphs, config.storage.data_dir.display());

    if args.demo {
        install_demo(&engine)?;
    }

    engine.start_autosave();
    engine.fire(TriggerEvent::new("server_start"));

    if args.demo {
        let actor = host.join("Alex");
        engine.fire(TriggerEvent::new("player_join").for_actor(actor));
    }

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(());
    });

    TickDriver::new(queue, config.runtime.tick_interval())
        .with_max_ticks(args.ticks)
        .run(shutdown_rx)
        .await;

    engine.fire(TriggerEvent::new("server_stop"));
    engine.shutdown();

    info!("Blockforge stopped");
    Ok(())
}

/// Sample graph: greet on join, count joins, then a short timed loop
fn install_demo(engine: &ScriptEngine) -> Result<()> {
    let mut graph = CodeGraph::new("demo_welcome", "Demo Welcome");

    let trigger = graph.add_block(CodeBlock::trigger("player_join"));
    let greet = graph.add_block(
        CodeBlock::action("send_message").with_param("message", "Welcome, %player_name%!"),
    );
    let count = graph.add_block(
        CodeBlock::action("increment_variable")
            .with_param("name", "joins")
            .with_param("scope", "server"),
    );
    let announce = graph.add_block(
        CodeBlock::action("broadcast")
            .with_param("message", "%player_name% joined (join #%joins%)"),
    );
    let repeat = graph.add_block(
        CodeBlock::control("repeat")
            .with_param("times", 3)
            .with_param("delay", 20),
    );
    let pulse = graph.add_block(
        CodeBlock::action("send_message").with_param("message", "Tick %tick%"),
    );

    graph.link_next(trigger, greet)?;
    graph.link_next(greet, count)?;
    graph.link_next(count, announce)?;
    graph.link_next(announce, repeat)?;
    graph.add_child(repeat, pulse)?;

    engine.load_graph(graph);
    engine.save_graph("demo_welcome")?;
    info!("Installed demo graph");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
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
                warn!(error = %e, "Failed to install terminate handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down...");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down...");
        },
    }
}
