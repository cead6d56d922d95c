use std::sync::Arc;

use tracing::{info, warn};

use wab_bridge::{BridgeConfig, BridgeTransport};
use wab_core::{
    agent::{AgentOptions, AgentWorkflow},
    config::Config,
    dispatch::Dispatcher,
    registry::CommandRegistry,
    state::{ChatStore, MemoryBackend},
    transport::TransportPort,
};
use wab_groq::{GroqClient, GroqConfig};
use wab_tavily::TavilyClient;

mod commands;

#[tokio::main]
async fn main() -> Result<(), wab_core::Error> {
    wab_core::logging::init("wab")?;

    let cfg = Arc::new(Config::load()?);

    let store = ChatStore::new(Arc::new(MemoryBackend::new()), cfg.chat_ttl);
    let registry = Arc::new(CommandRegistry::register(commands::builtin(store.clone())));

    let (bridge, mut batches) = BridgeTransport::spawn(BridgeConfig {
        program: cfg.bridge_program.clone(),
        args: cfg.bridge_args.clone(),
        session_name: cfg.session_name.clone(),
        restart_backoff: cfg.bridge_restart_backoff,
        request_timeout: cfg.bridge_request_timeout,
    });
    let transport: Arc<dyn TransportPort> = bridge;

    let agent = if cfg.enable_agents {
        Some(Arc::new(build_agent(&cfg, store, transport.clone())?))
    } else {
        info!("agent fallback disabled; unmatched messages will be dropped");
        None
    };

    let dispatcher = Arc::new(Dispatcher::new(
        registry,
        transport,
        agent,
        cfg.command_prefix,
    ));

    info!(
        session = %cfg.session_name,
        agents = cfg.enable_agents,
        "wabot started"
    );

    // One concurrent dispatch per batch; per-event ordering lives inside
    // `handle_batch`, cross-batch ordering is whatever the platform gives us.
    while let Some(batch) = batches.recv().await {
        let dispatcher = dispatcher.clone();
        tokio::spawn(async move {
            dispatcher.handle_batch(batch).await;
        });
    }

    warn!("bridge event stream closed, shutting down");
    Ok(())
}

fn build_agent(
    cfg: &Config,
    store: ChatStore,
    transport: Arc<dyn TransportPort>,
) -> Result<AgentWorkflow, wab_core::Error> {
    let api_key = cfg
        .groq_api_key
        .clone()
        .ok_or_else(|| wab_core::Error::Config("GROQ_API_KEY is required for agents".to_string()))?;

    let search = match &cfg.tavily_api_key {
        Some(key) => Some(Arc::new(TavilyClient::new(key.clone())?)),
        None => {
            warn!("TAVILY_API_KEY not set; the search tool is disabled");
            None
        }
    };

    let groq = Arc::new(GroqClient::new(
        GroqConfig::new(api_key, cfg.groq_base_url.clone(), cfg.groq_model.clone()),
        search,
    )?);

    Ok(AgentWorkflow::new(
        store,
        groq,
        transport,
        AgentOptions {
            system_prompt: cfg.agent_system_prompt.clone(),
            max_steps: cfg.agent_max_steps,
            max_retries: cfg.agent_max_retries,
            media_dir: cfg.media_dir.clone(),
        },
    ))
}
