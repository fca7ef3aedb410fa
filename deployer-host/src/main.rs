//! Deployer host - serves a site and runs the deployer's lifecycle hooks.
//!
//! Stands in for the platform a plugin normally runs inside: files come
//! from the document root, everything else goes through the dispatcher, and
//! endpoints from `deployer.toml` are registered once the listener is up
//! (probes need a server to talk to).

mod routes;
mod site;
mod state;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use deployer::dispatch::Dispatcher;
use deployer::endpoint::Endpoint;
use deployer::io::config::load_config;
use deployer::io::http::{HttpClient, ReqwestClient};
use deployer::io::store::JsonFileStore;
use deployer::manager::EndpointManager;
use deployer::probe::Signals;
use tracing::{info, warn};

use crate::state::AppState;

#[derive(Parser)]
#[command(name = "deployer-host")]
#[command(about = "Serve a site and deploy its well-known endpoints")]
struct Args {
    /// Path to `deployer.toml`.
    #[arg(long, default_value = "deployer.toml")]
    config: PathBuf,

    /// Address to bind the server to
    #[arg(long, default_value = "127.0.0.1")]
    bind: String,

    /// Port to listen on
    #[arg(long, default_value = "3001")]
    port: u16,

    /// Re-probe and re-register every endpoint instead of restoring
    /// persisted strategies.
    #[arg(long)]
    reprobe: bool,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("deployer_host=info".parse()?),
        )
        .init();

    let args = Args::parse();
    let cfg = load_config(&args.config)?;
    let document_root = cfg.site.document_root.clone();
    info!(
        document_root = %document_root.display(),
        base_url = %cfg.site.base_url,
        "starting deployer-host"
    );

    let endpoints = cfg
        .endpoints
        .iter()
        .map(Endpoint::from_config)
        .collect::<anyhow::Result<Vec<_>>>()?;
    // The blocking client owns its own runtime, so it is built and finally
    // dropped outside tokio.
    let client: Arc<dyn HttpClient> = Arc::new(ReqwestClient::new(&cfg.http)?);
    let signals = Signals::from_process_env(&cfg.probe);
    let store = JsonFileStore::new(cfg.site.state_path.clone());
    let manager = EndpointManager::new(
        cfg,
        Arc::clone(&client),
        store,
        Dispatcher::new(client),
        signals,
    );
    let state = AppState::new(manager);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("build tokio runtime")?;
    let served = runtime.block_on(serve(state.clone(), document_root, endpoints, &args));
    drop(runtime);
    drop(state);
    served
}

async fn serve(
    state: AppState,
    document_root: PathBuf,
    endpoints: Vec<Endpoint>,
    args: &Args,
) -> anyhow::Result<()> {
    let app = site::app(state.clone(), &document_root);

    let addr: SocketAddr = format!("{}:{}", args.bind, args.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("bind {addr}"))?;
    info!(addr = %addr, "listening");
    let server = tokio::spawn(async move { axum::serve(listener, app).await });

    let manager = state.manager.clone();
    let reprobe = args.reprobe;
    let activation = tokio::task::spawn_blocking(move || {
        if reprobe {
            return activate(&manager, endpoints);
        }
        match manager.restore(endpoints.clone()) {
            Ok(pending) => {
                let pending: Vec<Endpoint> = endpoints
                    .into_iter()
                    .filter(|endpoint| pending.contains(&endpoint.path))
                    .collect();
                activate(&manager, pending);
            }
            Err(err) => {
                warn!(err = %format!("{err:#}"), "restore failed, re-registering everything");
                activate(&manager, endpoints);
            }
        }
    });
    if let Err(err) = activation.await {
        warn!(err = %err, "activation task failed");
    }

    server.await??;
    Ok(())
}

fn activate(manager: &EndpointManager<JsonFileStore>, endpoints: Vec<Endpoint>) {
    for outcome in manager.activate(endpoints) {
        match outcome.result {
            Ok(state) => info!(
                path = %outcome.path,
                strategy = ?state.current_strategy,
                status = state.status.as_str(),
                "endpoint registered"
            ),
            Err(err) => warn!(path = %outcome.path, err = %format!("{err:#}"), "registration failed"),
        }
    }
}
