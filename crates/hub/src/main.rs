// Copyright (C) 2026 The Hub Authors. This program is free
// software: you can redistribute it and/or modify it under the terms of the GNU
// General Public License as published by the Free Software Foundation, version
// 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

mod connection;
mod http;
mod state;
mod ws;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::Router;
use clap::Parser;
use clap_derive::Parser;
use hub_common::client::{AttributeBag, DeviceOverlay};
use hub_core::{AgentLoop, NoopAgentLoop, SessionManager, SingleCommandAgentLoop};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::state::{default_registry, AppState, ServerConfig};

#[derive(Parser, Debug)]
#[command(about = "Control-plane server for device and constellation connections")]
struct Args {
    #[arg(long, value_name = "host", default_value = "127.0.0.1", help = "Bind address")]
    host: String,

    #[arg(long, value_name = "port", default_value_t = 8765, help = "Bind port")]
    port: u16,

    #[arg(
        long,
        value_name = "localhost-only",
        help = "Refuse to bind to a non-loopback address",
        default_value_t = false
    )]
    localhost_only: bool,

    #[arg(
        long,
        value_name = "platform",
        default_value = "linux",
        help = "Default session platform when a TASK/dispatch doesn't imply one"
    )]
    default_platform: String,

    #[arg(
        long,
        value_name = "level",
        default_value = "info",
        help = "Log level (error, warn, info, debug, trace)"
    )]
    log_level: String,

    #[arg(long, value_name = "secs", default_value_t = 10, help = "Registration timeout, seconds")]
    registration_timeout_secs: u64,

    #[arg(long, value_name = "secs", default_value_t = 30, help = "Liveness timeout, seconds")]
    liveness_timeout_secs: u64,

    #[arg(
        long = "overlay-tag",
        value_name = "tag",
        help = "Tag applied to every device's system_info.tags (repeatable, replaces auto-detected tags)"
    )]
    overlay_tags: Vec<String>,

    #[arg(
        long = "overlay-feature",
        value_name = "feature",
        help = "Feature unioned into every device's system_info.supported_features (repeatable)"
    )]
    overlay_features: Vec<String>,

    #[arg(
        long = "overlay-metadata",
        value_name = "key=value",
        help = "Entry injected into every device's system_info.custom_metadata (repeatable)"
    )]
    overlay_metadata: Vec<String>,
}

/// Parses `--overlay-metadata key=value` flags into the overlay's
/// `custom_metadata` bag. Entries without an `=` are ignored rather than
/// failing startup over a cosmetic flag.
fn parse_overlay_metadata(entries: &[String]) -> AttributeBag {
    entries
        .iter()
        .filter_map(|entry| entry.split_once('='))
        .map(|(k, v)| (k.to_string(), serde_json::Value::String(v.to_string())))
        .collect()
}

fn device_overlay(args: &Args) -> DeviceOverlay {
    DeviceOverlay {
        custom_metadata: parse_overlay_metadata(&args.overlay_metadata),
        additional_features: args.overlay_features.clone(),
        tags: (!args.overlay_tags.is_empty()).then(|| args.overlay_tags.clone()),
    }
}

fn agent_factories(default_platform: &str) -> HashMap<String, Arc<dyn AgentLoop>> {
    let mut factories: HashMap<String, Arc<dyn AgentLoop>> = HashMap::new();
    for platform in ["linux", "windows", "macos"] {
        factories.insert(platform.to_string(), Arc::new(SingleCommandAgentLoop));
    }
    factories
        .entry(default_platform.to_string())
        .or_insert_with(|| Arc::new(NoopAgentLoop));
    factories
}

fn mk_routes(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/api/dispatch", post(http::dispatch))
        .route("/api/clients", get(http::clients))
        .route("/api/task_result/{task_name}", get(http::task_result))
        .route("/api/health", get(http::health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| connection::run(state, socket))
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> eyre::Result<()> {
    color_eyre::install()?;
    let args = Args::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(args.log_level.clone()));
    tracing_subscriber::fmt()
        .compact()
        .with_env_filter(filter)
        .with_thread_names(true)
        .init();

    let address: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;
    if args.localhost_only && !address.ip().is_loopback() {
        eyre::bail!("--localhost-only set but {} is not a loopback address", address.ip());
    }

    let sessions = SessionManager::new(agent_factories(&args.default_platform));
    let overlay = device_overlay(&args);
    let config = ServerConfig {
        default_platform: args.default_platform,
        registration_timeout: Duration::from_secs(args.registration_timeout_secs),
        liveness_timeout: Duration::from_secs(args.liveness_timeout_secs),
        device_overlay: overlay,
    };
    let state = AppState::new(default_registry(), sessions, config);

    let router = mk_routes(state);
    let listener = TcpListener::bind(address).await?;
    info!(%address, "hub listening");
    axum::serve(listener, router).await?;

    Ok(())
}
