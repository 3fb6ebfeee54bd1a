//! Accio server binary.
//!
//! Shares one directory over plain HTTP: directory listings, streamed
//! downloads with range support, multipart uploads into a separate folder,
//! and an optional password gate that remembers authorized client IPs.

mod assets;
mod auth;
mod background;
mod config;
mod error;
mod files;
mod http;
mod listing;
mod logging;
mod paths;
mod platform;
mod policy;
mod storage;
mod upload;

use axum::extract::{DefaultBodyLimit, Extension, connect_info::ConnectInfo};
use axum::http::Request;
use axum::routing::{get, post};
use axum::{Router, middleware};
use axum_server::Handle;
use clap::Parser;
use shadow_rs::shadow;
use std::net::{IpAddr, SocketAddr};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tower_http::trace::{DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::{Level, error, info, info_span, warn};

use crate::auth::{LoginLimits, SessionStore};
use crate::background::spawn_background_tasks;
use crate::config::Args;
use crate::error::StartupError;
use crate::http::ClientIpSource;
use crate::storage::Storage;
use crate::upload::UploadConfig;

shadow!(build);

/// Starts the server and blocks until shutdown.
#[tokio::main]
async fn main() -> ExitCode {
    logging::init_logging();

    let args = Args::parse();
    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "accio stopped");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<(), StartupError> {
    let host = args
        .host
        .parse::<IpAddr>()
        .map_err(|_| StartupError::InvalidBind(args.host.clone()))?;
    let storage = Arc::new(Storage::open(&args.path, &args.policy_rules()).await?);
    let uploads_dir =
        upload::prepare_uploads_dir(args.uploads_dir.as_deref(), storage.root_path()).await?;
    let upload_config = Arc::new(UploadConfig {
        enabled: !args.disable_uploads,
        dir: uploads_dir,
        max_total_size: args.upload_max_size,
    });
    let sessions = Arc::new(SessionStore::new(
        args.password.clone(),
        LoginLimits {
            max_attempts: args.login_max_attempts,
            window: Duration::from_secs(args.login_window_secs),
            lockout: Duration::from_secs(args.login_lockout_secs),
        },
    ));
    let ip_source = ClientIpSource {
        trust_forwarded: args.trust_proxy,
    };

    info!(path = ?storage.root_path(), "serving directory");
    if upload_config.enabled {
        info!(path = ?upload_config.dir, "uploads enabled");
    } else {
        info!("uploads disabled");
    }
    if sessions.password_enabled() {
        info!("password protection enabled");
    }

    let app = build_router(
        storage,
        sessions.clone(),
        upload_config,
        ip_source,
    );
    let addr = SocketAddr::new(host, args.port);
    let handle = Handle::new();
    spawn_startup_banner(handle.clone(), host);

    let server = axum_server::bind(addr)
        .handle(handle.clone())
        .serve(app.into_make_service_with_connect_info::<SocketAddr>());
    tokio::pin!(server);

    spawn_background_tasks(sessions);
    tokio::select! {
        result = &mut server => return result.map_err(StartupError::from),
        () = shutdown_signal() => {
            info!("Received termination signal, finishing in-flight requests");
            handle.graceful_shutdown(None);
        }
    }
    server.await?;
    info!("server stopped");
    Ok(())
}

/// Assembles routes and the shared middleware stack.
pub(crate) fn build_router(
    storage: Arc<Storage>,
    sessions: Arc<SessionStore>,
    upload_config: Arc<UploadConfig>,
    ip_source: ClientIpSource,
) -> Router {
    let upload_limit = match upload_config.max_total_size {
        0 => DefaultBodyLimit::disable(),
        max => DefaultBodyLimit::max(usize::try_from(max).unwrap_or(usize::MAX)),
    };

    Router::new()
        .route("/", get(files::serve_entry))
        .route(
            "/upload",
            post(upload::upload_files)
                .layer(upload_limit)
                .get(files::serve_entry),
        )
        .route("/{*path}", get(files::serve_entry))
        .layer(middleware::from_fn(auth::auth_middleware))
        .layer(middleware::from_fn(http::add_security_headers))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(move |request: &Request<_>| {
                    let client_ip = request
                        .extensions()
                        .get::<ConnectInfo<SocketAddr>>()
                        .map(|ConnectInfo(addr)| {
                            http::resolve_client_ip(request.headers(), addr.ip(), ip_source)
                                .to_string()
                        })
                        .unwrap_or_else(|| "unknown".to_string());

                    info_span!(
                        env!("CARGO_CRATE_NAME"),
                        client_ip,
                        method = ?request.method(),
                        path = ?request.uri().path(),
                    )
                })
                .on_request(DefaultOnRequest::new().level(Level::DEBUG))
                .on_response(DefaultOnResponse::new().level(Level::DEBUG)),
        )
        .layer(Extension(storage))
        .layer(Extension(sessions))
        .layer(Extension(upload_config))
        .layer(Extension(ip_source))
}

/// Prints reachable URLs once the listener is bound.
fn spawn_startup_banner(handle: Handle, host: IpAddr) {
    tokio::spawn(async move {
        let Some(bound) = handle.listening().await else {
            return;
        };
        info!("🚀 Accio listening on {}", bound);
        for url in platform::display_urls(host, bound.port()) {
            info!("   {}", url);
        }
    });
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            warn!(error = %err, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "failed to install SIGTERM handler");
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
}
