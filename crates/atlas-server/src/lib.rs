//! Thin HTTP surface over the store and engine. The core is library-first;
//! every handler dispatches into `atlas-engine` or `atlas-store` and maps
//! errors through [`error::ApiError`].

mod error;
mod routes;

use std::io;
use std::net::{AddrParseError, SocketAddr};
use std::str::FromStr as _;
use std::sync::Arc;
use std::time::Duration;

use atlas_engine::Config;
use atlas_store::Database;
use axum::http::Method;
use axum::http::header::{ACCEPT, CONTENT_TYPE};
use snafu::{ResultExt as _, Snafu};
use tokio::net::{TcpListener, TcpSocket};
use tokio::signal;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

pub use crate::error::{ApiError, ApiResult};

const LOG_TARGET: &str = "atlas::server";

pub struct Opts {
    pub listen: String,
    pub reuseport: bool,
}

/// Upstream credentials kept in process state; a fresh client is built per
/// collection run and dropped with it.
#[derive(Clone)]
pub struct ApiCredentials {
    pub api_key: String,
    pub fallback_bearer_token: Option<String>,
}

pub struct AppState {
    pub db: Arc<Database>,
    pub config: Config,
    pub credentials: ApiCredentials,
}

pub type SharedAppState = Arc<AppState>;

#[derive(Debug, Snafu)]
pub enum ServerError {
    #[snafu(transparent)]
    Io { source: io::Error },
    ListenAddr { source: AddrParseError },
}

pub type ServerResult<T> = std::result::Result<T, ServerError>;

pub struct Server {
    listener: TcpListener,
    state: SharedAppState,
}

impl Server {
    pub async fn init(
        opts: Opts,
        db: Arc<Database>,
        config: Config,
        credentials: ApiCredentials,
    ) -> ServerResult<Server> {
        let listener = Self::get_listener(&opts).await?;
        let state = Arc::new(AppState {
            db,
            config,
            credentials,
        });

        info!(target: LOG_TARGET, "Listening on {}", listener.local_addr()?);
        Ok(Self { listener, state })
    }

    async fn get_listener(opts: &Opts) -> ServerResult<TcpListener> {
        let socket = {
            let addr = SocketAddr::from_str(&opts.listen).context(ListenAddrSnafu)?;

            let socket = if addr.is_ipv4() {
                TcpSocket::new_v4()?
            } else {
                TcpSocket::new_v6()?
            };
            if opts.reuseport {
                #[cfg(unix)]
                socket.set_reuseport(true)?;
            }
            socket.set_nodelay(true)?;
            socket.bind(addr)?;
            socket
        };

        Ok(socket.listen(1024)?)
    }

    pub fn addr(&self) -> ServerResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub async fn run(self) -> ServerResult<()> {
        let router = routes::route_handler(self.state.clone()).layer(cors_layer());

        info!(target: LOG_TARGET, "Starting server");
        axum::serve(
            self.listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await?;

        Ok(())
    }
}

fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_headers([ACCEPT, CONTENT_TYPE])
        .max_age(Duration::from_secs(86400))
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!(target: LOG_TARGET, "Shutting down");
}
