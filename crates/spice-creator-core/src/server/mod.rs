//! Development server.
//!
//! ```text
//! /, /index.html   landing page
//! /files/<path>    static files from the serve directory
//! /hot             push channel (WebSocket upgrade only)
//! anything else    delegate server of the current build context, or 404
//! ```
//!
//! Every response carries permissive CORS headers; the client code runs
//! inside the host application under a different origin.

mod http;
mod landing;
mod proxy;
mod push;

pub use http::{mime_type, percent_decode, Request, Response, CORS_HEADERS};
pub use landing::LandingPage;
pub use push::{ClientSet, PUSH_PATH};

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bundler::BuildContext;
use crate::error::{Result, SpiceError};

/// URL prefix for static files
pub const FILES_PREFIX: &str = "/files/";

#[derive(Debug, Clone)]
pub struct ServerOptions {
    pub host: IpAddr,
    /// `0` picks a free port
    pub port: u16,
    pub serve_dir: PathBuf,
    pub landing: LandingPage,
}

impl ServerOptions {
    pub fn new(port: u16, serve_dir: PathBuf, landing: LandingPage) -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port,
            serve_dir,
            landing,
        }
    }
}

struct ServerState {
    serve_dir: PathBuf,
    port: u16,
    landing: RwLock<LandingPage>,
    clients: ClientSet,
    context: RwLock<Option<Arc<dyn BuildContext>>>,
    delegate: Mutex<Option<SocketAddr>>,
    http: reqwest::Client,
    cancel: CancellationToken,
}

/// Running development server
pub struct DevServer {
    addr: SocketAddr,
    state: Arc<ServerState>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl DevServer {
    /// Bind and start accepting connections
    pub async fn bind(options: ServerOptions) -> Result<Self> {
        let listener = TcpListener::bind((options.host, options.port))
            .await
            .map_err(|e| SpiceError::Server {
                message: format!("cannot listen on {}:{}: {}", options.host, options.port, e),
            })?;
        let addr = listener.local_addr()?;

        let state = Arc::new(ServerState {
            serve_dir: options.serve_dir,
            port: addr.port(),
            landing: RwLock::new(options.landing),
            clients: ClientSet::new(),
            context: RwLock::new(None),
            delegate: Mutex::new(None),
            http: reqwest::Client::new(),
            cancel: CancellationToken::new(),
        });

        let task = tokio::spawn(accept_loop(listener, Arc::clone(&state)));
        debug!(%addr, "dev server listening");

        Ok(Self {
            addr,
            state,
            task: Mutex::new(Some(task)),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn url(&self) -> String {
        format!("http://localhost:{}", self.addr.port())
    }

    pub fn push_url(&self) -> String {
        push_url(self.addr.port())
    }

    pub fn serve_dir(&self) -> &Path {
        &self.state.serve_dir
    }

    pub fn clients(&self) -> ClientSet {
        self.state.clients.clone()
    }

    /// Swap in a new build context. The cached delegate address belongs to
    /// the old context and is dropped; the next request re-creates it.
    pub async fn set_context(&self, context: Arc<dyn BuildContext>) {
        *self.state.context.write().await = Some(context);
        *self.state.delegate.lock().await = None;
    }

    pub async fn clear_context(&self) {
        *self.state.context.write().await = None;
        *self.state.delegate.lock().await = None;
    }

    pub async fn set_landing(&self, landing: LandingPage) {
        *self.state.landing.write().await = landing;
    }

    /// Stop accepting connections and close push clients
    pub async fn stop(&self) {
        self.state.cancel.cancel();
        if let Some(task) = self.task.lock().await.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "dev server task ended abnormally");
            }
        }
        info!("dev server stopped");
    }
}

fn push_url(port: u16) -> String {
    format!("ws://localhost:{}{}", port, PUSH_PATH)
}

async fn accept_loop(listener: TcpListener, state: Arc<ServerState>) {
    loop {
        tokio::select! {
            biased;

            () = state.cancel.cancelled() => break,

            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let state = Arc::clone(&state);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, &state).await {
                            debug!(%peer, error = %e, "connection error");
                        }
                    });
                }
                Err(e) => warn!(error = %e, "accept failed"),
            }
        }
    }
}

async fn handle_connection(mut stream: TcpStream, state: &ServerState) -> Result<()> {
    let request = match http::read_request(&mut stream).await {
        Ok(Some(request)) => request,
        Ok(None) => return Ok(()),
        Err(e) => {
            let _ = stream
                .write_all(&Response::text(400, "Bad Request").to_bytes())
                .await;
            return Err(e);
        }
    };

    if request.path() == PUSH_PATH && request.is_websocket_upgrade() {
        push::accept_upgrade(&mut stream, &request).await?;
        push::serve_client(stream, state.clients.clone(), state.cancel.child_token()).await;
        return Ok(());
    }

    let response = route(&request, state).await;
    stream.write_all(&response.to_bytes()).await?;
    stream.shutdown().await?;
    Ok(())
}

async fn route(request: &Request, state: &ServerState) -> Response {
    if request.method.eq_ignore_ascii_case("OPTIONS") {
        return Response::new(204);
    }

    let path = request.path();
    if path == PUSH_PATH {
        return Response::text(400, "Expected WebSocket upgrade");
    }

    if path == "/" || path == "/index.html" {
        let landing = state.landing.read().await;
        return Response::html(200, landing.render(&push_url(state.port)));
    }

    if let Some(relative) = path.strip_prefix(FILES_PREFIX) {
        return serve_static(&state.serve_dir, relative).await;
    }

    match delegate(state).await {
        Ok(Some(addr)) => proxy::forward(&state.http, addr, request).await,
        Ok(None) => Response::html(404, "<h1>Not found</h1>"),
        Err(e) => {
            warn!(error = %e, "delegate server unavailable");
            Response::text(502, "Proxy Error")
        }
    }
}

/// Delegate address of the current context, started on first use
async fn delegate(state: &ServerState) -> Result<Option<SocketAddr>> {
    let mut cached = state.delegate.lock().await;
    if let Some(addr) = *cached {
        return Ok(Some(addr));
    }

    let context = state.context.read().await.clone();
    let Some(context) = context else {
        return Ok(None);
    };

    let addr = context.serve(&state.serve_dir).await?;
    *cached = addr;
    Ok(addr)
}

/// Resolve a request path under `root`, refusing anything that escapes it
pub fn resolve_static(root: &Path, relative: &str) -> Option<PathBuf> {
    let decoded = percent_decode(relative);
    let relative = Path::new(decoded.trim_start_matches('/'));
    if relative
        .components()
        .any(|c| !matches!(c, Component::Normal(_)))
    {
        return None;
    }

    let candidate = root.join(relative);
    let canonical_root = root.canonicalize().ok()?;
    let canonical = candidate.canonicalize().ok()?;
    (canonical.starts_with(&canonical_root) && canonical.is_file()).then_some(canonical)
}

async fn serve_static(root: &Path, relative: &str) -> Response {
    let Some(path) = resolve_static(root, relative) else {
        return Response::html(404, "<h1>Not found</h1>");
    };

    match tokio::fs::read(&path).await {
        Ok(bytes) => Response::with_body(200, mime_type(&path), bytes),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to read static file");
            Response::text(500, "Internal Server Error")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn static_paths_stay_inside_root() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("build");
        std::fs::create_dir_all(&root).unwrap();
        std::fs::write(root.join("my app.js"), "x").unwrap();
        std::fs::write(tmp.path().join("secret.txt"), "s").unwrap();

        assert!(resolve_static(&root, "my%20app.js").is_some());
        assert!(resolve_static(&root, "../secret.txt").is_none());
        assert!(resolve_static(&root, "%2e%2e/secret.txt").is_none());
        assert!(resolve_static(&root, "missing.js").is_none());
        assert!(resolve_static(&root, "").is_none());
    }
}
