//! The generated event loop: accepts connections, reads
//! requests off the wire, dispatches through the compiled route table, and
//! writes exactly one response per request.

use crate::asyncpool::AsyncPool;
use crate::backend;
use crate::codegen::dispatch::DispatchOutcome;
use crate::codegen::CompiledServer;
use crate::error::HypersonicError;
use crate::trampoline::{self, RawRequest, TrampolineContext};
use bytes::Bytes;
use http_body_util::{BodyExt, Full, Limited};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request as HyperRequest, Response as HyperResponse, StatusCode};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use parking_lot::RwLock;
use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info, warn};

/// Server construction options. Validated eagerly by
/// `validate()` before any socket is opened.
#[derive(Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub workers: usize,
    pub backlog: u32,
    pub keep_alive: Option<Duration>,
    pub max_connections: usize,
    pub tcp_nodelay: bool,
    pub shutdown_timeout: Duration,
    pub max_request_size: usize,
    pub gzip_min_size: usize,
    pub http2: crate::http2::Http2Options,
    pub tls: Option<crate::tls::TlsOptions>,
    /// `SO_RCVTIMEO`-equivalent: a connection
    /// with no readable data within this window is dropped.
    pub recv_timeout: Option<Duration>,
    /// Filesystem/cache interface: where `compile()`
    /// writes the deterministic analysis dump. `None` skips the write.
    pub cache_dir: Option<PathBuf>,
    /// Worker count for the async offload pool when `App::enable_async_pool()`
    /// is set; `None` defaults to the host's CPU count.
    pub async_pool_workers: Option<usize>,
}

impl ServerConfig {
    pub fn new(host: &str, port: u16) -> Self {
        ServerConfig {
            host: host.to_string(),
            port,
            workers: 0,
            backlog: 1024,
            keep_alive: Some(Duration::from_secs(75)),
            max_connections: 10_000,
            tcp_nodelay: true,
            shutdown_timeout: Duration::from_secs(30),
            max_request_size: 10 * 1024 * 1024,
            gzip_min_size: 1024,
            http2: crate::http2::Http2Options::default(),
            tls: None,
            recv_timeout: None,
            cache_dir: None,
            async_pool_workers: None,
        }
    }

    pub fn workers(mut self, n: usize) -> Self {
        self.workers = n;
        self
    }

    pub fn max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    pub fn no_keep_alive(mut self) -> Self {
        self.keep_alive = None;
        self
    }

    pub fn shutdown_timeout(mut self, duration: Duration) -> Self {
        self.shutdown_timeout = duration;
        self
    }

    pub fn tls(mut self, opts: crate::tls::TlsOptions) -> Self {
        self.tls = Some(opts);
        self
    }

    pub fn http2(mut self, enabled: bool) -> Self {
        self.http2.enabled = enabled;
        self
    }

    pub fn recv_timeout(mut self, duration: Duration) -> Self {
        self.recv_timeout = Some(duration);
        self
    }

    pub fn cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }

    /// `ConfigError`s raised eagerly: HTTP/2 without TLS, or a
    /// TLS request whose certificate/key cannot be loaded at all (caught
    /// here rather than deferred to the first accept).
    pub fn validate(&self) -> Result<(), HypersonicError> {
        self.http2.validate(self.tls.is_some())?;
        if let Some(opts) = &self.tls {
            crate::tls::load_server_config(opts, self.http2.enabled)?;
        }
        Ok(())
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new("127.0.0.1", 8000)
    }
}

/// Server performance metrics.
#[derive(Clone)]
pub struct ServerMetrics {
    pub total_requests: Arc<AtomicU64>,
    pub active_connections: Arc<AtomicU64>,
    pub bytes_received: Arc<AtomicU64>,
    pub bytes_sent: Arc<AtomicU64>,
    pub total_errors: Arc<AtomicU64>,
    start_time: Instant,
    latencies: Arc<RwLock<VecDeque<Duration>>>,
}

impl ServerMetrics {
    pub fn new() -> Self {
        ServerMetrics {
            total_requests: Arc::new(AtomicU64::new(0)),
            active_connections: Arc::new(AtomicU64::new(0)),
            bytes_received: Arc::new(AtomicU64::new(0)),
            bytes_sent: Arc::new(AtomicU64::new(0)),
            total_errors: Arc::new(AtomicU64::new(0)),
            start_time: Instant::now(),
            latencies: Arc::new(RwLock::new(VecDeque::with_capacity(1024))),
        }
    }

    #[inline]
    pub fn inc_requests(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_connections(&self) {
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn dec_connections(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn add_bytes_received(&self, bytes: u64) {
        self.bytes_received.fetch_add(bytes, Ordering::Relaxed);
    }

    #[inline]
    pub fn add_bytes_sent(&self, bytes: u64) {
        self.bytes_sent.fetch_add(bytes, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_errors(&self) {
        self.total_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Samples every 64th request to keep the write lock off the hot path.
    #[inline]
    pub fn record_latency(&self, latency: Duration) {
        if self.total_requests.load(Ordering::Relaxed) & 63 == 0 {
            let mut latencies = self.latencies.write();
            latencies.push_back(latency);
            if latencies.len() > 1000 {
                latencies.pop_front();
            }
        }
    }

    pub fn requests_per_second(&self) -> f64 {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            self.total_requests.load(Ordering::Relaxed) as f64 / elapsed
        } else {
            0.0
        }
    }

    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let latencies = self.latencies.read();
        let avg_latency_ms = if latencies.is_empty() {
            0.0
        } else {
            let total: Duration = latencies.iter().sum();
            (total / latencies.len() as u32).as_secs_f64() * 1000.0
        };
        MetricsSnapshot {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            active_connections: self.active_connections.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            total_errors: self.total_errors.load(Ordering::Relaxed),
            uptime_secs: self.start_time.elapsed().as_secs(),
            requests_per_second: self.requests_per_second(),
            avg_latency_ms,
        }
    }
}

impl Default for ServerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Debug, serde::Serialize)]
pub struct MetricsSnapshot {
    pub total_requests: u64,
    pub active_connections: u64,
    pub bytes_received: u64,
    pub bytes_sent: u64,
    pub total_errors: u64,
    pub uptime_secs: u64,
    pub requests_per_second: f64,
    pub avg_latency_ms: f64,
}

/// Coordinates graceful shutdown: a flag, an active-request counter, and a
/// bounded drain wait.
pub struct ShutdownCoordinator {
    notify: broadcast::Sender<()>,
    shutdown_initiated: Arc<AtomicBool>,
    active_requests: Arc<AtomicU64>,
    drain_timeout: Duration,
}

impl ShutdownCoordinator {
    pub fn new(drain_timeout: Duration) -> Self {
        let (notify, _) = broadcast::channel(1);
        ShutdownCoordinator {
            notify,
            shutdown_initiated: Arc::new(AtomicBool::new(false)),
            active_requests: Arc::new(AtomicU64::new(0)),
            drain_timeout,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.notify.subscribe()
    }

    pub fn shutdown(&self) {
        self.shutdown_initiated.store(true, Ordering::SeqCst);
        let _ = self.notify.send(());
    }

    #[inline]
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown_initiated.load(Ordering::SeqCst)
    }

    #[inline]
    pub fn request_started(&self) {
        self.active_requests.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn request_finished(&self) {
        self.active_requests.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn active_requests(&self) -> u64 {
        self.active_requests.load(Ordering::Relaxed)
    }

    pub async fn drain(&self) {
        let start = Instant::now();
        while self.active_requests() > 0 {
            if start.elapsed() > self.drain_timeout {
                warn!(remaining = self.active_requests(), "drain timeout exceeded, forcing shutdown");
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
}

/// One entry in the fd-indexed keep-alive table: when the connection was
/// last active, and the handle the reaper uses to force-close it once it's
/// past `keepalive_timeout`.
struct ConnRecord {
    last_activity: Instant,
    abort: tokio::task::AbortHandle,
}

/// Connection table keyed by fd. A `HashMap` stands in for a flat
/// direct-indexed array since `RawFd` values are not densely packed from a
/// tokio-managed listener, but the lookup/update/remove contract is the
/// same O(1) shape.
type ConnTable = Arc<RwLock<HashMap<RawFd, ConnRecord>>>;

/// The running server: a compiled route table plus the runtime state the
/// event loop needs.
pub struct Server {
    config: ServerConfig,
    compiled: Arc<CompiledServer>,
    metrics: ServerMetrics,
    shutdown: Arc<ShutdownCoordinator>,
    pool: Option<AsyncPool>,
}

impl Server {
    pub fn new(config: ServerConfig, compiled: CompiledServer) -> Result<Self, HypersonicError> {
        config.validate()?;
        let shutdown = Arc::new(ShutdownCoordinator::new(config.shutdown_timeout));
        // Async offload pool: spawned once per worker when any
        // route or global option asked for it, never shared across workers.
        let pool = compiled
            .analysis
            .needs_async_pool
            .then(|| AsyncPool::new(config.async_pool_workers.unwrap_or_else(num_cpus::get)));
        Ok(Server {
            config,
            compiled: Arc::new(compiled),
            metrics: ServerMetrics::new(),
            shutdown,
            pool,
        })
    }

    pub fn metrics(&self) -> &ServerMetrics {
        &self.metrics
    }

    pub fn async_pool(&self) -> Option<&AsyncPool> {
        self.pool.as_ref()
    }

    pub fn shutdown(&self) {
        self.shutdown.shutdown();
    }

    /// Fork `workers` worker processes (or `num_cpus::get()` if `workers ==
    /// 0`), each with its own single-threaded tokio runtime and its own
    /// `SO_REUSEPORT` listener, and block the calling thread until all
    /// workers exit.
    /// Forking happens before any tokio runtime is started, since forking a
    /// running multi-threaded runtime is unsound.
    pub fn run_blocking(self) -> Result<(), HypersonicError> {
        let worker_count = if self.config.workers == 0 {
            num_cpus::get()
        } else {
            self.config.workers
        };

        #[cfg(unix)]
        {
            for _ in 1..worker_count {
                match unsafe { libc::fork() } {
                    -1 => return Err(HypersonicError::Config("fork() failed".to_string())),
                    0 => break,    // child: fall through and become a worker
                    _ => continue, // parent: spawn the next sibling
                }
            }
        }

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(HypersonicError::Io)?;
        runtime.block_on(self.run())
    }

    /// Run the accept loop on the current tokio runtime until shutdown.
    pub async fn run(self) -> Result<(), HypersonicError> {
        let addr: SocketAddr = format!("{}:{}", self.config.host, self.config.port)
            .parse()
            .map_err(|e| HypersonicError::Config(format!("invalid address: {e}")))?;

        let socket = socket2::Socket::new(
            if addr.is_ipv4() { socket2::Domain::IPV4 } else { socket2::Domain::IPV6 },
            socket2::Type::STREAM,
            Some(socket2::Protocol::TCP),
        )
        .map_err(|e| HypersonicError::Io(e))?;

        #[cfg(unix)]
        socket.set_reuse_port(true).map_err(HypersonicError::Io)?;
        socket.set_reuse_address(true).map_err(HypersonicError::Io)?;
        socket.set_nonblocking(true).map_err(HypersonicError::Io)?;
        socket.bind(&addr.into()).map_err(HypersonicError::Io)?;
        socket.listen(self.config.backlog as i32).map_err(HypersonicError::Io)?;

        let std_listener: std::net::TcpListener = socket.into();
        let listener = TcpListener::from_std(std_listener).map_err(HypersonicError::Io)?;
        let listen_fd = listener.as_raw_fd();

        let readiness_backend = backend::best_backend();
        info!(backend = readiness_backend.name(), "selected readiness backend");

        info!(host = %self.config.host, port = self.config.port, module_id = %self.compiled.module_id, "listening");

        let compiled = self.compiled.clone();
        let metrics = Arc::new(self.metrics.clone());
        let shutdown = self.shutdown.clone();
        let keep_alive = self.config.keep_alive.is_some();
        let gzip_min_size = self.config.gzip_min_size;
        let tcp_nodelay = self.config.tcp_nodelay;
        let max_connections = self.config.max_connections as u64;
        let max_request_size = self.config.max_request_size;
        let http2_enabled = self.config.http2.enabled;

        let tls_acceptor = match &self.config.tls {
            Some(opts) => Some(TlsAcceptor::from(crate::tls::load_server_config(opts, http2_enabled)?)),
            None => None,
        };

        // fd-indexed keep-alive table. On
        // non-blocking sockets `recv_timeout` (SO_RCVTIMEO's async
        // equivalent) and `keepalive_timeout` both bound "how long may this
        // fd sit idle", so one reaper loop enforces whichever is tighter.
        let idle_timeout = match (self.config.keep_alive, self.config.recv_timeout) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (Some(a), None) => Some(a),
            (None, Some(b)) => Some(b),
            (None, None) => None,
        };
        let conn_table: ConnTable = Arc::new(RwLock::new(HashMap::new()));

        if let Some(timeout) = idle_timeout {
            let reaper_table = conn_table.clone();
            let mut reaper_shutdown = shutdown.subscribe();
            tokio::task::spawn(async move {
                let mut ticker = tokio::time::interval(Duration::from_secs(5));
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            let now = Instant::now();
                            let mut table = reaper_table.write();
                            table.retain(|fd, rec| {
                                let alive = now.duration_since(rec.last_activity) <= timeout;
                                if !alive {
                                    debug!(fd, "keep-alive timeout, closing connection");
                                    rec.abort.abort();
                                }
                                alive
                            });
                        }
                        _ = reaper_shutdown.recv() => break,
                    }
                }
            });
        }

        // Async-pool completions are drained on this same worker task, never
        // on a pool thread.
        if let Some(pool) = self.pool.clone() {
            let mut pool_shutdown = shutdown.subscribe();
            tokio::task::spawn(async move {
                loop {
                    tokio::select! {
                        batch = pool.next_ready_batch() => {
                            debug!(completed = batch.len(), "async pool batch drained");
                        }
                        _ = pool_shutdown.recv() => break,
                    }
                }
            });
        }

        let mut shutdown_rx = shutdown.subscribe();

        let shutdown_sigterm = shutdown.clone();
        tokio::task::spawn(async move {
            #[cfg(unix)]
            if let Ok(mut sig) = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                let _ = sig.recv().await;
                shutdown_sigterm.shutdown();
            }
        });

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    shutdown.shutdown();
                    break;
                }
                _ = shutdown_rx.recv() => {
                    break;
                }
                accept_result = async {
                    readiness_backend.wait_readable(listen_fd).await?;
                    listener.accept().await
                }, if metrics.active_connections.load(Ordering::Relaxed) < max_connections => {
                    if shutdown.is_shutting_down() {
                        break;
                    }
                    match accept_result {
                        Ok((stream, _peer_addr)) => {
                            if tcp_nodelay {
                                let _ = stream.set_nodelay(true);
                            }
                            metrics.inc_connections();

                            let fd = stream.as_raw_fd();
                            let compiled = compiled.clone();
                            let metrics_conn = metrics.clone();
                            let metrics_cleanup = metrics.clone();
                            let shutdown_conn = shutdown.clone();
                            let conn_table_entry = conn_table.clone();
                            let conn_table_cleanup = conn_table.clone();
                            let tls_acceptor = tls_acceptor.clone();

                            let handle = tokio::task::spawn(async move {
                                let service = service_fn(move |req| {
                                    let compiled = compiled.clone();
                                    let metrics = metrics_conn.clone();
                                    let shutdown = shutdown_conn.clone();
                                    let conn_table_entry = conn_table_entry.clone();
                                    async move {
                                        shutdown.request_started();
                                        if let Some(rec) = conn_table_entry.write().get_mut(&fd) {
                                            rec.last_activity = Instant::now();
                                        }
                                        let start = Instant::now();
                                        let result = handle_request(
                                            req, &compiled, &metrics, keep_alive, gzip_min_size, max_request_size,
                                        ).await;
                                        metrics.record_latency(start.elapsed());
                                        shutdown.request_finished();
                                        result
                                    }
                                });

                                let serve = async {
                                    if let Some(acceptor) = tls_acceptor {
                                        let tls_stream = match acceptor.accept(stream).await {
                                            Ok(s) => s,
                                            Err(e) => {
                                                debug!(error = %e, "tls handshake failed");
                                                return;
                                            }
                                        };
                                        let io = TokioIo::new(tls_stream);
                                        let serve_res = auto::Builder::new(TokioExecutor::new())
                                            .serve_connection_with_upgrades(io, service)
                                            .await;
                                        if let Err(err) = serve_res {
                                            debug!(error = %err, "connection error");
                                        }
                                    } else {
                                        let io = TokioIo::new(stream);
                                        let serve_res = http1::Builder::new()
                                            .keep_alive(keep_alive)
                                            .pipeline_flush(false)
                                            .serve_connection(io, service)
                                            .with_upgrades()
                                            .await;
                                        if let Err(err) = serve_res {
                                            if !err.is_incomplete_message() {
                                                debug!(error = %err, "connection error");
                                            }
                                        }
                                    }
                                };

                                serve.await;

                                conn_table_cleanup.write().remove(&fd);
                                metrics_cleanup.dec_connections();
                            });

                            conn_table.write().insert(
                                fd,
                                ConnRecord {
                                    last_activity: Instant::now(),
                                    abort: handle.abort_handle(),
                                },
                            );
                        }
                        Err(e) => {
                            warn!(error = %e, "accept error");
                        }
                    }
                }
            }
        }

        if shutdown.active_requests() > 0 {
            shutdown.drain().await;
        }

        Ok(())
    }
}

/// One request, start to finish: dispatch, read the body if needed, run the
/// trampoline (or send a precomputed constant), write exactly one response
///. A body past `max_request_size` aborts the connection with
/// no response rather than rendering an error.
async fn handle_request(
    mut req: HyperRequest<Incoming>,
    compiled: &Arc<CompiledServer>,
    metrics: &Arc<ServerMetrics>,
    keep_alive: bool,
    gzip_min_size: usize,
    max_request_size: usize,
) -> Result<HyperResponse<Full<Bytes>>, std::io::Error> {
    metrics.inc_requests();

    let path_only = req.uri().path().to_string();

    if !compiled.websocket_routes.is_empty()
        && compiled.websocket_routes.contains_key(&path_only)
        && crate::websocket::is_upgrade_request(&req)
    {
        return Ok(handle_websocket_upgrade(req, &path_only, compiled).await);
    }

    let method = match crate::route::Method::parse(req.method().as_str()) {
        Ok(m) => m,
        Err(_) => return Ok(plain_response(StatusCode::METHOD_NOT_ALLOWED, b"Method Not Allowed")),
    };
    let path_and_query = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| req.uri().path().to_string());

    let outcome = compiled.dispatcher.dispatch(method, &path_only);

    match outcome {
        DispatchOutcome::NotFound => {
            debug!(path = %path_only, "not found");
            Ok(bytes_response(&compiled.not_found))
        }
        DispatchOutcome::Static(index) => {
            let bytes = compiled.static_response(index);
            metrics.add_bytes_sent(bytes.len() as u64);
            Ok(bytes_response(&bytes))
        }
        DispatchOutcome::Dynamic(index) | DispatchOutcome::NativeBuilder(index) => {
            let route = compiled.route(index);

            let raw_headers: Vec<(String, String)> = req
                .headers()
                .iter()
                .map(|(k, v)| (k.as_str().to_string(), v.to_str().unwrap_or("").to_string()))
                .collect();
            let accept_encoding = req
                .headers()
                .get("accept-encoding")
                .and_then(|v| v.to_str().ok())
                .map(|s| s.to_string());

            let body = if route.method.is_body_bearing() {
                let limited = Limited::new(req.into_body(), max_request_size);
                match limited.collect().await {
                    Ok(collected) => {
                        let bytes = collected.to_bytes();
                        metrics.add_bytes_received(bytes.len() as u64);
                        bytes.to_vec()
                    }
                    Err(_) => {
                        // Oversized or malformed body: close the connection
                        // without a response
                        // rather than guess at a partial one.
                        metrics.inc_errors();
                        return Err(std::io::Error::new(
                            std::io::ErrorKind::InvalidData,
                            "request body exceeded max_request_size",
                        ));
                    }
                }
            } else {
                Vec::new()
            };

            let ctx = TrampolineContext {
                compiled: compiled.as_ref(),
                keep_alive,
                accept_encoding: accept_encoding.as_deref(),
                gzip_min_size,
            };
            let raw = RawRequest {
                raw_headers: &raw_headers,
                body,
            };
            let rendered = trampoline::dispatch_dynamic(route, &path_and_query, raw, &ctx);
            match rendered {
                crate::response::RenderedResponse::Bytes(bytes) => {
                    metrics.add_bytes_sent(bytes.len() as u64);
                    Ok(bytes_response(&bytes))
                }
                crate::response::RenderedResponse::Streaming => {
                    // The handler already owns and wrote to the connection;
                    // hyper still needs a response value for this request,
                    // so hand back an empty body.
                    Ok(HyperResponse::new(Full::new(Bytes::new())))
                }
            }
        }
    }
}

/// Complete the websocket handshake and spawn a task to drive the
/// established connection to completion; the opaque-sink contract means
/// this loop never inspects frames itself.
async fn handle_websocket_upgrade(
    mut req: HyperRequest<Incoming>,
    path: &str,
    compiled: &Arc<CompiledServer>,
) -> HyperResponse<Full<Bytes>> {
    let handler = match compiled.websocket_routes.get(path) {
        Some(h) => h.clone(),
        None => return plain_response(StatusCode::NOT_FOUND, b"Not Found"),
    };

    match crate::websocket::upgrade(&mut req) {
        Ok((response, pending)) => {
            tokio::task::spawn(async move {
                match pending.await {
                    Ok(socket) => crate::websocket::drive(socket, handler).await,
                    Err(e) => warn!(error = %e, "websocket handshake failed"),
                }
            });
            let (parts, _) = response.into_parts();
            HyperResponse::from_parts(parts, Full::new(Bytes::new()))
        }
        Err(e) => {
            warn!(error = %e, "websocket upgrade rejected");
            plain_response(StatusCode::BAD_REQUEST, b"Bad Request")
        }
    }
}

fn bytes_response(raw: &[u8]) -> HyperResponse<Full<Bytes>> {
    // `raw` is already a fully-rendered HTTP/1.1 response (status line,
    // headers, body); hyper's Response type wants structured parts, so this
    // splits on the blank-line boundary written by `response::build`.
    if let Some(split) = find_header_body_split(raw) {
        let (head, body) = raw.split_at(split);
        let body = &body[4..]; // past the "\r\n\r\n"
        if let Some(parsed) = parse_head(head) {
            let mut builder = HyperResponse::builder().status(parsed.0);
            for (k, v) in parsed.1 {
                builder = builder.header(k, v);
            }
            if let Ok(resp) = builder.body(Full::new(Bytes::copy_from_slice(body))) {
                return resp;
            }
        }
    }
    plain_response(StatusCode::INTERNAL_SERVER_ERROR, b"Internal Server Error")
}

fn find_header_body_split(raw: &[u8]) -> Option<usize> {
    raw.windows(4).position(|w| w == b"\r\n\r\n")
}

fn parse_head(head: &[u8]) -> Option<(StatusCode, Vec<(String, String)>)> {
    let text = std::str::from_utf8(head).ok()?;
    let mut lines = text.split("\r\n");
    let status_line = lines.next()?;
    let status_code: u16 = status_line.split_whitespace().nth(1)?.parse().ok()?;
    let status = StatusCode::from_u16(status_code).ok()?;
    let mut headers = Vec::new();
    for line in lines {
        if line.is_empty() {
            continue;
        }
        if let Some((k, v)) = line.split_once(": ") {
            if k.eq_ignore_ascii_case("content-length") {
                continue; // hyper computes this from the body it's given
            }
            headers.push((k.to_string(), v.to_string()));
        }
    }
    Some((status, headers))
}

fn plain_response(status: StatusCode, body: &'static [u8]) -> HyperResponse<Full<Bytes>> {
    HyperResponse::builder()
        .status(status)
        .body(Full::new(Bytes::from_static(body)))
        .unwrap_or_else(|_| HyperResponse::new(Full::new(Bytes::from_static(b"Internal Server Error"))))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_config_defaults() {
        let config = ServerConfig::new("0.0.0.0", 8080).workers(4).max_connections(5000);
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.workers, 4);
        assert_eq!(config.max_connections, 5000);
    }

    #[test]
    fn server_metrics_counts() {
        let metrics = ServerMetrics::new();
        metrics.inc_requests();
        metrics.inc_requests();
        metrics.inc_connections();
        assert_eq!(metrics.total_requests.load(Ordering::Relaxed), 2);
        assert_eq!(metrics.active_connections.load(Ordering::Relaxed), 1);
        metrics.dec_connections();
        assert_eq!(metrics.active_connections.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn metrics_snapshot_reports_bytes() {
        let metrics = ServerMetrics::new();
        metrics.inc_requests();
        metrics.add_bytes_received(100);
        metrics.add_bytes_sent(200);
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.total_requests, 1);
        assert_eq!(snapshot.bytes_received, 100);
        assert_eq!(snapshot.bytes_sent, 200);
    }

    #[tokio::test]
    async fn shutdown_coordinator_tracks_active_requests() {
        let shutdown = ShutdownCoordinator::new(Duration::from_secs(5));
        shutdown.request_started();
        assert_eq!(shutdown.active_requests(), 1);
        shutdown.request_finished();
        assert_eq!(shutdown.active_requests(), 0);
        assert!(!shutdown.is_shutting_down());
        shutdown.shutdown();
        assert!(shutdown.is_shutting_down());
    }

    #[test]
    fn http2_without_tls_fails_validation() {
        let config = ServerConfig::new("127.0.0.1", 8000).http2(true);
        assert!(config.validate().is_err());
    }

    #[test]
    fn bytes_response_round_trips_status_and_body() {
        let raw = crate::response::not_found_constant(None);
        let resp = bytes_response(&raw);
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
