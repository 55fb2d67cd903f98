//! Engine seam and the built-in proxy core.
//!
//! The lifecycle layer only sees [`Engine`] and [`Instance`]. [`ProxyCore`]
//! is the implementation the host ABIs are wired to: it owns a dedicated
//! tokio runtime per instance, binds one listener per inbound and relays
//! every accepted connection through the default (first) outbound.

mod http;
mod outbound;
mod socks;

use crate::config::{CoreConfig, InboundConfig, InboundKind, OutboundConfig};
use crate::logger::{self, BreadcrumbFlags, ErrorCategory};
use parking_lot::Mutex;
use rustc_hash::FxHashSet;
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{copy_bidirectional, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::{Builder, Handle, Runtime};
use tokio::task::JoinHandle;
use tokio::time;

/// Factory side of an engine: validates configuration into instances.
pub trait Engine: Send + Sync {
    type Instance: Instance;

    fn version(&self) -> &'static str;

    fn create(&self, config: CoreConfig) -> Result<Self::Instance, EngineError>;
}

/// One engine instance. `start` acquires network resources, `close`
/// releases them.
pub trait Instance: Send {
    fn start(&mut self) -> Result<(), EngineError>;

    fn close(&mut self) -> Result<(), EngineError>;
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("failed to build runtime: {0}")]
    Runtime(#[source] io::Error),
    #[error("existing tag found: {0}")]
    DuplicateTag(String),
    #[error("no outbound configured")]
    NoOutbound,
    #[error("failed to listen on {addr}: {source}")]
    Listen {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("instance already started")]
    AlreadyStarted,
    #[error("instance already closed")]
    Closed,
}

/// Tuning knobs for [`ProxyCore`] instances.
#[derive(Debug, Clone, Copy)]
pub struct CoreOptions {
    pub worker_threads: usize,
    pub handshake_timeout: Duration,
    pub dial_timeout: Duration,
    pub shutdown_grace: Duration,
}

impl Default for CoreOptions {
    fn default() -> Self {
        Self {
            worker_threads: 2,
            handshake_timeout: Duration::from_secs(10),
            dial_timeout: Duration::from_secs(10),
            shutdown_grace: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ProxyCore {
    options: CoreOptions,
}

impl ProxyCore {
    pub fn new(options: CoreOptions) -> Self {
        Self { options }
    }
}

impl Engine for ProxyCore {
    type Instance = CoreInstance;

    fn version(&self) -> &'static str {
        env!("CARGO_PKG_VERSION")
    }

    fn create(&self, config: CoreConfig) -> Result<CoreInstance, EngineError> {
        if config.outbounds.is_empty() {
            return Err(EngineError::NoOutbound);
        }
        ensure_unique_tags(config.inbounds.iter().map(|inbound| inbound.tag.as_deref()))?;
        ensure_unique_tags(config.outbounds.iter().map(|outbound| outbound.tag.as_deref()))?;

        let runtime = Builder::new_multi_thread()
            .worker_threads(self.options.worker_threads.max(1))
            .thread_name("v2ray-core")
            .enable_io()
            .enable_time()
            .build()
            .map_err(EngineError::Runtime)?;

        logger::breadcrumb(
            BreadcrumbFlags::ENGINE,
            format!(
                "core instance created (inbounds={}, outbounds={})",
                config.inbounds.len(),
                config.outbounds.len()
            ),
        );

        Ok(CoreInstance {
            config,
            options: self.options,
            runtime: Some(runtime),
            accept_tasks: Vec::new(),
            local_addrs: Vec::new(),
            state: InstanceState::Created,
        })
    }
}

fn ensure_unique_tags<'a>(tags: impl Iterator<Item = Option<&'a str>>) -> Result<(), EngineError> {
    let mut seen = FxHashSet::default();
    for tag in tags.flatten() {
        if !seen.insert(tag) {
            return Err(EngineError::DuplicateTag(tag.to_string()));
        }
    }
    Ok(())
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum InstanceState {
    Created,
    Running,
    Closed,
}

pub struct CoreInstance {
    config: CoreConfig,
    options: CoreOptions,
    runtime: Option<Runtime>,
    accept_tasks: Vec<JoinHandle<()>>,
    local_addrs: Vec<SocketAddr>,
    state: InstanceState,
}

impl CoreInstance {
    /// Addresses the inbounds are bound to, in configuration order. Empty
    /// until started.
    pub fn local_addrs(&self) -> &[SocketAddr] {
        &self.local_addrs
    }
}

impl Instance for CoreInstance {
    fn start(&mut self) -> Result<(), EngineError> {
        match self.state {
            InstanceState::Running => return Err(EngineError::AlreadyStarted),
            InstanceState::Closed => return Err(EngineError::Closed),
            InstanceState::Created => {}
        }
        let runtime = self.runtime.as_ref().ok_or(EngineError::Closed)?;

        // Bind everything before spawning so a busy port leaves nothing behind.
        let mut listeners = Vec::with_capacity(self.config.inbounds.len());
        for inbound in &self.config.inbounds {
            let addr = inbound.listen;
            let listener = std::net::TcpListener::bind(addr)
                .and_then(|listener| listener.set_nonblocking(true).map(|_| listener))
                .map_err(|source| EngineError::Listen { addr, source })?;
            listeners.push(listener);
        }

        let _guard = runtime.enter();
        let mut bound = Vec::with_capacity(listeners.len());
        for (inbound, listener) in self.config.inbounds.iter().zip(listeners) {
            let addr = inbound.listen;
            let local = listener
                .local_addr()
                .map_err(|source| EngineError::Listen { addr, source })?;
            let listener = TcpListener::from_std(listener)
                .map_err(|source| EngineError::Listen { addr, source })?;
            bound.push((inbound, local, listener));
        }

        let outbound = Arc::new(self.config.outbounds[0].clone());
        let mut local_addrs = Vec::with_capacity(bound.len());
        let mut tasks = Vec::with_capacity(bound.len());
        for (inbound, local, listener) in bound {
            if let InboundKind::Socks { udp: true, .. } = inbound.kind {
                logger::debug(format!("socks inbound on {local}: udp relay is not supported"));
            }
            logger::breadcrumb(
                BreadcrumbFlags::INBOUND,
                format!("{} inbound listening on {local}", inbound.kind.protocol()),
            );
            local_addrs.push(local);
            tasks.push(runtime.spawn(serve(
                listener,
                Arc::new(inbound.clone()),
                Arc::clone(&outbound),
                self.options,
            )));
        }

        if let Some(level) = self.config.log_level {
            logger::set_level(level);
        }
        self.local_addrs = local_addrs;
        self.accept_tasks = tasks;
        self.state = InstanceState::Running;
        logger::info(format!(
            "core instance serving {} inbound(s) via {}",
            self.local_addrs.len(),
            self.config.outbounds[0].kind.protocol()
        ));
        Ok(())
    }

    fn close(&mut self) -> Result<(), EngineError> {
        if self.state == InstanceState::Closed {
            return Err(EngineError::Closed);
        }
        for task in self.accept_tasks.drain(..) {
            task.abort();
        }
        if let Some(runtime) = self.runtime.take() {
            shutdown(runtime, self.options.shutdown_grace);
        }
        self.local_addrs.clear();
        self.state = InstanceState::Closed;
        logger::breadcrumb(BreadcrumbFlags::ENGINE, "core instance closed");
        Ok(())
    }
}

/// Shuts the runtime down and waits up to `grace` for its workers.
///
/// Blocking shutdown panics on a thread that is itself driving a runtime, so
/// when called from async code the wait happens on a helper thread instead.
fn shutdown(runtime: Runtime, grace: Duration) {
    if Handle::try_current().is_err() {
        runtime.shutdown_timeout(grace);
        return;
    }
    let slot = Arc::new(Mutex::new(Some(runtime)));
    let worker_slot = Arc::clone(&slot);
    let spawned = thread::Builder::new()
        .name("v2ray-core-shutdown".into())
        .spawn(move || {
            if let Some(runtime) = worker_slot.lock().take() {
                runtime.shutdown_timeout(grace);
            }
        });
    match spawned {
        Ok(worker) => {
            if worker.join().is_err() {
                logger::error("runtime shutdown thread panicked");
            }
        }
        Err(error) => {
            logger::warn(format!("shutdown thread unavailable ({error}), detaching runtime"));
            if let Some(runtime) = slot.lock().take() {
                runtime.shutdown_background();
            }
        }
    }
}

impl Drop for CoreInstance {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

/// Destination requested by an inbound handshake.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Target {
    pub host: String,
    pub port: u16,
}

impl Target {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Parses `host:port` or `[v6]:port`, falling back to `default_port`.
    pub fn parse(value: &str, default_port: u16) -> Option<Self> {
        let (host, port) = if let Some(rest) = value.strip_prefix('[') {
            let (host, tail) = rest.split_once(']')?;
            let port = match tail.strip_prefix(':') {
                Some(port) => port.parse().ok()?,
                None if tail.is_empty() => default_port,
                None => return None,
            };
            (host, port)
        } else {
            match value.rsplit_once(':') {
                Some((host, _)) if host.contains(':') => return None,
                Some((host, port)) => (host, port.parse().ok()?),
                None => (value, default_port),
            }
        };
        if host.is_empty() || port == 0 {
            return None;
        }
        Some(Self::new(host, port))
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// How the inbound expects the dial outcome to be reported to its client.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Reply {
    Socks,
    HttpTunnel,
    HttpForward,
    Silent,
}

impl Reply {
    async fn succeed(self, stream: &mut TcpStream) -> io::Result<()> {
        match self {
            Reply::Socks => stream.write_all(&socks::reply(socks::REPLY_SUCCEEDED)).await,
            Reply::HttpTunnel => stream.write_all(http::TUNNEL_ESTABLISHED).await,
            Reply::HttpForward | Reply::Silent => Ok(()),
        }
    }

    async fn fail(self, stream: &mut TcpStream) -> io::Result<()> {
        match self {
            Reply::Socks => {
                stream
                    .write_all(&socks::reply(socks::REPLY_HOST_UNREACHABLE))
                    .await
            }
            Reply::HttpTunnel | Reply::HttpForward => stream.write_all(http::BAD_GATEWAY).await,
            Reply::Silent => Ok(()),
        }
    }
}

/// Outcome of an inbound handshake.
#[derive(Debug)]
pub(crate) struct Request {
    pub target: Target,
    pub reply: Reply,
    /// Bytes to send upstream before relaying.
    pub preface: Vec<u8>,
}

async fn serve(
    listener: TcpListener,
    inbound: Arc<InboundConfig>,
    outbound: Arc<OutboundConfig>,
    options: CoreOptions,
) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                let inbound = Arc::clone(&inbound);
                let outbound = Arc::clone(&outbound);
                tokio::spawn(async move {
                    if let Err(error) =
                        handle_connection(stream, peer, &inbound, &outbound, options).await
                    {
                        logger::rate_limited_error(
                            ErrorCategory::Relay,
                            format!("connection from {peer} ended: {error}"),
                        );
                    }
                });
            }
            Err(error) => {
                logger::rate_limited_error(ErrorCategory::Accept, format!("accept failed: {error}"));
                time::sleep(Duration::from_millis(50)).await;
            }
        }
    }
}

async fn handle_connection(
    mut client: TcpStream,
    peer: SocketAddr,
    inbound: &InboundConfig,
    outbound: &OutboundConfig,
    options: CoreOptions,
) -> io::Result<()> {
    let _ = client.set_nodelay(true);
    let handshake = async {
        match &inbound.kind {
            InboundKind::Socks { accounts, .. } => socks::negotiate(&mut client, accounts).await,
            InboundKind::Http => http::read_request(&mut client).await,
            InboundKind::DokodemoDoor { address, port } => Ok(Request {
                target: Target::new(address.clone(), *port),
                reply: Reply::Silent,
                preface: Vec::new(),
            }),
        }
    };
    let request = match time::timeout(options.handshake_timeout, handshake).await {
        Ok(Ok(request)) => request,
        Ok(Err(error)) => {
            logger::rate_limited_error(
                ErrorCategory::Handshake,
                format!("{} handshake from {peer} failed: {error}", inbound.kind.protocol()),
            );
            return Ok(());
        }
        Err(_) => return Err(timed_out("handshake")),
    };

    logger::breadcrumb(
        BreadcrumbFlags::OUTBOUND,
        format!(
            "{peer} -> {} via {}",
            request.target,
            outbound.kind.protocol()
        ),
    );

    let dialed = time::timeout(
        options.dial_timeout,
        outbound::dial(outbound.kind, &request.target),
    )
    .await
    .unwrap_or_else(|_| Err(timed_out("dial")));
    let remote = match dialed {
        Ok(remote) => remote,
        Err(error) => {
            let _ = request.reply.fail(&mut client).await;
            logger::rate_limited_error(
                ErrorCategory::Dial,
                format!("dial {} failed: {error}", request.target),
            );
            return Ok(());
        }
    };
    request.reply.succeed(&mut client).await?;

    let Some(mut remote) = remote else {
        client.shutdown().await.ok();
        return Ok(());
    };
    if !request.preface.is_empty() {
        remote.write_all(&request.preface).await?;
    }
    copy_bidirectional(&mut client, &mut remote).await?;
    Ok(())
}

fn timed_out(stage: &str) -> io::Error {
    io::Error::new(io::ErrorKind::TimedOut, format!("{stage} timed out"))
}

fn invalid_data(message: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message.into())
}

#[cfg(test)]
mod tests;
