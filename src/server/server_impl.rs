use crate::{
    limits::{ConnLimits, ReqLimits, ServerLimits, WaitStrategy},
    router::Router,
    server::connection::HttpConnection,
};
use crossbeam::queue::SegQueue;
use std::{io, net::SocketAddr, sync::Arc};
use tokio::{
    net::{TcpListener, TcpStream},
    task::yield_now,
    time::sleep as tokio_sleep,
};
use tracing::debug;

/// An HTTP/1.1 origin server.
///
/// Accepted connections go through a bounded admission queue drained by a
/// fixed pool of worker tasks; each worker drives one connection at a
/// time through the full request loop. The compiled route table is shared
/// read-only across all of them.
///
/// # Examples
///
/// ```no_run
/// use pier_web::{Reply, Router, Server};
///
/// #[tokio::main]
/// async fn main() {
///     Server::builder()
///         .router(Router::new().route("/", |_| async {
///             Ok(Reply::from("<h1>Main Page</h1>"))
///         }))
///         .build()
///         .launch()
///         .await;
/// }
/// ```
pub struct Server {
    listener: Option<TcpListener>,
    stream_queue: TcpQueue,
    server_limits: ServerLimits,
}

impl Server {
    /// Creates a new builder for configuring the server instance.
    #[inline]
    pub fn builder() -> ServerBuilder {
        ServerBuilder {
            router: None,
            listener: None,
            server_limits: None,
            connection_limits: None,
            request_limits: None,
        }
    }

    /// Starts accepting connections and never returns.
    ///
    /// Binds the default endpoint `127.0.0.1:1818` unless
    /// [`listener`](ServerBuilder::listener) supplied one.
    ///
    /// # Panics
    ///
    /// Panics when the default endpoint cannot be bound.
    pub async fn launch(self) {
        let listener = match self.listener {
            Some(listener) => listener,
            None => default_listener().expect("failed to bind the default endpoint 127.0.0.1:1818"),
        };

        loop {
            let Ok(accepted) = listener.accept().await else {
                continue;
            };

            match self.stream_queue.len() < self.server_limits.max_pending_connections {
                true => self.stream_queue.push(accepted),
                false => {
                    // Over capacity: shed the connection at the door.
                    debug!(addr = %accepted.1, "admission queue full, dropping connection");
                }
            }
        }
    }

    #[inline]
    async fn get_stream(queue: &TcpQueue, wait: &WaitStrategy) -> (TcpStream, SocketAddr) {
        loop {
            if let Some(value) = queue.pop() {
                return value;
            }

            match wait {
                WaitStrategy::Yield => yield_now().await,
                WaitStrategy::Sleep(time) => tokio_sleep(*time).await,
            }
        }
    }
}

/// Builder for configuring and creating [`Server`] instances.
pub struct ServerBuilder {
    router: Option<Router>,
    listener: Option<TcpListener>,
    server_limits: Option<ServerLimits>,
    connection_limits: Option<ConnLimits>,
    request_limits: Option<ReqLimits>,
}

impl ServerBuilder {
    /// Sets the route table. **This is a required component.**
    ///
    /// A default `404` body is installed unless the table already carries
    /// one.
    #[inline(always)]
    pub fn router(mut self, router: Router) -> Self {
        self.router = Some(router);
        self
    }

    /// Serves on an existing listener instead of the default endpoint.
    #[inline(always)]
    pub fn listener(mut self, listener: TcpListener) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Configures worker-pool sizing and connection admission.
    #[inline(always)]
    pub fn server_limits(mut self, limits: ServerLimits) -> Self {
        self.server_limits = Some(limits);
        self
    }

    /// Configures the per-connection deadlines.
    #[inline(always)]
    pub fn connection_limits(mut self, limits: ConnLimits) -> Self {
        self.connection_limits = Some(limits);
        self
    }

    /// Configures request parsing limits.
    #[inline(always)]
    pub fn request_limits(mut self, limits: ReqLimits) -> Self {
        self.request_limits = Some(limits);
        self
    }

    /// Finalizes the builder, compiles the route table and spawns the
    /// worker pool. Must run inside a tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics when [`router`](Self::router) was not called.
    #[inline]
    #[track_caller]
    pub fn build(self) -> Server {
        let mut router = self
            .router
            .expect("The `router` method must be called to create");
        router.finalize();
        let router = Arc::new(router);

        let server_limits = self.server_limits.unwrap_or_default();
        let conn_limits = self.connection_limits.unwrap_or_default();
        let req_limits = self.request_limits.unwrap_or_default();

        let stream_queue: TcpQueue = Arc::new(SegQueue::new());
        for _ in 0..server_limits.workers {
            spawn_worker(&stream_queue, &router, &server_limits, &conn_limits, &req_limits);
        }

        Server {
            listener: self.listener,
            stream_queue,
            server_limits,
        }
    }
}

#[inline]
fn spawn_worker(
    queue: &TcpQueue,
    router: &Arc<Router>,
    server_limits: &ServerLimits,
    conn_limits: &ConnLimits,
    req_limits: &ReqLimits,
) {
    let queue = queue.clone();
    let router = router.clone();
    let wait_strategy = server_limits.wait_strategy.clone();
    let conn_limits = conn_limits.clone();
    let req_limits = req_limits.clone();

    tokio::spawn(async move {
        loop {
            let (stream, addr) = Server::get_stream(&queue, &wait_strategy).await;
            debug!(%addr, "connection accepted");

            let (read, write) = stream.into_split();
            let mut conn = HttpConnection::new(
                read,
                write,
                router.clone(),
                conn_limits.clone(),
                req_limits.clone(),
            );
            conn.run().await;

            debug!(%addr, "connection closed");
        }
    });
}

// Reuse-address keeps quick restarts from tripping over sockets in
// TIME_WAIT.
fn default_listener() -> io::Result<TcpListener> {
    use socket2::{Domain, Protocol, Socket, Type};

    let addr = SocketAddr::from(([127, 0, 0, 1], 1818));

    let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    socket.listen(1024)?;

    let listener: std::net::TcpListener = socket.into();
    listener.set_nonblocking(true)?;
    TcpListener::from_std(listener)
}

type TcpQueue = Arc<SegQueue<(TcpStream, SocketAddr)>>;
