use crate::{
    errors::ErrorKind,
    http::{
        request::Request,
        response::{Handled, Response},
        types::{Method, StatusCode},
    },
    limits::{ConnLimits, ReqLimits, RespLimits, ServerLimits, TlsConfig, WaitStrategy, WsLimits},
    server::connection::{ConnectionData, HttpConnection},
    transport::Conn,
    ws::Broadcast,
    ConnectionFilter, Version,
};
use crossbeam::queue::SegQueue;
use std::{
    future::Future,
    marker::{PhantomData, Send, Sync},
    net::SocketAddr,
    pin::Pin,
    sync::Arc,
};
use tokio::{
    net::{TcpListener, TcpStream},
    sync::mpsc,
    task::yield_now,
    time::sleep as tokio_sleep,
};

/// A trait for handling HTTP requests and generating responses.
///
/// You can use:
/// - `&self` for shared immutable data (e.g. database connection pool, router configuration)
/// - `&mut S` for connection-specific mutable state (e.g. authentication tokens, session data)
///
/// # Examples
///
/// Basic Request Handler
/// ```
/// use embers_web::{Handler, Request, Response, Handled, StatusCode};
///
/// struct MyHandler;
///
/// impl Handler for MyHandler {
///     async fn handle(&self, _: &mut (), req: &Request, resp: &mut Response) -> Handled {
///         // Simple echo handler
///         if req.url().target() == b"/echo" {
///             resp.status(StatusCode::Ok).body("Echo response")
///         } else {
///             resp.status(StatusCode::NotFound).body("Not found :(")
///         }
///     }
/// }
/// ```
/// Handler with [`ConnectionData`]
/// ```
/// use embers_web::{Handler, ConnectionData, Request, Response, Handled, StatusCode};
///
/// struct CountingHandler;
///
/// impl Handler<State> for CountingHandler {
///     async fn handle(&self, data: &mut State, req: &Request, resp: &mut Response) -> Handled {
///         data.request_count += 1;
///
///         resp.status(StatusCode::Ok)
///             .body(format!("Request #{}", data.request_count))
///     }
/// }
///
/// struct State {
///     request_count: usize,
/// }
///
/// impl ConnectionData for State {
///     fn new() -> Self {
///         Self { request_count: 0 }
///     }
///
///     fn reset(&mut self) {
///         self.request_count = 0;
///     }
/// }
/// ```
pub trait Handler<S = ()>
where
    Self: Sync + Send + 'static,
    S: ConnectionData,
{
    /// Processes an HTTP request and generates a response.
    ///
    /// # Parameters
    ///
    /// - `connection_data`: Mutable reference to connection-specific state
    /// - `req`: Immutable reference to the parsed HTTP request
    /// - `resp`: Mutable response builder for constructing the response
    ///
    /// # Returns
    ///
    /// `Handled` indicating whether the request was fully processed or
    /// requires further handling by other middleware.
    ///
    /// # Errors
    ///
    /// Implementations should handle errors internally and set appropriate
    /// HTTP status codes on the response. Panics will terminate the connection.
    fn handle(
        &self,
        connection_data: &mut S,
        request: &Request,
        response: &mut Response,
    ) -> impl Future<Output = Handled> + Send;
}

/// A trait for handling a single WebSocket session.
///
/// Registered against a resource with [`ServerBuilder::ws`]; invoked for
/// the lifetime of one upgraded connection instead of once per request,
/// mirroring [`Handler`] for the HTTP side.
///
/// # Examples
/// ```
/// use embers_web::{WsHandler, BroadcastHandle};
///
/// struct EchoRoom;
///
/// impl WsHandler for EchoRoom {
///     async fn on_message(
///         &self,
///         _: &mut (),
///         payload: &[u8],
///         broadcast: &BroadcastHandle<'_>,
///     ) -> Option<Vec<u8>> {
///         broadcast.send_to_all(payload.to_vec());
///         None
///     }
/// }
/// ```
pub trait WsHandler<S = ()>
where
    Self: Sync + Send + 'static,
    S: ConnectionData,
{
    /// Called once, immediately after the `101 Switching Protocols`
    /// handshake completes.
    fn on_open(
        &self,
        #[allow(unused_variables)] connection_data: &mut S,
        #[allow(unused_variables)] request: &Request,
    ) -> impl Future<Output = ()> + Send {
        async {}
    }

    /// Processes one complete WebSocket text or binary message.
    ///
    /// Called once per reassembled message (fragmented frames are already
    /// joined). Returning `Some(bytes)` sends `bytes` back to the sender as
    /// a single text frame; returning `None` sends nothing directly. Use
    /// `broadcast` to reach every session currently open on this resource,
    /// including or excluding the caller.
    ///
    /// The default implementation echoes the payload back to the sender.
    fn on_message(
        &self,
        #[allow(unused_variables)] connection_data: &mut S,
        payload: &[u8],
        #[allow(unused_variables)] broadcast: &BroadcastHandle<'_>,
    ) -> impl Future<Output = Option<Vec<u8>>> + Send {
        async move { Some(payload.to_vec()) }
    }

    /// Called once the session ends, for any reason (clean close, protocol
    /// violation, or socket error).
    fn on_close(
        &self,
        #[allow(unused_variables)] connection_data: &mut S,
    ) -> impl Future<Output = ()> + Send {
        async {}
    }
}

/// A handle scoped to one open WebSocket session, letting
/// [`WsHandler::on_message`] push a message to every session currently
/// registered on the same resource.
pub struct BroadcastHandle<'a> {
    pub(crate) path: &'a str,
    pub(crate) registry: &'a Broadcast<mpsc::UnboundedSender<Vec<u8>>>,
}

impl BroadcastHandle<'_> {
    /// Sends `payload` as a single text frame to every session (including
    /// the caller) currently open on this resource.
    pub fn send_to_all(&self, payload: impl Into<Vec<u8>>) {
        let payload = payload.into();
        for sender in self.registry.subscribers(self.path, None) {
            let _ = sender.send(payload.clone());
        }
    }
}

/// A trait for receiving request body bytes as they arrive, instead of
/// waiting for [`Handler::handle`] to run with a fully buffered body.
///
/// For `Transfer-Encoding: chunked` bodies, [`on_chunk`](Self::on_chunk) is
/// called once per dechunked fragment as it is reassembled. For
/// `Content-Length` bodies, which this crate buffers as a single contiguous
/// slice, it is called once with the whole body. Registered independently
/// of the method/path handler tables; the matching [`Handler`] still runs
/// afterwards with the complete `Request::body()`.
pub trait PayloadSink<S = ()>
where
    Self: Sync + Send + 'static,
    S: ConnectionData,
{
    fn on_chunk(
        &self,
        connection_data: &mut S,
        request: &Request,
        chunk: &[u8],
    ) -> impl Future<Output = ()> + Send;
}

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub(crate) trait ErasedHandler<S>: Send + Sync {
    fn call<'a>(
        &'a self,
        connection_data: &'a mut S,
        request: &'a Request,
        response: &'a mut Response,
    ) -> BoxFuture<'a, Handled>;
}

impl<H, S> ErasedHandler<S> for H
where
    H: Handler<S>,
    S: ConnectionData,
{
    fn call<'a>(
        &'a self,
        connection_data: &'a mut S,
        request: &'a Request,
        response: &'a mut Response,
    ) -> BoxFuture<'a, Handled> {
        Box::pin(self.handle(connection_data, request, response))
    }
}

pub(crate) trait ErasedWsHandler<S>: Send + Sync {
    fn open<'a>(&'a self, connection_data: &'a mut S, request: &'a Request) -> BoxFuture<'a, ()>;

    fn message<'a>(
        &'a self,
        connection_data: &'a mut S,
        payload: &'a [u8],
        broadcast: &'a BroadcastHandle<'a>,
    ) -> BoxFuture<'a, Option<Vec<u8>>>;

    fn close<'a>(&'a self, connection_data: &'a mut S) -> BoxFuture<'a, ()>;
}

impl<W, S> ErasedWsHandler<S> for W
where
    W: WsHandler<S>,
    S: ConnectionData,
{
    fn open<'a>(&'a self, connection_data: &'a mut S, request: &'a Request) -> BoxFuture<'a, ()> {
        Box::pin(WsHandler::on_open(self, connection_data, request))
    }

    fn message<'a>(
        &'a self,
        connection_data: &'a mut S,
        payload: &'a [u8],
        broadcast: &'a BroadcastHandle<'a>,
    ) -> BoxFuture<'a, Option<Vec<u8>>> {
        Box::pin(WsHandler::on_message(
            self,
            connection_data,
            payload,
            broadcast,
        ))
    }

    fn close<'a>(&'a self, connection_data: &'a mut S) -> BoxFuture<'a, ()> {
        Box::pin(WsHandler::on_close(self, connection_data))
    }
}

pub(crate) trait ErasedSink<S>: Send + Sync {
    fn feed<'a>(
        &'a self,
        connection_data: &'a mut S,
        request: &'a Request,
        chunk: &'a [u8],
    ) -> BoxFuture<'a, ()>;
}

impl<P, S> ErasedSink<S> for P
where
    P: PayloadSink<S>,
    S: ConnectionData,
{
    fn feed<'a>(
        &'a self,
        connection_data: &'a mut S,
        request: &'a Request,
        chunk: &'a [u8],
    ) -> BoxFuture<'a, ()> {
        Box::pin(self.on_chunk(connection_data, request, chunk))
    }
}

/// A small `path -> handler` table resolved by longest-prefix match: the
/// registered prefix `p` wins when `p == resource` or
/// `resource[p.len()] == b'/'`, and ties are broken by the longer `p`.
/// Implemented as a linear scan, which is the right trade-off for the
/// small number of routes a single service typically registers (no
/// allocation on the hot path, no tree to keep balanced).
pub(crate) struct RouteTable<T: ?Sized> {
    routes: Vec<(Vec<u8>, Arc<T>)>,
}

impl<T: ?Sized> RouteTable<T> {
    fn new() -> Self {
        Self { routes: Vec::new() }
    }

    fn insert(&mut self, path: impl AsRef<[u8]>, value: Arc<T>) {
        self.routes.push((path.as_ref().to_vec(), value));
    }

    fn find(&self, resource: &[u8]) -> Option<&Arc<T>> {
        self.routes
            .iter()
            .filter(|(prefix, _)| {
                resource.len() >= prefix.len()
                    && resource.starts_with(prefix.as_slice())
                    && (resource.len() == prefix.len() || resource[prefix.len()] == b'/')
            })
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, value)| value)
    }
}

/// Every method/path handler table plus the WebSocket and error-hook
/// registrations a built [`Server`] dispatches against.
pub(crate) struct Routes<S> {
    get: RouteTable<dyn ErasedHandler<S>>,
    post: RouteTable<dyn ErasedHandler<S>>,
    put: RouteTable<dyn ErasedHandler<S>>,
    delete: RouteTable<dyn ErasedHandler<S>>,
    options: RouteTable<dyn ErasedHandler<S>>,
    ws: RouteTable<dyn ErasedWsHandler<S>>,
    sinks: RouteTable<dyn ErasedSink<S>>,
    not_found: Option<Arc<dyn ErasedHandler<S>>>,
    bad_request: Option<Arc<dyn ErasedHandler<S>>>,
    pub(crate) ws_broadcast: Broadcast<mpsc::UnboundedSender<Vec<u8>>>,
}

impl<S> Routes<S> {
    pub(crate) fn new() -> Self {
        Self {
            get: RouteTable::new(),
            post: RouteTable::new(),
            put: RouteTable::new(),
            delete: RouteTable::new(),
            options: RouteTable::new(),
            ws: RouteTable::new(),
            sinks: RouteTable::new(),
            not_found: None,
            bad_request: None,
            ws_broadcast: Broadcast::new(),
        }
    }

    /// The `GET`/`HEAD` table doubles for both methods (`HEAD` responses
    /// are a `GET` response with the body dropped by the caller).
    pub(crate) fn dispatch(&self, method: Method, path: &[u8]) -> Option<&Arc<dyn ErasedHandler<S>>> {
        match method {
            Method::Get | Method::Head => self.get.find(path),
            Method::Post => self.post.find(path),
            Method::Put => self.put.find(path),
            Method::Delete => self.delete.find(path),
            Method::Options => self.options.find(path),
            Method::Patch => None,
        }
    }

    pub(crate) fn ws_handler(&self, path: &[u8]) -> Option<&Arc<dyn ErasedWsHandler<S>>> {
        self.ws.find(path)
    }

    pub(crate) fn sink(&self, path: &[u8]) -> Option<&Arc<dyn ErasedSink<S>>> {
        self.sinks.find(path)
    }

    pub(crate) fn not_found(&self) -> Option<&Arc<dyn ErasedHandler<S>>> {
        self.not_found.as_ref()
    }

    pub(crate) fn bad_request(&self) -> Option<&Arc<dyn ErasedHandler<S>>> {
        self.bad_request.as_ref()
    }

    #[cfg(test)]
    pub(crate) fn insert_get_for_test(&mut self, path: impl AsRef<[u8]>, handler: Arc<dyn ErasedHandler<S>>) {
        self.get.insert(path, handler);
    }

    /// Renders the default `404` when no [`ServerBuilder::not_found`] hook
    /// is registered: a JSON body naming the requested path, per the
    /// method/path dispatch contract.
    pub(crate) fn render_default_not_found(request: &Request, response: &mut Response) {
        let path = String::from_utf8_lossy(request.url().path());
        response
            .status(StatusCode::NotFound)
            .header("content-type", "application/json")
            .body(format!(
                r#"{{"error":"Not Found","code":404,"path":{path:?}}}"#
            ));
    }
}

/// An HTTP server that processes incoming connections and requests.
///
/// The server uses a pre-allocated connection pool for maximum performance
/// and implements graceful connection handling with configurable limits.
///
/// # Examples
///
/// ```no_run
/// use embers_web::{Server, Handler, Request, Response, Handled, StatusCode};
/// use tokio::net::TcpListener;
///
/// struct MyHandler;
///
/// impl Handler for MyHandler {
///     async fn handle(&self, _: &mut (), _: &Request, resp: &mut Response) -> Handled {
///         resp.status(StatusCode::Ok).body("Hello world!")
///     }
/// }
///
/// #[tokio::main]
/// async fn main() {
///     Server::builder()
///         .listener(TcpListener::bind("127.0.0.1:8080").await.unwrap())
///         .get("/", MyHandler)
///         .build()
///         .launch()
///         .await
/// }
/// ```
pub struct Server {
    listener: TcpListener,
    stream_queue: TcpQueue,
    error_queue: TcpQueue,
    server_limits: ServerLimits,
}

impl Server {
    /// Creates a new builder for configuring the server instance.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # embers_web::impt_default_handler!{ MyStruct }
    /// # #[tokio::main]
    /// # async fn main() {
    /// use tokio::net::TcpListener;
    /// use embers_web::Server;
    ///
    /// let server = Server::builder()
    ///     .listener(TcpListener::bind("127.0.0.1:8080").await.unwrap())
    ///     .get("/", MyStruct) // structure with Handler implementation
    ///     .build();
    /// # }
    /// ```
    #[inline]
    pub fn builder<S>() -> ServerBuilder<S, ()>
    where
        S: ConnectionData,
    {
        ServerBuilder {
            listener: None,
            routes: Routes::new(),
            connection_filter: Arc::new(()),
            tls: None,
            _marker: PhantomData,

            server_limits: None,
            request_limits: None,
            response_limits: None,
            connection_limits: None,
            ws_limits: None,
        }
    }

    /// Starts the server and begins accepting incoming connections.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # embers_web::impt_default_handler!{ MyStruct }
    /// # #[tokio::main]
    /// # async fn main() {
    /// use embers_web::Server;
    /// use tokio::net::TcpListener;
    ///
    /// Server::builder()
    ///     .listener(TcpListener::bind("127.0.0.1:8080").await.unwrap())
    ///     .get("/", MyStruct) // structure with Handler implementation
    ///     .build()
    ///     .launch()
    ///     .await
    /// # }
    /// ```
    #[inline]
    pub async fn launch(self) {
        loop {
            let Ok(value) = self.listener.accept().await else {
                continue;
            };

            match self.stream_queue.len() < self.server_limits.max_pending_connections {
                true => self.stream_queue.push(value),
                false => self.error_queue.push(value),
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

//

/// Builder for configuring and creating [`Server`] instances.
///
/// # Protocol Support
///
/// - `HTTP/1.1` and `HTTP/1.0`: Always enabled
/// - WebSocket upgrades: handled per-path via [`ServerBuilder::ws`]; a
///   request is only upgraded when a WebSocket handler is registered at
///   the matching resource
/// - TLS: opt-in via [`ServerBuilder::tls`]
pub struct ServerBuilder<S = (), F = ()>
where
    S: ConnectionData,
    F: ConnectionFilter,
{
    listener: Option<TcpListener>,
    routes: Routes<S>,
    connection_filter: Arc<F>,
    tls: Option<TlsConfig>,
    _marker: PhantomData<S>,

    server_limits: Option<ServerLimits>,
    request_limits: Option<ReqLimits>,
    response_limits: Option<RespLimits>,
    connection_limits: Option<ConnLimits>,
    ws_limits: Option<WsLimits>,
}

impl<S, F> ServerBuilder<S, F>
where
    S: ConnectionData,
    F: ConnectionFilter,
{
    /// Sets the TCP listener that the server will use to accept connections.
    ///
    /// **This is a required component.**
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # embers_web::impt_default_handler!{ MyStruct }
    /// # #[tokio::main]
    /// # async fn main() {
    /// use tokio::net::TcpListener;
    /// use embers_web::Server;
    ///
    /// let server = Server::builder()
    ///     .listener(TcpListener::bind("127.0.0.1:8080").await.unwrap())
    ///     .get("/", MyStruct) // structure with Handler implementation
    ///     .build();
    /// # }
    /// ```
    #[inline(always)]
    pub fn listener(mut self, listener: TcpListener) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Registers `handler` to answer `GET` (and `HEAD`) requests whose
    /// resource is `path` or a sub-path of it (longest registered prefix
    /// wins when more than one matches).
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use embers_web::{Server, Handler, Request, Response, Handled, StatusCode};
    /// use tokio::net::TcpListener;
    ///
    /// struct MyStruct;
    ///
    /// impl Handler for MyStruct {
    ///     async fn handle(&self, _: &mut (), _: &Request, resp: &mut Response) -> Handled {
    ///         resp.status(StatusCode::Ok).body("Hello World!")
    ///     }
    /// }
    ///
    /// # #[tokio::main]
    /// # async fn main() {
    /// let server = Server::builder()
    ///     .listener(TcpListener::bind("127.0.0.1:8080").await.unwrap())
    ///     .get("/", MyStruct)
    ///     .build();
    /// # }
    /// ```
    #[inline(always)]
    pub fn get<H: Handler<S>>(mut self, path: impl AsRef<[u8]>, handler: H) -> Self {
        self.routes.get.insert(path, Arc::new(handler));
        self
    }

    /// Registers `handler` to answer `POST` requests matching `path`
    /// (see [`get`](Self::get) for the prefix-matching rule).
    #[inline(always)]
    pub fn post<H: Handler<S>>(mut self, path: impl AsRef<[u8]>, handler: H) -> Self {
        self.routes.post.insert(path, Arc::new(handler));
        self
    }

    /// Registers `handler` to answer `PUT` requests matching `path`
    /// (see [`get`](Self::get) for the prefix-matching rule).
    #[inline(always)]
    pub fn put<H: Handler<S>>(mut self, path: impl AsRef<[u8]>, handler: H) -> Self {
        self.routes.put.insert(path, Arc::new(handler));
        self
    }

    /// Registers `handler` to answer `DELETE` requests matching `path`
    /// (see [`get`](Self::get) for the prefix-matching rule).
    #[inline(always)]
    pub fn delete<H: Handler<S>>(mut self, path: impl AsRef<[u8]>, handler: H) -> Self {
        self.routes.delete.insert(path, Arc::new(handler));
        self
    }

    /// Registers `handler` to answer `OPTIONS` requests matching `path`
    /// (see [`get`](Self::get) for the prefix-matching rule). `OPTIONS *`
    /// and `OPTIONS /*` are answered automatically with an `Allow` header
    /// and never reach this table.
    #[inline(always)]
    pub fn options<H: Handler<S>>(mut self, path: impl AsRef<[u8]>, handler: H) -> Self {
        self.routes.options.insert(path, Arc::new(handler));
        self
    }

    /// Registers `handler` to drive a WebSocket session opened against
    /// `path`. A WebSocket upgrade is only accepted when a matching entry
    /// exists here; otherwise the request falls through to ordinary HTTP
    /// dispatch (and most likely a `404`).
    ///
    /// # Examples
    /// ```no_run
    /// # #[tokio::main]
    /// # async fn main() {
    /// use embers_web::{Server, WsHandler, BroadcastHandle};
    /// use tokio::net::TcpListener;
    ///
    /// struct ChatRoom;
    ///
    /// impl WsHandler for ChatRoom {
    ///     async fn on_message(
    ///         &self, _: &mut (), payload: &[u8], broadcast: &BroadcastHandle<'_>,
    ///     ) -> Option<Vec<u8>> {
    ///         broadcast.send_to_all(payload.to_vec());
    ///         None
    ///     }
    /// }
    ///
    /// let server = Server::builder()
    ///     .listener(TcpListener::bind("127.0.0.1:8080").await.unwrap())
    ///     .ws("/chat", ChatRoom)
    ///     .build();
    /// # }
    /// ```
    #[inline(always)]
    pub fn ws<W: WsHandler<S>>(mut self, path: impl AsRef<[u8]>, handler: W) -> Self {
        self.routes.ws.insert(path, Arc::new(handler));
        self
    }

    /// Registers `sink` to receive request body bytes for `path` as they
    /// arrive, independently of whatever [`Handler`] ultimately answers the
    /// request. See [`PayloadSink`] for exactly when it is called.
    #[inline(always)]
    pub fn sink<P: PayloadSink<S>>(mut self, path: impl AsRef<[u8]>, sink: P) -> Self {
        self.routes.sinks.insert(path, Arc::new(sink));
        self
    }

    /// Overrides the response sent when no handler table entry matches a
    /// request's method and path. Without this, a `404` with a JSON body
    /// naming the requested path is sent.
    #[inline(always)]
    pub fn not_found<H: Handler<S>>(mut self, handler: H) -> Self {
        self.routes.not_found = Some(Arc::new(handler));
        self
    }

    /// Overrides the response sent when request parsing fails (malformed
    /// method/URL/headers/body). Without this, the fixed
    /// [`ErrorKind::as_http`](crate::errors::ErrorKind) rendering is sent.
    #[inline(always)]
    pub fn bad_request<H: Handler<S>>(mut self, handler: H) -> Self {
        self.routes.bad_request = Some(Arc::new(handler));
        self
    }

    /// Terminates incoming connections with TLS before handing them to the
    /// HTTP layer. Build the `tokio_rustls::TlsAcceptor` however you like
    /// (loading certificates/keys is out of scope for this crate) and wrap
    /// it in a [`TlsConfig`].
    ///
    /// # Examples
    /// ```no_run
    /// # embers_web::impt_default_handler!{ MyStruct }
    /// # #[tokio::main]
    /// # async fn main() {
    /// use embers_web::{Server, limits::TlsConfig};
    /// use tokio::net::TcpListener;
    /// # let acceptor: tokio_rustls::TlsAcceptor = unreachable!();
    ///
    /// let server = Server::builder()
    ///     .listener(TcpListener::bind("127.0.0.1:8443").await.unwrap())
    ///     .get("/", MyStruct)
    ///     .tls(TlsConfig::new(acceptor))
    ///     .build();
    /// # }
    /// ```
    #[inline(always)]
    pub fn tls(mut self, config: TlsConfig) -> Self {
        self.tls = Some(config);
        self
    }

    /// Installs a connection filter to check incoming TCP connections
    /// before using it.
    ///
    /// Allows early rejection of unwanted IP addresses (before the
    /// first read). Can be used for DDoS protection, geobanning, etc.
    ///
    /// For more information, see [ConnectionFilter](crate::ConnectionFilter)
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # embers_web::impt_default_handler!{ MyStruct }
    /// use tokio::net::TcpListener;
    /// use std::net::SocketAddr;
    /// use embers_web::{ConnectionFilter, Server};
    ///
    /// struct MyConnFilter {
    ///     blacklist: Vec<SocketAddr>
    /// }
    ///
    /// impl ConnectionFilter for MyConnFilter {
    ///     fn filter(
    ///         &self, client_addr: SocketAddr, _: SocketAddr, err_resp: &mut Response
    ///     ) -> Result<(), Handled> {
    ///         if self.blacklist.contains(&client_addr) {
    ///             Err(err_resp
    ///                 .status(StatusCode::Forbidden)
    ///                 .body(b"Your IP is permanently banned"))
    ///         } else {
    ///             Ok(())
    ///         }
    ///     }
    /// }
    ///
    /// # #[tokio::main]
    /// # async fn main() {
    /// let filter = MyConnFilter {
    ///     blacklist: vec![
    ///         "192.0.2.1".parse().unwrap(),
    ///         "198.51.100.1".parse().unwrap(),
    ///         "203.0.113.1".parse().unwrap(),
    ///         "10.0.0.1".parse().unwrap(),
    ///     ]
    /// };
    ///
    /// let server = Server::builder()
    ///     .listener(TcpListener::bind("127.0.0.1:8080").await.unwrap())
    ///     .get("/", MyStruct) // structure with Handler implementation
    ///     .conn_filter(filter)
    ///     .build();
    /// # }
    /// ```
    #[inline(always)]
    pub fn conn_filter<NewF>(self, filter: NewF) -> ServerBuilder<S, NewF>
    where
        NewF: ConnectionFilter,
    {
        ServerBuilder {
            listener: self.listener,
            routes: self.routes,
            connection_filter: Arc::new(filter),
            tls: self.tls,
            _marker: self._marker,
            server_limits: self.server_limits,
            request_limits: self.request_limits,
            response_limits: self.response_limits,
            connection_limits: self.connection_limits,
            ws_limits: self.ws_limits,
        }
    }

    /// Configures request parsing and processing limits.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # embers_web::impt_default_handler!{ MyStruct }
    /// # #[tokio::main]
    /// # async fn main() {
    /// use embers_web::{Server, limits::ServerLimits};
    /// use tokio::net::TcpListener;
    /// use std::time::Duration;
    ///
    /// let server = Server::builder()
    ///     .listener(TcpListener::bind("127.0.0.1:8080").await.unwrap())
    ///     .get("/", MyStruct) // structure with Handler implementation
    ///     .server_limits(ServerLimits {
    ///         // Your changes
    ///         max_connections: 2500,
    ///         max_pending_connections: 10000,
    ///         ..ServerLimits::default() // Required line
    ///     })
    ///     .build();
    /// # }
    /// ```
    #[inline(always)]
    pub fn server_limits(mut self, limits: ServerLimits) -> Self {
        self.server_limits = Some(limits);
        self
    }

    /// Configures request parsing and processing limits.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # embers_web::impt_default_handler!{ MyStruct }
    /// # #[tokio::main]
    /// # async fn main() {
    /// use embers_web::{Server, limits::ConnLimits};
    /// use tokio::net::TcpListener;
    /// use std::time::Duration;
    ///
    /// let server = Server::builder()
    ///     .listener(TcpListener::bind("127.0.0.1:8080").await.unwrap())
    ///     .get("/", MyStruct) // structure with Handler implementation
    ///     .connection_limits(ConnLimits {
    ///         // Your changes
    ///         socket_read_timeout: Duration::from_secs(5),
    ///         socket_write_timeout: Duration::from_secs(2),
    ///         connection_lifetime: Duration::from_secs(200),
    ///         ..ConnLimits::default() // Required line
    ///     })
    ///     .build();
    /// # }
    /// ```
    #[inline(always)]
    pub fn connection_limits(mut self, limits: ConnLimits) -> Self {
        self.connection_limits = Some(limits);
        self
    }

    /// Configures request parsing and processing limits.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # embers_web::impt_default_handler!{ MyStruct }
    /// # #[tokio::main]
    /// # async fn main() {
    /// use embers_web::{Server, limits::ReqLimits};
    /// use tokio::net::TcpListener;
    ///
    /// let server = Server::builder()
    ///     .listener(TcpListener::bind("127.0.0.1:8080").await.unwrap())
    ///     .get("/", MyStruct) // structure with Handler implementation
    ///     .request_limits(ReqLimits {
    ///         // Your changes
    ///         url_size: 1024,
    ///         url_query_parts: 32,
    ///         url_parts: 20,
    ///         ..ReqLimits::default() // Required line
    ///     })
    ///     .build();
    /// # }
    /// ```
    #[inline(always)]
    pub fn request_limits(mut self, limits: ReqLimits) -> Self {
        self.request_limits = Some(limits);
        self
    }

    /// Configures response processing limits.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # embers_web::impt_default_handler!{ MyStruct }
    /// # #[tokio::main]
    /// # async fn main() {
    /// use embers_web::{Server, limits::RespLimits};
    /// use tokio::net::TcpListener;
    ///
    /// let server = Server::builder()
    ///     .listener(TcpListener::bind("127.0.0.1:8080").await.unwrap())
    ///     .get("/", MyStruct) // structure with Handler implementation
    ///     .response_limits(RespLimits {
    ///         // Your changes
    ///         default_capacity: 1024,
    ///         max_capacity: 4096,
    ///         ..RespLimits::default() // Required line
    ///     })
    ///     .build();
    /// # }
    /// ```
    #[inline(always)]
    pub fn response_limits(mut self, limits: RespLimits) -> Self {
        self.response_limits = Some(limits);
        self
    }

    /// Configures the WebSocket engine's receive-buffer and fragment-cache caps.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # embers_web::impt_default_handler!{ MyStruct }
    /// # #[tokio::main]
    /// # async fn main() {
    /// use embers_web::{Server, limits::WsLimits};
    /// use tokio::net::TcpListener;
    ///
    /// let server = Server::builder()
    ///     .listener(TcpListener::bind("127.0.0.1:8080").await.unwrap())
    ///     .get("/", MyStruct) // structure with Handler implementation
    ///     .ws_limits(WsLimits {
    ///         max_receive_buffer: 2 * 1024 * 1024,
    ///         ..WsLimits::default() // Required line
    ///     })
    ///     .build();
    /// # }
    /// ```
    #[inline(always)]
    pub fn ws_limits(mut self, limits: WsLimits) -> Self {
        self.ws_limits = Some(limits);
        self
    }

    /// Finalizes the builder and constructs a [`Server`] instance.
    ///
    /// # Panics
    ///
    /// Error message: ``The `listener` method must be called to create``
    ///
    /// Panics when the `listener` method was not called.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # embers_web::impt_default_handler!{ MyStruct }
    /// # #[tokio::main]
    /// # async fn main() {
    /// use tokio::net::TcpListener;
    /// use embers_web::Server;
    ///
    /// let server = Server::builder()
    ///     .listener(TcpListener::bind("127.0.0.1:8080").await.unwrap())
    ///     .get("/", MyStruct) // structure with Handler implementation
    ///     .build();
    /// # }
    /// ```
    #[inline]
    #[track_caller]
    pub fn build(self) -> Server {
        let (listener, routes, filter, tls, limits) = self.get_all_parts();

        let stream_queue = Arc::new(SegQueue::new());
        let error_queue = Arc::new(SegQueue::new());
        let routes = Arc::new(routes);

        for _ in 0..limits.0.max_connections {
            Self::spawn_worker(&stream_queue, &limits, &filter, &routes, &tls);
        }
        if limits.0.count_503_handlers != 0 {
            for _ in 0..limits.0.count_503_handlers {
                Self::spawn_alarmist(&error_queue, &limits);
            }
        } else {
            Self::spawn_quiet_alarmist(&error_queue, &limits);
        }

        Server {
            listener,
            stream_queue,
            error_queue,
            server_limits: limits.0,
        }
    }

    #[inline]
    fn spawn_worker(
        queue: &TcpQueue,
        limits: &AllLimits,
        filter: &Arc<F>,
        routes: &Arc<Routes<S>>,
        tls: &Option<TlsConfig>,
    ) {
        let queue = queue.clone();
        let filter = filter.clone();
        let tls = tls.clone();
        let mut conn = HttpConnection::new(routes.clone(), limits.clone());

        tokio::spawn(async move {
            loop {
                let (stream, addr) =
                    Server::get_stream(&queue, &conn.server_limits.wait_strategy).await;

                let mut io = match &tls {
                    Some(cfg) => match cfg.acceptor.accept(stream).await {
                        Ok(tls_stream) => Conn::Tls(Box::new(tls_stream)),
                        Err(_) => continue,
                    },
                    None => Conn::Plain(stream),
                };

                let Ok(local_addr) = io.local_addr() else {
                    continue;
                };

                if filter.filter(addr, local_addr, &mut conn.response).is_err()
                    || filter
                        .filter_async(addr, local_addr, &mut conn.response)
                        .await
                        .is_err()
                {
                    let _ = conn
                        .conn_limits
                        .write_bytes(&mut io, conn.response.buffer())
                        .await;

                    conn.response.reset(&conn.resp_limits);
                    continue;
                }

                let _ = conn.run(&mut io, addr, local_addr).await;
            }
        });
    }

    #[inline]
    fn spawn_alarmist(queue: &TcpQueue, limits: &AllLimits) {
        let queue = queue.clone();
        let (server_limits, conn_limits, ..) = limits.clone();

        tokio::spawn(async move {
            loop {
                let (stream, _) = Server::get_stream(&queue, &server_limits.wait_strategy).await;
                let mut stream = Conn::Plain(stream);

                let _ = conn_limits
                    .send_error(
                        &mut stream,
                        ErrorKind::ServiceUnavailable,
                        Version::Http11,
                        server_limits.json_errors,
                    )
                    .await;
            }
        });
    }

    #[inline]
    fn spawn_quiet_alarmist(queue: &TcpQueue, limits: &AllLimits) {
        let queue = queue.clone();
        let (server_limits, ..) = limits.clone();

        tokio::spawn(async move {
            loop {
                let (stream, _) = Server::get_stream(&queue, &server_limits.wait_strategy).await;

                drop(stream);
            }
        });
    }

    #[inline]
    #[track_caller]
    fn get_all_parts(self) -> (TcpListener, Routes<S>, Arc<F>, Option<TlsConfig>, AllLimits) {
        (
            self.listener
                .expect("The `listener` method must be called to create"),
            self.routes,
            self.connection_filter,
            self.tls,
            (
                self.server_limits.clone().unwrap_or_default(),
                self.connection_limits.clone().unwrap_or_default(),
                self.request_limits
                    .clone()
                    .unwrap_or_default()
                    .precalculate(),
                self.response_limits.clone().unwrap_or_default(),
                self.ws_limits.clone().unwrap_or_default(),
            ),
        )
    }
}

type TcpQueue = Arc<SegQueue<(TcpStream, SocketAddr)>>;
pub(crate) type AllLimits = (ServerLimits, ConnLimits, ReqLimits, RespLimits, WsLimits);
