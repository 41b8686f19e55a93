use crate::{
    errors::ErrorKind,
    http::{
        request::{ChunkState, Parser, Progress, Request},
        response::Response,
        types::{Method, StatusCode, Version},
    },
    limits::{ConnLimits, ReqLimits, RespLimits, ServerLimits, WsLimits},
    server::server_impl::{AllLimits, BroadcastHandle, ErasedWsHandler, Routes},
    transport::Conn,
    ws::{self, frame, OpCode, Outcome, Session},
    Handled,
};
use std::{future::Future, io, net::SocketAddr, sync::Arc, time::Instant};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    sync::mpsc,
    time::sleep,
};

pub(crate) struct HttpConnection<S: ConnectionData> {
    routes: Arc<Routes<S>>,
    connection_data: S,

    connection: Connection,
    pub(crate) parser: Parser,
    pub(crate) request: Request,
    pub(crate) response: Response,
    pub(crate) chunk_state: ChunkState,
    pub(crate) chunk_cache: Vec<u8>,
    sink_offset: usize,
    expect_continue_sent: bool,

    pub(crate) server_limits: ServerLimits,
    pub(crate) conn_limits: ConnLimits,
    pub(crate) req_limits: ReqLimits,
    pub(crate) resp_limits: RespLimits,
    pub(crate) ws_limits: WsLimits,
}

impl<S: ConnectionData> HttpConnection<S> {
    #[inline]
    pub(crate) fn new(routes: Arc<Routes<S>>, limits: AllLimits) -> Self {
        Self {
            routes,
            connection_data: S::new(),

            connection: Connection::new(),
            parser: Parser::new(&limits.2),
            request: Request::new(&limits.2),
            response: Response::new(&limits.3),
            chunk_state: ChunkState::default(),
            chunk_cache: Vec::new(),
            sink_offset: 0,
            expect_continue_sent: false,

            server_limits: limits.0,
            conn_limits: limits.1,
            req_limits: limits.2,
            resp_limits: limits.3,
            ws_limits: limits.4,
        }
    }

    #[inline]
    fn reset_request_response(&mut self) {
        if self.parser.has_pipelined_tail() {
            self.parser.reset_keep_tail();
        } else {
            self.parser.reset();
        }
        self.request.reset();
        self.response.reset(&self.resp_limits);
        self.chunk_state.reset();
        self.chunk_cache.clear();
        self.sink_offset = 0;
        self.expect_continue_sent = false;
    }
}

impl<S: ConnectionData> HttpConnection<S> {
    #[inline]
    pub(crate) async fn run(
        &mut self,
        stream: &mut Conn,
        client_addr: SocketAddr,
        server_addr: SocketAddr,
    ) -> Result<(), io::Error> {
        self.request.client_addr = client_addr;
        self.request.server_addr = server_addr;

        match self.impl_run(stream).await {
            Ok(()) => Ok(()),
            Err(ErrorKind::Io(e)) => Err(e.0),
            Err(error) => {
                if let Some(handler) = self.routes.bad_request() {
                    handler
                        .call(&mut self.connection_data, &self.request, &mut self.response)
                        .await;
                    self.conn_limits
                        .write_bytes(stream, self.response.buffer())
                        .await
                } else {
                    self.conn_limits
                        .send_error(
                            stream,
                            error,
                            self.request.version(),
                            self.server_limits.json_errors,
                        )
                        .await
                }
            }
        }
    }

    #[inline]
    pub(crate) async fn impl_run(&mut self, stream: &mut Conn) -> Result<(), ErrorKind> {
        self.connection.reset();
        self.connection_data.reset();

        while !self.is_expired()? {
            self.reset_request_response();

            loop {
                if self
                    .parser
                    .fill_buffer(stream, self.conn_limits.socket_read_timeout)
                    .await?
                    == 0
                {
                    return Ok(());
                }

                let progress = self.parse()?;
                self.maybe_send_continue(stream).await?;
                self.feed_sink().await;

                if matches!(progress, Progress::Complete(_)) {
                    break;
                }
            }

            let method = self.request.method();
            let path = self.request.url().path().to_vec();

            if method == Method::Options && matches!(path.as_slice(), b"*" | b"/*") {
                self.response
                    .status(StatusCode::NoContent)
                    .header("allow", "HEAD, GET, POST, PUT, DELETE, OPTIONS")
                    .body("");
            } else if ws::is_upgrade_request(&self.request) && self.routes.ws_handler(&path).is_some() {
                return self.run_ws(stream, path).await;
            } else if let Some(handler) = self.routes.dispatch(method, &path) {
                handler
                    .call(&mut self.connection_data, &self.request, &mut self.response)
                    .await;
            } else if let Some(handler) = self.routes.not_found() {
                handler
                    .call(&mut self.connection_data, &self.request, &mut self.response)
                    .await;
            } else {
                Routes::<S>::render_default_not_found(&self.request, &mut self.response);
            }

            self.conn_limits
                .write_bytes(stream, self.response.buffer())
                .await?;

            if !self.response.keep_alive {
                break;
            }

            self.connection.request_count += 1;
        }

        Ok(())
    }

    /// Writes `100 Continue` the first time an `Expect: 100-continue`
    /// header shows up for the request currently being parsed. Headers are
    /// fully committed before the body is read even when `parse()` returns
    /// [`Progress::Incomplete`] waiting on body bytes, so this can run on
    /// every iteration of the read loop without waiting for completion.
    #[inline]
    async fn maybe_send_continue(&mut self, stream: &mut Conn) -> Result<(), ErrorKind> {
        if self.expect_continue_sent {
            return Ok(());
        }

        let wants_continue = self
            .request
            .header(b"expect")
            .is_some_and(|value| value.eq_ignore_ascii_case(b"100-continue"));

        if wants_continue {
            self.expect_continue_sent = true;
            self.conn_limits
                .write_bytes(stream, b"HTTP/1.1 100 Continue\r\n\r\n")
                .await?;
        }

        Ok(())
    }

    /// Pushes newly-available body bytes to a registered [`PayloadSink`
    /// ](crate::server::server_impl::PayloadSink), if any. `chunk_cache`
    /// grows incrementally as a `Transfer-Encoding: chunked` body is
    /// dechunked, so a sink for such a body sees it fragment by fragment;
    /// a `Content-Length` body, read as one contiguous zero-copy slice, is
    /// delivered to the sink in one piece once parsing completes.
    #[inline]
    async fn feed_sink(&mut self) {
        let path = self.request.url().path().to_vec();
        let Some(sink) = self.routes.sink(&path) else {
            return;
        };

        if self.chunk_cache.len() > self.sink_offset {
            let chunk = self.chunk_cache[self.sink_offset..].to_vec();
            self.sink_offset = self.chunk_cache.len();
            sink.feed(&mut self.connection_data, &self.request, &chunk)
                .await;
            return;
        }

        if let Some(body) = self.request.body() {
            if body.len() > self.sink_offset {
                let chunk = body[self.sink_offset..].to_vec();
                self.sink_offset = body.len();
                sink.feed(&mut self.connection_data, &self.request, &chunk)
                    .await;
            }
        }
    }

    /// Completes a validated WebSocket upgrade and drives the session until
    /// the peer closes it, a protocol violation occurs, or the socket errs.
    #[inline]
    async fn run_ws(&mut self, stream: &mut Conn, path: Vec<u8>) -> Result<(), ErrorKind> {
        let Some(client_key) = self.request.header(b"sec-websocket-key") else {
            return Ok(());
        };
        let client_key = client_key.to_vec();
        let path = String::from_utf8_lossy(&path).into_owned();

        let Some(ws_handler) = self.routes.ws_handler(path.as_bytes()).cloned() else {
            return Ok(());
        };

        let mut out = Vec::new();
        ws::handshake_response(&client_key, &mut out);
        self.conn_limits.write_bytes(stream, &out).await?;
        ws_handler.open(&mut self.connection_data, &self.request).await;

        let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();
        let sender_handle = Arc::new(tx);
        self.routes
            .ws_broadcast
            .register(&path, client_key.clone(), &sender_handle);

        let result = self.run_ws_loop(stream, &path, &ws_handler, &mut rx).await;

        self.routes.ws_broadcast.unregister(&path, &client_key);
        drop(sender_handle);
        ws_handler.close(&mut self.connection_data).await;
        result
    }

    async fn run_ws_loop(
        &mut self,
        stream: &mut Conn,
        path: &str,
        ws_handler: &Arc<dyn ErasedWsHandler<S>>,
        rx: &mut mpsc::UnboundedReceiver<Vec<u8>>,
    ) -> Result<(), ErrorKind> {
        let mut session = Session::new(&self.ws_limits);
        let mut read_buf = vec![0u8; self.ws_limits.max_receive_buffer.min(64 * 1024)];

        loop {
            tokio::select! {
                biased;

                result = stream.read(&mut read_buf) => {
                    let n = result?;
                    if n == 0 {
                        return Ok(());
                    }

                    for outcome in session.feed(&read_buf[..n]) {
                        match outcome {
                            Outcome::Message { payload, .. } => {
                                let broadcast = BroadcastHandle {
                                    path,
                                    registry: &self.routes.ws_broadcast,
                                };
                                let reply = ws_handler
                                    .message(&mut self.connection_data, &payload, &broadcast)
                                    .await;
                                if let Some(reply) = reply {
                                    let mut frame_bytes = Vec::new();
                                    frame::encode_header(OpCode::Text, true, reply.len(), &mut frame_bytes);
                                    frame_bytes.extend_from_slice(&reply);
                                    self.conn_limits.write_bytes(stream, &frame_bytes).await?;
                                }
                            }
                            Outcome::Pong { payload } => {
                                let mut frame_bytes = Vec::new();
                                frame::encode_header(OpCode::Pong, true, payload.len(), &mut frame_bytes);
                                frame_bytes.extend_from_slice(&payload);
                                self.conn_limits.write_bytes(stream, &frame_bytes).await?;
                            }
                            Outcome::Close(code) => {
                                let mut frame_bytes = Vec::new();
                                frame::encode_close(code, &mut frame_bytes);
                                let _ = self.conn_limits.write_bytes(stream, &frame_bytes).await;
                                return Ok(());
                            }
                        }
                    }
                }
                _ = sleep(self.conn_limits.socket_read_timeout) => return Ok(()),
                Some(broadcasted) = rx.recv() => {
                    let mut frame_bytes = Vec::new();
                    frame::encode_header(OpCode::Text, true, broadcasted.len(), &mut frame_bytes);
                    frame_bytes.extend_from_slice(&broadcasted);
                    self.conn_limits.write_bytes(stream, &frame_bytes).await?;
                }
            }
        }
    }
}

impl ConnLimits {
    #[inline]
    pub(crate) async fn send_error(
        &self,
        stream: &mut Conn,
        error: ErrorKind,
        version: Version,
        json_errors: bool,
    ) -> Result<(), io::Error> {
        self.write_bytes(stream, error.as_http(version, json_errors))
            .await
    }

    #[inline]
    pub(crate) async fn write_bytes(
        &self,
        stream: &mut Conn,
        response: &[u8],
    ) -> Result<(), io::Error> {
        tokio::select! {
            biased;

            result = stream.write_all(response) => result,
            _ = sleep(self.socket_write_timeout) => {
                Err(io::Error::new(io::ErrorKind::TimedOut, "write timeout"))
            },
        }
    }
}

impl<S: ConnectionData> HttpConnection<S> {
    #[inline]
    fn is_expired(&self) -> Result<bool, ErrorKind> {
        Ok(!self.response.keep_alive
            || self.connection.request_count >= self.conn_limits.max_requests_per_connection
            || self.connection.created.elapsed() > self.conn_limits.connection_lifetime)
    }
}

#[derive(Debug)]
pub(crate) struct Connection {
    created: Instant,
    request_count: usize,
}

impl Connection {
    #[inline]
    pub(crate) fn new() -> Self {
        Self {
            created: Instant::now(),
            request_count: 0,
        }
    }

    #[inline]
    pub(crate) fn reset(&mut self) {
        self.created = Instant::now();
        self.request_count = 0;
    }
}

//

/// Managing user session data stored between requests within a single HTTP connection.
///
/// This trait allows you to store arbitrary state (e.g., authentication data,
/// multistep form status, cache, etc.). The state is available across all requests
/// within a single HTTP keep-alive connection.
///
/// # Examples
/// ```no_run
/// use embers_web::ConnectionData;
/// use std::collections::HashMap;
///
/// struct MyConnectionData {
///     user_id: Option<i32>,
///     request_count: usize,
///     cache: HashMap<usize, [u8; 4]>,
/// }
///
/// impl ConnectionData for MyConnectionData {
///     fn new() -> Self {
///         Self {
///             user_id: None,
///             request_count: 0,
///             cache: HashMap::new(),
///         }
///     }
///
///     fn reset(&mut self) {
///         self.user_id = None;
///         self.request_count = 0;
///         self.cache.clear(); // Saving the allocated memory
///     }
/// }
/// ```
///
/// Check out a [real-world example
/// ](https://github.com/AmakeSashaDev/embers_web/blob/main/demos/request_counter.rs)
/// (well, almost)
pub trait ConnectionData: Sync + Send + 'static {
    /// Creates a new instance of user data.
    ///
    /// It is called once at server startup, which avoids runtime allocations.
    fn new() -> Self;

    /// Resets the internal state of the instance to its initial values.
    ///
    /// It is called after the connection is closed. Allows repeated
    /// use of the instance for the following connections. If implemented
    /// correctly, avoids any allocations.
    fn reset(&mut self);
}

impl ConnectionData for () {
    #[inline(always)]
    fn new() -> Self {}

    #[inline(always)]
    fn reset(&mut self) {}
}

/// A trait for filtering TCP connections before HTTP processing.
///
/// # Examples
///
/// Simple IP Blacklist:
/// ```
/// use std::{collections::HashSet, net::{SocketAddr, IpAddr}};
/// use embers_web::{Server, ConnectionFilter, Response, Handled, StatusCode};
///
/// struct MyConnFilter {
///     blacklist: HashSet<IpAddr>
/// }
///
/// impl ConnectionFilter for MyConnFilter {
///     fn filter(
///         &self, client_addr: SocketAddr, _: SocketAddr, err_resp: &mut Response
///     ) -> Result<(), Handled> {
///         if self.blacklist.contains(&client_addr.ip()) {
///             Err(err_resp
///                 .status(StatusCode::Forbidden)
///                 .body("Your IP is permanently banned"))
///         } else {
///             Ok(())
///         }
///     }
/// }
/// ```
/// File-based IP blacklist:
/// ```
/// use std::net::SocketAddr;
/// use embers_web::{Server, ConnectionFilter, Response, Handled, StatusCode};
///
/// # struct DatabaseClient;
/// #
/// # impl DatabaseClient {
/// #     async fn execute(&self, _: &str) -> Option<Vec<&str>> {
/// #         Some(vec!["true"])
/// #     }
/// # }
/// #
/// #
/// struct MyConnFilter {
///     db: DatabaseClient
/// }
///
/// impl ConnectionFilter for MyConnFilter {
///     fn filter(&self, _: SocketAddr, _: SocketAddr, _: &mut Response) -> Result<(), Handled> {
///         Ok(())
///     }
///
///     async fn filter_async(
///         &self,
///         client_addr: SocketAddr,
///         _: SocketAddr,
///         err_resp: &mut Response,
///     ) -> Result<(), Handled> {
///         let request = format!(
///             "SELECT EXISTS (SELECT 1 FROM ip_blacklist WHERE ip_address = '{}')",
///             client_addr.ip()
///         );
///
///         if self.db.execute(&request).await == Some(vec!["false"]) {
///             Ok(()) // IP not found in blacklist
///         } else {
///             Err(err_resp
///                 .status(StatusCode::Forbidden)
///                 .body("IP found in blacklist file"))
///         }
///     }
/// }
/// ```
/// Two-stage filtering with cache:
/// ```
/// use std::{collections::HashSet, sync::RwLock, net::{SocketAddr, IpAddr}};
/// use embers_web::{Server, ConnectionFilter, Response, Handled, StatusCode};
///
/// # struct DatabaseClient;
/// #
/// # impl DatabaseClient {
/// #     async fn execute(&self, _: &str) -> Option<Vec<&str>> {
/// #         Some(vec!["true"])
/// #     }
/// # }
/// #
/// #
/// struct MyConnFilter {
///     cache: RwLock<HashSet<IpAddr>>,
///     db: DatabaseClient,
/// }
///
/// impl ConnectionFilter for MyConnFilter {
///     fn filter(
///         &self, client_addr: SocketAddr, _: SocketAddr, err_resp: &mut Response
///     ) -> Result<(), Handled> {
///         let Ok(guard) = self.cache.read() else {
///             return Err(err_resp.status(StatusCode::InternalServerError)
///                 .body("Internal server error"));
///         };
///
///         if guard.contains(&client_addr.ip()) {
///             Err(err_resp
///                 .status(StatusCode::Forbidden)
///                 .body("Your IP is permanently banned"))
///         } else {
///             Ok(())
///         }
///     }
///
///     async fn filter_async(
///         &self,
///         client_addr: SocketAddr,
///         _: SocketAddr,
///         err_resp: &mut Response,
///     ) -> Result<(), Handled> {
///         let request = format!(
///             "SELECT EXISTS (SELECT 1 FROM ip_blacklist WHERE ip_address = '{}')",
///             client_addr.ip()
///         );
///
///         if self.db.execute(&request).await == Some(vec!["false"]) {
///             Ok(()) // IP not found in blacklist
///         } else {
///             let Ok(mut guard) = self.cache.write() else {
///                 return Err(err_resp.status(StatusCode::InternalServerError)
///                     .body("Internal server error"));
///             };
///             guard.insert(client_addr.ip());
///
///             Err(err_resp
///                 .status(StatusCode::Forbidden)
///                 .body("IP found in blacklist file"))
///         }
///     }
/// }
/// ```
/// # Connection Filter Architecture
/// ```text
///                     [ QUEUE TCP_STREAM ]
///                              ||
/// /----------------------------||----------------------------------\
/// |                            || TCP_STREAM            Tokio Task |
/// |       /=====================/                                  |
/// |       \/                                                       |
/// |   [--------]   Err(Handled)   [----------------------]         |
/// |   [ filter ] ===============> [ Send `error_response`]         |
/// |   [--------]                  [----------------------]         |
/// |       ||                                 /\                    |
/// |       || Ok(())                          ||                    |
/// |       \/                Err(Handled)     ||                    |
/// |   [--------------] ========================/                   |
/// |   [ filter_async ]                             [-----------]   |
/// |   [--------------] ==========================> [  Handler  ]   |
/// |                             Ok(())             [-----------]   |
/// |                                                                |
/// \----------------------------------------------------------------/
/// ```
pub trait ConnectionFilter: Sync + Send + 'static {
    /// Synchronous connection validation.
    ///
    /// Perform fast, in-memory checks here. Expensive operations should be deferred
    /// to [`filter_async`](Self::filter_async).
    ///
    /// Use for:
    /// - IP blacklist/whitelist (in-memory cache)
    /// - Geographic IP restrictions
    /// - Rate limiting counters
    fn filter(
        &self,
        client_addr: SocketAddr,
        server_addr: SocketAddr,
        error_response: &mut Response,
    ) -> Result<(), Handled>;

    /// Asynchronous connection inspection.
    ///
    /// Called after [`filter`](Self::filter) succeeds.Executes asynchronously within
    /// the Tokio runtime.
    ///
    /// Use for:
    /// - Database lookups
    /// - External API calls
    /// - File system operations
    /// - Complex business logic
    /// - Machine learning inference
    fn filter_async(
        &self,
        #[allow(unused_variables)] client_addr: SocketAddr,
        #[allow(unused_variables)] server_addr: SocketAddr,
        #[allow(unused_variables)] error_response: &mut Response,
    ) -> impl Future<Output = Result<(), Handled>> + Send {
        async { Ok(()) }
    }
}

impl ConnectionFilter for () {
    fn filter(&self, _: SocketAddr, _: SocketAddr, _: &mut Response) -> Result<(), Handled> {
        Ok(())
    }
}

//

#[cfg(test)]
mod def_handler {
    use super::*;
    use crate::{
        server::server_impl::{Handler, Routes},
        Handled, StatusCode,
    };

    pub(crate) struct DefHandler;

    impl Handler<()> for DefHandler {
        async fn handle(&self, _: &mut (), _: &Request, r: &mut Response) -> Handled {
            r.status(StatusCode::Ok).body("test")
        }
    }

    impl HttpConnection<()> {
        #[inline]
        pub(crate) fn from_req<V: AsRef<[u8]>>(value: V) -> Self {
            let req_limits = ReqLimits::default().precalculate();
            let resp_limits = RespLimits::default();

            let mut routes = Routes::new();
            routes.insert_get_for_test(b"".to_vec(), Arc::new(DefHandler));

            Self {
                routes: Arc::new(routes),
                connection_data: (),

                connection: Connection::new(),
                parser: Parser::from(&req_limits, value),
                request: Request::new(&req_limits),
                response: Response::new(&resp_limits),
                chunk_state: ChunkState::default(),
                chunk_cache: Vec::new(),
                sink_offset: 0,
                expect_continue_sent: false,

                server_limits: ServerLimits::default(),
                conn_limits: ConnLimits::default(),
                req_limits,
                resp_limits,
                ws_limits: WsLimits::default(),
            }
        }
    }
}
