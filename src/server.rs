use crate::diff;
use crate::mock::{lock, InnerMock, Mock};
use crate::report::Reporter;
use crate::request::Request;
use crate::response::{Reply, ResponseWriter, StatusProducer, Strategy};
use crate::{Error, ErrorKind};
use bytes::Bytes;
use http::{Request as HttpRequest, Response};
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnectionBuilder;
use std::collections::BTreeMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::thread;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

///
/// The registry: every registered mock in registration order, and the requests no
/// mock could serve, counted by `METHOD path`.
///
#[derive(Debug, Default)]
pub(crate) struct State {
    mocks: Vec<Mock>,
    unmatched: BTreeMap<String, usize>,
}

impl State {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn register(&mut self, mock: Mock) {
        self.mocks.push(mock);
    }

    ///
    /// Picks the mock serving `request` and produces its response.
    ///
    /// Callers hold the registry guard for the whole call, which makes the depletion
    /// check and the call count increment a single step for concurrent requests.
    ///
    pub(crate) fn dispatch(&mut self, request: &Request) -> Reply {
        let mut depleted = false;
        let mut candidates = Vec::new();

        for mock in &self.mocks {
            let inner = mock.lock();
            if !inner.matches_route(request.method(), request.path()) {
                continue;
            }
            if inner.is_depleted() {
                depleted = true;
                continue;
            }
            candidates.push((inner.filter.clone(), mock));
        }

        // filtered mocks first, registration order within each group
        candidates.sort_by_key(|(filter, _)| filter.is_none());

        let selected = candidates
            .into_iter()
            .find(|(filter, _)| Mock::accepts(filter.as_ref(), request))
            .map(|(_, mock)| mock);

        let Some(mock) = selected else {
            log::debug!("Mock not found");
            if depleted {
                log::warn!(
                    "No more mock responses available for {} {}; all have reached their call limit",
                    request.method(),
                    request.path()
                );
            }
            *self.unmatched.entry(request.key()).or_insert(0) += 1;
            return Reply::not_found(request.path());
        };

        let (strategy, headers, call) = {
            let mut inner = mock.lock();
            inner.calls += 1;
            (inner.strategy.clone(), inner.headers.clone(), inner.calls)
        };
        log::debug!("Mock found: {} (call {})", mock, call);

        let mut writer = ResponseWriter::new();
        for (field, value) in &headers {
            writer.set_header(field, value);
        }
        strategy.produce(call, request, &mut writer);

        writer.finish().unwrap_or_else(|err| {
            log::error!("Failed to produce a response for {}: {}", mock, err);
            Reply::failure(&err)
        })
    }

    pub(crate) fn assert_call_count(
        &self,
        reporter: &dyn Reporter,
        method: &str,
        path: &str,
        expected: usize,
    ) {
        let mut calls = 0;
        for mock in &self.mocks {
            let mut inner = mock.lock();
            if inner.matches_route(method, path) {
                calls += inner.calls;
                inner.asserted = true;
            }
        }

        if calls == 0 {
            reporter.report(&format!(
                "mocked but never called path: {} method: {}",
                path, method
            ));
            return;
        }

        if calls != expected {
            reporter.report(&format!(
                "url: {} {} expected to be called {} times. It was called {} times",
                method, path, expected, calls
            ));
        }
    }

    pub(crate) fn assert_call_count_asserted(&self, reporter: &dyn Reporter) {
        for mock in &self.mocks {
            let inner = mock.lock();
            if !inner.asserted {
                reporter.report(&format!(
                    "url: {} is mocked but never asserted. It was called {} times\n\
                     assert it with: .assert_call_count(&reporter, \"{}\", \"{}\", {})",
                    inner.path, inner.calls, inner.method, inner.path, inner.calls
                ));
            }
        }
    }

    pub(crate) fn assert_no_missing_mocks(&self, reporter: &dyn Reporter) {
        let registered: Vec<String> = self.mocks.iter().map(|mock| mock.lock().key()).collect();

        for (key, count) in &self.unmatched {
            let (method, path) = key.split_once(' ').unwrap_or((key.as_str(), ""));

            let mut message = format!(
                "url: {} is called but not mocked. It was called {} times\n",
                key, count
            );
            if method == crate::mock::DEFAULT_METHOD {
                message.push_str(&format!(
                    "create a mock with: .mock(\"{}\", \"response\")",
                    path
                ));
            } else {
                message.push_str(&format!(
                    "create a mock with: .mock(\"{}\", \"response\").with_method(\"{}\")",
                    path, method
                ));
            }

            if let Some(closest) = diff::closest(key, registered.iter().map(String::as_str)) {
                message.push_str(&format!(
                    "\n> The closest registered mock is: {}\n> Difference:\n{}",
                    closest,
                    diff::compare(closest, key)
                ));
            }

            reporter.report(&message);
        }
    }

    pub(crate) fn assert_mocks_called(&self, reporter: &dyn Reporter) {
        for mock in &self.mocks {
            let inner = mock.lock();
            if inner.calls == 0 && !inner.asserted {
                reporter.report(&format!("{} mocked but never called.", inner.key()));
            }
        }
    }

    pub(crate) fn reset(&mut self) {
        self.mocks.clear();
        self.unmatched.clear();
    }
}

///
/// Options for starting a `Server`.
///
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerOpts {
    /// The host to bind to. Defaults to `127.0.0.1`.
    pub host: String,
    /// The port to bind to. Defaults to `0`, which picks a free port.
    pub port: u16,
}

impl Default for ServerOpts {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_owned(),
            port: 0,
        }
    }
}

struct Starting {
    state: Arc<Mutex<State>>,
    address: oneshot::Receiver<Result<SocketAddr, Error>>,
    shutdown: oneshot::Sender<()>,
    thread: thread::JoinHandle<()>,
}

impl Starting {
    fn finish(
        self,
        address: Result<Result<SocketAddr, Error>, oneshot::error::RecvError>,
    ) -> Result<Server, Error> {
        let address = address.map_err(|_| Error::new(ErrorKind::ServerFailure))??;

        Ok(Server {
            address,
            state: self.state,
            shutdown: Some(self.shutdown),
            thread: Some(self.thread),
        })
    }
}

///
/// A local HTTP server serving the mocks registered on it.
///
/// The server listens on its own thread and handles connections concurrently. It stops
/// listening when closed or dropped.
///
/// ## Example
///
/// ```
/// use htmock::{Failures, Server};
///
/// let s = Server::new();
/// s.mock("/hello", "world");
///
/// // Point your client at `s.url()`...
///
/// let failures = Failures::new();
/// s.assert_call_count(&failures, "GET", "/hello", 1);
/// assert!(failures.failed());
/// ```
///
pub struct Server {
    address: SocketAddr,
    state: Arc<Mutex<State>>,
    shutdown: Option<oneshot::Sender<()>>,
    thread: Option<thread::JoinHandle<()>>,
}

impl Server {
    ///
    /// Starts a server on a free port of `127.0.0.1`.
    ///
    /// Panics when the server can't be started. Don't call this from within an async
    /// runtime; use `Server::new_async` there.
    ///
    #[track_caller]
    pub fn new() -> Server {
        Server::try_new().unwrap()
    }

    /// Same as `Server::new` but async.
    pub async fn new_async() -> Server {
        Server::try_new_async().await.unwrap()
    }

    /// Same as `Server::new` but won't panic.
    pub fn try_new() -> Result<Server, Error> {
        Server::try_new_with_opts(ServerOpts::default())
    }

    /// Same as `Server::new_async` but won't panic.
    pub async fn try_new_async() -> Result<Server, Error> {
        Server::try_new_with_opts_async(ServerOpts::default()).await
    }

    ///
    /// Starts a server with the given options.
    ///
    /// ## Example
    ///
    /// ```
    /// let opts = htmock::ServerOpts {
    ///     host: "0.0.0.0".to_string(),
    ///     ..Default::default()
    /// };
    /// let s = htmock::Server::new_with_opts(opts);
    /// assert!(s.url().starts_with("http://0.0.0.0:"));
    /// ```
    ///
    #[track_caller]
    pub fn new_with_opts(opts: ServerOpts) -> Server {
        Server::try_new_with_opts(opts).unwrap()
    }

    /// Same as `Server::new_with_opts` but async.
    pub async fn new_with_opts_async(opts: ServerOpts) -> Server {
        Server::try_new_with_opts_async(opts).await.unwrap()
    }

    /// Same as `Server::new_with_opts` but won't panic.
    pub fn try_new_with_opts(opts: ServerOpts) -> Result<Server, Error> {
        let mut starting = Server::start(opts)?;
        let address = std::mem::replace(&mut starting.address, oneshot::channel().1).blocking_recv();
        starting.finish(address)
    }

    /// Same as `Server::new_with_opts_async` but won't panic.
    pub async fn try_new_with_opts_async(opts: ServerOpts) -> Result<Server, Error> {
        let mut starting = Server::start(opts)?;
        let address = (&mut starting.address).await;
        starting.finish(address)
    }

    fn start(opts: ServerOpts) -> Result<Starting, Error> {
        let state = Arc::new(Mutex::new(State::new()));
        let (address_sender, address) = oneshot::channel();
        let (shutdown, shutdown_receiver) = oneshot::channel();

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|err| Error::new_with_context(ErrorKind::ServerFailure, err))?;

        let state_clone = state.clone();
        let thread = thread::Builder::new()
            .name("htmock::server".to_owned())
            .spawn(move || {
                runtime.block_on(async move {
                    let listener = match Server::bind(&opts).await {
                        Ok((listener, local_address)) => {
                            let _ = address_sender.send(Ok(local_address));
                            listener
                        }
                        Err(err) => {
                            let _ = address_sender.send(Err(err));
                            return;
                        }
                    };

                    Server::accept_connections(listener, state_clone, shutdown_receiver).await;
                })
            })
            .map_err(|err| Error::new_with_context(ErrorKind::ServerFailure, err))?;

        Ok(Starting {
            state,
            address,
            shutdown,
            thread,
        })
    }

    async fn bind(opts: &ServerOpts) -> Result<(TcpListener, SocketAddr), Error> {
        let listener = TcpListener::bind((opts.host.as_str(), opts.port))
            .await
            .map_err(|err| Error::new_with_context(ErrorKind::ServerFailure, err))?;
        let address = listener
            .local_addr()
            .map_err(|err| Error::new_with_context(ErrorKind::ServerFailure, err))?;

        Ok((listener, address))
    }

    async fn accept_connections(
        listener: TcpListener,
        state: Arc<Mutex<State>>,
        mut shutdown: oneshot::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    log::debug!("Server shutting down");
                    break;
                }
                accepted = listener.accept() => {
                    let stream = match accepted {
                        Ok((stream, _)) => stream,
                        Err(err) => {
                            log::error!("Failed to accept a connection: {}", err);
                            continue;
                        }
                    };

                    let state = state.clone();
                    tokio::spawn(async move {
                        let service = service_fn(move |request: HttpRequest<Incoming>| {
                            handle_request(request, state.clone())
                        });

                        if let Err(err) = ConnectionBuilder::new(TokioExecutor::new())
                            .serve_connection(TokioIo::new(stream), service)
                            .await
                        {
                            log::error!("Failed to serve a connection: {}", err);
                        }
                    });
                }
            }
        }
    }

    ///
    /// Registers a `GET` mock for `path` answering with `body` and status 200 for as long
    /// as it lives.
    ///
    /// ## Example
    ///
    /// ```
    /// let s = htmock::Server::new();
    ///
    /// s.mock("/hello", "world");
    /// s.mock("/hello", "created").with_method("POST").once();
    /// ```
    ///
    pub fn mock<StrOrBytes: AsRef<[u8]>>(&self, path: &str, body: StrOrBytes) -> Mock {
        self.mock_sequence(path, body, Vec::<StatusProducer>::new())
    }

    ///
    /// Registers a `GET` mock for `path` answering with `body` once per producer, in
    /// order. Each producer decides the status of its call (`0` keeps 200). Once every
    /// producer was used, the mock no longer matches.
    ///
    /// ## Example
    ///
    /// ```
    /// use htmock::StatusProducer;
    ///
    /// let s = htmock::Server::new();
    ///
    /// // 202 for the first call, then 200 or 400 depending on the request
    /// s.mock_sequence("/jobs", "{}", [
    ///     202.into(),
    ///     StatusProducer::new(|r| if r.has_header("authorization") { 200 } else { 400 }),
    /// ]);
    /// ```
    ///
    pub fn mock_sequence<StrOrBytes, I>(&self, path: &str, body: StrOrBytes, producers: I) -> Mock
    where
        StrOrBytes: AsRef<[u8]>,
        I: IntoIterator<Item = StatusProducer>,
    {
        let strategy = Strategy::Static {
            body: Bytes::copy_from_slice(body.as_ref()),
            sequence: producers.into_iter().collect(),
        };
        self.register(InnerMock::new(path, strategy))
    }

    ///
    /// Registers a `GET` mock for `path` whose response is entirely written by
    /// `responder`. Headers set with `Mock::with_header` are in place before it runs.
    ///
    /// ## Example
    ///
    /// ```
    /// use std::io::Write;
    ///
    /// let s = htmock::Server::new();
    ///
    /// s.mock_fn("/echo", |w, r| {
    ///     w.set_status(201).set_header("x-method", r.method());
    ///     w.write_all(r.body()).unwrap();
    /// });
    /// ```
    ///
    pub fn mock_fn(
        &self,
        path: &str,
        responder: impl Fn(&mut ResponseWriter, &Request) + Send + Sync + 'static,
    ) -> Mock {
        self.register(InnerMock::new(path, Strategy::custom(responder)))
    }

    fn register(&self, inner: InnerMock) -> Mock {
        let mock = Mock::new(inner);
        lock(&self.state).register(mock.clone());
        mock
    }

    ///
    /// Reports a failure unless the mocks for `method` and `path` served `expected`
    /// requests in total. Calls summing up to 0 always fail.
    ///
    /// Marks every mock for `method` and `path` as asserted.
    ///
    pub fn assert_call_count(
        &self,
        reporter: &dyn Reporter,
        method: &str,
        path: &str,
        expected: usize,
    ) {
        lock(&self.state).assert_call_count(reporter, method, path, expected);
    }

    /// Reports one failure for every mock no call count assertion covered.
    pub fn assert_call_count_asserted(&self, reporter: &dyn Reporter) {
        lock(&self.state).assert_call_count_asserted(reporter);
    }

    /// Reports one failure for every `METHOD path` requested without a matching mock.
    pub fn assert_no_missing_mocks(&self, reporter: &dyn Reporter) {
        lock(&self.state).assert_no_missing_mocks(reporter);
    }

    /// Reports one failure for every mock that was never called nor asserted.
    pub fn assert_mocks_called(&self, reporter: &dyn Reporter) {
        lock(&self.state).assert_mocks_called(reporter);
    }

    ///
    /// The URL of the server, e.g. `http://127.0.0.1:4321`.
    ///
    pub fn url(&self) -> String {
        format!("http://{}", self.address)
    }

    ///
    /// The host and port of the server, e.g. `127.0.0.1:4321`.
    ///
    pub fn host_with_port(&self) -> String {
        self.address.to_string()
    }

    ///
    /// The raw address of the server.
    ///
    pub fn socket_address(&self) -> SocketAddr {
        self.address
    }

    ///
    /// Removes all the mocks and forgets all the unmatched requests.
    ///
    pub fn reset(&self) {
        lock(&self.state).reset();
    }

    ///
    /// Stops listening. Connections still open are dropped.
    ///
    pub fn close(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("The server thread panicked");
            }
        }
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("address", &self.address)
            .finish()
    }
}

async fn handle_request(
    hyper_request: HttpRequest<Incoming>,
    state: Arc<Mutex<State>>,
) -> Result<Response<Full<Bytes>>, Error> {
    let request = Request::read_from(hyper_request).await.map_err(|err| {
        log::error!("{}", err);
        err
    })?;
    log::debug!("Request received: {}", request.formatted());

    let reply = lock(&state).dispatch(&request);

    Ok(respond(reply))
}

// hyper drops the body of HEAD responses but keeps their content-length.
fn respond(reply: Reply) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(reply.body));
    *response.status_mut() = reply.status;
    *response.headers_mut() = reply.headers;
    response
}
