#![allow(dead_code)]

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use rcgen::{BasicConstraints, CertificateParams, DnType, IsCa, Issuer, KeyPair};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};

const SERVER_DEADLINE: Duration = Duration::from_secs(20);

#[derive(Clone, Debug)]
pub struct MockResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl MockResponse {
    pub fn new(
        status: u16,
        headers: Vec<(impl Into<String>, impl Into<String>)>,
        body: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            status,
            headers: headers
                .into_iter()
                .map(|(name, value)| (name.into(), value.into()))
                .collect(),
            body: body.into(),
        }
    }

    pub fn status(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self::new(status, Vec::<(String, String)>::new(), body)
    }

    pub fn redirect(status: u16, location: &str) -> Self {
        Self::new(status, vec![("Location", location)], Vec::<u8>::new())
    }
}

#[derive(Clone, Debug)]
pub struct CapturedRequest {
    pub method: String,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl CapturedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(header, _)| header.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn header_values(&self, name: &str) -> Vec<&str> {
        self.headers
            .iter()
            .filter(|(header, _)| header.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
            .collect()
    }
}

/// Echo semantics: the request body when it is non-empty, otherwise the last
/// segment of the request path.
pub fn echo_response(request: &CapturedRequest) -> MockResponse {
    if !request.body.is_empty() {
        return MockResponse::status(200, request.body.clone());
    }
    let path = request.path.split('?').next().unwrap_or_default();
    let segment = path.rsplit('/').next().unwrap_or_default();
    MockResponse::status(200, segment.as_bytes().to_vec())
}

/// Plain HTTP server answering one request per connection on a background
/// thread until `max_connections` were handled.
pub struct MockServer {
    pub base_url: String,
    address: std::net::SocketAddr,
    served: Arc<AtomicUsize>,
    captured: Arc<Mutex<Vec<CapturedRequest>>>,
    join: Option<JoinHandle<()>>,
}

impl MockServer {
    pub fn start(responses: Vec<MockResponse>) -> Self {
        let max_connections = responses.len();
        let mut responses = responses.into_iter();
        Self::with_handler(max_connections, move |_| {
            responses
                .next()
                .unwrap_or_else(|| MockResponse::status(500, "script exhausted"))
        })
    }

    pub fn echo(max_connections: usize) -> Self {
        Self::with_handler(max_connections, echo_response)
    }

    pub fn with_handler<F>(max_connections: usize, mut handler: F) -> Self
    where
        F: FnMut(&CapturedRequest) -> MockResponse + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind mock server");
        let address = listener.local_addr().expect("read local address");
        listener
            .set_nonblocking(true)
            .expect("set listener nonblocking");

        let served = Arc::new(AtomicUsize::new(0));
        let captured = Arc::new(Mutex::new(Vec::new()));
        let served_clone = Arc::clone(&served);
        let captured_clone = Arc::clone(&captured);

        let join = thread::spawn(move || {
            accept_loop(&listener, max_connections, |mut stream| {
                let request = read_request(&mut stream);
                served_clone.fetch_add(1, Ordering::SeqCst);
                if let Ok(request) = request {
                    let response = handler(&request);
                    captured_clone
                        .lock()
                        .expect("lock captured requests")
                        .push(request);
                    let _ = write_response(&mut stream, &response);
                }
            });
        });

        Self {
            base_url: format!("http://{address}"),
            address,
            served,
            captured,
            join: Some(join),
        }
    }

    pub fn port(&self) -> u16 {
        self.address.port()
    }

    pub fn served_count(&self) -> usize {
        self.served.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<CapturedRequest> {
        self.captured
            .lock()
            .expect("lock captured requests")
            .clone()
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

/// Test certificate authority plus a leaf for `localhost` and `127.0.0.1`.
pub struct TestPki {
    pub ca_pem: String,
    leaf_der: CertificateDer<'static>,
    leaf_key_der: Vec<u8>,
}

impl TestPki {
    pub fn generate() -> Self {
        let mut ca_params = CertificateParams::new(Vec::<String>::new()).expect("ca params");
        ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        ca_params
            .distinguished_name
            .push(DnType::CommonName, "httpunit test ca");
        let ca_key = KeyPair::generate().expect("generate ca key");
        let ca_cert = ca_params
            .clone()
            .self_signed(&ca_key)
            .expect("self-sign ca certificate");
        let issuer = Issuer::new(ca_params, ca_key);

        let mut leaf_params =
            CertificateParams::new(vec!["localhost".to_owned(), "127.0.0.1".to_owned()])
                .expect("leaf params");
        leaf_params
            .distinguished_name
            .push(DnType::CommonName, "localhost");
        let leaf_key = KeyPair::generate().expect("generate leaf key");
        let leaf_cert = leaf_params
            .signed_by(&leaf_key, &issuer)
            .expect("sign leaf certificate");

        Self {
            ca_pem: ca_cert.pem(),
            leaf_der: leaf_cert.der().clone(),
            leaf_key_der: leaf_key.serialize_der(),
        }
    }

    fn server_config(&self) -> Arc<rustls::ServerConfig> {
        Arc::new(self.rustls_server_config())
    }

    fn rustls_server_config(&self) -> rustls::ServerConfig {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        rustls::ServerConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .expect("tls protocol versions")
            .with_no_client_auth()
            .with_single_cert(
                vec![self.leaf_der.clone()],
                PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(self.leaf_key_der.clone())),
            )
            .expect("server certificate")
    }
}

/// HTTPS echo server backed by a [`TestPki`] leaf certificate. Connections
/// whose handshake fails still count as handled.
pub struct TlsEchoServer {
    pub base_url: String,
    pub ca_pem: String,
    served: Arc<AtomicUsize>,
    join: Option<JoinHandle<()>>,
}

impl TlsEchoServer {
    pub fn start(max_connections: usize) -> Self {
        let pki = TestPki::generate();
        let config = pki.server_config();

        let listener = TcpListener::bind("127.0.0.1:0").expect("bind tls server");
        let address = listener.local_addr().expect("read local address");
        listener
            .set_nonblocking(true)
            .expect("set listener nonblocking");

        let served = Arc::new(AtomicUsize::new(0));
        let served_clone = Arc::clone(&served);

        let join = thread::spawn(move || {
            accept_loop(&listener, max_connections, |stream| {
                let connection =
                    rustls::ServerConnection::new(Arc::clone(&config)).expect("tls connection");
                let mut tls = rustls::StreamOwned::new(connection, stream);
                let request = read_request(&mut tls);
                served_clone.fetch_add(1, Ordering::SeqCst);
                if let Ok(request) = request {
                    let _ = write_response(&mut tls, &echo_response(&request));
                    tls.conn.send_close_notify();
                    let _ = tls.flush();
                }
            });
        });

        Self {
            base_url: format!("https://{address}"),
            ca_pem: pki.ca_pem,
            served,
            join: Some(join),
        }
    }

    pub fn served_count(&self) -> usize {
        self.served.load(Ordering::SeqCst)
    }
}

impl Drop for TlsEchoServer {
    fn drop(&mut self) {
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

/// HTTPS server that offers `h2` and `http/1.1` over ALPN and answers every
/// request with the HTTP version it was received over (`HTTP/2.0` or
/// `HTTP/1.1`).
pub struct VersionEchoServer {
    pub base_url: String,
    pub ca_pem: String,
    join: Option<JoinHandle<()>>,
}

impl VersionEchoServer {
    pub fn start(max_connections: usize) -> Self {
        let pki = TestPki::generate();
        let mut config = pki.rustls_server_config();
        config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];
        let acceptor = tokio_rustls::TlsAcceptor::from(Arc::new(config));

        let listener = TcpListener::bind("127.0.0.1:0").expect("bind h2 server");
        let address = listener.local_addr().expect("read local address");
        listener
            .set_nonblocking(true)
            .expect("set listener nonblocking");

        let join = thread::spawn(move || {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .expect("server runtime");
            runtime.block_on(async move {
                let listener =
                    tokio::net::TcpListener::from_std(listener).expect("tokio listener");
                let mut connections = Vec::new();
                for _ in 0..max_connections {
                    let accepted =
                        tokio::time::timeout(SERVER_DEADLINE, listener.accept()).await;
                    let Ok(Ok((stream, _))) = accepted else {
                        break;
                    };
                    let acceptor = acceptor.clone();
                    connections.push(tokio::spawn(async move {
                        let Ok(tls) = acceptor.accept(stream).await else {
                            return;
                        };
                        let service = hyper::service::service_fn(
                            |request: hyper::Request<hyper::body::Incoming>| async move {
                                let version = format!("{:?}", request.version());
                                Ok::<_, std::convert::Infallible>(hyper::Response::new(
                                    http_body_util::Full::new(bytes::Bytes::from(version)),
                                ))
                            },
                        );
                        let _ = hyper_util::server::conn::auto::Builder::new(
                            hyper_util::rt::TokioExecutor::new(),
                        )
                        .serve_connection(hyper_util::rt::TokioIo::new(tls), service)
                        .await;
                    }));
                }
                for connection in connections {
                    let _ = tokio::time::timeout(Duration::from_secs(5), connection).await;
                }
            });
        });

        Self {
            base_url: format!("https://{address}"),
            ca_pem: pki.ca_pem,
            join: Some(join),
        }
    }
}

impl Drop for VersionEchoServer {
    fn drop(&mut self) {
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

/// Returns a local port with nothing listening on it.
pub fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind probe listener");
    listener.local_addr().expect("read local address").port()
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

fn accept_loop<F>(listener: &TcpListener, max_connections: usize, mut handle: F)
where
    F: FnMut(TcpStream),
{
    let deadline = Instant::now() + SERVER_DEADLINE;
    let mut handled = 0;

    while handled < max_connections && Instant::now() < deadline {
        match listener.accept() {
            Ok((stream, _)) => {
                let _ = stream.set_nonblocking(false);
                let _ = stream.set_read_timeout(Some(Duration::from_secs(5)));
                handled += 1;
                handle(stream);
            }
            Err(error) if error.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(5));
            }
            Err(_) => break,
        }
    }
}

fn find_header_end(raw: &[u8]) -> Option<usize> {
    raw.windows(4).position(|window| window == b"\r\n\r\n")
}

fn read_request(stream: &mut impl Read) -> std::io::Result<CapturedRequest> {
    let mut raw = Vec::new();
    loop {
        let mut chunk = [0_u8; 1024];
        let read = stream.read(&mut chunk)?;
        if read == 0 {
            break;
        }
        raw.extend_from_slice(&chunk[..read]);
        if find_header_end(&raw).is_some() {
            break;
        }
    }

    let header_end = find_header_end(&raw).ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "malformed request without header terminator",
        )
    })?;

    let header_text = String::from_utf8_lossy(&raw[..header_end]);
    let mut lines = header_text.split("\r\n");
    let request_line = lines.next().ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::InvalidData, "missing request line")
    })?;
    let mut request_line_parts = request_line.split_whitespace();
    let method = request_line_parts.next().unwrap_or_default().to_owned();
    let path = request_line_parts.next().unwrap_or_default().to_owned();

    let mut headers = Vec::new();
    for line in lines {
        if let Some((name, value)) = line.split_once(':') {
            headers.push((name.trim().to_ascii_lowercase(), value.trim().to_owned()));
        }
    }

    let content_length = headers
        .iter()
        .find(|(name, _)| name == "content-length")
        .and_then(|(_, value)| value.parse::<usize>().ok())
        .unwrap_or(0);
    let mut body = raw[header_end + 4..].to_vec();
    while body.len() < content_length {
        let mut chunk = [0_u8; 1024];
        let read = stream.read(&mut chunk)?;
        if read == 0 {
            break;
        }
        body.extend_from_slice(&chunk[..read]);
    }
    body.truncate(content_length);

    Ok(CapturedRequest {
        method,
        path,
        headers,
        body,
    })
}

fn write_response(stream: &mut impl Write, response: &MockResponse) -> std::io::Result<()> {
    let body = &response.body;
    let mut raw = format!(
        "HTTP/1.1 {} {}\r\nContent-Length: {}\r\nConnection: close\r\n",
        response.status,
        status_text(response.status),
        body.len()
    );
    for (name, value) in &response.headers {
        raw.push_str(name);
        raw.push_str(": ");
        raw.push_str(value);
        raw.push_str("\r\n");
    }
    raw.push_str("\r\n");

    stream.write_all(raw.as_bytes())?;
    stream.write_all(body)?;
    stream.flush()
}

fn status_text(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        301 => "Moved Permanently",
        302 => "Found",
        303 => "See Other",
        404 => "Not Found",
        409 => "Conflict",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "Unknown",
    }
}
