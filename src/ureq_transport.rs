use std::io::Read;
use std::time::Duration;

use bytes::Bytes;

use crate::error::TransportErrorKind;
use crate::request::RequestHead;
use crate::response::Response;
use crate::transport::{Transport, TransportFault};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(3);
const DEFAULT_MAX_RESPONSE_BODY_BYTES: usize = 8 * 1024 * 1024;
const DEFAULT_POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);
const DEFAULT_POOL_MAX_IDLE_PER_HOST: usize = 8;
const DEFAULT_USER_AGENT: &str = concat!("svc-dispatch/", env!("CARGO_PKG_VERSION"));

/// Blocking [`Transport`] backed by a pooled `ureq` agent.
#[derive(Clone)]
pub struct UreqTransport {
    agent: ureq::Agent,
    timeout: Duration,
    connect_timeout: Duration,
    max_response_body_bytes: usize,
}

impl std::fmt::Debug for UreqTransport {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("UreqTransport")
            .field("timeout", &self.timeout)
            .field("connect_timeout", &self.connect_timeout)
            .field("max_response_body_bytes", &self.max_response_body_bytes)
            .finish_non_exhaustive()
    }
}

impl Default for UreqTransport {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl UreqTransport {
    pub fn builder() -> UreqTransportBuilder {
        UreqTransportBuilder::default()
    }

    fn run(&self, head: RequestHead, body: Bytes) -> Result<Response, TransportFault> {
        let mut request = ureq::http::Request::new(body.to_vec());
        *request.method_mut() = head.method;
        *request.uri_mut() = head.uri;
        *request.headers_mut() = head.headers;

        let configured_request = self
            .agent
            .configure_request(request)
            .timeout_global(Some(self.timeout))
            .timeout_connect(Some(self.connect_timeout))
            .build();

        let mut response = self
            .agent
            .run(configured_request)
            .map_err(|source| match source {
                ureq::Error::Timeout(_) => TransportFault::timeout(self.timeout),
                other => TransportFault::new(classify_ureq_transport_error(&other), other),
            })?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = read_body_limited(&mut response, self.max_response_body_bytes)
            .map_err(|fault| match fault {
                ReadBodyError::Read(source) => match wrapped_ureq_error(&source) {
                    Some(ureq::Error::Timeout(_)) => TransportFault::timeout(self.timeout),
                    _ => TransportFault::new(TransportErrorKind::Read, source),
                },
                ReadBodyError::TooLarge { actual_bytes } => TransportFault::new(
                    TransportErrorKind::Protocol,
                    format!(
                        "response body exceeds {} bytes (read {actual_bytes})",
                        self.max_response_body_bytes
                    ),
                ),
            })?;
        Ok(Response::new(status, headers, body))
    }
}

impl Transport for UreqTransport {
    fn execute(&self, head: RequestHead, body: Bytes) -> Result<Response, TransportFault> {
        self.run(head, body)
    }
}

pub struct UreqTransportBuilder {
    user_agent: String,
    timeout: Duration,
    connect_timeout: Duration,
    max_response_body_bytes: usize,
    pool_idle_timeout: Duration,
    pool_max_idle_per_host: usize,
}

impl Default for UreqTransportBuilder {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            timeout: DEFAULT_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            max_response_body_bytes: DEFAULT_MAX_RESPONSE_BODY_BYTES,
            pool_idle_timeout: DEFAULT_POOL_IDLE_TIMEOUT,
            pool_max_idle_per_host: DEFAULT_POOL_MAX_IDLE_PER_HOST,
        }
    }
}

impl UreqTransportBuilder {
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Per-attempt timeout covering connect, send and body read.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout.max(Duration::from_millis(1));
        self
    }

    pub fn connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout.max(Duration::from_millis(1));
        self
    }

    pub fn max_response_body_bytes(mut self, max_response_body_bytes: usize) -> Self {
        self.max_response_body_bytes = max_response_body_bytes.max(1);
        self
    }

    pub fn pool_idle_timeout(mut self, pool_idle_timeout: Duration) -> Self {
        self.pool_idle_timeout = pool_idle_timeout;
        self
    }

    pub fn pool_max_idle_per_host(mut self, pool_max_idle_per_host: usize) -> Self {
        self.pool_max_idle_per_host = pool_max_idle_per_host;
        self
    }

    pub fn build(self) -> UreqTransport {
        let config = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .user_agent(self.user_agent.as_str())
            .max_idle_age(self.pool_idle_timeout)
            .max_idle_connections_per_host(self.pool_max_idle_per_host)
            .build();
        UreqTransport {
            agent: config.new_agent(),
            timeout: self.timeout,
            connect_timeout: self.connect_timeout,
            max_response_body_bytes: self.max_response_body_bytes,
        }
    }
}

fn classify_ureq_transport_error(error: &ureq::Error) -> TransportErrorKind {
    match error {
        ureq::Error::HostNotFound => TransportErrorKind::Dns,
        ureq::Error::Tls(_) => TransportErrorKind::Tls,
        ureq::Error::ConnectProxyFailed(_) | ureq::Error::ConnectionFailed => {
            TransportErrorKind::Connect
        }
        ureq::Error::Io(source) => classify_io_error(source),
        ureq::Error::Protocol(_) | ureq::Error::BadUri(_) | ureq::Error::Http(_) => {
            TransportErrorKind::Protocol
        }
        _ => TransportErrorKind::Other,
    }
}

fn classify_io_error(error: &std::io::Error) -> TransportErrorKind {
    match error.kind() {
        std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => TransportErrorKind::Read,
        std::io::ErrorKind::NotFound => TransportErrorKind::Dns,
        std::io::ErrorKind::ConnectionRefused
        | std::io::ErrorKind::ConnectionAborted
        | std::io::ErrorKind::NotConnected
        | std::io::ErrorKind::AddrNotAvailable => TransportErrorKind::Connect,
        std::io::ErrorKind::ConnectionReset
        | std::io::ErrorKind::BrokenPipe
        | std::io::ErrorKind::UnexpectedEof => TransportErrorKind::Read,
        _ => TransportErrorKind::Other,
    }
}

fn wrapped_ureq_error(io_error: &std::io::Error) -> Option<&ureq::Error> {
    io_error
        .get_ref()
        .and_then(|source| source.downcast_ref::<ureq::Error>())
}

enum ReadBodyError {
    Read(std::io::Error),
    TooLarge { actual_bytes: usize },
}

fn read_body_limited(
    response: &mut ureq::http::Response<ureq::Body>,
    max_bytes: usize,
) -> Result<Bytes, ReadBodyError> {
    let mut reader = response.body_mut().as_reader();
    let mut collected = Vec::new();
    let mut chunk = [0_u8; 8192];
    let mut total_len = 0_usize;

    loop {
        let read = reader.read(&mut chunk).map_err(ReadBodyError::Read)?;
        if read == 0 {
            break;
        }
        total_len = total_len.saturating_add(read);
        if total_len > max_bytes {
            return Err(ReadBodyError::TooLarge {
                actual_bytes: total_len,
            });
        }
        collected.extend_from_slice(&chunk[..read]);
    }

    Ok(Bytes::from(collected))
}
