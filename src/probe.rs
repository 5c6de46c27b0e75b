use std::fmt;
use std::time::Duration;

/// Why an asset's public URL could not be confirmed as servable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnreachableReason {
    Timeout,
    Connect(String),
    Status(u16),
    InvalidUrl(String),
    Transport(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reachability {
    Reachable,
    Unreachable(UnreachableReason),
}

impl Reachability {
    pub fn is_reachable(&self) -> bool {
        matches!(self, Reachability::Reachable)
    }
}

impl fmt::Display for UnreachableReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnreachableReason::Timeout => write!(f, "timed out"),
            UnreachableReason::Connect(msg) => write!(f, "connection failed: {}", msg),
            UnreachableReason::Status(code) => write!(f, "HTTP status {}", code),
            UnreachableReason::InvalidUrl(msg) => write!(f, "invalid url: {}", msg),
            UnreachableReason::Transport(msg) => write!(f, "transport error: {}", msg),
        }
    }
}

pub trait ReachabilityProbe: Send + Sync {
    fn probe(&self, url: &str) -> Reachability;
}

/// HEAD request with a bounded timeout; only `200 OK` counts as reachable.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    client: reqwest::blocking::Client,
}

impl HttpProbe {
    /// Builds the blocking client. Must not be called from inside an async
    /// runtime.
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()?;
        Ok(Self { client })
    }
}

impl ReachabilityProbe for HttpProbe {
    fn probe(&self, url: &str) -> Reachability {
        match self.client.head(url).send() {
            Ok(response) if response.status() == reqwest::StatusCode::OK => Reachability::Reachable,
            Ok(response) => Reachability::Unreachable(UnreachableReason::Status(response.status().as_u16())),
            Err(e) => Reachability::Unreachable(classify_error(&e)),
        }
    }
}

fn classify_error(e: &reqwest::Error) -> UnreachableReason {
    if e.is_timeout() {
        UnreachableReason::Timeout
    } else if e.is_builder() {
        UnreachableReason::InvalidUrl(e.to_string())
    } else if e.is_connect() {
        UnreachableReason::Connect(e.to_string())
    } else {
        UnreachableReason::Transport(e.to_string())
    }
}

/// Treats every URL as reachable, for stores that are not served over HTTP.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysReachable;

impl ReachabilityProbe for AlwaysReachable {
    fn probe(&self, _url: &str) -> Reachability {
        Reachability::Reachable
    }
}
