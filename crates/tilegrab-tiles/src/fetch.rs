//! Tile fetching over HTTP.
//!
//! A [`TileSource`] describes where tiles come from and hands out
//! [`TileFetcher`]s. Fetchers hold connection state (an HTTP client with its
//! keep-alive pool) and are not shared: the scheduler gives each worker
//! thread its own, created lazily on that worker's first tile.

use crate::coord::TileCoord;
use crate::error::FetchError;
use crate::{Result, TileError};
use std::fmt;
use std::time::Duration;
use tracing::trace;

/// Public OpenStreetMap tile server.
///
/// Its usage policy requires an identifying user agent and forbids bulk
/// downloading; point the template at your own server for large areas.
pub const DEFAULT_URL_TEMPLATE: &str = "https://tile.openstreetmap.org/{z}/{x}/{y}.png";

/// User agent sent when none is configured.
pub const DEFAULT_USER_AGENT: &str = concat!("tilegrab/", env!("CARGO_PKG_VERSION"));

/// Per-request timeout covering connect and body read.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Something that can produce per-thread tile fetchers.
pub trait TileSource: Send + Sync {
    /// Fetcher type handed to each worker.
    type Fetcher: TileFetcher;

    /// Create a fresh fetcher.
    ///
    /// Called once per worker thread; a failure is retried on that worker's
    /// next tile.
    fn connect(&self) -> Result<Self::Fetcher>;
}

/// Retrieves the bytes of single tiles.
pub trait TileFetcher {
    /// Fetch one tile. Anything other than a complete 200 response is an error.
    fn fetch(&mut self, coord: &TileCoord) -> std::result::Result<Vec<u8>, FetchError>;
}

// ============================================================================
// URL templates
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Zoom,
    X,
    Y,
}

/// A tile URL pattern such as `https://host/{z}/{x}/{y}.png`.
///
/// `{z}` (or `{zoom}`), `{x}` and `{y}` must each appear at least once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlTemplate {
    template: String,
    segments: Vec<Segment>,
}

impl UrlTemplate {
    /// Parse and validate a template.
    pub fn parse(template: &str) -> Result<Self> {
        let invalid = |reason: &str| TileError::InvalidUrlTemplate {
            template: template.to_string(),
            reason: reason.to_string(),
        };

        let mut segments = Vec::new();
        let mut rest = template;
        while let Some(open) = rest.find('{') {
            if open > 0 {
                segments.push(Segment::Literal(rest[..open].to_string()));
            }
            let after = &rest[open + 1..];
            let close = after.find('}').ok_or_else(|| invalid("unclosed '{'"))?;
            let segment = match &after[..close] {
                "z" | "zoom" => Segment::Zoom,
                "x" => Segment::X,
                "y" => Segment::Y,
                other => return Err(invalid(&format!("unknown placeholder {{{}}}", other))),
            };
            segments.push(segment);
            rest = &after[close + 1..];
        }
        if !rest.is_empty() {
            segments.push(Segment::Literal(rest.to_string()));
        }

        for (needed, name) in [(Segment::Zoom, "{z}"), (Segment::X, "{x}"), (Segment::Y, "{y}")] {
            if !segments.contains(&needed) {
                return Err(invalid(&format!("missing {}", name)));
            }
        }

        Ok(Self {
            template: template.to_string(),
            segments,
        })
    }

    /// The template as originally written.
    pub fn as_str(&self) -> &str {
        &self.template
    }

    /// Substitute a tile's coordinates.
    pub fn render(&self, coord: &TileCoord) -> String {
        let mut url = String::with_capacity(self.template.len() + 16);
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => url.push_str(text),
                Segment::Zoom => url.push_str(&coord.zoom.to_string()),
                Segment::X => url.push_str(&coord.x.to_string()),
                Segment::Y => url.push_str(&coord.y.to_string()),
            }
        }
        url
    }
}

impl Default for UrlTemplate {
    fn default() -> Self {
        Self {
            template: DEFAULT_URL_TEMPLATE.to_string(),
            segments: vec![
                Segment::Literal("https://tile.openstreetmap.org/".to_string()),
                Segment::Zoom,
                Segment::Literal("/".to_string()),
                Segment::X,
                Segment::Literal("/".to_string()),
                Segment::Y,
                Segment::Literal(".png".to_string()),
            ],
        }
    }
}

impl fmt::Display for UrlTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.template)
    }
}

// ============================================================================
// HTTP source
// ============================================================================

/// Tile source backed by a plain HTTP(S) tile server.
#[derive(Debug, Clone)]
pub struct HttpTileSource {
    template: UrlTemplate,
    user_agent: String,
    timeout: Duration,
}

impl HttpTileSource {
    /// Create a source with the default user agent and timeout.
    pub fn new(template: UrlTemplate) -> Self {
        Self {
            template,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Set the `User-Agent` header sent with every request.
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Set the per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn template(&self) -> &UrlTemplate {
        &self.template
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl Default for HttpTileSource {
    fn default() -> Self {
        Self::new(UrlTemplate::default())
    }
}

impl TileSource for HttpTileSource {
    type Fetcher = HttpTileFetcher;

    fn connect(&self) -> Result<HttpTileFetcher> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(self.user_agent.clone())
            .timeout(self.timeout)
            .build()?;

        Ok(HttpTileFetcher {
            client,
            template: self.template.clone(),
        })
    }
}

/// One worker's HTTP connection pool.
pub struct HttpTileFetcher {
    client: reqwest::blocking::Client,
    template: UrlTemplate,
}

impl fmt::Debug for HttpTileFetcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpTileFetcher")
            .field("template", &self.template.as_str())
            .finish()
    }
}

impl TileFetcher for HttpTileFetcher {
    fn fetch(&mut self, coord: &TileCoord) -> std::result::Result<Vec<u8>, FetchError> {
        let url = self.template.render(coord);
        trace!("GET {}", url);

        let response = self.client.get(&url).send()?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(FetchError::Http(status.as_u16()));
        }

        let bytes = response.bytes()?;
        Ok(bytes.to_vec())
    }
}
