use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use thiserror::Error;

use super::{Graph, GraphError, RepositoryConfig};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const READ_TIMEOUT: Duration = Duration::from_secs(120);
const NTRIPLES: &str = "application/n-triples";

#[derive(Debug, Error)]
pub(crate) enum FetchError {
    /// 404 on a fetch the assembly cannot proceed without.
    #[error("not found: {url}")]
    NotFound { url: String },

    #[error("{url} returned status {status}")]
    Http { url: String, status: u16 },

    #[error("transport failure fetching {url}: {message}")]
    Transport { url: String, message: String },

    #[error("cannot write {path}: {source}")]
    Io {
        path: PathBuf,
        source: io::Error,
    },

    #[error("unparseable metadata from {url}: {source}")]
    BadGraph { url: String, source: GraphError },
}

/// Where one fetch goes: a remote path fragment (appended to the
/// entity's repository URL; `None` means the entity's own resource), the
/// local destination inside the workspace, and whether a 404 is
/// tolerated. Metadata fetches ask the repository for N-Triples.
#[derive(Debug, Clone)]
pub(crate) struct PathSpec {
    pub(crate) remote: Option<String>,
    pub(crate) local: PathBuf,
    pub(crate) optional: bool,
    pub(crate) rdf: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FetchOutcome {
    Saved,
    /// 404 on an optional fetch; nothing was written.
    OptionalMiss,
}

/// Blocking HTTP client for the repository service. Handles Basic auth
/// and the pairtree URL scheme; callers decide what to fetch and where
/// it lands.
pub(crate) struct RepositoryFetcher {
    agent: ureq::Agent,
    url: String,
    base_path: String,
    authorization: Option<String>,
}

impl RepositoryFetcher {
    pub(crate) fn new(config: &RepositoryConfig) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(CONNECT_TIMEOUT)
            .timeout_read(READ_TIMEOUT)
            .build();
        let authorization = if config.user.is_empty() {
            None
        } else {
            let raw = format!("{}:{}", config.user, config.password);
            Some(format!("Basic {}", BASE64.encode(raw)))
        };
        Self {
            agent,
            url: config.url.trim_end_matches('/').to_string(),
            base_path: config.base_path.clone(),
            authorization,
        }
    }

    /// `<repository>/<base>/<aa>/<bb>/<cc>/<dd>/<uuid>` — the pairtree
    /// sharding the repository stores objects under.
    pub(crate) fn object_url(&self, uuid: &str, extra: Option<&str>) -> String {
        let mut url = format!("{}{}/{}", self.url, self.base_path, pairtree(uuid));
        if let Some(extra) = extra {
            url.push_str(extra);
        }
        url
    }

    /// Fetch one path spec for `uuid`, streaming the body to
    /// `spec.local`. Optional 404s report `OptionalMiss` instead of
    /// failing.
    pub(crate) fn download(
        &self,
        uuid: &str,
        spec: &PathSpec,
    ) -> Result<FetchOutcome, FetchError> {
        let url = self.object_url(uuid, spec.remote.as_deref());
        match self.get(&url, spec.rdf) {
            Ok(response) => {
                let mut reader = response.into_reader();
                let mut file =
                    std::fs::File::create(&spec.local).map_err(|source| FetchError::Io {
                        path: spec.local.clone(),
                        source,
                    })?;
                io::copy(&mut reader, &mut file).map_err(|source| FetchError::Io {
                    path: spec.local.clone(),
                    source,
                })?;
                Ok(FetchOutcome::Saved)
            }
            Err(FetchError::NotFound { .. }) if spec.optional => Ok(FetchOutcome::OptionalMiss),
            Err(err) => Err(err),
        }
    }

    /// Fetch and parse a metadata graph straight from a URL (used for the
    /// list source, which is consulted but never stored).
    pub(crate) fn fetch_graph(&self, url: &str) -> Result<Graph, FetchError> {
        let body = self
            .get(url, true)?
            .into_string()
            .map_err(|e| FetchError::Transport {
                url: url.to_string(),
                message: e.to_string(),
            })?;
        Graph::parse(&body).map_err(|source| FetchError::BadGraph {
            url: url.to_string(),
            source,
        })
    }

    /// Parse a metadata graph already saved into the workspace.
    pub(crate) fn load_graph(path: &Path) -> Result<Graph, FetchError> {
        let body = std::fs::read_to_string(path).map_err(|source| FetchError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Graph::parse(&body).map_err(|source| FetchError::BadGraph {
            url: path.display().to_string(),
            source,
        })
    }

    fn get(&self, url: &str, rdf: bool) -> Result<ureq::Response, FetchError> {
        let mut request = self.agent.get(url);
        if let Some(authorization) = &self.authorization {
            request = request.set("Authorization", authorization);
        }
        if rdf {
            request = request.set("Accept", NTRIPLES);
        }
        match request.call() {
            Ok(response) => Ok(response),
            Err(ureq::Error::Status(404, _)) => Err(FetchError::NotFound {
                url: url.to_string(),
            }),
            Err(ureq::Error::Status(status, _)) => Err(FetchError::Http {
                url: url.to_string(),
                status,
            }),
            Err(ureq::Error::Transport(err)) => Err(FetchError::Transport {
                url: url.to_string(),
                message: err.to_string(),
            }),
        }
    }
}

fn pairtree(uuid: &str) -> String {
    let chars: Vec<char> = uuid.chars().collect();
    let mut segments: Vec<String> = chars
        .chunks(2)
        .take(4)
        .map(|pair| pair.iter().collect())
        .collect();
    segments.push(uuid.to_string());
    segments.join("/")
}
