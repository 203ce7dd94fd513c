//! Model sources and the collaborators that turn them into bytes.
//!
//! A [`ModelSource`] is either a bundled asset handle or a URI. Bundled assets are resolved to a
//! URI by the host's [`AssetResolver`]; URIs must use the `file`, `http` or `https` scheme and are
//! checked by [`parse_uri`] before any byte is fetched through a [`ByteFetcher`].

use crate::error::InvalidSourceError;
use anyhow::Context;
use once_cell::sync::OnceCell;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;

/// Opaque numeric handle of an asset bundled with the host application.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    derive_more::Display,
    derive_more::From,
)]
#[display("asset #{_0}")]
pub struct AssetId(pub u32);

/// Where a model's bytes come from.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ModelSource {
    BundledAsset(AssetId),
    /// A `file://`, `http://` or `https://` URI pointing directly to a `.tflite` model.
    Uri(String),
}

impl ModelSource {
    pub fn asset(id: u32) -> Self {
        ModelSource::BundledAsset(AssetId(id))
    }

    pub fn uri(uri: impl Into<String>) -> Self {
        ModelSource::Uri(uri.into())
    }
}

impl Display for ModelSource {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelSource::BundledAsset(id) => write!(f, "{id}"),
            ModelSource::Uri(uri) => write!(f, "{uri}"),
        }
    }
}

impl From<AssetId> for ModelSource {
    fn from(id: AssetId) -> Self {
        ModelSource::BundledAsset(id)
    }
}

impl From<&str> for ModelSource {
    fn from(uri: &str) -> Self {
        ModelSource::uri(uri)
    }
}

impl From<String> for ModelSource {
    fn from(uri: String) -> Self {
        ModelSource::Uri(uri)
    }
}

/// A source that passed validation and can be fetched.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResolvedSource {
    File(PathBuf),
    Remote(Url),
}

impl Display for ResolvedSource {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ResolvedSource::File(path) => write!(f, "file://{}", path.display()),
            ResolvedSource::Remote(url) => write!(f, "{url}"),
        }
    }
}

/// Validate a URI and classify it as a local file or a remote resource.
pub fn parse_uri(uri: &str) -> Result<ResolvedSource, InvalidSourceError> {
    if uri.trim().is_empty() {
        return Err(InvalidSourceError::new(uri, "the URI is empty"));
    }
    let url = Url::parse(uri).map_err(|e| InvalidSourceError::new(uri, e.to_string()))?;
    match url.scheme() {
        "file" => url
            .to_file_path()
            .map(ResolvedSource::File)
            .map_err(|_| InvalidSourceError::new(uri, "not a valid local file path")),
        "http" | "https" => Ok(ResolvedSource::Remote(url)),
        other => Err(InvalidSourceError::new(
            uri,
            format!("unsupported scheme \"{other}\", expected file, http or https"),
        )),
    }
}

/// Host collaborator resolving bundled asset handles to fetchable URIs.
pub trait AssetResolver: Send + Sync {
    fn resolve(&self, asset: AssetId) -> anyhow::Result<String>;
}

/// Resolver used when the host did not provide one.
pub struct NoAssetResolver;

impl AssetResolver for NoAssetResolver {
    fn resolve(&self, asset: AssetId) -> anyhow::Result<String> {
        anyhow::bail!("no asset resolver is configured to resolve {asset}")
    }
}

/// Resolves assets from a fixed table.
///
/// Entries may be full URIs or plain paths. Relative paths are joined onto the root directory.
#[derive(Clone, Debug, Default)]
pub struct StaticAssetResolver {
    root: Option<PathBuf>,
    entries: HashMap<AssetId, String>,
}

impl StaticAssetResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = Some(root.into());
        self
    }

    pub fn register(mut self, asset: impl Into<AssetId>, location: impl Into<String>) -> Self {
        self.entries.insert(asset.into(), location.into());
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl AssetResolver for StaticAssetResolver {
    fn resolve(&self, asset: AssetId) -> anyhow::Result<String> {
        let location = self
            .entries
            .get(&asset)
            .with_context(|| format!("{asset} is not registered"))?;

        if Url::parse(location).is_ok() {
            return Ok(location.clone());
        }

        let path = match &self.root {
            Some(root) => root.join(location),
            None => PathBuf::from(location),
        };
        let path = if path.is_absolute() {
            path
        } else {
            std::env::current_dir()?.join(path)
        };
        Url::from_file_path(&path)
            .map(String::from)
            .map_err(|_| anyhow::anyhow!("{} cannot be expressed as a file URI", path.display()))
    }
}

/// Raised by fetchers that know a model's size before reading it and find it over the limit.
#[derive(Debug, thiserror::Error)]
#[error("model is {size} bytes, over the limit of {limit} bytes")]
pub struct SizeLimitExceeded {
    pub size: u64,
    pub limit: u64,
}

/// Collaborator reading the bytes behind a resolved source. This is where all model I/O happens.
pub trait ByteFetcher: Send + Sync {
    /// Read the whole model. When `limit` is set and the size is known up front, fetchers should
    /// fail with [`SizeLimitExceeded`] instead of reading the body. The loader checks the limit
    /// again on the returned bytes.
    fn fetch(&self, source: &ResolvedSource, limit: Option<u64>) -> anyhow::Result<Vec<u8>>;
}

fn check_limit(size: u64, limit: Option<u64>) -> Result<(), SizeLimitExceeded> {
    match limit {
        Some(limit) if size > limit => Err(SizeLimitExceeded { size, limit }),
        _ => Ok(()),
    }
}

/// Reads local files with `std::fs` and downloads remote models with a blocking HTTP client.
pub struct DefaultFetcher {
    user_agent: String,
    http: OnceCell<reqwest::blocking::Client>,
}

impl DefaultFetcher {
    pub fn new() -> Self {
        Self::with_user_agent(concat!("fast-tflite/", env!("CARGO_PKG_VERSION")))
    }

    pub fn with_user_agent(user_agent: impl Into<String>) -> Self {
        Self {
            user_agent: user_agent.into(),
            http: OnceCell::new(),
        }
    }

    // Built lazily so that loaders only serving local files never create an HTTP client.
    fn http(&self) -> anyhow::Result<&reqwest::blocking::Client> {
        self.http.get_or_try_init(|| {
            reqwest::blocking::Client::builder()
                .user_agent(self.user_agent.clone())
                .build()
                .context("Failed to create HTTP client")
        })
    }
}

impl Default for DefaultFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl ByteFetcher for DefaultFetcher {
    fn fetch(&self, source: &ResolvedSource, limit: Option<u64>) -> anyhow::Result<Vec<u8>> {
        match source {
            ResolvedSource::File(path) => {
                let metadata = std::fs::metadata(path)
                    .with_context(|| format!("Failed to read {}", path.display()))?;
                check_limit(metadata.len(), limit)?;
                std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))
            }
            ResolvedSource::Remote(url) => {
                let response = self
                    .http()?
                    .get(url.clone())
                    .send()
                    .with_context(|| format!("Failed to reach {url}"))?
                    .error_for_status()?;
                if let Some(size) = response.content_length() {
                    check_limit(size, limit)?;
                }
                Ok(response.bytes()?.to_vec())
            }
        }
    }
}
