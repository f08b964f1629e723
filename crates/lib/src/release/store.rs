//! Release stores.
//!
//! A [`ReleaseStore`] receives the archive and checksum files of every
//! platform under one version. Two stores exist: a local directory
//! (`<root>/<version>/<file>`) and GitHub releases. Publishing the same
//! version again overwrites files of the same name in both.

use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::ReleaseStoreConfig;

pub const GITHUB_TOKEN_VAR: &str = "GITHUB_TOKEN";

#[derive(Debug, Error)]
pub enum StoreError {
  #[error("GITHUB_TOKEN is not set")]
  MissingToken,

  #[error("request to {url} failed: {message}")]
  Http { url: String, message: String },

  #[error("{url} returned HTTP {status}: {body}")]
  Status { url: String, status: u16, body: String },

  #[error("io error: {0}")]
  Io(#[from] io::Error),
}

/// Where published files end up.
pub trait ReleaseStore: Send + Sync {
  fn describe(&self) -> String;

  /// Upload `files` under `version`, returning one location per file.
  fn publish(&self, version: &str, files: &[PathBuf]) -> impl Future<Output = Result<Vec<String>, StoreError>> + Send;
}

fn file_name(path: &Path) -> String {
  path
    .file_name()
    .map(|n| n.to_string_lossy().into_owned())
    .unwrap_or_default()
}

/// Copies files into `<root>/<version>/`.
#[derive(Debug, Clone)]
pub struct DirectoryStore {
  root: PathBuf,
}

impl DirectoryStore {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self { root: root.into() }
  }
}

impl ReleaseStore for DirectoryStore {
  fn describe(&self) -> String {
    format!("directory {}", self.root.display())
  }

  async fn publish(&self, version: &str, files: &[PathBuf]) -> Result<Vec<String>, StoreError> {
    let dir = self.root.join(version);
    tokio::fs::create_dir_all(&dir).await?;

    let mut locations = Vec::with_capacity(files.len());
    for file in files {
      let dest = dir.join(file_name(file));
      tokio::fs::copy(file, &dest).await?;
      debug!(file = %dest.display(), "stored release file");
      locations.push(dest.display().to_string());
    }
    Ok(locations)
  }
}

#[derive(Debug, Deserialize)]
struct GithubRelease {
  upload_url: String,
  #[serde(default)]
  assets: Vec<GithubReleaseAsset>,
}

#[derive(Debug, Deserialize)]
struct GithubReleaseAsset {
  id: u64,
  name: String,
}

#[derive(Debug, Deserialize)]
struct GithubAsset {
  browser_download_url: String,
}

/// Publishes files as assets of the GitHub release named after the version.
#[derive(Debug, Clone)]
pub struct GithubStore {
  api_url: String,
  repository: String,
  token: String,
  client: reqwest::Client,
}

impl GithubStore {
  pub fn new(api_url: &str, repository: &str, token: String) -> Self {
    Self {
      api_url: api_url.trim_end_matches('/').to_string(),
      repository: repository.to_string(),
      token,
      client: reqwest::Client::new(),
    }
  }

  /// Build a store authenticated with `GITHUB_TOKEN`.
  pub fn from_env(api_url: &str, repository: &str) -> Result<Self, StoreError> {
    let token = std::env::var(GITHUB_TOKEN_VAR)
      .ok()
      .filter(|t| !t.is_empty())
      .ok_or(StoreError::MissingToken)?;
    Ok(Self::new(api_url, repository, token))
  }

  fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
    self
      .client
      .request(method, url)
      .bearer_auth(&self.token)
      .header(reqwest::header::ACCEPT, "application/vnd.github+json")
      .header(reqwest::header::USER_AGENT, concat!("m8dist/", env!("CARGO_PKG_VERSION")))
  }

  async fn send(&self, url: &str, builder: reqwest::RequestBuilder) -> Result<reqwest::Response, StoreError> {
    builder.send().await.map_err(|e| StoreError::Http {
      url: url.to_string(),
      message: e.to_string(),
    })
  }

  async fn check(url: &str, response: reqwest::Response) -> Result<reqwest::Response, StoreError> {
    let status = response.status();
    if !status.is_success() {
      return Err(StoreError::Status {
        url: url.to_string(),
        status: status.as_u16(),
        body: response.text().await.unwrap_or_default(),
      });
    }
    Ok(response)
  }

  async fn json<T: for<'de> Deserialize<'de>>(url: &str, response: reqwest::Response) -> Result<T, StoreError> {
    let response = Self::check(url, response).await?;
    response.json().await.map_err(|e| StoreError::Http {
      url: url.to_string(),
      message: e.to_string(),
    })
  }

  /// Create the release for `tag`, or fetch it if it already exists.
  async fn ensure_release(&self, tag: &str) -> Result<GithubRelease, StoreError> {
    let url = format!("{}/repos/{}/releases", self.api_url, self.repository);
    let body = serde_json::json!({ "tag_name": tag, "name": tag });
    let response = self
      .send(&url, self.request(reqwest::Method::POST, &url).json(&body))
      .await?;

    if response.status() == reqwest::StatusCode::UNPROCESSABLE_ENTITY {
      debug!(tag = %tag, "release exists, fetching it");
      let url = format!("{}/repos/{}/releases/tags/{}", self.api_url, self.repository, tag);
      let response = self.send(&url, self.request(reqwest::Method::GET, &url)).await?;
      return Self::json(&url, response).await;
    }
    Self::json(&url, response).await
  }

  async fn delete_asset(&self, asset: &GithubReleaseAsset) -> Result<(), StoreError> {
    let url = format!("{}/repos/{}/releases/assets/{}", self.api_url, self.repository, asset.id);
    let response = self.send(&url, self.request(reqwest::Method::DELETE, &url)).await?;
    Self::check(&url, response).await?;
    info!(asset = %asset.name, "replacing existing release asset");
    Ok(())
  }
}

impl ReleaseStore for GithubStore {
  fn describe(&self) -> String {
    format!("github {}", self.repository)
  }

  async fn publish(&self, version: &str, files: &[PathBuf]) -> Result<Vec<String>, StoreError> {
    let release = self.ensure_release(version).await?;
    // upload_url is a URI template: ".../assets{?name,label}"
    let upload_base = release
      .upload_url
      .split('{')
      .next()
      .unwrap_or(&release.upload_url)
      .to_string();

    let mut locations = Vec::with_capacity(files.len());
    for file in files {
      let name = file_name(file);
      // Re-runs replace assets uploaded by an earlier attempt
      if let Some(existing) = release.assets.iter().find(|a| a.name == name) {
        self.delete_asset(existing).await?;
      }
      let data = tokio::fs::read(file).await?;
      let content_type = if name.ends_with(".tar.gz") {
        "application/gzip"
      } else {
        "text/plain"
      };

      let request = self
        .request(reqwest::Method::POST, &upload_base)
        .query(&[("name", name.as_str())])
        .header(reqwest::header::CONTENT_TYPE, content_type)
        .body(data);
      let response = self.send(&upload_base, request).await?;
      let asset: GithubAsset = Self::json(&upload_base, response).await?;
      info!(asset = %name, url = %asset.browser_download_url, "uploaded release asset");
      locations.push(asset.browser_download_url);
    }
    Ok(locations)
  }
}

/// The store selected by configuration.
#[derive(Debug, Clone)]
pub enum ConfiguredStore {
  Directory(DirectoryStore),
  Github(GithubStore),
}

impl ConfiguredStore {
  /// `resolve` turns configured relative paths into absolute ones.
  pub fn from_config(config: &ReleaseStoreConfig, resolve: impl Fn(&Path) -> PathBuf) -> Result<Self, StoreError> {
    Ok(match config {
      ReleaseStoreConfig::Directory { path } => Self::Directory(DirectoryStore::new(resolve(path))),
      ReleaseStoreConfig::Github { repository, api_url } => Self::Github(GithubStore::from_env(api_url, repository)?),
    })
  }
}

impl ReleaseStore for ConfiguredStore {
  fn describe(&self) -> String {
    match self {
      Self::Directory(store) => store.describe(),
      Self::Github(store) => store.describe(),
    }
  }

  async fn publish(&self, version: &str, files: &[PathBuf]) -> Result<Vec<String>, StoreError> {
    match self {
      Self::Directory(store) => store.publish(version, files).await,
      Self::Github(store) => store.publish(version, files).await,
    }
  }
}
