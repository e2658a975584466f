use std::collections::BTreeSet;
use std::env;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::thread::sleep;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use reqwest::StatusCode;
use reqwest::header::HeaderMap;
use reqwest::blocking::{Client, Response};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::checkpoint::unix_now;
use crate::config::SeedConfig;
use crate::record::{CanonicalRecord, parse_document, records_from_document};

const REPO_PAGE_SIZE: usize = 100;
const MAX_RATE_LIMIT_WAIT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Serialize)]
pub struct SkippedFile {
    pub path: String,
    pub reason: String,
}

/// Parsed documents from one data source (a directory or one admin repo).
#[derive(Debug, Clone, Default)]
pub struct SourceBatch {
    pub label: String,
    pub documents: Vec<Value>,
    pub skipped: Vec<SkippedFile>,
}

impl SourceBatch {
    pub fn records(&self, allowed_placetypes: Option<&BTreeSet<String>>) -> Vec<CanonicalRecord> {
        self.documents
            .iter()
            .flat_map(|document| records_from_document(document, allowed_placetypes))
            .collect()
    }
}

#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    /// Cap on files read per source; `None` reads everything.
    pub limit: Option<usize>,
}

/// Checkpoint and report label for a directory source: its path relative to
/// the project root, or the whole path when it lives elsewhere.
pub fn directory_label(root: &Path, project_root: &Path) -> String {
    let root = root
        .components()
        .filter(|component| !matches!(component, Component::CurDir))
        .collect::<PathBuf>();
    match root.strip_prefix(project_root) {
        Ok(relative) if !relative.as_os_str().is_empty() => {
            relative.to_string_lossy().replace('\\', "/")
        }
        _ => root.to_string_lossy().replace('\\', "/"),
    }
}

/// Whether a repository-relative path is a WOF record worth reading.
/// Alternate geometries repeat their principal record's id and are skipped.
pub fn is_record_path(relative: &str) -> bool {
    let normalized = relative.replace('\\', "/");
    let Some(file_name) = normalized.rsplit('/').next() else {
        return false;
    };
    let has_record_extension = file_name.ends_with(".geojson") || file_name.ends_with(".json");
    has_record_extension && !file_name.contains("-alt-")
}

pub fn scan_directory(root: &Path, options: &FetchOptions) -> Result<SourceBatch> {
    if !root.is_dir() {
        bail!("source directory does not exist: {}", root.display());
    }

    let mut relative_paths = Vec::new();
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry.with_context(|| format!("failed to walk {}", root.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(root)
            .with_context(|| format!("path escapes source root: {}", entry.path().display()))?
            .to_string_lossy()
            .replace('\\', "/");
        if is_record_path(&relative) {
            relative_paths.push(relative);
        }
    }
    relative_paths.sort();
    if let Some(limit) = options.limit {
        relative_paths.truncate(limit);
    }

    let mut batch = SourceBatch {
        label: root
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| root.to_string_lossy().to_string()),
        ..SourceBatch::default()
    };
    for relative in relative_paths {
        let path = root.join(&relative);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(error) => {
                debug!(path = %relative, %error, "skipping unreadable file");
                batch.skipped.push(SkippedFile {
                    path: relative,
                    reason: format!("read failed: {error}"),
                });
                continue;
            }
        };
        match parse_document(&content) {
            Some(document) => batch.documents.push(document),
            None => batch.skipped.push(SkippedFile {
                path: relative,
                reason: "malformed JSON".to_string(),
            }),
        }
    }

    info!(
        source = %batch.label,
        documents = batch.documents.len(),
        skipped = batch.skipped.len(),
        "scanned source directory"
    );
    Ok(batch)
}

pub trait RepoReadApi {
    fn list_repos(&mut self, org: &str) -> Result<Vec<String>>;
    fn list_files(&mut self, org: &str, repo: &str, branch: &str) -> Result<Vec<String>>;
    fn fetch_raw(&mut self, org: &str, repo: &str, branch: &str, path: &str) -> Result<String>;
    fn request_count(&self) -> usize;
}

#[derive(Debug, Clone)]
pub struct RepoTarget {
    pub org: String,
    pub repo: String,
    pub branch: String,
}

/// Repositories of `org` whose names start with `prefix`, sorted.
pub fn list_admin_repos(
    api: &mut dyn RepoReadApi,
    org: &str,
    prefix: &str,
) -> Result<Vec<String>> {
    let mut repos = api
        .list_repos(org)?
        .into_iter()
        .filter(|name| name.starts_with(prefix))
        .collect::<Vec<_>>();
    repos.sort();
    repos.dedup();
    Ok(repos)
}

pub fn fetch_repo_batch(
    api: &mut dyn RepoReadApi,
    target: &RepoTarget,
    options: &FetchOptions,
) -> Result<SourceBatch> {
    let mut paths = api
        .list_files(&target.org, &target.repo, &target.branch)?
        .into_iter()
        .filter(|path| path.starts_with("data/") && is_record_path(path))
        .collect::<Vec<_>>();
    paths.sort();
    if let Some(limit) = options.limit {
        paths.truncate(limit);
    }

    let mut batch = SourceBatch {
        label: target.repo.clone(),
        ..SourceBatch::default()
    };
    for path in paths {
        match api.fetch_raw(&target.org, &target.repo, &target.branch, &path) {
            Ok(content) => match parse_document(&content) {
                Some(document) => batch.documents.push(document),
                None => batch.skipped.push(SkippedFile {
                    path,
                    reason: "malformed JSON".to_string(),
                }),
            },
            Err(error) => {
                warn!(repo = %target.repo, %path, "fetch failed: {error:#}");
                batch.skipped.push(SkippedFile {
                    path,
                    reason: format!("fetch failed: {error:#}"),
                });
            }
        }
    }

    info!(
        source = %batch.label,
        documents = batch.documents.len(),
        skipped = batch.skipped.len(),
        requests = api.request_count(),
        "fetched admin repository"
    );
    Ok(batch)
}

#[derive(Debug, Clone)]
pub struct GithubClientConfig {
    pub api_url: String,
    pub raw_url: String,
    pub user_agent: String,
    pub token: Option<String>,
    pub timeout_ms: u64,
    pub rate_limit_ms: u64,
    pub max_retries: usize,
    pub retry_delay_ms: u64,
}

impl GithubClientConfig {
    pub fn from_config(config: &SeedConfig) -> Self {
        Self {
            api_url: config.github_api_url().trim_end_matches('/').to_string(),
            raw_url: config.github_raw_url().trim_end_matches('/').to_string(),
            user_agent: config.user_agent(),
            token: env::var("WOFSEED_GITHUB_TOKEN")
                .ok()
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty()),
            timeout_ms: env_value_u64("WOFSEED_HTTP_TIMEOUT_MS", 30_000),
            rate_limit_ms: env_value_u64("WOFSEED_RATE_LIMIT_MS", 100),
            max_retries: env_value_usize("WOFSEED_HTTP_RETRIES", 2),
            retry_delay_ms: env_value_u64("WOFSEED_HTTP_RETRY_DELAY_MS", 500),
        }
    }
}

pub struct GithubClient {
    client: Client,
    config: GithubClientConfig,
    last_request_at: Option<Instant>,
    request_count: usize,
}

impl GithubClient {
    pub fn new(config: GithubClientConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .context("failed to build GitHub HTTP client")?;
        Ok(Self {
            client,
            config,
            last_request_at: None,
            request_count: 0,
        })
    }

    fn get(&mut self, url: &str, query: &[(&str, String)], is_api: bool) -> Result<Response> {
        for attempt in 0..=self.config.max_retries {
            self.apply_rate_limit();
            let mut request = self
                .client
                .get(url)
                .header("User-Agent", self.config.user_agent.clone())
                .query(query);
            if is_api {
                request = request
                    .header("Accept", "application/vnd.github+json")
                    .header("X-GitHub-Api-Version", "2022-11-28");
            }
            if let Some(token) = &self.config.token {
                request = request.header("Authorization", format!("Bearer {token}"));
            }
            self.request_count += 1;

            match request.send() {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(response);
                    }
                    if is_rate_limited(status, response.headers()) {
                        match rate_limit_wait(response.headers(), unix_now()) {
                            Some(wait)
                                if attempt < self.config.max_retries
                                    && wait <= MAX_RATE_LIMIT_WAIT =>
                            {
                                warn!(
                                    %url,
                                    wait_secs = wait.as_secs(),
                                    "GitHub rate limit exhausted, waiting for reset"
                                );
                                sleep(wait);
                                continue;
                            }
                            _ => bail!(rate_limit_message(
                                url,
                                status,
                                self.config.token.is_some()
                            )),
                        }
                    }
                    if attempt < self.config.max_retries && is_retryable_status(status) {
                        warn!(%url, %status, attempt, "retrying GitHub request");
                        self.wait_before_retry(attempt);
                        continue;
                    }
                    bail!("GitHub request to {url} failed with HTTP {status}");
                }
                Err(error) => {
                    if attempt < self.config.max_retries && is_retryable_error(&error) {
                        warn!(%url, %error, attempt, "retrying GitHub request");
                        self.wait_before_retry(attempt);
                        continue;
                    }
                    return Err(error).with_context(|| format!("failed to call {url}"));
                }
            }
        }

        bail!("GitHub request to {url} exhausted retry budget")
    }

    fn get_json(&mut self, url: &str, query: &[(&str, String)]) -> Result<Value> {
        self.get(url, query, true)?
            .json()
            .with_context(|| format!("failed to decode JSON from {url}"))
    }

    fn apply_rate_limit(&mut self) {
        let delay = Duration::from_millis(self.config.rate_limit_ms);
        if let Some(last) = self.last_request_at {
            let elapsed = last.elapsed();
            if elapsed < delay {
                sleep(delay - elapsed);
            }
        }
        self.last_request_at = Some(Instant::now());
    }

    fn wait_before_retry(&self, attempt: usize) {
        sleep(Duration::from_millis(
            self.config
                .retry_delay_ms
                .saturating_mul(attempt as u64 + 1),
        ));
    }
}

impl RepoReadApi for GithubClient {
    fn list_repos(&mut self, org: &str) -> Result<Vec<String>> {
        let url = format!("{}/orgs/{org}/repos", self.config.api_url);
        let mut names = Vec::new();
        for page in 1.. {
            let payload = self.get_json(
                &url,
                &[
                    ("per_page", REPO_PAGE_SIZE.to_string()),
                    ("page", page.to_string()),
                    ("type", "public".to_string()),
                ],
            )?;
            let page_names = parse_repo_names(&payload)?;
            let count = page_names.len();
            names.extend(page_names);
            if count < REPO_PAGE_SIZE {
                break;
            }
        }
        Ok(names)
    }

    fn list_files(&mut self, org: &str, repo: &str, branch: &str) -> Result<Vec<String>> {
        let url = format!(
            "{}/repos/{org}/{repo}/git/trees/{branch}",
            self.config.api_url
        );
        let payload = self.get_json(&url, &[("recursive", "1".to_string())])?;
        if payload.get("truncated").and_then(Value::as_bool) == Some(true) {
            warn!(%repo, "git tree listing was truncated by GitHub; some records will be missing");
        }
        parse_tree_paths(&payload)
    }

    fn fetch_raw(&mut self, org: &str, repo: &str, branch: &str, path: &str) -> Result<String> {
        let url = format!("{}/{org}/{repo}/{branch}/{path}", self.config.raw_url);
        self.get(&url, &[], false)?
            .text()
            .with_context(|| format!("failed to read body of {url}"))
    }

    fn request_count(&self) -> usize {
        self.request_count
    }
}

fn parse_repo_names(payload: &Value) -> Result<Vec<String>> {
    let repos = payload
        .as_array()
        .ok_or_else(|| anyhow::anyhow!("invalid GitHub repository listing shape"))?;
    Ok(repos
        .iter()
        .filter_map(|repo| repo.get("name").and_then(Value::as_str))
        .map(ToString::to_string)
        .collect())
}

fn parse_tree_paths(payload: &Value) -> Result<Vec<String>> {
    let tree = payload
        .get("tree")
        .and_then(Value::as_array)
        .ok_or_else(|| anyhow::anyhow!("invalid GitHub tree response shape"))?;
    Ok(tree
        .iter()
        .filter(|entry| entry.get("type").and_then(Value::as_str) == Some("blob"))
        .filter_map(|entry| entry.get("path").and_then(Value::as_str))
        .map(ToString::to_string)
        .collect())
}

fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

/// GitHub reports a spent quota as 403 (or 429) with
/// `x-ratelimit-remaining: 0` rather than a plain 429.
fn is_rate_limited(status: StatusCode, headers: &HeaderMap) -> bool {
    (status == StatusCode::FORBIDDEN || status == StatusCode::TOO_MANY_REQUESTS)
        && header_number(headers, "x-ratelimit-remaining") == Some(0)
}

fn rate_limit_wait(headers: &HeaderMap, now_unix: u64) -> Option<Duration> {
    let reset = header_number(headers, "x-ratelimit-reset")?;
    Some(Duration::from_secs(reset.saturating_sub(now_unix)))
}

fn rate_limit_message(url: &str, status: StatusCode, has_token: bool) -> String {
    let mut message = format!("GitHub rate limit exhausted calling {url} (HTTP {status})");
    if !has_token {
        message.push_str("; set WOFSEED_GITHUB_TOKEN to raise the limit");
    }
    message
}

fn header_number(headers: &HeaderMap, name: &str) -> Option<u64> {
    headers.get(name)?.to_str().ok()?.trim().parse().ok()
}

fn is_retryable_error(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect() || error.is_request()
}

fn env_value_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

fn env_value_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<usize>().ok())
        .unwrap_or(default)
}
