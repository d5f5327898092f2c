use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use reqwest::header::{HeaderMap, ACCEPT, LINK};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use url::Url;

use crate::error::{Error, Result};
use crate::source::retry::{send_with_retry, RetryPolicy};
use crate::source::{
    Commit, CommitFilter, EntryKind, Issue, IssueState, Listing, Order, PullFilter, PullRequest,
    Repository, Source, SourceFactory, StateFilter, TreeEntry,
};

pub const DEFAULT_API_URL: &str = "https://api.github.com";

const PER_PAGE: u32 = 100;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const USER_AGENT: &str = concat!("devpulse/", env!("CARGO_PKG_VERSION"));

type Query = Vec<(String, String)>;

/// GitHub REST client. Unauthenticated when no token is given.
#[derive(Clone)]
pub struct GitHubClient {
    http: reqwest::Client,
    base_url: Url,
    token: Option<String>,
    retry: RetryPolicy,
}

impl GitHubClient {
    pub fn new(base_url: &str, token: Option<&str>) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| Error::Config(format!("invalid API url {base_url}: {e}")))?;
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| Error::Config(e.to_string()))?;
        Ok(Self {
            http,
            base_url,
            token: token.filter(|t| !t.is_empty()).map(str::to_string),
            retry: RetryPolicy::default(),
        })
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| Error::Config(format!("API url cannot be a base: {}", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn repo_endpoint(&self, repo: &Repository, resource: &[&str]) -> Result<Url> {
        let mut segments = vec!["repos", repo.owner.as_str(), repo.name.as_str()];
        segments.extend_from_slice(resource);
        self.endpoint(&segments)
    }

    async fn get(&self, url: &Url, query: &[(String, String)]) -> Result<reqwest::Response> {
        let response = send_with_retry(&self.retry, || {
            let request = self
                .http
                .get(url.clone())
                .query(query)
                .header(ACCEPT, "application/vnd.github+json");
            match &self.token {
                Some(token) => request.bearer_auth(token),
                None => request,
            }
        })
        .await?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(Error::NotFound(url.path().to_string()));
        }
        if !status.is_success() {
            return Err(Error::SourceUnavailable(format!(
                "GET {} returned {status}",
                url.path()
            )));
        }
        Ok(response)
    }

    async fn fetch_page<W: DeserializeOwned>(
        &self,
        url: &Url,
        query: &[(String, String)],
        page: u32,
    ) -> Result<(Vec<W>, bool)> {
        let mut params = query.to_vec();
        params.push(("per_page".into(), PER_PAGE.to_string()));
        params.push(("page".into(), page.to_string()));

        let response = self.get(url, &params).await?;
        let has_next = link_target(response.headers(), "next").is_some();
        let batch = response.json::<Vec<W>>().await?;
        log::debug!("Fetched page {page} of {} ({} items)", url.path(), batch.len());
        Ok((batch, has_next))
    }

    /// Lazily walk every page of `url`, converting each wire item.
    fn paginate<'a, W, T>(
        &'a self,
        url: Result<Url>,
        query: Query,
        convert: fn(W) -> Result<T>,
    ) -> BoxStream<'a, Result<T>>
    where
        W: DeserializeOwned + Send + 'a,
        T: Send + 'a,
    {
        let url = match url {
            Ok(url) => url,
            Err(e) => return stream::once(async move { Err(e) }).boxed(),
        };
        stream::try_unfold(Some(1u32), move |page| {
            let url = url.clone();
            let query = query.clone();
            async move {
                let Some(page) = page else {
                    return Ok::<_, Error>(None);
                };
                let (batch, has_next) = self.fetch_page::<W>(&url, &query, page).await?;
                let items: Vec<Result<T>> = batch.into_iter().map(convert).collect();
                let next = has_next.then_some(page + 1);
                Ok(Some((stream::iter(items), next)))
            }
        })
        .try_flatten()
        .boxed()
    }

    /// Total item count, from the `rel="last"` page number of a one-item page.
    async fn count(&self, url: &Url, query: &[(String, String)]) -> Result<u64> {
        let mut params = query.to_vec();
        params.push(("per_page".into(), "1".into()));

        let response = self.get(url, &params).await?;
        if let Some(last) = last_page(response.headers()) {
            return Ok(last);
        }
        let batch = response.json::<Vec<serde_json::Value>>().await?;
        Ok(batch.len() as u64)
    }
}

#[async_trait]
impl Source for GitHubClient {
    async fn repository(&self, owner: &str, name: &str) -> Result<Repository> {
        let url = self.endpoint(&["repos", owner, name])?;
        let repo: WireRepository = self.get(&url, &[]).await?.json().await?;
        Ok(Repository {
            owner: repo.owner.login,
            name: repo.name,
            default_branch: repo.default_branch,
        })
    }

    fn commits<'a>(&'a self, repo: &'a Repository, filter: CommitFilter) -> Listing<'a, Commit> {
        let mut query = Query::new();
        if let Some(author) = filter.author {
            query.push(("author".into(), author));
        }
        if let Some(path) = filter.path {
            query.push(("path".into(), path));
        }
        if let Some(since) = filter.since {
            query.push(("since".into(), format_timestamp(since)));
        }
        if let Some(until) = filter.until {
            query.push(("until".into(), format_timestamp(until)));
        }
        Listing {
            items: self.paginate(self.repo_endpoint(repo, &["commits"]), query, WireCommit::into_commit),
            order: Order::Unordered,
        }
    }

    fn issues<'a>(&'a self, repo: &'a Repository, state: StateFilter) -> Listing<'a, Issue> {
        Listing {
            items: self.paginate(
                self.repo_endpoint(repo, &["issues"]),
                newest_first(state),
                WireIssue::into_issue,
            ),
            order: Order::NewestFirst,
        }
    }

    async fn issue_count(&self, repo: &Repository, state: StateFilter) -> Result<u64> {
        let url = self.repo_endpoint(repo, &["issues"])?;
        self.count(&url, &newest_first(state)).await
    }

    fn pulls<'a>(&'a self, repo: &'a Repository, filter: PullFilter) -> Listing<'a, PullRequest> {
        Listing {
            items: self.paginate(
                self.repo_endpoint(repo, &["pulls"]),
                pull_query(&filter),
                WirePull::into_pull,
            ),
            order: Order::NewestFirst,
        }
    }

    async fn pull_count(&self, repo: &Repository, filter: &PullFilter) -> Result<u64> {
        let url = self.repo_endpoint(repo, &["pulls"])?;
        self.count(&url, &pull_query(filter)).await
    }

    async fn tree(&self, repo: &Repository, path: &str) -> Result<Vec<TreeEntry>> {
        let mut resource = vec!["contents"];
        resource.extend(path.split('/').filter(|s| !s.is_empty()));
        let url = self.repo_endpoint(repo, &resource)?;
        let entries: Vec<WireEntry> = self.get(&url, &[]).await?.json().await?;
        Ok(entries.into_iter().map(WireEntry::into_entry).collect())
    }
}

/// Builds authenticated or anonymous [`GitHubClient`]s against one API url.
#[derive(Debug, Clone)]
pub struct GitHubFactory {
    pub api_url: String,
    pub retry: RetryPolicy,
    /// Used when a caller supplies no token of its own.
    pub fallback_token: Option<String>,
}

impl GitHubFactory {
    pub fn new(api_url: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into(),
            retry: RetryPolicy::default(),
            fallback_token: None,
        }
    }

    pub fn with_fallback_token(mut self, token: Option<String>) -> Self {
        self.fallback_token = token;
        self
    }
}

impl SourceFactory for GitHubFactory {
    fn connect(&self, token: Option<&str>) -> Result<Arc<dyn Source>> {
        let token = token.or(self.fallback_token.as_deref());
        let client = GitHubClient::new(&self.api_url, token)?.with_retry_policy(self.retry.clone());
        Ok(Arc::new(client))
    }
}

fn newest_first(state: StateFilter) -> Query {
    vec![
        ("state".into(), state.as_str().into()),
        ("sort".into(), "created".into()),
        ("direction".into(), "desc".into()),
    ]
}

fn pull_query(filter: &PullFilter) -> Query {
    let mut query = newest_first(filter.state);
    if let Some(base) = &filter.base {
        query.push(("base".into(), base.clone()));
    }
    query
}

fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Find the target of `rel="<rel>"` in a `Link` header.
fn link_target(headers: &HeaderMap, rel: &str) -> Option<Url> {
    let link = headers.get(LINK)?.to_str().ok()?;
    let wanted = format!("rel=\"{rel}\"");
    link.split(',').find_map(|part| {
        let (target, params) = part.split_once(';')?;
        if !params.split(';').any(|p| p.trim() == wanted) {
            return None;
        }
        let target = target.trim().strip_prefix('<')?.strip_suffix('>')?;
        Url::parse(target).ok()
    })
}

fn last_page(headers: &HeaderMap) -> Option<u64> {
    let last = link_target(headers, "last")?;
    last.query_pairs()
        .find(|(k, _)| k == "page")
        .and_then(|(_, v)| v.parse().ok())
}

// ── Wire types ─────────────────────────────────────────────────────

#[derive(Deserialize)]
struct WireRepository {
    name: String,
    owner: WireUser,
    default_branch: String,
}

#[derive(Deserialize)]
struct WireUser {
    login: String,
}

#[derive(Deserialize)]
struct WireSignature {
    date: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
struct WireCommitDetail {
    author: Option<WireSignature>,
    committer: Option<WireSignature>,
}

#[derive(Deserialize)]
struct WireCommit {
    sha: String,
    commit: WireCommitDetail,
    author: Option<WireUser>,
}

impl WireCommit {
    fn into_commit(self) -> Result<Commit> {
        let date = self
            .commit
            .author
            .and_then(|s| s.date)
            .or_else(|| self.commit.committer.and_then(|s| s.date))
            .ok_or_else(|| {
                Error::SourceUnavailable(format!("commit {} has no timestamp", self.sha))
            })?;
        Ok(Commit {
            sha: self.sha,
            author_login: self.author.map(|u| u.login),
            date,
        })
    }
}

#[derive(Deserialize)]
struct WireIssue {
    number: u64,
    state: String,
    created_at: DateTime<Utc>,
    closed_at: Option<DateTime<Utc>>,
}

impl WireIssue {
    fn into_issue(self) -> Result<Issue> {
        let state = match self.state.as_str() {
            "closed" => IssueState::Closed,
            _ => IssueState::Open,
        };
        Ok(Issue {
            number: self.number,
            state,
            created_at: self.created_at,
            closed_at: self.closed_at,
        })
    }
}

#[derive(Deserialize)]
struct WirePull {
    number: u64,
    created_at: DateTime<Utc>,
    merged_at: Option<DateTime<Utc>>,
}

impl WirePull {
    fn into_pull(self) -> Result<PullRequest> {
        Ok(PullRequest {
            number: self.number,
            created_at: self.created_at,
            merged: self.merged_at.is_some(),
            merged_at: self.merged_at,
        })
    }
}

#[derive(Deserialize)]
struct WireEntry {
    #[serde(rename = "type")]
    kind: String,
    path: String,
    #[serde(default)]
    size: u64,
}

impl WireEntry {
    fn into_entry(self) -> TreeEntry {
        let kind = match self.kind.as_str() {
            "file" => EntryKind::File,
            "dir" => EntryKind::Dir,
            _ => EntryKind::Other,
        };
        TreeEntry {
            kind,
            path: self.path,
            size: self.size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use reqwest::header::HeaderValue;
    use serde_json::json;

    fn client(server: &MockServer) -> GitHubClient {
        GitHubClient::new(&server.base_url(), Some("secret"))
            .unwrap()
            .with_retry_policy(RetryPolicy::none())
    }

    fn demo_repo() -> Repository {
        Repository {
            owner: "octo".into(),
            name: "demo".into(),
            default_branch: "main".into(),
        }
    }

    #[test]
    fn test_link_target_and_last_page() {
        let mut headers = HeaderMap::new();
        headers.insert(
            LINK,
            HeaderValue::from_static(
                "<https://api.github.com/repos/o/r/issues?per_page=1&page=2>; rel=\"next\", \
                 <https://api.github.com/repos/o/r/issues?per_page=1&page=57>; rel=\"last\"",
            ),
        );
        assert!(link_target(&headers, "next").is_some());
        assert!(link_target(&headers, "prev").is_none());
        assert_eq!(last_page(&headers), Some(57));
    }

    #[tokio::test]
    async fn test_repository_resolves_default_branch() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/repos/octo/demo")
                    .header("authorization", "Bearer secret");
                then.status(200).json_body(json!({
                    "name": "demo",
                    "full_name": "octo/demo",
                    "owner": { "login": "octo" },
                    "default_branch": "trunk"
                }));
            })
            .await;

        let repo = client(&server).repository("octo", "demo").await.unwrap();
        mock.assert_async().await;
        assert_eq!(repo.default_branch, "trunk");
        assert_eq!(repo.full_name(), "octo/demo");
    }

    #[tokio::test]
    async fn test_missing_repository_is_not_found() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/repos/octo/ghost");
                then.status(404).json_body(json!({ "message": "Not Found" }));
            })
            .await;

        let err = client(&server).repository("octo", "ghost").await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn test_issues_follow_next_links() {
        let server = MockServer::start_async().await;
        let next = format!("<{}>; rel=\"next\"", server.url("/repos/octo/demo/issues?page=2"));
        server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/repos/octo/demo/issues")
                    .query_param("page", "1")
                    .query_param("sort", "created");
                then.status(200).header("link", next.as_str()).json_body(json!([
                    { "number": 3, "state": "open", "created_at": "2025-01-03T00:00:00Z", "closed_at": null },
                    { "number": 2, "state": "closed", "created_at": "2025-01-02T00:00:00Z", "closed_at": "2025-01-04T00:00:00Z" }
                ]));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/repos/octo/demo/issues")
                    .query_param("page", "2");
                then.status(200).json_body(json!([
                    { "number": 1, "state": "closed", "created_at": "2025-01-01T00:00:00Z", "closed_at": "2025-01-02T00:00:00Z" }
                ]));
            })
            .await;

        let client = client(&server);
        let repo = demo_repo();
        let listing = client.issues(&repo, StateFilter::All);
        assert_eq!(listing.order, Order::NewestFirst);
        let issues: Vec<Issue> = listing.items.try_collect().await.unwrap();
        assert_eq!(issues.len(), 3);
        assert_eq!(issues[1].state, IssueState::Closed);
        assert_eq!(issues[2].number, 1);
    }

    #[tokio::test]
    async fn test_issue_count_uses_last_page() {
        let server = MockServer::start_async().await;
        let last = format!(
            "<{}>; rel=\"last\"",
            server.url("/repos/octo/demo/issues?per_page=1&page=42")
        );
        server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/repos/octo/demo/issues")
                    .query_param("per_page", "1");
                then.status(200).header("link", last.as_str()).json_body(json!([
                    { "number": 42, "state": "open", "created_at": "2025-01-03T00:00:00Z", "closed_at": null }
                ]));
            })
            .await;

        let count = client(&server)
            .issue_count(&demo_repo(), StateFilter::All)
            .await
            .unwrap();
        assert_eq!(count, 42);
    }

    #[tokio::test]
    async fn test_commits_map_missing_author_to_none() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/repos/octo/demo/commits")
                    .query_param("author", "alice")
                    .query_param("since", "2025-01-01T00:00:00Z");
                then.status(200).json_body(json!([
                    { "sha": "a1", "commit": { "author": { "date": "2025-01-02T10:00:00Z" } }, "author": { "login": "alice" } },
                    { "sha": "b2", "commit": { "author": { "date": "2025-01-02T11:00:00Z" } }, "author": null }
                ]));
            })
            .await;

        let client = client(&server);
        let repo = demo_repo();
        let filter = CommitFilter {
            author: Some("alice".into()),
            since: Some(crate::window::parse_timestamp("2025-01-01").unwrap()),
            ..Default::default()
        };
        let commits: Vec<Commit> = client.commits(&repo, filter).items.try_collect().await.unwrap();
        assert_eq!(commits.len(), 2);
        assert_eq!(commits[0].author_login.as_deref(), Some("alice"));
        assert_eq!(commits[1].author_login, None);
    }

    #[tokio::test]
    async fn test_tree_lists_directory_entries() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/repos/octo/demo/contents/src/bin");
                then.status(200).json_body(json!([
                    { "type": "file", "path": "src/bin/main.rs", "size": 120 },
                    { "type": "dir", "path": "src/bin/tools", "size": 0 },
                    { "type": "symlink", "path": "src/bin/link", "size": 9 }
                ]));
            })
            .await;

        let entries = client(&server).tree(&demo_repo(), "src/bin").await.unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].kind, EntryKind::File);
        assert_eq!(entries[0].size, 120);
        assert_eq!(entries[1].kind, EntryKind::Dir);
        assert_eq!(entries[2].kind, EntryKind::Other);
    }

    #[tokio::test]
    async fn test_rate_limit_surfaces_as_source_unavailable() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/repos/octo/demo");
                then.status(429).json_body(json!({ "message": "slow down" }));
            })
            .await;

        let err = client(&server).repository("octo", "demo").await.unwrap_err();
        assert!(matches!(err, Error::SourceUnavailable(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn test_window_commits_keep_late_committed_work() {
        use crate::metrics::compute::{commit_count, window_commit_filter};
        use crate::source::fixture::ts;
        use crate::window::Window;

        let server = MockServer::start_async().await;
        let with_until = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/repos/octo/demo/commits")
                    .query_param_exists("until");
                then.status(200).json_body(json!([]));
            })
            .await;
        let commits = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/repos/octo/demo/commits")
                    .query_param("author", "alice")
                    .query_param("since", "2025-01-06T00:00:00Z");
                then.status(200).json_body(json!([
                    { "sha": "a1", "commit": { "author": { "date": "2025-01-10T09:00:00Z" } }, "author": { "login": "alice" } },
                    { "sha": "b2", "commit": { "author": { "date": "2025-01-14T09:00:00Z" } }, "author": { "login": "alice" } }
                ]));
            })
            .await;

        let client = client(&server);
        let repo = demo_repo();
        let window = Window::new(ts(2025, 1, 6, 0, 0), ts(2025, 1, 13, 0, 0)).unwrap();
        let listing = client.commits(&repo, window_commit_filter("alice", None, &window));
        let count = commit_count(listing, "alice", &window).await.unwrap();

        assert_eq!(count, 1);
        assert_eq!(with_until.hits_async().await, 0);
        commits.assert_async().await;
    }

    #[tokio::test]
    async fn test_rate_limit_is_retried_until_success() {
        let server = MockServer::start_async().await;
        let mut limited = server
            .mock_async(|when, then| {
                when.method(GET).path("/repos/octo/demo");
                then.status(429).json_body(json!({ "message": "slow down" }));
            })
            .await;

        let client = GitHubClient::new(&server.base_url(), None)
            .unwrap()
            .with_retry_policy(RetryPolicy {
                backoff: vec![Duration::from_millis(500)],
            });
        let pending = tokio::spawn(async move { client.repository("octo", "demo").await });

        while limited.hits_async().await == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(limited.hits_async().await, 1);
        limited.delete_async().await;
        let ok = server
            .mock_async(|when, then| {
                when.method(GET).path("/repos/octo/demo");
                then.status(200).json_body(json!({
                    "name": "demo",
                    "owner": { "login": "octo" },
                    "default_branch": "main"
                }));
            })
            .await;

        let repo = pending.await.unwrap().unwrap();
        assert_eq!(repo.default_branch, "main");
        ok.assert_hits_async(1).await;
    }
}
