//! GitHub REST v3 implementation of [`RepoHost`].

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue};
use reqwest::{Method, RequestBuilder, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::{
    DirEntry, DirectoryListing, HostError, NewPullRequest, PullRequest, PutFile, RemoteFile,
    RepoHost, RepositoryCoordinates, Result,
};
use crate::build_info;

/// Public GitHub API root.
pub const DEFAULT_API_URL: &str = "https://api.github.com";
const API_VERSION: &str = "2022-11-28";
const SEARCH_PAGE_SIZE: &str = "30";

/// Client bound to a single repository.
#[derive(Debug, Clone)]
pub struct GithubClient {
    http: reqwest::Client,
    api_url: Url,
    coordinates: RepositoryCoordinates,
}

#[derive(Debug, Deserialize)]
struct RepoMetadata {
    default_branch: String,
}

#[derive(Debug, Deserialize)]
struct GitRef {
    object: GitObject,
}

#[derive(Debug, Deserialize)]
struct GitObject {
    sha: String,
}

#[derive(Debug, Serialize)]
struct CreateRef<'a> {
    #[serde(rename = "ref")]
    git_ref: String,
    sha: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ContentsResponse {
    Listing(Vec<ListingEntry>),
    Item(ContentItem),
}

#[derive(Debug, Deserialize)]
struct ListingEntry {
    name: String,
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Debug, Deserialize)]
struct ContentItem {
    #[serde(rename = "type")]
    kind: String,
    sha: String,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    encoding: Option<String>,
}

#[derive(Debug, Serialize)]
struct PutContents<'a> {
    message: &'a str,
    content: String,
    branch: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    sha: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct PutResponse {
    commit: GitObject,
}

#[derive(Debug, Serialize)]
struct CreatePull<'a> {
    title: &'a str,
    body: &'a str,
    head: &'a str,
    base: &'a str,
}

#[derive(Debug, Deserialize)]
struct PullResponse {
    html_url: String,
    number: u64,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<SearchItem>,
}

#[derive(Debug, Deserialize)]
struct SearchItem {
    path: String,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

impl GithubClient {
    /// Create a client for `coordinates` against `api_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL or token cannot be used.
    pub fn new(api_url: &str, coordinates: RepositoryCoordinates) -> Result<Self> {
        let api_url = Url::parse(api_url.trim_end_matches('/'))
            .map_err(|e| HostError::InvalidUrl(format!("{api_url}: {e}")))?;
        if api_url.cannot_be_a_base() {
            return Err(HostError::InvalidUrl(api_url.to_string()));
        }

        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/vnd.github+json"),
        );
        headers.insert(
            "x-github-api-version",
            HeaderValue::from_static(API_VERSION),
        );
        let mut auth = HeaderValue::from_str(&format!("Bearer {}", coordinates.token))
            .map_err(|_| HostError::InvalidUrl("token contains invalid characters".into()))?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .user_agent(build_info::user_agent())
            .build()?;

        Ok(Self {
            http,
            api_url,
            coordinates,
        })
    }

    #[must_use]
    pub const fn coordinates(&self) -> &RepositoryCoordinates {
        &self.coordinates
    }

    /// `{api}/repos/{owner}/{repo}/{segments...}`; each `/`-separated piece
    /// of a segment becomes its own escaped path segment.
    fn repo_url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.api_url.clone();
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|()| HostError::InvalidUrl(self.api_url.to_string()))?;
            path.pop_if_empty()
                .push("repos")
                .push(&self.coordinates.owner)
                .push(&self.coordinates.repo);
            for segment in segments {
                path.extend(segment.split('/').filter(|s| !s.is_empty()));
            }
        }
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        self.http.request(method, url)
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let response = check(request.send().await?).await?;
        response
            .json()
            .await
            .map_err(|e| HostError::Decode(e.to_string()))
    }

    async fn contents(&self, path: &str, git_ref: Option<&str>) -> Result<ContentsResponse> {
        let mut url = self.repo_url(&["contents", path])?;
        if let Some(git_ref) = git_ref {
            url.query_pairs_mut().append_pair("ref", git_ref);
        }
        self.send(self.request(Method::GET, url)).await
    }
}

/// Map non-success statuses onto [`HostError`].
async fn check(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let text = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&text)
        .map(|b| b.message)
        .unwrap_or(text);

    Err(match status {
        StatusCode::NOT_FOUND => HostError::NotFound(message),
        StatusCode::CONFLICT | StatusCode::UNPROCESSABLE_ENTITY => HostError::Conflict(message),
        _ => HostError::Api {
            status: status.as_u16(),
            message,
        },
    })
}

fn decode_content(item: ContentItem) -> Result<RemoteFile> {
    let raw = item.content.unwrap_or_default();
    let content = match item.encoding.as_deref() {
        Some("base64") | None => {
            let compact: String = raw.split_whitespace().collect();
            let bytes = STANDARD
                .decode(compact)
                .map_err(|e| HostError::Decode(format!("invalid base64 content: {e}")))?;
            String::from_utf8(bytes)
                .map_err(|_| HostError::Decode("file is not valid UTF-8".to_string()))?
        }
        Some(other) => {
            return Err(HostError::Decode(format!("unsupported encoding '{other}'")));
        }
    };

    Ok(RemoteFile {
        content,
        sha: item.sha,
    })
}

#[async_trait]
impl RepoHost for GithubClient {
    async fn default_branch(&self) -> Result<String> {
        let url = self.repo_url(&[])?;
        let meta: RepoMetadata = self.send(self.request(Method::GET, url)).await?;
        Ok(meta.default_branch)
    }

    async fn branch_head(&self, branch: &str) -> Result<String> {
        let url = self.repo_url(&["git/ref/heads", branch])?;
        let git_ref: GitRef = self.send(self.request(Method::GET, url)).await?;
        Ok(git_ref.object.sha)
    }

    async fn create_branch(&self, branch: &str, sha: &str) -> Result<()> {
        tracing::info!(repo = %self.coordinates.full_name(), branch, sha, "creating branch");
        let url = self.repo_url(&["git/refs"])?;
        let body = CreateRef {
            git_ref: format!("refs/heads/{branch}"),
            sha,
        };
        let _: serde_json::Value = self
            .send(self.request(Method::POST, url).json(&body))
            .await?;
        Ok(())
    }

    async fn get_file(&self, path: &str, git_ref: Option<&str>) -> Result<Option<RemoteFile>> {
        tracing::debug!(repo = %self.coordinates.full_name(), path, git_ref, "fetching file");
        match self.contents(path, git_ref).await {
            Ok(ContentsResponse::Item(item)) if item.kind == "file" => decode_content(item).map(Some),
            Ok(ContentsResponse::Item(item)) => Err(HostError::Decode(format!(
                "{path} is a {}, not a file",
                item.kind
            ))),
            Ok(ContentsResponse::Listing(_)) => {
                Err(HostError::Decode(format!("{path} is a directory")))
            }
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn file_sha(&self, path: &str, git_ref: &str) -> Result<Option<String>> {
        tracing::debug!(repo = %self.coordinates.full_name(), path, git_ref, "looking up blob sha");
        match self.contents(path, Some(git_ref)).await {
            Ok(ContentsResponse::Item(item)) if item.kind == "file" => Ok(Some(item.sha)),
            Ok(ContentsResponse::Item(item)) => Err(HostError::Decode(format!(
                "{path} is a {}, not a file",
                item.kind
            ))),
            Ok(ContentsResponse::Listing(_)) => {
                Err(HostError::Decode(format!("{path} is a directory")))
            }
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn list_directory(&self, path: &str) -> Result<DirectoryListing> {
        tracing::debug!(repo = %self.coordinates.full_name(), path, "listing directory");
        match self.contents(path, None).await? {
            ContentsResponse::Listing(entries) => Ok(DirectoryListing::Entries(
                entries
                    .into_iter()
                    .map(|e| {
                        if e.kind == "dir" {
                            DirEntry::dir(e.name)
                        } else {
                            DirEntry::file(e.name)
                        }
                    })
                    .collect(),
            )),
            ContentsResponse::Item(_) => Ok(DirectoryListing::File),
        }
    }

    async fn search_code(&self, query: &str, extension: Option<&str>) -> Result<Vec<String>> {
        let mut q = format!("{query} repo:{}", self.coordinates.full_name());
        if let Some(ext) = extension.map(|e| e.trim_start_matches('.')).filter(|e| !e.is_empty()) {
            q.push_str(" extension:");
            q.push_str(ext);
        }
        tracing::debug!(q = %q, "searching code");

        let mut url = self.api_url.clone();
        url.path_segments_mut()
            .map_err(|()| HostError::InvalidUrl(self.api_url.to_string()))?
            .pop_if_empty()
            .extend(["search", "code"]);
        url.query_pairs_mut()
            .append_pair("q", &q)
            .append_pair("per_page", SEARCH_PAGE_SIZE);

        let response: SearchResponse = self.send(self.request(Method::GET, url)).await?;
        Ok(response.items.into_iter().map(|i| i.path).collect())
    }

    async fn put_file(&self, file: PutFile<'_>) -> Result<String> {
        tracing::info!(
            repo = %self.coordinates.full_name(),
            path = file.path,
            branch = file.branch,
            update = file.sha.is_some(),
            "committing file"
        );
        let url = self.repo_url(&["contents", file.path])?;
        let body = PutContents {
            message: file.message,
            content: STANDARD.encode(file.content),
            branch: file.branch,
            sha: file.sha,
        };
        let response: PutResponse = self.send(self.request(Method::PUT, url).json(&body)).await?;
        Ok(response.commit.sha)
    }

    async fn create_pull_request(&self, pr: NewPullRequest<'_>) -> Result<PullRequest> {
        tracing::info!(repo = %self.coordinates.full_name(), head = pr.head, base = pr.base, "opening pull request");
        let url = self.repo_url(&["pulls"])?;
        let body = CreatePull {
            title: pr.title,
            body: pr.body,
            head: pr.head,
            base: pr.base,
        };
        let response: PullResponse = self.send(self.request(Method::POST, url).json(&body)).await?;
        Ok(PullRequest {
            url: response.html_url,
            number: response.number,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::extract::{Path, Query, State};
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use parking_lot::Mutex;

    use super::*;
    use crate::core::agent::{LandingResult, StagedWrite};
    use crate::core::repo::landing;

    #[derive(Default)]
    struct Recorded {
        puts: Vec<serde_json::Value>,
        queries: Vec<String>,
        auth: Vec<String>,
    }

    type Shared = Arc<Mutex<Recorded>>;

    async fn repo(State(state): State<Shared>, headers: HeaderMap) -> Json<serde_json::Value> {
        if let Some(auth) = headers.get("authorization").and_then(|v| v.to_str().ok()) {
            state.lock().auth.push(auth.to_string());
        }
        Json(serde_json::json!({"default_branch": "main", "full_name": "o/r"}))
    }

    async fn contents(Path(path): Path<String>) -> (StatusCode, Json<serde_json::Value>) {
        match path.as_str() {
            "src" => (
                StatusCode::OK,
                Json(serde_json::json!([
                    {"name": "main.rs", "type": "file"},
                    {"name": "core", "type": "dir"}
                ])),
            ),
            "src/main.rs" => (
                StatusCode::OK,
                Json(serde_json::json!({
                    "type": "file",
                    "sha": "blob1",
                    "encoding": "base64",
                    "content": "Zm4gbWFp\nbigpIHt9\n"
                })),
            ),
            // Latin-1 bytes
            "legacy.txt" => (
                StatusCode::OK,
                Json(serde_json::json!({
                    "type": "file",
                    "sha": "blob-legacy",
                    "encoding": "base64",
                    "content": "6Qo="
                })),
            ),
            // Files over 1 MB come back without content
            "package-lock.json" => (
                StatusCode::OK,
                Json(serde_json::json!({
                    "type": "file",
                    "sha": "blob-lock",
                    "encoding": "none",
                    "content": ""
                })),
            ),
            _ => (
                StatusCode::NOT_FOUND,
                Json(serde_json::json!({"message": "Not Found"})),
            ),
        }
    }

    async fn put_contents(
        State(state): State<Shared>,
        Json(body): Json<serde_json::Value>,
    ) -> Json<serde_json::Value> {
        state.lock().puts.push(body);
        Json(serde_json::json!({"commit": {"sha": "commit1"}}))
    }

    async fn create_ref() -> (StatusCode, Json<serde_json::Value>) {
        (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(serde_json::json!({"message": "Reference already exists"})),
        )
    }

    async fn search(
        State(state): State<Shared>,
        Query(params): Query<std::collections::HashMap<String, String>>,
    ) -> Json<serde_json::Value> {
        state
            .lock()
            .queries
            .push(params.get("q").cloned().unwrap_or_default());
        Json(serde_json::json!({"items": [{"path": "server/index.ts"}]}))
    }

    async fn serve() -> (GithubClient, Shared) {
        let state = Shared::default();
        let app = Router::new()
            .route("/repos/o/r", get(repo))
            .route("/repos/o/r/contents/{*path}", get(contents).put(put_contents))
            .route("/repos/o/r/git/refs", post(create_ref))
            .route("/search/code", get(search))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        let client = GithubClient::new(
            &format!("http://{addr}/"),
            RepositoryCoordinates::new("o", "r", "ghp_test"),
        )
        .unwrap();
        (client, state)
    }

    #[tokio::test]
    async fn reads_default_branch_with_bearer_token() {
        let (client, state) = serve().await;
        assert_eq!(client.default_branch().await.unwrap(), "main");
        assert_eq!(state.lock().auth, ["Bearer ghp_test"]);
    }

    #[tokio::test]
    async fn decodes_file_content_and_maps_missing_files() {
        let (client, _) = serve().await;
        let file = client.get_file("src/main.rs", Some("main")).await.unwrap();
        assert_eq!(
            file,
            Some(RemoteFile {
                content: "fn main() {}".to_string(),
                sha: "blob1".to_string()
            })
        );
        assert_eq!(client.get_file("missing.rs", None).await.unwrap(), None);
    }

    #[tokio::test]
    async fn lists_directories_and_detects_files() {
        let (client, _) = serve().await;
        let listing = client.list_directory("src").await.unwrap();
        assert_eq!(
            listing,
            DirectoryListing::Entries(vec![DirEntry::file("main.rs"), DirEntry::dir("core")])
        );
        assert_eq!(
            client.list_directory("src/main.rs").await.unwrap(),
            DirectoryListing::File
        );
        assert!(client.list_directory("nope").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn put_file_sends_base64_and_sha_only_for_updates() {
        let (client, state) = serve().await;
        let sha = client
            .put_file(PutFile {
                path: "src/new.rs",
                content: "hi",
                message: "add new",
                branch: "feature/x",
                sha: None,
            })
            .await
            .unwrap();
        assert_eq!(sha, "commit1");

        let recorded = state.lock();
        let puts = &recorded.puts;
        assert_eq!(puts[0]["content"], "aGk=");
        assert_eq!(puts[0]["branch"], "feature/x");
        assert!(puts[0].get("sha").is_none());
    }

    #[tokio::test]
    async fn undecodable_files_still_resolve_their_sha() {
        let (client, _) = serve().await;

        assert!(matches!(
            client.get_file("legacy.txt", None).await,
            Err(HostError::Decode(_))
        ));
        assert!(matches!(
            client.get_file("package-lock.json", None).await,
            Err(HostError::Decode(_))
        ));

        assert_eq!(
            client.file_sha("legacy.txt", "main").await.unwrap().as_deref(),
            Some("blob-legacy")
        );
        assert_eq!(
            client.file_sha("package-lock.json", "main").await.unwrap().as_deref(),
            Some("blob-lock")
        );
        assert_eq!(client.file_sha("missing.rs", "main").await.unwrap(), None);
        assert!(matches!(
            client.file_sha("src", "main").await,
            Err(HostError::Decode(_))
        ));
    }

    #[tokio::test]
    async fn direct_push_overwrites_binary_and_oversized_files() {
        let (client, state) = serve().await;
        let writes = [
            StagedWrite {
                path: "legacy.txt".to_string(),
                content: "é\n".to_string(),
                description: "re-encode".to_string(),
            },
            StagedWrite {
                path: "package-lock.json".to_string(),
                content: "{}".to_string(),
                description: "regenerate".to_string(),
            },
        ];

        let result = landing::push_direct(&client, &writes, "msg").await.unwrap();

        assert_eq!(
            result,
            LandingResult::DirectPush {
                commit_sha: "commit1".to_string(),
                files: 2
            }
        );
        let recorded = state.lock();
        assert_eq!(recorded.puts.len(), 2);
        assert_eq!(recorded.puts[0]["sha"], "blob-legacy");
        assert_eq!(recorded.puts[0]["branch"], "main");
        assert_eq!(recorded.puts[1]["sha"], "blob-lock");
    }

    #[tokio::test]
    async fn existing_branch_is_a_conflict() {
        let (client, _) = serve().await;
        let err = client.create_branch("feature/x", "abc").await.unwrap_err();
        assert!(matches!(err, HostError::Conflict(m) if m == "Reference already exists"));
    }

    #[tokio::test]
    async fn search_is_scoped_to_the_repository() {
        let (client, state) = serve().await;
        let paths = client.search_code("health", Some(".ts")).await.unwrap();
        assert_eq!(paths, ["server/index.ts"]);
        assert_eq!(state.lock().queries, ["health repo:o/r extension:ts"]);
    }
}
