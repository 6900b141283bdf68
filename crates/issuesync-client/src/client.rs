use std::time::Duration;

use reqwest::header::AUTHORIZATION;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use issuesync_types::config::Instance;
use issuesync_types::rest::*;

use crate::error::{classify, RestError, RetryClass, RETRY_DELAY};

/// Attempts for idempotent operations.
const DEFAULT_ATTEMPTS: u32 = 5;
/// Issue updates risk resubmitting a partially applied payload, so they
/// get a single retry only.
const UPDATE_ATTEMPTS: u32 = 2;

/// REST client for one tracker instance.
///
/// Every operation is wrapped with bounded retry: transient failures
/// (auth races, 5xx) are reattempted after a fixed delay, everything
/// else is surfaced immediately. The base URI is expected to include the
/// API version, e.g. `https://tracker.example.com/rest/api/2`.
pub struct TrackerClient {
    http: reqwest::Client,
    base: String,
    authorization: String,
    retry_delay: Duration,
    log_requests: bool,
}

impl TrackerClient {
    pub fn new(instance: &Instance) -> Result<Self, RestError> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .timeout(Duration::from_secs(300))
            .build()?;
        Ok(Self {
            http,
            base: instance.api_uri.trim_end_matches('/').to_string(),
            authorization: instance
                .login_kind
                .authorization(&instance.api_user.email, &instance.api_user.token),
            retry_delay: RETRY_DELAY,
            log_requests: instance.log_requests,
        })
    }

    /// Overrides the inter-retry delay; meant for tests.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    // --- issues ---

    pub async fn get_issue(&self, key: &str) -> Result<Issue, RestError> {
        let operation = format!("get issue {key}");
        self.retrying(&operation, DEFAULT_ATTEMPTS, || async {
            let response = self.send(&operation, self.get(&format!("issue/{key}"))).await?;
            self.json(&operation, response).await
        })
        .await
    }

    pub async fn get_issue_by_id(&self, id: i64) -> Result<Issue, RestError> {
        self.get_issue(&id.to_string()).await
    }

    pub async fn create_issue(&self, issue: &Issue) -> Result<IssueResponse, RestError> {
        let operation = "create issue".to_string();
        self.retrying(&operation, DEFAULT_ATTEMPTS, || async {
            let response = self.send(&operation, self.post("issue").json(issue)).await?;
            self.json(&operation, response).await
        })
        .await
    }

    pub async fn update_issue(&self, key: &str, issue: &Issue) -> Result<(), RestError> {
        let operation = format!("update issue {key}");
        self.retrying(&operation, UPDATE_ATTEMPTS, || async {
            self.send(&operation, self.put(&format!("issue/{key}")).json(issue)).await?;
            Ok(())
        })
        .await
    }

    /// Creates all issues of the batch in one call; the destination
    /// assigns consecutive keys.
    pub async fn bulk_create(&self, bulk: &IssueBulk) -> Result<IssueBulkResponse, RestError> {
        let operation = "bulk create issues".to_string();
        self.retrying(&operation, DEFAULT_ATTEMPTS, || async {
            let response = self.send(&operation, self.post("issue/bulk").json(bulk)).await?;
            self.json(&operation, response).await
        })
        .await
    }

    pub async fn search(
        &self,
        query: &str,
        start_at: i64,
        max_results: i64,
    ) -> Result<Issues, RestError> {
        let operation = format!("search '{query}'");
        self.retrying(&operation, DEFAULT_ATTEMPTS, || async {
            let request = self
                .get("search")
                .query(&[("jql", query)])
                .query(&[("startAt", start_at), ("maxResults", max_results)]);
            let response = self.send(&operation, request).await?;
            self.json(&operation, response).await
        })
        .await
    }

    pub async fn assign(&self, key: &str, assignee: &Option<User>) -> Result<(), RestError> {
        let operation = format!("assign issue {key}");
        self.retrying(&operation, UPDATE_ATTEMPTS, || async {
            self.send(&operation, self.put(&format!("issue/{key}/assignee")).json(assignee))
                .await?;
            Ok(())
        })
        .await
    }

    // --- comments ---

    pub async fn get_comment(&self, issue_id: i64, comment_id: i64) -> Result<Comment, RestError> {
        let operation = format!("get comment {comment_id} of issue {issue_id}");
        self.retrying(&operation, DEFAULT_ATTEMPTS, || async {
            let response = self
                .send(&operation, self.get(&format!("issue/{issue_id}/comment/{comment_id}")))
                .await?;
            self.json(&operation, response).await
        })
        .await
    }

    pub async fn get_comments(
        &self,
        issue_key: &str,
        start_at: i64,
        max_results: i64,
    ) -> Result<Comments, RestError> {
        let operation = format!("get comments of issue {issue_key}");
        self.retrying(&operation, DEFAULT_ATTEMPTS, || async {
            let request = self
                .get(&format!("issue/{issue_key}/comment"))
                .query(&[("startAt", start_at), ("maxResults", max_results)]);
            let response = self.send(&operation, request).await?;
            self.json(&operation, response).await
        })
        .await
    }

    pub async fn create_comment(
        &self,
        issue_key: &str,
        comment: &Comment,
    ) -> Result<IssueResponse, RestError> {
        let operation = format!("create comment on issue {issue_key}");
        self.retrying(&operation, DEFAULT_ATTEMPTS, || async {
            let response = self
                .send(&operation, self.post(&format!("issue/{issue_key}/comment")).json(comment))
                .await?;
            self.json(&operation, response).await
        })
        .await
    }

    pub async fn update_comment(
        &self,
        issue_key: &str,
        comment_id: &str,
        comment: &Comment,
    ) -> Result<IssueResponse, RestError> {
        let operation = format!("update comment {comment_id} on issue {issue_key}");
        self.retrying(&operation, DEFAULT_ATTEMPTS, || async {
            let response = self
                .send(
                    &operation,
                    self.put(&format!("issue/{issue_key}/comment/{comment_id}")).json(comment),
                )
                .await?;
            self.json(&operation, response).await
        })
        .await
    }

    pub async fn delete_comment(&self, issue_key: &str, comment_id: &str) -> Result<(), RestError> {
        let operation = format!("delete comment {comment_id} on issue {issue_key}");
        self.retrying(&operation, DEFAULT_ATTEMPTS, || async {
            self.send(&operation, self.delete(&format!("issue/{issue_key}/comment/{comment_id}")))
                .await?;
            Ok(())
        })
        .await
    }

    // --- enumerations ---

    pub async fn list_enumeration(
        &self,
        kind: EnumerationKind,
    ) -> Result<Vec<SimpleObject>, RestError> {
        let operation = format!("list {}", kind.path());
        self.retrying(&operation, DEFAULT_ATTEMPTS, || async {
            let response = self.send(&operation, self.get(kind.path())).await?;
            self.json(&operation, response).await
        })
        .await
    }

    pub async fn issue_link_types(&self) -> Result<IssueLinkTypes, RestError> {
        let operation = "list issue link types".to_string();
        self.retrying(&operation, DEFAULT_ATTEMPTS, || async {
            let response = self.send(&operation, self.get("issueLinkType")).await?;
            self.json(&operation, response).await
        })
        .await
    }

    // --- links ---

    pub async fn get_issue_link(&self, id: i64) -> Result<IssueLink, RestError> {
        let operation = format!("get issue link {id}");
        self.retrying(&operation, DEFAULT_ATTEMPTS, || async {
            let response = self.send(&operation, self.get(&format!("issueLink/{id}"))).await?;
            self.json(&operation, response).await
        })
        .await
    }

    pub async fn create_issue_link(&self, link: &IssueLink) -> Result<(), RestError> {
        let operation = "create issue link".to_string();
        self.retrying(&operation, DEFAULT_ATTEMPTS, || async {
            self.send(&operation, self.post("issueLink").json(link)).await?;
            Ok(())
        })
        .await
    }

    pub async fn delete_issue_link(&self, id: &str) -> Result<(), RestError> {
        let operation = format!("delete issue link {id}");
        self.retrying(&operation, DEFAULT_ATTEMPTS, || async {
            self.send(&operation, self.delete(&format!("issueLink/{id}"))).await?;
            Ok(())
        })
        .await
    }

    pub async fn upsert_remote_link(&self, key: &str, link: &RemoteLink) -> Result<(), RestError> {
        let operation = format!("upsert remote link on issue {key}");
        self.retrying(&operation, DEFAULT_ATTEMPTS, || async {
            self.send(&operation, self.post(&format!("issue/{key}/remotelink")).json(link))
                .await?;
            Ok(())
        })
        .await
    }

    // --- transitions ---

    pub async fn available_transitions(&self, key: &str) -> Result<Transitions, RestError> {
        let operation = format!("list transitions of issue {key}");
        self.retrying(&operation, DEFAULT_ATTEMPTS, || async {
            let response =
                self.send(&operation, self.get(&format!("issue/{key}/transitions"))).await?;
            self.json(&operation, response).await
        })
        .await
    }

    pub async fn transition(&self, key: &str, transition: &Transition) -> Result<(), RestError> {
        let operation = format!("transition issue {key}");
        self.retrying(&operation, DEFAULT_ATTEMPTS, || async {
            self.send(&operation, self.post(&format!("issue/{key}/transitions")).json(transition))
                .await?;
            Ok(())
        })
        .await
    }

    // --- versions ---

    pub async fn versions(&self, project_key: &str) -> Result<Vec<Version>, RestError> {
        let operation = format!("list versions of project {project_key}");
        self.retrying(&operation, DEFAULT_ATTEMPTS, || async {
            let response =
                self.send(&operation, self.get(&format!("project/{project_key}/versions"))).await?;
            self.json(&operation, response).await
        })
        .await
    }

    pub async fn get_version(&self, id: i64) -> Result<Version, RestError> {
        let operation = format!("get version {id}");
        self.retrying(&operation, DEFAULT_ATTEMPTS, || async {
            let response = self.send(&operation, self.get(&format!("version/{id}"))).await?;
            self.json(&operation, response).await
        })
        .await
    }

    pub async fn create_version(&self, version: &Version) -> Result<Version, RestError> {
        let operation = "create version".to_string();
        self.retrying(&operation, DEFAULT_ATTEMPTS, || async {
            let response = self.send(&operation, self.post("version").json(version)).await?;
            self.json(&operation, response).await
        })
        .await
    }

    pub async fn update_version(&self, id: &str, version: &Version) -> Result<Version, RestError> {
        let operation = format!("update version {id}");
        self.retrying(&operation, DEFAULT_ATTEMPTS, || async {
            let response =
                self.send(&operation, self.put(&format!("version/{id}")).json(version)).await?;
            self.json(&operation, response).await
        })
        .await
    }

    // --- plumbing ---

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base, path)
    }

    fn get(&self, path: &str) -> reqwest::RequestBuilder {
        self.http.get(self.url(path))
    }

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        self.http.post(self.url(path))
    }

    fn put(&self, path: &str) -> reqwest::RequestBuilder {
        self.http.put(self.url(path))
    }

    fn delete(&self, path: &str) -> reqwest::RequestBuilder {
        self.http.delete(self.url(path))
    }

    /// Runs one prepared request and maps non-success statuses into
    /// [`RestError`] values.
    async fn send(
        &self,
        operation: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, RestError> {
        let response = request.header(AUTHORIZATION, &self.authorization).send().await?;
        let status = response.status();
        if self.log_requests {
            debug!(operation, status = status.as_u16(), url = %response.url(), "remote call");
        }
        if status == StatusCode::NOT_FOUND {
            return Err(RestError::NotFound { operation: operation.to_string() });
        }
        if !status.is_success() {
            let headers = response
                .headers()
                .iter()
                .map(|(name, value)| {
                    (name.to_string(), value.to_str().unwrap_or("<binary>").to_string())
                })
                .collect();
            let message = response.text().await.unwrap_or_default();
            return Err(RestError::Status {
                operation: operation.to_string(),
                status: status.as_u16(),
                message,
                headers,
            });
        }
        Ok(response)
    }

    async fn json<T: DeserializeOwned>(
        &self,
        operation: &str,
        response: reqwest::Response,
    ) -> Result<T, RestError> {
        response.json().await.map_err(|error| RestError::InvalidResponse {
            operation: operation.to_string(),
            message: error.to_string(),
        })
    }

    /// Runs `run` up to `attempts` times, sleeping the fixed retry delay
    /// between transient failures. The last failure is surfaced with the
    /// operation description intact.
    async fn retrying<T, F, Fut>(
        &self,
        operation: &str,
        attempts: u32,
        run: F,
    ) -> Result<T, RestError>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T, RestError>>,
    {
        let mut attempt = 1;
        loop {
            match run().await {
                Ok(value) => return Ok(value),
                Err(error) => {
                    if attempt >= attempts || classify(&error) != RetryClass::Transient {
                        return Err(error);
                    }
                    warn!(
                        operation,
                        attempt,
                        attempts,
                        error = %error,
                        "transient remote failure, will retry"
                    );
                    tokio::time::sleep(self.retry_delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
