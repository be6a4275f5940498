/*!
IP Fabric REST client.

Each server is contacted through its own discovered API version, so source
and destination may run different releases.

# Authentication
- API tokens are sent as the `X-API-Token` header.
- Username/password pairs are exchanged once for an access token at
  `POST /auth/login`, which is then sent as a bearer token.
*/

use super::{ExportJob, ExportStatus, SnapshotSink, SnapshotSource, EXPORT_JOB_NAME};
use crate::archive::LocalArchive;
use crate::config::{Credential, ServerEndpoint, ServerRole};
use crate::snapshot::SnapshotInfo;
use crate::{Result, SnapCopyError};
use async_trait::async_trait;
use reqwest::header::{HeaderName, HeaderValue, AUTHORIZATION};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, info, warn};

const API_TOKEN_HEADER: &str = "x-api-token";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const ARCHIVE_MIME: &str = "application/x-tar";
const SNAPSHOT_CONFLICT_CODE: &str = "API_SNAPSHOT_CONFLICT";
/// Slack applied to the export start time to absorb clock drift
const JOB_CLOCK_SLACK_MS: i64 = 5_000;
const BODY_EXCERPT_LEN: usize = 200;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct VersionResponse {
    api_version: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoginResponse {
    access_token: String,
}

#[derive(Deserialize)]
struct JobsTable {
    #[serde(default)]
    data: Vec<JobRow>,
}

#[derive(Deserialize)]
struct JobRow {
    id: Value,
    #[serde(default)]
    status: String,
}

/// Authenticated client for one IP Fabric server
#[derive(Debug, Clone)]
pub struct IpfClient {
    http: Client,
    role: ServerRole,
    base_url: String,
    api_url: String,
    auth: (HeaderName, HeaderValue),
}

impl IpfClient {
    /// Discover the API version and authenticate against `endpoint`
    pub async fn connect(
        role: ServerRole,
        endpoint: &ServerEndpoint,
        verify_tls: bool,
    ) -> Result<Self> {
        if !verify_tls {
            warn!(server = %endpoint.base_url(), "TLS certificate verification disabled");
        }
        let http = Client::builder()
            .danger_accept_invalid_certs(!verify_tls)
            .connect_timeout(CONNECT_TIMEOUT)
            .user_agent(concat!("ipf-snapcopy/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SnapCopyError::transfer(format!("failed to build HTTP client: {e}")))?;

        let base_url = endpoint.base_url().to_string();
        let api_version = discover_api_version(&http, &base_url).await?;
        let api_url = format!("{base_url}/api/{api_version}");

        let auth = match &endpoint.credential {
            Credential::Token(token) => (
                HeaderName::from_static(API_TOKEN_HEADER),
                sensitive_header(token)?,
            ),
            Credential::UserPassword { username, password } => {
                let token = login(&http, &base_url, &api_url, username, password).await?;
                (AUTHORIZATION, sensitive_header(&format!("Bearer {token}"))?)
            }
        };

        info!(
            role = %role,
            server = %base_url,
            api_version = %api_version,
            auth = endpoint.credential.kind(),
            "Connected to IP Fabric server"
        );

        Ok(Self {
            http,
            role,
            base_url,
            api_url,
            auth,
        })
    }

    pub fn role(&self) -> ServerRole {
        self.role
    }

    /// Versioned API root, e.g. `https://ipf.example/api/v6.9`
    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http
            .request(method, format!("{}/{}", self.api_url, path))
            .header(self.auth.0.clone(), self.auth.1.clone())
    }

    /// Map a non-success response to the matching error kind
    async fn check(
        &self,
        response: Response,
        what: &str,
        snapshot: Option<&str>,
    ) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = excerpt(&response.text().await.unwrap_or_default());
        error!(server = %self.base_url, status = status.as_u16(), body = %body, "{} failed", what);

        Err(match (status, snapshot) {
            (StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN, _) => SnapCopyError::authentication(
                &self.base_url,
                format!("{what} rejected with HTTP {status}"),
            ),
            (StatusCode::NOT_FOUND, Some(id)) => SnapCopyError::not_found(id, &self.base_url),
            _ => SnapCopyError::transfer(format!(
                "{what} on {} failed with HTTP {status}: {body}",
                self.base_url
            )),
        })
    }

    async fn stream_to_file(&self, mut response: Response, dest: &Path) -> Result<u64> {
        if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::File::create(dest).await?;
        let mut written = 0u64;

        while let Some(chunk) = response.chunk().await? {
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        Ok(written)
    }
}

#[async_trait]
impl SnapshotSource for IpfClient {
    fn server(&self) -> &str {
        &self.base_url
    }

    async fn list_snapshots(&self) -> Result<Vec<SnapshotInfo>> {
        let response = self.request(Method::GET, "snapshots").send().await?;
        let response = self.check(response, "snapshot listing", None).await?;
        let snapshots: Vec<SnapshotInfo> = response.json().await?;
        debug!(server = %self.base_url, count = snapshots.len(), "Listed snapshots");
        Ok(snapshots)
    }

    async fn request_export(&self, snapshot: &SnapshotInfo) -> Result<ExportJob> {
        let requested_at_ms = chrono::Utc::now().timestamp_millis() - JOB_CLOCK_SLACK_MS;
        let response = self
            .request(Method::GET, &format!("snapshots/{}/download", snapshot.id))
            .send()
            .await?;
        let response = self
            .check(response, "export request", Some(snapshot.id.as_str()))
            .await?;

        let body = response.text().await.unwrap_or_default();
        let job_id = serde_json::from_str::<Value>(&body)
            .ok()
            .and_then(|v| v.get("jobId").or_else(|| v.get("id")).and_then(value_to_id));

        info!(
            server = %self.base_url,
            snapshot = %snapshot.id,
            job_id = job_id.as_deref().unwrap_or("unknown"),
            "Export requested"
        );
        Ok(ExportJob {
            snapshot_id: snapshot.id.clone(),
            job_id,
            requested_at_ms,
        })
    }

    async fn export_status(&self, job: &ExportJob) -> Result<ExportStatus> {
        let filters = match &job.job_id {
            Some(id) => json!({ "id": ["eq", id] }),
            None => json!({
                "name": ["eq", EXPORT_JOB_NAME],
                "snapshot": ["eq", job.snapshot_id],
                "startedAt": ["gte", job.requested_at_ms],
            }),
        };
        let query = json!({
            "columns": ["id", "name", "status", "snapshot", "startedAt", "completedAt"],
            "filters": filters,
            "pagination": { "start": 0, "limit": 1 },
            "sort": { "order": "desc", "column": "startedAt" },
        });

        let response = self
            .request(Method::POST, "tables/jobs")
            .json(&query)
            .send()
            .await?;
        let response = self.check(response, "export status", None).await?;
        let table: JobsTable = response.json().await?;

        let status = match table.data.into_iter().next() {
            Some(row) => {
                let job_id = value_to_id(&row.id).ok_or_else(|| {
                    SnapCopyError::transfer("export job row without an id".to_string())
                })?;
                ExportStatus::from_job_state(job_id, &row.status)
            }
            None => ExportStatus::Pending("not registered yet".to_string()),
        };
        debug!(snapshot = %job.snapshot_id, status = ?status, "Export status");
        Ok(status)
    }

    async fn download(&self, job_id: &str, dest: &Path) -> Result<u64> {
        let response = self
            .request(Method::GET, &format!("jobs/{job_id}/download"))
            .send()
            .await?;
        let response = self.check(response, "archive download", None).await?;

        match self.stream_to_file(response, dest).await {
            Ok(written) => Ok(written),
            Err(e) => {
                if let Err(cleanup) = tokio::fs::remove_file(dest).await {
                    debug!(path = %dest.display(), error = %cleanup, "No partial archive to remove");
                }
                Err(e)
            }
        }
    }
}

#[async_trait]
impl SnapshotSink for IpfClient {
    fn server(&self) -> &str {
        &self.base_url
    }

    async fn upload(&self, archive: &LocalArchive) -> Result<String> {
        let file = tokio::fs::File::open(archive.path()).await?;
        let part = Part::stream_with_length(file, archive.size())
            .file_name(archive.file_name())
            .mime_str(ARCHIVE_MIME)?;
        let form = Form::new().part("file", part);

        info!(
            server = %self.base_url,
            file = %archive.file_name(),
            size = archive.size(),
            "Uploading archive"
        );
        let response = self
            .request(Method::POST, "snapshots/upload")
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let parsed: Value = serde_json::from_str(&body).unwrap_or(Value::Null);

        if status.is_success() {
            return ["snapshot", "id", "snapshotId"]
                .iter()
                .find_map(|key| parsed.get(key).and_then(value_to_id))
                .ok_or_else(|| SnapCopyError::Import {
                    status: status.as_u16(),
                    detail: "destination did not report a snapshot id".to_string(),
                });
        }

        error!(server = %self.base_url, status = status.as_u16(), body = %excerpt(&body), "Upload failed");
        Err(match status {
            StatusCode::BAD_REQUEST
                if parsed.get("code").and_then(Value::as_str) == Some(SNAPSHOT_CONFLICT_CODE) =>
            {
                SnapCopyError::Conflict {
                    snapshot: parsed
                        .pointer("/data/snapshot")
                        .and_then(value_to_id)
                        .unwrap_or_else(|| "unknown".to_string()),
                }
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => SnapCopyError::authentication(
                &self.base_url,
                format!("upload rejected with HTTP {status}"),
            ),
            _ => SnapCopyError::Import {
                status: status.as_u16(),
                detail: parsed
                    .get("message")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| excerpt(&body)),
            },
        })
    }
}

async fn discover_api_version(http: &Client, base_url: &str) -> Result<String> {
    let response = http.get(format!("{base_url}/api/version")).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(SnapCopyError::transfer(format!(
            "API version lookup on {base_url} failed with HTTP {status}"
        )));
    }
    let version: VersionResponse = response.json().await?;
    version
        .api_version
        .filter(|v| !v.is_empty())
        .ok_or_else(|| SnapCopyError::transfer(format!("{base_url} did not report an API version")))
}

async fn login(
    http: &Client,
    base_url: &str,
    api_url: &str,
    username: &str,
    password: &str,
) -> Result<String> {
    debug!(server = %base_url, username = %username, "Logging in");
    let response = http
        .post(format!("{api_url}/auth/login"))
        .json(&json!({ "username": username, "password": password }))
        .send()
        .await?;

    match response.status() {
        status if status.is_success() => Ok(response.json::<LoginResponse>().await?.access_token),
        status @ (StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) => Err(
            SnapCopyError::authentication(base_url, format!("login rejected with HTTP {status}")),
        ),
        status => Err(SnapCopyError::transfer(format!(
            "login on {base_url} failed with HTTP {status}"
        ))),
    }
}

fn sensitive_header(value: &str) -> Result<HeaderValue> {
    let mut header = HeaderValue::from_str(value)
        .map_err(|_| SnapCopyError::config("credential contains characters not allowed in HTTP headers"))?;
    header.set_sensitive(true);
    Ok(header)
}

fn value_to_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn excerpt(body: &str) -> String {
    let trimmed = body.trim();
    match trimmed.char_indices().nth(BODY_EXCERPT_LEN) {
        Some((cut, _)) => format!("{}...", &trimmed[..cut]),
        None => trimmed.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_to_id() {
        assert_eq!(value_to_id(&json!("abc")), Some("abc".to_string()));
        assert_eq!(value_to_id(&json!(17)), Some("17".to_string()));
        assert_eq!(value_to_id(&json!("")), None);
        assert_eq!(value_to_id(&Value::Null), None);
    }

    #[test]
    fn test_excerpt_truncates_long_bodies() {
        let long = "x".repeat(BODY_EXCERPT_LEN + 50);
        let cut = excerpt(&long);
        assert!(cut.ends_with("..."));
        assert_eq!(cut.len(), BODY_EXCERPT_LEN + 3);
        assert_eq!(excerpt("  short  "), "short");
    }

    #[test]
    fn test_sensitive_header_rejects_control_characters() {
        assert!(sensitive_header("token\nvalue").is_err());
        assert!(sensitive_header("token-value").unwrap().is_sensitive());
    }
}
