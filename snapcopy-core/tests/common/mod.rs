//! Mock IP Fabric server for testing
//!
//! Wraps a wiremock server and mounts the REST endpoints the copy workflow
//! talks to, so tests run without a real appliance.

#![allow(dead_code)]

use serde_json::{json, Value};
use snapcopy_core::{Credential, ServerEndpoint};
use wiremock::{
    matchers::{body_partial_json, header, method, path},
    Mock, MockServer, ResponseTemplate,
};

pub const SOURCE_TOKEN: &str = "source-token";
pub const DESTINATION_TOKEN: &str = "destination-token";
pub const ARCHIVE_BYTES: &[u8] = b"SNAPSHOT-ARCHIVE-PAYLOAD";

/// Mock IP Fabric server answering under `/api/{version}`
pub struct MockIpfServer {
    pub server: MockServer,
    pub api_version: String,
}

impl MockIpfServer {
    /// Start a server that reports `api_version` from `/api/version`
    pub async fn start(api_version: &str) -> Self {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/version"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "apiVersion": api_version,
                "releaseVersion": "6.9.3+1"
            })))
            .mount(&server)
            .await;

        Self {
            server,
            api_version: api_version.to_string(),
        }
    }

    pub fn url(&self) -> String {
        self.server.uri()
    }

    pub fn endpoint(&self, token: &str) -> ServerEndpoint {
        ServerEndpoint::new(&self.url(), Credential::Token(token.to_string())).unwrap()
    }

    pub fn api_path(&self, suffix: &str) -> String {
        format!("/api/{}/{}", self.api_version, suffix)
    }

    /// Mock a successful username/password login
    pub async fn mock_login(&self, username: &str, access_token: &str) {
        Mock::given(method("POST"))
            .and(path(self.api_path("auth/login")))
            .and(body_partial_json(json!({ "username": username })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "accessToken": access_token,
                "refreshToken": "refresh"
            })))
            .mount(&self.server)
            .await;
    }

    /// Mock a rejected login
    pub async fn mock_login_rejected(&self) {
        Mock::given(method("POST"))
            .and(path(self.api_path("auth/login")))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "code": "API_INVALID_CREDENTIALS"
            })))
            .mount(&self.server)
            .await;
    }

    /// Mock the snapshot listing, requiring the given token
    pub async fn mock_snapshots(&self, token: &str, snapshots: Value) {
        Mock::given(method("GET"))
            .and(path(self.api_path("snapshots")))
            .and(header("x-api-token", token))
            .respond_with(ResponseTemplate::new(200).set_body_json(snapshots))
            .mount(&self.server)
            .await;
    }

    /// Mock any request to `suffix` answering with `status`
    pub async fn mock_status(&self, http_method: &str, suffix: &str, status: u16) {
        Mock::given(method(http_method))
            .and(path(self.api_path(suffix)))
            .respond_with(ResponseTemplate::new(status).set_body_json(json!({
                "code": "API_ERROR",
                "message": "mocked failure"
            })))
            .mount(&self.server)
            .await;
    }

    /// Mock the export trigger for a snapshot, expecting `times` calls
    pub async fn mock_export_request(&self, snapshot_id: &str, times: u64) {
        Mock::given(method("GET"))
            .and(path(self.api_path(&format!("snapshots/{snapshot_id}/download"))))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "success": true })))
            .expect(times)
            .mount(&self.server)
            .await;
    }

    /// Mock the jobs table answering with one job in `status`
    pub async fn mock_job_status(&self, job_id: Value, status: &str, up_to: Option<u64>) {
        let mock = Mock::given(method("POST"))
            .and(path(self.api_path("tables/jobs")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{
                    "id": job_id,
                    "name": "snapshotDownload",
                    "status": status,
                    "startedAt": 1_700_000_000_000i64
                }],
                "_meta": { "count": 1, "size": 1 }
            })));
        let mock = match up_to {
            Some(n) => mock.up_to_n_times(n),
            None => mock,
        };
        mock.mount(&self.server).await;
    }

    /// Mock an empty jobs table (export not registered yet)
    pub async fn mock_no_jobs(&self) {
        Mock::given(method("POST"))
            .and(path(self.api_path("tables/jobs")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [],
                "_meta": { "count": 0, "size": 0 }
            })))
            .mount(&self.server)
            .await;
    }

    /// Mock the archive download for a job, expecting `times` calls
    pub async fn mock_download(&self, job_id: &str, times: u64) {
        Mock::given(method("GET"))
            .and(path(self.api_path(&format!("jobs/{job_id}/download"))))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "application/x-tar")
                    .set_body_bytes(ARCHIVE_BYTES.to_vec()),
            )
            .expect(times)
            .mount(&self.server)
            .await;
    }

    /// Mock an upload answering with `status` and `body`, expecting `times` calls
    pub async fn mock_upload(&self, status: u16, body: Value, times: u64) {
        Mock::given(method("POST"))
            .and(path(self.api_path("snapshots/upload")))
            .respond_with(ResponseTemplate::new(status).set_body_json(body))
            .expect(times)
            .mount(&self.server)
            .await;
    }
}

/// A typical two-snapshot listing: `latest` is loaded, `older` is loaded and
/// locked, `unloaded` is the newest but not loaded.
pub fn snapshot_listing() -> Value {
    json!([
        {
            "id": "unloaded-0003",
            "name": "nightly",
            "status": "unloaded",
            "state": "unloaded",
            "locked": false,
            "tsStart": 1_700_000_900_000i64,
            "tsEnd": 1_700_001_000_000i64
        },
        {
            "id": "latest-0002",
            "name": "weekly",
            "status": "done",
            "state": "loaded",
            "locked": false,
            "tsStart": 1_700_000_500_000i64,
            "tsEnd": 1_700_000_600_000i64
        },
        {
            "id": "older-0001",
            "name": "baseline",
            "status": "done",
            "state": "loaded",
            "locked": true,
            "tsStart": 1_700_000_000_000i64,
            "tsEnd": 1_700_000_100_000i64
        }
    ])
}
