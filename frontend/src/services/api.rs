//! HTTP access to the clinic backend.
//!
//! [`ClinicApi`] is the seam every hook talks to; [`ApiClient`] is the
//! reqwest implementation. All endpoints answer with the same
//! `{status, message?}` envelope and anything but `"success"` becomes an
//! [`ApiError::Backend`] carrying the backend's message verbatim.

use crate::error::ApiError;
use crate::services::config::ClientConfig;
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use shared::{
    ApiAck, ApprovalQueueQuery, ApprovalQueueResponse, AttendanceHistory, AttendanceHistoryResponse,
    AttendanceListResponse, AttendanceQuery, Envelope, LedgerQuery, LedgerResponse, MarkAttendanceRequest,
    PendingApproval, UpdateApprovalRequest,
};
use std::time::Duration;
use tracing::{debug, warn};

pub const ATTENDANCE_PATH: &str = "attendance";
pub const MARK_ATTENDANCE_PATH: &str = "mark_attendance";
pub const ATTENDANCE_HISTORY_PATH: &str = "attendance_history";
pub const LEDGER_PATH: &str = "ledger";
pub const ADMIN_ATTENDANCE_PATH: &str = "admin/attendance.php";

/// The backend operations the attendance and ledger workflow depends on.
#[async_trait]
pub trait ClinicApi: Send + Sync {
    /// `GET attendance` for one branch and day
    async fn fetch_attendance(&self, query: &AttendanceQuery) -> Result<AttendanceListResponse, ApiError>;

    /// `POST mark_attendance`
    async fn mark_attendance(&self, request: &MarkAttendanceRequest) -> Result<ApiAck, ApiError>;

    /// `GET attendance_history`
    async fn attendance_history(&self, patient_id: u64) -> Result<AttendanceHistory, ApiError>;

    /// `GET ledger`
    async fn ledger(&self, query: &LedgerQuery) -> Result<LedgerResponse, ApiError>;

    /// `GET admin/attendance.php?action=fetch_attendance`
    async fn pending_approvals(&self, query: &ApprovalQueueQuery) -> Result<Vec<PendingApproval>, ApiError>;

    /// `POST admin/attendance.php` with `action=update_status`
    async fn update_approval(&self, request: &UpdateApprovalRequest) -> Result<ApiAck, ApiError>;
}

/// API client for communicating with the backend server
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl ApiClient {
    /// Create a client from configuration
    pub fn new(config: &ClientConfig) -> Result<Self, ApiError> {
        let mut client = Self::with_base_url(&config.api_base_url, config.request_timeout())?;
        client.token = config.api_token.clone();
        Ok(client)
    }

    /// Create a client with a custom base URL
    pub fn with_base_url(base_url: &str, timeout: Duration) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ApiError::Transport(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: None,
        })
    }

    /// Set the bearer token sent with every request
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn get<T, Q>(&self, path: &str, query: &Q) -> Result<T, ApiError>
    where
        T: DeserializeOwned + Envelope,
        Q: Serialize + ?Sized,
    {
        let url = self.url(path);
        debug!(component = "api", %url, "GET");
        let response = self.authorize(self.client.get(&url).query(query)).send().await?;
        Self::handle_response(path, response).await
    }

    async fn post<T, B>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        T: DeserializeOwned + Envelope,
        B: Serialize + ?Sized,
    {
        let url = self.url(path);
        debug!(component = "api", %url, "POST");
        let response = self.authorize(self.client.post(&url).json(body)).send().await?;
        Self::handle_response(path, response).await
    }

    /// Decode the body and check the envelope.
    async fn handle_response<T>(path: &str, response: reqwest::Response) -> Result<T, ApiError>
    where
        T: DeserializeOwned + Envelope,
    {
        let status = response.status();
        let body = response.bytes().await?;

        if !status.is_success() {
            // Error pages from the backend usually still carry the envelope
            if let Ok(ack) = serde_json::from_slice::<ApiAck>(&body) {
                if let Some(message) = ack.message {
                    warn!(component = "api", path, status = status.as_u16(), %message, "Request rejected");
                    return Err(ApiError::backend(message));
                }
            }
            return Err(ApiError::Http {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&body).into_owned(),
            });
        }

        let decoded: T = serde_json::from_slice(&body).map_err(|e| ApiError::Decode(e.to_string()))?;
        ensure_success(path, decoded)
    }
}

fn ensure_success<T: Envelope>(path: &str, response: T) -> Result<T, ApiError> {
    if response.is_success() {
        return Ok(response);
    }

    let message = response.message().unwrap_or("Request failed").to_string();
    warn!(component = "api", path, status = ?response.status(), %message, "Backend reported failure");
    Err(ApiError::backend(message))
}

#[async_trait]
impl ClinicApi for ApiClient {
    async fn fetch_attendance(&self, query: &AttendanceQuery) -> Result<AttendanceListResponse, ApiError> {
        self.get(ATTENDANCE_PATH, query).await
    }

    async fn mark_attendance(&self, request: &MarkAttendanceRequest) -> Result<ApiAck, ApiError> {
        self.post(MARK_ATTENDANCE_PATH, request).await
    }

    async fn attendance_history(&self, patient_id: u64) -> Result<AttendanceHistory, ApiError> {
        self.get::<AttendanceHistoryResponse, _>(ATTENDANCE_HISTORY_PATH, &[("patient_id", patient_id)])
            .await?
            .data
            .ok_or_else(|| ApiError::Decode("Missing history data".to_string()))
    }

    async fn ledger(&self, query: &LedgerQuery) -> Result<LedgerResponse, ApiError> {
        self.get(LEDGER_PATH, query).await
    }

    async fn pending_approvals(&self, query: &ApprovalQueueQuery) -> Result<Vec<PendingApproval>, ApiError> {
        Ok(self
            .get::<ApprovalQueueResponse, _>(ADMIN_ATTENDANCE_PATH, query)
            .await?
            .data)
    }

    async fn update_approval(&self, request: &UpdateApprovalRequest) -> Result<ApiAck, ApiError> {
        self.post(ADMIN_ATTENDANCE_PATH, request).await
    }
}
