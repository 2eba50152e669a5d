//! HTTP access to the task service.
//!
//! `TaskApi` is the seam the board runtime talks through; `HttpTaskApi` is
//! the reqwest implementation and tests substitute their own.

use async_trait::async_trait;
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::errors::ClientError;
use crate::models::{AuthResponse, NewTask, Task, TaskId, TaskPatch, User};

const USER_AGENT: &str = concat!("taskboard/", env!("CARGO_PKG_VERSION"));

/// Owner-scoped task operations, as seen by the board.
#[async_trait]
pub trait TaskApi: Send + Sync {
    async fn list(&self) -> Result<Vec<Task>, ClientError>;
    async fn get(&self, id: TaskId) -> Result<Task, ClientError>;
    async fn create(&self, task: NewTask) -> Result<Task, ClientError>;
    async fn update(&self, id: TaskId, patch: TaskPatch) -> Result<Task, ClientError>;
    async fn delete(&self, id: TaskId) -> Result<(), ClientError>;
}

/// Body of every error response from the service.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

/// Map a non-success response onto the client error taxonomy, keeping the
/// server's message when it sent one.
async fn error_from_response(resp: Response) -> ClientError {
    let status = resp.status();
    let message = match resp.json::<ErrorBody>().await {
        Ok(body) => body.error,
        Err(_) => status.to_string(),
    };
    match status {
        StatusCode::UNAUTHORIZED => ClientError::Auth(message),
        StatusCode::NOT_FOUND => ClientError::NotFound(message),
        StatusCode::BAD_REQUEST | StatusCode::CONFLICT | StatusCode::UNPROCESSABLE_ENTITY => {
            ClientError::Validation(message)
        }
        _ => ClientError::Unknown(message),
    }
}

fn transport_error(err: reqwest::Error) -> ClientError {
    if err.is_decode() {
        ClientError::Unknown(format!("Malformed response: {}", err))
    } else {
        ClientError::Network(err.to_string())
    }
}

async fn send(request: RequestBuilder) -> Result<Response, ClientError> {
    let resp = request
        .header("User-Agent", USER_AGENT)
        .send()
        .await
        .map_err(transport_error)?;
    if resp.status().is_success() {
        Ok(resp)
    } else {
        Err(error_from_response(resp).await)
    }
}

async fn send_json<T: DeserializeOwned>(request: RequestBuilder) -> Result<T, ClientError> {
    send(request).await?.json::<T>().await.map_err(transport_error)
}

fn normalize_base(base_url: &str) -> String {
    base_url.trim_end_matches('/').to_string()
}

/// reqwest-backed `TaskApi` carrying one bearer credential.
#[derive(Clone)]
pub struct HttpTaskApi {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl HttpTaskApi {
    pub fn new(base_url: &str, token: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: normalize_base(base_url),
            token: token.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request.header("Authorization", format!("Bearer {}", self.token))
    }
}

#[async_trait]
impl TaskApi for HttpTaskApi {
    async fn list(&self) -> Result<Vec<Task>, ClientError> {
        send_json(self.authorized(self.http.get(self.url("/api/tasks")))).await
    }

    async fn get(&self, id: TaskId) -> Result<Task, ClientError> {
        let url = self.url(&format!("/api/tasks/{}", id));
        send_json(self.authorized(self.http.get(url))).await
    }

    async fn create(&self, task: NewTask) -> Result<Task, ClientError> {
        let request = self.http.post(self.url("/api/tasks")).json(&task);
        send_json(self.authorized(request)).await
    }

    async fn update(&self, id: TaskId, patch: TaskPatch) -> Result<Task, ClientError> {
        let url = self.url(&format!("/api/tasks/{}", id));
        send_json(self.authorized(self.http.put(url).json(&patch))).await
    }

    async fn delete(&self, id: TaskId) -> Result<(), ClientError> {
        let url = self.url(&format!("/api/tasks/{}", id));
        send(self.authorized(self.http.delete(url))).await?;
        Ok(())
    }
}

/// Unauthenticated account endpoints plus logout/profile.
#[derive(Clone)]
pub struct AuthClient {
    http: reqwest::Client,
    base_url: String,
}

impl AuthClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: normalize_base(base_url),
        }
    }

    pub async fn signup(&self, name: &str, email: &str, password: &str) -> Result<AuthResponse, ClientError> {
        let body = serde_json::json!({"name": name, "email": email, "password": password});
        let url = format!("{}/api/auth/signup", self.base_url);
        send_json(self.http.post(url).json(&body)).await
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<AuthResponse, ClientError> {
        let body = serde_json::json!({"email": email, "password": password});
        let url = format!("{}/api/auth/login", self.base_url);
        send_json(self.http.post(url).json(&body)).await
    }

    /// Revoke `token` on the server.
    pub async fn logout(&self, token: &str) -> Result<(), ClientError> {
        let url = format!("{}/api/auth/logout", self.base_url);
        send(self.http.post(url).header("Authorization", format!("Bearer {}", token))).await?;
        Ok(())
    }

    pub async fn me(&self, token: &str) -> Result<User, ClientError> {
        let url = format!("{}/api/auth/me", self.base_url);
        send_json(self.http.get(url).header("Authorization", format!("Bearer {}", token))).await
    }
}
