use async_trait::async_trait;
use reqwest::Client;
use std::error::Error as _;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// Failures while uploading a file, split by whether another transport might succeed
#[derive(thiserror::Error, Debug)]
pub enum TransportError {
    #[error("TLS handshake failed: {0}")]
    Tls(String),

    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("{0}")]
    Io(String),
}

impl TransportError {
    /// Errors below the HTTP layer, where a different client stack may get through
    pub fn is_fallback_eligible(&self) -> bool {
        matches!(self, TransportError::Tls(_) | TransportError::Connect(_))
    }
}

/// A file upload sent as the raw request body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadRequest {
    pub url: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub file: PathBuf,
}

impl UploadRequest {
    pub fn new(url: impl Into<String>, file: impl Into<PathBuf>) -> Self {
        Self {
            url: url.into(),
            query: Vec::new(),
            headers: Vec::new(),
            file: file.into(),
        }
    }

    pub fn query(mut self, key: &str, value: impl Into<String>) -> Self {
        self.query.push((key.to_string(), value.into()));
        self
    }

    pub fn header(mut self, key: &str, value: impl Into<String>) -> Self {
        self.headers.push((key.to_string(), value.into()));
        self
    }

    /// URL with the query string appended, values percent-encoded
    pub fn full_url(&self) -> String {
        if self.query.is_empty() {
            return self.url.clone();
        }
        let query: Vec<String> = self
            .query
            .iter()
            .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
            .collect();
        format!("{}?{}", self.url, query.join("&"))
    }
}

/// Sends a file upload and returns the decoded JSON reply
#[async_trait]
pub trait Transport: Send + Sync {
    async fn upload(&self, request: &UploadRequest) -> Result<serde_json::Value, TransportError>;

    fn name(&self) -> &'static str;
}

/// In-process HTTP transport
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(60))
            .timeout(Duration::from_secs(600))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self { client }
    }
}

impl Default for ReqwestTransport {
    fn default() -> Self {
        Self::new()
    }
}

fn classify_reqwest(error: reqwest::Error) -> TransportError {
    let mut chain = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        chain.push_str(": ");
        chain.push_str(&cause.to_string());
        source = cause.source();
    }

    let lower = chain.to_lowercase();
    if lower.contains("certificate") || lower.contains("tls") || lower.contains("ssl") {
        TransportError::Tls(chain)
    } else if error.is_timeout() {
        TransportError::Timeout(chain)
    } else if error.is_connect() {
        TransportError::Connect(chain)
    } else {
        TransportError::Io(chain)
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn upload(&self, request: &UploadRequest) -> Result<serde_json::Value, TransportError> {
        let body = tokio::fs::read(&request.file)
            .await
            .map_err(|e| TransportError::Io(format!("{}: {}", request.file.display(), e)))?;

        let mut builder = self.client.post(&request.url).query(&request.query).body(body);
        for (key, value) in &request.headers {
            builder = builder.header(key.as_str(), value.as_str());
        }

        let response = builder.send().await.map_err(classify_reqwest)?;
        let status = response.status();
        let text = response.text().await.map_err(classify_reqwest)?;

        if !status.is_success() {
            return Err(TransportError::Status {
                status: status.as_u16(),
                body: text,
            });
        }

        serde_json::from_str(&text).map_err(|e| TransportError::InvalidResponse(e.to_string()))
    }

    fn name(&self) -> &'static str {
        "reqwest"
    }
}

/// Uploads through a `curl` subprocess
pub struct CurlTransport {
    curl_path: String,
}

impl CurlTransport {
    pub fn new() -> Self {
        Self {
            curl_path: "curl".to_string(),
        }
    }

    /// Arguments for one upload; `-w` appends the status code on its own line
    pub fn arguments(request: &UploadRequest) -> Vec<String> {
        let mut args = vec![
            "-X".to_string(),
            "POST".to_string(),
            request.full_url(),
            "--data-binary".to_string(),
            format!("@{}", request.file.display()),
            "--connect-timeout".to_string(),
            "30".to_string(),
            "--max-time".to_string(),
            "300".to_string(),
            "-s".to_string(),
            "-w".to_string(),
            "\n%{http_code}".to_string(),
        ];
        for (key, value) in &request.headers {
            args.push("-H".to_string());
            args.push(format!("{}: {}", key, value));
        }
        args
    }
}

impl Default for CurlTransport {
    fn default() -> Self {
        Self::new()
    }
}

/// Split curl stdout into the body and the trailing status code
fn parse_curl_output(stdout: &str) -> Result<serde_json::Value, TransportError> {
    let (body, code) = stdout
        .rsplit_once('\n')
        .ok_or_else(|| TransportError::InvalidResponse("missing status code".to_string()))?;
    let status: u16 = code
        .trim()
        .parse()
        .map_err(|_| TransportError::InvalidResponse(format!("bad status code {:?}", code)))?;

    if !(200..300).contains(&status) {
        return Err(TransportError::Status {
            status,
            body: body.to_string(),
        });
    }
    serde_json::from_str(body).map_err(|e| TransportError::InvalidResponse(e.to_string()))
}

#[async_trait]
impl Transport for CurlTransport {
    async fn upload(&self, request: &UploadRequest) -> Result<serde_json::Value, TransportError> {
        tracing::debug!("Uploading {} with curl", request.file.display());

        let output = Command::new(&self.curl_path)
            .args(Self::arguments(request))
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| TransportError::Io(format!("failed to run {}: {}", self.curl_path, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            // curl exit codes 6 and 7: resolve/connect failures; 35, 60: TLS
            return Err(match output.status.code() {
                Some(6) | Some(7) => TransportError::Connect(stderr),
                Some(35) | Some(60) => TransportError::Tls(stderr),
                Some(28) => TransportError::Timeout(stderr),
                code => TransportError::Io(format!("curl exited with {:?}: {}", code, stderr)),
            });
        }

        parse_curl_output(&String::from_utf8_lossy(&output.stdout))
    }

    fn name(&self) -> &'static str {
        "curl"
    }
}

/// Tries `primary`, then `fallback` when the primary fails below the HTTP layer
pub struct FallbackTransport {
    primary: Box<dyn Transport>,
    fallback: Box<dyn Transport>,
}

impl FallbackTransport {
    pub fn new(primary: Box<dyn Transport>, fallback: Box<dyn Transport>) -> Self {
        Self { primary, fallback }
    }

    /// reqwest first, curl second
    pub fn standard() -> Self {
        Self::new(Box::new(ReqwestTransport::new()), Box::new(CurlTransport::new()))
    }
}

#[async_trait]
impl Transport for FallbackTransport {
    async fn upload(&self, request: &UploadRequest) -> Result<serde_json::Value, TransportError> {
        match self.primary.upload(request).await {
            Err(e) if e.is_fallback_eligible() => {
                tracing::warn!(
                    "{} upload failed ({}), retrying with {}",
                    self.primary.name(),
                    e,
                    self.fallback.name()
                );
                self.fallback.upload(request).await
            }
            result => result,
        }
    }

    fn name(&self) -> &'static str {
        "fallback"
    }
}
