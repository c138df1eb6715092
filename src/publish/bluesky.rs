use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::Mutex;

use super::facets::{detect_facets, Facet};
use super::transport::{FallbackTransport, Transport, UploadRequest};
use super::{PostMedia, PostRequest, SocialPublisher};
use crate::config::SocialConfig;
use crate::utils::{grapheme_count, truncate_with_ellipsis};
use crate::{PipelineError, Result};

const POST_COLLECTION: &str = "app.bsky.feed.post";
const FALLBACK_ASPECT_RATIO: (u32, u32) = (1280, 720);

#[derive(Debug, Clone, Deserialize)]
struct Session {
    #[serde(rename = "accessJwt")]
    access_jwt: String,
    did: String,
    #[serde(rename = "didDoc", default)]
    did_doc: Option<Value>,
}

impl Session {
    /// Host of the account's personal data server, from the DID document
    fn pds_host(&self) -> Option<String> {
        let endpoint = self.did_doc.as_ref()?["service"][0]["serviceEndpoint"].as_str()?;
        let host = endpoint
            .trim_start_matches("https://")
            .trim_start_matches("http://")
            .trim_end_matches('/');
        (!host.is_empty()).then(|| host.to_string())
    }

    fn bearer(&self) -> String {
        format!("Bearer {}", self.access_jwt)
    }
}

/// Publisher for Bluesky (AT Protocol).
///
/// Logs in on first use and reuses the session. Uploads go through a [`Transport`] so a
/// failing TLS stack can fall back to curl.
pub struct BlueskyPublisher {
    http: Client,
    transport: Arc<dyn Transport>,
    handle: String,
    password: String,
    service_url: String,
    video_service_url: String,
    text_limit: usize,
    session: Mutex<Option<Session>>,
    poll_interval: Duration,
    poll_timeout: Duration,
}

impl BlueskyPublisher {
    pub fn new(config: &SocialConfig) -> Result<Self> {
        Self::with_transport(config, Arc::new(FallbackTransport::standard()))
    }

    pub fn with_transport(config: &SocialConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        if config.handle.is_empty() || config.password.is_empty() {
            return Err(PipelineError::Config("Bluesky handle and password are required".to_string()).into());
        }

        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            http,
            transport,
            handle: config.handle.clone(),
            password: config.password.clone(),
            service_url: config.service_url.trim_end_matches('/').to_string(),
            video_service_url: config.video_service_url.trim_end_matches('/').to_string(),
            text_limit: config.text_limit,
            session: Mutex::new(None),
            poll_interval: Duration::from_secs(2),
            poll_timeout: Duration::from_secs(300),
        })
    }

    fn xrpc(&self, method: &str) -> String {
        format!("{}/xrpc/{}", self.service_url, method)
    }

    async fn session(&self) -> Result<Session> {
        let mut guard = self.session.lock().await;
        if let Some(session) = guard.as_ref() {
            return Ok(session.clone());
        }

        tracing::info!("Logging in to {} as {}", self.service_url, self.handle);
        let response = self
            .http
            .post(self.xrpc("com.atproto.server.createSession"))
            .json(&json!({ "identifier": self.handle, "password": self.password }))
            .send()
            .await
            .context("Failed to reach Bluesky")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Bluesky login failed: HTTP {} {}", status, body);
        }

        let session: Session = response.json().await.context("Invalid session response")?;
        tracing::info!("Authenticated as {}", session.did);
        *guard = Some(session.clone());
        Ok(session)
    }

    async fn upload_blob(&self, session: &Session, path: &Path) -> Result<Value> {
        let request = UploadRequest::new(self.xrpc("com.atproto.repo.uploadBlob"), path)
            .header("Authorization", session.bearer())
            .header("Content-Type", mime_for(path));

        let reply = self
            .transport
            .upload(&request)
            .await
            .with_context(|| format!("Failed to upload {}", path.display()))?;

        reply
            .get("blob")
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("uploadBlob reply carried no blob"))
    }

    /// Short-lived token the video service accepts on behalf of the account's server
    async fn service_auth(&self, session: &Session) -> Result<String> {
        let host = session.pds_host().unwrap_or_else(|| {
            self.service_url
                .trim_start_matches("https://")
                .trim_start_matches("http://")
                .to_string()
        });
        let expires = Utc::now().timestamp() + 30 * 60;

        let response = self
            .http
            .get(self.xrpc("com.atproto.server.getServiceAuth"))
            .query(&[
                ("aud", format!("did:web:{}", host)),
                ("lxm", "com.atproto.repo.uploadBlob".to_string()),
                ("exp", expires.to_string()),
            ])
            .header("Authorization", session.bearer())
            .send()
            .await
            .context("Failed to request service auth")?
            .error_for_status()
            .context("Service auth rejected")?;

        let body: Value = response.json().await?;
        body["token"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| anyhow::anyhow!("Service auth reply carried no token"))
    }

    async fn upload_video(&self, session: &Session, path: &Path) -> Result<Value> {
        let size = fs_err::metadata(path)?.len();
        tracing::info!("Uploading video {} ({})", path.display(), crate::utils::format_file_size(size));

        let token = self.service_auth(session).await?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "video.mp4".to_string());

        let request = UploadRequest::new(
            format!("{}/xrpc/app.bsky.video.uploadVideo", self.video_service_url),
            path,
        )
        .query("did", session.did.clone())
        .query("name", name)
        .header("Authorization", format!("Bearer {}", token))
        .header("Content-Type", "video/mp4");

        let reply = self.transport.upload(&request).await.context("Video upload failed")?;

        if let Some(blob) = reply.get("blob").filter(|b| !b.is_null()) {
            return Ok(blob.clone());
        }
        let job_id = reply["jobId"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("Video upload returned neither a blob nor a job id"))?;

        self.wait_for_video(job_id, &token).await
    }

    async fn wait_for_video(&self, job_id: &str, token: &str) -> Result<Value> {
        let started = tokio::time::Instant::now();
        tracing::info!("Waiting for video job {}", job_id);

        while started.elapsed() < self.poll_timeout {
            let reply = self
                .http
                .get(format!("{}/xrpc/app.bsky.video.getJobStatus", self.video_service_url))
                .query(&[("jobId", job_id)])
                .header("Authorization", format!("Bearer {}", token))
                .send()
                .await
                .and_then(|r| r.error_for_status());

            match reply {
                Ok(response) => {
                    let status: Value = response.json().await.unwrap_or(Value::Null);
                    if let Some(blob) = job_blob(&status)? {
                        return Ok(blob);
                    }
                    tracing::debug!("Video job state: {}", status["jobStatus"]["state"]);
                }
                Err(e) => tracing::warn!("Polling video job failed: {}", e),
            }

            tokio::time::sleep(self.poll_interval).await;
        }

        anyhow::bail!("Video processing timed out after {}s", self.poll_timeout.as_secs())
    }

    async fn embed(&self, session: &Session, media: &PostMedia) -> Result<Option<Value>> {
        let embed = match media {
            PostMedia::None => None,
            PostMedia::LinkCard {
                url,
                title,
                description,
                thumb,
            } => {
                let thumb_blob = match thumb {
                    Some(path) => match self.upload_blob(session, path).await {
                        Ok(blob) => Some(blob),
                        Err(e) => {
                            tracing::warn!("Link card thumbnail upload failed, posting without it: {:#}", e);
                            None
                        }
                    },
                    None => None,
                };
                Some(link_card_embed(url, title, description, thumb_blob))
            }
            PostMedia::Video(path) => {
                let blob = self.upload_video(session, path).await?;
                let (width, height) = video_dimensions(path).await;
                Some(video_embed(blob, width, height))
            }
            PostMedia::Image { path, alt } => {
                let blob = self.upload_blob(session, path).await?;
                Some(image_embed(blob, alt))
            }
        };
        Ok(embed)
    }

    async fn create_record(&self, session: &Session, record: Value) -> Result<String> {
        let response = self
            .http
            .post(self.xrpc("com.atproto.repo.createRecord"))
            .header("Authorization", session.bearer())
            .json(&json!({
                "repo": session.did,
                "collection": POST_COLLECTION,
                "record": record,
            }))
            .send()
            .await
            .context("Failed to create post")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(PipelineError::Publish(format!("createRecord returned {}: {}", status, body)).into());
        }

        let body: Value = response.json().await?;
        Ok(body["uri"].as_str().unwrap_or_default().to_string())
    }

    async fn try_publish(&self, post: &PostRequest) -> Result<String> {
        let session = self.session().await?;

        let text = truncate_with_ellipsis(&post.text, self.text_limit);
        if text != post.text {
            tracing::warn!(
                "Post truncated from {} to {} characters",
                grapheme_count(&post.text),
                grapheme_count(&text)
            );
        }

        let facets = detect_facets(&text);
        let embed = self.embed(&session, &post.media).await?;
        let record = build_record(&text, &facets, embed, Utc::now());

        self.create_record(&session, record).await
    }
}

#[async_trait]
impl SocialPublisher for BlueskyPublisher {
    async fn publish(&self, post: &PostRequest) -> bool {
        tracing::info!("Publishing {} post to Bluesky", post.media.kind());
        match self.try_publish(post).await {
            Ok(uri) => {
                tracing::info!("Posted to Bluesky: {}", uri);
                true
            }
            Err(e) => {
                tracing::error!("Bluesky post failed: {:#}", e);
                false
            }
        }
    }

    fn text_limit(&self) -> usize {
        self.text_limit
    }
}

/// The blob from a `getJobStatus` reply, `None` while processing continues
fn job_blob(status: &Value) -> Result<Option<Value>> {
    let job = &status["jobStatus"];
    if let Some(blob) = job.get("blob").filter(|b| !b.is_null()) {
        return Ok(Some(blob.clone()));
    }
    let state = job["state"].as_str().unwrap_or_default();
    if state.to_lowercase().contains("failed") {
        let reason = job["error"].as_str().unwrap_or("unknown error");
        anyhow::bail!("Video processing failed: {}", reason);
    }
    Ok(None)
}

fn mime_for(path: &Path) -> &'static str {
    match path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .as_deref()
    {
        Some("webp") => "image/webp",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("mp4") => "video/mp4",
        _ => "application/octet-stream",
    }
}

async fn video_dimensions(path: &Path) -> (u32, u32) {
    let output = Command::new("ffprobe")
        .args(["-v", "error", "-select_streams", "v:0", "-show_entries", "stream=width,height", "-of", "json"])
        .arg(path)
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .output()
        .await;

    let dimensions = output.ok().and_then(|o| {
        let probe: Value = serde_json::from_slice(&o.stdout).ok()?;
        let stream = &probe["streams"][0];
        Some((stream["width"].as_u64()? as u32, stream["height"].as_u64()? as u32))
    });

    dimensions.unwrap_or_else(|| {
        tracing::warn!("Could not read video dimensions, assuming 1280x720");
        FALLBACK_ASPECT_RATIO
    })
}

fn link_card_embed(url: &str, title: &str, description: &str, thumb: Option<Value>) -> Value {
    let mut external = json!({
        "uri": url,
        "title": title,
        "description": description,
    });
    if let Some(thumb) = thumb {
        external["thumb"] = thumb;
    }
    json!({ "$type": "app.bsky.embed.external", "external": external })
}

fn video_embed(blob: Value, width: u32, height: u32) -> Value {
    json!({
        "$type": "app.bsky.embed.video",
        "video": blob,
        "aspectRatio": { "width": width, "height": height },
    })
}

fn image_embed(blob: Value, alt: &str) -> Value {
    json!({
        "$type": "app.bsky.embed.images",
        "images": [{ "alt": alt, "image": blob }],
    })
}

fn build_record(text: &str, facets: &[Facet], embed: Option<Value>, created_at: DateTime<Utc>) -> Value {
    let mut record = json!({
        "$type": POST_COLLECTION,
        "text": text,
        "createdAt": created_at.to_rfc3339_opts(SecondsFormat::Millis, true),
        "langs": ["en"],
    });
    if !facets.is_empty() {
        record["facets"] = json!(facets);
    }
    if let Some(embed) = embed {
        record["embed"] = embed;
    }
    record
}
