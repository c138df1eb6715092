//! Social publishing. Posts are built by the caller (text already within the platform limit,
//! media chosen by priority) and handed to a [`SocialPublisher`].

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

pub mod bluesky;
pub mod facets;
pub mod transport;

pub use bluesky::BlueskyPublisher;
pub use facets::{detect_facets, Facet};
pub use transport::{CurlTransport, FallbackTransport, ReqwestTransport, Transport, TransportError};

/// Media attached to a post
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PostMedia {
    /// Rich preview card for an external link
    LinkCard {
        url: String,
        title: String,
        description: String,
        thumb: Option<PathBuf>,
    },
    Video(PathBuf),
    Image { path: PathBuf, alt: String },
    None,
}

impl PostMedia {
    /// Pick the richest available media: link card, then video, then image, then nothing
    pub fn choose(link: Option<&str>, video: Option<&Path>, image: Option<&Path>, title: &str) -> Self {
        if let Some(url) = link {
            return PostMedia::LinkCard {
                url: url.to_string(),
                title: title.to_string(),
                description: "Watch this video on YouTube".to_string(),
                thumb: image.map(Path::to_path_buf),
            };
        }
        if let Some(video) = video {
            return PostMedia::Video(video.to_path_buf());
        }
        if let Some(image) = image {
            return PostMedia::Image {
                path: image.to_path_buf(),
                alt: format!("Thumbnail for {}", title),
            };
        }
        PostMedia::None
    }

    pub fn kind(&self) -> &'static str {
        match self {
            PostMedia::LinkCard { .. } => "link-card",
            PostMedia::Video(_) => "video",
            PostMedia::Image { .. } => "image",
            PostMedia::None => "text",
        }
    }
}

/// A post ready to publish
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostRequest {
    pub text: String,
    pub media: PostMedia,
}

/// Watch URL for a YouTube video id
pub fn youtube_watch_url(video_id: &str) -> String {
    format!("https://youtube.com/watch?v={}", video_id)
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SocialPublisher: Send + Sync {
    /// Publish a post. Never fails: returns `false` and logs on any error.
    async fn publish(&self, post: &PostRequest) -> bool;

    /// Platform text limit in graphemes; callers truncate to it beforehand
    fn text_limit(&self) -> usize;
}

/// Wraps a publisher so posts from concurrent jobs go out one at a time
pub struct SerializedPublisher {
    inner: Arc<dyn SocialPublisher>,
    lock: Mutex<()>,
}

impl SerializedPublisher {
    pub fn new(inner: Arc<dyn SocialPublisher>) -> Self {
        Self {
            inner,
            lock: Mutex::new(()),
        }
    }
}

#[async_trait]
impl SocialPublisher for SerializedPublisher {
    async fn publish(&self, post: &PostRequest) -> bool {
        let _guard = self.lock.lock().await;
        self.inner.publish(post).await
    }

    fn text_limit(&self) -> usize {
        self.inner.text_limit()
    }
}
