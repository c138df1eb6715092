use anyhow::Context;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use crate::Result;

/// Guidance rendered on the first post attempt, before any feedback exists
pub const NO_FEEDBACK: &str = "No previous feedback - create your best post.";

const DEFAULT_ANALYSIS: &str = "\
You are an expert content analyst. Analyze the following video transcription and write a \
structured report with: a concise summary, the key topics discussed, notable insights or \
quotes, and the intended audience.

Transcription:
{transcription_text}";

const DEFAULT_LINKEDIN: &str = "\
Write an engaging, professional LinkedIn post based on the following video transcription. \
Open with a strong hook, share two or three concrete takeaways, end with a question that \
invites discussion, and add three to five relevant hashtags.

Transcription:
{transcription_text}";

const DEFAULT_POST: &str = "\
Write a single Bluesky post promoting the video with id {video_id}. Hard requirements: at most \
290 characters in total, including spaces and emoji, and at least 2 hashtags. Do not include \
the video URL; it is attached as a link card. Reply with the post text only.

Feedback on the previous attempt: {improvement_guidance}

Video content:
{analysis_content}";

const DEFAULT_VALIDATION: &str = "\
Check whether this Bluesky post meets both requirements: at most 290 characters and at least \
2 hashtags. Reply using exactly these four lines:
MEETS_REQUIREMENTS: YES or NO
CHARACTER_COUNT: <number>
HASHTAG_COUNT: <number>
IMPROVEMENT_GUIDANCE: <one sentence on how to fix the post, or APPROVED>

Post:
{post_content}";

/// The four templates and their file names
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptKind {
    Analysis,
    Linkedin,
    SocialPost,
    Validation,
}

impl PromptKind {
    pub const ALL: [PromptKind; 4] = [
        PromptKind::Analysis,
        PromptKind::Linkedin,
        PromptKind::SocialPost,
        PromptKind::Validation,
    ];

    pub fn file_name(self) -> &'static str {
        match self {
            PromptKind::Analysis => "analysis-prompt.txt",
            PromptKind::Linkedin => "linkedin-prompt.txt",
            PromptKind::SocialPost => "bluesky-prompt.txt",
            PromptKind::Validation => "bluesky-validation-prompt.txt",
        }
    }

    fn default_text(self) -> &'static str {
        match self {
            PromptKind::Analysis => DEFAULT_ANALYSIS,
            PromptKind::Linkedin => DEFAULT_LINKEDIN,
            PromptKind::SocialPost => DEFAULT_POST,
            PromptKind::Validation => DEFAULT_VALIDATION,
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

/// Prompt templates, read from a directory with built-in fallbacks.
///
/// Placeholders are `{name}` tokens substituted verbatim; unknown tokens are left alone.
pub struct PromptTemplates {
    dir: Option<PathBuf>,
    templates: RwLock<[String; 4]>,
}

impl PromptTemplates {
    /// Templates using only the built-in defaults
    pub fn builtin() -> Self {
        Self {
            dir: None,
            templates: RwLock::new(PromptKind::ALL.map(|kind| kind.default_text().to_string())),
        }
    }

    /// Load templates from `dir`, falling back to defaults for missing files
    pub fn load(dir: Option<&Path>) -> Result<Self> {
        let templates = Self {
            dir: dir.map(Path::to_path_buf),
            ..Self::builtin()
        };
        templates.reload()?;
        Ok(templates)
    }

    /// Re-read every template file. A missing file keeps the built-in default; an unreadable
    /// one is an error and leaves the current templates untouched.
    pub fn reload(&self) -> Result<()> {
        let Some(dir) = &self.dir else {
            return Ok(());
        };

        let mut loaded = PromptKind::ALL.map(|kind| kind.default_text().to_string());
        for kind in PromptKind::ALL {
            let path = dir.join(kind.file_name());
            if !path.exists() {
                tracing::debug!("{} not found, using built-in prompt", path.display());
                continue;
            }
            let text = fs_err::read_to_string(&path)
                .with_context(|| format!("Failed to read prompt {}", path.display()))?;
            loaded[kind.index()] = text.trim().to_string();
            tracing::info!("Loaded {} prompt from {}", kind.file_name(), path.display());
        }

        *self.templates.write().unwrap_or_else(|p| p.into_inner()) = loaded;
        Ok(())
    }

    pub fn template(&self, kind: PromptKind) -> String {
        self.templates.read().unwrap_or_else(|p| p.into_inner())[kind.index()].clone()
    }

    pub fn analysis(&self, transcription: &str) -> String {
        fill(&self.template(PromptKind::Analysis), &[("transcription_text", transcription)])
    }

    pub fn linkedin(&self, transcription: &str) -> String {
        fill(&self.template(PromptKind::Linkedin), &[("transcription_text", transcription)])
    }

    pub fn social_post(&self, content: &str, video_id: &str, guidance: &str) -> String {
        let guidance = if guidance.trim().is_empty() { NO_FEEDBACK } else { guidance };
        fill(
            &self.template(PromptKind::SocialPost),
            &[
                ("analysis_content", content),
                ("video_id", video_id),
                ("improvement_guidance", guidance),
            ],
        )
    }

    pub fn validation(&self, post: &str) -> String {
        fill(&self.template(PromptKind::Validation), &[("post_content", post)])
    }
}

impl Default for PromptTemplates {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Substitute `{key}` tokens in one pass, so substituted text is never re-scanned
fn fill(template: &str, values: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];

        let replaced = after.find('}').and_then(|close| {
            let key = &after[..close];
            values
                .iter()
                .find(|(name, _)| *name == key)
                .map(|(_, value)| (*value, close))
        });

        match replaced {
            Some((value, close)) => {
                out.push_str(value);
                rest = &after[close + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}
