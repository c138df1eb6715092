use anyhow::Result;
use unicode_segmentation::UnicodeSegmentation;
use url::Url;

const ELLIPSIS: &str = "...";

/// Validate a URL and return normalized version
pub fn validate_and_normalize_url(url: &str) -> Result<String> {
    let parsed = Url::parse(url)
        .map_err(|_| anyhow::anyhow!("Invalid URL format: {}", url))?;

    if !matches!(parsed.scheme(), "http" | "https") {
        anyhow::bail!("URL must use HTTP or HTTPS protocol");
    }

    Ok(parsed.to_string())
}

/// Format file size in human-readable format
pub fn format_file_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    const THRESHOLD: f64 = 1024.0;

    if bytes == 0 {
        return "0 B".to_string();
    }

    let bytes_f = bytes as f64;
    let unit_index = (bytes_f.log10() / THRESHOLD.log10()).floor() as usize;
    let unit_index = unit_index.min(UNITS.len() - 1);

    let size = bytes_f / THRESHOLD.powi(unit_index as i32);

    if unit_index == 0 {
        format!("{} {}", bytes, UNITS[unit_index])
    } else {
        format!("{:.1} {}", size, UNITS[unit_index])
    }
}

/// Format duration in human-readable format
pub fn format_duration(seconds: f64) -> String {
    let total_seconds = seconds as u64;
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let secs = total_seconds % 60;

    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, secs)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, secs)
    } else {
        format!("{}s", secs)
    }
}

/// Number of user-perceived characters (extended grapheme clusters).
///
/// Social platforms enforce their length limits in graphemes, so an emoji built from
/// several code points still counts once.
pub fn grapheme_count(text: &str) -> usize {
    text.graphemes(true).count()
}

/// Number of `#` characters, the unit both post validators use for hashtags.
pub fn hashtag_count(text: &str) -> usize {
    text.matches('#').count()
}

/// Keep at most `limit` graphemes.
pub fn take_graphemes(text: &str, limit: usize) -> &str {
    match text.grapheme_indices(true).nth(limit) {
        Some((byte_index, _)) => &text[..byte_index],
        None => text,
    }
}

/// Cut to `limit - 3` graphemes and append `...` when `text` is over `limit`.
///
/// Texts already within the limit are returned unchanged.
pub fn truncate_with_ellipsis(text: &str, limit: usize) -> String {
    if grapheme_count(text) <= limit {
        return text.to_string();
    }

    let keep = limit.saturating_sub(ELLIPSIS.len());
    format!("{}{}", take_graphemes(text, keep).trim_end(), ELLIPSIS)
}

/// Extract the video id from a YouTube watch, short or embed URL
pub fn youtube_video_id(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let host = parsed.host_str()?.trim_start_matches("www.").trim_start_matches("m.");

    let id = match host {
        "youtu.be" => parsed.path_segments()?.next().map(str::to_string),
        "youtube.com" => {
            let mut segments = parsed.path_segments()?;
            match segments.next() {
                Some("watch") => parsed
                    .query_pairs()
                    .find(|(key, _)| key == "v")
                    .map(|(_, value)| value.into_owned()),
                Some("embed") | Some("v") | Some("shorts") => segments.next().map(str::to_string),
                _ => None,
            }
        }
        _ => None,
    }?;

    let valid = !id.is_empty()
        && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    valid.then_some(id)
}

/// Whether `id` has the shape of a YouTube video id (11 URL-safe characters)
pub fn is_youtube_id(id: &str) -> bool {
    id.len() == 11 && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Check if the current environment has required tools
pub async fn check_dependencies() -> Vec<String> {
    let mut missing = Vec::new();

    if !check_command_available("ffmpeg").await {
        missing.push("ffmpeg - required for audio conversion and short clips".to_string());
    }

    if !check_command_available("ffprobe").await {
        missing.push("ffprobe - required for short clip generation".to_string());
    }

    if !check_command_available("yt-dlp").await {
        missing.push("yt-dlp - required for fetching videos and metadata".to_string());
    }

    if !check_command_available("curl").await {
        missing.push("curl - used as fallback transport for Bluesky uploads".to_string());
    }

    missing
}

/// Check if a command is available in PATH
pub async fn check_command_available(command: &str) -> bool {
    use tokio::process::Command;

    Command::new(command)
        .arg("--version")
        .output()
        .await
        .map(|output| output.status.success())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_file_size() {
        assert_eq!(format_file_size(0), "0 B");
        assert_eq!(format_file_size(512), "512 B");
        assert_eq!(format_file_size(1024), "1.0 KB");
        assert_eq!(format_file_size(1536), "1.5 KB");
        assert_eq!(format_file_size(1048576), "1.0 MB");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(30.0), "30s");
        assert_eq!(format_duration(90.0), "1m 30s");
        assert_eq!(format_duration(3661.0), "1h 1m 1s");
    }

    #[test]
    fn test_grapheme_count_treats_clusters_as_one() {
        assert_eq!(grapheme_count("hello"), 5);
        // family emoji: 7 code points joined by ZWJ
        assert_eq!(grapheme_count("👨‍👩‍👧‍👦"), 1);
        // e + combining acute
        assert_eq!(grapheme_count("e\u{301}"), 1);
        assert_eq!(grapheme_count("🇯🇵🇫🇷"), 2);
    }

    #[test]
    fn test_hashtag_count() {
        assert_eq!(hashtag_count("no tags"), 0);
        assert_eq!(hashtag_count("#rust #async and # alone"), 3);
    }

    #[test]
    fn test_is_youtube_id() {
        assert!(is_youtube_id("3MZS5gNElZM"));
        assert!(is_youtube_id("a-b_c1234XY"));
        assert!(!is_youtube_id("lecture-01"));
        assert!(!is_youtube_id("3MZS5gNElZ!"));
    }

    #[test]
    fn test_truncate_with_ellipsis() {
        assert_eq!(truncate_with_ellipsis("short", 10), "short");

        let long = "a".repeat(300);
        let truncated = truncate_with_ellipsis(&long, 290);
        assert_eq!(grapheme_count(&truncated), 290);
        assert!(truncated.ends_with("..."));

        let emoji = "🎉".repeat(10);
        let truncated = truncate_with_ellipsis(&emoji, 8);
        assert_eq!(truncated, format!("{}...", "🎉".repeat(5)));
    }

    #[test]
    fn test_take_graphemes_never_splits_a_cluster() {
        let text = "ab👨‍👩‍👧cd";
        assert_eq!(take_graphemes(text, 3), "ab👨‍👩‍👧");
        assert_eq!(take_graphemes(text, 10), text);
    }

    #[test]
    fn test_youtube_video_id() {
        assert_eq!(
            youtube_video_id("https://www.youtube.com/watch?v=3MZS5gNElZM"),
            Some("3MZS5gNElZM".to_string())
        );
        assert_eq!(
            youtube_video_id("https://youtu.be/abc_DEF-123"),
            Some("abc_DEF-123".to_string())
        );
        assert_eq!(
            youtube_video_id("https://youtube.com/embed/xyz"),
            Some("xyz".to_string())
        );
        assert_eq!(youtube_video_id("https://example.com/watch?v=nope"), None);
        assert_eq!(youtube_video_id("not a url"), None);
    }

    #[test]
    fn test_validate_and_normalize_url() {
        assert!(validate_and_normalize_url("https://example.com").is_ok());
        assert!(validate_and_normalize_url("http://example.com").is_ok());
        assert!(validate_and_normalize_url("ftp://example.com").is_err());
        assert!(validate_and_normalize_url("not-a-url").is_err());
    }
}
