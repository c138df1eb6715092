use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

static URL_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"https?://[-\w.]+(?::\d+)?(?:/[\w/.\-]*(?:\?[\w&=%.~\-]*)?(?:#[\w.\-]*)?)?")
        .expect("URL pattern is valid")
});

static HASHTAG_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:^|[\s.,!?;])(#[\w\x{00C0}-\x{024F}\x{1E00}-\x{1EFF}]+)").expect("hashtag pattern is valid")
});

/// Byte range of the annotated text, in UTF-8 bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ByteSlice {
    #[serde(rename = "byteStart")]
    pub byte_start: usize,
    #[serde(rename = "byteEnd")]
    pub byte_end: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "$type")]
pub enum FacetFeature {
    #[serde(rename = "app.bsky.richtext.facet#link")]
    Link { uri: String },
    #[serde(rename = "app.bsky.richtext.facet#tag")]
    Tag { tag: String },
}

/// A rich-text annotation making part of the post clickable
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Facet {
    pub index: ByteSlice,
    pub features: Vec<FacetFeature>,
}

/// Find links and hashtags in `text`.
///
/// A hashtag must start the text or follow whitespace or punctuation, and must be followed by
/// whitespace, punctuation or the end of the text.
pub fn detect_facets(text: &str) -> Vec<Facet> {
    let mut facets: Vec<Facet> = URL_PATTERN
        .find_iter(text)
        .map(|m| Facet {
            index: ByteSlice {
                byte_start: m.start(),
                byte_end: m.end(),
            },
            features: vec![FacetFeature::Link {
                uri: m.as_str().to_string(),
            }],
        })
        .collect();

    for captures in HASHTAG_PATTERN.captures_iter(text) {
        let Some(tag) = captures.get(1) else {
            continue;
        };

        let terminated = text[tag.end()..]
            .chars()
            .next()
            .map_or(true, |c| c.is_whitespace() || ".,!?;".contains(c));
        let inside_link = facets.iter().any(|f| {
            matches!(f.features[0], FacetFeature::Link { .. })
                && tag.start() >= f.index.byte_start
                && tag.start() < f.index.byte_end
        });

        if terminated && !inside_link {
            facets.push(Facet {
                index: ByteSlice {
                    byte_start: tag.start(),
                    byte_end: tag.end(),
                },
                features: vec![FacetFeature::Tag {
                    tag: tag.as_str()[1..].to_string(),
                }],
            });
        }
    }

    facets
}
