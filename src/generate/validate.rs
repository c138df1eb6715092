use serde::Serialize;
use std::sync::Arc;

use super::{GenerationOptions, Generator, PromptTemplates};
use crate::utils::{grapheme_count, hashtag_count};

/// Hard constraints a social post must meet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PostRules {
    pub max_graphemes: usize,
    pub min_hashtags: usize,
}

impl Default for PostRules {
    fn default() -> Self {
        Self {
            max_graphemes: 290,
            min_hashtags: 2,
        }
    }
}

impl PostRules {
    fn allows(&self, graphemes: usize, hashtags: usize) -> bool {
        graphemes <= self.max_graphemes && hashtags >= self.min_hashtags
    }

    fn issues(&self, graphemes: usize, hashtags: usize) -> Vec<String> {
        let mut issues = Vec::new();
        if graphemes > self.max_graphemes {
            issues.push(format!("Too long ({}/{} characters)", graphemes, self.max_graphemes));
        }
        if hashtags < self.min_hashtags {
            issues.push(format!("Need more hashtags ({}/{} minimum)", hashtags, self.min_hashtags));
        }
        issues
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationMethod {
    Llm,
    Manual,
}

/// Outcome of validating one candidate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub accepted: bool,
    /// Guidance carried into the next attempt
    pub feedback: String,
    pub character_count: usize,
    pub hashtag_count: usize,
    pub method: ValidationMethod,
}

/// Count graphemes and `#` characters directly. Never fails.
pub fn manual_validate(text: &str, rules: &PostRules) -> Verdict {
    let character_count = grapheme_count(text);
    let hashtags = hashtag_count(text);

    let issues = rules.issues(character_count, hashtags);
    let feedback = if issues.is_empty() {
        "APPROVED".to_string()
    } else {
        format!("Manual validation failed: {}", issues.join(", "))
    };

    Verdict {
        accepted: issues.is_empty(),
        feedback,
        character_count,
        hashtag_count: hashtags,
        method: ValidationMethod::Manual,
    }
}

/// Fields read from a validator model's reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LlmReport {
    pub meets_requirements: bool,
    pub guidance: String,
    pub character_count: usize,
    pub hashtag_count: usize,
}

/// Parse a `KEY: value` validation reply.
///
/// Returns `None` for replies under 10 characters or lacking either count, which callers
/// treat as a signal to validate manually.
pub fn parse_llm_validation(response: &str) -> Option<LlmReport> {
    let response = response.trim();
    if response.chars().count() < 10 {
        return None;
    }

    let mut meets_requirements = false;
    let mut guidance = String::new();
    let mut character_count = None;
    let mut hashtag_count = None;

    for line in response.lines().map(str::trim).filter(|l| !l.is_empty()) {
        if line.contains("MEETS_REQUIREMENTS:") {
            meets_requirements = line.to_uppercase().contains("YES");
        } else if let Some(value) = value_after(line, "IMPROVEMENT_GUIDANCE:") {
            guidance = value.to_string();
        } else if let Some(value) = value_after(line, "CHARACTER_COUNT:") {
            character_count = leading_number(value);
        } else if let Some(value) = value_after(line, "HASHTAG_COUNT:") {
            hashtag_count = leading_number(value);
        }
    }

    Some(LlmReport {
        meets_requirements,
        guidance,
        character_count: character_count?,
        hashtag_count: hashtag_count?,
    })
}

fn value_after<'a>(line: &'a str, key: &str) -> Option<&'a str> {
    line.find(key).map(|at| line[at + key.len()..].trim())
}

fn leading_number(value: &str) -> Option<usize> {
    let digits: String = value
        .trim_start_matches(|c: char| !c.is_ascii_digit())
        .chars()
        .take_while(char::is_ascii_digit)
        .collect();
    digits.parse().ok()
}

/// Validates candidates with the generator, falling back to manual counting
pub struct PostValidator {
    generator: Arc<dyn Generator>,
    templates: Arc<PromptTemplates>,
    rules: PostRules,
}

impl PostValidator {
    pub fn new(generator: Arc<dyn Generator>, templates: Arc<PromptTemplates>, rules: PostRules) -> Self {
        Self {
            generator,
            templates,
            rules,
        }
    }

    pub fn rules(&self) -> &PostRules {
        &self.rules
    }

    /// Never fails: any generator or parse problem degrades to manual validation
    pub async fn validate(&self, text: &str) -> Verdict {
        let prompt = self.templates.validation(text);

        let reply = match self.generator.complete(&prompt, &GenerationOptions::VALIDATION).await {
            Ok(reply) => reply,
            Err(e) => {
                tracing::warn!("Validator call failed, validating manually: {:#}", e);
                return manual_validate(text, &self.rules);
            }
        };
        tracing::debug!("Raw validation response: {}", reply.trim());

        let Some(report) = parse_llm_validation(&reply) else {
            tracing::warn!("Could not parse validation response, validating manually");
            return manual_validate(text, &self.rules);
        };

        // the model's own counts and ours must both be within limits
        let measured = manual_validate(text, &self.rules);
        let accepted = report.meets_requirements
            && self.rules.allows(report.character_count, report.hashtag_count)
            && measured.accepted;

        let feedback = if accepted {
            "APPROVED".to_string()
        } else if report.meets_requirements || report.guidance.is_empty() {
            measured.feedback.clone()
        } else {
            report.guidance.clone()
        };

        if accepted {
            tracing::info!(
                "Validation passed ({}/{} characters, {} hashtags)",
                measured.character_count,
                self.rules.max_graphemes,
                measured.hashtag_count
            );
        } else {
            tracing::warn!(
                "Validation failed: reported {} characters / {} hashtags, measured {} / {}: {}",
                report.character_count,
                report.hashtag_count,
                measured.character_count,
                measured.hashtag_count,
                feedback
            );
        }

        Verdict {
            accepted,
            feedback,
            character_count: measured.character_count,
            hashtag_count: measured.hashtag_count,
            method: ValidationMethod::Llm,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generate::MockGenerator;

    fn validator_replying(reply: &'static str) -> PostValidator {
        let mut generator = MockGenerator::new();
        generator
            .expect_complete()
            .returning(move |_, _| Ok(reply.to_string()));
        PostValidator::new(
            Arc::new(generator),
            Arc::new(PromptTemplates::builtin()),
            PostRules::default(),
        )
    }

    #[test]
    fn test_manual_counts_graphemes_not_bytes() {
        // the family emoji is one grapheme built from several code points
        let text = format!("{} #a #b", "👨‍👩‍👧".repeat(280));
        let verdict = manual_validate(&text, &PostRules::default());
        assert_eq!(verdict.character_count, 286);
        assert!(verdict.accepted);
        assert_eq!(verdict.feedback, "APPROVED");
    }

    #[test]
    fn test_manual_reports_every_issue() {
        let verdict = manual_validate(&"x".repeat(300), &PostRules::default());
        assert!(!verdict.accepted);
        assert_eq!(
            verdict.feedback,
            "Manual validation failed: Too long (300/290 characters), Need more hashtags (0/2 minimum)"
        );
    }

    #[test]
    fn test_manual_length_bound_is_inclusive() {
        let rules = PostRules::default();

        let at_limit = format!("{} #a #b", "x".repeat(284));
        let verdict = manual_validate(&at_limit, &rules);
        assert_eq!(verdict.character_count, 290);
        assert!(verdict.accepted);

        let over_limit = format!("{} #a #b", "x".repeat(285));
        let verdict = manual_validate(&over_limit, &rules);
        assert_eq!(verdict.character_count, 291);
        assert!(!verdict.accepted);
        assert_eq!(verdict.feedback, "Manual validation failed: Too long (291/290 characters)");
    }

    #[test]
    fn test_manual_rejects_short_post_with_one_hashtag() {
        let verdict = manual_validate("Short and sweet #one", &PostRules::default());
        assert_eq!(verdict.hashtag_count, 1);
        assert!(!verdict.accepted);
        assert_eq!(verdict.feedback, "Manual validation failed: Need more hashtags (1/2 minimum)");
    }

    #[test]
    fn test_parse_full_reply() {
        let report = parse_llm_validation(
            "MEETS_REQUIREMENTS: NO\nCHARACTER_COUNT: 312 characters\nHASHTAG_COUNT: 3\nIMPROVEMENT_GUIDANCE: Shorten: cut the intro",
        )
        .unwrap();
        assert!(!report.meets_requirements);
        assert_eq!(report.character_count, 312);
        assert_eq!(report.hashtag_count, 3);
        assert_eq!(report.guidance, "Shorten: cut the intro");
    }

    #[test]
    fn test_parse_rejects_short_or_incomplete_replies() {
        assert!(parse_llm_validation("YES").is_none());
        assert!(parse_llm_validation("MEETS_REQUIREMENTS: YES\nCHARACTER_COUNT: 100").is_none());
        assert!(parse_llm_validation("MEETS_REQUIREMENTS: YES\nCHARACTER_COUNT: many\nHASHTAG_COUNT: 2").is_none());
    }

    #[tokio::test]
    async fn test_llm_approval_accepted_when_counts_agree() {
        let validator = validator_replying(
            "MEETS_REQUIREMENTS: YES\nCHARACTER_COUNT: 20\nHASHTAG_COUNT: 2\nIMPROVEMENT_GUIDANCE: APPROVED",
        );
        let verdict = validator.validate("Great talk #rust #async").await;
        assert!(verdict.accepted);
        assert_eq!(verdict.method, ValidationMethod::Llm);
    }

    #[tokio::test]
    async fn test_llm_cannot_approve_an_overlong_post() {
        let validator = validator_replying(
            "MEETS_REQUIREMENTS: YES\nCHARACTER_COUNT: 280\nHASHTAG_COUNT: 2\nIMPROVEMENT_GUIDANCE: APPROVED",
        );
        let text = format!("{} #a #b", "x".repeat(295));
        let verdict = validator.validate(&text).await;
        assert!(!verdict.accepted);
        assert!(verdict.feedback.contains("Too long"));
    }

    #[tokio::test]
    async fn test_llm_guidance_carried_on_rejection() {
        let validator = validator_replying(
            "MEETS_REQUIREMENTS: NO\nCHARACTER_COUNT: 20\nHASHTAG_COUNT: 1\nIMPROVEMENT_GUIDANCE: Add one more hashtag",
        );
        let verdict = validator.validate("Nice #one").await;
        assert!(!verdict.accepted);
        assert_eq!(verdict.feedback, "Add one more hashtag");
    }

    #[tokio::test]
    async fn test_unparseable_reply_falls_back_to_manual() {
        let validator = validator_replying("Looks fine to me!");
        let verdict = validator.validate("Nice #one #two").await;
        assert!(verdict.accepted);
        assert_eq!(verdict.method, ValidationMethod::Manual);
    }

    #[tokio::test]
    async fn test_unparseable_reply_rejects_by_manual_bounds() {
        let validator = validator_replying("garbage");

        let too_long = validator.validate(&format!("{} #a #b", "x".repeat(285))).await;
        assert!(!too_long.accepted);
        assert_eq!(too_long.method, ValidationMethod::Manual);
        assert_eq!(too_long.character_count, 291);

        let one_tag = validator.validate("Short and sweet #one").await;
        assert!(!one_tag.accepted);
        assert_eq!(one_tag.method, ValidationMethod::Manual);

        let at_limit = validator.validate(&format!("{} #a #b", "x".repeat(284))).await;
        assert!(at_limit.accepted);
        assert_eq!(at_limit.method, ValidationMethod::Manual);
    }

    #[tokio::test]
    async fn test_generator_error_falls_back_to_manual() {
        let mut generator = MockGenerator::new();
        generator
            .expect_complete()
            .returning(|_, _| Err(anyhow::anyhow!("connection refused")));
        let validator = PostValidator::new(
            Arc::new(generator),
            Arc::new(PromptTemplates::builtin()),
            PostRules::default(),
        );

        let verdict = validator.validate("no tags").await;
        assert!(!verdict.accepted);
        assert_eq!(verdict.method, ValidationMethod::Manual);
    }
}
