use std::sync::Arc;

use super::{GenerationOptions, Generator, PostValidator, PromptTemplates};
use crate::utils::{grapheme_count, hashtag_count, truncate_with_ellipsis};
use crate::{PipelineError, Result};

/// The single candidate under consideration; earlier ones are dropped
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostCandidate {
    pub text: String,
    pub iteration: u32,
    pub character_count: usize,
    pub hashtag_count: usize,
}

impl PostCandidate {
    fn new(text: String, iteration: u32) -> Self {
        Self {
            character_count: grapheme_count(&text),
            hashtag_count: hashtag_count(&text),
            text,
            iteration,
        }
    }
}

/// Result of the generation loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedPost {
    pub text: String,
    /// Attempts made, 1-based
    pub iterations: u32,
    /// `false` when the budget ran out and the last candidate was force-accepted
    pub accepted: bool,
}

/// Generates a social post and refines it with validator feedback until it passes or the
/// iteration budget is spent.
///
/// Exhausting the budget is not an error: the last candidate is truncated to the length limit
/// and returned with `accepted == false`, even if it still lacks hashtags.
pub struct PostGenerator {
    generator: Arc<dyn Generator>,
    validator: PostValidator,
    templates: Arc<PromptTemplates>,
    max_iterations: u32,
}

impl PostGenerator {
    pub fn new(
        generator: Arc<dyn Generator>,
        validator: PostValidator,
        templates: Arc<PromptTemplates>,
        max_iterations: u32,
    ) -> Self {
        Self {
            generator,
            validator,
            templates,
            max_iterations: max_iterations.max(1),
        }
    }

    pub fn model_name(&self) -> String {
        self.generator.model_name()
    }

    pub async fn generate_validated_post(&self, subject_id: &str, source: &str) -> Result<ValidatedPost> {
        if source.trim().is_empty() {
            return Err(PipelineError::Generation(format!("no source content for {}", subject_id)).into());
        }

        let limit = self.validator.rules().max_graphemes;
        let mut feedback = String::new();
        let mut current: Option<PostCandidate> = None;
        let mut last_error = None;

        for iteration in 1..=self.max_iterations {
            tracing::info!(iteration, "Post generation attempt {}/{}", iteration, self.max_iterations);

            let prompt = self.templates.social_post(source, subject_id, &feedback);
            let text = match self.generator.complete(&prompt, &GenerationOptions::SOCIAL_POST).await {
                Ok(text) => text.trim().to_string(),
                Err(e) => {
                    tracing::warn!(iteration, "Generation failed: {:#}", e);
                    last_error = Some(e);
                    continue;
                }
            };

            let candidate = PostCandidate::new(text, iteration);
            tracing::info!(
                iteration,
                "Candidate: {} characters, {} hashtags",
                candidate.character_count,
                candidate.hashtag_count
            );

            let verdict = self.validator.validate(&candidate.text).await;
            if verdict.accepted {
                tracing::info!(iteration, "Post approved on attempt {}", iteration);
                return Ok(ValidatedPost {
                    text: candidate.text,
                    iterations: iteration,
                    accepted: true,
                });
            }

            tracing::warn!(iteration, "Attempt {} failed validation: {}", iteration, verdict.feedback);
            feedback = verdict.feedback;
            current = Some(candidate);
        }

        match current {
            Some(candidate) => {
                tracing::warn!(
                    "Iteration budget of {} spent, using the last candidate",
                    self.max_iterations
                );
                let text = truncate_with_ellipsis(&candidate.text, limit);
                if text != candidate.text {
                    tracing::info!("Truncated post to {} characters", grapheme_count(&text));
                }
                Ok(ValidatedPost {
                    text,
                    iterations: self.max_iterations,
                    accepted: false,
                })
            }
            None => {
                let reason = last_error
                    .map(|e| format!("{:#}", e))
                    .unwrap_or_else(|| "no candidate produced".to_string());
                Err(PipelineError::Generation(format!(
                    "all {} attempts failed for {}: {}",
                    self.max_iterations, subject_id, reason
                ))
                .into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generate::{MockGenerator, PostRules};
    use mockall::predicate::function;
    use mockall::Sequence;

    const APPROVE: &str = "MEETS_REQUIREMENTS: YES\nCHARACTER_COUNT: 30\nHASHTAG_COUNT: 2\nIMPROVEMENT_GUIDANCE: APPROVED";
    const REJECT: &str = "MEETS_REQUIREMENTS: NO\nCHARACTER_COUNT: 400\nHASHTAG_COUNT: 0\nIMPROVEMENT_GUIDANCE: Make it shorter";

    fn is_validation(prompt: &str) -> bool {
        prompt.contains("MEETS_REQUIREMENTS")
    }

    fn post_generator(generator: MockGenerator, max_iterations: u32) -> PostGenerator {
        let generator: Arc<dyn Generator> = Arc::new(generator);
        let templates = Arc::new(PromptTemplates::builtin());
        let validator = PostValidator::new(generator.clone(), templates.clone(), PostRules::default());
        PostGenerator::new(generator, validator, templates, max_iterations)
    }

    #[tokio::test]
    async fn test_first_valid_candidate_is_returned_after_one_cycle() {
        let mut generator = MockGenerator::new();
        generator
            .expect_complete()
            .with(function(|p: &str| !is_validation(p)), mockall::predicate::always())
            .times(1)
            .returning(|_, _| Ok("  Short and sweet #rust #tokio \n".to_string()));
        generator
            .expect_complete()
            .with(function(|p: &str| is_validation(p)), mockall::predicate::always())
            .times(1)
            .returning(|_, _| Ok(APPROVE.to_string()));

        let post = post_generator(generator, 5)
            .generate_validated_post("vid", "transcript text")
            .await
            .unwrap();

        assert_eq!(post.text, "Short and sweet #rust #tokio");
        assert_eq!(post.iterations, 1);
        assert!(post.accepted);
    }

    #[tokio::test]
    async fn test_feedback_reaches_the_next_prompt() {
        let mut generator = MockGenerator::new();
        let mut seq = Sequence::new();
        generator
            .expect_complete()
            .times(1)
            .in_sequence(&mut seq)
            .withf(|p, _| !is_validation(p) && p.contains(crate::generate::prompts::NO_FEEDBACK))
            .returning(|_, _| Ok("first draft without tags".to_string()));
        generator
            .expect_complete()
            .times(1)
            .in_sequence(&mut seq)
            .withf(|p, _| is_validation(p) && p.contains("first draft without tags"))
            .returning(|_, _| Ok(REJECT.to_string()));
        generator
            .expect_complete()
            .times(1)
            .in_sequence(&mut seq)
            .withf(|p, _| !is_validation(p) && p.contains("Make it shorter"))
            .returning(|_, _| Ok("Better #one #two".to_string()));
        generator
            .expect_complete()
            .times(1)
            .in_sequence(&mut seq)
            .withf(|p, _| is_validation(p) && p.contains("Better #one #two"))
            .returning(|_, _| Ok(APPROVE.to_string()));

        let post = post_generator(generator, 5)
            .generate_validated_post("vid", "content")
            .await
            .unwrap();

        assert_eq!(post.text, "Better #one #two");
        assert_eq!(post.iterations, 2);
        assert!(post.accepted);
    }

    #[tokio::test]
    async fn test_budget_exhaustion_truncates_last_candidate() {
        let long = format!("{} #a", "word ".repeat(100));
        let mut generator = MockGenerator::new();
        let draft = long.clone();
        generator
            .expect_complete()
            .with(function(|p: &str| !is_validation(p)), mockall::predicate::always())
            .times(5)
            .returning(move |_, _| Ok(draft.clone()));
        generator
            .expect_complete()
            .with(function(|p: &str| is_validation(p)), mockall::predicate::always())
            .times(5)
            .returning(|_, _| Ok(REJECT.to_string()));

        let post = post_generator(generator, 5)
            .generate_validated_post("vid", "content")
            .await
            .unwrap();

        assert!(!post.accepted);
        assert_eq!(post.iterations, 5);
        assert!(grapheme_count(&post.text) <= 290);
        assert!(post.text.ends_with("..."));
        assert!(long.starts_with(post.text.trim_end_matches("...")));
    }

    #[tokio::test]
    async fn test_exhausted_short_post_is_returned_unchanged() {
        let mut generator = MockGenerator::new();
        generator
            .expect_complete()
            .with(function(|p: &str| !is_validation(p)), mockall::predicate::always())
            .times(2)
            .returning(|_, _| Ok("No hashtags here".to_string()));
        generator
            .expect_complete()
            .with(function(|p: &str| is_validation(p)), mockall::predicate::always())
            .times(2)
            .returning(|_, _| Ok("?".to_string()));

        let post = post_generator(generator, 2)
            .generate_validated_post("vid", "content")
            .await
            .unwrap();

        assert_eq!(post.text, "No hashtags here");
        assert!(!post.accepted);
    }

    #[tokio::test]
    async fn test_transient_generation_error_is_retried() {
        let mut generator = MockGenerator::new();
        let mut attempts = 0;
        generator
            .expect_complete()
            .with(function(|p: &str| !is_validation(p)), mockall::predicate::always())
            .times(2)
            .returning(move |_, _| {
                attempts += 1;
                if attempts == 1 {
                    Err(anyhow::anyhow!("rate limited"))
                } else {
                    Ok("Recovered #a #b".to_string())
                }
            });
        generator
            .expect_complete()
            .with(function(|p: &str| is_validation(p)), mockall::predicate::always())
            .times(1)
            .returning(|_, _| Ok(APPROVE.to_string()));

        let post = post_generator(generator, 3)
            .generate_validated_post("vid", "content")
            .await
            .unwrap();

        assert_eq!(post.iterations, 2);
        assert!(post.accepted);
    }

    #[tokio::test]
    async fn test_every_attempt_failing_is_an_error() {
        let mut generator = MockGenerator::new();
        generator
            .expect_complete()
            .times(3)
            .returning(|_, _| Err(anyhow::anyhow!("service unavailable")));

        let err = post_generator(generator, 3)
            .generate_validated_post("vid", "content")
            .await
            .unwrap_err();

        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::Generation(msg)) if msg.contains("service unavailable")
        ));
    }

    #[tokio::test]
    async fn test_empty_source_is_rejected_without_generating() {
        let generator = MockGenerator::new();
        assert!(post_generator(generator, 5)
            .generate_validated_post("vid", "   ")
            .await
            .is_err());
    }
}
