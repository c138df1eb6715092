use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// A named transformation producing exactly one artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    RawMetadata,
    Audio,
    Transcript,
    Thumbnail,
    ShortClip,
    Analysis,
    LinkedinPost,
    SocialPost,
}

/// An input a stage consumes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dependency {
    /// The raw source video
    Source,
    /// Output of another stage, which must be available
    Required(Stage),
    /// Output of another stage, used when present
    Optional(Stage),
}

impl Stage {
    /// Every stage, in topological order
    pub const ALL: [Stage; 8] = [
        Stage::RawMetadata,
        Stage::Audio,
        Stage::Transcript,
        Stage::Thumbnail,
        Stage::ShortClip,
        Stage::Analysis,
        Stage::LinkedinPost,
        Stage::SocialPost,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Stage::RawMetadata => "raw-metadata",
            Stage::Audio => "audio",
            Stage::Transcript => "transcript",
            Stage::Thumbnail => "thumbnail",
            Stage::ShortClip => "short-clip",
            Stage::Analysis => "analysis",
            Stage::LinkedinPost => "linkedin-post",
            Stage::SocialPost => "social-post",
        }
    }

    /// Suffix appended to the job's base name to form the artifact file name
    pub fn suffix(self) -> &'static str {
        match self {
            Stage::RawMetadata => ".json",
            Stage::Audio => ".wav",
            Stage::Transcript => ".txt",
            Stage::Thumbnail => ".webp",
            Stage::ShortClip => "-sm.mp4",
            Stage::Analysis => "-analysis.txt",
            Stage::LinkedinPost => "-linkedin.txt",
            Stage::SocialPost => "-bluesky.txt",
        }
    }

    pub fn filename(self, base_name: &str) -> String {
        format!("{}{}", base_name, self.suffix())
    }

    pub fn content_type(self) -> &'static str {
        match self {
            Stage::RawMetadata => "application/json",
            Stage::Audio => "audio/wav",
            Stage::Thumbnail => "image/webp",
            Stage::ShortClip => "video/mp4",
            Stage::Transcript | Stage::Analysis | Stage::LinkedinPost | Stage::SocialPost => {
                "text/plain"
            }
        }
    }

    pub fn dependencies(self) -> &'static [Dependency] {
        use Dependency::*;
        match self {
            Stage::RawMetadata => &[],
            Stage::Audio => &[Source],
            Stage::Transcript => &[Required(Stage::Audio)],
            Stage::Thumbnail => &[Required(Stage::RawMetadata)],
            Stage::ShortClip => &[Source, Required(Stage::RawMetadata), Required(Stage::Thumbnail)],
            Stage::Analysis => &[Required(Stage::Transcript)],
            Stage::LinkedinPost => &[Required(Stage::Transcript)],
            Stage::SocialPost => &[
                Required(Stage::Transcript),
                Optional(Stage::Thumbnail),
                Optional(Stage::ShortClip),
            ],
        }
    }

    /// Stages whose output this stage reads, required or optional
    pub fn upstream(self) -> impl Iterator<Item = Stage> {
        self.dependencies().iter().filter_map(|dependency| match dependency {
            Dependency::Source => None,
            Dependency::Required(stage) | Dependency::Optional(stage) => Some(*stage),
        })
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// The stages a deployment actually runs.
///
/// Disabled stages stay in the dependency graph but are neither checked nor executed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagePlan {
    enabled: BTreeSet<Stage>,
}

impl StagePlan {
    pub fn all() -> Self {
        Self {
            enabled: Stage::ALL.into_iter().collect(),
        }
    }

    pub fn without(mut self, stage: Stage) -> Self {
        self.enabled.remove(&stage);
        self
    }

    pub fn from_config(config: &crate::config::Config) -> Self {
        let plan = Self::all();
        if config.pipeline.enable_short_clip {
            plan
        } else {
            plan.without(Stage::ShortClip)
        }
    }

    pub fn is_enabled(&self, stage: Stage) -> bool {
        self.enabled.contains(&stage)
    }

    /// Enabled stages in topological order
    pub fn stages(&self) -> Vec<Stage> {
        Stage::ALL
            .into_iter()
            .filter(|stage| self.enabled.contains(stage))
            .collect()
    }
}

impl Default for StagePlan {
    fn default() -> Self {
        Self::all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_is_topologically_ordered() {
        for (position, stage) in Stage::ALL.iter().enumerate() {
            for upstream in stage.upstream() {
                let upstream_position = Stage::ALL.iter().position(|s| *s == upstream).unwrap();
                assert!(
                    upstream_position < position,
                    "{} must come before {}",
                    upstream,
                    stage
                );
            }
        }
    }

    #[test]
    fn test_filenames_are_unique_per_base_name() {
        let mut names: Vec<_> = Stage::ALL.iter().map(|s| s.filename("abc")).collect();
        names.push("abc.mp4".to_string());
        let before = names.len();
        names.sort();
        names.dedup();
        assert_eq!(before, names.len());
    }

    #[test]
    fn test_filename_mapping() {
        assert_eq!(Stage::Audio.filename("vid"), "vid.wav");
        assert_eq!(Stage::Transcript.filename("vid"), "vid.txt");
        assert_eq!(Stage::ShortClip.filename("vid"), "vid-sm.mp4");
        assert_eq!(Stage::SocialPost.filename("vid"), "vid-bluesky.txt");
    }

    #[test]
    fn test_declared_graph_edges() {
        assert_eq!(Stage::Audio.dependencies(), &[Dependency::Source]);
        assert_eq!(Stage::Transcript.upstream().collect::<Vec<_>>(), vec![Stage::Audio]);
        for stage in [Stage::Analysis, Stage::LinkedinPost, Stage::SocialPost] {
            assert!(stage.dependencies().contains(&Dependency::Required(Stage::Transcript)));
        }
        for stage in [Stage::Thumbnail, Stage::ShortClip] {
            assert!(stage.dependencies().contains(&Dependency::Required(Stage::RawMetadata)));
        }
    }

    #[test]
    fn test_plan_disables_short_clip_by_default() {
        let plan = StagePlan::from_config(&crate::config::Config::default());
        assert!(!plan.is_enabled(Stage::ShortClip));
        assert_eq!(plan.stages().len(), 7);
    }
}
