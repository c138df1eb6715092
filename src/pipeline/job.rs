use serde::Serialize;

use super::Stage;
use crate::storage::split_path;

/// One unit of work: a source video and the namespace its artifacts live in
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VideoJob {
    /// Opaque key identifying the video (the file stem)
    pub video_id: String,

    /// Storage folder holding the source and every derived artifact
    pub folder: String,

    /// Stem every artifact name is built from
    pub base_name: String,

    /// File name of the source video
    pub source_file: String,
}

impl VideoJob {
    /// Build a job from a `folder/name.ext` store path
    pub fn from_path(path: &str) -> Self {
        let (folder, source_file) = split_path(path);
        let base_name = match source_file.rsplit_once('.') {
            Some((stem, _)) if !stem.is_empty() => stem.to_string(),
            _ => source_file.clone(),
        };

        Self {
            video_id: base_name.clone(),
            folder,
            base_name,
            source_file,
        }
    }

    /// Whether the source file carries `extension` (case-insensitive, without dot)
    pub fn has_extension(&self, extension: &str) -> bool {
        self.source_file
            .rsplit_once('.')
            .map(|(_, ext)| ext.eq_ignore_ascii_case(extension))
            .unwrap_or(false)
    }

    pub fn stage_filename(&self, stage: Stage) -> String {
        stage.filename(&self.base_name)
    }

    /// Full store path of the source, for logs
    pub fn source_path(&self) -> String {
        crate::storage::object_key(&self.folder, &self.source_file)
    }
}

impl std::fmt::Display for VideoJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.source_path())
    }
}
