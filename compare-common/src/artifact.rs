use std::fmt;

/// Which of the two compared renditions a step is working on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileRole {
    Source,
    Clean,
}

impl FileRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileRole::Source => "source",
            FileRole::Clean => "clean",
        }
    }

    /// The metadata artifact produced for this file.
    pub fn meta_artifact(&self) -> ArtifactRole {
        match self {
            FileRole::Source => ArtifactRole::SourceMeta,
            FileRole::Clean => ArtifactRole::CleanMeta,
        }
    }
}

impl fmt::Display for FileRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Derived artifacts persisted per comparison.
///
/// Keys depend only on the file id and the role, so reprocessing a file id
/// overwrites the previous artifacts instead of adding new ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactRole {
    SourceMeta,
    CleanMeta,
    Diff,
}

impl ArtifactRole {
    pub const EXTENSION: &'static str = ".txt";

    pub fn suffix(&self) -> &'static str {
        // "mete" is the spelling downstream consumers already look for.
        match self {
            ArtifactRole::SourceMeta => "source-mete",
            ArtifactRole::CleanMeta => "clean-mete",
            ArtifactRole::Diff => "diff",
        }
    }

    pub fn object_key(&self, file_id: &str) -> String {
        format!("{}-{}{}", file_id, self.suffix(), Self::EXTENSION)
    }
}
