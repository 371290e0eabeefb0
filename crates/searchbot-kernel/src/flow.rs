use std::fmt;

/// Named multi-step interaction a user is in. The set is open: names this
/// build does not know survive as `Other` and are handled by the default path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Flow {
    ConnectPlatform,
    Connecting,
    UploadFile,
    RefineSearch,
    Other(String),
}

impl Flow {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "connect_platform" => Flow::ConnectPlatform,
            "connecting" => Flow::Connecting,
            "upload_file" => Flow::UploadFile,
            "refine_search" => Flow::RefineSearch,
            other => Flow::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Flow::ConnectPlatform => "connect_platform",
            Flow::Connecting => "connecting",
            Flow::UploadFile => "upload_file",
            Flow::RefineSearch => "refine_search",
            Flow::Other(name) => name.as_str(),
        }
    }
}

impl fmt::Display for Flow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
