//! Clip audio lookup
//!
//! Clip metadata lives outside the audio core; the renderer and the cache
//! worker only need to know where a clip's raw PCM file is and how it is
//! laid out.

use crate::audio::types::PcmFormat;
use std::collections::HashMap;
use std::path::PathBuf;

/// Location and layout of one clip's audio
#[derive(Debug, Clone, PartialEq)]
pub struct ClipAudio {
    pub path: PathBuf,
    pub format: PcmFormat,
}

impl ClipAudio {
    pub fn new(path: impl Into<PathBuf>, format: PcmFormat) -> Self {
        Self {
            path: path.into(),
            format,
        }
    }
}

/// Source of clip audio metadata
pub trait ClipCatalog: Send + Sync {
    /// Audio of `clip`, or `None` when the clip has no audio
    fn clip_audio(&self, clip: i32) -> Option<ClipAudio>;
}

/// In-process catalog backed by a map
#[derive(Debug, Clone, Default)]
pub struct ClipTable {
    clips: HashMap<i32, ClipAudio>,
}

impl ClipTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, clip: i32, audio: ClipAudio) -> Option<ClipAudio> {
        self.clips.insert(clip, audio)
    }

    pub fn remove(&mut self, clip: i32) -> Option<ClipAudio> {
        self.clips.remove(&clip)
    }
}

impl ClipCatalog for ClipTable {
    fn clip_audio(&self, clip: i32) -> Option<ClipAudio> {
        self.clips.get(&clip).cloned()
    }
}
