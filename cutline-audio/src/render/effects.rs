//! Audio contract at the effects-host boundary
//!
//! The renderer hands each filter block to the host as one float buffer per
//! channel (track-major: all channels of track 0, then track 1, ...). The
//! buffers are lent for the duration of the call. A host either leaves them
//! alone, edits them in place, or hands back replacement buffers; replacement
//! buffers become the renderer's property, their contents are copied back
//! into the lent buffers and the replacements are dropped.

use cutline_common::timing::Ticks;
use tracing::debug;

/// Description of one block handed to the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
    pub rate: u32,
    /// Channels per track
    pub channels: usize,
    pub tracks: usize,
    pub frames: usize,
    /// Timecode of the first frame of the block
    pub timecode: Ticks,
}

/// What the host did with the lent buffers
#[derive(Debug, Clone, PartialEq)]
pub enum Handoff {
    /// Buffers not touched
    Untouched,
    /// Buffers modified in place
    InPlace,
    /// New buffers to take over, one per lent buffer
    Replaced(Vec<Vec<f32>>),
}

/// External effects processor
pub trait EffectsHost {
    fn process(&mut self, buffers: &mut [Vec<f32>], info: &BlockInfo) -> Handoff;
}

/// Run `host` over `buffers`, taking back any replacement buffers
///
/// Returns `true` when the block content may have changed.
pub fn run_host(host: &mut dyn EffectsHost, buffers: &mut [Vec<f32>], info: &BlockInfo) -> bool {
    match host.process(buffers, info) {
        Handoff::Untouched => false,
        Handoff::InPlace => true,
        Handoff::Replaced(replacements) => {
            if replacements.len() != buffers.len() {
                debug!(
                    "Effects host returned {} buffers for {} lent",
                    replacements.len(),
                    buffers.len()
                );
            }
            for (lent, replacement) in buffers.iter_mut().zip(&replacements) {
                let n = lent.len().min(replacement.len());
                lent[..n].copy_from_slice(&replacement[..n]);
                if n < lent.len() {
                    debug!(
                        "Effects host buffer short by {} frames, padding",
                        lent.len() - n
                    );
                    lent[n..].fill(0.0);
                }
            }
            true
        }
    }
}
