//! Test helper modules for cutline-audio integration tests
//!
//! Provides reusable test infrastructure components:
//! - PCM generation: raw 16-bit clip files with known content
//! - Fixture catalogs: clip tables over generated files

#![allow(dead_code)]

pub mod pcm_generator;

pub use pcm_generator::{ramp_mono, sine_stereo, write_pcm16, ClipFixture};
