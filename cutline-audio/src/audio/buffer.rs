//! Realtime audio buffer
//!
//! An [`AudioBuffer`] is a set of arenas (planar float, or interleaved
//! 16-bit) with one write cursor owned by the producer and independent read
//! cursors for the audio and video consumers. Cursors are frame positions that
//! wrap modulo the capacity; read levels count total frames consumed so the
//! producer can tell how much room the slowest attached reader has left.
//!
//! The buffer does no locking. One producer advances `write_pos` and each
//! consumer advances only its own cursor; the handoff protocol around the
//! buffer decides who may touch it when.

use super::arena::{read_wrapped, write_wrapped};
use super::format::{f32_to_s16, s16_to_f32};
use tracing::debug;

/// Sample storage of an [`AudioBuffer`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferFormat {
    /// One f32 arena per channel
    Float,
    /// One interleaved i16 arena
    Int16,
}

/// Buffer consumer owning a read cursor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Consumer {
    Audio,
    Video,
}

impl Consumer {
    fn slot(self) -> usize {
        match self {
            Consumer::Audio => 0,
            Consumer::Video => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct ReadCursor {
    pos: usize,
    /// Total frames consumed since attach
    level: u64,
}

#[derive(Debug, Clone)]
pub struct AudioBuffer {
    channels: usize,
    sample_rate: u32,
    format: BufferFormat,
    capacity: usize,
    float_data: Vec<Vec<f32>>,
    int16_data: Vec<i16>,
    write_pos: usize,
    start_pos: usize,
    /// Total frames written since the last reset
    written: u64,
    readers: [Option<ReadCursor>; 2],
}

impl AudioBuffer {
    /// Allocate a buffer of `capacity` frames
    pub fn new(channels: usize, sample_rate: u32, capacity: usize, format: BufferFormat) -> Self {
        let mut buffer = Self {
            channels: 0,
            sample_rate,
            format,
            capacity: 0,
            float_data: Vec::new(),
            int16_data: Vec::new(),
            write_pos: 0,
            start_pos: 0,
            written: 0,
            readers: [None, None],
        };
        buffer.ensure_layout(channels, capacity);
        buffer
    }

    /// Reallocate when channel count or capacity changed
    ///
    /// Returns `true` when storage was reallocated; cursors are reset then.
    pub fn ensure_layout(&mut self, channels: usize, capacity: usize) -> bool {
        if channels == self.channels && capacity == self.capacity {
            return false;
        }
        debug!(
            "AudioBuffer layout {}ch x {} -> {}ch x {}",
            self.channels, self.capacity, channels, capacity
        );
        self.channels = channels;
        self.capacity = capacity;
        match self.format {
            BufferFormat::Float => {
                self.float_data = vec![vec![0.0; capacity]; channels];
                self.int16_data = Vec::new();
            }
            BufferFormat::Int16 => {
                self.float_data = Vec::new();
                self.int16_data = vec![0; capacity * channels];
            }
        }
        self.reset();
        true
    }

    /// Rewind every cursor; attached readers stay attached
    pub fn reset(&mut self) {
        self.write_pos = 0;
        self.start_pos = 0;
        self.written = 0;
        for reader in self.readers.iter_mut().flatten() {
            *reader = ReadCursor::default();
        }
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn set_sample_rate(&mut self, sample_rate: u32) {
        self.sample_rate = sample_rate;
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn format(&self) -> BufferFormat {
        self.format
    }

    pub fn is_interleaved(&self) -> bool {
        self.format == BufferFormat::Int16
    }

    pub fn write_pos(&self) -> usize {
        self.write_pos
    }

    /// Position where the current fill started
    pub fn start_pos(&self) -> usize {
        self.start_pos
    }

    /// Mark the current write position as the start of a new fill
    pub fn mark_start(&mut self) {
        self.start_pos = self.write_pos;
    }

    /// Frames written since the last reset
    pub fn frames_written(&self) -> u64 {
        self.written
    }

    /// Start tracking a consumer from the current write position
    pub fn attach(&mut self, consumer: Consumer) {
        self.readers[consumer.slot()] = Some(ReadCursor {
            pos: self.write_pos,
            level: self.written,
        });
    }

    pub fn detach(&mut self, consumer: Consumer) {
        self.readers[consumer.slot()] = None;
    }

    pub fn read_pos(&self, consumer: Consumer) -> Option<usize> {
        self.readers[consumer.slot()].map(|r| r.pos)
    }

    /// Frames written but not yet consumed by `consumer`
    pub fn available(&self, consumer: Consumer) -> usize {
        self.readers[consumer.slot()]
            .map(|r| (self.written - r.level) as usize)
            .unwrap_or(0)
    }

    /// Frames the producer may write without overtaking a reader
    ///
    /// With no reader attached the buffer simply fills once.
    pub fn free_space(&self) -> usize {
        let unread = self
            .readers
            .iter()
            .flatten()
            .map(|r| self.written - r.level)
            .max()
            .unwrap_or(self.written);
        self.capacity.saturating_sub(unread as usize)
    }

    /// Append planar float frames, cycling source channels
    ///
    /// Int16 buffers convert on the way in. Returns frames appended, clamped
    /// to [`free_space`](Self::free_space).
    pub fn append_float(&mut self, src: &[Vec<f32>], frames: usize) -> usize {
        if src.is_empty() || self.channels == 0 {
            return 0;
        }
        let shortest = src.iter().map(Vec::len).min().unwrap_or(0);
        let frames = self.clamp_append(frames.min(shortest));
        match self.format {
            BufferFormat::Float => {
                for (ch, arena) in self.float_data.iter_mut().enumerate() {
                    write_wrapped(arena, &src[ch % src.len()][..frames], self.write_pos);
                }
            }
            BufferFormat::Int16 => {
                let channels = self.channels;
                let interleaved: Vec<i16> = (0..frames)
                    .flat_map(|i| (0..channels).map(move |ch| f32_to_s16(src[ch % src.len()][i])))
                    .collect();
                write_wrapped(
                    &mut self.int16_data,
                    &interleaved,
                    self.write_pos * self.channels,
                );
            }
        }
        self.advance_write(frames);
        frames
    }

    /// Append silent frames
    pub fn append_silence(&mut self, frames: usize) -> usize {
        let frames = self.clamp_append(frames);
        match self.format {
            BufferFormat::Float => {
                let zeros = vec![0.0f32; frames];
                for arena in &mut self.float_data {
                    write_wrapped(arena, &zeros, self.write_pos);
                }
            }
            BufferFormat::Int16 => {
                let zeros = vec![0i16; frames * self.channels];
                write_wrapped(&mut self.int16_data, &zeros, self.write_pos * self.channels);
            }
        }
        self.advance_write(frames);
        frames
    }

    fn clamp_append(&self, frames: usize) -> usize {
        let room = self.free_space();
        if frames > room {
            debug!(
                "AudioBuffer append of {} frames clamped to free space {}",
                frames, room
            );
        }
        frames.min(room)
    }

    fn advance_write(&mut self, frames: usize) {
        if self.capacity > 0 {
            self.write_pos = (self.write_pos + frames) % self.capacity;
        }
        self.written += frames as u64;
    }

    /// Read up to `frames` planar float frames for `consumer`
    ///
    /// `dst` holds one buffer per output channel; channels cycle through
    /// the buffer's channels. Returns frames read.
    pub fn read_float(&mut self, consumer: Consumer, dst: &mut [Vec<f32>], frames: usize) -> usize {
        let Some(cursor) = self.readers[consumer.slot()] else {
            return 0;
        };
        if dst.is_empty() || self.channels == 0 {
            return 0;
        }
        let shortest = dst.iter().map(Vec::len).min().unwrap_or(0);
        let frames = frames.min(shortest).min(self.available(consumer));

        match self.format {
            BufferFormat::Float => {
                for (ch, out) in dst.iter_mut().enumerate() {
                    read_wrapped(
                        &mut out[..frames],
                        &self.float_data[ch % self.channels],
                        cursor.pos,
                    );
                }
            }
            BufferFormat::Int16 => {
                let mut interleaved = vec![0i16; frames * self.channels];
                read_wrapped(&mut interleaved, &self.int16_data, cursor.pos * self.channels);
                for (ch, out) in dst.iter_mut().enumerate() {
                    let src_ch = ch % self.channels;
                    for (i, sample) in out.iter_mut().take(frames).enumerate() {
                        *sample = s16_to_f32(interleaved[i * self.channels + src_ch]);
                    }
                }
            }
        }
        self.advance_read(consumer, frames);
        frames
    }

    /// Read up to `frames` interleaved 16-bit frames for `consumer`
    pub fn read_int16(&mut self, consumer: Consumer, dst: &mut [i16], frames: usize) -> usize {
        let Some(cursor) = self.readers[consumer.slot()] else {
            return 0;
        };
        if self.channels == 0 {
            return 0;
        }
        let frames = frames
            .min(dst.len() / self.channels)
            .min(self.available(consumer));
        let samples = frames * self.channels;

        match self.format {
            BufferFormat::Int16 => {
                read_wrapped(&mut dst[..samples], &self.int16_data, cursor.pos * self.channels);
            }
            BufferFormat::Float => {
                let mut planar = vec![0.0f32; frames];
                for ch in 0..self.channels {
                    read_wrapped(&mut planar, &self.float_data[ch], cursor.pos);
                    for (i, &v) in planar.iter().enumerate() {
                        dst[i * self.channels + ch] = f32_to_s16(v);
                    }
                }
            }
        }
        self.advance_read(consumer, frames);
        frames
    }

    fn advance_read(&mut self, consumer: Consumer, frames: usize) {
        let capacity = self.capacity;
        if let Some(reader) = self.readers[consumer.slot()].as_mut() {
            if capacity > 0 {
                reader.pos = (reader.pos + frames) % capacity;
            }
            reader.level += frames as u64;
        }
    }
}
