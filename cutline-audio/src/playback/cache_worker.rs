//! Double-buffered cache worker
//!
//! A background thread fills one of two [`CacheBuffer`] slots while the
//! realtime consumer reads the other. Requests go through a single-slot
//! handoff: [`CacheWorker::submit`] stores the request (replacing one that
//! has not started yet) and returns a [`FillToken`]; the consumer waits for
//! that token, then calls [`CacheWorker::wake`] to make the filled slot
//! active.
//!
//! Each slot has its own mutex held for the whole "update metadata + read +
//! convert" transaction, so a reader sees either the old or the new fill,
//! never a mix. A separate control mutex guards the active index and the
//! pending request.

use crate::audio::format::{move_d16_float, move_pcm_s16, Remap};
use crate::audio::types::PcmFormat;
use crate::config::AudioConfig;
use crate::error::{Error, IoFailure, IoOperation, Result};
use crate::render::PcmReader;
use cutline_common::timing::align_to_frame;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, warn};

/// Sample layout of converted output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheOutput {
    /// Interleaved 16-bit
    #[default]
    Int16,
    /// One float buffer per channel
    Float,
}

/// One fill request
#[derive(Debug, Clone, PartialEq)]
pub struct CacheRequest {
    /// Source file number; the worker reopens when it changes
    pub fileno: i32,
    pub path: PathBuf,
    pub format: PcmFormat,
    /// Byte offset to read from
    pub seek: u64,
    /// Source frames per output frame; negative plays backwards
    pub shrink_factor: f64,
    /// Bytes to read
    pub byte_request: usize,
    pub out_channels: usize,
    pub out_frames: usize,
    pub output: CacheOutput,
}

/// Handle for one submitted fill; tokens increase with every submit
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FillToken(u64);

impl FillToken {
    pub fn value(&self) -> u64 {
        self.0
    }
}

/// One slot of the double buffer
#[derive(Debug)]
pub struct CacheBuffer {
    fileno: i32,
    seek: u64,
    shrink_factor: f64,
    byte_request: usize,
    token: Option<FillToken>,
    is_ready: bool,
    eof: bool,
    output: CacheOutput,
    frames: usize,
    raw: Vec<u8>,
    int16: Vec<i16>,
    float: Vec<Vec<f32>>,
    // Layout of the converted buffers, compared on each fill
    channels: usize,
    sample_size: usize,
    capacity: usize,
    // Open source file
    reader: Option<PcmReader>,
    open_fileno: i32,
}

impl Default for CacheBuffer {
    fn default() -> Self {
        Self {
            fileno: -1,
            seek: 0,
            shrink_factor: 1.0,
            byte_request: 0,
            token: None,
            is_ready: false,
            eof: false,
            output: CacheOutput::Int16,
            frames: 0,
            raw: Vec::new(),
            int16: Vec::new(),
            float: Vec::new(),
            channels: 0,
            sample_size: 0,
            capacity: 0,
            reader: None,
            open_fileno: -1,
        }
    }
}

impl CacheBuffer {
    /// File number of the last fill, -1 when it could not be opened
    pub fn fileno(&self) -> i32 {
        self.fileno
    }

    pub fn seek(&self) -> u64 {
        self.seek
    }

    pub fn shrink_factor(&self) -> f64 {
        self.shrink_factor
    }

    pub fn byte_request(&self) -> usize {
        self.byte_request
    }

    pub fn token(&self) -> Option<FillToken> {
        self.token
    }

    pub fn is_ready(&self) -> bool {
        self.is_ready
    }

    /// The last read hit the end of the file
    pub fn eof(&self) -> bool {
        self.eof
    }

    pub fn output(&self) -> CacheOutput {
        self.output
    }

    /// Converted frames available
    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Interleaved 16-bit samples of the last fill
    pub fn int16(&self) -> &[i16] {
        &self.int16[..(self.frames * self.channels).min(self.int16.len())]
    }

    /// Planar float samples; empty unless the output is [`CacheOutput::Float`]
    pub fn float(&self) -> &[Vec<f32>] {
        &self.float
    }

    fn fill(&mut self, request: &CacheRequest, token: FillToken, bias: f64) -> Option<IoFailure> {
        self.is_ready = false;
        self.fileno = request.fileno;
        self.seek = request.seek;
        self.shrink_factor = request.shrink_factor;
        self.byte_request = request.byte_request;
        self.output = request.output;
        self.token = Some(token);
        self.eof = false;
        self.frames = 0;

        let failure = self.read_and_convert(request, bias);
        if failure.is_some() {
            self.reader = None;
            self.open_fileno = -1;
        }
        self.is_ready = true;
        failure
    }

    fn read_and_convert(&mut self, request: &CacheRequest, bias: f64) -> Option<IoFailure> {
        let fail = |op, e: &std::io::Error| IoFailure::new(None, &request.path, op, e);

        let reopen = match &self.reader {
            Some(reader) => self.open_fileno != request.fileno || reader.path() != request.path,
            None => true,
        };
        if reopen {
            match PcmReader::open(&request.path, request.format) {
                Ok(reader) => {
                    debug!("Cache opened {} as file {}", request.path.display(), request.fileno);
                    self.reader = Some(reader);
                    self.open_fileno = request.fileno;
                }
                Err(e) => {
                    warn!("Cache cannot open {}: {}", request.path.display(), e);
                    self.fileno = -1;
                    return Some(fail(IoOperation::Open, &e));
                }
            }
        }
        let Some(reader) = self.reader.as_mut() else {
            return None;
        };

        let frame_bytes = request.format.frame_bytes();
        let bytes = align_to_frame(request.byte_request as u64, frame_bytes) as usize;
        if self.raw.len() < bytes {
            self.raw.resize(bytes, 0);
        }
        if let Err(e) = reader.seek_to(request.seek) {
            return Some(fail(IoOperation::Seek, &e));
        }
        let read = match reader.read_up_to(&mut self.raw[..bytes]) {
            Ok(n) => n,
            Err(e) => return Some(fail(IoOperation::Read, &e)),
        };

        let mut out_frames = request.out_frames;
        if read < bytes {
            self.eof = true;
            out_frames = (out_frames as f64 * read as f64 / bytes as f64) as usize;
            debug!(
                "Cache short read on file {}: {} of {} bytes, {} frames",
                request.fileno, read, bytes, out_frames
            );
        }

        self.ensure_layout(request.out_channels, out_frames, request.output);
        let remap = Remap::new(request.out_channels, request.shrink_factor).with_bias(bias);
        self.frames = move_pcm_s16(
            &mut self.int16,
            &self.raw[..read],
            &request.format,
            out_frames,
            &remap,
        );
        if request.output == CacheOutput::Float {
            for (ch, out) in self.float.iter_mut().enumerate() {
                move_d16_float(out, &self.int16, self.frames, request.out_channels, ch, 1.0);
            }
        }
        None
    }

    /// Reallocate the converted buffers only when the layout grew or changed
    fn ensure_layout(&mut self, channels: usize, frames: usize, output: CacheOutput) {
        let sample_size = match output {
            CacheOutput::Int16 => std::mem::size_of::<i16>(),
            CacheOutput::Float => std::mem::size_of::<f32>(),
        };
        if channels == self.channels && sample_size == self.sample_size && frames <= self.capacity {
            return;
        }
        debug!(
            "Cache buffer layout {}ch x {} ({}B) -> {}ch x {} ({}B)",
            self.channels, self.capacity, self.sample_size, channels, frames, sample_size
        );
        let capacity = frames.max(self.capacity);
        self.int16 = vec![0; capacity * channels];
        self.float = match output {
            CacheOutput::Float => vec![vec![0.0; capacity]; channels],
            CacheOutput::Int16 => Vec::new(),
        };
        self.channels = channels;
        self.sample_size = sample_size;
        self.capacity = capacity;
    }
}

/// Active index and the single pending request
#[derive(Debug, Default)]
struct Control {
    active: usize,
    /// Slot written by the last completed fill
    filled: Option<usize>,
    /// Slot the worker is writing now
    filling: Option<usize>,
    pending: Option<(FillToken, CacheRequest)>,
    next_token: u64,
    last_filled: Option<FillToken>,
}

/// Shared state between the worker and its handle
struct Shared {
    slots: [Mutex<CacheBuffer>; 2],
    control: Mutex<Control>,
    /// Signals the worker: request pending or shutdown
    work: Condvar,
    /// Signals consumers: a fill completed
    done: Condvar,
    die: AtomicBool,
    failure: Mutex<Option<IoFailure>>,
    bias: f64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Handle to the cache fill thread
pub struct CacheWorker {
    shared: Arc<Shared>,
    handle: Option<JoinHandle<()>>,
    max_frames: usize,
}

impl CacheWorker {
    /// Start the fill thread
    pub fn start(config: &AudioConfig) -> Result<Self> {
        let shared = Arc::new(Shared {
            slots: [
                Mutex::new(CacheBuffer::default()),
                Mutex::new(CacheBuffer::default()),
            ],
            control: Mutex::new(Control::default()),
            work: Condvar::new(),
            done: Condvar::new(),
            die: AtomicBool::new(false),
            failure: Mutex::new(None),
            bias: config.resample.bias,
        });

        let worker_state = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name("cache-fill".to_string())
            .spawn(move || Self::worker_loop(worker_state))
            .map_err(|e| Error::Worker(format!("cannot spawn cache thread: {}", e)))?;

        info!("Cache worker started");
        Ok(Self {
            shared,
            handle: Some(handle),
            max_frames: config.cache.frames,
        })
    }

    /// Queue a fill of the inactive slot
    ///
    /// A request that has not started yet is replaced.
    pub fn submit(&self, mut request: CacheRequest) -> Result<FillToken> {
        if self.shared.die.load(Ordering::Acquire) {
            return Err(Error::Worker("cache worker is shut down".to_string()));
        }
        if request.out_frames > self.max_frames {
            debug!(
                "Cache request of {} frames clamped to {}",
                request.out_frames, self.max_frames
            );
            request.out_frames = self.max_frames;
        }

        let token = {
            let mut control = lock(&self.shared.control);
            control.next_token += 1;
            let token = FillToken(control.next_token);
            if let Some((old, _)) = control.pending.replace((token, request)) {
                debug!("Cache fill {:?} superseded by {:?}", old, token);
            }
            token
        };
        self.shared.work.notify_one();
        Ok(token)
    }

    /// Block until the fill for `token` (or a later one) has completed
    ///
    /// Returns `false` when the worker shut down first.
    pub fn wait_ready(&self, token: FillToken) -> bool {
        let mut control = lock(&self.shared.control);
        loop {
            if control.last_filled.is_some_and(|done| done >= token) {
                return true;
            }
            if self.shared.die.load(Ordering::Acquire) {
                return false;
            }
            control = self
                .shared
                .done
                .wait(control)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Make the most recently filled slot active
    ///
    /// Returns `true` when the active slot changed. A slot the worker has
    /// started refilling is never activated; wait for its token first.
    pub fn wake(&self) -> bool {
        let swapped = {
            let mut control = lock(&self.shared.control);
            match control.filled {
                Some(slot) if slot != control.active && control.filling != Some(slot) => {
                    control.active = slot;
                    true
                }
                _ => false,
            }
        };
        self.shared.work.notify_one();
        swapped
    }

    /// Lock and return the active slot
    pub fn active(&self) -> MutexGuard<'_, CacheBuffer> {
        let index = lock(&self.shared.control).active;
        lock(&self.shared.slots[index])
    }

    /// `(fileno, seek, byte_request)` of the active slot, read atomically
    pub fn metadata(&self) -> (i32, u64, usize) {
        let slot = self.active();
        (slot.fileno, slot.seek, slot.byte_request)
    }

    /// Take the last fill failure; each failure is returned once
    pub fn take_failure(&self) -> Option<IoFailure> {
        lock(&self.shared.failure).take()
    }

    /// Stop the worker and wait for it to exit
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        info!("Shutting down cache worker");
        self.shared.die.store(true, Ordering::Release);
        {
            // Waiters check `die` under the control lock
            let _control = lock(&self.shared.control);
            self.shared.work.notify_all();
            self.shared.done.notify_all();
        }
        if let Err(e) = handle.join() {
            error!("Cache worker join failed: {:?}", e);
        }
    }

    fn worker_loop(shared: Arc<Shared>) {
        debug!("Cache worker running");
        loop {
            let (token, request, slot) = {
                let mut control = lock(&shared.control);
                loop {
                    if shared.die.load(Ordering::Acquire) {
                        drop(control);
                        for slot in &shared.slots {
                            lock(slot).reader = None;
                        }
                        debug!("Cache worker exiting");
                        return;
                    }
                    if let Some((token, request)) = control.pending.take() {
                        let slot = 1 - control.active;
                        if control.filled == Some(slot) {
                            debug!("Cache fill {:?} overwrites an unclaimed fill", token);
                            control.filled = None;
                        }
                        control.filling = Some(slot);
                        break (token, request, slot);
                    }
                    control = shared
                        .work
                        .wait(control)
                        .unwrap_or_else(PoisonError::into_inner);
                }
            };

            let failure = lock(&shared.slots[slot]).fill(&request, token, shared.bias);
            if let Some(failure) = failure {
                *lock(&shared.failure) = Some(failure);
            }

            {
                let mut control = lock(&shared.control);
                control.filling = None;
                control.filled = Some(slot);
                control.last_filled = Some(token);
            }
            shared.done.notify_all();
        }
    }
}

impl Drop for CacheWorker {
    fn drop(&mut self) {
        self.stop();
    }
}
