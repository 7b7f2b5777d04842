//! Batched transfer of converted samples to a plugin sink.
//!
//! Appends accumulate in one ordered text buffer; the first append after a
//! flush schedules the next flush on the runtime, so any burst of appends
//! issued before the current task yields goes out as a single transfer.
//!
//! Taking the accumulator and handing it to the transfer function happen
//! under one dispatch lock, so chunks reach the sink in append order even
//! when the scheduled flush runs on another worker thread. On such a runtime
//! a burst may go out as several consecutive chunks, which still concatenate
//! to the appended stream.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::trace;
use tokio::runtime::Handle;

use crate::models::SampleBuffer;

/// Fixed-point scale for the plugin wire format; half of full scale for headroom
pub const QUANTIZE_SCALE: f32 = 16384.0;

/// Hex characters per encoded 16-bit sample
pub const HEX_CHARS_PER_SAMPLE: usize = 4;

const HEX_DIGITS: &[u8; 16] = b"0123456789abcdef";

/// Receives each flushed chunk in order
pub type TransferFn = Arc<dyn Fn(String) + Send + Sync>;

#[derive(Debug, Default)]
struct QueueState {
    pending: String,
    pending_samples: usize,
    flush_scheduled: bool,
}

#[derive(Clone)]
pub struct OutputQueue {
    state: Arc<Mutex<QueueState>>,
    /// Held across take-and-transfer
    dispatching: Arc<Mutex<()>>,
    transfer: TransferFn,
    handle: Handle,
}

impl OutputQueue {
    pub fn new(handle: Handle, transfer: TransferFn) -> Self {
        Self {
            state: Arc::new(Mutex::new(QueueState::default())),
            dispatching: Arc::new(Mutex::new(())),
            transfer,
            handle,
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Encode `buffer` onto the pending accumulator, scheduling a flush if none is pending
    pub fn append(&self, buffer: &SampleBuffer) {
        let encoded = encode_buffer(buffer);
        if encoded.is_empty() {
            return;
        }

        let schedule = {
            let mut state = self.lock();
            state.pending.push_str(&encoded);
            state.pending_samples += buffer.total_samples();
            !std::mem::replace(&mut state.flush_scheduled, true)
        };

        if schedule {
            let queue = self.clone();
            self.handle.spawn(async move {
                queue.dispatch(true);
            });
        }
    }

    /// Hand everything pending to the transfer function now.
    ///
    /// An already scheduled flush stays scheduled and finds the accumulator
    /// empty or holding only later appends.
    pub fn flush(&self) {
        self.dispatch(false);
    }

    fn dispatch(&self, scheduled: bool) {
        let _dispatching = self.dispatching.lock().unwrap_or_else(PoisonError::into_inner);
        let (chunk, samples) = {
            let mut state = self.lock();
            if scheduled {
                state.flush_scheduled = false;
            }
            let samples = std::mem::take(&mut state.pending_samples);
            (std::mem::take(&mut state.pending), samples)
        };

        if chunk.is_empty() {
            return;
        }

        trace!("Flushing {} samples ({} bytes of hex)", samples, chunk.len());
        (self.transfer)(chunk);
    }

    /// Interleaved samples accumulated but not yet flushed
    pub fn pending_samples(&self) -> usize {
        self.lock().pending_samples
    }

    pub fn flush_scheduled(&self) -> bool {
        self.lock().flush_scheduled
    }

    /// Drop anything not yet flushed
    pub fn clear(&self) {
        let mut state = self.lock();
        state.pending.clear();
        state.pending_samples = 0;
    }
}

/// Scale a normalized float to the plugin's 16-bit range.
///
/// Truncates toward zero and saturates at the i16 limits, unlike a wrapping
/// 16-bit store: `quantize(3.0)` is `i16::MAX` rather than `-16384`. NaN
/// encodes as zero.
pub fn quantize(sample: f32) -> i16 {
    (sample * QUANTIZE_SCALE) as i16
}

/// Interleave, quantize and hex-encode a buffer in the plugin wire format
pub fn encode_buffer(buffer: &SampleBuffer) -> String {
    let mut out = String::with_capacity(buffer.total_samples() * HEX_CHARS_PER_SAMPLE);
    let frames = buffer.len();
    for i in 0..frames {
        for channel in buffer.channels() {
            push_sample(&mut out, quantize(channel[i]));
        }
    }
    out
}

/// Encoded sample count of a wire chunk
pub fn encoded_samples(chunk: &str) -> usize {
    chunk.len() / HEX_CHARS_PER_SAMPLE
}

fn push_sample(out: &mut String, sample: i16) {
    for byte in sample.to_le_bytes() {
        push_byte(out, byte);
    }
}

/// Two lowercase hex digits per byte, low nibble first
fn push_byte(out: &mut String, byte: u8) {
    out.push(HEX_DIGITS[(byte & 0x0f) as usize] as char);
    out.push(HEX_DIGITS[(byte >> 4) as usize] as char);
}
