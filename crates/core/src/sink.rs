//! The local playback sink shared by the agent adapter (which writes audio
//! into it) and the turn-taking logic (which mutes and pauses it).

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Result, anyhow};
use duet_native_utils::audio::shared_buffer;
use ringbuf::HeapRb;
use ringbuf::traits::{Consumer, Observer, Producer};

#[cfg(test)]
use mockall::automock;

#[cfg_attr(test, automock)]
pub trait AudioSink: Send + Sync {
    fn set_muted(&self, muted: bool);

    fn pause(&self);

    fn play(&self) -> Result<()>;

    /// Queues decoded PCM16 samples for playback.
    fn write(&self, samples: &[i16]);

    /// Drops everything queued but not yet played.
    fn flush(&self);
}

/// Applies the playback flag to the sink as one paired step: mute+pause when
/// disabled, unmute+play when enabled. Pausing first keeps a residual blip from
/// leaking out before the mute lands.
pub fn apply_playback(sink: &dyn AudioSink, enabled: bool) -> Result<()> {
    if enabled {
        sink.set_muted(false);
        sink.play()
    } else {
        sink.pause();
        sink.set_muted(true);
        Ok(())
    }
}

/// Ring-buffered sink drained by an output device or file writer.
///
/// While paused, [`BufferedAudioSink::read`] yields nothing and the queue is kept.
/// While muted, queued samples are consumed but read back as silence.
pub struct BufferedAudioSink {
    buffer: Mutex<HeapRb<i16>>,
    muted: AtomicBool,
    paused: AtomicBool,
}

impl BufferedAudioSink {
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: Mutex::new(shared_buffer(capacity)),
            muted: AtomicBool::new(false),
            paused: AtomicBool::new(false),
        }
    }

    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::SeqCst)
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn queued(&self) -> usize {
        self.buffer.lock().map(|b| b.occupied_len()).unwrap_or(0)
    }

    /// Fills `out` with up to `out.len()` samples and returns how many were written.
    pub fn read(&self, out: &mut [i16]) -> usize {
        if self.is_paused() {
            return 0;
        }
        let Ok(mut buffer) = self.buffer.lock() else {
            return 0;
        };
        let n = buffer.pop_slice(out);
        if self.is_muted() {
            out[..n].fill(0);
        }
        n
    }
}

impl AudioSink for BufferedAudioSink {
    fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::SeqCst);
    }

    fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    fn play(&self) -> Result<()> {
        if self.buffer.is_poisoned() {
            return Err(anyhow!("playback buffer poisoned"));
        }
        self.paused.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn write(&self, samples: &[i16]) {
        let Ok(mut buffer) = self.buffer.lock() else {
            return;
        };
        let pushed = buffer.push_slice(samples);
        if pushed < samples.len() {
            tracing::warn!(
                "playback buffer full, dropped {} samples",
                samples.len() - pushed
            );
        }
    }

    fn flush(&self) {
        if let Ok(mut buffer) = self.buffer.lock() {
            let dropped = buffer.clear();
            tracing::debug!("flushed {} queued samples", dropped);
        }
    }
}
