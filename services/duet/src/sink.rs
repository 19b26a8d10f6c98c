//! Drains the playback buffer at real-time pace, into a WAV file or nowhere.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use duet_core::sink::BufferedAudioSink;
use duet_native_utils::audio::REALTIME_API_PCM16_SAMPLE_RATE;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// One 20 ms frame at the agent's sample rate.
pub const FRAME_SAMPLES: usize = (REALTIME_API_PCM16_SAMPLE_RATE as usize) / 50;
const FRAME_PERIOD: Duration = Duration::from_millis(20);

pub fn wav_spec() -> hound::WavSpec {
    hound::WavSpec {
        channels: 1,
        sample_rate: REALTIME_API_PCM16_SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    }
}

pub struct WavRecorder {
    path: PathBuf,
    stop: oneshot::Sender<()>,
    task: JoinHandle<Result<usize>>,
}

impl WavRecorder {
    /// Starts draining `sink` into `path`, one frame every 20 ms.
    pub fn start(sink: Arc<BufferedAudioSink>, path: &Path) -> Result<Self> {
        let mut writer = hound::WavWriter::create(path, wav_spec())
            .with_context(|| format!("Failed to create WAV file: {}", path.display()))?;
        let (stop, mut stopped) = oneshot::channel();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(FRAME_PERIOD);
            let mut frame = vec![0i16; FRAME_SAMPLES];
            let mut written = 0usize;
            loop {
                tokio::select! {
                    _ = &mut stopped => break,
                    _ = ticker.tick() => {
                        let n = sink.read(&mut frame);
                        for sample in &frame[..n] {
                            writer.write_sample(*sample)?;
                        }
                        written += n;
                    }
                }
            }
            // Whatever is still queued when recording stops.
            loop {
                let n = sink.read(&mut frame);
                if n == 0 {
                    break;
                }
                for sample in &frame[..n] {
                    writer.write_sample(*sample)?;
                }
                written += n;
            }
            writer.finalize()?;
            Ok::<usize, anyhow::Error>(written)
        });

        tracing::info!("recording agent audio to {}", path.display());
        Ok(Self {
            path: path.to_path_buf(),
            stop,
            task,
        })
    }

    /// Stops recording, finalizes the file and returns the number of samples written.
    pub async fn finish(self) -> Result<usize> {
        let _ = self.stop.send(());
        let written = self.task.await.context("WAV recorder task panicked")??;
        tracing::info!(
            "wrote {} samples of agent audio to {}",
            written,
            self.path.display()
        );
        Ok(written)
    }
}

/// Consumes the playback buffer one frame every 20 ms and discards it.
///
/// Runs in place of an output device when no recording was requested, so the
/// buffer only ever holds audio that has not "played" yet.
pub struct PlaybackDrain {
    stop: oneshot::Sender<()>,
    task: JoinHandle<usize>,
}

impl PlaybackDrain {
    pub fn start(sink: Arc<BufferedAudioSink>) -> Self {
        let (stop, mut stopped) = oneshot::channel();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(FRAME_PERIOD);
            let mut frame = vec![0i16; FRAME_SAMPLES];
            let mut played = 0usize;
            loop {
                tokio::select! {
                    _ = &mut stopped => break,
                    _ = ticker.tick() => played += sink.read(&mut frame),
                }
            }
            played
        });
        tracing::debug!("no audio output configured, discarding agent audio in real time");
        Self { stop, task }
    }

    /// Stops draining and returns the number of samples consumed.
    pub async fn finish(self) -> Result<usize> {
        let _ = self.stop.send(());
        let played = self.task.await.context("playback drain task panicked")?;
        tracing::debug!("discarded {} samples of agent audio", played);
        Ok(played)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use duet_core::sink::AudioSink;
    use tempfile::tempdir;

    #[tokio::test]
    async fn queued_audio_lands_in_the_file() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("agent.wav");
        let sink = Arc::new(BufferedAudioSink::new(4096));
        sink.write(&[100, -100, 200, -200]);

        let recorder = WavRecorder::start(sink.clone(), &path)?;
        tokio::time::sleep(Duration::from_millis(60)).await;
        sink.write(&[300, -300]);
        let written = recorder.finish().await?;

        assert_eq!(written, 6);
        let mut reader = hound::WavReader::open(&path)?;
        assert_eq!(reader.spec(), wav_spec());
        let samples: Vec<i16> = reader.samples::<i16>().collect::<Result<_, _>>()?;
        assert_eq!(samples, vec![100, -100, 200, -200, 300, -300]);
        Ok(())
    }

    #[tokio::test]
    async fn paused_sink_records_nothing() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("paused.wav");
        let sink = Arc::new(BufferedAudioSink::new(64));
        sink.write(&[1, 2, 3]);
        sink.pause();

        let recorder = WavRecorder::start(sink.clone(), &path)?;
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(recorder.finish().await?, 0);
        assert_eq!(sink.queued(), 3);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn long_output_without_a_recorder_never_fills_the_buffer() -> Result<()> {
        let capacity = FRAME_SAMPLES * 4;
        let sink = Arc::new(BufferedAudioSink::new(capacity));
        let drain = PlaybackDrain::start(sink.clone());
        let frame = vec![1i16; FRAME_SAMPLES];

        // Ten seconds of agent audio, many times what the buffer holds.
        for _ in 0..500 {
            sink.write(&frame);
            assert!(sink.queued() < capacity);
            tokio::time::sleep(FRAME_PERIOD).await;
        }
        let played = drain.finish().await?;

        assert_eq!(played + sink.queued(), 500 * FRAME_SAMPLES);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn drain_leaves_a_paused_queue_alone() -> Result<()> {
        let sink = Arc::new(BufferedAudioSink::new(64));
        sink.write(&[1, 2, 3]);
        sink.pause();

        let drain = PlaybackDrain::start(sink.clone());
        tokio::time::sleep(FRAME_PERIOD * 5).await;

        assert_eq!(drain.finish().await?, 0);
        assert_eq!(sink.queued(), 3);
        Ok(())
    }

    #[test]
    fn frame_is_twenty_milliseconds() {
        assert_eq!(FRAME_SAMPLES, 480);
    }
}
