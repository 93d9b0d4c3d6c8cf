use super::backend::{AudioBackend, AudioFrame};
use crate::services::AudioPayload;
use anyhow::{bail, Context, Result};
use std::io::Cursor;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Captures one spoken answer from a microphone backend
///
/// `finish` freezes the capture and returns it as a WAV payload;
/// `discard` throws it away. Both release the device.
pub struct SpeechRecorder {
    backend: Box<dyn AudioBackend>,
    stop_tx: Option<oneshot::Sender<()>>,
    collector: Option<JoinHandle<Vec<AudioFrame>>>,
}

impl SpeechRecorder {
    /// Acquire the microphone and start collecting frames
    pub async fn start(mut backend: Box<dyn AudioBackend>) -> Result<Self> {
        let audio_rx = backend
            .start()
            .await
            .with_context(|| format!("Failed to start {}", backend.name()))?;

        let (stop_tx, stop_rx) = oneshot::channel();
        let collector = tokio::spawn(collect_frames(audio_rx, stop_rx));

        info!("Speech capture started ({})", backend.name());

        Ok(Self {
            backend,
            stop_tx: Some(stop_tx),
            collector: Some(collector),
        })
    }

    /// Stop capturing and encode what was heard
    pub async fn finish(mut self) -> Result<AudioPayload> {
        let frames = self.halt().await?;
        let payload = encode_wav(&frames)?;

        info!(
            "Speech capture finished: {} frames, {} bytes",
            frames.len(),
            payload.bytes.len()
        );

        Ok(payload)
    }

    /// Stop capturing and drop the recording
    pub async fn discard(mut self) {
        if let Some(collector) = self.collector.take() {
            collector.abort();
        }
        if let Err(e) = self.backend.stop().await {
            warn!("Failed to stop {}: {:#}", self.backend.name(), e);
        }
    }

    async fn halt(&mut self) -> Result<Vec<AudioFrame>> {
        if let Some(stop) = self.stop_tx.take() {
            let _ = stop.send(());
        }

        let stopped = self.backend.stop().await;

        let frames = match self.collector.take() {
            Some(collector) => collector.await.context("Capture task panicked")?,
            None => Vec::new(),
        };

        stopped.with_context(|| format!("Failed to stop {}", self.backend.name()))?;
        Ok(frames)
    }
}

async fn collect_frames(
    mut audio_rx: mpsc::Receiver<AudioFrame>,
    mut stop_rx: oneshot::Receiver<()>,
) -> Vec<AudioFrame> {
    let mut frames = Vec::new();

    loop {
        tokio::select! {
            frame = audio_rx.recv() => match frame {
                Some(frame) => frames.push(frame),
                None => break,
            },
            _ = &mut stop_rx => {
                // Keep whatever was already delivered
                while let Ok(frame) = audio_rx.try_recv() {
                    frames.push(frame);
                }
                break;
            }
        }
    }

    frames
}

/// Encode frames as 16-bit PCM WAV; no frames gives an empty payload
///
/// Every frame must share the first frame's non-zero format.
pub fn encode_wav(frames: &[AudioFrame]) -> Result<AudioPayload> {
    let Some(first) = frames.first() else {
        return Ok(AudioPayload {
            bytes: Vec::new(),
            mime_type: "audio/wav".to_string(),
        });
    };

    if first.channels == 0 || first.sample_rate == 0 {
        bail!(
            "Invalid audio format: {} channels at {} Hz",
            first.channels,
            first.sample_rate
        );
    }
    for frame in frames {
        if frame.channels != first.channels || frame.sample_rate != first.sample_rate {
            bail!(
                "Mixed audio formats: {} channels at {} Hz after {} channels at {} Hz",
                frame.channels,
                frame.sample_rate,
                first.channels,
                first.sample_rate
            );
        }
        if frame.samples.len() % usize::from(frame.channels) != 0 {
            bail!(
                "Frame at {} ms holds a partial {}-channel sample",
                frame.timestamp_ms,
                frame.channels
            );
        }
    }

    let spec = hound::WavSpec {
        channels: first.channels,
        sample_rate: first.sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).context("Failed to create WAV writer")?;
        for frame in frames {
            for &sample in &frame.samples {
                writer
                    .write_sample(sample)
                    .context("Failed to write sample to WAV")?;
            }
        }
        writer.finalize().context("Failed to finalize WAV")?;
    }

    Ok(AudioPayload {
        bytes: cursor.into_inner(),
        mime_type: "audio/wav".to_string(),
    })
}
