use anyhow::{bail, Result};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tracing::info;

/// Audio sample data (16-bit PCM, interleaved)
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Raw audio samples (i16 PCM, interleaved)
    pub samples: Vec<i16>,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Number of channels
    pub channels: u16,
    /// Timestamp in milliseconds since capture started
    pub timestamp_ms: u64,
}

/// Configuration for audio backend
#[derive(Debug, Clone)]
pub struct AudioBackendConfig {
    /// Target sample rate (transcription expects 16kHz)
    pub target_sample_rate: u32,
    /// Target channel count (1 = mono, 2 = stereo)
    pub target_channels: u16,
    /// Buffer size in milliseconds (affects latency)
    pub buffer_duration_ms: u64,
}

impl Default for AudioBackendConfig {
    fn default() -> Self {
        Self {
            target_sample_rate: 16000, // 16kHz for transcription
            target_channels: 1,        // Mono
            buffer_duration_ms: 100,   // 100ms buffers
        }
    }
}

/// Microphone capture backend
///
/// Whoever holds a started backend owns the device; `stop` releases it.
#[async_trait::async_trait]
pub trait AudioBackend: Send + Sync {
    /// Start capturing audio
    ///
    /// Returns a channel receiver that will receive audio frames
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>>;

    /// Stop capturing audio and release the device
    async fn stop(&mut self) -> Result<()>;

    /// Check if backend is currently capturing
    fn is_capturing(&self) -> bool;

    /// Get backend name for logging
    fn name(&self) -> &str;
}

/// Creates a fresh microphone backend for each capture
pub trait MicrophoneFactory: Send + Sync {
    fn create(&self, config: AudioBackendConfig) -> Result<Box<dyn AudioBackend>>;
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Microphone whose frames are captured by a remote client and pushed in
///
/// Only one capture can be live at a time; frames pushed while nothing is
/// capturing are rejected.
#[derive(Clone, Default)]
pub struct MicrophoneRelay {
    active: Arc<Mutex<Option<mpsc::Sender<AudioFrame>>>>,
}

impl MicrophoneRelay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_capturing(&self) -> bool {
        lock(&self.active).is_some()
    }

    /// Deliver a frame to the live capture
    pub async fn push(&self, frame: AudioFrame) -> Result<()> {
        let sender = lock(&self.active).clone();
        let Some(sender) = sender else {
            bail!("Microphone is not capturing");
        };
        if sender.send(frame).await.is_err() {
            bail!("Capture ended");
        }
        Ok(())
    }
}

impl MicrophoneFactory for MicrophoneRelay {
    fn create(&self, config: AudioBackendConfig) -> Result<Box<dyn AudioBackend>> {
        Ok(Box::new(RelayedMicrophone {
            relay: self.clone(),
            config,
            capturing: false,
        }))
    }
}

struct RelayedMicrophone {
    relay: MicrophoneRelay,
    config: AudioBackendConfig,
    capturing: bool,
}

// A capture abandoned without `stop` must not keep the relay busy
impl Drop for RelayedMicrophone {
    fn drop(&mut self) {
        if self.capturing {
            lock(&self.relay.active).take();
        }
    }
}

#[async_trait::async_trait]
impl AudioBackend for RelayedMicrophone {
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>> {
        let mut active = lock(&self.relay.active);
        if active.is_some() {
            bail!("Microphone is busy");
        }

        // One second of buffered frames
        let capacity = (1000 / self.config.buffer_duration_ms.max(1)).max(1) as usize;
        let (tx, rx) = mpsc::channel(capacity);
        *active = Some(tx);
        self.capturing = true;

        info!("Relayed microphone capture started");
        Ok(rx)
    }

    async fn stop(&mut self) -> Result<()> {
        if self.capturing {
            lock(&self.relay.active).take();
            self.capturing = false;
            info!("Relayed microphone capture stopped");
        }
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.capturing
    }

    fn name(&self) -> &str {
        "relayed-microphone"
    }
}
