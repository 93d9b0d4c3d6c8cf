pub mod backend;
pub mod recorder;

pub use backend::{AudioBackend, AudioBackendConfig, AudioFrame, MicrophoneFactory, MicrophoneRelay};
pub use recorder::{encode_wav, SpeechRecorder};
