pub mod audio;
pub mod clock;
pub mod config;
pub mod context;
pub mod conversation;
pub mod error;
pub mod game;
pub mod http;
pub mod records;
pub mod services;
pub mod transport;

pub use audio::{AudioBackend, AudioBackendConfig, AudioFrame, MicrophoneFactory, MicrophoneRelay, SpeechRecorder};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use context::UserContext;
pub use conversation::{
    ConnectionStatus, ConversationConfig, ConversationSession, ConversationSnapshot, EndReason,
    EnvironmentSignal, SessionOutcome,
};
pub use error::{PracticeError, PracticeResult};
pub use game::{GamePhase, GameServices, GameSettings, GameState, GameSummary, TranslationGame};
pub use http::{create_router, AppState};
pub use records::{
    JsonFileStore, LearningSession, MemoryStore, RecordStore, SessionLedger, SessionType,
    StreakTracker, UserProgress,
};
pub use services::{EdgeFunctionClient, EdgeFunctionConfig};
pub use transport::{ClientRelayTransport, RealtimeTransport, TransportEvent};
