use crate::audio::MicrophoneRelay;
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::context::UserContext;
use crate::conversation::ConversationSession;
use crate::game::{GameServices, TranslationGame};
use crate::records::{JsonFileStore, RecordStore, SessionLedger, StreakTracker};
use crate::services::EdgeFunctionClient;
use crate::transport::ClientRelayTransport;
use anyhow::Result;
use std::sync::Arc;

/// Shared application state for HTTP handlers
#[derive(Clone)]
pub struct AppState {
    /// Learner this instance acts for
    pub user: UserContext,

    pub conversation: ConversationSession,

    /// Browser-side media stack (directive out, events and stats in)
    pub transport: Arc<ClientRelayTransport>,

    pub game: TranslationGame,

    /// Microphone frames posted by the browser during answer capture
    pub microphone: MicrophoneRelay,

    pub store: Arc<dyn RecordStore>,
}

impl AppState {
    pub fn new(
        user: UserContext,
        conversation: ConversationSession,
        transport: Arc<ClientRelayTransport>,
        game: TranslationGame,
        microphone: MicrophoneRelay,
        store: Arc<dyn RecordStore>,
    ) -> Self {
        Self {
            user,
            conversation,
            transport,
            game,
            microphone,
            store,
        }
    }

    /// Wire both orchestrators against the JSON store and backend functions
    pub async fn from_config(cfg: &Config) -> Result<Self> {
        let user = cfg.user();
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        let store: Arc<dyn RecordStore> = Arc::new(JsonFileStore::open(&cfg.store.path).await?);
        let tracker = Arc::new(StreakTracker::new(store.clone()));
        let ledger = SessionLedger::new(store.clone(), tracker);

        let backend = Arc::new(EdgeFunctionClient::new(cfg.edge_functions())?);
        let transport = Arc::new(ClientRelayTransport::new());
        let microphone = MicrophoneRelay::new();

        let conversation = ConversationSession::new(
            cfg.conversation_config()?,
            user.clone(),
            backend.clone(),
            transport.clone(),
            transport.clone(),
            ledger.clone(),
            clock.clone(),
        );

        let services = GameServices {
            generator: backend.clone(),
            transcriber: backend.clone(),
            evaluator: backend.clone(),
            synthesizer: Some(backend),
            microphone: Arc::new(microphone.clone()),
        };
        let game = TranslationGame::new(cfg.game_settings(), user.clone(), services, ledger, clock);

        Ok(Self::new(user, conversation, transport, game, microphone, store))
    }
}
