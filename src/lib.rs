pub mod audio_naming;
pub mod error;
pub mod events;
pub mod managers;
pub mod playback;
pub mod resolve;
pub mod server;
pub mod settings;
pub mod subtitle;
pub mod voicevox;

use crate::managers::history::HistoryManager;
use crate::managers::synthesis::SynthesisOrchestrator;
use crate::playback::PlaybackQueue;
use crate::resolve::bridge::BridgeEditorApi;
use crate::resolve::client::ResolveClient;
use crate::settings::SettingsStore;
use crate::voicevox::VoicevoxClient;
use std::path::PathBuf;
use std::sync::Arc;

/// Wire up the full application state from a settings file path.
/// The editor connection monitor is not started here; callers decide
/// whether background reconnection is wanted.
pub fn build_state(settings_path: PathBuf) -> server::AppState {
    let settings = Arc::new(SettingsStore::load(settings_path));
    let history = Arc::new(HistoryManager::new(settings.clone()));
    let gateway: Arc<dyn voicevox::SynthesisApi> = Arc::new(VoicevoxClient::new(settings.clone()));
    let events = Arc::new(events::EventBroadcaster::new());
    let orchestrator = Arc::new(SynthesisOrchestrator::new(
        settings.clone(),
        history.clone(),
        gateway.clone(),
        events,
    ));
    let scripting = Arc::new(BridgeEditorApi::new(settings.clone()));
    let resolve = Arc::new(ResolveClient::new(scripting, settings.clone()));
    let playback = Arc::new(PlaybackQueue::new());

    server::AppState {
        settings,
        history,
        orchestrator,
        gateway,
        resolve,
        playback,
    }
}
