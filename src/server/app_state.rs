use std::sync::Arc;

use crate::{configs::Config, service::LocalVoice, stick::Coordinator};

/// Top-level application state.
pub struct AppState {
    pub coordinator: Coordinator,
    /// Backs both collaborator traits of `coordinator`; routes use it
    /// directly for membership changes and message reads.
    pub voice: Arc<LocalVoice>,
    pub config: Config,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let voice = Arc::new(LocalVoice::new());
        let coordinator =
            Coordinator::new(voice.clone(), voice.clone(), config.stick.clone());
        Self {
            coordinator,
            voice,
            config,
        }
    }
}
