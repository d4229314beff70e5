use std::sync::Arc;

use tracing::warn;

use crate::{
    common::{ChannelId, CoordError, CoordResult},
    service::{MessageHandle, MessageService},
};

/// A single status line that is posted once and then edited in place.
///
/// If the initial post fails the next `update` tries to post again, so a
/// transient outage only costs the lines rendered while it lasted.
pub struct StatusMessage {
    messages: Arc<dyn MessageService>,
    channel: ChannelId,
    handle: Option<MessageHandle>,
    failures: u32,
}

impl StatusMessage {
    pub async fn post(messages: Arc<dyn MessageService>, channel: ChannelId, text: &str) -> Self {
        let mut status = Self {
            messages,
            channel,
            handle: None,
            failures: 0,
        };
        if let Err(e) = status.update(text).await {
            warn!(channel = %channel, "Failed to post status message: {}", e);
        }
        status
    }

    pub async fn update(&mut self, text: &str) -> CoordResult<()> {
        let result = match self.handle.clone() {
            Some(handle) => self.messages.edit_message(&handle, text).await,
            None => self
                .messages
                .send_message(self.channel, text)
                .await
                .map(|handle| self.handle = Some(handle)),
        };

        result.map_err(|e| {
            self.failures += 1;
            CoordError::DisplayUnavailable(e)
        })
    }

    /// `update`, with failures logged instead of returned.
    pub async fn show(&mut self, text: &str) {
        if let Err(e) = self.update(text).await {
            warn!(channel = %self.channel, "{}", e);
        }
    }

    pub fn handle(&self) -> Option<&MessageHandle> {
        self.handle.as_ref()
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }
}
