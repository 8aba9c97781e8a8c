use crate::{
    app::App,
    domain::ChannelId,
    errors::Error,
    model::{MessageDraft, MessageReference, PendingFile, QueuedMessage},
    permissions::Permissions,
    Result,
};

/// Message input state for one channel: the draft text, pending
/// attachments and an optional reply target.
#[derive(Debug, Clone)]
pub struct Composer {
    channel_id: ChannelId,
    max_attachments: usize,
    draft: MessageDraft,
}

impl Composer {
    pub fn new(channel_id: ChannelId, max_attachments: usize) -> Self {
        Self {
            channel_id,
            max_attachments,
            draft: MessageDraft::default(),
        }
    }

    pub fn for_app(app: &App, channel_id: ChannelId) -> Self {
        Self::new(channel_id, app.context().config.max_attachments)
    }

    pub fn channel_id(&self) -> ChannelId {
        self.channel_id
    }

    pub fn content(&self) -> &str {
        &self.draft.content
    }

    pub fn attachments(&self) -> &[PendingFile] {
        &self.draft.files
    }

    /// Replace the draft text. Typing into a non-empty draft counts as a keystroke.
    pub async fn set_content(&mut self, app: &App, content: impl Into<String>) {
        self.draft.content = content.into();
        if !self.draft.content.is_empty() {
            app.start_typing(self.channel_id).await;
        }
    }

    pub fn reply_to(&mut self, reference: Option<MessageReference>) {
        self.draft.message_reference = reference;
    }

    /// All-or-nothing: if the result would exceed the limit, nothing is appended.
    pub fn append_attachments(&mut self, files: Vec<PendingFile>) -> Result<()> {
        let attempted = self.draft.files.len() + files.len();
        if attempted > self.max_attachments {
            return Err(Error::TooManyAttachments {
                max: self.max_attachments,
                attempted,
            });
        }
        self.draft.files.extend(files);
        Ok(())
    }

    pub fn remove_attachment(&mut self, index: usize) -> Option<PendingFile> {
        (index < self.draft.files.len()).then(|| self.draft.files.remove(index))
    }

    /// Escape key.
    pub fn clear_attachments(&mut self) {
        self.draft.files.clear();
    }

    pub fn can_send(&self) -> bool {
        !self.draft.is_empty()
    }

    /// The attach button needs both capabilities; neither implies the other.
    pub async fn can_attach(&self, app: &App) -> bool {
        app.permissions(self.channel_id)
            .await
            .map(|p| p.contains(Permissions::SEND_MESSAGES) && p.contains(Permissions::ATTACH_FILES))
            .unwrap_or(false)
    }

    /// Stop typing and hand the draft to the app. The composer is cleared on
    /// success and left as it was if the send is refused.
    pub async fn submit(&mut self, app: &App) -> Result<QueuedMessage> {
        app.stop_typing(self.channel_id).await;

        let draft = std::mem::take(&mut self.draft);
        match app.send_message(self.channel_id, draft.clone()).await {
            Ok(queued) => Ok(queued),
            Err(e) => {
                self.draft = draft;
                Err(e)
            }
        }
    }
}
