//! Chat endpoints

use serde::Deserialize;
use serde_json::json;

use crate::client::PlatformClient;
use crate::errors::ClientError;
use crate::http::DispatchOptions;
use crate::session::Session;

/// Result of sending one chat message
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SentMessage {
    #[serde(default)]
    pub message_id: Option<String>,
    #[serde(default)]
    pub sent: bool,
    #[serde(default)]
    pub filtered_for_receivers: bool,
}

/// Chat operations
pub struct Chat<'a> {
    client: &'a PlatformClient,
}

impl<'a> Chat<'a> {
    pub(crate) fn new(client: &'a PlatformClient) -> Self {
        Self { client }
    }

    /// Send a message into a conversation
    ///
    /// Every send carries a structured event tracker so the platform can
    /// de-duplicate deliveries.
    pub async fn send_message(
        &self,
        session: &Session,
        conversation_id: u64,
        text: &str,
    ) -> Result<SentMessage, ClientError> {
        let url = format!("{}/v2/chat/send-message", self.client.config().api_base);
        let body = json!({
            "conversationId": conversation_id,
            "message": text,
            "tracker": self.client.tracker().next(),
        });

        self.client
            .executor()
            .execute_with_session("chat.send_message", Some(session), || async {
                self.client
                    .dispatcher()
                    .dispatch(
                        &url,
                        DispatchOptions::post().session(session).body(body.clone()),
                    )
                    .await?
                    .ensure_success()?
                    .json()
            })
            .await
    }
}
