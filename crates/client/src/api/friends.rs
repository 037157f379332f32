//! Friendship endpoints

use crate::client::PlatformClient;
use crate::errors::ClientError;
use crate::http::DispatchOptions;
use crate::session::Session;

/// Friendship operations
pub struct Friends<'a> {
    client: &'a PlatformClient,
}

impl<'a> Friends<'a> {
    pub(crate) fn new(client: &'a PlatformClient) -> Self {
        Self { client }
    }

    /// Send a friend request
    pub async fn send_request(&self, session: &Session, user_id: u64) -> Result<(), ClientError> {
        self.post(session, user_id, "request-friendship", "friends.send_request").await
    }

    /// Accept a pending friend request
    pub async fn accept_request(
        &self,
        session: &Session,
        user_id: u64,
    ) -> Result<(), ClientError> {
        self.post(session, user_id, "accept-friendship", "friends.accept_request").await
    }

    /// Decline a pending friend request
    pub async fn decline_request(
        &self,
        session: &Session,
        user_id: u64,
    ) -> Result<(), ClientError> {
        self.post(session, user_id, "decline-friendship", "friends.decline_request").await
    }

    /// Remove an existing friend
    pub async fn unfriend(&self, session: &Session, user_id: u64) -> Result<(), ClientError> {
        self.post(session, user_id, "unfriend", "friends.unfriend").await
    }

    async fn post(
        &self,
        session: &Session,
        user_id: u64,
        action: &str,
        name: &str,
    ) -> Result<(), ClientError> {
        let url = format!("{}/v1/users/{user_id}/{action}", self.client.config().api_base);
        self.client
            .executor()
            .execute_with_session(name, Some(session), || async {
                self.client
                    .dispatcher()
                    .dispatch(&url, DispatchOptions::post().session(session))
                    .await?
                    .ensure_success()
                    .map(|_| ())
            })
            .await
    }
}
