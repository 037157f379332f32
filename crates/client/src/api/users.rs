//! User information endpoints

use serde::Deserialize;

use crate::client::PlatformClient;
use crate::errors::ClientError;
use crate::http::DispatchOptions;
use crate::session::Session;

/// The account behind the current session
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticatedUser {
    pub id: u64,
    pub name: String,
    pub display_name: String,
}

/// Public details of an arbitrary user
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserDetails {
    pub id: u64,
    pub name: String,
    pub display_name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub is_banned: bool,
}

/// User lookups
pub struct Users<'a> {
    client: &'a PlatformClient,
}

impl<'a> Users<'a> {
    pub(crate) fn new(client: &'a PlatformClient) -> Self {
        Self { client }
    }

    /// Fetch the account behind the session
    pub async fn authenticated(
        &self,
        session: &Session,
    ) -> Result<AuthenticatedUser, ClientError> {
        let url = format!("{}/v1/users/authenticated", self.client.config().api_base);
        self.client
            .executor()
            .execute_with_session("users.authenticated", Some(session), || async {
                self.client
                    .dispatcher()
                    .dispatch(&url, DispatchOptions::get().session(session))
                    .await?
                    .ensure_success()?
                    .json()
            })
            .await
    }

    /// Fetch public details of a user by id
    pub async fn get(&self, session: &Session, user_id: u64) -> Result<UserDetails, ClientError> {
        let url = format!("{}/v1/users/{user_id}", self.client.config().api_base);
        self.client
            .executor()
            .execute_with_session("users.get", Some(session), || async {
                self.client
                    .dispatcher()
                    .dispatch(&url, DispatchOptions::get().session(session))
                    .await?
                    .ensure_success()?
                    .json()
            })
            .await
    }
}
