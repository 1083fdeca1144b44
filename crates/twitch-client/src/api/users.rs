use super::*;

impl TwitchApiClient {
    /// Get user profile by user ID.
    pub async fn get_user(&self, token: &Token, user_id: &str) -> Result<models::TwitchUser, TwitchError> {
        let url = format!("{HELIX_BASE}/users?id={user_id}");
        let body = self.authenticated_get(&url, token).await?;
        let resp: HelixResponse<models::TwitchUser> = serde_json::from_str(&body)?;

        resp.data
            .into_iter()
            .next()
            .ok_or_else(|| TwitchError::ApiError {
                status: 404,
                message: "User not found".into(),
            })
    }

    /// Get user profile by login name.
    pub async fn get_user_by_login(
        &self,
        token: &Token,
        login: &str,
    ) -> Result<models::TwitchUser, TwitchError> {
        let url = format!("{HELIX_BASE}/users?login={login}");
        let body = self.authenticated_get(&url, token).await?;
        let resp: HelixResponse<models::TwitchUser> = serde_json::from_str(&body)?;

        resp.data
            .into_iter()
            .next()
            .ok_or_else(|| TwitchError::ApiError {
                status: 404,
                message: "User not found".into(),
            })
    }
}
