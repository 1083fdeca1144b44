use super::*;

impl TwitchApiClient {
    /// Live streams for up to 100 broadcaster ids. Offline channels are
    /// simply absent from the response.
    pub async fn get_streams(
        &self,
        token: &Token,
        user_ids: &[String],
    ) -> Result<Vec<models::StreamInfo>, TwitchError> {
        if user_ids.is_empty() {
            return Ok(Vec::new());
        }

        let query = user_ids
            .iter()
            .take(100)
            .map(|id| format!("user_id={id}"))
            .collect::<Vec<_>>()
            .join("&");
        let url = format!("{HELIX_BASE}/streams?{query}");
        let body = self.authenticated_get(&url, token).await?;
        let resp: HelixPaginatedResponse<models::StreamInfo> = serde_json::from_str(&body)?;
        Ok(resp.data)
    }
}
