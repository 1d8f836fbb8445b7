use atlas_client::{ClientOpts, NetworkClient};
use atlas_core::AccountId;
use atlas_engine::collector::{CollectOpts, Collector, RunSummary};
use axum::extract::State;
use serde::Deserialize;
use tracing::info;

use super::AppJson;
use crate::SharedAppState;
use crate::error::{ApiError, ApiResult};

const LOG_TARGET: &str = "atlas::server";

#[derive(Deserialize)]
pub struct CollectRequest {
    pub username: Option<String>,
    pub user_id: Option<AccountId>,
    pub max_pages: Option<usize>,
}

/// Run one collection cycle. The HTTP client and collector live only for
/// this run and are released on every exit path.
pub async fn collect(
    state: State<SharedAppState>,
    AppJson(request): AppJson<CollectRequest>,
) -> ApiResult<AppJson<RunSummary>> {
    if request.username.is_none() && request.user_id.is_none() {
        return Err(ApiError::invalid_field(
            "username",
            "supply username or user_id",
        ));
    }

    let client = NetworkClient::new(ClientOpts {
        api_key: state.credentials.api_key.clone(),
        fallback_bearer_token: state.credentials.fallback_bearer_token.clone(),
    });
    let collector = Collector::new(state.db.clone(), client, state.config.clone());

    let summary = collector
        .run_collection(CollectOpts {
            username: request.username,
            user_id: request.user_id,
            max_pages: request.max_pages,
        })
        .await?;

    info!(
        target: LOG_TARGET,
        run_id = %summary.run_id,
        followers = summary.followers_count,
        following = summary.following_count,
        "Collection run finished"
    );
    Ok(AppJson(summary))
}
