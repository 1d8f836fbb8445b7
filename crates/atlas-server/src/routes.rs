mod collect;
mod frames;
mod inspect;

use axum::Router;
use axum::extract::FromRequest;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};

use crate::SharedAppState;
use crate::error::ApiError;

pub(crate) const DEFAULT_LIMIT: usize = 50;
pub(crate) const DEFAULT_TIMEFRAME: u32 = 30;

#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
pub struct AppJson<T>(pub T);

impl<T> IntoResponse for AppJson<T>
where
    axum::Json<T>: IntoResponse,
{
    fn into_response(self) -> Response {
        axum::Json(self.0).into_response()
    }
}

pub fn route_handler(state: SharedAppState) -> Router {
    Router::new()
        .route("/", get(inspect::root))
        .route("/collect", post(collect::collect))
        .route("/runs", get(inspect::list_runs))
        .route("/runs/{id}", get(inspect::get_run))
        .route("/snapshots", get(inspect::list_snapshots))
        .route("/intervals", get(inspect::list_intervals))
        .route("/intervals/{id}/events", get(inspect::interval_events))
        .route("/accounts", get(inspect::list_accounts))
        .route("/stats", get(inspect::stats))
        .route("/frames", get(frames::list_frames))
        .route("/frames/latest", get(frames::latest_frame))
        .route("/frames/build", post(frames::build_frame))
        .route("/frames/{interval_id}", get(frames::get_frame))
        .route("/graph", get(frames::graph))
        .route("/timeline/frames", get(frames::timeline_frames))
        .route("/timeline/interpolate", get(frames::interpolate))
        .route("/positions/history", get(inspect::position_history))
        .route("/attributions", get(frames::attributions))
        .with_state(state)
}
