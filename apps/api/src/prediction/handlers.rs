use std::convert::Infallible;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use chrono::Utc;
use futures::stream::{self, Stream, StreamExt};
use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::interview::PredictionKey;
use crate::prediction::bus::{PredictionEvent, Subscription, Topic};
use crate::prediction::model::Prediction;
use crate::state::AppState;
use crate::timing::{timing_guidance, TimingHint};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RecalculationFailedPayload {
    job_id: Uuid,
    interview_id: Uuid,
    message: String,
}

/// GET /api/v1/users/:user_id/predictions/upcoming
pub async fn handle_upcoming(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<Vec<Prediction>>, AppError> {
    Ok(Json(state.store.list_upcoming(user_id).await?))
}

/// GET /api/v1/jobs/:job_id/interviews/:interview_id/prediction
pub async fn handle_get_prediction(
    State(state): State<AppState>,
    Path((job_id, interview_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<Prediction>, AppError> {
    let key = PredictionKey::new(job_id, interview_id);
    Ok(Json(state.store.get(key).await?))
}

/// POST /api/v1/jobs/:job_id/interviews/:interview_id/prediction/recalculate
pub async fn handle_recalculate(
    State(state): State<AppState>,
    Path((job_id, interview_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<Prediction>, AppError> {
    let key = PredictionKey::new(job_id, interview_id);
    Ok(Json(state.bus.refresh(key).await?))
}

/// POST /api/v1/jobs/:job_id/interviews/:interview_id/stale
pub async fn handle_notify_stale(
    State(state): State<AppState>,
    Path((job_id, interview_id)): Path<(Uuid, Uuid)>,
) -> StatusCode {
    state.bus.notify_stale(job_id, interview_id);
    StatusCode::ACCEPTED
}

/// POST /api/v1/predictions/:prediction_id/recommendations/:index/complete
pub async fn handle_complete_recommendation(
    State(state): State<AppState>,
    Path((prediction_id, index)): Path<(Uuid, usize)>,
) -> Result<Json<Prediction>, AppError> {
    let prediction = state
        .store
        .mark_recommendation_complete(prediction_id, index)
        .await?;
    Ok(Json(prediction))
}

/// GET /api/v1/jobs/:job_id/interviews/:interview_id/timing
pub async fn handle_timing(
    State(state): State<AppState>,
    Path((job_id, interview_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<Vec<TimingHint>>, AppError> {
    let key = PredictionKey::new(job_id, interview_id);
    let context = state.store.interview_context(key).await?;
    Ok(Json(timing_guidance(&context, Utc::now())))
}

/// GET /api/v1/jobs/:job_id/interviews/:interview_id/prediction/events
///
/// Sends the stored prediction first when there is one; otherwise asks the bus
/// to compute it so the viewer does not wait for an unrelated edit.
pub async fn handle_interview_events(
    State(state): State<AppState>,
    Path((job_id, interview_id)): Path<(Uuid, Uuid)>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let key = PredictionKey::new(job_id, interview_id);
    let mut subscription = state.bus.subscribe(Topic::Interview(key));

    let initial = match state.store.get(key).await {
        Ok(prediction) => {
            subscription.remember(prediction.clone());
            Some(to_sse(&PredictionEvent::Updated(prediction)))
        }
        Err(AppError::NotFound(_)) => {
            debug!("No stored prediction for {key}; requesting one");
            state.bus.notify_stale(job_id, interview_id);
            None
        }
        Err(e) => return Err(e),
    };

    let events = stream::iter(initial.map(Ok)).chain(event_stream(subscription));
    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

/// GET /api/v1/users/:user_id/predictions/events
pub async fn handle_user_events(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let subscription = state.bus.subscribe(Topic::User(user_id));
    Sse::new(event_stream(subscription)).keep_alive(KeepAlive::default())
}

/// Ends when the bus goes away; dropping the stream drops the subscription.
///
/// A failure event is followed by the last good prediction for that interview,
/// so the viewer keeps showing a usable result.
fn event_stream(subscription: Subscription) -> impl Stream<Item = Result<Event, Infallible>> {
    stream::unfold(subscription, |mut subscription| async move {
        let event = subscription.recv().await?;
        let mut frames = vec![Ok(to_sse(&event))];
        if let PredictionEvent::RecalculationFailed { key, .. } = &event {
            if let Some(last_good) = subscription.last_known_good(*key) {
                frames.push(Ok(to_sse(&PredictionEvent::Updated(last_good.clone()))));
            }
        }
        Some((stream::iter(frames), subscription))
    })
    .flatten()
}

fn to_sse(event: &PredictionEvent) -> Event {
    let built = match event {
        PredictionEvent::Updated(prediction) => {
            Event::default().event("prediction").json_data(prediction)
        }
        PredictionEvent::RecalculationFailed { key, message } => Event::default()
            .event("recalculation_failed")
            .json_data(RecalculationFailedPayload {
                job_id: key.job_id,
                interview_id: key.interview_id,
                message: message.clone(),
            }),
    };
    built.unwrap_or_else(|e| {
        warn!("Failed to encode prediction event: {e}");
        Event::default().event("error").data("encoding failed")
    })
}
