use axum::{
    Json,
    extract::{Path, State},
};
use std::collections::HashSet;
use tracing::{info, warn};

use crate::services::metrics_manager::MetricsData;
use crate::{
    error::AppError,
    message::{ChatRequest, ChatResponse, MealCard, MealHistory, ResetRequest, ResetResponse},
    services::{
        assembler::collect_stream,
        extractor::extract_meals,
        openai::{ChatMessage, SYSTEM_PROMPT},
        session_manager::MessageRole,
    },
    state::SharedState,
};

/// One full turn: stream the assistant reply, extract bracketed meals,
/// resolve an image per extracted name, and record everything in the
/// session.
pub async fn chat_handler(
    State(state): State<SharedState>,
    Json(payload): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, AppError> {
    let session_id = match &payload.session_id {
        Some(s) if !s.trim().is_empty() => {
            state.sessions.ensure_session(s).await;
            s.clone()
        }
        _ => state.sessions.create_session().await,
    };

    let trimmed = payload.message.trim();

    if trimmed.is_empty() {
        return Err(AppError::BadRequest("Message cannot be empty".to_string()));
    }
    // Append user message
    state
        .sessions
        .append_message(&session_id, MessageRole::User, trimmed)
        .await;
    state.metrics.record_turn().await;

    // The model sees only the fixed persona and the current question; the
    // conversation log is recorded for the session but not replayed.
    let messages = vec![
        ChatMessage::system(SYSTEM_PROMPT),
        ChatMessage::user(trimmed),
    ];
    // A stream failure aborts the whole turn; partial text is never
    // scanned for meals.
    let deltas = state.llm.stream_chat(messages).await?;
    let reply = collect_stream(deltas).await?;

    let extracted = extract_meals(&reply);
    if !extracted.is_empty() {
        info!(session = %session_id, count = extracted.len(), "new meals detected");
    }
    state.metrics.record_meals(extracted.len()).await;
    state.sessions.append_meals(&session_id, &extracted).await;

    // Images are resolved one at a time, in extraction order. A failing
    // meal is reported and skipped; the rest still get their images.
    let mut meals = Vec::with_capacity(extracted.len());
    let mut warnings = Vec::new();
    for name in &extracted {
        match state
            .images
            .resolve(&state.sessions, &session_id, name, &state.metrics)
            .await
        {
            Ok(asset) => meals.push(MealCard {
                name: name.clone(),
                image: Some(asset),
            }),
            Err(e) => {
                warn!(meal = %name, error = %e, "image generation failed");
                state.metrics.record_generation_failure().await;
                warnings.push(format!("Could not generate an image for {name}"));
                meals.push(MealCard {
                    name: name.clone(),
                    image: None,
                });
            }
        }
    }

    state
        .sessions
        .append_message(&session_id, MessageRole::Assistant, &reply)
        .await;

    Ok(Json(ChatResponse {
        session_id,
        reply,
        meals,
        warnings,
    }))
}

/// Explicit, user-triggered reset: clears the session's meal catalog,
/// image index, and conversation log. No undo.
pub async fn reset_handler(
    State(state): State<SharedState>,
    Json(payload): Json<ResetRequest>,
) -> Json<ResetResponse> {
    let cleared = state.sessions.reset_session(&payload.session_id).await;
    Json(ResetResponse {
        session_id: payload.session_id,
        cleared,
    })
}

// Sidebar data: distinct meals in first-seen order, images where present.
pub async fn get_meals_handler(
    State(state): State<SharedState>,
    Path(session_id): Path<String>,
) -> Json<MealHistory> {
    let catalog = state.sessions.meal_catalog(&session_id).await;
    let images = state.sessions.image_index(&session_id).await;

    let mut seen = HashSet::new();
    let mut meals = Vec::new();
    for name in &catalog {
        if seen.insert(name.clone()) {
            meals.push(MealCard {
                name: name.clone(),
                image: images.get(name).cloned(),
            });
        }
    }

    Json(MealHistory { catalog, meals })
}

// New Handler: Get Metrics
pub async fn get_metrics_handler(State(state): State<SharedState>) -> Json<MetricsData> {
    Json(state.metrics.get_metrics().await)
}
