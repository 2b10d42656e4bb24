//! Full-turn tests against an in-process stand-in for the model service:
//! a throwaway axum server on an ephemeral port serves the streamed chat
//! completion, the image-generation endpoint, and the hosted image bytes.

use std::io::Cursor;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::http::header;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{
    Json, Router,
    body::Body,
    http::{Request, StatusCode},
};
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use tower::util::ServiceExt;

use nutrichat_backend::message::{ChatResponse, MealHistory, ResetResponse};
use nutrichat_backend::routes::create_router;
use nutrichat_backend::services::openai::{OpenAiClient, OpenAiConfig};
use nutrichat_backend::state::AppState;

fn sse_body(chunks: &[&str]) -> String {
    let mut body = String::new();
    for chunk in chunks {
        let event = serde_json::json!({
            "object": "chat.completion.chunk",
            "choices": [{ "delta": { "content": chunk } }]
        });
        body.push_str(&format!("data: {event}\n\n"));
    }
    body.push_str("data: [DONE]\n\n");
    body
}

fn png_fixture() -> Vec<u8> {
    let pixel = image::RgbaImage::from_pixel(1, 1, image::Rgba([200, 120, 40, 255]));
    let mut buf = Cursor::new(Vec::new());
    image::DynamicImage::ImageRgba8(pixel)
        .write_to(&mut buf, image::ImageFormat::Png)
        .unwrap();
    buf.into_inner()
}

struct MockUpstream {
    addr: SocketAddr,
    image_requests: Arc<AtomicUsize>,
}

/// Bind a fake model service on port 0. `completion` is the raw SSE body to
/// stream back; with `fail_images` the generation endpoint returns 500.
async fn spawn_mock(completion: String, fail_images: bool) -> MockUpstream {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let image_requests = Arc::new(AtomicUsize::new(0));

    let counter = image_requests.clone();
    let app = Router::new()
        .route(
            "/chat/completions",
            post(move || {
                let completion = completion.clone();
                async move { ([(header::CONTENT_TYPE, "text/event-stream")], completion) }
            }),
        )
        .route(
            "/images/generations",
            post(move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    if fail_images {
                        (StatusCode::INTERNAL_SERVER_ERROR, "image service down").into_response()
                    } else {
                        Json(serde_json::json!({
                            "data": [{ "url": format!("http://{addr}/meal.png") }]
                        }))
                        .into_response()
                    }
                }
            }),
        )
        .route(
            "/meal.png",
            get(|| async { ([(header::CONTENT_TYPE, "image/png")], png_fixture()) }),
        );

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    MockUpstream {
        addr,
        image_requests,
    }
}

fn app_for(mock: &MockUpstream) -> Router {
    let config = OpenAiConfig {
        api_key: "test-key".to_string(),
        base_url: format!("http://{}", mock.addr),
        chat_model: "gpt-3.5-turbo".to_string(),
        image_model: "dall-e-2".to_string(),
    };
    let state = Arc::new(AppState::new(
        Duration::from_secs(60),
        OpenAiClient::new(config),
        None,
    ));
    create_router().with_state(state)
}

fn chat_request(session_id: Option<&str>, message: &str) -> Request<Body> {
    let payload = serde_json::json!({ "session_id": session_id, "message": message });
    Request::builder()
        .method("POST")
        .uri("/chat")
        .header("content-type", "application/json")
        .body(Body::from(payload.to_string()))
        .unwrap()
}

async fn post_chat(app: &Router, session_id: Option<&str>, message: &str) -> ChatResponse {
    let response = app
        .clone()
        .oneshot(chat_request(session_id, message))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body_bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body_bytes).unwrap()
}

async fn get_meals(app: &Router, session_id: &str) -> MealHistory {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/meals/{session_id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body_bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body_bytes).unwrap()
}

#[tokio::test]
async fn test_full_turn_extracts_and_generates() {
    let mock = spawn_mock(
        sse_body(&["Try ", "[Grilled Chicken", " Salad] with quinoa."]),
        false,
    )
    .await;
    let app = app_for(&mock);

    let resp = post_chat(&app, None, "suggest a light lunch").await;

    assert_eq!(resp.reply, "Try [Grilled Chicken Salad] with quinoa.");
    assert!(resp.warnings.is_empty());
    assert_eq!(resp.meals.len(), 1);
    assert_eq!(resp.meals[0].name, "Grilled Chicken Salad");

    let asset = resp.meals[0].image.as_ref().expect("image was generated");
    assert_eq!(asset.mime_type, "image/png");
    let png = BASE64.decode(&asset.data).unwrap();
    assert!(image::load_from_memory(&png).is_ok());

    assert_eq!(mock.image_requests.load(Ordering::SeqCst), 1);

    let history = get_meals(&app, &resp.session_id).await;
    assert_eq!(history.catalog, vec!["Grilled Chicken Salad"]);
    assert_eq!(history.meals.len(), 1);
    assert!(history.meals[0].image.is_some());
}

#[tokio::test]
async fn test_duplicate_within_a_turn_generates_once() {
    let mock = spawn_mock(
        sse_body(&["Have [Oatmeal] for breakfast, or [Oatmeal] as a snack."]),
        false,
    )
    .await;
    let app = app_for(&mock);

    let resp = post_chat(&app, None, "breakfast ideas").await;

    // Two cards, one generation: the second occurrence hits the cache
    // written by the first.
    assert_eq!(resp.meals.len(), 2);
    assert_eq!(mock.image_requests.load(Ordering::SeqCst), 1);
    assert_eq!(resp.meals[0].image, resp.meals[1].image);

    let history = get_meals(&app, &resp.session_id).await;
    assert_eq!(history.catalog.len(), 2);
    assert_eq!(history.meals.len(), 1, "sidebar deduplicates");
}

#[tokio::test]
async fn test_cache_deduplicates_across_turns() {
    let mock = spawn_mock(sse_body(&["Again, try [Lentil Soup]."]), false).await;
    let app = app_for(&mock);

    let first = post_chat(&app, None, "dinner ideas").await;
    let second = post_chat(&app, Some(&first.session_id), "and tomorrow?").await;

    assert_eq!(mock.image_requests.load(Ordering::SeqCst), 1);
    assert_eq!(first.meals[0].image, second.meals[0].image);

    let history = get_meals(&app, &first.session_id).await;
    assert_eq!(history.catalog.len(), 2);
}

#[tokio::test]
async fn test_reset_clears_cache_and_regenerates() {
    let mock = spawn_mock(sse_body(&["Try [Lentil Soup]."]), false).await;
    let app = app_for(&mock);

    let first = post_chat(&app, None, "dinner ideas").await;
    assert_eq!(mock.image_requests.load(Ordering::SeqCst), 1);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/reset")
                .header("content-type", "application/json")
                .body(Body::from(
                    serde_json::json!({ "session_id": first.session_id }).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body_bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let reset: ResetResponse = serde_json::from_slice(&body_bytes).unwrap();
    assert!(reset.cleared);

    let history = get_meals(&app, &first.session_id).await;
    assert!(history.catalog.is_empty());
    assert!(history.meals.is_empty());

    // Cache was cleared, so the same meal triggers a fresh generation.
    post_chat(&app, Some(&first.session_id), "dinner ideas").await;
    assert_eq!(mock.image_requests.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_failed_generation_keeps_meal_without_image() {
    let mock = spawn_mock(sse_body(&["Try [Grilled Chicken Salad]."]), true).await;
    let app = app_for(&mock);

    let resp = post_chat(&app, None, "suggest a light lunch").await;

    assert_eq!(resp.meals.len(), 1);
    assert!(resp.meals[0].image.is_none());
    assert_eq!(resp.warnings.len(), 1);
    assert!(resp.warnings[0].contains("Grilled Chicken Salad"));

    // The meal stays in the catalog; the image index gains nothing.
    let history = get_meals(&app, &resp.session_id).await;
    assert_eq!(history.catalog, vec!["Grilled Chicken Salad"]);
    assert!(history.meals[0].image.is_none());
}

#[tokio::test]
async fn test_broken_stream_aborts_turn() {
    // Stream ends without the [DONE] sentinel.
    let truncated = "data: {\"object\":\"chat.completion.chunk\",\
                     \"choices\":[{\"delta\":{\"content\":\"Try [Oat\"}}]}\n\n"
        .to_string();
    let mock = spawn_mock(truncated, false).await;
    let app = app_for(&mock);

    let response = app
        .clone()
        .oneshot(chat_request(Some("interrupted-session"), "lunch?"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

    // Partial text was never scanned: no meals, no generation attempts,
    // and the session remains usable.
    assert_eq!(mock.image_requests.load(Ordering::SeqCst), 0);
    let history = get_meals(&app, "interrupted-session").await;
    assert!(history.catalog.is_empty());
}
