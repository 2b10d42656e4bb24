// src/message.rs
use serde::{Deserialize, Serialize};

use crate::services::session_manager::ImageAsset;

#[derive(Deserialize)]
pub struct ChatRequest {
    pub session_id: Option<String>,
    pub message: String,
}

/// One extracted meal with its image, if generation succeeded.
#[derive(Serialize, Deserialize)]
pub struct MealCard {
    pub name: String,
    pub image: Option<ImageAsset>,
}

#[derive(Serialize, Deserialize)]
pub struct ChatResponse {
    pub session_id: String,
    pub reply: String,
    /// One card per extracted occurrence, in order of appearance.
    pub meals: Vec<MealCard>,
    /// User-visible diagnostics for meals whose image generation failed.
    pub warnings: Vec<String>,
}

#[derive(Deserialize)]
pub struct ResetRequest {
    pub session_id: String,
}

#[derive(Serialize, Deserialize)]
pub struct ResetResponse {
    pub session_id: String,
    pub cleared: bool,
}

/// Sidebar view: every meal ever suggested, with images where present.
#[derive(Serialize, Deserialize)]
pub struct MealHistory {
    pub catalog: Vec<String>,
    pub meals: Vec<MealCard>,
}
