// src/services/session_manager.rs
use std::{
    collections::HashMap,
    fmt::Debug,
    sync::Arc,
    time::{Duration, Instant},
};

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Clone, Debug)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
    pub timestamp: Instant,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MessageRole {
    User,
    Assistant,
}

/// A generated meal image in transport form: base64 payload plus MIME tag.
/// Never mutated after creation, only replaced if regenerated.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageAsset {
    pub mime_type: String,
    pub data: String,
}

#[derive(Clone, Debug)]
pub struct Session {
    pub id: String,
    /// Ordered log of (role, text) turns. Recorded but not fed back into
    /// the model today.
    pub conversation: Vec<Message>,
    /// Every meal name ever extracted in this session, in order of
    /// appearance, duplicates included.
    pub meal_catalog: Vec<String>,
    /// Meal name -> generated image. Keys are a subset of the catalog:
    /// names whose generation failed have no entry.
    pub images: HashMap<String, ImageAsset>,
    pub last_active: Instant,
}

impl Session {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            conversation: Vec::new(),
            meal_catalog: Vec::new(),
            images: HashMap::new(),
            last_active: Instant::now(),
        }
    }
}

#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<RwLock<HashMap<String, Session>>>,
    ttl: Duration,
}

impl Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("ttl", &self.ttl)
            .finish()
    }
}

impl SessionManager {
    // Create a new manager
    pub fn new(ttl: Duration) -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
            ttl,
        }
    }

    // Create a fresh session and return its id.
    pub async fn create_session(&self) -> String {
        let id = Uuid::new_v4().to_string();
        let session = Session::new(id.clone());

        let mut guard = self.inner.write().await;
        guard.insert(id.clone(), session);
        id
    }

    // Ensure there's a session with this id.
    pub async fn ensure_session(&self, id: &str) -> String {
        {
            let guard = self.inner.read().await;
            if guard.contains_key(id) {
                return id.to_string();
            }
        }
        let mut guard = self.inner.write().await;
        let session = Session::new(id.to_string());
        guard.insert(id.to_string(), session);
        id.to_string()
    }

    // Append a message to a session's conversation log and touch last_active.
    pub async fn append_message(
        &self,
        session_id: &str,
        role: MessageRole,
        content: impl Into<String>,
    ) -> usize {
        let mut guard = self.inner.write().await;
        let entry = guard
            .entry(session_id.to_string())
            .or_insert_with(|| Session::new(session_id.to_string()));
        entry.conversation.push(Message {
            role,
            content: content.into(),
            timestamp: Instant::now(),
        });
        entry.last_active = Instant::now();
        entry.conversation.len()
    }

    /// Extend the meal catalog by the full extracted sequence, duplicates
    /// included. Returns the catalog length.
    pub async fn append_meals(&self, session_id: &str, names: &[String]) -> usize {
        let mut guard = self.inner.write().await;
        let entry = guard
            .entry(session_id.to_string())
            .or_insert_with(|| Session::new(session_id.to_string()));
        entry.meal_catalog.extend(names.iter().cloned());
        entry.last_active = Instant::now();
        entry.meal_catalog.len()
    }

    /// Upsert a generated image under its meal name.
    pub async fn record_image(&self, session_id: &str, name: &str, asset: ImageAsset) {
        let mut guard = self.inner.write().await;
        let entry = guard
            .entry(session_id.to_string())
            .or_insert_with(|| Session::new(session_id.to_string()));
        entry.images.insert(name.to_string(), asset);
        entry.last_active = Instant::now();
    }

    /// Cache lookup for a previously generated image.
    pub async fn get_image(&self, session_id: &str, name: &str) -> Option<ImageAsset> {
        let guard = self.inner.read().await;
        guard
            .get(session_id)
            .and_then(|s| s.images.get(name).cloned())
    }

    /// Get a copy of the session's conversation log
    pub async fn get_history(&self, session_id: &str) -> Option<Vec<Message>> {
        let guard = self.inner.read().await;
        guard.get(session_id).map(|s| s.conversation.clone())
    }

    /// Get a copy of the session's meal catalog
    pub async fn meal_catalog(&self, session_id: &str) -> Vec<String> {
        let guard = self.inner.read().await;
        guard
            .get(session_id)
            .map(|s| s.meal_catalog.clone())
            .unwrap_or_default()
    }

    /// Snapshot of the session's image index
    pub async fn image_index(&self, session_id: &str) -> HashMap<String, ImageAsset> {
        let guard = self.inner.read().await;
        guard
            .get(session_id)
            .map(|s| s.images.clone())
            .unwrap_or_default()
    }

    /// Clear the session's catalog, image index, and conversation log. The
    /// session itself survives. Returns false for an unknown session.
    pub async fn reset_session(&self, session_id: &str) -> bool {
        let mut guard = self.inner.write().await;
        match guard.get_mut(session_id) {
            Some(session) => {
                session.meal_catalog.clear();
                session.images.clear();
                session.conversation.clear();
                session.last_active = Instant::now();
                true
            }
            None => false,
        }
    }

    /// Remove a session by id
    pub async fn remove_session(&self, session_id: &str) -> bool {
        let mut guard = self.inner.write().await;
        guard.remove(session_id).is_some()
    }

    /// Remove sessions idle longer than ttl. Returns number removed.
    pub async fn purge_expired(&self) -> usize {
        let mut guard = self.inner.write().await;
        let now = Instant::now();
        let before = guard.len();
        guard.retain(|_, s| now.duration_since(s.last_active) < self.ttl);
        before - guard.len()
    }

    /// Number of sessions
    pub async fn len(&self) -> usize {
        let guard = self.inner.read().await;
        guard.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// List session ids
    pub async fn list_session_ids(&self) -> Vec<String> {
        let guard = self.inner.read().await;
        guard.keys().cloned().collect()
    }
}
