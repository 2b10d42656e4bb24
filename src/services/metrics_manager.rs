use serde::Serialize;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Default, Clone, Serialize)]
pub struct MetricsData {
    pub turns: u64,
    pub meals_extracted: u64,
    pub image_cache_hits: u64,
    pub images_generated: u64,
    pub generation_failures: u64,
}

#[derive(Debug, Clone)]
pub struct MetricsManager {
    inner: Arc<RwLock<MetricsData>>,
}

impl Default for MetricsManager {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsManager {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(MetricsData::default())),
        }
    }

    pub async fn record_turn(&self) {
        let mut data = self.inner.write().await;
        data.turns += 1;
    }

    pub async fn record_meals(&self, count: usize) {
        let mut data = self.inner.write().await;
        data.meals_extracted += count as u64;
    }

    pub async fn record_cache_hit(&self) {
        let mut data = self.inner.write().await;
        data.image_cache_hits += 1;
    }

    pub async fn record_generation(&self) {
        let mut data = self.inner.write().await;
        data.images_generated += 1;
    }

    pub async fn record_generation_failure(&self) {
        let mut data = self.inner.write().await;
        data.generation_failures += 1;
    }

    pub async fn get_metrics(&self) -> MetricsData {
        self.inner.read().await.clone()
    }
}
