//! State shared between views

use crate::api::AnalysisResponse;
use parking_lot::RwLock;
use std::sync::Arc;

/// Latest analysis result, written by the upload view and read by the
/// analyze view. Starts empty; clones share the same slot.
#[derive(Clone, Debug, Default)]
pub struct AnalysisStore {
    slot: Arc<RwLock<Option<AnalysisResponse>>>,
}

impl AnalysisStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, analysis: AnalysisResponse) {
        tracing::debug!(product = %analysis.selected_product, "Analysis stored");
        *self.slot.write() = Some(analysis);
    }

    pub fn get(&self) -> Option<AnalysisResponse> {
        self.slot.read().clone()
    }

    pub fn clear(&self) {
        *self.slot.write() = None;
    }

    pub fn is_empty(&self) -> bool {
        self.slot.read().is_none()
    }
}

// Dioxus compares context values when deciding whether to re-render
impl PartialEq for AnalysisStore {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.slot, &other.slot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::EmotionAnalysis;

    fn analysis(product: &str) -> AnalysisResponse {
        AnalysisResponse {
            selected_product: product.to_string(),
            analysis: EmotionAnalysis {
                dominant_emotion: "happy".into(),
                emotions: Default::default(),
            },
        }
    }

    #[test]
    fn starts_empty_and_shares_writes() {
        let store = AnalysisStore::new();
        let reader = store.clone();
        assert!(reader.get().is_none());

        store.set(analysis("product1"));
        assert_eq!(reader.get().unwrap().selected_product, "product1");

        store.set(analysis("product2"));
        assert_eq!(reader.get().unwrap().selected_product, "product2");

        reader.clear();
        assert!(store.is_empty());
        assert_eq!(store, reader);
        assert_ne!(store, AnalysisStore::new());
    }
}
