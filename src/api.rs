//! JSON bodies exchanged with the proxy and the backend

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectRequest {
    /// Base64 JPEG without a data-URI prefix
    pub image_data: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DetectResponse {
    pub logo_detected: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyzeRequest {
    pub file_name: String,
    pub content_type: String,
    /// Base64 image without a data-URI prefix
    pub image_data: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmotionAnalysis {
    pub dominant_emotion: String,
    #[serde(default)]
    pub emotions: BTreeMap<String, f64>,
}

/// Result of the emotion analysis, including the product to present
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResponse {
    pub selected_product: String,
    pub analysis: EmotionAnalysis,
}

/// Error payload used by both the backend and the proxy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

impl ErrorBody {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}
