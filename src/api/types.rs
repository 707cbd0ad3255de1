use serde::{Deserialize, Serialize};

use crate::{
    codec::encode_mask_data_url,
    errors::Result,
    pipeline::{Analysis, NOT_A_LEAF_DESCRIPTION},
    segmentation::MaskStats,
    traits::Prediction,
};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeRequest {
    #[serde(default)]
    pub image: Option<String>,
    /// Informational; the payload's magic bytes decide the format.
    #[serde(default)]
    pub mime_type: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum AnalyzeResponse {
    NotALeaf(NotALeafResponse),
    Leaf(LeafResponse),
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotALeafResponse {
    pub is_leaf: bool,
    pub disease: Option<String>,
    pub confidence: f32,
    pub description: &'static str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeafResponse {
    pub is_leaf: bool,
    pub segmentation_mask: String,
    pub mask_stats: MaskStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disease: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub top_predictions: Vec<Prediction>,
}

impl AnalyzeResponse {
    pub fn from_analysis(analysis: Analysis) -> Result<Self> {
        match analysis {
            Analysis::NotALeaf { .. } => Ok(AnalyzeResponse::NotALeaf(NotALeafResponse {
                is_leaf: false,
                disease: None,
                confidence: 0.0,
                description: NOT_A_LEAF_DESCRIPTION,
            })),
            Analysis::Leaf(result) => {
                let top = result.top_prediction().cloned();
                Ok(AnalyzeResponse::Leaf(LeafResponse {
                    is_leaf: true,
                    segmentation_mask: encode_mask_data_url(&result.mask)?,
                    mask_stats: result.stats,
                    disease: top.as_ref().map(|p| p.label.clone()),
                    confidence: top.map(|p| p.confidence),
                    top_predictions: result.predictions,
                }))
            }
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub models_loaded: ModelsLoaded,
}

#[derive(Debug, Serialize)]
pub struct ModelsLoaded {
    pub unet: bool,
    pub classifier: bool,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
}
