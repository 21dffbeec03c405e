use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

pub const PRIORITY_URGENT: &str = "urgent";
pub const PRIORITY_NORMAL: &str = "normal";

/// Body of `POST /api/v1/job`.
#[derive(Debug, Deserialize)]
pub struct SubmitJobRequest {
    pub job: ImageProcessJobData,
    pub priority: String,
}

/// Payload of one image-processing job, as published on the queue.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImageProcessJobData {
    #[serde(rename = "shopID", default)]
    pub shop_id: i64,

    /// Output format token for every rendition; empty means "keep the
    /// detected source format".
    #[serde(rename = "imageExtension", default)]
    pub image_extension: String,

    #[serde(default)]
    pub images: Vec<ImageSpec>,

    /// Blob-store prefixes to delete.
    #[serde(rename = "deleteImages", default)]
    pub delete_images: Vec<String>,
}

/// One source image and the renditions to derive from it.
///
/// The destination key of each rendition is determined by the shop, the
/// product, the rendition parameters and the file name; see
/// [`crate::services::paths::sub_path`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImageSpec {
    #[serde(default)]
    pub url: String,

    #[serde(default)]
    pub name: String,

    #[serde(rename = "productID", default)]
    pub product_id: String,

    #[serde(rename = "scaleDimensionMax", default)]
    pub scale_dimension_max: Vec<u32>,

    #[serde(rename = "cropDimensions", default)]
    pub crop_dimensions: Vec<Dimensions>,

    #[serde(rename = "minXMaxY", default)]
    pub min_x_max_y: Vec<Dimensions>,

    #[serde(rename = "minYMaxX", default)]
    pub min_y_max_x: Vec<Dimensions>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    pub x: u32,
    pub y: u32,
}

/// One of the four rendition shapes a spec can request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenditionKind {
    /// Longer side scaled down to the given maximum.
    Scale(u32),
    /// Scaled to fit, then centered on a canvas of exactly this size.
    Crop(Dimensions),
    /// Exactly `y` tall, padded to at least `x` wide.
    MinXMaxY(Dimensions),
    /// Exactly `x` wide, padded to at least `y` tall.
    MinYMaxX(Dimensions),
}

impl RenditionKind {
    /// Dimension string recorded on processing errors.
    pub fn dim_string(&self) -> String {
        match self {
            RenditionKind::Scale(max) => max.to_string(),
            RenditionKind::Crop(d) | RenditionKind::MinXMaxY(d) | RenditionKind::MinYMaxX(d) => {
                format!("{}x{}", d.x, d.y)
            }
        }
    }

    pub fn error_kind(&self) -> ProcessErrorKind {
        match self {
            RenditionKind::Scale(_) => ProcessErrorKind::Scale,
            RenditionKind::Crop(_) => ProcessErrorKind::Crop,
            RenditionKind::MinXMaxY(_) => ProcessErrorKind::MinXMaxY,
            RenditionKind::MinYMaxX(_) => ProcessErrorKind::MinYMaxX,
        }
    }
}

/// A fully self-describing unit of work for one worker: either an image
/// spec to process or a bare deletion list, plus everything needed to build
/// destination keys. This is also the payload sent to the offload runtime;
/// the manifest never crosses the wire.
#[derive(Debug, Clone, Serialize)]
pub struct ImageTask {
    #[serde(flatten)]
    pub image: Option<ImageSpec>,

    #[serde(rename = "shopID")]
    pub shop_id: i64,

    #[serde(rename = "imageExtension")]
    pub image_extension: String,

    #[serde(rename = "deleteImages")]
    pub delete_images: Vec<String>,

    /// Keys already present under the shop prefix when the job started;
    /// `None` means the listing failed and everything must be computed.
    #[serde(skip)]
    pub manifest: Option<Arc<HashSet<String>>>,
}

/// Stage of processing a rendition task failed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessErrorKind {
    Upload,
    Scale,
    Crop,
    MinXMaxY,
    MinYMaxX,
    Delete,
}

impl ProcessErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ProcessErrorKind::Upload => "could not upload image",
            ProcessErrorKind::Scale => "could not scale image",
            ProcessErrorKind::Crop => "could not crop image",
            ProcessErrorKind::MinXMaxY => "could not scale min-x/max-y",
            ProcessErrorKind::MinYMaxX => "could not scale min-y/max-x",
            ProcessErrorKind::Delete => "could not delete images",
        }
    }
}

impl fmt::Display for ProcessErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One failure recorded while processing a task. Failures accumulate per
/// job; they never abort sibling renditions.
#[derive(Debug, Clone, Serialize, Deserialize, thiserror::Error)]
#[error("{kind}: url: {url}, dimensions: {dim}, msg: {msg}")]
pub struct ProcessError {
    pub url: String,
    #[serde(rename = "err")]
    pub kind: ProcessErrorKind,
    pub msg: String,
    pub dim: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_payload_round_trips_with_wire_field_names() {
        let payload = r#"{
            "shopID": 42,
            "imageExtension": "png",
            "images": [{
                "url": "https://img.example.com/a.jpg",
                "name": "a.jpg",
                "productID": "p1",
                "scaleDimensionMax": [100, 600],
                "cropDimensions": [{"x": 500, "y": 500}]
            }],
            "deleteImages": ["images/42/old"]
        }"#;

        let job: ImageProcessJobData = serde_json::from_str(payload).unwrap();
        assert_eq!(job.shop_id, 42);
        assert_eq!(job.image_extension, "png");
        assert_eq!(job.images.len(), 1);
        assert_eq!(job.images[0].scale_dimension_max, vec![100, 600]);
        assert_eq!(job.images[0].crop_dimensions[0], Dimensions { x: 500, y: 500 });
        assert_eq!(job.delete_images, vec!["images/42/old".to_string()]);

        let encoded = serde_json::to_value(&job).unwrap();
        assert_eq!(encoded["shopID"], 42);
        assert_eq!(encoded["images"][0]["productID"], "p1");
        assert_eq!(encoded["deleteImages"][0], "images/42/old");
    }

    #[test]
    fn missing_optional_fields_default() {
        let job: ImageProcessJobData = serde_json::from_str(r#"{"shopID": 1}"#).unwrap();
        assert!(job.images.is_empty());
        assert!(job.delete_images.is_empty());
        assert!(job.image_extension.is_empty());
    }

    #[test]
    fn image_task_flattens_the_spec_and_skips_the_manifest() {
        let task = ImageTask {
            image: Some(ImageSpec {
                url: "https://img.example.com/a.jpg".to_string(),
                name: "a.jpg".to_string(),
                product_id: "p1".to_string(),
                scale_dimension_max: vec![100],
                ..ImageSpec::default()
            }),
            shop_id: 7,
            image_extension: String::new(),
            delete_images: vec![],
            manifest: Some(std::sync::Arc::new(std::collections::HashSet::new())),
        };

        let encoded = serde_json::to_value(&task).unwrap();
        assert_eq!(encoded["url"], "https://img.example.com/a.jpg");
        assert_eq!(encoded["shopID"], 7);
        assert!(encoded.get("manifest").is_none());
    }

    #[test]
    fn dim_string_formats_per_kind() {
        assert_eq!(RenditionKind::Scale(1000).dim_string(), "1000");
        assert_eq!(
            RenditionKind::Crop(Dimensions { x: 100, y: 200 }).dim_string(),
            "100x200"
        );
    }
}
