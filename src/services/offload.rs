//! Remote "process one image" invocation.
//!
//! When a function runtime is configured, workers serialize their task and
//! post it to the runtime instead of rendering locally. The remote side
//! implements the same contract and reports failure through the response
//! status.

use crate::config::AppConfig;
use crate::models::job::{ImageTask, RenditionKind};
use crate::services::paths;

pub struct OffloadClient {
    http: reqwest::Client,
    function: String,
    id: Option<String>,
    secret: Option<String>,
    token: Option<String>,
    region: Option<String>,
}

impl OffloadClient {
    /// Built only when `LAMBDA_FUNC` is configured.
    pub fn from_config(config: &AppConfig) -> Option<Self> {
        let function = config.lambda_func.clone()?;
        Some(Self {
            http: reqwest::Client::new(),
            function,
            id: config.lambda_id.clone(),
            secret: config.lambda_secret.clone(),
            token: config.lambda_token.clone(),
            region: config.lambda_region.clone(),
        })
    }

    /// Invoke the runtime with a (pruned) task.
    pub async fn process(&self, task: &ImageTask) -> Result<(), OffloadError> {
        let mut request = self.http.post(self.invoke_url()).json(task);

        if let Some(id) = &self.id {
            request = request.basic_auth(id, self.secret.as_deref());
        }
        if let Some(token) = &self.token {
            request = request.header("x-amz-security-token", token);
        }

        request.send().await?.error_for_status()?;
        Ok(())
    }

    /// `LAMBDA_FUNC` is either a full invoke URL or a bare function name
    /// resolved against the regional endpoint.
    fn invoke_url(&self) -> String {
        if self.function.starts_with("http://") || self.function.starts_with("https://") {
            self.function.clone()
        } else {
            format!(
                "https://lambda.{}.amazonaws.com/2015-03-31/functions/{}/invocations",
                self.region.as_deref().unwrap_or("us-east-1"),
                self.function
            )
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum OffloadError {
    #[error("error calling process-image function: {0}")]
    Http(#[from] reqwest::Error),
}

/// Drop renditions whose destination keys are already present, so the
/// remote invocation never redoes work. Returns the pruned task and whether
/// anything remains to do (renditions or deletions).
pub fn prune_against_manifest(task: &ImageTask, images_folder: &str) -> (ImageTask, bool) {
    let mut pruned = task.clone();

    if let (Some(image), Some(manifest)) = (pruned.image.as_mut(), task.manifest.as_deref()) {
        let shop_id = task.shop_id;
        let name = image.name.clone();
        let product_id = image.product_id.clone();

        let missing = |kind: &RenditionKind| {
            let key = paths::join(&[
                images_folder,
                &paths::sub_path("", Some(shop_id), &product_id, Some(kind), &name),
            ]);
            !manifest.contains(&key)
        };

        image
            .scale_dimension_max
            .retain(|&max| missing(&RenditionKind::Scale(max)));
        image
            .crop_dimensions
            .retain(|&d| missing(&RenditionKind::Crop(d)));
        image
            .min_x_max_y
            .retain(|&d| missing(&RenditionKind::MinXMaxY(d)));
        image
            .min_y_max_x
            .retain(|&d| missing(&RenditionKind::MinYMaxX(d)));
    }

    let has_renditions = pruned.image.as_ref().is_some_and(|image| {
        !image.scale_dimension_max.is_empty()
            || !image.crop_dimensions.is_empty()
            || !image.min_x_max_y.is_empty()
            || !image.min_y_max_x.is_empty()
    });
    let has_work = has_renditions || !pruned.delete_images.is_empty();

    (pruned, has_work)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::job::{Dimensions, ImageSpec};
    use std::collections::HashSet;
    use std::sync::Arc;

    fn task_with_manifest(manifest: &[&str]) -> ImageTask {
        ImageTask {
            image: Some(ImageSpec {
                url: "https://img.example.com/a.jpg".to_string(),
                name: "a.jpg".to_string(),
                product_id: "p1".to_string(),
                scale_dimension_max: vec![100, 600],
                crop_dimensions: vec![Dimensions { x: 50, y: 50 }],
                min_x_max_y: vec![Dimensions { x: 40, y: 40 }],
                min_y_max_x: vec![Dimensions { x: 30, y: 30 }],
            }),
            shop_id: 1,
            image_extension: String::new(),
            delete_images: vec![],
            manifest: Some(Arc::new(
                manifest.iter().map(|s| s.to_string()).collect::<HashSet<_>>(),
            )),
        }
    }

    #[test]
    fn prune_drops_present_renditions_of_every_kind() {
        let task = task_with_manifest(&[
            "images/1/p1/100/a.jpg",
            "images/1/p1/minxmaxy/40x40/a.jpg",
            "images/1/p1/minymaxx/30x30/a.jpg",
        ]);

        let (pruned, has_work) = prune_against_manifest(&task, "images");
        let image = pruned.image.unwrap();

        assert_eq!(image.scale_dimension_max, vec![600]);
        assert_eq!(image.crop_dimensions, vec![Dimensions { x: 50, y: 50 }]);
        assert!(image.min_x_max_y.is_empty());
        assert!(image.min_y_max_x.is_empty());
        assert!(has_work);
    }

    #[test]
    fn prune_with_everything_present_leaves_no_work() {
        let task = task_with_manifest(&[
            "images/1/p1/100/a.jpg",
            "images/1/p1/600/a.jpg",
            "images/1/p1/50x50/a.jpg",
            "images/1/p1/minxmaxy/40x40/a.jpg",
            "images/1/p1/minymaxx/30x30/a.jpg",
        ]);

        let (pruned, has_work) = prune_against_manifest(&task, "images");
        assert!(!has_work);
        let image = pruned.image.unwrap();
        assert!(image.scale_dimension_max.is_empty());
        assert!(image.min_y_max_x.is_empty());
    }

    #[test]
    fn prune_without_manifest_keeps_everything() {
        let mut task = task_with_manifest(&[]);
        task.manifest = None;

        let (pruned, has_work) = prune_against_manifest(&task, "images");
        assert!(has_work);
        assert_eq!(pruned.image.unwrap().scale_dimension_max, vec![100, 600]);
    }

    #[test]
    fn delete_only_tasks_still_have_work() {
        let task = ImageTask {
            image: None,
            shop_id: 1,
            image_extension: String::new(),
            delete_images: vec!["images/1/p1".to_string()],
            manifest: None,
        };

        let (_, has_work) = prune_against_manifest(&task, "images");
        assert!(has_work);
    }

    #[test]
    fn empty_task_has_no_work() {
        let task = ImageTask {
            image: None,
            shop_id: 1,
            image_extension: String::new(),
            delete_images: vec![],
            manifest: None,
        };

        let (_, has_work) = prune_against_manifest(&task, "images");
        assert!(!has_work);
    }
}
