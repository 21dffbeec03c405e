//! The rendition engine.
//!
//! Downloads a source image at most once, derives every requested rendition
//! and writes each at its canonical key. Renditions whose destination key is
//! already present in the job's manifest are skipped without touching the
//! network.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use image::{GenericImageView, RgbaImage};

use crate::models::job::{ImageSpec, ImageTask, ProcessError, ProcessErrorKind, RenditionKind};
use crate::services::codec::{self, CodecError, Format};
use crate::services::geometry::{self, GeometryError};
use crate::services::paths;
use crate::services::storage::StorageError;
use crate::services::workers::WorkerContext;

const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(20);

/// Lazily downloaded source bytes, fetched at most once per image spec.
pub struct SourceImage {
    url: String,
    client: reqwest::Client,
    bytes: Option<Vec<u8>>,
}

impl SourceImage {
    pub fn new(url: &str, client: reqwest::Client) -> Self {
        Self {
            url: url.to_string(),
            client,
            bytes: None,
        }
    }

    /// The raw source bytes, downloading on first use.
    pub async fn bytes(&mut self) -> Result<&[u8], reqwest::Error> {
        if self.bytes.is_none() {
            let response = self
                .client
                .get(&self.url)
                .timeout(DOWNLOAD_TIMEOUT)
                .send()
                .await?;
            let body = response.bytes().await?;
            self.bytes = Some(body.to_vec());
        }
        Ok(self.bytes.as_deref().unwrap_or_default())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RenditionError {
    #[error("could not download image: {0}")]
    Download(#[from] reqwest::Error),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Geometry(#[from] GeometryError),

    #[error("could not store image: {0}")]
    Store(#[from] StorageError),
}

/// Execute one worker task end to end, collecting failures instead of
/// aborting on the first. Deletions run even when image processing failed.
pub async fn process_task(ctx: &WorkerContext, task: &ImageTask) -> Vec<ProcessError> {
    tracing::debug!(shop_id = task.shop_id, "processing task");

    let mut errors = Vec::new();
    let delete_paths = paths::sanitize_delete_paths(&task.delete_images, &ctx.images_folder);

    if let Some(image) = &task.image {
        process_image(ctx, task, image, &mut errors).await;
    }

    if let Err(e) = ctx.storage.delete(&delete_paths).await {
        errors.push(ProcessError {
            url: task
                .image
                .as_ref()
                .map(|image| image.url.clone())
                .unwrap_or_default(),
            kind: ProcessErrorKind::Delete,
            msg: e.to_string(),
            dim: String::new(),
        });
    }

    errors
}

async fn process_image(
    ctx: &WorkerContext,
    task: &ImageTask,
    image: &ImageSpec,
    errors: &mut Vec<ProcessError>,
) {
    let started = Instant::now();
    let mut source = SourceImage::new(&image.url, ctx.http.clone());

    // The original upload comes before any rendition. A download failure
    // here means no rendition can be produced either, so the image is
    // abandoned with a single error.
    match upload_main_image(ctx, task, image, &mut source).await {
        Ok(()) => {}
        Err(RenditionError::Download(e)) => {
            errors.push(ProcessError {
                url: image.url.clone(),
                kind: ProcessErrorKind::Upload,
                msg: format!("could not download image: {e}"),
                dim: String::new(),
            });
            return;
        }
        Err(e) => {
            errors.push(ProcessError {
                url: image.url.clone(),
                kind: ProcessErrorKind::Upload,
                msg: e.to_string(),
                dim: String::new(),
            });
        }
    }

    for kind in rendition_kinds(image) {
        if let Err(e) = handle_rendition(ctx, task, image, &mut source, &kind).await {
            errors.push(ProcessError {
                url: image.url.clone(),
                kind: kind.error_kind(),
                msg: e.to_string(),
                dim: kind.dim_string(),
            });
        }
    }

    tracing::debug!(
        name = %image.name,
        shop_id = task.shop_id,
        elapsed = ?started.elapsed(),
        "image processed"
    );
}

fn rendition_kinds(image: &ImageSpec) -> Vec<RenditionKind> {
    let mut kinds = Vec::new();
    kinds.extend(image.scale_dimension_max.iter().map(|&m| RenditionKind::Scale(m)));
    kinds.extend(image.crop_dimensions.iter().map(|&d| RenditionKind::Crop(d)));
    kinds.extend(image.min_x_max_y.iter().map(|&d| RenditionKind::MinXMaxY(d)));
    kinds.extend(image.min_y_max_x.iter().map(|&d| RenditionKind::MinYMaxX(d)));
    kinds
}

/// Upload the untransformed source to the main key, unless it is already
/// present. Happens exactly once per image spec per job.
async fn upload_main_image(
    ctx: &WorkerContext,
    task: &ImageTask,
    image: &ImageSpec,
    source: &mut SourceImage,
) -> Result<(), RenditionError> {
    let key = paths::join(&[
        &ctx.images_folder,
        &paths::sub_path("", Some(task.shop_id), &image.product_id, None, &image.name),
    ]);

    if manifest_contains(task.manifest.as_deref(), &key) {
        return Ok(());
    }

    let bytes = source.bytes().await?;
    let content_type = codec::detect(bytes)
        .map(Format::content_type)
        .unwrap_or_default();
    ctx.storage.put(&key, bytes, content_type).await?;

    metrics::counter!("images_uploaded_total").increment(1);
    Ok(())
}

async fn handle_rendition(
    ctx: &WorkerContext,
    task: &ImageTask,
    image: &ImageSpec,
    source: &mut SourceImage,
    kind: &RenditionKind,
) -> Result<(), RenditionError> {
    let key = paths::join(&[
        &ctx.images_folder,
        &paths::sub_path(
            "",
            Some(task.shop_id),
            &image.product_id,
            Some(kind),
            &image.name,
        ),
    ]);

    if manifest_contains(task.manifest.as_deref(), &key) {
        metrics::counter!("renditions_skipped_total").increment(1);
        return Ok(());
    }

    let bytes = source.bytes().await?;
    let output = render(bytes, kind, &task.image_extension)?;

    // Stored with the content type detected from the source bytes, not the
    // encoded output's.
    let content_type = codec::detect(bytes)
        .map(Format::content_type)
        .unwrap_or_default();
    ctx.storage.put(&key, &output, content_type).await?;

    metrics::counter!("renditions_total").increment(1);
    Ok(())
}

fn manifest_contains(manifest: Option<&HashSet<String>>, key: &str) -> bool {
    manifest.map(|m| m.contains(key)).unwrap_or(false)
}

/// Produce the encoded bytes of one rendition from raw source bytes.
///
/// An empty `default_format` keeps the detected source format as the output
/// format. Non-PNG canvases with padding are pre-filled with the source's
/// background color before compositing.
pub fn render(
    bytes: &[u8],
    kind: &RenditionKind,
    default_format: &str,
) -> Result<Vec<u8>, RenditionError> {
    let detected = codec::detect(bytes)?;
    let format = if default_format.is_empty() {
        detected
    } else {
        Format::parse(default_format)?
    };

    let src = codec::decode(bytes, detected)?;
    let placement = geometry::placement(src.dimensions(), kind)?;

    let scaled = src
        .resize_exact(
            placement.width,
            placement.height,
            image::imageops::FilterType::Nearest,
        )
        .into_rgba8();

    let raster = if placement.is_pure_scale() {
        scaled
    } else {
        let mut canvas = if format == Format::Png {
            RgbaImage::new(placement.canvas_width, placement.canvas_height)
        } else {
            RgbaImage::from_pixel(
                placement.canvas_width,
                placement.canvas_height,
                geometry::background_color(&src),
            )
        };
        image::imageops::overlay(&mut canvas, &scaled, placement.origin_x, placement.origin_y);
        canvas
    };

    Ok(codec::encode(&raster, format)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::job::Dimensions;
    use image::Rgba;

    fn png_of(width: u32, height: u32, color: Rgba<u8>) -> Vec<u8> {
        let raster = RgbaImage::from_pixel(width, height, color);
        codec::encode(&raster, Format::Png).unwrap()
    }

    #[test]
    fn render_scale_produces_the_mandated_dimensions() {
        let bytes = png_of(2000, 1000, Rgba([9, 9, 9, 255]));
        let output = render(&bytes, &RenditionKind::Scale(1000), "").unwrap();

        let decoded = codec::decode(&output, codec::detect(&output).unwrap()).unwrap();
        assert_eq!(decoded.dimensions(), (1000, 500));
    }

    #[test]
    fn render_crop_pads_to_the_canvas() {
        let bytes = png_of(2000, 1000, Rgba([50, 60, 70, 255]));
        let output = render(
            &bytes,
            &RenditionKind::Crop(Dimensions { x: 500, y: 500 }),
            "",
        )
        .unwrap();

        let decoded = codec::decode(&output, Format::Png).unwrap();
        assert_eq!(decoded.dimensions(), (500, 500));

        // Source rows land at y = 125..375; above that is padding, which is
        // transparent for png output.
        let canvas = decoded.into_rgba8();
        assert_eq!(canvas.get_pixel(250, 0)[3], 0);
        assert_eq!(*canvas.get_pixel(250, 250), Rgba([50, 60, 70, 255]));
    }

    #[test]
    fn render_crop_to_jpeg_fills_the_background() {
        // Uniform red source: every corner matches, so the padding is red.
        let bytes = png_of(2000, 1000, Rgba([255, 0, 0, 255]));
        let output = render(
            &bytes,
            &RenditionKind::Crop(Dimensions { x: 500, y: 500 }),
            "jpg",
        )
        .unwrap();

        assert_eq!(codec::detect(&output).unwrap(), Format::Jpg);

        let canvas = codec::decode(&output, Format::Jpg).unwrap().into_rgba8();
        assert_eq!(canvas.dimensions(), (500, 500));
        let padding = canvas.get_pixel(250, 10);
        // JPEG is lossy; the padding must still be unmistakably red.
        assert!(padding[0] > 200 && padding[1] < 60 && padding[2] < 60);
    }

    #[test]
    fn render_min_x_max_y_pads_horizontally() {
        let bytes = png_of(1000, 2000, Rgba([1, 2, 3, 255]));
        let output = render(
            &bytes,
            &RenditionKind::MinXMaxY(Dimensions { x: 400, y: 500 }),
            "",
        )
        .unwrap();

        let decoded = codec::decode(&output, Format::Png).unwrap();
        assert_eq!(decoded.dimensions(), (400, 500));
    }

    #[test]
    fn render_with_webp_output_format_fails() {
        let bytes = png_of(100, 100, Rgba([0, 0, 0, 255]));
        let result = render(&bytes, &RenditionKind::Scale(50), "webp");
        assert!(matches!(
            result,
            Err(RenditionError::Codec(CodecError::UnsupportedFormat(_)))
        ));
    }

    #[test]
    fn render_zero_scale_fails_with_no_dimensions() {
        let bytes = png_of(100, 100, Rgba([0, 0, 0, 255]));
        let result = render(&bytes, &RenditionKind::Scale(0), "");
        assert!(matches!(
            result,
            Err(RenditionError::Geometry(GeometryError::NoDimensions))
        ));
    }

    #[test]
    fn render_garbage_bytes_fails_at_detection() {
        let result = render(b"not an image at all", &RenditionKind::Scale(100), "");
        assert!(matches!(result, Err(RenditionError::Codec(_))));
    }
}
