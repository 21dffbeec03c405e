//! Pure placement math for renditions.
//!
//! All arithmetic is on integers; the intermediate scaling ratio is f64 and
//! the result truncates toward zero.

use image::{DynamicImage, GenericImageView, Rgba};

use crate::models::job::RenditionKind;

/// Where a scaled source lands inside its output canvas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    /// Scaled image size.
    pub width: u32,
    pub height: u32,
    /// Output canvas size.
    pub canvas_width: u32,
    pub canvas_height: u32,
    /// Top-left corner of the scaled image on the canvas. May be negative
    /// when the scaled image overhangs the canvas; the overhang is clipped.
    pub origin_x: i64,
    pub origin_y: i64,
}

impl Placement {
    /// True when the scaled image exactly covers the canvas (no padding).
    pub fn is_pure_scale(&self) -> bool {
        self.origin_x == 0
            && self.origin_y == 0
            && self.width == self.canvas_width
            && self.height == self.canvas_height
    }
}

/// Compute the scaled size and canvas placement for one rendition.
pub fn placement(source: (u32, u32), kind: &RenditionKind) -> Result<Placement, GeometryError> {
    match *kind {
        RenditionKind::Scale(max) => {
            let (w, h) = scale_max(source, max)?;
            Ok(Placement {
                width: w,
                height: h,
                canvas_width: w,
                canvas_height: h,
                origin_x: 0,
                origin_y: 0,
            })
        }
        RenditionKind::Crop(dim) => {
            let (w, h) = scale_max(source, dim.x.max(dim.y))?;
            Ok(Placement {
                width: w,
                height: h,
                canvas_width: dim.x,
                canvas_height: dim.y,
                origin_x: (i64::from(dim.x) - i64::from(w)) / 2,
                origin_y: (i64::from(dim.y) - i64::from(h)) / 2,
            })
        }
        RenditionKind::MinXMaxY(dim) => {
            if dim.x == 0 && dim.y == 0 {
                return Err(GeometryError::NoDimensions);
            }
            let (sx, sy) = source;
            let h = dim.y;
            let w = (f64::from(sx) / (f64::from(sy) / f64::from(h))) as u32;
            let canvas_width = w.max(dim.x);
            Ok(Placement {
                width: w,
                height: h,
                canvas_width,
                canvas_height: h,
                origin_x: i64::from((canvas_width - w) / 2),
                origin_y: 0,
            })
        }
        RenditionKind::MinYMaxX(dim) => {
            if dim.x == 0 && dim.y == 0 {
                return Err(GeometryError::NoDimensions);
            }
            let (sx, sy) = source;
            let w = dim.x;
            let h = (f64::from(sy) / (f64::from(sx) / f64::from(w))) as u32;
            let canvas_height = h.max(dim.y);
            Ok(Placement {
                width: w,
                height: h,
                canvas_width: w,
                canvas_height,
                origin_x: 0,
                origin_y: i64::from((canvas_height - h) / 2),
            })
        }
    }
}

/// Map the longer source side to `max` and scale the shorter side to keep
/// the aspect ratio, truncating.
pub fn scale_max(source: (u32, u32), max: u32) -> Result<(u32, u32), GeometryError> {
    if max == 0 {
        return Err(GeometryError::NoDimensions);
    }
    let (sx, sy) = source;
    if sx > sy {
        let h = (f64::from(sy) / (f64::from(sx) / f64::from(max))) as u32;
        Ok((max, h))
    } else {
        let w = (f64::from(sx) / (f64::from(sy) / f64::from(max))) as u32;
        Ok((w, max))
    }
}

/// Background fill for padded canvases: a color shared by at least three of
/// the four source corners, otherwise opaque white. A photo can plausibly
/// occupy two corners, so two matches are not enough.
pub fn background_color(img: &DynamicImage) -> Rgba<u8> {
    let (w, h) = img.dimensions();
    if w == 0 || h == 0 {
        return Rgba([255, 255, 255, 255]);
    }

    let corners = [
        img.get_pixel(0, 0),
        img.get_pixel(w - 1, 0),
        img.get_pixel(0, h - 1),
        img.get_pixel(w - 1, h - 1),
    ];

    for corner in corners {
        if corners.iter().filter(|&&other| other == corner).count() > 2 {
            return corner;
        }
    }

    Rgba([255, 255, 255, 255])
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum GeometryError {
    #[error("no dimensions defined")]
    NoDimensions,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::job::Dimensions;
    use image::RgbaImage;

    #[test]
    fn scale_max_landscape() {
        assert_eq!(scale_max((2000, 1000), 1000).unwrap(), (1000, 500));
    }

    #[test]
    fn scale_max_portrait() {
        assert_eq!(scale_max((1000, 2000), 1000).unwrap(), (500, 1000));
    }

    #[test]
    fn scale_max_square_maps_height() {
        // Equal sides take the portrait branch.
        assert_eq!(scale_max((800, 800), 400).unwrap(), (400, 400));
    }

    #[test]
    fn scale_max_zero_fails() {
        assert_eq!(scale_max((100, 100), 0), Err(GeometryError::NoDimensions));
    }

    #[test]
    fn crop_centers_the_scaled_image() {
        let p = placement(
            (2000, 1000),
            &RenditionKind::Crop(Dimensions { x: 500, y: 500 }),
        )
        .unwrap();
        assert_eq!((p.width, p.height), (500, 250));
        assert_eq!((p.canvas_width, p.canvas_height), (500, 500));
        assert_eq!((p.origin_x, p.origin_y), (0, 125));
        assert!(!p.is_pure_scale());
    }

    #[test]
    fn crop_origin_goes_negative_on_overhang() {
        // Tall target, wide source: the scaled width exceeds the canvas.
        let p = placement(
            (2000, 1000),
            &RenditionKind::Crop(Dimensions { x: 500, y: 1000 }),
        )
        .unwrap();
        assert_eq!((p.width, p.height), (1000, 500));
        assert_eq!((p.canvas_width, p.canvas_height), (500, 1000));
        assert_eq!(p.origin_x, -250);
        assert_eq!(p.origin_y, 250);
    }

    #[test]
    fn scale_placement_is_pure() {
        let p = placement((2000, 1000), &RenditionKind::Scale(1000)).unwrap();
        assert!(p.is_pure_scale());
        assert_eq!((p.canvas_width, p.canvas_height), (1000, 500));
    }

    #[test]
    fn min_x_max_y_pads_narrow_results() {
        // 1000x2000 source at most 500 tall scales to 250x500, then pads to
        // at least 400 wide.
        let p = placement(
            (1000, 2000),
            &RenditionKind::MinXMaxY(Dimensions { x: 400, y: 500 }),
        )
        .unwrap();
        assert_eq!((p.width, p.height), (250, 500));
        assert_eq!((p.canvas_width, p.canvas_height), (400, 500));
        assert_eq!((p.origin_x, p.origin_y), (75, 0));
    }

    #[test]
    fn min_x_max_y_keeps_wide_results() {
        let p = placement(
            (2000, 1000),
            &RenditionKind::MinXMaxY(Dimensions { x: 400, y: 500 }),
        )
        .unwrap();
        assert_eq!((p.width, p.height), (1000, 500));
        assert_eq!((p.canvas_width, p.canvas_height), (1000, 500));
        assert_eq!((p.origin_x, p.origin_y), (0, 0));
    }

    #[test]
    fn min_y_max_x_is_the_transpose() {
        let p = placement(
            (2000, 1000),
            &RenditionKind::MinYMaxX(Dimensions { x: 500, y: 400 }),
        )
        .unwrap();
        assert_eq!((p.width, p.height), (500, 250));
        assert_eq!((p.canvas_width, p.canvas_height), (500, 400));
        assert_eq!((p.origin_x, p.origin_y), (0, 75));
    }

    #[test]
    fn min_dimensions_both_zero_fail() {
        let zero = Dimensions { x: 0, y: 0 };
        assert_eq!(
            placement((100, 100), &RenditionKind::MinXMaxY(zero)),
            Err(GeometryError::NoDimensions)
        );
        assert_eq!(
            placement((100, 100), &RenditionKind::MinYMaxX(zero)),
            Err(GeometryError::NoDimensions)
        );
    }

    fn image_with_corners(corners: [Rgba<u8>; 4]) -> DynamicImage {
        let mut img = RgbaImage::from_pixel(10, 10, Rgba([0, 0, 0, 255]));
        img.put_pixel(0, 0, corners[0]);
        img.put_pixel(9, 0, corners[1]);
        img.put_pixel(0, 9, corners[2]);
        img.put_pixel(9, 9, corners[3]);
        DynamicImage::ImageRgba8(img)
    }

    const RED: Rgba<u8> = Rgba([255, 0, 0, 255]);
    const BLUE: Rgba<u8> = Rgba([0, 0, 255, 255]);
    const WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);

    #[test]
    fn three_matching_corners_pick_the_background() {
        let img = image_with_corners([RED, RED, RED, BLUE]);
        assert_eq!(background_color(&img), RED);
    }

    #[test]
    fn four_matching_corners_pick_the_background() {
        let img = image_with_corners([BLUE, BLUE, BLUE, BLUE]);
        assert_eq!(background_color(&img), BLUE);
    }

    #[test]
    fn two_matching_corners_fall_back_to_white() {
        let img = image_with_corners([RED, RED, BLUE, BLUE]);
        assert_eq!(background_color(&img), WHITE);
    }
}
