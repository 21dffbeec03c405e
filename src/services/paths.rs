//! Canonical blob-store keys.
//!
//! A rendition lives at `<prefix>/<shop>/<product>/<kind>/<file>` where the
//! kind segment is the scale maximum (`1000`), the crop size (`100x100`),
//! `minxmaxy/100x100` or `minymaxx/100x100`; the untransformed main image
//! has no kind segment.

use crate::models::job::RenditionKind;

/// Build the key for an image or one of its renditions. Empty segments are
/// omitted, so the same function covers the shop prefix (`sub_path("",
/// Some(shop), "", None, "")`) and every full key.
pub fn sub_path(
    prefix: &str,
    shop_id: Option<i64>,
    product_id: &str,
    kind: Option<&RenditionKind>,
    file_name: &str,
) -> String {
    let shop = shop_id.map(|id| id.to_string()).unwrap_or_default();
    let kind_segment = kind.map(segment).unwrap_or_default();
    join(&[prefix, &shop, product_id, &kind_segment, file_name])
}

fn segment(kind: &RenditionKind) -> String {
    match kind {
        RenditionKind::Scale(max) => max.to_string(),
        RenditionKind::Crop(d) => format!("{}x{}", d.x, d.y),
        RenditionKind::MinXMaxY(d) => format!("minxmaxy/{}x{}", d.x, d.y),
        RenditionKind::MinYMaxX(d) => format!("minymaxx/{}x{}", d.x, d.y),
    }
}

/// Join path segments with `/`, skipping empty ones.
pub fn join(segments: &[&str]) -> String {
    segments
        .iter()
        .filter(|s| !s.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join("/")
}

/// Rewrite delete paths that embed the images folder at a positive offset
/// so that they start at the folder. Upstream callers sometimes pass full
/// CDN URLs instead of bucket keys.
pub fn sanitize_delete_paths(paths: &[String], images_folder: &str) -> Vec<String> {
    paths
        .iter()
        .map(|path| match path.find(images_folder) {
            Some(idx) if idx > 0 => path[idx..].to_string(),
            _ => path.clone(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::job::Dimensions;

    #[test]
    fn empty_inputs_yield_an_empty_key() {
        assert_eq!(sub_path("", None, "", None, ""), "");
    }

    #[test]
    fn only_prefix() {
        assert_eq!(sub_path("myprefix", None, "", None, ""), "myprefix");
    }

    #[test]
    fn only_shop_id_zero() {
        assert_eq!(sub_path("", Some(0), "", None, ""), "0");
    }

    #[test]
    fn only_file_name() {
        assert_eq!(sub_path("", None, "", None, "file.name"), "file.name");
    }

    #[test]
    fn only_scale_dimension() {
        assert_eq!(
            sub_path("", None, "", Some(&RenditionKind::Scale(1000)), ""),
            "1000"
        );
    }

    #[test]
    fn only_crop_dimensions() {
        let crop = RenditionKind::Crop(Dimensions { x: 100, y: 100 });
        assert_eq!(sub_path("", None, "", Some(&crop), ""), "100x100");
    }

    #[test]
    fn full_key_with_scale() {
        assert_eq!(
            sub_path(
                "prefix",
                Some(1),
                "asd",
                Some(&RenditionKind::Scale(1000)),
                "file.name"
            ),
            "prefix/1/asd/1000/file.name"
        );
    }

    #[test]
    fn full_key_with_crop() {
        let crop = RenditionKind::Crop(Dimensions { x: 100, y: 100 });
        assert_eq!(
            sub_path("prefix", Some(1), "asd", Some(&crop), "file.name"),
            "prefix/1/asd/100x100/file.name"
        );
    }

    #[test]
    fn full_key_with_min_x_max_y() {
        let kind = RenditionKind::MinXMaxY(Dimensions { x: 100, y: 100 });
        assert_eq!(
            sub_path("prefix", Some(1), "asd", Some(&kind), "file.name"),
            "prefix/1/asd/minxmaxy/100x100/file.name"
        );
    }

    #[test]
    fn full_key_with_min_y_max_x() {
        let kind = RenditionKind::MinYMaxX(Dimensions { x: 100, y: 100 });
        assert_eq!(
            sub_path("prefix", Some(1), "asd", Some(&kind), "file.name"),
            "prefix/1/asd/minymaxx/100x100/file.name"
        );
    }

    #[test]
    fn sub_path_is_deterministic() {
        let kind = RenditionKind::Crop(Dimensions { x: 640, y: 480 });
        let a = sub_path("prefix", Some(3), "p", Some(&kind), "f.png");
        let b = sub_path("prefix", Some(3), "p", Some(&kind), "f.png");
        assert_eq!(a, b);
    }

    #[test]
    fn sanitize_rewrites_embedded_folder() {
        let paths = vec!["https://cdn.example.com/images/1/asd".to_string()];
        assert_eq!(
            sanitize_delete_paths(&paths, "images"),
            vec!["images/1/asd".to_string()]
        );
    }

    #[test]
    fn sanitize_keeps_paths_already_at_the_folder() {
        let paths = vec!["images/1/asd".to_string()];
        assert_eq!(sanitize_delete_paths(&paths, "images"), paths);
    }

    #[test]
    fn sanitize_keeps_paths_without_the_folder() {
        let paths = vec!["other/1/asd".to_string()];
        assert_eq!(sanitize_delete_paths(&paths, "images"), paths);
    }
}
