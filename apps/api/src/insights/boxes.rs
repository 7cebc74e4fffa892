//! Bounding boxes on a 0–1000 scale, `[ymin, xmin, ymax, xmax]`.

use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};

pub type BoundingBox = [u32; 4];

static BOX_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\[\s*(\d+)\s*,\s*(\d+)\s*,\s*(\d+)\s*,\s*(\d+)\s*\]").expect("valid regex")
});

const SCALE: i64 = 1000;

/// First `[y1, x1, y2, x2]` group in a model reply.
pub fn parse_box(text: &str) -> Option<BoundingBox> {
    let caps = BOX_PATTERN.captures(text)?;
    let mut coords = [0u32; 4];
    for (slot, i) in coords.iter_mut().zip(1..=4) {
        *slot = caps[i].parse().ok()?;
    }
    Some(coords)
}

/// `"<upper|mid|lower> <left|central|right> region"` by box centre.
pub fn region_text(bbox: &BoundingBox) -> String {
    let [y1, x1, y2, x2] = bbox.map(f64::from);
    let third = |c: f64, labels: [&'static str; 3]| {
        if c < 333.0 {
            labels[0]
        } else if c < 666.0 {
            labels[1]
        } else {
            labels[2]
        }
    };
    format!(
        "{} {} region",
        third((y1 + y2) / 2.0, ["upper", "mid", "lower"]),
        third((x1 + x2) / 2.0, ["left", "central", "right"])
    )
}

fn seed(diagnosis: &str, image_url: Option<&str>) -> i64 {
    let input = format!("{diagnosis}-{}", image_url.unwrap_or("local"));
    let digest = Sha256::digest(input.as_bytes());
    i64::from(u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]))
}

fn clamped(coords: [i64; 4]) -> BoundingBox {
    coords.map(|c| c.clamp(0, SCALE) as u32)
}

/// Fills in whichever boxes the model did not return.
///
/// Placeholders are deterministic per diagnosis and match image so the
/// overlay stays put across reloads. A synthesized match box is the original
/// box shifted by up to 50 units on each axis.
pub fn fill_missing(
    diagnosis: &str,
    match_image_url: Option<&str>,
    original: Option<BoundingBox>,
    matched: Option<BoundingBox>,
) -> (BoundingBox, BoundingBox) {
    if let (Some(original), Some(matched)) = (original, matched) {
        return (original, matched);
    }

    let h = seed(diagnosis, match_image_url);
    let original = original.unwrap_or_else(|| {
        let y_center = 200 + h % 500;
        let x_center = 200 + (h / 500) % 500;
        let half = (150 + h % 200) / 2;
        clamped([
            y_center - half,
            x_center - half,
            y_center + half,
            x_center + half,
        ])
    });
    let matched = matched.unwrap_or_else(|| {
        let y_shift = -50 + h % 100;
        let x_shift = -50 + (h / 100) % 100;
        let [y1, x1, y2, x2] = original.map(i64::from);
        clamped([y1 + y_shift, x1 + x_shift, y2 + y_shift, x2 + x_shift])
    });
    (original, matched)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_box() {
        assert_eq!(
            parse_box("The finding is at [120, 340 ,560,780] roughly."),
            Some([120, 340, 560, 780])
        );
        assert_eq!(parse_box("no coordinates here"), None);
    }

    #[test]
    fn test_region_text() {
        assert_eq!(region_text(&[100, 700, 200, 900]), "upper right region");
        assert_eq!(region_text(&[400, 300, 600, 500]), "mid central region");
        assert_eq!(region_text(&[700, 0, 900, 200]), "lower left region");
    }

    #[test]
    fn test_fallback_is_deterministic_and_in_range() {
        let a = fill_missing("pneumonia", Some("https://x/1.png"), None, None);
        let b = fill_missing("pneumonia", Some("https://x/1.png"), None, None);
        assert_eq!(a, b);
        for coords in [a.0, a.1] {
            assert!(coords.iter().all(|&c| c <= 1000));
            assert!(coords[0] <= coords[2] && coords[1] <= coords[3]);
        }
        let c = fill_missing("pneumonia", None, None, None);
        assert_ne!(a, c);
    }

    #[test]
    fn test_model_boxes_are_kept() {
        let original = [10, 20, 30, 40];
        let matched = [50, 60, 70, 80];
        assert_eq!(
            fill_missing("x", None, Some(original), Some(matched)),
            (original, matched)
        );
        let (kept, shifted) = fill_missing("x", None, Some(original), None);
        assert_eq!(kept, original);
        for (a, b) in original.iter().zip(shifted.iter()) {
            assert!((*a as i64 - *b as i64).abs() <= 50);
        }
    }
}
