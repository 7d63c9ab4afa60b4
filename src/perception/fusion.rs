/// Element fusion: OCR regions and visual components into one element list.
///
/// Everything ends up in the component detector's coordinate space. No
/// deduplication happens here; overlap handling belongs to label assignment.
use crate::perception::types::{BoundingBox, Detections, Element, ElementSource, TextDetections};

/// Fuse one OCR result with one component-detection result for the same capture.
///
/// Text shorter than `min_text_len` characters (after trimming) is dropped.
/// Components come first in detector order, then text regions in OCR order.
pub fn fuse(
    text: Option<&TextDetections>,
    components: Option<&Detections>,
    min_text_len: usize,
) -> Detections {
    let resolution = match (components, text) {
        (Some(c), _) if c.resolution.0 > 0 && c.resolution.1 > 0 => c.resolution,
        (_, Some(t)) => t.resolution,
        (Some(c), None) => c.resolution,
        (None, None) => (0, 0),
    };

    let mut elements: Vec<Element> = components
        .map(|c| c.elements.clone())
        .unwrap_or_default();
    let component_count = elements.len();

    if let Some(text) = text {
        let (sx, sy) = axis_ratio(text.resolution, resolution);
        for region in &text.regions {
            let content = region.text.trim();
            if content.chars().count() < min_text_len {
                continue;
            }
            let Some(bbox) = BoundingBox::enclosing(&region.polygon) else {
                continue;
            };
            elements.push(Element {
                bbox: bbox.scaled(sx, sy),
                content: Some(content.to_string()),
                source: ElementSource::Text,
            });
        }
    }

    tracing::debug!(
        components = component_count,
        text = elements.len() - component_count,
        resolution = ?resolution,
        "detections fused"
    );

    Detections { resolution, elements }
}

fn axis_ratio(from: (u32, u32), to: (u32, u32)) -> (f64, f64) {
    if from.0 == 0 || from.1 == 0 || to.0 == 0 || to.1 == 0 {
        return (1.0, 1.0);
    }
    (to.0 as f64 / from.0 as f64, to.1 as f64 / from.1 as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::perception::types::TextRegion;

    fn region(text: &str, x: i32, y: i32) -> TextRegion {
        TextRegion {
            text: text.into(),
            polygon: vec![(x, y), (x + 40, y), (x + 40, y + 20), (x, y + 20)],
        }
    }

    fn component(l: f64, t: f64, r: f64, b: f64) -> Element {
        Element {
            bbox: BoundingBox::new(l, t, r, b),
            content: None,
            source: ElementSource::Component,
        }
    }

    #[test]
    fn both_empty_is_empty_not_error() {
        let out = fuse(
            Some(&TextDetections { resolution: (100, 100), regions: vec![] }),
            Some(&Detections { resolution: (100, 100), elements: vec![] }),
            2,
        );
        assert!(out.elements.is_empty());
        assert!(fuse(None, None, 2).elements.is_empty());
    }

    #[test]
    fn drops_single_character_text() {
        let text = TextDetections {
            resolution: (200, 100),
            regions: vec![region("x", 0, 0), region(" ok ", 50, 50), region("", 10, 10)],
        };
        let out = fuse(Some(&text), None, 2);
        assert_eq!(out.elements.len(), 1);
        assert_eq!(out.elements[0].content.as_deref(), Some("ok"));
        assert_eq!(out.elements[0].source, ElementSource::Text);
        assert_eq!(out.resolution, (200, 100));
    }

    #[test]
    fn text_is_rescaled_into_component_space() {
        let text = TextDetections {
            resolution: (2000, 1000),
            regions: vec![region("Search", 100, 200)],
        };
        let comps = Detections {
            resolution: (1000, 500),
            elements: vec![component(1.0, 2.0, 30.0, 40.0)],
        };
        let out = fuse(Some(&text), Some(&comps), 2);
        assert_eq!(out.resolution, (1000, 500));
        assert_eq!(out.elements.len(), 2);
        assert_eq!(out.elements[0].source, ElementSource::Component);
        assert_eq!(out.elements[1].bbox, BoundingBox::new(50.0, 100.0, 70.0, 110.0));
    }

    #[test]
    fn overlapping_sources_are_not_deduplicated() {
        let text = TextDetections {
            resolution: (100, 100),
            regions: vec![region("Send", 10, 10)],
        };
        let comps = Detections {
            resolution: (100, 100),
            elements: vec![component(10.0, 10.0, 50.0, 30.0)],
        };
        assert_eq!(fuse(Some(&text), Some(&comps), 2).elements.len(), 2);
    }
}
