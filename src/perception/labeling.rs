/// Label assignment: short codes (A1, A2 … B1 …) for the elements worth marking.
///
/// Elements are converted to screen space, ordered by the configured policy,
/// filtered, and then placed greedily: a candidate whose marker would sit too
/// close to an already-placed marker is skipped.
use crate::config::{LabelOrder, LabelingConfig};
use crate::perception::types::{
    Element, LabelMap, LabelMapEntry, ResolutionScale, ScreenPoint, ScreenRect,
};

/// Generator for label codes in strictly increasing order.
///
/// Digits run 1..=9 inside a prefix. After 9 the trailing letter advances,
/// skipping `I` (too close to `1`/`l`); after `Z` a new `A` is appended, so
/// `Z9` is followed by `ZA1`.
#[derive(Debug, Clone)]
pub struct LabelSequence {
    prefix: Vec<char>,
    counter: u32,
}

impl LabelSequence {
    pub fn new() -> Self {
        Self {
            prefix: vec!['A'],
            counter: 1,
        }
    }
}

impl Default for LabelSequence {
    fn default() -> Self {
        Self::new()
    }
}

impl Iterator for LabelSequence {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        if self.counter > 9 {
            self.counter = 1;
            let last = *self.prefix.last()?;
            if last == 'Z' {
                self.prefix.push('A');
            } else {
                let mut next = char::from(last as u8 + 1);
                if next == 'I' {
                    next = 'J';
                }
                if let Some(slot) = self.prefix.last_mut() {
                    *slot = next;
                }
            }
        }
        let label: String = self.prefix.iter().collect::<String>() + &self.counter.to_string();
        self.counter += 1;
        Some(label)
    }
}

struct Candidate<'a> {
    element: &'a Element,
    rect: ScreenRect,
}

/// Build the label map for one capture.
pub fn assign_labels(
    elements: &[Element],
    scale: &ResolutionScale,
    cfg: &LabelingConfig,
) -> LabelMap {
    let label_w = cfg.label_width as i32;
    let label_h = cfg.label_height as i32;
    let big = cfg.big_component as i32;

    let mut candidates: Vec<Candidate> = elements
        .iter()
        .map(|element| Candidate {
            element,
            rect: scale.to_screen(&element.bbox),
        })
        .collect();

    match cfg.order {
        LabelOrder::ReadingOrder => {
            let bucket = (label_h * 2).max(1);
            candidates.sort_by_key(|c| (c.rect.y.div_euclid(bucket), c.rect.x));
        }
        LabelOrder::LargestFirst => {
            candidates.sort_by_key(|c| std::cmp::Reverse(c.rect.area()));
        }
    }

    let max_dx = cfg.overlap_x * label_w as f64;
    let max_dy = cfg.overlap_y * label_h as f64;

    let mut codes = LabelSequence::new();
    let mut placed: Vec<ScreenPoint> = Vec::new();
    let mut map = LabelMap::default();
    let mut too_small = 0usize;
    let mut crowded = 0usize;

    for c in candidates {
        let text = c.element.text().trim();
        if !text.is_empty() && text.chars().count() < cfg.min_text_len {
            continue;
        }
        if c.rect.height < label_h {
            too_small += 1;
            continue;
        }

        let anchor = if c.rect.width > big && c.rect.height > big {
            ScreenPoint {
                x: (c.rect.x as f64 + c.rect.width as f64 / 2.0 - label_w as f64).round() as i32,
                y: (c.rect.y as f64 + c.rect.height as f64 / 2.0 - label_h as f64).round() as i32,
            }
        } else {
            ScreenPoint {
                x: (c.rect.x as f64 - label_w as f64 / 2.0).round() as i32,
                y: (c.rect.y as f64 - label_h as f64 / 2.0).round() as i32,
            }
        };

        let too_close = placed.iter().any(|p| {
            ((anchor.x - p.x).abs() as f64) < max_dx && ((anchor.y - p.y).abs() as f64) < max_dy
        });
        if too_close {
            crowded += 1;
            continue;
        }

        let Some(label) = codes.next() else { break };
        placed.push(anchor);
        map.insert(
            label,
            anchor,
            LabelMapEntry {
                text: text.to_string(),
                rect: c.rect,
            },
        );
    }

    tracing::debug!(
        elements = elements.len(),
        labelled = map.len(),
        too_small,
        crowded,
        order = ?cfg.order,
        "labels assigned"
    );

    map
}
