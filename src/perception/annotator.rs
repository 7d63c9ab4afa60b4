/// Draw label markers onto a screenshot.
///
/// Each marker is a small yellow box at its anchor with the label code in
/// black. Marker geometry lives in screen (input) pixels, so everything is
/// multiplied by the display pixel ratio before drawing on the physical capture.
use crate::errors::{PilotError, PilotResult};
use crate::perception::types::LabelMap;

const GRADIENT_TOP: [u8; 3] = [0xEF, 0xDD, 0x88];
const GRADIENT_BOTTOM: [u8; 3] = [0xEB, 0xD8, 0x72];
const OUTLINE: [u8; 4] = [0xEB, 0xD8, 0x72, 255];
const INK: [u8; 4] = [0, 0, 0, 255];
const OUTLINE_PX: i32 = 2;

/// Marker box size in screen pixels.
#[derive(Debug, Clone, Copy)]
pub struct MarkerStyle {
    pub width: u32,
    pub height: u32,
}

/// Annotate `src_bytes` (PNG) with one marker per label.
/// `pixel_ratio` is physical pixels per screen pixel on each axis.
/// Returns PNG-encoded bytes.
pub fn annotate_labels(
    src_bytes: &[u8],
    labels: &LabelMap,
    pixel_ratio: (f64, f64),
    style: MarkerStyle,
) -> PilotResult<Vec<u8>> {
    let img = image::load_from_memory(src_bytes)
        .map_err(|e| PilotError::Perception(format!("annotate load: {e}")))?;
    let mut canvas = img.to_rgba8();
    let (rx, ry) = pixel_ratio;

    let box_w = ((style.width as f64 * rx).round() as i32).max(1);
    let box_h = ((style.height as f64 * ry).round() as i32).max(1);

    let (canvas_w, canvas_h) = (canvas.width() as i32, canvas.height() as i32);
    for marker in labels.markers() {
        // Anchors near the edges can fall outside the capture; the box is kept
        // fully on canvas so the code stays readable.
        let x = ((marker.anchor.x as f64 * rx).round() as i32).min(canvas_w - box_w).max(0);
        let y = ((marker.anchor.y as f64 * ry).round() as i32).min(canvas_h - box_h).max(0);
        draw_marker(&mut canvas, x, y, box_w, box_h, &marker.label);
    }

    let mut out = Vec::new();
    image::DynamicImage::ImageRgba8(canvas)
        .write_to(&mut std::io::Cursor::new(&mut out), image::ImageFormat::Png)
        .map_err(|e| PilotError::Perception(format!("PNG encode: {e}")))?;

    tracing::debug!(markers = labels.len(), "capture annotated");
    Ok(out)
}

// ── Drawing primitives ──────────────────────────────────────────────────────

fn draw_marker(canvas: &mut image::RgbaImage, x: i32, y: i32, w: i32, h: i32, label: &str) {
    fill_gradient(canvas, x, y, w, h);
    draw_rect(canvas, x, y, x + w - 1, y + h - 1, OUTLINE, OUTLINE_PX);

    // Largest glyph scale that fits inside the outline.
    let inner_h = (h - 2 * OUTLINE_PX).max(5);
    let chars = label.chars().count().max(1) as i32;
    let inner_w = (w - 2 * OUTLINE_PX).max(6 * chars);
    let scale = (inner_h / 5).min(inner_w / (6 * chars)).max(1);

    let text_w = chars * 6 * scale - scale;
    let text_h = 5 * scale;
    let tx = x + (w - text_w) / 2;
    let ty = y + (h - text_h) / 2;
    for (i, c) in label.to_uppercase().chars().enumerate() {
        draw_mini_glyph(canvas, c, tx + i as i32 * 6 * scale, ty, INK, scale);
    }
}

fn fill_gradient(canvas: &mut image::RgbaImage, x: i32, y: i32, w: i32, h: i32) {
    for dy in 0..h {
        let t = if h > 1 { dy as f32 / (h - 1) as f32 } else { 0.0 };
        let col = [
            lerp(GRADIENT_TOP[0], GRADIENT_BOTTOM[0], t),
            lerp(GRADIENT_TOP[1], GRADIENT_BOTTOM[1], t),
            lerp(GRADIENT_TOP[2], GRADIENT_BOTTOM[2], t),
            255,
        ];
        for dx in 0..w {
            set_pixel(canvas, x + dx, y + dy, col);
        }
    }
}

fn lerp(a: u8, b: u8, t: f32) -> u8 {
    (a as f32 + (b as f32 - a as f32) * t).round() as u8
}

fn draw_rect(canvas: &mut image::RgbaImage, x1: i32, y1: i32, x2: i32, y2: i32, col: [u8; 4], thickness: i32) {
    for t in 0..thickness {
        for x in x1..=x2 {
            set_pixel(canvas, x, y1 + t, col);
            set_pixel(canvas, x, y2 - t, col);
        }
        for y in y1..=y2 {
            set_pixel(canvas, x1 + t, y, col);
            set_pixel(canvas, x2 - t, y, col);
        }
    }
}

/// 5×5 glyphs, drawn at `scale` pixels per bit.
fn draw_mini_glyph(canvas: &mut image::RgbaImage, c: char, px: i32, py: i32, col: [u8; 4], scale: i32) {
    let glyph = match c {
        '0'..='9' => MINI_FONT[(c as u8 - b'0') as usize],
        'A'..='Z' => MINI_FONT[10 + (c as u8 - b'A') as usize],
        _ => return,
    };
    for (row, &bits) in glyph.iter().enumerate() {
        for bit in 0..5 {
            if (bits >> (4 - bit)) & 1 == 0 {
                continue;
            }
            for sy in 0..scale {
                for sx in 0..scale {
                    set_pixel(canvas, px + bit * scale + sx, py + row as i32 * scale + sy, col);
                }
            }
        }
    }
}

/// Alpha-blended write; out-of-bounds coordinates are ignored.
fn set_pixel(canvas: &mut image::RgbaImage, x: i32, y: i32, col: [u8; 4]) {
    let (w, h) = canvas.dimensions();
    if x < 0 || y < 0 || x >= w as i32 || y >= h as i32 {
        return;
    }
    let p = canvas.get_pixel_mut(x as u32, y as u32);
    let a = col[3] as f32 / 255.0;
    p[0] = (p[0] as f32 * (1.0 - a) + col[0] as f32 * a).round() as u8;
    p[1] = (p[1] as f32 * (1.0 - a) + col[1] as f32 * a).round() as u8;
    p[2] = (p[2] as f32 * (1.0 - a) + col[2] as f32 * a).round() as u8;
    p[3] = 255;
}

const MINI_FONT: [[u8; 5]; 36] = [
    [0b01110, 0b10001, 0b10001, 0b10001, 0b01110], // 0
    [0b00100, 0b01100, 0b00100, 0b00100, 0b01110], // 1
    [0b01110, 0b10001, 0b00110, 0b01000, 0b11111], // 2
    [0b11110, 0b00001, 0b00110, 0b00001, 0b11110], // 3
    [0b00110, 0b01010, 0b10010, 0b11111, 0b00010], // 4
    [0b11111, 0b10000, 0b11110, 0b00001, 0b11110], // 5
    [0b01110, 0b10000, 0b11110, 0b10001, 0b01110], // 6
    [0b11111, 0b00001, 0b00010, 0b00100, 0b00100], // 7
    [0b01110, 0b10001, 0b01110, 0b10001, 0b01110], // 8
    [0b01110, 0b10001, 0b01111, 0b00001, 0b01110], // 9
    [0b01110, 0b10001, 0b11111, 0b10001, 0b10001], // A
    [0b11110, 0b10001, 0b11110, 0b10001, 0b11110], // B
    [0b01110, 0b10000, 0b10000, 0b10000, 0b01110], // C
    [0b11100, 0b10010, 0b10001, 0b10010, 0b11100], // D
    [0b11111, 0b10000, 0b11110, 0b10000, 0b11111], // E
    [0b11111, 0b10000, 0b11110, 0b10000, 0b10000], // F
    [0b01110, 0b10000, 0b10011, 0b10001, 0b01110], // G
    [0b10001, 0b10001, 0b11111, 0b10001, 0b10001], // H
    [0b01110, 0b00100, 0b00100, 0b00100, 0b01110], // I
    [0b00111, 0b00010, 0b00010, 0b10010, 0b01100], // J
    [0b10001, 0b10010, 0b11100, 0b10010, 0b10001], // K
    [0b10000, 0b10000, 0b10000, 0b10000, 0b11111], // L
    [0b10001, 0b11011, 0b10101, 0b10001, 0b10001], // M
    [0b10001, 0b11001, 0b10101, 0b10011, 0b10001], // N
    [0b01110, 0b10001, 0b10001, 0b10001, 0b01110], // O
    [0b11110, 0b10001, 0b11110, 0b10000, 0b10000], // P
    [0b01110, 0b10001, 0b10101, 0b10010, 0b01101], // Q
    [0b11110, 0b10001, 0b11110, 0b10010, 0b10001], // R
    [0b01111, 0b10000, 0b01110, 0b00001, 0b11110], // S
    [0b11111, 0b00100, 0b00100, 0b00100, 0b00100], // T
    [0b10001, 0b10001, 0b10001, 0b10001, 0b01110], // U
    [0b10001, 0b10001, 0b10001, 0b01010, 0b00100], // V
    [0b10001, 0b10001, 0b10101, 0b11011, 0b10001], // W
    [0b10001, 0b01010, 0b00100, 0b01010, 0b10001], // X
    [0b10001, 0b01010, 0b00100, 0b00100, 0b00100], // Y
    [0b11111, 0b00010, 0b00100, 0b01000, 0b11111], // Z
];

#[cfg(test)]
mod tests {
    use super::*;
    use crate::perception::types::{LabelMapEntry, ScreenPoint, ScreenRect};

    fn blank_png(w: u32, h: u32) -> Vec<u8> {
        let img = image::RgbaImage::from_pixel(w, h, image::Rgba([255, 255, 255, 255]));
        let mut out = Vec::new();
        image::DynamicImage::ImageRgba8(img)
            .write_to(&mut std::io::Cursor::new(&mut out), image::ImageFormat::Png)
            .unwrap();
        out
    }

    fn one_label(x: i32, y: i32) -> LabelMap {
        let mut map = LabelMap::default();
        map.insert(
            "A1".into(),
            ScreenPoint { x, y },
            LabelMapEntry {
                text: "Inbox".into(),
                rect: ScreenRect { x: x + 12, y: y + 6, width: 60, height: 20 },
            },
        );
        map
    }

    const STYLE: MarkerStyle = MarkerStyle { width: 24, height: 12 };

    #[test]
    fn marker_is_drawn_at_scaled_anchor() {
        let png = annotate_labels(&blank_png(200, 100), &one_label(10, 10), (2.0, 2.0), STYLE).unwrap();
        let img = image::load_from_memory(&png).unwrap().to_rgba8();
        assert_eq!(img.dimensions(), (200, 100));
        // Outline at the physical anchor.
        assert_eq!(img.get_pixel(20, 20).0, OUTLINE);
        // Untouched beyond the 48×24 box.
        assert_eq!(img.get_pixel(70, 20).0, [255, 255, 255, 255]);
        // Some ink inside the box.
        let inked = (20..68)
            .flat_map(|x| (20..44).map(move |y| (x, y)))
            .any(|(x, y)| img.get_pixel(x, y).0 == INK);
        assert!(inked);
    }

    fn ink_count(png: &[u8]) -> usize {
        let img = image::load_from_memory(png).unwrap().to_rgba8();
        img.pixels().filter(|p| p.0 == INK).count()
    }

    #[test]
    fn markers_past_the_top_left_edge_are_pulled_on_canvas() {
        let inside = annotate_labels(&blank_png(200, 100), &one_label(50, 50), (1.0, 1.0), STYLE).unwrap();
        let edge = annotate_labels(&blank_png(200, 100), &one_label(-12, -6), (1.0, 1.0), STYLE).unwrap();
        assert_eq!(ink_count(&edge), ink_count(&inside));
        let img = image::load_from_memory(&edge).unwrap().to_rgba8();
        assert_eq!(img.get_pixel(0, 0).0, OUTLINE);
    }

    #[test]
    fn markers_past_the_bottom_right_edge_are_pulled_on_canvas() {
        let png = annotate_labels(&blank_png(50, 30), &one_label(45, 28), (1.0, 1.0), STYLE).unwrap();
        let img = image::load_from_memory(&png).unwrap().to_rgba8();
        assert_eq!((img.width(), img.height()), (50, 30));
        assert_eq!(img.get_pixel(49, 29).0, OUTLINE);
        assert_eq!(img.get_pixel(26, 18).0, OUTLINE);
    }

    #[test]
    fn empty_label_map_leaves_image_unchanged() {
        let png = annotate_labels(&blank_png(20, 20), &LabelMap::default(), (1.0, 1.0), STYLE).unwrap();
        let img = image::load_from_memory(&png).unwrap().to_rgba8();
        assert!(img.pixels().all(|p| p.0 == [255, 255, 255, 255]));
    }
}
