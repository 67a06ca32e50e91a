// 检测框叠加：直接在 BGR24 像素上画框和标签
use crate::error::{InferenceError, Result};
use crate::frame::{Detection, Frame};
use image::{ImageBuffer, Rgb};

type BgrView<'a> = ImageBuffer<Rgb<u8>, &'a mut [u8]>;

// 通道顺序为 BGR
const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const LABEL_BACKGROUND: Rgb<u8> = Rgb([0, 0, 0]);
const BOX_THICKNESS: i32 = 2;
const GLYPH_ADVANCE: i32 = 6;
const GLYPH_HEIGHT: i32 = 7;

/// 在帧上绘制所有检测框与 `label:0.87` 标签
pub fn draw_detections(frame: &mut Frame, detections: &[Detection]) -> Result<()> {
    if detections.is_empty() {
        return Ok(());
    }
    if !frame.is_well_formed() || frame.width == 0 || frame.height == 0 {
        return Err(InferenceError::Overlay(format!(
            "frame #{} has {} bytes, expected {}x{} BGR24",
            frame.sequence_number,
            frame.pixels.len(),
            frame.width,
            frame.height
        )));
    }

    let (width, height) = frame.geometry();
    let mut image: BgrView<'_> = ImageBuffer::from_raw(width, height, frame.pixels.as_mut_slice())
        .ok_or_else(|| InferenceError::Overlay("failed to wrap frame pixels".to_string()))?;

    for detection in detections {
        let (left, top, right, bottom) = detection.bbox.to_pixels(width, height);
        for inset in 0..BOX_THICKNESS {
            draw_rectangle(
                &mut image,
                left + inset,
                top + inset,
                right - inset,
                bottom - inset,
                BOX_COLOR,
            );
        }
    }

    for detection in detections {
        let (left, top, _, _) = detection.bbox.to_pixels(width, height);
        let text = format!("{}:{:.2}", detection.label, detection.confidence);
        let label_x = left.max(0);
        let label_y = (top - GLYPH_HEIGHT - 2).max(0);
        let text_width = text.chars().count() as i32 * GLYPH_ADVANCE;
        fill_rect(
            &mut image,
            label_x,
            label_y,
            label_x + text_width,
            label_y + GLYPH_HEIGHT,
            LABEL_BACKGROUND,
        );
        draw_label(&mut image, label_x + 1, label_y, &text, BOX_COLOR);
    }

    Ok(())
}

fn draw_rectangle(image: &mut BgrView<'_>, left: i32, top: i32, right: i32, bottom: i32, color: Rgb<u8>) {
    if right < left || bottom < top {
        return;
    }
    let width = image.width() as i32;
    let height = image.height() as i32;
    let left = left.clamp(0, width - 1);
    let right = right.clamp(0, width - 1);
    let top = top.clamp(0, height - 1);
    let bottom = bottom.clamp(0, height - 1);

    for x in left..=right {
        image.put_pixel(x as u32, top as u32, color);
        image.put_pixel(x as u32, bottom as u32, color);
    }
    for y in top..=bottom {
        image.put_pixel(left as u32, y as u32, color);
        image.put_pixel(right as u32, y as u32, color);
    }
}

fn fill_rect(image: &mut BgrView<'_>, left: i32, top: i32, right: i32, bottom: i32, color: Rgb<u8>) {
    let width = image.width() as i32;
    let height = image.height() as i32;
    let left = left.clamp(0, width - 1);
    let right = right.clamp(0, width - 1);
    let top = top.clamp(0, height - 1);
    let bottom = bottom.clamp(0, height - 1);

    for y in top..=bottom {
        for x in left..=right {
            image.put_pixel(x as u32, y as u32, color);
        }
    }
}

fn draw_label(image: &mut BgrView<'_>, mut x: i32, y: i32, text: &str, color: Rgb<u8>) {
    let width = image.width() as i32;
    let height = image.height() as i32;
    for ch in text.chars().flat_map(|c| c.to_uppercase()) {
        if let Some(glyph) = glyph_bits(ch) {
            for (row, pattern) in glyph.iter().enumerate() {
                let py = y + row as i32;
                if py < 0 || py >= height {
                    continue;
                }
                for col in 0..5 {
                    if (pattern >> (4 - col)) & 1 == 1 {
                        let px = x + col;
                        if px >= 0 && px < width {
                            image.put_pixel(px as u32, py as u32, color);
                        }
                    }
                }
            }
        }
        x += GLYPH_ADVANCE;
    }
}

/// 5x7 点阵字库；不支持的字符只占位
fn glyph_bits(ch: char) -> Option<[u8; 7]> {
    let bits = match ch {
        'A' => [0b01110, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001],
        'B' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10001, 0b10001, 0b11110],
        'C' => [0b01110, 0b10001, 0b10000, 0b10000, 0b10000, 0b10001, 0b01110],
        'D' => [0b11110, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b11110],
        'E' => [0b11111, 0b10000, 0b11110, 0b10000, 0b10000, 0b10000, 0b11111],
        'F' => [0b11111, 0b10000, 0b11110, 0b10000, 0b10000, 0b10000, 0b10000],
        'G' => [0b01110, 0b10001, 0b10000, 0b10111, 0b10001, 0b10001, 0b01111],
        'H' => [0b10001, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001],
        'I' => [0b01110, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110],
        'J' => [0b00111, 0b00010, 0b00010, 0b00010, 0b00010, 0b10010, 0b01100],
        'K' => [0b10001, 0b10010, 0b10100, 0b11000, 0b10100, 0b10010, 0b10001],
        'L' => [0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b11111],
        'M' => [0b10001, 0b11011, 0b10101, 0b10101, 0b10001, 0b10001, 0b10001],
        'N' => [0b10001, 0b11001, 0b10101, 0b10101, 0b10011, 0b10001, 0b10001],
        'O' => [0b01110, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110],
        'P' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10000, 0b10000, 0b10000],
        'Q' => [0b01110, 0b10001, 0b10001, 0b10001, 0b10101, 0b10010, 0b01101],
        'R' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10100, 0b10010, 0b10001],
        'S' => [0b01111, 0b10000, 0b01110, 0b00001, 0b00001, 0b10001, 0b01110],
        'T' => [0b11111, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100],
        'U' => [0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110],
        'V' => [0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01010, 0b00100],
        'W' => [0b10001, 0b10001, 0b10001, 0b10101, 0b10101, 0b10101, 0b01010],
        'X' => [0b10001, 0b10001, 0b01010, 0b00100, 0b01010, 0b10001, 0b10001],
        'Y' => [0b10001, 0b10001, 0b01010, 0b00100, 0b00100, 0b00100, 0b00100],
        'Z' => [0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b10000, 0b11111],
        '0' => [0b01110, 0b10001, 0b10011, 0b10101, 0b11001, 0b10001, 0b01110],
        '1' => [0b00100, 0b01100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110],
        '2' => [0b01110, 0b10001, 0b00001, 0b00010, 0b00100, 0b01000, 0b11111],
        '3' => [0b11110, 0b00001, 0b00001, 0b01110, 0b00001, 0b00001, 0b11110],
        '4' => [0b00010, 0b00110, 0b01010, 0b10010, 0b11111, 0b00010, 0b00010],
        '5' => [0b11111, 0b10000, 0b11110, 0b00001, 0b00001, 0b10001, 0b01110],
        '6' => [0b00110, 0b01000, 0b10000, 0b11110, 0b10001, 0b10001, 0b01110],
        '7' => [0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b01000, 0b01000],
        '8' => [0b01110, 0b10001, 0b10001, 0b01110, 0b10001, 0b10001, 0b01110],
        '9' => [0b01110, 0b10001, 0b10001, 0b01111, 0b00001, 0b00010, 0b01100],
        ':' => [0, 0b01100, 0b01100, 0, 0b01100, 0b01100, 0],
        '.' => [0, 0, 0, 0, 0, 0b00110, 0b00110],
        '-' => [0, 0, 0, 0b11111, 0, 0, 0],
        '_' => [0, 0, 0, 0, 0, 0, 0b11111],
        ' ' => [0; 7],
        _ => return None,
    };
    Some(bits)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::BoundingBox;

    fn pixel(frame: &Frame, x: u32, y: u32) -> [u8; 3] {
        let idx = ((y * frame.width + x) * 3) as usize;
        [frame.pixels[idx], frame.pixels[idx + 1], frame.pixels[idx + 2]]
    }

    #[test]
    fn test_box_drawn_on_edges_only() {
        let mut frame = Frame::new(vec![0; Frame::byte_len(40, 30)], 40, 30, 1);
        let det = Detection::new("person", 0.87, BoundingBox::new(0.5, 0.5, 0.5, 0.5));

        draw_detections(&mut frame, &[det]).unwrap();

        // 框范围 (10, 7) - (30, 22)，线宽 2
        assert_eq!(pixel(&frame, 10, 15), [0, 255, 0]);
        assert_eq!(pixel(&frame, 11, 15), [0, 255, 0]);
        assert_eq!(pixel(&frame, 30, 15), [0, 255, 0]);
        assert_eq!(pixel(&frame, 20, 22), [0, 255, 0]);
        assert_eq!(pixel(&frame, 20, 15), [0, 0, 0]);
    }

    #[test]
    fn test_label_drawn_above_box() {
        let mut frame = Frame::new(vec![0; Frame::byte_len(120, 60)], 120, 60, 1);
        let det = Detection::new("car", 0.5, BoundingBox::new(0.5, 0.5, 0.5, 0.5));

        draw_detections(&mut frame, &[det]).unwrap();

        let (left, top, _, _) = det_pixels(120, 60);
        let label_rows = (top - GLYPH_HEIGHT - 2).max(0) as u32..top as u32;
        let lit = label_rows
            .flat_map(|y| (left as u32..left as u32 + 40).map(move |x| (x, y)))
            .filter(|&(x, y)| pixel(&frame, x, y) == [0, 255, 0])
            .count();
        assert!(lit > 0);
    }

    fn det_pixels(width: u32, height: u32) -> (i32, i32, i32, i32) {
        BoundingBox::new(0.5, 0.5, 0.5, 0.5).to_pixels(width, height)
    }

    #[test]
    fn test_box_at_frame_border_is_clipped() {
        let mut frame = Frame::new(vec![0; Frame::byte_len(16, 16)], 16, 16, 1);
        let det = Detection::new("dog", 0.9, BoundingBox::new(0.0, 1.0, 1.0, 1.0));
        assert!(draw_detections(&mut frame, &[det]).is_ok());
    }

    #[test]
    fn test_malformed_frame_is_rejected() {
        let mut frame = Frame::new(vec![0; 10], 40, 30, 1);
        let det = Detection::new("person", 0.9, BoundingBox::new(0.5, 0.5, 0.2, 0.2));
        assert!(matches!(
            draw_detections(&mut frame, &[det]),
            Err(InferenceError::Overlay(_))
        ));
    }

    #[test]
    fn test_no_detections_leaves_frame_untouched() {
        let mut frame = Frame::new(vec![7; 10], 40, 30, 1);
        assert!(draw_detections(&mut frame, &[]).is_ok());
        assert!(frame.pixels.iter().all(|&b| b == 7));
    }
}
