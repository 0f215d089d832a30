//! Annotated frame rendering
//!
//! Draws each space's rescaled box, its name, the state label and the
//! confidence percentage onto a copy of the frame. Labels use a small
//! built-in 5x7 glyph set so no font files are needed on the host.

use super::SpaceObservation;
use crate::error::{Error, Result};
use image::{ImageBuffer, Rgb, RgbImage};
use std::io::Cursor;

const OCCUPIED: Rgb<u8> = Rgb([220, 40, 40]);
const FREE: Rgb<u8> = Rgb([40, 200, 80]);
const UNKNOWN: Rgb<u8> = Rgb([230, 200, 40]);
const LABEL_BG: Rgb<u8> = Rgb([0, 0, 0]);
const LABEL_FG: Rgb<u8> = Rgb([255, 255, 255]);

const GLYPH_W: i32 = 6;
const GLYPH_H: i32 = 7;
const LABEL_SCALE: i32 = 2;

/// Decode a JPEG, draw the annotations, re-encode.
pub fn render_annotated(frame_jpeg: &[u8], observations: &[SpaceObservation]) -> Result<Vec<u8>> {
    let image = image::load_from_memory(frame_jpeg)
        .map_err(|e| Error::Decoder(format!("frame decode failed: {}", e)))?;
    let mut canvas = image.to_rgb8();

    for obs in observations {
        let color = match obs.occupied {
            Some(true) => OCCUPIED,
            Some(false) => FREE,
            None => UNKNOWN,
        };
        let [x1, y1, x2, y2] = obs.bbox;
        draw_rect(&mut canvas, x1, y1, x2, y2, color, 2);

        let state = match obs.occupied {
            Some(true) => "OCCUPIED",
            Some(false) => "FREE",
            None => "UNKNOWN",
        };
        let label = match obs.confidence {
            Some(conf) => format!("{} {} {:.0}%", obs.space_name, state, conf * 100.0),
            None => format!("{} {}", obs.space_name, state),
        };
        let text_w = label.chars().count() as i32 * GLYPH_W * LABEL_SCALE;
        let text_h = GLYPH_H * LABEL_SCALE;
        let lx = x1.max(0);
        let ly = (y1 - text_h - 4).max(0);
        fill_rect(&mut canvas, lx, ly, lx + text_w + 4, ly + text_h + 2, LABEL_BG);
        draw_text(&mut canvas, lx + 2, ly + 1, &label, LABEL_FG, LABEL_SCALE);
    }

    let mut buffer = Cursor::new(Vec::new());
    canvas
        .write_to(&mut buffer, image::ImageFormat::Jpeg)
        .map_err(|e| Error::Internal(format!("annotated encode failed: {}", e)))?;
    Ok(buffer.into_inner())
}

/// Probe the frame dimensions without keeping the decode around.
pub fn frame_dimensions(frame_jpeg: &[u8]) -> Result<(u32, u32)> {
    let image = image::load_from_memory(frame_jpeg)
        .map_err(|e| Error::Decoder(format!("frame decode failed: {}", e)))?;
    Ok((image.width(), image.height()))
}

fn put_pixel_clamped(canvas: &mut RgbImage, x: i32, y: i32, color: Rgb<u8>) {
    if x >= 0 && y >= 0 && (x as u32) < canvas.width() && (y as u32) < canvas.height() {
        canvas.put_pixel(x as u32, y as u32, color);
    }
}

fn draw_rect(
    canvas: &mut ImageBuffer<Rgb<u8>, Vec<u8>>,
    x1: i32,
    y1: i32,
    x2: i32,
    y2: i32,
    color: Rgb<u8>,
    thickness: i32,
) {
    for t in 0..thickness {
        for x in x1..=x2 {
            put_pixel_clamped(canvas, x, y1 + t, color);
            put_pixel_clamped(canvas, x, y2 - t, color);
        }
        for y in y1..=y2 {
            put_pixel_clamped(canvas, x1 + t, y, color);
            put_pixel_clamped(canvas, x2 - t, y, color);
        }
    }
}

fn fill_rect(
    canvas: &mut ImageBuffer<Rgb<u8>, Vec<u8>>,
    x1: i32,
    y1: i32,
    x2: i32,
    y2: i32,
    color: Rgb<u8>,
) {
    for y in y1..=y2 {
        for x in x1..=x2 {
            put_pixel_clamped(canvas, x, y, color);
        }
    }
}

fn draw_text(canvas: &mut RgbImage, x: i32, y: i32, text: &str, color: Rgb<u8>, scale: i32) {
    let mut cx = x;
    for ch in text.chars().flat_map(|c| c.to_uppercase()) {
        if let Some(glyph) = glyph_bits(ch) {
            for (row, pattern) in glyph.iter().enumerate() {
                for col in 0..5 {
                    if (pattern >> (4 - col)) & 1 == 1 {
                        for dy in 0..scale {
                            for dx in 0..scale {
                                put_pixel_clamped(
                                    canvas,
                                    cx + col * scale + dx,
                                    y + row as i32 * scale + dy,
                                    color,
                                );
                            }
                        }
                    }
                }
            }
        }
        cx += GLYPH_W * scale;
    }
}

#[rustfmt::skip]
fn glyph_bits(ch: char) -> Option<[u8; 7]> {
    match ch {
        'A' => Some([0b01110, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001]),
        'B' => Some([0b11110, 0b10001, 0b10001, 0b11110, 0b10001, 0b10001, 0b11110]),
        'C' => Some([0b01110, 0b10001, 0b10000, 0b10000, 0b10000, 0b10001, 0b01110]),
        'D' => Some([0b11110, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b11110]),
        'E' => Some([0b11111, 0b10000, 0b11110, 0b10000, 0b10000, 0b10000, 0b11111]),
        'F' => Some([0b11111, 0b10000, 0b11110, 0b10000, 0b10000, 0b10000, 0b10000]),
        'G' => Some([0b01110, 0b10001, 0b10000, 0b10111, 0b10001, 0b10001, 0b01111]),
        'H' => Some([0b10001, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001]),
        'I' => Some([0b01110, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110]),
        'J' => Some([0b00111, 0b00010, 0b00010, 0b00010, 0b00010, 0b10010, 0b01100]),
        'K' => Some([0b10001, 0b10010, 0b10100, 0b11000, 0b10100, 0b10010, 0b10001]),
        'L' => Some([0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b11111]),
        'M' => Some([0b10001, 0b11011, 0b10101, 0b10101, 0b10001, 0b10001, 0b10001]),
        'N' => Some([0b10001, 0b11001, 0b10101, 0b10101, 0b10011, 0b10001, 0b10001]),
        'O' => Some([0b01110, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110]),
        'P' => Some([0b11110, 0b10001, 0b10001, 0b11110, 0b10000, 0b10000, 0b10000]),
        'Q' => Some([0b01110, 0b10001, 0b10001, 0b10001, 0b10101, 0b10010, 0b01101]),
        'R' => Some([0b11110, 0b10001, 0b10001, 0b11110, 0b10100, 0b10010, 0b10001]),
        'S' => Some([0b01111, 0b10000, 0b01110, 0b00001, 0b00001, 0b10001, 0b01110]),
        'T' => Some([0b11111, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100]),
        'U' => Some([0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110]),
        'V' => Some([0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01010, 0b00100]),
        'W' => Some([0b10001, 0b10001, 0b10001, 0b10101, 0b10101, 0b11011, 0b10001]),
        'X' => Some([0b10001, 0b01010, 0b00100, 0b00100, 0b00100, 0b01010, 0b10001]),
        'Y' => Some([0b10001, 0b01010, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100]),
        'Z' => Some([0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b10000, 0b11111]),
        '0' => Some([0b01110, 0b10001, 0b10011, 0b10101, 0b11001, 0b10001, 0b01110]),
        '1' => Some([0b00100, 0b01100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110]),
        '2' => Some([0b01110, 0b10001, 0b00001, 0b00010, 0b00100, 0b01000, 0b11111]),
        '3' => Some([0b11110, 0b00001, 0b00001, 0b01110, 0b00001, 0b00001, 0b11110]),
        '4' => Some([0b00010, 0b00110, 0b01010, 0b10010, 0b11111, 0b00010, 0b00010]),
        '5' => Some([0b11111, 0b10000, 0b11110, 0b00001, 0b00001, 0b10001, 0b01110]),
        '6' => Some([0b00110, 0b01000, 0b10000, 0b11110, 0b10001, 0b10001, 0b01110]),
        '7' => Some([0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b01000, 0b01000]),
        '8' => Some([0b01110, 0b10001, 0b10001, 0b01110, 0b10001, 0b10001, 0b01110]),
        '9' => Some([0b01110, 0b10001, 0b10001, 0b01111, 0b00001, 0b00010, 0b01100]),
        '%' => Some([0b10001, 0b10010, 0b00100, 0b01000, 0b10010, 0b10001, 0b00000]),
        '-' => Some([0b00000, 0b00000, 0b00000, 0b11111, 0b00000, 0b00000, 0b00000]),
        '_' => Some([0b00000, 0b00000, 0b00000, 0b00000, 0b00000, 0b00000, 0b11111]),
        '.' => Some([0b00000, 0b00000, 0b00000, 0b00000, 0b00000, 0b00110, 0b00110]),
        ' ' => Some([0, 0, 0, 0, 0, 0, 0]),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blank_jpeg(w: u32, h: u32) -> Vec<u8> {
        let img: RgbImage = ImageBuffer::from_pixel(w, h, Rgb([128, 128, 128]));
        let mut buffer = Cursor::new(Vec::new());
        img.write_to(&mut buffer, image::ImageFormat::Jpeg).unwrap();
        buffer.into_inner()
    }

    #[test]
    fn test_frame_dimensions() {
        let jpeg = blank_jpeg(640, 360);
        assert_eq!(frame_dimensions(&jpeg).unwrap(), (640, 360));
    }

    #[test]
    fn test_render_annotated_round_trip() {
        let jpeg = blank_jpeg(320, 180);
        let observations = vec![
            SpaceObservation {
                space_id: "A1".to_string(),
                space_name: "A1".to_string(),
                bbox: [10, 40, 100, 120],
                occupied: Some(true),
                confidence: Some(0.91),
            },
            SpaceObservation {
                space_id: "A2".to_string(),
                space_name: "A2".to_string(),
                bbox: [120, 40, 200, 120],
                occupied: None,
                confidence: None,
            },
        ];
        let out = render_annotated(&jpeg, &observations).unwrap();
        // still a decodable image of the same size
        assert_eq!(frame_dimensions(&out).unwrap(), (320, 180));
    }

    #[test]
    fn test_render_rejects_non_image() {
        assert!(render_annotated(b"not a jpeg", &[]).is_err());
    }

    #[test]
    fn test_glyphs_cover_labels() {
        for ch in "OCCUPIED FREE UNKNOWN 0123456789%".chars() {
            assert!(glyph_bits(ch).is_some(), "missing glyph {:?}", ch);
        }
    }
}
