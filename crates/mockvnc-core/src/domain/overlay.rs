//! Text banner stamped onto a private copy of the framebuffer.
//!
//! Used to show each client its own IP address.  The font is a 3×5 bitmap
//! covering the characters of IPv4 and IPv6 literals; anything else renders
//! as a blank cell.

use crate::domain::framebuffer::Framebuffer;

const GLYPH_W: u16 = 3;
const GLYPH_H: u16 = 5;
const SCALE: u16 = 3;
const MARGIN: u16 = 4;
const FOREGROUND: (u8, u8, u8) = (255, 255, 255);
const BACKGROUND: (u8, u8, u8) = (0, 0, 0);

/// Returns a copy of `fb` with `text` drawn in a banner at the top-left corner.
///
/// The input is left untouched and the banner is clipped to the image.
pub fn overlay_text(fb: &Framebuffer, text: &str) -> Framebuffer {
    let mut out = fb.clone();
    let advance = (GLYPH_W + 1) * SCALE;
    let chars = u16::try_from(text.chars().count()).unwrap_or(u16::MAX);

    let banner_w = chars.saturating_mul(advance).saturating_add(2 * MARGIN);
    let banner_h = GLYPH_H * SCALE + 2 * MARGIN;
    for y in 0..banner_h.min(out.height()) {
        for x in 0..banner_w.min(out.width()) {
            out.set_rgb(x, y, BACKGROUND);
        }
    }

    let mut pen_x = MARGIN;
    for ch in text.chars() {
        if pen_x >= out.width() {
            break;
        }
        draw_glyph(&mut out, glyph(ch), pen_x, MARGIN);
        pen_x = pen_x.saturating_add(advance);
    }
    out
}

fn draw_glyph(fb: &mut Framebuffer, rows: [u8; 5], origin_x: u16, origin_y: u16) {
    for (gy, bits) in (0u16..).zip(rows) {
        for gx in 0..GLYPH_W {
            if bits & (0b100 >> gx) == 0 {
                continue;
            }
            for dy in 0..SCALE {
                for dx in 0..SCALE {
                    let x = origin_x.saturating_add(gx * SCALE + dx);
                    let y = origin_y.saturating_add(gy * SCALE + dy);
                    fb.set_rgb(x, y, FOREGROUND);
                }
            }
        }
    }
}

/// 3-bit rows, most significant bit on the left.
fn glyph(ch: char) -> [u8; 5] {
    match ch.to_ascii_lowercase() {
        '0' => [0b111, 0b101, 0b101, 0b101, 0b111],
        '1' => [0b010, 0b110, 0b010, 0b010, 0b111],
        '2' => [0b111, 0b001, 0b111, 0b100, 0b111],
        '3' => [0b111, 0b001, 0b111, 0b001, 0b111],
        '4' => [0b101, 0b101, 0b111, 0b001, 0b001],
        '5' => [0b111, 0b100, 0b111, 0b001, 0b111],
        '6' => [0b111, 0b100, 0b111, 0b101, 0b111],
        '7' => [0b111, 0b001, 0b010, 0b010, 0b010],
        '8' => [0b111, 0b101, 0b111, 0b101, 0b111],
        '9' => [0b111, 0b101, 0b111, 0b001, 0b111],
        'a' => [0b010, 0b101, 0b111, 0b101, 0b101],
        'b' => [0b110, 0b101, 0b110, 0b101, 0b110],
        'c' => [0b011, 0b100, 0b100, 0b100, 0b011],
        'd' => [0b110, 0b101, 0b101, 0b101, 0b110],
        'e' => [0b111, 0b100, 0b110, 0b100, 0b111],
        'f' => [0b111, 0b100, 0b110, 0b100, 0b100],
        '.' => [0b000, 0b000, 0b000, 0b000, 0b010],
        ':' => [0b000, 0b010, 0b000, 0b010, 0b000],
        _ => [0; 5],
    }
}
