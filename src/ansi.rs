use std::fmt::Write as _;

use anyhow::{bail, Result};

/// A terminal cell is roughly twice as tall as it is wide; the half-block
/// glyph splits it back into two square-ish pixels.
const UPPER_HALF_BLOCK: char = '▀';

/// Picks the decode resolution for a given terminal column budget: one pixel
/// column per terminal column, aspect ratio preserved, and an even pixel
/// height so every character row gets both of its pixel rows.
pub fn render_dimensions(native_width: u32, native_height: u32, columns: u16) -> (u32, u32) {
    let width = u32::from(columns.max(1));
    let scaled = (f64::from(native_height) * f64::from(width) / f64::from(native_width.max(1)))
        .round() as u32;
    let height = (scaled & !1).max(2);
    (width, height)
}

/// Converts one packed `rgb24` frame into a block of truecolor text, two
/// pixel rows per output line: the upper pixel paints the glyph foreground,
/// the lower one the cell background. Every line ends with an SGR reset so a
/// short write never bleeds color into the rest of the screen.
pub fn frame_to_ansi(rgb: &[u8], width: u32, height: u32) -> Result<String> {
    let expected = (width as usize) * (height as usize) * 3;
    if rgb.len() != expected {
        bail!(
            "frame byte count mismatch: expected {expected} for {width}x{height} rgb24, got {}",
            rgb.len()
        );
    }
    if height % 2 != 0 {
        bail!("frame height {height} is odd; half-block rendering needs pixel row pairs");
    }

    let row_stride = (width as usize) * 3;
    // ~20 bytes of SGR escapes per cell.
    let mut out = String::with_capacity((width as usize) * (height as usize / 2) * 22);

    for pair in 0..(height as usize / 2) {
        let top_row = &rgb[pair * 2 * row_stride..pair * 2 * row_stride + row_stride];
        let bottom_row = &rgb[(pair * 2 + 1) * row_stride..(pair * 2 + 2) * row_stride];

        for x in 0..width as usize {
            let top = &top_row[x * 3..x * 3 + 3];
            let bottom = &bottom_row[x * 3..x * 3 + 3];
            let _ = write!(
                out,
                "\x1b[38;2;{};{};{}m\x1b[48;2;{};{};{}m{}",
                top[0], top[1], top[2], bottom[0], bottom[1], bottom[2], UPPER_HALF_BLOCK
            );
        }
        out.push_str("\x1b[0m");
        if pair + 1 < height as usize / 2 {
            out.push_str("\r\n");
        }
    }

    Ok(out)
}
