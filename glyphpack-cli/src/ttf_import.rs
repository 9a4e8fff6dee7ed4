// ============================
// TTF/OTF -> data file importer
// ============================

use anyhow::{anyhow, Result};
use glyphpack::datafile::FLAG_MONOCHROME;
use glyphpack::{Bitmap, DataFile, FontInfo, Glyph};
use std::collections::BTreeMap;
use std::sync::Arc;
use swash::scale::{Render, ScaleContext, Source, StrikeWith};
use swash::zeno::{Format, Vector};
use swash::{FontRef, NormalizedCoord};

struct Rendered {
  ch: char,
  advance: f32,
  left: i32,
  top: i32,
  width: i32,
  height: i32,
  alpha: Vec<u8>,
}

/// Rasterize `ranges` of `ttf` at `px` pixels and build a data file whose
/// bitmaps are padded to one common bounding box. Characters that render
/// to identical bitmaps with the same advance are merged into one glyph.
pub fn import(ttf: &[u8], name: &str, px: f32, ranges: &[(char, char)], bw: bool) -> Result<DataFile> {
  let font = FontRef::from_index(ttf, 0).ok_or_else(|| anyhow!("failed to parse TTF font"))?;

  let mut charset: Vec<char> = Vec::new();
  for &(start, end) in ranges {
    for cp in start as u32..=end as u32 {
      if let Some(ch) = char::from_u32(cp) {
        charset.push(ch);
      }
    }
  }
  if charset.is_empty() {
    return Err(anyhow!("charset empty"));
  }

  let metrics = font.metrics(&[] as &[NormalizedCoord]).scale(px);
  let ascent = metrics.ascent;
  let descent = metrics.descent;
  let line_height = (ascent + descent + metrics.leading).ceil().max(1.0) as u16;
  let gmetrics = font.glyph_metrics(&[] as &[NormalizedCoord]).scale(px);

  let sources = [
    Source::ColorOutline(0),
    Source::ColorBitmap(StrikeWith::BestFit),
    Source::Outline,
  ];
  let mut scale_ctx = ScaleContext::new();
  let mut scaler = scale_ctx.builder(font).size(px).hint(true).build();

  // ---- render every character ----
  let mut rendered: Vec<Rendered> = Vec::new();
  for &ch in &charset {
    let gid = font.charmap().map(ch);
    let advance = gmetrics.advance_width(gid);

    let mut render = Render::new(&sources);
    render.format(Format::Alpha).offset(Vector::new(0.0, 0.0));
    let entry = match render.render(&mut scaler, gid) {
      Some(img) => Rendered {
        ch,
        advance,
        left: img.placement.left,
        top: img.placement.top,
        width: img.placement.width.max(0) as i32,
        height: img.placement.height.max(0) as i32,
        alpha: img.data.clone(),
      },
      // Nothing to draw (space, missing glyph): keep the advance.
      None => Rendered { ch, advance, left: 0, top: 0, width: 0, height: 0, alpha: Vec::new() },
    };
    rendered.push(entry);
  }

  // ---- common bounding box across the whole charset ----
  let baseline_y = ascent.round().max(1.0) as i32;
  let box_h = (ascent + descent).ceil().max(1.0) as i32;

  let mut min_left = 0i32;
  let mut max_right = 1i32;
  for r in &rendered {
    if r.width > 0 {
      min_left = min_left.min(r.left);
      max_right = max_right.max(r.left + r.width);
    }
    max_right = max_right.max(r.advance.ceil() as i32);
  }
  let box_w = max_right - min_left;

  // ---- pad, quantize and merge duplicates ----
  let mut merged: BTreeMap<(i16, Vec<u8>), Vec<u32>> = BTreeMap::new();
  for r in &rendered {
    let mut pixels = vec![0u8; box_w as usize * box_h as usize];
    for y in 0..r.height {
      let dst_y = baseline_y - r.top + y;
      if !(0..box_h).contains(&dst_y) {
        continue;
      }
      for x in 0..r.width {
        let dst_x = r.left - min_left + x;
        if !(0..box_w).contains(&dst_x) {
          continue;
        }
        let alpha = r.alpha[(y * r.width + x) as usize];
        pixels[(dst_y * box_w + dst_x) as usize] = quantize(alpha, bw);
      }
    }
    let advance = saturate_i16(r.advance);
    merged.entry((advance, pixels)).or_default().push(r.ch as u32);
  }

  let mut glyphs = Vec::with_capacity(merged.len());
  for ((advance, pixels), chars) in merged {
    let bitmap = Arc::new(Bitmap::new(box_w as u16, box_h as u16, pixels)?);
    glyphs.push(Glyph::new(bitmap, advance, chars)?);
  }

  let info = FontInfo {
    name: name.to_string(),
    max_width: box_w as u16,
    max_height: box_h as u16,
    baseline_x: (-min_left) as i16,
    baseline_y: baseline_y as i16,
    line_height,
    flags: if bw { FLAG_MONOCHROME } else { 0 },
  };
  Ok(DataFile::new(info, Vec::new(), glyphs)?)
}

/// 8-bit coverage to a 4-bit pixel; `bw` thresholds at 50%.
#[inline]
fn quantize(alpha: u8, bw: bool) -> u8 {
  if bw {
    if alpha >= 128 {
      15
    } else {
      0
    }
  } else {
    ((alpha as u16 * 15 + 127) / 255) as u8
  }
}

#[inline]
fn saturate_i16(v: f32) -> i16 {
  let r = v.round();
  if r < i16::MIN as f32 {
    i16::MIN
  } else if r > i16::MAX as f32 {
    i16::MAX
  } else {
    r as i16
  }
}
