// ============================
// BDF -> data file importer
// ============================

use anyhow::{anyhow, Context, Result};
use glyphpack::datafile::FLAG_MONOCHROME;
use glyphpack::{Bitmap, DataFile, FontInfo, Glyph};
use std::collections::BTreeMap;
use std::fs::File;
use std::path::Path;
use std::sync::Arc;

/// Import a BDF bitmap font. BDF glyphs carry per-glyph bounding boxes
/// relative to the baseline; they are padded here into one common box
/// with set pixels mapped to full foreground. The advance is derived
/// from the glyph box (offset plus width).
pub fn import(path: &Path) -> Result<DataFile> {
  let font = bdf::read(File::open(path).with_context(|| format!("open {:?}", path))?)
    .with_context(|| format!("invalid BDF font {:?}", path))?;

  let mut entries: Vec<(char, &bdf::Glyph)> = font.glyphs().iter().map(|(c, g)| (*c, g)).collect();
  entries.sort_by_key(|&(c, _)| c as u32);
  if entries.is_empty() {
    return Err(anyhow!("font has no glyphs"));
  }

  // ---- common box: pixels above/below the baseline, left/right extent ----
  let mut min_x = 0i32;
  let mut max_x = 1i32;
  let mut max_top = 1i32;
  let mut min_bottom = 0i32;
  for (_, glyph) in &entries {
    let bounds = glyph.bounds();
    let w = glyph.width() as i32;
    let h = glyph.height() as i32;
    min_x = min_x.min(bounds.x);
    max_x = max_x.max(bounds.x + w);
    max_top = max_top.max(bounds.y + h);
    min_bottom = min_bottom.min(bounds.y);
  }
  let box_w = max_x - min_x;
  let box_h = max_top - min_bottom;

  // ---- pad and merge duplicates ----
  let mut merged: BTreeMap<(i16, Vec<u8>), Vec<u32>> = BTreeMap::new();
  for (ch, glyph) in &entries {
    let bounds = glyph.bounds();
    let w = glyph.width() as i32;
    let h = glyph.height() as i32;

    let mut pixels = vec![0u8; box_w as usize * box_h as usize];
    for y in 0..h {
      // Row 0 of the BDF bitmap is the top of the glyph box.
      let dst_y = (max_top - (bounds.y + h)) + y;
      for x in 0..w {
        if glyph.get(x as u32, y as u32) {
          let dst_x = bounds.x - min_x + x;
          pixels[(dst_y * box_w + dst_x) as usize] = 15;
        }
      }
    }

    let advance = (bounds.x + w).max(1) as i16;
    merged.entry((advance, pixels)).or_default().push(*ch as u32);
  }

  let mut glyphs = Vec::with_capacity(merged.len());
  for ((advance, pixels), chars) in merged {
    let bitmap = Arc::new(Bitmap::new(box_w as u16, box_h as u16, pixels)?);
    glyphs.push(Glyph::new(bitmap, advance, chars)?);
  }

  let info = FontInfo {
    name: stem_name(path),
    max_width: box_w as u16,
    max_height: box_h as u16,
    baseline_x: (-min_x) as i16,
    baseline_y: max_top as i16,
    line_height: (box_h + 1) as u16,
    flags: FLAG_MONOCHROME,
  };
  Ok(DataFile::new(info, Vec::new(), glyphs)?)
}

fn stem_name(path: &Path) -> String {
  path.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_else(|| "font".into())
}
