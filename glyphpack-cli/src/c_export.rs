// ============================
// data file -> C source exporter
// ============================

use anyhow::Result;
use glyphpack::{DataFile, EncodedFont};
use std::io::Write;

/// Emit the header: the table struct (once per translation set, guarded)
/// and the extern declaration for this font.
pub fn write_header(out: &mut impl Write, name: &str, df: &DataFile) -> Result<()> {
  let ident = identifier(name);
  let guard = ident.to_uppercase();

  writeln!(out, "/* Generated by glyphpack from {}. Do not edit. */", df.font_info().name)?;
  writeln!(out, "#ifndef GLYPHPACK_FONT_{guard}_H")?;
  writeln!(out, "#define GLYPHPACK_FONT_{guard}_H")?;
  writeln!(out)?;
  writeln!(out, "#include <stdint.h>")?;
  writeln!(out)?;
  writeln!(out, "#ifndef GLYPHPACK_FONT_T")?;
  writeln!(out, "#define GLYPHPACK_FONT_T")?;
  writeln!(out, "typedef struct {{")?;
  writeln!(out, "  const char *name;")?;
  writeln!(out, "  uint16_t max_width;")?;
  writeln!(out, "  uint16_t max_height;")?;
  writeln!(out, "  int16_t baseline_x;")?;
  writeln!(out, "  int16_t baseline_y;")?;
  writeln!(out, "  uint16_t line_height;")?;
  writeln!(out, "  uint32_t flags;")?;
  writeln!(out)?;
  writeln!(out, "  /* dictionary: rle entries first, then ref entries */")?;
  writeln!(out, "  uint16_t dict_count;")?;
  writeln!(out, "  uint16_t rle_count;")?;
  writeln!(out, "  const uint8_t *dict_data;")?;
  writeln!(out, "  const uint32_t *dict_offsets; /* dict_count + 1 */")?;
  writeln!(out)?;
  writeln!(out, "  uint16_t glyph_count;")?;
  writeln!(out, "  const uint8_t *glyph_data;")?;
  writeln!(out, "  const uint32_t *glyph_offsets; /* glyph_count + 1 */")?;
  writeln!(out, "  const int16_t *glyph_advances;")?;
  writeln!(out)?;
  writeln!(out, "  /* sorted character table; chars[i] is drawn as glyph char_glyphs[i] */")?;
  writeln!(out, "  uint32_t char_count;")?;
  writeln!(out, "  const uint32_t *chars;")?;
  writeln!(out, "  const uint16_t *char_glyphs;")?;
  writeln!(out, "}} glyphpack_font_t;")?;
  writeln!(out, "#endif /* GLYPHPACK_FONT_T */")?;
  writeln!(out)?;
  writeln!(out, "extern const glyphpack_font_t font_{ident};")?;
  writeln!(out)?;
  writeln!(out, "#endif /* GLYPHPACK_FONT_{guard}_H */")?;
  Ok(())
}

/// Emit the tables themselves from an encoded font.
pub fn write_source(out: &mut impl Write, name: &str, df: &DataFile, encoded: &EncodedFont) -> Result<()> {
  let ident = identifier(name);
  let info = df.font_info();

  writeln!(out, "/* Generated by glyphpack from {}. Do not edit. */", info.name)?;
  writeln!(out, "#include \"{name}.h\"")?;
  writeln!(out)?;

  let dict: Vec<&Vec<u8>> = encoded.rle_dictionary.iter().chain(encoded.ref_dictionary.iter()).collect();
  let dict_bytes: Vec<u8> = dict.iter().flat_map(|e| e.iter().copied()).collect();
  byte_array(out, &format!("{ident}_dict_data"), &dict_bytes)?;
  offset_array(out, &format!("{ident}_dict_offsets"), dict.iter().map(|e| e.len()))?;

  let glyph_bytes: Vec<u8> = encoded.glyphs.iter().flat_map(|g| g.iter().copied()).collect();
  byte_array(out, &format!("{ident}_glyph_data"), &glyph_bytes)?;
  offset_array(out, &format!("{ident}_glyph_offsets"), encoded.glyphs.iter().map(|g| g.len()))?;

  writeln!(out, "static const int16_t {ident}_glyph_advances[] = {{")?;
  for row in df.glyphs().chunks(12) {
    let cells: Vec<String> = row.iter().map(|g| g.advance().to_string()).collect();
    writeln!(out, "  {},", cells.join(", "))?;
  }
  writeln!(out, "}};")?;
  writeln!(out)?;

  // One row per character code, sorted, pointing at its glyph index.
  let mut chars: Vec<(u32, usize)> = Vec::new();
  for (i, glyph) in df.glyphs().iter().enumerate() {
    for &c in glyph.chars() {
      chars.push((c, i));
    }
  }
  chars.sort_unstable();

  writeln!(out, "static const uint32_t {ident}_chars[] = {{")?;
  for row in chars.chunks(8) {
    let cells: Vec<String> = row.iter().map(|&(c, _)| format!("{:#x}", c)).collect();
    writeln!(out, "  {},", cells.join(", "))?;
  }
  writeln!(out, "}};")?;
  writeln!(out)?;
  writeln!(out, "static const uint16_t {ident}_char_glyphs[] = {{")?;
  for row in chars.chunks(12) {
    let cells: Vec<String> = row.iter().map(|&(_, g)| g.to_string()).collect();
    writeln!(out, "  {},", cells.join(", "))?;
  }
  writeln!(out, "}};")?;
  writeln!(out)?;

  writeln!(out, "const glyphpack_font_t font_{ident} = {{")?;
  writeln!(out, "  .name = \"{}\",", info.name)?;
  writeln!(out, "  .max_width = {},", info.max_width)?;
  writeln!(out, "  .max_height = {},", info.max_height)?;
  writeln!(out, "  .baseline_x = {},", info.baseline_x)?;
  writeln!(out, "  .baseline_y = {},", info.baseline_y)?;
  writeln!(out, "  .line_height = {},", info.line_height)?;
  writeln!(out, "  .flags = {},", info.flags)?;
  writeln!(out, "  .dict_count = {},", dict.len())?;
  writeln!(out, "  .rle_count = {},", encoded.rle_dictionary.len())?;
  writeln!(out, "  .dict_data = {ident}_dict_data,")?;
  writeln!(out, "  .dict_offsets = {ident}_dict_offsets,")?;
  writeln!(out, "  .glyph_count = {},", encoded.glyphs.len())?;
  writeln!(out, "  .glyph_data = {ident}_glyph_data,")?;
  writeln!(out, "  .glyph_offsets = {ident}_glyph_offsets,")?;
  writeln!(out, "  .glyph_advances = {ident}_glyph_advances,")?;
  writeln!(out, "  .char_count = {},", chars.len())?;
  writeln!(out, "  .chars = {ident}_chars,")?;
  writeln!(out, "  .char_glyphs = {ident}_char_glyphs,")?;
  writeln!(out, "}};")?;
  Ok(())
}

fn byte_array(out: &mut impl Write, name: &str, bytes: &[u8]) -> Result<()> {
  writeln!(out, "static const uint8_t {name}[] = {{")?;
  if bytes.is_empty() {
    // An empty initializer list is not valid C.
    writeln!(out, "  0x00,")?;
  }
  for row in bytes.chunks(12) {
    let cells: Vec<String> = row.iter().map(|b| format!("{:#04x}", b)).collect();
    writeln!(out, "  {},", cells.join(", "))?;
  }
  writeln!(out, "}};")?;
  writeln!(out)?;
  Ok(())
}

/// Cumulative offsets: one per element plus the total length.
fn offset_array(out: &mut impl Write, name: &str, lens: impl Iterator<Item = usize>) -> Result<()> {
  let mut offsets = vec![0usize];
  for len in lens {
    offsets.push(offsets.last().copied().unwrap_or(0) + len);
  }
  writeln!(out, "static const uint32_t {name}[] = {{")?;
  for row in offsets.chunks(12) {
    let cells: Vec<String> = row.iter().map(|o| o.to_string()).collect();
    writeln!(out, "  {},", cells.join(", "))?;
  }
  writeln!(out, "}};")?;
  writeln!(out)?;
  Ok(())
}

/// Make a C identifier out of the export basename.
fn identifier(name: &str) -> String {
  let mut out = String::with_capacity(name.len());
  for (i, c) in name.chars().enumerate() {
    if c.is_ascii_alphanumeric() {
      if i == 0 && c.is_ascii_digit() {
        out.push('_');
      }
      out.push(c.to_ascii_lowercase());
    } else {
      out.push('_');
    }
  }
  if out.is_empty() {
    out.push_str("font");
  }
  out
}
