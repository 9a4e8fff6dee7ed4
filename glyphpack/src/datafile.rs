//! The data file: font metrics, dictionary entries and glyph list, with
//! construction-time validation and a line-oriented persistence format.
//!
//! Format, one directive per line, canonical order:
//!
//! ```text
//! Version 1
//! FontName <rest of line>
//! MaxWidth <int>
//! MaxHeight <int>
//! Baseline <int> <int>
//! LineHeight <int>
//! Flags <int>
//! RandomSeed <uint64>                          (optional)
//! DictEntry <rle|ref> <ref_count> <hex-bytes>  (dictionary index order)
//! Glyph <w> <h> <advance> <c0>[,<c1>...] <hex> (glyph index order)
//! ```
//!
//! The glyph hex field is the raw 4bpp bitmap packed two pixels per
//! byte, first pixel in the high nibble. The writer is canonical: equal
//! data files serialize byte-identically, which makes load(save(f)) a
//! fixed point. Unknown or out-of-order directives are rejected with the
//! offending line number.

use std::collections::BTreeSet;
use std::io::{self, BufRead, Write};
use std::sync::Arc;

use crate::bitmap::{Bitmap, Glyph};
use crate::encode::{Token, DICT_START};

/// Bit 0 of [`FontInfo::flags`]: pixels are only ever 0 or 15.
pub const FLAG_MONOCHROME: u32 = 1;

/// Hard cap on dictionary entries so references stay one byte.
pub const MAX_DICT_ENTRIES: usize = 255 - DICT_START as usize;

/// Shortest and longest allowed dictionary entry byte strings.
pub const ENTRY_LEN: std::ops::RangeInclusive<usize> = 2..=15;

/// Errors from the data model and its persistence format.
#[derive(Debug, thiserror::Error)]
pub enum DataFileError {
  #[error("io error: {0}")]
  Io(#[from] io::Error),
  /// Syntactically malformed persistence input.
  #[error("line {line}: {reason}")]
  Parse { line: usize, reason: String },
  /// Bitmap with a zero dimension.
  #[error("bitmap dimensions must be non-zero")]
  EmptyBitmap,
  /// Pixel buffer length disagrees with the declared dimensions.
  #[error("bitmap has {got} pixels, expected {expected}")]
  BitmapLength { expected: usize, got: usize },
  /// A pixel value above 15.
  #[error("pixel value {0} out of range")]
  PixelRange(u8),
  /// A glyph with no character codes.
  #[error("glyph has no character codes")]
  NoChars,
  /// A glyph bitmap that does not fill the font's max bounding box.
  #[error("glyph {index} does not match the font bounding box")]
  BitmapSize { index: usize },
  /// More dictionary entries than single-byte references allow.
  #[error("{0} dictionary entries exceed the reference byte space")]
  TooManyEntries(usize),
  /// The same character code mapped by two glyphs.
  #[error("character code {0} appears in more than one glyph")]
  DuplicateChar(u32),
  /// An RLE entry after the first REF entry.
  #[error("dictionary entry {index} breaks the rle-before-ref order")]
  MixedDictionary { index: usize },
  /// A reference at or beyond the referencing entry's own index.
  #[error("dictionary entry {index} references entry {target}")]
  ForwardRef { index: usize, target: usize },
  /// An entry byte string outside the 2..=15 length bound.
  #[error("dictionary entry {index} has invalid length {len}")]
  EntryLength { index: usize, len: usize },
  /// An entry byte that is no valid token (or a nested RLE reference).
  #[error("dictionary entry {index} contains invalid byte {byte:#04x}")]
  EntryToken { index: usize, byte: u8 },
}

/// Whether an entry's expansion is a pixel sequence or a token sequence.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum EntryKind {
  Rle,
  Ref,
}

impl EntryKind {
  pub fn as_str(self) -> &'static str {
    match self {
      EntryKind::Rle => "rle",
      EntryKind::Ref => "ref",
    }
  }
}

/// One dictionary entry: a 2..=15 byte string in the token alphabet.
/// `ref_count` is the usage count last recorded by the optimizer; it is
/// persisted for observability and never affects decoding.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DictEntry {
  pub kind: EntryKind,
  pub bytes: Vec<u8>,
  pub ref_count: u32,
}

impl DictEntry {
  pub fn new(kind: EntryKind, bytes: Vec<u8>) -> Self {
    Self { kind, bytes, ref_count: 0 }
  }
}

/// Font-wide metrics and identification.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FontInfo {
  pub name: String,
  pub max_width: u16,
  pub max_height: u16,
  pub baseline_x: i16,
  pub baseline_y: i16,
  pub line_height: u16,
  pub flags: u32,
}

impl FontInfo {
  #[inline]
  pub fn is_monochrome(&self) -> bool {
    self.flags & FLAG_MONOCHROME != 0
  }
}

/// A validated font: metrics, dictionary and glyphs. Value-like; the
/// optimizer produces successors through [`DataFile::with_dictionary`],
/// which shares the immutable bitmaps with the original.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DataFile {
  font_info: FontInfo,
  dictionary: Vec<DictEntry>,
  glyphs: Vec<Glyph>,
  seed: Option<u64>,
}

impl DataFile {
  /// Validates the data-file invariants: every bitmap fills the max
  /// bounding box, the dictionary fits the reference byte space and
  /// splits into an RLE prefix plus a REF suffix whose references point
  /// strictly backwards, entry byte strings are well-formed, and no
  /// character code is claimed twice.
  pub fn new(font_info: FontInfo, dictionary: Vec<DictEntry>, glyphs: Vec<Glyph>) -> Result<Self, DataFileError> {
    for (index, glyph) in glyphs.iter().enumerate() {
      let b = glyph.bitmap();
      if b.width() != font_info.max_width || b.height() != font_info.max_height {
        return Err(DataFileError::BitmapSize { index });
      }
    }

    if dictionary.len() > MAX_DICT_ENTRIES {
      return Err(DataFileError::TooManyEntries(dictionary.len()));
    }

    let mut seen = BTreeSet::new();
    for glyph in &glyphs {
      for &c in glyph.chars() {
        if !seen.insert(c) {
          return Err(DataFileError::DuplicateChar(c));
        }
      }
    }

    validate_dictionary(&dictionary)?;

    Ok(Self { font_info, dictionary, glyphs, seed: None })
  }

  /// Successor with a new dictionary, sharing this file's bitmaps.
  pub fn with_dictionary(&self, dictionary: Vec<DictEntry>) -> Result<Self, DataFileError> {
    let mut next = Self::new(self.font_info.clone(), dictionary, self.glyphs.clone())?;
    next.seed = self.seed;
    Ok(next)
  }

  /// Keep only the character codes in `allowed`; glyphs whose code list
  /// empties are dropped. Surviving bitmaps and the dictionary are
  /// byte-identical to this file's.
  pub fn filter_chars(&self, allowed: &BTreeSet<u32>) -> Result<Self, DataFileError> {
    let glyphs: Vec<Glyph> = self
      .glyphs
      .iter()
      .filter_map(|g| g.retain_chars(|c| allowed.contains(&c)))
      .collect();
    let mut next = Self::new(self.font_info.clone(), self.dictionary.clone(), glyphs)?;
    next.seed = self.seed;
    Ok(next)
  }

  #[inline]
  pub fn font_info(&self) -> &FontInfo {
    &self.font_info
  }

  #[inline]
  pub fn dictionary(&self) -> &[DictEntry] {
    &self.dictionary
  }

  #[inline]
  pub fn glyphs(&self) -> &[Glyph] {
    &self.glyphs
  }

  #[inline]
  pub fn glyph_count(&self) -> usize {
    self.glyphs.len()
  }

  #[inline]
  pub fn glyph_at(&self, index: usize) -> Option<&Glyph> {
    self.glyphs.get(index)
  }

  /// Optimizer seed recorded in the file, if any.
  #[inline]
  pub fn seed(&self) -> Option<u64> {
    self.seed
  }

  pub fn set_seed(&mut self, seed: u64) {
    self.seed = Some(seed);
  }

  /// Replace the dictionary in place. Used by the optimizer after a
  /// committed iteration; the new entry set has already been validated
  /// through [`DataFile::with_dictionary`].
  pub(crate) fn commit_dictionary(&mut self, dictionary: Vec<DictEntry>) {
    self.dictionary = dictionary;
  }

  /// Canonical text serialization. Equal data files produce
  /// byte-identical output.
  pub fn save<W: Write>(&self, out: &mut W) -> Result<(), DataFileError> {
    let info = &self.font_info;
    writeln!(out, "Version 1")?;
    writeln!(out, "FontName {}", info.name)?;
    writeln!(out, "MaxWidth {}", info.max_width)?;
    writeln!(out, "MaxHeight {}", info.max_height)?;
    writeln!(out, "Baseline {} {}", info.baseline_x, info.baseline_y)?;
    writeln!(out, "LineHeight {}", info.line_height)?;
    writeln!(out, "Flags {}", info.flags)?;
    if let Some(seed) = self.seed {
      writeln!(out, "RandomSeed {}", seed)?;
    }
    for entry in &self.dictionary {
      writeln!(out, "DictEntry {} {} {}", entry.kind.as_str(), entry.ref_count, hex_string(&entry.bytes))?;
    }
    for glyph in &self.glyphs {
      let b = glyph.bitmap();
      let codes: Vec<String> = glyph.chars().iter().map(|c| c.to_string()).collect();
      writeln!(
        out,
        "Glyph {} {} {} {} {}",
        b.width(),
        b.height(),
        glyph.advance(),
        codes.join(","),
        hex_string(&pack_nibbles(b.pixels()))
      )?;
    }
    Ok(())
  }

  /// Parse and validate the persistence format. Fails with the 1-based
  /// line number on the first malformed directive.
  pub fn load<R: BufRead>(input: R) -> Result<Self, DataFileError> {
    let mut parser = Parser::new(input)?;

    parser.expect_exact("Version", &["1"])?;
    let name = parser.expect_rest("FontName")?;
    let max_width: u16 = parser.expect_one("MaxWidth")?;
    let max_height: u16 = parser.expect_one("MaxHeight")?;
    let (baseline_x, baseline_y) = parser.expect_two("Baseline")?;
    let line_height: u16 = parser.expect_one("LineHeight")?;
    let flags: u32 = parser.expect_one("Flags")?;

    let font_info = FontInfo { name, max_width, max_height, baseline_x, baseline_y, line_height, flags };

    let seed = if parser.peek_keyword() == Some("RandomSeed") {
      Some(parser.expect_one::<u64>("RandomSeed")?)
    } else {
      None
    };

    let mut dictionary = Vec::new();
    while parser.peek_keyword() == Some("DictEntry") {
      dictionary.push(parser.dict_entry()?);
    }

    let mut glyphs = Vec::new();
    while parser.peek_keyword() == Some("Glyph") {
      glyphs.push(parser.glyph(max_width, max_height)?);
    }
    parser.expect_eof()?;

    let mut df = Self::new(font_info, dictionary, glyphs)?;
    df.seed = seed;
    Ok(df)
  }
}

fn validate_dictionary(dictionary: &[DictEntry]) -> Result<(), DataFileError> {
  let dict_len = dictionary.len();
  let mut seen_ref = false;
  for (index, entry) in dictionary.iter().enumerate() {
    match entry.kind {
      EntryKind::Ref => seen_ref = true,
      EntryKind::Rle if seen_ref => return Err(DataFileError::MixedDictionary { index }),
      EntryKind::Rle => {}
    }
    if !ENTRY_LEN.contains(&entry.bytes.len()) {
      return Err(DataFileError::EntryLength { index, len: entry.bytes.len() });
    }
    for &byte in &entry.bytes {
      match Token::from_byte(byte, dict_len) {
        Ok(Token::Ref(j)) => {
          if entry.kind == EntryKind::Rle {
            return Err(DataFileError::EntryToken { index, byte });
          }
          if j as usize >= index {
            return Err(DataFileError::ForwardRef { index, target: j as usize });
          }
        }
        Ok(_) => {}
        Err(_) => return Err(DataFileError::EntryToken { index, byte }),
      }
    }
  }
  Ok(())
}

// ---------- parsing ----------

struct Parser {
  lines: Vec<String>,
  pos: usize,
}

impl Parser {
  fn new<R: BufRead>(input: R) -> Result<Self, DataFileError> {
    let lines = input.lines().collect::<Result<Vec<_>, _>>()?;
    Ok(Self { lines, pos: 0 })
  }

  fn err<T>(&self, reason: impl Into<String>) -> Result<T, DataFileError> {
    Err(DataFileError::Parse { line: self.pos + 1, reason: reason.into() })
  }

  fn peek_keyword(&self) -> Option<&str> {
    self.lines.get(self.pos).and_then(|l| l.split_whitespace().next())
  }

  /// Consume the next line, requiring directive `keyword`; returns the
  /// remainder after the keyword.
  fn take(&mut self, keyword: &str) -> Result<String, DataFileError> {
    let Some(line) = self.lines.get(self.pos) else {
      return self.err(format!("expected {keyword}, found end of input"));
    };
    let mut parts = line.splitn(2, char::is_whitespace);
    let head = parts.next().unwrap_or("");
    if head != keyword {
      return self.err(format!("expected {keyword}, found {:?}", head));
    }
    let rest = parts.next().unwrap_or("").trim().to_string();
    self.pos += 1;
    Ok(rest)
  }

  fn expect_exact(&mut self, keyword: &str, want: &[&str]) -> Result<(), DataFileError> {
    let rest = self.take(keyword)?;
    let got: Vec<&str> = rest.split_whitespace().collect();
    if got != want {
      self.pos -= 1;
      return self.err(format!("unsupported {keyword} {:?}", rest));
    }
    Ok(())
  }

  fn expect_rest(&mut self, keyword: &str) -> Result<String, DataFileError> {
    let rest = self.take(keyword)?;
    if rest.is_empty() {
      self.pos -= 1;
      return self.err(format!("{keyword} needs a value"));
    }
    Ok(rest)
  }

  fn expect_one<T: std::str::FromStr>(&mut self, keyword: &str) -> Result<T, DataFileError> {
    let rest = self.expect_rest(keyword)?;
    let mut it = rest.split_whitespace();
    let value = self.number(keyword, it.next())?;
    if it.next().is_some() {
      self.pos -= 1;
      return self.err(format!("{keyword} takes one value"));
    }
    Ok(value)
  }

  fn expect_two<T: std::str::FromStr>(&mut self, keyword: &str) -> Result<(T, T), DataFileError> {
    let rest = self.expect_rest(keyword)?;
    let mut it = rest.split_whitespace();
    let a = self.number(keyword, it.next())?;
    let b = self.number(keyword, it.next())?;
    if it.next().is_some() {
      self.pos -= 1;
      return self.err(format!("{keyword} takes two values"));
    }
    Ok((a, b))
  }

  fn number<T: std::str::FromStr>(&self, keyword: &str, token: Option<&str>) -> Result<T, DataFileError> {
    let Some(token) = token else {
      return Err(DataFileError::Parse {
        line: self.pos, // take() already advanced past the directive
        reason: format!("{keyword} is missing a value"),
      });
    };
    token.parse().map_err(|_| DataFileError::Parse {
      line: self.pos,
      reason: format!("{keyword}: bad number {:?}", token),
    })
  }

  fn dict_entry(&mut self) -> Result<DictEntry, DataFileError> {
    let rest = self.take("DictEntry")?;
    let mut it = rest.split_whitespace();
    let kind = match it.next() {
      Some("rle") => EntryKind::Rle,
      Some("ref") => EntryKind::Ref,
      other => {
        self.pos -= 1;
        return self.err(format!("DictEntry: bad kind {:?}", other.unwrap_or("")));
      }
    };
    let ref_count: u32 = self.number("DictEntry", it.next())?;
    let Some(hex) = it.next() else {
      self.pos -= 1;
      return self.err("DictEntry is missing its byte string");
    };
    if it.next().is_some() {
      self.pos -= 1;
      return self.err("DictEntry has trailing tokens");
    }
    let bytes = self.hex_field(hex)?;
    Ok(DictEntry { kind, bytes, ref_count })
  }

  fn glyph(&mut self, max_width: u16, max_height: u16) -> Result<Glyph, DataFileError> {
    let rest = self.take("Glyph")?;
    let mut it = rest.split_whitespace();
    let width: u16 = self.number("Glyph", it.next())?;
    let height: u16 = self.number("Glyph", it.next())?;
    let advance: i16 = self.number("Glyph", it.next())?;
    let Some(codes) = it.next() else {
      self.pos -= 1;
      return self.err("Glyph is missing its character codes");
    };
    let Some(hex) = it.next() else {
      self.pos -= 1;
      return self.err("Glyph is missing its bitmap");
    };
    if it.next().is_some() {
      self.pos -= 1;
      return self.err("Glyph has trailing tokens");
    }

    let mut chars = Vec::new();
    for code in codes.split(',') {
      chars.push(self.number::<u32>("Glyph", Some(code))?);
    }

    let bytes = self.hex_field(hex)?;
    let count = width as usize * height as usize;
    let Some(pixels) = unpack_nibbles(&bytes, count) else {
      self.pos -= 1;
      return self.err(format!("Glyph bitmap needs {} hex bytes", (count + 1) / 2));
    };
    // Dimensions are checked again by DataFile::new; checking here keeps
    // the line number in the report.
    if width != max_width || height != max_height {
      self.pos -= 1;
      return self.err(format!("Glyph is {width}x{height}, font box is {max_width}x{max_height}"));
    }
    let bitmap = Arc::new(Bitmap::new(width, height, pixels)?);
    Glyph::new(bitmap, advance, chars)
  }

  fn hex_field(&self, field: &str) -> Result<Vec<u8>, DataFileError> {
    if field.len() % 2 != 0 || field.is_empty() {
      return Err(DataFileError::Parse {
        line: self.pos,
        reason: format!("odd or empty hex field {:?}", field),
      });
    }
    let mut bytes = Vec::with_capacity(field.len() / 2);
    for pair in field.as_bytes().chunks(2) {
      let hi = hex_digit(pair[0]);
      let lo = hex_digit(pair[1]);
      match (hi, lo) {
        (Some(hi), Some(lo)) => bytes.push(hi << 4 | lo),
        _ => {
          return Err(DataFileError::Parse {
            line: self.pos,
            reason: format!("bad hex field {:?}", field),
          })
        }
      }
    }
    Ok(bytes)
  }

  fn expect_eof(&self) -> Result<(), DataFileError> {
    match self.lines.get(self.pos) {
      None => Ok(()),
      Some(line) => self.err(format!("unknown directive {:?}", line.split_whitespace().next().unwrap_or(""))),
    }
  }
}

// ---------- helpers ----------

fn hex_string(bytes: &[u8]) -> String {
  let mut out = String::with_capacity(bytes.len() * 2);
  for b in bytes {
    out.push_str(&format!("{:02x}", b));
  }
  out
}

#[inline]
fn hex_digit(c: u8) -> Option<u8> {
  (c as char).to_digit(16).map(|d| d as u8)
}

/// Pack 4-bit pixels two per byte, first pixel in the high nibble.
fn pack_nibbles(pixels: &[u8]) -> Vec<u8> {
  let mut out = Vec::with_capacity((pixels.len() + 1) / 2);
  for pair in pixels.chunks(2) {
    let hi = pair[0] << 4;
    let lo = if pair.len() == 2 { pair[1] } else { 0 };
    out.push(hi | lo);
  }
  out
}

/// Inverse of [`pack_nibbles`]; `None` if `bytes` is not exactly the
/// packed length for `count` pixels or the odd trailing nibble is set.
fn unpack_nibbles(bytes: &[u8], count: usize) -> Option<Vec<u8>> {
  if bytes.len() != (count + 1) / 2 {
    return None;
  }
  let mut pixels = Vec::with_capacity(count);
  for &b in bytes {
    pixels.push(b >> 4);
    pixels.push(b & 0x0F);
  }
  if pixels.len() > count {
    if pixels.pop() != Some(0) {
      return None;
    }
  }
  Some(pixels)
}
