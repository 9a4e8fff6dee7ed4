//! Token alphabet, deterministic encoder and exact size estimator.
//!
//! A glyph's pixel sequence is serialized as single-byte tokens:
//!
//! ```text
//! byte 0                  reserved terminator, never emitted
//! 1..=15                  run of N background pixels, N = byte
//! 16..=23                 run of N foreground pixels, N = byte - 15
//! 24..24+D-1              reference to dictionary entry byte - 24
//! B..B+195                literal pair (a, b), a and b in 1..=14
//! B+196..B+209            literal single pixel v in 1..=14
//! ```
//!
//! where `D` is the dictionary entry count and `B = 24 + D`. The literal
//! block floats above the dictionary; pair bytes are laid out row-major
//! over the 14x14 grid of allowed values and the fourteen singles follow.
//! Values 0 and 15 only ever travel in run tokens. A full 22-entry
//! dictionary saturates the byte space exactly (24 + 22 + 210 = 256);
//! larger dictionaries are valid for monochrome content, and the encoder
//! reports [`EncodeError::TokenSpace`] when a literal byte would not fit.
//!
//! The encoder is greedy: at every position it consumes the longest
//! matching token, breaking ties dictionary over run over literal, then
//! lower dictionary index. Matches never extend past the end of the
//! pixel sequence, so decoding `encode(g, D)` recovers `g` exactly.

use crate::bitmap::Bitmap;
use crate::datafile::{DataFile, DictEntry, EntryKind};

/// First byte value assigned to dictionary references.
pub const DICT_START: u8 = 24;

/// Longest run a single zero-run token can carry.
pub const MAX_ZERO_RUN: usize = 15;

/// Longest run a single fifteen-run token can carry.
pub const MAX_FIFTEEN_RUN: usize = 8;

/// Number of literal-pair byte values (14 x 14 allowed pairs).
pub const LITERAL_PAIRS: usize = 196;

/// Number of literal-single byte values.
pub const LITERAL_SINGLES: usize = 14;

/// Total size of the literal block above the dictionary.
pub const LITERAL_COUNT: usize = LITERAL_PAIRS + LITERAL_SINGLES;

/// Fixed per-font overhead charged by [`encoded_size`].
pub const HEADER_SIZE: usize = 16;

/// Errors from tokenization and encoding.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum EncodeError {
  /// A byte that decodes to no token in the current dictionary context.
  #[error("byte {0:#04x} is not a valid token here")]
  BadToken(u8),
  /// A dictionary entry whose byte string does not expand.
  #[error("dictionary entry {0} does not decode")]
  BadEntry(usize),
  /// The dictionary plus the literal block no longer fit in one byte.
  #[error("token space exhausted with {0} dictionary entries")]
  TokenSpace(usize),
}

/// One token of the encoded stream. Byte conversion lives here and only
/// here; the persistence validator and the tests' reference decoder all
/// go through [`Token::from_byte`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Token {
  /// `1..=15` background pixels.
  Zeros(u8),
  /// `1..=8` foreground pixels.
  Fifteens(u8),
  /// Zero-based dictionary index.
  Ref(u8),
  /// Two adjacent pixels, both in `1..=14`.
  Pair(u8, u8),
  /// One pixel in `1..=14`.
  Single(u8),
}

impl Token {
  /// Decode one byte under a dictionary of `dict_len` entries.
  pub fn from_byte(byte: u8, dict_len: usize) -> Result<Self, EncodeError> {
    let b = byte as usize;
    if b == 0 {
      return Err(EncodeError::BadToken(byte));
    }
    if b <= MAX_ZERO_RUN {
      return Ok(Token::Zeros(byte));
    }
    if b <= MAX_ZERO_RUN + MAX_FIFTEEN_RUN {
      return Ok(Token::Fifteens(byte - MAX_ZERO_RUN as u8));
    }
    let dict_base = DICT_START as usize;
    if b < dict_base + dict_len {
      return Ok(Token::Ref((b - dict_base) as u8));
    }
    let idx = b - dict_base - dict_len;
    if idx < LITERAL_PAIRS {
      return Ok(Token::Pair((idx / 14) as u8 + 1, (idx % 14) as u8 + 1));
    }
    if idx < LITERAL_COUNT {
      return Ok(Token::Single((idx - LITERAL_PAIRS) as u8 + 1));
    }
    Err(EncodeError::BadToken(byte))
  }

  /// Encode into one byte under a dictionary of `dict_len` entries.
  pub fn to_byte(self, dict_len: usize) -> Result<u8, EncodeError> {
    let literal_base = DICT_START as usize + dict_len;
    let b = match self {
      Token::Zeros(n) => n as usize,
      Token::Fifteens(n) => MAX_ZERO_RUN + n as usize,
      Token::Ref(i) => DICT_START as usize + i as usize,
      Token::Pair(a, b) => literal_base + (a as usize - 1) * 14 + (b as usize - 1),
      Token::Single(v) => literal_base + LITERAL_PAIRS + (v as usize - 1),
    };
    if b > u8::MAX as usize {
      return Err(EncodeError::TokenSpace(dict_len));
    }
    Ok(b as u8)
  }

  /// Pixels this token expands to, given the expansions of all entries.
  fn expand_into(self, out: &mut Vec<u8>, expansions: &[Vec<u8>]) {
    match self {
      Token::Zeros(n) => out.extend(std::iter::repeat(0).take(n as usize)),
      Token::Fifteens(n) => out.extend(std::iter::repeat(15).take(n as usize)),
      Token::Ref(i) => out.extend_from_slice(&expansions[i as usize]),
      Token::Pair(a, b) => out.extend_from_slice(&[a, b]),
      Token::Single(v) => out.push(v),
    }
  }
}

/// Pixel expansion of every dictionary entry, in index order.
///
/// RLE entries decode through the run/literal sub-alphabet; REF entries
/// may also reference strictly earlier indices, so one forward pass
/// suffices and the result is acyclic by construction.
pub(crate) fn expand_entries(entries: &[DictEntry]) -> Result<Vec<Vec<u8>>, EncodeError> {
  let dict_len = entries.len();
  let mut expansions: Vec<Vec<u8>> = Vec::with_capacity(dict_len);
  for (i, entry) in entries.iter().enumerate() {
    let mut pixels = Vec::new();
    for &byte in &entry.bytes {
      let token = Token::from_byte(byte, dict_len).map_err(|_| EncodeError::BadEntry(i))?;
      match token {
        Token::Ref(j) => {
          if entry.kind == EntryKind::Rle || j as usize >= i {
            return Err(EncodeError::BadEntry(i));
          }
          pixels.extend_from_slice(&expansions[j as usize]);
        }
        other => other.expand_into(&mut pixels, &expansions),
      }
    }
    expansions.push(pixels);
  }
  Ok(expansions)
}

/// Greedy choice for the suffix `rest`. Total over valid pixel data: a
/// leading 0 or 15 always has a run and a leading mid value always has a
/// literal single.
fn choose_token(rest: &[u8], expansions: &[Vec<u8>]) -> Token {
  let mut best = None;
  let mut best_len = 0usize;

  for (i, exp) in expansions.iter().enumerate() {
    if exp.len() > best_len && rest.starts_with(exp) {
      best = Some(Token::Ref(i as u8));
      best_len = exp.len();
    }
  }

  let zeros = rest.iter().take_while(|&&p| p == 0).count().min(MAX_ZERO_RUN);
  if zeros > best_len {
    best = Some(Token::Zeros(zeros as u8));
    best_len = zeros;
  }
  let ones = rest.iter().take_while(|&&p| p == 15).count().min(MAX_FIFTEEN_RUN);
  if ones > best_len {
    best = Some(Token::Fifteens(ones as u8));
    best_len = ones;
  }

  let mid = |p: u8| (1..=14).contains(&p);
  if best_len < 2 && rest.len() >= 2 && mid(rest[0]) && mid(rest[1]) {
    best = Some(Token::Pair(rest[0], rest[1]));
    best_len = 2;
  }
  if best_len < 1 {
    // Runs and pairs missed, so the head is a lone mid-intensity pixel.
    best = Some(Token::Single(rest[0]));
  }

  best.unwrap_or(Token::Single(rest[0]))
}

fn encode_pixels(pixels: &[u8], expansions: &[Vec<u8>], dict_len: usize) -> Result<Vec<u8>, EncodeError> {
  let mut out = Vec::new();
  let mut pos = 0;
  while pos < pixels.len() {
    let token = choose_token(&pixels[pos..], expansions);
    out.push(token.to_byte(dict_len)?);
    pos += match token {
      Token::Zeros(n) => n as usize,
      Token::Fifteens(n) => n as usize,
      Token::Ref(i) => expansions[i as usize].len(),
      Token::Pair(..) => 2,
      Token::Single(_) => 1,
    };
  }
  Ok(out)
}

/// Encode one bitmap under `entries`. Deterministic; two calls on equal
/// inputs return identical byte strings.
pub fn encode_glyph(bitmap: &Bitmap, entries: &[DictEntry]) -> Result<Vec<u8>, EncodeError> {
  let expansions = expand_entries(entries)?;
  encode_pixels(bitmap.pixels(), &expansions, entries.len())
}

/// The per-font encoder output: dictionary byte strings split by kind,
/// plus one token stream per glyph in glyph-list order. Consumers treat
/// all three sequences as read-only; they are regenerated on demand.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncodedFont {
  pub rle_dictionary: Vec<Vec<u8>>,
  pub ref_dictionary: Vec<Vec<u8>>,
  pub glyphs: Vec<Vec<u8>>,
}

impl EncodedFont {
  /// Serialized size: fixed header, one length byte per dictionary
  /// entry, one two-byte length word per glyph, plus all payload bytes.
  pub fn size_in_bytes(&self) -> usize {
    let dict: usize = self
      .rle_dictionary
      .iter()
      .chain(self.ref_dictionary.iter())
      .map(|e| 1 + e.len())
      .sum();
    let glyphs: usize = self.glyphs.iter().map(|g| 2 + g.len()).sum();
    HEADER_SIZE + dict + glyphs
  }
}

/// Encode every glyph of `df` under its current dictionary.
pub fn encode_font(df: &DataFile) -> Result<EncodedFont, EncodeError> {
  let entries = df.dictionary();
  let expansions = expand_entries(entries)?;

  let mut glyphs = Vec::with_capacity(df.glyph_count());
  for glyph in df.glyphs() {
    glyphs.push(encode_pixels(glyph.bitmap().pixels(), &expansions, entries.len())?);
  }

  let mut rle_dictionary = Vec::new();
  let mut ref_dictionary = Vec::new();
  for entry in entries {
    match entry.kind {
      EntryKind::Rle => rle_dictionary.push(entry.bytes.clone()),
      EntryKind::Ref => ref_dictionary.push(entry.bytes.clone()),
    }
  }

  Ok(EncodedFont { rle_dictionary, ref_dictionary, glyphs })
}

/// Exact serialized size of `df` under its current dictionary. The
/// optimizer's accept/reject decisions ride on this value being exact
/// and reproducible.
pub fn encoded_size(df: &DataFile) -> Result<usize, EncodeError> {
  Ok(encode_font(df)?.size_in_bytes())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::datafile::{DataFile, FontInfo};
  use crate::bitmap::Glyph;
  use proptest::prelude::*;
  use std::sync::Arc;
  use test_case::test_case;

  /// Reference decoder mirroring the format description above; kept
  /// independent of the encoder so coverage failures cannot cancel out.
  fn decode_stream(stream: &[u8], entries: &[DictEntry]) -> Vec<u8> {
    let expansions = expand_entries(entries).expect("entries expand");
    let mut pixels = Vec::new();
    for &byte in stream {
      let token = Token::from_byte(byte, entries.len()).expect("valid token");
      token.expand_into(&mut pixels, &expansions);
    }
    pixels
  }

  fn rle(bytes: &[u8]) -> DictEntry {
    DictEntry::new(EntryKind::Rle, bytes.to_vec())
  }

  #[test]
  fn all_zero_glyph_uses_zero_runs() {
    let bitmap = Bitmap::new(8, 8, vec![0; 64]).unwrap();
    assert_eq!(encode_glyph(&bitmap, &[]).unwrap(), vec![15, 15, 15, 15, 4]);
  }

  #[test]
  fn all_fifteen_glyph_uses_fifteen_runs() {
    let bitmap = Bitmap::new(4, 4, vec![15; 16]).unwrap();
    assert_eq!(encode_glyph(&bitmap, &[]).unwrap(), vec![23, 23]);
  }

  #[test]
  fn checkerboard_prefers_runs_over_literals() {
    let bitmap = Bitmap::new(2, 2, vec![0, 15, 15, 0]).unwrap();
    assert_eq!(encode_glyph(&bitmap, &[]).unwrap(), vec![1, 17, 1]);
  }

  #[test]
  fn mid_pixels_pack_into_pairs_and_singles() {
    // 7 7 | 7 0: one pair, one single, one zero run.
    let bitmap = Bitmap::new(2, 2, vec![7, 7, 7, 0]).unwrap();
    let stream = encode_glyph(&bitmap, &[]).unwrap();
    let base = DICT_START as usize;
    assert_eq!(
      stream,
      vec![(base + 6 * 14 + 6) as u8, (base + LITERAL_PAIRS + 6) as u8, 1]
    );
    assert_eq!(decode_stream(&stream, &[]), bitmap.pixels());
  }

  #[test]
  fn dictionary_wins_ties_and_lower_index_wins() {
    // Both entries expand to four zeros; the zero-run token also covers
    // four pixels. The reference to entry 0 must win the tie.
    let entries = vec![rle(&[2, 2]), rle(&[1, 3])];
    let bitmap = Bitmap::new(2, 2, vec![0; 4]).unwrap();
    assert_eq!(encode_glyph(&bitmap, &entries).unwrap(), vec![DICT_START]);
  }

  #[test]
  fn longer_run_beats_shorter_dictionary_match() {
    let entries = vec![rle(&[1, 1])]; // two zeros
    let bitmap = Bitmap::new(3, 1, vec![0, 0, 0]).unwrap();
    assert_eq!(encode_glyph(&bitmap, &entries).unwrap(), vec![3]);
  }

  #[test]
  fn ref_entries_expand_through_earlier_entries() {
    let entries = vec![
      rle(&[15, 1]), // sixteen zeros
      DictEntry::new(EntryKind::Ref, vec![DICT_START, DICT_START]),
    ];
    let expansions = expand_entries(&entries).unwrap();
    assert_eq!(expansions[1], vec![0u8; 32]);
  }

  #[test]
  fn forward_reference_is_rejected() {
    let entries = vec![DictEntry::new(EntryKind::Ref, vec![DICT_START, 1])];
    assert_eq!(expand_entries(&entries), Err(EncodeError::BadEntry(0)));
  }

  #[test]
  fn nested_reference_in_rle_entry_is_rejected() {
    let entries = vec![rle(&[15, 1]), rle(&[DICT_START, 1])];
    assert_eq!(expand_entries(&entries), Err(EncodeError::BadEntry(1)));
  }

  #[test]
  fn literal_overflow_reports_token_space() {
    // Forty entries push the top of the literal block past byte 255, so
    // the highest pair no longer fits while runs still encode.
    let entries: Vec<DictEntry> = (0..40).map(|_| rle(&[7, 22])).collect();
    let mid = Bitmap::new(2, 1, vec![14, 14]).unwrap();
    assert_eq!(
      encode_glyph(&mid, &entries).unwrap_err(),
      EncodeError::TokenSpace(40)
    );
    let runs = Bitmap::new(2, 1, vec![0, 0]).unwrap();
    assert!(encode_glyph(&runs, &entries).is_ok());
  }

  #[test]
  fn byte_zero_is_reserved() {
    assert_eq!(Token::from_byte(0, 0), Err(EncodeError::BadToken(0)));
  }

  #[test_case(1, Token::Zeros(1))]
  #[test_case(15, Token::Zeros(15))]
  #[test_case(16, Token::Fifteens(1))]
  #[test_case(23, Token::Fifteens(8))]
  #[test_case(24, Token::Pair(1, 1))]
  #[test_case(24 + 195, Token::Pair(14, 14))]
  #[test_case(24 + 196, Token::Single(1))]
  #[test_case(24 + 209, Token::Single(14))]
  fn token_bytes_round_trip_without_dictionary(byte: u8, token: Token) {
    assert_eq!(Token::from_byte(byte, 0).unwrap(), token);
    assert_eq!(token.to_byte(0).unwrap(), byte);
  }

  #[test]
  fn encoding_is_deterministic() {
    let entries = vec![rle(&[4, 19]), rle(&[23, 15])];
    let bitmap = Bitmap::new(6, 3, vec![0, 0, 0, 0, 15, 15, 15, 15, 0, 0, 0, 0, 7, 9, 15, 15, 0, 3]).unwrap();
    let a = encode_glyph(&bitmap, &entries).unwrap();
    let b = encode_glyph(&bitmap, &entries).unwrap();
    assert_eq!(a, b);
  }

  #[test]
  fn encoded_size_counts_header_entries_and_glyphs() {
    let bitmap = Arc::new(Bitmap::new(4, 4, vec![0; 16]).unwrap());
    let glyphs = vec![Glyph::new(bitmap, 4, vec![65]).unwrap()];
    let info = FontInfo {
      name: "t".into(),
      max_width: 4,
      max_height: 4,
      baseline_x: 0,
      baseline_y: 3,
      line_height: 5,
      flags: 0,
    };
    let df = DataFile::new(info, vec![rle(&[15, 1])], glyphs).unwrap();
    // Header 16 + entry (1 + 2) + glyph (2 + 1): the glyph stream is one
    // dictionary reference covering all sixteen zeros.
    assert_eq!(encoded_size(&df).unwrap(), 16 + 3 + 3);
  }

  proptest! {
    /// Coverage law: decoding the encoder's output recovers the exact
    /// pixel sequence, for arbitrary 4bpp content and a small dictionary.
    #[test]
    fn encode_then_decode_recovers_pixels(
      width in 1u16..12,
      height in 1u16..12,
      seed in proptest::collection::vec(0u8..16, 144),
    ) {
      let count = width as usize * height as usize;
      let pixels: Vec<u8> = seed.into_iter().take(count).collect();
      prop_assume!(pixels.len() == count);
      let bitmap = Bitmap::new(width, height, pixels).unwrap();
      let entries = vec![rle(&[15, 1]), rle(&[23, 23]), rle(&[4, 19, 4])];
      let stream = encode_glyph(&bitmap, &entries).unwrap();
      prop_assert_eq!(decode_stream(&stream, &entries), bitmap.pixels());
    }
  }
}
