//! End-to-end scenarios across import-shaped construction, dictionary
//! seeding, optimization and persistence.

use std::sync::Arc;

use glyphpack::encode::{encode_font, encoded_size, Token, DICT_START};
use glyphpack::{init_dictionary, optimize, Bitmap, DataFile, DictEntry, EntryKind, FontInfo, Glyph};
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;

fn info(name: &str, max_width: u16, max_height: u16) -> FontInfo {
  FontInfo {
    name: name.into(),
    max_width,
    max_height,
    baseline_x: 0,
    baseline_y: max_height as i16 - 1,
    line_height: max_height + 2,
    flags: 0,
  }
}

fn glyph(w: u16, h: u16, pixels: Vec<u8>, code: u32) -> Glyph {
  Glyph::new(Arc::new(Bitmap::new(w, h, pixels).unwrap()), w as i16, vec![code]).unwrap()
}

/// Pixel expansion of every dictionary entry, written against the wire
/// format directly so encoder regressions cannot hide behind their own
/// helpers.
fn expansions(df: &DataFile) -> Vec<Vec<u8>> {
  let entries = df.dictionary();
  let mut out: Vec<Vec<u8>> = Vec::new();
  for entry in entries {
    let mut pixels = Vec::new();
    for &byte in &entry.bytes {
      match Token::from_byte(byte, entries.len()).expect("entry byte decodes") {
        Token::Zeros(n) => pixels.extend(std::iter::repeat(0).take(n as usize)),
        Token::Fifteens(n) => pixels.extend(std::iter::repeat(15).take(n as usize)),
        Token::Ref(j) => {
          let exp = out[j as usize].clone();
          pixels.extend(exp);
        }
        Token::Pair(a, b) => pixels.extend([a, b]),
        Token::Single(v) => pixels.push(v),
      }
    }
    out.push(pixels);
  }
  out
}

fn decode(stream: &[u8], exps: &[Vec<u8>], dict_len: usize) -> Vec<u8> {
  let mut pixels = Vec::new();
  for &byte in stream {
    match Token::from_byte(byte, dict_len).expect("stream byte decodes") {
      Token::Zeros(n) => pixels.extend(std::iter::repeat(0).take(n as usize)),
      Token::Fifteens(n) => pixels.extend(std::iter::repeat(15).take(n as usize)),
      Token::Ref(j) => pixels.extend(exps[j as usize].clone()),
      Token::Pair(a, b) => pixels.extend([a, b]),
      Token::Single(v) => pixels.push(v),
    }
  }
  pixels
}

/// A font with stroke-like repeated structure and antialiased edges.
fn stroked_font() -> DataFile {
  let (w, h) = (8u16, 10u16);
  let mut glyphs = Vec::new();
  for (i, &top) in [1usize, 2, 4, 5, 6, 3].iter().enumerate() {
    let mut pixels = vec![0u8; w as usize * h as usize];
    for x in 0..w as usize {
      pixels[top * w as usize + x] = 15;
      pixels[(top + 1) * w as usize + x] = 15;
      pixels[(top + 2) * w as usize + x] = if x % 2 == 0 { 6 } else { 11 };
    }
    pixels[(top + 3) * w as usize] = 7;
    glyphs.push(glyph(w, h, pixels, 0x41 + i as u32));
  }
  DataFile::new(info("Stroked", w, h), vec![], glyphs).unwrap()
}

#[test]
fn ten_blank_glyphs_learn_a_shared_dictionary_entry() {
  let (w, h) = (4u16, 4u16);
  let glyphs: Vec<Glyph> = (0..10).map(|i| glyph(w, h, vec![0; 16], 0x30 + i)).collect();
  // Deliberately useless starting entries: foreground runs in an
  // all-background font.
  let junk = vec![
    DictEntry::new(EntryKind::Rle, vec![16, 16]),
    DictEntry::new(EntryKind::Rle, vec![17, 18]),
    DictEntry::new(EntryKind::Rle, vec![23, 23]),
  ];
  let mut df = DataFile::new(info("Blank", w, h), junk, glyphs).unwrap();

  let baseline = encoded_size(&df).unwrap();
  let mut rng = ChaCha20Rng::seed_from_u64(11);
  let mut improved = false;
  for _ in 0..3000 {
    improved |= optimize(&mut df, &mut rng).unwrap();
    let encoded = encode_font(&df).unwrap();
    if encoded.glyphs.iter().all(|s| s.len() == 1) {
      break;
    }
  }

  assert!(improved, "no accepted mutation in 3000 iterations");
  assert!(encoded_size(&df).unwrap() < baseline);

  let encoded = encode_font(&df).unwrap();
  assert!(encoded.glyphs.iter().all(|s| s.len() == 1));
  let byte = encoded.glyphs[0][0];
  assert!(byte >= DICT_START);
  let exps = expansions(&df);
  assert_eq!(exps[(byte - DICT_START) as usize], vec![0u8; 16]);
}

#[test]
fn optimized_stream_still_decodes_to_every_glyph() {
  let mut df = stroked_font();
  init_dictionary(&mut df).unwrap();

  let mut rng = ChaCha20Rng::seed_from_u64(23);
  for _ in 0..400 {
    optimize(&mut df, &mut rng).unwrap();
  }

  let encoded = encode_font(&df).unwrap();
  let exps = expansions(&df);
  for (stream, glyph) in encoded.glyphs.iter().zip(df.glyphs()) {
    assert_eq!(
      decode(stream, &exps, df.dictionary().len()),
      glyph.bitmap().pixels(),
      "stream no longer decodes to its bitmap"
    );
  }
}

#[test]
fn optimized_font_round_trips_through_persistence() {
  let mut df = stroked_font();
  init_dictionary(&mut df).unwrap();
  df.set_seed(99);

  let mut rng = ChaCha20Rng::seed_from_u64(99);
  for _ in 0..200 {
    optimize(&mut df, &mut rng).unwrap();
  }

  let mut text = Vec::new();
  df.save(&mut text).unwrap();
  let loaded = DataFile::load(&text[..]).unwrap();
  assert_eq!(loaded, df);

  // The loaded copy measures and encodes identically.
  assert_eq!(encoded_size(&loaded).unwrap(), encoded_size(&df).unwrap());
  assert_eq!(encode_font(&loaded).unwrap(), encode_font(&df).unwrap());
}

#[test]
fn references_always_point_backwards() {
  let mut df = stroked_font();
  init_dictionary(&mut df).unwrap();

  let mut rng = ChaCha20Rng::seed_from_u64(5);
  for _ in 0..300 {
    optimize(&mut df, &mut rng).unwrap();
    let entries = df.dictionary();
    let mut seen_ref = false;
    for (i, entry) in entries.iter().enumerate() {
      match entry.kind {
        EntryKind::Ref => seen_ref = true,
        EntryKind::Rle => assert!(!seen_ref, "rle entry {i} after a ref entry"),
      }
      for &byte in &entry.bytes {
        if let Token::Ref(j) = Token::from_byte(byte, entries.len()).unwrap() {
          assert!((j as usize) < i, "entry {i} references forward to {j}");
        }
      }
    }
  }
}

#[test]
fn filtering_preserves_bitmaps_and_dictionary() {
  let mut df = stroked_font();
  init_dictionary(&mut df).unwrap();

  let keep = [0x42u32, 0x44].into_iter().collect();
  let filtered = df.filter_chars(&keep).unwrap();

  assert_eq!(filtered.glyph_count(), 2);
  assert_eq!(filtered.dictionary(), df.dictionary());
  for g in filtered.glyphs() {
    let original = df
      .glyphs()
      .iter()
      .find(|o| o.chars() == g.chars())
      .expect("surviving glyph exists in the input");
    assert!(Arc::ptr_eq(g.bitmap(), original.bitmap()));
  }
}
