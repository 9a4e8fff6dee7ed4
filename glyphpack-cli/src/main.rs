mod bdf_import;
mod c_export;
mod ttf_import;

use anyhow::{anyhow, bail, Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use glyphpack::{encode_font, encoded_size, init_dictionary, optimize, DataFile};
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use std::collections::BTreeSet;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::time::Instant;
use std::{fs, fmt::Write as _};

// ---------------------------------------------
// glyphpack: compressed bitmap font builder
// Pipeline: import-ttf/import-bdf -> .dat, optimize .dat in place,
// export .dat -> C tables. The .dat file is the unit of work and is
// rewritten after every accepted optimizer iteration.
// ---------------------------------------------
#[derive(Parser, Debug)]
#[command(name = "glyphpack", author, version, about = "glyphpack: import, optimize and export compressed bitmap fonts", long_about = None)]
struct Cli {
  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Import a TrueType/OpenType font into a data file.
  ImportTtf {
    /// Path to the .ttf/.otf file.
    ttf: PathBuf,
    /// Pixel size to rasterize at.
    size: u32,
    /// Threshold to pure black/white instead of 16-level antialiasing.
    #[arg(long)]
    bw: bool,
    /// Character range(s), inclusive, format START:END (single scalars).
    /// Defaults to printable ASCII. Repeatable.
    #[arg(long = "range", action = ArgAction::Append)]
    ranges: Vec<String>,
  },
  /// Import a BDF bitmap font into a data file.
  ImportBdf {
    /// Path to the .bdf file.
    bdf: PathBuf,
  },
  /// Export a data file to .c and .h source code.
  Export {
    dat: PathBuf,
    /// Output basename; writes <basename>.h and <basename>.c.
    basename: PathBuf,
  },
  /// Remove every character except the listed codes or lo-hi ranges.
  Filter {
    dat: PathBuf,
    /// Decimal or 0x-prefixed codes, single or as lo-hi ranges.
    #[arg(required = true)]
    ranges: Vec<String>,
  },
  /// Report the encoded size of a data file.
  Size { dat: PathBuf },
  /// Run optimization iterations, saving after each one.
  Optimize {
    dat: PathBuf,
    /// Iteration count; 0 runs until interrupted.
    #[arg(default_value_t = 100)]
    iterations: u64,
  },
  /// Hex-dump the encoded dictionary and glyph streams.
  ShowEncoded { dat: PathBuf },
  /// Render one glyph bitmap as text.
  ShowGlyph {
    dat: PathBuf,
    /// Glyph index, or "largest" for the longest encoded stream.
    index: String,
  },
}

fn main() -> Result<()> {
  match Cli::parse().command {
    Command::ImportTtf { ttf, size, bw, ranges } => cmd_import_ttf(&ttf, size, bw, &ranges),
    Command::ImportBdf { bdf } => cmd_import_bdf(&bdf),
    Command::Export { dat, basename } => cmd_export(&dat, &basename),
    Command::Filter { dat, ranges } => cmd_filter(&dat, &ranges),
    Command::Size { dat } => cmd_size(&dat),
    Command::Optimize { dat, iterations } => cmd_optimize(&dat, iterations),
    Command::ShowEncoded { dat } => cmd_show_encoded(&dat),
    Command::ShowGlyph { dat, index } => cmd_show_glyph(&dat, &index),
  }
}

// ---------------------------------------------
// commands
// ---------------------------------------------

fn cmd_import_ttf(ttf: &Path, size: u32, bw: bool, ranges: &[String]) -> Result<()> {
  let ranges = parse_char_ranges(ranges)?;
  let bytes = fs::read(ttf).with_context(|| format!("read ttf {:?}", ttf))?;
  let name = format!("{}{}", stem(ttf), size);

  let mut df = ttf_import::import(&bytes, &name, size as f32, &ranges, bw)?;
  init_dictionary(&mut df)?;
  df.set_seed(rand::random());

  let dest = ttf.with_file_name(format!("{}{}{}.dat", stem(ttf), size, if bw { "bw" } else { "" }));
  println!("Importing {} to {}", ttf.display(), dest.display());
  save_dat(&dest, &df)?;
  println!("Done: {} unique glyphs.", df.glyph_count());
  Ok(())
}

fn cmd_import_bdf(bdf: &Path) -> Result<()> {
  let mut df = bdf_import::import(bdf)?;
  init_dictionary(&mut df)?;
  df.set_seed(rand::random());

  let dest = bdf.with_extension("dat");
  println!("Importing {} to {}", bdf.display(), dest.display());
  save_dat(&dest, &df)?;
  println!("Done: {} unique glyphs.", df.glyph_count());
  Ok(())
}

fn cmd_export(dat: &Path, basename: &Path) -> Result<()> {
  let df = load_dat(dat)?;
  let encoded = encode_font(&df).context("encode font")?;
  let name = stem(basename);

  let header = basename.with_extension("h");
  let mut out = BufWriter::new(File::create(&header).with_context(|| format!("create {:?}", header))?);
  c_export::write_header(&mut out, &name, &df)?;
  println!("Wrote {}", header.display());

  let source = basename.with_extension("c");
  let mut out = BufWriter::new(File::create(&source).with_context(|| format!("create {:?}", source))?);
  c_export::write_source(&mut out, &name, &df, &encoded)?;
  println!("Wrote {}", source.display());
  Ok(())
}

fn cmd_filter(dat: &Path, ranges: &[String]) -> Result<()> {
  let mut allowed = BTreeSet::new();
  for spec in ranges {
    match spec.split_once('-') {
      Some((lo, hi)) => {
        let lo = parse_code(lo)?;
        let hi = parse_code(hi)?;
        if hi < lo {
          bail!("range end {hi} below start {lo}");
        }
        allowed.extend(lo..=hi);
      }
      None => {
        allowed.insert(parse_code(spec)?);
      }
    }
  }

  let df = load_dat(dat)?;
  println!("Font originally had {} glyphs.", df.glyph_count());
  let df = df.filter_chars(&allowed)?;
  println!("After filtering, {} glyphs remain.", df.glyph_count());
  save_dat(dat, &df)
}

fn cmd_size(dat: &Path) -> Result<()> {
  let df = load_dat(dat)?;
  let info = df.font_info();
  let size = encoded_size(&df).context("measure encoded size")?;
  let raw = df.glyph_count() * info.max_width as usize * info.max_height as usize / 2;

  println!("Glyph count:       {}", df.glyph_count());
  println!("Glyph bbox:        {}x{} pixels", info.max_width, info.max_height);
  println!("Uncompressed size: {} bytes", raw);
  println!("Compressed size:   {} bytes", size);
  if df.glyph_count() > 0 {
    println!("Bytes per glyph:   {}", size / df.glyph_count());
  }
  Ok(())
}

fn cmd_optimize(dat: &Path, iterations: u64) -> Result<()> {
  let mut df = load_dat(dat)?;
  let seed = match df.seed() {
    Some(seed) => seed,
    None => {
      let seed = rand::random();
      df.set_seed(seed);
      seed
    }
  };
  let mut rng = ChaCha20Rng::seed_from_u64(seed);

  let start_size = encoded_size(&df).context("measure encoded size")?;
  println!("Original size is {} bytes", start_size);
  println!("Press ctrl-C at any time to stop.");
  println!("Results are saved automatically after each iteration.");
  if iterations > 0 {
    println!("Limit is {} iterations", iterations);
  }

  let started = Instant::now();
  let mut i = 0u64;
  while iterations == 0 || i < iterations {
    optimize(&mut df, &mut rng).context("optimize iteration")?;
    i += 1;

    let size = encoded_size(&df).context("measure encoded size")?;
    let minutes = started.elapsed().as_secs_f64() / 60.0;
    let speed = ((start_size - size) as f64 / minutes.max(1.0 / 60.0)) as u64;
    println!("iteration {}, size {} bytes, speed {} B/min", i, size, speed);

    save_dat(dat, &df)?;
  }
  Ok(())
}

fn cmd_show_encoded(dat: &Path) -> Result<()> {
  let df = load_dat(dat)?;
  let encoded = encode_font(&df).context("encode font")?;

  let mut index = 24;
  for entry in &encoded.rle_dictionary {
    println!("Dict RLE {}: {}", index, hex_line(entry));
    index += 1;
  }
  for entry in &encoded.ref_dictionary {
    println!("Dict Ref {}: {}", index, hex_line(entry));
    index += 1;
  }
  for (i, stream) in encoded.glyphs.iter().enumerate() {
    println!("Glyph {}: {}", i, hex_line(stream));
  }
  Ok(())
}

fn cmd_show_glyph(dat: &Path, index: &str) -> Result<()> {
  let df = load_dat(dat)?;

  let index = if index == "largest" {
    let encoded = encode_font(&df).context("encode font")?;
    let (index, len) = encoded
      .glyphs
      .iter()
      .enumerate()
      .map(|(i, s)| (i, s.len()))
      .max_by_key(|&(i, len)| (len, std::cmp::Reverse(i)))
      .ok_or_else(|| anyhow!("font has no glyphs"))?;
    println!("Index {}, length {}", index, len);
    index
  } else {
    index.parse().with_context(|| format!("bad glyph index {:?}", index))?
  };

  let glyph = df.glyph_at(index).ok_or_else(|| anyhow!("no such glyph {index}"))?;
  let codes: Vec<String> = glyph.chars().iter().map(|c| c.to_string()).collect();
  println!("Chars: {}  advance: {}", codes.join(","), glyph.advance());
  print!("{}", glyph.bitmap().to_text());
  Ok(())
}

// ---------------------------------------------
// helpers
// ---------------------------------------------

fn load_dat(path: &Path) -> Result<DataFile> {
  let file = File::open(path).with_context(|| format!("open {:?}", path))?;
  DataFile::load(BufReader::new(file)).with_context(|| format!("invalid data file {:?}", path))
}

fn save_dat(path: &Path, df: &DataFile) -> Result<()> {
  let file = File::create(path).with_context(|| format!("create {:?}", path))?;
  let mut out = BufWriter::new(file);
  df.save(&mut out).with_context(|| format!("write {:?}", path))?;
  Ok(())
}

fn stem(path: &Path) -> String {
  path.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_else(|| "font".into())
}

/// Parse repeatable START:END range arguments; both ends are single
/// Unicode scalars and the default is printable ASCII including space.
fn parse_char_ranges(ranges: &[String]) -> Result<Vec<(char, char)>> {
  if ranges.is_empty() {
    return Ok(vec![(' ', '~')]);
  }
  let mut out = Vec::with_capacity(ranges.len());
  for s in ranges {
    let (a, b) = s.split_once(':').ok_or_else(|| anyhow!("bad --range (missing end): {s}"))?;
    let a = one_char(a).ok_or_else(|| anyhow!("start must be a single scalar: {s}"))?;
    let b = one_char(b).ok_or_else(|| anyhow!("end must be a single scalar: {s}"))?;
    if b < a {
      bail!("range end < start: {s}");
    }
    out.push((a, b));
  }
  Ok(out)
}

fn one_char(s: &str) -> Option<char> {
  let mut it = s.chars();
  let c = it.next()?;
  if it.next().is_some() {
    return None;
  }
  Some(c)
}

fn parse_code(s: &str) -> Result<u32> {
  let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
    Some(hex) => u32::from_str_radix(hex, 16),
    None => s.parse(),
  };
  parsed.map_err(|_| anyhow!("bad character code {:?}", s))
}

fn hex_line(bytes: &[u8]) -> String {
  let mut out = String::with_capacity(bytes.len() * 3);
  for b in bytes {
    let _ = write!(out, "{:02x} ", b);
  }
  out.trim_end().to_string()
}
