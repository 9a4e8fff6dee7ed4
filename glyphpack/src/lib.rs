//! Dictionary-compressed 4bpp bitmap fonts for microcontrollers.
//!
//! A font is held as a [`DataFile`]: unique glyph bitmaps, a shared
//! dictionary of short byte strings, and font metrics. The pipeline is:
//!
//! - import produces a `DataFile` and [`optimize::init_dictionary`] seeds it,
//! - [`encode::encode_font`] turns bitmaps into token streams under the
//!   current dictionary (see `encode` for the wire format),
//! - [`encode::encoded_size`] reports the exact encoded byte cost,
//! - [`optimize::optimize`] runs one randomized improvement iteration,
//!   committing a dictionary mutation only when the total size shrinks.
//!
//! Bitmaps are immutable after import and shared by reference between
//! data-file versions; only dictionary entries ever change.

pub mod bitmap;
pub mod datafile;
pub mod encode;
pub mod optimize;

pub use bitmap::{Bitmap, Glyph};
pub use datafile::{DataFile, DataFileError, DictEntry, EntryKind, FontInfo};
pub use encode::{encode_font, encode_glyph, encoded_size, EncodeError, EncodedFont};
pub use optimize::{init_dictionary, optimize};
