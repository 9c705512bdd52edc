//! Region blob encoding shared by every backend.
//!
//! Layout before compression:
//! `[version=1][bits_per_entry][palette_len:u32_le][palette:u64_le[]][indices:u64_le[]]`
//!
//! Palette indices are packed LSB-first into `u64` words without spanning word
//! boundaries. A single-entry palette has `bits_per_entry = 0` and no index
//! words. The whole payload is DEFLATE-compressed.

use std::collections::HashMap;
use std::io::{Read, Write};

use bytes::{Buf, BufMut};
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use thiserror::Error;
use voxen_terrain::region::REGION_VOLUME;
use voxen_terrain::RegionData;

const CODEC_VERSION: u8 = 1;

/// Upper bound on the decompressed payload: full palette plus 16-bit indices.
const MAX_RAW_LEN: u64 = 6 + (REGION_VOLUME as u64) * 8 + (REGION_VOLUME as u64) * 2 + 64;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("region blob truncated")]
    Truncated,

    #[error("unsupported region blob version: {0}")]
    UnsupportedVersion(u8),

    #[error("invalid bits per entry: {0}")]
    InvalidBitWidth(u8),

    #[error("palette index {index} out of range (palette size {len})")]
    PaletteIndexOutOfRange { index: usize, len: usize },

    #[error("deflate error: {0}")]
    Deflate(#[from] std::io::Error),
}

/// Minimum bits per palette index. Valid values: 0, 1, 2, 3, 4, 5, 6, 8, 16.
fn bits_per_entry(palette_len: usize) -> u8 {
    match palette_len {
        0..=1 => 0,
        2 => 1,
        3..=4 => 2,
        5..=8 => 3,
        9..=16 => 4,
        17..=32 => 5,
        33..=64 => 6,
        65..=256 => 8,
        _ => 16,
    }
}

fn valid_bit_width(bits: u8) -> bool {
    matches!(bits, 0..=6 | 8 | 16)
}

pub fn encode_region(region: &RegionData) -> Result<Vec<u8>, CodecError> {
    let cells = region.as_raw();

    let mut palette: Vec<u64> = Vec::new();
    let mut lookup: HashMap<u64, u32> = HashMap::new();
    let indices: Vec<u32> = cells
        .iter()
        .map(|&raw| {
            *lookup.entry(raw).or_insert_with(|| {
                palette.push(raw);
                (palette.len() - 1) as u32
            })
        })
        .collect();

    let bits = bits_per_entry(palette.len());
    let mut raw = Vec::with_capacity(6 + palette.len() * 8);
    raw.put_u8(CODEC_VERSION);
    raw.put_u8(bits);
    raw.put_u32_le(palette.len() as u32);
    for &value in &palette {
        raw.put_u64_le(value);
    }

    if bits > 0 {
        let per_word = 64 / bits as usize;
        for chunk in indices.chunks(per_word) {
            let mut word = 0u64;
            for (slot, &index) in chunk.iter().enumerate() {
                word |= (index as u64) << (bits as usize * slot);
            }
            raw.put_u64_le(word);
        }
    }

    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&raw)?;
    Ok(encoder.finish()?)
}

pub fn decode_region(blob: &[u8]) -> Result<RegionData, CodecError> {
    let mut raw = Vec::new();
    DeflateDecoder::new(blob)
        .take(MAX_RAW_LEN)
        .read_to_end(&mut raw)?;
    let mut buf = raw.as_slice();

    if buf.remaining() < 6 {
        return Err(CodecError::Truncated);
    }
    let version = buf.get_u8();
    if version != CODEC_VERSION {
        return Err(CodecError::UnsupportedVersion(version));
    }
    let bits = buf.get_u8();
    if !valid_bit_width(bits) {
        return Err(CodecError::InvalidBitWidth(bits));
    }
    let palette_len = buf.get_u32_le() as usize;
    if palette_len == 0 || palette_len > REGION_VOLUME {
        return Err(CodecError::Truncated);
    }
    if buf.remaining() < palette_len * 8 {
        return Err(CodecError::Truncated);
    }
    let palette: Vec<u64> = (0..palette_len).map(|_| buf.get_u64_le()).collect();

    if bits == 0 {
        return RegionData::from_raw(vec![palette[0]; REGION_VOLUME]).ok_or(CodecError::Truncated);
    }

    let per_word = 64 / bits as usize;
    let word_count = REGION_VOLUME.div_ceil(per_word);
    if buf.remaining() < word_count * 8 {
        return Err(CodecError::Truncated);
    }
    let mask = (1u64 << bits) - 1;
    let mut cells = Vec::with_capacity(REGION_VOLUME);
    for _ in 0..word_count {
        let word = buf.get_u64_le();
        for slot in 0..per_word {
            if cells.len() == REGION_VOLUME {
                break;
            }
            let index = ((word >> (bits as usize * slot)) & mask) as usize;
            let value = *palette
                .get(index)
                .ok_or(CodecError::PaletteIndexOutOfRange {
                    index,
                    len: palette_len,
                })?;
            cells.push(value);
        }
    }
    RegionData::from_raw(cells).ok_or(CodecError::Truncated)
}
