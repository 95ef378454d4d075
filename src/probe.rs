// 🔬 Schema Probe - encoding + delimiter detection
// Pure inspection of a file prefix; opens its own handle and leaves nothing behind.

use crate::error::IngestError;
use encoding_rs::{DecoderResult, Encoding, ISO_8859_15, ISO_8859_2, UTF_8, WINDOWS_1252};
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// How much of a file is decoded to decide on an encoding
pub const DEFAULT_PROBE_BYTES: usize = 64 * 1024;

/// Tried in order. encoding_rs maps the "latin1" and "iso-8859-1" labels to
/// windows-1252, so that one entry covers both.
pub fn encoding_candidates() -> [&'static Encoding; 4] {
    [UTF_8, WINDOWS_1252, ISO_8859_15, ISO_8859_2]
}

/// Tried in order against the first line; semicolon is also the fallback
pub const DELIMITER_CANDIDATES: [u8; 3] = [b';', b',', b'\t'];

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeResult {
    pub encoding: &'static Encoding,
    pub delimiter: u8,
}

impl ProbeResult {
    pub fn delimiter_name(&self) -> &'static str {
        match self.delimiter {
            b';' => "semicolon",
            b',' => "comma",
            b'\t' => "tab",
            _ => "other",
        }
    }
}

/// Determine (encoding, delimiter) for a delimited text file
pub fn probe_file(path: &Path, probe_bytes: usize) -> Result<ProbeResult, IngestError> {
    let file = File::open(path).map_err(|source| IngestError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let mut prefix = Vec::with_capacity(probe_bytes.min(DEFAULT_PROBE_BYTES));
    file.take(probe_bytes as u64)
        .read_to_end(&mut prefix)
        .map_err(|source| IngestError::Io {
            path: path.to_path_buf(),
            source,
        })?;

    probe_bytes_prefix(&prefix).ok_or_else(|| IngestError::EncodingUndetectable {
        path: path.to_path_buf(),
    })
}

/// Same as `probe_file` over an in-memory prefix
pub fn probe_bytes_prefix(prefix: &[u8]) -> Option<ProbeResult> {
    let (encoding, text) = detect_encoding(prefix)?;
    let first_line = text.lines().next().unwrap_or("");

    Some(ProbeResult {
        encoding,
        delimiter: detect_delimiter(first_line),
    })
}

/// First candidate that decodes the prefix without error, with the decoded text
pub fn detect_encoding(prefix: &[u8]) -> Option<(&'static Encoding, String)> {
    if let Some(rest) = prefix.strip_prefix(UTF8_BOM) {
        return decode_prefix(UTF_8, rest).map(|text| (UTF_8, text));
    }

    // 8-bit candidates accept any byte; NULs mean binary or UTF-16, not text
    if prefix.contains(&0) {
        return None;
    }

    encoding_candidates()
        .into_iter()
        .find_map(|enc| decode_prefix(enc, prefix).map(|text| (enc, text)))
}

/// Strict decode. The prefix may end mid-character, so the decoder is not
/// told this is the last chunk.
fn decode_prefix(encoding: &'static Encoding, prefix: &[u8]) -> Option<String> {
    let mut decoder = encoding.new_decoder_without_bom_handling();
    let capacity = decoder.max_utf8_buffer_length_without_replacement(prefix.len())?;
    let mut text = String::with_capacity(capacity);

    let (result, _read) = decoder.decode_to_string_without_replacement(prefix, &mut text, false);
    match result {
        DecoderResult::InputEmpty => Some(text),
        DecoderResult::Malformed(_, _) | DecoderResult::OutputFull => None,
    }
}

pub fn detect_delimiter(first_line: &str) -> u8 {
    DELIMITER_CANDIDATES
        .iter()
        .copied()
        .find(|d| first_line.as_bytes().contains(d))
        .unwrap_or(b';')
}
