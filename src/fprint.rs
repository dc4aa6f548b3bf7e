//! The fingerprint record: a fixed 348-byte rough vector, a 66-byte dominant
//! vector, and a variable-length chroma print, plus the canonical text form
//! and the length-prefixed binary form used on index pages.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Width of the rough feature vector in bytes (1392 two-bit lanes).
pub const R_BYTES: usize = 348;
/// Width of the dominant feature vector in bytes (512 bits + a 16-bit tail).
pub const DOM_BYTES: usize = 66;
/// A cprint length at or above this is treated as page corruption.
pub const CP_LEN_CORRUPT: usize = 100_000;
/// Widest accepted textual codeword, sign included.
pub const MAX_CODEWORD_DIGITS: usize = 12;

/// Fixed header bytes of the binary form: cprint_len, songlen, bit_rate,
/// num_errors as little-endian u32.
const HEADER_BYTES: usize = 16;

/// Shortest possible text form: "(0,0,0," + both hex blocks + ",0)".
const MIN_TEXT_LEN: usize = 11 + 2 * R_BYTES + 2 * DOM_BYTES;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("input too short: {got} bytes, need at least {min}")]
    TooShort { got: usize, min: usize },
    #[error("missing {0:?} delimiter")]
    MissingDelimiter(char),
    #[error("malformed numeric header")]
    BadHeader,
    #[error("non-hex character in fixed block")]
    BadHex,
    #[error("codeword wider than {MAX_CODEWORD_DIGITS} characters")]
    CodewordTooWide,
    #[error("codeword does not fit a 32-bit signed integer")]
    CodewordOutOfRange,
    #[error("unexpected character {0:?} in cprint list")]
    BadCodewordChar(char),
    #[error("cprint must hold at least one codeword")]
    EmptyCprint,
    #[error("wrong {field} width: expected {expected}, got {got}")]
    WrongWidth {
        field: &'static str,
        expected: usize,
        got: usize,
    },
    #[error("truncated binary record")]
    Truncated,
    #[error("length prefix disagrees with payload size")]
    LengthPrefix,
    #[error("cprint length {0} exceeds the corruption ceiling")]
    CorruptCprintLen(u32),
}

// ---------------------------------------------------------------------------
// Fingerprint
// ---------------------------------------------------------------------------

/// One audio item reduced to its binary fingerprint.
///
/// Width invariants (`r`, `dom`) and the non-empty cprint invariant are
/// enforced at construction; every similarity kernel relies on them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprint {
    songlen: u32,
    bit_rate: u32,
    num_errors: u32,
    r: Vec<u8>,
    dom: Vec<u8>,
    cprint: Vec<u32>,
}

impl Fingerprint {
    /// Build a record, validating the fixed widths and the cprint sentinel
    /// rule (`len ≥ 1`; callers represent "no chroma data" as `[0]`).
    pub fn new(
        songlen: u32,
        bit_rate: u32,
        num_errors: u32,
        r: Vec<u8>,
        dom: Vec<u8>,
        cprint: Vec<u32>,
    ) -> Result<Self, ParseError> {
        if r.len() != R_BYTES {
            return Err(ParseError::WrongWidth {
                field: "r",
                expected: R_BYTES,
                got: r.len(),
            });
        }
        if dom.len() != DOM_BYTES {
            return Err(ParseError::WrongWidth {
                field: "dom",
                expected: DOM_BYTES,
                got: dom.len(),
            });
        }
        if cprint.is_empty() {
            return Err(ParseError::EmptyCprint);
        }
        Ok(Self {
            songlen,
            bit_rate,
            num_errors,
            r,
            dom,
            cprint,
        })
    }

    /// Seconds of audio the fingerprint was derived from.
    pub fn songlen(&self) -> u32 {
        self.songlen
    }

    /// Source bit-rate in kbps.
    pub fn bit_rate(&self) -> u32 {
        self.bit_rate
    }

    /// Decode errors tolerated while the record was built.
    pub fn num_errors(&self) -> u32 {
        self.num_errors
    }

    pub fn r(&self) -> &[u8] {
        &self.r
    }

    pub fn dom(&self) -> &[u8] {
        &self.dom
    }

    pub fn cprint(&self) -> &[u32] {
        &self.cprint
    }

    pub fn cprint_len(&self) -> usize {
        self.cprint.len()
    }

    /// Replace the chroma print, keeping the non-empty invariant.
    pub(crate) fn with_cprint(&self, cprint: Vec<u32>) -> Self {
        debug_assert!(!cprint.is_empty());
        Self {
            cprint,
            r: self.r.clone(),
            dom: self.dom.clone(),
            ..*self
        }
    }

    /// Total order consistent with equality of the binary images, for the
    /// scalar `cmp` operator.
    pub fn compare(&self, other: &Self) -> Ordering {
        (self.cprint.len() as u32)
            .cmp(&(other.cprint.len() as u32))
            .then(self.songlen.cmp(&other.songlen))
            .then(self.bit_rate.cmp(&other.bit_rate))
            .then(self.num_errors.cmp(&other.num_errors))
            .then_with(|| self.r.cmp(&other.r))
            .then_with(|| self.dom.cmp(&other.dom))
            .then_with(|| self.cprint.cmp(&other.cprint))
    }

    // -- binary on-page form --

    /// Serialise to the length-prefixed page blob: a u32 payload length,
    /// then cprint_len, songlen, bit_rate, num_errors, `r`, `dom` and the
    /// codewords, all little-endian.
    pub fn to_bytes(&self) -> Vec<u8> {
        let payload = HEADER_BYTES + R_BYTES + DOM_BYTES + 4 * self.cprint.len();
        let mut out = Vec::with_capacity(4 + payload);
        out.extend_from_slice(&(payload as u32).to_le_bytes());
        out.extend_from_slice(&(self.cprint.len() as u32).to_le_bytes());
        out.extend_from_slice(&self.songlen.to_le_bytes());
        out.extend_from_slice(&self.bit_rate.to_le_bytes());
        out.extend_from_slice(&self.num_errors.to_le_bytes());
        out.extend_from_slice(&self.r);
        out.extend_from_slice(&self.dom);
        for w in &self.cprint {
            out.extend_from_slice(&w.to_le_bytes());
        }
        out
    }

    /// Parse a page blob written by [`to_bytes`](Self::to_bytes). Rejects
    /// truncated buffers, a disagreeing length prefix, and cprint lengths at
    /// or above [`CP_LEN_CORRUPT`].
    pub fn from_bytes(buf: &[u8]) -> Result<Self, ParseError> {
        if buf.len() < 4 + HEADER_BYTES + R_BYTES + DOM_BYTES + 4 {
            return Err(ParseError::Truncated);
        }
        let prefix = read_u32_at(buf, 0) as usize;
        if prefix != buf.len() - 4 {
            return Err(ParseError::LengthPrefix);
        }
        let cprint_len = read_u32_at(buf, 4);
        if cprint_len == 0 {
            return Err(ParseError::EmptyCprint);
        }
        if cprint_len as usize >= CP_LEN_CORRUPT {
            return Err(ParseError::CorruptCprintLen(cprint_len));
        }
        let expected = HEADER_BYTES + R_BYTES + DOM_BYTES + 4 * cprint_len as usize;
        if prefix != expected {
            return Err(ParseError::LengthPrefix);
        }
        let songlen = read_u32_at(buf, 8);
        let bit_rate = read_u32_at(buf, 12);
        let num_errors = read_u32_at(buf, 16);
        let r_start = 4 + HEADER_BYTES;
        let dom_start = r_start + R_BYTES;
        let cp_start = dom_start + DOM_BYTES;
        let r = buf[r_start..dom_start].to_vec();
        let dom = buf[dom_start..cp_start].to_vec();
        let cprint = buf[cp_start..]
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        Fingerprint::new(songlen, bit_rate, num_errors, r, dom, cprint)
    }
}

fn read_u32_at(buf: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

// ---------------------------------------------------------------------------
// Text form
// ---------------------------------------------------------------------------

impl fmt::Display for Fingerprint {
    /// Canonical text form: `(songlen,bit_rate,num_errors,R…,D…,c0 c1 … cN)`
    /// with uppercase hex blocks and single-space-separated signed codewords.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{},{},", self.songlen, self.bit_rate, self.num_errors)?;
        f.write_str(&hex::encode_upper(&self.r))?;
        f.write_str(",")?;
        f.write_str(&hex::encode_upper(&self.dom))?;
        f.write_str(",")?;
        for (i, w) in self.cprint.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{}", *w as i32)?;
        }
        f.write_str(")")
    }
}

impl FromStr for Fingerprint {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, ParseError> {
        let b = s.as_bytes();
        if b.len() < MIN_TEXT_LEN {
            return Err(ParseError::TooShort {
                got: b.len(),
                min: MIN_TEXT_LEN,
            });
        }
        if b[0] != b'(' {
            return Err(ParseError::MissingDelimiter('('));
        }
        let mut pos = 1;
        let songlen = read_header_field(b, &mut pos)?;
        let bit_rate = read_header_field(b, &mut pos)?;
        let num_errors = read_header_field(b, &mut pos)?;
        let r = read_hex_block(b, &mut pos, R_BYTES)?;
        let dom = read_hex_block(b, &mut pos, DOM_BYTES)?;

        if b[b.len() - 1] != b')' {
            return Err(ParseError::MissingDelimiter(')'));
        }
        let mut cprint = Vec::new();
        for tok in b[pos..b.len() - 1].split(|&c| c == b' ') {
            if tok.is_empty() {
                continue;
            }
            if tok.len() > MAX_CODEWORD_DIGITS {
                return Err(ParseError::CodewordTooWide);
            }
            for (i, &c) in tok.iter().enumerate() {
                let signed = c == b'-' && i == 0 && tok.len() > 1;
                if !signed && !c.is_ascii_digit() {
                    return Err(ParseError::BadCodewordChar(c as char));
                }
            }
            let v: i64 = std::str::from_utf8(tok)
                .ok()
                .and_then(|t| t.parse().ok())
                .ok_or(ParseError::BadHeader)?;
            let v = i32::try_from(v).map_err(|_| ParseError::CodewordOutOfRange)?;
            cprint.push(v as u32);
        }
        if cprint.is_empty() {
            return Err(ParseError::EmptyCprint);
        }
        Fingerprint::new(songlen, bit_rate, num_errors, r, dom, cprint)
    }
}

/// Read a decimal header field and its trailing comma.
fn read_header_field(b: &[u8], pos: &mut usize) -> Result<u32, ParseError> {
    let start = *pos;
    let mut value: u64 = 0;
    while *pos < b.len() && b[*pos].is_ascii_digit() {
        value = value * 10 + (b[*pos] - b'0') as u64;
        if value > u32::MAX as u64 {
            return Err(ParseError::BadHeader);
        }
        *pos += 1;
    }
    if *pos == start {
        return Err(ParseError::BadHeader);
    }
    if *pos >= b.len() || b[*pos] != b',' {
        return Err(ParseError::MissingDelimiter(','));
    }
    *pos += 1;
    Ok(value as u32)
}

/// Read a fixed hex block of `n` bytes and its trailing comma.
fn read_hex_block(b: &[u8], pos: &mut usize, n: usize) -> Result<Vec<u8>, ParseError> {
    let end = *pos + 2 * n;
    if end > b.len() {
        return Err(ParseError::TooShort {
            got: b.len(),
            min: end,
        });
    }
    let block = hex::decode(&b[*pos..end]).map_err(|_| ParseError::BadHex)?;
    *pos = end;
    if *pos >= b.len() || b[*pos] != b',' {
        return Err(ParseError::MissingDelimiter(','));
    }
    *pos += 1;
    Ok(block)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
