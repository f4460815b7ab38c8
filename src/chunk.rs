//! Structure-aware markdown chunker.
//!
//! Splits a document into bounded, overlapping chunks while preserving the
//! header lineage active at each point. Splitting is greedy over paragraph
//! units (blank-line separated runs of body text); a paragraph that alone
//! exceeds the limit is split at the nearest whitespace at or before it.
//!
//! Chunk text is always an exact byte slice of the source document, so
//! `start_offset`/`end_offset` are authoritative and concatenating the
//! non-overlapping spans of consecutive chunks reproduces the body text.
//! Overlap carries the trailing `overlap_chars` characters of a closed chunk
//! into the next one, and resets to zero across header boundaries so one
//! section's tail never bleeds into an unrelated section.
//!
//! Chunk ids are SHA-256 over `(document_id, text)`, making re-indexing of
//! unchanged text idempotent.

use sha2::{Digest, Sha256};

use crate::config::ChunkingConfig;
use crate::error::{Error, Result};
use crate::models::{Chunk, Document, HeaderSegment};

#[derive(Debug, Clone)]
pub struct ChunkOptions {
    /// Maximum chunk size in characters.
    pub max_chars: usize,
    /// Characters of trailing text carried into the next chunk of a section.
    pub overlap_chars: usize,
    /// Header levels (1..=6) tracked in lineage; deeper headers flow as body.
    pub header_levels: u8,
}

impl Default for ChunkOptions {
    fn default() -> Self {
        Self {
            max_chars: 1000,
            overlap_chars: 200,
            header_levels: 4,
        }
    }
}

impl From<&ChunkingConfig> for ChunkOptions {
    fn from(c: &ChunkingConfig) -> Self {
        Self {
            max_chars: c.max_chars,
            overlap_chars: c.overlap_chars,
            header_levels: c.header_levels,
        }
    }
}

/// Deterministic content-derived chunk id, scoped by document.
pub fn chunk_id(document_id: &str, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(document_id.as_bytes());
    hasher.update([0u8]);
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Split a document into an ordered chunk sequence.
///
/// An empty document yields an empty sequence. A document with no headers
/// degrades to plain sliding-window splitting with empty header paths.
/// The trailing partial buffer is always emitted.
pub fn chunk_document(doc: &Document, opts: &ChunkOptions) -> Result<Vec<Chunk>> {
    if opts.max_chars == 0 {
        return Err(Error::Configuration("max_chars must be > 0".to_string()));
    }
    if opts.overlap_chars >= opts.max_chars {
        return Err(Error::Configuration(format!(
            "overlap_chars ({}) must be < max_chars ({})",
            opts.overlap_chars, opts.max_chars
        )));
    }

    let mut state = Splitter::new(doc, opts);

    // Walk lines, folding contiguous body lines into paragraph units and
    // treating blank lines and headers as unit boundaries.
    let mut pos = 0usize;
    let mut para: Option<(usize, usize)> = None;

    for line in doc.text.split_inclusive('\n') {
        let line_start = pos;
        pos += line.len();
        let content = line.trim_end_matches(['\n', '\r']);

        if content.trim().is_empty() {
            if let Some((s, e)) = para.take() {
                state.push_para(s, e);
            }
            continue;
        }

        if let Some((level, title)) = parse_header(content, opts.header_levels) {
            if let Some((s, e)) = para.take() {
                state.push_para(s, e);
            }
            state.on_header(level, title);
            continue;
        }

        let content_end = line_start + content.len();
        match para {
            Some((s, _)) => para = Some((s, content_end)),
            None => para = Some((line_start, content_end)),
        }
    }

    if let Some((s, e)) = para.take() {
        state.push_para(s, e);
    }
    state.flush();

    Ok(state.chunks)
}

/// Parse an ATX header line of a tracked level. Deeper headers (and lines
/// that merely start with `#` without a following space) are body text.
fn parse_header(line: &str, header_levels: u8) -> Option<(u8, String)> {
    let hashes = line.bytes().take_while(|&b| b == b'#').count();
    if hashes == 0 || hashes > 6 {
        return None;
    }
    let rest = &line[hashes..];
    if !rest.starts_with(' ') && !rest.is_empty() {
        return None;
    }
    let level = hashes as u8;
    if level > header_levels {
        return None;
    }
    // Strip optional closing hashes, `## Title ##`.
    let title = rest.trim().trim_end_matches('#').trim().to_string();
    Some((level, title))
}

/// An in-progress chunk: a byte range over the source document plus the
/// header path snapshotted when the range was opened.
struct Open {
    start: usize,
    end: usize,
    chars: usize,
    header_path: Vec<HeaderSegment>,
    /// Whether any unit was consumed (a seed-only range is never emitted).
    filled: bool,
    oversized: bool,
}

struct Splitter<'a> {
    doc: &'a Document,
    opts: &'a ChunkOptions,
    headers: Vec<HeaderSegment>,
    chunks: Vec<Chunk>,
    cur: Option<Open>,
    /// Where the next chunk starts when seeded by overlap from the last one.
    pending_seed: Option<usize>,
}

impl<'a> Splitter<'a> {
    fn new(doc: &'a Document, opts: &'a ChunkOptions) -> Self {
        Self {
            doc,
            opts,
            headers: Vec::new(),
            chunks: Vec::new(),
            cur: None,
            pending_seed: None,
        }
    }

    fn on_header(&mut self, level: u8, title: String) {
        self.flush();
        // Overlap never crosses a header boundary.
        self.pending_seed = None;
        self.headers.retain(|h| h.level < level);
        self.headers.push(HeaderSegment { level, title });
    }

    /// Greedily fold a paragraph unit into the open chunk, closing and
    /// force-splitting as needed.
    fn push_para(&mut self, p_start: usize, p_end: usize) {
        let mut p = p_start;

        loop {
            if self.cur.is_none() {
                let start = self.pending_seed.take().unwrap_or(p);
                let chars = count_chars(&self.doc.text[start..p]);
                self.cur = Some(Open {
                    start,
                    end: p,
                    chars,
                    header_path: self.headers.clone(),
                    filled: false,
                    oversized: false,
                });
            }

            let open = self.cur.as_mut().expect("open chunk");
            let tail_chars = count_chars(&self.doc.text[open.end..p_end]);

            if open.chars + tail_chars <= self.opts.max_chars {
                open.end = p_end;
                open.chars += tail_chars;
                open.filled = true;
                return;
            }

            if open.filled {
                // Close at the last unit boundary and retry this paragraph
                // in a fresh, overlap-seeded chunk.
                self.close_with_overlap();
                continue;
            }

            // The paragraph alone (plus any seed) exceeds the limit: split at
            // the nearest whitespace at or before it. An unbroken token longer
            // than the limit is emitted oversized rather than crashing.
            let budget = self.opts.max_chars.saturating_sub(open.chars);
            let mut hard = advance_chars(&self.doc.text, p, budget).min(p_end);
            if hard <= p {
                hard = advance_chars(&self.doc.text, p, 1).min(p_end);
            }

            let end = match last_whitespace_end(&self.doc.text, p, hard) {
                Some(w) => w,
                // No whitespace at or before the limit: run to the end of the
                // unbroken token instead of crashing.
                None => next_whitespace(&self.doc.text, hard, p_end).unwrap_or(p_end),
            };

            let open = self.cur.as_mut().expect("open chunk");
            open.chars += count_chars(&self.doc.text[open.end..end]);
            open.end = end;
            open.filled = true;
            open.oversized = open.chars > self.opts.max_chars;
            if open.oversized {
                eprintln!(
                    "Warning: unbroken token in {} exceeds max_chars ({}); emitting oversized chunk",
                    self.doc.id, self.opts.max_chars
                );
            }
            self.close_with_overlap();

            p = end;
            if p >= p_end {
                return;
            }
        }
    }

    /// Emit the open chunk (if it consumed anything) and seed the next one
    /// with its trailing `overlap_chars` characters.
    fn close_with_overlap(&mut self) {
        let Some(open) = self.cur.take() else { return };
        if !open.filled {
            return;
        }
        let seed = overlap_start(&self.doc.text, open.start, open.end, self.opts.overlap_chars);
        self.emit(open);
        self.pending_seed = seed;
    }

    /// Emit the trailing partial buffer without seeding overlap.
    fn flush(&mut self) {
        if let Some(open) = self.cur.take() {
            if open.filled {
                self.emit(open);
            }
        }
    }

    fn emit(&mut self, open: Open) {
        let text = self.doc.text[open.start..open.end].to_string();
        let chunk = Chunk {
            id: chunk_id(&self.doc.id, &text),
            document_id: self.doc.id.clone(),
            sequence_index: self.chunks.len() as i64,
            text,
            header_path: open.header_path,
            start_offset: open.start as i64,
            end_offset: open.end as i64,
            oversized: open.oversized,
        };
        self.chunks.push(chunk);
    }
}

fn count_chars(s: &str) -> usize {
    s.chars().count()
}

/// Byte index after advancing `n` characters from `from`.
fn advance_chars(text: &str, from: usize, n: usize) -> usize {
    text[from..]
        .char_indices()
        .nth(n)
        .map(|(i, _)| from + i)
        .unwrap_or(text.len())
}

/// Byte index just past the last whitespace character in `[from, to)`,
/// if one exists. The whitespace stays with the left-hand chunk.
fn last_whitespace_end(text: &str, from: usize, to: usize) -> Option<usize> {
    text[from..to]
        .char_indices()
        .filter(|(_, c)| c.is_whitespace())
        .next_back()
        .map(|(i, c)| from + i + c.len_utf8())
}

/// Byte index of the first whitespace character in `[from, to)`.
fn next_whitespace(text: &str, from: usize, to: usize) -> Option<usize> {
    text[from..to]
        .char_indices()
        .find(|(_, c)| c.is_whitespace())
        .map(|(i, _)| from + i)
}

/// Start offset for the overlap seed: the byte position of the suffix
/// holding the last `overlap` characters of `[start, end)`.
fn overlap_start(text: &str, start: usize, end: usize, overlap: usize) -> Option<usize> {
    if overlap == 0 {
        return None;
    }
    let s = &text[start..end];
    let total = s.chars().count();
    if total == 0 {
        return None;
    }
    let skip = total.saturating_sub(overlap);
    let byte = s
        .char_indices()
        .nth(skip)
        .map(|(i, _)| i)
        .unwrap_or(s.len());
    Some(start + byte)
}
