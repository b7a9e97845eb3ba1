//! Parser for the bot's display-format reply transcript.
//!
//! The bot emits a human-readable log rather than a structured payload: a
//! stream of segment blocks introduced by a `--- 分段` boundary line, each
//! carrying typed field lines (message kind, subkind, first-token and end
//! latencies, content) plus, anywhere in the stream, a single chat-id line.
//! This module is the boundary adapter that decodes that legacy format into
//! typed [`Segment`] records.
//!
//! `parse_transcript` is pure and total: malformed sections are skipped, and
//! no input ever causes an error.

/// Line prefix that opens a new segment block.
const SEGMENT_BOUNDARY: &str = "--- 分段";
/// Field marker for the segment kind (e.g. `answer`, `verbose`, `unknown`).
const KIND_MARKER: &str = "消息类型:";
/// Field marker for the segment subkind (e.g. `文本回复`).
const SUBKIND_MARKER: &str = "消息子类型:";
/// Field marker for the first-token latency, suffixed with `秒`.
const START_MARKER: &str = "首token时间:";
/// Field marker for the completion latency, suffixed with `秒`.
const END_MARKER: &str = "结束时间:";
/// Field marker that opens (possibly multi-line) segment content.
const CONTENT_MARKER: &str = "内容:";
/// Sentinel on a content line meaning the segment carried no content.
const NO_CONTENT_SENTINEL: &str = "无内容";
/// Marker for the single chat-id line.
const CHAT_ID_MARKER: &str = "🆔 Chat ID:";
/// Sentinel chat-id value meaning no id was obtained.
const CHAT_ID_MISSING: &str = "未获取到";

/// Kind value assigned by the bot to segments it could not classify.
/// Segments with this kind (or an empty kind) are never persisted.
pub const UNKNOWN_KIND: &str = "unknown";

/// Marker used to join multi-line content into a single scalar field so the
/// value survives CSV round trips. Literal backslash-n, not a newline.
pub const ESCAPED_NEWLINE: &str = "\\n";

/// One structured turn extracted from a raw transcript.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Segment {
    /// Message kind reported by the bot.
    pub kind: String,
    /// Message subkind, empty when the bot reported none.
    pub subkind: String,
    /// Content with embedded newlines encoded as [`ESCAPED_NEWLINE`].
    pub content: String,
    /// First-token latency in seconds.
    pub start: f64,
    /// Completion latency in seconds.
    pub end: f64,
}

impl Segment {
    /// Whether this segment is worth persisting: a non-empty kind that is
    /// not the bot's `unknown` sentinel.
    pub fn is_meaningful(&self) -> bool {
        !self.kind.is_empty() && self.kind != UNKNOWN_KIND
    }
}

/// Result of parsing one raw transcript.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedTranscript {
    /// Segments in emission order, including empty/unknown ones; callers
    /// filter with [`Segment::is_meaningful`] before persisting.
    pub segments: Vec<Segment>,
    /// Chat id from the first id line, if one was obtained.
    pub chat_id: Option<String>,
}

/// Parse a raw transcript into segments plus an optional chat id.
///
/// Line-oriented scan keeping a single segment under construction and a
/// multi-line-content collection flag:
/// - a boundary line flushes the current segment and starts a new one;
/// - field-marker lines assign the matching field and stop collection;
///   a field marker before any boundary is ignored;
/// - a content line (without the no-content sentinel) starts collection;
///   subsequent non-blank, non-boundary lines are buffered in order;
/// - at end of input the in-progress segment is flushed.
pub fn parse_transcript(raw: &str) -> ParsedTranscript {
    let mut out = ParsedTranscript::default();
    if raw.is_empty() {
        return out;
    }

    out.chat_id = find_chat_id(raw);

    let mut current: Option<Segment> = None;
    let mut collecting = false;
    let mut content_lines: Vec<&str> = Vec::new();

    for line in raw.split('\n') {
        if line.starts_with(SEGMENT_BOUNDARY) {
            if let Some(segment) = current.take() {
                out.segments
                    .push(flush_segment(segment, &mut content_lines));
            }
            collecting = false;
            current = Some(Segment::default());
        } else if let Some(segment) = current.as_mut() {
            if let Some(value) = field_suffix(line, KIND_MARKER) {
                segment.kind = value.to_string();
                collecting = false;
            } else if let Some(value) = field_suffix(line, SUBKIND_MARKER) {
                segment.subkind = value.to_string();
                collecting = false;
            } else if let Some(value) = field_suffix(line, START_MARKER) {
                segment.start = parse_seconds(value).unwrap_or(0.0);
                collecting = false;
            } else if let Some(value) = field_suffix(line, END_MARKER) {
                segment.end = parse_seconds(value).unwrap_or(segment.start);
                collecting = false;
            } else if line.contains(CONTENT_MARKER) && !line.contains(NO_CONTENT_SENTINEL) {
                content_lines.clear();
                if let Some(first) = field_suffix(line, CONTENT_MARKER) {
                    if !first.is_empty() {
                        content_lines.push(first);
                    }
                }
                collecting = true;
            } else if collecting && !line.trim().is_empty() && !line.starts_with("---") {
                content_lines.push(line);
            }
        }
    }

    if let Some(segment) = current.take() {
        out.segments
            .push(flush_segment(segment, &mut content_lines));
    }

    out
}

/// First chat-id line wins; the sentinel value maps to `None`.
fn find_chat_id(raw: &str) -> Option<String> {
    let line = raw.split('\n').find(|line| line.contains(CHAT_ID_MARKER))?;
    let value = line.split(CHAT_ID_MARKER).nth(1)?.trim();
    if value.is_empty() || value == CHAT_ID_MISSING {
        None
    } else {
        Some(value.to_string())
    }
}

/// Suffix after a field marker, trimmed, or `None` when the marker is absent.
fn field_suffix<'a>(line: &'a str, marker: &str) -> Option<&'a str> {
    line.split_once(marker).map(|(_, suffix)| suffix.trim())
}

/// Latency values carry a trailing `秒` unit which is stripped before parse.
fn parse_seconds(value: &str) -> Option<f64> {
    value.split('秒').next()?.trim().parse::<f64>().ok()
}

fn flush_segment(mut segment: Segment, content_lines: &mut Vec<&str>) -> Segment {
    if !content_lines.is_empty() {
        segment.content = content_lines.join(ESCAPED_NEWLINE);
        content_lines.clear();
    }
    segment
}
