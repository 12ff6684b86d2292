use owo_colors::{OwoColorize, Stream};
use similar::{ChangeTag, TextDiff};

use crate::history::DiffPair;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentKind {
    Equal,
    Removed,
    Added,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffSegment {
    pub kind: SegmentKind,
    pub text: String,
}

/// Word-level change counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DiffStats {
    pub removed: usize,
    pub added: usize,
    pub unchanged: usize,
}

/// Before/after view of one transformation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffReport {
    original: String,
    modified: String,
}

impl DiffReport {
    pub fn new(original: impl Into<String>, modified: impl Into<String>) -> Self {
        Self {
            original: original.into(),
            modified: modified.into(),
        }
    }

    /// `None` when the pair is not available.
    pub fn from_pair(pair: &DiffPair) -> Option<Self> {
        pair.available
            .then(|| Self::new(pair.original.clone(), pair.modified.clone()))
    }

    pub fn original(&self) -> &str {
        &self.original
    }

    pub fn modified(&self) -> &str {
        &self.modified
    }

    pub fn is_unchanged(&self) -> bool {
        self.original == self.modified
    }

    /// Adjacent changes of the same kind are merged into one segment.
    pub fn segments(&self) -> Vec<DiffSegment> {
        let diff = TextDiff::from_words(self.original.as_str(), self.modified.as_str());
        let mut segments: Vec<DiffSegment> = Vec::new();

        for change in diff.iter_all_changes() {
            let kind = match change.tag() {
                ChangeTag::Equal => SegmentKind::Equal,
                ChangeTag::Delete => SegmentKind::Removed,
                ChangeTag::Insert => SegmentKind::Added,
            };
            match segments.last_mut() {
                Some(last) if last.kind == kind => last.text.push_str(change.value()),
                _ => segments.push(DiffSegment {
                    kind,
                    text: change.value().to_string(),
                }),
            }
        }

        segments
    }

    pub fn stats(&self) -> DiffStats {
        let diff = TextDiff::from_words(self.original.as_str(), self.modified.as_str());
        let mut stats = DiffStats::default();
        for change in diff.iter_all_changes() {
            if change.value().trim().is_empty() {
                continue;
            }
            match change.tag() {
                ChangeTag::Equal => stats.unchanged += 1,
                ChangeTag::Delete => stats.removed += 1,
                ChangeTag::Insert => stats.added += 1,
            }
        }
        stats
    }

    /// Inline rendering with `[-removed-]` and `{+added+}` markers.
    pub fn render_marked(&self) -> String {
        render_inline(&self.segments(), None)
    }

    /// Inline rendering colored for stdout, falling back to markers when
    /// stdout does not support color.
    pub fn render_terminal(&self) -> String {
        render_inline(&self.segments(), Some(Stream::Stdout))
    }

    /// Line-oriented unified diff.
    pub fn unified(&self, context: usize) -> String {
        TextDiff::from_lines(self.original.as_str(), self.modified.as_str())
            .unified_diff()
            .context_radius(context)
            .header("original", "modified")
            .to_string()
    }
}

fn supports_color(stream: Stream) -> bool {
    "x".if_supports_color(stream, |t| t.red()).to_string() != "x"
}

/// Colors for `stream` when it supports them, markers otherwise.
fn render_inline(segments: &[DiffSegment], stream: Option<Stream>) -> String {
    let colored = stream.is_some_and(supports_color);
    let mut out = String::new();
    for segment in segments {
        let text = segment.text.as_str();
        match (segment.kind, colored) {
            (SegmentKind::Equal, _) => out.push_str(text),
            (SegmentKind::Removed, true) => out.push_str(&text.red().strikethrough().to_string()),
            (SegmentKind::Added, true) => out.push_str(&text.green().bold().to_string()),
            (SegmentKind::Removed, false) => {
                out.push_str("[-");
                out.push_str(text);
                out.push_str("-]");
            }
            (SegmentKind::Added, false) => {
                out.push_str("{+");
                out.push_str(text);
                out.push_str("+}");
            }
        }
    }
    out
}

/// Inline diff of two strings for log output on stderr; colored only when
/// `colored` is set and stderr supports it.
pub fn inline_diff(before: &str, after: &str, colored: bool) -> String {
    let stream = colored.then_some(Stream::Stderr);
    render_inline(&DiffReport::new(before, after).segments(), stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marks_replaced_word() {
        let report = DiffReport::new("hello Alice", "hello Bob");
        assert_eq!(report.render_marked(), "hello [-Alice-]{+Bob+}");
    }

    #[test]
    fn stats_ignore_whitespace_tokens() {
        let report = DiffReport::new("a b c", "a x c");
        assert_eq!(
            report.stats(),
            DiffStats {
                removed: 1,
                added: 1,
                unchanged: 2,
            }
        );
    }

    #[test]
    fn unavailable_pair_has_no_report() {
        assert!(DiffReport::from_pair(&DiffPair::default()).is_none());

        let pair = DiffPair {
            original: "a".into(),
            modified: "b".into(),
            available: true,
        };
        let report = DiffReport::from_pair(&pair).expect("available pair");
        assert_eq!(report.original(), "a");
        assert!(!report.is_unchanged());
    }

    #[test]
    fn unified_diff_has_headers() {
        let report = DiffReport::new("one\ntwo\n", "one\nthree\n");
        let unified = report.unified(1);
        assert!(unified.contains("--- original"));
        assert!(unified.contains("+++ modified"));
        assert!(unified.contains("-two"));
        assert!(unified.contains("+three"));
    }

    #[test]
    fn identical_text_has_only_equal_segments() {
        let report = DiffReport::new("same text", "same text");
        assert!(report.is_unchanged());
        assert!(report
            .segments()
            .iter()
            .all(|segment| segment.kind == SegmentKind::Equal));
    }
}
