//! Inline reasoning markers.
//!
//! Reasoning segments travel inside the plain text stream, delimited by HTML
//! comments so renderers that do not understand them show nothing:
//!
//! ```text
//! <!--THINKING_START:{session}:{start_epoch_ms}-->
//! ...reasoning text...
//! <!--THINKING_END:{session}:{duration_secs}:{cumulative_secs}-->
//! ```
//!
//! Session ids start at 1 per stream and never nest. A start marker without
//! an end marker means the session is still running (or the stream was
//! interrupted); it is not an error.

use std::ops::Range;

use once_cell::sync::Lazy;
use regex::Regex;

static START_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<!--THINKING_START:(\d+):(\d+)-->").expect("valid start marker regex"));
static END_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"<!--THINKING_END:(\d+):(\d+):(\d+)-->").expect("valid end marker regex")
});

/// Renders an opening marker.
pub fn start_marker(session: u32, start_epoch_ms: i64) -> String {
    format!("<!--THINKING_START:{session}:{start_epoch_ms}-->")
}

/// Renders a closing marker.
pub fn end_marker(session: u32, duration_secs: u64, cumulative_secs: u64) -> String {
    format!("<!--THINKING_END:{session}:{duration_secs}:{cumulative_secs}-->")
}

#[derive(Debug, Clone, Copy)]
struct OpenSession {
    id: u32,
    started_at_ms: i64,
}

/// Per-stream marker state: session counter, the open session and the
/// cumulative reasoning time.
#[derive(Debug, Default)]
pub struct ReasoningTracker {
    last_session: u32,
    open: Option<OpenSession>,
    cumulative_secs: u64,
}

impl ReasoningTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a session is currently open.
    pub fn is_open(&self) -> bool {
        self.open.is_some()
    }

    /// Opens the next session and returns its start marker.
    ///
    /// Callers must close the previous session first; an open session is
    /// closed implicitly and its end marker prepended.
    pub fn open(&mut self, now_ms: i64) -> String {
        let mut out = self.close(now_ms).unwrap_or_default();
        self.last_session += 1;
        self.open = Some(OpenSession {
            id: self.last_session,
            started_at_ms: now_ms,
        });
        out.push_str(&start_marker(self.last_session, now_ms));
        out
    }

    /// Closes the open session, if any, and returns its end marker.
    pub fn close(&mut self, now_ms: i64) -> Option<String> {
        let session = self.open.take()?;
        let elapsed_ms = u64::try_from(now_ms.saturating_sub(session.started_at_ms)).unwrap_or(0);
        let duration_secs = (elapsed_ms + 500) / 1000;
        self.cumulative_secs += duration_secs;
        Some(end_marker(session.id, duration_secs, self.cumulative_secs))
    }
}

/// One decoded reasoning session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReasoningSession {
    pub id: u32,
    pub started_at_ms: i64,
    /// `None` while the session has no end marker.
    pub duration_secs: Option<u64>,
    pub cumulative_secs: Option<u64>,
    pub content: String,
}

impl ReasoningSession {
    pub fn is_complete(&self) -> bool {
        self.duration_secs.is_some()
    }
}

/// Stream text split into reasoning sessions and display text.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ReasoningTrace {
    pub sessions: Vec<ReasoningSession>,
    /// Text with every session span (markers and reasoning content) removed.
    pub display_text: String,
}

impl ReasoningTrace {
    /// Whether the last session is still open.
    pub fn in_progress(&self) -> bool {
        self.sessions.last().is_some_and(|s| !s.is_complete())
    }
}

/// Decodes reasoning sessions from stream text.
pub fn decode(text: &str) -> ReasoningTrace {
    let starts: Vec<_> = START_RE.captures_iter(text).collect();
    let ends: Vec<_> = END_RE.captures_iter(text).collect();

    let mut sessions = Vec::with_capacity(starts.len());
    let mut hidden: Vec<Range<usize>> = Vec::new();
    let mut consumed_ends = vec![false; ends.len()];

    for (index, start) in starts.iter().enumerate() {
        let (Some(whole), Some(id), Some(ms)) = (start.get(0), start.get(1), start.get(2)) else {
            continue;
        };
        let id: u32 = id.as_str().parse().unwrap_or_default();
        let started_at_ms: i64 = ms.as_str().parse().unwrap_or_default();
        let next_start = starts
            .get(index + 1)
            .and_then(|c| c.get(0))
            .map_or(text.len(), |m| m.start());

        let matching_end = ends.iter().enumerate().find(|(i, end)| {
            !consumed_ends[*i]
                && end.get(0).is_some_and(|m| m.start() >= whole.end() && m.start() < next_start)
                && end.get(1).is_some_and(|m| m.as_str().parse::<u32>().ok() == Some(id))
        });

        match matching_end.and_then(|(i, end)| Some((i, end.get(0)?, end.get(2)?, end.get(3)?))) {
            Some((i, end_whole, duration, cumulative)) => {
                consumed_ends[i] = true;
                sessions.push(ReasoningSession {
                    id,
                    started_at_ms,
                    duration_secs: duration.as_str().parse().ok(),
                    cumulative_secs: cumulative.as_str().parse().ok(),
                    content: text[whole.end()..end_whole.start()].to_owned(),
                });
                hidden.push(whole.start()..end_whole.end());
            }
            None => {
                sessions.push(ReasoningSession {
                    id,
                    started_at_ms,
                    duration_secs: None,
                    cumulative_secs: None,
                    content: text[whole.end()..next_start].to_owned(),
                });
                hidden.push(whole.start()..next_start);
            }
        }
    }

    for (i, end) in ends.iter().enumerate() {
        if !consumed_ends[i]
            && let Some(m) = end.get(0)
        {
            hidden.push(m.range());
        }
    }
    hidden.sort_by_key(|r| r.start);

    let mut display_text = String::with_capacity(text.len());
    let mut cursor = 0;
    for range in hidden {
        if range.start > cursor {
            display_text.push_str(&text[cursor..range.start]);
        }
        cursor = cursor.max(range.end);
    }
    if cursor < text.len() {
        display_text.push_str(&text[cursor..]);
    }

    ReasoningTrace {
        sessions,
        display_text,
    }
}

/// Removes all reasoning spans, keeping only answer text.
pub fn strip(text: &str) -> String {
    decode(text).display_text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_one_complete_session() {
        let trace =
            decode("<!--THINKING_START:1:1000-->reasoning text<!--THINKING_END:1:3:3-->answer");
        assert_eq!(trace.sessions.len(), 1);
        let session = &trace.sessions[0];
        assert_eq!(session.id, 1);
        assert_eq!(session.started_at_ms, 1000);
        assert_eq!(session.content, "reasoning text");
        assert_eq!(session.duration_secs, Some(3));
        assert_eq!(session.cumulative_secs, Some(3));
        assert_eq!(trace.display_text, "answer");
        assert!(!trace.in_progress());
    }

    #[test]
    fn dangling_start_is_an_open_session() {
        let trace = decode("Intro <!--THINKING_START:1:5-->still thinking");
        assert_eq!(trace.sessions.len(), 1);
        assert_eq!(trace.sessions[0].content, "still thinking");
        assert!(!trace.sessions[0].is_complete());
        assert!(trace.in_progress());
        assert_eq!(trace.display_text, "Intro ");
    }

    #[test]
    fn sequential_sessions_keep_answer_text_between_them() {
        let text = format!(
            "{}a{}one {}b{}two",
            start_marker(1, 0),
            end_marker(1, 1, 1),
            start_marker(2, 10),
            end_marker(2, 2, 3)
        );
        let trace = decode(&text);
        let contents: Vec<_> = trace.sessions.iter().map(|s| s.content.as_str()).collect();
        assert_eq!(contents, vec!["a", "b"]);
        assert_eq!(trace.sessions[1].cumulative_secs, Some(3));
        assert_eq!(trace.display_text, "one two");
    }

    #[test]
    fn plain_text_passes_through() {
        let trace = decode("no markers here.");
        assert!(trace.sessions.is_empty());
        assert_eq!(trace.display_text, "no markers here.");
    }

    #[test]
    fn tracker_numbers_sessions_and_accumulates_duration() {
        let mut tracker = ReasoningTracker::new();
        assert_eq!(tracker.open(1_000), "<!--THINKING_START:1:1000-->");
        assert!(tracker.is_open());
        assert_eq!(tracker.close(3_400).as_deref(), Some("<!--THINKING_END:1:2:2-->"));
        assert!(tracker.close(4_000).is_none());
        assert_eq!(tracker.open(5_000), "<!--THINKING_START:2:5000-->");
        assert_eq!(tracker.close(8_000).as_deref(), Some("<!--THINKING_END:2:3:5-->"));
    }

    #[test]
    fn tracker_closes_open_session_before_opening_next() {
        let mut tracker = ReasoningTracker::new();
        tracker.open(0);
        let markers = tracker.open(1_000);
        assert_eq!(markers, "<!--THINKING_END:1:1:1--><!--THINKING_START:2:1000-->");
    }
}
