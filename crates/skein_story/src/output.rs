// ── Entries ─────────────────────────────────────────────────────

/// One element of the output stream.
///
/// `BeginTag`/`EndTag`/`BeginString` are control markers: they delimit
/// regions that later collapse into a tag or an evaluated string and
/// never appear in assembled text.
#[derive(Debug, Clone, PartialEq)]
pub enum OutEntry {
    Text(String),
    Glue,
    /// A completed tag attached to the current line.
    Tag(String),
    BeginTag,
    EndTag,
    BeginString,
}

impl OutEntry {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            OutEntry::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_newline(&self) -> bool {
        matches!(self, OutEntry::Text(s) if s == "\n")
    }

    /// Spaces and tabs only (and the empty string).
    pub fn is_inline_whitespace(&self) -> bool {
        matches!(self, OutEntry::Text(s) if s.chars().all(|c| c == ' ' || c == '\t'))
    }

    pub fn is_nonwhitespace_text(&self) -> bool {
        match self {
            OutEntry::Text(_) => !self.is_newline() && !self.is_inline_whitespace(),
            _ => false,
        }
    }

    fn is_marker(&self) -> bool {
        matches!(
            self,
            OutEntry::BeginTag | OutEntry::EndTag | OutEntry::BeginString
        )
    }
}

// ── OutputStream ────────────────────────────────────────────────

/// The ordered sequence of text, glue, tags and control markers that
/// assembles into the current line.
///
/// The engine drives the trimming rules (they depend on the callstack);
/// this type owns the stream storage, the scanning primitives, and the
/// cached line assembly.
#[derive(Debug, Clone, Default)]
pub struct OutputStream {
    entries: Vec<OutEntry>,
    assembled: Option<Assembled>,
}

#[derive(Debug, Clone)]
struct Assembled {
    text: String,
    tags: Vec<String>,
}

impl OutputStream {
    pub fn entries(&self) -> &[OutEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.dirty();
    }

    fn dirty(&mut self) {
        self.assembled = None;
    }

    /// Append without any trimming logic.
    pub fn push_raw(&mut self, entry: OutEntry) {
        self.entries.push(entry);
        self.dirty();
    }

    pub fn remove_at(&mut self, index: usize) {
        self.entries.remove(index);
        self.dirty();
    }

    /// Drop the last `n` entries (used when collapsing a string-eval or
    /// tag region).
    pub fn pop_n(&mut self, n: usize) {
        let keep = self.entries.len().saturating_sub(n);
        self.entries.truncate(keep);
        self.dirty();
    }

    // ── Queries ─────────────────────────────────────────────────

    /// Scanning back past trailing whitespace: does the line currently
    /// end in a newline?
    pub fn ends_in_newline(&self) -> bool {
        for entry in self.entries.iter().rev() {
            if entry.is_marker() {
                break;
            }
            match entry {
                OutEntry::Text(_) => {
                    if entry.is_newline() {
                        return true;
                    } else if entry.is_nonwhitespace_text() {
                        break;
                    }
                }
                _ => {}
            }
        }
        false
    }

    pub fn contains_content(&self) -> bool {
        self.entries.iter().any(|e| matches!(e, OutEntry::Text(_)))
    }

    /// A `BeginString` marker anywhere in the stream means an evaluated
    /// string is still being collected.
    pub fn in_string_evaluation(&self) -> bool {
        self.entries
            .iter()
            .rev()
            .any(|e| matches!(e, OutEntry::BeginString))
    }

    /// Index of the most recent glue, stopping the search at a
    /// `BeginString` marker. Returns `(glue_index, begin_string_index)`.
    pub fn trim_indices(&self) -> (Option<usize>, Option<usize>) {
        for (i, entry) in self.entries.iter().enumerate().rev() {
            match entry {
                OutEntry::Glue => return (Some(i), None),
                OutEntry::BeginString => return (None, Some(i)),
                _ => {}
            }
        }
        (None, None)
    }

    // ── Trimming ────────────────────────────────────────────────

    /// Resolve glue leftward: remove the trailing run of newlines and
    /// whitespace back to the last real content.
    pub fn trim_newlines(&mut self) {
        let mut remove_whitespace_from: Option<usize> = None;
        for (i, entry) in self.entries.iter().enumerate().rev() {
            if entry.is_marker() || entry.is_nonwhitespace_text() {
                break;
            }
            if entry.is_newline() {
                remove_whitespace_from = Some(i);
            }
        }
        if let Some(from) = remove_whitespace_from {
            let mut i = from;
            while i < self.entries.len() {
                if matches!(self.entries[i], OutEntry::Text(_)) {
                    self.entries.remove(i);
                } else {
                    i += 1;
                }
            }
            self.dirty();
        }
    }

    /// Remove every glue marker (they have served their purpose once
    /// non-whitespace content followed).
    pub fn remove_existing_glue(&mut self) {
        self.entries.retain(|e| !matches!(e, OutEntry::Glue));
        self.dirty();
    }

    // ── Assembly ────────────────────────────────────────────────

    pub fn text(&mut self) -> &str {
        self.assemble();
        &self.assembled.as_ref().unwrap().text
    }

    pub fn tags(&mut self) -> &[String] {
        self.assemble();
        &self.assembled.as_ref().unwrap().tags
    }

    fn assemble(&mut self) {
        if self.assembled.is_some() {
            return;
        }
        let mut text = String::new();
        let mut tags: Vec<String> = Vec::new();
        let mut tag_buffer = String::new();
        let mut in_tag = false;
        for entry in &self.entries {
            match entry {
                OutEntry::Text(s) => {
                    if in_tag {
                        tag_buffer.push_str(s);
                    } else {
                        text.push_str(s);
                    }
                }
                OutEntry::BeginTag => {
                    if in_tag && !tag_buffer.is_empty() {
                        tags.push(clean_whitespace(&tag_buffer));
                        tag_buffer.clear();
                    }
                    in_tag = true;
                }
                OutEntry::EndTag => {
                    if !tag_buffer.is_empty() {
                        tags.push(clean_whitespace(&tag_buffer));
                        tag_buffer.clear();
                    }
                    in_tag = false;
                }
                OutEntry::Tag(t) => {
                    if !t.is_empty() {
                        tags.push(t.clone());
                    }
                }
                OutEntry::Glue | OutEntry::BeginString => {}
            }
        }
        if !tag_buffer.is_empty() {
            tags.push(clean_whitespace(&tag_buffer));
        }
        self.assembled = Some(Assembled {
            text: clean_whitespace(&text),
            tags,
        });
    }
}

/// Collapse inline whitespace runs to single spaces and strip leading
/// and trailing whitespace from each line.
pub fn clean_whitespace(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut pending_space = false;
    let mut at_line_start = true;
    for c in input.chars() {
        match c {
            ' ' | '\t' => {
                if !at_line_start {
                    pending_space = true;
                }
            }
            '\n' => {
                out.push('\n');
                pending_space = false;
                at_line_start = true;
            }
            c => {
                if pending_space {
                    out.push(' ');
                    pending_space = false;
                }
                out.push(c);
                at_line_start = false;
            }
        }
    }
    out
}

/// Split a text chunk into leading whitespace/newline, inner content,
/// and trailing whitespace/newline fragments, so that the push rules can
/// treat each boundary newline individually. Returns `None` when the
/// chunk has no head or tail newline to split on.
pub fn split_head_tail_whitespace(s: &str) -> Option<Vec<String>> {
    let bytes = s.as_bytes();

    let mut head_first_newline = None;
    let mut head_last_newline = None;
    for (i, &b) in bytes.iter().enumerate() {
        match b {
            b'\n' => {
                if head_first_newline.is_none() {
                    head_first_newline = Some(i);
                }
                head_last_newline = Some(i);
            }
            b' ' | b'\t' => continue,
            _ => break,
        }
    }

    let mut tail_last_newline = None;
    let mut tail_first_newline = None;
    for (i, &b) in bytes.iter().enumerate().rev() {
        match b {
            b'\n' => {
                if tail_last_newline.is_none() {
                    tail_last_newline = Some(i);
                }
                tail_first_newline = Some(i);
            }
            b' ' | b'\t' => continue,
            _ => break,
        }
    }

    if head_first_newline.is_none() && tail_last_newline.is_none() {
        return None;
    }

    let mut fragments = Vec::new();
    let mut inner_start = 0;
    let mut inner_end = s.len();

    if let Some(first) = head_first_newline {
        if first > 0 {
            fragments.push(s[..first].to_string());
        }
        fragments.push("\n".to_string());
        inner_start = head_last_newline.unwrap() + 1;
    }
    if let Some(first) = tail_first_newline {
        inner_end = first;
    }
    if inner_end > inner_start {
        fragments.push(s[inner_start..inner_end].to_string());
    }
    if let (Some(tail_last), Some(tail_first)) = (tail_last_newline, tail_first_newline) {
        if head_last_newline.is_none() || tail_first > head_last_newline.unwrap() {
            fragments.push("\n".to_string());
            if tail_last < s.len() - 1 {
                fragments.push(s[tail_last + 1..].to_string());
            }
        }
    }

    Some(fragments)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &str) -> OutEntry {
        OutEntry::Text(s.to_string())
    }

    #[test]
    fn entry_classification() {
        assert!(text("\n").is_newline());
        assert!(text("  \t").is_inline_whitespace());
        assert!(text("").is_inline_whitespace());
        assert!(text("word").is_nonwhitespace_text());
        assert!(!OutEntry::Glue.is_nonwhitespace_text());
    }

    #[test]
    fn ends_in_newline_scans_past_whitespace() {
        let mut out = OutputStream::default();
        out.push_raw(text("hello"));
        out.push_raw(text("\n"));
        assert!(out.ends_in_newline());
        out.push_raw(text("  "));
        assert!(out.ends_in_newline());
        out.push_raw(text("more"));
        assert!(!out.ends_in_newline());
    }

    #[test]
    fn trim_newlines_removes_trailing_run() {
        let mut out = OutputStream::default();
        out.push_raw(text("hello"));
        out.push_raw(text("\n"));
        out.push_raw(text("  "));
        out.trim_newlines();
        assert_eq!(out.entries(), &[text("hello")]);
    }

    #[test]
    fn trim_newlines_stops_at_content() {
        let mut out = OutputStream::default();
        out.push_raw(text("hello"));
        out.trim_newlines();
        assert_eq!(out.entries(), &[text("hello")]);
    }

    #[test]
    fn assembly_cleans_whitespace() {
        let mut out = OutputStream::default();
        out.push_raw(text("  hello"));
        out.push_raw(text("   "));
        out.push_raw(text("world  "));
        out.push_raw(text("\n"));
        assert_eq!(out.text(), "hello world\n");
    }

    #[test]
    fn assembly_extracts_tag_regions() {
        let mut out = OutputStream::default();
        out.push_raw(text("line"));
        out.push_raw(OutEntry::BeginTag);
        out.push_raw(text(" mood "));
        out.push_raw(OutEntry::EndTag);
        out.push_raw(text("\n"));
        assert_eq!(out.text(), "line\n");
        assert_eq!(out.tags(), &["mood".to_string()]);
    }

    #[test]
    fn legacy_tags_collected() {
        let mut out = OutputStream::default();
        out.push_raw(OutEntry::Tag("author: someone".into()));
        out.push_raw(text("line\n"));
        assert_eq!(out.tags(), &["author: someone".to_string()]);
    }

    #[test]
    fn clean_whitespace_rules() {
        assert_eq!(clean_whitespace("  a  b  "), "a b");
        assert_eq!(clean_whitespace("a\n  b"), "a\nb");
        assert_eq!(clean_whitespace("a \t b\n"), "a b\n");
    }

    #[test]
    fn split_plain_text_is_none() {
        assert_eq!(split_head_tail_whitespace("hello"), None);
    }

    #[test]
    fn split_trailing_newline() {
        assert_eq!(
            split_head_tail_whitespace("hello\n"),
            Some(vec!["hello".to_string(), "\n".to_string()])
        );
    }

    #[test]
    fn split_leading_and_trailing() {
        assert_eq!(
            split_head_tail_whitespace("\nhello\n"),
            Some(vec![
                "\n".to_string(),
                "hello".to_string(),
                "\n".to_string()
            ])
        );
    }

    #[test]
    fn split_whitespace_before_head_newline() {
        assert_eq!(
            split_head_tail_whitespace("  \nhello"),
            Some(vec![
                "  ".to_string(),
                "\n".to_string(),
                "hello".to_string()
            ])
        );
    }

    #[test]
    fn string_evaluation_detection() {
        let mut out = OutputStream::default();
        out.push_raw(OutEntry::BeginString);
        assert!(out.in_string_evaluation());
        out.pop_n(1);
        assert!(!out.in_string_evaluation());
    }
}
