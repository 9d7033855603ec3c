use indexmap::IndexMap;
use percent_encoding::percent_decode_str;

/// An ordered, case-preserved header block.
///
/// Order is preserved because diagnostics and a handful of switch commands
/// are sensitive to it; case is preserved because FreeSWITCH header names
/// are not consistently cased (`variable_uuid` vs `Event-Name`) and this
/// crate never needs to compare them case-insensitively.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderMap(IndexMap<String, String>);

impl HeaderMap {
    pub fn new() -> Self {
        Self(IndexMap::new())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn content_type(&self) -> Option<&str> {
        self.get("Content-Type")
    }

    pub fn content_length(&self) -> Option<usize> {
        self.get("Content-Length").and_then(|v| v.trim().parse().ok())
    }

    /// Appends `line` to the current value of `key`, joined by `"\n"`.
    /// Used for multiline header continuation (a line with no `": "`
    /// separator belongs to the previously seen header).
    fn append_continuation(&mut self, key: &str, line: &str) {
        if let Some(existing) = self.0.get_mut(key) {
            existing.push('\n');
            existing.push_str(line);
        }
    }

    /// Merges `other`'s entries into `self`, overwriting on key collision.
    ///
    /// Used when an event's body is itself a header block (an event
    /// embedded in an event) — the inner headers are the actual payload and
    /// take precedence over the outer envelope.
    pub fn merge_from(&mut self, other: HeaderMap) {
        for (k, v) in other.0 {
            self.0.insert(k, v);
        }
    }
}

/// Parses a raw header block (the accumulated lines up to, but excluding,
/// the terminating blank line) into a [`HeaderMap`].
///
/// The whole block is percent-decoded as a single string *before* splitting
/// into lines, so a `%0A` inside a header value survives as a literal
/// newline rather than being mistaken for a line break — this is mandatory
/// per the wire format and must only happen once.
pub fn parse_header_block(raw: &str) -> HeaderMap {
    let decoded = percent_decode_str(raw).decode_utf8_lossy();
    let mut headers = HeaderMap::new();
    let mut last_key: Option<String> = None;

    for line in decoded.split('\n') {
        match line.find(": ") {
            Some(idx) => {
                let key = &line[..idx];
                let value = &line[idx + 2..];
                headers.insert(key, value);
                last_key = Some(key.to_string());
            }
            None => {
                if line.is_empty() {
                    continue;
                }
                if let Some(key) = &last_key {
                    headers.append_continuation(key, line);
                }
            }
        }
    }

    headers
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_headers() {
        let raw = "Content-Type: command/reply\nReply-Text: +OK accepted";
        let headers = parse_header_block(raw);
        assert_eq!(headers.get("Content-Type"), Some("command/reply"));
        assert_eq!(headers.get("Reply-Text"), Some("+OK accepted"));
    }

    #[test]
    fn joins_multiline_continuation() {
        let raw = "Event-Name: CUSTOM\nVariable_foo: line one\nline two";
        let headers = parse_header_block(raw);
        assert_eq!(headers.get("Variable_foo"), Some("line one\nline two"));
    }

    #[test]
    fn percent_decoding_happens_once_and_preserves_embedded_newlines() {
        // A value containing a literal %0A that the peer additionally
        // percent-encoded to survive the header block's own newline
        // splitting should decode to a single embedded newline, not be
        // double-decoded or split into two headers.
        let raw = "Event-Name: CUSTOM\nvariable_multi: first%250Asecond";
        let headers = parse_header_block(raw);
        // %25 -> '%', so the value is "first%0Asecond" after one decode pass.
        assert_eq!(headers.get("variable_multi"), Some("first%0Asecond"));
    }

    #[test]
    fn case_is_preserved() {
        let raw = "variable_uuid: abc-123\nEvent-Name: CHANNEL_ANSWER";
        let headers = parse_header_block(raw);
        assert!(headers.contains_key("variable_uuid"));
        assert!(headers.contains_key("Event-Name"));
        assert!(!headers.contains_key("Variable_UUID"));
    }
}
