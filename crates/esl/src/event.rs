use crate::header::HeaderMap;

/// The body of an [`Event`], when one is present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Body {
    /// Raw log text (`log/data` frames).
    Text(String),
    /// Opaque bytes (`api/response` frames).
    Bytes(Vec<u8>),
}

/// A parsed ESL frame: a header block plus, optionally, a body.
///
/// An event whose body was itself a header block (an event embedded in an
/// event — see §4.2) has no [`Body`]: its inner headers were merged into
/// `headers` and `body` is `None`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Event {
    pub headers: HeaderMap,
    pub body: Option<Body>,
}

impl Event {
    pub fn new(headers: HeaderMap) -> Self {
        Self { headers, body: None }
    }

    pub fn with_body(headers: HeaderMap, body: Body) -> Self {
        Self { headers, body: Some(body) }
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key)
    }

    pub fn event_name(&self) -> Option<&str> {
        self.header("Event-Name")
    }

    pub fn event_subclass(&self) -> Option<&str> {
        self.header("Event-Subclass")
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers.content_type()
    }

    pub fn reply_text(&self) -> Option<&str> {
        self.header("Reply-Text")
    }

    pub fn variable(&self, name: &str) -> Option<&str> {
        self.header(&format!("variable_{name}"))
    }

    /// The event's body as text, if it has one. `api/response` bodies are
    /// lossily decoded as UTF-8 for callers that just want the text (e.g.
    /// `answer`'s return value); callers needing the raw bytes should match
    /// on `body` directly.
    pub fn body_text(&self) -> Option<std::borrow::Cow<'_, str>> {
        match &self.body {
            Some(Body::Text(s)) => Some(std::borrow::Cow::Borrowed(s)),
            Some(Body::Bytes(b)) => Some(String::from_utf8_lossy(b)),
            None => None,
        }
    }

    pub fn body_bytes(&self) -> Option<&[u8]> {
        match &self.body {
            Some(Body::Bytes(b)) => Some(b),
            Some(Body::Text(s)) => Some(s.as_bytes()),
            None => None,
        }
    }
}
