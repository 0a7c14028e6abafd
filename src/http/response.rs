use crate::ws::WebSocketConnection;

/// Response headers: ordered, case-insensitive, multi-valued.
#[derive(Debug, Clone, Default)]
pub struct Headers {
    entries: Vec<(String, Vec<String>)>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a value under `name`, preserving arrival order.
    pub fn append(&mut self, name: impl AsRef<str>, value: impl Into<String>) {
        let name = name.as_ref();
        if let Some((_, values)) = self
            .entries
            .iter_mut()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
        {
            values.push(value.into());
        } else {
            self.entries.push((name.to_owned(), vec![value.into()]));
        }
    }

    /// All values recorded under `name`.
    pub fn get_all(&self, name: &str) -> &[String] {
        self.entries
            .iter()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
            .map(|(_, values)| values.as_slice())
            .unwrap_or(&[])
    }

    /// The first value recorded under `name`.
    pub fn first(&self, name: &str) -> Option<&str> {
        self.get_all(name).first().map(String::as_str)
    }

    /// Whether any value under `name` contains `needle`, compared
    /// case-insensitively against the comma-joined value set.
    pub fn contains_value(&self, name: &str, needle: &str) -> bool {
        let joined = self.get_all(name).join(",").to_ascii_lowercase();
        joined.contains(&needle.to_ascii_lowercase())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.entries
            .iter()
            .map(|(name, values)| (name.as_str(), values.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Terminal outcome of a successful transaction.
///
/// `body` and `web_socket` are mutually exclusive: an upgraded response
/// carries the live connection and no body was ever read from the stream.
pub struct HttpResponse {
    pub(crate) response_code: u16,
    pub(crate) response_message: String,
    pub(crate) headers: Headers,
    pub(crate) body: Option<Vec<u8>>,
    pub(crate) web_socket: Option<WebSocketConnection>,
}

impl HttpResponse {
    pub fn response_code(&self) -> u16 {
        self.response_code
    }

    pub fn response_message(&self) -> &str {
        &self.response_message
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Raw body bytes; absent when the connection was upgraded.
    pub fn body(&self) -> Option<&[u8]> {
        self.body.as_deref()
    }

    /// The live websocket connection, present iff the upgrade succeeded.
    pub fn web_socket(&self) -> Option<&WebSocketConnection> {
        self.web_socket.as_ref()
    }

    /// Transfer ownership of the upgraded connection to the caller.
    pub fn take_web_socket(&mut self) -> Option<WebSocketConnection> {
        self.web_socket.take()
    }

    pub fn was_upgraded(&self) -> bool {
        self.web_socket.is_some()
    }
}

impl std::fmt::Debug for HttpResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpResponse")
            .field("response_code", &self.response_code)
            .field("response_message", &self.response_message)
            .field("headers", &self.headers.len())
            .field("body_len", &self.body.as_ref().map(Vec::len))
            .field("upgraded", &self.web_socket.is_some())
            .finish()
    }
}
