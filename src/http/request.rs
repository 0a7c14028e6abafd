use crate::ws::WebSocketOptions;

/// HTTP request method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Head,
    Patch,
    Put,
    Delete,
    Options,
    Trace,
}

impl HttpMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Head => "HEAD",
            Self::Patch => "PATCH",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
            Self::Options => "OPTIONS",
            Self::Trace => "TRACE",
        }
    }

    /// Only these methods send a request body.
    pub fn sends_body(self) -> bool {
        matches!(self, Self::Post | Self::Put | Self::Patch)
    }
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One client request.
///
/// Method and url are fixed at execution time; the executing transaction
/// takes the request by value, so nothing can mutate them mid-flight.
pub struct HttpRequest {
    url: String,
    method: HttpMethod,
    cookies: Vec<String>,
    headers: Vec<(String, String)>,
    query_string: String,
    body: Vec<u8>,
    follows_redirects: bool,
    max_redirect_count: u32,
    validate_ssl_certificates: bool,
    allow_websocket_upgrade: bool,
    websocket_options: WebSocketOptions,
}

impl HttpRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: HttpMethod::Get,
            cookies: Vec::new(),
            headers: Vec::new(),
            query_string: String::new(),
            body: Vec::new(),
            follows_redirects: false,
            max_redirect_count: 10,
            validate_ssl_certificates: true,
            allow_websocket_upgrade: false,
            websocket_options: WebSocketOptions::default(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn method(&self) -> HttpMethod {
        self.method
    }

    pub fn set_method(&mut self, method: HttpMethod) {
        self.method = method;
    }

    /// Record a cookie for the `Cookie` header, stripping any attributes
    /// after the first `;` so only the name=value pair is forwarded.
    pub fn set_cookie(&mut self, cookie: impl AsRef<str>) {
        let cookie = cookie.as_ref();
        let pair = match cookie.find(';') {
            Some(index) => &cookie[..index],
            None => cookie,
        };
        self.cookies.push(pair.to_owned());
    }

    pub fn cookies(&self) -> &[String] {
        &self.cookies
    }

    /// Set a header. Lookup is case-insensitive and later writes replace
    /// earlier ones for the same name.
    pub fn set_header(&mut self, name: impl AsRef<str>, value: impl Into<String>) {
        let name = name.as_ref();
        if let Some(slot) = self
            .headers
            .iter_mut()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
        {
            slot.1 = value.into();
        } else {
            self.headers.push((name.to_owned(), value.into()));
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// All headers in insertion order.
    pub fn headers(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }

    pub fn set_query_string(&mut self, query_string: impl Into<String>) {
        self.query_string = query_string.into();
    }

    pub fn query_string(&self) -> &str {
        &self.query_string
    }

    pub fn set_body(&mut self, body: impl Into<Vec<u8>>) {
        self.body = body.into();
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn set_follows_redirects(&mut self, follows_redirects: bool) {
        self.follows_redirects = follows_redirects;
    }

    pub fn follows_redirects(&self) -> bool {
        self.follows_redirects
    }

    pub fn set_max_redirect_count(&mut self, max_redirect_count: u32) {
        self.max_redirect_count = max_redirect_count;
    }

    pub fn max_redirect_count(&self) -> u32 {
        self.max_redirect_count
    }

    pub fn set_validate_ssl_certificates(&mut self, validate: bool) {
        self.validate_ssl_certificates = validate;
    }

    pub fn validates_ssl_certificates(&self) -> bool {
        self.validate_ssl_certificates
    }

    pub fn set_allow_websocket_upgrade(&mut self, allow: bool) {
        self.allow_websocket_upgrade = allow;
    }

    pub fn allows_websocket_upgrade(&self) -> bool {
        self.allow_websocket_upgrade
    }

    /// Configure the websocket side of an upgradeable request.
    pub fn set_websocket_options(&mut self, options: WebSocketOptions) {
        self.websocket_options = options;
    }

    pub fn websocket_options(&self) -> &WebSocketOptions {
        &self.websocket_options
    }

    pub(crate) fn take_websocket_options(&mut self) -> WebSocketOptions {
        std::mem::take(&mut self.websocket_options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cookie_attributes_are_stripped() {
        let mut request = HttpRequest::new("http://example.test/");
        request.set_cookie("session=abc123; Path=/; HttpOnly");
        request.set_cookie("theme=dark");
        assert_eq!(request.cookies(), ["session=abc123", "theme=dark"]);
    }

    #[test]
    fn header_lookup_is_case_insensitive_and_last_write_wins() {
        let mut request = HttpRequest::new("http://example.test/");
        request.set_header("Content-Type", "text/plain");
        request.set_header("content-type", "application/json");
        assert_eq!(request.header("CONTENT-TYPE"), Some("application/json"));
        assert_eq!(request.headers().count(), 1);
    }

    #[test]
    fn only_mutating_methods_send_a_body() {
        assert!(HttpMethod::Post.sends_body());
        assert!(HttpMethod::Put.sends_body());
        assert!(HttpMethod::Patch.sends_body());
        assert!(!HttpMethod::Get.sends_body());
        assert!(!HttpMethod::Head.sends_body());
        assert!(!HttpMethod::Delete.sends_body());
    }
}
