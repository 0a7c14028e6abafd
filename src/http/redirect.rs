//! Redirect-following policy.
//!
//! A pure decision function: given where the transaction stands and what the
//! server answered, either name the next url to chase or stop and let the
//! current response stand. Stopping is never an error; the caller returns
//! the response as-is.

use url::Url;

/// What to do with a just-received response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedirectDecision {
    /// Re-issue the request against this url.
    Follow(String),
    /// Keep the current response.
    Stop,
}

/// Redirect rules for one transaction.
#[derive(Debug, Clone, Copy)]
pub struct RedirectPolicy {
    follows_redirects: bool,
    max_redirect_count: u32,
}

impl RedirectPolicy {
    pub fn new(follows_redirects: bool, max_redirect_count: u32) -> Self {
        Self {
            follows_redirects,
            max_redirect_count,
        }
    }

    /// Decide whether to chase a redirect.
    ///
    /// Follows only when all of these hold: following is enabled, the
    /// redirect budget is not exhausted, the code is 3xx, a `Location` value
    /// exists, both urls are in the http family, and the hop does not
    /// downgrade https to a non-https scheme. Same-scheme hops and http to
    /// https upgrades pass; anything else stops the chase.
    pub fn evaluate(
        &self,
        current_url: &str,
        response_code: u16,
        location: Option<&str>,
        redirect_count: u32,
    ) -> RedirectDecision {
        if !self.follows_redirects || redirect_count >= self.max_redirect_count {
            return RedirectDecision::Stop;
        }
        if !(300..400).contains(&response_code) {
            return RedirectDecision::Stop;
        }
        let Some(location) = location else {
            return RedirectDecision::Stop;
        };

        let Some(current_scheme) = scheme_of(current_url) else {
            return RedirectDecision::Stop;
        };
        let Some(next_scheme) = scheme_of(location) else {
            return RedirectDecision::Stop;
        };

        let both_http_family = is_http_family(&current_scheme) && is_http_family(&next_scheme);
        let downgrades = current_scheme == "https" && next_scheme != "https";

        if both_http_family && !downgrades {
            RedirectDecision::Follow(location.to_owned())
        } else {
            RedirectDecision::Stop
        }
    }
}

fn scheme_of(raw: &str) -> Option<String> {
    Url::parse(raw).ok().map(|url| url.scheme().to_owned())
}

fn is_http_family(scheme: &str) -> bool {
    matches!(scheme, "http" | "https")
}

#[cfg(test)]
mod tests {
    use super::*;

    const HTTP_URL: &str = "http://origin.test/a";
    const HTTPS_URL: &str = "https://origin.test/a";
    const NEXT: &str = "http://elsewhere.test/b";

    fn following(max: u32) -> RedirectPolicy {
        RedirectPolicy::new(true, max)
    }

    #[test]
    fn disabled_policy_never_follows() {
        let policy = RedirectPolicy::new(false, 10);
        assert_eq!(
            policy.evaluate(HTTP_URL, 302, Some(NEXT), 0),
            RedirectDecision::Stop
        );
    }

    #[test]
    fn follows_within_budget_only() {
        let policy = following(3);
        assert_eq!(
            policy.evaluate(HTTP_URL, 302, Some(NEXT), 2),
            RedirectDecision::Follow(NEXT.to_owned())
        );
        assert_eq!(
            policy.evaluate(HTTP_URL, 302, Some(NEXT), 3),
            RedirectDecision::Stop
        );
    }

    #[test]
    fn non_redirect_codes_stop() {
        let policy = following(10);
        for code in [200, 204, 299, 400, 404, 500] {
            assert_eq!(
                policy.evaluate(HTTP_URL, code, Some(NEXT), 0),
                RedirectDecision::Stop
            );
        }
    }

    #[test]
    fn missing_location_stops() {
        let policy = following(10);
        assert_eq!(policy.evaluate(HTTP_URL, 301, None, 0), RedirectDecision::Stop);
    }

    #[test]
    fn https_downgrade_is_never_followed() {
        let policy = following(10);
        assert_eq!(
            policy.evaluate(HTTPS_URL, 302, Some("http://origin.test/a"), 0),
            RedirectDecision::Stop
        );
    }

    #[test]
    fn upgrade_and_same_scheme_hops_are_followed() {
        let policy = following(10);
        assert_eq!(
            policy.evaluate(HTTP_URL, 302, Some("https://origin.test/a"), 0),
            RedirectDecision::Follow("https://origin.test/a".to_owned())
        );
        assert_eq!(
            policy.evaluate(HTTPS_URL, 302, Some("https://elsewhere.test/"), 0),
            RedirectDecision::Follow("https://elsewhere.test/".to_owned())
        );
    }

    #[test]
    fn foreign_protocols_and_relative_locations_stop() {
        let policy = following(10);
        assert_eq!(
            policy.evaluate(HTTP_URL, 302, Some("ftp://elsewhere.test/"), 0),
            RedirectDecision::Stop
        );
        assert_eq!(
            policy.evaluate(HTTP_URL, 302, Some("/relative/path"), 0),
            RedirectDecision::Stop
        );
    }
}
