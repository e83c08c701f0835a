use std::collections::BTreeMap;

/// Minimal cookie jar for the gateway session. The gateway rotates its
/// session cookies (`JSESSIONID`, CSRF twins) on arbitrary responses, so the
/// jar merges `set-cookie` values from every response; a later value for the
/// same name replaces the earlier one.
///
/// Attributes (`Path`, `Expires`, `HttpOnly`, ...) are dropped: the jar only
/// ever talks to one origin and never persists.
#[derive(Debug, Clone, Default)]
pub struct CookieJar {
    cookies: BTreeMap<String, String>,
}

impl CookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge one `set-cookie` header value into the jar.
    pub fn merge_set_cookie(&mut self, set_cookie: &str) {
        let pair = set_cookie.split(';').next().unwrap_or("");
        if let Some((name, value)) = pair.split_once('=') {
            let name = name.trim();
            if !name.is_empty() {
                self.cookies.insert(name.to_string(), value.trim().to_string());
            }
        }
    }

    pub fn merge_all<I, S>(&mut self, set_cookies: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for value in set_cookies {
            self.merge_set_cookie(value.as_ref());
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }

    /// Serialize as a `Cookie` request header value.
    pub fn header_value(&self) -> String {
        self.cookies
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merges_and_serializes_cookies() {
        let mut jar = CookieJar::new();
        jar.merge_set_cookie("JSESSIONID=abc123; Path=/; HttpOnly");
        jar.merge_set_cookie("XSRF-TOKEN=tok; Secure");

        assert_eq!(jar.get("JSESSIONID"), Some("abc123"));
        assert_eq!(jar.header_value(), "JSESSIONID=abc123; XSRF-TOKEN=tok");
    }

    #[test]
    fn later_values_replace_earlier_ones() {
        let mut jar = CookieJar::new();
        jar.merge_all(["JSESSIONID=old", "JSESSIONID=new; Path=/"]);
        assert_eq!(jar.get("JSESSIONID"), Some("new"));
    }

    #[test]
    fn ignores_malformed_values() {
        let mut jar = CookieJar::new();
        jar.merge_set_cookie("no-equals-sign");
        jar.merge_set_cookie("");
        assert!(jar.is_empty());
        assert_eq!(jar.header_value(), "");
    }
}
