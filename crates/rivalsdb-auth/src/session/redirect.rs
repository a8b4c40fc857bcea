//! Redirect-callback parameters on the visible location
//!
//! A redirect sign-in lands the user back on the application with `code` and
//! `state` in the query string. They are consumed once and then stripped with a
//! history *replace*, so a reload cannot replay them.

use url::Url;

use crate::error::{AuthError, AuthResult};

/// The application's visible location (a browser URL bar, or its stand-in)
pub trait Location: Send {
    /// Current URL
    fn current(&self) -> &Url;

    /// Replace the current history entry with `url` (never push)
    fn replace(&mut self, url: Url);
}

/// In-memory [`Location`] for hosts without a real address bar
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryLocation {
    url: Url,
    replacements: usize,
}

impl MemoryLocation {
    /// Start at `url`
    pub fn new(url: Url) -> Self {
        Self {
            url,
            replacements: 0,
        }
    }

    /// Start at a URL given as a string
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Configuration`] when `url` does not parse.
    pub fn parse(url: &str) -> AuthResult<Self> {
        Url::parse(url)
            .map(Self::new)
            .map_err(|e| AuthError::configuration("location", format!("invalid URL: {e}")))
    }

    /// How many times the entry was replaced
    pub fn replacements(&self) -> usize {
        self.replacements
    }
}

impl Location for MemoryLocation {
    fn current(&self) -> &Url {
        &self.url
    }

    fn replace(&mut self, url: Url) {
        self.url = url;
        self.replacements += 1;
    }
}

/// `code` and `state` from a redirect back to the application
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectParams {
    /// Authorization code
    pub code: String,
    /// Echoed state
    pub state: String,
}

impl RedirectParams {
    /// Both parameters, or `None` if either is missing
    pub fn from_url(url: &Url) -> Option<Self> {
        let mut code = None;
        let mut state = None;
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "code" => code = Some(value.into_owned()),
                "state" => state = Some(value.into_owned()),
                _ => {}
            }
        }
        Some(Self {
            code: code?,
            state: state?,
        })
    }
}

/// `url` without its `code` and `state` query parameters
///
/// Other parameters and the fragment are kept. An emptied query is removed.
pub fn strip_redirect_params(url: &Url) -> Url {
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| key != "code" && key != "state")
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    let mut stripped = url.clone();
    if kept.is_empty() {
        stripped.set_query(None);
    } else {
        stripped.query_pairs_mut().clear().extend_pairs(kept);
    }
    stripped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params_require_both() {
        let both = Url::parse("https://rivalsdb.app/?code=abc&state=xyz").unwrap();
        assert_eq!(
            RedirectParams::from_url(&both),
            Some(RedirectParams {
                code: "abc".into(),
                state: "xyz".into()
            })
        );

        let code_only = Url::parse("https://rivalsdb.app/?code=abc").unwrap();
        assert_eq!(RedirectParams::from_url(&code_only), None);

        let none = Url::parse("https://rivalsdb.app/decks").unwrap();
        assert_eq!(RedirectParams::from_url(&none), None);
    }

    #[test]
    fn test_strip_removes_only_redirect_params() {
        let url = Url::parse("https://rivalsdb.app/decks?code=abc&deck=42&state=xyz#top").unwrap();
        assert_eq!(
            strip_redirect_params(&url).as_str(),
            "https://rivalsdb.app/decks?deck=42#top"
        );

        let url = Url::parse("https://rivalsdb.app/?code=abc&state=xyz").unwrap();
        assert_eq!(strip_redirect_params(&url).as_str(), "https://rivalsdb.app/");
    }

    #[test]
    fn test_memory_location_counts_replacements() {
        let mut location = MemoryLocation::parse("https://rivalsdb.app/?code=a&state=b").unwrap();
        assert_eq!(location.replacements(), 0);
        location.replace(Url::parse("https://rivalsdb.app/").unwrap());
        assert_eq!(location.replacements(), 1);
        assert_eq!(location.current().query(), None);
    }
}
