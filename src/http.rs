//! HTTP `Link` header parsing, as used for paginated API responses.
//!
//! ```
//! use eventcast::http::{LinkHeader, LinkRel};
//!
//! let header = LinkHeader::parse(
//!     r#"<https://api.example.com/books?page=2>; rel="next", <https://api.example.com/books?page=9>; rel="last""#,
//! )
//! .unwrap();
//! assert_eq!(header.get(LinkRel::Next).unwrap().url, "https://api.example.com/books?page=2");
//! assert!(header.get(LinkRel::Prev).is_none());
//! ```

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkHeaderError {
    #[error("link header part has no <url>: {0}")]
    MissingUrl(String),
    #[error("link header part has a missing or unknown rel: {0}")]
    MissingRel(String),
}

/// The pagination relations this parser understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkRel {
    First,
    Next,
    Prev,
    Last,
}

impl LinkRel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkRel::First => "first",
            LinkRel::Next => "next",
            LinkRel::Prev => "prev",
            LinkRel::Last => "last",
        }
    }
}

impl FromStr for LinkRel {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "first" => Ok(LinkRel::First),
            "next" => Ok(LinkRel::Next),
            "prev" => Ok(LinkRel::Prev),
            "last" => Ok(LinkRel::Last),
            _ => Err(()),
        }
    }
}

impl fmt::Display for LinkRel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One `<url>; rel="..."` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkField {
    pub url: String,
    pub rel: LinkRel,
    pub title: Option<String>,
}

impl LinkField {
    pub fn new(url: impl Into<String>, rel: LinkRel) -> Self {
        Self {
            url: url.into(),
            rel,
            title: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn parse(part: &str) -> Result<Self, LinkHeaderError> {
        let part = part.trim();
        let malformed_url = || LinkHeaderError::MissingUrl(part.to_string());

        let rest = part.strip_prefix('<').ok_or_else(malformed_url)?;
        let close = rest.find('>').filter(|&i| i > 0).ok_or_else(malformed_url)?;
        let url = &rest[..close];

        let mut rel = None;
        let mut title = None;
        for param in rest[close + 1..].split(';').map(str::trim) {
            let Some((key, value)) = param.split_once('=') else {
                continue;
            };
            let value = value.trim().trim_matches('"');
            match key.trim().to_ascii_lowercase().as_str() {
                "rel" => rel = value.parse::<LinkRel>().ok(),
                "title" if !value.is_empty() => title = Some(value.to_string()),
                _ => {}
            }
        }

        Ok(Self {
            url: url.to_string(),
            rel: rel.ok_or_else(|| LinkHeaderError::MissingRel(part.to_string()))?,
            title,
        })
    }
}

impl fmt::Display for LinkField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}>; rel=\"{}\"", self.url, self.rel)?;
        if let Some(title) = &self.title {
            write!(f, "; title=\"{}\"", title)?;
        }
        Ok(())
    }
}

/// A full `Link` header value.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LinkHeader {
    pub links: Vec<LinkField>,
}

impl LinkHeader {
    /// Parse a comma-separated list of link fields. Any malformed field
    /// fails the whole header.
    pub fn parse(value: &str) -> Result<Self, LinkHeaderError> {
        let links = value
            .split(',')
            .map(LinkField::parse)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { links })
    }

    /// First link with the given relation.
    pub fn get(&self, rel: LinkRel) -> Option<&LinkField> {
        self.links.iter().find(|link| link.rel == rel)
    }
}

impl fmt::Display for LinkHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, link) in self.links.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", link)?;
        }
        Ok(())
    }
}
