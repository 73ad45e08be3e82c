//! Entity tags and HTTP dates, the currency of conditional requests.
use std::fmt;

use chrono::{DateTime, NaiveDateTime, Utc};

/// An entity tag per RFC 9110: an opaque quoted string, optionally weak
/// (`W/"..."`).
///
/// Strong comparison requires both tags to be strong; weak comparison
/// ignores weakness. Both compare the opaque payload byte-for-byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityTag {
    pub weak: bool,
    pub opaque: String,
}

impl EntityTag {
    pub fn strong(opaque: &str) -> Self {
        Self {
            weak: false,
            opaque: opaque.to_string(),
        }
    }

    pub fn weak(opaque: &str) -> Self {
        Self {
            weak: true,
            opaque: opaque.to_string(),
        }
    }

    /// Parse a single entity tag in wire form (`"v1"` or `W/"v1"`).
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        let (weak, rest) = match s.strip_prefix("W/") {
            Some(rest) => (true, rest),
            None => (false, s),
        };
        let opaque = rest.strip_prefix('"')?.strip_suffix('"')?;
        Some(Self {
            weak,
            opaque: opaque.to_string(),
        })
    }

    /// Interpret the string an `etag` callback returned. Wire-form values
    /// are parsed as-is; a bare token is taken as a strong tag.
    pub fn from_callback(s: &str) -> Self {
        Self::parse(s).unwrap_or_else(|| Self::strong(s))
    }

    /// Strong comparison: weak tags never match.
    pub fn strong_eq(&self, other: &Self) -> bool {
        !self.weak && !other.weak && self.opaque == other.opaque
    }

    /// Weak comparison: weakness is ignored.
    pub fn weak_eq(&self, other: &Self) -> bool {
        self.opaque == other.opaque
    }
}

impl fmt::Display for EntityTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.weak {
            write!(f, "W/\"{}\"", self.opaque)
        } else {
            write!(f, "\"{}\"", self.opaque)
        }
    }
}

/// The value of an `If-Match` / `If-None-Match` header: `*` or a tag list.
#[derive(Debug, Clone, PartialEq)]
pub enum TagSet {
    Any,
    Tags(Vec<EntityTag>),
}

impl TagSet {
    /// Parse a comma-separated entity tag list. Unparseable entries are
    /// dropped; an empty result is reported as `None` so callers treat the
    /// header as absent.
    pub fn parse(value: &str) -> Option<Self> {
        if value.trim() == "*" {
            return Some(TagSet::Any);
        }
        let tags: Vec<EntityTag> = value
            .split(',')
            .filter_map(|t| EntityTag::parse(t.trim()))
            .collect();
        if tags.is_empty() {
            None
        } else {
            Some(TagSet::Tags(tags))
        }
    }

    pub fn matches_strong(&self, current: &EntityTag) -> bool {
        match self {
            TagSet::Any => true,
            TagSet::Tags(tags) => tags.iter().any(|t| t.strong_eq(current)),
        }
    }

    pub fn matches_weak(&self, current: &EntityTag) -> bool {
        match self {
            TagSet::Any => true,
            TagSet::Tags(tags) => tags.iter().any(|t| t.weak_eq(current)),
        }
    }
}

const IMF_FIXDATE: &str = "%a, %d %b %Y %H:%M:%S GMT";
const RFC_850: &str = "%A, %d-%b-%y %H:%M:%S GMT";
const ASCTIME: &str = "%a %b %e %H:%M:%S %Y";

/// Parse an HTTP date. IMF-fixdate is preferred; the obsolete RFC 850 and
/// asctime forms are accepted per RFC 9110.
pub fn parse_http_date(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    for format in [IMF_FIXDATE, RFC_850, ASCTIME] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Some(naive.and_utc());
        }
    }
    None
}

/// Format a timestamp as IMF-fixdate, truncated to whole seconds.
pub fn format_http_date(t: DateTime<Utc>) -> String {
    t.format(IMF_FIXDATE).to_string()
}
