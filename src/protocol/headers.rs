//! Ordered HTTP header collection with case-insensitive lookups.

use std::fmt;

use crate::error::{Error, Result};

/// Reject values that would split the HTTP head.
///
/// # Errors
///
/// `Error::InvalidHeaderValue` if the value contains CR or LF.
pub fn validate_header_value(name: &str, value: &str) -> Result<()> {
    if value.contains(['\r', '\n']) {
        return Err(Error::InvalidHeaderValue {
            header: name.to_string(),
            reason: "contains CR or LF characters".to_string(),
        });
    }
    Ok(())
}

fn validate_header_name(name: &str) -> Result<()> {
    let is_token = |b: u8| b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b);
    if name.is_empty() || !name.bytes().all(is_token) {
        return Err(Error::InvalidHeaderValue {
            header: name.to_string(),
            reason: "not a valid header name".to_string(),
        });
    }
    Ok(())
}

/// HTTP headers in arrival order.
///
/// Names keep the spelling they were given; lookups ignore ASCII case.
/// Repeated names are kept as separate entries, as they appeared.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct HeaderMap {
    entries: Vec<(String, String)>,
}

impl HeaderMap {
    /// Empty map.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Add an entry after any existing ones with the same name.
    ///
    /// # Errors
    ///
    /// `Error::InvalidHeaderValue` if the name is not an HTTP token or the
    /// value contains CR or LF.
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) -> Result<()> {
        let name = name.into();
        let value = value.into();
        validate_header_name(&name)?;
        validate_header_value(&name, &value)?;
        self.entries.push((name, value));
        Ok(())
    }

    /// Replace every entry named `name` with a single one, placed where the
    /// first of them was (or at the end).
    ///
    /// # Errors
    ///
    /// As [`append`](Self::append).
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) -> Result<()> {
        let name = name.into();
        let value = value.into();
        validate_header_name(&name)?;
        validate_header_value(&name, &value)?;

        match self.position(&name) {
            Some(pos) => {
                let mut index = 0;
                self.entries.retain(|(n, _)| {
                    let keep = index <= pos || !n.eq_ignore_ascii_case(&name);
                    index += 1;
                    keep
                });
                self.entries[pos] = (name, value);
            }
            None => self.entries.push((name, value)),
        }
        Ok(())
    }

    /// First value for `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.position(name).map(|pos| self.entries[pos].1.as_str())
    }

    /// Every value for `name`, in order.
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.entries
            .iter()
            .filter(move |(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Number of entries named `name`.
    #[must_use]
    pub fn count(&self, name: &str) -> usize {
        self.get_all(name).count()
    }

    /// Any entry named `name`.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    /// Whether any value of `name`, read as a comma-separated list,
    /// contains `token` (ignoring case).
    #[must_use]
    pub fn has_token(&self, name: &str, token: &str) -> bool {
        self.get_all(name)
            .flat_map(|v| v.split(','))
            .any(|t| t.trim().eq_ignore_ascii_case(token))
    }

    /// Entries in order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// No entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Parse `Name: value` lines up to the first empty line.
    ///
    /// Values are trimmed. Obsolete line folding is refused.
    ///
    /// # Errors
    ///
    /// `Error::Handshake` for a line without a colon, a continuation line,
    /// or a name that is not an HTTP token.
    pub fn parse_lines<'a>(lines: impl Iterator<Item = &'a str>) -> Result<Self> {
        let mut headers = Self::new();
        for line in lines {
            if line.is_empty() {
                break;
            }
            if line.starts_with([' ', '\t']) {
                return Err(Error::Handshake("folded header line".into()));
            }
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| Error::Handshake(format!("malformed header line: {line:?}")))?;
            headers
                .append(name, value.trim())
                .map_err(|e| Error::Handshake(e.to_string()))?;
        }
        Ok(headers)
    }

    /// Append `Name: value\r\n` for every entry.
    pub fn write_to(&self, buf: &mut Vec<u8>) {
        for (name, value) in &self.entries {
            buf.extend_from_slice(name.as_bytes());
            buf.extend_from_slice(b": ");
            buf.extend_from_slice(value.as_bytes());
            buf.extend_from_slice(b"\r\n");
        }
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|(n, _)| n.eq_ignore_ascii_case(name))
    }
}

impl fmt::Debug for HeaderMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}
