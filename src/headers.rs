//! Ordered request header collection.

use std::fmt;

/// Ordered, case-insensitive set of request headers.
///
/// Unlike `http::HeaderMap`, this keeps exactly one entry per name and a
/// replaced header stays where it was first inserted. The serialized form is
/// what ends up on the wire, byte for byte.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct HeaderSet {
    entries: Vec<(String, String)>,
}

impl HeaderSet {
    /// Create an empty set.
    pub fn new() -> Self {
        HeaderSet::default()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|(n, _)| n.eq_ignore_ascii_case(name))
    }

    /// Set a header. An existing header with the same name (ignoring case) gets
    /// its value replaced in place, otherwise the header is appended.
    pub fn add_or_replace(&mut self, name: &str, value: &str) {
        match self.position(name) {
            Some(idx) => self.entries[idx].1 = value.to_string(),
            None => self.entries.push((name.to_string(), value.to_string())),
        }
    }

    /// Append a header unless one with the same name already exists.
    ///
    /// Returns `true` if the header was added.
    pub fn add_if_missing(&mut self, name: &str, value: &str) -> bool {
        if self.position(name).is_some() {
            return false;
        }
        self.entries.push((name.to_string(), value.to_string()));
        true
    }

    /// Remove a header. Returns the removed value, if there was one.
    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.position(name).map(|idx| self.entries.remove(idx).1)
    }

    /// Look up a header value.
    pub fn lookup(&self, name: &str) -> Option<&str> {
        self.position(name).map(|idx| self.entries[idx].1.as_str())
    }

    /// Test whether a header is present.
    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    /// Number of headers.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Test if there are no headers.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate `(name, value)` in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Write all headers as `name: value\r\n` lines.
    pub fn serialize_into(&self, out: &mut Vec<u8>) {
        for (name, value) in &self.entries {
            out.extend_from_slice(name.as_bytes());
            out.extend_from_slice(b": ");
            out.extend_from_slice(value.as_bytes());
            out.extend_from_slice(b"\r\n");
        }
    }

    /// All headers as `name: value\r\n` lines.
    pub fn serialize(&self) -> String {
        let mut out = Vec::with_capacity(self.entries.len() * 32);
        self.serialize_into(&mut out);
        // names and values only ever come from &str.
        String::from_utf8_lossy(&out).into_owned()
    }
}

impl fmt::Debug for HeaderSet {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}
