/// A single header field, preserving the original case of its name and the
/// raw bytes of its value (headers are Latin-1/ASCII in HTTP/1.1, so we keep
/// them as bytes rather than forcing a lossy UTF-8 conversion).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderField {
    pub name: String,
    pub value: Vec<u8>,
}

impl HeaderField {
    pub fn value_str(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.value)
    }
}

/// An ordered, multi-valued, case-preserving header list. Order and
/// duplicates are kept exactly as received.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderList(pub Vec<HeaderField>);

impl HeaderList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: impl Into<String>, value: impl Into<Vec<u8>>) {
        self.0.push(HeaderField {
            name: name.into(),
            value: value.into(),
        });
    }

    pub fn iter(&self) -> std::slice::Iter<'_, HeaderField> {
        self.0.iter()
    }

    /// All header fields whose name matches `name` case-insensitively, in
    /// the order they appear.
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a HeaderField> + 'a {
        self.0.iter().filter(move |h| h.name.eq_ignore_ascii_case(name))
    }

    pub fn get_first(&self, name: &str) -> Option<&HeaderField> {
        self.get_all(name).next()
    }

    /// True if any occurrence of header `name` contains `token` as one of
    /// its comma-separated, whitespace-trimmed values (case-insensitive).
    /// Used for `Connection`/`Proxy-Connection: close` and
    /// `Transfer-Encoding: chunked` detection.
    pub fn contains_token(&self, name: &str, token: &str) -> bool {
        self.get_all(name).any(|h| {
            h.value_str()
                .split(',')
                .any(|part| part.trim().eq_ignore_ascii_case(token))
        })
    }

    /// Every comma-separated token across all occurrences of `name`.
    pub fn tokens(&self, name: &str) -> Vec<String> {
        self.get_all(name)
            .flat_map(|h| {
                h.value_str()
                    .split(',')
                    .map(|p| p.trim().to_string())
                    .collect::<Vec<_>>()
            })
            .filter(|t| !t.is_empty())
            .collect()
    }

    pub fn remove_all(&mut self, name: &str) {
        self.0.retain(|h| !h.name.eq_ignore_ascii_case(name));
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<'a> IntoIterator for &'a HeaderList {
    type Item = &'a HeaderField;
    type IntoIter = std::slice::Iter<'a, HeaderField>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contains_token_is_case_insensitive_and_comma_split() {
        let mut h = HeaderList::new();
        h.push("Connection", b"Keep-Alive, Close".to_vec());
        assert!(h.contains_token("connection", "close"));
        assert!(h.contains_token("CONNECTION", "keep-alive"));
        assert!(!h.contains_token("Connection", "upgrade"));
    }

    #[test]
    fn remove_all_is_case_insensitive() {
        let mut h = HeaderList::new();
        h.push("Proxy-Connection", b"close".to_vec());
        h.push("Host", b"example.test".to_vec());
        h.remove_all("proxy-connection");
        assert_eq!(h.len(), 1);
        assert_eq!(h.0[0].name, "Host");
    }

    #[test]
    fn get_all_preserves_order_and_duplicates() {
        let mut h = HeaderList::new();
        h.push("X-Foo", b"1".to_vec());
        h.push("X-Foo", b"2".to_vec());
        let values: Vec<_> = h.get_all("x-foo").map(|f| f.value_str().into_owned()).collect();
        assert_eq!(values, vec!["1", "2"]);
    }
}
