//! Minimal URL representation for connector addresses.
//!
//! Connector URLs have the shape `scheme://authority/path?query#fragment`.
//! The parser here is deliberately small: schemes are lowercased, the query
//! is split into a key/value map, and percent escapes are decoded in the
//! path and in query values. That is enough to express every endpoint kind
//! the crate knows about, including abstract local names (`%00` in the
//! path).

use std::collections::BTreeMap;
use std::fmt;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Url {
    pub scheme: String,
    pub authority: String,
    pub path: String,
    pub query: BTreeMap<String, String>,
    pub fragment: String,
}

impl Url {
    pub fn parse(input: &str) -> Result<Url> {
        let (scheme, rest) = input.split_once("://").ok_or(Error::Format)?;
        if scheme.is_empty() {
            return Err(Error::Format);
        }

        let (rest, fragment) = match rest.split_once('#') {
            Some((r, f)) => (r, f.to_string()),
            None => (rest, String::new()),
        };

        let (rest, raw_query) = match rest.split_once('?') {
            Some((r, q)) => (r, Some(q)),
            None => (rest, None),
        };

        let (authority, path) = match rest.find('/') {
            Some(idx) => (&rest[..idx], percent_decode(&rest[idx..])?),
            None => (rest, String::new()),
        };

        let mut query = BTreeMap::new();
        if let Some(raw) = raw_query {
            for pair in raw.split('&').filter(|p| !p.is_empty()) {
                match pair.split_once('=') {
                    Some((k, v)) => {
                        query.insert(k.to_ascii_lowercase(), percent_decode(v)?);
                    }
                    // A bare key counts as a set flag.
                    None => {
                        query.insert(pair.to_ascii_lowercase(), "1".to_string());
                    }
                }
            }
        }

        Ok(Url {
            scheme: scheme.to_ascii_lowercase(),
            authority: authority.to_string(),
            path,
            query,
            fragment,
        })
    }
}

impl fmt::Display for Url {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.scheme, self.authority)?;
        write!(f, "{}", percent_encode(&self.path))?;
        let mut sep = '?';
        for (key, value) in &self.query {
            write!(f, "{}{}={}", sep, key, percent_encode(value))?;
            sep = '&';
        }
        if !self.fragment.is_empty() {
            write!(f, "#{}", self.fragment)?;
        }
        Ok(())
    }
}

fn percent_decode(input: &str) -> Result<String> {
    if !input.contains('%') {
        return Ok(input.to_string());
    }

    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut idx = 0;
    while idx < bytes.len() {
        if bytes[idx] == b'%' {
            let hex = input.get(idx + 1..idx + 3).ok_or(Error::Format)?;
            let value = u8::from_str_radix(hex, 16).map_err(|_| Error::Format)?;
            out.push(value);
            idx += 3;
        } else {
            out.push(bytes[idx]);
            idx += 1;
        }
    }

    String::from_utf8(out).map_err(|_| Error::Format)
}

fn percent_encode(input: &str) -> String {
    if input.bytes().all(|b| b != 0 && b != b'%' && b != b'?' && b != b'#') {
        return input.to_string();
    }

    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        match byte {
            0 | b'%' | b'?' | b'#' => out.push_str(&format!("%{:02X}", byte)),
            _ => out.push(byte as char),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_inet() {
        let url = Url::parse("tcp4://192.168.0.1:8080").unwrap();
        assert_eq!(url.scheme, "tcp4");
        assert_eq!(url.authority, "192.168.0.1:8080");
        assert_eq!(url.path, "");
        assert!(url.query.is_empty());
    }

    #[test]
    fn parse_path_and_query() {
        let url = Url::parse("local:///tmp/sock?blocking=1&behaviour=stream").unwrap();
        assert_eq!(url.authority, "");
        assert_eq!(url.path, "/tmp/sock");
        assert_eq!(url.query.get("blocking").unwrap(), "1");
        assert_eq!(url.query.get("behaviour").unwrap(), "stream");
    }

    #[test]
    fn parse_decodes_abstract_names() {
        let url = Url::parse("local:///%00hidden").unwrap();
        assert_eq!(url.path.as_bytes()[0], b'/');
        assert_eq!(url.path.as_bytes()[1], 0);
        assert_eq!(&url.path[2..], "hidden");
    }

    #[test]
    fn parse_scheme_is_lowercased() {
        let url = Url::parse("TCP://127.0.0.1:80").unwrap();
        assert_eq!(url.scheme, "tcp");
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(Url::parse("no-scheme-here").is_err());
        assert!(Url::parse("://missing").is_err());
    }

    #[test]
    fn display_round_trips() {
        let text = "udp6://[::1]:2000";
        let url = Url::parse(text).unwrap();
        assert_eq!(url.to_string(), text);

        let url = Url::parse("local:///%00hidden").unwrap();
        let rendered = url.to_string();
        assert_eq!(rendered, "local:///%00hidden");
        assert_eq!(Url::parse(&rendered).unwrap(), url);
    }

    #[test]
    fn bare_query_key_is_truthy() {
        let url = Url::parse("anon://?blocking").unwrap();
        assert_eq!(url.query.get("blocking").unwrap(), "1");
    }
}
