//! Session Argument Buffers
//!
//! Session arguments are flat `key=value` lists separated by commas, e.g.
//! `ram_quota=65536, cap_quota=4, label="left"`. Values may be quoted; commas
//! inside quotes do not split entries. The buffer never grows beyond
//! [`MAX_ARGS_LEN`] bytes: every mutating operation either fits or leaves the
//! buffer unchanged and reports [`ArgsError::Overflow`].
//!
//! Keys other than `ram_quota`, `cap_quota` and `label` are opaque to the
//! session layer and passed through verbatim.

use core::fmt;

use crate::config::MAX_ARGS_LEN;
use crate::error::ArgsError;

/// Bounded session argument string
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionArgs {
    buf: String,
}

impl SessionArgs {
    /// Empty argument list
    pub fn new() -> Self {
        Self::default()
    }

    /// Take an argument string verbatim
    pub fn parse(args: &str) -> Result<Self, ArgsError> {
        let args = args.trim();
        check_len(args.len())?;
        Ok(Self {
            buf: String::from(args),
        })
    }

    /// Raw argument string
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.buf
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// `(key, raw value)` pairs in order of appearance
    pub fn entries(&self) -> Vec<(&str, &str)> {
        split_entries(&self.buf)
            .into_iter()
            .filter_map(|entry| {
                let (key, value) = entry.split_once('=')?;
                Some((key.trim(), value.trim()))
            })
            .collect()
    }

    /// True if `key` is present
    pub fn contains(&self, key: &str) -> bool {
        self.raw_value(key).is_some()
    }

    /// Value of `key` with surrounding quotes stripped
    pub fn value(&self, key: &str) -> Option<&str> {
        self.raw_value(key).map(unquote)
    }

    /// Numeric value of `key`, accepting `K`, `M` and `G` suffixes
    ///
    /// Falls back to `default` if the key is missing or malformed.
    pub fn ulong_value(&self, key: &str, default: u64) -> u64 {
        self.value(key).and_then(parse_ulong).unwrap_or(default)
    }

    /// Session label, empty if none was given
    pub fn label(&self) -> &str {
        self.value("label").unwrap_or("")
    }

    /// Set `key` to a raw value, replacing any previous entry
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ArgsError> {
        validate_key(key)?;

        let mut entries: Vec<String> = split_entries(&self.buf)
            .into_iter()
            .filter(|entry| entry_key(entry) != Some(key))
            .map(String::from)
            .collect();
        entries.push(format!("{}={}", key, value.trim()));

        let joined = entries.join(", ");
        check_len(joined.len())?;
        self.buf = joined;
        Ok(())
    }

    /// Set `key` to a number
    pub fn set_ulong(&mut self, key: &str, value: u64) -> Result<(), ArgsError> {
        self.set(key, &value.to_string())
    }

    /// Set `key` to a quoted string
    pub fn set_str(&mut self, key: &str, value: &str) -> Result<(), ArgsError> {
        let cleaned: String = value.chars().filter(|c| *c != '"').collect();
        self.set(key, &format!("\"{}\"", cleaned))
    }

    /// Remove `key`; returns false if it was absent
    pub fn remove(&mut self, key: &str) -> bool {
        let entries: Vec<&str> = split_entries(&self.buf);
        let kept: Vec<&str> = entries
            .iter()
            .copied()
            .filter(|entry| entry_key(entry) != Some(key))
            .collect();

        if kept.len() == entries.len() {
            return false;
        }
        self.buf = kept.join(", ");
        true
    }

    fn raw_value(&self, key: &str) -> Option<&str> {
        split_entries(&self.buf).into_iter().find_map(|entry| {
            let (k, v) = entry.split_once('=')?;
            (k.trim() == key).then(|| v.trim())
        })
    }
}

impl fmt::Display for SessionArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.buf)
    }
}

fn check_len(needed: usize) -> Result<(), ArgsError> {
    if needed > MAX_ARGS_LEN {
        return Err(ArgsError::Overflow {
            needed,
            limit: MAX_ARGS_LEN,
        });
    }
    Ok(())
}

fn validate_key(key: &str) -> Result<(), ArgsError> {
    let valid = !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.');
    if valid {
        Ok(())
    } else {
        Err(ArgsError::InvalidKey(String::from(key)))
    }
}

/// Split on commas outside of quotes, dropping empty entries
fn split_entries(args: &str) -> Vec<&str> {
    let mut entries = Vec::new();
    let mut quoted = false;
    let mut start = 0;

    for (pos, c) in args.char_indices() {
        match c {
            '"' => quoted = !quoted,
            ',' if !quoted => {
                entries.push(args[start..pos].trim());
                start = pos + 1;
            }
            _ => {}
        }
    }
    entries.push(args[start..].trim());
    entries.retain(|entry| !entry.is_empty());
    entries
}

fn entry_key(entry: &str) -> Option<&str> {
    entry.split_once('=').map(|(key, _)| key.trim())
}

fn unquote(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
}

fn parse_ulong(value: &str) -> Option<u64> {
    let (digits, shift) = match value.as_bytes().last()? {
        b'K' | b'k' => (&value[..value.len() - 1], 10),
        b'M' | b'm' => (&value[..value.len() - 1], 20),
        b'G' | b'g' => (&value[..value.len() - 1], 30),
        _ => (value, 0),
    };

    let base: u64 = digits.trim().parse().ok()?;
    base.checked_mul(1u64 << shift)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_lookup() {
        let args = SessionArgs::parse(r#"ram_quota=65536, cap_quota=4, label="left""#).unwrap();

        assert_eq!(args.value("ram_quota"), Some("65536"));
        assert_eq!(args.label(), "left");
        assert_eq!(args.value("missing"), None);
        assert_eq!(args.entries().len(), 3);
    }

    #[test]
    fn test_ulong_suffixes() {
        let args = SessionArgs::parse("a=4K, b=2M, c=1G, d=oops, e=17").unwrap();

        assert_eq!(args.ulong_value("a", 0), 4096);
        assert_eq!(args.ulong_value("b", 0), 2 * 1024 * 1024);
        assert_eq!(args.ulong_value("c", 0), 1 << 30);
        assert_eq!(args.ulong_value("d", 9), 9);
        assert_eq!(args.ulong_value("e", 0), 17);
        assert_eq!(args.ulong_value("f", 5), 5);
    }

    #[test]
    fn test_quoted_comma_does_not_split() {
        let args = SessionArgs::parse(r#"label="a, b", cap_quota=2"#).unwrap();
        assert_eq!(args.label(), "a, b");
        assert_eq!(args.ulong_value("cap_quota", 0), 2);
    }

    #[test]
    fn test_set_replaces_existing_key() {
        let mut args = SessionArgs::parse(r#"ram_quota=4096, label="x""#).unwrap();

        args.set_ulong("ram_quota", 8192).unwrap();
        args.set_str("label", "init -> x").unwrap();

        assert_eq!(args.ulong_value("ram_quota", 0), 8192);
        assert_eq!(args.label(), "init -> x");
        assert_eq!(args.entries().len(), 2);
    }

    #[test]
    fn test_set_overflow_leaves_buffer_unchanged() {
        let mut args = SessionArgs::parse("ram_quota=1").unwrap();
        let long = "x".repeat(MAX_ARGS_LEN);

        let result = args.set_str("label", &long);

        assert!(matches!(result, Err(ArgsError::Overflow { .. })));
        assert_eq!(args.as_str(), "ram_quota=1");
    }

    #[test]
    fn test_parse_rejects_oversized_input() {
        let long = "y".repeat(MAX_ARGS_LEN + 1);
        assert!(matches!(
            SessionArgs::parse(&long),
            Err(ArgsError::Overflow { .. })
        ));
    }

    #[test]
    fn test_remove() {
        let mut args = SessionArgs::parse("a=1, b=2, c=3").unwrap();

        assert!(args.remove("b"));
        assert!(!args.remove("b"));
        assert_eq!(args.as_str(), "a=1, c=3");
    }

    #[test]
    fn test_invalid_key() {
        let mut args = SessionArgs::new();
        assert!(matches!(
            args.set("bad key", "1"),
            Err(ArgsError::InvalidKey(_))
        ));
    }
}
