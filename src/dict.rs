//! Ordered, multimap-capable key/value store used throughout the request
//! and response pipeline (headers, query/POST data, sessions, route
//! captures). Values may themselves be nested dicts, which is what lets a
//! single type serve as the wire format for JSON export.
//!
//! Grounded on the AA-tree `onion_dict` from the original C library: the
//! key-sorted iteration, multimap-on-duplicate, optional case-insensitive
//! comparator semantics are kept, but the storage is a plain sorted `Vec`
//! behind an `Arc<RwLock<_>>` rather than a balanced tree — insertion
//! finds its sorted slot with a binary search and the dicts here are
//! small (header sets, query strings), so a tree buys nothing over a
//! `Vec::insert`.

use std::sync::{Arc, RwLock};

#[derive(Debug, Clone)]
pub enum DictValue {
    Str(String),
    Nested(Dict),
}

impl DictValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            DictValue::Str(s) => Some(s.as_str()),
            DictValue::Nested(_) => None,
        }
    }
}

impl From<String> for DictValue {
    fn from(s: String) -> Self {
        DictValue::Str(s)
    }
}

impl From<&str> for DictValue {
    fn from(s: &str) -> Self {
        DictValue::Str(s.to_string())
    }
}

#[derive(Debug)]
struct DictInner {
    entries: Vec<(String, DictValue)>,
    icase: bool,
}

impl DictInner {
    fn key_eq(&self, a: &str, b: &str) -> bool {
        if self.icase {
            a.eq_ignore_ascii_case(b)
        } else {
            a == b
        }
    }
}

/// A cheaply-clonable handle to a dict. Cloning a `Dict` (`soft_dup` in the
/// original) shares the same backing storage via the `Arc`; `hard_dup`
/// performs a real structural copy so the two dicts can diverge.
#[derive(Debug, Clone)]
pub struct Dict(Arc<RwLock<DictInner>>);

impl Default for Dict {
    fn default() -> Self {
        Self::new()
    }
}

impl Dict {
    pub fn new() -> Self {
        Dict(Arc::new(RwLock::new(DictInner {
            entries: Vec::new(),
            icase: false,
        })))
    }

    /// A dict whose key comparisons ignore ASCII case, as used for HTTP
    /// header names.
    pub fn new_icase() -> Self {
        Dict(Arc::new(RwLock::new(DictInner {
            entries: Vec::new(),
            icase: true,
        })))
    }

    /// Insert `key`/`value`. If `replace` is true and `key` already exists,
    /// the first existing entry is overwritten in place (`OD_REPLACE`);
    /// otherwise a duplicate entry is inserted in key-sorted position,
    /// after any existing entries under the same key, making this a
    /// multimap ordered by key (`OD_DUP_ALL` equivalent — the default in
    /// the original).
    pub fn add(&self, key: impl Into<String>, value: impl Into<DictValue>, replace: bool) {
        let key = key.into();
        let value = value.into();
        let mut inner = self.0.write().unwrap();
        let icase = inner.icase;
        if replace {
            if let Some(slot) = inner
                .entries
                .iter()
                .position(|(k, _)| inner_key_eq(icase, k, &key))
            {
                inner.entries[slot].1 = value;
                return;
            }
        }
        let pos = inner
            .entries
            .partition_point(|(k, _)| key_cmp(icase, k, &key) != std::cmp::Ordering::Greater);
        inner.entries.insert(pos, (key, value));
    }

    /// Convenience for the common "set a single string header" case: always
    /// replaces.
    pub fn set(&self, key: impl Into<String>, value: impl Into<String>) {
        self.add(key.into(), DictValue::Str(value.into()), true);
    }

    /// First value stored under `key`, if any.
    pub fn get(&self, key: &str) -> Option<String> {
        let inner = self.0.read().unwrap();
        inner
            .entries
            .iter()
            .find(|(k, _)| inner.key_eq(k, key))
            .and_then(|(_, v)| v.as_str().map(|s| s.to_string()))
    }

    /// Every value stored under `key`, in insertion order (multimap read).
    pub fn get_all(&self, key: &str) -> Vec<String> {
        let inner = self.0.read().unwrap();
        inner
            .entries
            .iter()
            .filter(|(k, _)| inner.key_eq(k, key))
            .filter_map(|(_, v)| v.as_str().map(|s| s.to_string()))
            .collect()
    }

    pub fn contains(&self, key: &str) -> bool {
        let inner = self.0.read().unwrap();
        inner.entries.iter().any(|(k, _)| inner.key_eq(k, key))
    }

    /// Acquires the dict's read lock directly, for callers that need to
    /// make several reads atomically (no other thread's `add`/`remove` can
    /// interleave until the guard drops). Equivalent to `onion_dict_lock_read`.
    pub fn lock_read(&self) -> DictReadGuard<'_> {
        DictReadGuard(self.0.read().unwrap())
    }

    /// Acquires the dict's write lock directly, for a read-modify-write
    /// sequence (e.g. "add this key only if absent") that must not be torn
    /// by another thread between the read and the write. Equivalent to
    /// `onion_dict_lock_write`.
    pub fn lock_write(&self) -> DictWriteGuard<'_> {
        DictWriteGuard(self.0.write().unwrap())
    }

    /// Removes every entry stored under `key`. Returns how many were
    /// removed.
    pub fn remove(&self, key: &str) -> usize {
        let mut inner = self.0.write().unwrap();
        let icase = inner.icase;
        let before = inner.entries.len();
        inner.entries.retain(|(k, _)| !inner_key_eq(icase, k, key));
        before - inner.entries.len()
    }

    pub fn len(&self) -> usize {
        self.0.read().unwrap().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keys in key-sorted order (duplicates included, stable among equal keys).
    pub fn keys(&self) -> Vec<String> {
        self.0
            .read()
            .unwrap()
            .entries
            .iter()
            .map(|(k, _)| k.clone())
            .collect()
    }

    pub fn entries(&self) -> Vec<(String, String)> {
        self.0
            .read()
            .unwrap()
            .entries
            .iter()
            .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
            .collect()
    }

    /// Recursive dotted-path lookup through nested dicts, e.g.
    /// `dict.rget(&["session", "user", "id"])`.
    pub fn rget(&self, path: &[&str]) -> Option<String> {
        match path {
            [] => None,
            [only] => self.get(only),
            [head, rest @ ..] => {
                let inner = self.0.read().unwrap();
                let nested = inner.entries.iter().find_map(|(k, v)| {
                    if inner.key_eq(k, head) {
                        match v {
                            DictValue::Nested(d) => Some(d.clone()),
                            _ => None,
                        }
                    } else {
                        None
                    }
                });
                drop(inner);
                nested.and_then(|d| d.rget(rest))
            }
        }
    }

    /// Shares storage with the original (cheap `Arc` clone) — mutations
    /// through either handle are visible to both.
    pub fn soft_dup(&self) -> Dict {
        Dict(Arc::clone(&self.0))
    }

    /// Deep, independent copy.
    pub fn hard_dup(&self) -> Dict {
        let inner = self.0.read().unwrap();
        let entries = inner
            .entries
            .iter()
            .map(|(k, v)| {
                let v = match v {
                    DictValue::Str(s) => DictValue::Str(s.clone()),
                    DictValue::Nested(d) => DictValue::Nested(d.hard_dup()),
                };
                (k.clone(), v)
            })
            .collect();
        Dict(Arc::new(RwLock::new(DictInner {
            entries,
            icase: inner.icase,
        })))
    }

    /// Number of entries, including duplicates under the same key.
    pub fn count(&self) -> usize {
        self.len()
    }

    /// In-order (key-sorted) walk over every entry, mirroring the
    /// original `onion_dict_preorder` traversal callback. Nested dicts are
    /// not descended into automatically — a visitor that cares recurses
    /// itself via `DictValue::Nested`.
    pub fn preorder(&self, mut f: impl FnMut(&str, &DictValue)) {
        let inner = self.0.read().unwrap();
        for (k, v) in inner.entries.iter() {
            f(k, v);
        }
    }

    /// Copies every entry of `other` into `self`, duplicate-key semantics
    /// following the same multimap-by-default rule as `add`, each entry
    /// landing at its key-sorted position.
    pub fn merge(&self, other: &Dict) {
        let entries = {
            let other_inner = other.0.read().unwrap();
            other_inner.entries.clone()
        };
        let mut inner = self.0.write().unwrap();
        let icase = inner.icase;
        for (k, v) in entries {
            let pos = inner
                .entries
                .partition_point(|(ek, _)| key_cmp(icase, ek, &k) != std::cmp::Ordering::Greater);
            inner.entries.insert(pos, (k, v));
        }
    }

    /// Renders this dict as a JSON object, escaping values the way the
    /// original codec table does (`\b \f \n \r \t \" \\` plus `\u00XX` for
    /// other control characters).
    pub fn to_json(&self) -> String {
        let mut out = String::from("{");
        let inner = self.0.read().unwrap();
        for (i, (k, v)) in inner.entries.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            out.push('"');
            json_quote_into(k, &mut out);
            out.push_str("\":");
            match v {
                DictValue::Str(s) => {
                    out.push('"');
                    json_quote_into(s, &mut out);
                    out.push('"');
                }
                DictValue::Nested(d) => out.push_str(&d.to_json()),
            }
        }
        out.push('}');
        out
    }

    /// Parses a JSON object into a dict. Only objects are accepted at the
    /// top level and as values — arrays, bare strings/numbers/booleans as
    /// the document root are rejected, matching the contract that a dict
    /// is the only thing this type can represent. Numbers are accepted on
    /// the wire but stored as their literal text, same as every other
    /// scalar value here.
    pub fn from_json(input: &str) -> Option<Dict> {
        let mut chars = input.char_indices().peekable();
        let dict = parse_json_object(input, &mut chars)?;
        skip_json_ws(&mut chars);
        if chars.next().is_some() {
            return None;
        }
        Some(dict)
    }
}

/// Held read lock on a dict's storage. Reads made through the guard are
/// atomic with respect to any writer blocked on `lock_write` elsewhere.
pub struct DictReadGuard<'a>(std::sync::RwLockReadGuard<'a, DictInner>);

impl<'a> DictReadGuard<'a> {
    pub fn get(&self, key: &str) -> Option<String> {
        self.0
            .entries
            .iter()
            .find(|(k, _)| self.0.key_eq(k, key))
            .and_then(|(_, v)| v.as_str().map(|s| s.to_string()))
    }

    pub fn get_all(&self, key: &str) -> Vec<String> {
        self.0
            .entries
            .iter()
            .filter(|(k, _)| self.0.key_eq(k, key))
            .filter_map(|(_, v)| v.as_str().map(|s| s.to_string()))
            .collect()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.entries.iter().any(|(k, _)| self.0.key_eq(k, key))
    }

    pub fn len(&self) -> usize {
        self.0.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.entries.is_empty()
    }

    pub fn keys(&self) -> Vec<String> {
        self.0.entries.iter().map(|(k, _)| k.clone()).collect()
    }

    /// Releases the lock. Equivalent to just dropping the guard; spelled
    /// out for callers mirroring `onion_dict_unlock`.
    pub fn unlock(self) {}
}

/// Held write lock on a dict's storage, for a read-modify-write sequence
/// that must not be interleaved with another thread's access to the same
/// dict (e.g. "insert this key only if it isn't already present").
pub struct DictWriteGuard<'a>(std::sync::RwLockWriteGuard<'a, DictInner>);

impl<'a> DictWriteGuard<'a> {
    pub fn get(&self, key: &str) -> Option<String> {
        self.0
            .entries
            .iter()
            .find(|(k, _)| self.0.key_eq(k, key))
            .and_then(|(_, v)| v.as_str().map(|s| s.to_string()))
    }

    pub fn get_all(&self, key: &str) -> Vec<String> {
        self.0
            .entries
            .iter()
            .filter(|(k, _)| self.0.key_eq(k, key))
            .filter_map(|(_, v)| v.as_str().map(|s| s.to_string()))
            .collect()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.entries.iter().any(|(k, _)| self.0.key_eq(k, key))
    }

    pub fn len(&self) -> usize {
        self.0.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.entries.is_empty()
    }

    pub fn keys(&self) -> Vec<String> {
        self.0.entries.iter().map(|(k, _)| k.clone()).collect()
    }

    pub fn add(&mut self, key: impl Into<String>, value: impl Into<DictValue>, replace: bool) {
        let key = key.into();
        let value = value.into();
        let icase = self.0.icase;
        if replace {
            if let Some(slot) = self
                .0
                .entries
                .iter()
                .position(|(k, _)| inner_key_eq(icase, k, &key))
            {
                self.0.entries[slot].1 = value;
                return;
            }
        }
        let pos = self
            .0
            .entries
            .partition_point(|(k, _)| key_cmp(icase, k, &key) != std::cmp::Ordering::Greater);
        self.0.entries.insert(pos, (key, value));
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.add(key, DictValue::Str(value.into()), true);
    }

    pub fn remove(&mut self, key: &str) -> usize {
        let icase = self.0.icase;
        let before = self.0.entries.len();
        self.0.entries.retain(|(k, _)| !inner_key_eq(icase, k, key));
        before - self.0.entries.len()
    }

    /// Releases the lock. Equivalent to just dropping the guard; spelled
    /// out for callers mirroring `onion_dict_unlock`.
    pub fn unlock(self) {}
}

type JsonCursor<'a> = std::iter::Peekable<std::str::CharIndices<'a>>;

fn skip_json_ws(chars: &mut JsonCursor) {
    while let Some(&(_, c)) = chars.peek() {
        if c == ' ' || c == '\t' || c == '\n' || c == '\r' {
            chars.next();
        } else {
            break;
        }
    }
}

fn parse_json_object(input: &str, chars: &mut JsonCursor) -> Option<Dict> {
    skip_json_ws(chars);
    if chars.next().map(|(_, c)| c) != Some('{') {
        return None;
    }
    let dict = Dict::new();
    skip_json_ws(chars);
    if chars.peek().map(|&(_, c)| c) == Some('}') {
        chars.next();
        return Some(dict);
    }
    loop {
        skip_json_ws(chars);
        let key = parse_json_string(input, chars)?;
        skip_json_ws(chars);
        if chars.next().map(|(_, c)| c) != Some(':') {
            return None;
        }
        skip_json_ws(chars);
        let value = parse_json_value(input, chars)?;
        dict.add(key, value, false);
        skip_json_ws(chars);
        match chars.next().map(|(_, c)| c) {
            Some(',') => continue,
            Some('}') => break,
            _ => return None,
        }
    }
    Some(dict)
}

fn parse_json_value(input: &str, chars: &mut JsonCursor) -> Option<DictValue> {
    match chars.peek().map(|&(_, c)| c) {
        Some('{') => parse_json_object(input, chars).map(DictValue::Nested),
        Some('"') => parse_json_string(input, chars).map(DictValue::Str),
        Some(_) => {
            // Bare literal (number, true/false/null) — stored as its raw
            // text, same as the rest of this type's scalar values.
            let start = chars.peek()?.0;
            let mut end = start;
            while let Some(&(i, c)) = chars.peek() {
                if c == ',' || c == '}' || c == ' ' || c == '\t' || c == '\n' || c == '\r' {
                    break;
                }
                end = i + c.len_utf8();
                chars.next();
            }
            if end == start {
                None
            } else {
                Some(DictValue::Str(input[start..end].to_string()))
            }
        }
        None => None,
    }
}

fn parse_json_string(input: &str, chars: &mut JsonCursor) -> Option<String> {
    if chars.next().map(|(_, c)| c) != Some('"') {
        return None;
    }
    let mut out = String::new();
    loop {
        let (_, c) = chars.next()?;
        match c {
            '"' => return Some(out),
            '\\' => {
                let (_, esc) = chars.next()?;
                match esc {
                    'b' => out.push('\x08'),
                    'f' => out.push('\x0C'),
                    'n' => out.push('\n'),
                    'r' => out.push('\r'),
                    't' => out.push('\t'),
                    '"' => out.push('"'),
                    '\\' => out.push('\\'),
                    '/' => out.push('/'),
                    'u' => {
                        let mut hex = String::with_capacity(4);
                        for _ in 0..4 {
                            hex.push(chars.next()?.1);
                        }
                        let code = u32::from_str_radix(&hex, 16).ok()?;
                        out.push(char::from_u32(code)?);
                    }
                    _ => return None,
                }
            }
            _ => out.push(c),
        }
        let _ = input;
    }
}

fn inner_key_eq(icase: bool, a: &str, b: &str) -> bool {
    if icase {
        a.eq_ignore_ascii_case(b)
    } else {
        a == b
    }
}

/// Key comparator used to keep `entries` sorted. Case-insensitive dicts
/// compare on the lowercased key so e.g. `Content-Type` and `accept` sort
/// the same way regardless of which was typed in which case.
fn key_cmp(icase: bool, a: &str, b: &str) -> std::cmp::Ordering {
    if icase {
        a.to_ascii_lowercase().cmp(&b.to_ascii_lowercase())
    } else {
        a.cmp(b)
    }
}

const HEX: &[u8; 16] = b"0123456789ABCDEF";

/// JSON string-body escaping, matching `onion_json_quote_add`.
fn json_quote_into(s: &str, out: &mut String) {
    for c in s.bytes() {
        match c {
            b'\x08' => out.push_str("\\b"),
            b'\x0C' => out.push_str("\\f"),
            b'\n' => out.push_str("\\n"),
            b'\r' => out.push_str("\\r"),
            b'\t' => out.push_str("\\t"),
            b'"' => out.push_str("\\\""),
            b'\\' => out.push_str("\\\\"),
            c if c < 32 || c == 127 => {
                out.push_str("\\u00");
                out.push(HEX[(c >> 4) as usize] as char);
                out.push(HEX[(c & 0xF) as usize] as char);
            }
            c => out.push(c as char),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iteration_order_is_key_sorted() {
        let d = Dict::new();
        d.add("b", "2", false);
        d.add("a", "1", false);
        d.add("c", "3", false);
        assert_eq!(d.keys(), vec!["a", "b", "c"]);
    }

    #[test]
    fn count_equals_number_of_inserts_including_duplicates() {
        let d = Dict::new();
        d.add("x", "1", false);
        d.add("a", "2", false);
        d.add("x", "3", false);
        assert_eq!(d.count(), 3);
        assert_eq!(d.keys(), vec!["a", "x", "x"]);
    }

    #[test]
    fn lock_write_guards_a_read_modify_write_sequence() {
        let d = Dict::new();
        d.add("hits", "1", false);
        {
            let mut guard = d.lock_write();
            if guard.get("hits").is_none() {
                guard.add("hits", "0", true);
            }
            guard.set("seen", "yes");
            guard.unlock();
        }
        assert_eq!(d.get("seen").as_deref(), Some("yes"));
        assert_eq!(d.get("hits").as_deref(), Some("1"));
    }

    #[test]
    fn lock_read_reflects_concurrent_state_under_one_guard() {
        let d = Dict::new();
        d.add("a", "1", false);
        d.add("b", "2", false);
        let guard = d.lock_read();
        assert!(guard.contains("a"));
        assert_eq!(guard.len(), 2);
        assert_eq!(guard.keys(), vec!["a", "b"]);
    }

    #[test]
    fn multimap_duplicate_keys() {
        let d = Dict::new();
        d.add("x", "1", false);
        d.add("x", "2", false);
        assert_eq!(d.get_all("x"), vec!["1", "2"]);
        assert_eq!(d.get("x"), Some("1".to_string()));
    }

    #[test]
    fn replace_overwrites_first_match() {
        let d = Dict::new();
        d.add("x", "1", false);
        d.add("x", "2", true);
        assert_eq!(d.get_all("x"), vec!["2"]);
    }

    #[test]
    fn case_insensitive_lookup() {
        let d = Dict::new_icase();
        d.add("Content-Type", "text/plain", true);
        assert_eq!(d.get("content-type"), Some("text/plain".to_string()));
    }

    #[test]
    fn soft_dup_shares_storage() {
        let d = Dict::new();
        let d2 = d.soft_dup();
        d.add("k", "v", true);
        assert_eq!(d2.get("k"), Some("v".to_string()));
    }

    #[test]
    fn hard_dup_diverges() {
        let d = Dict::new();
        d.add("k", "v", true);
        let d2 = d.hard_dup();
        d.add("k", "changed", true);
        assert_eq!(d2.get("k"), Some("v".to_string()));
    }

    #[test]
    fn rget_traverses_nested_dicts() {
        let inner = Dict::new();
        inner.add("id", "42", true);
        let outer = Dict::new();
        outer.add("user", DictValue::Nested(inner), true);
        assert_eq!(outer.rget(&["user", "id"]), Some("42".to_string()));
    }

    #[test]
    fn json_escapes_control_characters() {
        let d = Dict::new();
        d.add("msg", "line1\nline2\t\"quoted\"", true);
        assert_eq!(d.to_json(), "{\"msg\":\"line1\\nline2\\t\\\"quoted\\\"\"}");
    }

    #[test]
    fn json_round_trips_through_from_json() {
        let d = Dict::new();
        d.add("name", "ada", true);
        d.add("age", "42", true);
        let json = d.to_json();
        let parsed = Dict::from_json(&json).unwrap();
        assert_eq!(parsed.get("name"), Some("ada".to_string()));
        assert_eq!(parsed.get("age"), Some("42".to_string()));
        assert_eq!(parsed.count(), d.count());
    }

    #[test]
    fn json_round_trips_nested_dicts() {
        let inner = Dict::new();
        inner.add("id", "7", true);
        let outer = Dict::new();
        outer.add("user", DictValue::Nested(inner), true);
        let parsed = Dict::from_json(&outer.to_json()).unwrap();
        assert_eq!(parsed.rget(&["user", "id"]), Some("7".to_string()));
    }

    #[test]
    fn from_json_rejects_non_object_root() {
        assert!(Dict::from_json("[1,2,3]").is_none());
        assert!(Dict::from_json("\"bare string\"").is_none());
    }

    #[test]
    fn from_json_unescapes_unicode_and_control_chars() {
        let parsed = Dict::from_json(r#"{"a":"line1\nline2A"}"#).unwrap();
        assert_eq!(parsed.get("a"), Some("line1\nline2A".to_string()));
    }

    #[test]
    fn merge_appends_all_entries() {
        let a = Dict::new();
        a.add("x", "1", false);
        let b = Dict::new();
        b.add("y", "2", false);
        a.merge(&b);
        assert_eq!(a.count(), 2);
        assert_eq!(a.get("y"), Some("2".to_string()));
    }

    #[test]
    fn preorder_visits_in_key_sorted_order() {
        let d = Dict::new();
        d.add("b", "2", false);
        d.add("a", "1", false);
        let mut seen = Vec::new();
        d.preorder(|k, _| seen.push(k.to_string()));
        assert_eq!(seen, vec!["a", "b"]);
    }

    #[test]
    fn duplicate_keys_stay_adjacent_and_stable_in_insertion_order() {
        let d = Dict::new();
        d.add("x", "1", false);
        d.add("x", "2", false);
        d.add("x", "3", false);
        assert_eq!(d.get_all("x"), vec!["1", "2", "3"]);
    }

    #[test]
    fn merge_keeps_result_key_sorted() {
        let a = Dict::new();
        a.add("c", "3", false);
        a.add("a", "1", false);
        let b = Dict::new();
        b.add("b", "2", false);
        a.merge(&b);
        assert_eq!(a.keys(), vec!["a", "b", "c"]);
    }
}
