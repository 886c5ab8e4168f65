//! Source Resolution
//!
//! A compilation may span several files. The caller supplies the text of
//! included files through a [`SourceResolver`] that lives only as long as one
//! `compile` call; there is no process-wide resolver slot, so concurrent
//! compilations never see each other's callbacks.
//!
//! Include rules:
//! - `#include "name"` must be resolved by the caller, otherwise compilation
//!   fails naming the file.
//! - `#include <name>` is offered to the resolver first and otherwise left to
//!   the compiler's own search path (system and toolkit headers).
//!
//! Resolution is recursive through resolved headers, and each distinct name
//! is requested at most once per compilation.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::backend::Header;
use crate::error::{JitError, Result};

/// Supplies the text of included files for one compilation
pub trait SourceResolver {
    /// Text of `filename`, or `None` if the resolver does not know it
    fn resolve(&mut self, filename: &str) -> Option<String>;
}

impl<F> SourceResolver for F
where
    F: FnMut(&str) -> Option<String>,
{
    fn resolve(&mut self, filename: &str) -> Option<String> {
        self(filename)
    }
}

/// In-memory header set keyed by include name
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderSet {
    headers: HashMap<String, String>,
}

impl HeaderSet {
    /// Empty set
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) a header
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, source: impl Into<String>) -> Self {
        self.insert(name, source);
        self
    }

    /// Add (or replace) a header
    pub fn insert(&mut self, name: impl Into<String>, source: impl Into<String>) {
        self.headers.insert(name.into(), source.into());
    }

    /// Number of headers
    #[must_use]
    pub fn len(&self) -> usize {
        self.headers.len()
    }

    /// Whether the set is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for HeaderSet {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            headers: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

impl SourceResolver for HeaderSet {
    fn resolve(&mut self, filename: &str) -> Option<String> {
        self.headers.get(filename).cloned()
    }
}

/// How an include names its file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncludeKind {
    /// `#include "name"`
    Quoted,
    /// `#include <name>`
    Angle,
}

/// One include directive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Include {
    /// File name as written
    pub name: String,
    /// Delimiter style
    pub kind: IncludeKind,
}

/// Remove `//` and `/* */` comments, keeping line structure and string literals
#[must_use]
pub fn strip_comments(source: &str) -> String {
    #[derive(Clone, Copy, PartialEq)]
    enum State {
        Code,
        Line,
        Block,
        Str(char),
    }

    let mut out = String::with_capacity(source.len());
    let mut state = State::Code;
    let mut chars = source.chars().peekable();
    while let Some(c) = chars.next() {
        match state {
            State::Code => match c {
                '/' if chars.peek() == Some(&'/') => {
                    chars.next();
                    state = State::Line;
                }
                '/' if chars.peek() == Some(&'*') => {
                    chars.next();
                    out.push(' ');
                    state = State::Block;
                }
                '"' | '\'' => {
                    out.push(c);
                    state = State::Str(c);
                }
                _ => out.push(c),
            },
            State::Line => {
                if c == '\n' {
                    out.push('\n');
                    state = State::Code;
                }
            }
            State::Block => {
                if c == '*' && chars.peek() == Some(&'/') {
                    chars.next();
                    state = State::Code;
                } else if c == '\n' {
                    out.push('\n');
                }
            }
            State::Str(delim) => {
                out.push(c);
                if c == '\\' {
                    if let Some(escaped) = chars.next() {
                        out.push(escaped);
                    }
                } else if c == delim || c == '\n' {
                    state = State::Code;
                }
            }
        }
    }
    out
}

/// Include directives of `source`, in order of appearance
#[must_use]
pub fn scan_includes(source: &str) -> Vec<Include> {
    strip_comments(source)
        .lines()
        .filter_map(parse_include)
        .collect()
}

fn parse_include(line: &str) -> Option<Include> {
    let rest = line.trim_start().strip_prefix('#')?;
    let rest = rest.trim_start().strip_prefix("include")?;
    let rest = rest.trim_start();
    let (kind, close) = match rest.chars().next()? {
        '"' => (IncludeKind::Quoted, '"'),
        '<' => (IncludeKind::Angle, '>'),
        _ => return None,
    };
    let body = &rest[1..];
    let end = body.find(close)?;
    let name = body[..end].trim();
    if name.is_empty() {
        return None;
    }
    Some(Include {
        name: name.to_string(),
        kind,
    })
}

/// Resolve every include reachable from `source`
///
/// Returns the resolved headers in discovery order. Angle includes the
/// resolver does not know are left out; the compiler finds them itself.
///
/// # Errors
///
/// Returns `Err(JitError::Compile)` naming the first quoted include that no
/// resolver supplied (or that resolved to empty text).
pub fn resolve_headers(
    program: &str,
    source: &str,
    mut resolver: Option<&mut dyn SourceResolver>,
) -> Result<Vec<Header>> {
    let mut queue: VecDeque<Include> = scan_includes(source).into();
    let mut seen = HashSet::new();
    let mut headers = Vec::new();

    while let Some(include) = queue.pop_front() {
        if !seen.insert(include.name.clone()) {
            continue;
        }
        let text = resolver
            .as_deref_mut()
            .and_then(|r| r.resolve(&include.name))
            .filter(|text| !text.is_empty());

        match (text, include.kind) {
            (Some(text), _) => {
                tracing::trace!(
                    program,
                    header = %include.name,
                    bytes = text.len(),
                    "resolved include"
                );
                queue.extend(scan_includes(&text));
                headers.push(Header {
                    name: include.name,
                    source: text,
                });
            }
            (None, IncludeKind::Quoted) => {
                return Err(JitError::Compile {
                    program: program.to_string(),
                    log: format!("could not resolve include \"{}\"", include.name),
                });
            }
            (None, IncludeKind::Angle) => {
                tracing::trace!(
                    program,
                    header = %include.name,
                    "include left to compiler search path"
                );
            }
        }
    }
    Ok(headers)
}
