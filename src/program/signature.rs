//! Kernel Signature Scanner
//!
//! Finds `__global__` functions in CUDA C++ source and records their template
//! parameter lists, so kernel lookup and template arity can be checked before
//! the compiler is involved. This is a lexical scan, not a C++ parser: it
//! understands comments, string literals, bracket nesting and the few
//! declaration qualifiers that may sit between `template<...>` and
//! `__global__`. Kernels inside `namespace` blocks are recorded under their
//! qualified name (`ns::kernel`), which is also what the compiler is asked to
//! lower.

use serde::{Deserialize, Serialize};

use crate::source::strip_comments;

/// Kind of a template parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParamKind {
    /// `typename T` / `class T`
    Type,
    /// Non-type parameter such as `int N`
    Value,
    /// Template template parameter
    Template,
}

/// One template parameter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateParam {
    /// Parameter kind
    pub kind: ParamKind,
    /// Declared name, if any
    pub name: Option<String>,
    /// Whether the parameter is a pack (`typename... Ts`)
    pub pack: bool,
    /// Whether the parameter has a default argument
    pub has_default: bool,
}

/// A `__global__` function found in the source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelSignature {
    /// Function name, qualified by its enclosing named namespaces
    pub name: String,
    /// Template parameters, `None` for a non-template kernel
    pub template: Option<Vec<TemplateParam>>,
}

impl KernelSignature {
    /// Whether the kernel is a template
    #[must_use]
    pub fn is_template(&self) -> bool {
        self.template.is_some()
    }

    /// Fewest template arguments that can be supplied
    #[must_use]
    pub fn min_args(&self) -> usize {
        self.template.as_ref().map_or(0, |params| {
            params.iter().filter(|p| !p.pack && !p.has_default).count()
        })
    }

    /// Most template arguments that can be supplied (`None` if unbounded)
    #[must_use]
    pub fn max_args(&self) -> Option<usize> {
        match &self.template {
            None => Some(0),
            Some(params) if params.iter().any(|p| p.pack) => None,
            Some(params) => Some(params.len()),
        }
    }

    /// Parameter that receives the argument at `position`
    #[must_use]
    pub fn param_for(&self, position: usize) -> Option<&TemplateParam> {
        let params = self.template.as_ref()?;
        params
            .get(position)
            .or_else(|| params.last().filter(|p| p.pack))
    }
}

/// What a template argument string evidently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgKind {
    /// Clearly a type (builtin type name or pointer/reference type)
    Type,
    /// Clearly a value (numeric, boolean or character literal)
    Value,
    /// Could be either (user type, constant expression, ...)
    Unknown,
}

const BUILTIN_TYPES: &[&str] = &[
    "void", "bool", "char", "short", "int", "long", "float", "double", "unsigned", "signed",
    "size_t", "ptrdiff_t", "int8_t", "int16_t", "int32_t", "int64_t", "uint8_t", "uint16_t",
    "uint32_t", "uint64_t", "half", "__half", "__nv_bfloat16", "float2", "float3", "float4",
    "double2", "int2", "int3", "int4", "uint2", "uint3", "uint4", "char4", "uchar4",
];

/// Classify a template argument by its spelling
#[must_use]
pub fn classify_argument(arg: &str) -> ArgKind {
    let arg = arg.trim();
    let unsigned = arg.strip_prefix(['-', '+']).unwrap_or(arg);
    if unsigned.starts_with(|c: char| c.is_ascii_digit()) {
        return ArgKind::Value;
    }
    if matches!(arg, "true" | "false") || arg.starts_with('\'') {
        return ArgKind::Value;
    }
    if arg.ends_with('*') || arg.ends_with('&') {
        return ArgKind::Type;
    }
    let words: Vec<&str> = arg
        .split_whitespace()
        .filter(|w| !matches!(*w, "const" | "volatile"))
        .collect();
    if !words.is_empty() && words.iter().all(|w| BUILTIN_TYPES.contains(w)) {
        return ArgKind::Type;
    }
    ArgKind::Unknown
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Punct(char),
    Literal,
}

impl Token {
    fn is_punct(&self, c: char) -> bool {
        matches!(self, Self::Punct(p) if *p == c)
    }

    fn ident(&self) -> Option<&str> {
        match self {
            Self::Ident(s) => Some(s.as_str()),
            _ => None,
        }
    }
}

fn tokenize(source: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    for line in strip_comments(source).lines() {
        if line.trim_start().starts_with('#') {
            continue;
        }
        let mut chars = line.chars().peekable();
        while let Some(c) = chars.next() {
            if c.is_whitespace() {
                continue;
            }
            if c.is_ascii_alphabetic() || c == '_' {
                let mut ident = String::from(c);
                while let Some(&n) = chars.peek() {
                    if n.is_ascii_alphanumeric() || n == '_' {
                        ident.push(n);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Ident(ident));
            } else if c.is_ascii_digit() {
                while chars
                    .peek()
                    .is_some_and(|n| n.is_ascii_alphanumeric() || *n == '.' || *n == '_')
                {
                    chars.next();
                }
                tokens.push(Token::Literal);
            } else if c == '"' || c == '\'' {
                while let Some(n) = chars.next() {
                    if n == '\\' {
                        chars.next();
                    } else if n == c {
                        break;
                    }
                }
                tokens.push(Token::Literal);
            } else {
                tokens.push(Token::Punct(c));
            }
        }
    }
    tokens
}

/// Qualifiers allowed between `template<...>` and `__global__`
const QUALIFIERS: &[&str] = &[
    "static",
    "inline",
    "__inline__",
    "__forceinline__",
    "__noinline__",
    "extern",
];

/// Read `namespace a::b {` starting at the `namespace` token; returns the
/// names (empty for an anonymous namespace) and the index after `{`
fn parse_namespace(tokens: &[Token], start: usize) -> Option<(Vec<String>, usize)> {
    let mut names = Vec::new();
    let mut i = start + 1;
    while let Some(token) = tokens.get(i) {
        match token {
            Token::Ident(word) if word != "inline" => names.push(word.clone()),
            Token::Ident(_) | Token::Punct(':') => {}
            Token::Punct('{') => return Some((names, i + 1)),
            _ => return None,
        }
        i += 1;
    }
    None
}

/// Find every `__global__` function in `source`
#[must_use]
pub fn scan_kernels(source: &str) -> Vec<KernelSignature> {
    let tokens = tokenize(source);
    let mut kernels = Vec::new();
    let mut pending: Option<Vec<TemplateParam>> = None;
    // One entry per open brace; namespace braces carry their names
    let mut scopes: Vec<Vec<String>> = Vec::new();
    let mut i = 0;

    while i < tokens.len() {
        match &tokens[i] {
            Token::Ident(word)
                if word == "template" && tokens.get(i + 1).is_some_and(|t| t.is_punct('<')) =>
            {
                let (params, next) = parse_template_params(&tokens, i + 1);
                pending = Some(params);
                i = next;
                continue;
            }
            Token::Ident(word) if word == "namespace" => {
                pending = None;
                if let Some((names, next)) = parse_namespace(&tokens, i) {
                    scopes.push(names);
                    i = next;
                    continue;
                }
            }
            Token::Ident(word) if word == "__global__" => {
                let template = pending.take();
                if let Some((name, next)) = parse_declarator(&tokens, i + 1) {
                    let mut path: Vec<&str> = scopes.iter().flatten().map(String::as_str).collect();
                    path.push(&name);
                    kernels.push(KernelSignature {
                        name: path.join("::"),
                        template,
                    });
                    i = next;
                    continue;
                }
            }
            Token::Punct('{') => {
                pending = None;
                scopes.push(Vec::new());
            }
            Token::Punct('}') => {
                pending = None;
                scopes.pop();
            }
            Token::Ident(word) if QUALIFIERS.contains(&word.as_str()) => {}
            // extern "C"
            Token::Literal if i > 0 && tokens[i - 1].ident() == Some("extern") => {}
            _ => pending = None,
        }
        i += 1;
    }
    kernels
}

/// Parse `<...>` starting at the `<` token; returns the params and the index after `>`
fn parse_template_params(tokens: &[Token], open: usize) -> (Vec<TemplateParam>, usize) {
    let mut angle = 0usize;
    let mut paren = 0usize;
    let mut current: Vec<Token> = Vec::new();
    let mut params = Vec::new();

    for (i, token) in tokens.iter().enumerate().skip(open) {
        match token {
            Token::Punct('(' | '[' | '{') => {
                paren += 1;
                current.push(token.clone());
            }
            Token::Punct(')' | ']' | '}') => {
                paren = paren.saturating_sub(1);
                current.push(token.clone());
            }
            Token::Punct('<') if paren == 0 => {
                angle += 1;
                if angle > 1 {
                    current.push(token.clone());
                }
            }
            Token::Punct('>') if paren == 0 => {
                angle = angle.saturating_sub(1);
                if angle == 0 {
                    params.extend(parse_param(&current));
                    return (params, i + 1);
                }
                current.push(token.clone());
            }
            Token::Punct(',') if angle == 1 && paren == 0 => {
                params.extend(parse_param(&current));
                current.clear();
            }
            _ => current.push(token.clone()),
        }
    }
    (params, tokens.len())
}

fn parse_param(tokens: &[Token]) -> Option<TemplateParam> {
    let first = tokens.first()?;
    let default_at = tokens.iter().position(|t| t.is_punct('='));
    let decl = &tokens[..default_at.unwrap_or(tokens.len())];
    let pack = decl.windows(3).any(|w| w.iter().all(|t| t.is_punct('.')));
    let kind = match first.ident() {
        Some("typename" | "class") => ParamKind::Type,
        Some("template") => ParamKind::Template,
        _ => ParamKind::Value,
    };
    let name = decl
        .iter()
        .rev()
        .find_map(Token::ident)
        .filter(|n| !matches!(*n, "typename" | "class"))
        .filter(|_| decl.len() > 1)
        .map(str::to_string);
    Some(TemplateParam {
        kind,
        name,
        pack,
        has_default: default_at.is_some(),
    })
}

/// Parse the declarator after `__global__`; returns the function name and the
/// index after its parameter list
fn parse_declarator(tokens: &[Token], start: usize) -> Option<(String, usize)> {
    let mut i = start;
    let mut last_ident: Option<&str> = None;
    while i < tokens.len() {
        match &tokens[i] {
            Token::Ident(word) => last_ident = Some(word.as_str()),
            Token::Punct('(') => {
                let close = matching_paren(tokens, i)?;
                if last_ident == Some("__launch_bounds__") {
                    last_ident = None;
                    i = close + 1;
                    continue;
                }
                return Some((last_ident?.to_string(), close + 1));
            }
            Token::Punct(';' | '{' | '}') => return None,
            _ => {}
        }
        i += 1;
    }
    None
}

fn matching_paren(tokens: &[Token], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (offset, token) in tokens[open..].iter().enumerate() {
        if token.is_punct('(') {
            depth += 1;
        } else if token.is_punct(')') {
            depth -= 1;
            if depth == 0 {
                return Some(open + offset);
            }
        }
    }
    None
}
