//! Resolved graph terms.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Server-side kind codes for triple parts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum TermKind {
    Unknown = 0,
    Anon = 1,
    Node = 2,
    Literal = 3,
    LiteralLang = 4,
    TypedLiteral = 5,
    Triple = 6,
    DefaultGraph = 7,
    EncodedString = 8,
    EncodedInteger = 9,
    EncodedFloat = 10,
}

impl TermKind {
    pub fn code(self) -> u8 { self as u8 }

    pub fn from_code(code: u8) -> Self {
        match code {
            1 => TermKind::Anon,
            2 => TermKind::Node,
            3 => TermKind::Literal,
            4 => TermKind::LiteralLang,
            5 => TermKind::TypedLiteral,
            6 => TermKind::Triple,
            7 => TermKind::DefaultGraph,
            8 => TermKind::EncodedString,
            9 => TermKind::EncodedInteger,
            10 => TermKind::EncodedFloat,
            _ => TermKind::Unknown,
        }
    }

    /// Name used by the server when it reports part types.
    pub fn name(self) -> &'static str {
        match self {
            TermKind::Unknown => "unknown",
            TermKind::Anon => "anon",
            TermKind::Node => "node",
            TermKind::Literal => "literal",
            TermKind::LiteralLang => "literal/lang",
            TermKind::TypedLiteral => "typed-literal",
            TermKind::Triple => "triple",
            TermKind::DefaultGraph => "default-graph",
            TermKind::EncodedString => "encoded-string",
            TermKind::EncodedInteger => "encoded-integer",
            TermKind::EncodedFloat => "encoded-float",
        }
    }
}

/// Payload of an encoded literal, kept in its wire text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "text")]
pub enum EncodedValue {
    String(String),
    Integer(String),
    Float(String),
}

impl EncodedValue {
    pub fn text(&self) -> &str {
        match self {
            EncodedValue::String(s) | EncodedValue::Integer(s) | EncodedValue::Float(s) => s,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            EncodedValue::Integer(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            EncodedValue::Float(s) | EncodedValue::Integer(s) => s.trim().parse().ok(),
            EncodedValue::String(_) => None,
        }
    }
}

/// A graph term as described by a def-string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Term {
    BlankNode { id: String },
    NamedNode { uri: String },
    Literal { label: String },
    LangLiteral { label: String, lang: String },
    TypedLiteral { label: String, datatype: String },
    DefaultGraph,
    Encoded { encoding: String, value: EncodedValue },
}

/// Value reported for the default-graph marker.
pub const DEFAULT_GRAPH_LABEL: &str = "default graph";

impl Term {
    pub fn blank(id: impl Into<String>) -> Self { Term::BlankNode { id: id.into() } }

    pub fn uri(uri: impl Into<String>) -> Self { Term::NamedNode { uri: uri.into() } }

    pub fn literal(label: impl Into<String>) -> Self { Term::Literal { label: label.into() } }

    pub fn lang(label: impl Into<String>, lang: impl Into<String>) -> Self {
        Term::LangLiteral { label: label.into(), lang: lang.into() }
    }

    pub fn typed(label: impl Into<String>, datatype: impl Into<String>) -> Self {
        Term::TypedLiteral { label: label.into(), datatype: datatype.into() }
    }

    pub fn kind(&self) -> TermKind {
        match self {
            Term::BlankNode { .. } => TermKind::Anon,
            Term::NamedNode { .. } => TermKind::Node,
            Term::Literal { .. } => TermKind::Literal,
            Term::LangLiteral { .. } => TermKind::LiteralLang,
            Term::TypedLiteral { .. } => TermKind::TypedLiteral,
            Term::DefaultGraph => TermKind::DefaultGraph,
            Term::Encoded { value: EncodedValue::String(_), .. } => TermKind::EncodedString,
            Term::Encoded { value: EncodedValue::Integer(_), .. } => TermKind::EncodedInteger,
            Term::Encoded { value: EncodedValue::Float(_), .. } => TermKind::EncodedFloat,
        }
    }

    /// The label, URI or blank-node id.
    pub fn value(&self) -> &str {
        match self {
            Term::BlankNode { id } => id,
            Term::NamedNode { uri } => uri,
            Term::Literal { label }
            | Term::LangLiteral { label, .. }
            | Term::TypedLiteral { label, .. } => label,
            Term::DefaultGraph => DEFAULT_GRAPH_LABEL,
            Term::Encoded { value, .. } => value.text(),
        }
    }

    /// Language tag, datatype URI or encoding name.
    pub fn modifier(&self) -> Option<&str> {
        match self {
            Term::LangLiteral { lang, .. } => Some(lang),
            Term::TypedLiteral { datatype, .. } => Some(datatype),
            Term::Encoded { encoding, .. } => Some(encoding),
            _ => None,
        }
    }

    pub fn is_literal(&self) -> bool {
        matches!(
            self,
            Term::Literal { .. } | Term::LangLiteral { .. } | Term::TypedLiteral { .. } | Term::Encoded { .. }
        )
    }

    pub fn is_resource(&self) -> bool {
        matches!(self, Term::NamedNode { .. } | Term::BlankNode { .. })
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Term::BlankNode { id } => write!(f, "_:blank{id}"),
            Term::NamedNode { uri } => write!(f, "<{uri}>"),
            Term::Literal { label } => write!(f, "\"{}\"", escape(label)),
            Term::LangLiteral { label, lang } => write!(f, "\"{}\"@{lang}", escape(label)),
            Term::TypedLiteral { label, datatype } => {
                write!(f, "\"{}\"^^<{datatype}>", escape(label))
            }
            Term::DefaultGraph => write!(f, "<{DEFAULT_GRAPH_LABEL}>"),
            Term::Encoded { encoding, value } => {
                write!(f, "\"{}\"^^{encoding}", escape(value.text()))
            }
        }
    }
}

fn escape(s: &str) -> String { s.replace('\\', "\\\\").replace('"', "\\\"") }
