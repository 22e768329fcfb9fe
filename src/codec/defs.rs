//! Def-strings: the compact text form the server uses to describe a term.
//!
//! ```text
//! %P                 padding, describes no slot
//! %B<id>             blank node
//! %N<uri>            named node
//! %L<label>          plain literal
//! %G<n>X<lang><label>       language literal, n = base-50 length of lang
//! %T<n>X<label><datatype>   typed literal, n = base-50 length of label
//! %M<k>X<suffix>     named node: URI of def k followed by suffix
//! %XD                default graph
//! %E<enc>;<S|N|D><value>    encoded string / integer / float
//! ```
//!
//! Tags match case-insensitively.

use crate::model::{EncodedValue, Term};
use crate::{Error, Result};

use super::base50;

/// Shortest URI worth sharing as a `%M` prefix.
const MIN_SHARED_PREFIX: usize = 8;

fn malformed(def: &str, message: impl Into<String>) -> Error {
    Error::Decode { input: def.to_owned(), message: message.into() }
}

/// Uppercased tag character, after checking the `%` lead-in.
fn tag_of(def: &str) -> Result<char> {
    let mut chars = def.chars();
    match (chars.next(), chars.next()) {
        (Some('%'), Some(tag)) => Ok(tag.to_ascii_uppercase()),
        _ => Err(malformed(def, "def must start with '%' and a tag")),
    }
}

/// True for `%P` padding entries.
pub fn is_pass(def: &str) -> bool { matches!(tag_of(def), Ok('P')) }

/// Split `d` characters off `def` at byte offset `at`.
fn take_chars<'a>(def: &'a str, at: usize, d: usize) -> Result<(&'a str, &'a str)> {
    let tail = &def[at..];
    let split = match tail.char_indices().nth(d) {
        Some((i, _)) => i,
        None if tail.chars().count() == d => tail.len(),
        None => return Err(malformed(def, format!("length {d} runs past the end"))),
    };
    Ok(tail.split_at(split))
}

/// Decode `defs[index]` into a term.
///
/// `%M` entries may refer to earlier entries of the same array, which is
/// why the whole array is passed.
pub fn decode_def(defs: &[String], index: usize) -> Result<Term> {
    let def = defs
        .get(index)
        .ok_or_else(|| Error::Decode {
            input: String::new(),
            message: format!("def index {index} out of range ({} defs)", defs.len()),
        })?
        .as_str();

    match tag_of(def)? {
        'P' => Err(malformed(def, "padding entry describes no term")),
        'B' => Ok(Term::BlankNode { id: def[2..].to_owned() }),
        'N' => Ok(Term::NamedNode { uri: def[2..].to_owned() }),
        'L' => Ok(Term::Literal { label: def[2..].to_owned() }),
        'G' => {
            let (d, at) = base50::parse_run(def, 2)?;
            let (lang, label) = take_chars(def, at, d)?;
            Ok(Term::LangLiteral { label: label.to_owned(), lang: lang.to_owned() })
        }
        'T' => {
            let (d, at) = base50::parse_run(def, 2)?;
            let (label, datatype) = take_chars(def, at, d)?;
            Ok(Term::TypedLiteral { label: label.to_owned(), datatype: datatype.to_owned() })
        }
        'M' => Ok(Term::NamedNode { uri: prefixed_uri(defs, index)? }),
        'X' if def.get(2..3).is_some_and(|c| c.eq_ignore_ascii_case("D")) => Ok(Term::DefaultGraph),
        'E' => decode_encoded(def),
        _ => Err(malformed(def, "unknown def tag")),
    }
}

/// URI of a `%M` entry: walk back to its `%N` root, then append the suffixes.
fn prefixed_uri(defs: &[String], index: usize) -> Result<String> {
    let mut suffixes: Vec<&str> = Vec::new();
    let mut at_index = index;
    loop {
        let def = defs[at_index].as_str();
        match tag_of(def)? {
            'N' => {
                let mut uri = def[2..].to_owned();
                uri.extend(suffixes.iter().rev().copied());
                return Ok(uri);
            }
            'M' => {
                let (source, at) = base50::parse_run(def, 2)?;
                if source >= at_index {
                    return Err(malformed(def, format!("prefix def {source} is not earlier than {at_index}")));
                }
                suffixes.push(&def[at..]);
                at_index = source;
            }
            _ => return Err(malformed(def, "prefix source is not a named node")),
        }
    }
}

fn decode_encoded(def: &str) -> Result<Term> {
    let br = match def[2..].find(';') {
        Some(i) if i >= 2 => i + 2,
        _ => return Err(malformed(def, "encoding name missing or shorter than two characters")),
    };
    let encoding = def[2..br].to_owned();
    let kind = def[br + 1..]
        .chars()
        .next()
        .ok_or_else(|| malformed(def, "encoded payload kind missing"))?;
    let text = def[br + 1 + kind.len_utf8()..].to_owned();
    let value = match kind.to_ascii_uppercase() {
        'S' => EncodedValue::String(text),
        'N' => EncodedValue::Integer(text),
        'D' => EncodedValue::Float(text),
        _ => return Err(malformed(def, format!("unknown encoded payload kind '{kind}'"))),
    };
    Ok(Term::Encoded { encoding, value })
}

/// Decode every non-padding entry, in order.
pub fn decode_all(defs: &[String]) -> Result<Vec<Term>> {
    (0..defs.len())
        .filter(|&i| !is_pass(&defs[i]))
        .map(|i| decode_def(defs, i))
        .collect()
}

// ============================================================================
// Reference encoder
// ============================================================================

/// Builds a def array the way the server does, sharing URI prefixes
/// through `%M` entries when enabled.
#[derive(Debug, Default)]
pub struct DefEncoder {
    defs: Vec<String>,
    /// (def index, uri) of every `%N` entry so far.
    named: Vec<(usize, String)>,
    share_prefixes: bool,
}

impl DefEncoder {
    pub fn new() -> Self { Self::default() }

    pub fn with_prefix_sharing() -> Self { Self { share_prefixes: true, ..Self::default() } }

    pub fn len(&self) -> usize { self.defs.len() }

    pub fn is_empty(&self) -> bool { self.defs.is_empty() }

    /// Append a `%P` padding entry.
    pub fn push_pass(&mut self) { self.defs.push("%P".into()); }

    /// Append the def for `term`, returning its index.
    pub fn push(&mut self, term: &Term) -> Result<usize> {
        let index = self.defs.len();
        let def = match term {
            Term::NamedNode { uri } => {
                match self.shared_prefix(uri) {
                    Some((source, len)) => format!("%M{}{}", base50::encode_run(source), &uri[len..]),
                    None => {
                        self.named.push((index, uri.clone()));
                        format!("%N{uri}")
                    }
                }
            }
            other => encode_def(other)?,
        };
        self.defs.push(def);
        Ok(index)
    }

    fn shared_prefix(&self, uri: &str) -> Option<(usize, usize)> {
        if !self.share_prefixes {
            return None;
        }
        self.named
            .iter()
            .filter(|(_, p)| p.len() >= MIN_SHARED_PREFIX && p.len() < uri.len() && uri.starts_with(p.as_str()))
            .max_by_key(|(_, p)| p.len())
            .map(|(i, p)| (*i, p.len()))
    }

    pub fn finish(self) -> Vec<String> { self.defs }
}

/// Encode a single term without prefix sharing.
pub fn encode_def(term: &Term) -> Result<String> {
    Ok(match term {
        Term::BlankNode { id } => format!("%B{id}"),
        Term::NamedNode { uri } => format!("%N{uri}"),
        Term::Literal { label } => format!("%L{label}"),
        Term::LangLiteral { label, lang } => {
            format!("%G{}{lang}{label}", base50::encode_run(lang.chars().count()))
        }
        Term::TypedLiteral { label, datatype } => {
            format!("%T{}{label}{datatype}", base50::encode_run(label.chars().count()))
        }
        Term::DefaultGraph => "%XD".into(),
        Term::Encoded { encoding, value } => {
            if encoding.chars().count() < 2 || encoding.contains(';') {
                return Err(Error::Encode(format!(
                    "encoding name {encoding:?} must have two or more characters and no ';'"
                )));
            }
            let kind = match value {
                EncodedValue::String(_) => 'S',
                EncodedValue::Integer(_) => 'N',
                EncodedValue::Float(_) => 'D',
            };
            format!("%E{encoding};{kind}{}", value.text())
        }
    })
}
