//! Extraction of numeric declarations from legacy Earth Engine scripts.
//!
//! The scripts embed trained model parameters as JavaScript literals:
//!
//! ```text
//! var mx_Cw = ee.Image([0.05, 0.08, 0.11]);
//! var X_train_Cw = ee.Array([[0.1, 0.2, 0.3], [0.4, 0.5, 0.6],]).multiply(1.0e-04);
//! ```
//!
//! Only literals are ever evaluated: the cleaned value text goes through a
//! JSON parser, never through a script engine.

use std::collections::BTreeMap;
use std::fmt;

use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;
use tracing::debug;

lazy_static! {
    static ref MULTIPLY_SUFFIX: Regex = Regex::new(r"\.multiply\(\s*([^()]*?)\s*\)\s*$").unwrap();
    static ref WRAPPER_OPEN: Regex = Regex::new(r"ee\.(?:Array|Image)\s*\(").unwrap();
    static ref TRAILING_CLOSE: Regex = Regex::new(r"\)\s*;?\s*$").unwrap();
    static ref TRAILING_SEPARATOR: Regex = Regex::new(r",\s*\]").unwrap();
    static ref FIRST_BRACKETED: Regex = Regex::new(r"(?s)\[.*\]").unwrap();

    // JS number spellings that JSON rejects: `+1`, `.5`, `5.`
    static ref EXPLICIT_PLUS: Regex = Regex::new(r"(^|[\[,(\s])\+(\d|\.\d)").unwrap();
    static ref BARE_FRACTION: Regex = Regex::new(r"(^|[\[,(\s\-])\.(\d)").unwrap();
    static ref BARE_POINT: Regex = Regex::new(r"(\d)\.([eE,\]\s)]|$)").unwrap();
}

/// A `<name> = <value>;` declaration located in the source text.
#[derive(Debug, Clone, PartialEq)]
pub struct RawDeclaration {
    pub name: String,
    /// Value text with any trailing `.multiply(..)` removed.
    pub value_text: String,
    /// Argument of a trailing `.multiply(..)`, if there was one.
    pub multiplier_text: Option<String>,
}

/// A parsed literal. Numbers and lists carry the model data; anything else
/// (strings, booleans, null) is kept as-is.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Number(f64),
    List(Vec<Literal>),
    Other(Value),
}

/// Why a declaration could not be turned into a literal.
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub raw: String,
    pub error: String,
}

/// Outcome of parsing a single declaration.
pub type ParsedValue = Result<Literal, Diagnostic>;

impl Diagnostic {
    fn new(raw: &str, error: impl Into<String>) -> Self {
        Self {
            raw: raw.to_string(),
            error: error.into(),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let preview: String = self.raw.chars().take(60).collect();
        write!(f, "{} (near `{}`)", self.error, preview)
    }
}

impl Literal {
    /// Multiply every numeric leaf by `factor`, leaving other leaves alone.
    pub fn scaled(self, factor: f64) -> Self {
        match self {
            Literal::Number(x) => Literal::Number(x * factor),
            Literal::List(items) => {
                Literal::List(items.into_iter().map(|item| item.scaled(factor)).collect())
            }
            other => other,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Literal::Number(x) => Some(*x),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Literal]> {
        match self {
            Literal::List(items) => Some(items),
            _ => None,
        }
    }
}

impl From<Value> for Literal {
    fn from(value: Value) -> Self {
        match value {
            Value::Number(n) => match n.as_f64() {
                Some(x) => Literal::Number(x),
                None => Literal::Other(Value::Number(n)),
            },
            Value::Array(items) => Literal::List(items.into_iter().map(Literal::from).collect()),
            other => Literal::Other(other),
        }
    }
}

impl RawDeclaration {
    /// The multiplication factor, 1.0 when no `.multiply(..)` was present.
    pub fn multiplier(&self) -> Result<f64, String> {
        match &self.multiplier_text {
            None => Ok(1.0),
            Some(text) => text
                .trim()
                .parse::<f64>()
                .map_err(|e| format!("invalid multiply factor `{}`: {}", text, e)),
        }
    }

    /// Clean and parse the value text, then apply the multiplier.
    pub fn evaluate(&self) -> ParsedValue {
        let multiplier = self
            .multiplier()
            .map_err(|e| Diagnostic::new(&self.value_text, e))?;

        let cleaned = clean_value_text(&self.value_text);
        let literal = parse_literal(&cleaned)
            .or_else(|err| match FIRST_BRACKETED.find(&cleaned) {
                Some(m) => parse_literal(m.as_str()),
                None => Err(err),
            })
            .map_err(|e| Diagnostic::new(&cleaned, e))?;

        Ok(literal.scaled(multiplier))
    }
}

/// Locate the first declaration of `name`. `var <name> = ...;` wins over a
/// bare assignment elsewhere in the text.
pub fn find_declaration(text: &str, name: &str) -> Option<RawDeclaration> {
    let escaped = regex::escape(name);
    let patterns = [
        format!(r"\bvar\s+{}\s*=\s*([\s\S]*?);", escaped),
        format!(r"\b{}\s*=\s*([\s\S]*?);", escaped),
    ];

    let raw = patterns.iter().find_map(|pattern| {
        let re = Regex::new(pattern).ok()?;
        re.captures(text)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().trim().to_string())
    })?;

    let (value_text, multiplier_text) = match MULTIPLY_SUFFIX.captures(&raw) {
        Some(caps) => {
            let start = caps.get(0).map_or(raw.len(), |m| m.start());
            let factor = caps.get(1).map(|m| m.as_str().to_string());
            (raw[..start].trim_end().to_string(), factor)
        }
        None => (raw, None),
    };

    Some(RawDeclaration {
        name: name.to_string(),
        value_text,
        multiplier_text,
    })
}

/// Parse every target that is declared in `text`. Targets without a
/// declaration are absent from the result; malformed ones map to a
/// [`Diagnostic`] without affecting the others.
pub fn parse_declarations<I, S>(text: &str, targets: I) -> BTreeMap<String, ParsedValue>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut values = BTreeMap::new();
    for target in targets {
        let name = target.as_ref();
        let Some(declaration) = find_declaration(text, name) else {
            debug!(name, "declaration not found");
            continue;
        };
        let parsed = declaration.evaluate();
        if let Err(diag) = &parsed {
            debug!(name, error = %diag.error, "declaration could not be parsed");
        }
        values.insert(name.to_string(), parsed);
    }
    values
}

/// Remove constructor wrappers, the statement terminator and JS trailing
/// commas so that only the literal remains.
fn clean_value_text(value_text: &str) -> String {
    let wrappers = WRAPPER_OPEN.find_iter(value_text).count();
    let mut text = WRAPPER_OPEN.replace_all(value_text, "").trim().to_string();

    if wrappers > 0 {
        for _ in 0..wrappers {
            text = TRAILING_CLOSE.replace(&text, "").into_owned();
        }
    } else {
        text = text.trim_end_matches(';').trim_end().to_string();
    }

    TRAILING_SEPARATOR.replace_all(&text, "]").into_owned()
}

fn normalize_numbers(text: &str) -> String {
    let text = EXPLICIT_PLUS.replace_all(text, "${1}${2}");
    let text = BARE_FRACTION.replace_all(&text, "${1}0.${2}");
    BARE_POINT.replace_all(&text, "${1}.0${2}").into_owned()
}

fn parse_literal(text: &str) -> Result<Literal, String> {
    serde_json::from_str::<Value>(&normalize_numbers(text))
        .map(Literal::from)
        .map_err(|e| e.to_string())
}
