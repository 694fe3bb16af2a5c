//! Header normalisation.
//!
//! Every raw header is reduced to a handful of comparison forms once, up
//! front, so the search loop only does string equality.

use std::sync::OnceLock;

use regex::Regex;

static DUPLICATE_SUFFIX: OnceLock<Regex> = OnceLock::new();
static LEADING_ORDINAL: OnceLock<Regex> = OnceLock::new();
static NON_LETTERS: OnceLock<Regex> = OnceLock::new();

fn duplicate_suffix() -> &'static Regex {
    DUPLICATE_SUFFIX.get_or_init(|| Regex::new(r"\s*\(\d+\)$").expect("valid regex"))
}

fn leading_ordinal() -> &'static Regex {
    LEADING_ORDINAL
        .get_or_init(|| Regex::new(r"^(\d+(?:st|nd|rd|th))\s+(.+)$").expect("valid regex"))
}

fn non_letters() -> &'static Regex {
    NON_LETTERS.get_or_init(|| Regex::new(r"[^a-z\s]+").expect("valid regex"))
}

fn collapse_whitespace(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Comparison forms of a schema-side name (a label, field name, synonym, or
/// table name).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameForms {
    /// Lowercase with whitespace collapsed; digits and punctuation kept.
    pub lowercase: String,
    /// `lowercase` without spaces.
    pub joined: String,
    /// Letters only, single spaces between words.
    pub stripped: String,
    /// `stripped` without spaces.
    pub compact: String,
}

impl NameForms {
    pub fn new(raw: &str) -> Self {
        Self::from_lowercase(collapse_whitespace(&raw.to_lowercase()))
    }

    fn from_lowercase(lowercase: String) -> Self {
        let joined = lowercase.replace(' ', "");
        let stripped = collapse_whitespace(&non_letters().replace_all(&lowercase, " "));
        let compact = stripped.replace(' ', "");
        Self {
            lowercase,
            joined,
            stripped,
            compact,
        }
    }
}

/// A spreadsheet header prepared for matching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderForms {
    pub original: String,
    pub forms: NameForms,
    /// Digits carry meaning (`Latitude 2`, `Collector 2 Last Name`), so the
    /// letters-only forms are only consulted when there are none.
    pub has_digits: bool,
}

impl HeaderForms {
    /// Lowercases, collapses whitespace, drops a trailing duplicate marker
    /// such as `(2)`, and moves a leading ordinal behind the rest of the
    /// header (`1st Name` becomes `name 1st`).
    pub fn new(original: &str) -> Self {
        let mut lowercase = collapse_whitespace(&original.to_lowercase());
        lowercase = duplicate_suffix().replace(&lowercase, "").into_owned();
        if let Some(captures) = leading_ordinal().captures(&lowercase) {
            lowercase = format!("{} {}", &captures[2], &captures[1]);
        }
        let forms = NameForms::from_lowercase(lowercase);
        Self {
            original: original.to_string(),
            has_digits: forms.lowercase.chars().any(|ch| ch.is_ascii_digit()),
            forms,
        }
    }

    pub fn lowercase(&self) -> &str {
        &self.forms.lowercase
    }

    /// Whether the header names `candidate` outright.
    pub fn matches_name(&self, candidate: &NameForms) -> bool {
        if candidate.lowercase.is_empty() {
            return false;
        }
        if self.forms.lowercase == candidate.lowercase || self.forms.joined == candidate.joined {
            return true;
        }
        !self.has_digits
            && !self.forms.stripped.is_empty()
            && (self.forms.stripped == candidate.stripped
                || self.forms.compact == candidate.compact)
    }

    /// Matches `<prefix> [n] <name>` such as `Collector 2 Last Name` or
    /// `Species Author`. Returns the embedded number, if any.
    pub fn compound_match(&self, prefixes: &[NameForms], names: &[NameForms]) -> Option<Option<usize>> {
        let header = self.forms.lowercase.as_str();
        for prefix in prefixes {
            let Some(rest) = header.strip_prefix(prefix.lowercase.as_str()) else {
                continue;
            };
            if prefix.lowercase.is_empty()
                || !rest.starts_with(|ch: char| ch == ' ' || ch.is_ascii_digit())
            {
                continue;
            }
            let rest = rest.trim_start();
            let digits_end = rest
                .find(|ch: char| !ch.is_ascii_digit())
                .unwrap_or(rest.len());
            let index = rest[..digits_end].parse::<usize>().ok();
            let tail = rest[digits_end..].trim_start();
            if tail.is_empty() {
                continue;
            }
            if names.iter().any(|name| name.lowercase == tail) {
                return Some(index.filter(|index| *index > 0));
            }
        }
        None
    }
}
