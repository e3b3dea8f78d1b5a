//! Entry naming on ingest and output-file naming on extract.
//!
//! # Entry names
//! [`EntryNamer`] hands out names per base.  A base that yields a single
//! entry in the invocation keeps its bare name; otherwise every entry gets a
//! `{base}.{index}` suffix from a counter shared across all inputs with that
//! base, zero-padded to the width of the largest index.
//!
//! # Templates
//! [`Template`] is a small `{field}` language:
//!
//! | syntax      | meaning                                   |
//! |-------------|-------------------------------------------|
//! | `{field}`   | value of `field`                          |
//! | `{field:4}` | padded to 4 characters                    |
//! | `{field:04}`| left-padded with zeros to 4 characters    |
//! | `{{` `}}`   | literal braces                            |
//!
//! Built-in fields are `entry`, `channel` (index of the channel within its
//! entry), `channel_name` and `index` (running output counter).  Any other
//! field is looked up in the channel attributes, then the entry attributes.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

use crate::data::Attributes;
use crate::error::{ArfxError, Result};

/// Output template used by extract when no `-n` is given.
pub const DEFAULT_TEMPLATE: &str = "{entry}_{channel_name}.wav";

// ── Template ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
enum Part {
    Literal(String),
    Field { name: String, width: usize, zero: bool },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    source: String,
    parts:  Vec<Part>,
}

impl Template {
    pub fn parse(source: &str) -> Result<Self> {
        let err = |field: &str| ArfxError::TemplateResolution {
            template: source.to_owned(),
            field:    field.to_owned(),
        };

        let mut parts = Vec::new();
        let mut literal = String::new();
        let mut chars = source.chars().peekable();
        while let Some(c) = chars.next() {
            match c {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    literal.push('{');
                }
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    literal.push('}');
                }
                '}' => return Err(err("}")),
                '{' => {
                    let mut spec = String::new();
                    loop {
                        match chars.next() {
                            Some('}') => break,
                            Some('{') | None => return Err(err(&spec)),
                            Some(ch) => spec.push(ch),
                        }
                    }
                    if !literal.is_empty() {
                        parts.push(Part::Literal(std::mem::take(&mut literal)));
                    }
                    let (name, format) = match spec.split_once(':') {
                        Some((n, f)) => (n, Some(f)),
                        None         => (spec.as_str(), None),
                    };
                    let name = name.trim();
                    if name.is_empty() {
                        return Err(err(&spec));
                    }
                    let (width, zero) = match format {
                        None => (0, false),
                        Some(f) => {
                            let zero = f.starts_with('0') && f.len() > 1;
                            let width = f.parse::<usize>().map_err(|_| err(&spec))?;
                            (width, zero)
                        }
                    };
                    parts.push(Part::Field { name: name.to_owned(), width, zero });
                }
                other => literal.push(other),
            }
        }
        if !literal.is_empty() {
            parts.push(Part::Literal(literal));
        }
        Ok(Self { source: source.to_owned(), parts })
    }

    pub fn as_str(&self) -> &str { &self.source }

    /// Names of the fields referenced by the template, in order.
    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.parts.iter().filter_map(|p| match p {
            Part::Field { name, .. } => Some(name.as_str()),
            Part::Literal(_)         => None,
        })
    }

    /// Substitute every field.  An unknown field is an error, never a blank.
    pub fn resolve(&self, ctx: &NameContext<'_>) -> Result<String> {
        let mut out = String::with_capacity(self.source.len() + 16);
        for part in &self.parts {
            match part {
                Part::Literal(s) => out.push_str(s),
                Part::Field { name, width, zero } => {
                    let value = ctx.lookup(name).ok_or_else(|| ArfxError::TemplateResolution {
                        template: self.source.clone(),
                        field:    name.clone(),
                    })?;
                    pad_into(&mut out, &value, *width, *zero);
                }
            }
        }
        Ok(out)
    }
}

impl FromStr for Template {
    type Err = ArfxError;
    fn from_str(s: &str) -> Result<Self> { Self::parse(s) }
}

impl fmt::Display for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

fn pad_into(out: &mut String, value: &str, width: usize, zero: bool) {
    let len = value.chars().count();
    if len >= width {
        out.push_str(value);
        return;
    }
    let fill = width - len;
    if zero {
        // Keep a leading sign in front of the zeros.
        let (sign, digits) = match value.strip_prefix('-') {
            Some(rest) => ("-", rest),
            None       => ("", value),
        };
        out.push_str(sign);
        out.extend(std::iter::repeat('0').take(fill));
        out.push_str(digits);
    } else if value.parse::<f64>().is_ok() {
        out.extend(std::iter::repeat(' ').take(fill));
        out.push_str(value);
    } else {
        out.push_str(value);
        out.extend(std::iter::repeat(' ').take(fill));
    }
}

/// Values available to a template for one (entry, channel) pair.
#[derive(Debug, Clone, Copy)]
pub struct NameContext<'a> {
    pub entry:         &'a str,
    pub channel:       usize,
    pub channel_name:  &'a str,
    pub index:         usize,
    pub channel_attrs: &'a Attributes,
    pub entry_attrs:   &'a Attributes,
}

impl NameContext<'_> {
    fn lookup(&self, field: &str) -> Option<String> {
        match field {
            "entry"        => Some(self.entry.to_owned()),
            "channel"      => Some(self.channel.to_string()),
            "channel_name" => Some(self.channel_name.to_owned()),
            "index"        => Some(self.index.to_string()),
            _ => self
                .channel_attrs
                .get(field)
                .or_else(|| self.entry_attrs.get(field))
                .map(|v| v.to_string()),
        }
    }
}

// ── Entry naming ─────────────────────────────────────────────────────────────

#[derive(Debug, Default, Clone)]
struct Counter {
    /// First index handed out in this invocation.
    start:   usize,
    next:    usize,
    planned: usize,
}

impl Counter {
    fn numbered(&self) -> bool {
        self.start > 0 || self.planned != 1
    }

    fn width(&self) -> usize {
        let last = (self.start + self.planned).saturating_sub(1).max(self.next);
        digits(last)
    }
}

fn digits(n: usize) -> usize {
    n.checked_ilog10().map_or(1, |d| d as usize + 1)
}

/// Allocates entry names for one ingest invocation.
///
/// Call [`plan`](Self::plan) for every input before the first
/// [`next_name`](Self::next_name) so the single-entry rule and the padding
/// width account for the whole invocation.
///
/// Names never repeat within one namer: a candidate already handed out, or a
/// numbered candidate that exists in the container, moves on to the next
/// free suffix.
#[derive(Debug, Default, Clone)]
pub struct EntryNamer {
    counters: HashMap<String, Counter>,
    issued:   HashSet<String>,
    existing: HashSet<String>,
}

impl EntryNamer {
    pub fn new() -> Self { Self::default() }

    /// Continue numbering after the highest `{base}.{n}` among `existing`.
    pub fn seed_existing<'a, I: IntoIterator<Item = &'a str>>(&mut self, existing: I) {
        for name in existing {
            self.existing.insert(name.to_owned());
            let Some((base, suffix)) = name.rsplit_once('.') else { continue };
            if suffix.is_empty() || !suffix.bytes().all(|b| b.is_ascii_digit()) {
                continue;
            }
            let Ok(n) = suffix.parse::<usize>() else { continue };
            let counter = self.counters.entry(base.to_owned()).or_default();
            counter.start = counter.start.max(n + 1);
            counter.next = counter.start;
        }
    }

    /// Declare that `base` will yield `count` more entries.
    pub fn plan(&mut self, base: &str, count: usize) {
        self.counters.entry(base.to_owned()).or_default().planned += count;
    }

    /// Next name for `base`.
    ///
    /// A bare `{base}` that already exists in the container is returned as
    /// is, so append mode can extend that entry.
    pub fn next_name(&mut self, base: &str) -> String {
        let counter = self.counters.entry(base.to_owned()).or_default();
        if !counter.numbered() && !self.issued.contains(base) {
            counter.next += 1;
            self.issued.insert(base.to_owned());
            return base.to_owned();
        }
        let width = counter.width();
        loop {
            let name = format!("{base}.{:0width$}", counter.next);
            counter.next += 1;
            if !self.existing.contains(&name) && self.issued.insert(name.clone()) {
                return name;
            }
        }
    }
}
