//! Tag selection
//!
//! Decides which upstream tags get mirrored, given shell-style include and
//! exclude patterns. `*` matches any run of characters (including `/`),
//! `?` matches a single character.

use glob::Pattern;
use std::collections::BTreeSet;

/// Separator between patterns in an encoded repository tag value
pub const PATTERN_SEPARATOR: char = '/';

/// Stand-in for `*`, which ECR tag values cannot contain
pub const WILDCARD_ESCAPE: char = '+';

/// A single compiled tag pattern
#[derive(Debug, Clone)]
enum TagPattern {
    Glob(Pattern),
    /// Patterns glob cannot parse (e.g. an unclosed `[`) only match themselves
    Literal(String),
}

impl TagPattern {
    fn new(raw: &str) -> Self {
        match Pattern::new(&collapse_stars(raw)) {
            Ok(pattern) => TagPattern::Glob(pattern),
            Err(e) => {
                tracing::debug!("Treating tag pattern {:?} literally: {}", raw, e);
                TagPattern::Literal(raw.to_string())
            }
        }
    }

    fn matches(&self, tag: &str) -> bool {
        match self {
            TagPattern::Glob(pattern) => pattern.matches(tag),
            TagPattern::Literal(literal) => literal == tag,
        }
    }
}

/// Fold runs of `*` into one
///
/// glob rejects `**` unless it is a whole path component. Since `*` already
/// crosses `/` here, a run of stars means the same as a single one.
fn collapse_stars(raw: &str) -> String {
    let mut collapsed = String::with_capacity(raw.len());
    for c in raw.chars() {
        if c == '*' && collapsed.ends_with('*') {
            continue;
        }
        collapsed.push(c);
    }
    collapsed
}

/// Compiled include/exclude pattern sets
#[derive(Debug, Clone)]
pub struct TagFilter {
    include: Vec<TagPattern>,
    exclude: Vec<TagPattern>,
}

impl TagFilter {
    pub fn new<S: AsRef<str>>(include: &[S], exclude: &[S]) -> Self {
        Self {
            include: include.iter().map(|p| TagPattern::new(p.as_ref())).collect(),
            exclude: exclude.iter().map(|p| TagPattern::new(p.as_ref())).collect(),
        }
    }

    /// Exclusion always wins; no include patterns means "everything else"
    pub fn is_selected(&self, tag: &str) -> bool {
        if self.exclude.iter().any(|p| p.matches(tag)) {
            return false;
        }

        self.include.is_empty() || self.include.iter().any(|p| p.matches(tag))
    }
}

/// Select the tags to mirror from an upstream tag listing
pub fn select<T, S>(all_tags: &[T], include: &[S], exclude: &[S]) -> BTreeSet<String>
where
    T: AsRef<str>,
    S: AsRef<str>,
{
    let filter = TagFilter::new(include, exclude);

    all_tags
        .iter()
        .map(AsRef::as_ref)
        .filter(|tag| filter.is_selected(tag))
        .map(str::to_string)
        .collect()
}

/// Decode a repository tag value such as `v1.+/v2.+` into glob patterns
///
/// An absent or blank value decodes to no patterns. Empty segments are dropped.
pub fn decode_patterns(value: Option<&str>) -> Vec<String> {
    value
        .map(|value| {
            value
                .replace(WILDCARD_ESCAPE, "*")
                .split(PATTERN_SEPARATOR)
                .map(str::trim)
                .filter(|pattern| !pattern.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}
