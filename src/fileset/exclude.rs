//! Compiled exclude patterns for the fileset walker.
//!
//! Patterns are gitignore-flavored globs, evaluated *in declaration order*
//! with last-match-wins semantics: a later pattern can re-include a path an
//! earlier one excluded by prefixing it with `!`. `*` does not cross a path
//! separator; `**` does. Patterns are compiled once per [`crate::manifest::Fileset`],
//! not per file, so a walk over many files reuses one matcher instead of
//! rebuilding filters per entry.

use crate::errors::{Error, Result};
use globset::{Glob, GlobBuilder, GlobMatcher};

struct Rule {
    matcher: GlobMatcher,
    negate: bool,
}

/// A compiled, ordered set of exclude/include glob rules.
pub struct ExcludeMatcher {
    rules: Vec<Rule>,
}

impl ExcludeMatcher {
    /// Compile the patterns declared on a fileset. Compilation failures are
    /// `InvalidInput`: a bad pattern is a manifest error, not a runtime one.
    pub fn compile(patterns: &[String]) -> Result<Self> {
        let mut rules = Vec::with_capacity(patterns.len());
        for raw in patterns {
            let (negate, pattern) = match raw.strip_prefix('!') {
                Some(rest) => (true, rest),
                None => (false, raw.as_str()),
            };
            let glob = GlobBuilder::new(pattern)
                .literal_separator(true)
                .build()
                .map_err(|e| {
                    Error::invalid_input(
                        "compile fileset excludes",
                        format!("invalid glob {raw:?}: {e}"),
                    )
                })?;
            rules.push(Rule {
                matcher: glob.compile_matcher(),
                negate,
            });
        }
        Ok(Self { rules })
    }

    /// An empty matcher that excludes nothing.
    #[must_use]
    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    /// Whether `relative_path` (always `/`-separated) is excluded: the
    /// verdict of the *last* rule that matched, or `false` if none matched.
    #[must_use]
    pub fn is_excluded(&self, relative_path: &str) -> bool {
        let mut excluded = false;
        for rule in &self.rules {
            if rule.matcher.is_match(relative_path) {
                excluded = !rule.negate;
            }
        }
        excluded
    }
}

/// Validate a single glob pattern without keeping the compiled matcher
/// around; used by manifest-level validation before a full fileset walk.
pub fn validate_pattern(pattern: &str) -> Result<()> {
    let pattern = pattern.strip_prefix('!').unwrap_or(pattern);
    Glob::new(pattern)
        .map(|_| ())
        .map_err(|e| Error::invalid_input("validate exclude pattern", e.to_string()))
}
