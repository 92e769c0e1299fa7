//! Property-name matchers.
//!
//! A matcher recognizes a fixed list of patterns. Because several patterns can
//! match the same name (`"foo"` and `"^f"`), dispatch happens on *cases*: sets
//! of pattern indices that a single name can match. Only two kinds of set are
//! enumerated, so the table stays linear in the number of patterns:
//!
//! - each literal together with the regexes that match it,
//! - each regex on its own.
//!
//! Cases are numbered from 1 in enumeration order. A name whose matching set is
//! not in the table (no pattern, or two or more regexes and no literal) gets
//! [`NO_MATCH`]; callers that need every regex test them one matcher at a time.
//!
//! [`Matcher`] is the serializable description stored in compiled programs.
//! [`CompiledMatcher`] is the runtime form built once per validator.

use ahash::AHashMap;
use indexmap::IndexSet;
use regex::{Regex, RegexSet};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::{cnode::Pattern, error::CompileError};

/// Case number returned when no pattern matches.
pub const NO_MATCH: u32 = 0;

type PatternSet = SmallVec<[u32; 4]>;

/// Pattern list plus enumerated case table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Matcher {
    patterns: Vec<Pattern>,
    /// `cases[k]` holds the sorted pattern indices of case `k + 1`.
    cases: Vec<Vec<u32>>,
}

impl Matcher {
    /// Builds a matcher over `patterns` (duplicates are collapsed, first wins).
    ///
    /// Every literal contributes the case `{literal} ∪ {regexes matching it}`,
    /// then every regex contributes `{regex}`.
    pub fn build(patterns: impl IntoIterator<Item = Pattern>) -> Result<Self, CompileError> {
        let patterns: Vec<Pattern> = patterns.into_iter().collect::<IndexSet<_>>().into_iter().collect();

        let mut regexes: Vec<(u32, Regex)> = Vec::new();
        for (i, pattern) in patterns.iter().enumerate() {
            if let Pattern::Regex(source) = pattern {
                let re = Regex::new(source).map_err(|err| CompileError::BadPattern {
                    pattern: source.clone(),
                    message: err.to_string(),
                })?;
                regexes.push((index_u32(i), re));
            }
        }
        let mut cases: IndexSet<Vec<u32>> = IndexSet::new();
        for (i, pattern) in patterns.iter().enumerate() {
            if let Pattern::Literal(name) = pattern {
                let mut set = vec![index_u32(i)];
                set.extend(regexes.iter().filter(|(_, re)| re.is_match(name)).map(|(j, _)| *j));
                set.sort_unstable();
                cases.insert(set);
            }
        }
        for (j, _) in &regexes {
            cases.insert(vec![*j]);
        }

        Ok(Self {
            patterns,
            cases: cases.into_iter().collect(),
        })
    }

    #[must_use]
    pub fn patterns(&self) -> &[Pattern] {
        &self.patterns
    }

    /// Index of `pattern` in this matcher.
    #[must_use]
    pub fn index_of(&self, pattern: &Pattern) -> Option<u32> {
        self.patterns.iter().position(|p| p == pattern).map(index_u32)
    }

    /// Pattern sets of all cases; entry `k` is case `k + 1`.
    #[must_use]
    pub fn cases(&self) -> &[Vec<u32>] {
        &self.cases
    }

    /// True when pattern `index` is a literal name.
    #[must_use]
    pub fn is_literal(&self, index: u32) -> bool {
        matches!(self.patterns.get(index as usize), Some(Pattern::Literal(_)))
    }

    /// Builds the runtime form.
    pub fn compile(&self) -> Result<CompiledMatcher, regex::Error> {
        let mut literals = AHashMap::new();
        let mut sources = Vec::new();
        let mut regex_index = Vec::new();
        for (i, pattern) in self.patterns.iter().enumerate() {
            match pattern {
                Pattern::Literal(name) => {
                    literals.insert(name.clone(), index_u32(i));
                }
                Pattern::Regex(source) => {
                    sources.push(source.as_str());
                    regex_index.push(index_u32(i));
                }
            }
        }
        let cases = self
            .cases
            .iter()
            .enumerate()
            .map(|(k, set)| (set.iter().copied().collect::<PatternSet>(), index_u32(k + 1)))
            .collect();
        Ok(CompiledMatcher {
            literals,
            regex_set: RegexSet::new(sources)?,
            regex_index,
            cases,
        })
    }
}

/// Runtime matcher: maps a name to its case number.
#[derive(Debug, Clone)]
pub struct CompiledMatcher {
    literals: AHashMap<String, u32>,
    regex_set: RegexSet,
    regex_index: Vec<u32>,
    cases: AHashMap<PatternSet, u32>,
}

impl CompiledMatcher {
    /// Case number of `name`, or [`NO_MATCH`].
    #[must_use]
    pub fn case_of(&self, name: &str) -> u32 {
        let mut set = PatternSet::new();
        if let Some(&i) = self.literals.get(name) {
            set.push(i);
        }
        if !self.regex_index.is_empty() {
            set.extend(self.regex_set.matches(name).into_iter().map(|k| self.regex_index[k]));
        }
        if set.is_empty() {
            return NO_MATCH;
        }
        set.sort_unstable();
        self.cases.get(&set).copied().unwrap_or(NO_MATCH)
    }
}

fn index_u32(i: usize) -> u32 {
    u32::try_from(i).unwrap_or(u32::MAX)
}
