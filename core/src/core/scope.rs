use serde::{Deserialize, Serialize};

use crate::core::category::{self, Category};
use crate::modules::PollOptions;

/// One asset a program declares in or out of scope.
///
/// `category` holds the label exactly as the platform reported it. The unified
/// category is computed on read through [`ScopeElement::unified_category`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScopeElement {
    pub target: String,
    pub description: String,
    pub category: String,
    pub is_bbp: bool,
}

impl ScopeElement {
    pub fn new(target: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            description: String::new(),
            category: category.into(),
            is_bbp: false,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn bounty(mut self, is_bbp: bool) -> Self {
        self.is_bbp = is_bbp;
        self
    }

    /// Placeholder row for a program that publishes no in-scope table at all.
    pub fn no_scope_table() -> Self {
        Self {
            target: String::new(),
            description: String::new(),
            category: String::new(),
            is_bbp: false,
        }
    }

    pub fn is_no_scope_table(&self) -> bool {
        self.target.is_empty()
    }

    pub fn unified_category(&self) -> Category {
        category::normalize(&self.category, &self.target)
    }
}

/// Scope tables of a single program as returned by one fetch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgramData {
    pub url: String,
    #[serde(default)]
    pub in_scope: Vec<ScopeElement>,
    #[serde(default)]
    pub out_of_scope: Vec<ScopeElement>,
}

impl ProgramData {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            in_scope: Vec::new(),
            out_of_scope: Vec::new(),
        }
    }

    /// The value returned for a program the platform says no longer exists.
    pub fn gone(url: impl Into<String>) -> Self {
        Self::new(url)
    }

    pub fn is_empty(&self) -> bool {
        self.in_scope.is_empty() && self.out_of_scope.is_empty()
    }

    /// True when the program has no real in-scope target (only the sentinel, or nothing).
    pub fn has_no_in_scope(&self) -> bool {
        self.in_scope.iter().all(ScopeElement::is_no_scope_table)
    }

    /// Applies the bounty, category and out-of-scope options to the fetched tables.
    pub fn apply_options(mut self, options: &PollOptions) -> Self {
        let keep = |element: &ScopeElement| {
            if element.is_no_scope_table() {
                return true;
            }
            if options.bounty_only && !element.is_bbp {
                return false;
            }
            match &options.categories {
                Some(wanted) if !wanted.is_empty() => wanted.contains(&element.unified_category()),
                _ => true,
            }
        };

        self.in_scope.retain(|e| keep(e));
        if options.include_out_of_scope {
            self.out_of_scope.retain(|e| keep(e));
        } else {
            self.out_of_scope.clear();
        }
        self
    }
}
