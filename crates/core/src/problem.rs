//! Arithmetic problems.

use serde::{Deserialize, Serialize};

/// An arithmetic problem with its exact answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Problem {
    /// Text of the expression, e.g. `"(12 + 7) * 3"`.
    pub question: String,

    /// Exact numeric value of the expression.
    pub answer: f64,

    /// Category tag.
    #[serde(default)]
    pub category: Category,
}

impl Problem {
    /// Create a training problem (category `arithmetic`).
    pub fn new(question: impl Into<String>, answer: f64) -> Self {
        Self {
            question: question.into(),
            answer,
            category: Category::Arithmetic,
        }
    }

    /// Create a problem in a specific category.
    pub fn with_category(question: impl Into<String>, answer: f64, category: Category) -> Self {
        Self {
            question: question.into(),
            answer,
            category,
        }
    }
}

/// Problem category.
///
/// Training problems are always `Arithmetic`; the held-out set cycles through
/// the other seven categories, none of which appear during training.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    /// Training problems
    #[default]
    Arithmetic,
    /// Powers
    Exponents,
    /// Remainders
    Modulo,
    /// Five to ten terms under one operator
    LongChain,
    /// Fixed nested shape
    DeeplyNested,
    /// Signed operands
    Negatives,
    /// Half and quarter decimals
    Decimals,
    /// Four-digit operands
    LargeNumbers,
    /// Category written by a newer or foreign tool.
    #[serde(other)]
    Unknown,
}

impl Category {
    /// Held-out categories, in generation order.
    pub const HELD_OUT: [Category; 7] = [
        Category::Exponents,
        Category::Modulo,
        Category::LongChain,
        Category::DeeplyNested,
        Category::Negatives,
        Category::Decimals,
        Category::LargeNumbers,
    ];

    /// Tag as written in the logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Arithmetic => "arithmetic",
            Category::Exponents => "exponents",
            Category::Modulo => "modulo",
            Category::LongChain => "long_chain",
            Category::DeeplyNested => "deeply_nested",
            Category::Negatives => "negatives",
            Category::Decimals => "decimals",
            Category::LargeNumbers => "large_numbers",
            Category::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
