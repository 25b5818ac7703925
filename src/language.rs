//! Closed set of language tags the relay understands.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Language {
    Python,
    JavaScript,
    Java,
    Cpp,
    Go,
    Rust,
    Php,
    Ruby,
    /// Any other tag, kept verbatim.
    Unrecognized(String),
}

impl Language {
    /// Case-insensitive; unknown tags are preserved rather than rejected.
    pub fn parse(tag: &str) -> Self {
        match tag.to_ascii_lowercase().as_str() {
            "python" | "py" => Language::Python,
            "javascript" | "js" => Language::JavaScript,
            "java" => Language::Java,
            "cpp" | "c++" => Language::Cpp,
            "go" => Language::Go,
            "rust" => Language::Rust,
            "php" => Language::Php,
            "ruby" => Language::Ruby,
            _ => Language::Unrecognized(tag.to_string()),
        }
    }

    /// Identifier the remote sandbox provider uses for this language.
    pub fn runtime_id(&self) -> &'static str {
        match self {
            Language::Python | Language::Unrecognized(_) => "python",
            Language::JavaScript => "nodejs",
            Language::Java => "java",
            Language::Cpp => "cpp",
            Language::Go => "go",
            Language::Rust => "rust",
            Language::Php => "php",
            Language::Ruby => "ruby",
        }
    }

    pub fn is_python(&self) -> bool {
        matches!(self, Language::Python)
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Language::Unrecognized(tag) => write!(f, "{}", tag),
            known => write!(f, "{}", known.runtime_id()),
        }
    }
}
