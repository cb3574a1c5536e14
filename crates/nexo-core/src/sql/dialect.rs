//! Rendering dialects.

use crate::config::DEFAULT_TEXT_SEARCH_LANGUAGE;

/// SQL flavor targeted by predicate rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Flavor {
    #[default]
    Sqlite,
    Postgres,
}

/// Dialect-specific rendering of case-insensitive matching and text search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dialect {
    pub flavor: Flavor,
    text_search_language: String,
}

impl Default for Dialect {
    fn default() -> Self {
        Self::sqlite()
    }
}

impl Dialect {
    pub fn sqlite() -> Self {
        Self {
            flavor: Flavor::Sqlite,
            text_search_language: DEFAULT_TEXT_SEARCH_LANGUAGE.to_string(),
        }
    }

    pub fn postgres() -> Self {
        Self {
            flavor: Flavor::Postgres,
            ..Self::sqlite()
        }
    }

    /// Set the text search language profile.
    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.text_search_language = language.into();
        self
    }

    pub fn text_search_language(&self) -> &str {
        &self.text_search_language
    }

    /// `column LIKE placeholder` ignoring case.
    pub fn ilike(&self, column: &str, placeholder: &str, negated: bool) -> String {
        let not = if negated { "NOT " } else { "" };
        match self.flavor {
            Flavor::Sqlite => format!("lower({column}) {not}LIKE lower({placeholder})"),
            Flavor::Postgres => format!("{column} {not}ILIKE {placeholder}"),
        }
    }

    /// Escape clause appended to `LIKE` patterns built from user text.
    pub fn like_escape(&self) -> &'static str {
        match self.flavor {
            Flavor::Sqlite => " ESCAPE '\\'",
            Flavor::Postgres => "",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ilike() {
        assert_eq!(Dialect::sqlite().ilike("\"name\"", "$1", false), "lower(\"name\") LIKE lower($1)");
        assert_eq!(Dialect::postgres().ilike("\"name\"", "$1", true), "\"name\" NOT ILIKE $1");
    }

    #[test]
    fn test_language() {
        let dialect = Dialect::postgres().with_language("german");
        assert_eq!(dialect.text_search_language(), "german");
        assert_eq!(dialect.flavor, Flavor::Postgres);
    }
}
