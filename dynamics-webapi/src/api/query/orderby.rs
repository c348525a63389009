//! `$orderby` clauses

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    #[default]
    Ascending,
    Descending,
}

/// A single attribute + direction pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub attribute: String,
    pub direction: Direction,
}

impl OrderBy {
    pub fn asc(attribute: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into(),
            direction: Direction::Ascending,
        }
    }

    pub fn desc(attribute: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into(),
            direction: Direction::Descending,
        }
    }

    /// Parse `"name"`, `"name asc"` or `"name desc"`
    pub fn parse(text: &str) -> Option<Self> {
        let mut parts = text.split_whitespace();
        let attribute = parts.next()?;
        let direction = match parts.next().map(|d| d.to_ascii_lowercase()) {
            None => Direction::Ascending,
            Some(d) if d == "asc" => Direction::Ascending,
            Some(d) if d == "desc" => Direction::Descending,
            Some(_) => return None,
        };
        if parts.next().is_some() {
            return None;
        }
        Some(Self {
            attribute: attribute.to_string(),
            direction,
        })
    }
}

impl From<&str> for OrderBy {
    fn from(attribute: &str) -> Self {
        Self::asc(attribute)
    }
}

impl fmt::Display for OrderBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.direction {
            Direction::Ascending => write!(f, "{} asc", self.attribute),
            Direction::Descending => write!(f, "{} desc", self.attribute),
        }
    }
}
