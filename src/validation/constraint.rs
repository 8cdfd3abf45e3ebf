//! The constraint mini-language: comma-separated `key=value` clauses.
//!
//! Supported keys are `min`, `max` and `regex`. A comma inside a `regex`
//! pattern is kept as part of the pattern, so `regex=^\d{1,3}$` works.
//! Clauses with any other key are ignored.

use regex::Regex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConstraintParseError {
    #[error("'{0}' is not a key=value clause")]
    MalformedClause(String),

    #[error("{key} bound '{value}' is not a number")]
    BadBound { key: String, value: String },

    #[error("invalid regex: {0}")]
    BadRegex(#[from] regex::Error),
}

#[derive(Debug, Clone)]
pub enum Clause {
    Min(f64),
    Max(f64),
    Regex(Regex),
}

impl Clause {
    /// Checks one serialized value; the error names the failed clause.
    pub fn check(&self, value: &str) -> Result<(), String> {
        match self {
            Clause::Min(min) => match parse_number(value) {
                Some(n) if n >= *min => Ok(()),
                Some(_) => Err(format!("must be at least {}", min)),
                None => Err("must be a number".to_string()),
            },
            Clause::Max(max) => match parse_number(value) {
                Some(n) if n <= *max => Ok(()),
                Some(_) => Err(format!("must be at most {}", max)),
                None => Err("must be a number".to_string()),
            },
            Clause::Regex(re) => {
                if re.is_match(value) {
                    Ok(())
                } else {
                    Err(format!("must match {}", re.as_str()))
                }
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Constraint {
    clauses: Vec<Clause>,
}

const KNOWN_KEYS: [&str; 3] = ["min", "max", "regex"];

impl Constraint {
    pub fn parse(text: &str) -> Result<Self, ConstraintParseError> {
        // (key, value) pairs; a piece without a known key continues a regex
        let mut pairs: Vec<(String, String)> = Vec::new();

        let mut pieces: Vec<&str> = text.split(',').collect();
        // trailing separators end the text, even after a regex
        while pieces.last().is_some_and(|p| p.trim().is_empty()) {
            pieces.pop();
        }

        for piece in pieces {
            let known = piece.split_once('=').and_then(|(key, value)| {
                let key = key.trim().to_ascii_lowercase();
                KNOWN_KEYS.contains(&key.as_str()).then(|| (key, value.to_string()))
            });

            if let Some(pair) = known {
                pairs.push(pair);
                continue;
            }

            if let Some((key, value)) = pairs.last_mut() {
                if key.as_str() == "regex" {
                    value.push(',');
                    value.push_str(piece);
                    continue;
                }
            }

            if piece.trim().is_empty() {
                continue;
            }

            if !piece.contains('=') {
                return Err(ConstraintParseError::MalformedClause(piece.trim().to_string()));
            }

            log::debug!("ignoring unsupported constraint clause '{}'", piece.trim());
            pairs.push((String::new(), String::new()));
        }

        let mut clauses = Vec::with_capacity(pairs.len());
        for (key, value) in pairs {
            match key.as_str() {
                "min" => clauses.push(Clause::Min(parse_bound(&key, &value)?)),
                "max" => clauses.push(Clause::Max(parse_bound(&key, &value)?)),
                "regex" => clauses.push(Clause::Regex(Regex::new(&value)?)),
                _ => {}
            }
        }

        Ok(Constraint { clauses })
    }

    pub fn clauses(&self) -> &[Clause] {
        &self.clauses
    }

    /// Runs every clause; the first failure is reported.
    pub fn check(&self, value: &str) -> Result<(), String> {
        self.clauses.iter().try_for_each(|clause| clause.check(value))
    }
}

fn parse_bound(key: &str, value: &str) -> Result<f64, ConstraintParseError> {
    parse_number(value).ok_or_else(|| ConstraintParseError::BadBound {
        key: key.to_string(),
        value: value.trim().to_string(),
    })
}

/// Parses a finite number, ignoring surrounding whitespace.
pub fn parse_number(value: &str) -> Option<f64> {
    value.trim().parse::<f64>().ok().filter(|n| n.is_finite())
}
