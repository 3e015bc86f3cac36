//! Routing keys and binding patterns (AMQP topic semantics).
//!
//! A routing key is a dot-segmented name such as `hr.employee.created`. A
//! binding pattern is matched segment by segment against routing keys:
//!
//! - `*` matches exactly one segment
//! - `#` matches zero or more segments
//! - any other segment matches itself literally
//!
//! So `hr.employee.*` matches `hr.employee.created` but not
//! `hr.employee.resignation.approved`, while `hr.employee.#` matches both.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// AMQP short strings (routing keys, binding keys) are capped at 255 bytes.
pub const MAX_KEY_LEN: usize = 255;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RoutingError {
    #[error("routing key must not be empty")]
    Empty,

    #[error("`{0}` exceeds 255 bytes")]
    TooLong(String),

    #[error("`{0}` contains an empty segment")]
    EmptySegment(String),

    #[error("routing key `{0}` contains a wildcard")]
    WildcardInKey(String),

    #[error("binding pattern `{0}` mixes a wildcard with literal text in one segment")]
    MalformedWildcard(String),

    #[error("routing key `{key}` is assigned to both {first} and {second}")]
    DuplicateRoutingKey {
        key: String,
        first: &'static str,
        second: &'static str,
    },

    #[error("unknown route name `{0}`")]
    UnknownRoute(String),
}

/// A concrete, validated routing key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RoutingKey(String);

impl RoutingKey {
    pub fn parse(value: impl Into<String>) -> Result<Self, RoutingError> {
        let value = value.into();
        check_shape(&value)?;
        if value.contains(['*', '#']) {
            return Err(RoutingError::WildcardInKey(value));
        }
        Ok(Self(value))
    }

    /// For the built-in default keys, which are checked by tests.
    pub(crate) fn from_static(value: &'static str) -> Self {
        Self(value.to_owned())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('.')
    }
}

impl core::fmt::Display for RoutingKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for RoutingKey {
    type Error = RoutingError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<RoutingKey> for String {
    fn from(value: RoutingKey) -> Self {
        value.0
    }
}

/// A queue binding pattern.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BindingPattern(String);

impl BindingPattern {
    pub fn parse(value: impl Into<String>) -> Result<Self, RoutingError> {
        let value = value.into();
        check_shape(&value)?;
        let malformed = value
            .split('.')
            .any(|segment| segment.len() > 1 && segment.contains(['*', '#']));
        if malformed {
            return Err(RoutingError::MalformedWildcard(value));
        }
        Ok(Self(value))
    }

    /// A pattern that matches exactly one routing key.
    pub fn exact(key: &RoutingKey) -> Self {
        Self(key.as_str().to_owned())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn matches(&self, key: &RoutingKey) -> bool {
        let pattern: Vec<&str> = self.0.split('.').collect();
        let key: Vec<&str> = key.segments().collect();
        match_segments(&pattern, &key)
    }
}

impl core::fmt::Display for BindingPattern {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for BindingPattern {
    type Error = RoutingError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<BindingPattern> for String {
    fn from(value: BindingPattern) -> Self {
        value.0
    }
}

fn check_shape(value: &str) -> Result<(), RoutingError> {
    if value.is_empty() {
        return Err(RoutingError::Empty);
    }
    if value.len() > MAX_KEY_LEN {
        return Err(RoutingError::TooLong(value.to_owned()));
    }
    if value.split('.').any(str::is_empty) {
        return Err(RoutingError::EmptySegment(value.to_owned()));
    }
    Ok(())
}

fn match_segments(pattern: &[&str], key: &[&str]) -> bool {
    match pattern.split_first() {
        None => key.is_empty(),
        Some((&"#", rest)) => (0..=key.len()).any(|skip| match_segments(rest, &key[skip..])),
        Some((&"*", rest)) => match key.split_first() {
            Some((_, key_rest)) => match_segments(rest, key_rest),
            None => false,
        },
        Some((literal, rest)) => match key.split_first() {
            Some((segment, key_rest)) => segment == literal && match_segments(rest, key_rest),
            None => false,
        },
    }
}
