//! Filters and query shapes understood by song stores
//!
//! A [`StoreQuery`] is what a store can execute in one go: any number of
//! equality filters, at most one inequality filter, an optional ascending sort
//! field and an optional limit.

use std::cmp::Ordering;
use std::fmt;

use chrono::{DateTime, Utc};

/// Queryable song fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Field {
    ArtistLower,
    TitleLower,
    AlbumLower,
    AlbumId,
    Keywords,
    Tags,
    Track,
    Disc,
    Rating,
    RatingAtLeast0,
    RatingAtLeast25,
    RatingAtLeast50,
    RatingAtLeast75,
    NumPlays,
    FirstStartTime,
    LastStartTime,
}

impl Field {
    pub fn as_str(&self) -> &'static str {
        match self {
            Field::ArtistLower => "artistLower",
            Field::TitleLower => "titleLower",
            Field::AlbumLower => "albumLower",
            Field::AlbumId => "albumId",
            Field::Keywords => "keywords",
            Field::Tags => "tags",
            Field::Track => "track",
            Field::Disc => "disc",
            Field::Rating => "rating",
            Field::RatingAtLeast0 => "ratingAtLeast0",
            Field::RatingAtLeast25 => "ratingAtLeast25",
            Field::RatingAtLeast50 => "ratingAtLeast50",
            Field::RatingAtLeast75 => "ratingAtLeast75",
            Field::NumPlays => "numPlays",
            Field::FirstStartTime => "firstStartTime",
            Field::LastStartTime => "lastStartTime",
        }
    }

    /// Repeated fields match an equality filter if any element matches
    pub fn is_multi_valued(&self) -> bool {
        matches!(self, Field::Keywords | Field::Tags)
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A field value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Time(DateTime<Utc>),
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Value::Str(a), Value::Str(b)) => a.partial_cmp(b),
            (Value::Int(a), Value::Int(b)) => a.partial_cmp(b),
            (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
            (Value::Int(a), Value::Float(b)) => (*a as f64).partial_cmp(b),
            (Value::Float(a), Value::Int(b)) => a.partial_cmp(&(*b as f64)),
            (Value::Bool(a), Value::Bool(b)) => a.partial_cmp(b),
            (Value::Time(a), Value::Time(b)) => a.partial_cmp(b),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Str(s) => write!(f, "{:?}", s),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(v) => write!(f, "{}", v),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Time(t) => write!(f, "{}", t.to_rfc3339()),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(t: DateTime<Utc>) -> Self {
        Value::Time(t)
    }
}

/// `field == value`
#[derive(Debug, Clone, PartialEq)]
pub struct EqualityFilter {
    pub field: Field,
    pub value: Value,
}

impl EqualityFilter {
    pub fn new(field: Field, value: impl Into<Value>) -> Self {
        Self {
            field,
            value: value.into(),
        }
    }

    pub fn matches(&self, actual: &Value) -> bool {
        *actual == self.value
    }
}

/// Comparison used by an inequality filter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    AtMost,
    AtLeast,
}

/// `field <= value` or `field >= value`
#[derive(Debug, Clone, PartialEq)]
pub struct InequalityFilter {
    pub field: Field,
    pub cmp: Comparison,
    pub value: Value,
}

impl InequalityFilter {
    pub fn at_most(field: Field, value: impl Into<Value>) -> Self {
        Self {
            field,
            cmp: Comparison::AtMost,
            value: value.into(),
        }
    }

    pub fn at_least(field: Field, value: impl Into<Value>) -> Self {
        Self {
            field,
            cmp: Comparison::AtLeast,
            value: value.into(),
        }
    }

    pub fn matches(&self, actual: &Value) -> bool {
        match (self.cmp, actual.partial_cmp(&self.value)) {
            (Comparison::AtMost, Some(Ordering::Less | Ordering::Equal)) => true,
            (Comparison::AtLeast, Some(Ordering::Greater | Ordering::Equal)) => true,
            _ => false,
        }
    }
}

/// One store-executable query
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoreQuery {
    pub equalities: Vec<EqualityFilter>,
    pub inequality: Option<InequalityFilter>,
    /// Ascending sort field
    pub order: Option<Field>,
    pub limit: Option<usize>,
}

impl StoreQuery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an equality filter
    pub fn filter(mut self, field: Field, value: impl Into<Value>) -> Self {
        self.equalities.push(EqualityFilter::new(field, value));
        self
    }

    /// Set the query's single inequality filter
    pub fn with_inequality(mut self, filter: InequalityFilter) -> Self {
        self.inequality = Some(filter);
        self
    }

    pub fn order_by(mut self, field: Field) -> Self {
        self.order = Some(field);
        self
    }

    pub fn limit(mut self, n: usize) -> Self {
        self.limit = Some(n);
        self
    }

    /// True if the query has no filters at all
    pub fn is_unfiltered(&self) -> bool {
        self.equalities.is_empty() && self.inequality.is_none()
    }
}

impl fmt::Display for StoreQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut terms: Vec<String> = self
            .equalities
            .iter()
            .map(|e| format!("{} = {}", e.field, e.value))
            .collect();
        if let Some(ineq) = &self.inequality {
            let op = match ineq.cmp {
                Comparison::AtMost => "<=",
                Comparison::AtLeast => ">=",
            };
            terms.push(format!("{} {} {}", ineq.field, op, ineq.value));
        }

        if terms.is_empty() {
            f.write_str("*")?;
        } else {
            f.write_str(&terms.join(" AND "))?;
        }
        if let Some(order) = self.order {
            write!(f, " ORDER BY {}", order)?;
        }
        if let Some(limit) = self.limit {
            write!(f, " LIMIT {}", limit)?;
        }
        Ok(())
    }
}
