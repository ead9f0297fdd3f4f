use std::collections::BTreeMap;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

/// Type a bound parameter is handed to the binder with.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParamType {
    #[default]
    String,
    Integer,
    Float,
    Boolean,
    Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundParam {
    pub index: u32,
    pub value: String,
    pub ty: ParamType,
}

impl BoundParam {
    pub fn string(index: u32, value: impl Into<String>) -> Self {
        Self {
            index,
            value: value.into(),
            ty: ParamType::String,
        }
    }

    /// Value converted for a typed driver bind. Text that does not parse as
    /// its declared type is bound as text, leaving the mismatch to the
    /// database.
    pub fn typed_value(&self) -> TypedValue {
        let raw = self.value.trim();
        let typed = match self.ty {
            ParamType::String => None,
            ParamType::Integer => raw.parse::<i64>().ok().map(TypedValue::Integer),
            ParamType::Float => raw.parse::<f64>().ok().map(TypedValue::Float),
            ParamType::Boolean => match raw.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" => Some(TypedValue::Boolean(true)),
                "0" | "false" | "no" => Some(TypedValue::Boolean(false)),
                _ => None,
            },
            ParamType::Timestamp => parse_timestamp(raw).map(TypedValue::Timestamp),
        };
        typed.unwrap_or_else(|| TypedValue::Text(self.value.clone()))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TypedValue {
    Text(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Timestamp(NaiveDateTime),
}

// Host date values are either a bare date or a date and time.
fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    const FORMATS: [&str; 3] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"];
    for format in FORMATS {
        if let Ok(ts) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(ts);
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .map(|date| date.and_time(NaiveTime::MIN))
}

/// How a query spells parameter placeholders inside SQL text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlaceholderStyle {
    /// `%1000`, the host's native binder syntax.
    #[default]
    Percent,
    /// `:p1000`
    Named,
}

impl PlaceholderStyle {
    pub fn placeholder(&self, index: u32) -> String {
        match self {
            PlaceholderStyle::Percent => format!("%{}", index),
            PlaceholderStyle::Named => format!(":p{}", index),
        }
    }

    fn prefix(&self) -> &'static str {
        match self {
            PlaceholderStyle::Percent => "%",
            PlaceholderStyle::Named => ":p",
        }
    }
}

/// Positional parameter syntax of a concrete SQL driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Positional {
    /// `$1, $2, …` (Postgres)
    Dollar,
    /// `?, ?, …` (SQLite, MySQL)
    Question,
}

/// Capabilities the augmentor needs from a host query object.
pub trait QueryBuilder {
    fn add_join(&mut self, alias: &str, join_sql: &str);

    /// Adds one conjunct to the WHERE clause along with the parameters it
    /// references.
    fn add_where(&mut self, fragment: &str, params: Vec<BoundParam>) {
        self.push_where(fragment);
        for param in params {
            self.add_param(param.index, param.value, param.ty);
        }
    }

    fn push_where(&mut self, fragment: &str);

    fn add_param(&mut self, index: u32, value: String, ty: ParamType);

    fn placeholder_style(&self) -> PlaceholderStyle {
        PlaceholderStyle::Percent
    }
}

/// Recipient query owned by the dispatcher: `SELECT … FROM <base> e`
/// plus joins, AND-ed WHERE conjuncts and indexed parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecipientQuery {
    select: String,
    from: String,
    joins: Vec<(String, String)>,
    wheres: Vec<String>,
    params: BTreeMap<u32, BoundParam>,
    style: PlaceholderStyle,
}

impl RecipientQuery {
    pub fn new(select: impl Into<String>, from: impl Into<String>) -> Self {
        Self {
            select: select.into(),
            from: from.into(),
            ..Default::default()
        }
    }

    pub fn with_style(self, style: PlaceholderStyle) -> Self {
        let mut consumed_self = self;
        consumed_self.style = style;
        consumed_self
    }

    pub fn where_clause(self, fragment: impl AsRef<str>) -> Self {
        let mut consumed_self = self;
        consumed_self.push_where(fragment.as_ref());
        consumed_self
    }

    pub fn param(self, index: u32, value: impl Into<String>, ty: ParamType) -> Self {
        let mut consumed_self = self;
        consumed_self.add_param(index, value.into(), ty);
        consumed_self
    }

    pub fn joins(&self) -> &[(String, String)] {
        &self.joins
    }

    pub fn wheres(&self) -> &[String] {
        &self.wheres
    }

    pub fn params(&self) -> &BTreeMap<u32, BoundParam> {
        &self.params
    }

    pub fn style(&self) -> PlaceholderStyle {
        self.style
    }

    /// SQL with host placeholders left in place.
    pub fn to_sql(&self) -> String {
        let mut sql = format!("SELECT {} FROM {}", self.select, self.from);
        for (_, join) in &self.joins {
            sql.push(' ');
            sql.push_str(join);
        }
        if !self.wheres.is_empty() {
            sql.push_str(" WHERE (");
            sql.push_str(&self.wheres.join(") AND ("));
            sql.push(')');
        }
        sql
    }

    /// Rewrites host placeholders into driver positional parameters,
    /// returning the SQL and the parameters in bind order. A parameter
    /// referenced twice is bound twice. Placeholder-looking text inside
    /// single-quoted literals, or naming an index that was never added, is
    /// left untouched.
    pub fn to_positional(&self, positional: Positional) -> (String, Vec<BoundParam>) {
        let sql = self.to_sql();
        let prefix = self.style.prefix();
        let mut out = String::with_capacity(sql.len());
        let mut binds = Vec::new();
        let mut in_literal = false;
        let mut rest = sql.as_str();

        while let Some(c) = rest.chars().next() {
            if c == '\'' {
                in_literal = !in_literal;
            }

            if !in_literal && rest.starts_with(prefix) {
                let after = &rest[prefix.len()..];
                let digits = after
                    .find(|ch: char| !ch.is_ascii_digit())
                    .unwrap_or(after.len());
                if let Some(param) = after[..digits]
                    .parse::<u32>()
                    .ok()
                    .and_then(|idx| self.params.get(&idx))
                {
                    binds.push(param.clone());
                    match positional {
                        Positional::Dollar => out.push_str(&format!("${}", binds.len())),
                        Positional::Question => out.push('?'),
                    }
                    rest = &after[digits..];
                    continue;
                }
            }

            out.push(c);
            rest = &rest[c.len_utf8()..];
        }

        (out, binds)
    }
}

impl QueryBuilder for RecipientQuery {
    fn add_join(&mut self, alias: &str, join_sql: &str) {
        if self.joins.iter().any(|(existing, _)| existing == alias) {
            return;
        }
        self.joins.push((alias.to_string(), join_sql.to_string()));
    }

    fn push_where(&mut self, fragment: &str) {
        self.wheres.push(fragment.to_string());
    }

    fn add_param(&mut self, index: u32, value: String, ty: ParamType) {
        self.params.insert(index, BoundParam { index, value, ty });
    }

    fn placeholder_style(&self) -> PlaceholderStyle {
        self.style
    }
}
