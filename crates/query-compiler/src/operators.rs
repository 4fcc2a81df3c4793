use std::fmt;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Fixed operator vocabulary recognised as the trailing segment of a filter key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operator {
    Exact,
    IExact,
    Lt,
    Lte,
    Gt,
    Gte,
    Range,
    In,
    IsNull,
    Contains,
    IContains,
    StartsWith,
    IStartsWith,
    EndsWith,
    IEndsWith,
    Regex,
    IRegex,
    Date,
    Year,
    Month,
    Day,
    #[serde(rename = "week_day")]
    WeekDay,
    Hour,
    Minute,
    Second,
}

impl Operator {
    pub const ALL: [Operator; 25] = [
        Operator::Exact,
        Operator::IExact,
        Operator::Lt,
        Operator::Lte,
        Operator::Gt,
        Operator::Gte,
        Operator::Range,
        Operator::In,
        Operator::IsNull,
        Operator::Contains,
        Operator::IContains,
        Operator::StartsWith,
        Operator::IStartsWith,
        Operator::EndsWith,
        Operator::IEndsWith,
        Operator::Regex,
        Operator::IRegex,
        Operator::Date,
        Operator::Year,
        Operator::Month,
        Operator::Day,
        Operator::WeekDay,
        Operator::Hour,
        Operator::Minute,
        Operator::Second,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Exact => "exact",
            Operator::IExact => "iexact",
            Operator::Lt => "lt",
            Operator::Lte => "lte",
            Operator::Gt => "gt",
            Operator::Gte => "gte",
            Operator::Range => "range",
            Operator::In => "in",
            Operator::IsNull => "isnull",
            Operator::Contains => "contains",
            Operator::IContains => "icontains",
            Operator::StartsWith => "startswith",
            Operator::IStartsWith => "istartswith",
            Operator::EndsWith => "endswith",
            Operator::IEndsWith => "iendswith",
            Operator::Regex => "regex",
            Operator::IRegex => "iregex",
            Operator::Date => "date",
            Operator::Year => "year",
            Operator::Month => "month",
            Operator::Day => "day",
            Operator::WeekDay => "week_day",
            Operator::Hour => "hour",
            Operator::Minute => "minute",
            Operator::Second => "second",
        }
    }

    /// Exact, case-sensitive match against the vocabulary.
    pub fn from_word(word: &str) -> Option<Operator> {
        Operator::ALL.iter().copied().find(|op| op.as_str() == word)
    }

    pub fn is_date_part(&self) -> bool {
        matches!(
            self,
            Operator::Date
                | Operator::Year
                | Operator::Month
                | Operator::Day
                | Operator::WeekDay
                | Operator::Hour
                | Operator::Minute
                | Operator::Second
        )
    }

    pub fn is_case_insensitive(&self) -> bool {
        matches!(
            self,
            Operator::IExact
                | Operator::IContains
                | Operator::IStartsWith
                | Operator::IEndsWith
                | Operator::IRegex
        )
    }

    /// Checks the operand shape; the message names what was expected.
    pub fn validate_operand(&self, value: &Value) -> Result<(), String> {
        match self {
            Operator::Exact => {
                if is_scalar(value) || value.is_null() {
                    Ok(())
                } else {
                    Err("exact expects a scalar or null".into())
                }
            }
            Operator::In => match value {
                Value::Array(items) if items.iter().all(is_scalar) => Ok(()),
                _ => Err("in expects a list of scalars".into()),
            },
            Operator::Range => match value {
                Value::Array(items) if items.len() == 2 && items.iter().all(is_scalar) => Ok(()),
                _ => Err("range expects a two-element list".into()),
            },
            Operator::IsNull => {
                if value.is_boolean() {
                    Ok(())
                } else {
                    Err("isnull expects a boolean".into())
                }
            }
            Operator::Lt | Operator::Lte | Operator::Gt | Operator::Gte => {
                if value.is_number() || value.is_string() {
                    Ok(())
                } else {
                    Err(format!("{self} expects a number or string"))
                }
            }
            Operator::Regex | Operator::IRegex => match value.as_str() {
                Some(pattern) => Regex::new(pattern)
                    .map(|_| ())
                    .map_err(|err| format!("invalid regex: {err}")),
                None => Err(format!("{self} expects a pattern string")),
            },
            Operator::IExact
            | Operator::Contains
            | Operator::IContains
            | Operator::StartsWith
            | Operator::IStartsWith
            | Operator::EndsWith
            | Operator::IEndsWith
            | Operator::Date => {
                if value.is_string() {
                    Ok(())
                } else {
                    Err(format!("{self} expects a string"))
                }
            }
            Operator::Year
            | Operator::Month
            | Operator::Day
            | Operator::WeekDay
            | Operator::Hour
            | Operator::Minute
            | Operator::Second => {
                if value.is_i64() || value.is_u64() {
                    Ok(())
                } else {
                    Err(format!("{self} expects an integer"))
                }
            }
        }
    }
}

fn is_scalar(value: &Value) -> bool {
    matches!(value, Value::Bool(_) | Value::Number(_) | Value::String(_))
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn vocabulary_lookup_is_exact() {
        assert_eq!(Operator::from_word("icontains"), Some(Operator::IContains));
        assert_eq!(Operator::from_word("week_day"), Some(Operator::WeekDay));
        assert_eq!(Operator::from_word("IN"), None);
        assert_eq!(Operator::from_word("name"), None);
    }

    #[test]
    fn operand_shapes_are_checked() {
        assert!(Operator::In.validate_operand(&json!(["a", "b"])).is_ok());
        assert!(Operator::In.validate_operand(&json!("a")).is_err());
        assert!(Operator::Range.validate_operand(&json!([1, 5])).is_ok());
        assert!(Operator::Range.validate_operand(&json!([1])).is_err());
        assert!(Operator::IsNull.validate_operand(&json!(true)).is_ok());
        assert!(Operator::IsNull.validate_operand(&json!("yes")).is_err());
        assert!(Operator::Regex.validate_operand(&json!("^a.*z$")).is_ok());
        assert!(Operator::Regex.validate_operand(&json!("(unclosed")).is_err());
        assert!(Operator::Year.validate_operand(&json!(2024)).is_ok());
        assert!(Operator::Exact.validate_operand(&json!({"nested": 1})).is_err());
    }

    #[test]
    fn serializes_with_vocabulary_names() {
        assert_eq!(serde_json::to_value(Operator::WeekDay).unwrap(), json!("week_day"));
        assert_eq!(serde_json::to_value(Operator::IStartsWith).unwrap(), json!("istartswith"));
    }
}
