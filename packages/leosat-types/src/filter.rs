//! filter.rs — plane/ordinal targeting for bus commands
//!
//! Command payloads may target everything (field absent), one index
//! (scalar), or a closed range. Ranges arrive as two-element arrays or as
//! strings with any of the legacy separators (`", "`, `": "`, `","`, `":"`,
//! `".."`, `" "`). Anything else is rejected.

use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum FilterError {
    #[error("{0} not in closed range ({1}..{2})")]
    OutOfRange(i64, u32, u32),
    #[error("unusable plane/ordinal value ({0})")]
    BadValue(String),
}

/// Targeting filter decoded from an optional `plane` / `ordinal` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundFilter {
    /// Field absent — every index matches.
    All,
    One(u32),
    /// Closed range, `lo ≤ hi`.
    Range(u32, u32),
}

impl BoundFilter {
    /// Decode an optional JSON field against the closed range `[1, max]`.
    pub fn decode(field: Option<&Value>, max: u32) -> Result<Self, FilterError> {
        let value = match field {
            None | Some(Value::Null) => return Ok(Self::All),
            Some(v) => v,
        };

        match value {
            Value::Number(_) => Ok(Self::One(decode_scalar(value, max)?)),
            Value::String(s) => decode_str(s, max),
            Value::Array(items) if items.len() == 2 => {
                let lo = decode_scalar(&items[0], max)?;
                let hi = decode_scalar(&items[1], max)?;
                if lo > hi {
                    return Err(FilterError::BadValue(value.to_string()));
                }
                Ok(Self::Range(lo, hi))
            }
            other => Err(FilterError::BadValue(other.to_string())),
        }
    }

    pub fn contains(&self, index: u32) -> bool {
        match *self {
            Self::All => true,
            Self::One(v) => index == v,
            Self::Range(lo, hi) => lo <= index && index <= hi,
        }
    }

    /// Concrete closed range over `[1, max]` for grid iteration.
    pub fn bounds(&self, max: u32) -> (u32, u32) {
        match *self {
            Self::All => (1, max),
            Self::One(v) => (v, v),
            Self::Range(lo, hi) => (lo, hi),
        }
    }
}

fn in_closed_range(v: i64, max: u32) -> Result<u32, FilterError> {
    if v >= 1 && v <= i64::from(max) {
        Ok(v as u32)
    } else {
        Err(FilterError::OutOfRange(v, 1, max))
    }
}

fn decode_scalar(value: &Value, max: u32) -> Result<u32, FilterError> {
    match value {
        Value::Number(n) => {
            let raw = n
                .as_i64()
                .ok_or_else(|| FilterError::BadValue(value.to_string()))?;
            in_closed_range(raw, max)
        }
        Value::String(s) => {
            let raw: i64 = s
                .trim()
                .parse()
                .map_err(|_| FilterError::BadValue(s.clone()))?;
            in_closed_range(raw, max)
        }
        other => Err(FilterError::BadValue(other.to_string())),
    }
}

fn decode_str(s: &str, max: u32) -> Result<BoundFilter, FilterError> {
    for sep in [", ", ": ", ",", ":", "..", " "] {
        let parts: Vec<&str> = s.split(sep).collect();
        if parts.len() == 2 {
            let lo = decode_scalar(&Value::String(parts[0].into()), max)?;
            let hi = decode_scalar(&Value::String(parts[1].into()), max)?;
            if lo > hi {
                return Err(FilterError::BadValue(s.into()));
            }
            return Ok(BoundFilter::Range(lo, hi));
        }
    }
    Ok(BoundFilter::One(decode_scalar(&Value::String(s.into()), max)?))
}
