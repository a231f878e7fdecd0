//! Timestamp parsing.
//!
//! Supports `epoch` (seconds, fraction truncated), `epoch_ms` and date patterns.
//! Patterns containing `%` are strftime patterns and used as-is; anything else
//! is read as a Java-style pattern (`yyyy-MM-dd'T'HH:mm:ssXXX`) and translated.

use chrono::{DateTime, NaiveDate, NaiveDateTime};

use crate::error::IngestError;

/// How the time field is to be read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimeFormat {
    Epoch,
    EpochMs,
    Pattern {
        /// strftime form of the pattern
        format: String,
        /// Whether the pattern carries a UTC offset; if not, values are UTC
        has_offset: bool,
    },
}

impl TimeFormat {
    pub fn parse(spec: &str) -> Result<Self, IngestError> {
        match spec.trim() {
            "" => Err(IngestError::Config("Time format cannot be empty".to_string())),
            "epoch" => Ok(TimeFormat::Epoch),
            "epoch_ms" => Ok(TimeFormat::EpochMs),
            pattern => {
                let format = if pattern.contains('%') {
                    pattern.to_string()
                } else {
                    java_pattern_to_strftime(pattern)?
                };
                let has_offset = ["%z", "%:z", "%::z", "%#z"].iter().any(|z| format.contains(z));
                Ok(TimeFormat::Pattern { format, has_offset })
            }
        }
    }

    /// Parse a field value to whole epoch seconds, or `None` if it doesn't parse.
    pub fn epoch_seconds(&self, value: &str) -> Option<i64> {
        let value = value.trim();
        if value.is_empty() {
            return None;
        }

        match self {
            TimeFormat::Epoch => parse_truncated(value),
            TimeFormat::EpochMs => parse_truncated(value).map(|ms| ms.div_euclid(1000)),
            TimeFormat::Pattern { format, has_offset } => {
                if *has_offset {
                    return DateTime::parse_from_str(value, format)
                        .ok()
                        .map(|dt| dt.timestamp());
                }
                NaiveDateTime::parse_from_str(value, format)
                    .map(|dt| Some(dt.and_utc().timestamp()))
                    .or_else(|_| {
                        NaiveDate::parse_from_str(value, format)
                            .map(|d| d.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc().timestamp()))
                    })
                    .ok()
                    .flatten()
            }
        }
    }
}

/// Integer part of a decimal number such as `1350824400.5`.
fn parse_truncated(value: &str) -> Option<i64> {
    let (whole, fraction) = match value.split_once('.') {
        Some((whole, fraction)) => (whole, fraction),
        None => (value, ""),
    };
    if !fraction.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    match whole {
        "" | "-" | "+" if !fraction.is_empty() => Some(0),
        _ => whole.parse::<i64>().ok(),
    }
}

/// Translate a Java date pattern into chrono's strftime dialect.
fn java_pattern_to_strftime(pattern: &str) -> Result<String, IngestError> {
    let chars: Vec<char> = pattern.chars().collect();
    let mut out = String::with_capacity(pattern.len() * 2);
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];

        if c == '\'' {
            // '' is a literal quote; otherwise copy up to the closing quote
            if chars.get(i + 1) == Some(&'\'') {
                out.push('\'');
                i += 2;
                continue;
            }
            let mut j = i + 1;
            while j < chars.len() && chars[j] != '\'' {
                if chars[j] == '%' {
                    out.push('%');
                }
                out.push(chars[j]);
                j += 1;
            }
            if j == chars.len() {
                return Err(IngestError::Config(format!(
                    "Unterminated quote in time format '{}'",
                    pattern
                )));
            }
            i = j + 1;
            continue;
        }

        if !c.is_ascii_alphabetic() {
            if c == '%' {
                out.push('%');
            }
            out.push(c);
            i += 1;
            continue;
        }

        let mut run = 1;
        while i + run < chars.len() && chars[i + run] == c {
            run += 1;
        }

        let token = match (c, run) {
            ('y', 2) => "%y",
            ('y', _) | ('u', _) => "%Y",
            ('M', 1) | ('M', 2) => "%m",
            ('M', 3) => "%b",
            ('M', _) => "%B",
            ('d', _) => "%d",
            ('D', _) => "%j",
            ('H', _) | ('k', _) => "%H",
            ('h', _) | ('K', _) => "%I",
            ('m', _) => "%M",
            ('s', _) => "%S",
            ('S', 1..=3) => "%3f",
            ('S', 4..=6) => "%6f",
            ('S', _) => "%9f",
            ('a', _) => "%p",
            ('E', 1..=3) => "%a",
            ('E', _) => "%A",
            ('X', _) | ('x', _) | ('Z', _) => "%#z",
            ('z', _) => "%Z",
            _ => {
                return Err(IngestError::Config(format!(
                    "Unsupported pattern letter '{}' in time format '{}'",
                    c, pattern
                )))
            }
        };
        out.push_str(token);
        i += run;
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(format: &str, value: &str) -> Option<i64> {
        TimeFormat::parse(format).unwrap().epoch_seconds(value)
    }

    #[test]
    fn test_epoch_truncates_fraction() {
        assert_eq!(secs("epoch", "1350824400"), Some(1350824400));
        assert_eq!(secs("epoch", "1350824400.987"), Some(1350824400));
        assert_eq!(secs("epoch", " 42 "), Some(42));
        assert_eq!(secs("epoch", "not a time"), None);
        assert_eq!(secs("epoch", "12.3x"), None);
        assert_eq!(secs("epoch", ""), None);
    }

    #[test]
    fn test_epoch_ms() {
        assert_eq!(secs("epoch_ms", "1350824400999"), Some(1350824400));
        assert_eq!(secs("epoch_ms", "1350824400000.75"), Some(1350824400));
        assert_eq!(secs("epoch_ms", "abc"), None);
    }

    #[test]
    fn test_java_pattern_translation() {
        assert_eq!(
            java_pattern_to_strftime("yyyy-MM-dd'T'HH:mm:ssXXX").unwrap(),
            "%Y-%m-%dT%H:%M:%S%#z"
        );
        assert_eq!(
            java_pattern_to_strftime("dd/MMM/yyyy:HH:mm:ss Z").unwrap(),
            "%d/%b/%Y:%H:%M:%S %#z"
        );
        assert_eq!(java_pattern_to_strftime("HH:mm:ss.SSS").unwrap(), "%H:%M:%S.%3f");
        assert!(java_pattern_to_strftime("yyyy-MM-dd'T").is_err());
        assert!(java_pattern_to_strftime("yyyy-MM-dd G").is_err());
    }

    #[test]
    fn test_pattern_with_offset() {
        assert_eq!(secs("yyyy-MM-dd HH:mm:ssXXX", "2014-01-28 01:00:00+01:00"), Some(1390867200));
        assert_eq!(secs("yyyy-MM-dd HH:mm:ss X", "2014-01-28 00:00:00 Z"), Some(1390867200));
        assert_eq!(secs("yyyy-MM-ddHH:mm:ssX", "2014-01-2800:00:00+0000"), Some(1390867200));
    }

    #[test]
    fn test_pattern_without_offset_is_utc() {
        assert_eq!(secs("yyyy-MM-dd'T'HH:mm:ss", "2014-01-28T00:00:00"), Some(1390867200));
        assert_eq!(secs("%Y-%m-%d %H:%M:%S", "2014-01-28 00:00:00"), Some(1390867200));
        assert_eq!(secs("yyyy-MM-dd", "2014-01-28"), Some(1390867200));
        assert_eq!(secs("yyyy-MM-dd'T'HH:mm:ss", "28/01/2014"), None);
    }

    #[test]
    fn test_format_parse() {
        assert_eq!(TimeFormat::parse("epoch").unwrap(), TimeFormat::Epoch);
        assert_eq!(TimeFormat::parse("epoch_ms").unwrap(), TimeFormat::EpochMs);
        assert!(TimeFormat::parse("").is_err());
        assert!(matches!(
            TimeFormat::parse("%d/%m/%Y %H:%M").unwrap(),
            TimeFormat::Pattern { has_offset: false, .. }
        ));
    }
}
