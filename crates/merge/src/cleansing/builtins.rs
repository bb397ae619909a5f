use chrono::{NaiveDate, NaiveDateTime};
use fmd_core::{Dataset, FieldValue};
use serde_json::Value;

use super::{CleansingRegistry, Params};

pub(super) fn register_all(registry: &mut CleansingRegistry) {
    registry.register("normalize_text", normalize_text);
    registry.register("fill_nulls", fill_nulls);
    registry.register("parse_datetime", parse_datetime);
    registry.register("to_upper", to_upper);
    registry.register("to_lower", to_lower);
}

fn bool_param(params: &Params, key: &str, default: bool) -> Result<bool, String> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(default),
        Some(Value::Bool(b)) => Ok(*b),
        Some(other) => Err(format!("parameter '{key}' must be a boolean, got {other}")),
    }
}

fn str_param<'a>(params: &'a Params, key: &str) -> Result<Option<&'a str>, String> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.as_str())),
        Some(other) => Err(format!("parameter '{key}' must be a string, got {other}")),
    }
}

/// Apply `f` to every text value of the listed columns.
fn map_text(mut dataset: Dataset, columns: &[String], f: impl Fn(&str) -> FieldValue) -> Dataset {
    for row in &mut dataset {
        for c in columns {
            let Some(value) = row.get_mut(c) else { continue };
            let replaced = match value {
                FieldValue::Text(s) => f(s),
                _ => continue,
            };
            *value = replaced;
        }
    }
    dataset
}

/// Replace runs of two or more whitespace characters with one space.
fn collapse_whitespace(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut run = String::new();
    for ch in s.chars() {
        if ch.is_whitespace() {
            run.push(ch);
            continue;
        }
        match run.chars().count() {
            0 => {}
            1 => out.push_str(&run),
            _ => out.push(' '),
        }
        run.clear();
        out.push(ch);
    }
    match run.chars().count() {
        0 => {}
        1 => out.push_str(&run),
        _ => out.push(' '),
    }
    out
}

fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut word_start = true;
    for ch in s.chars() {
        if ch.is_whitespace() {
            word_start = true;
            out.push(ch);
        } else if word_start {
            out.extend(ch.to_uppercase());
            word_start = false;
        } else {
            out.extend(ch.to_lowercase());
        }
    }
    out
}

/// `{case: lower|upper|title, collapse_spaces = true, empty_as_null = true}`
fn normalize_text(dataset: Dataset, columns: &[String], params: &Params) -> Result<Dataset, String> {
    let case = str_param(params, "case")?;
    if let Some(c) = case {
        if !matches!(c, "lower" | "upper" | "title") {
            return Err(format!("unsupported case '{c}'"));
        }
    }
    let collapse = bool_param(params, "collapse_spaces", true)?;
    let empty_as_null = bool_param(params, "empty_as_null", true)?;

    Ok(map_text(dataset, columns, |s| {
        let mut v = s.trim().to_string();
        if collapse {
            v = collapse_whitespace(&v);
        }
        v = match case {
            Some("lower") => v.to_lowercase(),
            Some("upper") => v.to_uppercase(),
            Some("title") => title_case(&v),
            _ => v,
        };
        if empty_as_null && v.is_empty() {
            FieldValue::Null
        } else {
            FieldValue::Text(v)
        }
    }))
}

fn looks_like_date(s: &str) -> bool {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok()
}

/// `{defaults: {col: value}, default_string, default_numeric, default_date}`
///
/// Columns without an explicit default get one by the type of their first
/// non-null value.
fn fill_nulls(mut dataset: Dataset, columns: &[String], params: &Params) -> Result<Dataset, String> {
    let defaults = match params.get("defaults") {
        None | Some(Value::Null) => Params::new(),
        Some(Value::Object(map)) => map.clone(),
        Some(other) => return Err(format!("parameter 'defaults' must be an object, got {other}")),
    };
    let default_string = str_param(params, "default_string")?;
    let default_date = str_param(params, "default_date")?;
    let default_numeric = match params.get("default_numeric") {
        None | Some(Value::Null) => None,
        Some(v @ Value::Number(_)) => Some(FieldValue::from_json(v)),
        Some(other) => return Err(format!("parameter 'default_numeric' must be a number, got {other}")),
    };

    for c in columns {
        let fill = if let Some(v) = defaults.get(c) {
            Some(FieldValue::from_json(v))
        } else {
            let first = dataset
                .iter()
                .filter_map(|row| row.get(c))
                .find(|v| !v.is_null());
            match first {
                Some(FieldValue::Text(s)) if looks_like_date(s) && default_date.is_some() => {
                    default_date.map(FieldValue::from)
                }
                Some(FieldValue::Text(_)) => default_string.map(FieldValue::from),
                Some(FieldValue::Integer(_)) | Some(FieldValue::Float(_)) => default_numeric.clone(),
                _ => None,
            }
        };
        let Some(fill) = fill else { continue };

        for row in &mut dataset {
            match row.get_mut(c) {
                Some(v) if v.is_null() => *v = fill.clone(),
                Some(_) => {}
                None => {
                    row.insert(c.clone(), fill.clone());
                }
            }
        }
    }
    Ok(dataset)
}

/// Translate a `yyyy-MM-dd HH:mm:ss` style pattern into a chrono format string.
fn java_to_chrono(pattern: &str) -> String {
    let chars: Vec<char> = pattern.chars().collect();
    let mut out = String::new();
    let mut i = 0;
    while i < chars.len() {
        let ch = chars[i];
        if ch == '\'' {
            i += 1;
            while i < chars.len() && chars[i] != '\'' {
                out.push(chars[i]);
                i += 1;
            }
            i += 1;
            continue;
        }
        if ch == '.' && chars.get(i + 1) == Some(&'S') {
            // Dotted fraction of any width.
            out.push_str("%.f");
            i += 1;
            while i < chars.len() && chars[i] == 'S' {
                i += 1;
            }
            continue;
        }
        let mut run = 1;
        while i + run < chars.len() && chars[i + run] == ch {
            run += 1;
        }
        let token = match (ch, run) {
            ('y', 2) => "%y".to_string(),
            ('y', _) => "%Y".to_string(),
            ('M', _) => "%m".to_string(),
            ('d', _) => "%d".to_string(),
            ('H', _) => "%H".to_string(),
            ('m', _) => "%M".to_string(),
            ('s', _) => "%S".to_string(),
            ('S', 3) => "%3f".to_string(),
            ('S', 6) => "%6f".to_string(),
            ('S', 9) => "%9f".to_string(),
            ('S', _) => "%f".to_string(),
            ('%', n) => "%%".repeat(n),
            (c, n) => c.to_string().repeat(n),
        };
        out.push_str(&token);
        i += run;
    }
    out
}

fn parse_with(s: &str, fmt: &str, as_timestamp: bool) -> Option<String> {
    if as_timestamp {
        NaiveDateTime::parse_from_str(s, fmt)
            .ok()
            .or_else(|| NaiveDate::parse_from_str(s, fmt).ok().and_then(|d| d.and_hms_opt(0, 0, 0)))
            .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
    } else {
        NaiveDate::parse_from_str(s, fmt)
            .ok()
            .or_else(|| NaiveDateTime::parse_from_str(s, fmt).ok().map(|dt| dt.date()))
            .map(|d| d.format("%Y-%m-%d").to_string())
    }
}

/// `{target_type: date|timestamp, formats: [..], into, keep_original = true}`
fn parse_datetime(mut dataset: Dataset, columns: &[String], params: &Params) -> Result<Dataset, String> {
    let as_timestamp = match str_param(params, "target_type")?.unwrap_or("date") {
        "date" => false,
        "timestamp" => true,
        other => return Err(format!("unsupported target_type '{other}'")),
    };
    let formats: Vec<String> = match params.get("formats") {
        None | Some(Value::Null) => vec!["yyyy-MM-dd".to_string()],
        Some(Value::Array(items)) => items
            .iter()
            .map(|v| {
                v.as_str()
                    .map(String::from)
                    .ok_or_else(|| format!("format {v} is not a string"))
            })
            .collect::<Result<_, _>>()?,
        Some(other) => return Err(format!("parameter 'formats' must be a list, got {other}")),
    };
    // Patterns already in chrono syntax pass through untouched.
    let formats: Vec<String> = formats
        .into_iter()
        .map(|f| if f.contains('%') { f } else { java_to_chrono(&f) })
        .collect();
    let into = str_param(params, "into")?.filter(|_| columns.len() == 1);
    let keep_original = bool_param(params, "keep_original", true)?;

    for c in columns {
        let out_col = into.unwrap_or(c.as_str()).to_string();
        for row in &mut dataset {
            let parsed = match row.get(c) {
                Some(FieldValue::Text(s)) => {
                    let s = s.trim();
                    formats.iter().find_map(|f| parse_with(s, f, as_timestamp))
                }
                _ => None,
            };
            row.insert(out_col.clone(), parsed.map(FieldValue::Text).unwrap_or(FieldValue::Null));
            if !keep_original && out_col != *c {
                row.shift_remove(c);
            }
        }
    }
    Ok(dataset)
}

fn to_upper(dataset: Dataset, columns: &[String], _: &Params) -> Result<Dataset, String> {
    Ok(map_text(dataset, columns, |s| FieldValue::Text(s.to_uppercase())))
}

fn to_lower(dataset: Dataset, columns: &[String], _: &Params) -> Result<Dataset, String> {
    Ok(map_text(dataset, columns, |s| FieldValue::Text(s.to_lowercase())))
}
