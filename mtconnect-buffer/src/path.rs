//! A small XPath subset for selecting data items.
//!
//! Supported forms:
//!
//! ```text
//! //DataItem
//! //DataItem[@type="POSITION" and @subType='ACTUAL']
//! //Device[@name="mill-1"]//DataItem[@category="CONDITION"]
//! //DataItem[@id="x1"]|//DataItem[@id="y1"]
//! ```
//!
//! Intermediate component steps (`Axes`, `Linear`, ...) are accepted and
//! ignored. The final step must be `DataItem` or `*`.

use mtconnect_types::{DataItemDescription, DeviceDescription};

use crate::error::{BufferError, Result};

/// One `@attr="value"` test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Predicate {
    pub attr: String,
    pub value: String,
}

impl Predicate {
    fn matches_data_item(&self, item: &DataItemDescription) -> bool {
        let v = self.value.as_str();
        match self.attr.as_str() {
            "id" => item.id == v,
            "name" => item.name.as_deref() == Some(v),
            "type" => item.kind == v,
            "subType" => item.sub_type.as_deref() == Some(v),
            "category" => item.category.as_str() == v,
            "units" => item.units.as_deref() == Some(v),
            _ => false,
        }
    }

    fn matches_device(&self, device: &DeviceDescription) -> bool {
        let v = self.value.as_str();
        match self.attr.as_str() {
            "uuid" | "id" => device.uuid == v,
            "name" => device.name == v,
            _ => false,
        }
    }
}

/// One `|`-separated alternative.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathTerm {
    pub device: Vec<Predicate>,
    pub data_item: Vec<Predicate>,
}

/// A parsed path expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathExpr {
    terms: Vec<PathTerm>,
}

impl PathExpr {
    /// Parse an expression. Malformed input is an `InvalidRequest`.
    pub fn parse(input: &str) -> Result<Self> {
        let invalid = |reason: &str| BufferError::InvalidRequest(format!("path {:?}: {}", input, reason));

        let mut terms = Vec::new();
        for alternative in split_top_level(input, '|') {
            let alternative = alternative.trim();
            if alternative.is_empty() {
                return Err(invalid("empty alternative"));
            }
            terms.push(parse_term(alternative).map_err(|e| invalid(&e))?);
        }

        if terms.is_empty() {
            return Err(invalid("empty expression"));
        }
        Ok(Self { terms })
    }

    /// Check whether a data item of `device` is selected.
    pub fn matches(&self, device: &DeviceDescription, item: &DataItemDescription) -> bool {
        self.terms.iter().any(|term| {
            term.device.iter().all(|p| p.matches_device(device))
                && term.data_item.iter().all(|p| p.matches_data_item(item))
        })
    }
}

fn split_top_level(input: &str, sep: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut start = 0;

    for (i, c) in input.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') => quote = Some(c),
            (None, '[') => depth += 1,
            (None, ']') => depth = depth.saturating_sub(1),
            (None, c) if c == sep && depth == 0 => {
                parts.push(&input[start..i]);
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    parts.push(&input[start..]);
    parts
}

fn parse_term(input: &str) -> std::result::Result<PathTerm, String> {
    if !input.starts_with('/') {
        return Err("must start with '/'".to_string());
    }

    let steps: Vec<&str> = split_top_level(input, '/')
        .into_iter()
        .filter(|s| !s.is_empty())
        .collect();
    let Some((last, components)) = steps.split_last() else {
        return Err("no steps".to_string());
    };

    let mut term = PathTerm::default();
    for step in components {
        let (name, predicates) = parse_step(step)?;
        if name == "Device" {
            term.device.extend(predicates);
        }
    }

    let (name, predicates) = parse_step(last)?;
    if name != "DataItem" && name != "*" {
        return Err(format!("final step must be DataItem, found {:?}", name));
    }
    term.data_item = predicates;
    Ok(term)
}

fn parse_step(step: &str) -> std::result::Result<(&str, Vec<Predicate>), String> {
    let step = step.trim();
    let (name, rest) = match step.find('[') {
        Some(i) => (&step[..i], &step[i..]),
        None => (step, ""),
    };

    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '*' || c == '_') {
        return Err(format!("invalid step {:?}", step));
    }

    let mut predicates = Vec::new();
    let mut rest = rest;
    while !rest.is_empty() {
        let body = rest
            .strip_prefix('[')
            .ok_or_else(|| format!("unexpected {:?}", rest))?;
        let close = find_close(body).ok_or_else(|| "unterminated '['".to_string())?;
        for clause in split_and(&body[..close]) {
            predicates.push(parse_predicate(clause)?);
        }
        rest = &body[close + 1..];
    }

    Ok((name, predicates))
}

fn find_close(body: &str) -> Option<usize> {
    let mut quote = None;
    for (i, c) in body.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') => quote = Some(c),
            (None, ']') => return Some(i),
            _ => {}
        }
    }
    None
}

fn split_and(clauses: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut quote = None;
    let mut start = 0;
    let bytes = clauses.as_bytes();

    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i] as char;
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None if c == '"' || c == '\'' => quote = Some(c),
            None if clauses.get(i..).is_some_and(|s| s.starts_with(" and ")) => {
                parts.push(&clauses[start..i]);
                i += " and ".len();
                start = i;
                continue;
            }
            None => {}
        }
        i += 1;
    }
    parts.push(&clauses[start..]);
    parts
}

fn parse_predicate(clause: &str) -> std::result::Result<Predicate, String> {
    let clause = clause.trim();
    let body = clause
        .strip_prefix('@')
        .ok_or_else(|| format!("predicate {:?} must test an attribute", clause))?;
    let (attr, value) = body
        .split_once('=')
        .ok_or_else(|| format!("predicate {:?} must be an equality", clause))?;

    let value = value.trim();
    let unquoted = value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .or_else(|| value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')))
        .ok_or_else(|| format!("value in {:?} must be quoted", clause))?;

    Ok(Predicate {
        attr: attr.trim().to_string(),
        value: unquoted.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use mtconnect_types::Category;

    fn item(id: &str, kind: &str, category: Category) -> DataItemDescription {
        DataItemDescription {
            id: id.to_string(),
            name: None,
            category,
            kind: kind.to_string(),
            sub_type: None,
            units: None,
        }
    }

    fn device(name: &str) -> DeviceDescription {
        DeviceDescription {
            uuid: format!("{}-uuid", name),
            name: name.to_string(),
            data_items: vec![],
        }
    }

    #[test]
    fn bare_data_item_matches_all() {
        let expr = PathExpr::parse("//DataItem").unwrap();
        assert!(expr.matches(&device("m"), &item("x", "POSITION", Category::Sample)));
    }

    #[test]
    fn predicates_and_alternatives() {
        let expr =
            PathExpr::parse(r#"//DataItem[@type="POSITION" and @category='SAMPLE']|//DataItem[@id="avail"]"#)
                .unwrap();
        assert_eq!(expr.terms.len(), 2);

        let d = device("m");
        assert!(expr.matches(&d, &item("x", "POSITION", Category::Sample)));
        assert!(expr.matches(&d, &item("avail", "AVAILABILITY", Category::Event)));
        assert!(!expr.matches(&d, &item("x", "POSITION", Category::Event)));
    }

    #[test]
    fn device_step_restricts_device() {
        let expr = PathExpr::parse(r#"//Device[@name="mill"]//Axes//DataItem"#).unwrap();
        let x = item("x", "POSITION", Category::Sample);
        assert!(expr.matches(&device("mill"), &x));
        assert!(!expr.matches(&device("lathe"), &x));
    }

    #[test]
    fn quoted_separators_are_literal() {
        let expr = PathExpr::parse(r#"//DataItem[@id="a|b and c"]"#).unwrap();
        assert_eq!(expr.terms[0].data_item[0].value, "a|b and c");
    }

    #[test]
    fn malformed_paths_are_invalid_requests() {
        for bad in [
            "",
            "DataItem",
            "//DataItem[@id=x]",
            "//DataItem[@id=\"x\"",
            "//Device",
            "//DataItem|",
            "//DataItem[type=\"x\"]",
        ] {
            assert!(
                matches!(PathExpr::parse(bad), Err(BufferError::InvalidRequest(_))),
                "{:?} should fail",
                bad
            );
        }
    }
}
