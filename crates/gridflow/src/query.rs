//! Query shapes: filter expressions, sort specs, group specs, load options.
//!
//! These are the value types negotiated between the [`crate::DataSource`] and
//! a [`crate::DataStore`]: a load either ships them to the store (remote
//! execution) or runs them locally against the raw rows the store returned.
//! Every type is `PartialEq` so the adapter can decide whether a query
//! dimension actually changed before resetting paging or issuing a reload.

use serde_json::Value;

/// Comparison operators for filter leaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    /// Substring match, case-insensitive. Non-string cell values are
    /// stringified first.
    Contains,
    /// Prefix match, case-insensitive.
    StartsWith,
}

/// A filter expression tree over row payloads.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Compare the named field of the row against a constant.
    Cmp {
        field: String,
        op: CmpOp,
        value: Value,
    },
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
}

impl Filter {
    /// Shorthand for a single comparison leaf.
    pub fn cmp(field: impl Into<String>, op: CmpOp, value: Value) -> Self {
        Self::Cmp {
            field: field.into(),
            op,
            value,
        }
    }

    /// Evaluate the filter against one row payload.
    ///
    /// Missing fields evaluate as `null`; `null` compares equal only to
    /// `null` and is ordered before every other value.
    pub fn matches(&self, row: &Value) -> bool {
        match self {
            Self::Cmp { field, op, value } => {
                let cell = field_value(row, field);
                match op {
                    CmpOp::Eq => cell == *value,
                    CmpOp::Ne => cell != *value,
                    CmpOp::Lt => compare_values(&cell, value) == std::cmp::Ordering::Less,
                    CmpOp::Le => compare_values(&cell, value) != std::cmp::Ordering::Greater,
                    CmpOp::Gt => compare_values(&cell, value) == std::cmp::Ordering::Greater,
                    CmpOp::Ge => compare_values(&cell, value) != std::cmp::Ordering::Less,
                    CmpOp::Contains => {
                        stringify(&cell).to_lowercase().contains(&stringify(value).to_lowercase())
                    }
                    CmpOp::StartsWith => stringify(&cell)
                        .to_lowercase()
                        .starts_with(&stringify(value).to_lowercase()),
                }
            }
            Self::And(parts) => parts.iter().all(|f| f.matches(row)),
            Self::Or(parts) => parts.iter().any(|f| f.matches(row)),
            Self::Not(inner) => !inner.matches(row),
        }
    }
}

/// Build a search filter: `Contains` over each searchable field, OR-joined.
///
/// Returns `None` when the search text is empty or there is nothing to
/// search over.
pub fn search_filter(fields: &[String], text: &str) -> Option<Filter> {
    if text.is_empty() || fields.is_empty() {
        return None;
    }
    let parts: Vec<Filter> = fields
        .iter()
        .map(|f| Filter::cmp(f.clone(), CmpOp::Contains, Value::String(text.to_owned())))
        .collect();
    if parts.len() == 1 {
        parts.into_iter().next()
    } else {
        Some(Filter::Or(parts))
    }
}

/// One sort dimension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortSpec {
    /// The field to order by.
    pub selector: String,
    /// Descending order when set.
    pub desc: bool,
}

impl SortSpec {
    pub fn asc(selector: impl Into<String>) -> Self {
        Self {
            selector: selector.into(),
            desc: false,
        }
    }

    pub fn desc(selector: impl Into<String>) -> Self {
        Self {
            selector: selector.into(),
            desc: true,
        }
    }
}

/// One grouping dimension. Groups nest in declaration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupSpec {
    /// The field whose distinct values form the groups.
    pub selector: String,
    /// Descending group-key order when set.
    pub desc: bool,
}

impl GroupSpec {
    pub fn by(selector: impl Into<String>) -> Self {
        Self {
            selector: selector.into(),
            desc: false,
        }
    }
}

/// The full request shape handed to a store's `load`.
///
/// Stores honor only the dimensions they declared in their capabilities; the
/// adapter re-runs the rest locally on the returned rows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadOptions {
    pub filter: Option<Filter>,
    pub sort: Vec<SortSpec>,
    pub group: Vec<GroupSpec>,
    /// Rows to skip, for offset paging.
    pub skip: Option<usize>,
    /// Page size, for offset paging.
    pub take: Option<usize>,
    /// Whether the store should count matching rows across all pages.
    pub require_total_count: bool,
    /// Opaque cursor from the previous page, for token paging.
    pub continuation: Option<String>,
}

/// What a store's `load` resolves to.
#[derive(Debug, Clone, Default)]
pub struct LoadResult {
    /// The raw row payloads.
    pub rows: Vec<Value>,
    /// Total matching rows across all pages, when requested and known.
    pub total_count: Option<i64>,
    /// Cursor for the next page, for token paging. `None` means last page.
    pub next_token: Option<String>,
}

/// Look up a (possibly dotted) field path in a row payload.
pub fn field_value(row: &Value, field: &str) -> Value {
    let mut current = row;
    for part in field.split('.') {
        match current.get(part) {
            Some(v) => current = v,
            None => return Value::Null,
        }
    }
    current.clone()
}

/// Total order over JSON values for sorting and range filters.
///
/// `null` sorts first, then booleans, numbers, strings; arrays and objects
/// fall back to serialized comparison. Mixed types order by that type rank so
/// the sort stays total.
pub fn compare_values(a: &Value, b: &Value) -> std::cmp::Ordering {
    use std::cmp::Ordering;

    fn rank(v: &Value) -> u8 {
        match v {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Number(_) => 2,
            Value::String(_) => 3,
            Value::Array(_) => 4,
            Value::Object(_) => 5,
        }
    }

    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => {
            let xf = x.as_f64().unwrap_or(f64::NAN);
            let yf = y.as_f64().unwrap_or(f64::NAN);
            xf.partial_cmp(&yf).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Array(_), Value::Array(_)) | (Value::Object(_), Value::Object(_)) => {
            a.to_string().cmp(&b.to_string())
        }
        _ => rank(a).cmp(&rank(b)),
    }
}

fn stringify(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Stable sort of row payloads by the given sort dimensions.
pub fn sort_rows(rows: &mut [Value], sort: &[SortSpec]) {
    if sort.is_empty() {
        return;
    }
    rows.sort_by(|a, b| {
        for spec in sort {
            let av = field_value(a, &spec.selector);
            let bv = field_value(b, &spec.selector);
            let ord = compare_values(&av, &bv);
            if ord != std::cmp::Ordering::Equal {
                return if spec.desc { ord.reverse() } else { ord };
            }
        }
        std::cmp::Ordering::Equal
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_cmp_filter() {
        let filter = Filter::cmp("age", CmpOp::Gt, json!(30));
        assert!(filter.matches(&json!({"age": 31})));
        assert!(!filter.matches(&json!({"age": 30})));
        assert!(!filter.matches(&json!({"name": "x"})));
    }

    #[test]
    fn test_compound_filter() {
        let filter = Filter::And(vec![
            Filter::cmp("age", CmpOp::Ge, json!(18)),
            Filter::Not(Box::new(Filter::cmp("name", CmpOp::Eq, json!("Bob")))),
        ]);
        assert!(filter.matches(&json!({"age": 20, "name": "Alice"})));
        assert!(!filter.matches(&json!({"age": 20, "name": "Bob"})));
        assert!(!filter.matches(&json!({"age": 10, "name": "Alice"})));
    }

    #[test]
    fn test_contains_is_case_insensitive() {
        let filter = Filter::cmp("name", CmpOp::Contains, json!("ali"));
        assert!(filter.matches(&json!({"name": "Alice"})));
        assert!(!filter.matches(&json!({"name": "Bob"})));
    }

    #[test]
    fn test_search_filter_joins_fields() {
        let fields = vec!["name".to_owned(), "city".to_owned()];
        let filter = search_filter(&fields, "ber").unwrap();
        assert!(filter.matches(&json!({"name": "x", "city": "Berlin"})));
        assert!(filter.matches(&json!({"name": "Bert", "city": "y"})));
        assert!(!filter.matches(&json!({"name": "x", "city": "y"})));

        assert_eq!(search_filter(&fields, ""), None);
        assert_eq!(search_filter(&[], "ber"), None);
    }

    #[test]
    fn test_dotted_field_path() {
        let row = json!({"address": {"city": "Paris"}});
        assert_eq!(field_value(&row, "address.city"), json!("Paris"));
        assert_eq!(field_value(&row, "address.zip"), Value::Null);
    }

    #[test]
    fn test_sort_rows_stable_multi_key() {
        let mut rows = vec![
            json!({"a": 2, "b": 1}),
            json!({"a": 1, "b": 2}),
            json!({"a": 1, "b": 1}),
        ];
        sort_rows(&mut rows, &[SortSpec::asc("a"), SortSpec::desc("b")]);
        assert_eq!(
            rows,
            vec![
                json!({"a": 1, "b": 2}),
                json!({"a": 1, "b": 1}),
                json!({"a": 2, "b": 1}),
            ]
        );
    }

    #[test]
    fn test_null_sorts_first() {
        let mut rows = vec![json!({"a": 1}), json!({"b": 1}), json!({"a": 0})];
        sort_rows(&mut rows, &[SortSpec::asc("a")]);
        assert_eq!(rows[0], json!({"b": 1}));
        assert_eq!(rows[1], json!({"a": 0}));
    }
}
