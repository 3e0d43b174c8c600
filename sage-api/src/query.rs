//! Minimal query model over the hosted store's tables.
//!
//! A `Select` can be rendered into PostgREST query parameters, or evaluated
//! directly against JSON rows held in memory.

use std::cmp::Ordering;

use serde_json::Value;

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Table {
    Comments,
    CommentLikes,
    FeatureReactions,
    UserProfiles,
    EmailSubscriptions,
}

impl Table {
    pub fn name(&self) -> &'static str {
        match self {
            Table::Comments => "comments",
            Table::CommentLikes => "comment_likes",
            Table::FeatureReactions => "feature_reactions",
            Table::UserProfiles => "user_profiles",
            Table::EmailSubscriptions => "email_subscriptions",
        }
    }

    /// Whether rows of this table carry an `is_deleted` flag
    pub fn soft_deletes(&self) -> bool {
        matches!(
            self,
            Table::Comments | Table::CommentLikes | Table::FeatureReactions
        )
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Filter {
    Eq(&'static str, Value),
    In(&'static str, Vec<Value>),
    IsNull(&'static str),
}

impl Filter {
    pub fn matches(&self, row: &Value) -> bool {
        match self {
            Filter::Eq(col, v) => row.get(col) == Some(v),
            Filter::In(col, vs) => row.get(col).map_or(false, |x| vs.contains(x)),
            Filter::IsNull(col) => row.get(col).map_or(true, Value::is_null),
        }
    }

    fn to_postgrest(&self) -> (String, String) {
        match self {
            Filter::Eq(col, v) => (col.to_string(), format!("eq.{}", render_value(v))),
            Filter::In(col, vs) => {
                let items = vs.iter().map(render_list_item).collect::<Vec<_>>();
                (col.to_string(), format!("in.({})", items.join(",")))
            }
            Filter::IsNull(col) => (col.to_string(), String::from("is.null")),
        }
    }
}

fn render_value(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        v => v.to_string(),
    }
}

// strings are always quoted so that commas and parentheses survive
fn render_list_item(v: &Value) -> String {
    match v {
        Value::String(s) => format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\"")),
        v => v.to_string(),
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Order {
    pub column: &'static str,
    pub descending: bool,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Page {
    pub offset: usize,
    pub limit: usize,
}

impl Page {
    pub fn first(limit: usize) -> Page {
        Page { offset: 0, limit }
    }

    pub fn next(&self) -> Page {
        Page {
            offset: self.offset.saturating_add(self.limit),
            limit: self.limit,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Select {
    pub filters: Vec<Filter>,
    pub order: Vec<Order>,
    pub page: Option<Page>,
}

impl Select {
    pub fn new() -> Select {
        Select::default()
    }

    /// Only rows that have not been soft-deleted
    pub fn active() -> Select {
        Select::new().eq("is_deleted", false)
    }

    pub fn eq(mut self, column: &'static str, value: impl Into<Value>) -> Select {
        self.filters.push(Filter::Eq(column, value.into()));
        self
    }

    pub fn is_in<V: Into<Value>>(
        mut self,
        column: &'static str,
        values: impl IntoIterator<Item = V>,
    ) -> Select {
        self.filters.push(Filter::In(
            column,
            values.into_iter().map(Into::into).collect(),
        ));
        self
    }

    pub fn is_null(mut self, column: &'static str) -> Select {
        self.filters.push(Filter::IsNull(column));
        self
    }

    pub fn order_by(mut self, column: &'static str, descending: bool) -> Select {
        self.order.push(Order { column, descending });
        self
    }

    pub fn paginate(mut self, page: Page) -> Select {
        self.page = Some(page);
        self
    }

    pub fn matches(&self, row: &Value) -> bool {
        self.filters.iter().all(|f| f.matches(row))
    }

    pub fn to_postgrest(&self) -> Vec<(String, String)> {
        let mut params = self
            .filters
            .iter()
            .map(Filter::to_postgrest)
            .collect::<Vec<_>>();
        if !self.order.is_empty() {
            let order = self
                .order
                .iter()
                .map(|o| match o.descending {
                    true => format!("{}.desc", o.column),
                    false => format!("{}.asc", o.column),
                })
                .collect::<Vec<_>>();
            params.push((String::from("order"), order.join(",")));
        }
        if let Some(page) = self.page {
            params.push((String::from("offset"), page.offset.to_string()));
            params.push((String::from("limit"), page.limit.to_string()));
        }
        params
    }

    /// Evaluates this query over in-memory rows: filter, then order, then paginate
    pub fn apply(&self, rows: impl IntoIterator<Item = Value>) -> Vec<Value> {
        let mut res = rows
            .into_iter()
            .filter(|r| self.matches(r))
            .collect::<Vec<_>>();
        res.sort_by(|a, b| {
            self.order
                .iter()
                .map(|o| {
                    let ord = compare_values(a.get(o.column), b.get(o.column));
                    match o.descending {
                        true => ord.reverse(),
                        false => ord,
                    }
                })
                .find(|o| *o != Ordering::Equal)
                .unwrap_or(Ordering::Equal)
        });
        match self.page {
            None => res,
            Some(p) => res.into_iter().skip(p.offset).take(p.limit).collect(),
        }
    }
}

/// Nulls sort last; RFC 3339 strings compare as instants
fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    let a = a.filter(|v| !v.is_null());
    let b = b.filter(|v| !v.is_null());
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(Value::Number(a)), Some(Value::Number(b))) => a
            .as_f64()
            .partial_cmp(&b.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::Bool(a)), Some(Value::Bool(b))) => a.cmp(b),
        (Some(Value::String(a)), Some(Value::String(b))) => {
            match (
                chrono::DateTime::parse_from_rfc3339(a),
                chrono::DateTime::parse_from_rfc3339(b),
            ) {
                (Ok(a), Ok(b)) => a.cmp(&b),
                _ => a.cmp(b),
            }
        }
        (Some(a), Some(b)) => a.to_string().cmp(&b.to_string()),
    }
}
