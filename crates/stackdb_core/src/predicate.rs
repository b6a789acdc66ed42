//! Predicates and fetch requests.

use crate::error::{CoreError, CoreResult};
use crate::schema::EntityDescription;
use stackdb_codec::{RecordDictionary, Value};
use std::cmp::Ordering;

/// A filter over records, evaluated against their field values.
///
/// A field absent from a dictionary is treated as `Null`. Range comparisons
/// only match values of the same kind.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Predicate {
    /// Matches every record.
    #[default]
    All,
    /// Field equals value.
    Eq(String, Value),
    /// Field differs from value.
    Ne(String, Value),
    /// Field is less than value.
    Lt(String, Value),
    /// Field is less than or equal to value.
    Le(String, Value),
    /// Field is greater than value.
    Gt(String, Value),
    /// Field is greater than or equal to value.
    Ge(String, Value),
    /// Field equals one of the values.
    In(String, Vec<Value>),
    /// Field is null or absent.
    IsNull(String),
    /// Field is present and non-null.
    NotNull(String),
    /// All sub-predicates match.
    And(Vec<Predicate>),
    /// Any sub-predicate matches.
    Or(Vec<Predicate>),
    /// The sub-predicate does not match.
    Not(Box<Predicate>),
}

impl Predicate {
    /// `field == value`.
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Eq(field.into(), value.into())
    }

    /// `field != value`.
    pub fn ne(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Ne(field.into(), value.into())
    }

    /// `field < value`.
    pub fn lt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Lt(field.into(), value.into())
    }

    /// `field <= value`.
    pub fn le(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Le(field.into(), value.into())
    }

    /// `field > value`.
    pub fn gt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Gt(field.into(), value.into())
    }

    /// `field >= value`.
    pub fn ge(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Ge(field.into(), value.into())
    }

    /// `field IN values`.
    pub fn is_in<V: Into<Value>>(field: impl Into<String>, values: impl IntoIterator<Item = V>) -> Self {
        Self::In(field.into(), values.into_iter().map(Into::into).collect())
    }

    /// `field IS NULL`.
    pub fn is_null(field: impl Into<String>) -> Self {
        Self::IsNull(field.into())
    }

    /// `field IS NOT NULL`.
    pub fn not_null(field: impl Into<String>) -> Self {
        Self::NotNull(field.into())
    }

    /// Conjunction with another predicate.
    #[must_use]
    pub fn and(self, other: Predicate) -> Self {
        match (self, other) {
            (Self::All, p) | (p, Self::All) => p,
            (Self::And(mut ps), Self::And(qs)) => {
                ps.extend(qs);
                Self::And(ps)
            }
            (Self::And(mut ps), q) => {
                ps.push(q);
                Self::And(ps)
            }
            (p, q) => Self::And(vec![p, q]),
        }
    }

    /// Disjunction with another predicate.
    #[must_use]
    pub fn or(self, other: Predicate) -> Self {
        match (self, other) {
            (Self::Or(mut ps), q) => {
                ps.push(q);
                Self::Or(ps)
            }
            (p, q) => Self::Or(vec![p, q]),
        }
    }

    /// Negation.
    #[must_use]
    pub fn negate(self) -> Self {
        Self::Not(Box::new(self))
    }

    /// Evaluates the predicate against a dictionary.
    #[must_use]
    pub fn matches(&self, dict: &RecordDictionary) -> bool {
        let field = |name: &str| field_or_null(dict, name);
        let cmp = |name: &str, v: &Value, ok: fn(Ordering) -> bool| {
            field_or_null(dict, name).compare(v).is_some_and(ok)
        };
        match self {
            Self::All => true,
            Self::Eq(f, v) => field(f) == v,
            Self::Ne(f, v) => field(f) != v,
            Self::Lt(f, v) => cmp(f, v, Ordering::is_lt),
            Self::Le(f, v) => cmp(f, v, Ordering::is_le),
            Self::Gt(f, v) => cmp(f, v, Ordering::is_gt),
            Self::Ge(f, v) => cmp(f, v, Ordering::is_ge),
            Self::In(f, vs) => vs.contains(field(f)),
            Self::IsNull(f) => field(f).is_null(),
            Self::NotNull(f) => !field(f).is_null(),
            Self::And(ps) => ps.iter().all(|p| p.matches(dict)),
            Self::Or(ps) => ps.iter().any(|p| p.matches(dict)),
            Self::Not(p) => !p.matches(dict),
        }
    }

    /// Collects every field the predicate refers to.
    pub fn fields(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_fields(&mut out);
        out
    }

    fn collect_fields<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Self::All => {}
            Self::Eq(f, _)
            | Self::Ne(f, _)
            | Self::Lt(f, _)
            | Self::Le(f, _)
            | Self::Gt(f, _)
            | Self::Ge(f, _)
            | Self::In(f, _)
            | Self::IsNull(f)
            | Self::NotNull(f) => out.push(f),
            Self::And(ps) | Self::Or(ps) => ps.iter().for_each(|p| p.collect_fields(out)),
            Self::Not(p) => p.collect_fields(out),
        }
    }

    /// Checks that every referenced field is an attribute of `entity`.
    pub(crate) fn check_against(&self, entity: &EntityDescription) -> CoreResult<()> {
        match self.fields().into_iter().find(|f| !entity.has_attribute(f)) {
            Some(attribute) => Err(CoreError::UnknownAttribute {
                entity: entity.name.clone(),
                attribute: attribute.to_string(),
            }),
            None => Ok(()),
        }
    }
}

const NULL: &Value = &Value::Null;

fn field_or_null<'a>(dict: &'a RecordDictionary, name: &str) -> &'a Value {
    dict.get(name).unwrap_or(NULL)
}

/// One sort key of a fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortDescriptor {
    /// Field to sort by.
    pub key: String,
    /// Ascending if true.
    pub ascending: bool,
}

impl SortDescriptor {
    /// Ascending sort on `key`.
    pub fn ascending(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            ascending: true,
        }
    }

    /// Descending sort on `key`.
    pub fn descending(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            ascending: false,
        }
    }
}

/// What a find delivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResultType {
    /// Live records registered in the context.
    #[default]
    Records,
    /// Detached dictionaries.
    Dictionaries,
}

/// A complete query: entity, predicate, ordering and window.
///
/// Without sort descriptors results come back in store order, which is the
/// order records were first inserted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    /// Entity to fetch.
    pub entity: String,
    /// Filter.
    pub predicate: Predicate,
    /// Sort keys, most significant first.
    pub sort: Vec<SortDescriptor>,
    /// Number of leading results to skip.
    pub offset: usize,
    /// Maximum number of results.
    pub limit: Option<usize>,
    /// Records or dictionaries.
    pub result_type: ResultType,
}

impl FetchRequest {
    /// Fetches every record of `entity`.
    pub fn new(entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            predicate: Predicate::All,
            sort: Vec::new(),
            offset: 0,
            limit: None,
            result_type: ResultType::Records,
        }
    }

    /// Sets the predicate.
    #[must_use]
    pub fn predicate(mut self, predicate: Predicate) -> Self {
        self.predicate = predicate;
        self
    }

    /// Appends a sort key.
    #[must_use]
    pub fn sort_by(mut self, descriptor: SortDescriptor) -> Self {
        self.sort.push(descriptor);
        self
    }

    /// Sets the offset.
    #[must_use]
    pub const fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    /// Sets the limit.
    #[must_use]
    pub const fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Sets the result type.
    #[must_use]
    pub const fn result_type(mut self, result_type: ResultType) -> Self {
        self.result_type = result_type;
        self
    }

    /// Shorthand for `result_type(ResultType::Dictionaries)`.
    #[must_use]
    pub const fn dictionaries(self) -> Self {
        self.result_type(ResultType::Dictionaries)
    }

    /// Checks predicate and sort keys against the entity.
    pub(crate) fn check_against(&self, entity: &EntityDescription) -> CoreResult<()> {
        self.predicate.check_against(entity)?;
        match self.sort.iter().find(|s| !entity.has_attribute(&s.key)) {
            Some(s) => Err(CoreError::UnknownAttribute {
                entity: entity.name.clone(),
                attribute: s.key.clone(),
            }),
            None => Ok(()),
        }
    }

    /// Orders two candidates, falling back to store order.
    pub(crate) fn order(&self, a: &RecordDictionary, a_seq: u64, b: &RecordDictionary, b_seq: u64) -> Ordering {
        for s in &self.sort {
            let va = field_or_null(a, &s.key);
            let vb = field_or_null(b, &s.key);
            let ord = if s.ascending { va.cmp(vb) } else { vb.cmp(va) };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        a_seq.cmp(&b_seq)
    }

    /// Applies offset and limit to sorted results.
    pub(crate) fn window<T>(&self, items: Vec<T>) -> Vec<T> {
        let take = self.limit.unwrap_or(usize::MAX);
        items.into_iter().skip(self.offset).take(take).collect()
    }
}
