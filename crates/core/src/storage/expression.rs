//! Filter and key-condition expressions.
//!
//! An [`Expression`] is a typed condition tree plus the placeholder maps the
//! store needs (`#name` placeholders for attribute names, `:value` placeholders
//! for values). It renders to the store's expression syntax and can also be
//! evaluated against an [`Item`] directly.
//!
//! Combining expressions namespaces the placeholders of every sub-expression
//! with its position (`#attr` becomes `#attr_0` on the left and `#attr_1` on
//! the right), so combined expressions never collide.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use super::types::{AttrValue, Item};

/// Attribute used to flag soft-deleted records.
pub const DELETED_ATTRIBUTE: &str = "isDeleted";

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparator {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Comparator {
    fn symbol(self) -> &'static str {
        match self {
            Comparator::Eq => "=",
            Comparator::Ne => "<>",
            Comparator::Lt => "<",
            Comparator::Le => "<=",
            Comparator::Gt => ">",
            Comparator::Ge => ">=",
        }
    }
}

/// Boolean connective used by [`combine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOperator {
    And,
    Or,
}

impl fmt::Display for LogicalOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogicalOperator::And => write!(f, "AND"),
            LogicalOperator::Or => write!(f, "OR"),
        }
    }
}

/// Condition tree. Attribute names and values are referenced by placeholder.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Compare {
        name: String,
        op: Comparator,
        value: String,
    },
    Contains {
        name: String,
        value: String,
    },
    BeginsWith {
        name: String,
        value: String,
    },
    Between {
        name: String,
        low: String,
        high: String,
    },
    AttributeExists {
        name: String,
    },
    AttributeNotExists {
        name: String,
    },
    Logical {
        op: LogicalOperator,
        left: Box<Condition>,
        right: Box<Condition>,
    },
    Not(Box<Condition>),
}

impl Condition {
    fn render(&self) -> String {
        match self {
            Condition::Compare { name, op, value } => format!("{name} {} {value}", op.symbol()),
            Condition::Contains { name, value } => format!("contains({name}, {value})"),
            Condition::BeginsWith { name, value } => format!("begins_with({name}, {value})"),
            Condition::Between { name, low, high } => format!("{name} BETWEEN {low} AND {high}"),
            Condition::AttributeExists { name } => format!("attribute_exists({name})"),
            Condition::AttributeNotExists { name } => format!("attribute_not_exists({name})"),
            Condition::Logical { op, left, right } => {
                format!("({}) {op} ({})", left.render(), right.render())
            }
            Condition::Not(inner) => format!("NOT ({})", inner.render()),
        }
    }

    fn rename(self, rename: &impl Fn(String) -> String) -> Self {
        match self {
            Condition::Compare { name, op, value } => Condition::Compare {
                name: rename(name),
                op,
                value: rename(value),
            },
            Condition::Contains { name, value } => Condition::Contains {
                name: rename(name),
                value: rename(value),
            },
            Condition::BeginsWith { name, value } => Condition::BeginsWith {
                name: rename(name),
                value: rename(value),
            },
            Condition::Between { name, low, high } => Condition::Between {
                name: rename(name),
                low: rename(low),
                high: rename(high),
            },
            Condition::AttributeExists { name } => Condition::AttributeExists {
                name: rename(name),
            },
            Condition::AttributeNotExists { name } => Condition::AttributeNotExists {
                name: rename(name),
            },
            Condition::Logical { op, left, right } => Condition::Logical {
                op,
                left: Box::new(left.rename(rename)),
                right: Box::new(right.rename(rename)),
            },
            Condition::Not(inner) => Condition::Not(Box::new(inner.rename(rename))),
        }
    }
}

/// A condition together with its placeholder maps.
#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    condition: Condition,
    names: BTreeMap<String, String>,
    values: BTreeMap<String, AttrValue>,
}

impl Expression {
    fn single(
        condition: Condition,
        names: impl IntoIterator<Item = (&'static str, String)>,
        values: impl IntoIterator<Item = (&'static str, AttrValue)>,
    ) -> Self {
        Self {
            condition,
            names: names
                .into_iter()
                .map(|(placeholder, name)| (placeholder.to_string(), name))
                .collect(),
            values: values
                .into_iter()
                .map(|(placeholder, value)| (placeholder.to_string(), value))
                .collect(),
        }
    }

    /// The expression in store syntax.
    pub fn expression(&self) -> String {
        self.condition.render()
    }

    /// Name placeholders (`#placeholder` to attribute name).
    pub fn names(&self) -> &BTreeMap<String, String> {
        &self.names
    }

    /// Value placeholders (`:placeholder` to value).
    pub fn values(&self) -> &BTreeMap<String, AttrValue> {
        &self.values
    }

    pub fn condition(&self) -> &Condition {
        &self.condition
    }

    /// Appends `_<suffix>` to every placeholder.
    pub fn namespaced(self, suffix: &str) -> Self {
        let rename = |placeholder: String| format!("{placeholder}_{suffix}");
        Self {
            condition: self.condition.rename(&rename),
            names: self
                .names
                .into_iter()
                .map(|(placeholder, name)| (rename(placeholder), name))
                .collect(),
            values: self
                .values
                .into_iter()
                .map(|(placeholder, value)| (rename(placeholder), value))
                .collect(),
        }
    }

    /// Evaluates the expression against an item.
    ///
    /// Comparisons against a missing attribute are false. Unknown placeholders
    /// never match.
    pub fn matches(&self, item: &Item) -> bool {
        self.eval(&self.condition, item)
    }

    fn attribute<'a>(&self, item: &'a Item, placeholder: &str) -> Option<&'a AttrValue> {
        let name = self.names.get(placeholder)?;
        item.get(name)
    }

    fn eval(&self, condition: &Condition, item: &Item) -> bool {
        match condition {
            Condition::Compare { name, op, value } => {
                let (Some(actual), Some(expected)) =
                    (self.attribute(item, name), self.values.get(value))
                else {
                    return false;
                };
                match op {
                    Comparator::Eq => values_equal(actual, expected),
                    Comparator::Ne => !values_equal(actual, expected),
                    Comparator::Lt => compare_values(actual, expected) == Some(Ordering::Less),
                    Comparator::Le => matches!(
                        compare_values(actual, expected),
                        Some(Ordering::Less | Ordering::Equal)
                    ),
                    Comparator::Gt => compare_values(actual, expected) == Some(Ordering::Greater),
                    Comparator::Ge => matches!(
                        compare_values(actual, expected),
                        Some(Ordering::Greater | Ordering::Equal)
                    ),
                }
            }
            Condition::Contains { name, value } => {
                match (self.attribute(item, name), self.values.get(value)) {
                    (Some(AttrValue::S(haystack)), Some(AttrValue::S(needle))) => {
                        haystack.contains(needle.as_str())
                    }
                    (Some(AttrValue::Ss(set)), Some(AttrValue::S(member))) => set.contains(member),
                    (Some(AttrValue::Ns(set)), Some(AttrValue::N(member))) => set.contains(member),
                    (Some(AttrValue::L(list)), Some(member)) => {
                        list.iter().any(|element| values_equal(element, member))
                    }
                    _ => false,
                }
            }
            Condition::BeginsWith { name, value } => {
                match (self.attribute(item, name), self.values.get(value)) {
                    (Some(AttrValue::S(s)), Some(AttrValue::S(prefix))) => {
                        s.starts_with(prefix.as_str())
                    }
                    (Some(AttrValue::B(bytes)), Some(AttrValue::B(prefix))) => {
                        bytes.starts_with(prefix)
                    }
                    _ => false,
                }
            }
            Condition::Between { name, low, high } => {
                let (Some(actual), Some(low), Some(high)) = (
                    self.attribute(item, name),
                    self.values.get(low),
                    self.values.get(high),
                ) else {
                    return false;
                };
                matches!(
                    compare_values(actual, low),
                    Some(Ordering::Greater | Ordering::Equal)
                ) && matches!(
                    compare_values(actual, high),
                    Some(Ordering::Less | Ordering::Equal)
                )
            }
            Condition::AttributeExists { name } => self.attribute(item, name).is_some(),
            Condition::AttributeNotExists { name } => {
                self.names.contains_key(name) && self.attribute(item, name).is_none()
            }
            Condition::Logical { op, left, right } => match op {
                LogicalOperator::And => self.eval(left, item) && self.eval(right, item),
                LogicalOperator::Or => self.eval(left, item) || self.eval(right, item),
            },
            Condition::Not(inner) => !self.eval(inner, item),
        }
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.expression())
    }
}

fn compare_values(a: &AttrValue, b: &AttrValue) -> Option<Ordering> {
    match (a, b) {
        (AttrValue::S(a), AttrValue::S(b)) => Some(a.cmp(b)),
        (AttrValue::N(_), AttrValue::N(_)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (AttrValue::B(a), AttrValue::B(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

fn values_equal(a: &AttrValue, b: &AttrValue) -> bool {
    match compare_values(a, b) {
        Some(ordering) => ordering == Ordering::Equal,
        None => a == b,
    }
}

/// `#attr <op> :value`
pub fn compare(field: &str, op: Comparator, value: impl Into<AttrValue>) -> Expression {
    Expression::single(
        Condition::Compare {
            name: "#attr".to_string(),
            op,
            value: ":value".to_string(),
        },
        [("#attr", field.to_string())],
        [(":value", value.into())],
    )
}

/// `#attr = :value`
pub fn equal(field: &str, value: impl Into<AttrValue>) -> Expression {
    compare(field, Comparator::Eq, value)
}

/// `contains(#attr, :value)`
pub fn contains(field: &str, substring: impl Into<String>) -> Expression {
    Expression::single(
        Condition::Contains {
            name: "#attr".to_string(),
            value: ":value".to_string(),
        },
        [("#attr", field.to_string())],
        [(":value", AttrValue::S(substring.into()))],
    )
}

/// `begins_with(#attr, :value)`
pub fn begins_with(field: &str, prefix: impl Into<String>) -> Expression {
    Expression::single(
        Condition::BeginsWith {
            name: "#attr".to_string(),
            value: ":value".to_string(),
        },
        [("#attr", field.to_string())],
        [(":value", AttrValue::S(prefix.into()))],
    )
}

/// `#attr BETWEEN :low AND :high`, inclusive on both ends.
pub fn between(field: &str, low: impl Into<AttrValue>, high: impl Into<AttrValue>) -> Expression {
    Expression::single(
        Condition::Between {
            name: "#attr".to_string(),
            low: ":low".to_string(),
            high: ":high".to_string(),
        },
        [("#attr", field.to_string())],
        [(":low", low.into()), (":high", high.into())],
    )
}

/// Excludes soft-deleted records: the deleted flag is absent or false.
pub fn not_deleted() -> Expression {
    Expression::single(
        Condition::Logical {
            op: LogicalOperator::Or,
            left: Box::new(Condition::AttributeNotExists {
                name: "#deleted".to_string(),
            }),
            right: Box::new(Condition::Compare {
                name: "#deleted".to_string(),
                op: Comparator::Eq,
                value: ":false".to_string(),
            }),
        },
        [("#deleted", DELETED_ATTRIBUTE.to_string())],
        [(":false", AttrValue::Bool(false))],
    )
}

/// `(left) <op> (right)` with per-side placeholder namespaces.
pub fn combine(left: Expression, right: Expression, op: LogicalOperator) -> Expression {
    let left = left.namespaced("0");
    let right = right.namespaced("1");

    let mut names = left.names;
    names.extend(right.names);
    let mut values = left.values;
    values.extend(right.values);

    Expression {
        condition: Condition::Logical {
            op,
            left: Box::new(left.condition),
            right: Box::new(right.condition),
        },
        names,
        values,
    }
}

/// Folds any number of expressions with the same operator.
///
/// Returns `None` for an empty input. Each input is namespaced by its position.
pub fn combine_all(
    expressions: impl IntoIterator<Item = Expression>,
    op: LogicalOperator,
) -> Option<Expression> {
    let mut iter = expressions
        .into_iter()
        .enumerate()
        .map(|(index, expression)| expression.namespaced(&index.to_string()));

    let first = iter.next()?;
    Some(iter.fold(first, |acc, next| {
        let mut names = acc.names;
        names.extend(next.names);
        let mut values = acc.values;
        values.extend(next.values);
        Expression {
            condition: Condition::Logical {
                op,
                left: Box::new(acc.condition),
                right: Box::new(next.condition),
            },
            names,
            values,
        }
    }))
}

/// `NOT (expr)`
pub fn negate(expression: Expression) -> Expression {
    Expression {
        condition: Condition::Not(Box::new(expression.condition)),
        names: expression.names,
        values: expression.values,
    }
}

/// Key condition of a query: equality on the partition key, optionally
/// refined by a sort-key condition.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyCondition {
    partition: Expression,
    sort: Option<Expression>,
}

impl KeyCondition {
    /// `#pk = :pk`
    pub fn partition_eq(attribute: &str, value: impl Into<AttrValue>) -> Self {
        Self {
            partition: Expression::single(
                Condition::Compare {
                    name: "#pk".to_string(),
                    op: Comparator::Eq,
                    value: ":pk".to_string(),
                },
                [("#pk", attribute.to_string())],
                [(":pk", value.into())],
            ),
            sort: None,
        }
    }

    /// `... AND #sk = :sk`
    pub fn sort_eq(self, attribute: &str, value: impl Into<AttrValue>) -> Self {
        self.with_sort(Expression::single(
            Condition::Compare {
                name: "#sk".to_string(),
                op: Comparator::Eq,
                value: ":sk".to_string(),
            },
            [("#sk", attribute.to_string())],
            [(":sk", value.into())],
        ))
    }

    /// `... AND begins_with(#sk, :sk)`
    pub fn sort_begins_with(self, attribute: &str, prefix: impl Into<String>) -> Self {
        self.with_sort(Expression::single(
            Condition::BeginsWith {
                name: "#sk".to_string(),
                value: ":sk".to_string(),
            },
            [("#sk", attribute.to_string())],
            [(":sk", AttrValue::S(prefix.into()))],
        ))
    }

    /// `... AND #sk BETWEEN :sk_low AND :sk_high`
    pub fn sort_between(
        self,
        attribute: &str,
        low: impl Into<AttrValue>,
        high: impl Into<AttrValue>,
    ) -> Self {
        self.with_sort(Expression::single(
            Condition::Between {
                name: "#sk".to_string(),
                low: ":sk_low".to_string(),
                high: ":sk_high".to_string(),
            },
            [("#sk", attribute.to_string())],
            [(":sk_low", low.into()), (":sk_high", high.into())],
        ))
    }

    fn with_sort(mut self, sort: Expression) -> Self {
        self.sort = Some(sort);
        self
    }

    /// Attribute name the partition condition applies to.
    pub fn partition_attribute(&self) -> Option<&str> {
        self.partition.names.values().next().map(String::as_str)
    }

    /// Attribute name the sort condition applies to, if any.
    pub fn sort_attribute(&self) -> Option<&str> {
        self.sort
            .as_ref()
            .and_then(|sort| sort.names.values().next())
            .map(String::as_str)
    }

    /// Rendered key-condition expression (no parentheses, as key conditions require).
    pub fn expression(&self) -> String {
        match &self.sort {
            Some(sort) => format!("{} AND {}", self.partition.expression(), sort.expression()),
            None => self.partition.expression(),
        }
    }

    /// Merged name placeholders of both parts.
    pub fn names(&self) -> BTreeMap<String, String> {
        let mut names = self.partition.names.clone();
        if let Some(sort) = &self.sort {
            names.extend(sort.names.clone());
        }
        names
    }

    /// Merged value placeholders of both parts.
    pub fn values(&self) -> BTreeMap<String, AttrValue> {
        let mut values = self.partition.values.clone();
        if let Some(sort) = &self.sort {
            values.extend(sort.values.clone());
        }
        values
    }

    /// Appends `_<suffix>` to every placeholder of both parts.
    pub fn namespaced(self, suffix: &str) -> Self {
        Self {
            partition: self.partition.namespaced(suffix),
            sort: self.sort.map(|sort| sort.namespaced(suffix)),
        }
    }

    pub fn matches(&self, item: &Item) -> bool {
        self.partition.matches(item)
            && self.sort.as_ref().map_or(true, |sort| sort.matches(item))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(pairs: &[(&str, AttrValue)]) -> Item {
        pairs
            .iter()
            .map(|(name, value)| (name.to_string(), value.clone()))
            .collect()
    }

    #[test]
    fn test_equal_renders_placeholders() {
        let expr = equal("userId", "u1");
        assert_eq!(expr.expression(), "#attr = :value");
        assert_eq!(expr.names().get("#attr").map(String::as_str), Some("userId"));
        assert_eq!(expr.values().get(":value"), Some(&AttrValue::from("u1")));
    }

    #[test]
    fn test_combine_namespaces_each_side() {
        let expr = combine(
            equal("userId", "u1"),
            equal("travelPlanId", "t1"),
            LogicalOperator::And,
        );

        assert_eq!(
            expr.expression(),
            "(#attr_0 = :value_0) AND (#attr_1 = :value_1)"
        );
        assert_eq!(expr.names().len(), 2);
        assert_eq!(expr.values().len(), 2);
        assert_eq!(
            expr.names().get("#attr_1").map(String::as_str),
            Some("travelPlanId")
        );
    }

    #[test]
    fn test_nested_combine_stays_collision_free() {
        let inner = combine(equal("a", "1"), equal("b", "2"), LogicalOperator::Or);
        let expr = combine(inner, equal("c", "3"), LogicalOperator::And);

        assert_eq!(expr.names().len(), 3);
        assert_eq!(expr.values().len(), 3);
        assert!(expr.names().contains_key("#attr_0_0"));
        assert!(expr.names().contains_key("#attr_1_0"));
        assert!(expr.names().contains_key("#attr_1"));
    }

    #[test]
    fn test_combine_all() {
        assert!(combine_all(Vec::new(), LogicalOperator::And).is_none());

        let expr = combine_all(
            vec![equal("a", "1"), equal("b", "2"), equal("c", "3")],
            LogicalOperator::And,
        )
        .unwrap();
        assert_eq!(expr.values().len(), 3);

        let matching = item(&[
            ("a", AttrValue::from("1")),
            ("b", AttrValue::from("2")),
            ("c", AttrValue::from("3")),
        ]);
        let partial = item(&[("a", AttrValue::from("1")), ("b", AttrValue::from("2"))]);
        assert!(expr.matches(&matching));
        assert!(!expr.matches(&partial));
    }

    #[test]
    fn test_not_deleted_matches_absent_or_false() {
        let expr = not_deleted();
        assert_eq!(
            expr.expression(),
            "(attribute_not_exists(#deleted)) OR (#deleted = :false)"
        );

        assert!(expr.matches(&item(&[])));
        assert!(expr.matches(&item(&[(DELETED_ATTRIBUTE, AttrValue::Bool(false))])));
        assert!(!expr.matches(&item(&[(DELETED_ATTRIBUTE, AttrValue::Bool(true))])));
    }

    #[test]
    fn test_contains_on_strings_and_sets() {
        let expr = contains("notes", "beach");
        assert!(expr.matches(&item(&[("notes", AttrValue::from("a beach trip"))])));
        assert!(!expr.matches(&item(&[("notes", AttrValue::from("mountains"))])));
        assert!(expr.matches(&item(&[(
            "notes",
            AttrValue::Ss(vec!["beach".to_string()])
        )])));
        assert!(!expr.matches(&item(&[])));
    }

    #[test]
    fn test_numeric_comparisons() {
        let record = item(&[("rating", AttrValue::N("4.5".to_string()))]);
        assert!(compare("rating", Comparator::Gt, 4_i64).matches(&record));
        assert!(!compare("rating", Comparator::Lt, 4_i64).matches(&record));
        assert!(equal("rating", 4.5_f64).matches(&record));
        assert!(between("rating", 4_i64, 5_i64).matches(&record));
    }

    #[test]
    fn test_negate() {
        let expr = negate(equal("status", "archived"));
        assert_eq!(expr.expression(), "NOT (#attr = :value)");
        assert!(expr.matches(&item(&[("status", AttrValue::from("active"))])));
    }

    #[test]
    fn test_key_condition_rendering() {
        let condition = KeyCondition::partition_eq("userId", "u1").sort_begins_with("travelPlanId", "t");
        assert_eq!(condition.expression(), "#pk = :pk AND begins_with(#sk, :sk)");
        assert_eq!(condition.partition_attribute(), Some("userId"));
        assert_eq!(condition.sort_attribute(), Some("travelPlanId"));
        assert_eq!(condition.names().len(), 2);

        let namespaced = condition.namespaced("k");
        assert_eq!(
            namespaced.expression(),
            "#pk_k = :pk_k AND begins_with(#sk_k, :sk_k)"
        );
    }

    #[test]
    fn test_key_condition_matches() {
        let condition = KeyCondition::partition_eq("userId", "u1").sort_between("travelPlanId", "t1", "t5");
        let inside = item(&[
            ("userId", AttrValue::from("u1")),
            ("travelPlanId", AttrValue::from("t3")),
        ]);
        let outside = item(&[
            ("userId", AttrValue::from("u1")),
            ("travelPlanId", AttrValue::from("t9")),
        ]);
        assert!(condition.matches(&inside));
        assert!(!condition.matches(&outside));
    }
}
