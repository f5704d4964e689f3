//! Structured SQL builder.
//!
//! Compilers build [`Query`] values and render them once at the end. Leaf
//! expressions are plain strings that contain only identifiers, operators and
//! `@pN` placeholders; literals never reach them.

use std::fmt::{self, Write as _};

/// Fully qualified warehouse table, with the dataset tokens left for the
/// executor to resolve.
pub fn table_ref(name: &str) -> String {
    format!("`${{projectId}}.${{dataSetId}}.{name}`")
}

/// `[a-z_][a-z0-9_]*`, the shape of every warehouse column and table name.
pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

#[derive(Debug, Clone, PartialEq)]
pub enum Query {
    Select(Box<Select>),
    UnionAll(Vec<Query>),
    IntersectDistinct(Vec<Query>),
}

impl Query {
    /// Union of `queries`, collapsing the single-query case.
    pub fn union_all(mut queries: Vec<Query>) -> Query {
        if queries.len() == 1 {
            queries.remove(0)
        } else {
            Query::UnionAll(queries)
        }
    }

    pub fn intersect_distinct(mut queries: Vec<Query>) -> Query {
        if queries.len() == 1 {
            queries.remove(0)
        } else {
            Query::IntersectDistinct(queries)
        }
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        self.write_to(&mut out);
        out
    }

    fn write_to(&self, out: &mut String) {
        match self {
            Self::Select(select) => select.write_to(out),
            Self::UnionAll(queries) => write_set_op(out, queries, " UNION ALL "),
            Self::IntersectDistinct(queries) => write_set_op(out, queries, " INTERSECT DISTINCT "),
        }
    }
}

fn write_set_op(out: &mut String, queries: &[Query], op: &str) {
    for (i, query) in queries.iter().enumerate() {
        if i > 0 {
            out.push_str(op);
        }
        // Set operands are parenthesized so ORDER BY/LIMIT stay attached.
        out.push('(');
        query.write_to(out);
        out.push(')');
    }
}

impl From<Select> for Query {
    fn from(select: Select) -> Self {
        Query::Select(Box::new(select))
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Source {
    Table { name: String, alias: Option<String> },
    Subquery { query: Box<Query>, alias: String },
}

impl Source {
    pub fn table(name: &str) -> Self {
        Self::Table {
            name: name.to_string(),
            alias: None,
        }
    }

    pub fn aliased(name: &str, alias: &str) -> Self {
        Self::Table {
            name: name.to_string(),
            alias: Some(alias.to_string()),
        }
    }

    pub fn subquery(query: impl Into<Query>, alias: &str) -> Self {
        Self::Subquery {
            query: Box::new(query.into()),
            alias: alias.to_string(),
        }
    }

    fn write_to(&self, out: &mut String) {
        match self {
            Self::Table { name, alias } => {
                out.push_str(&table_ref(name));
                if let Some(alias) = alias {
                    let _ = write!(out, " {alias}");
                }
            }
            Self::Subquery { query, alias } => {
                out.push('(');
                query.write_to(out);
                let _ = write!(out, ") {alias}");
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    LeftOuter,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    pub kind: JoinKind,
    pub source: Source,
    pub on: Predicate,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    pub expr: String,
    pub descending: bool,
}

impl OrderBy {
    pub fn asc(expr: impl Into<String>) -> Self {
        Self {
            expr: expr.into(),
            descending: false,
        }
    }

    pub fn desc(expr: impl Into<String>) -> Self {
        Self {
            expr: expr.into(),
            descending: true,
        }
    }
}

/// `SELECT` statement. Builder methods consume and return `self`.
#[derive(Debug, Clone, PartialEq)]
pub struct Select {
    pub distinct: bool,
    pub columns: Vec<String>,
    pub from: Source,
    pub joins: Vec<Join>,
    /// AND-ed conditions.
    pub filter: Vec<Predicate>,
    pub group_by: Vec<String>,
    pub having: Option<Predicate>,
    pub order_by: Vec<OrderBy>,
    pub limit: Option<String>,
    pub offset: Option<String>,
}

impl Select {
    pub fn new<I, S>(columns: I, from: Source) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            distinct: false,
            columns: columns.into_iter().map(Into::into).collect(),
            from,
            joins: Vec::new(),
            filter: Vec::new(),
            group_by: Vec::new(),
            having: None,
            order_by: Vec::new(),
            limit: None,
            offset: None,
        }
    }

    pub fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    pub fn join(mut self, kind: JoinKind, source: Source, on: Predicate) -> Self {
        self.joins.push(Join { kind, source, on });
        self
    }

    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.filter.push(predicate);
        self
    }

    pub fn filters(mut self, predicates: impl IntoIterator<Item = Predicate>) -> Self {
        self.filter.extend(predicates);
        self
    }

    pub fn group_by<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.group_by.extend(columns.into_iter().map(Into::into));
        self
    }

    pub fn having(mut self, predicate: Predicate) -> Self {
        self.having = Some(predicate);
        self
    }

    pub fn order_by(mut self, order: OrderBy) -> Self {
        self.order_by.push(order);
        self
    }

    pub fn limit(mut self, limit: impl Into<String>) -> Self {
        self.limit = Some(limit.into());
        self
    }

    pub fn offset(mut self, offset: impl Into<String>) -> Self {
        self.offset = Some(offset.into());
        self
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        self.write_to(&mut out);
        out
    }

    fn write_to(&self, out: &mut String) {
        out.push_str("SELECT ");
        if self.distinct {
            out.push_str("DISTINCT ");
        }
        out.push_str(&self.columns.join(", "));
        out.push_str(" FROM ");
        self.from.write_to(out);

        for join in &self.joins {
            out.push_str(match join.kind {
                JoinKind::Inner => " JOIN ",
                JoinKind::LeftOuter => " LEFT OUTER JOIN ",
            });
            join.source.write_to(out);
            out.push_str(" ON ");
            join.on.write_to(out);
        }

        if !self.filter.is_empty() {
            out.push_str(" WHERE ");
            for (i, predicate) in self.filter.iter().enumerate() {
                if i > 0 {
                    out.push_str(" AND ");
                }
                predicate.write_to(out);
            }
        }

        if !self.group_by.is_empty() {
            let _ = write!(out, " GROUP BY {}", self.group_by.join(", "));
        }
        if let Some(having) = &self.having {
            out.push_str(" HAVING ");
            having.write_to(out);
        }
        if !self.order_by.is_empty() {
            out.push_str(" ORDER BY ");
            for (i, order) in self.order_by.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                out.push_str(&order.expr);
                if order.descending {
                    out.push_str(" DESC");
                }
            }
        }
        if let Some(limit) = &self.limit {
            let _ = write!(out, " LIMIT {limit}");
        }
        if let Some(offset) = &self.offset {
            let _ = write!(out, " OFFSET {offset}");
        }
    }
}

/// Boolean condition tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// Leaf condition, e.g. `a.person_id = b.person_id` or `age >= @p2`.
    Expr(String),
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
    Exists(Box<Query>),
    NotExists(Box<Query>),
    InQuery {
        expr: String,
        query: Box<Query>,
        negated: bool,
    },
}

impl Predicate {
    pub fn expr(expr: impl Into<String>) -> Self {
        Self::Expr(expr.into())
    }

    /// `lhs <op> rhs`.
    pub fn compare(lhs: &str, op: &str, rhs: &str) -> Self {
        Self::Expr(format!("{lhs} {op} {rhs}"))
    }

    pub fn eq(lhs: &str, rhs: &str) -> Self {
        Self::compare(lhs, "=", rhs)
    }

    /// `expr IN UNNEST(<array placeholder>)`.
    pub fn in_unnest(expr: &str, placeholder: &str) -> Self {
        Self::Expr(format!("{expr} IN UNNEST({placeholder})"))
    }

    pub fn not_in_unnest(expr: &str, placeholder: &str) -> Self {
        Self::Expr(format!("{expr} NOT IN UNNEST({placeholder})"))
    }

    pub fn in_query(expr: &str, query: impl Into<Query>) -> Self {
        Self::InQuery {
            expr: expr.to_string(),
            query: Box::new(query.into()),
            negated: false,
        }
    }

    pub fn exists(query: impl Into<Query>) -> Self {
        Self::Exists(Box::new(query.into()))
    }

    pub fn not_exists(query: impl Into<Query>) -> Self {
        Self::NotExists(Box::new(query.into()))
    }

    /// Conjunction; a single predicate is returned as-is.
    pub fn all(mut predicates: Vec<Predicate>) -> Self {
        if predicates.len() == 1 {
            predicates.remove(0)
        } else {
            Self::And(predicates)
        }
    }

    /// Disjunction; a single predicate is returned as-is.
    pub fn any(mut predicates: Vec<Predicate>) -> Self {
        if predicates.len() == 1 {
            predicates.remove(0)
        } else {
            Self::Or(predicates)
        }
    }

    pub fn negate(self) -> Self {
        Self::Not(Box::new(self))
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        self.write_to(&mut out);
        out
    }

    fn write_to(&self, out: &mut String) {
        match self {
            Self::Expr(expr) => out.push_str(expr),
            Self::And(items) => write_junction(out, items, " AND ", "TRUE"),
            Self::Or(items) => write_junction(out, items, " OR ", "FALSE"),
            Self::Not(inner) => {
                out.push_str("NOT (");
                inner.write_to(out);
                out.push(')');
            }
            Self::Exists(query) => {
                out.push_str("EXISTS (");
                query.write_to(out);
                out.push(')');
            }
            Self::NotExists(query) => {
                out.push_str("NOT EXISTS (");
                query.write_to(out);
                out.push(')');
            }
            Self::InQuery {
                expr,
                query,
                negated,
            } => {
                out.push_str(expr);
                out.push_str(if *negated { " NOT IN (" } else { " IN (" });
                query.write_to(out);
                out.push(')');
            }
        }
    }
}

fn write_junction(out: &mut String, items: &[Predicate], op: &str, empty: &str) {
    match items {
        [] => out.push_str(empty),
        [only] => only.write_to(out),
        _ => {
            out.push('(');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push_str(op);
                }
                item.write_to(out);
            }
            out.push(')');
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_select_with_all_clauses() {
        let select = Select::new(["person_id", "concept_id"], Source::aliased("cb_search_all_events", "e"))
            .distinct()
            .join(
                JoinKind::LeftOuter,
                Source::aliased("death", "d"),
                Predicate::eq("e.person_id", "d.person_id"),
            )
            .filter(Predicate::eq("is_standard", "@p0"))
            .filter(Predicate::in_unnest("concept_id", "@p1"))
            .group_by(["person_id", "concept_id"])
            .having(Predicate::compare("COUNT(*)", ">=", "@p2"))
            .order_by(OrderBy::desc("entry_date"))
            .limit("@p3")
            .offset("@p4");

        assert_eq!(
            select.render(),
            "SELECT DISTINCT person_id, concept_id \
             FROM `${projectId}.${dataSetId}.cb_search_all_events` e \
             LEFT OUTER JOIN `${projectId}.${dataSetId}.death` d ON e.person_id = d.person_id \
             WHERE is_standard = @p0 AND concept_id IN UNNEST(@p1) \
             GROUP BY person_id, concept_id HAVING COUNT(*) >= @p2 \
             ORDER BY entry_date DESC LIMIT @p3 OFFSET @p4"
        );
    }

    #[test]
    fn single_item_junctions_render_bare() {
        let leaf = Predicate::eq("a", "@p0");
        assert_eq!(Predicate::all(vec![leaf.clone()]).render(), leaf.render());
        assert_eq!(Predicate::any(vec![leaf.clone()]).render(), leaf.render());
        assert_eq!(Predicate::And(vec![]).render(), "TRUE");
        assert_eq!(
            Predicate::Or(vec![leaf.clone(), Predicate::eq("b", "@p1")])
                .negate()
                .render(),
            "NOT ((a = @p0 OR b = @p1))"
        );
    }

    #[test]
    fn set_operations_parenthesize_operands() {
        let a: Query = Select::new(["person_id"], Source::table("t1")).into();
        let b: Query = Select::new(["person_id"], Source::table("t2")).into();
        let union = Query::union_all(vec![a.clone(), b.clone()]);
        assert_eq!(
            union.render(),
            "(SELECT person_id FROM `${projectId}.${dataSetId}.t1`) UNION ALL \
             (SELECT person_id FROM `${projectId}.${dataSetId}.t2`)"
        );
        assert_eq!(Query::union_all(vec![a.clone()]), a);
        assert!(Query::intersect_distinct(vec![a, b])
            .render()
            .contains(" INTERSECT DISTINCT "));
    }

    #[test]
    fn identifiers_are_lowercase_words() {
        assert!(is_identifier("has_ehr_data"));
        assert!(is_identifier("_x1"));
        assert!(!is_identifier("1x"));
        assert!(!is_identifier("Person"));
        assert!(!is_identifier("a; drop table x"));
        assert!(!is_identifier(""));
    }
}
