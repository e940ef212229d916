//! Syntax tree for query-option expressions and `$apply` transformations.

use std::fmt;

/// A boolean or value expression from `$filter`, `$orderby`, `compute(...)` etc.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Literal),
    /// `Name`, `Customer/Name`, `d/LanguageKey`, `$it/Price`
    Path(PropertyPath),
    /// `a and b`, `a or b`
    Logical {
        op: LogicalOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Not(Box<Expr>),
    Comparison {
        op: CompOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    /// `Name in ('a', 'b')`
    In {
        operand: Box<Expr>,
        values: Vec<Expr>,
    },
    Arithmetic {
        op: ArithOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    /// Unary minus on a non-literal operand
    Negate(Box<Expr>),
    Function {
        name: String,
        args: Vec<Expr>,
    },
    Lambda(Lambda),
    /// Qualified type name used as a `cast` argument, e.g. `Edm.Int32`
    TypeName(String),
}

/// A `/`-separated property path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PropertyPath {
    pub segments: Vec<String>,
}

impl PropertyPath {
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            segments: segments.into_iter().map(Into::into).collect(),
        }
    }

    pub fn first(&self) -> &str {
        self.segments.first().map(String::as_str).unwrap_or_default()
    }

    pub fn is_single(&self) -> bool {
        self.segments.len() == 1
    }

    /// The path without its first segment.
    pub fn tail(&self) -> PropertyPath {
        PropertyPath {
            segments: self.segments.iter().skip(1).cloned().collect(),
        }
    }
}

impl fmt::Display for PropertyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.segments.join("/"))
    }
}

/// `collection/any(v: predicate)`, `collection/all(v: predicate)` or `collection/any()`.
#[derive(Debug, Clone, PartialEq)]
pub struct Lambda {
    pub collection: PropertyPath,
    pub quantifier: Quantifier,
    /// Bound variable; `None` only for the parameterless `any()`.
    pub variable: Option<String>,
    pub predicate: Option<Box<Expr>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quantifier {
    Any,
    All,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
}

/// Comparison operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    Has,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    DivBy,
    Mod,
}

/// Literal values
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    String(String),
    Integer(i64),
    Decimal(f64),
    Boolean(bool),
    Null,
    Date(String),
    TimeOfDay(String),
    DateTimeOffset(String),
    Guid(String),
}

/// Sort direction of one `$orderby` item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

/// One `$orderby` item.
#[derive(Debug, Clone, PartialEq)]
pub enum OrderByItem {
    Expr { expr: Expr, direction: SortDirection },
    /// Text that did not parse as an expression; it may still name a computed alias.
    Unparsed { raw: String, direction: SortDirection },
}

/// One step of an `$apply` pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum Transformation {
    /// `groupby((A, B/C), <nested>)`
    GroupBy {
        properties: Vec<PropertyPath>,
        nested: Vec<Transformation>,
    },
    /// `aggregate(Price with sum as Total, $count as Count)`
    Aggregate(Vec<AggregateExpr>),
    /// `filter(<expr>)`
    Filter(Expr),
    /// `compute(Price mul 2 as Double)`
    Compute(Vec<ComputeExpr>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct AggregateExpr {
    /// `None` stands for the `$count` pseudo-property.
    pub source: Option<Expr>,
    pub method: AggregateMethod,
    pub alias: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateMethod {
    Sum,
    Avg,
    Min,
    Max,
    Count,
    CountDistinct,
}

impl AggregateMethod {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "sum" => Some(AggregateMethod::Sum),
            "average" | "avg" => Some(AggregateMethod::Avg),
            "min" => Some(AggregateMethod::Min),
            "max" => Some(AggregateMethod::Max),
            "count" => Some(AggregateMethod::Count),
            "countdistinct" => Some(AggregateMethod::CountDistinct),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ComputeExpr {
    pub expr: Expr,
    pub alias: String,
}

/// `$expand=Nav(<options>)`
#[derive(Debug, Clone, PartialEq)]
pub struct ExpandItem {
    pub navigation: String,
    pub options: ExpandOptions,
}

/// Options nested inside one `$expand` item.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ExpandOptions {
    pub select: Vec<String>,
    pub filter: Option<Expr>,
    pub orderby: Vec<OrderByItem>,
    pub top: Option<u64>,
    pub skip: Option<u64>,
}
