//! The rule tree wire format and the predicate compiler.
//!
//! A [`RuleTree`] is a disjunction of conjunctions: the outer `Vec` is OR,
//! each inner `Vec` is AND. [`compile`] lowers it, once, against a bound
//! [`Table`], into a [`CompiledPredicate`] specialized per column type:
//! every leaf already knows its column's ordinal and type, so evaluating a
//! row never re-resolves a column name or re-parses a literal.

use crate::bytestring::ByteString;
use crate::error::{KradataError, Result};
use crate::table::{Row, Table};
use crate::types::ColumnType;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Equal,
    NotEqual,
    MoreThan,
    LessThan,
    Contains,
}

/// A leaf's literal value as it arrives over the wire: either a string
/// (used for string/date comparisons, or parsed as a number for numeric
/// columns) or a number.
#[derive(Debug, Clone)]
pub enum RuleValue {
    Str(String),
    Num(f64),
}

#[derive(Debug, Clone)]
pub struct Leaf {
    pub name: String,
    pub operation: Operation,
    pub value: RuleValue,
}

/// `Vec<Vec<Leaf>>`: outer is OR, inner is AND.
pub type RuleTree = Vec<Vec<Leaf>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NumOp {
    Eq,
    Ne,
    Gt,
    Lt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StrOp {
    Eq,
    Ne,
    Contains,
}

enum CompiledLeaf {
    Numeric {
        ordinal: usize,
        op: NumOp,
        is_float: bool,
        int_val: i64,
        float_val: f64,
    },
    Stringy {
        ordinal: usize,
        op: StrOp,
        needle: Vec<u8>,
    },
}

impl CompiledLeaf {
    fn eval(&self, row: &Row) -> Result<bool> {
        match self {
            CompiledLeaf::Numeric { ordinal, op, is_float, int_val, float_val } => {
                let value = row.get(*ordinal)?;
                let ord = if *is_float {
                    let v = value
                        .as_f64()
                        .expect("compiler only binds Numeric leaves to numeric columns");
                    v.partial_cmp(float_val)
                } else {
                    let v = value
                        .as_i64()
                        .expect("compiler only binds Numeric leaves to numeric columns");
                    v.partial_cmp(int_val)
                };
                let ord = ord.ok_or_else(|| {
                    KradataError::InvalidHandle("NaN comparison in numeric predicate".into())
                })?;
                Ok(match op {
                    NumOp::Eq => ord == std::cmp::Ordering::Equal,
                    NumOp::Ne => ord != std::cmp::Ordering::Equal,
                    NumOp::Gt => ord == std::cmp::Ordering::Greater,
                    NumOp::Lt => ord == std::cmp::Ordering::Less,
                })
            }
            CompiledLeaf::Stringy { ordinal, op, needle } => {
                let value = row.get(*ordinal)?;
                let hay = value
                    .as_bytestring()
                    .expect("compiler only binds Stringy leaves to string-like columns");
                let needle = ByteString::new(needle);
                Ok(match op {
                    StrOp::Eq => hay.equals_case(&needle),
                    StrOp::Ne => !hay.equals_case(&needle),
                    StrOp::Contains => hay.contains_case(&needle),
                })
            }
        }
    }
}

struct CompiledAnd(Vec<CompiledLeaf>);

impl CompiledAnd {
    fn eval(&self, row: &Row) -> Result<bool> {
        for leaf in &self.0 {
            if !leaf.eval(row)? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

/// The compiled form of a [`RuleTree`], bound to one table's column
/// layout. Stateless and `Send + Sync`: every worker shares the same
/// compiled predicate (behind an `Arc`) and evaluates it against its own
/// `Row` cursor.
pub struct CompiledPredicate(Vec<CompiledAnd>);

impl CompiledPredicate {
    /// Evaluates the full OR-of-ANDs against the row's current index,
    /// short-circuiting at both levels. An empty outer list is always
    /// true; an empty inner list makes its branch vacuously true.
    pub fn test(&self, row: &Row) -> Result<bool> {
        if self.0.is_empty() {
            return Ok(true);
        }
        for and in &self.0 {
            if and.eval(row)? {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

fn parse_numeric(value: &RuleValue, column: &str) -> Result<f64> {
    match value {
        RuleValue::Num(n) => Ok(*n),
        RuleValue::Str(s) => s.trim().parse::<f64>().map_err(|_| {
            KradataError::RuleError(format!(
                "value {s:?} for column {column:?} is not a decimal integer or float"
            ))
        }),
    }
}

fn require_string(value: &RuleValue, column: &str) -> Result<&str> {
    match value {
        RuleValue::Str(s) => Ok(s.as_str()),
        RuleValue::Num(_) => Err(KradataError::RuleError(format!(
            "column {column:?} is string-like but rule value is numeric"
        ))),
    }
}

fn compile_leaf(table: &Table, leaf: &Leaf) -> Result<CompiledLeaf> {
    let ordinal = table
        .column_ordinal(&leaf.name)
        .ok_or_else(|| KradataError::RuleError(format!("unknown column {:?}", leaf.name)))?;
    let column = &table.columns()[ordinal];

    if column.ty.is_numeric() {
        let op = match leaf.operation {
            Operation::Equal => NumOp::Eq,
            Operation::NotEqual => NumOp::Ne,
            Operation::MoreThan => NumOp::Gt,
            Operation::LessThan => NumOp::Lt,
            Operation::Contains => {
                return Err(KradataError::RuleError(format!(
                    "'contains' is not valid on numeric column {:?}",
                    leaf.name
                )))
            }
        };
        let parsed = parse_numeric(&leaf.value, &leaf.name)?;
        Ok(CompiledLeaf::Numeric {
            ordinal,
            op,
            is_float: column.ty == ColumnType::Float32,
            int_val: parsed as i64,
            float_val: parsed,
        })
    } else if column.ty.is_string_like() {
        let op = match leaf.operation {
            Operation::Equal => StrOp::Eq,
            Operation::NotEqual => StrOp::Ne,
            Operation::Contains => StrOp::Contains,
            Operation::MoreThan | Operation::LessThan => {
                return Err(KradataError::RuleError(format!(
                    "'moreThan'/'lessThan' are not valid on string-like column {:?}",
                    leaf.name
                )))
            }
        };
        let needle = require_string(&leaf.value, &leaf.name)?.as_bytes().to_vec();
        Ok(CompiledLeaf::Stringy { ordinal, op, needle })
    } else {
        // `bytes` columns support none of the comparison operations.
        Err(KradataError::RuleError(format!(
            "column {:?} of type {} supports no rule operation",
            leaf.name,
            column.ty.name()
        )))
    }
}

/// Compiles a [`RuleTree`] against `table`, resolving every column name and
/// literal up front. Fails fast with `RuleError` before any row is scanned.
pub fn compile(table: &Table, rules: &RuleTree) -> Result<CompiledPredicate> {
    let mut ands = Vec::with_capacity(rules.len());
    for conjunction in rules {
        let mut leaves = Vec::with_capacity(conjunction.len());
        for leaf in conjunction {
            leaves.push(compile_leaf(table, leaf)?);
        }
        ands.push(CompiledAnd(leaves));
    }
    Ok(CompiledPredicate(ands))
}
