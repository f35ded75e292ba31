//! Condition evaluator used for flow-step gating and `Condition` steps.
//!
//! Two construction forms: a simple `(variable, operator, literal)`
//! comparator, and a restricted boolean expression (AND/OR/NOT plus
//! comparators and literals) over the same context map. The expression form
//! is a small hand-rolled recursive-descent parser — deliberately not a
//! general-purpose expression-evaluator dependency, since the grammar must
//! stay closed (no attribute access, no function calls, no code execution).

use std::collections::HashMap;
use std::fmt;

use serde_json::Value;

/// Comparison operators available to the simple form and inside expressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Gt,
    Lt,
    Ge,
    Le,
    Eq,
    Ne,
}

impl Operator {
    fn parse(s: &str) -> Option<Self> {
        match s {
            ">" => Some(Self::Gt),
            "<" => Some(Self::Lt),
            ">=" => Some(Self::Ge),
            "<=" => Some(Self::Le),
            "==" => Some(Self::Eq),
            "!=" => Some(Self::Ne),
            _ => None,
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Gt => ">",
            Self::Lt => "<",
            Self::Ge => ">=",
            Self::Le => "<=",
            Self::Eq => "==",
            Self::Ne => "!=",
        };
        write!(f, "{s}")
    }
}

/// A gating/evaluable condition.
#[derive(Debug, Clone)]
pub enum Condition {
    /// `(variable-name, operator, literal)`.
    Simple {
        variable: String,
        op: Operator,
        literal: Value,
    },
    /// A restricted boolean expression string, parsed lazily on evaluation.
    Expression(String),
}

impl Condition {
    pub fn simple(variable: impl Into<String>, op: &str, literal: Value) -> Self {
        Self::Simple {
            variable: variable.into(),
            op: Operator::parse(op).unwrap_or(Operator::Eq),
            literal,
        }
    }

    pub fn expression(expr: impl Into<String>) -> Self {
        Self::Expression(expr.into())
    }

    /// Evaluate against a context map. Missing variables are treated as
    /// `Value::Null`.
    pub fn evaluate(&self, context: &HashMap<String, Value>) -> bool {
        match self {
            Self::Simple {
                variable,
                op,
                literal,
            } => {
                let actual = context.get(variable).cloned().unwrap_or(Value::Null);
                compare(&actual, *op, literal)
            }
            Self::Expression(expr) => {
                let mut parser = ExprParser::new(expr, context);
                parser.parse_or().unwrap_or(false)
            }
        }
    }
}

fn compare(actual: &Value, op: Operator, literal: &Value) -> bool {
    if let (Some(a), Some(b)) = (actual.as_f64(), literal.as_f64()) {
        return match op {
            Operator::Gt => a > b,
            Operator::Lt => a < b,
            Operator::Ge => a >= b,
            Operator::Le => a <= b,
            Operator::Eq => a == b,
            Operator::Ne => a != b,
        };
    }
    if let (Some(a), Some(b)) = (actual.as_str(), literal.as_str()) {
        return match op {
            Operator::Gt => a > b,
            Operator::Lt => a < b,
            Operator::Ge => a >= b,
            Operator::Le => a <= b,
            Operator::Eq => a == b,
            Operator::Ne => a != b,
        };
    }
    match op {
        Operator::Eq => actual == literal,
        Operator::Ne => actual != literal,
        _ => false,
    }
}

/// Grammar (all whitespace-insensitive):
///   or_expr   := and_expr ( "OR" and_expr )*
///   and_expr  := unary ( "AND" unary )*
///   unary     := "NOT" unary | atom
///   atom      := "(" or_expr ")" | comparison
///   comparison:= IDENT OP LITERAL
struct ExprParser<'a> {
    tokens: Vec<String>,
    pos: usize,
    context: &'a HashMap<String, Value>,
}

impl<'a> ExprParser<'a> {
    fn new(expr: &str, context: &'a HashMap<String, Value>) -> Self {
        Self {
            tokens: tokenize(expr),
            pos: 0,
            context,
        }
    }

    fn peek(&self) -> Option<&str> {
        self.tokens.get(self.pos).map(|s| s.as_str())
    }

    fn next(&mut self) -> Option<String> {
        let t = self.tokens.get(self.pos).cloned();
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn parse_or(&mut self) -> Option<bool> {
        let mut acc = self.parse_and()?;
        while matches!(self.peek(), Some(t) if t.eq_ignore_ascii_case("OR")) {
            self.next();
            let rhs = self.parse_and()?;
            acc = acc || rhs;
        }
        Some(acc)
    }

    fn parse_and(&mut self) -> Option<bool> {
        let mut acc = self.parse_unary()?;
        while matches!(self.peek(), Some(t) if t.eq_ignore_ascii_case("AND")) {
            self.next();
            let rhs = self.parse_unary()?;
            acc = acc && rhs;
        }
        Some(acc)
    }

    fn parse_unary(&mut self) -> Option<bool> {
        if matches!(self.peek(), Some(t) if t.eq_ignore_ascii_case("NOT")) {
            self.next();
            return Some(!self.parse_unary()?);
        }
        self.parse_atom()
    }

    fn parse_atom(&mut self) -> Option<bool> {
        if self.peek() == Some("(") {
            self.next();
            let v = self.parse_or()?;
            if self.peek() == Some(")") {
                self.next();
            }
            return Some(v);
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Option<bool> {
        let ident = self.next()?;
        let op_tok = self.next()?;
        let op = Operator::parse(&op_tok)?;
        let lit_tok = self.next()?;
        let literal = parse_literal(&lit_tok);
        let actual = self.context.get(&ident).cloned().unwrap_or(Value::Null);
        Some(compare(&actual, op, &literal))
    }
}

fn parse_literal(tok: &str) -> Value {
    if let Ok(n) = tok.parse::<f64>() {
        return serde_json::json!(n);
    }
    match tok {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        "null" => Value::Null,
        s => {
            let trimmed = s.trim_matches(|c| c == '"' || c == '\'');
            Value::String(trimmed.to_string())
        }
    }
}

fn tokenize(expr: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = expr.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        if c == '(' || c == ')' {
            tokens.push(c.to_string());
            i += 1;
            continue;
        }
        if c == '"' || c == '\'' {
            let quote = c;
            let start = i;
            i += 1;
            while i < chars.len() && chars[i] != quote {
                i += 1;
            }
            i += 1; // consume closing quote
            tokens.push(chars[start..i.min(chars.len())].iter().collect());
            continue;
        }
        if ">=<=!=".contains(c) {
            if i + 1 < chars.len() && chars[i + 1] == '=' {
                tokens.push(format!("{}{}", c, chars[i + 1]));
                i += 2;
            } else {
                tokens.push(c.to_string());
                i += 1;
            }
            continue;
        }
        // identifier / number / keyword
        let start = i;
        while i < chars.len() && !chars[i].is_whitespace() && chars[i] != '(' && chars[i] != ')' {
            i += 1;
        }
        tokens.push(chars[start..i].iter().collect());
    }
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx(pairs: &[(&str, Value)]) -> HashMap<String, Value> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn simple_numeric_comparison() {
        let c = Condition::simple("x", "==", json!(2));
        assert!(!c.evaluate(&ctx(&[("x", json!(1))])));
        assert!(c.evaluate(&ctx(&[("x", json!(2))])));
    }

    #[test]
    fn simple_generic_operator_identity() {
        for op in [">", "<", ">=", "<=", "==", "!="] {
            let c = Condition::simple("left", op, json!(3));
            let a = 5.0_f64;
            let b = 3.0_f64;
            let expected = match op {
                ">" => a > b,
                "<" => a < b,
                ">=" => a >= b,
                "<=" => a <= b,
                "==" => a == b,
                "!=" => a != b,
                _ => unreachable!(),
            };
            assert_eq!(c.evaluate(&ctx(&[("left", json!(a))])), expected);
        }
    }

    #[test]
    fn expression_and_or_not() {
        let c = Condition::expression("x == 1 AND (y == 2 OR NOT z == 3)");
        assert!(c.evaluate(&ctx(&[("x", json!(1)), ("y", json!(2)), ("z", json!(9))])));
        assert!(!c.evaluate(&ctx(&[("x", json!(0)), ("y", json!(2)), ("z", json!(9))])));
    }

    #[test]
    fn missing_variable_is_null() {
        let c = Condition::simple("missing", "==", Value::Null);
        assert!(c.evaluate(&HashMap::new()));
    }
}
