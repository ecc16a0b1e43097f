//! Defragmentation rule language.
//!
//! A rule is a boolean expression over a fixed set of numeric variables
//! describing one member's backend:
//!
//! | Variable       | Value                          |
//! |----------------|--------------------------------|
//! | `dbSize`       | allocated backend size (bytes) |
//! | `dbSizeInUse`  | used backend size (bytes)      |
//! | `dbQuota`      | configured quota (bytes)       |
//! | `dbQuotaUsage` | `dbSize / dbQuota`             |
//! | `dbSizeFree`   | `dbSize - dbSizeInUse`         |
//!
//! Supported operators, lowest precedence first: `||`, `&&`,
//! `== != < <= > >=`, `+ -`, `* / %`, unary `! -`. Parentheses group.
//! All arithmetic is done in `f64`.

use std::fmt;

use crate::error::{DefragError, Result};
use crate::service::EndpointStatus;

/// Named inputs of a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variable {
    DbSize,
    DbSizeInUse,
    DbQuota,
    DbQuotaUsage,
    DbSizeFree,
}

impl Variable {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "dbSize" => Some(Variable::DbSize),
            "dbSizeInUse" => Some(Variable::DbSizeInUse),
            "dbQuota" => Some(Variable::DbQuota),
            "dbQuotaUsage" => Some(Variable::DbQuotaUsage),
            "dbSizeFree" => Some(Variable::DbSizeFree),
            _ => None,
        }
    }
}

/// Variable bindings for one evaluation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Variables {
    pub db_size: f64,
    pub db_size_in_use: f64,
    pub db_quota: f64,
    pub db_quota_usage: f64,
    pub db_size_free: f64,
}

impl Variables {
    pub fn new(db_size: u64, db_size_in_use: u64, db_quota: u64) -> Self {
        let db_size = db_size as f64;
        let db_size_in_use = db_size_in_use as f64;
        let db_quota = db_quota as f64;
        Self {
            db_size,
            db_size_in_use,
            db_quota,
            db_quota_usage: db_size / db_quota,
            db_size_free: db_size - db_size_in_use,
        }
    }

    pub fn from_status(status: &EndpointStatus, db_quota: u64) -> Self {
        Self::new(status.db_size, status.db_size_in_use, db_quota)
    }

    /// Representative values used to type-check a rule without a cluster:
    /// 2 GiB quota, 100 MiB allocated, 60 MiB in use.
    pub fn representative() -> Self {
        Self::new(100 * 1024 * 1024, 60 * 1024 * 1024, 2 * 1024 * 1024 * 1024)
    }

    fn get(&self, var: Variable) -> f64 {
        match var {
            Variable::DbSize => self.db_size,
            Variable::DbSizeInUse => self.db_size_in_use,
            Variable::DbQuota => self.db_quota,
            Variable::DbQuotaUsage => self.db_quota_usage,
            Variable::DbSizeFree => self.db_size_free,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Value {
    Number(f64),
    Bool(bool),
}

impl Value {
    fn type_name(&self) -> &'static str {
        match self {
            Value::Number(_) => "number",
            Value::Bool(_) => "bool",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UnaryOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BinaryOp {
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BinaryOp::Or => "||",
            BinaryOp::And => "&&",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Number(f64),
    Bool(bool),
    Var(Variable),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Ident(String),
    LParen,
    RParen,
    Op(BinaryOp),
    Not,
    Minus,
}

fn tokenize(src: &str) -> std::result::Result<Vec<(usize, Token)>, String> {
    let bytes = src.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i] as char;
        if c.is_ascii_whitespace() {
            i += 1;
            continue;
        }
        let start = i;

        if c.is_ascii_digit() || (c == '.' && bytes.get(i + 1).is_some_and(|b| b.is_ascii_digit())) {
            while i < bytes.len() && (bytes[i].is_ascii_digit() || bytes[i] == b'.') {
                i += 1;
            }
            if i < bytes.len() && (bytes[i] == b'e' || bytes[i] == b'E') {
                let mut j = i + 1;
                if j < bytes.len() && (bytes[j] == b'+' || bytes[j] == b'-') {
                    j += 1;
                }
                if j < bytes.len() && bytes[j].is_ascii_digit() {
                    i = j;
                    while i < bytes.len() && bytes[i].is_ascii_digit() {
                        i += 1;
                    }
                }
            }
            let text = &src[start..i];
            let value = text
                .parse::<f64>()
                .map_err(|_| format!("invalid number {:?} at offset {}", text, start))?;
            tokens.push((start, Token::Number(value)));
            continue;
        }

        if c.is_ascii_alphabetic() || c == '_' {
            while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
                i += 1;
            }
            tokens.push((start, Token::Ident(src[start..i].to_string())));
            continue;
        }

        let next = bytes.get(i + 1).map(|b| *b as char);
        let (token, width) = match (c, next) {
            ('(', _) => (Token::LParen, 1),
            (')', _) => (Token::RParen, 1),
            ('|', Some('|')) => (Token::Op(BinaryOp::Or), 2),
            ('&', Some('&')) => (Token::Op(BinaryOp::And), 2),
            ('=', Some('=')) => (Token::Op(BinaryOp::Eq), 2),
            ('!', Some('=')) => (Token::Op(BinaryOp::Ne), 2),
            ('<', Some('=')) => (Token::Op(BinaryOp::Le), 2),
            ('>', Some('=')) => (Token::Op(BinaryOp::Ge), 2),
            ('<', _) => (Token::Op(BinaryOp::Lt), 1),
            ('>', _) => (Token::Op(BinaryOp::Gt), 1),
            ('!', _) => (Token::Not, 1),
            ('+', _) => (Token::Op(BinaryOp::Add), 1),
            ('-', _) => (Token::Minus, 1),
            ('*', _) => (Token::Op(BinaryOp::Mul), 1),
            ('/', _) => (Token::Op(BinaryOp::Div), 1),
            ('%', _) => (Token::Op(BinaryOp::Rem), 1),
            _ => return Err(format!("unexpected character {:?} at offset {}", c, start)),
        };
        tokens.push((start, token));
        i += width;
    }

    Ok(tokens)
}

/// Deepest allowed nesting of parentheses and unary operators.
const MAX_DEPTH: usize = 256;
/// Longest accepted rule, in tokens. Keeps operator chains shallow enough
/// to evaluate recursively.
const MAX_TOKENS: usize = 1024;

struct Parser {
    tokens: Vec<(usize, Token)>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(_, t)| t)
    }

    fn offset(&self) -> usize {
        self.tokens.get(self.pos).map(|(o, _)| *o).unwrap_or(usize::MAX)
    }

    fn bump(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|(_, t)| t.clone());
        self.pos += 1;
        token
    }

    /// Consume the next token when it is one of `ops`.
    fn eat_op(&mut self, ops: &[BinaryOp]) -> Option<BinaryOp> {
        let op = match self.peek() {
            Some(Token::Op(op)) if ops.contains(op) => *op,
            Some(Token::Minus) if ops.contains(&BinaryOp::Sub) => BinaryOp::Sub,
            _ => return None,
        };
        self.pos += 1;
        Some(op)
    }

    fn binary_level(
        &mut self,
        ops: &[BinaryOp],
        next: fn(&mut Self) -> std::result::Result<Expr, String>,
    ) -> std::result::Result<Expr, String> {
        let mut lhs = next(self)?;
        while let Some(op) = self.eat_op(ops) {
            let rhs = next(self)?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn or(&mut self) -> std::result::Result<Expr, String> {
        self.binary_level(&[BinaryOp::Or], Self::and)
    }

    fn and(&mut self) -> std::result::Result<Expr, String> {
        self.binary_level(&[BinaryOp::And], Self::comparison)
    }

    fn comparison(&mut self) -> std::result::Result<Expr, String> {
        self.binary_level(
            &[
                BinaryOp::Eq,
                BinaryOp::Ne,
                BinaryOp::Lt,
                BinaryOp::Le,
                BinaryOp::Gt,
                BinaryOp::Ge,
            ],
            Self::additive,
        )
    }

    fn additive(&mut self) -> std::result::Result<Expr, String> {
        self.binary_level(&[BinaryOp::Add, BinaryOp::Sub], Self::multiplicative)
    }

    fn multiplicative(&mut self) -> std::result::Result<Expr, String> {
        self.binary_level(&[BinaryOp::Mul, BinaryOp::Div, BinaryOp::Rem], Self::unary)
    }

    fn unary(&mut self) -> std::result::Result<Expr, String> {
        if self.depth >= MAX_DEPTH {
            return Err("expression nested too deeply".to_string());
        }
        self.depth += 1;
        let expr = self.unary_inner();
        self.depth -= 1;
        expr
    }

    fn unary_inner(&mut self) -> std::result::Result<Expr, String> {
        match self.peek() {
            Some(Token::Not) => {
                self.pos += 1;
                Ok(Expr::Unary(UnaryOp::Not, Box::new(self.unary()?)))
            }
            Some(Token::Minus) => {
                self.pos += 1;
                Ok(Expr::Unary(UnaryOp::Neg, Box::new(self.unary()?)))
            }
            _ => self.primary(),
        }
    }

    fn primary(&mut self) -> std::result::Result<Expr, String> {
        let offset = self.offset();
        match self.bump() {
            Some(Token::Number(n)) => Ok(Expr::Number(n)),
            Some(Token::Ident(name)) => match name.as_str() {
                "true" => Ok(Expr::Bool(true)),
                "false" => Ok(Expr::Bool(false)),
                _ => Variable::from_name(&name)
                    .map(Expr::Var)
                    .ok_or_else(|| format!("undefined variable {:?}", name)),
            },
            Some(Token::LParen) => {
                let inner = self.or()?;
                match self.bump() {
                    Some(Token::RParen) => Ok(inner),
                    _ => Err(format!("missing ')' for '(' at offset {}", offset)),
                }
            }
            Some(other) => Err(format!("unexpected token {:?} at offset {}", other, offset)),
            None => Err("unexpected end of input".to_string()),
        }
    }
}

fn eval(expr: &Expr, vars: &Variables) -> std::result::Result<Value, String> {
    match expr {
        Expr::Number(n) => Ok(Value::Number(*n)),
        Expr::Bool(b) => Ok(Value::Bool(*b)),
        Expr::Var(v) => Ok(Value::Number(vars.get(*v))),
        Expr::Unary(op, inner) => match (op, eval(inner, vars)?) {
            (UnaryOp::Not, Value::Bool(b)) => Ok(Value::Bool(!b)),
            (UnaryOp::Neg, Value::Number(n)) => Ok(Value::Number(-n)),
            (UnaryOp::Not, v) => Err(format!("cannot apply '!' to {}", v.type_name())),
            (UnaryOp::Neg, v) => Err(format!("cannot negate {}", v.type_name())),
        },
        Expr::Binary(op, lhs, rhs) => {
            // both sides are always evaluated so type errors surface regardless of data
            let lhs = eval(lhs, vars)?;
            let rhs = eval(rhs, vars)?;
            apply(*op, lhs, rhs)
        }
    }
}

fn apply(op: BinaryOp, lhs: Value, rhs: Value) -> std::result::Result<Value, String> {
    use BinaryOp::*;
    match (op, lhs, rhs) {
        (Or, Value::Bool(a), Value::Bool(b)) => Ok(Value::Bool(a || b)),
        (And, Value::Bool(a), Value::Bool(b)) => Ok(Value::Bool(a && b)),
        (Eq, Value::Bool(a), Value::Bool(b)) => Ok(Value::Bool(a == b)),
        (Ne, Value::Bool(a), Value::Bool(b)) => Ok(Value::Bool(a != b)),
        (_, Value::Number(a), Value::Number(b)) => match op {
            Eq => Ok(Value::Bool(a == b)),
            Ne => Ok(Value::Bool(a != b)),
            Lt => Ok(Value::Bool(a < b)),
            Le => Ok(Value::Bool(a <= b)),
            Gt => Ok(Value::Bool(a > b)),
            Ge => Ok(Value::Bool(a >= b)),
            Add => Ok(Value::Number(a + b)),
            Sub => Ok(Value::Number(a - b)),
            Mul => Ok(Value::Number(a * b)),
            Div => Ok(Value::Number(a / b)),
            Rem => Ok(Value::Number(a % b)),
            Or | And => Err(format!("operator '{}' requires bool operands", op)),
        },
        (_, a, b) => Err(format!(
            "operator '{}' not defined for {} and {}",
            op,
            a.type_name(),
            b.type_name()
        )),
    }
}

/// A parsed rule expression.
#[derive(Debug, Clone, PartialEq)]
pub struct Rule {
    source: String,
    expr: Expr,
}

impl Rule {
    /// Parse `source`, rejecting syntax errors and unknown variables.
    pub fn parse(source: &str) -> Result<Self> {
        let tokens = tokenize(source).map_err(|e| DefragError::invalid_rule(source, e))?;
        if tokens.is_empty() {
            return Err(DefragError::invalid_rule(source, "empty expression"));
        }
        if tokens.len() > MAX_TOKENS {
            return Err(DefragError::invalid_rule(
                source,
                format!("expression longer than {} tokens", MAX_TOKENS),
            ));
        }
        let mut parser = Parser {
            tokens,
            pos: 0,
            depth: 0,
        };
        let expr = parser.or().map_err(|e| DefragError::invalid_rule(source, e))?;
        if parser.pos < parser.tokens.len() {
            let offset = parser.offset();
            return Err(DefragError::invalid_rule(
                source,
                format!("unexpected trailing input at offset {}", offset),
            ));
        }
        Ok(Self {
            source: source.to_string(),
            expr,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluate against `vars`; non-boolean results are rejected.
    pub fn evaluate(&self, vars: &Variables) -> Result<bool> {
        match eval(&self.expr, vars).map_err(|e| DefragError::invalid_rule(&self.source, e))? {
            Value::Bool(b) => Ok(b),
            Value::Number(_) => Err(DefragError::invalid_rule(
                &self.source,
                "the rule isn't a boolean expression",
            )),
        }
    }
}

/// Parse an optional rule; an empty string means "always defragment".
pub fn parse_optional(source: &str) -> Result<Option<Rule>> {
    if source.trim().is_empty() {
        return Ok(None);
    }
    Rule::parse(source).map(Some)
}

/// Standalone validator: parse and type-check against representative values.
pub fn validate_rule(source: &str) -> Result<()> {
    if let Some(rule) = parse_optional(source)? {
        rule.evaluate(&Variables::representative())?;
    }
    Ok(())
}

/// Decide whether the member behind `status` warrants defragmentation.
pub fn eligible(rule: Option<&Rule>, status: &EndpointStatus, db_quota_bytes: u64) -> Result<bool> {
    match rule {
        None => Ok(true),
        Some(rule) => rule.evaluate(&Variables::from_status(status, db_quota_bytes)),
    }
}

/// Outcome of evaluating the rule against one endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct MaintenanceDecision {
    pub endpoint: String,
    pub eligible: bool,
    /// Why the endpoint is left alone, when it is.
    pub reason: Option<String>,
}

/// Evaluate `rule` against the status captured for one endpoint.
pub fn decide(
    rule: Option<&Rule>,
    status: &EndpointStatus,
    db_quota_bytes: u64,
) -> Result<MaintenanceDecision> {
    let eligible = eligible(rule, status, db_quota_bytes)?;
    let reason = match rule {
        Some(rule) if !eligible => Some(format!("rule {:?} evaluated to false", rule.source())),
        _ => None,
    };
    Ok(MaintenanceDecision {
        endpoint: status.endpoint.clone(),
        eligible,
        reason,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval_rule(rule: &str, quota: u64, size: u64, in_use: u64) -> Result<bool> {
        Rule::parse(rule)?.evaluate(&Variables::new(size, in_use, quota))
    }

    fn status(size: u64, in_use: u64) -> EndpointStatus {
        EndpointStatus {
            endpoint: "http://127.0.0.1:2379".to_string(),
            member_id: 1,
            leader_id: 1,
            db_size: size,
            db_size_in_use: in_use,
            revision: 1,
            raft_term: 1,
            raft_index: 1,
        }
    }

    #[test]
    fn test_validate_accepts_supported_forms() {
        for rule in [
            "dbSize > dbQuota*80/100",
            "dbSize - dbSizeInUse > 200*1024*1024",
            "dbSize > dbQuota*80/100 || dbSize - dbSizeInUse > 200*1024*1024",
            "dbSize > dbQuota*80/100 && dbSize - dbSizeInUse > 200*1024*1024",
            "(dbSize > dbQuota*80/100) || (dbSize - dbSizeInUse > 200*1024*1024)",
            "dbQuotaUsage > 0.8",
            "!(dbSizeFree < 1e6)",
            "dbSize % 2 == 0 || true",
        ] {
            assert!(validate_rule(rule).is_ok(), "rule rejected: {rule}");
        }
    }

    #[test]
    fn test_validate_empty_rule_is_ok() {
        assert!(validate_rule("").is_ok());
        assert!(validate_rule("   ").is_ok());
    }

    #[test]
    fn test_validate_rejects_non_boolean() {
        let err = validate_rule("dbSize - dbSizeInUse").unwrap_err();
        assert!(err.to_string().contains("boolean"));
    }

    #[test]
    fn test_validate_rejects_undefined_variable() {
        let err = validate_rule("dbSizE > 100").unwrap_err();
        assert!(err.to_string().contains("dbSizE"));
    }

    #[test]
    fn test_validate_rejects_syntax_errors() {
        for rule in ["dbSize >", "(dbSize > 1", "dbSize > 1)", "dbSize >> 1", "dbSize $ 1", "1 2"] {
            assert!(
                matches!(validate_rule(rule), Err(DefragError::InvalidRule { .. })),
                "rule accepted: {rule}"
            );
        }
    }

    #[test]
    fn test_type_errors() {
        assert!(validate_rule("dbSize && true").is_err());
        assert!(validate_rule("!dbSize").is_err());
        assert!(validate_rule("-(dbSize > 1)").is_err());
        assert!(validate_rule("(dbSize > 1) > 0").is_err());
    }

    #[test]
    fn test_evaluate_quota_percentage() {
        assert!(eval_rule("dbSize > dbQuota*80/100", 100, 81, 0).unwrap());
        assert!(!eval_rule("dbSize > dbQuota*80/100", 100, 79, 0).unwrap());
    }

    #[test]
    fn test_evaluate_free_space() {
        assert!(eval_rule("dbSize - dbSizeInUse > 200", 0, 301, 100).unwrap());
        assert!(!eval_rule("dbSize - dbSizeInUse > 200", 0, 299, 100).unwrap());
        assert!(eval_rule("dbSizeFree > 200", 0, 301, 100).unwrap());
    }

    #[test]
    fn test_evaluate_logic_operators() {
        let rule = "dbSize > dbQuota*80/100 || dbSize - dbSizeInUse > 200";
        assert!(eval_rule(rule, 1000, 900, 850).unwrap());
        assert!(eval_rule(rule, 1000, 500, 100).unwrap());
        assert!(!eval_rule(rule, 1000, 500, 400).unwrap());

        let rule = "dbSize > dbQuota*80/100 && dbSize - dbSizeInUse > 200";
        assert!(eval_rule(rule, 1000, 900, 100).unwrap());
        assert!(!eval_rule(rule, 1000, 900, 850).unwrap());
    }

    #[test]
    fn test_quota_usage_is_plain_division() {
        let vars = Variables::new(3, 0, 7);
        assert_eq!(vars.db_quota_usage, 3.0 / 7.0);
    }

    #[test]
    fn test_boundary_is_not_strictly_greater() {
        // 800 == 1000 * 0.8 exactly
        assert!(!eval_rule("dbSize > dbQuota * 0.8", 1000, 800, 0).unwrap());
        assert!(eval_rule("dbSize >= dbQuota * 0.8", 1000, 800, 0).unwrap());
        assert!(!eval_rule("dbQuotaUsage > 0.8", 1000, 800, 0).unwrap());
    }

    #[test]
    fn test_large_byte_counts_do_not_overflow() {
        let rule = "dbSize * 1024 > dbQuota";
        assert!(eval_rule(rule, u64::MAX, u64::MAX / 2, 0).unwrap());
    }

    #[test]
    fn test_precedence() {
        assert!(eval_rule("1 + 2 * 3 == 7", 1, 0, 0).unwrap());
        assert!(eval_rule("(1 + 2) * 3 == 9", 1, 0, 0).unwrap());
        assert!(eval_rule("10 - 4 - 3 == 3", 1, 0, 0).unwrap());
        assert!(eval_rule("true || false && false", 1, 0, 0).unwrap());
        assert!(eval_rule("-2 * -3 == 6", 1, 0, 0).unwrap());
    }

    #[test]
    fn test_eligible_without_rule() {
        assert!(eligible(None, &status(1, 1), 1000).unwrap());
    }

    #[test]
    fn test_eligible_with_rule() {
        let rule = Rule::parse("dbQuotaUsage > 0.5").unwrap();
        assert!(eligible(Some(&rule), &status(600, 100), 1000).unwrap());
        assert!(!eligible(Some(&rule), &status(400, 100), 1000).unwrap());
    }

    #[test]
    fn test_parse_optional() {
        assert!(parse_optional("").unwrap().is_none());
        let rule = parse_optional("dbSize > 1").unwrap().unwrap();
        assert_eq!(rule.source(), "dbSize > 1");
    }

    #[test]
    fn test_decide_reports_reason() {
        let status = EndpointStatus {
            endpoint: "http://10.0.0.1:2379".to_string(),
            member_id: 1,
            leader_id: 1,
            db_size: 100,
            db_size_in_use: 50,
            revision: 1,
            raft_term: 1,
            raft_index: 1,
        };
        let rule = Rule::parse("dbSize > 1000").unwrap();
        let decision = decide(Some(&rule), &status, 4096).unwrap();
        assert!(!decision.eligible);
        assert_eq!(decision.endpoint, "http://10.0.0.1:2379");
        assert!(decision.reason.unwrap().contains("dbSize > 1000"));

        let decision = decide(None, &status, 4096).unwrap();
        assert!(decision.eligible);
        assert!(decision.reason.is_none());
    }

    #[test]
    fn test_deep_nesting_rejected() {
        let parens = format!("{}dbSize > 1{}", "(".repeat(100_000), ")".repeat(100_000));
        assert!(matches!(
            validate_rule(&parens),
            Err(DefragError::InvalidRule { .. })
        ));

        let nots = format!("{}true", "!".repeat(100_000));
        assert!(matches!(
            Rule::parse(&nots),
            Err(DefragError::InvalidRule { .. })
        ));
    }

    #[test]
    fn test_nesting_within_limit_accepted() {
        let rule = format!("{}dbSize > 1{}", "(".repeat(100), ")".repeat(100));
        assert!(validate_rule(&rule).is_ok());
        let nots = format!("{}true", "!".repeat(MAX_DEPTH - 2));
        assert!(Rule::parse(&nots).is_ok());
    }

    #[test]
    fn test_nesting_error_message() {
        let nots = format!("{}true", "!".repeat(MAX_DEPTH + 1));
        match Rule::parse(&nots) {
            Err(DefragError::InvalidRule { reason, .. }) => {
                assert_eq!(reason, "expression nested too deeply")
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_long_operator_chain_rejected() {
        let chain = format!("{} > 0", vec!["1"; 10_000].join(" + "));
        assert!(validate_rule(&chain).is_err());
    }
}
