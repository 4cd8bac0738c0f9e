//! Expression compiler for selections, weights and fill values.
//!
//! Supports arithmetic (+, -, *, /, %), comparisons (==, !=, <, <=, >, >=),
//! boolean operators (&&, ||, !), built-in functions (abs, sqrt, log, exp,
//! pow, min, max), element access on jagged columns (`jet_pt[0]`) and
//! reductions over instances (sum, length, maxof, minof).
//!
//! An expression that references a jagged column without an index is itself
//! jagged: it has one value per instance, and its multiplicity is the
//! shortest referenced jagged column in the current record.

use cf_core::{ColumnKind, Error, Result, Schema};

// ── AST ────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
enum Expr {
    Number(f64),
    Var(usize), // index into required_columns
    Element(usize, usize),
    UnaryNeg(Box<Expr>),
    UnaryNot(Box<Expr>),
    BinOp(BinOp, Box<Expr>, Box<Expr>),
    Call(Func, Vec<Expr>),
    /// Reduction over the instances of the inner expression; the vector lists
    /// the jagged variables driving the inner multiplicity.
    Reduce(Reducer, Box<Expr>, Vec<usize>),
}

#[derive(Debug, Clone, Copy)]
enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

#[derive(Debug, Clone, Copy)]
enum Func {
    Abs,
    Sqrt,
    Log,
    Exp,
    Pow,
    Min,
    Max,
}

impl Func {
    fn arity(self) -> usize {
        match self {
            Func::Pow | Func::Min | Func::Max => 2,
            _ => 1,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Reducer {
    Sum,
    Length,
    MaxOf,
    MinOf,
}

// ── Leaf access ────────────────────────────────────────────────

/// Per-record access to the columns an expression references.
///
/// `var` indexes [`CompiledExpr::required_columns`].
pub trait Leaves {
    /// Instance count of a jagged variable in the current record.
    fn len(&self, var: usize) -> usize;
    /// Value of `var` at `instance` (scalar variables ignore `instance`).
    fn get(&self, var: usize, instance: usize) -> f64;
}

impl Leaves for &[f64] {
    fn len(&self, _var: usize) -> usize {
        1
    }

    fn get(&self, var: usize, _instance: usize) -> f64 {
        self[var]
    }
}

// ── Compiled expression ────────────────────────────────────────

/// A compiled expression ready for evaluation.
///
/// Variable identifiers in the expression are mapped to column names.
#[derive(Debug, Clone)]
pub struct CompiledExpr {
    text: String,
    ast: Expr,
    /// Column names referenced by this expression (ordered by first occurrence).
    pub required_columns: Vec<String>,
    /// Shape of each required column.
    kinds: Vec<ColumnKind>,
    /// Jagged variables referenced without index outside any reduction.
    driving: Vec<usize>,
}

impl CompiledExpr {
    /// Parse and compile an expression string against a schema.
    ///
    /// Unknown columns and element access on scalar columns are compile errors.
    /// The identifiers `true` and `false` are constants unless the schema
    /// defines columns with those names.
    pub fn compile(input: &str, schema: &Schema) -> Result<Self> {
        Self::compile_with(input, |name| schema.kind(name))
    }

    /// Compile a formula over the scalar variables `vars` (e.g. `x`, `y`, `z`).
    pub fn compile_function(input: &str, vars: &[&str]) -> Result<Self> {
        Self::compile_with(input, |name| vars.contains(&name).then_some(ColumnKind::Scalar))
    }

    fn compile_with(input: &str, resolve: impl Fn(&str) -> Option<ColumnKind>) -> Result<Self> {
        let fail = |reason: String| Error::compile(input, reason);
        let tokens = tokenize(input).map_err(fail)?;
        if tokens.is_empty() {
            return Err(Error::compile(input, "empty expression"));
        }
        let mut parser = Parser::new(&tokens, &resolve);
        let ast = parser.parse_or().map_err(fail)?;
        if parser.pos < parser.tokens.len() {
            return Err(Error::compile(
                input,
                format!("unexpected token after expression: {:?}", parser.tokens[parser.pos]),
            ));
        }
        let mut driving = Vec::new();
        collect_driving(&ast, &parser.kinds, &mut driving);
        Ok(CompiledExpr {
            text: input.to_string(),
            ast,
            required_columns: std::mem::take(&mut parser.columns),
            kinds: std::mem::take(&mut parser.kinds),
            driving,
        })
    }

    /// Source text this expression was compiled from.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// True if the expression yields one value per instance of a jagged column.
    pub fn is_jagged(&self) -> bool {
        !self.driving.is_empty()
    }

    /// Shape of required column `var`.
    pub fn column_kind(&self, var: usize) -> ColumnKind {
        self.kinds[var]
    }

    /// Number of instances for the current record.
    ///
    /// Single-valued expressions always report 1.
    pub fn multiplicity(&self, leaves: &dyn Leaves) -> usize {
        ndata(&self.driving, leaves)
    }

    /// Evaluate at `instance` for the current record.
    pub fn eval_instance(&self, leaves: &dyn Leaves, instance: usize) -> f64 {
        eval_expr(&self.ast, &self.kinds, leaves, instance)
    }

    /// Evaluate a single-valued expression for one row of scalar values.
    ///
    /// `values` must have the same length and order as `required_columns`.
    pub fn eval_row(&self, values: &[f64]) -> f64 {
        eval_expr(&self.ast, &self.kinds, &values, 0)
    }
}

fn ndata(driving: &[usize], leaves: &dyn Leaves) -> usize {
    if driving.is_empty() {
        return 1;
    }
    driving.iter().map(|&v| leaves.len(v)).min().unwrap_or(1)
}

fn collect_driving(e: &Expr, kinds: &[ColumnKind], out: &mut Vec<usize>) {
    match e {
        Expr::Var(v) => {
            if kinds[*v] == ColumnKind::Jagged && !out.contains(v) {
                out.push(*v);
            }
        }
        Expr::UnaryNeg(a) | Expr::UnaryNot(a) => collect_driving(a, kinds, out),
        Expr::BinOp(_, a, b) => {
            collect_driving(a, kinds, out);
            collect_driving(b, kinds, out);
        }
        Expr::Call(_, args) => args.iter().for_each(|a| collect_driving(a, kinds, out)),
        Expr::Number(_) | Expr::Element(..) | Expr::Reduce(..) => {}
    }
}

// ── Evaluation ─────────────────────────────────────────────────

fn truth(b: bool) -> f64 {
    if b { 1.0 } else { 0.0 }
}

fn eval_expr(e: &Expr, kinds: &[ColumnKind], leaves: &dyn Leaves, i: usize) -> f64 {
    match e {
        Expr::Number(n) => *n,
        Expr::Var(v) => match kinds[*v] {
            ColumnKind::Jagged => leaves.get(*v, i),
            ColumnKind::Scalar => leaves.get(*v, 0),
        },
        Expr::Element(v, k) => leaves.get(*v, *k),
        Expr::UnaryNeg(a) => -eval_expr(a, kinds, leaves, i),
        Expr::UnaryNot(a) => truth(eval_expr(a, kinds, leaves, i) == 0.0),
        Expr::BinOp(op, a, b) => {
            let lhs = eval_expr(a, kinds, leaves, i);
            let rhs = eval_expr(b, kinds, leaves, i);
            match op {
                BinOp::Add => lhs + rhs,
                BinOp::Sub => lhs - rhs,
                BinOp::Mul => lhs * rhs,
                BinOp::Div => lhs / rhs,
                BinOp::Rem => lhs % rhs,
                BinOp::Eq => truth((lhs - rhs).abs() < f64::EPSILON),
                BinOp::Ne => truth((lhs - rhs).abs() >= f64::EPSILON),
                BinOp::Lt => truth(lhs < rhs),
                BinOp::Le => truth(lhs <= rhs),
                BinOp::Gt => truth(lhs > rhs),
                BinOp::Ge => truth(lhs >= rhs),
                BinOp::And => truth(lhs != 0.0 && rhs != 0.0),
                BinOp::Or => truth(lhs != 0.0 || rhs != 0.0),
            }
        }
        Expr::Call(f, args) => {
            let a0 = || eval_expr(&args[0], kinds, leaves, i);
            let a1 = || eval_expr(&args[1], kinds, leaves, i);
            match f {
                Func::Abs => a0().abs(),
                Func::Sqrt => a0().sqrt(),
                Func::Log => a0().ln(),
                Func::Exp => a0().exp(),
                Func::Pow => a0().powf(a1()),
                Func::Min => a0().min(a1()),
                Func::Max => a0().max(a1()),
            }
        }
        Expr::Reduce(r, inner, driving) => {
            let n = ndata(driving, leaves);
            let values = (0..n).map(|j| eval_expr(inner, kinds, leaves, j));
            match r {
                Reducer::Sum => values.sum::<f64>(),
                Reducer::Length => n as f64,
                Reducer::MaxOf => values.reduce(f64::max).unwrap_or(0.0),
                Reducer::MinOf => values.reduce(f64::min).unwrap_or(0.0),
            }
        }
    }
}

// ── Tokenizer ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Num(f64),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Not,
}

fn tokenize(input: &str) -> std::result::Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = input.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];

        if c.is_whitespace() {
            i += 1;
            continue;
        }

        // Two-character operators
        if let Some(&next) = chars.get(i + 1) {
            let tok = match (c, next) {
                ('&', '&') => Some(Token::And),
                ('|', '|') => Some(Token::Or),
                ('=', '=') => Some(Token::Eq),
                ('!', '=') => Some(Token::Ne),
                ('<', '=') => Some(Token::Le),
                ('>', '=') => Some(Token::Ge),
                _ => None,
            };
            if let Some(t) = tok {
                tokens.push(t);
                i += 2;
                continue;
            }
        }

        let single = match c {
            '+' => Some(Token::Plus),
            '-' => Some(Token::Minus),
            '*' => Some(Token::Star),
            '/' => Some(Token::Slash),
            '%' => Some(Token::Percent),
            '(' => Some(Token::LParen),
            ')' => Some(Token::RParen),
            '[' => Some(Token::LBracket),
            ']' => Some(Token::RBracket),
            ',' => Some(Token::Comma),
            '<' => Some(Token::Lt),
            '>' => Some(Token::Gt),
            '!' => Some(Token::Not),
            _ => None,
        };
        if let Some(t) = single {
            tokens.push(t);
            i += 1;
            continue;
        }

        if c.is_ascii_digit() || c == '.' {
            let start = i;
            while i < chars.len()
                && (chars[i].is_ascii_digit()
                    || chars[i] == '.'
                    || chars[i] == 'e'
                    || chars[i] == 'E'
                    || ((chars[i] == '+' || chars[i] == '-')
                        && i > start
                        && (chars[i - 1] == 'e' || chars[i - 1] == 'E')))
            {
                i += 1;
            }
            let s: String = chars[start..i].iter().collect();
            let n: f64 = s.parse().map_err(|_| format!("invalid number: '{}'", s))?;
            tokens.push(Token::Num(n));
        } else if c.is_ascii_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            tokens.push(Token::Ident(chars[start..i].iter().collect()));
        } else {
            return Err(format!("unexpected character: '{}'", c));
        }
    }

    Ok(tokens)
}

// ── Parser (recursive descent) ─────────────────────────────────

type ParseResult<T> = std::result::Result<T, String>;

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    resolve: &'a dyn Fn(&str) -> Option<ColumnKind>,
    columns: Vec<String>,
    kinds: Vec<ColumnKind>,
}

impl<'a> Parser<'a> {
    fn new(tokens: &'a [Token], resolve: &'a dyn Fn(&str) -> Option<ColumnKind>) -> Self {
        Self { tokens, pos: 0, resolve, columns: Vec::new(), kinds: Vec::new() }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<&Token> {
        let t = self.tokens.get(self.pos);
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn expect(&mut self, expected: &Token) -> ParseResult<()> {
        match self.advance() {
            Some(t) if t == expected => Ok(()),
            other => Err(format!("expected {:?}, got {:?}", expected, other)),
        }
    }

    fn resolve_var(&mut self, name: &str, kind: ColumnKind) -> usize {
        if let Some(i) = self.columns.iter().position(|b| b == name) {
            i
        } else {
            self.columns.push(name.to_string());
            self.kinds.push(kind);
            self.columns.len() - 1
        }
    }

    // ── Grammar rules ──────────────────────────────────────────

    fn parse_or(&mut self) -> ParseResult<Expr> {
        let mut lhs = self.parse_and()?;
        while matches!(self.peek(), Some(Token::Or)) {
            self.advance();
            let rhs = self.parse_and()?;
            lhs = Expr::BinOp(BinOp::Or, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> ParseResult<Expr> {
        let mut lhs = self.parse_cmp()?;
        while matches!(self.peek(), Some(Token::And)) {
            self.advance();
            let rhs = self.parse_cmp()?;
            lhs = Expr::BinOp(BinOp::And, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_cmp(&mut self) -> ParseResult<Expr> {
        let lhs = self.parse_add()?;
        let op = match self.peek() {
            Some(Token::Eq) => BinOp::Eq,
            Some(Token::Ne) => BinOp::Ne,
            Some(Token::Lt) => BinOp::Lt,
            Some(Token::Le) => BinOp::Le,
            Some(Token::Gt) => BinOp::Gt,
            Some(Token::Ge) => BinOp::Ge,
            _ => return Ok(lhs),
        };
        self.advance();
        let rhs = self.parse_add()?;
        Ok(Expr::BinOp(op, Box::new(lhs), Box::new(rhs)))
    }

    fn parse_add(&mut self) -> ParseResult<Expr> {
        let mut lhs = self.parse_mul()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinOp::Add,
                Some(Token::Minus) => BinOp::Sub,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_mul()?;
            lhs = Expr::BinOp(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_mul(&mut self) -> ParseResult<Expr> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinOp::Mul,
                Some(Token::Slash) => BinOp::Div,
                Some(Token::Percent) => BinOp::Rem,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_unary()?;
            lhs = Expr::BinOp(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> ParseResult<Expr> {
        match self.peek() {
            Some(Token::Minus) => {
                self.advance();
                let e = self.parse_unary()?;
                Ok(Expr::UnaryNeg(Box::new(e)))
            }
            Some(Token::Not) => {
                self.advance();
                let e = self.parse_unary()?;
                Ok(Expr::UnaryNot(Box::new(e)))
            }
            _ => self.parse_atom(),
        }
    }

    fn parse_atom(&mut self) -> ParseResult<Expr> {
        match self.advance().cloned() {
            Some(Token::Num(n)) => Ok(Expr::Number(n)),
            Some(Token::LParen) => {
                let e = self.parse_or()?;
                self.expect(&Token::RParen)?;
                Ok(e)
            }
            Some(Token::Ident(name)) => {
                if matches!(self.peek(), Some(Token::LParen)) {
                    self.advance(); // consume '('
                    self.parse_call(&name)
                } else if matches!(self.peek(), Some(Token::LBracket)) {
                    self.advance(); // consume '['
                    self.parse_element(&name)
                } else {
                    self.parse_var(&name)
                }
            }
            other => Err(format!("expected number, identifier, or '(', got {:?}", other)),
        }
    }

    fn parse_var(&mut self, name: &str) -> ParseResult<Expr> {
        match (self.resolve)(name) {
            Some(kind) => Ok(Expr::Var(self.resolve_var(name, kind))),
            None if name == "true" => Ok(Expr::Number(1.0)),
            None if name == "false" => Ok(Expr::Number(0.0)),
            None => Err(format!("unknown column: '{}'", name)),
        }
    }

    fn parse_element(&mut self, name: &str) -> ParseResult<Expr> {
        let index = match self.advance() {
            Some(Token::Num(n)) if *n >= 0.0 && n.fract() == 0.0 => *n as usize,
            other => return Err(format!("expected non-negative integer index, got {:?}", other)),
        };
        self.expect(&Token::RBracket)?;
        match (self.resolve)(name) {
            Some(ColumnKind::Jagged) => {
                Ok(Expr::Element(self.resolve_var(name, ColumnKind::Jagged), index))
            }
            Some(ColumnKind::Scalar) => Err(format!("cannot index scalar column '{}'", name)),
            None => Err(format!("unknown column: '{}'", name)),
        }
    }

    fn parse_call(&mut self, name: &str) -> ParseResult<Expr> {
        let reducer = match name {
            "sum" => Some(Reducer::Sum),
            "length" => Some(Reducer::Length),
            "maxof" => Some(Reducer::MaxOf),
            "minof" => Some(Reducer::MinOf),
            _ => None,
        };
        if let Some(r) = reducer {
            let inner = self.parse_or()?;
            self.expect(&Token::RParen)?;
            let mut driving = Vec::new();
            collect_driving(&inner, &self.kinds, &mut driving);
            return Ok(Expr::Reduce(r, Box::new(inner), driving));
        }

        let func = match name {
            "abs" => Func::Abs,
            "sqrt" => Func::Sqrt,
            "log" => Func::Log,
            "exp" => Func::Exp,
            "pow" => Func::Pow,
            "min" => Func::Min,
            "max" => Func::Max,
            _ => return Err(format!("unknown function: '{}'", name)),
        };
        let mut args = vec![self.parse_or()?];
        while matches!(self.peek(), Some(Token::Comma)) {
            self.advance();
            args.push(self.parse_or()?);
        }
        self.expect(&Token::RParen)?;
        if args.len() != func.arity() {
            return Err(format!(
                "function '{}' takes {} argument(s), got {}",
                name,
                func.arity(),
                args.len()
            ));
        }
        Ok(Expr::Call(func, args))
    }
}

// ── Tests ──────────────────────────────────────────────────────
