//! Minimal arithmetic evaluator for the `offset` expression embedded in a
//! challenge. Only numeric literals, `+ - * /`, unary signs and parentheses are
//! accepted; anything else is rejected.
//!
//! Integer `+ - *` stay integral, `/` is true division, and the final value is
//! truncated toward zero.

#[derive(Debug, Clone, PartialEq)]
pub enum EvalError {
    Empty,
    UnexpectedChar(char, usize),
    UnexpectedEnd,
    InvalidNumber(String),
    DivisionByZero,
    Overflow,
    NotFinite,
    TooDeep,
}

impl std::fmt::Display for EvalError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EvalError::Empty => write!(f, "empty expression"),
            EvalError::UnexpectedChar(c, pos) => write!(f, "unexpected character '{}' at {}", c, pos),
            EvalError::UnexpectedEnd => write!(f, "unexpected end of expression"),
            EvalError::InvalidNumber(s) => write!(f, "invalid numeric literal '{}'", s),
            EvalError::DivisionByZero => write!(f, "division by zero"),
            EvalError::Overflow => write!(f, "integer overflow"),
            EvalError::NotFinite => write!(f, "result is not a finite number"),
            EvalError::TooDeep => write!(f, "expression nested deeper than {} levels", MAX_DEPTH),
        }
    }
}

impl std::error::Error for EvalError {}

/// Bound on nested parentheses and unary signs, so hostile input cannot
/// exhaust the stack.
const MAX_DEPTH: usize = 64;

#[derive(Debug, Clone, Copy)]
enum Value {
    Int(i64),
    Float(f64),
}

impl Value {
    fn as_f64(self) -> f64 {
        match self {
            Value::Int(i) => i as f64,
            Value::Float(f) => f,
        }
    }

    fn into_integer(self) -> Result<i64, EvalError> {
        match self {
            Value::Int(i) => Ok(i),
            Value::Float(f) if !f.is_finite() => Err(EvalError::NotFinite),
            Value::Float(f) => {
                let t = f.trunc();
                if t < i64::MIN as f64 || t >= i64::MAX as f64 {
                    return Err(EvalError::Overflow);
                }
                Ok(t as i64)
            }
        }
    }
}

#[derive(Clone, Copy)]
enum Op {
    Add,
    Sub,
    Mul,
    Div,
}

fn apply(op: Op, lhs: Value, rhs: Value) -> Result<Value, EvalError> {
    if let (Value::Int(a), Value::Int(b)) = (lhs, rhs) {
        let r = match op {
            Op::Add => a.checked_add(b),
            Op::Sub => a.checked_sub(b),
            Op::Mul => a.checked_mul(b),
            Op::Div => {
                if b == 0 {
                    return Err(EvalError::DivisionByZero);
                }
                return Ok(Value::Float(a as f64 / b as f64));
            }
        };
        return r.map(Value::Int).ok_or(EvalError::Overflow);
    }

    let (a, b) = (lhs.as_f64(), rhs.as_f64());
    let r = match op {
        Op::Add => a + b,
        Op::Sub => a - b,
        Op::Mul => a * b,
        Op::Div => {
            if b == 0.0 {
                return Err(EvalError::DivisionByZero);
            }
            a / b
        }
    };
    if r.is_finite() {
        Ok(Value::Float(r))
    } else {
        Err(EvalError::NotFinite)
    }
}

struct Parser<'a> {
    src: &'a [u8],
    pos: usize,
    depth: usize,
}

impl<'a> Parser<'a> {
    fn nested<T>(&mut self, inner: impl FnOnce(&mut Self) -> Result<T, EvalError>) -> Result<T, EvalError> {
        if self.depth >= MAX_DEPTH {
            return Err(EvalError::TooDeep);
        }
        self.depth += 1;
        let result = inner(self);
        self.depth -= 1;
        result
    }

    fn skip_ws(&mut self) {
        while self.pos < self.src.len() && self.src[self.pos].is_ascii_whitespace() {
            self.pos += 1;
        }
    }

    fn peek(&mut self) -> Option<u8> {
        self.skip_ws();
        self.src.get(self.pos).copied()
    }

    fn expr(&mut self) -> Result<Value, EvalError> {
        let mut acc = self.term()?;
        loop {
            let op = match self.peek() {
                Some(b'+') => Op::Add,
                Some(b'-') => Op::Sub,
                _ => return Ok(acc),
            };
            self.pos += 1;
            let rhs = self.term()?;
            acc = apply(op, acc, rhs)?;
        }
    }

    fn term(&mut self) -> Result<Value, EvalError> {
        let mut acc = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(b'*') => Op::Mul,
                Some(b'/') => Op::Div,
                _ => return Ok(acc),
            };
            self.pos += 1;
            let rhs = self.unary()?;
            acc = apply(op, acc, rhs)?;
        }
    }

    fn unary(&mut self) -> Result<Value, EvalError> {
        match self.peek() {
            Some(b'+') => {
                self.pos += 1;
                self.nested(Self::unary)
            }
            Some(b'-') => {
                self.pos += 1;
                match self.nested(Self::unary)? {
                    Value::Int(i) => i.checked_neg().map(Value::Int).ok_or(EvalError::Overflow),
                    Value::Float(f) => Ok(Value::Float(-f)),
                }
            }
            _ => self.primary(),
        }
    }

    fn primary(&mut self) -> Result<Value, EvalError> {
        match self.peek() {
            None => Err(EvalError::UnexpectedEnd),
            Some(b'(') => {
                self.pos += 1;
                let v = self.nested(Self::expr)?;
                match self.peek() {
                    Some(b')') => {
                        self.pos += 1;
                        Ok(v)
                    }
                    Some(c) => Err(EvalError::UnexpectedChar(c as char, self.pos)),
                    None => Err(EvalError::UnexpectedEnd),
                }
            }
            Some(c) if c.is_ascii_digit() || c == b'.' => self.number(),
            Some(c) => Err(EvalError::UnexpectedChar(c as char, self.pos)),
        }
    }

    fn number(&mut self) -> Result<Value, EvalError> {
        let start = self.pos;
        while self.pos < self.src.len() && (self.src[self.pos].is_ascii_digit() || self.src[self.pos] == b'.') {
            self.pos += 1;
        }
        // Input is ASCII-only at this point, so the slice is valid UTF-8.
        let literal = String::from_utf8_lossy(&self.src[start..self.pos]).into_owned();
        if literal.contains('.') {
            literal
                .parse::<f64>()
                .map(Value::Float)
                .map_err(|_| EvalError::InvalidNumber(literal))
        } else {
            literal
                .parse::<i64>()
                .map(Value::Int)
                .map_err(|_| EvalError::InvalidNumber(literal))
        }
    }
}

/// Evaluates `source` and returns the integer result.
pub fn eval_integer(source: &str) -> Result<i64, EvalError> {
    if source.trim().is_empty() {
        return Err(EvalError::Empty);
    }
    let mut parser = Parser { src: source.as_bytes(), pos: 0, depth: 0 };
    let value = parser.expr()?;
    if let Some(c) = parser.peek() {
        return Err(EvalError::UnexpectedChar(c as char, parser.pos));
    }
    value.into_integer()
}
