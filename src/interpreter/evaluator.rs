//! Reference expression evaluator
//!
//! Precedence climbing over the token stream. Supports literals, variables,
//! list literals, unary `!`/`-`, arithmetic, comparison, logic and calls to
//! user functions (`f(a, b)`), which run through [`ScriptScope::call_function`].

use super::errors::ScriptError;
use super::host::{Evaluator, ScriptScope};
use super::types::{Op, Token, TokenKind, Val};

#[derive(Debug, Clone, Copy, Default)]
pub struct BasicEvaluator;

impl Evaluator for BasicEvaluator {
    fn evaluate_value(
        &self,
        tokens: &[Token],
        scope: &mut dyn ScriptScope,
    ) -> Result<Val, ScriptError> {
        if tokens.is_empty() {
            return Err(ScriptError::user("missing expression"));
        }
        let mut parser = Parser {
            tokens,
            pos: 0,
            scope,
        };
        let value = parser.expression(1)?;
        if let Some(extra) = parser.peek() {
            return Err(ScriptError::user(format!("unexpected '{}'", extra)));
        }
        Ok(value)
    }
}

fn precedence(op: Op) -> Option<u8> {
    match op {
        Op::Or => Some(1),
        Op::And => Some(2),
        Op::Eq | Op::Ne => Some(3),
        Op::Lt | Op::Le | Op::Gt | Op::Ge => Some(4),
        Op::Add | Op::Sub => Some(5),
        Op::Mul | Op::Div | Op::Mod => Some(6),
        Op::Not => None,
    }
}

struct Parser<'t, 's> {
    tokens: &'t [Token],
    pos: usize,
    scope: &'s mut dyn ScriptScope,
}

impl<'t, 's> Parser<'t, 's> {
    fn peek(&self) -> Option<&'t Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<&'t Token> {
        let token = self.tokens.get(self.pos);
        self.pos += 1;
        token
    }

    fn at(&self, kind: &TokenKind) -> bool {
        self.peek().is_some_and(|t| &t.kind == kind)
    }

    fn expect(&mut self, kind: TokenKind) -> Result<(), ScriptError> {
        match self.next() {
            Some(token) if token.kind == kind => Ok(()),
            Some(token) => Err(ScriptError::user(format!(
                "expected '{}' but found '{}'",
                kind.keyword(),
                token
            ))),
            None => Err(ScriptError::user(format!(
                "expected '{}' at end of expression",
                kind.keyword()
            ))),
        }
    }

    fn expression(&mut self, min_prec: u8) -> Result<Val, ScriptError> {
        let mut left = self.unary()?;
        loop {
            let Some(TokenKind::Op(op)) = self.peek().map(|t| &t.kind) else {
                break;
            };
            let op = *op;
            let Some(prec) = precedence(op) else {
                break;
            };
            if prec < min_prec {
                break;
            }
            self.pos += 1;
            let right = self.expression(prec + 1)?;
            left = binary(op, left, right)?;
        }
        Ok(left)
    }

    fn unary(&mut self) -> Result<Val, ScriptError> {
        match self.peek().map(|t| &t.kind) {
            Some(TokenKind::Op(Op::Not)) => {
                self.pos += 1;
                Ok(Val::Bool(!self.unary()?.is_truthy()))
            }
            Some(TokenKind::Op(Op::Sub)) => {
                self.pos += 1;
                match self.unary()? {
                    Val::Int(i) => Ok(i
                        .checked_neg()
                        .map_or(Val::Num(-(i as f64)), Val::Int)),
                    Val::Num(n) => Ok(Val::Num(-n)),
                    other => Err(ScriptError::invalid_argument(format!(
                        "cannot negate {}",
                        other.type_name()
                    ))),
                }
            }
            _ => self.primary(),
        }
    }

    fn primary(&mut self) -> Result<Val, ScriptError> {
        let Some(token) = self.next() else {
            return Err(ScriptError::user("unexpected end of expression"));
        };
        match &token.kind {
            TokenKind::Literal => Ok(token.value.clone().unwrap_or_default()),

            TokenKind::Ident => {
                let name = token.name().unwrap_or_default();
                if self.at(&TokenKind::LParen) {
                    self.pos += 1;
                    let args = self.sequence(TokenKind::RParen)?;
                    return self.scope.call_function(name, args);
                }
                self.scope
                    .lookup(name)
                    .ok_or_else(|| ScriptError::user(format!("undefined variable: {}", name)))
            }

            TokenKind::LParen => {
                let value = self.expression(1)?;
                self.expect(TokenKind::RParen)?;
                Ok(value)
            }

            TokenKind::LBracket => Ok(Val::List(self.sequence(TokenKind::RBracket)?)),

            _ => Err(ScriptError::user(format!("unexpected '{}'", token))),
        }
    }

    /// Comma-separated expressions up to and including `close`
    fn sequence(&mut self, close: TokenKind) -> Result<Vec<Val>, ScriptError> {
        let mut items = Vec::new();
        if self.at(&close) {
            self.pos += 1;
            return Ok(items);
        }
        loop {
            items.push(self.expression(1)?);
            if self.at(&TokenKind::Comma) {
                self.pos += 1;
                continue;
            }
            self.expect(close)?;
            return Ok(items);
        }
    }
}

/* ===================== Operators ===================== */

fn binary(op: Op, left: Val, right: Val) -> Result<Val, ScriptError> {
    match op {
        Op::And => Ok(Val::Bool(left.is_truthy() && right.is_truthy())),
        Op::Or => Ok(Val::Bool(left.is_truthy() || right.is_truthy())),
        Op::Eq => Ok(Val::Bool(left.loosely_equals(&right))),
        Op::Ne => Ok(Val::Bool(!left.loosely_equals(&right))),
        Op::Lt | Op::Le | Op::Gt | Op::Ge => compare(op, &left, &right),
        Op::Add => match (&left, &right) {
            (Val::Str(_), _) | (_, Val::Str(_)) => Ok(Val::Str(format!("{}{}", left, right))),
            (Val::List(a), Val::List(b)) => Ok(Val::List(a.iter().chain(b).cloned().collect())),
            _ => arithmetic(op, &left, &right),
        },
        Op::Sub | Op::Mul | Op::Div | Op::Mod => arithmetic(op, &left, &right),
        Op::Not => Err(ScriptError::user("'!' is not a binary operator")),
    }
}

fn arithmetic(op: Op, left: &Val, right: &Val) -> Result<Val, ScriptError> {
    if let (Val::Int(a), Val::Int(b)) = (left, right) {
        let (a, b) = (*a, *b);
        let value = match op {
            Op::Add => a.checked_add(b).map(Val::Int),
            Op::Sub => a.checked_sub(b).map(Val::Int),
            Op::Mul => a.checked_mul(b).map(Val::Int),
            Op::Div if b == 0 => return Err(ScriptError::user("division by zero")),
            // `i64::MIN / -1` does not fit and falls through to floats
            Op::Div => match a.checked_rem(b) {
                Some(0) => a.checked_div(b).map(Val::Int),
                Some(_) => Some(Val::Num(a as f64 / b as f64)),
                None => None,
            },
            Op::Mod if b == 0 => return Err(ScriptError::user("division by zero")),
            Op::Mod => a.checked_rem(b).map(Val::Int),
            _ => None,
        };
        if let Some(value) = value {
            return Ok(value);
        }
    }

    let (Some(a), Some(b)) = (left.as_f64(), right.as_f64()) else {
        return Err(ScriptError::invalid_argument(format!(
            "{} {} {}",
            left.type_name(),
            op.symbol(),
            right.type_name()
        )));
    };
    match op {
        Op::Add => Ok(Val::Num(a + b)),
        Op::Sub => Ok(Val::Num(a - b)),
        Op::Mul => Ok(Val::Num(a * b)),
        Op::Div | Op::Mod if b == 0.0 => Err(ScriptError::user("division by zero")),
        Op::Div => Ok(Val::Num(a / b)),
        Op::Mod => Ok(Val::Num(a % b)),
        _ => Err(ScriptError::user(format!("'{}' is not arithmetic", op.symbol()))),
    }
}

fn compare(op: Op, left: &Val, right: &Val) -> Result<Val, ScriptError> {
    let ordering = match (left, right) {
        (Val::Str(a), Val::Str(b)) => a.partial_cmp(b),
        _ => match (left.as_f64(), right.as_f64()) {
            (Some(a), Some(b)) => a.partial_cmp(&b),
            _ => {
                return Err(ScriptError::invalid_argument(format!(
                    "cannot compare {} with {}",
                    left.type_name(),
                    right.type_name()
                )))
            }
        },
    };
    let Some(ordering) = ordering else {
        return Ok(Val::Bool(false));
    };
    Ok(Val::Bool(match op {
        Op::Lt => ordering.is_lt(),
        Op::Le => ordering.is_le(),
        Op::Gt => ordering.is_gt(),
        _ => ordering.is_ge(),
    }))
}
