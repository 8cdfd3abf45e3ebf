use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum CalcError {
    #[error("formula is empty")]
    Empty,

    #[error("unexpected character '{ch}' at offset {offset}")]
    UnexpectedChar { ch: char, offset: usize },

    #[error("unexpected end of formula")]
    UnexpectedEnd,

    #[error("unexpected {0}")]
    UnexpectedToken(String),

    #[error("unknown field '{0}'")]
    UnknownField(String),

    #[error("field '{name}' has non-numeric value '{value}'")]
    NonNumeric { name: String, value: String },

    #[error("division by zero")]
    DivisionByZero,

    #[error("result is not a finite number")]
    NotFinite,

    #[error("formula nests deeper than {MAX_DEPTH} levels")]
    TooDeep,

    #[error("formula has more than {MAX_TOKENS} tokens")]
    TooLong,
}

/// Deepest nesting of parentheses and signs a formula may use.
pub const MAX_DEPTH: usize = 64;

/// Longest formula, in tokens. Operator chains build one tree level each.
pub const MAX_TOKENS: usize = 512;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Number(f64),
    Field(String),
    Plus,
    Minus,
    Star,
    Slash,
    LParen,
    RParen,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Field(String),
    Neg(Box<Expr>),
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Splits a formula into tokens.
///
/// `names` are the field names the formula may refer to. They are matched
/// first, longest name wins, so names containing spaces or symbols work. A
/// match must not run into a following word character (`a` does not match
/// the start of `ab`). Anything else that looks like an identifier becomes
/// a field token and fails at evaluation if it names no known field.
pub fn tokenize(formula: &str, names: &[&str]) -> Result<Vec<Token>, CalcError> {
    let mut tokens = Vec::new();
    let mut offset = 0;

    while offset < formula.len() {
        let rest = &formula[offset..];
        let Some(c) = rest.chars().next() else {
            break;
        };

        if c.is_whitespace() {
            offset += c.len_utf8();
            continue;
        }

        if let Some(name) = match_name(rest, names) {
            tokens.push(Token::Field(name.to_string()));
            offset += name.len();
            continue;
        }

        let single = match c {
            '+' => Some(Token::Plus),
            '-' | '\u{2212}' => Some(Token::Minus),
            '*' | '\u{d7}' => Some(Token::Star),
            '/' | '\u{f7}' => Some(Token::Slash),
            '(' => Some(Token::LParen),
            ')' => Some(Token::RParen),
            _ => None,
        };
        if let Some(token) = single {
            tokens.push(token);
            offset += c.len_utf8();
            continue;
        }

        if c.is_ascii_digit() || c == '.' {
            let len = rest
                .find(|ch: char| !(ch.is_ascii_digit() || ch == '.'))
                .unwrap_or(rest.len());
            let number = rest[..len]
                .parse::<f64>()
                .map_err(|_| CalcError::UnexpectedToken(format!("number '{}'", &rest[..len])))?;
            tokens.push(Token::Number(number));
            offset += len;
            continue;
        }

        if c.is_alphabetic() || c == '_' {
            let len = rest.find(|ch: char| !is_word_char(ch)).unwrap_or(rest.len());
            tokens.push(Token::Field(rest[..len].to_string()));
            offset += len;
            continue;
        }

        return Err(CalcError::UnexpectedChar { ch: c, offset });
    }

    Ok(tokens)
}

fn match_name<'n>(rest: &str, names: &[&'n str]) -> Option<&'n str> {
    names
        .iter()
        .copied()
        .filter(|name| !name.is_empty() && rest.starts_with(*name))
        .filter(|name| {
            let ends_in_word = name.chars().last().is_some_and(is_word_char);
            let next = rest[name.len()..].chars().next();
            !(ends_in_word && next.is_some_and(is_word_char))
        })
        .max_by_key(|name| name.len())
}

/// Recursive-descent parser over
///
/// ```text
/// expr    := term (('+' | '-') term)*
/// term    := unary (('*' | '/') unary)*
/// unary   := ('+' | '-') unary | primary
/// primary := number | field | '(' expr ')'
/// ```
///
/// Nesting is bounded by [`MAX_DEPTH`] and length by [`MAX_TOKENS`], so
/// neither parsing nor evaluation can exhaust the stack.
pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Parser {
            tokens,
            pos: 0,
            depth: 0,
        }
    }

    pub fn parse(mut self) -> Result<Expr, CalcError> {
        if self.tokens.is_empty() {
            return Err(CalcError::Empty);
        }
        if self.tokens.len() > MAX_TOKENS {
            return Err(CalcError::TooLong);
        }

        let expr = self.expr()?;
        match self.peek() {
            None => Ok(expr),
            Some(token) => Err(CalcError::UnexpectedToken(format!("{:?}", token))),
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn expr(&mut self) -> Result<Expr, CalcError> {
        let mut lhs = self.term()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Sub,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.term()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
    }

    fn term(&mut self) -> Result<Expr, CalcError> {
        let mut lhs = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinaryOp::Mul,
                Some(Token::Slash) => BinaryOp::Div,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.unary()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
    }

    fn descend(&mut self) -> Result<(), CalcError> {
        if self.depth >= MAX_DEPTH {
            return Err(CalcError::TooDeep);
        }
        self.depth += 1;
        Ok(())
    }

    fn unary(&mut self) -> Result<Expr, CalcError> {
        let negate = match self.peek() {
            Some(Token::Minus) => true,
            Some(Token::Plus) => false,
            _ => return self.primary(),
        };
        self.pos += 1;
        self.descend()?;
        let operand = self.unary();
        self.depth -= 1;
        let operand = operand?;
        Ok(if negate {
            Expr::Neg(Box::new(operand))
        } else {
            operand
        })
    }

    fn primary(&mut self) -> Result<Expr, CalcError> {
        match self.next() {
            Some(Token::Number(n)) => Ok(Expr::Number(n)),
            Some(Token::Field(name)) => Ok(Expr::Field(name)),
            Some(Token::LParen) => {
                self.descend()?;
                let inner = self.expr();
                self.depth -= 1;
                let inner = inner?;
                match self.next() {
                    Some(Token::RParen) => Ok(inner),
                    Some(token) => Err(CalcError::UnexpectedToken(format!("{:?}", token))),
                    None => Err(CalcError::UnexpectedEnd),
                }
            }
            Some(token) => Err(CalcError::UnexpectedToken(format!("{:?}", token))),
            None => Err(CalcError::UnexpectedEnd),
        }
    }
}

pub fn parse(formula: &str, names: &[&str]) -> Result<Expr, CalcError> {
    Parser::new(tokenize(formula, names)?).parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multiplication_binds_tighter_than_addition() {
        let expr = parse("1 + 2 * 3", &[]).unwrap();
        match expr {
            Expr::Binary { op: BinaryOp::Add, rhs, .. } => {
                assert!(matches!(*rhs, Expr::Binary { op: BinaryOp::Mul, .. }));
            }
            other => panic!("unexpected tree {:?}", other),
        }
    }

    #[test]
    fn field_names_with_spaces_are_single_tokens() {
        let tokens = tokenize("Weight (kg) / 2", &["Weight (kg)", "Weight"]).unwrap();
        assert_eq!(
            tokens,
            vec![
                Token::Field("Weight (kg)".to_string()),
                Token::Slash,
                Token::Number(2.0)
            ]
        );
    }

    #[test]
    fn names_do_not_match_inside_longer_words() {
        let tokens = tokenize("ab + a", &["a"]).unwrap();
        assert_eq!(
            tokens,
            vec![
                Token::Field("ab".to_string()),
                Token::Plus,
                Token::Field("a".to_string())
            ]
        );
    }

    #[test]
    fn unicode_operators_are_accepted() {
        let tokens = tokenize("6 \u{d7} 2 \u{f7} 3 \u{2212} 1", &[]).unwrap();
        assert_eq!(
            tokens,
            vec![
                Token::Number(6.0),
                Token::Star,
                Token::Number(2.0),
                Token::Slash,
                Token::Number(3.0),
                Token::Minus,
                Token::Number(1.0)
            ]
        );
    }

    #[test]
    fn anything_outside_the_grammar_is_rejected() {
        assert!(matches!(
            tokenize("alert(1); 2", &[]),
            Err(CalcError::UnexpectedChar { ch: ';', .. })
        ));
        assert_eq!(parse("(1 + 2", &[]), Err(CalcError::UnexpectedEnd));
        assert!(matches!(parse("1 2", &[]), Err(CalcError::UnexpectedToken(_))));
        assert!(matches!(parse("1..2", &[]), Err(CalcError::UnexpectedToken(_))));
        assert_eq!(parse("   ", &[]), Err(CalcError::Empty));
    }

    #[test]
    fn nesting_and_length_are_bounded() {
        let nested = format!("{}1{}", "(".repeat(100), ")".repeat(100));
        assert_eq!(parse(&nested, &[]), Err(CalcError::TooDeep));

        let signs = format!("{}1", "-".repeat(100));
        assert_eq!(parse(&signs, &[]), Err(CalcError::TooDeep));

        let chain = vec!["1"; MAX_TOKENS].join("+");
        assert_eq!(parse(&chain, &[]), Err(CalcError::TooLong));

        let within = format!("{}1{}", "(".repeat(MAX_DEPTH), ")".repeat(MAX_DEPTH));
        assert_eq!(parse(&within, &[]), Ok(Expr::Number(1.0)));
    }
}
