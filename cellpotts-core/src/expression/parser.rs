use super::functions::RANDOM_NORM;
use cellpotts_concepts::ParseError;

/// Name of the solver local which scales normal distributed noise.
pub const NOISE_SCALING_SYMBOL: &str = "_noise_scaling";

/// Unary operators.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnaryOp {
    /// `-x`
    Neg,
    /// `!x` or `not x`
    Not,
}

/// Binary operators.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    And,
    Or,
}

impl BinaryOp {
    pub(crate) fn apply(&self, a: f64, b: f64) -> f64 {
        let truth = |x: bool| if x { 1.0 } else { 0.0 };
        match self {
            BinaryOp::Add => a + b,
            BinaryOp::Sub => a - b,
            BinaryOp::Mul => a * b,
            BinaryOp::Div => a / b,
            BinaryOp::Pow => a.powf(b),
            BinaryOp::Lt => truth(a < b),
            BinaryOp::Le => truth(a <= b),
            BinaryOp::Gt => truth(a > b),
            BinaryOp::Ge => truth(a >= b),
            BinaryOp::Eq => truth(a == b),
            BinaryOp::Ne => truth(a != b),
            BinaryOp::And => truth(a != 0.0 && b != 0.0),
            BinaryOp::Or => truth(a != 0.0 || b != 0.0),
        }
    }
}

/// Syntax tree of an expression before symbols are resolved.
#[derive(Clone, Debug, PartialEq)]
pub enum RawExpr {
    /// Numeric literal
    Number(f64),
    /// Reference to a symbol, constant or function parameter
    Symbol(String),
    /// Unary operation
    Unary(UnaryOp, Box<RawExpr>),
    /// Binary operation
    Binary(BinaryOp, Box<RawExpr>, Box<RawExpr>),
    /// Function call
    Call(String, Vec<RawExpr>),
    /// `condition ? a : b`
    Conditional(Box<RawExpr>, Box<RawExpr>, Box<RawExpr>),
}

#[derive(Clone, Debug, PartialEq)]
enum Token {
    Number(f64),
    Ident(String),
    Op(BinaryOp),
    Minus,
    Plus,
    Not,
    LParen,
    RParen,
    Comma,
    Question,
    Colon,
}

fn is_ident_char(c: u8) -> bool {
    c.is_ascii_alphanumeric() || c == b'_' || c == b'.'
}

fn tokenize(text: &str) -> Result<Vec<(Token, usize)>, ParseError> {
    let bytes = text.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;
    let error = |pos: usize, msg: &str| {
        ParseError(format!(
            "{msg} at position {pos} of expression \"{text}\""
        ))
    };
    while i < bytes.len() {
        let c = bytes[i];
        let start = i;
        if c.is_ascii_whitespace() {
            i += 1;
            continue;
        }
        if c.is_ascii_digit() || (c == b'.' && bytes.get(i + 1).is_some_and(u8::is_ascii_digit)) {
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
            let literal = &text[start..i];
            let value = literal
                .parse::<f64>()
                .map_err(|_| error(start, &format!("invalid number \"{literal}\"")))?;
            tokens.push((Token::Number(value), start));
            continue;
        }
        if c.is_ascii_alphabetic() || c == b'_' {
            while i < bytes.len() && is_ident_char(bytes[i]) {
                i += 1;
            }
            let token = match &text[start..i] {
                "and" => Token::Op(BinaryOp::And),
                "or" => Token::Op(BinaryOp::Or),
                "not" => Token::Not,
                name => Token::Ident(name.to_owned()),
            };
            tokens.push((token, start));
            continue;
        }
        let next = bytes.get(i + 1).copied();
        let (token, len) = match (c, next) {
            (b'<', Some(b'=')) => (Token::Op(BinaryOp::Le), 2),
            (b'>', Some(b'=')) => (Token::Op(BinaryOp::Ge), 2),
            (b'=', Some(b'=')) => (Token::Op(BinaryOp::Eq), 2),
            (b'!', Some(b'=')) => (Token::Op(BinaryOp::Ne), 2),
            (b'&', Some(b'&')) => (Token::Op(BinaryOp::And), 2),
            (b'|', Some(b'|')) => (Token::Op(BinaryOp::Or), 2),
            (b'<', _) => (Token::Op(BinaryOp::Lt), 1),
            (b'>', _) => (Token::Op(BinaryOp::Gt), 1),
            (b'!', _) => (Token::Not, 1),
            (b'+', _) => (Token::Plus, 1),
            (b'-', _) => (Token::Minus, 1),
            (b'*', _) => (Token::Op(BinaryOp::Mul), 1),
            (b'/', _) => (Token::Op(BinaryOp::Div), 1),
            (b'^', _) => (Token::Op(BinaryOp::Pow), 1),
            (b'(', _) => (Token::LParen, 1),
            (b')', _) => (Token::RParen, 1),
            (b',', _) => (Token::Comma, 1),
            (b'?', _) => (Token::Question, 1),
            (b':', _) => (Token::Colon, 1),
            _ => return Err(error(start, &format!("unexpected character '{}'", c as char))),
        };
        tokens.push((token, start));
        i += len;
    }
    Ok(tokens)
}

/// Recursive descent parser with the usual operator precedences:
/// `?:` < `or` < `and` < comparisons < `+ -` < `* /` < unary < `^`.
struct Parser<'a> {
    text: &'a str,
    tokens: Vec<(Token, usize)>,
    pos: usize,
}

impl Parser<'_> {
    fn error(&self, msg: &str) -> ParseError {
        let at = self
            .tokens
            .get(self.pos)
            .map(|(_, p)| *p)
            .unwrap_or(self.text.len());
        ParseError(format!(
            "{msg} at position {at} of expression \"{}\"",
            self.text
        ))
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|(t, _)| t.clone());
        self.pos += 1;
        token
    }

    fn expect(&mut self, token: Token, what: &str) -> Result<(), ParseError> {
        match self.peek() {
            Some(t) if *t == token => {
                self.pos += 1;
                Ok(())
            }
            _ => Err(self.error(&format!("expected {what}"))),
        }
    }

    fn conditional(&mut self) -> Result<RawExpr, ParseError> {
        let condition = self.binary(0)?;
        if self.peek() == Some(&Token::Question) {
            self.pos += 1;
            let a = self.conditional()?;
            self.expect(Token::Colon, "':'")?;
            let b = self.conditional()?;
            return Ok(RawExpr::Conditional(
                Box::new(condition),
                Box::new(a),
                Box::new(b),
            ));
        }
        Ok(condition)
    }

    fn precedence(token: &Token) -> Option<(usize, BinaryOp)> {
        match token {
            Token::Op(op @ BinaryOp::Or) => Some((0, *op)),
            Token::Op(op @ BinaryOp::And) => Some((1, *op)),
            Token::Op(
                op @ (BinaryOp::Lt
                | BinaryOp::Le
                | BinaryOp::Gt
                | BinaryOp::Ge
                | BinaryOp::Eq
                | BinaryOp::Ne),
            ) => Some((2, *op)),
            Token::Plus => Some((3, BinaryOp::Add)),
            Token::Minus => Some((3, BinaryOp::Sub)),
            Token::Op(op @ (BinaryOp::Mul | BinaryOp::Div)) => Some((4, *op)),
            _ => None,
        }
    }

    fn binary(&mut self, min_level: usize) -> Result<RawExpr, ParseError> {
        let mut lhs = self.unary()?;
        while let Some((level, op)) = self.peek().and_then(Self::precedence) {
            if level < min_level {
                break;
            }
            self.pos += 1;
            let rhs = self.binary(level + 1)?;
            lhs = RawExpr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<RawExpr, ParseError> {
        match self.peek() {
            Some(Token::Minus) => {
                self.pos += 1;
                Ok(RawExpr::Unary(UnaryOp::Neg, Box::new(self.unary()?)))
            }
            Some(Token::Plus) => {
                self.pos += 1;
                self.unary()
            }
            Some(Token::Not) => {
                self.pos += 1;
                Ok(RawExpr::Unary(UnaryOp::Not, Box::new(self.unary()?)))
            }
            _ => self.power(),
        }
    }

    fn power(&mut self) -> Result<RawExpr, ParseError> {
        let base = self.primary()?;
        if self.peek() == Some(&Token::Op(BinaryOp::Pow)) {
            self.pos += 1;
            // right associative, binds tighter than a leading minus
            let exponent = self.unary()?;
            return Ok(RawExpr::Binary(
                BinaryOp::Pow,
                Box::new(base),
                Box::new(exponent),
            ));
        }
        Ok(base)
    }

    fn primary(&mut self) -> Result<RawExpr, ParseError> {
        match self.advance() {
            Some(Token::Number(value)) => Ok(RawExpr::Number(value)),
            Some(Token::Ident(name)) => {
                if self.peek() != Some(&Token::LParen) {
                    return Ok(RawExpr::Symbol(name));
                }
                self.pos += 1;
                let mut args = Vec::new();
                if self.peek() == Some(&Token::RParen) {
                    self.pos += 1;
                    return Ok(RawExpr::Call(name, args));
                }
                loop {
                    args.push(self.conditional()?);
                    match self.advance() {
                        Some(Token::Comma) => continue,
                        Some(Token::RParen) => break,
                        _ => {
                            self.pos -= 1;
                            return Err(self.error("expected ',' or ')'"));
                        }
                    }
                }
                Ok(RawExpr::Call(name, args))
            }
            Some(Token::LParen) => {
                let inner = self.conditional()?;
                self.expect(Token::RParen, "')'")?;
                Ok(inner)
            }
            _ => {
                self.pos -= 1;
                Err(self.error("expected a number, symbol or '('"))
            }
        }
    }
}

/// Parse an expression into its syntax tree.
///
/// ```
/// # use cellpotts_core::{parse_expression, RawExpr};
/// let expr = parse_expression("-2^2")?;
/// assert!(matches!(expr, RawExpr::Unary(..)));
/// # Ok::<(), cellpotts_concepts::ParseError>(())
/// ```
pub fn parse_expression(text: &str) -> Result<RawExpr, ParseError> {
    let tokens = tokenize(text)?;
    if tokens.is_empty() {
        return Err(ParseError(format!("empty expression \"{text}\"")));
    }
    let mut parser = Parser {
        text,
        tokens,
        pos: 0,
    };
    let expr = parser.conditional()?;
    if parser.pos < parser.tokens.len() {
        return Err(parser.error("unexpected trailing input"));
    }
    Ok(expr)
}

/// Split the text of a vector expression `"x, y, z"` into its components.
///
/// Commas inside of function calls do not separate components.
pub fn split_components(text: &str) -> Result<Vec<&str>, ParseError> {
    let mut components = Vec::new();
    let mut level = 0i32;
    let mut start = 0;
    for (i, c) in text.char_indices() {
        match c {
            '(' => level += 1,
            ')' => level -= 1,
            ',' if level == 0 => {
                components.push(text[start..i].trim());
                start = i + 1;
            }
            _ => (),
        }
        if level < 0 {
            return Err(ParseError(format!("unbalanced parentheses in \"{text}\"")));
        }
    }
    if level != 0 {
        return Err(ParseError(format!("unbalanced parentheses in \"{text}\"")));
    }
    components.push(text[start..].trim());
    Ok(components)
}

/// Append the noise scaling symbol as last argument to every call of `rand_norm`.
///
/// Returns [None] if the expression does not contain normal distributed noise.
/// ```
/// # use cellpotts_core::inject_noise_scaling;
/// let text = inject_noise_scaling("-X + rand_norm(0, 1)")?;
/// assert_eq!(text.as_deref(), Some("-X + rand_norm(0, 1, _noise_scaling)"));
/// # Ok::<(), cellpotts_concepts::ParseError>(())
/// ```
pub fn inject_noise_scaling(text: &str) -> Result<Option<String>, ParseError> {
    let bytes = text.as_bytes();
    let mut insert_at = Vec::new();
    let mut search = 0;
    while let Some(found) = text[search..].find(RANDOM_NORM) {
        let start = search + found;
        let mut pos = start + RANDOM_NORM.len();
        search = pos;
        if start > 0 && is_ident_char(bytes[start - 1]) {
            continue;
        }
        while pos < bytes.len() && bytes[pos].is_ascii_whitespace() {
            pos += 1;
        }
        if bytes.get(pos) != Some(&b'(') {
            continue;
        }
        let mut level = 1;
        let mut next = pos;
        while level > 0 {
            next += 1;
            match bytes.get(next) {
                None => {
                    return Err(ParseError(format!(
                        "unbalanced parentheses in \"{text}\""
                    )))
                }
                Some(b'(') => level += 1,
                Some(b')') => level -= 1,
                _ => (),
            }
        }
        insert_at.push(next);
    }
    if insert_at.is_empty() {
        return Ok(None);
    }
    insert_at.sort_unstable();
    let mut result = String::with_capacity(text.len() + insert_at.len() * 16);
    let mut last = 0;
    for pos in insert_at {
        result.push_str(&text[last..pos]);
        result.push_str(", ");
        result.push_str(NOISE_SCALING_SYMBOL);
        last = pos;
    }
    result.push_str(&text[last..]);
    Ok(Some(result))
}

#[cfg(test)]
mod test {
    use super::*;

    fn sym(name: &str) -> Box<RawExpr> {
        Box::new(RawExpr::Symbol(name.to_owned()))
    }

    #[test]
    fn precedence() {
        let expr = parse_expression("a + b * c").unwrap();
        assert_eq!(
            expr,
            RawExpr::Binary(
                BinaryOp::Add,
                sym("a"),
                Box::new(RawExpr::Binary(BinaryOp::Mul, sym("b"), sym("c")))
            )
        );
        let expr = parse_expression("a - b - c").unwrap();
        assert_eq!(
            expr,
            RawExpr::Binary(
                BinaryOp::Sub,
                Box::new(RawExpr::Binary(BinaryOp::Sub, sym("a"), sym("b"))),
                sym("c")
            )
        );
        let expr = parse_expression("a ^ b ^ c").unwrap();
        assert_eq!(
            expr,
            RawExpr::Binary(
                BinaryOp::Pow,
                sym("a"),
                Box::new(RawExpr::Binary(BinaryOp::Pow, sym("b"), sym("c")))
            )
        );
    }

    #[test]
    fn calls_and_conditionals() {
        let expr = parse_expression("x > 1 and not y ? f(x, 2e-3) : rand_bool()").unwrap();
        let RawExpr::Conditional(condition, a, b) = expr else {
            panic!("expected a conditional");
        };
        assert!(matches!(*condition, RawExpr::Binary(BinaryOp::And, _, _)));
        assert_eq!(
            *a,
            RawExpr::Call("f".into(), vec![RawExpr::Symbol("x".into()), RawExpr::Number(2e-3)])
        );
        assert_eq!(*b, RawExpr::Call("rand_bool".into(), vec![]));
    }

    #[test]
    fn component_symbols() {
        assert_eq!(
            parse_expression("v.x").unwrap(),
            RawExpr::Symbol("v.x".into())
        );
        assert_eq!(parse_expression(".5").unwrap(), RawExpr::Number(0.5));
    }

    #[test]
    fn syntax_errors() {
        assert!(parse_expression("").is_err());
        assert!(parse_expression("a +").is_err());
        assert!(parse_expression("(a").is_err());
        assert!(parse_expression("f(a b)").is_err());
        assert!(parse_expression("a # b").is_err());
        assert!(parse_expression("a b").is_err());
    }

    #[test]
    fn vector_components() {
        let components = split_components("1, max(a, b), c").unwrap();
        assert_eq!(components, vec!["1", "max(a, b)", "c"]);
        assert!(split_components("f(a, b").is_err());
    }

    #[test]
    fn noise_injection() {
        assert_eq!(inject_noise_scaling("-X").unwrap(), None);
        assert_eq!(
            inject_noise_scaling("rand_norm(0, f(1)) + my_rand_norm(1)")
                .unwrap()
                .as_deref(),
            Some("rand_norm(0, f(1), _noise_scaling) + my_rand_norm(1)")
        );
        assert_eq!(
            inject_noise_scaling("rand_norm(rand_norm(0,1), 1)")
                .unwrap()
                .as_deref(),
            Some("rand_norm(rand_norm(0,1, _noise_scaling), 1, _noise_scaling)")
        );
        assert!(inject_noise_scaling("rand_norm(0, 1").is_err());
    }
}
