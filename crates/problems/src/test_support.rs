//! Reference evaluator for generated expression text.

/// Evaluate an expression with standard precedence:
/// `^` (right-assoc) > unary minus > `* / %` > `+ -`.
pub fn eval_expression(text: &str) -> Result<f64, String> {
    let tokens = tokenize(text)?;
    let mut parser = Parser { tokens, pos: 0 };
    let value = parser.expr()?;
    if parser.pos != parser.tokens.len() {
        return Err(format!("trailing input at token {}", parser.pos));
    }
    Ok(value)
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Num(f64),
    Op(char),
    Open,
    Close,
}

fn tokenize(text: &str) -> Result<Vec<Token>, String> {
    let chars: Vec<char> = text.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' => i += 1,
            '(' => {
                tokens.push(Token::Open);
                i += 1;
            }
            ')' => {
                tokens.push(Token::Close);
                i += 1;
            }
            '+' | '-' | '*' | '/' | '%' | '^' => {
                tokens.push(Token::Op(c));
                i += 1;
            }
            '0'..='9' | '.' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let s: String = chars[start..i].iter().collect();
                tokens.push(Token::Num(s.parse().map_err(|e| format!("{}: {}", s, e))?));
            }
            other => return Err(format!("unexpected character {:?}", other)),
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn expr(&mut self) -> Result<f64, String> {
        let mut value = self.term()?;
        while let Some(Token::Op(op @ ('+' | '-'))) = self.peek().cloned() {
            self.pos += 1;
            let rhs = self.term()?;
            value = if op == '+' { value + rhs } else { value - rhs };
        }
        Ok(value)
    }

    fn term(&mut self) -> Result<f64, String> {
        let mut value = self.unary()?;
        while let Some(Token::Op(op @ ('*' | '/' | '%'))) = self.peek().cloned() {
            self.pos += 1;
            let rhs = self.unary()?;
            value = match op {
                '*' => value * rhs,
                '/' => value / rhs,
                _ => value % rhs,
            };
        }
        Ok(value)
    }

    fn unary(&mut self) -> Result<f64, String> {
        if let Some(Token::Op('-')) = self.peek() {
            self.pos += 1;
            return Ok(-self.unary()?);
        }
        self.power()
    }

    fn power(&mut self) -> Result<f64, String> {
        let base = self.primary()?;
        if let Some(Token::Op('^')) = self.peek() {
            self.pos += 1;
            let exponent = self.unary()?;
            return Ok(base.powf(exponent));
        }
        Ok(base)
    }

    fn primary(&mut self) -> Result<f64, String> {
        match self.peek().cloned() {
            Some(Token::Num(n)) => {
                self.pos += 1;
                Ok(n)
            }
            Some(Token::Open) => {
                self.pos += 1;
                let value = self.expr()?;
                if self.peek() != Some(&Token::Close) {
                    return Err("missing ')'".to_string());
                }
                self.pos += 1;
                Ok(value)
            }
            other => Err(format!("unexpected token {:?}", other)),
        }
    }
}

#[test]
fn test_reference_evaluator() {
    assert_eq!(eval_expression("2 + 3 * 4").unwrap(), 14.0);
    assert_eq!(eval_expression("(2 + 3) * 4").unwrap(), 20.0);
    assert_eq!(eval_expression("24 / 4 / 2").unwrap(), 3.0);
    assert_eq!(eval_expression("-12 - (-7)").unwrap(), -5.0);
    assert_eq!(eval_expression("2^3").unwrap(), 8.0);
    assert_eq!(eval_expression("17 % 5").unwrap(), 2.0);
    assert_eq!(eval_expression("2.5 + 0.75").unwrap(), 3.25);
    assert!(eval_expression("(1 + 2").is_err());
}
