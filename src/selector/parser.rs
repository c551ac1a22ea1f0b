//! Selection expression parser
//!
//! ```text
//! or   := and (("or" | "||") and)*
//! and  := not (("and" | "&&") not)*
//! not  := ("not" | "!") not | atom
//! atom := "(" or ")" | attr [op value] | value "in" attr
//! op   := "==" | "=" | "!=" | "<" | "<=" | ">" | ">="
//! ```

use logos::Logos;

use crate::error::SelectorError;
use crate::models::AttrValue;
use crate::selector::{CmpOp, Expr};

#[derive(Logos, Clone, Debug, PartialEq)]
#[logos(skip r"[ \t\r\n\f]+")]
enum Token {
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("and")]
    #[token("&&")]
    And,
    #[token("or")]
    #[token("||")]
    Or,
    #[token("not")]
    #[token("!")]
    Not,
    #[token("in")]
    In,
    #[token("==", |_| CmpOp::Eq)]
    #[token("=", |_| CmpOp::Eq)]
    #[token("!=", |_| CmpOp::Ne)]
    #[token("<", |_| CmpOp::Lt)]
    #[token("<=", |_| CmpOp::Le)]
    #[token(">", |_| CmpOp::Gt)]
    #[token(">=", |_| CmpOp::Ge)]
    Op(CmpOp),
    #[regex(r"[\p{L}\p{N}_.:/-]+", |lex| lex.slice().to_string())]
    Word(String),
    #[regex(r#""([^"\\]|\\.)*""#, unquote)]
    #[regex(r"'([^'\\]|\\.)*'", unquote)]
    Quoted(String),
    // Opening quote with no closing one before end of input
    #[regex(r#""([^"\\]|\\.)*\\?"#)]
    #[regex(r"'([^'\\]|\\.)*\\?")]
    Unterminated,
    #[regex(r"-?[0-9]+", |lex| lex.slice().parse::<i64>().ok(), priority = 3)]
    Int(i64),
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Token::LParen => "'('".to_string(),
            Token::RParen => "')'".to_string(),
            Token::And => "'and'".to_string(),
            Token::Or => "'or'".to_string(),
            Token::Not => "'not'".to_string(),
            Token::In => "'in'".to_string(),
            Token::Op(op) => format!("'{op}'"),
            Token::Word(w) => format!("'{w}'"),
            Token::Quoted(s) => format!("{s:?}"),
            Token::Unterminated => "an unterminated string".to_string(),
            Token::Int(i) => i.to_string(),
        }
    }
}

/// Strip the quotes and resolve backslash escapes
fn unquote(lex: &mut logos::Lexer<Token>) -> String {
    let raw = lex.slice();
    let body = &raw[1..raw.len() - 1];
    let mut value = String::with_capacity(body.len());
    let mut chars = body.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => value.extend(chars.next()),
            c => value.push(c),
        }
    }
    value
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '-' | '.' | ':' | '/')
}

fn tokenize(input: &str) -> Result<Vec<(Token, usize)>, SelectorError> {
    let mut lexer = Token::lexer(input);
    let mut tokens = Vec::new();

    while let Some(result) = lexer.next() {
        let pos = lexer.span().start;
        match result {
            Ok(Token::Unterminated) => return Err(SelectorError::UnterminatedString(pos)),
            Ok(token) => tokens.push((token, pos)),
            Err(()) => {
                let ch = lexer.slice().chars().next().unwrap_or_default();
                return Err(SelectorError::UnexpectedChar { ch, pos });
            }
        }
    }
    Ok(tokens)
}

/// Interpret a bare word or number as a literal
pub(crate) fn literal(raw: &str) -> AttrValue {
    match raw {
        "true" => AttrValue::Bool(true),
        "false" => AttrValue::Bool(false),
        _ => raw
            .parse::<i64>()
            .map(AttrValue::Int)
            .unwrap_or_else(|_| AttrValue::Str(raw.to_string())),
    }
}

struct Parser {
    tokens: Vec<(Token, usize)>,
    index: usize,
    end: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.index).map(|(t, _)| t)
    }

    fn pos(&self) -> usize {
        self.tokens
            .get(self.index)
            .map(|(_, p)| *p)
            .unwrap_or(self.end)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.index).map(|(t, _)| t.clone());
        self.index += 1;
        token
    }

    fn expected(&self, expected: &'static str) -> SelectorError {
        SelectorError::Expected {
            expected,
            found: self
                .peek()
                .map(Token::describe)
                .unwrap_or_else(|| "end of input".to_string()),
            pos: self.pos(),
        }
    }

    fn or(&mut self) -> Result<Expr, SelectorError> {
        let mut left = self.and()?;
        while self.peek() == Some(&Token::Or) {
            self.advance();
            let right = self.and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and(&mut self) -> Result<Expr, SelectorError> {
        let mut left = self.not()?;
        while self.peek() == Some(&Token::And) {
            self.advance();
            let right = self.not()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn not(&mut self) -> Result<Expr, SelectorError> {
        if self.peek() == Some(&Token::Not) {
            self.advance();
            return Ok(Expr::Not(Box::new(self.not()?)));
        }
        self.atom()
    }

    fn value(&mut self) -> Result<AttrValue, SelectorError> {
        match self.peek() {
            Some(Token::Quoted(_)) | Some(Token::Word(_)) | Some(Token::Int(_)) => {}
            _ => return Err(self.expected("a value")),
        }
        Ok(match self.advance() {
            Some(Token::Quoted(s)) => AttrValue::Str(s),
            Some(Token::Word(w)) => literal(&w),
            Some(Token::Int(n)) => AttrValue::Int(n),
            _ => return Err(self.expected("a value")),
        })
    }

    fn attribute(&mut self) -> Result<String, SelectorError> {
        match self.peek() {
            Some(Token::Word(_)) => {}
            _ => return Err(self.expected("an attribute name")),
        }
        match self.advance() {
            Some(Token::Word(w)) => Ok(w),
            _ => Err(self.expected("an attribute name")),
        }
    }

    fn atom(&mut self) -> Result<Expr, SelectorError> {
        if self.peek() == Some(&Token::LParen) {
            self.advance();
            let inner = self.or()?;
            if self.peek() != Some(&Token::RParen) {
                return Err(self.expected("')'"));
            }
            self.advance();
            return Ok(inner);
        }

        let start = self.index;
        let first = self.value()?;
        match self.peek() {
            Some(Token::In) => {
                self.advance();
                let attr = self.attribute()?;
                Ok(Expr::Contains { attr, value: first })
            }
            Some(Token::Op(op)) => {
                let op = *op;
                let attr = self.attr_at(start)?;
                self.advance();
                let value = self.value()?;
                Ok(Expr::Compare { attr, op, value })
            }
            _ => Ok(Expr::Truthy(self.attr_at(start)?)),
        }
    }

    /// The token at `index` must have been a bare attribute name
    fn attr_at(&self, index: usize) -> Result<String, SelectorError> {
        match self.tokens.get(index) {
            Some((Token::Word(w), _)) => Ok(w.clone()),
            Some((token, pos)) => Err(SelectorError::Expected {
                expected: "an attribute name",
                found: token.describe(),
                pos: *pos,
            }),
            None => Err(self.expected("an attribute name")),
        }
    }
}

/// Parse a selection expression
pub fn parse(input: &str) -> Result<Expr, SelectorError> {
    let tokens = tokenize(input)?;
    if tokens.is_empty() {
        return Err(SelectorError::Empty);
    }
    let mut parser = Parser {
        tokens,
        index: 0,
        end: input.len(),
    };
    let expr = parser.or()?;
    if parser.peek().is_some() {
        return Err(parser.expected("'and', 'or' or end of input"));
    }
    Ok(expr)
}

/// Parse one compact constraint list: `a,!b,c=1,!d=x`
pub fn parse_attr_spec(spec: &str) -> Result<Expr, SelectorError> {
    let mut terms = Vec::new();
    for raw in spec.split(',') {
        let constraint = raw.trim();
        let (negated, body) = match constraint.strip_prefix('!') {
            Some(rest) => (true, rest.trim()),
            None => (false, constraint),
        };
        let term = match body.split_once('=') {
            Some((attr, value)) => {
                let attr = attr.trim();
                if attr.is_empty() || !attr.chars().all(is_word_char) {
                    return Err(SelectorError::InvalidConstraint(constraint.to_string()));
                }
                Expr::Compare {
                    attr: attr.to_string(),
                    op: CmpOp::Eq,
                    value: literal(value.trim()),
                }
            }
            None => {
                if body.is_empty() || !body.chars().all(is_word_char) {
                    return Err(SelectorError::InvalidConstraint(constraint.to_string()));
                }
                Expr::Truthy(body.to_string())
            }
        };
        terms.push(if negated { Expr::Not(Box::new(term)) } else { term });
    }

    let mut terms = terms.into_iter();
    let first = terms
        .next()
        .ok_or_else(|| SelectorError::InvalidConstraint(spec.to_string()))?;
    Ok(terms.fold(first, |acc, t| Expr::And(Box::new(acc), Box::new(t))))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cmp(attr: &str, op: CmpOp, value: AttrValue) -> Expr {
        Expr::Compare {
            attr: attr.to_string(),
            op,
            value,
        }
    }

    #[test]
    fn test_precedence() {
        let expr = parse("a or b and not c").unwrap();
        assert_eq!(
            expr,
            Expr::Or(
                Box::new(Expr::Truthy("a".into())),
                Box::new(Expr::And(
                    Box::new(Expr::Truthy("b".into())),
                    Box::new(Expr::Not(Box::new(Expr::Truthy("c".into())))),
                )),
            )
        );
    }

    #[test]
    fn test_comparisons_and_literals() {
        assert_eq!(
            parse("tag == \"slow\"").unwrap(),
            cmp("tag", CmpOp::Eq, AttrValue::from("slow"))
        );
        assert_eq!(
            parse("priority>=2").unwrap(),
            cmp("priority", CmpOp::Ge, AttrValue::Int(2))
        );
        assert_eq!(
            parse("flaky != true").unwrap(),
            cmp("flaky", CmpOp::Ne, AttrValue::Bool(true))
        );
        assert_eq!(
            parse("'db' in tags").unwrap(),
            Expr::Contains {
                attr: "tags".into(),
                value: AttrValue::from("db")
            }
        );
    }

    #[test]
    fn test_symbolic_operators() {
        assert_eq!(parse("!(a && b) || c").unwrap(), parse("not (a and b) or c").unwrap());
    }

    #[test]
    fn test_keywords_inside_words() {
        assert_eq!(
            parse("android and order").unwrap(),
            Expr::And(
                Box::new(Expr::Truthy("android".into())),
                Box::new(Expr::Truthy("order".into())),
            )
        );
        assert_eq!(
            parse(r#"'it\'s' in notes"#).unwrap(),
            Expr::Contains {
                attr: "notes".into(),
                value: AttrValue::from("it's")
            }
        );
        assert_eq!(
            parse("offset >= -3").unwrap(),
            cmp("offset", CmpOp::Ge, AttrValue::Int(-3))
        );
        assert_eq!(
            parse("suite == net-io").unwrap(),
            cmp("suite", CmpOp::Eq, AttrValue::from("net-io"))
        );
    }

    #[test]
    fn test_errors_carry_position() {
        assert_eq!(parse("   "), Err(SelectorError::Empty));
        assert_eq!(
            parse("a # b"),
            Err(SelectorError::UnexpectedChar { ch: '#', pos: 2 })
        );
        assert_eq!(parse("tag == 'x"), Err(SelectorError::UnterminatedString(7)));
        assert!(matches!(
            parse("(a and b"),
            Err(SelectorError::Expected { expected: "')'", pos: 8, .. })
        ));
        assert!(matches!(
            parse("a b"),
            Err(SelectorError::Expected { pos: 2, .. })
        ));
        assert!(matches!(
            parse("'x' == y"),
            Err(SelectorError::Expected { expected: "an attribute name", pos: 0, .. })
        ));
    }

    #[test]
    fn test_attr_spec() {
        let expr = parse_attr_spec("slow,!network,priority=2").unwrap();
        assert_eq!(
            expr,
            Expr::And(
                Box::new(Expr::And(
                    Box::new(Expr::Truthy("slow".into())),
                    Box::new(Expr::Not(Box::new(Expr::Truthy("network".into())))),
                )),
                Box::new(cmp("priority", CmpOp::Eq, AttrValue::Int(2))),
            )
        );
        assert_eq!(
            parse_attr_spec("!owner=core").unwrap(),
            Expr::Not(Box::new(cmp("owner", CmpOp::Eq, AttrValue::from("core"))))
        );
        assert!(parse_attr_spec("a,,b").is_err());
        assert!(parse_attr_spec("=x").is_err());
    }
}
