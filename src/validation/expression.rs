//! Token-level checker for conditional expressions.
//!
//! Expressions are small boolean formulas over question uids, e.g.
//! `idade >= 65 and 'febre' in sintomas`. Nothing here evaluates them; the
//! checker only proves they contain no calls, imports, assignments, attribute
//! access or statement separators, and reports names it cannot resolve.

use std::collections::BTreeSet;

use super::{ExpressionCheck, ExpressionValidator, KnownSymbols};

/// Words that are never reported as unknown identifiers or literals.
pub const RESERVED_WORDS: &[&str] = &[
    "and", "or", "not", "in", "is", "True", "False", "None", "true", "false", "visivel", "invisivel",
];

/// Keywords that act as operators, not operands.
const OPERATOR_WORDS: &[&str] = &["and", "or", "not", "in", "is"];

const FORBIDDEN_WORDS: &[(&str, &str)] = &[
    ("import", "Imports not allowed in conditions"),
    ("from", "Imports not allowed in conditions"),
    ("lambda", "Lambdas not allowed in conditions"),
    ("exec", "Function calls not allowed in conditions"),
    ("eval", "Function calls not allowed in conditions"),
];

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    Number,
    Op,
    Assign,
    Open(char),
    Close(char),
    Comma,
    Dot,
    Semicolon,
}

impl Token {
    /// Whether the token can end an operand.
    fn ends_operand(&self) -> bool {
        match self {
            Self::Ident(word) => !OPERATOR_WORDS.contains(&word.as_str()),
            Self::Str(_) | Self::Number | Self::Close(_) => true,
            _ => false,
        }
    }

    /// Whether the token can start an operand.
    fn starts_operand(&self) -> bool {
        match self {
            Self::Ident(word) => !OPERATOR_WORDS.contains(&word.as_str()),
            Self::Str(_) | Self::Number => true,
            _ => false,
        }
    }
}

fn tokenize(expression: &str) -> Result<Vec<Token>, String> {
    let chars: Vec<char> = expression.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();
        match c {
            c if c.is_whitespace() => i += 1,
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            c if c.is_ascii_digit() => {
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.' || chars[i] == '_') {
                    i += 1;
                }
                tokens.push(Token::Number);
            }
            '\'' | '"' => {
                let quote = c;
                let start = i;
                let mut value = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        None => return Err(format!("Syntax error: unterminated string literal at position {start}")),
                        Some('\\') => {
                            if let Some(escaped) = chars.get(i + 1) {
                                value.push(*escaped);
                            }
                            i += 2;
                        }
                        Some(ch) if *ch == quote => {
                            i += 1;
                            break;
                        }
                        Some(ch) => {
                            value.push(*ch);
                            i += 1;
                        }
                    }
                }
                tokens.push(Token::Str(value));
            }
            '=' | '!' | '<' | '>' => {
                if next == Some('=') {
                    tokens.push(Token::Op);
                    i += 2;
                } else if c == '=' {
                    tokens.push(Token::Assign);
                    i += 1;
                } else if c == '!' {
                    return Err(format!("Syntax error: unexpected '!' at position {i}"));
                } else {
                    tokens.push(Token::Op);
                    i += 1;
                }
            }
            '+' | '-' | '*' | '/' | '%' | '&' | '|' | '^' | ':' => {
                if next == Some('=') {
                    tokens.push(Token::Assign);
                    i += 2;
                } else if c == ':' {
                    return Err(format!("Syntax error: unexpected ':' at position {i}"));
                } else {
                    tokens.push(Token::Op);
                    i += 1;
                }
            }
            '(' | '[' => {
                tokens.push(Token::Open(c));
                i += 1;
            }
            ')' | ']' => {
                tokens.push(Token::Close(c));
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '.' => {
                tokens.push(Token::Dot);
                i += 1;
            }
            ';' => {
                tokens.push(Token::Semicolon);
                i += 1;
            }
            other => return Err(format!("Syntax error: unexpected character '{other}' at position {i}")),
        }
    }
    Ok(tokens)
}

fn check_balance(tokens: &[Token]) -> Result<(), String> {
    let mut stack = Vec::new();
    for token in tokens {
        match token {
            Token::Open(c) => stack.push(if *c == '(' { ')' } else { ']' }),
            Token::Close(c) => {
                if stack.pop() != Some(*c) {
                    return Err("Syntax error: unbalanced parentheses".to_string());
                }
            }
            _ => {}
        }
    }
    if stack.is_empty() {
        Ok(())
    } else {
        Err("Syntax error: unbalanced parentheses".to_string())
    }
}

fn security_violations(tokens: &[Token]) -> Vec<String> {
    let mut found = BTreeSet::new();
    let mut ordered = Vec::new();
    let mut report = |message: &str| {
        if found.insert(message.to_string()) {
            ordered.push(message.to_string());
        }
    };

    for (i, token) in tokens.iter().enumerate() {
        match token {
            Token::Ident(word) => {
                if let Some((_, message)) = FORBIDDEN_WORDS.iter().find(|(w, _)| w == word) {
                    report(*message);
                }
            }
            Token::Open('(') if i > 0 => {
                let is_call = match &tokens[i - 1] {
                    Token::Ident(word) => !OPERATOR_WORDS.contains(&word.as_str()),
                    Token::Close(_) => true,
                    _ => false,
                };
                if is_call {
                    report("Function calls not allowed in conditions");
                }
            }
            Token::Assign => report("Assignments not allowed in conditions"),
            Token::Dot => report("Attribute access not allowed in conditions"),
            Token::Semicolon => report("Multiple statements not allowed in conditions"),
            _ => {}
        }
    }
    ordered
}

fn check_shape(tokens: &[Token]) -> Result<(), String> {
    for pair in tokens.windows(2) {
        if pair[0].ends_operand() && pair[1].starts_operand() {
            return Err("Syntax error: missing operator between operands".to_string());
        }
    }
    match tokens.last() {
        Some(Token::Op) | Some(Token::Comma) => Err("Syntax error: unexpected end of expression".to_string()),
        Some(Token::Ident(word)) if OPERATOR_WORDS.contains(&word.as_str()) => {
            Err("Syntax error: unexpected end of expression".to_string())
        }
        _ => Ok(()),
    }
}

/// Tokenizer-based [`ExpressionValidator`].
#[derive(Debug, Clone, Copy, Default)]
pub struct BasicExpressionValidator;

impl BasicExpressionValidator {
    /// Create a validator.
    pub fn new() -> Self {
        Self
    }
}

impl ExpressionValidator for BasicExpressionValidator {
    fn validate_expression(&self, expression: &str, known: &KnownSymbols) -> ExpressionCheck {
        let expression = expression.trim();
        if expression.is_empty() {
            return ExpressionCheck::clean();
        }

        let tokens = match tokenize(expression) {
            Ok(tokens) => tokens,
            Err(e) => return ExpressionCheck::rejected(vec![e]),
        };

        let violations = security_violations(&tokens);
        if !violations.is_empty() {
            return ExpressionCheck::rejected(violations);
        }
        if let Err(e) = check_balance(&tokens).and_then(|_| check_shape(&tokens)) {
            return ExpressionCheck::rejected(vec![e]);
        }

        let mut check = ExpressionCheck::clean();
        let mut reported = BTreeSet::new();
        for token in &tokens {
            let diagnostic = match token {
                Token::Ident(word) if !RESERVED_WORDS.contains(&word.as_str()) && !known.uids.contains(word) => {
                    format!("Unknown identifier: '{word}'")
                }
                Token::Str(value)
                    if !RESERVED_WORDS.contains(&value.as_str()) && !known.option_ids.contains(value) =>
                {
                    format!("Unverified string literal: '{value}'")
                }
                _ => continue,
            };
            if reported.insert(diagnostic.clone()) {
                check.diagnostics.push(diagnostic);
            }
        }
        check
    }
}
