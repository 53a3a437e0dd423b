//! Python expressions with enough structure to parenthesize correctly.

use crate::operation::{BinaryOperator, UnaryOperator};

/// Python operator binding strength, weakest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum Precedence {
    Ternary = 1,
    Or,
    And,
    Not,
    Comparison,
    BitOr,
    BitXor,
    BitAnd,
    Shift,
    Additive,
    Multiplicative,
    Unary,
    Power,
    Primary,
    Atom,
}

impl Precedence {
    pub(crate) fn of_binary(op: BinaryOperator) -> Precedence {
        use BinaryOperator::*;
        match op {
            LogicalOr => Precedence::Or,
            LogicalAnd => Precedence::And,
            BitOr => Precedence::BitOr,
            Xor => Precedence::BitXor,
            BitAnd => Precedence::BitAnd,
            LShift | RShift => Precedence::Shift,
            Add | Sub => Precedence::Additive,
            Mul | Div | FloorDiv | Mod => Precedence::Multiplicative,
            Pow => Precedence::Power,
        }
    }

    pub(crate) fn of_unary(op: UnaryOperator) -> Precedence {
        match op {
            UnaryOperator::LogicalNot => Precedence::Not,
            _ => Precedence::Unary,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ExpressionKind {
    Identifier,
    /// Numeric literal; needs parentheses before `.`
    Number,
    Literal,
    Compound,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Expression {
    pub text: String,
    pub precedence: Precedence,
    pub kind: ExpressionKind,
    /// Evaluating it may have side effects, so it must be evaluated
    /// exactly once and in program order
    pub effectful: bool,
}

impl Expression {
    pub(crate) fn identifier(name: impl Into<String>) -> Self {
        Self {
            text: name.into(),
            precedence: Precedence::Atom,
            kind: ExpressionKind::Identifier,
            effectful: false,
        }
    }

    pub(crate) fn pure(text: impl Into<String>, precedence: Precedence) -> Self {
        Self {
            text: text.into(),
            precedence,
            kind: ExpressionKind::Literal,
            effectful: false,
        }
    }

    pub(crate) fn effectful(text: impl Into<String>, precedence: Precedence) -> Self {
        Self {
            text: text.into(),
            precedence,
            kind: ExpressionKind::Compound,
            effectful: true,
        }
    }

    pub(crate) fn is_identifier(&self) -> bool {
        self.kind == ExpressionKind::Identifier
    }

    /// Text for an operand position that binds at least as tightly as `min`
    pub(crate) fn operand(&self, min: Precedence) -> String {
        if self.precedence >= min {
            self.text.clone()
        } else {
            format!("({})", self.text)
        }
    }

    /// Text for an operand position that binds strictly tighter than `than`
    pub(crate) fn operand_above(&self, than: Precedence) -> String {
        if self.precedence > than {
            self.text.clone()
        } else {
            format!("({})", self.text)
        }
    }

    /// Text for the subject of an attribute access, subscript or call
    pub(crate) fn subject(&self) -> String {
        if self.kind == ExpressionKind::Number || self.precedence < Precedence::Primary {
            format!("({})", self.text)
        } else {
            self.text.clone()
        }
    }
}

pub(crate) fn int_literal(value: i64) -> Expression {
    let precedence = if value < 0 {
        Precedence::Unary
    } else {
        Precedence::Atom
    };
    Expression {
        text: value.to_string(),
        precedence,
        kind: ExpressionKind::Number,
        effectful: false,
    }
}

pub(crate) fn float_literal(value: f64) -> Expression {
    if value.is_nan() {
        return Expression::pure("float('nan')", Precedence::Primary);
    }
    if value.is_infinite() {
        return if value > 0.0 {
            Expression::pure("float('inf')", Precedence::Primary)
        } else {
            Expression::pure("-float('inf')", Precedence::Unary)
        };
    }
    let precedence = if value.is_sign_negative() {
        Precedence::Unary
    } else {
        Precedence::Atom
    };
    Expression {
        text: format!("{:?}", value),
        precedence,
        kind: ExpressionKind::Number,
        effectful: false,
    }
}

pub(crate) fn string_literal(value: &str) -> Expression {
    Expression::pure(quote(value), Precedence::Atom)
}

/// Double-quoted Python string literal
pub(crate) fn quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 || c as u32 == 0x7f => {
                out.push_str(&format!("\\x{:02x}", c as u32))
            }
            c if c.is_ascii() => out.push(c),
            c if (c as u32) <= 0xffff => out.push_str(&format!("\\u{:04x}", c as u32)),
            c => out.push_str(&format!("\\U{:08x}", c as u32)),
        }
    }
    out.push('"');
    out
}

const KEYWORDS: [&str; 35] = [
    "False", "None", "True", "and", "as", "assert", "async", "await", "break", "class",
    "continue", "def", "del", "elif", "else", "except", "finally", "for", "from", "global",
    "if", "import", "in", "is", "lambda", "nonlocal", "not", "or", "pass", "raise", "return",
    "try", "while", "with", "yield",
];

/// Whether `name` can appear after a `.` in Python source
pub(crate) fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    let valid_start = matches!(chars.next(), Some(c) if c == '_' || c.is_ascii_alphabetic());
    valid_start
        && chars.all(|c| c == '_' || c.is_ascii_alphanumeric())
        && !KEYWORDS.contains(&name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_float_specials() {
        assert_eq!(float_literal(f64::NAN).text, "float('nan')");
        assert_eq!(float_literal(f64::INFINITY).text, "float('inf')");
        let neg = float_literal(f64::NEG_INFINITY);
        assert_eq!(neg.text, "-float('inf')");
        assert_eq!(neg.precedence, Precedence::Unary);
        assert_eq!(float_literal(-0.0).text, "-0.0");
        assert_eq!(float_literal(1.5).text, "1.5");
        assert_eq!(float_literal(1e300).text, "1e300");
    }

    #[test]
    fn test_number_subject_is_parenthesized() {
        assert_eq!(int_literal(5).subject(), "(5)");
        assert_eq!(int_literal(-5).subject(), "(-5)");
        assert_eq!(Expression::identifier("v0").subject(), "v0");
    }

    #[test]
    fn test_quote_escapes() {
        assert_eq!(quote("a\"b\\c\n"), r#""a\"b\\c\n""#);
        assert_eq!(quote("\u{1}"), r#""\x01""#);
        assert_eq!(quote("é"), r#""\u00e9""#);
        assert_eq!(quote("😀"), r#""\U0001f600""#);
    }

    #[test]
    fn test_is_identifier() {
        assert!(is_identifier("append"));
        assert!(is_identifier("__init__"));
        assert!(!is_identifier("1x"));
        assert!(!is_identifier("a-b"));
        assert!(!is_identifier("class"));
        assert!(!is_identifier(""));
    }

    #[test]
    fn test_operand_parenthesization() {
        let sum = Expression::effectful("a + b", Precedence::Additive);
        assert_eq!(sum.operand(Precedence::Multiplicative), "(a + b)");
        assert_eq!(sum.operand(Precedence::Additive), "a + b");
        assert_eq!(sum.operand_above(Precedence::Additive), "(a + b)");
    }
}
