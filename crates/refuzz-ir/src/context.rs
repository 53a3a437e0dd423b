//! Structural contexts gating where operations may appear.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{BitOr, BitOrAssign};

/// Set of structural capabilities active at a program position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Context(u8);

impl Context {
    pub const EMPTY: Context = Context(0);
    /// Ordinary statements are allowed
    pub const SCRIPT: Context = Context(1 << 0);
    /// Inside a function or method body
    pub const SUBROUTINE: Context = Context(1 << 1);
    /// Inside a class method body
    pub const METHOD: Context = Context(1 << 2);
    /// Inside a loop body
    pub const LOOP: Context = Context(1 << 3);
    /// Directly inside a class body
    pub const CLASS_DEFINITION: Context = Context(1 << 4);
    /// Directly inside a switch, between cases
    pub const SWITCH_BLOCK: Context = Context(1 << 5);
    /// Inside a switch case body
    pub const SWITCH_CASE: Context = Context(1 << 6);

    const NAMES: [(Context, &'static str); 7] = [
        (Context::SCRIPT, "script"),
        (Context::SUBROUTINE, "subroutine"),
        (Context::METHOD, "method"),
        (Context::LOOP, "loop"),
        (Context::CLASS_DEFINITION, "class-definition"),
        (Context::SWITCH_BLOCK, "switch-block"),
        (Context::SWITCH_CASE, "switch-case"),
    ];

    pub const fn union(self, other: Context) -> Context {
        Context(self.0 | other.0)
    }

    pub fn contains(&self, other: Context) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

impl BitOr for Context {
    type Output = Context;

    fn bitor(self, rhs: Context) -> Context {
        self.union(rhs)
    }
}

impl BitOrAssign for Context {
    fn bitor_assign(&mut self, rhs: Context) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<_> = Context::NAMES
            .iter()
            .filter(|(c, _)| self.contains(*c))
            .map(|(_, n)| *n)
            .collect();
        if names.is_empty() {
            write!(f, "empty")
        } else {
            write!(f, "{}", names.join("|"))
        }
    }
}

/// How the body of a block start derives its context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContextMode {
    /// Body sees only the contexts the block opens
    Isolate,
    /// Body keeps the enclosing context and adds the opened ones
    Propagate,
    /// Body restores the context that was active outside the enclosing
    /// block, plus the opened ones. Used for switch cases.
    Resume,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contains_and_union() {
        let ctx = Context::SCRIPT | Context::LOOP;
        assert!(ctx.contains(Context::SCRIPT));
        assert!(ctx.contains(Context::LOOP));
        assert!(!ctx.contains(Context::SUBROUTINE));
        assert!(ctx.contains(Context::EMPTY));
        assert!(!ctx.contains(Context::SCRIPT | Context::METHOD));
    }

    #[test]
    fn test_display() {
        assert_eq!((Context::SCRIPT | Context::LOOP).to_string(), "script|loop");
        assert_eq!(Context::EMPTY.to_string(), "empty");
    }
}
