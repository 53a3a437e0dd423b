//! Intermediate representation for fuzzed Python programs.
//!
//! Programs are sequences of instructions over a closed catalog of
//! operations. The IR is designed to be:
//! - Structurally valid by construction: blocks nest, variables are scoped
//!   and operations only appear in contexts where they are legal
//! - Mutation-friendly: instructions can be copied between programs with
//!   their variables renamed
//! - Liftable: deterministic translation to Python source

pub mod analysis;
pub mod builder;
pub mod code;
pub mod context;
pub mod instruction;
pub mod lifter;
pub mod operation;
pub mod program;
pub mod variable;

pub use analysis::VariableAnalyzer;
pub use builder::ProgramBuilder;
pub use code::{BlockGroup, Code};
pub use context::{Context, ContextMode};
pub use instruction::Instruction;
pub use lifter::{LiftingOptions, PythonLifter};
pub use operation::{Attributes, BinaryOperator, Comparator, Descriptor, Operation, UnaryOperator};
pub use program::{Comments, Program};
pub use variable::Variable;
