//! Program mutators.

pub mod operation;
pub mod reflection;

pub use operation::OperationMutator;
pub use reflection::ReflectionMutator;

use crate::context::FuzzerContext;
use refuzz_ir::Program;

/// Something that derives a new program from an existing one.
///
/// Returning `None` means the mutator declined, for example because the
/// program offered nothing it could work with. The engine then reports
/// [`Mutator::failed_to_generate`] and moves on.
pub trait Mutator: Send {
    fn name(&self) -> &'static str;

    fn mutate(&mut self, program: &Program, ctx: &mut FuzzerContext) -> Option<Program>;

    /// The last mutation changed the program size by `delta` instructions
    fn added_instructions(&mut self, _delta: i64) {}

    /// The last mutation produced no program
    fn failed_to_generate(&mut self) {}
}
