//! Extraction of the per-device (i.e., sharded) argument and result shapes of HLO programs.

use tracing::{debug, trace};

use crate::errors::Error;
use crate::options::{AnalysisOptions, DuplicateParameterPolicy};
use crate::programs::Program;
use crate::resolver::resolve_instruction_sharded_shape;
use crate::shapes::Shape;
use crate::sharding::Tiling;

/// Per-device shapes of the arguments and of the result of a [`Program`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShardedProgramShapes {
    /// Sharded shape of each parameter, indexed by parameter number.
    pub argument_shapes: Vec<Shape>,
    pub result_shape: Shape,
}

/// Computes the per-device argument and result shapes of `program` by resolving the sharding annotations of the
/// parameter and root instructions of its entry computation, using the [`TileShaper`](crate::sharding::TileShaper)
/// configured by `options`.
pub fn compute_sharded_program_shapes(
    program: &Program,
    options: &AnalysisOptions,
) -> Result<ShardedProgramShapes, Error> {
    compute_sharded_program_shapes_with_tiling(program, &options.tiler(), options.duplicate_parameter_policy)
}

/// Same as [`compute_sharded_program_shapes`], but using a custom [`Tiling`].
///
/// The number of parameters is taken from the program signature. Every parameter number in `0..parameter_count`
/// must be covered by a parameter instruction of the entry computation, and exactly one instruction of the entry
/// computation must have the root ID. Parameter instructions that share a parameter number are handled according to
/// `duplicate_parameter_policy`.
pub fn compute_sharded_program_shapes_with_tiling<T: Tiling + ?Sized>(
    program: &Program,
    tiling: &T,
    duplicate_parameter_policy: DuplicateParameterPolicy,
) -> Result<ShardedProgramShapes, Error> {
    let program_shape = program.program_shape().ok_or(Error::MissingProgramShape)?;
    let parameter_count = program_shape.parameter_count();
    debug!(program = program.name(), parameter_count, "computing sharded program shapes");

    let mut argument_shapes = vec![None; parameter_count];
    let mut result_shape = None;
    for computation in program.entry_computations() {
        for instruction in computation.instructions() {
            if let Some(parameter_number) = instruction.parameter_number() {
                let slot = usize::try_from(parameter_number)
                    .ok()
                    .filter(|&slot| slot < parameter_count)
                    .ok_or(Error::InvalidParameterIndex { parameter_number, parameter_count })?;
                if argument_shapes[slot].is_some() {
                    match duplicate_parameter_policy {
                        DuplicateParameterPolicy::Overwrite => {
                            trace!(parameter_number, "overwriting shape of duplicate parameter");
                        }
                        DuplicateParameterPolicy::Reject => {
                            return Err(Error::DuplicateParameterIndex { parameter_number: slot });
                        }
                    }
                }
                argument_shapes[slot] = Some(resolve_instruction_sharded_shape(instruction, tiling)?);
            }
            if instruction.id() == computation.root_id() {
                if result_shape.is_some() {
                    return Err(Error::MultipleRoots { root_id: computation.root_id() });
                }
                result_shape = Some(resolve_instruction_sharded_shape(instruction, tiling)?);
            }
        }
    }

    let argument_shapes = argument_shapes
        .into_iter()
        .enumerate()
        .map(|(parameter_number, shape)| shape.ok_or(Error::MissingParameter { parameter_number }))
        .collect::<Result<Vec<_>, _>>()?;
    let result_shape = result_shape.ok_or(Error::MissingRoot)?;
    debug!(program = program.name(), result_shape = %result_shape, "computed sharded program shapes");
    Ok(ShardedProgramShapes { argument_shapes, result_shape })
}
