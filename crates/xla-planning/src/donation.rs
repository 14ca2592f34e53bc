//! Computation of the parameters of HLO programs whose buffers must be donated to the program when it is executed,
//! so that its outputs can reuse them as required by its [`InputOutputAliasConfig`].

use std::collections::HashSet;

use tracing::{debug, trace};

use crate::aliasing::InputOutputAliasConfig;
use crate::errors::Error;
use crate::programs::{Computation, Program};
use crate::shapes::Shape;

/// Describes how the arguments of a program are passed to its entry computation.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ParameterPassing {
    /// Each argument is passed as a separate parameter.
    Flat { parameter_count: usize },

    /// All arguments are passed as the elements of a single tuple parameter.
    Tupled { element_count: usize },
}

impl ParameterPassing {
    /// Determines how arguments are passed to `computation`. When `tuple_inputs` is `true`, the computation must take
    /// exactly one parameter with a tuple shape; otherwise this returns an [`Error::PreconditionViolation`].
    pub fn for_entry_computation(computation: &Computation, tuple_inputs: bool) -> Result<Self, Error> {
        if !tuple_inputs {
            return Ok(Self::Flat { parameter_count: computation.parameter_count() });
        }
        let mut parameters = computation.parameter_instructions();
        match (parameters.next(), parameters.next()) {
            (Some(parameter), None) => match parameter.shape() {
                Shape::Tuple(elements) => Ok(Self::Tupled { element_count: elements.len() }),
                shape => Err(Error::precondition_violation(format!(
                    "computation '{}' takes tupled inputs, but its parameter has non-tuple shape '{shape}'",
                    computation.name(),
                ))),
            },
            _ => Err(Error::precondition_violation(format!(
                "computation '{}' takes tupled inputs, but has {} parameters instead of 1",
                computation.name(),
                computation.parameter_count(),
            ))),
        }
    }

    /// Number of arguments (i.e., of parameters or of tuple elements, depending on how they are passed).
    pub fn parameter_count(&self) -> usize {
        match self {
            Self::Flat { parameter_count } => *parameter_count,
            Self::Tupled { element_count } => *element_count,
        }
    }

    pub fn is_tupled(&self) -> bool {
        matches!(self, Self::Tupled { .. })
    }
}

/// Returns the arguments that are aliased with an output in `config`, and which must therefore be donated.
///
/// With [`ParameterPassing::Tupled`], every alias must refer to parameter `0` and the argument is the first component
/// of its parameter index (aliases of the whole tuple do not name an argument and are skipped). With
/// [`ParameterPassing::Flat`], the argument is the parameter number of the alias.
pub fn donated_parameters(config: &InputOutputAliasConfig, passing: ParameterPassing) -> Result<HashSet<usize>, Error> {
    let parameter_count = passing.parameter_count();
    let tuple_inputs = passing.is_tupled();
    let mut parameters = HashSet::new();
    for (output_index, alias) in config.aliases() {
        let parameter = if tuple_inputs {
            if alias.parameter_number != 0 {
                return Err(Error::UnexpectedParameterNumber { parameter_number: alias.parameter_number });
            }
            match alias.parameter_index.first() {
                Some(parameter) => parameter,
                None => continue,
            }
        } else {
            alias.parameter_number
        };
        let parameter = usize::try_from(parameter)
            .ok()
            .filter(|&parameter| parameter < parameter_count)
            .ok_or(Error::IndexOutOfRange { parameter, parameter_count, tuple_inputs })?;
        trace!(%output_index, parameter, "found donated parameter");
        parameters.insert(parameter);
    }
    Ok(parameters)
}

/// Returns the parameters of `program` that must be donated. If `tuple_inputs` is `true`, the program's entry
/// computation must take all of its arguments as a single tuple parameter and the returned indices refer to elements
/// of that tuple.
pub fn compute_donated_parameters(program: &Program, tuple_inputs: bool) -> Result<HashSet<usize>, Error> {
    let computation = program
        .entry_computation()
        .ok_or(Error::MissingEntryComputation { entry_computation_id: program.entry_computation_id() })?;
    let passing = ParameterPassing::for_entry_computation(computation, tuple_inputs)?;
    let alias_count = program.alias_config().len();
    debug!(program = program.name(), ?passing, alias_count, "computing donated parameters");
    let parameters = donated_parameters(program.alias_config(), passing)?;
    debug!(program = program.name(), donated_parameter_count = parameters.len(), "computed donated parameters");
    Ok(parameters)
}
