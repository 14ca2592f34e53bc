//! Input/output aliasing configuration of HLO programs. An alias declares that (a sub-value of) the program output
//! lives in the same buffer as (a sub-value of) one of its parameters. This mirrors XLA's `HloInputOutputAliasConfig`.

use std::fmt::{Display, Formatter};

use xla_protos::{HloInputOutputAlias, HloInputOutputAliasEntry};

use crate::errors::Error;
use crate::shapes::ShapeIndex;

/// Kind of an input/output [`Alias`].
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum AliasKind {
    /// The output may alias the parameter if its buffer is donated at runtime.
    #[default]
    MayAlias,

    /// The output must alias the parameter, meaning that its buffer has to be donated.
    MustAlias,
}

impl Display for AliasKind {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MayAlias => write!(formatter, "may-alias"),
            Self::MustAlias => write!(formatter, "must-alias"),
        }
    }
}

/// Parameter (sub-)value that an output is aliased with.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Alias {
    pub parameter_number: i64,

    /// Path into the parameter's shape. An empty index refers to the whole parameter.
    pub parameter_index: ShapeIndex,

    pub kind: AliasKind,
}

impl Alias {
    pub fn new(parameter_number: i64, parameter_index: ShapeIndex, kind: AliasKind) -> Self {
        Self { parameter_number, parameter_index, kind }
    }

    pub fn must_alias(&self) -> bool {
        self.kind == AliasKind::MustAlias
    }
}

impl Display for Alias {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        write!(formatter, "({}, {}, {})", self.parameter_number, self.parameter_index, self.kind)
    }
}

/// Ordered input/output alias configuration of a program. Each output index is aliased with at most one parameter.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InputOutputAliasConfig {
    entries: Vec<(ShapeIndex, Alias)>,
}

impl InputOutputAliasConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares that the output value at `output_index` aliases the parameter value at `parameter_index` of
    /// parameter `parameter_number`. Returns [`Error::DuplicateOutputAlias`] if `output_index` already has an alias.
    pub fn set_up_alias(
        &mut self,
        output_index: ShapeIndex,
        parameter_number: i64,
        parameter_index: ShapeIndex,
        kind: AliasKind,
    ) -> Result<(), Error> {
        if self.output_has_alias(&output_index) {
            return Err(Error::DuplicateOutputAlias { output_index: output_index.to_string() });
        }
        self.entries.push((output_index, Alias::new(parameter_number, parameter_index, kind)));
        Ok(())
    }

    /// Returns an iterator over all `(output index, alias)` pairs, in the order in which they were declared.
    pub fn aliases(&self) -> impl Iterator<Item = (&ShapeIndex, &Alias)> + '_ {
        self.entries.iter().map(|(output_index, alias)| (output_index, alias))
    }

    pub fn output_has_alias(&self, output_index: &ShapeIndex) -> bool {
        self.aliased_parameter(output_index).is_some()
    }

    /// Returns the parameter value that the output value at `output_index` is aliased with, if any.
    pub fn aliased_parameter(&self, output_index: &ShapeIndex) -> Option<&Alias> {
        self.entries.iter().find(|(index, _)| index == output_index).map(|(_, alias)| alias)
    }

    /// Returns `true` if some output value is aliased with the parameter value at `parameter_index` of parameter
    /// `parameter_number`.
    pub fn parameter_has_alias(&self, parameter_number: i64, parameter_index: &ShapeIndex) -> bool {
        self.entries
            .iter()
            .any(|(_, alias)| alias.parameter_number == parameter_number && &alias.parameter_index == parameter_index)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Display for InputOutputAliasConfig {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        write!(formatter, "{{")?;
        for (position, (output_index, alias)) in self.entries.iter().enumerate() {
            if position > 0 {
                write!(formatter, ", ")?;
            }
            write!(formatter, "{output_index}: {alias}")?;
        }
        write!(formatter, "}}")
    }
}

impl TryFrom<&HloInputOutputAlias> for InputOutputAliasConfig {
    type Error = Error;

    fn try_from(proto: &HloInputOutputAlias) -> Result<Self, Self::Error> {
        let mut config = Self::new();
        for entry in &proto.entries {
            // Unset kinds are treated as may-alias, like XLA does.
            let kind = match xla_protos::AliasKind::try_from(entry.kind) {
                Ok(xla_protos::AliasKind::MustAlias) => AliasKind::MustAlias,
                Ok(_) => AliasKind::MayAlias,
                Err(_) => {
                    return Err(Error::malformed_proto(
                        "input/output alias",
                        format!("unknown alias kind {}", entry.kind),
                    ));
                }
            };
            config.set_up_alias(
                ShapeIndex::from(entry.output_shape_index.clone()),
                entry.parameter_number,
                ShapeIndex::from(entry.parameter_shape_index.clone()),
                kind,
            )?;
        }
        Ok(config)
    }
}

impl From<&InputOutputAliasConfig> for HloInputOutputAlias {
    fn from(config: &InputOutputAliasConfig) -> Self {
        let entries = config
            .aliases()
            .map(|(output_index, alias)| HloInputOutputAliasEntry {
                output_shape_index: output_index.as_slice().to_vec(),
                parameter_number: alias.parameter_number,
                parameter_shape_index: alias.parameter_index.as_slice().to_vec(),
                kind: match alias.kind {
                    AliasKind::MayAlias => xla_protos::AliasKind::MayAlias,
                    AliasKind::MustAlias => xla_protos::AliasKind::MustAlias,
                } as i32,
            })
            .collect();
        Self { entries }
    }
}
