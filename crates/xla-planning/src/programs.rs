//! Read-only view of HLO programs: the instructions, computations, signatures, and alias configurations that the
//! analyses in this crate walk over. Programs are typically obtained by decoding a serialized `HloModuleProto` using
//! [`Program::decode`], which is the form in which compiled programs are exchanged with PJRT plugins.

use std::fmt::{Display, Formatter};

use prost::Message;

use xla_protos::{HloComputation, HloInstruction, HloModule};

use crate::aliasing::InputOutputAliasConfig;
use crate::errors::Error;
use crate::sharding::Sharding;
use crate::shapes::{Shape, join};

// ---------------------------------------------------------------------------
// Instructions
// ---------------------------------------------------------------------------

/// Opcode of an HLO [`Instruction`]. Only the opcodes that the analyses in this crate care about get their own
/// variant; all other opcodes are kept by name.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Opcode {
    Parameter,
    Tuple,
    GetTupleElement,
    Constant,
    Other(String),
}

impl Opcode {
    /// Returns the XLA name of this opcode (e.g., `"get-tuple-element"`).
    pub fn name(&self) -> &str {
        match self {
            Self::Parameter => "parameter",
            Self::Tuple => "tuple",
            Self::GetTupleElement => "get-tuple-element",
            Self::Constant => "constant",
            Self::Other(name) => name.as_str(),
        }
    }
}

impl From<&str> for Opcode {
    fn from(name: &str) -> Self {
        match name {
            "parameter" => Self::Parameter,
            "tuple" => Self::Tuple,
            "get-tuple-element" => Self::GetTupleElement,
            "constant" => Self::Constant,
            name => Self::Other(name.to_string()),
        }
    }
}

impl Display for Opcode {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        write!(formatter, "{}", self.name())
    }
}

/// Node of an HLO [`Computation`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Instruction {
    id: i64,
    name: String,
    opcode: Opcode,
    shape: Shape,
    sharding: Option<Result<Sharding, Error>>,
    parameter_number: Option<i64>,
    operand_ids: Vec<i64>,
}

impl Instruction {
    /// Creates a new [`Instruction`]. Parameter instructions created this way have parameter number `0`, like in XLA
    /// protos where the parameter number is left unset; use [`Instruction::parameter`] to pick a different one.
    pub fn new<N: Into<String>>(id: i64, name: N, opcode: Opcode, shape: Shape) -> Self {
        let parameter_number = (opcode == Opcode::Parameter).then_some(0);
        Self { id, name: name.into(), opcode, shape, sharding: None, parameter_number, operand_ids: Vec::new() }
    }

    /// Creates a new [`Opcode::Parameter`] instruction named `parameter.{parameter_number}`.
    pub fn parameter(id: i64, parameter_number: i64, shape: Shape) -> Self {
        Self {
            parameter_number: Some(parameter_number),
            ..Self::new(id, format!("parameter.{parameter_number}"), Opcode::Parameter, shape)
        }
    }

    pub fn with_sharding(mut self, sharding: Sharding) -> Self {
        self.sharding = Some(Ok(sharding));
        self
    }

    pub fn with_operands(mut self, operand_ids: Vec<i64>) -> Self {
        self.operand_ids = operand_ids;
        self
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    pub fn opcode(&self) -> &Opcode {
        &self.opcode
    }

    /// Unsharded (i.e., global) shape of the value that this instruction produces.
    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    /// Sharding annotation of this instruction, if it has one. Annotations decoded from protos are only validated
    /// when they are read, and so this returns an error for malformed or unsupported annotations.
    pub fn sharding(&self) -> Result<Option<&Sharding>, Error> {
        match &self.sharding {
            Some(Ok(sharding)) => Ok(Some(sharding)),
            Some(Err(error)) => Err(error.clone()),
            None => Ok(None),
        }
    }

    /// Parameter number of this instruction, if it is an [`Opcode::Parameter`] instruction.
    pub fn parameter_number(&self) -> Option<i64> {
        self.parameter_number
    }

    pub fn operand_ids(&self) -> &[i64] {
        self.operand_ids.as_slice()
    }

    pub fn is_parameter(&self) -> bool {
        self.opcode == Opcode::Parameter
    }
}

impl Display for Instruction {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        write!(formatter, "%{} = {} {}(", self.name, self.shape, self.opcode)?;
        match self.parameter_number {
            Some(parameter_number) => write!(formatter, "{parameter_number}")?,
            None => write!(formatter, "{}", join(&self.operand_ids, ", "))?,
        }
        write!(formatter, ")")?;
        match &self.sharding {
            Some(Ok(sharding)) => write!(formatter, ", sharding={sharding}")?,
            Some(Err(_)) => write!(formatter, ", sharding=<invalid>")?,
            None => {}
        }
        Ok(())
    }
}

impl TryFrom<&HloInstruction> for Instruction {
    type Error = Error;

    fn try_from(proto: &HloInstruction) -> Result<Self, Self::Error> {
        let shape = proto.shape.as_ref().ok_or_else(|| {
            Error::malformed_proto("hlo instruction", format!("instruction '{}' has no shape", proto.name))
        })?;
        let opcode = Opcode::from(proto.opcode.as_str());
        let parameter_number = (opcode == Opcode::Parameter).then_some(proto.parameter_number);
        Ok(Self {
            id: proto.id,
            name: proto.name.clone(),
            opcode,
            shape: Shape::try_from(shape)?,
            sharding: proto.sharding.as_ref().map(Sharding::try_from),
            parameter_number,
            operand_ids: proto.operand_ids.clone(),
        })
    }
}

// ---------------------------------------------------------------------------
// Computations
// ---------------------------------------------------------------------------

/// HLO computation, which is a graph of [`Instruction`]s with a designated root instruction that produces its result.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Computation {
    id: i64,
    name: String,
    instructions: Vec<Instruction>,
    root_id: i64,
}

impl Computation {
    pub fn new<N: Into<String>>(id: i64, name: N, instructions: Vec<Instruction>, root_id: i64) -> Self {
        Self { id, name: name.into(), instructions, root_id }
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    pub fn instructions(&self) -> &[Instruction] {
        self.instructions.as_slice()
    }

    /// ID of the instruction that produces the result of this computation.
    pub fn root_id(&self) -> i64 {
        self.root_id
    }

    pub fn instruction(&self, id: i64) -> Option<&Instruction> {
        self.instructions.iter().find(|instruction| instruction.id == id)
    }

    /// Returns the root instruction of this computation. If more than one instruction has the root ID (which makes
    /// the computation malformed), the first one is returned.
    pub fn root_instruction(&self) -> Option<&Instruction> {
        self.instruction(self.root_id)
    }

    pub fn parameter_instructions(&self) -> impl Iterator<Item = &Instruction> + '_ {
        self.instructions.iter().filter(|instruction| instruction.is_parameter())
    }

    /// Number of [`Opcode::Parameter`] instructions in this computation.
    pub fn parameter_count(&self) -> usize {
        self.parameter_instructions().count()
    }

    /// Returns the parameter instruction with the provided parameter number, if there is one.
    pub fn parameter_instruction(&self, parameter_number: usize) -> Option<&Instruction> {
        let parameter_number = i64::try_from(parameter_number).ok()?;
        self.parameter_instructions().find(|instruction| instruction.parameter_number == Some(parameter_number))
    }
}

impl TryFrom<&HloComputation> for Computation {
    type Error = Error;

    fn try_from(proto: &HloComputation) -> Result<Self, Self::Error> {
        let instructions = proto.instructions.iter().map(Instruction::try_from).collect::<Result<Vec<_>, _>>()?;
        Ok(Self { id: proto.id, name: proto.name.clone(), instructions, root_id: proto.root_id })
    }
}

// ---------------------------------------------------------------------------
// Programs
// ---------------------------------------------------------------------------

/// Signature of a [`Program`]: the (unsharded) shapes of its parameters and of its result.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProgramShape {
    parameters: Vec<Shape>,
    parameter_names: Vec<String>,
    result: Shape,
}

impl ProgramShape {
    pub fn new(parameters: Vec<Shape>, result: Shape) -> Self {
        Self { parameters, parameter_names: Vec::new(), result }
    }

    /// Returns a copy of this program shape with the provided parameter names. Names are optional, but when present
    /// there must be one per parameter.
    pub fn with_parameter_names(mut self, parameter_names: Vec<String>) -> Self {
        self.parameter_names = parameter_names;
        self
    }

    pub fn parameters(&self) -> &[Shape] {
        self.parameters.as_slice()
    }

    pub fn parameter_count(&self) -> usize {
        self.parameters.len()
    }

    pub fn parameter_names(&self) -> &[String] {
        self.parameter_names.as_slice()
    }

    pub fn result(&self) -> &Shape {
        &self.result
    }
}

impl Display for ProgramShape {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        write!(formatter, "(")?;
        for (index, parameter) in self.parameters.iter().enumerate() {
            if index > 0 {
                write!(formatter, ", ")?;
            }
            match self.parameter_names.get(index) {
                Some(name) => write!(formatter, "{name}: {parameter}")?,
                None => write!(formatter, "{parameter}")?,
            }
        }
        write!(formatter, ") -> {}", self.result)
    }
}

impl TryFrom<&xla_protos::ProgramShape> for ProgramShape {
    type Error = Error;

    fn try_from(proto: &xla_protos::ProgramShape) -> Result<Self, Self::Error> {
        let result = proto
            .result
            .as_ref()
            .ok_or_else(|| Error::malformed_proto("program shape", "missing result shape"))?;
        if !proto.parameter_names.is_empty() && proto.parameter_names.len() != proto.parameters.len() {
            return Err(Error::malformed_proto(
                "program shape",
                format!(
                    "got {} parameter name(s) for {} parameter(s)",
                    proto.parameter_names.len(),
                    proto.parameters.len(),
                ),
            ));
        }
        Ok(Self {
            parameters: proto.parameters.iter().map(Shape::try_from).collect::<Result<Vec<_>, _>>()?,
            parameter_names: proto.parameter_names.clone(),
            result: Shape::try_from(result)?,
        })
    }
}

/// HLO program (i.e., module), consisting of a set of [`Computation`]s one of which is the entry computation, an
/// optional [`ProgramShape`] (i.e., signature), and an [`InputOutputAliasConfig`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Program {
    name: String,
    entry_computation_id: i64,
    computations: Vec<Computation>,
    program_shape: Option<ProgramShape>,
    alias_config: InputOutputAliasConfig,
}

impl Program {
    pub fn new<N: Into<String>>(name: N, entry_computation_id: i64, computations: Vec<Computation>) -> Self {
        Self {
            name: name.into(),
            entry_computation_id,
            computations,
            program_shape: None,
            alias_config: InputOutputAliasConfig::default(),
        }
    }

    pub fn with_program_shape(mut self, program_shape: ProgramShape) -> Self {
        self.program_shape = Some(program_shape);
        self
    }

    pub fn with_alias_config(mut self, alias_config: InputOutputAliasConfig) -> Self {
        self.alias_config = alias_config;
        self
    }

    /// Decodes a serialized `HloModuleProto`.
    pub fn decode(bytes: &[u8]) -> Result<Self, Error> {
        let module = HloModule::decode(bytes).map_err(|error| Error::malformed_proto("hlo module", error.to_string()))?;
        Self::try_from(&module)
    }

    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    pub fn entry_computation_id(&self) -> i64 {
        self.entry_computation_id
    }

    /// Computations of this program. Programs obtained from protos only contain their entry computation(s), since
    /// nothing in this crate reads the rest of the module.
    pub fn computations(&self) -> &[Computation] {
        self.computations.as_slice()
    }

    /// Returns the entry computation of this program, if it exists.
    pub fn entry_computation(&self) -> Option<&Computation> {
        self.entry_computations().next()
    }

    /// Returns all computations whose ID matches the entry computation ID. Well-formed programs have exactly one.
    pub fn entry_computations(&self) -> impl Iterator<Item = &Computation> + '_ {
        self.computations.iter().filter(|computation| computation.id == self.entry_computation_id)
    }

    pub fn program_shape(&self) -> Option<&ProgramShape> {
        self.program_shape.as_ref()
    }

    pub fn alias_config(&self) -> &InputOutputAliasConfig {
        &self.alias_config
    }
}

impl TryFrom<&HloModule> for Program {
    type Error = Error;

    fn try_from(proto: &HloModule) -> Result<Self, Self::Error> {
        Ok(Self {
            name: proto.name.clone(),
            entry_computation_id: proto.entry_computation_id,
            computations: proto
                .computations
                .iter()
                .filter(|computation| computation.id == proto.entry_computation_id)
                .map(Computation::try_from)
                .collect::<Result<Vec<_>, _>>()?,
            program_shape: proto.host_program_shape.as_ref().map(ProgramShape::try_from).transpose()?,
            alias_config: proto
                .input_output_alias
                .as_ref()
                .map(InputOutputAliasConfig::try_from)
                .transpose()?
                .unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use xla_protos::{OpSharding, OpShardingType, PrimitiveType};

    use crate::shapes::ElementType;

    use super::*;

    fn f32_proto(dimensions: Vec<i64>) -> xla_protos::Shape {
        xla_protos::Shape {
            element_type: PrimitiveType::F32 as i32,
            is_dynamic_dimension: vec![false; dimensions.len()],
            dimensions,
            ..Default::default()
        }
    }

    #[test]
    fn test_opcode_names() {
        for name in ["parameter", "tuple", "get-tuple-element", "constant", "add"] {
            assert_eq!(Opcode::from(name).name(), name);
        }
        assert_eq!(Opcode::from("get-tuple-element"), Opcode::GetTupleElement);
        assert_eq!(Opcode::from("dot"), Opcode::Other("dot".to_string()));
        assert_eq!(Opcode::Tuple.to_string(), "tuple");
    }

    #[test]
    fn test_instruction_display() {
        let parameter = Instruction::parameter(1, 0, Shape::array(ElementType::F32, vec![8]))
            .with_sharding(Sharding::replicated());
        assert_eq!(parameter.to_string(), "%parameter.0 = f32[8] parameter(0), sharding={replicated}");

        let add = Instruction::new(3, "add.3", Opcode::from("add"), Shape::array(ElementType::F32, vec![8]))
            .with_operands(vec![1, 2]);
        assert_eq!(add.to_string(), "%add.3 = f32[8] add(1, 2)");
    }

    #[test]
    fn test_computation_accessors() {
        let shape = Shape::array(ElementType::S32, vec![2]);
        let computation = Computation::new(
            7,
            "main",
            vec![
                Instruction::parameter(1, 1, shape.clone()),
                Instruction::parameter(2, 0, shape.clone()),
                Instruction::new(3, "tuple.3", Opcode::Tuple, Shape::tuple(vec![shape.clone(), shape.clone()]))
                    .with_operands(vec![2, 1]),
            ],
            3,
        );
        assert_eq!(computation.parameter_count(), 2);
        assert_eq!(computation.parameter_instruction(0).map(Instruction::id), Some(2));
        assert_eq!(computation.parameter_instruction(1).map(Instruction::id), Some(1));
        assert!(computation.parameter_instruction(2).is_none());
        assert_eq!(computation.root_instruction().map(Instruction::name), Some("tuple.3"));
        assert_eq!(computation.instruction(3).map(|instruction| instruction.operand_ids()), Some(&[2, 1][..]));
    }

    #[test]
    fn test_program_from_proto() {
        let module = HloModule {
            name: "jit_f".to_string(),
            entry_computation_id: 2,
            computations: vec![
                HloComputation { name: "helper".to_string(), id: 1, root_id: 0, ..Default::default() },
                HloComputation {
                    name: "main".to_string(),
                    id: 2,
                    root_id: 5,
                    instructions: vec![
                        HloInstruction {
                            name: "p0".to_string(),
                            opcode: "parameter".to_string(),
                            shape: Some(f32_proto(vec![8, 4])),
                            parameter_number: 0,
                            id: 4,
                            sharding: Some(OpSharding {
                                r#type: OpShardingType::Other as i32,
                                tile_assignment_dimensions: vec![2, 1],
                                tile_assignment_devices: vec![0, 1],
                                ..Default::default()
                            }),
                            ..Default::default()
                        },
                        HloInstruction {
                            name: "negate".to_string(),
                            opcode: "negate".to_string(),
                            shape: Some(f32_proto(vec![8, 4])),
                            parameter_number: 3,
                            id: 5,
                            operand_ids: vec![4],
                            ..Default::default()
                        },
                    ],
                    ..Default::default()
                },
            ],
            host_program_shape: Some(xla_protos::ProgramShape {
                parameters: vec![f32_proto(vec![8, 4])],
                result: Some(f32_proto(vec![8, 4])),
                parameter_names: vec!["x".to_string()],
            }),
            ..Default::default()
        };

        let program = Program::try_from(&module).unwrap();
        assert_eq!(program.name(), "jit_f");
        assert!(program.alias_config().is_empty());
        assert_eq!(program.program_shape().unwrap().to_string(), "(x: f32[8,4]) -> f32[8,4]");

        let entry = program.entry_computation().unwrap();
        assert_eq!(entry.name(), "main");
        assert_eq!(entry.parameter_count(), 1);
        let sharding = entry.parameter_instruction(0).unwrap().sharding().unwrap();
        assert_eq!(sharding.map(ToString::to_string), Some("{devices=[2,1]0,1}".to_string()));

        // Parameter numbers of non-parameter instructions are ignored.
        assert_eq!(entry.root_instruction().unwrap().parameter_number(), None);

        assert_eq!(program.computations().len(), 1);

        let decoded = Program::decode(module.encode_to_vec().as_slice()).unwrap();
        assert_eq!(decoded, program);
    }

    #[test]
    fn test_program_from_proto_skips_unread_parts() {
        let named_sharding = OpSharding { named_sharding: Some(Default::default()), ..Default::default() };
        let buffer = xla_protos::Shape { element_type: PrimitiveType::Buffer as i32, ..Default::default() };
        let module = HloModule {
            entry_computation_id: 2,
            computations: vec![
                HloComputation {
                    name: "helper".to_string(),
                    id: 1,
                    instructions: vec![HloInstruction {
                        name: "buffer".to_string(),
                        opcode: "custom-call".to_string(),
                        shape: Some(buffer),
                        sharding: Some(named_sharding.clone()),
                        ..Default::default()
                    }],
                    ..Default::default()
                },
                HloComputation {
                    name: "main".to_string(),
                    id: 2,
                    root_id: 1,
                    instructions: vec![HloInstruction {
                        name: "p0".to_string(),
                        opcode: "parameter".to_string(),
                        id: 1,
                        shape: Some(f32_proto(vec![8])),
                        sharding: Some(named_sharding),
                        ..Default::default()
                    }],
                    ..Default::default()
                },
            ],
            ..Default::default()
        };

        let program = Program::try_from(&module).unwrap();
        assert_eq!(program.computations().len(), 1);
        let parameter = program.entry_computation().unwrap().parameter_instruction(0).unwrap();
        assert!(matches!(parameter.sharding(), Err(Error::UnsupportedSharding { .. })));
        assert_eq!(parameter.to_string(), "%p0 = f32[8] parameter(0), sharding=<invalid>");
    }

    #[test]
    fn test_program_from_malformed_proto() {
        let module = HloModule {
            computations: vec![HloComputation {
                instructions: vec![HloInstruction { name: "p0".to_string(), ..Default::default() }],
                ..Default::default()
            }],
            ..Default::default()
        };
        assert!(matches!(
            Program::try_from(&module),
            Err(Error::MalformedProto { proto: "hlo instruction", message }) if message.contains("p0"),
        ));

        let module = HloModule {
            host_program_shape: Some(xla_protos::ProgramShape {
                parameters: vec![f32_proto(vec![2])],
                result: Some(f32_proto(vec![2])),
                parameter_names: vec!["x".to_string(), "y".to_string()],
            }),
            ..Default::default()
        };
        assert!(matches!(Program::try_from(&module), Err(Error::MalformedProto { proto: "program shape", .. })));

        assert!(matches!(Program::decode(&[0xff, 0xff, 0xff]), Err(Error::MalformedProto { proto: "hlo module", .. })));
    }
}
