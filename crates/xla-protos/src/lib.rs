//! [Protobuf](https://protobuf.dev) message definitions for the subset of [XLA](https://github.com/openxla/xla) protos
//! that describe HLO modules: shapes, layouts, shardings, instructions, computations, modules, and input/output alias
//! configurations.
//!
//! The messages are hand-written [`prost`] definitions that use the same field tags as the upstream `.proto` files,
//! and so serialized XLA protos can be decoded directly using [`Message::decode`]. Fields that are not needed for
//! shape and aliasing analyses are omitted and are skipped when decoding.

use prost::{Enumeration, Message};

/// Represents the type of data that can be stored in XLA arrays. Specifically, this represents the type of individual
/// elements/values that can be held in rectangular multidimensional arrays.
///
/// This type corresponds to `PrimitiveType` in [XLA](https://github.com/openxla/xla).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Enumeration)]
#[repr(i32)]
pub enum PrimitiveType {
    /// Invalid [`PrimitiveType`] that serves as a default.
    Invalid = 0,

    /// [`PrimitiveType`] that represents token values that are threaded between side-effecting operations.
    Token = 17,

    /// Predicate [`PrimitiveType`] that represents the `true` and `false` values.
    Predicate = 1,

    /// [`PrimitiveType`] that represents signed 1-bit integer values.
    S1 = 30,

    /// [`PrimitiveType`] that represents signed 2-bit integer values.
    S2 = 26,

    /// [`PrimitiveType`] that represents signed 4-bit integer values.
    S4 = 21,

    /// [`PrimitiveType`] that represents signed 8-bit integer values.
    S8 = 2,

    /// [`PrimitiveType`] that represents signed 16-bit integer values.
    S16 = 3,

    /// [`PrimitiveType`] that represents signed 32-bit integer values.
    S32 = 4,

    /// [`PrimitiveType`] that represents signed 64-bit integer values.
    S64 = 5,

    /// [`PrimitiveType`] that represents unsigned 1-bit integer values.
    U1 = 31,

    /// [`PrimitiveType`] that represents unsigned 2-bit integer values.
    U2 = 27,

    /// [`PrimitiveType`] that represents unsigned 4-bit integer values.
    U4 = 22,

    /// [`PrimitiveType`] that represents unsigned 8-bit integer values.
    U8 = 6,

    /// [`PrimitiveType`] that represents unsigned 16-bit integer values.
    U16 = 7,

    /// [`PrimitiveType`] that represents unsigned 32-bit integer values.
    U32 = 8,

    /// [`PrimitiveType`] that represents unsigned 64-bit integer values.
    U64 = 9,

    /// [`PrimitiveType`] that represents 4-bit [microscaling](https://www.opencompute.org/documents/ocp-microscaling-formats-mx-v1-0-spec-final-pdf)
    /// floating-point values with 2 exponent bits and 1 mantissa bit.
    F4E2M1FN = 32,

    /// [`PrimitiveType`] that represents 8-bit floating-point values with 3 exponent bits and 4 mantissa bits.
    F8E3M4 = 29,

    /// [`PrimitiveType`] that represents 8-bit floating-point values with 4 exponent bits and 3 mantissa bits.
    F8E4M3 = 28,

    /// [`PrimitiveType`] that represents finite-only 8-bit floating-point values with 4 exponent bits and 3 mantissa
    /// bits.
    F8E4M3FN = 20,

    /// [`PrimitiveType`] that represents finite-only 8-bit floating-point values with 4 exponent bits, 3 mantissa bits,
    /// and an unsigned zero.
    F8E4M3FNUZ = 25,

    /// [`PrimitiveType`] that represents finite-only 8-bit floating-point values with 4 exponent bits, 3 mantissa bits,
    /// an unsigned zero, and an exponent bias of `11`.
    F8E4M3B11FNUZ = 23,

    /// [`PrimitiveType`] that represents 8-bit floating-point values with 5 exponent bits and 2 mantissa bits.
    F8E5M2 = 19,

    /// [`PrimitiveType`] that represents finite-only 8-bit floating-point values with 5 exponent bits, 2 mantissa bits,
    /// and an unsigned zero.
    F8E5M2FNUZ = 24,

    /// [`PrimitiveType`] that represents unsigned finite-only 8-bit floating-point values with 8 exponent bits.
    F8E8M0FNU = 33,

    /// [`PrimitiveType`] that represents 16-bit floating-point values with 8 exponent bits and 7 mantissa bits.
    BF16 = 16,

    /// [`PrimitiveType`] that represents IEEE 16-bit floating-point values.
    F16 = 10,

    /// [`PrimitiveType`] that represents IEEE 32-bit floating-point values.
    F32 = 11,

    /// [`PrimitiveType`] that represents IEEE 64-bit floating-point values.
    F64 = 12,

    /// [`PrimitiveType`] that represents 64-bit complex values as pairs of 32-bit floating-point values.
    C64 = 15,

    /// [`PrimitiveType`] that represents 128-bit complex values as pairs of 64-bit floating-point values.
    C128 = 18,

    /// [`PrimitiveType`] that represents heterogeneous sequences of values. [`Shape`]s that have this as their
    /// [`Shape::element_type`] have their element shapes specified in [`Shape::tuple_shapes`].
    Tuple = 13,

    /// [`PrimitiveType`] that represents opaque data which is used for passing context-specific data to custom
    /// operations.
    OpaqueType = 14,

    /// [`PrimitiveType`] that represents a buffer of values.
    Buffer = 34,
}

/// Shape of an array that describes the number of dimensions in the array, the size of each dimension,
/// and the type of the elements in the array.
///
/// Tuple shapes are represented as rank zero [`Shape`]s with [`PrimitiveType::Tuple`] as their element type and with
/// populated [`Shape::tuple_shapes`].
///
/// Refer to [the official XLA documentation](https://openxla.org/xla/shapes) for more information on shapes.
///
/// This type corresponds to `ShapeProto` in [XLA](https://github.com/openxla/xla).
#[derive(Clone, PartialEq, Message)]
pub struct Shape {
    /// [`PrimitiveType`] of the array elements.
    #[prost(enumeration = "PrimitiveType", tag = "2")]
    pub element_type: i32,

    /// Size (i.e., number of elements) for each dimension in this shape, or an upper bound on the size if the
    /// corresponding dimension is dynamically-sized. An empty vector indicates that this is the [`Shape`] of a scalar
    /// value. Each element in this list must be non-negative.
    #[prost(int64, repeated, tag = "3")]
    pub dimensions: Vec<i64>,

    /// Boolean value indicating whether each dimension of this [`Shape`] is dynamically-sized. This vector is either
    /// empty or has the same size as [`Shape::dimensions`].
    #[prost(bool, repeated, tag = "6")]
    pub is_dynamic_dimension: Vec<bool>,

    /// This is only used for [`Shape`]s of tuples and contains the [`Shape`] of each value in the tuple.
    #[prost(message, repeated, tag = "4")]
    pub tuple_shapes: Vec<Shape>,

    /// [`Layout`] that is used to back this shape and that represents how the values in the corresponding array
    /// are laid out in memory.
    #[prost(message, optional, boxed, tag = "5")]
    pub layout: Option<Box<Layout>>,
}

/// Tile used in a tiling-based [`Layout`]. For more information refer to
/// [this page](https://openxla.org/xla/tiled_layout).
///
/// This type corresponds to `TileProto` in [XLA](https://github.com/openxla/xla).
#[derive(Clone, PartialEq, Eq, Hash, Message)]
pub struct Tile {
    /// Number of elements in each dimension of the [`Tile`], ordered from the most major dimension of the tile to the
    /// most minor dimension of the tile.
    #[prost(int64, repeated, tag = "1")]
    pub dimensions: Vec<i64>,
}

/// Describes how an array is laid out in memory.
///
/// This type corresponds to `LayoutProto` in [XLA](https://github.com/openxla/xla).
#[derive(Clone, PartialEq, Message)]
pub struct Layout {
    /// Sequence of dimension numbers ordered from the most minor (i.e., the one with the fastest varying index) to the
    /// most major (i.e., the one with the slowest varying index).
    #[prost(int64, repeated, tag = "1")]
    pub minor_to_major: Vec<i64>,

    /// Sequence of [`Tile`]s that are used in this layout, with the outermost tiling being the first one.
    #[prost(message, repeated, tag = "6")]
    pub tiles: Vec<Tile>,

    /// Memory space in which the array resides. The integer value is interpreted in a backend-specific manner.
    #[prost(int64, optional, tag = "8")]
    pub memory_space: Option<i64>,
}

/// Shape of a program (i.e., of an HLO computation), consisting of its parameter shapes and its result shape.
///
/// This type corresponds to `ProgramShapeProto` in [XLA](https://github.com/openxla/xla).
#[derive(Clone, PartialEq, Message)]
pub struct ProgramShape {
    /// [`Shape`]s of the program parameters, ordered by parameter number.
    #[prost(message, repeated, tag = "1")]
    pub parameters: Vec<Shape>,

    /// [`Shape`] of the program result.
    #[prost(message, optional, tag = "2")]
    pub result: Option<Shape>,

    /// Names of the program parameters, parallel to [`ProgramShape::parameters`].
    #[prost(string, repeated, tag = "3")]
    pub parameter_names: Vec<String>,
}

/// Type of an [`OpSharding`].
///
/// This type corresponds to `OpSharding.Type` in [XLA](https://github.com/openxla/xla).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Enumeration)]
#[repr(i32)]
pub enum OpShardingType {
    /// Replicated across all devices.
    Replicated = 0,

    /// Maximal sharding (single device executes the operation).
    Maximal = 1,

    /// Tuple sharding where only [`OpSharding::tuple_shardings`] is meaningful.
    Tuple = 2,

    /// Tiled sharding described by tile shape and assignments.
    Other = 3,

    /// Manually sharded operation.
    Manual = 4,

    /// Placeholder sharding with lowest precedence.
    Unknown = 5,

    /// Unreduced sharding where outputs are not all-reduced.
    Unreduced = 6,
}

/// Describes how an operation is partitioned across devices.
///
/// This type corresponds to `OpSharding` in [XLA](https://github.com/openxla/xla).
#[derive(Clone, PartialEq, Message)]
pub struct OpSharding {
    /// Kind of sharding represented by this message.
    #[prost(enumeration = "OpShardingType", tag = "1")]
    pub r#type: i32,

    /// Shape of the tile-assignment tensor.
    #[prost(int64, repeated, tag = "3")]
    pub tile_assignment_dimensions: Vec<i64>,

    /// Flattened list of assigned device IDs.
    #[prost(int64, repeated, tag = "4")]
    pub tile_assignment_devices: Vec<i64>,

    /// Flattened tuple element shardings for tuple-shaped values.
    #[prost(message, repeated, tag = "5")]
    pub tuple_shardings: Vec<OpSharding>,

    /// If `true`, replicate across the final tile-assignment dimension.
    #[prost(bool, tag = "6")]
    pub replicate_on_last_tile_dim: bool,

    /// Sharding type for each trailing tile-assignment subgroup dimension.
    #[prost(enumeration = "OpShardingType", repeated, tag = "8")]
    pub last_tile_dims: Vec<i32>,

    /// Dimensions used to reshape iota-generated device IDs.
    #[prost(int64, repeated, tag = "9")]
    pub iota_reshape_dims: Vec<i64>,

    /// Permutation applied after reshaping iota-generated device IDs.
    #[prost(int32, repeated, tag = "10")]
    pub iota_transpose_perm: Vec<i32>,

    /// Optional named sharding representation. When populated, legacy fields are ignored.
    #[prost(message, optional, tag = "14")]
    pub named_sharding: Option<NamedSharding>,
}

/// Axis in a device [`Mesh`].
///
/// This type corresponds to `MeshProto.MeshAxis` in [XLA](https://github.com/openxla/xla).
#[derive(Clone, PartialEq, Eq, Hash, Message)]
pub struct MeshAxis {
    /// Axis name.
    #[prost(string, tag = "1")]
    pub name: String,

    /// Axis size.
    #[prost(int64, tag = "2")]
    pub size: i64,
}

/// Logical mesh used by named shardings.
///
/// This type corresponds to `MeshProto` in [XLA](https://github.com/openxla/xla).
#[derive(Clone, PartialEq, Message)]
pub struct Mesh {
    /// Mesh axes.
    #[prost(message, repeated, tag = "1")]
    pub axes: Vec<MeshAxis>,

    /// Optional explicit device ordering for the mesh.
    #[prost(int64, repeated, tag = "2")]
    pub device_ids: Vec<i64>,
}

/// Named sharding representation bound to a specific [`Mesh`]. Only the mesh is modeled here; the presence of this
/// message is what matters to readers of [`OpSharding`].
///
/// This type corresponds to `NamedShardingProto` in [XLA](https://github.com/openxla/xla).
#[derive(Clone, PartialEq, Message)]
pub struct NamedSharding {
    /// Mesh used by this named sharding.
    #[prost(message, optional, tag = "2")]
    pub mesh: Option<Mesh>,
}

/// Single HLO instruction.
///
/// This type corresponds to `HloInstructionProto` in [XLA](https://github.com/openxla/xla).
#[derive(Clone, PartialEq, Message)]
pub struct HloInstruction {
    /// Name of this instruction, unique within its module.
    #[prost(string, tag = "1")]
    pub name: String,

    /// Opcode name of this instruction (e.g., `"parameter"`, `"add"`, `"tuple"`).
    #[prost(string, tag = "2")]
    pub opcode: String,

    /// Unsharded [`Shape`] of the value produced by this instruction.
    #[prost(message, optional, tag = "3")]
    pub shape: Option<Shape>,

    /// Parameter number. Only meaningful for `"parameter"` instructions.
    #[prost(int64, tag = "9")]
    pub parameter_number: i64,

    /// Unique ID of this instruction within its module.
    #[prost(int64, tag = "35")]
    pub id: i64,

    /// IDs of the operands of this instruction.
    #[prost(int64, repeated, tag = "36")]
    pub operand_ids: Vec<i64>,

    /// Sharding annotation of this instruction, if any.
    #[prost(message, optional, tag = "40")]
    pub sharding: Option<OpSharding>,
}

/// HLO computation (i.e., a flat list of [`HloInstruction`]s with a designated root).
///
/// This type corresponds to `HloComputationProto` in [XLA](https://github.com/openxla/xla).
#[derive(Clone, PartialEq, Message)]
pub struct HloComputation {
    /// Name of this computation.
    #[prost(string, tag = "1")]
    pub name: String,

    /// Instructions of this computation, in post order.
    #[prost(message, repeated, tag = "2")]
    pub instructions: Vec<HloInstruction>,

    /// Unique ID of this computation within its module.
    #[prost(int64, tag = "5")]
    pub id: i64,

    /// ID of the root instruction of this computation.
    #[prost(int64, tag = "6")]
    pub root_id: i64,
}

/// Kind of an input/output alias.
///
/// This type corresponds to `Kind` in [XLA](https://github.com/openxla/xla).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Enumeration)]
#[repr(i32)]
pub enum AliasKind {
    /// Alias kind that has not been set.
    UndefinedAlias = 0,

    /// The output may or may not alias with the input depending on whether the input buffer is donated at runtime.
    MayAlias = 1,

    /// The output must alias with the input.
    MustAlias = 2,
}

/// Single entry of an [`HloInputOutputAlias`] configuration.
///
/// This type corresponds to `HloInputOutputAliasProto.AliasEntryProto` in [XLA](https://github.com/openxla/xla).
#[derive(Clone, PartialEq, Message)]
pub struct HloInputOutputAliasEntry {
    /// Shape index of the aliased output buffer.
    #[prost(int64, repeated, tag = "1")]
    pub output_shape_index: Vec<i64>,

    /// Number of the aliased parameter.
    #[prost(int64, tag = "2")]
    pub parameter_number: i64,

    /// Shape index of the aliased buffer within the parameter.
    #[prost(int64, repeated, tag = "3")]
    pub parameter_shape_index: Vec<i64>,

    /// [`AliasKind`] of this alias.
    #[prost(enumeration = "AliasKind", tag = "4")]
    pub kind: i32,
}

/// Input/output alias configuration of an [`HloModule`].
///
/// This type corresponds to `HloInputOutputAliasProto` in [XLA](https://github.com/openxla/xla).
#[derive(Clone, PartialEq, Message)]
pub struct HloInputOutputAlias {
    /// Alias entries, in the order in which they were declared.
    #[prost(message, repeated, tag = "1")]
    pub entries: Vec<HloInputOutputAliasEntry>,
}

/// HLO module (i.e., a collection of [`HloComputation`]s with a designated entry computation).
///
/// This type corresponds to `HloModuleProto` in [XLA](https://github.com/openxla/xla).
#[derive(Clone, PartialEq, Message)]
pub struct HloModule {
    /// Name of this module.
    #[prost(string, tag = "1")]
    pub name: String,

    /// Computations of this module.
    #[prost(message, repeated, tag = "3")]
    pub computations: Vec<HloComputation>,

    /// [`ProgramShape`] of the entry computation, as seen by the host.
    #[prost(message, optional, tag = "4")]
    pub host_program_shape: Option<ProgramShape>,

    /// ID of the entry computation of this module.
    #[prost(int64, tag = "6")]
    pub entry_computation_id: i64,

    /// Input/output alias configuration of this module.
    #[prost(message, optional, tag = "8")]
    pub input_output_alias: Option<HloInputOutputAlias>,
}

#[cfg(test)]
mod tests {
    use prost::Message;

    use super::*;

    #[test]
    fn test_shape_round_trip() {
        let shape = Shape {
            element_type: PrimitiveType::F32 as i32,
            dimensions: vec![8, 4],
            is_dynamic_dimension: vec![false, false],
            tuple_shapes: Vec::new(),
            layout: Some(Box::new(Layout { minor_to_major: vec![1, 0], tiles: Vec::new(), memory_space: None })),
        };
        let decoded = Shape::decode(shape.encode_to_vec().as_slice()).unwrap();
        assert_eq!(decoded, shape);
        assert_eq!(decoded.element_type(), PrimitiveType::F32);
    }

    #[test]
    fn test_op_sharding_enumeration_accessors() {
        let sharding = OpSharding {
            r#type: OpShardingType::Other as i32,
            tile_assignment_dimensions: vec![2, 1],
            tile_assignment_devices: vec![0, 1],
            last_tile_dims: vec![OpShardingType::Replicated as i32],
            ..Default::default()
        };
        assert_eq!(sharding.r#type(), OpShardingType::Other);
        assert_eq!(sharding.last_tile_dims().collect::<Vec<_>>(), vec![OpShardingType::Replicated]);
        assert_eq!(OpShardingType::try_from(7).ok(), None);
    }

    #[test]
    fn test_hlo_module_decoding_skips_unknown_fields() {
        let module = HloModule {
            name: "module".to_string(),
            entry_computation_id: 3,
            input_output_alias: Some(HloInputOutputAlias {
                entries: vec![HloInputOutputAliasEntry {
                    output_shape_index: vec![0],
                    parameter_number: 1,
                    parameter_shape_index: Vec::new(),
                    kind: AliasKind::MayAlias as i32,
                }],
            }),
            ..Default::default()
        };
        let mut bytes = module.encode_to_vec();

        // Fields 2 (`entry_computation_name`) and 7 (`schedule`) are not modeled and must be skipped.
        bytes.extend_from_slice(&[0x12, 0x04, b'm', b'a', b'i', b'n']);
        bytes.extend_from_slice(&[0x3a, 0x00]);
        let decoded = HloModule::decode(bytes.as_slice()).unwrap();
        assert_eq!(decoded, module);
    }
}
