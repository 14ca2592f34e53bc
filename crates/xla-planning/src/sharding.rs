//! This module provides the data structures for representing how values in HLO programs are _sharded_ (or
//! _partitioned_) across devices, along with the _tiling_ transform that maps an unsharded shape to the shape of each
//! of its shards. The design mirrors [XLA's `HloSharding`][hlo-sharding] and can be decoded from the
//! [`OpSharding`] protos that annotate HLO instructions.
//!
//! [hlo-sharding]: https://github.com/openxla/xla/blob/main/xla/hlo/ir/hlo_sharding.h
//!
//! # Structure
//!
//! A [`Sharding`] is a tree that is isomorphic to the [`Shape`] it annotates:
//!
//! | Type | XLA equivalent | Rendering |
//! |---|---|---|
//! | [`Sharding::Tuple`] | `HloSharding::Tuple` | `{{replicated}, {maximal device=1}}` |
//! | [`LeafSharding`] with [`ShardingKind::Replicated`] | `HloSharding::Replicate()` | `{replicated}` |
//! | [`LeafSharding`] with [`ShardingKind::Maximal`] | `HloSharding::AssignDevice(d)` | `{maximal device=3}` |
//! | [`LeafSharding`] with [`ShardingKind::Tiled`] | `HloSharding::Tile(assignment)` | `{devices=[2,1]0,1}` |
//! | [`LeafSharding`] with [`ShardingKind::Manual`] | `HloSharding::Manual()` | `{manual}` |
//!
//! Leaf shardings are kept exactly as they were declared. They are only normalized into a [`TileAssignment`] (and
//! validated) when a [`Tiling`] is asked to compute a per-shard shape, which means that a malformed descriptor is
//! reported as a [`TilingError`] for the value it annotates.
//!
//! # Tiling
//!
//! The [`Tiling`] trait is the seam through which shard shapes are computed. [`TileShaper`] is the default
//! implementation and follows `HloSharding::TileShape`: every tiled data dimension of size `n` that is split into `k`
//! tiles becomes `ceil(n / k)` (or must divide evenly, depending on the configured [`TilingMode`]), while replicated,
//! maximal, and manual shardings leave the shape unchanged.

use std::collections::HashSet;
use std::fmt::{Display, Formatter};

use thiserror::Error;

use xla_protos::{OpSharding, OpShardingType};

use crate::errors::Error;
use crate::options::TilingMode;
use crate::shapes::{ArrayShape, Shape, join};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Error type for malformed leaf sharding descriptors and for shapes that cannot be tiled using them.
#[derive(Error, Clone, Debug, PartialEq, Eq, Hash)]
pub enum TilingError {
    /// Error returned when a tiled sharding has no tile-assignment dimensions.
    #[error("tiled shardings must have at least one tile-assignment dimension")]
    EmptyTileAssignment,

    /// Error returned when a tile-assignment dimension is not positive.
    #[error("tile-assignment dimension #{dimension} must have size > 0, but got {size}")]
    InvalidTileAssignmentDimension { dimension: usize, size: i64 },

    /// Error returned when the number of explicitly assigned devices does not match the tile-assignment dimensions.
    #[error("tile assignment has {actual_device_count} device(s), but its dimensions imply {expected_device_count}")]
    DeviceCountMismatch { expected_device_count: usize, actual_device_count: usize },

    /// Error returned when an assigned device ID is negative.
    #[error("device id {device} must be non-negative")]
    NegativeDevice { device: i64 },

    /// Error returned when the same device appears more than once in a tile assignment.
    #[error("device id {device} appears more than once in the tile assignment")]
    DuplicateDevice { device: i64 },

    /// Error returned when both an explicit device list and an iota device list are provided.
    #[error("tile assignments cannot have both explicit devices and iota reshape dimensions")]
    ConflictingDeviceLists,

    /// Error returned when an iota reshape dimension is not positive.
    #[error("iota reshape dimension #{dimension} must have size > 0, but got {size}")]
    InvalidIotaReshapeDimension { dimension: usize, size: i64 },

    /// Error returned when the iota reshape dimensions do not cover the tile assignment.
    #[error(
        "iota reshape dimensions imply {actual_device_count} device(s), \
        but the tile assignment has {expected_device_count}"
    )]
    IotaDeviceCountMismatch { expected_device_count: usize, actual_device_count: usize },

    /// Error returned when the iota transpose permutation is not a permutation of the reshape dimensions.
    #[error("invalid iota transpose permutation [{permutation}] for {rank} reshape dimension(s)")]
    InvalidIotaPermutation { permutation: String, rank: usize },

    /// Error returned when both `replicate_on_last_tile_dim` and subgroup kinds are provided.
    #[error("tile assignments cannot both replicate on their last dimension and declare subgroup kinds")]
    ConflictingSubgroupSpecification,

    /// Error returned when a subgroup dimension has a kind other than replicated, manual, or unreduced.
    #[error("subgroup dimensions must be replicated, manual, or unreduced, but got {kind}")]
    InvalidSubgroupKind { kind: ShardingKind },

    /// Error returned when there are more subgroup dimensions than tile-assignment dimensions.
    #[error(
        "got {subgroup_dimension_count} subgroup dimension(s) \
        for a tile assignment with rank {tile_assignment_rank}"
    )]
    TooManySubgroupDimensions { subgroup_dimension_count: usize, tile_assignment_rank: usize },

    /// Error returned when a maximal sharding does not name exactly one device.
    #[error("maximal shardings must be assigned to exactly one device, but got {device_count}")]
    InvalidMaximalSharding { device_count: usize },

    /// Error returned when the tiled data rank of a tile assignment does not match the rank of the tiled shape.
    #[error("tile assignment tiles {tiled_data_rank} dimension(s), but the shape has rank {shape_rank}")]
    RankMismatch { tiled_data_rank: usize, shape_rank: usize },

    /// Error returned by [`TilingMode::Exact`] when a dimension is not divisible by its tile count.
    #[error("dimension #{dimension} with size {size} cannot be split evenly into {tile_count} tile(s)")]
    UnevenTiling { dimension: usize, size: usize, tile_count: usize },

    /// Error returned when a tiled (non-tuple) sharding is applied to a tuple shape.
    #[error("tiled shardings cannot be applied to tuple shapes")]
    TupleShape,

    /// Error returned when arithmetic overflows while normalizing a tile assignment.
    #[error("overflow while {context}")]
    Overflow { context: String },
}

// ---------------------------------------------------------------------------
// Sharding kinds
// ---------------------------------------------------------------------------

/// Kind of a [`LeafSharding`].
///
/// This corresponds to the non-tuple subset of `OpSharding.Type` in [XLA](https://github.com/openxla/xla).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ShardingKind {
    /// The value is replicated across all devices.
    Replicated,
    /// The value lives on a single device.
    Maximal,
    /// The value is split into tiles according to a [`TileAssignment`].
    Tiled,
    /// The value is partitioned manually by the program itself.
    Manual,
    /// Placeholder sharding with lowest precedence.
    Unknown,
    /// The value is partitioned but has not been all-reduced yet.
    Unreduced,
}

impl Display for ShardingKind {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Replicated => "replicated",
            Self::Maximal => "maximal",
            Self::Tiled => "tiled",
            Self::Manual => "manual",
            Self::Unknown => "unknown",
            Self::Unreduced => "unreduced",
        };
        write!(formatter, "{name}")
    }
}

impl TryFrom<OpShardingType> for ShardingKind {
    type Error = OpShardingType;

    fn try_from(sharding_type: OpShardingType) -> Result<Self, Self::Error> {
        match sharding_type {
            OpShardingType::Replicated => Ok(Self::Replicated),
            OpShardingType::Maximal => Ok(Self::Maximal),
            OpShardingType::Other => Ok(Self::Tiled),
            OpShardingType::Manual => Ok(Self::Manual),
            OpShardingType::Unknown => Ok(Self::Unknown),
            OpShardingType::Unreduced => Ok(Self::Unreduced),
            OpShardingType::Tuple => Err(sharding_type),
        }
    }
}

impl From<ShardingKind> for OpShardingType {
    fn from(kind: ShardingKind) -> Self {
        match kind {
            ShardingKind::Replicated => Self::Replicated,
            ShardingKind::Maximal => Self::Maximal,
            ShardingKind::Tiled => Self::Other,
            ShardingKind::Manual => Self::Manual,
            ShardingKind::Unknown => Self::Unknown,
            ShardingKind::Unreduced => Self::Unreduced,
        }
    }
}

// ---------------------------------------------------------------------------
// Leaf sharding
// ---------------------------------------------------------------------------

/// Sharding descriptor for a single non-tuple value.
///
/// This is treated as an opaque descriptor by the shape analyses: it is only interpreted by a [`Tiling`]
/// implementation. Devices are either listed explicitly (in row-major order over the tile-assignment dimensions) or
/// generated by reshaping `0..N` using the iota reshape dimensions and then transposing the result using the iota
/// transpose permutation, exactly as in XLA's `IotaTileAssignment`.
///
/// Trailing tile-assignment dimensions can be declared as _subgroup_ dimensions, along which the value is replicated
/// (or manually partitioned) rather than tiled. Either the last dimension is marked as replicated using
/// [`LeafSharding::with_replicated_last_dimension`], or every trailing subgroup dimension gets an explicit kind using
/// [`LeafSharding::with_subgroup_kinds`].
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct LeafSharding {
    kind: ShardingKind,
    tile_assignment_dimensions: Vec<i64>,
    tile_assignment_devices: Vec<i64>,
    iota_reshape_dimensions: Vec<i64>,
    iota_transpose_permutation: Vec<i32>,
    replicate_on_last_tile_dimension: bool,
    subgroup_kinds: Vec<ShardingKind>,
}

impl LeafSharding {
    fn new(kind: ShardingKind) -> Self {
        Self {
            kind,
            tile_assignment_dimensions: Vec::new(),
            tile_assignment_devices: Vec::new(),
            iota_reshape_dimensions: Vec::new(),
            iota_transpose_permutation: Vec::new(),
            replicate_on_last_tile_dimension: false,
            subgroup_kinds: Vec::new(),
        }
    }

    /// Creates a sharding that replicates the value across all devices.
    pub fn replicated() -> Self {
        Self::new(ShardingKind::Replicated)
    }

    /// Creates a sharding that places the whole value on `device`.
    pub fn maximal(device: i64) -> Self {
        Self { tile_assignment_devices: vec![device], ..Self::new(ShardingKind::Maximal) }
    }

    /// Creates a sharding for values that are partitioned manually.
    pub fn manual() -> Self {
        Self::new(ShardingKind::Manual)
    }

    /// Creates a tiled sharding with an explicit device list in row-major order over `dimensions`.
    pub fn tiled(dimensions: Vec<i64>, devices: Vec<i64>) -> Self {
        Self {
            tile_assignment_dimensions: dimensions,
            tile_assignment_devices: devices,
            ..Self::new(ShardingKind::Tiled)
        }
    }

    /// Creates a tiled sharding whose devices are `0..N` in row-major order over `dimensions`.
    pub fn tiled_iota(dimensions: Vec<i64>) -> Self {
        Self::tiled_iota_transposed(dimensions.clone(), dimensions, Vec::new())
    }

    /// Creates a tiled sharding whose devices are generated by reshaping `0..N` to `reshape_dimensions` and then
    /// transposing the result using `transpose_permutation`. An empty permutation means no transposition.
    pub fn tiled_iota_transposed(
        dimensions: Vec<i64>,
        reshape_dimensions: Vec<i64>,
        transpose_permutation: Vec<i32>,
    ) -> Self {
        Self {
            tile_assignment_dimensions: dimensions,
            iota_reshape_dimensions: reshape_dimensions,
            iota_transpose_permutation: transpose_permutation,
            ..Self::new(ShardingKind::Tiled)
        }
    }

    /// Creates a tiled sharding whose last tile-assignment dimension replicates the value across its devices.
    pub fn partially_replicated(dimensions: Vec<i64>, devices: Vec<i64>) -> Self {
        Self::tiled(dimensions, devices).with_replicated_last_dimension()
    }

    /// Returns a copy of this sharding in which the last tile-assignment dimension replicates the value.
    pub fn with_replicated_last_dimension(mut self) -> Self {
        self.replicate_on_last_tile_dimension = true;
        self
    }

    /// Returns a copy of this sharding in which the trailing tile-assignment dimensions are subgroup dimensions with
    /// the provided kinds.
    pub fn with_subgroup_kinds(mut self, subgroup_kinds: Vec<ShardingKind>) -> Self {
        self.subgroup_kinds = subgroup_kinds;
        self
    }

    pub fn kind(&self) -> ShardingKind {
        self.kind
    }

    pub fn tile_assignment_dimensions(&self) -> &[i64] {
        self.tile_assignment_dimensions.as_slice()
    }

    pub fn tile_assignment_devices(&self) -> &[i64] {
        self.tile_assignment_devices.as_slice()
    }

    pub fn iota_reshape_dimensions(&self) -> &[i64] {
        self.iota_reshape_dimensions.as_slice()
    }

    pub fn iota_transpose_permutation(&self) -> &[i32] {
        self.iota_transpose_permutation.as_slice()
    }

    pub fn replicate_on_last_tile_dimension(&self) -> bool {
        self.replicate_on_last_tile_dimension
    }

    pub fn subgroup_kinds(&self) -> &[ShardingKind] {
        self.subgroup_kinds.as_slice()
    }
}

impl Display for LeafSharding {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        match self.kind {
            ShardingKind::Replicated | ShardingKind::Manual | ShardingKind::Unknown | ShardingKind::Unreduced => {
                write!(formatter, "{{{}}}", self.kind)
            }
            ShardingKind::Maximal => {
                write!(formatter, "{{maximal device={}}}", join(&self.tile_assignment_devices, ","))
            }
            ShardingKind::Tiled => {
                write!(formatter, "{{devices=[{}]", join(&self.tile_assignment_dimensions, ","))?;
                if self.iota_reshape_dimensions.is_empty() {
                    write!(formatter, "{}", join(&self.tile_assignment_devices, ","))?;
                } else {
                    write!(formatter, "<=[{}]", join(&self.iota_reshape_dimensions, ","))?;
                    if !self.iota_transpose_permutation.is_empty() {
                        write!(formatter, "T({})", join(&self.iota_transpose_permutation, ","))?;
                    }
                }
                if self.replicate_on_last_tile_dimension {
                    write!(formatter, " last_tile_dim_replicate")?;
                }
                if !self.subgroup_kinds.is_empty() {
                    write!(formatter, " last_tile_dims={{{}}}", join(&self.subgroup_kinds, ", "))?;
                }
                write!(formatter, "}}")
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Sharding
// ---------------------------------------------------------------------------

/// Sharding annotation of a value in an HLO program. Tuple shardings have one child per element of the tuple
/// [`Shape`] that they annotate.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Sharding {
    Tuple(Vec<Sharding>),
    Leaf(LeafSharding),
}

impl Sharding {
    /// Creates a tuple [`Sharding`].
    pub fn tuple(elements: Vec<Sharding>) -> Self {
        Self::Tuple(elements)
    }

    /// Creates a replicated leaf [`Sharding`].
    pub fn replicated() -> Self {
        Self::Leaf(LeafSharding::replicated())
    }

    pub fn is_tuple(&self) -> bool {
        matches!(self, Self::Tuple(_))
    }
}

impl From<LeafSharding> for Sharding {
    fn from(leaf: LeafSharding) -> Self {
        Self::Leaf(leaf)
    }
}

impl Display for Sharding {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Leaf(leaf) => write!(formatter, "{leaf}"),
            Self::Tuple(elements) => write!(formatter, "{{{}}}", join(elements, ", ")),
        }
    }
}

impl TryFrom<&OpSharding> for Sharding {
    type Error = Error;

    fn try_from(proto: &OpSharding) -> Result<Self, Self::Error> {
        if proto.named_sharding.is_some() {
            return Err(Error::UnsupportedSharding {
                message: "named shardings are not supported; use tile-assignment shardings instead".to_string(),
            });
        }

        let sharding_type = OpShardingType::try_from(proto.r#type)
            .map_err(|_| Error::malformed_proto("op sharding", format!("unknown sharding type {}", proto.r#type)))?;
        let kind = match ShardingKind::try_from(sharding_type) {
            Ok(kind) => kind,
            Err(_) => {
                let elements = proto.tuple_shardings.iter().map(Sharding::try_from).collect::<Result<Vec<_>, _>>()?;
                return Ok(Self::Tuple(elements));
            }
        };

        let subgroup_kinds = proto
            .last_tile_dims
            .iter()
            .map(|&subgroup_type| {
                OpShardingType::try_from(subgroup_type)
                    .ok()
                    .and_then(|subgroup_type| ShardingKind::try_from(subgroup_type).ok())
                    .ok_or_else(|| {
                        Error::malformed_proto("op sharding", format!("invalid subgroup sharding type {subgroup_type}"))
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self::Leaf(LeafSharding {
            kind,
            tile_assignment_dimensions: proto.tile_assignment_dimensions.clone(),
            tile_assignment_devices: proto.tile_assignment_devices.clone(),
            iota_reshape_dimensions: proto.iota_reshape_dims.clone(),
            iota_transpose_permutation: proto.iota_transpose_perm.clone(),
            replicate_on_last_tile_dimension: proto.replicate_on_last_tile_dim,
            subgroup_kinds,
        }))
    }
}

impl From<&Sharding> for OpSharding {
    fn from(sharding: &Sharding) -> Self {
        match sharding {
            Sharding::Tuple(elements) => Self {
                r#type: OpShardingType::Tuple as i32,
                tuple_shardings: elements.iter().map(Self::from).collect(),
                ..Default::default()
            },
            Sharding::Leaf(leaf) => Self {
                r#type: OpShardingType::from(leaf.kind) as i32,
                tile_assignment_dimensions: leaf.tile_assignment_dimensions.clone(),
                tile_assignment_devices: leaf.tile_assignment_devices.clone(),
                replicate_on_last_tile_dim: leaf.replicate_on_last_tile_dimension,
                last_tile_dims: leaf.subgroup_kinds.iter().map(|&kind| OpShardingType::from(kind) as i32).collect(),
                iota_reshape_dims: leaf.iota_reshape_dimensions.clone(),
                iota_transpose_perm: leaf.iota_transpose_permutation.clone(),
                ..Default::default()
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Tile assignment
// ---------------------------------------------------------------------------

/// Validated and normalized tile assignment of a tiled [`LeafSharding`]: positive tile counts per dimension together
/// with the devices they are assigned to.
///
/// The first [`TileAssignment::tiled_data_rank`] dimensions tile the data dimensions of the annotated array, while the
/// remaining (subgroup) dimensions replicate or manually partition it. Iota device lists are never materialized
/// during validation, and so tile assignments over huge device meshes are as cheap to check as small ones.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TileAssignment {
    dimensions: Vec<usize>,
    devices: TileAssignmentDevices,
    device_count: usize,
    subgroup_dimension_count: usize,
}

/// Devices of a [`TileAssignment`], in row-major order over its dimensions.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
enum TileAssignmentDevices {
    Explicit(Vec<i64>),

    /// `0..device_count` reshaped to `reshape_dimensions` and then transposed using `transpose_permutation`.
    Iota { reshape_dimensions: Vec<usize>, transpose_permutation: Vec<usize> },
}

impl TileAssignment {
    /// Normalizes the tile assignment of `sharding`, validating it the same way XLA validates `OpSharding` protos.
    /// The kind of `sharding` is not checked; only its tile-assignment fields are used.
    pub fn from_leaf(sharding: &LeafSharding) -> Result<Self, TilingError> {
        if sharding.replicate_on_last_tile_dimension && !sharding.subgroup_kinds.is_empty() {
            return Err(TilingError::ConflictingSubgroupSpecification);
        }
        if let Some(&kind) = sharding.subgroup_kinds.iter().find(|kind| {
            !matches!(kind, ShardingKind::Replicated | ShardingKind::Manual | ShardingKind::Unreduced)
        }) {
            return Err(TilingError::InvalidSubgroupKind { kind });
        }
        if sharding.tile_assignment_dimensions.is_empty() {
            return Err(TilingError::EmptyTileAssignment);
        }

        let dimensions = sharding
            .tile_assignment_dimensions
            .iter()
            .enumerate()
            .map(|(dimension, &size)| match usize::try_from(size) {
                Ok(size) if size > 0 => Ok(size),
                _ => Err(TilingError::InvalidTileAssignmentDimension { dimension, size }),
            })
            .collect::<Result<Vec<_>, _>>()?;
        let device_count = checked_product(dimensions.as_slice(), "computing the tile-assignment device count")?;

        let devices = if sharding.iota_reshape_dimensions.is_empty() {
            let devices = sharding.tile_assignment_devices.clone();
            if devices.len() != device_count {
                return Err(TilingError::DeviceCountMismatch {
                    expected_device_count: device_count,
                    actual_device_count: devices.len(),
                });
            }
            let mut seen_devices = HashSet::with_capacity(devices.len());
            for &device in &devices {
                if device < 0 {
                    return Err(TilingError::NegativeDevice { device });
                }
                if !seen_devices.insert(device) {
                    return Err(TilingError::DuplicateDevice { device });
                }
            }
            TileAssignmentDevices::Explicit(devices)
        } else {
            if !sharding.tile_assignment_devices.is_empty() {
                return Err(TilingError::ConflictingDeviceLists);
            }
            validate_iota(
                sharding.iota_reshape_dimensions.as_slice(),
                sharding.iota_transpose_permutation.as_slice(),
                device_count,
            )?
        };

        let subgroup_dimension_count =
            if sharding.replicate_on_last_tile_dimension { 1 } else { sharding.subgroup_kinds.len() };
        if subgroup_dimension_count > dimensions.len() {
            return Err(TilingError::TooManySubgroupDimensions {
                subgroup_dimension_count,
                tile_assignment_rank: dimensions.len(),
            });
        }

        Ok(Self { dimensions, devices, device_count, subgroup_dimension_count })
    }

    /// Number of tiles along each tile-assignment dimension, including subgroup dimensions.
    pub fn dimensions(&self) -> &[usize] {
        self.dimensions.as_slice()
    }

    /// Device assigned to the tile at `linear_index`, in row-major order over [`TileAssignment::dimensions`].
    /// Returns [`None`] if `linear_index` is not smaller than [`TileAssignment::device_count`].
    pub fn device(&self, linear_index: usize) -> Option<i64> {
        if linear_index >= self.device_count {
            return None;
        }
        match &self.devices {
            TileAssignmentDevices::Explicit(devices) => devices.get(linear_index).copied(),
            TileAssignmentDevices::Iota { reshape_dimensions, transpose_permutation } => {
                Some(iota_device(linear_index, reshape_dimensions.as_slice(), transpose_permutation.as_slice()))
            }
        }
    }

    /// Device IDs in row-major order over [`TileAssignment::dimensions`]. Iota device lists are materialized on every
    /// call, and so this should only be used for assignments with a reasonable number of devices.
    pub fn devices(&self) -> Vec<i64> {
        match &self.devices {
            TileAssignmentDevices::Explicit(devices) => devices.clone(),
            TileAssignmentDevices::Iota { reshape_dimensions, transpose_permutation } => (0..self.device_count)
                .map(|index| iota_device(index, reshape_dimensions.as_slice(), transpose_permutation.as_slice()))
                .collect(),
        }
    }

    pub fn device_count(&self) -> usize {
        self.device_count
    }

    /// Number of leading dimensions that tile data dimensions (i.e., all dimensions except for subgroup dimensions).
    pub fn tiled_data_rank(&self) -> usize {
        self.dimensions.len() - self.subgroup_dimension_count
    }
}

// ---------------------------------------------------------------------------
// Tiling
// ---------------------------------------------------------------------------

/// Transform that maps an unsharded [`Shape`] to the shape of each of its shards under a [`LeafSharding`].
///
/// Implementations must validate that the descriptor is well-formed and return a descriptive [`TilingError`]
/// otherwise. They are free to ignore [`Layout`](crate::shapes::Layout)s, since callers clear them from the result.
pub trait Tiling {
    fn tile(&self, shape: &Shape, sharding: &LeafSharding) -> Result<Shape, TilingError>;
}

impl<T: Tiling + ?Sized> Tiling for &T {
    fn tile(&self, shape: &Shape, sharding: &LeafSharding) -> Result<Shape, TilingError> {
        (**self).tile(shape, sharding)
    }
}

/// Default [`Tiling`] implementation which follows `HloSharding::TileShape` from XLA.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct TileShaper {
    mode: TilingMode,
}

impl TileShaper {
    pub fn new(mode: TilingMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> TilingMode {
        self.mode
    }

    fn tile_array(&self, array: &ArrayShape, assignment: &TileAssignment) -> Result<ArrayShape, TilingError> {
        let tiled_data_rank = assignment.tiled_data_rank();
        if tiled_data_rank != array.rank() {
            return Err(TilingError::RankMismatch { tiled_data_rank, shape_rank: array.rank() });
        }
        let dimensions = array
            .dimensions()
            .iter()
            .zip(assignment.dimensions())
            .enumerate()
            .map(|(dimension, (&size, &tile_count))| match self.mode {
                TilingMode::Padded => Ok(size.div_ceil(tile_count)),
                TilingMode::Exact if size % tile_count == 0 => Ok(size / tile_count),
                TilingMode::Exact => Err(TilingError::UnevenTiling { dimension, size, tile_count }),
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(array.with_dimensions(dimensions))
    }
}

impl Tiling for TileShaper {
    fn tile(&self, shape: &Shape, sharding: &LeafSharding) -> Result<Shape, TilingError> {
        match sharding.kind {
            ShardingKind::Replicated | ShardingKind::Manual | ShardingKind::Unknown | ShardingKind::Unreduced => {
                Ok(shape.clone())
            }
            ShardingKind::Maximal => match sharding.tile_assignment_devices.as_slice() {
                [device] if *device < 0 => Err(TilingError::NegativeDevice { device: *device }),
                [_] => Ok(shape.clone()),
                devices => Err(TilingError::InvalidMaximalSharding { device_count: devices.len() }),
            },
            ShardingKind::Tiled => {
                let assignment = TileAssignment::from_leaf(sharding)?;
                match shape {
                    Shape::Array(array) => Ok(Shape::Array(self.tile_array(array, &assignment)?)),
                    Shape::Tuple(_) => Err(TilingError::TupleShape),
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

fn checked_product(values: &[usize], context: &str) -> Result<usize, TilingError> {
    values.iter().try_fold(1usize, |product, &value| {
        product.checked_mul(value).ok_or_else(|| TilingError::Overflow { context: context.to_string() })
    })
}

/// Validates the reshape dimensions and transpose permutation of an iota tile assignment with `device_count` devices.
fn validate_iota(
    reshape_dimensions: &[i64],
    transpose_permutation: &[i32],
    device_count: usize,
) -> Result<TileAssignmentDevices, TilingError> {
    let reshape_dimensions = reshape_dimensions
        .iter()
        .enumerate()
        .map(|(dimension, &size)| match usize::try_from(size) {
            Ok(size) if size > 0 => Ok(size),
            _ => Err(TilingError::InvalidIotaReshapeDimension { dimension, size }),
        })
        .collect::<Result<Vec<_>, _>>()?;
    let iota_device_count = checked_product(reshape_dimensions.as_slice(), "computing the iota device count")?;
    if iota_device_count != device_count {
        return Err(TilingError::IotaDeviceCountMismatch {
            expected_device_count: device_count,
            actual_device_count: iota_device_count,
        });
    }

    let rank = reshape_dimensions.len();
    let transpose_permutation = if transpose_permutation.is_empty() {
        (0..rank).collect::<Vec<_>>()
    } else {
        let invalid_permutation =
            || TilingError::InvalidIotaPermutation { permutation: join(transpose_permutation, ","), rank };
        let permutation = transpose_permutation
            .iter()
            .map(|&axis| usize::try_from(axis).ok().filter(|&axis| axis < rank).ok_or_else(invalid_permutation))
            .collect::<Result<Vec<_>, _>>()?;
        if permutation.len() != rank || permutation.iter().collect::<HashSet<_>>().len() != rank {
            return Err(invalid_permutation());
        }
        permutation
    };
    Ok(TileAssignmentDevices::Iota { reshape_dimensions, transpose_permutation })
}

/// Device at `linear_index` of `0..device_count` reshaped to `reshape_dimensions`, transposed using
/// `transpose_permutation`, and flattened in row-major order.
fn iota_device(linear_index: usize, reshape_dimensions: &[usize], transpose_permutation: &[usize]) -> i64 {
    let transposed_dimensions = transpose_permutation.iter().map(|&axis| reshape_dimensions[axis]).collect::<Vec<_>>();
    let coordinate = coordinate_for_linear_index(linear_index, transposed_dimensions.as_slice());
    let mut source_coordinate = vec![0usize; reshape_dimensions.len()];
    for (axis, &source_axis) in transpose_permutation.iter().enumerate() {
        source_coordinate[source_axis] = coordinate[axis];
    }
    let device = source_coordinate
        .iter()
        .zip(reshape_dimensions.iter())
        .fold(0usize, |index, (&coordinate, &size)| index * size + coordinate);
    device as i64
}

fn coordinate_for_linear_index(mut index: usize, dimension_sizes: &[usize]) -> Vec<usize> {
    let mut coordinate = vec![0usize; dimension_sizes.len()];
    for axis in (0..dimension_sizes.len()).rev() {
        let size = dimension_sizes[axis];
        coordinate[axis] = index % size;
        index /= size;
    }
    coordinate
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use crate::shapes::ElementType;

    use super::*;

    fn f32_array(dimensions: Vec<usize>) -> Shape {
        Shape::array(ElementType::F32, dimensions)
    }

    // -----------------------------------------------------------------------
    // TileAssignment tests
    // -----------------------------------------------------------------------

    #[test]
    fn test_tile_assignment_explicit_devices() {
        let assignment = TileAssignment::from_leaf(&LeafSharding::tiled(vec![2, 2], vec![3, 1, 2, 0])).unwrap();
        assert_eq!(assignment.dimensions(), &[2, 2]);
        assert_eq!(assignment.devices(), vec![3, 1, 2, 0]);
        assert_eq!(assignment.device(1), Some(1));
        assert_eq!(assignment.device(4), None);
        assert_eq!(assignment.device_count(), 4);
        assert_eq!(assignment.tiled_data_rank(), 2);
    }

    #[test]
    fn test_tile_assignment_iota_devices() {
        let identity = TileAssignment::from_leaf(&LeafSharding::tiled_iota(vec![4])).unwrap();
        assert_eq!(identity.devices(), vec![0, 1, 2, 3]);

        let sharding = LeafSharding::tiled_iota_transposed(vec![4], vec![2, 2], vec![1, 0]);
        assert_eq!(TileAssignment::from_leaf(&sharding).unwrap().devices(), vec![0, 2, 1, 3]);

        let sharding = LeafSharding::tiled_iota_transposed(vec![2, 3], vec![2, 3], vec![1, 0]);
        assert_eq!(TileAssignment::from_leaf(&sharding).unwrap().devices(), vec![0, 3, 1, 4, 2, 5]);
    }

    #[test]
    fn test_tile_assignment_huge_iota() {
        let sharding = LeafSharding::tiled_iota(vec![1 << 20, 1 << 20]);
        let assignment = TileAssignment::from_leaf(&sharding).unwrap();
        assert_eq!(assignment.device_count(), 1 << 40);
        assert_eq!(assignment.device((1 << 40) - 1), Some((1 << 40) - 1));
        assert_eq!(assignment.device(1 << 40), None);
        assert_eq!(TileShaper::default().tile(&f32_array(vec![8, 8]), &sharding), Ok(f32_array(vec![1, 1])));

        let sharding = LeafSharding::tiled_iota_transposed(vec![1 << 20, 1 << 20], vec![1 << 20, 1 << 20], vec![1, 0]);
        let assignment = TileAssignment::from_leaf(&sharding).unwrap();
        assert_eq!(assignment.device(1), Some(1 << 20));
        assert_eq!(TileShaper::default().tile(&f32_array(vec![8, 8]), &sharding), Ok(f32_array(vec![1, 1])));
    }

    #[test]
    fn test_tile_assignment_subgroups() {
        let sharding = LeafSharding::tiled(vec![2, 1, 2], vec![0, 1, 2, 3]).with_replicated_last_dimension();
        assert_eq!(TileAssignment::from_leaf(&sharding).unwrap().tiled_data_rank(), 2);

        let sharding = LeafSharding::tiled_iota_transposed(vec![2, 2, 2], vec![8], Vec::new())
            .with_subgroup_kinds(vec![ShardingKind::Manual, ShardingKind::Replicated]);
        assert_eq!(TileAssignment::from_leaf(&sharding).unwrap().tiled_data_rank(), 1);
    }

    #[test]
    fn test_tile_assignment_validation() {
        assert!(matches!(
            TileAssignment::from_leaf(&LeafSharding::tiled(Vec::new(), Vec::new())),
            Err(TilingError::EmptyTileAssignment),
        ));
        assert!(matches!(
            TileAssignment::from_leaf(&LeafSharding::tiled(vec![2, 0], Vec::new())),
            Err(TilingError::InvalidTileAssignmentDimension { dimension: 1, size: 0 }),
        ));
        assert!(matches!(
            TileAssignment::from_leaf(&LeafSharding::tiled(vec![2, 2], vec![0, 1, 2])),
            Err(TilingError::DeviceCountMismatch { expected_device_count: 4, actual_device_count: 3 }),
        ));
        assert!(matches!(
            TileAssignment::from_leaf(&LeafSharding::tiled(vec![2], vec![0, -1])),
            Err(TilingError::NegativeDevice { device: -1 }),
        ));
        assert!(matches!(
            TileAssignment::from_leaf(&LeafSharding::tiled(vec![2], vec![1, 1])),
            Err(TilingError::DuplicateDevice { device: 1 }),
        ));
        assert!(matches!(
            TileAssignment::from_leaf(&LeafSharding::tiled_iota_transposed(vec![4], vec![2, 3], Vec::new())),
            Err(TilingError::IotaDeviceCountMismatch { expected_device_count: 4, actual_device_count: 6 }),
        ));
        assert!(matches!(
            TileAssignment::from_leaf(&LeafSharding::tiled_iota_transposed(vec![4], vec![2, 2], vec![0, 0])),
            Err(TilingError::InvalidIotaPermutation { rank: 2, .. }),
        ));
        assert!(matches!(
            TileAssignment::from_leaf(&LeafSharding::tiled_iota_transposed(vec![4], vec![2, 2], vec![0, 2])),
            Err(TilingError::InvalidIotaPermutation { rank: 2, .. }),
        ));
        assert!(matches!(
            TileAssignment::from_leaf(&LeafSharding::tiled_iota_transposed(vec![4], vec![4, -1], Vec::new())),
            Err(TilingError::InvalidIotaReshapeDimension { dimension: 1, size: -1 }),
        ));

        let conflicting_devices = LeafSharding {
            tile_assignment_devices: vec![0, 1],
            ..LeafSharding::tiled_iota_transposed(vec![2], vec![2], Vec::new())
        };
        assert!(matches!(
            TileAssignment::from_leaf(&conflicting_devices),
            Err(TilingError::ConflictingDeviceLists),
        ));

        let conflicting_subgroups = LeafSharding::tiled(vec![1, 2], vec![0, 1])
            .with_replicated_last_dimension()
            .with_subgroup_kinds(vec![ShardingKind::Replicated]);
        assert!(matches!(
            TileAssignment::from_leaf(&conflicting_subgroups),
            Err(TilingError::ConflictingSubgroupSpecification),
        ));

        let invalid_subgroup =
            LeafSharding::tiled(vec![1, 2], vec![0, 1]).with_subgroup_kinds(vec![ShardingKind::Maximal]);
        assert!(matches!(
            TileAssignment::from_leaf(&invalid_subgroup),
            Err(TilingError::InvalidSubgroupKind { kind: ShardingKind::Maximal }),
        ));

        let too_many_subgroups = LeafSharding::tiled(vec![2], vec![0, 1])
            .with_subgroup_kinds(vec![ShardingKind::Replicated, ShardingKind::Manual]);
        assert!(matches!(
            TileAssignment::from_leaf(&too_many_subgroups),
            Err(TilingError::TooManySubgroupDimensions { subgroup_dimension_count: 2, tile_assignment_rank: 1 }),
        ));
    }

    // -----------------------------------------------------------------------
    // TileShaper tests
    // -----------------------------------------------------------------------

    #[test]
    fn test_tile_shaper_tiled() {
        let tiler = TileShaper::default();
        let sharding = LeafSharding::tiled(vec![2, 1], vec![0, 1]);
        assert_eq!(tiler.tile(&f32_array(vec![8, 4]), &sharding), Ok(f32_array(vec![4, 4])));

        let sharding = LeafSharding::tiled_iota_transposed(vec![2, 4], vec![8], Vec::new());
        assert_eq!(tiler.tile(&f32_array(vec![6, 10]), &sharding), Ok(f32_array(vec![3, 3])));
    }

    #[test]
    fn test_tile_shaper_partially_replicated() {
        let tiler = TileShaper::default();
        let sharding = LeafSharding::tiled(vec![2, 2], vec![0, 1, 2, 3]).with_replicated_last_dimension();
        assert_eq!(tiler.tile(&f32_array(vec![8]), &sharding), Ok(f32_array(vec![4])));
        assert!(matches!(
            tiler.tile(&f32_array(vec![8, 8]), &sharding),
            Err(TilingError::RankMismatch { tiled_data_rank: 1, shape_rank: 2 }),
        ));
    }

    #[test]
    fn test_tile_shaper_modes() {
        let sharding = LeafSharding::tiled(vec![4], vec![0, 1, 2, 3]);
        let shape = f32_array(vec![10]);
        assert_eq!(TileShaper::new(TilingMode::Padded).tile(&shape, &sharding), Ok(f32_array(vec![3])));
        assert_eq!(
            TileShaper::new(TilingMode::Exact).tile(&shape, &sharding),
            Err(TilingError::UnevenTiling { dimension: 0, size: 10, tile_count: 4 }),
        );
        assert_eq!(TileShaper::new(TilingMode::Exact).tile(&f32_array(vec![12]), &sharding), Ok(f32_array(vec![3])));
    }

    #[test]
    fn test_tile_shaper_preserves_dynamic_dimensions() {
        let shape = Shape::Array(ArrayShape::new(ElementType::S32, vec![8, 6]).with_dynamic_dimension(1));
        let sharding = LeafSharding::tiled(vec![1, 2], vec![0, 1]);
        let tiled = TileShaper::default().tile(&shape, &sharding).unwrap();
        assert_eq!(tiled.to_string(), "s32[8,<=3]");
    }

    #[test]
    fn test_tile_shaper_non_tiled_kinds() {
        let tiler = TileShaper::default();
        let shape = Shape::tuple(vec![f32_array(vec![8]), f32_array(vec![2, 2])]);
        assert_eq!(tiler.tile(&shape, &LeafSharding::replicated()), Ok(shape.clone()));
        assert_eq!(tiler.tile(&shape, &LeafSharding::manual()), Ok(shape.clone()));
        assert_eq!(tiler.tile(&shape, &LeafSharding::maximal(3)), Ok(shape.clone()));
        assert_eq!(tiler.tile(&shape, &LeafSharding::maximal(-3)), Err(TilingError::NegativeDevice { device: -3 }));
        assert_eq!(
            tiler.tile(&shape, &LeafSharding { tile_assignment_devices: Vec::new(), ..LeafSharding::maximal(0) }),
            Err(TilingError::InvalidMaximalSharding { device_count: 0 }),
        );
        assert_eq!(tiler.tile(&shape, &LeafSharding::tiled(vec![2], vec![0, 1])), Err(TilingError::TupleShape));
    }

    // -----------------------------------------------------------------------
    // Sharding tests
    // -----------------------------------------------------------------------

    #[test]
    fn test_sharding_display() {
        assert_eq!(Sharding::replicated().to_string(), "{replicated}");
        assert_eq!(Sharding::from(LeafSharding::maximal(3)).to_string(), "{maximal device=3}");
        assert_eq!(Sharding::from(LeafSharding::manual()).to_string(), "{manual}");
        assert_eq!(Sharding::from(LeafSharding::tiled(vec![2, 1], vec![0, 1])).to_string(), "{devices=[2,1]0,1}");
        let sharding = LeafSharding::tiled_iota_transposed(vec![2, 1, 2], vec![4], Vec::new());
        assert_eq!(
            Sharding::from(sharding.with_replicated_last_dimension()).to_string(),
            "{devices=[2,1,2]<=[4] last_tile_dim_replicate}",
        );
        assert_eq!(
            Sharding::from(LeafSharding::partially_replicated(vec![2, 2], vec![0, 2, 1, 3])).to_string(),
            "{devices=[2,2]0,2,1,3 last_tile_dim_replicate}",
        );
        assert_eq!(Sharding::from(LeafSharding::tiled_iota(vec![4, 2])).to_string(), "{devices=[4,2]<=[4,2]}");
        assert_eq!(
            Sharding::from(
                LeafSharding::tiled_iota_transposed(vec![2, 2], vec![2, 2], vec![1, 0])
                    .with_subgroup_kinds(vec![ShardingKind::Manual]),
            )
            .to_string(),
            "{devices=[2,2]<=[2,2]T(1,0) last_tile_dims={manual}}",
        );
        assert_eq!(
            Sharding::tuple(vec![Sharding::replicated(), LeafSharding::maximal(1).into()]).to_string(),
            "{{replicated}, {maximal device=1}}",
        );
    }

    #[test]
    fn test_sharding_from_proto() {
        let proto = OpSharding {
            r#type: OpShardingType::Tuple as i32,
            tuple_shardings: vec![
                OpSharding {
                    r#type: OpShardingType::Other as i32,
                    tile_assignment_dimensions: vec![2, 1, 2],
                    iota_reshape_dims: vec![4],
                    last_tile_dims: vec![OpShardingType::Replicated as i32],
                    ..Default::default()
                },
                OpSharding { r#type: OpShardingType::Replicated as i32, ..Default::default() },
            ],
            ..Default::default()
        };
        let sharding = Sharding::try_from(&proto).unwrap();
        let expected = Sharding::tuple(vec![
            LeafSharding::tiled_iota_transposed(vec![2, 1, 2], vec![4], Vec::new())
                .with_subgroup_kinds(vec![ShardingKind::Replicated])
                .into(),
            Sharding::replicated(),
        ]);
        assert_eq!(sharding, expected);
        assert_eq!(OpSharding::from(&sharding), proto);
    }

    #[test]
    fn test_sharding_from_malformed_proto() {
        let unknown_type = OpSharding { r#type: 42, ..Default::default() };
        assert!(matches!(Sharding::try_from(&unknown_type), Err(Error::MalformedProto { proto: "op sharding", .. })));

        let tuple_subgroup = OpSharding {
            r#type: OpShardingType::Other as i32,
            last_tile_dims: vec![OpShardingType::Tuple as i32],
            ..Default::default()
        };
        assert!(matches!(Sharding::try_from(&tuple_subgroup), Err(Error::MalformedProto { .. })));

        let named = OpSharding { named_sharding: Some(Default::default()), ..Default::default() };
        assert!(matches!(Sharding::try_from(&named), Err(Error::UnsupportedSharding { .. })));
    }
}
