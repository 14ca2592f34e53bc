//! [`Shape`]s of values in HLO programs.
//!
//! A [`Shape`] is a tree: leaves are [`ArrayShape`]s (an [`ElementType`] together with dimension sizes and an optional
//! physical [`Layout`]) and interior nodes are tuples of child [`Shape`]s. Unlike the XLA protos that they are decoded
//! from, these types cannot represent an "invalid" shape: every leaf has a valid [`ElementType`] and every tuple is
//! explicitly a tuple.

use std::fmt::{Display, Formatter};

use xla_protos::PrimitiveType;

use crate::errors::Error;

macro_rules! element_types {
    ($($(#[$attribute:meta])* $variant:ident => $primitive_type:ident, $name:literal;)*) => {
        /// Type of the individual elements stored in an [`ArrayShape`].
        ///
        /// This corresponds to the non-composite subset of `PrimitiveType` in [XLA](https://github.com/openxla/xla)
        /// (i.e., all primitive types except for `INVALID`, `TUPLE`, and `BUFFER`).
        #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
        pub enum ElementType {
            $($(#[$attribute])* $variant,)*
        }

        impl ElementType {
            /// Returns the name of this [`ElementType`] as it appears in HLO text (e.g., `"f32"`).
            pub fn name(&self) -> &'static str {
                match self {
                    $(Self::$variant => $name,)*
                }
            }
        }

        impl From<ElementType> for PrimitiveType {
            fn from(element_type: ElementType) -> Self {
                match element_type {
                    $(ElementType::$variant => PrimitiveType::$primitive_type,)*
                }
            }
        }

        impl TryFrom<PrimitiveType> for ElementType {
            type Error = PrimitiveType;

            fn try_from(primitive_type: PrimitiveType) -> Result<Self, Self::Error> {
                match primitive_type {
                    $(PrimitiveType::$primitive_type => Ok(Self::$variant),)*
                    primitive_type => Err(primitive_type),
                }
            }
        }
    };
}

element_types! {
    /// Boolean values.
    Predicate => Predicate, "pred";
    /// Signed 1-bit integers.
    S1 => S1, "s1";
    /// Signed 2-bit integers.
    S2 => S2, "s2";
    /// Signed 4-bit integers.
    S4 => S4, "s4";
    /// Signed 8-bit integers.
    S8 => S8, "s8";
    /// Signed 16-bit integers.
    S16 => S16, "s16";
    /// Signed 32-bit integers.
    S32 => S32, "s32";
    /// Signed 64-bit integers.
    S64 => S64, "s64";
    /// Unsigned 1-bit integers.
    U1 => U1, "u1";
    /// Unsigned 2-bit integers.
    U2 => U2, "u2";
    /// Unsigned 4-bit integers.
    U4 => U4, "u4";
    /// Unsigned 8-bit integers.
    U8 => U8, "u8";
    /// Unsigned 16-bit integers.
    U16 => U16, "u16";
    /// Unsigned 32-bit integers.
    U32 => U32, "u32";
    /// Unsigned 64-bit integers.
    U64 => U64, "u64";
    /// 4-bit microscaling floating-point values.
    F4E2M1FN => F4E2M1FN, "f4e2m1fn";
    F8E3M4 => F8E3M4, "f8e3m4";
    F8E4M3 => F8E4M3, "f8e4m3";
    F8E4M3FN => F8E4M3FN, "f8e4m3fn";
    F8E4M3FNUZ => F8E4M3FNUZ, "f8e4m3fnuz";
    F8E4M3B11FNUZ => F8E4M3B11FNUZ, "f8e4m3b11fnuz";
    F8E5M2 => F8E5M2, "f8e5m2";
    F8E5M2FNUZ => F8E5M2FNUZ, "f8e5m2fnuz";
    F8E8M0FNU => F8E8M0FNU, "f8e8m0fnu";
    /// Brain floating-point values.
    BF16 => BF16, "bf16";
    /// IEEE half-precision floating-point values.
    F16 => F16, "f16";
    /// IEEE single-precision floating-point values.
    F32 => F32, "f32";
    /// IEEE double-precision floating-point values.
    F64 => F64, "f64";
    /// Complex values made out of two [`ElementType::F32`] values.
    C64 => C64, "c64";
    /// Complex values made out of two [`ElementType::F64`] values.
    C128 => C128, "c128";
    /// Tokens threaded between side-effecting operations.
    Token => Token, "token";
    /// Opaque data passed to custom operations.
    Opaque => OpaqueType, "opaque";
}

impl Display for ElementType {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        write!(formatter, "{}", self.name())
    }
}

/// Describes how the values of an array are laid out in memory.
///
/// Layouts are assigned by the compiler after sharding decisions have been made and are therefore never part of the
/// shapes produced by the analyses in this crate.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Layout {
    minor_to_major: Vec<i64>,
    tiles: Vec<Vec<i64>>,
    memory_space: Option<i64>,
}

impl Layout {
    /// Creates a new [`Layout`] with the provided dimension ordering and no tiling.
    pub fn new(minor_to_major: Vec<i64>) -> Self {
        Self { minor_to_major, tiles: Vec::new(), memory_space: None }
    }

    /// Returns a copy of this [`Layout`] that uses the provided tiles.
    pub fn with_tiles(mut self, tiles: Vec<Vec<i64>>) -> Self {
        self.tiles = tiles;
        self
    }

    /// Returns a copy of this [`Layout`] that is placed in the provided memory space.
    pub fn with_memory_space(mut self, memory_space: i64) -> Self {
        self.memory_space = Some(memory_space);
        self
    }

    /// Dimension numbers ordered from the most minor to the most major.
    pub fn minor_to_major(&self) -> &[i64] {
        self.minor_to_major.as_slice()
    }

    /// Tile dimensions, with the outermost tiling first.
    pub fn tiles(&self) -> &[Vec<i64>] {
        self.tiles.as_slice()
    }

    /// Backend-specific memory space, if one was set.
    pub fn memory_space(&self) -> Option<i64> {
        self.memory_space
    }
}

impl Display for Layout {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        write!(formatter, "{{{}", join(&self.minor_to_major, ","))?;
        if !self.tiles.is_empty() || self.memory_space.is_some() {
            write!(formatter, ":")?;
        }
        for tile in &self.tiles {
            write!(formatter, "T({})", join(tile, ","))?;
        }
        if let Some(memory_space) = self.memory_space {
            write!(formatter, "S({memory_space})")?;
        }
        write!(formatter, "}}")
    }
}

impl From<&xla_protos::Layout> for Layout {
    fn from(proto: &xla_protos::Layout) -> Self {
        Self {
            minor_to_major: proto.minor_to_major.clone(),
            tiles: proto.tiles.iter().map(|tile| tile.dimensions.clone()).collect(),
            memory_space: proto.memory_space,
        }
    }
}

impl From<&Layout> for xla_protos::Layout {
    fn from(layout: &Layout) -> Self {
        Self {
            minor_to_major: layout.minor_to_major.clone(),
            tiles: layout.tiles.iter().map(|dimensions| xla_protos::Tile { dimensions: dimensions.clone() }).collect(),
            memory_space: layout.memory_space,
        }
    }
}

/// Shape of a (non-tuple) array value.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ArrayShape {
    element_type: ElementType,
    dimensions: Vec<usize>,
    dynamic_dimensions: Vec<bool>,
    layout: Option<Layout>,
}

impl ArrayShape {
    /// Creates a new statically-shaped [`ArrayShape`] with no [`Layout`].
    pub fn new(element_type: ElementType, dimensions: Vec<usize>) -> Self {
        let dynamic_dimensions = vec![false; dimensions.len()];
        Self { element_type, dimensions, dynamic_dimensions, layout: None }
    }

    /// Creates a new scalar [`ArrayShape`].
    pub fn scalar(element_type: ElementType) -> Self {
        Self::new(element_type, Vec::new())
    }

    /// Returns a copy of this [`ArrayShape`] in which the provided dimension is marked as dynamically-sized, meaning
    /// that its size is only an upper bound. Out-of-range dimensions are ignored.
    pub fn with_dynamic_dimension(mut self, dimension: usize) -> Self {
        if let Some(is_dynamic) = self.dynamic_dimensions.get_mut(dimension) {
            *is_dynamic = true;
        }
        self
    }

    /// Returns a copy of this [`ArrayShape`] that uses the provided [`Layout`].
    pub fn with_layout(mut self, layout: Layout) -> Self {
        self.layout = Some(layout);
        self
    }

    /// Returns a copy of this [`ArrayShape`] with the provided dimension sizes and the same dynamic dimension flags.
    /// The [`Layout`] of this shape is dropped because it may not be valid for the new dimensions.
    pub(crate) fn with_dimensions(&self, dimensions: Vec<usize>) -> Self {
        Self {
            element_type: self.element_type,
            dimensions,
            dynamic_dimensions: self.dynamic_dimensions.clone(),
            layout: None,
        }
    }

    /// Returns a copy of this [`ArrayShape`] without a [`Layout`].
    pub fn without_layout(&self) -> Self {
        Self { layout: None, ..self.clone() }
    }

    pub fn element_type(&self) -> ElementType {
        self.element_type
    }

    pub fn dimensions(&self) -> &[usize] {
        self.dimensions.as_slice()
    }

    pub fn rank(&self) -> usize {
        self.dimensions.len()
    }

    /// Returns `true` if the provided dimension is dynamically-sized.
    pub fn is_dynamic_dimension(&self, dimension: usize) -> bool {
        self.dynamic_dimensions.get(dimension).copied().unwrap_or(false)
    }

    pub fn layout(&self) -> Option<&Layout> {
        self.layout.as_ref()
    }
}

impl Display for ArrayShape {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        write!(formatter, "{}[", self.element_type)?;
        for (dimension, size) in self.dimensions.iter().enumerate() {
            if dimension > 0 {
                write!(formatter, ",")?;
            }
            if self.is_dynamic_dimension(dimension) {
                write!(formatter, "<=")?;
            }
            write!(formatter, "{size}")?;
        }
        write!(formatter, "]")?;
        if let Some(layout) = &self.layout {
            write!(formatter, "{layout}")?;
        }
        Ok(())
    }
}

/// Shape of a value in an HLO program, which is either an array or a tuple of other shapes.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Shape {
    Array(ArrayShape),
    Tuple(Vec<Shape>),
}

impl Shape {
    /// Creates a new statically-shaped array [`Shape`] with no [`Layout`].
    pub fn array(element_type: ElementType, dimensions: Vec<usize>) -> Self {
        Self::Array(ArrayShape::new(element_type, dimensions))
    }

    /// Creates a new tuple [`Shape`].
    pub fn tuple(elements: Vec<Shape>) -> Self {
        Self::Tuple(elements)
    }

    pub fn is_tuple(&self) -> bool {
        matches!(self, Self::Tuple(_))
    }

    /// Returns the element [`Shape`]s of this shape if it is a tuple, and [`None`] otherwise.
    pub fn tuple_shapes(&self) -> Option<&[Shape]> {
        match self {
            Self::Array(_) => None,
            Self::Tuple(elements) => Some(elements.as_slice()),
        }
    }

    /// Returns the sub-shape at the provided [`ShapeIndex`], if it exists.
    pub fn subshape(&self, index: &ShapeIndex) -> Option<&Shape> {
        index.iter().try_fold(self, |shape, component| {
            let component = usize::try_from(component).ok()?;
            shape.tuple_shapes()?.get(component)
        })
    }

    /// Returns `true` if this shape or any of its sub-shapes carries a [`Layout`].
    pub fn has_layout(&self) -> bool {
        match self {
            Self::Array(array) => array.layout.is_some(),
            Self::Tuple(elements) => elements.iter().any(Shape::has_layout),
        }
    }

    /// Returns a copy of this shape with the [`Layout`]s of all of its leaves cleared.
    pub fn without_layout(&self) -> Self {
        match self {
            Self::Array(array) => Self::Array(array.without_layout()),
            Self::Tuple(elements) => Self::Tuple(elements.iter().map(Shape::without_layout).collect()),
        }
    }
}

impl From<ArrayShape> for Shape {
    fn from(array: ArrayShape) -> Self {
        Self::Array(array)
    }
}

impl Display for Shape {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Array(array) => write!(formatter, "{array}"),
            Self::Tuple(elements) => {
                write!(formatter, "(")?;
                for (index, element) in elements.iter().enumerate() {
                    if index > 0 {
                        write!(formatter, ", ")?;
                    }
                    write!(formatter, "{element}")?;
                }
                write!(formatter, ")")
            }
        }
    }
}

impl TryFrom<&xla_protos::Shape> for Shape {
    type Error = Error;

    fn try_from(proto: &xla_protos::Shape) -> Result<Self, Self::Error> {
        let primitive_type = PrimitiveType::try_from(proto.element_type).map_err(|_| {
            Error::malformed_proto("shape", format!("unknown element type {}", proto.element_type))
        })?;
        let element_type = match ElementType::try_from(primitive_type) {
            Ok(element_type) => element_type,
            Err(PrimitiveType::Tuple) => {
                return proto.tuple_shapes.iter().map(Shape::try_from).collect::<Result<Vec<_>, _>>().map(Self::Tuple);
            }
            Err(PrimitiveType::Invalid) => return Err(Error::malformed_proto("shape", "element type is not set")),
            Err(primitive_type) => {
                return Err(Error::malformed_proto("shape", format!("unsupported element type {primitive_type:?}")));
            }
        };

        let dimensions = proto
            .dimensions
            .iter()
            .map(|&size| {
                usize::try_from(size)
                    .map_err(|_| Error::malformed_proto("shape", format!("negative dimension size {size}")))
            })
            .collect::<Result<Vec<_>, _>>()?;
        let dynamic_dimensions = if proto.is_dynamic_dimension.is_empty() {
            vec![false; dimensions.len()]
        } else if proto.is_dynamic_dimension.len() == dimensions.len() {
            proto.is_dynamic_dimension.clone()
        } else {
            return Err(Error::malformed_proto(
                "shape",
                format!(
                    "got {} dynamic dimension flags for {} dimensions",
                    proto.is_dynamic_dimension.len(),
                    dimensions.len(),
                ),
            ));
        };
        let layout = proto.layout.as_deref().map(Layout::from);
        Ok(Self::Array(ArrayShape { element_type, dimensions, dynamic_dimensions, layout }))
    }
}

impl From<&Shape> for xla_protos::Shape {
    fn from(shape: &Shape) -> Self {
        match shape {
            Shape::Array(array) => Self {
                element_type: PrimitiveType::from(array.element_type) as i32,
                dimensions: array.dimensions.iter().map(|&size| size as i64).collect(),
                is_dynamic_dimension: array.dynamic_dimensions.clone(),
                tuple_shapes: Vec::new(),
                layout: array.layout.as_ref().map(|layout| Box::new(layout.into())),
            },
            Shape::Tuple(elements) => Self {
                element_type: PrimitiveType::Tuple as i32,
                dimensions: Vec::new(),
                is_dynamic_dimension: Vec::new(),
                tuple_shapes: elements.iter().map(Self::from).collect(),
                layout: None,
            },
        }
    }
}

/// Path into a (possibly nested) tuple [`Shape`], where each component selects an element of a tuple. The empty index
/// refers to the whole shape.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShapeIndex(Vec<i64>);

impl ShapeIndex {
    /// Creates a new [`ShapeIndex`] from its components.
    pub fn new(components: Vec<i64>) -> Self {
        Self(components)
    }

    /// Returns the empty [`ShapeIndex`], which refers to the whole shape.
    pub fn root() -> Self {
        Self(Vec::new())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns the first component of this index, which selects an element of the outermost tuple.
    pub fn first(&self) -> Option<i64> {
        self.0.first().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = i64> + '_ {
        self.0.iter().copied()
    }

    pub fn as_slice(&self) -> &[i64] {
        self.0.as_slice()
    }
}

impl From<Vec<i64>> for ShapeIndex {
    fn from(components: Vec<i64>) -> Self {
        Self(components)
    }
}

impl<const N: usize> From<[i64; N]> for ShapeIndex {
    fn from(components: [i64; N]) -> Self {
        Self(components.to_vec())
    }
}

impl FromIterator<i64> for ShapeIndex {
    fn from_iter<I: IntoIterator<Item = i64>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl Display for ShapeIndex {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        write!(formatter, "{{{}}}", join(&self.0, ","))
    }
}

pub(crate) fn join<T: Display>(values: &[T], separator: &str) -> String {
    values.iter().map(ToString::to_string).collect::<Vec<_>>().join(separator)
}
