//! Resolution of (unsharded) shapes to the shapes of the individual shards that each device holds.

use tracing::trace;

use crate::errors::Error;
use crate::programs::Instruction;
use crate::shapes::Shape;
use crate::sharding::{Sharding, Tiling};

/// Returns the shape of each shard of a value with shape `shape` that is sharded using `sharding`.
///
/// Tuple shardings are resolved element-wise against the elements of the (tuple) shape, stopping at the first
/// element that fails to resolve, while leaf shardings are delegated to `tiling`. The returned shape never carries
/// a [`Layout`](crate::shapes::Layout), since layouts of per-device buffers are assigned separately.
pub fn resolve_sharded_shape<T: Tiling + ?Sized>(
    shape: &Shape,
    sharding: &Sharding,
    tiling: &T,
) -> Result<Shape, Error> {
    match sharding {
        Sharding::Tuple(element_shardings) => {
            let Shape::Tuple(element_shapes) = shape else {
                return Err(Error::ShapeMismatch { sharding: sharding.to_string(), shape: shape.to_string() });
            };
            if element_shardings.len() != element_shapes.len() {
                return Err(Error::ArityMismatch {
                    sharding_arity: element_shardings.len(),
                    shape_arity: element_shapes.len(),
                    sharding: sharding.to_string(),
                    shape: shape.to_string(),
                });
            }
            element_shapes
                .iter()
                .zip(element_shardings)
                .map(|(element_shape, element_sharding)| resolve_sharded_shape(element_shape, element_sharding, tiling))
                .collect::<Result<Vec<_>, _>>()
                .map(Shape::Tuple)
        }
        Sharding::Leaf(leaf) => tiling
            .tile(shape, leaf)
            .map(|tiled_shape| tiled_shape.without_layout())
            .map_err(|source| Error::Tiling { shape: shape.to_string(), sharding: sharding.to_string(), source }),
    }
}

/// Returns the per-shard shape of the value produced by `instruction`. Instructions without a sharding annotation
/// are not sharded and so their shape is returned as is (but without a layout).
pub fn resolve_instruction_sharded_shape<T: Tiling + ?Sized>(
    instruction: &Instruction,
    tiling: &T,
) -> Result<Shape, Error> {
    let shape = match instruction.sharding()? {
        Some(sharding) => resolve_sharded_shape(instruction.shape(), sharding, tiling)?,
        None => instruction.shape().without_layout(),
    };
    trace!(instruction = instruction.name(), shape = %shape, "resolved sharded instruction shape");
    Ok(shape)
}
