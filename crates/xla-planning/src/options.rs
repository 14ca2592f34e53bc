use crate::sharding::TileShaper;

/// Determines how [`TileShaper`] handles dimensions that are not divisible by the number of tiles they are split into.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum TilingMode {
    /// Shards are padded so that every shard has size `ceil(size / tiles)`. This matches how XLA computes shard shapes.
    #[default]
    Padded,

    /// Every tiled dimension must be divisible by its number of tiles.
    Exact,
}

/// Determines what happens when more than one parameter instruction of the entry computation has the same
/// parameter number.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum DuplicateParameterPolicy {
    /// The shape resolved for the last such instruction wins.
    #[default]
    Overwrite,

    /// Fail with [`Error::DuplicateParameterIndex`](crate::errors::Error::DuplicateParameterIndex).
    Reject,
}

/// Options for the program analyses in this crate.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct AnalysisOptions {
    pub tiling_mode: TilingMode,
    pub duplicate_parameter_policy: DuplicateParameterPolicy,
}

impl AnalysisOptions {
    pub fn with_tiling_mode(mut self, tiling_mode: TilingMode) -> Self {
        self.tiling_mode = tiling_mode;
        self
    }

    pub fn with_duplicate_parameter_policy(mut self, duplicate_parameter_policy: DuplicateParameterPolicy) -> Self {
        self.duplicate_parameter_policy = duplicate_parameter_policy;
        self
    }

    /// Returns the [`TileShaper`] configured by these options.
    pub fn tiler(&self) -> TileShaper {
        TileShaper::new(self.tiling_mode)
    }
}
