pub mod aliasing;
pub mod donation;
pub mod errors;
pub mod extraction;
pub mod options;
pub mod programs;
pub mod resolver;
pub mod shapes;
pub mod sharding;
