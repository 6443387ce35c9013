pub mod flat;
pub mod kmeans;

pub use flat::FlatIpIndex;
pub use kmeans::{l2_kmeans, KMeansConfig, KMeansResult};
