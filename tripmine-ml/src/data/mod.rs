//! Examples, triplets, triplet datasets and batching.

pub mod dataset;
pub mod examples;
pub mod loader;
pub mod synthetic;
pub mod triplet;

pub use dataset::{TripletDataset, TripletSample};
pub use examples::Examples;
pub use loader::{EpochBatches, TripletLoader};
pub use synthetic::SyntheticClusters;
pub use triplet::{Triplet, TripletSnapshot};
