//! Online hard-negative mining: a bounded hardness pool and the sampler that feeds it.

pub mod pool;
pub mod sampler;

pub use pool::{HardPool, HardRecord};
pub use sampler::{HardNegativeSampler, HardnessPolicy, TripletObservation};
