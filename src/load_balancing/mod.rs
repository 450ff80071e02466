pub mod balancer;
pub mod strategies;

pub use balancer::{SelectionStrategy, StrategyManager};
pub use strategies::LoadBalancingAlgorithm;
