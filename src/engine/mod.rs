pub mod engine;
pub mod graph;
pub mod mastery;
pub mod persistence;
pub mod recommend;
pub mod strategy;
pub mod types;
pub mod verification;

pub use engine::TutorEngine;
pub use graph::TenantGraph;
pub use verification::VerificationLedger;
#[allow(unused_imports)]
pub use types::*;
