// kiln-core/src/check/mod.rs
pub mod conflicts;
pub mod smoke;

pub use conflicts::check_conflicts;
pub use smoke::{run_smoke_test, SmokeOutcome};
