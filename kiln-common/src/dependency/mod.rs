// kiln-common/src/dependency/mod.rs
pub mod definition;
pub mod resolver;

pub use definition::{Dependency, DependencyExt, DependencyTag, Phase};
pub use resolver::{
    DependencyResolver, DependencySet, ResolutionContext, ResolutionStatus, ResolvedDependency,
};
