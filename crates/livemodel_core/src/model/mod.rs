//! Model definitions, hooks and the model registry.

mod hooks;
mod registry;

pub use hooks::{default_primary_key, DefaultHooks, ModelHooks};
pub use registry::ModelDef;
pub(crate) use registry::{Model, ModelRegistry};
