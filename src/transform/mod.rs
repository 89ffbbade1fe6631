//! Transformer plugins
//!
//! The plugin contract, the registry that maps file paths to plugins, and
//! the built-in plugin loader.

pub mod builtin;
mod plugin;
mod registry;

pub use builtin::BuiltinLoader;
pub use plugin::{
    CacheKeySource, CallerCapabilities, PluginLoader, PluginModule, Process, ProcessAsync,
    ProcessOutput, ResolvedTransformer, TransformOptions, Transformed, TransformerCapabilities,
    TransformerFactory,
};
pub use registry::{TransformRule, TransformerRegistry};
