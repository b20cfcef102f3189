//! # SpikeGen - Spiking Neural Network Code Generator
//!
//! A code generator that compiles a high-level description of a spiking
//! neural network — populations of neurons, synaptic projections, current
//! sources and custom update hooks — into source code for a SIMT
//! accelerator, including:
//! - Group merging, so one kernel body serves many populations
//! - Eight device kernels (neuron update, spike queue reset, presynaptic
//!   and postsynaptic updates, synapse dynamics, initialisation, sparse
//!   initialisation, custom updates)
//! - A host runner handling allocation, transfer and time stepping
//! - Pluggable presynaptic update strategies
//!
//! ## Architecture
//!
//! ```text
//! NetworkModel → Planner → MergedModel → Kernel + Runner emitters → Sources
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use spikegen::prelude::*;
//!
//! let model: NetworkModel = serde_json::from_str(&description)?;
//! let backend = ReferenceBackend::new(Preferences::default());
//! let sources = spikegen::generate(&model, &backend)?;
//! for (name, content) in sources.files() {
//!     std::fs::write(out_dir.join(name), content)?;
//! }
//! ```

#![warn(clippy::all)]

pub mod codegen;
pub mod frontend;
pub mod merge;
pub mod model;
pub mod subst;
pub mod utils;

// Re-export commonly used types
pub mod prelude {
    //! Convenient re-exports of commonly used types and traits.

    pub use crate::codegen::{
        generate, GeneratedSources, Kernel, Preferences, ReferenceBackend, SimtBackend,
        StrategyRegistry,
    };
    pub use crate::frontend::{
        common_type, parse_numeric, promoted_type, scan_source, NumericType, TypeContext,
    };
    pub use crate::merge::{merge_model, MergedModel};
    pub use crate::model::{
        CurrentSource, CustomUpdate, CustomWuUpdate, MatrixConnectivity, MatrixType, MatrixWeight,
        NetworkModel, NeuronGroup, NeuronModel, Precision, SpanType, SynapseGroup,
        WeightUpdateModel,
    };
    pub use crate::subst::Substitutions;
    pub use crate::utils::errors::*;
}

pub use codegen::{generate, GeneratedSources};
pub use model::NetworkModel;

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
