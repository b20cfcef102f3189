//! Synaptic projections between neuron populations.

use crate::model::neuron::{ExtraGlobalParam, Variable};
use serde::{Deserialize, Serialize};

/// How connectivity between the two populations is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MatrixConnectivity {
    /// Every pre/post pair has a synapse
    Dense,
    /// Ragged row-major lists with a row stride
    Sparse,
    /// One bit per pre/post pair, high-bit-first words
    Bitmask,
    /// Connectivity regenerated on the fly from the build snippet
    Procedural,
    /// Weights shared through a convolution-style kernel tensor
    Kernel,
}

/// How synaptic weights are stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MatrixWeight {
    /// One weight per synapse
    Individual,
    /// Individual weights plus a per-synapse postsynaptic state
    IndividualPsm,
    /// A single weight shared by the whole projection
    Global,
}

/// The (connectivity, weight) pair describing a projection's storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MatrixType {
    pub connectivity: MatrixConnectivity,
    pub weight: MatrixWeight,
}

impl MatrixType {
    pub const fn new(connectivity: MatrixConnectivity, weight: MatrixWeight) -> Self {
        Self { connectivity, weight }
    }

    pub fn is_sparse(self) -> bool {
        self.connectivity == MatrixConnectivity::Sparse
    }

    pub fn is_dense(self) -> bool {
        self.connectivity == MatrixConnectivity::Dense
    }

    pub fn is_bitmask(self) -> bool {
        self.connectivity == MatrixConnectivity::Bitmask
    }

    pub fn is_procedural(self) -> bool {
        self.connectivity == MatrixConnectivity::Procedural
    }

    pub fn has_individual_weights(self) -> bool {
        matches!(self.weight, MatrixWeight::Individual | MatrixWeight::IndividualPsm)
    }
}

/// Which side of the projection the presynaptic update parallelises over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum SpanType {
    /// One thread per postsynaptic target
    #[default]
    Postsynaptic,
    /// One thread (or a few) per presynaptic spike
    Presynaptic,
}

/// A weight update model: snippets run at spikes, events, post-spikes and
/// per-timestep dynamics, plus variable declarations on all three sides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct WeightUpdateModel {
    pub name: String,
    #[serde(default)]
    pub param_names: Vec<String>,
    #[serde(default)]
    pub derived_param_names: Vec<String>,
    #[serde(default)]
    pub vars: Vec<Variable>,
    #[serde(default)]
    pub pre_vars: Vec<Variable>,
    #[serde(default)]
    pub post_vars: Vec<Variable>,
    #[serde(default)]
    pub extra_global_params: Vec<ExtraGlobalParam>,
    /// Run per true presynaptic spike
    #[serde(default)]
    pub sim_code: String,
    /// Run per spike-like event
    #[serde(default)]
    pub event_code: String,
    /// Condition deciding whether a presynaptic neuron produces an event
    #[serde(default)]
    pub event_threshold_condition_code: String,
    /// Run per postsynaptic spike (back-propagated learning)
    #[serde(default)]
    pub learn_post_code: String,
    /// Run every timestep for every live synapse
    #[serde(default)]
    pub synapse_dynamics_code: String,
    /// Run per presynaptic spike on presynaptic variables
    #[serde(default)]
    pub pre_spike_code: String,
    /// Run every timestep on presynaptic variables
    #[serde(default)]
    pub pre_dynamics_code: String,
    /// Run per postsynaptic spike on postsynaptic variables
    #[serde(default)]
    pub post_spike_code: String,
    /// Run every timestep on postsynaptic variables
    #[serde(default)]
    pub post_dynamics_code: String,
}

/// A postsynaptic model shaping how accumulated input enters the target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct PostsynapticModel {
    pub name: String,
    #[serde(default)]
    pub param_names: Vec<String>,
    #[serde(default)]
    pub vars: Vec<Variable>,
    #[serde(default)]
    pub apply_input_code: String,
    #[serde(default)]
    pub decay_code: String,
}

/// Connectivity initialiser: a row- and/or column-building snippet invoked
/// once per source (respectively target) neuron.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ConnectivityInit {
    pub name: String,
    #[serde(default)]
    pub param_names: Vec<String>,
    #[serde(default)]
    pub param_values: Vec<f64>,
    #[serde(default)]
    pub row_build_code: String,
    #[serde(default)]
    pub col_build_code: String,
    /// Host-side RNG needed to derive the initialiser's parameters
    #[serde(default)]
    pub host_init_rng_required: bool,
}

impl ConnectivityInit {
    pub fn has_build_code(&self) -> bool {
        !self.row_build_code.is_empty() || !self.col_build_code.is_empty()
    }
}

/// Whether a snippet draws from the per-thread random stream.
pub fn code_requires_rng(code: &str) -> bool {
    code.contains("$(rng_")
}

/// A projection between two neuron populations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynapseGroup {
    pub name: String,
    /// Source population name
    pub src: String,
    /// Target population name
    pub trg: String,
    pub matrix: MatrixType,
    #[serde(default)]
    pub span_type: SpanType,
    /// Maximum row length (max outgoing connections per source neuron)
    pub max_connections: u32,
    /// Maximum column length (max incoming connections per target neuron)
    #[serde(default)]
    pub max_source_connections: u32,
    /// Axonal delay in timesteps applied to presynaptic spikes
    #[serde(default)]
    pub delay_steps: u32,
    /// Delay applied to back-propagated postsynaptic spikes
    #[serde(default)]
    pub back_prop_delay_steps: u32,
    #[serde(default)]
    pub dendritic_delay_required: bool,
    #[serde(default = "default_one")]
    pub max_dendritic_delay_timesteps: u32,
    /// Threads cooperating on one presynaptic spike (presynaptic span only)
    #[serde(default = "default_one")]
    pub num_threads_per_spike: u32,
    /// Kernel tensor shape for `MatrixConnectivity::Kernel` weights
    #[serde(default)]
    pub kernel_size: Vec<u32>,

    pub wu_model: WeightUpdateModel,
    #[serde(default)]
    pub wu_param_values: Vec<f64>,
    #[serde(default)]
    pub wu_derived_param_values: Vec<f64>,
    /// Init snippets parallel to `wu_model.vars`
    #[serde(default)]
    pub wu_var_initialisers: Vec<String>,
    /// Constant values parallel to `wu_model.vars`, used when the weight
    /// type is `MatrixWeight::Global`
    #[serde(default)]
    pub wu_global_var_values: Vec<f64>,

    pub ps_model: PostsynapticModel,
    #[serde(default)]
    pub ps_param_values: Vec<f64>,

    #[serde(default)]
    pub connectivity_init: ConnectivityInit,
}

fn default_one() -> u32 {
    1
}

impl SynapseGroup {
    /// Whether true presynaptic spikes drive this projection.
    pub fn is_true_spike_required(&self) -> bool {
        !self.wu_model.sim_code.is_empty()
    }

    /// Whether spike-like events drive this projection.
    pub fn is_spike_event_required(&self) -> bool {
        !self.wu_model.event_code.is_empty()
    }

    /// Whether the postsynaptic learning kernel runs for this projection.
    pub fn has_learn_post_code(&self) -> bool {
        !self.wu_model.learn_post_code.is_empty()
    }

    /// Whether the synapse dynamics kernel runs for this projection.
    pub fn has_synapse_dynamics_code(&self) -> bool {
        !self.wu_model.synapse_dynamics_code.is_empty()
    }

    /// Whether weight-update variables need device initialisation.
    pub fn is_wu_var_init_required(&self) -> bool {
        self.matrix.has_individual_weights()
            && self.wu_var_initialisers.iter().any(|code| !code.is_empty())
    }

    /// Whether an init-time RNG stream is needed for weight-update variables.
    pub fn is_wu_init_rng_required(&self) -> bool {
        self.wu_var_initialisers.iter().any(|code| code_requires_rng(code))
    }

    /// Whether procedural connectivity regeneration draws random numbers.
    pub fn is_procedural_connectivity_rng_required(&self) -> bool {
        self.matrix.is_procedural()
            && (code_requires_rng(&self.connectivity_init.row_build_code)
                || code_requires_rng(&self.connectivity_init.col_build_code))
    }

    /// Name of the postsynaptic-model target; dendritic delay pointers and
    /// `inSyn` accumulators are keyed by this.
    pub fn ps_target_name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matrix_type_predicates() {
        let sparse = MatrixType::new(MatrixConnectivity::Sparse, MatrixWeight::Individual);
        assert!(sparse.is_sparse());
        assert!(sparse.has_individual_weights());

        let global_dense = MatrixType::new(MatrixConnectivity::Dense, MatrixWeight::Global);
        assert!(global_dense.is_dense());
        assert!(!global_dense.has_individual_weights());
    }

    #[test]
    fn test_rng_detection() {
        assert!(code_requires_rng("$(value) = $(rng_uniform) * 2.0;"));
        assert!(!code_requires_rng("$(value) = 0.5;"));
    }

    #[test]
    fn test_connectivity_has_build_code() {
        let mut init = ConnectivityInit::default();
        assert!(!init.has_build_code());
        init.row_build_code = "$(addSynapse, $(id_post_begin));".to_string();
        assert!(init.has_build_code());
    }
}
