//! The model graph: populations, projections, current sources and custom
//! updates, as handed to the generator.
//!
//! The graph is read-only to the rest of the crate. Groups reference each
//! other by name; [`NetworkModel`] provides the indexed lookups and the
//! whole-model properties (precision, timestep, batch size) the emitters
//! consult.

pub mod current_source;
pub mod custom_update;
pub mod neuron;
pub mod synapse;

pub use current_source::{CurrentSource, CurrentSourceModel};
pub use custom_update::{CustomUpdate, CustomUpdateModel, CustomWuUpdate, VarRef, VarRefDecl};
pub use neuron::{ExtraGlobalParam, NeuronGroup, NeuronModel, VarAccess, Variable};
pub use synapse::{
    code_requires_rng, ConnectivityInit, MatrixConnectivity, MatrixType, MatrixWeight,
    PostsynapticModel, SpanType, SynapseGroup, WeightUpdateModel,
};

use crate::frontend::types::{NumericType, TypeContext};
use crate::utils::errors::{ModelError, ModelErrorKind};
use serde::{Deserialize, Serialize};

/// The model's floating point width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Precision {
    #[default]
    Float,
    Double,
}

impl Precision {
    /// The C name emitted for this precision.
    pub fn name(self) -> &'static str {
        match self {
            Precision::Float => "float",
            Precision::Double => "double",
        }
    }

    /// The numeric type the scanner binds `scalar` to.
    pub fn numeric(self) -> NumericType {
        match self {
            Precision::Float => NumericType::Float,
            Precision::Double => NumericType::Double,
        }
    }
}

/// The whole model graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkModel {
    pub name: String,
    /// Simulation timestep
    pub dt: f64,
    #[serde(default)]
    pub precision: Precision,
    #[serde(default)]
    pub time_precision: Precision,
    #[serde(default = "default_one")]
    pub batch_size: u32,
    #[serde(default)]
    pub seed: u64,
    #[serde(default)]
    pub neuron_groups: Vec<NeuronGroup>,
    #[serde(default)]
    pub synapse_groups: Vec<SynapseGroup>,
    #[serde(default)]
    pub current_sources: Vec<CurrentSource>,
    #[serde(default)]
    pub custom_updates: Vec<CustomUpdate>,
    #[serde(default)]
    pub custom_wu_updates: Vec<CustomWuUpdate>,
}

fn default_one() -> u32 {
    1
}

impl NetworkModel {
    /// An empty model with the given name and timestep.
    pub fn new(name: &str, dt: f64) -> Self {
        Self {
            name: name.to_string(),
            dt,
            precision: Precision::Float,
            time_precision: Precision::Double,
            batch_size: 1,
            seed: 0,
            neuron_groups: Vec::new(),
            synapse_groups: Vec::new(),
            current_sources: Vec::new(),
            custom_updates: Vec::new(),
            custom_wu_updates: Vec::new(),
        }
    }

    /// Look up a neuron group by name.
    pub fn neuron_group(&self, name: &str) -> Result<&NeuronGroup, ModelError> {
        self.neuron_groups
            .iter()
            .find(|g| g.name == name)
            .ok_or_else(|| ModelError::unknown_group(name))
    }

    /// Look up a synapse group by name.
    pub fn synapse_group(&self, name: &str) -> Result<&SynapseGroup, ModelError> {
        self.synapse_groups
            .iter()
            .find(|g| g.name == name)
            .ok_or_else(|| ModelError::unknown_group(name))
    }

    /// Source population of a projection.
    pub fn src_of<'m>(&'m self, sg: &SynapseGroup) -> Result<&'m NeuronGroup, ModelError> {
        self.neuron_group(&sg.src)
    }

    /// Target population of a projection.
    pub fn trg_of<'m>(&'m self, sg: &SynapseGroup) -> Result<&'m NeuronGroup, ModelError> {
        self.neuron_group(&sg.trg)
    }

    /// Projections whose source is the given population.
    pub fn out_syn_of<'m>(&'m self, ng: &NeuronGroup) -> Vec<&'m SynapseGroup> {
        self.synapse_groups.iter().filter(|s| s.src == ng.name).collect()
    }

    /// Projections whose target is the given population.
    pub fn in_syn_of<'m>(&'m self, ng: &NeuronGroup) -> Vec<&'m SynapseGroup> {
        self.synapse_groups.iter().filter(|s| s.trg == ng.name).collect()
    }

    /// Current sources attached to the given population.
    pub fn current_sources_of<'m>(&'m self, ng: &NeuronGroup) -> Vec<&'m CurrentSource> {
        self.current_sources.iter().filter(|c| c.target == ng.name).collect()
    }

    /// The scanner type context for this model: `scalar` bound to the
    /// model's precision, `timepoint` to the time precision.
    pub fn type_context(&self) -> TypeContext {
        TypeContext::for_model(self.precision.numeric(), self.time_precision.numeric())
    }

    /// Check name uniqueness and that every reference resolves.
    pub fn validate(&self) -> Result<(), ModelError> {
        let mut seen = ahash::AHashSet::new();
        for name in self
            .neuron_groups
            .iter()
            .map(|g| &g.name)
            .chain(self.synapse_groups.iter().map(|g| &g.name))
            .chain(self.current_sources.iter().map(|c| &c.name))
            .chain(self.custom_updates.iter().map(|c| &c.name))
            .chain(self.custom_wu_updates.iter().map(|c| &c.name))
        {
            if !seen.insert(name.as_str()) {
                return Err(ModelError {
                    message: format!("duplicate group name '{}'", name),
                    kind: ModelErrorKind::DuplicateGroup,
                });
            }
        }

        for sg in &self.synapse_groups {
            self.neuron_group(&sg.src)?;
            self.neuron_group(&sg.trg)?;
            if sg.matrix.is_sparse() && sg.max_connections == 0 {
                return Err(ModelError {
                    message: format!("sparse synapse group '{}' has no max connections", sg.name),
                    kind: ModelErrorKind::InvalidGroup,
                });
            }
        }
        for cs in &self.current_sources {
            self.neuron_group(&cs.target)?;
        }
        for cu in &self.custom_updates {
            self.neuron_group(&cu.target)?;
        }
        for cw in &self.custom_wu_updates {
            self.synapse_group(&cw.synapse_group)?;
        }
        Ok(())
    }

    /// Whether the dynamics-order remap (`synRemap`) must exist for a
    /// projection: synapse dynamics or a synapse-shaped custom update walk
    /// it.
    pub fn is_syn_remap_required(&self, sg: &SynapseGroup) -> bool {
        sg.has_synapse_dynamics_code()
            || self.custom_wu_updates.iter().any(|c| c.synapse_group == sg.name)
    }

    /// Whether any population records spikes or spike-like events.
    pub fn is_recording_in_use(&self) -> bool {
        self.neuron_groups
            .iter()
            .any(|n| n.spike_recording_enabled || n.spike_event_recording_enabled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_catches_dangling_reference() {
        let mut model = NetworkModel::new("net", 0.1);
        model.synapse_groups.push(SynapseGroup {
            name: "bad".to_string(),
            src: "missing".to_string(),
            trg: "missing".to_string(),
            matrix: MatrixType::new(MatrixConnectivity::Dense, MatrixWeight::Global),
            span_type: SpanType::Postsynaptic,
            max_connections: 0,
            max_source_connections: 0,
            delay_steps: 0,
            back_prop_delay_steps: 0,
            dendritic_delay_required: false,
            max_dendritic_delay_timesteps: 1,
            num_threads_per_spike: 1,
            kernel_size: vec![],
            wu_model: WeightUpdateModel::default(),
            wu_param_values: vec![],
            wu_derived_param_values: vec![],
            wu_var_initialisers: vec![],
            wu_global_var_values: vec![],
            ps_model: PostsynapticModel::default(),
            ps_param_values: vec![],
            connectivity_init: ConnectivityInit::default(),
        });
        assert!(model.validate().is_err());
    }

    #[test]
    fn test_precision_names() {
        assert_eq!(Precision::Float.name(), "float");
        assert_eq!(Precision::Double.name(), "double");
    }
}
