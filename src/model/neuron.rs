//! Neuron populations and their models.

use serde::{Deserialize, Serialize};

/// Access pattern of a state variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum VarAccess {
    /// Read and written by the owning snippet
    #[default]
    ReadWrite,
    /// Read-only in the owning snippet
    ReadOnly,
    /// Reduction target: left undeclared so a missing assignment in the
    /// user snippet triggers a compiler warning in the generated source
    Reduce,
}

/// A named state variable with its snippet-level type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Variable {
    pub name: String,
    /// Snippet type string, e.g. `"scalar"` or `"unsigned int"`
    pub ty: String,
    #[serde(default)]
    pub access: VarAccess,
}

impl Variable {
    pub fn new(name: &str, ty: &str) -> Self {
        Self { name: name.to_string(), ty: ty.to_string(), access: VarAccess::ReadWrite }
    }
}

/// An extra global parameter: a user-owned array or scalar exposed to
/// snippets by name and shipped to device on demand.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExtraGlobalParam {
    pub name: String,
    /// Element type string; EGPs are always pointer-shaped on device
    pub ty: String,
}

/// A neuron model: code snippets plus parameter and variable declarations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct NeuronModel {
    pub name: String,
    #[serde(default)]
    pub param_names: Vec<String>,
    #[serde(default)]
    pub derived_param_names: Vec<String>,
    #[serde(default)]
    pub vars: Vec<Variable>,
    #[serde(default)]
    pub extra_global_params: Vec<ExtraGlobalParam>,
    /// Per-timestep update, run for every neuron
    #[serde(default)]
    pub sim_code: String,
    /// Spike condition; empty means the population never emits true spikes
    #[serde(default)]
    pub threshold_condition_code: String,
    /// Run after a spike is emitted
    #[serde(default)]
    pub reset_code: String,
}

/// A population of neurons sharing one model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NeuronGroup {
    pub name: String,
    pub num_neurons: u32,
    pub model: NeuronModel,
    /// Values parallel to `model.param_names`
    #[serde(default)]
    pub param_values: Vec<f64>,
    /// Values parallel to `model.derived_param_names`
    #[serde(default)]
    pub derived_param_values: Vec<f64>,
    /// Init snippets parallel to `model.vars`; each assigns `$(value)`,
    /// empty means uninitialised
    #[serde(default)]
    pub var_initialisers: Vec<String>,

    /// Spikes feed delayed queues of this many slots
    #[serde(default)]
    pub delay_required: bool,
    #[serde(default = "default_one")]
    pub num_delay_slots: u32,

    #[serde(default)]
    pub sim_rng_required: bool,
    #[serde(default)]
    pub init_rng_required: bool,
    #[serde(default)]
    pub spike_time_required: bool,
    #[serde(default)]
    pub prev_spike_time_required: bool,
    #[serde(default)]
    pub spike_event_required: bool,
    #[serde(default)]
    pub spike_event_time_required: bool,
    #[serde(default)]
    pub prev_spike_event_time_required: bool,
    #[serde(default)]
    pub spike_recording_enabled: bool,
    #[serde(default)]
    pub spike_event_recording_enabled: bool,
    /// Whether any outgoing projection consumes true spikes (spike queues
    /// must then honour delay slots)
    #[serde(default = "default_true")]
    pub true_spike_required: bool,
}

fn default_one() -> u32 {
    1
}

fn default_true() -> bool {
    true
}

impl NeuronGroup {
    /// The number of delay slots the spike queue carries; 1 when undelayed.
    pub fn delay_slots(&self) -> u32 {
        if self.delay_required { self.num_delay_slots } else { 1 }
    }

    /// Whether the population can emit true spikes at all.
    pub fn emits_true_spikes(&self) -> bool {
        !self.model.threshold_condition_code.is_empty()
    }

    /// Whether the spike-queue-reset kernel must maintain previous spike or
    /// spike-event times for this population.
    pub fn needs_prev_time_update(&self) -> bool {
        self.prev_spike_time_required || self.prev_spike_event_time_required
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lif() -> NeuronGroup {
        NeuronGroup {
            name: "Exc".to_string(),
            num_neurons: 100,
            model: NeuronModel {
                name: "LIF".to_string(),
                param_names: vec!["tau".to_string()],
                vars: vec![Variable::new("V", "scalar")],
                sim_code: "$(V) += ($(Isyn) - $(V)) * DT / $(tau);".to_string(),
                threshold_condition_code: "$(V) >= 1.0".to_string(),
                reset_code: "$(V) = 0.0;".to_string(),
                ..Default::default()
            },
            param_values: vec![20.0],
            derived_param_values: vec![],
            var_initialisers: vec!["$(value) = 0.0;".to_string()],
            delay_required: false,
            num_delay_slots: 1,
            sim_rng_required: false,
            init_rng_required: false,
            spike_time_required: false,
            prev_spike_time_required: false,
            spike_event_required: false,
            spike_event_time_required: false,
            prev_spike_event_time_required: false,
            spike_recording_enabled: false,
            spike_event_recording_enabled: false,
            true_spike_required: true,
        }
    }

    #[test]
    fn test_delay_slots() {
        let mut group = lif();
        assert_eq!(group.delay_slots(), 1);
        group.delay_required = true;
        group.num_delay_slots = 7;
        assert_eq!(group.delay_slots(), 7);
    }

    #[test]
    fn test_emits_true_spikes() {
        let mut group = lif();
        assert!(group.emits_true_spikes());
        group.model.threshold_condition_code.clear();
        assert!(!group.emits_true_spikes());
    }

    #[test]
    fn test_serde_round_trip() {
        let group = lif();
        let json = serde_json::to_string(&group).unwrap();
        let back: NeuronGroup = serde_json::from_str(&json).unwrap();
        assert_eq!(group, back);
    }
}
