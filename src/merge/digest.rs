//! Structural fingerprints driving the merge decision.
//!
//! Two entities land in the same merged group exactly when their digests
//! for a purpose are equal. A digest must therefore capture every
//! structural decision that affects the emitted code for that purpose —
//! model identity, matrix shape, delay configuration, child entities —
//! while excluding everything resolved through the field indirection
//! table (sizes, pointer bases, parameter values).

use crate::model::{
    CurrentSource, CustomUpdate, CustomUpdateModel, CustomWuUpdate, NetworkModel, NeuronGroup,
    NeuronModel, PostsynapticModel, SynapseGroup, WeightUpdateModel,
};
use ahash::RandomState;
use std::hash::{BuildHasher, Hash, Hasher};

// Fixed keys so digests are stable within a generation run
const DIGEST_KEYS: (u64, u64, u64, u64) =
    (0x5f35_6495_13b0_3a19, 0x9b5e_8a2f_71c4_d6e3, 0x2d99_7745_0e5c_1b88, 0xc1f6_4a0d_92b3_577a);

/// An accumulating structural hash.
pub struct Digest {
    hasher: ahash::AHasher,
}

impl Digest {
    pub fn new() -> Self {
        let state = RandomState::with_seeds(DIGEST_KEYS.0, DIGEST_KEYS.1, DIGEST_KEYS.2, DIGEST_KEYS.3);
        Self { hasher: state.build_hasher() }
    }

    pub fn update<T: Hash + ?Sized>(&mut self, value: &T) {
        value.hash(&mut self.hasher);
    }

    pub fn finish(self) -> u64 {
        self.hasher.finish()
    }
}

impl Default for Digest {
    fn default() -> Self {
        Self::new()
    }
}

fn hash_neuron_model(m: &NeuronModel, d: &mut Digest) {
    d.update(&m.name);
    d.update(&m.param_names);
    d.update(&m.derived_param_names);
    d.update(&m.vars);
    d.update(&m.extra_global_params);
    d.update(&m.sim_code);
    d.update(&m.threshold_condition_code);
    d.update(&m.reset_code);
}

fn hash_wu_model(m: &WeightUpdateModel, d: &mut Digest) {
    d.update(&m.name);
    d.update(&m.param_names);
    d.update(&m.derived_param_names);
    d.update(&m.vars);
    d.update(&m.pre_vars);
    d.update(&m.post_vars);
    d.update(&m.extra_global_params);
    d.update(&m.sim_code);
    d.update(&m.event_code);
    d.update(&m.event_threshold_condition_code);
    d.update(&m.learn_post_code);
    d.update(&m.synapse_dynamics_code);
    d.update(&m.pre_spike_code);
    d.update(&m.pre_dynamics_code);
    d.update(&m.post_spike_code);
    d.update(&m.post_dynamics_code);
}

fn hash_ps_model(m: &PostsynapticModel, d: &mut Digest) {
    d.update(&m.name);
    d.update(&m.param_names);
    d.update(&m.vars);
    d.update(&m.apply_input_code);
    d.update(&m.decay_code);
}

fn hash_cu_model(m: &CustomUpdateModel, d: &mut Digest) {
    d.update(&m.name);
    d.update(&m.param_names);
    d.update(&m.vars);
    d.update(&m.var_refs);
    d.update(&m.extra_global_params);
    d.update(&m.update_code);
}

/// Digest of an incoming projection as seen by its target's neuron-update
/// and init code: the postsynaptic model plus dendritic-delay structure.
pub fn in_syn_digest(sg: &SynapseGroup) -> u64 {
    let mut d = Digest::new();
    hash_ps_model(&sg.ps_model, &mut d);
    d.update(&sg.dendritic_delay_required);
    d.update(&sg.max_dendritic_delay_timesteps);
    d.finish()
}

/// Digest of a current source as seen by its target's kernels.
pub fn current_source_digest(cs: &CurrentSource) -> u64 {
    let mut d = Digest::new();
    d.update(&cs.model.name);
    d.update(&cs.model.param_names);
    d.update(&cs.model.derived_param_names);
    d.update(&cs.model.vars);
    d.update(&cs.model.extra_global_params);
    d.update(&cs.model.injection_code);
    d.finish()
}

/// Incoming projections of `ng`, ordered by digest so that child *i* lines
/// up across every member of a merged group.
pub fn sorted_in_syns<'m>(model: &'m NetworkModel, ng: &NeuronGroup) -> Vec<&'m SynapseGroup> {
    let mut in_syns = model.in_syn_of(ng);
    in_syns.sort_by_key(|sg| in_syn_digest(sg));
    in_syns
}

/// Current sources of `ng`, ordered by digest.
pub fn sorted_current_sources<'m>(
    model: &'m NetworkModel,
    ng: &NeuronGroup,
) -> Vec<&'m CurrentSource> {
    let mut sources = model.current_sources_of(ng);
    sources.sort_by_key(|cs| current_source_digest(cs));
    sources
}

/// Fingerprint for the neuron-update purpose.
pub fn neuron_update_digest(model: &NetworkModel, ng: &NeuronGroup) -> u64 {
    let mut d = Digest::new();
    hash_neuron_model(&ng.model, &mut d);
    d.update(&ng.delay_required);
    d.update(&ng.delay_slots());
    d.update(&ng.sim_rng_required);
    d.update(&ng.spike_time_required);
    d.update(&ng.prev_spike_time_required);
    d.update(&ng.spike_event_required);
    d.update(&ng.spike_event_time_required);
    d.update(&ng.prev_spike_event_time_required);
    d.update(&ng.spike_recording_enabled);
    d.update(&ng.spike_event_recording_enabled);
    d.update(&ng.true_spike_required);
    for sg in sorted_in_syns(model, ng) {
        d.update(&in_syn_digest(sg));
    }
    for cs in sorted_current_sources(model, ng) {
        d.update(&current_source_digest(cs));
    }
    d.finish()
}

/// Fingerprint for the spike-queue-update purpose.
pub fn spike_queue_update_digest(ng: &NeuronGroup) -> u64 {
    let mut d = Digest::new();
    d.update(&ng.delay_required);
    d.update(&ng.delay_slots());
    d.update(&ng.prev_spike_time_required);
    d.update(&ng.prev_spike_event_time_required);
    d.update(&ng.spike_event_required);
    d.update(&ng.true_spike_required);
    d.finish()
}

/// Fingerprint for the dendritic-delay-update purpose.
pub fn dendritic_delay_update_digest(sg: &SynapseGroup) -> u64 {
    let mut d = Digest::new();
    d.update(&sg.max_dendritic_delay_timesteps);
    d.finish()
}

fn hash_synapse_delay_config(model: &NetworkModel, sg: &SynapseGroup, d: &mut Digest) {
    d.update(&sg.delay_steps);
    d.update(&sg.back_prop_delay_steps);
    if let Ok(src) = model.src_of(sg) {
        d.update(&src.delay_required);
        d.update(&src.delay_slots());
    }
    if let Ok(trg) = model.trg_of(sg) {
        d.update(&trg.delay_required);
        d.update(&trg.delay_slots());
    }
    d.update(&sg.dendritic_delay_required);
    d.update(&sg.max_dendritic_delay_timesteps);
}

/// Fingerprint for the presynaptic-update purpose.
pub fn presynaptic_update_digest(model: &NetworkModel, sg: &SynapseGroup) -> u64 {
    let mut d = Digest::new();
    hash_wu_model(&sg.wu_model, &mut d);
    d.update(&sg.matrix);
    d.update(&sg.span_type);
    d.update(&sg.num_threads_per_spike);
    d.update(&sg.kernel_size);
    hash_synapse_delay_config(model, sg, &mut d);
    if sg.matrix.is_procedural() {
        d.update(&sg.connectivity_init.name);
        d.update(&sg.connectivity_init.row_build_code);
        d.update(&sg.connectivity_init.col_build_code);
    }
    d.finish()
}

/// Fingerprint for the postsynaptic-update purpose.
pub fn postsynaptic_update_digest(model: &NetworkModel, sg: &SynapseGroup) -> u64 {
    let mut d = Digest::new();
    hash_wu_model(&sg.wu_model, &mut d);
    d.update(&sg.matrix);
    hash_synapse_delay_config(model, sg, &mut d);
    d.finish()
}

/// Fingerprint for the synapse-dynamics purpose.
pub fn synapse_dynamics_digest(model: &NetworkModel, sg: &SynapseGroup) -> u64 {
    let mut d = Digest::new();
    hash_wu_model(&sg.wu_model, &mut d);
    d.update(&sg.matrix);
    hash_synapse_delay_config(model, sg, &mut d);
    d.finish()
}

/// Fingerprint for the neuron-init purpose.
pub fn neuron_init_digest(model: &NetworkModel, ng: &NeuronGroup) -> u64 {
    let mut d = Digest::new();
    d.update(&ng.model.name);
    d.update(&ng.model.vars);
    d.update(&ng.var_initialisers);
    d.update(&ng.delay_required);
    d.update(&ng.delay_slots());
    d.update(&ng.sim_rng_required);
    d.update(&ng.init_rng_required);
    d.update(&ng.spike_time_required);
    d.update(&ng.prev_spike_time_required);
    d.update(&ng.spike_event_required);
    d.update(&ng.spike_event_time_required);
    d.update(&ng.prev_spike_event_time_required);
    for sg in sorted_in_syns(model, ng) {
        d.update(&in_syn_digest(sg));
    }
    for cs in sorted_current_sources(model, ng) {
        d.update(&current_source_digest(cs));
        d.update(&cs.var_initialisers);
    }
    d.finish()
}

/// Fingerprint for the dense-init purpose.
pub fn dense_init_digest(sg: &SynapseGroup) -> u64 {
    let mut d = Digest::new();
    d.update(&sg.wu_model.name);
    d.update(&sg.wu_model.vars);
    d.update(&sg.wu_var_initialisers);
    d.update(&sg.matrix);
    d.finish()
}

/// Fingerprint for the sparse-connectivity-init purpose.
pub fn connectivity_init_digest(sg: &SynapseGroup) -> u64 {
    let mut d = Digest::new();
    d.update(&sg.connectivity_init.name);
    d.update(&sg.connectivity_init.param_names);
    d.update(&sg.connectivity_init.row_build_code);
    d.update(&sg.connectivity_init.col_build_code);
    d.update(&sg.matrix.connectivity);
    d.update(&sg.kernel_size);
    d.finish()
}

/// Fingerprint for the sparse-init purpose.
pub fn sparse_init_digest(sg: &SynapseGroup) -> u64 {
    let mut d = Digest::new();
    d.update(&sg.wu_model.name);
    d.update(&sg.wu_model.vars);
    d.update(&sg.wu_var_initialisers);
    d.update(&sg.has_learn_post_code());
    d.update(&sg.has_synapse_dynamics_code());
    d.finish()
}

/// Fingerprint for the custom-update purpose.
pub fn custom_update_digest(cu: &CustomUpdate) -> u64 {
    let mut d = Digest::new();
    hash_cu_model(&cu.model, &mut d);
    d.update(&cu.update_group);
    d.update(&cu.batched);
    d.finish()
}

/// Fingerprint for the custom-update-WU purpose.
pub fn custom_wu_update_digest(model: &NetworkModel, cw: &CustomWuUpdate) -> u64 {
    let mut d = Digest::new();
    hash_cu_model(&cw.model, &mut d);
    d.update(&cw.update_group);
    d.update(&cw.batched);
    let transpose_mask: Vec<bool> =
        cw.var_references.iter().map(|r| r.transpose_var.is_some()).collect();
    d.update(&transpose_mask);
    if let Ok(sg) = model.synapse_group(&cw.synapse_group) {
        d.update(&sg.matrix);
        hash_synapse_delay_config(model, sg, &mut d);
    }
    d.finish()
}

/// Fingerprint for the custom-update host-reduction purpose.
pub fn host_reduction_digest(cu: &CustomUpdate) -> u64 {
    let mut d = Digest::new();
    hash_cu_model(&cu.model, &mut d);
    d.update(&cu.update_group);
    d.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{MatrixConnectivity, MatrixType, MatrixWeight};

    fn simple_group(name: &str, n: u32) -> NeuronGroup {
        NeuronGroup {
            name: name.to_string(),
            num_neurons: n,
            model: NeuronModel {
                name: "LIF".to_string(),
                sim_code: "$(V) += 1.0;".to_string(),
                threshold_condition_code: "$(V) > 1.0".to_string(),
                ..Default::default()
            },
            param_values: vec![],
            derived_param_values: vec![],
            var_initialisers: vec![],
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
    fn test_size_not_in_digest() {
        let model = NetworkModel::new("net", 0.1);
        let a = simple_group("A", 100);
        let b = simple_group("B", 250);
        assert_eq!(neuron_update_digest(&model, &a), neuron_update_digest(&model, &b));
    }

    #[test]
    fn test_delay_config_in_digest() {
        let model = NetworkModel::new("net", 0.1);
        let a = simple_group("A", 100);
        let mut b = simple_group("B", 100);
        b.delay_required = true;
        b.num_delay_slots = 5;
        assert_ne!(neuron_update_digest(&model, &a), neuron_update_digest(&model, &b));
        assert_ne!(spike_queue_update_digest(&a), spike_queue_update_digest(&b));
    }

    #[test]
    fn test_every_flag_influences_neuron_digest() {
        let model = NetworkModel::new("net", 0.1);
        let base = simple_group("A", 100);
        let base_digest = neuron_update_digest(&model, &base);

        let flags: Vec<fn(&mut NeuronGroup)> = vec![
            |g| g.sim_rng_required = true,
            |g| g.spike_time_required = true,
            |g| g.prev_spike_time_required = true,
            |g| g.spike_event_required = true,
            |g| g.spike_event_time_required = true,
            |g| g.prev_spike_event_time_required = true,
            |g| g.spike_recording_enabled = true,
            |g| g.spike_event_recording_enabled = true,
            |g| g.true_spike_required = false,
        ];
        for flip in flags {
            let mut changed = simple_group("A", 100);
            flip(&mut changed);
            assert_ne!(neuron_update_digest(&model, &changed), base_digest);
        }
    }

    #[test]
    fn test_matrix_type_in_synapse_digest() {
        let mut model = NetworkModel::new("net", 0.1);
        model.neuron_groups.push(simple_group("Pre", 10));
        model.neuron_groups.push(simple_group("Post", 10));

        let mut sg = SynapseGroup {
            name: "S".to_string(),
            src: "Pre".to_string(),
            trg: "Post".to_string(),
            matrix: MatrixType::new(MatrixConnectivity::Sparse, MatrixWeight::Individual),
            span_type: Default::default(),
            max_connections: 8,
            max_source_connections: 8,
            delay_steps: 0,
            back_prop_delay_steps: 0,
            dendritic_delay_required: false,
            max_dendritic_delay_timesteps: 1,
            num_threads_per_spike: 1,
            kernel_size: vec![],
            wu_model: WeightUpdateModel {
                name: "StaticPulse".to_string(),
                sim_code: "$(addToInSyn, $(g));".to_string(),
                ..Default::default()
            },
            wu_param_values: vec![],
            wu_derived_param_values: vec![],
            wu_var_initialisers: vec![],
            wu_global_var_values: vec![],
            ps_model: PostsynapticModel::default(),
            ps_param_values: vec![],
            connectivity_init: Default::default(),
        };
        let sparse = presynaptic_update_digest(&model, &sg);
        sg.matrix = MatrixType::new(MatrixConnectivity::Dense, MatrixWeight::Individual);
        assert_ne!(presynaptic_update_digest(&model, &sg), sparse);

        // Delay steps split merged update groups
        sg.delay_steps = 1;
        let d1 = presynaptic_update_digest(&model, &sg);
        sg.delay_steps = 2;
        assert_ne!(presynaptic_update_digest(&model, &sg), d1);
    }
}
