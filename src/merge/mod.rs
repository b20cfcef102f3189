//! Group-merging planner.
//!
//! Populations with identical structural fingerprints are partitioned into
//! merged groups so one kernel body serves many populations, with per-group
//! values resolved through a field indirection table. One list of merged
//! groups exists per *purpose* (neuron update, presynaptic update, sparse
//! init, …); the first member of each group is the archetype that decides
//! the emitted code structure.

pub mod custom_groups;
pub mod digest;
pub mod group;
pub mod neuron_groups;
pub mod synapse_groups;

pub use custom_groups::{CustomUpdateMerged, CustomWuUpdateMerged, HostReductionMerged};
pub use group::{Field, GroupMergedBase};
pub use neuron_groups::{
    CurrentSourceMerged, InSynMerged, NeuronInitMerged, NeuronUpdateMerged, SpikeQueueUpdateMerged,
};
pub use synapse_groups::{DendriticDelayUpdateMerged, SynapseMerged, SynapseRole};

use crate::model::{NetworkModel, SynapseGroup};
use crate::utils::errors::GenResult;
use ahash::AHashMap;
use tracing::debug;

/// Backend decisions the planner needs before any code is emitted.
///
/// The row stride of a sparse matrix depends on the presynaptic update
/// strategy the backend will select, and pointer resolvers need the
/// backend's device-symbol prefix; this trait keeps the planner decoupled
/// from the emitters.
pub trait MergeSupport {
    /// Prefix of device copies of host arrays, e.g. `"d_"`.
    fn var_prefix(&self) -> &str;

    /// Prefix taking the device address of a scalar symbol, e.g. `"&"`.
    fn scalar_address_prefix(&self) -> &str;

    /// Device type of one population RNG stream, e.g. `"curandState"`.
    fn population_rng_type(&self) -> &str;

    /// Allocated width of one row of the projection's backing matrix.
    fn row_stride(&self, model: &NetworkModel, sg: &SynapseGroup) -> u32;

    /// Whether per-neuron RNG streams are seeded on device during init.
    fn is_population_rng_initialised_on_device(&self) -> bool;
}

/// The full merged-group plan for one model.
pub struct MergedModel<'m> {
    pub model: &'m NetworkModel,
    pub neuron_update: Vec<NeuronUpdateMerged<'m>>,
    pub spike_queue_update: Vec<SpikeQueueUpdateMerged<'m>>,
    pub dendritic_delay_update: Vec<DendriticDelayUpdateMerged<'m>>,
    pub presynaptic_update: Vec<SynapseMerged<'m>>,
    pub postsynaptic_update: Vec<SynapseMerged<'m>>,
    pub synapse_dynamics: Vec<SynapseMerged<'m>>,
    pub neuron_init: Vec<NeuronInitMerged<'m>>,
    pub dense_init: Vec<SynapseMerged<'m>>,
    pub connectivity_init: Vec<SynapseMerged<'m>>,
    pub sparse_init: Vec<SynapseMerged<'m>>,
    pub custom_update: Vec<CustomUpdateMerged<'m>>,
    pub custom_wu_update: Vec<CustomWuUpdateMerged<'m>>,
    pub host_reduction: Vec<HostReductionMerged<'m>>,
}

/// Partition entities by digest, preserving first-seen order.
fn group_by_digest<'m, G>(
    items: impl Iterator<Item = &'m G>,
    digest: impl Fn(&G) -> u64,
) -> Vec<Vec<&'m G>> {
    let mut by_digest: AHashMap<u64, Vec<&'m G>> = AHashMap::new();
    let mut order: Vec<u64> = Vec::new();
    for item in items {
        let d = digest(item);
        let members = by_digest.entry(d).or_insert_with(|| {
            order.push(d);
            Vec::new()
        });
        members.push(item);
    }
    order.into_iter().map(|d| by_digest.remove(&d).unwrap()).collect()
}

/// Build the merged-group plan from the model graph.
pub fn merge_model<'m>(
    model: &'m NetworkModel,
    support: &dyn MergeSupport,
) -> GenResult<MergedModel<'m>> {
    model.validate()?;

    let neuron_update = group_by_digest(model.neuron_groups.iter(), |ng| {
        digest::neuron_update_digest(model, ng)
    })
    .into_iter()
    .enumerate()
    .map(|(i, groups)| NeuronUpdateMerged::new(i, groups, model, support))
    .collect::<Vec<_>>();

    let spike_queue_update =
        group_by_digest(model.neuron_groups.iter(), digest::spike_queue_update_digest)
            .into_iter()
            .enumerate()
            .map(|(i, groups)| SpikeQueueUpdateMerged::new(i, groups, model, support))
            .collect::<Vec<_>>();

    let dendritic_delay_update = group_by_digest(
        model.synapse_groups.iter().filter(|sg| sg.dendritic_delay_required),
        digest::dendritic_delay_update_digest,
    )
    .into_iter()
    .enumerate()
    .map(|(i, groups)| DendriticDelayUpdateMerged::new(i, groups, support))
    .collect::<Vec<_>>();

    let synapse_role_groups = |role: SynapseRole,
                               filter: &dyn Fn(&SynapseGroup) -> bool,
                               digest: &dyn Fn(&SynapseGroup) -> u64|
     -> Vec<SynapseMerged<'m>> {
        group_by_digest(model.synapse_groups.iter().filter(|sg| filter(sg)), digest)
            .into_iter()
            .enumerate()
            .map(|(i, groups)| SynapseMerged::new(i, groups, role, model, support))
            .collect()
    };

    let presynaptic_update = synapse_role_groups(
        SynapseRole::PresynapticUpdate,
        &|sg| sg.is_true_spike_required() || sg.is_spike_event_required(),
        &|sg| digest::presynaptic_update_digest(model, sg),
    );
    let postsynaptic_update = synapse_role_groups(
        SynapseRole::PostsynapticUpdate,
        &|sg| sg.has_learn_post_code(),
        &|sg| digest::postsynaptic_update_digest(model, sg),
    );
    let synapse_dynamics = synapse_role_groups(
        SynapseRole::SynapseDynamics,
        &|sg| sg.has_synapse_dynamics_code(),
        &|sg| digest::synapse_dynamics_digest(model, sg),
    );

    let neuron_init =
        group_by_digest(model.neuron_groups.iter(), |ng| digest::neuron_init_digest(model, ng))
            .into_iter()
            .enumerate()
            .map(|(i, groups)| NeuronInitMerged::new(i, groups, model, support))
            .collect::<Vec<_>>();

    let dense_init = synapse_role_groups(
        SynapseRole::DenseInit,
        &|sg| sg.matrix.is_dense() && sg.is_wu_var_init_required(),
        &|sg| digest::dense_init_digest(sg),
    );
    let connectivity_init = synapse_role_groups(
        SynapseRole::ConnectivityInit,
        &|sg| {
            (sg.matrix.is_sparse() || sg.matrix.is_bitmask())
                && sg.connectivity_init.has_build_code()
        },
        &|sg| digest::connectivity_init_digest(sg),
    );
    let sparse_init = synapse_role_groups(
        SynapseRole::SparseInit,
        &|sg| {
            sg.matrix.is_sparse()
                && (sg.is_wu_var_init_required()
                    || sg.has_learn_post_code()
                    || model.is_syn_remap_required(sg))
        },
        &|sg| digest::sparse_init_digest(sg),
    );

    let custom_update = group_by_digest(model.custom_updates.iter(), |cu| {
        digest::custom_update_digest(cu)
    })
    .into_iter()
    .enumerate()
    .map(|(i, groups)| CustomUpdateMerged::new(i, groups, model, support))
    .collect::<Vec<_>>();

    let custom_wu_update = group_by_digest(model.custom_wu_updates.iter(), |cw| {
        digest::custom_wu_update_digest(model, cw)
    })
    .into_iter()
    .enumerate()
    .map(|(i, groups)| CustomWuUpdateMerged::new(i, groups, model, support))
    .collect::<Vec<_>>();

    let host_reduction = group_by_digest(
        model.custom_updates.iter().filter(|cu| cu.has_reduction() && model.batch_size > 1),
        digest::host_reduction_digest,
    )
    .into_iter()
    .enumerate()
    .map(|(i, groups)| HostReductionMerged::new(i, groups, model))
    .collect::<Vec<_>>();

    debug!(
        neuron_update = neuron_update.len(),
        presynaptic_update = presynaptic_update.len(),
        postsynaptic_update = postsynaptic_update.len(),
        synapse_dynamics = synapse_dynamics.len(),
        neuron_init = neuron_init.len(),
        connectivity_init = connectivity_init.len(),
        sparse_init = sparse_init.len(),
        custom_update = custom_update.len() + custom_wu_update.len(),
        "merged model graph"
    );

    Ok(MergedModel {
        model,
        neuron_update,
        spike_queue_update,
        dendritic_delay_update,
        presynaptic_update,
        postsynaptic_update,
        synapse_dynamics,
        neuron_init,
        dense_init,
        connectivity_init,
        sparse_init,
        custom_update,
        custom_wu_update,
        host_reduction,
    })
}
