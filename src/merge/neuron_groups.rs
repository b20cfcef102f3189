//! Merged groups over neuron populations: update, spike-queue update and
//! initialisation.

use crate::merge::digest::{sorted_current_sources, sorted_in_syns};
use crate::merge::group::{heterogeneous_mask, GroupMergedBase};
use crate::merge::MergeSupport;
use crate::model::{CurrentSource, NetworkModel, NeuronGroup, SynapseGroup};
use crate::utils::numfmt::c_float_literal;

/// An incoming projection's postsynaptic-model view inside a neuron merged
/// group: child index `i` lines up across members (children are ordered by
/// digest).
pub struct InSynMerged<'m> {
    /// Per member, the member's i-th sorted incoming projection
    pub members: Vec<&'m SynapseGroup>,
    /// Heterogeneity of the postsynaptic model parameters
    pub het_params: Vec<bool>,
}

impl<'m> InSynMerged<'m> {
    pub fn archetype(&self) -> &'m SynapseGroup {
        self.members[0]
    }

    /// Substitution for PSM parameter `i`: struct field when heterogeneous,
    /// literal otherwise.
    pub fn param_ref(&self, suffix: &str, i: usize, scalar_is_float: bool) -> String {
        let name = &self.archetype().ps_model.param_names[i];
        if self.het_params[i] {
            format!("group->{}{}", name, suffix)
        } else {
            format!("({})", c_float_literal(self.archetype().ps_param_values[i], scalar_is_float))
        }
    }
}

/// A current source's view inside a neuron merged group.
pub struct CurrentSourceMerged<'m> {
    pub members: Vec<&'m CurrentSource>,
    pub het_params: Vec<bool>,
    pub het_derived: Vec<bool>,
}

impl<'m> CurrentSourceMerged<'m> {
    pub fn archetype(&self) -> &'m CurrentSource {
        self.members[0]
    }
}

/// Merged group for the neuron-update kernel.
pub struct NeuronUpdateMerged<'m> {
    pub base: GroupMergedBase<'m, NeuronGroup>,
    pub het_params: Vec<bool>,
    pub het_derived: Vec<bool>,
    pub in_syns: Vec<InSynMerged<'m>>,
    pub current_sources: Vec<CurrentSourceMerged<'m>>,
    scalar_is_float: bool,
}

impl<'m> NeuronUpdateMerged<'m> {
    pub fn new(
        index: usize,
        groups: Vec<&'m NeuronGroup>,
        model: &'m NetworkModel,
        support: &dyn MergeSupport,
    ) -> Self {
        let scalar = model.precision.name().to_string();
        let time = model.time_precision.name().to_string();
        let scalar_is_float = model.precision.name() == "float";
        let archetype = groups[0];

        let het_params = heterogeneous_mask(&groups, archetype.model.param_names.len(), |g| {
            g.param_values.as_slice()
        });
        let het_derived =
            heterogeneous_mask(&groups, archetype.model.derived_param_names.len(), |g| {
                g.derived_param_values.as_slice()
            });
        let in_syns = merge_in_syns(&groups, model);
        let current_sources = merge_current_sources(&groups, model);

        let mut merged = Self {
            base: GroupMergedBase::new(index, groups),
            het_params,
            het_derived,
            in_syns,
            current_sources,
            scalar_is_float,
        };
        merged.build_fields(&scalar, &time, support);
        merged
    }

    fn build_fields(&mut self, scalar: &str, time: &str, support: &dyn MergeSupport) {
        let prefix = support.var_prefix().to_string();
        let addr = support.scalar_address_prefix().to_string();
        let archetype = self.base.archetype();
        let names: Vec<String> = self.base.groups.iter().map(|g| g.name.clone()).collect();

        self.base.add_field("unsigned int", "numNeurons", {
            let sizes: Vec<u32> = self.base.groups.iter().map(|g| g.num_neurons).collect();
            move |m| sizes[m].to_string()
        });

        let ptr = |array: &str| -> Box<dyn Fn(usize) -> String + Send + Sync> {
            let array = array.to_string();
            let prefix = prefix.clone();
            let names = names.clone();
            Box::new(move |m| format!("{}{}{}", prefix, array, names[m]))
        };

        self.base.add_field("unsigned int*", "spkCnt", ptr("glbSpkCnt"));
        self.base.add_field("unsigned int*", "spk", ptr("glbSpk"));
        if archetype.spike_event_required {
            self.base.add_field("unsigned int*", "spkCntEvnt", ptr("glbSpkCntEvnt"));
            self.base.add_field("unsigned int*", "spkEvnt", ptr("glbSpkEvnt"));
        }
        if archetype.delay_required {
            let addr = addr.clone();
            let prefix = prefix.clone();
            let names = names.clone();
            self.base.add_field("volatile unsigned int*", "spkQuePtr", move |m| {
                format!("{}{}spkQuePtr{}", addr, prefix, names[m])
            });
        }
        if archetype.spike_time_required {
            self.base.add_field(format!("{}*", time), "sT", ptr("sT"));
        }
        if archetype.prev_spike_time_required {
            self.base.add_field(format!("{}*", time), "prevST", ptr("prevST"));
        }
        if archetype.spike_event_time_required {
            self.base.add_field(format!("{}*", time), "seT", ptr("seT"));
        }
        if archetype.prev_spike_event_time_required {
            self.base.add_field(format!("{}*", time), "prevSET", ptr("prevSET"));
        }
        if archetype.spike_recording_enabled {
            self.base.add_field("uint32_t*", "recordSpk", ptr("recordSpk"));
        }
        if archetype.spike_event_recording_enabled {
            self.base.add_field("uint32_t*", "recordSpkEvent", ptr("recordSpkEvnt"));
        }
        if archetype.sim_rng_required {
            self.base.add_field(format!("{}*", support.population_rng_type()), "rng", ptr("rng"));
        }

        for var in &archetype.model.vars {
            let device_ty = if var.ty == "scalar" { scalar.to_string() } else { var.ty.clone() };
            let var_name = var.name.clone();
            let prefix = prefix.clone();
            let names = names.clone();
            self.base.add_field(format!("{}*", device_ty), var.name.clone(), move |m| {
                format!("{}{}{}", prefix, var_name, names[m])
            });
        }

        for egp in &archetype.model.extra_global_params {
            let device_ty = if egp.ty == "scalar" { scalar.to_string() } else { egp.ty.clone() };
            let egp_name = egp.name.clone();
            let prefix = prefix.clone();
            let names = names.clone();
            self.base.add_field(format!("{}*", device_ty), egp.name.clone(), move |m| {
                format!("{}{}{}", prefix, egp_name, names[m])
            });
        }

        let scalar_is_float = self.scalar_is_float;
        for (i, het) in self.het_params.iter().enumerate() {
            if *het {
                let values: Vec<f64> =
                    self.base.groups.iter().map(|g| g.param_values[i]).collect();
                self.base.add_field(scalar, archetype.model.param_names[i].clone(), move |m| {
                    c_float_literal(values[m], scalar_is_float)
                });
            }
        }
        for (i, het) in self.het_derived.iter().enumerate() {
            if *het {
                let values: Vec<f64> =
                    self.base.groups.iter().map(|g| g.derived_param_values[i]).collect();
                self.base.add_field(
                    scalar,
                    archetype.model.derived_param_names[i].clone(),
                    move |m| c_float_literal(values[m], scalar_is_float),
                );
            }
        }

        // Incoming postsynaptic models, in digest order
        for (i, in_syn) in self.in_syns.iter().enumerate() {
            let suffix = format!("InSyn{}", i);
            let syn_names: Vec<String> =
                in_syn.members.iter().map(|s| s.ps_target_name().to_string()).collect();
            {
                let prefix = prefix.clone();
                let syn_names = syn_names.clone();
                self.base.add_field(format!("{}*", scalar), format!("inSyn{}", suffix), move |m| {
                    format!("{}inSyn{}", prefix, syn_names[m])
                });
            }
            if in_syn.archetype().dendritic_delay_required {
                let prefix2 = prefix.clone();
                let syn_names2 = syn_names.clone();
                self.base.add_field(
                    format!("{}*", scalar),
                    format!("denDelay{}", suffix),
                    move |m| format!("{}denDelay{}", prefix2, syn_names2[m]),
                );
                let addr3 = addr.clone();
                let prefix3 = prefix.clone();
                let syn_names3 = syn_names.clone();
                self.base.add_field(
                    "volatile unsigned int*",
                    format!("denDelayPtr{}", suffix),
                    move |m| format!("{}{}denDelayPtr{}", addr3, prefix3, syn_names3[m]),
                );
            }
            for (p, het) in in_syn.het_params.iter().enumerate() {
                if *het {
                    let values: Vec<f64> =
                        in_syn.members.iter().map(|s| s.ps_param_values[p]).collect();
                    self.base.add_field(
                        scalar,
                        format!("{}{}", in_syn.archetype().ps_model.param_names[p], suffix),
                        move |m| c_float_literal(values[m], scalar_is_float),
                    );
                }
            }
        }

        // Current sources, in digest order
        for (j, cs) in self.current_sources.iter().enumerate() {
            let suffix = format!("CS{}", j);
            let cs_names: Vec<String> = cs.members.iter().map(|c| c.name.clone()).collect();
            for var in &cs.archetype().model.vars {
                let device_ty =
                    if var.ty == "scalar" { scalar.to_string() } else { var.ty.clone() };
                let var_name = var.name.clone();
                let prefix = prefix.clone();
                let cs_names = cs_names.clone();
                self.base.add_field(
                    format!("{}*", device_ty),
                    format!("{}{}", var.name, suffix),
                    move |m| format!("{}{}{}", prefix, var_name, cs_names[m]),
                );
            }
            for (p, het) in cs.het_params.iter().enumerate() {
                if *het {
                    let values: Vec<f64> = cs.members.iter().map(|c| c.param_values[p]).collect();
                    self.base.add_field(
                        scalar,
                        format!("{}{}", cs.archetype().model.param_names[p], suffix),
                        move |m| c_float_literal(values[m], scalar_is_float),
                    );
                }
            }
            for (p, het) in cs.het_derived.iter().enumerate() {
                if *het {
                    let values: Vec<f64> =
                        cs.members.iter().map(|c| c.derived_param_values[p]).collect();
                    self.base.add_field(
                        scalar,
                        format!("{}{}", cs.archetype().model.derived_param_names[p], suffix),
                        move |m| c_float_literal(values[m], scalar_is_float),
                    );
                }
            }
        }
    }

    /// Substitution for neuron model parameter `i`.
    pub fn param_ref(&self, i: usize) -> String {
        let archetype = self.base.archetype();
        if self.het_params[i] {
            format!("group->{}", archetype.model.param_names[i])
        } else {
            format!("({})", c_float_literal(archetype.param_values[i], self.scalar_is_float))
        }
    }

    /// Substitution for derived parameter `i`.
    pub fn derived_param_ref(&self, i: usize) -> String {
        let archetype = self.base.archetype();
        if self.het_derived[i] {
            format!("group->{}", archetype.model.derived_param_names[i])
        } else {
            format!(
                "({})",
                c_float_literal(archetype.derived_param_values[i], self.scalar_is_float)
            )
        }
    }

    /// Substitution for current source `j`'s parameter `p`.
    pub fn current_source_param_ref(&self, j: usize, p: usize) -> String {
        let cs = &self.current_sources[j];
        if cs.het_params[p] {
            format!("group->{}CS{}", cs.archetype().model.param_names[p], j)
        } else {
            format!("({})", c_float_literal(cs.archetype().param_values[p], self.scalar_is_float))
        }
    }

    /// Index prefix for reading/writing spike queues: `"writeDelayOffset + "`
    /// under delay, `"batchOffset + "` under batching, empty otherwise.
    pub fn write_queue_offset(&self, batch_size: u32, delayed: bool) -> &'static str {
        if delayed {
            "writeDelayOffset + "
        } else if batch_size > 1 {
            "batchOffset + "
        } else {
            ""
        }
    }

    /// Index expression for a per-neuron state variable.
    pub fn var_index(&self, batch_size: u32, index: &str) -> String {
        if batch_size > 1 {
            format!("batchOffset + {}", index)
        } else {
            index.to_string()
        }
    }
}

/// Merged group for the pre-neuron spike-queue-reset kernel.
pub struct SpikeQueueUpdateMerged<'m> {
    pub base: GroupMergedBase<'m, NeuronGroup>,
}

impl<'m> SpikeQueueUpdateMerged<'m> {
    pub fn new(
        index: usize,
        groups: Vec<&'m NeuronGroup>,
        model: &'m NetworkModel,
        support: &dyn MergeSupport,
    ) -> Self {
        let time = model.time_precision.name().to_string();
        let prefix = support.var_prefix().to_string();
        let addr = support.scalar_address_prefix().to_string();
        let mut base = GroupMergedBase::new(index, groups);
        let archetype = base.archetype();
        let names: Vec<String> = base.groups.iter().map(|g| g.name.clone()).collect();

        let ptr = |array: &str| -> Box<dyn Fn(usize) -> String + Send + Sync> {
            let array = array.to_string();
            let prefix = prefix.clone();
            let names = names.clone();
            Box::new(move |m| format!("{}{}{}", prefix, array, names[m]))
        };

        if archetype.needs_prev_time_update() {
            base.add_field("unsigned int", "numNeurons", {
                let sizes: Vec<u32> = base.groups.iter().map(|g| g.num_neurons).collect();
                move |m| sizes[m].to_string()
            });
        }
        base.add_field("unsigned int*", "spkCnt", ptr("glbSpkCnt"));
        if archetype.prev_spike_time_required {
            base.add_field("unsigned int*", "spk", ptr("glbSpk"));
            base.add_field(format!("{}*", time), "prevST", ptr("prevST"));
        }
        if archetype.spike_event_required {
            base.add_field("unsigned int*", "spkCntEvnt", ptr("glbSpkCntEvnt"));
        }
        if archetype.prev_spike_event_time_required {
            base.add_field("unsigned int*", "spkEvnt", ptr("glbSpkEvnt"));
            base.add_field(format!("{}*", time), "prevSET", ptr("prevSET"));
        }
        if archetype.delay_required {
            let addr = addr.clone();
            let prefix = prefix.clone();
            let names = names.clone();
            base.add_field("volatile unsigned int*", "spkQuePtr", move |m| {
                format!("{}{}spkQuePtr{}", addr, prefix, names[m])
            });
        }

        Self { base }
    }
}

/// Merged group for device-side neuron initialisation.
pub struct NeuronInitMerged<'m> {
    pub base: GroupMergedBase<'m, NeuronGroup>,
    pub in_syns: Vec<InSynMerged<'m>>,
    pub current_sources: Vec<CurrentSourceMerged<'m>>,
}

impl<'m> NeuronInitMerged<'m> {
    pub fn new(
        index: usize,
        groups: Vec<&'m NeuronGroup>,
        model: &'m NetworkModel,
        support: &dyn MergeSupport,
    ) -> Self {
        let scalar = model.precision.name().to_string();
        let time = model.time_precision.name().to_string();
        let prefix = support.var_prefix().to_string();
        let in_syns = merge_in_syns(&groups, model);
        let current_sources = merge_current_sources(&groups, model);

        let mut base = GroupMergedBase::new(index, groups);
        let archetype = base.archetype();
        let names: Vec<String> = base.groups.iter().map(|g| g.name.clone()).collect();

        let ptr = |array: &str| -> Box<dyn Fn(usize) -> String + Send + Sync> {
            let array = array.to_string();
            let prefix = prefix.clone();
            let names = names.clone();
            Box::new(move |m| format!("{}{}{}", prefix, array, names[m]))
        };

        base.add_field("unsigned int", "numNeurons", {
            let sizes: Vec<u32> = base.groups.iter().map(|g| g.num_neurons).collect();
            move |m| sizes[m].to_string()
        });
        base.add_field("unsigned int*", "spkCnt", ptr("glbSpkCnt"));
        base.add_field("unsigned int*", "spk", ptr("glbSpk"));
        if archetype.spike_event_required {
            base.add_field("unsigned int*", "spkCntEvnt", ptr("glbSpkCntEvnt"));
            base.add_field("unsigned int*", "spkEvnt", ptr("glbSpkEvnt"));
        }
        if archetype.spike_time_required {
            base.add_field(format!("{}*", time), "sT", ptr("sT"));
        }
        if archetype.prev_spike_time_required {
            base.add_field(format!("{}*", time), "prevST", ptr("prevST"));
        }
        if archetype.spike_event_time_required {
            base.add_field(format!("{}*", time), "seT", ptr("seT"));
        }
        if archetype.prev_spike_event_time_required {
            base.add_field(format!("{}*", time), "prevSET", ptr("prevSET"));
        }
        if archetype.sim_rng_required && support.is_population_rng_initialised_on_device() {
            base.add_field(format!("{}*", support.population_rng_type()), "rng", ptr("rng"));
        }
        for var in &archetype.model.vars {
            let device_ty = if var.ty == "scalar" { scalar.clone() } else { var.ty.clone() };
            let var_name = var.name.clone();
            let prefix = prefix.clone();
            let names = names.clone();
            base.add_field(format!("{}*", device_ty), var.name.clone(), move |m| {
                format!("{}{}{}", prefix, var_name, names[m])
            });
        }
        for (i, in_syn) in in_syns.iter().enumerate() {
            let syn_names: Vec<String> =
                in_syn.members.iter().map(|s| s.ps_target_name().to_string()).collect();
            {
                let prefix = prefix.clone();
                let syn_names = syn_names.clone();
                base.add_field(format!("{}*", scalar), format!("inSynInSyn{}", i), move |m| {
                    format!("{}inSyn{}", prefix, syn_names[m])
                });
            }
            if in_syn.archetype().dendritic_delay_required {
                let prefix = prefix.clone();
                base.add_field(format!("{}*", scalar), format!("denDelayInSyn{}", i), move |m| {
                    format!("{}denDelay{}", prefix, syn_names[m])
                });
            }
        }
        for (j, cs) in current_sources.iter().enumerate() {
            let cs_names: Vec<String> = cs.members.iter().map(|c| c.name.clone()).collect();
            for var in &cs.archetype().model.vars {
                let device_ty = if var.ty == "scalar" { scalar.clone() } else { var.ty.clone() };
                let var_name = var.name.clone();
                let prefix = prefix.clone();
                let cs_names = cs_names.clone();
                base.add_field(
                    format!("{}*", device_ty),
                    format!("{}CS{}", var.name, j),
                    move |m| format!("{}{}{}", prefix, var_name, cs_names[m]),
                );
            }
        }

        Self { base, in_syns, current_sources }
    }
}

fn merge_in_syns<'m>(groups: &[&'m NeuronGroup], model: &'m NetworkModel) -> Vec<InSynMerged<'m>> {
    let per_member: Vec<Vec<&SynapseGroup>> =
        groups.iter().map(|g| sorted_in_syns(model, g)).collect();
    let count = per_member[0].len();
    (0..count)
        .map(|i| {
            let members: Vec<&SynapseGroup> = per_member.iter().map(|v| v[i]).collect();
            let het_params = heterogeneous_mask(
                &members,
                members[0].ps_model.param_names.len(),
                |s: &SynapseGroup| s.ps_param_values.as_slice(),
            );
            InSynMerged { members, het_params }
        })
        .collect()
}

fn merge_current_sources<'m>(
    groups: &[&'m NeuronGroup],
    model: &'m NetworkModel,
) -> Vec<CurrentSourceMerged<'m>> {
    let per_member: Vec<Vec<&CurrentSource>> =
        groups.iter().map(|g| sorted_current_sources(model, g)).collect();
    let count = per_member[0].len();
    (0..count)
        .map(|j| {
            let members: Vec<&CurrentSource> = per_member.iter().map(|v| v[j]).collect();
            let het_params = heterogeneous_mask(
                &members,
                members[0].model.param_names.len(),
                |c: &CurrentSource| c.param_values.as_slice(),
            );
            let het_derived = heterogeneous_mask(
                &members,
                members[0].model.derived_param_names.len(),
                |c: &CurrentSource| c.derived_param_values.as_slice(),
            );
            CurrentSourceMerged { members, het_params, het_derived }
        })
        .collect()
}
