//! Merged groups over synaptic projections, for every synapse-shaped
//! purpose: the three update kernels plus the three initialisation phases.

use crate::merge::group::{heterogeneous_mask, GroupMergedBase};
use crate::merge::MergeSupport;
use crate::model::{MatrixWeight, NetworkModel, NeuronGroup, SynapseGroup};
use crate::utils::numfmt::c_float_literal;

/// Which kernel a synapse merged group feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SynapseRole {
    PresynapticUpdate,
    PostsynapticUpdate,
    SynapseDynamics,
    DenseInit,
    ConnectivityInit,
    SparseInit,
}

/// A merged group of synapse groups sharing a structural fingerprint for
/// one role.
pub struct SynapseMerged<'m> {
    pub base: GroupMergedBase<'m, SynapseGroup>,
    pub role: SynapseRole,
    /// Source population of the archetype
    pub src: &'m NeuronGroup,
    /// Target population of the archetype
    pub trg: &'m NeuronGroup,
    pub wu_het_params: Vec<bool>,
    pub wu_het_derived: Vec<bool>,
    pub conn_het_params: Vec<bool>,
    /// Global-weight variable values that vary across members
    pub global_het_vars: Vec<bool>,
    scalar_is_float: bool,
}

impl<'m> SynapseMerged<'m> {
    pub fn new(
        index: usize,
        groups: Vec<&'m SynapseGroup>,
        role: SynapseRole,
        model: &'m NetworkModel,
        support: &dyn MergeSupport,
    ) -> Self {
        let scalar = model.precision.name().to_string();
        let scalar_is_float = model.precision.name() == "float";
        let archetype = groups[0];
        let src = model.src_of(archetype).expect("validated model");
        let trg = model.trg_of(archetype).expect("validated model");

        let wu_het_params = heterogeneous_mask(&groups, archetype.wu_model.param_names.len(), |g| {
            g.wu_param_values.as_slice()
        });
        let wu_het_derived =
            heterogeneous_mask(&groups, archetype.wu_model.derived_param_names.len(), |g| {
                g.wu_derived_param_values.as_slice()
            });
        let conn_het_params =
            heterogeneous_mask(&groups, archetype.connectivity_init.param_names.len(), |g| {
                g.connectivity_init.param_values.as_slice()
            });
        let global_het_vars = if archetype.matrix.weight == MatrixWeight::Global {
            heterogeneous_mask(&groups, archetype.wu_model.vars.len(), |g| {
                g.wu_global_var_values.as_slice()
            })
        } else {
            Vec::new()
        };

        let mut merged = Self {
            base: GroupMergedBase::new(index, groups),
            role,
            src,
            trg,
            wu_het_params,
            wu_het_derived,
            conn_het_params,
            global_het_vars,
            scalar_is_float,
        };
        merged.build_fields(&scalar, model, support);
        merged
    }

    fn build_fields(&mut self, scalar: &str, model: &NetworkModel, support: &dyn MergeSupport) {
        let prefix = support.var_prefix().to_string();
        let addr = support.scalar_address_prefix().to_string();
        let archetype = self.base.archetype();
        let names: Vec<String> = self.base.groups.iter().map(|g| g.name.clone()).collect();
        let src_names: Vec<String> =
            self.base.groups.iter().map(|g| g.src.clone()).collect();
        let trg_names: Vec<String> =
            self.base.groups.iter().map(|g| g.trg.clone()).collect();

        let syn_ptr = |array: &str| -> Box<dyn Fn(usize) -> String + Send + Sync> {
            let array = array.to_string();
            let prefix = prefix.clone();
            let names = names.clone();
            Box::new(move |m| format!("{}{}{}", prefix, array, names[m]))
        };
        let pop_ptr = |array: &str, pops: &[String]| -> Box<dyn Fn(usize) -> String + Send + Sync> {
            let array = array.to_string();
            let prefix = prefix.clone();
            let pops = pops.to_vec();
            Box::new(move |m| format!("{}{}{}", prefix, array, pops[m]))
        };

        self.base.add_field("unsigned int", "rowStride", {
            let strides: Vec<u32> =
                self.base.groups.iter().map(|g| support.row_stride(model, g)).collect();
            move |m| strides[m].to_string()
        });
        self.base.add_field("unsigned int", "numSrcNeurons", {
            let sizes: Vec<u32> = self
                .base
                .groups
                .iter()
                .map(|g| model.src_of(g).expect("validated model").num_neurons)
                .collect();
            move |m| sizes[m].to_string()
        });
        self.base.add_field("unsigned int", "numTrgNeurons", {
            let sizes: Vec<u32> = self
                .base
                .groups
                .iter()
                .map(|g| model.trg_of(g).expect("validated model").num_neurons)
                .collect();
            move |m| sizes[m].to_string()
        });

        let sparse = archetype.matrix.is_sparse();

        // Pre/postsynaptic neuron state referenced through $(name_pre) /
        // $(name_post) becomes pointer fields into the source and target
        // population arrays
        if matches!(
            self.role,
            SynapseRole::PresynapticUpdate
                | SynapseRole::PostsynapticUpdate
                | SynapseRole::SynapseDynamics
        ) {
            let src_group = self.src;
            let trg_group = self.trg;
            let wu = &archetype.wu_model;
            let code = [
                wu.sim_code.as_str(),
                wu.event_code.as_str(),
                wu.event_threshold_condition_code.as_str(),
                wu.learn_post_code.as_str(),
                wu.synapse_dynamics_code.as_str(),
            ]
            .concat();
            for var in &src_group.model.vars {
                if code.contains(&format!("$({}_pre)", var.name)) {
                    let device_ty =
                        if var.ty == "scalar" { scalar.to_string() } else { var.ty.clone() };
                    let var_name = var.name.clone();
                    let prefix = prefix.clone();
                    let src_names = src_names.clone();
                    self.base.add_field(
                        format!("{}*", device_ty),
                        format!("{}Pre", var.name),
                        move |m| format!("{}{}{}", prefix, var_name, src_names[m]),
                    );
                }
            }
            for var in &trg_group.model.vars {
                if code.contains(&format!("$({}_post)", var.name)) {
                    let device_ty =
                        if var.ty == "scalar" { scalar.to_string() } else { var.ty.clone() };
                    let var_name = var.name.clone();
                    let prefix = prefix.clone();
                    let trg_names = trg_names.clone();
                    self.base.add_field(
                        format!("{}*", device_ty),
                        format!("{}Post", var.name),
                        move |m| format!("{}{}{}", prefix, var_name, trg_names[m]),
                    );
                }
            }
        }

        match self.role {
            SynapseRole::PresynapticUpdate => {
                if archetype.is_true_spike_required() {
                    self.base.add_field("unsigned int*", "srcSpkCnt", pop_ptr("glbSpkCnt", &src_names));
                    self.base.add_field("unsigned int*", "srcSpk", pop_ptr("glbSpk", &src_names));
                }
                if archetype.is_spike_event_required() {
                    self.base
                        .add_field("unsigned int*", "srcSpkCntEvnt", pop_ptr("glbSpkCntEvnt", &src_names));
                    self.base
                        .add_field("unsigned int*", "srcSpkEvnt", pop_ptr("glbSpkEvnt", &src_names));
                }
                if self.src.delay_required {
                    let addr = addr.clone();
                    let prefix = prefix.clone();
                    let src_names = src_names.clone();
                    self.base.add_field("volatile unsigned int*", "srcSpkQuePtr", move |m| {
                        format!("{}{}spkQuePtr{}", addr, prefix, src_names[m])
                    });
                }
                self.base.add_field(format!("{}*", scalar), "inSyn", syn_ptr("inSyn"));
                if archetype.dendritic_delay_required {
                    self.base.add_field(format!("{}*", scalar), "denDelay", syn_ptr("denDelay"));
                    let addr = addr.clone();
                    let prefix = prefix.clone();
                    let names = names.clone();
                    self.base.add_field("volatile unsigned int*", "denDelayPtr", move |m| {
                        format!("{}{}denDelayPtr{}", addr, prefix, names[m])
                    });
                }
                if sparse {
                    self.base.add_field("unsigned int*", "ind", syn_ptr("ind"));
                    self.base.add_field("unsigned int*", "rowLength", syn_ptr("rowLength"));
                }
                if archetype.matrix.is_bitmask() {
                    self.base.add_field("uint32_t*", "gp", syn_ptr("gp"));
                }
                self.add_wu_var_fields(scalar, &prefix);
                self.add_wu_param_fields(scalar);
                self.add_conn_param_fields(scalar);
                self.add_wu_egp_fields(scalar, &prefix);
            }
            SynapseRole::PostsynapticUpdate => {
                self.base.add_field("unsigned int", "colStride", {
                    // Dense matrices walk whole source columns
                    let strides: Vec<u32> = self
                        .base
                        .groups
                        .iter()
                        .map(|g| {
                            if g.matrix.is_sparse() {
                                g.max_source_connections
                            } else {
                                model.src_of(g).expect("validated model").num_neurons
                            }
                        })
                        .collect();
                    move |m| strides[m].to_string()
                });
                self.base.add_field("unsigned int*", "trgSpkCnt", pop_ptr("glbSpkCnt", &trg_names));
                self.base.add_field("unsigned int*", "trgSpk", pop_ptr("glbSpk", &trg_names));
                if self.trg.delay_required {
                    let addr = addr.clone();
                    let prefix = prefix.clone();
                    let trg_names = trg_names.clone();
                    self.base.add_field("volatile unsigned int*", "trgSpkQuePtr", move |m| {
                        format!("{}{}spkQuePtr{}", addr, prefix, trg_names[m])
                    });
                }
                if sparse {
                    self.base.add_field("unsigned int*", "colLength", syn_ptr("colLength"));
                    self.base.add_field("unsigned int*", "remap", syn_ptr("remap"));
                }
                self.add_wu_var_fields(scalar, &prefix);
                self.add_wu_param_fields(scalar);
                self.add_wu_egp_fields(scalar, &prefix);
            }
            SynapseRole::SynapseDynamics => {
                if sparse {
                    self.base.add_field("unsigned int*", "ind", syn_ptr("ind"));
                    self.base.add_field("unsigned int*", "synRemap", syn_ptr("synRemap"));
                }
                self.base.add_field(format!("{}*", scalar), "inSyn", syn_ptr("inSyn"));
                if archetype.dendritic_delay_required {
                    self.base.add_field(format!("{}*", scalar), "denDelay", syn_ptr("denDelay"));
                    let addr = addr.clone();
                    let prefix = prefix.clone();
                    let names = names.clone();
                    self.base.add_field("volatile unsigned int*", "denDelayPtr", move |m| {
                        format!("{}{}denDelayPtr{}", addr, prefix, names[m])
                    });
                }
                self.add_wu_var_fields(scalar, &prefix);
                self.add_wu_param_fields(scalar);
                self.add_wu_egp_fields(scalar, &prefix);
            }
            SynapseRole::DenseInit => {
                self.add_wu_var_fields(scalar, &prefix);
            }
            SynapseRole::ConnectivityInit => {
                if sparse {
                    self.base.add_field("unsigned int*", "ind", syn_ptr("ind"));
                    self.base.add_field("unsigned int*", "rowLength", syn_ptr("rowLength"));
                }
                if archetype.matrix.is_bitmask() {
                    self.base.add_field("uint32_t*", "gp", syn_ptr("gp"));
                }
                if !archetype.kernel_size.is_empty() {
                    self.add_wu_var_fields(scalar, &prefix);
                }
                self.add_conn_param_fields(scalar);
            }
            SynapseRole::SparseInit => {
                self.base.add_field("unsigned int*", "ind", syn_ptr("ind"));
                self.base.add_field("unsigned int*", "rowLength", syn_ptr("rowLength"));
                if archetype.has_learn_post_code() {
                    self.base.add_field("unsigned int", "colStride", {
                        let strides: Vec<u32> =
                            self.base.groups.iter().map(|g| g.max_source_connections).collect();
                        move |m| strides[m].to_string()
                    });
                    self.base.add_field("unsigned int*", "colLength", syn_ptr("colLength"));
                    self.base.add_field("unsigned int*", "remap", syn_ptr("remap"));
                }
                if model.is_syn_remap_required(archetype) {
                    self.base.add_field("unsigned int*", "synRemap", syn_ptr("synRemap"));
                }
                self.add_wu_var_fields(scalar, &prefix);
            }
        }
    }

    /// Per-synapse weight-update variables become pointer fields; global
    /// weights become scalar fields only where heterogeneous.
    fn add_wu_var_fields(&mut self, scalar: &str, prefix: &str) {
        let archetype = self.base.archetype();
        if archetype.matrix.has_individual_weights() || !archetype.kernel_size.is_empty() {
            let names: Vec<String> = self.base.groups.iter().map(|g| g.name.clone()).collect();
            for var in &archetype.wu_model.vars {
                let device_ty = if var.ty == "scalar" { scalar.to_string() } else { var.ty.clone() };
                let var_name = var.name.clone();
                let names = names.clone();
                let prefix = prefix.to_string();
                self.base.add_field(format!("{}*", device_ty), var.name.clone(), move |m| {
                    format!("{}{}{}", prefix, var_name, names[m])
                });
            }
        } else if archetype.matrix.weight == MatrixWeight::Global {
            let scalar_is_float = self.scalar_is_float;
            for (i, het) in self.global_het_vars.iter().enumerate() {
                if *het {
                    let values: Vec<f64> =
                        self.base.groups.iter().map(|g| g.wu_global_var_values[i]).collect();
                    self.base.add_field(scalar, archetype.wu_model.vars[i].name.clone(), move |m| {
                        c_float_literal(values[m], scalar_is_float)
                    });
                }
            }
        }
    }

    fn add_wu_param_fields(&mut self, scalar: &str) {
        let archetype = self.base.archetype();
        let scalar_is_float = self.scalar_is_float;
        for (i, het) in self.wu_het_params.iter().enumerate() {
            if *het {
                let values: Vec<f64> =
                    self.base.groups.iter().map(|g| g.wu_param_values[i]).collect();
                self.base.add_field(scalar, archetype.wu_model.param_names[i].clone(), move |m| {
                    c_float_literal(values[m], scalar_is_float)
                });
            }
        }
        for (i, het) in self.wu_het_derived.iter().enumerate() {
            if *het {
                let values: Vec<f64> =
                    self.base.groups.iter().map(|g| g.wu_derived_param_values[i]).collect();
                self.base.add_field(
                    scalar,
                    archetype.wu_model.derived_param_names[i].clone(),
                    move |m| c_float_literal(values[m], scalar_is_float),
                );
            }
        }
    }

    fn add_conn_param_fields(&mut self, scalar: &str) {
        let archetype = self.base.archetype();
        let scalar_is_float = self.scalar_is_float;
        for (i, het) in self.conn_het_params.iter().enumerate() {
            if *het {
                let values: Vec<f64> =
                    self.base.groups.iter().map(|g| g.connectivity_init.param_values[i]).collect();
                self.base.add_field(
                    scalar,
                    archetype.connectivity_init.param_names[i].clone(),
                    move |m| c_float_literal(values[m], scalar_is_float),
                );
            }
        }
    }

    fn add_wu_egp_fields(&mut self, scalar: &str, prefix: &str) {
        let archetype = self.base.archetype();
        let names: Vec<String> = self.base.groups.iter().map(|g| g.name.clone()).collect();
        for egp in &archetype.wu_model.extra_global_params {
            let device_ty = if egp.ty == "scalar" { scalar.to_string() } else { egp.ty.clone() };
            let egp_name = egp.name.clone();
            let names = names.clone();
            let prefix = prefix.to_string();
            self.base.add_field(format!("{}*", device_ty), egp.name.clone(), move |m| {
                format!("{}{}{}", prefix, egp_name, names[m])
            });
        }
    }

    /// Substitution for weight-update parameter `i`.
    pub fn wu_param_ref(&self, i: usize) -> String {
        let archetype = self.base.archetype();
        if self.wu_het_params[i] {
            format!("group->{}", archetype.wu_model.param_names[i])
        } else {
            format!("({})", c_float_literal(archetype.wu_param_values[i], self.scalar_is_float))
        }
    }

    /// Substitution for weight-update derived parameter `i`.
    pub fn wu_derived_param_ref(&self, i: usize) -> String {
        let archetype = self.base.archetype();
        if self.wu_het_derived[i] {
            format!("group->{}", archetype.wu_model.derived_param_names[i])
        } else {
            format!(
                "({})",
                c_float_literal(archetype.wu_derived_param_values[i], self.scalar_is_float)
            )
        }
    }

    /// Substitution for connectivity-initialiser parameter `i`.
    pub fn conn_param_ref(&self, i: usize) -> String {
        let archetype = self.base.archetype();
        if self.conn_het_params[i] {
            format!("group->{}", archetype.connectivity_init.param_names[i])
        } else {
            format!(
                "({})",
                c_float_literal(archetype.connectivity_init.param_values[i], self.scalar_is_float)
            )
        }
    }

    /// Substitution for a global-weight variable.
    pub fn global_var_ref(&self, i: usize) -> String {
        let archetype = self.base.archetype();
        if self.global_het_vars.get(i).copied().unwrap_or(false) {
            format!("group->{}", archetype.wu_model.vars[i].name)
        } else {
            format!(
                "({})",
                c_float_literal(archetype.wu_global_var_values[i], self.scalar_is_float)
            )
        }
    }

    /// Spike-count slot of the source population, e.g. `preDelaySlot`.
    pub fn pre_slot(&self, batch_size: u32) -> String {
        if self.src.delay_required {
            if batch_size > 1 { "preBatchDelaySlot" } else { "preDelaySlot" }.to_string()
        } else if batch_size > 1 {
            "batch".to_string()
        } else {
            "0".to_string()
        }
    }

    /// Spike-count slot of the target population.
    pub fn post_slot(&self, batch_size: u32) -> String {
        if self.trg.delay_required {
            if batch_size > 1 { "postBatchDelaySlot" } else { "postDelaySlot" }.to_string()
        } else if batch_size > 1 {
            "batch".to_string()
        } else {
            "0".to_string()
        }
    }

    /// Index of a source-population spike entry.
    pub fn pre_spike_index(&self, batch_size: u32, index: &str) -> String {
        let mut prefix = String::new();
        if self.src.delay_required {
            prefix.push_str(if batch_size > 1 { "preBatchDelayOffset + " } else { "preDelayOffset + " });
        } else if batch_size > 1 {
            prefix.push_str("preBatchOffset + ");
        }
        format!("{}{}", prefix, index)
    }

    /// Index of a target-population spike entry.
    pub fn post_spike_index(&self, batch_size: u32, index: &str) -> String {
        let mut prefix = String::new();
        if self.trg.delay_required {
            prefix.push_str(if batch_size > 1 { "postBatchDelayOffset + " } else { "postDelayOffset + " });
        } else if batch_size > 1 {
            prefix.push_str("postBatchOffset + ");
        }
        format!("{}{}", prefix, index)
    }

    /// Index of a per-neuron variable on the source side.
    pub fn pre_var_index(&self, batch_size: u32, index: &str) -> String {
        if batch_size > 1 {
            format!("preBatchOffset + {}", index)
        } else {
            index.to_string()
        }
    }

    /// Index of a per-neuron variable on the target side.
    pub fn post_var_index(&self, batch_size: u32, index: &str) -> String {
        if batch_size > 1 {
            format!("postBatchOffset + {}", index)
        } else {
            index.to_string()
        }
    }

    /// Index of a per-synapse weight variable.
    pub fn syn_var_index(&self, batch_size: u32, index: &str) -> String {
        if batch_size > 1 && self.base.archetype().matrix.has_individual_weights() {
            format!("synBatchOffset + {}", index)
        } else {
            index.to_string()
        }
    }

    /// Index into the target's `inSyn` accumulator.
    pub fn post_isyn_index(&self, batch_size: u32, index: &str) -> String {
        if batch_size > 1 {
            format!("postBatchOffset + {}", index)
        } else {
            index.to_string()
        }
    }

    /// Index into the dendritic delay buffer for a write `offset` timesteps
    /// ahead.
    pub fn post_den_delay_index(&self, batch_size: u32, index: &str, offset: &str) -> String {
        let archetype = self.base.archetype();
        let slot = format!(
            "((*group->denDelayPtr + ({})) % {})",
            offset, archetype.max_dendritic_delay_timesteps
        );
        if batch_size > 1 {
            format!("({} * group->numTrgNeurons) + postBatchOffset + {}", slot, index)
        } else {
            format!("({} * group->numTrgNeurons) + {}", slot, index)
        }
    }

    /// Lowering-context label used in substitution failure messages.
    pub fn context_label(&self, what: &str) -> String {
        format!("{} : merged{}", what, self.base.index)
    }
}

/// Merged group for the dendritic-delay pointer-advance kernel.
pub struct DendriticDelayUpdateMerged<'m> {
    pub base: GroupMergedBase<'m, SynapseGroup>,
}

impl<'m> DendriticDelayUpdateMerged<'m> {
    pub fn new(index: usize, groups: Vec<&'m SynapseGroup>, support: &dyn MergeSupport) -> Self {
        let prefix = support.var_prefix().to_string();
        let addr = support.scalar_address_prefix().to_string();
        let mut base = GroupMergedBase::new(index, groups);
        let names: Vec<String> =
            base.groups.iter().map(|g| g.ps_target_name().to_string()).collect();
        base.add_field("volatile unsigned int*", "denDelayPtr", move |m| {
            format!("{}{}denDelayPtr{}", addr, prefix, names[m])
        });
        Self { base }
    }
}
