//! Merged groups for custom updates: neuron-sized, synapse-sized and the
//! host reduction pass.

use crate::merge::group::{heterogeneous_mask, GroupMergedBase};
use crate::merge::MergeSupport;
use crate::model::{CustomUpdate, CustomWuUpdate, NetworkModel, NeuronGroup, SynapseGroup};
use crate::utils::numfmt::c_float_literal;

/// Merged group for neuron-sized custom updates.
pub struct CustomUpdateMerged<'m> {
    pub base: GroupMergedBase<'m, CustomUpdate>,
    /// Target population of the archetype
    pub target: &'m NeuronGroup,
    pub het_params: Vec<bool>,
    scalar_is_float: bool,
}

impl<'m> CustomUpdateMerged<'m> {
    pub fn new(
        index: usize,
        groups: Vec<&'m CustomUpdate>,
        model: &'m NetworkModel,
        support: &dyn MergeSupport,
    ) -> Self {
        let scalar = model.precision.name().to_string();
        let scalar_is_float = model.precision.name() == "float";
        let prefix = support.var_prefix().to_string();
        let archetype = groups[0];
        let target = model.neuron_group(&archetype.target).expect("validated model");
        let het_params = heterogeneous_mask(&groups, archetype.model.param_names.len(), |g| {
            g.param_values.as_slice()
        });

        let mut base = GroupMergedBase::new(index, groups);
        base.add_field("unsigned int", "size", {
            let sizes: Vec<u32> = base
                .groups
                .iter()
                .map(|g| model.neuron_group(&g.target).expect("validated model").num_neurons)
                .collect();
            move |m| sizes[m].to_string()
        });

        let names: Vec<String> = base.groups.iter().map(|g| g.name.clone()).collect();
        for var in &archetype.model.vars {
            let device_ty = if var.ty == "scalar" { scalar.clone() } else { var.ty.clone() };
            let var_name = var.name.clone();
            let prefix = prefix.clone();
            let names = names.clone();
            base.add_field(format!("{}*", device_ty), var.name.clone(), move |m| {
                format!("{}{}{}", prefix, var_name, names[m])
            });
        }
        for (r, decl) in archetype.model.var_refs.iter().enumerate() {
            let device_ty = if decl.ty == "scalar" { scalar.clone() } else { decl.ty.clone() };
            let bindings: Vec<String> = base
                .groups
                .iter()
                .map(|g| format!("{}{}{}", prefix, g.var_references[r].var, g.target))
                .collect();
            base.add_field(format!("{}*", device_ty), decl.name.clone(), move |m| {
                bindings[m].clone()
            });
        }
        for (i, het) in het_params.iter().enumerate() {
            if *het {
                let values: Vec<f64> = base.groups.iter().map(|g| g.param_values[i]).collect();
                base.add_field(scalar.as_str(), archetype.model.param_names[i].clone(), move |m| {
                    c_float_literal(values[m], scalar_is_float)
                });
            }
        }
        for egp in &archetype.model.extra_global_params {
            let device_ty = if egp.ty == "scalar" { scalar.clone() } else { egp.ty.clone() };
            let egp_name = egp.name.clone();
            let prefix = prefix.clone();
            let names = names.clone();
            base.add_field(format!("{}*", device_ty), egp.name.clone(), move |m| {
                format!("{}{}{}", prefix, egp_name, names[m])
            });
        }

        Self { base, target, het_params, scalar_is_float }
    }

    /// Substitution for model parameter `i`.
    pub fn param_ref(&self, i: usize) -> String {
        let archetype = self.base.archetype();
        if self.het_params[i] {
            format!("group->{}", archetype.model.param_names[i])
        } else {
            format!("({})", c_float_literal(archetype.param_values[i], self.scalar_is_float))
        }
    }

    pub fn context_label(&self) -> String {
        format!("custom update : merged{}", self.base.index)
    }
}

/// Merged group for synapse-sized custom updates.
pub struct CustomWuUpdateMerged<'m> {
    pub base: GroupMergedBase<'m, CustomWuUpdate>,
    /// Synapse group of the archetype
    pub synapse: &'m SynapseGroup,
    pub het_params: Vec<bool>,
    scalar_is_float: bool,
}

impl<'m> CustomWuUpdateMerged<'m> {
    pub fn new(
        index: usize,
        groups: Vec<&'m CustomWuUpdate>,
        model: &'m NetworkModel,
        support: &dyn MergeSupport,
    ) -> Self {
        let scalar = model.precision.name().to_string();
        let scalar_is_float = model.precision.name() == "float";
        let prefix = support.var_prefix().to_string();
        let archetype = groups[0];
        let synapse = model.synapse_group(&archetype.synapse_group).expect("validated model");
        let het_params = heterogeneous_mask(&groups, archetype.model.param_names.len(), |g| {
            g.param_values.as_slice()
        });

        let mut base = GroupMergedBase::new(index, groups);
        let member_syn: Vec<&SynapseGroup> = base
            .groups
            .iter()
            .map(|g| model.synapse_group(&g.synapse_group).expect("validated model"))
            .collect();

        base.add_field("unsigned int", "rowStride", {
            let strides: Vec<u32> =
                member_syn.iter().map(|s| support.row_stride(model, s)).collect();
            move |m| strides[m].to_string()
        });
        base.add_field("unsigned int", "numSrcNeurons", {
            let sizes: Vec<u32> = member_syn
                .iter()
                .map(|s| model.src_of(s).expect("validated model").num_neurons)
                .collect();
            move |m| sizes[m].to_string()
        });
        base.add_field("unsigned int", "numTrgNeurons", {
            let sizes: Vec<u32> = member_syn
                .iter()
                .map(|s| model.trg_of(s).expect("validated model").num_neurons)
                .collect();
            move |m| sizes[m].to_string()
        });
        if synapse.matrix.is_sparse() {
            let syn_names: Vec<String> = member_syn.iter().map(|s| s.name.clone()).collect();
            {
                let prefix = prefix.clone();
                let syn_names = syn_names.clone();
                base.add_field("unsigned int*", "ind", move |m| {
                    format!("{}ind{}", prefix, syn_names[m])
                });
            }
            let prefix = prefix.clone();
            base.add_field("unsigned int*", "synRemap", move |m| {
                format!("{}synRemap{}", prefix, syn_names[m])
            });
        }

        let names: Vec<String> = base.groups.iter().map(|g| g.name.clone()).collect();
        for var in &archetype.model.vars {
            let device_ty = if var.ty == "scalar" { scalar.clone() } else { var.ty.clone() };
            let var_name = var.name.clone();
            let prefix = prefix.clone();
            let names = names.clone();
            base.add_field(format!("{}*", device_ty), var.name.clone(), move |m| {
                format!("{}{}{}", prefix, var_name, names[m])
            });
        }
        for (r, decl) in archetype.model.var_refs.iter().enumerate() {
            let device_ty = if decl.ty == "scalar" { scalar.clone() } else { decl.ty.clone() };
            let bindings: Vec<String> = base
                .groups
                .iter()
                .map(|g| format!("{}{}{}", prefix, g.var_references[r].var, g.synapse_group))
                .collect();
            base.add_field(format!("{}*", device_ty), decl.name.clone(), move |m| {
                bindings[m].clone()
            });
            if archetype.var_references[r].transpose_var.is_some() {
                let bindings: Vec<String> = base
                    .groups
                    .iter()
                    .map(|g| {
                        let transpose =
                            g.var_references[r].transpose_var.as_deref().unwrap_or_default();
                        format!("{}{}{}", prefix, transpose, g.synapse_group)
                    })
                    .collect();
                base.add_field(
                    format!("{}*", device_ty),
                    format!("{}Transpose", decl.name),
                    move |m| bindings[m].clone(),
                );
            }
        }
        for (i, het) in het_params.iter().enumerate() {
            if *het {
                let values: Vec<f64> = base.groups.iter().map(|g| g.param_values[i]).collect();
                base.add_field(scalar.as_str(), archetype.model.param_names[i].clone(), move |m| {
                    c_float_literal(values[m], scalar_is_float)
                });
            }
        }

        Self { base, synapse, het_params, scalar_is_float }
    }

    /// Substitution for model parameter `i`.
    pub fn param_ref(&self, i: usize) -> String {
        let archetype = self.base.archetype();
        if self.het_params[i] {
            format!("group->{}", archetype.model.param_names[i])
        } else {
            format!("({})", c_float_literal(archetype.param_values[i], self.scalar_is_float))
        }
    }

    pub fn context_label(&self) -> String {
        format!("custom WU update : merged{}", self.base.index)
    }
}

/// Merged group for host-side batch reductions of custom update variables.
///
/// Fields resolve against host arrays (no device prefix); the runner emits
/// a loop folding batch copies into batch 0 before the device update runs.
pub struct HostReductionMerged<'m> {
    pub base: GroupMergedBase<'m, CustomUpdate>,
    pub target: &'m NeuronGroup,
}

impl<'m> HostReductionMerged<'m> {
    pub fn new(index: usize, groups: Vec<&'m CustomUpdate>, model: &'m NetworkModel) -> Self {
        let archetype = groups[0];
        let target = model.neuron_group(&archetype.target).expect("validated model");

        let mut base = GroupMergedBase::new(index, groups);
        base.add_field("unsigned int", "size", {
            let sizes: Vec<u32> = base
                .groups
                .iter()
                .map(|g| model.neuron_group(&g.target).expect("validated model").num_neurons)
                .collect();
            move |m| sizes[m].to_string()
        });
        for (r, decl) in archetype.model.var_refs.iter().enumerate() {
            let bindings: Vec<String> = base
                .groups
                .iter()
                .map(|g| format!("{}{}", g.var_references[r].var, g.target))
                .collect();
            base.add_field(format!("{}*", decl.ty), decl.name.clone(), move |m| {
                bindings[m].clone()
            });
        }

        Self { base, target }
    }
}
