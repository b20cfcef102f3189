//! The device kernel emitters.
//!
//! Every kernel follows the parallel-group dispatch pattern: a single flat
//! thread id is partitioned among merged groups by half-open range tests,
//! each group's span padded to the kernel's block size; within a group the
//! member is located from compile-time offsets and the body runs against
//! `group->` fields with a group-local lane id.

pub mod custom_update;
pub mod init;
pub mod neuron_update;
pub mod postsynaptic;
pub mod presynaptic;
pub mod spike_queue;
pub mod synapse_dynamics;

use crate::codegen::backend::SimtBackend;
use crate::codegen::stream::CodeStream;
use crate::merge::{SynapseMerged, SynapseRole};
use crate::model::NetworkModel;
use crate::subst::Substitutions;
use crate::utils::errors::GenResult;

/// Emit one merged group's slice of a kernel: the range test, the member
/// search, and the body against a child substitution environment whose
/// `id` is the group-local lane.
#[allow(clippy::too_many_arguments)]
pub fn gen_parallel_group(
    s: &mut CodeStream,
    kernel_subs: &Substitutions,
    struct_name: &str,
    group_index: usize,
    padded_sizes: &[u64],
    id_start: &mut u64,
    backend: &dyn SimtBackend,
    body: &mut dyn FnMut(&mut CodeStream, &Substitutions) -> GenResult<()>,
) -> GenResult<()> {
    let total: u64 = padded_sizes.iter().sum();
    let start = *id_start;
    let merged_ty = format!("Merged{}Group{}", struct_name, group_index);
    let merged_array = format!("d_merged{}Group{}", struct_name, group_index);

    s.comment(&format!("merged{}", group_index));
    let header = if start == 0 {
        format!("if(id < {})", total)
    } else {
        format!("if(id >= {} && id < {})", start, start + total)
    };
    s.line(&format!("{} {{", header));
    s.indent();

    let uniform = padded_sizes.windows(2).all(|w| w[0] == w[1]);
    let prefix = backend.pointer_prefix();
    if padded_sizes.len() == 1 {
        s.line(&format!("{}struct {} *group = &{}[0];", prefix, merged_ty, merged_array));
        if start == 0 {
            s.line("const unsigned int lid = id;");
        } else {
            s.line(&format!("const unsigned int lid = id - {};", start));
        }
    } else if uniform {
        let span = padded_sizes[0];
        s.line(&format!("const unsigned int groupIndex = (id - {}) / {};", start, span));
        s.line(&format!("{}struct {} *group = &{}[groupIndex];", prefix, merged_ty, merged_array));
        s.line(&format!("const unsigned int lid = (id - {}) % {};", start, span));
    } else {
        // Heterogeneous member spans: range scan over compile-time offsets
        s.line("unsigned int groupIndex;");
        s.line("unsigned int groupStartID;");
        let mut cumulative = start;
        for (m, padded) in padded_sizes.iter().enumerate() {
            let header = if m == 0 {
                format!("if(id < {})", cumulative + padded)
            } else {
                format!("else if(id < {})", cumulative + padded)
            };
            s.scope(&header, |s| {
                s.line(&format!("groupIndex = {};", m));
                s.line(&format!("groupStartID = {};", cumulative));
            });
            cumulative += padded;
        }
        s.line(&format!("{}struct {} *group = &{}[groupIndex];", prefix, merged_ty, merged_array));
        s.line("const unsigned int lid = id - groupStartID;");
    }

    let mut pop_subs = Substitutions::with_parent(kernel_subs);
    pop_subs.add_var_override("id", "lid");
    body(s, &pop_subs)?;

    s.dedent();
    s.line("}");

    *id_start += total;
    Ok(())
}

/// Emit the batch/delay index preamble shared by the synapse kernels.
pub fn gen_synapse_index_calculation(s: &mut CodeStream, mg: &SynapseMerged, batch_size: u32) {
    let archetype = mg.base.archetype();
    if batch_size > 1 {
        s.line("const unsigned int preBatchOffset = group->numSrcNeurons * batch;");
        s.line("const unsigned int postBatchOffset = group->numTrgNeurons * batch;");
        if archetype.matrix.has_individual_weights() {
            s.line("const unsigned int synBatchOffset = preBatchOffset * group->rowStride;");
        }
    }

    match mg.role {
        SynapseRole::PresynapticUpdate if mg.src.delay_required => {
            let slots = mg.src.delay_slots();
            let delta = (slots - (archetype.delay_steps % slots)) % slots;
            s.line(&format!(
                "const unsigned int preDelaySlot = (*group->srcSpkQuePtr + {}) % {};",
                delta, slots
            ));
            s.line("const unsigned int preDelayOffset = preDelaySlot * group->numSrcNeurons;");
            if batch_size > 1 {
                s.line(&format!(
                    "const unsigned int preBatchDelaySlot = preDelaySlot + (batch * {});",
                    slots
                ));
                s.line(
                    "const unsigned int preBatchDelayOffset = preBatchDelaySlot * group->numSrcNeurons;",
                );
            }
        }
        SynapseRole::PostsynapticUpdate if mg.trg.delay_required => {
            let slots = mg.trg.delay_slots();
            let delta = (slots - (archetype.back_prop_delay_steps % slots)) % slots;
            s.line(&format!(
                "const unsigned int postDelaySlot = (*group->trgSpkQuePtr + {}) % {};",
                delta, slots
            ));
            s.line("const unsigned int postDelayOffset = postDelaySlot * group->numTrgNeurons;");
            if batch_size > 1 {
                s.line(&format!(
                    "const unsigned int postBatchDelaySlot = postDelaySlot + (batch * {});",
                    slots
                ));
                s.line(
                    "const unsigned int postBatchDelayOffset = postBatchDelaySlot * group->numTrgNeurons;",
                );
            }
        }
        _ => {}
    }
}

/// Bind weight-update model parameters, derived parameters, variables and
/// extra global parameters for a synapse merged group.
///
/// `syn_index` is the expression addressing the current synapse in
/// per-synapse variable arrays; `None` for procedural connectivity where
/// only global weights exist.
pub fn add_wu_substitutions(
    subs: &mut Substitutions,
    mg: &SynapseMerged,
    model: &NetworkModel,
    syn_index: Option<&str>,
) {
    let archetype = mg.base.archetype();
    for (i, name) in archetype.wu_model.param_names.iter().enumerate() {
        subs.add_var(name.clone(), mg.wu_param_ref(i));
    }
    for (i, name) in archetype.wu_model.derived_param_names.iter().enumerate() {
        subs.add_var(name.clone(), mg.wu_derived_param_ref(i));
    }
    if archetype.matrix.has_individual_weights() {
        if let Some(index) = syn_index {
            let indexed = mg.syn_var_index(model.batch_size, index);
            for var in &archetype.wu_model.vars {
                subs.add_var(var.name.clone(), format!("group->{}[{}]", var.name, indexed));
            }
        }
    } else {
        for (i, var) in archetype.wu_model.vars.iter().enumerate() {
            subs.add_var(var.name.clone(), mg.global_var_ref(i));
        }
    }
    for egp in &archetype.wu_model.extra_global_params {
        subs.add_var(egp.name.clone(), format!("group->{}", egp.name));
    }

    // $(name_pre) / $(name_post) access into the neuron populations, where
    // the caller has bound the neuron indices
    if let Some(id_pre) = subs.get_var("id_pre").map(|s| s.to_string()) {
        let indexed = mg.pre_var_index(model.batch_size, &id_pre);
        for var in &mg.src.model.vars {
            let name = format!("{}_pre", var.name);
            if !subs.has_var(&name) {
                subs.add_var(name, format!("group->{}Pre[{}]", var.name, indexed));
            }
        }
    }
    if let Some(id_post) = subs.get_var("id_post").map(|s| s.to_string()) {
        let indexed = mg.post_var_index(model.batch_size, &id_post);
        for var in &mg.trg.model.vars {
            let name = format!("{}_post", var.name);
            if !subs.has_var(&name) {
                subs.add_var(name, format!("group->{}Post[{}]", var.name, indexed));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::backend::ReferenceBackend;

    #[test]
    fn test_parallel_group_range_tests() {
        let backend = ReferenceBackend::default();
        let mut s = CodeStream::new();
        let mut kernel_subs = Substitutions::new();
        kernel_subs.add_var("id", "id");

        let mut id_start = 0;
        gen_parallel_group(
            &mut s,
            &kernel_subs,
            "NeuronUpdate",
            0,
            &[128, 256],
            &mut id_start,
            &backend,
            &mut |s, subs| {
                s.line(&format!("process({});", subs.var("id")));
                Ok(())
            },
        )
        .unwrap();
        assert_eq!(id_start, 384);

        let out = s.finish();
        assert!(out.contains("if(id < 384)"), "{}", out);
        assert!(out.contains("groupIndex"));
        assert!(out.contains("process(lid);"));
    }

    #[test]
    fn test_parallel_group_heterogeneous_scan() {
        let backend = ReferenceBackend::default();
        let mut s = CodeStream::new();
        let mut kernel_subs = Substitutions::new();
        kernel_subs.add_var("id", "id");

        let mut id_start = 64;
        gen_parallel_group(
            &mut s,
            &kernel_subs,
            "SynapseDynamics",
            1,
            &[96, 32],
            &mut id_start,
            &backend,
            &mut |_, _| Ok(()),
        )
        .unwrap();
        assert_eq!(id_start, 64 + 128);

        let out = s.finish();
        assert!(out.contains("if(id >= 64 && id < 192)"), "{}", out);
        assert!(out.contains("if(id < 160)"));
        assert!(out.contains("else if(id < 192)"));
    }
}
