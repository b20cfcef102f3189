//! Synapse dynamics kernel: one thread per live synapse, every timestep.

use crate::codegen::backend::{AtomicMemSpace, AtomicOp, Kernel, SimtBackend};
use crate::codegen::kernels::{add_wu_substitutions, gen_parallel_group, gen_synapse_index_calculation};
use crate::codegen::stream::CodeStream;
use crate::merge::MergedModel;
use crate::model::{NetworkModel, SynapseGroup};
use crate::subst::Substitutions;
use crate::utils::errors::GenResult;

/// Threads one projection contributes to the dynamics kernel.
///
/// For sparse matrices the exact live-synapse count is only known after
/// `initializeSparse` has run, so the conservative `rows × maxConnections`
/// bound is used; the kernel guard against `synRemap[0]` skips the excess.
pub fn num_synapse_dynamics_threads(sg: &SynapseGroup, model: &NetworkModel) -> u64 {
    let src = model.src_of(sg).map(|n| n.num_neurons).unwrap_or(0) as u64;
    if sg.matrix.is_sparse() {
        src * sg.max_connections as u64
    } else {
        let trg = model.trg_of(sg).map(|n| n.num_neurons).unwrap_or(0) as u64;
        src * trg
    }
}

/// Emit the synapse dynamics kernel body.
pub fn gen_synapse_dynamics_kernel(
    s: &mut CodeStream,
    merged: &MergedModel,
    backend: &dyn SimtBackend,
    kernel_subs: &Substitutions,
    id_start: &mut u64,
) -> GenResult<()> {
    let model = merged.model;
    let batch_size = model.batch_size;

    for sg in &merged.synapse_dynamics {
        let padded: Vec<u64> = sg
            .base
            .groups
            .iter()
            .map(|member| {
                backend.padded_size(
                    num_synapse_dynamics_threads(member, model),
                    Kernel::SynapseDynamicsUpdate,
                )
            })
            .collect();

        gen_parallel_group(
            s,
            kernel_subs,
            "SynapseDynamics",
            sg.base.index,
            &padded,
            id_start,
            backend,
            &mut |s, pop_subs| {
                let archetype = sg.base.archetype();
                let sparse = archetype.matrix.is_sparse();
                let lid = pop_subs.var("id").to_string();

                gen_synapse_index_calculation(s, sg, batch_size);

                let mut syn_subs = Substitutions::with_parent(pop_subs);
                syn_subs.add_var("t", "t");
                if sparse {
                    syn_subs.add_var("id_pre", "(s / group->rowStride)");
                    syn_subs.add_var("id_post", "group->ind[s]");
                    syn_subs.add_var("id_syn", "s");
                } else {
                    syn_subs.add_var("id_pre", format!("({} / group->rowStride)", lid));
                    syn_subs.add_var("id_post", format!("({} % group->rowStride)", lid));
                    syn_subs.add_var("id_syn", lid.clone());
                }

                // Dendritic delay writes always go through an atomic
                let atomic = backend.atomic(
                    model.precision.name(),
                    AtomicOp::Add,
                    AtomicMemSpace::Global,
                );
                if archetype.dendritic_delay_required {
                    let post = syn_subs.var("id_post").to_string();
                    syn_subs.add_func(
                        "addToInSynDelay",
                        2,
                        format!(
                            "{}(&group->denDelay[{}], $(0))",
                            atomic,
                            sg.post_den_delay_index(batch_size, &post, "$(1)")
                        ),
                    );
                } else {
                    let post = syn_subs.var("id_post").to_string();
                    syn_subs.add_func(
                        "addToInSyn",
                        1,
                        format!(
                            "{}(&group->inSyn[{}], $(0))",
                            atomic,
                            sg.post_isyn_index(batch_size, &post)
                        ),
                    );
                }

                let syn_index = syn_subs.var("id_syn").to_string();
                add_wu_substitutions(&mut syn_subs, sg, model, Some(&syn_index));
                let dynamics_code = syn_subs.apply_check_unreplaced(
                    &archetype.wu_model.synapse_dynamics_code,
                    &sg.context_label("synapse dynamics"),
                )?;

                let guard = if sparse {
                    format!("if ({} < group->synRemap[0])", lid)
                } else {
                    format!("if ({} < (group->numSrcNeurons * group->numTrgNeurons))", lid)
                };
                s.scope(&guard, |s| {
                    if sparse {
                        s.line(&format!(
                            "const unsigned int s = group->synRemap[1 + {}];",
                            lid
                        ));
                    }
                    s.snippet(&dynamics_code);
                });
                Ok(())
            },
        )?;
    }
    Ok(())
}
