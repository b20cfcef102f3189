//! Postsynaptic update kernel: back-propagated learning driven by target
//! spikes.

use crate::codegen::backend::{Kernel, SimtBackend};
use crate::codegen::kernels::{add_wu_substitutions, gen_parallel_group, gen_synapse_index_calculation};
use crate::codegen::stream::CodeStream;
use crate::merge::MergedModel;
use crate::subst::Substitutions;
use crate::utils::errors::GenResult;

/// Threads one projection contributes to the postsynaptic kernel: one per
/// column entry for sparse matrices, one per source neuron otherwise.
pub fn num_postsynaptic_update_threads(
    sg: &crate::model::SynapseGroup,
    model: &crate::model::NetworkModel,
) -> u64 {
    if sg.matrix.is_sparse() {
        sg.max_source_connections as u64
    } else {
        model.src_of(sg).map(|n| n.num_neurons).unwrap_or(0) as u64
    }
}

/// Emit the postsynaptic update kernel body.
pub fn gen_postsynaptic_update_kernel(
    s: &mut CodeStream,
    merged: &MergedModel,
    backend: &dyn SimtBackend,
    kernel_subs: &Substitutions,
    id_start: &mut u64,
) -> GenResult<()> {
    let model = merged.model;
    let batch_size = model.batch_size;
    let block_size = backend.kernel_block_size(Kernel::PostsynapticUpdate);
    let tid = backend.thread_id();

    s.line(&format!("{}unsigned int shSpk[{}];", backend.shared_prefix(), block_size));
    if merged.postsynaptic_update.iter().any(|sg| sg.base.archetype().matrix.is_sparse()) {
        s.line(&format!("{}unsigned int shColLength[{}];", backend.shared_prefix(), block_size));
    }
    s.blank();

    for sg in &merged.postsynaptic_update {
        let padded: Vec<u64> = sg
            .base
            .groups
            .iter()
            .map(|member| {
                backend.padded_size(
                    num_postsynaptic_update_threads(member, model),
                    Kernel::PostsynapticUpdate,
                )
            })
            .collect();

        gen_parallel_group(
            s,
            kernel_subs,
            "PostsynapticUpdate",
            sg.base.index,
            &padded,
            id_start,
            backend,
            &mut |s, pop_subs| {
                let sparse = sg.base.archetype().matrix.is_sparse();
                let lid = pop_subs.var("id").to_string();

                gen_synapse_index_calculation(s, sg, batch_size);

                // Lower the learn-post snippet up front
                let mut syn_subs = Substitutions::with_parent(pop_subs);
                syn_subs.add_var("t", "t");
                syn_subs.add_var("id_pre", if sparse { "ipre" } else { lid.as_str() });
                syn_subs.add_var("id_post", "shSpk[j]");
                syn_subs.add_var("id_syn", "synAddress");
                add_wu_substitutions(&mut syn_subs, sg, model, Some("synAddress"));
                let learn_code = syn_subs.apply_check_unreplaced(
                    &sg.base.archetype().wu_model.learn_post_code,
                    &sg.context_label("postsynaptic update"),
                )?;

                s.line(&format!(
                    "const unsigned int numSpikes = group->trgSpkCnt[{}];",
                    sg.post_slot(batch_size)
                ));
                s.line(&format!(
                    "const unsigned int numSpikeBlocks = (numSpikes + {}) / {};",
                    block_size - 1,
                    block_size
                ));
                s.scope("for (unsigned int r = 0; r < numSpikeBlocks; r++)", |s| {
                    s.line(&format!(
                        "const unsigned int numSpikesInBlock = (r == numSpikeBlocks - 1) ? ((numSpikes - 1) % {}) + 1 : {};",
                        block_size, block_size
                    ));
                    s.scope(&format!("if ({} < numSpikesInBlock)", tid), |s| {
                        s.line(&format!(
                            "const unsigned int spk = group->trgSpk[{}];",
                            sg.post_spike_index(batch_size, &format!("(r * {}) + {}", block_size, tid))
                        ));
                        s.line(&format!("shSpk[{}] = spk;", tid));
                        if sparse {
                            s.line(&format!("shColLength[{}] = group->colLength[spk];", tid));
                        }
                    });
                    backend.gen_shared_mem_barrier(s);
                    s.comment("only work on existing neurons");
                    s.scope(&format!("if ({} < group->colStride)", lid), |s| {
                        s.comment("loop through all incoming spikes for learning");
                        s.scope("for (unsigned int j = 0; j < numSpikesInBlock; j++)", |s| {
                            let body = |s: &mut CodeStream| {
                                s.snippet(&learn_code);
                            };
                            if sparse {
                                s.scope(&format!("if ({} < shColLength[j])", lid), |s| {
                                    s.line(&format!(
                                        "const unsigned int synAddress = group->remap[(shSpk[j] * group->colStride) + {}];",
                                        lid
                                    ));
                                    s.line(
                                        "const unsigned int ipre = synAddress / group->rowStride;",
                                    );
                                    body(s);
                                });
                            } else {
                                s.line(&format!(
                                    "const unsigned int synAddress = ({} * group->numTrgNeurons) + shSpk[j];",
                                    lid
                                ));
                                body(s);
                            }
                        });
                    });
                });
                Ok(())
            },
        )?;
    }
    Ok(())
}
