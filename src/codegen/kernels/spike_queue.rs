//! Spike-queue and dendritic-delay pointer bookkeeping kernels, run before
//! the neuron and synapse updates respectively.

use crate::codegen::backend::{Kernel, SimtBackend};
use crate::codegen::kernels::gen_parallel_group;
use crate::codegen::stream::CodeStream;
use crate::merge::{MergedModel, SpikeQueueUpdateMerged};
use crate::model::NeuronGroup;
use crate::subst::Substitutions;
use crate::utils::errors::GenResult;

/// Emit the pre-neuron spike-queue-reset kernel body.
///
/// Groups that maintain previous spike times need one thread per neuron to
/// stamp `prevST` before the queue pointer advances; plain groups need one
/// thread per member to advance the pointer and zero the counts.
pub fn gen_pre_neuron_reset_kernel(
    s: &mut CodeStream,
    merged: &MergedModel,
    backend: &dyn SimtBackend,
    kernel_subs: &Substitutions,
    id_start: &mut u64,
) -> GenResult<()> {
    let batch_size = merged.model.batch_size;

    for n in &merged.spike_queue_update {
        let archetype = n.base.archetype();
        if archetype.needs_prev_time_update() {
            let padded: Vec<u64> = n
                .base
                .groups
                .iter()
                .map(|g| backend.padded_size(g.num_neurons as u64, Kernel::PreNeuronReset))
                .collect();
            gen_parallel_group(
                s,
                kernel_subs,
                "NeuronSpikeQueueUpdate",
                n.base.index,
                &padded,
                id_start,
                backend,
                &mut |s, pop_subs| {
                    gen_prev_time_update(s, n, batch_size, pop_subs);
                    s.blank();

                    // First lane advances the pointer and resets the counts.
                    // The advance can overtake the reads above in other
                    // lanes; intra-block ordering is the runtime's problem.
                    s.scope(&format!("if({} == 0)", pop_subs.var("id")), |s| {
                        if archetype.delay_required {
                            s.line(&format!(
                                "*group->spkQuePtr = (*group->spkQuePtr + 1) % {};",
                                archetype.delay_slots()
                            ));
                        }
                        with_batch_loop(s, batch_size, |s| {
                            gen_spike_count_reset(s, archetype, batch_size);
                        });
                    });
                    Ok(())
                },
            )?;
        } else {
            let count = n.base.len() as u64;
            let start = *id_start;
            s.comment(&format!("merged{}", n.base.index));
            let header = if start == 0 {
                format!("if(id < {})", count)
            } else {
                format!("if(id >= {} && id < {})", start, start + count)
            };
            s.scope(&header, |s| {
                s.line(&format!(
                    "{}struct MergedNeuronSpikeQueueUpdateGroup{} *group = &d_mergedNeuronSpikeQueueUpdateGroup{}[id - {}];",
                    backend.pointer_prefix(),
                    n.base.index,
                    n.base.index,
                    start
                ));
                if archetype.delay_required {
                    s.line(&format!(
                        "*group->spkQuePtr = (*group->spkQuePtr + 1) % {};",
                        archetype.delay_slots()
                    ));
                }
                with_batch_loop(s, batch_size, |s| {
                    gen_spike_count_reset(s, archetype, batch_size);
                });
            });
            *id_start += count;
        }
    }
    s.blank();
    Ok(())
}

fn with_batch_loop(s: &mut CodeStream, batch_size: u32, body: impl FnOnce(&mut CodeStream)) {
    if batch_size > 1 {
        s.scope(
            &format!("for(unsigned int batch = 0; batch < {}; batch++)", batch_size),
            body,
        );
    } else {
        body(s);
    }
}

fn gen_prev_time_update(
    s: &mut CodeStream,
    n: &SpikeQueueUpdateMerged,
    batch_size: u32,
    pop_subs: &Substitutions,
) {
    let archetype = n.base.archetype();
    let lid = pop_subs.var("id").to_string();

    with_batch_loop(s, batch_size, |s| {
        if archetype.delay_required {
            if batch_size == 1 {
                s.line("const unsigned int lastTimestepDelaySlot = *group->spkQuePtr;");
            } else {
                s.line(&format!(
                    "const unsigned int lastTimestepDelaySlot = *group->spkQuePtr + (batch * {});",
                    archetype.delay_slots()
                ));
            }
            s.line(
                "const unsigned int lastTimestepDelayOffset = lastTimestepDelaySlot * group->numNeurons;",
            );
            if archetype.prev_spike_time_required {
                // spkQuePtr still points at the last timestep's slot here
                s.scope(
                    &format!("if({} < group->spkCnt[lastTimestepDelaySlot])", lid),
                    |s| {
                        s.line(&format!(
                            "group->prevST[lastTimestepDelayOffset + group->spk[lastTimestepDelayOffset + {}]] = t - DT;",
                            lid
                        ));
                    },
                );
            }
            if archetype.prev_spike_event_time_required {
                s.scope(
                    &format!("if({} < group->spkCntEvnt[lastTimestepDelaySlot])", lid),
                    |s| {
                        s.line(&format!(
                            "group->prevSET[lastTimestepDelayOffset + group->spkEvnt[lastTimestepDelayOffset + {}]] = t - DT;",
                            lid
                        ));
                    },
                );
            }
        } else {
            if batch_size > 1 {
                s.line("const unsigned int batchOffset = group->numNeurons * batch;");
            }
            let slot = if batch_size > 1 { "batch" } else { "0" };
            let offset = if batch_size > 1 { "batchOffset + " } else { "" };
            if archetype.prev_spike_time_required {
                s.scope(&format!("if({} < group->spkCnt[{}])", lid, slot), |s| {
                    s.line(&format!(
                        "group->prevST[group->spk[{}{}]] = t - DT;",
                        offset, lid
                    ));
                });
            }
            if archetype.prev_spike_event_time_required {
                s.scope(&format!("if({} < group->spkCntEvnt[{}])", lid, slot), |s| {
                    s.line(&format!(
                        "group->prevSET[group->spkEvnt[{}{}]] = t - DT;",
                        offset, lid
                    ));
                });
            }
        }
    });
}

fn gen_spike_count_reset(s: &mut CodeStream, archetype: &NeuronGroup, batch_size: u32) {
    let plain_slot = if batch_size > 1 { "batch" } else { "0" };
    if archetype.delay_required && archetype.true_spike_required {
        let slot = if batch_size > 1 {
            format!("*group->spkQuePtr + (batch * {})", archetype.delay_slots())
        } else {
            "*group->spkQuePtr".to_string()
        };
        s.line(&format!("group->spkCnt[{}] = 0;", slot));
    } else {
        s.line(&format!("group->spkCnt[{}] = 0;", plain_slot));
    }
    if archetype.spike_event_required {
        if archetype.delay_required {
            let slot = if batch_size > 1 {
                format!("*group->spkQuePtr + (batch * {})", archetype.delay_slots())
            } else {
                "*group->spkQuePtr".to_string()
            };
            s.line(&format!("group->spkCntEvnt[{}] = 0;", slot));
        } else {
            s.line(&format!("group->spkCntEvnt[{}] = 0;", plain_slot));
        }
    }
}

/// Emit the pre-synapse dendritic-delay-update kernel body: one thread per
/// member advances the circular pointer.
pub fn gen_pre_synapse_reset_kernel(
    s: &mut CodeStream,
    merged: &MergedModel,
    backend: &dyn SimtBackend,
    id_start: &mut u64,
) {
    for n in &merged.dendritic_delay_update {
        let count = n.base.len() as u64;
        let start = *id_start;
        s.comment(&format!("merged{}", n.base.index));
        let header = if start == 0 {
            format!("if(id < {})", count)
        } else {
            format!("if(id >= {} && id < {})", start, start + count)
        };
        s.scope(&header, |s| {
            s.line(&format!(
                "{}struct MergedSynapseDendriticDelayUpdateGroup{} *group = &d_mergedSynapseDendriticDelayUpdateGroup{}[id - {}];",
                backend.pointer_prefix(),
                n.base.index,
                n.base.index,
                start
            ));
            s.line(&format!(
                "*group->denDelayPtr = (*group->denDelayPtr + 1) % {};",
                n.base.archetype().max_dendritic_delay_timesteps
            ));
        });
        *id_start += count;
    }
    s.blank();
}
