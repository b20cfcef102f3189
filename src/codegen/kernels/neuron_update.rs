//! Neuron update kernel.
//!
//! Spikes are staged in block-shared arrays, compacted into the global
//! spike queues with one atomic per block, and optionally recorded as
//! 32-lane bitmap words. Lane 0 compacts true spikes and lane 1 compacts
//! spike-like events so the two phases overlap.

use crate::codegen::backend::{AtomicMemSpace, AtomicOp, Kernel, SimtBackend};
use crate::codegen::kernels::gen_parallel_group;
use crate::codegen::stream::CodeStream;
use crate::merge::{MergedModel, NeuronUpdateMerged};
use crate::model::{NetworkModel, NeuronGroup, VarAccess};
use crate::subst::Substitutions;
use crate::utils::errors::GenResult;

/// Emit the neuron update kernel body; `id_start` accumulates the launch
/// width.
pub fn gen_neuron_update_kernel(
    s: &mut CodeStream,
    merged: &MergedModel,
    backend: &dyn SimtBackend,
    kernel_subs: &Substitutions,
    id_start: &mut u64,
) -> GenResult<()> {
    let model = merged.model;
    let batch_size = model.batch_size;
    let block_size = backend.kernel_block_size(Kernel::NeuronUpdate);
    let tid = backend.thread_id();

    let any_events =
        merged.neuron_update.iter().any(|n| n.base.archetype().spike_event_required);
    let any_true_spikes =
        merged.neuron_update.iter().any(|n| n.base.archetype().emits_true_spikes());
    let any_recording =
        merged.neuron_update.iter().any(|n| n.base.archetype().spike_recording_enabled);
    let any_event_recording =
        merged.neuron_update.iter().any(|n| n.base.archetype().spike_event_recording_enabled);

    if any_events {
        s.line(&format!("{}unsigned int shSpkEvnt[{}];", backend.shared_prefix(), block_size));
        s.line(&format!("{}unsigned int shPosSpkEvnt;", backend.shared_prefix()));
        s.line(&format!("{}unsigned int shSpkEvntCount;", backend.shared_prefix()));
        s.scope(&format!("if ({} == 1)", tid), |s| {
            s.line("shSpkEvntCount = 0;");
        });
        s.blank();
    }
    if any_true_spikes {
        s.line(&format!("{}unsigned int shSpk[{}];", backend.shared_prefix(), block_size));
        s.line(&format!("{}unsigned int shPosSpk;", backend.shared_prefix()));
        s.line(&format!("{}unsigned int shSpkCount;", backend.shared_prefix()));
        s.scope(&format!("if ({} == 0)", tid), |s| {
            s.line("shSpkCount = 0;");
        });
        s.blank();
    }
    if any_recording {
        gen_recording_shared_mem_init(s, backend, "");
    }
    if any_event_recording {
        gen_recording_shared_mem_init(s, backend, "Evnt");
    }
    backend.gen_shared_mem_barrier(s);
    s.blank();

    for ng in &merged.neuron_update {
        let padded: Vec<u64> = ng
            .base
            .groups
            .iter()
            .map(|g| backend.padded_size(g.num_neurons as u64, Kernel::NeuronUpdate))
            .collect();

        gen_parallel_group(
            s,
            kernel_subs,
            "NeuronUpdate",
            ng.base.index,
            &padded,
            id_start,
            backend,
            &mut |s, pop_subs| gen_group_body(s, ng, model, backend, pop_subs),
        )?;
    }
    Ok(())
}

fn gen_group_body(
    s: &mut CodeStream,
    ng: &NeuronUpdateMerged,
    model: &NetworkModel,
    backend: &dyn SimtBackend,
    pop_subs: &Substitutions,
) -> GenResult<()> {
    let archetype = ng.base.archetype();
    let batch_size = model.batch_size;
    let tid = backend.thread_id();
    let lid = pop_subs.var("id").to_string();

    gen_neuron_index_calculation(s, ng, batch_size);
    s.blank();

    // Simulate; spikes land in the shared staging arrays
    let sim = {
        let mut sim_stream = CodeStream::new();
        gen_neuron_sim(&mut sim_stream, ng, model, backend, pop_subs)?;
        sim_stream.finish()
    };
    s.scope(&format!("if({} < group->numNeurons)", lid), |s| {
        if archetype.sim_rng_required {
            backend.gen_population_rng_preamble(
                s,
                &format!("group->rng[{}]", ng.var_index(batch_size, &lid)),
            );
        }
        s.snippet(&sim);
        if archetype.sim_rng_required {
            backend.gen_population_rng_postamble(
                s,
                &format!("group->rng[{}]", ng.var_index(batch_size, &lid)),
            );
        }
    });
    backend.gen_shared_mem_barrier(s);
    s.blank();

    // Lane 1 reserves queue space for this block's events
    if archetype.spike_event_required {
        let slot = count_slot(archetype, batch_size, archetype.delay_required);
        s.scope(&format!("if ({} == 1)", tid), |s| {
            s.scope("if (shSpkEvntCount > 0)", |s| {
                s.line(&format!(
                    "shPosSpkEvnt = {}(&group->spkCntEvnt[{}], shSpkEvntCount);",
                    backend.atomic("unsigned int", AtomicOp::Add, AtomicMemSpace::Global),
                    slot
                ));
            });
        });
        backend.gen_shared_mem_barrier(s);
    }

    // Lane 0 reserves queue space for this block's true spikes
    if archetype.emits_true_spikes() {
        let delayed = archetype.delay_required && archetype.true_spike_required;
        let slot = count_slot(archetype, batch_size, delayed);
        s.scope(&format!("if ({} == 0)", tid), |s| {
            s.scope("if (shSpkCount > 0)", |s| {
                s.line(&format!(
                    "shPosSpk = {}(&group->spkCnt[{}], shSpkCount);",
                    backend.atomic("unsigned int", AtomicOp::Add, AtomicMemSpace::Global),
                    slot
                ));
            });
        });
        backend.gen_shared_mem_barrier(s);
    }

    // Copy staged events out to the global queue
    let queue_offset = ng.write_queue_offset(batch_size, archetype.delay_required);
    if archetype.spike_event_required {
        s.scope(&format!("if ({} < shSpkEvntCount)", tid), |s| {
            s.line(&format!("const unsigned int n = shSpkEvnt[{}];", tid));
            s.line(&format!("group->spkEvnt[{}shPosSpkEvnt + {}] = n;", queue_offset, tid));
            if archetype.spike_event_time_required {
                s.line(&format!("group->seT[{}n] = t;", queue_offset));
            }
        });
    }

    // Copy staged true spikes out to the global queue
    if archetype.emits_true_spikes() {
        let queue_offset_true = ng.write_queue_offset(
            batch_size,
            archetype.delay_required && archetype.true_spike_required,
        );
        s.scope(&format!("if ({} < shSpkCount)", tid), |s| {
            s.line(&format!("const unsigned int n = shSpk[{}];", tid));
            s.line(&format!("group->spk[{}shPosSpk + {}] = n;", queue_offset_true, tid));
            if archetype.spike_time_required {
                s.line(&format!("group->sT[{}n] = t;", queue_offset));
            }
        });
    }

    // One lane per 32 copies this block's recording words to global memory
    if archetype.spike_recording_enabled || archetype.spike_event_recording_enabled {
        let block_size = backend.kernel_block_size(Kernel::NeuronUpdate);
        let guard = if block_size == 32 {
            format!("if ({} == 0)", tid)
        } else {
            format!("if ({} < {})", tid, block_size / 32)
        };
        s.scope(&guard, |s| {
            s.line("const unsigned int numRecordingWords = (group->numNeurons + 31) / 32;");
            let mut global_index = format!(
                "(recordingTimestep * numRecordingWords * {}) + ({} / 32) + {}",
                batch_size, lid, tid
            );
            if batch_size > 1 {
                global_index.push_str(" + (batch * numRecordingWords)");
            }
            let word = |suffix: &str| {
                if block_size == 32 {
                    format!("shSpk{}Record", suffix)
                } else {
                    format!("shSpk{}Record[{}]", suffix, tid)
                }
            };
            if archetype.spike_recording_enabled {
                s.line(&format!("group->recordSpk[{}] = {};", global_index, word("")));
            }
            if archetype.spike_event_recording_enabled {
                s.line(&format!("group->recordSpkEvent[{}] = {};", global_index, word("Evnt")));
            }
        });
    }
    Ok(())
}

/// Index into a spike count array: the write delay slot (batch-shifted)
/// when delayed, the batch otherwise.
fn count_slot(archetype: &NeuronGroup, batch_size: u32, delayed: bool) -> String {
    if delayed {
        if batch_size > 1 {
            format!("(batch * {}) + writeDelaySlot", archetype.delay_slots())
        } else {
            "writeDelaySlot".to_string()
        }
    } else if batch_size > 1 {
        "batch".to_string()
    } else {
        "0".to_string()
    }
}

fn gen_neuron_index_calculation(s: &mut CodeStream, ng: &NeuronUpdateMerged, batch_size: u32) {
    let archetype = ng.base.archetype();
    if batch_size > 1 {
        s.line("const unsigned int batchOffset = group->numNeurons * batch;");
    }
    if archetype.delay_required {
        let slots = archetype.delay_slots();
        s.line(&format!(
            "const unsigned int readDelaySlot = (*group->spkQuePtr + {}) % {};",
            slots - 1,
            slots
        ));
        s.line("const unsigned int writeDelaySlot = *group->spkQuePtr;");
        if batch_size > 1 {
            s.line(&format!(
                "const unsigned int readDelayOffset = ((batch * {}) + readDelaySlot) * group->numNeurons;",
                slots
            ));
            s.line(&format!(
                "const unsigned int writeDelayOffset = ((batch * {}) + writeDelaySlot) * group->numNeurons;",
                slots
            ));
        } else {
            s.line("const unsigned int readDelayOffset = readDelaySlot * group->numNeurons;");
            s.line("const unsigned int writeDelayOffset = writeDelaySlot * group->numNeurons;");
        }
    }
}

fn gen_recording_shared_mem_init(s: &mut CodeStream, backend: &dyn SimtBackend, suffix: &str) {
    let block_size = backend.kernel_block_size(Kernel::NeuronUpdate);
    let tid = backend.thread_id();
    if block_size == 32 {
        s.line(&format!("{}uint32_t shSpk{}Record;", backend.shared_prefix(), suffix));
        s.scope(&format!("if ({} == 0)", tid), |s| {
            s.line(&format!("shSpk{}Record = 0;", suffix));
        });
    } else {
        s.line(&format!(
            "{}uint32_t shSpk{}Record[{}];",
            backend.shared_prefix(),
            suffix,
            block_size / 32
        ));
        s.scope(&format!("if ({} < {})", tid, block_size / 32), |s| {
            s.line(&format!("shSpk{}Record[{}] = 0;", suffix, tid));
        });
    }
}

/// The staged spike emission: shared atomic increment plus staging-array
/// write, and the recording bit when enabled.
fn gen_emit_spike(
    s: &mut CodeStream,
    backend: &dyn SimtBackend,
    lid: &str,
    suffix: &str,
    recording_enabled: bool,
) {
    let shared_add = backend.atomic("unsigned int", AtomicOp::Add, AtomicMemSpace::Shared);
    s.line(&format!(
        "const unsigned int spk{}Idx = {}(&shSpk{}Count, 1);",
        suffix, shared_add, suffix
    ));
    s.line(&format!("shSpk{}[spk{}Idx] = {};", suffix, suffix, lid));
    if recording_enabled {
        let shared_or = backend.atomic("unsigned int", AtomicOp::Or, AtomicMemSpace::Shared);
        let tid = backend.thread_id();
        if backend.kernel_block_size(Kernel::NeuronUpdate) == 32 {
            s.line(&format!("{}(&shSpk{}Record, 1 << {});", shared_or, suffix, tid));
        } else {
            s.line(&format!(
                "{}(&shSpk{}Record[{} / 32], 1 << ({} % 32));",
                shared_or, suffix, tid, tid
            ));
        }
    }
}

/// Lower one merged group's synaptic-input accumulation, sim snippet,
/// threshold handling and variable write-back.
fn gen_neuron_sim(
    s: &mut CodeStream,
    ng: &NeuronUpdateMerged,
    model: &NetworkModel,
    backend: &dyn SimtBackend,
    pop_subs: &Substitutions,
) -> GenResult<()> {
    let archetype = ng.base.archetype();
    let batch_size = model.batch_size;
    let scalar = model.precision.name();
    let lid = pop_subs.var("id").to_string();
    let var_idx = ng.var_index(batch_size, &lid);
    let context = format!("neuron update : merged{}", ng.base.index);

    // Pull state variables into registers
    for var in &archetype.model.vars {
        let ty = if var.ty == "scalar" { scalar } else { &var.ty };
        s.line(&format!("{} l{} = group->{}[{}];", ty, var.name, var.name, var_idx));
    }

    let mut subs = Substitutions::with_parent(pop_subs);
    subs.add_var("t", "t");
    for var in &archetype.model.vars {
        subs.add_var(var.name.clone(), format!("l{}", var.name));
    }
    for (i, name) in archetype.model.param_names.iter().enumerate() {
        subs.add_var(name.clone(), ng.param_ref(i));
    }
    for (i, name) in archetype.model.derived_param_names.iter().enumerate() {
        subs.add_var(name.clone(), ng.derived_param_ref(i));
    }
    for egp in &archetype.model.extra_global_params {
        subs.add_var(egp.name.clone(), format!("group->{}", egp.name));
    }
    if archetype.sim_rng_required {
        for (name, replacement) in backend.rng_functions("lrng") {
            subs.add_var(name, replacement);
        }
    }
    let read_idx = if archetype.delay_required {
        format!("readDelayOffset + {}", lid)
    } else {
        var_idx.clone()
    };
    if archetype.spike_time_required {
        subs.add_var("sT", format!("group->sT[{}]", read_idx));
    }
    if archetype.prev_spike_time_required {
        subs.add_var("prev_sT", format!("group->prevST[{}]", read_idx));
    }

    // Accumulate synaptic input
    s.line(&format!("{} Isyn = 0;", scalar));
    subs.add_var("Isyn", "Isyn");
    for (i, in_syn) in ng.in_syns.iter().enumerate() {
        let psm = &in_syn.archetype().ps_model;
        let lin = format!("linSynInSyn{}", i);
        s.line(&format!("{} {} = group->inSynInSyn{}[{}];", scalar, lin, i, var_idx));
        if in_syn.archetype().dendritic_delay_required {
            s.line(&format!(
                "const unsigned int denDelayIdx{} = (*group->denDelayPtrInSyn{} * group->numNeurons) + {};",
                i, i, var_idx
            ));
            s.comment("fold in the arriving dendritic delay slot and clear it");
            s.line(&format!("{} += group->denDelayInSyn{}[denDelayIdx{}];", lin, i, i));
            s.line(&format!("group->denDelayInSyn{}[denDelayIdx{}] = 0;", i, i));
        }

        let mut psm_subs = Substitutions::with_parent(&subs);
        psm_subs.add_var("inSyn", lin.clone());
        for (p, name) in psm.param_names.iter().enumerate() {
            psm_subs.add_var(
                name.clone(),
                in_syn.param_ref(&format!("InSyn{}", i), p, model.precision.name() == "float"),
            );
        }
        if psm.apply_input_code.is_empty() {
            s.line(&format!("Isyn += {};", lin));
        } else {
            let code = psm_subs.apply_check_unreplaced(&psm.apply_input_code, &context)?;
            s.snippet(&code);
        }
        if psm.decay_code.is_empty() {
            s.line(&format!("{} = 0;", lin));
        } else {
            let code = psm_subs.apply_check_unreplaced(&psm.decay_code, &context)?;
            s.snippet(&code);
        }
        s.line(&format!("group->inSynInSyn{}[{}] = {};", i, var_idx, lin));
    }

    // Current source injection
    for (j, cs) in ng.current_sources.iter().enumerate() {
        let cs_model = &cs.archetype().model;
        let mut cs_subs = Substitutions::with_parent(&subs);
        cs_subs.add_func("injectCurrent", 1, "Isyn += ($(0));");
        for var in &cs_model.vars {
            cs_subs.add_var(var.name.clone(), format!("group->{}CS{}[{}]", var.name, j, var_idx));
        }
        for (p, name) in cs_model.param_names.iter().enumerate() {
            cs_subs.add_var(name.clone(), ng.current_source_param_ref(j, p));
        }
        for egp in &cs_model.extra_global_params {
            cs_subs.add_var(egp.name.clone(), format!("group->{}CS{}", egp.name, j));
        }
        let code = cs_subs.apply_check_unreplaced(
            &cs_model.injection_code,
            &format!("current source : merged{}", ng.base.index),
        )?;
        s.snippet(&code);
    }
    s.blank();

    // User sim code
    if !archetype.model.sim_code.is_empty() {
        let code = subs.apply_check_unreplaced(&archetype.model.sim_code, &context)?;
        s.snippet(&code);
    }

    // Spike-like events: condition comes from the outgoing projections
    if archetype.spike_event_required {
        if let Some(cond) = event_threshold_condition(model, ng, &subs)? {
            s.scope(&format!("if ({})", cond), |s| {
                gen_emit_spike(s, backend, &lid, "Evnt", archetype.spike_event_recording_enabled);
            });
        }
    }

    // True spikes: threshold, emission, reset
    if archetype.emits_true_spikes() {
        let cond =
            subs.apply_check_unreplaced(&archetype.model.threshold_condition_code, &context)?;
        let reset = if archetype.model.reset_code.is_empty() {
            None
        } else {
            Some(subs.apply_check_unreplaced(&archetype.model.reset_code, &context)?)
        };
        s.scope(&format!("if ({})", cond), |s| {
            gen_emit_spike(s, backend, &lid, "", archetype.spike_recording_enabled);
            if let Some(reset) = &reset {
                s.comment("spike reset code");
                s.snippet(reset);
            }
        });
    }

    // Write updated state back to global memory
    for var in &archetype.model.vars {
        if var.access == VarAccess::ReadWrite {
            s.line(&format!("group->{}[{}] = l{};", var.name, var_idx, var.name));
        }
    }
    Ok(())
}

/// The spike-like-event condition: the union of the event thresholds of the
/// archetype's outgoing projections, lowered against the neuron's own
/// substitutions.
fn event_threshold_condition(
    model: &NetworkModel,
    ng: &NeuronUpdateMerged,
    subs: &Substitutions,
) -> GenResult<Option<String>> {
    let archetype = ng.base.archetype();

    // In the emitting neuron's own kernel, $(name_pre) is just the
    // neuron's register copy
    let mut event_subs = Substitutions::with_parent(subs);
    for var in &archetype.model.vars {
        event_subs.add_var(format!("{}_pre", var.name), format!("l{}", var.name));
    }

    let mut conditions = Vec::new();
    for sg in model.out_syn_of(archetype) {
        if !sg.wu_model.event_threshold_condition_code.is_empty() {
            let code = event_subs.apply_check_unreplaced(
                &sg.wu_model.event_threshold_condition_code,
                &format!("event threshold : merged{}", ng.base.index),
            )?;
            conditions.push(format!("({})", code));
        }
    }
    if conditions.is_empty() {
        Ok(None)
    } else {
        Ok(Some(conditions.join(" || ")))
    }
}
