//! Device initialisation kernels.
//!
//! `initialize` fuses three phases: per-neuron state, dense weight
//! matrices, and sparse/bitmask connectivity construction.
//! `initializeSparse` runs after connectivity is final and fills sparse
//! weight variables plus the column-major and dynamics remap structures.

use crate::codegen::backend::{AtomicMemSpace, AtomicOp, Kernel, SimtBackend};
use crate::codegen::kernels::gen_parallel_group;
use crate::codegen::stream::CodeStream;
use crate::merge::{MergedModel, NeuronInitMerged, SynapseMerged};
use crate::model::{code_requires_rng, NetworkModel};
use crate::subst::Substitutions;
use crate::utils::errors::GenResult;

/// Threads one projection contributes to the connectivity-build phase:
/// rows for row-building snippets, columns for column-building ones.
pub fn num_connectivity_init_threads(
    sg: &crate::model::SynapseGroup,
    model: &NetworkModel,
) -> GenResult<u64> {
    if !sg.connectivity_init.row_build_code.is_empty() {
        Ok(model.src_of(sg).map(|n| n.num_neurons).unwrap_or(0) as u64)
    } else if !sg.connectivity_init.col_build_code.is_empty() {
        Ok(model.trg_of(sg).map(|n| n.num_neurons).unwrap_or(0) as u64)
    } else {
        Err(crate::utils::errors::CodegenError::missing_connectivity_code(&sg.name).into())
    }
}

/// Lower a `$(value) = …;` variable-init snippet against a target lvalue.
fn lower_var_init(
    code: &str,
    value_target: &str,
    parent: &Substitutions,
    backend: &dyn SimtBackend,
    context: &str,
) -> GenResult<String> {
    let mut subs = Substitutions::with_parent(parent);
    subs.add_var("value", value_target);
    if code_requires_rng(code) {
        for (name, replacement) in backend.rng_functions("lrng") {
            subs.add_var(name, replacement);
        }
    }
    Ok(subs.apply_check_unreplaced(code, context)?)
}

/// Emit the fused `initialize` kernel body.
pub fn gen_initialize_kernel(
    s: &mut CodeStream,
    merged: &MergedModel,
    backend: &dyn SimtBackend,
    kernel_subs: &Substitutions,
    id_start: &mut u64,
) -> GenResult<()> {
    let model = merged.model;

    s.comment("------------------------------------------------------------------------");
    s.comment("Local neuron groups");
    for ng in &merged.neuron_init {
        let padded: Vec<u64> = ng
            .base
            .groups
            .iter()
            .map(|g| backend.padded_size(g.num_neurons as u64, Kernel::Initialize))
            .collect();
        gen_parallel_group(
            s,
            kernel_subs,
            "NeuronInit",
            ng.base.index,
            &padded,
            id_start,
            backend,
            &mut |s, pop_subs| gen_neuron_init_body(s, ng, model, backend, pop_subs),
        )?;
    }
    s.blank();

    s.comment("------------------------------------------------------------------------");
    s.comment("Synapse groups with dense connectivity");
    for sg in &merged.dense_init {
        let padded: Vec<u64> = sg
            .base
            .groups
            .iter()
            .map(|g| {
                backend.padded_size(
                    model.trg_of(g).map(|n| n.num_neurons).unwrap_or(0) as u64,
                    Kernel::Initialize,
                )
            })
            .collect();
        gen_parallel_group(
            s,
            kernel_subs,
            "SynapseDenseInit",
            sg.base.index,
            &padded,
            id_start,
            backend,
            &mut |s, pop_subs| gen_dense_init_body(s, sg, model, backend, pop_subs),
        )?;
    }
    s.blank();

    s.comment("------------------------------------------------------------------------");
    s.comment("Synapse groups with sparse connectivity");
    for sg in &merged.connectivity_init {
        let mut padded = Vec::new();
        for g in &sg.base.groups {
            padded.push(backend.padded_size(num_connectivity_init_threads(g, model)?, Kernel::Initialize));
        }
        gen_parallel_group(
            s,
            kernel_subs,
            "SynapseConnectivityInit",
            sg.base.index,
            &padded,
            id_start,
            backend,
            &mut |s, pop_subs| gen_connectivity_init_body(s, sg, model, backend, pop_subs),
        )?;
    }
    s.blank();
    Ok(())
}

fn gen_neuron_init_body(
    s: &mut CodeStream,
    ng: &NeuronInitMerged,
    model: &NetworkModel,
    backend: &dyn SimtBackend,
    pop_subs: &Substitutions,
) -> GenResult<()> {
    let archetype = ng.base.archetype();
    let batch_size = model.batch_size;
    let lid = pop_subs.var("id").to_string();
    let context = format!("neuron init : merged{}", ng.base.index);

    s.comment("only do this for existing neurons");
    let mut body = CodeStream::new();
    {
        let s = &mut body;

        if backend.is_population_rng_initialised_on_device() && archetype.sim_rng_required {
            if batch_size == 1 {
                backend.gen_population_rng_init(
                    s,
                    &format!("group->rng[{}]", lid),
                    "deviceRNGSeed",
                    "id",
                );
            } else {
                s.scope(
                    &format!("for(unsigned int b = 0; b < {}; b++)", batch_size),
                    |s| {
                        backend.gen_population_rng_init(
                            s,
                            &format!("group->rng[(b * group->numNeurons) + {}]", lid),
                            "deviceRNGSeed",
                            "(b * gridDim.x * blockDim.x) + id",
                        );
                    },
                );
            }
        }
        if archetype.init_rng_required {
            // Copy of the global init RNG, skipped ahead by GLOBAL thread id
            backend.gen_global_rng_skip_ahead(s, "id");
        }

        // Spike counts and queues start empty
        let true_slots =
            if archetype.delay_required && archetype.true_spike_required { archetype.delay_slots() } else { 1 };
        let event_slots = if archetype.delay_required { archetype.delay_slots() } else { 1 };
        s.scope(&format!("if({} == 0)", lid), |s| {
            s.scope(
                &format!("for(unsigned int i = 0; i < {}; i++)", true_slots * batch_size),
                |s| {
                    s.line("group->spkCnt[i] = 0;");
                },
            );
            if archetype.spike_event_required {
                s.scope(
                    &format!("for(unsigned int i = 0; i < {}; i++)", event_slots * batch_size),
                    |s| {
                        s.line("group->spkCntEvnt[i] = 0;");
                    },
                );
            }
        });
        s.scope(
            &format!("for(unsigned int d = 0; d < {}; d++)", true_slots * batch_size),
            |s| {
                s.line(&format!("group->spk[(d * group->numNeurons) + {}] = 0;", lid));
            },
        );
        if archetype.spike_event_required {
            s.scope(
                &format!("for(unsigned int d = 0; d < {}; d++)", event_slots * batch_size),
                |s| {
                    s.line(&format!("group->spkEvnt[(d * group->numNeurons) + {}] = 0;", lid));
                },
            );
        }

        // Spike times start in the far past
        let time_slots = event_slots;
        for (flag, array) in [
            (archetype.spike_time_required, "sT"),
            (archetype.prev_spike_time_required, "prevST"),
            (archetype.spike_event_time_required, "seT"),
            (archetype.prev_spike_event_time_required, "prevSET"),
        ] {
            if flag {
                s.scope(
                    &format!("for(unsigned int d = 0; d < {}; d++)", time_slots * batch_size),
                    |s| {
                        s.line(&format!(
                            "group->{}[(d * group->numNeurons) + {}] = -TIME_MAX;",
                            array, lid
                        ));
                    },
                );
            }
        }
    }
    {
        let s = &mut body;

        // Model state variables
        for (v, var) in archetype.model.vars.iter().enumerate() {
            let init_code = archetype.var_initialisers.get(v).cloned().unwrap_or_default();
            if init_code.is_empty() {
                continue;
            }
            let target = if batch_size > 1 {
                format!("group->{}[(b * group->numNeurons) + {}]", var.name, lid)
            } else {
                format!("group->{}[{}]", var.name, lid)
            };
            let code = lower_var_init(&init_code, &target, pop_subs, backend, &context)?;
            if batch_size > 1 {
                s.scope(&format!("for(unsigned int b = 0; b < {}; b++)", batch_size), |s| {
                    s.snippet(&code);
                });
            } else {
                s.snippet(&code);
            }
        }

        // Incoming accumulators start at zero
        for (i, in_syn) in ng.in_syns.iter().enumerate() {
            let zero = |s: &mut CodeStream, array: &str, len_factor: u32| {
                if batch_size * len_factor > 1 {
                    s.scope(
                        &format!(
                            "for(unsigned int d = 0; d < {}; d++)",
                            batch_size * len_factor
                        ),
                        |s| {
                            s.line(&format!(
                                "group->{}[(d * group->numNeurons) + {}] = 0;",
                                array, lid
                            ));
                        },
                    );
                } else {
                    s.line(&format!("group->{}[{}] = 0;", array, lid));
                }
            };
            zero(s, &format!("inSynInSyn{}", i), 1);
            if in_syn.archetype().dendritic_delay_required {
                zero(
                    s,
                    &format!("denDelayInSyn{}", i),
                    in_syn.archetype().max_dendritic_delay_timesteps,
                );
            }
        }

        // Current source state
        for (j, cs) in ng.current_sources.iter().enumerate() {
            let archetype_cs = cs.archetype();
            for (v, var) in archetype_cs.model.vars.iter().enumerate() {
                let init_code = archetype_cs.var_initialisers.get(v).cloned().unwrap_or_default();
                if init_code.is_empty() {
                    continue;
                }
                let target = format!("group->{}CS{}[{}]", var.name, j, lid);
                let code = lower_var_init(&init_code, &target, pop_subs, backend, &context)?;
                s.snippet(&code);
            }
        }
    }

    let body = body.finish();
    s.scope(&format!("if({} < group->numNeurons)", lid), |s| {
        s.snippet(&body);
    });
    Ok(())
}

fn gen_dense_init_body(
    s: &mut CodeStream,
    sg: &SynapseMerged,
    _model: &NetworkModel,
    backend: &dyn SimtBackend,
    pop_subs: &Substitutions,
) -> GenResult<()> {
    let archetype = sg.base.archetype();
    let lid = pop_subs.var("id").to_string();
    let context = format!("dense init : merged{}", sg.base.index);

    let mut row_body = CodeStream::new();
    let mut row_subs = Substitutions::with_parent(pop_subs);
    row_subs.add_var("id_pre", "i");
    row_subs.add_var("id_post", lid.clone());
    for (v, var) in archetype.wu_model.vars.iter().enumerate() {
        let init_code = archetype.wu_var_initialisers.get(v).cloned().unwrap_or_default();
        if init_code.is_empty() {
            continue;
        }
        let target = format!("group->{}[idx]", var.name);
        let code = lower_var_init(&init_code, &target, &row_subs, backend, &context)?;
        row_body.snippet(&code);
    }
    let row_body = row_body.finish();

    s.comment("only do this for existing postsynaptic neurons");
    s.scope(&format!("if({} < group->numTrgNeurons)", lid), |s| {
        if archetype.is_wu_init_rng_required() {
            backend.gen_global_rng_skip_ahead(s, "id");
        }
        s.scope("for(unsigned int i = 0; i < group->numSrcNeurons; i++)", |s| {
            s.line(&format!("const unsigned int idx = (i * group->rowStride) + {};", lid));
            s.snippet(&row_body);
        });
    });
    Ok(())
}

fn gen_connectivity_init_body(
    s: &mut CodeStream,
    sg: &SynapseMerged,
    model: &NetworkModel,
    backend: &dyn SimtBackend,
    pop_subs: &Substitutions,
) -> GenResult<()> {
    let archetype = sg.base.archetype();
    let lid = pop_subs.var("id").to_string();
    let sparse = archetype.matrix.is_sparse();
    let row_mode = !archetype.connectivity_init.row_build_code.is_empty();
    let context = format!("connectivity init : merged{}", sg.base.index);

    let mut conn_subs = Substitutions::with_parent(pop_subs);
    if row_mode {
        conn_subs.add_var("id_pre", lid.clone());
        conn_subs.add_var("id_post_begin", "0");
    } else {
        conn_subs.add_var("id_post", lid.clone());
        conn_subs.add_var("id_pre_begin", "0");
    }
    conn_subs.add_var("id_thread", "0");
    conn_subs.add_var("num_threads", "1");
    conn_subs.add_var("num_pre", "group->numSrcNeurons");
    conn_subs.add_var("num_post", "group->numTrgNeurons");
    for (i, name) in archetype.connectivity_init.param_names.iter().enumerate() {
        conn_subs.add_var(name.clone(), sg.conn_param_ref(i));
    }

    // Build the addSynapse expansion; the do-while lets call sites carry a
    // trailing semicolon
    let mut kernel_init = CodeStream::new();
    kernel_init.line("do");
    {
        let mut inner = CodeStream::new();
        if sparse {
            if row_mode {
                inner.line(&format!(
                    "const unsigned int idx = ({} * group->rowStride) + group->rowLength[{}];",
                    lid, lid
                ));
            } else {
                inner.line(
                    "const unsigned int idx = (($(0)) * group->rowStride) + group->rowLength[$(0)];",
                );
            }
        }
        // Kernel-shaped weights are filled as each synapse is added
        if !archetype.kernel_size.is_empty() {
            let mut kernel_subs = Substitutions::with_parent(&conn_subs);
            if row_mode {
                kernel_subs.add_var_override("id_post", "$(0)");
            } else {
                kernel_subs.add_var_override("id_pre", "$(0)");
            }
            if sparse {
                kernel_subs.add_var("id_syn", "idx");
            }
            for k in 0..archetype.kernel_size.len() {
                kernel_subs.add_var(format!("id_kernel_{}", k), format!("$({})", k + 1));
            }
            for (v, var) in archetype.wu_model.vars.iter().enumerate() {
                let init_code =
                    archetype.wu_var_initialisers.get(v).cloned().unwrap_or_default();
                if init_code.is_empty() {
                    continue;
                }
                let target = format!("group->{}[idx]", var.name);
                let code = lower_var_init(&init_code, &target, &kernel_subs, backend, &context)?;
                inner.snippet(&code);
            }
        }
        if sparse {
            if row_mode {
                inner.line("group->ind[idx] = $(0);");
                inner.line(&format!("group->rowLength[{}]++;", lid));
            } else {
                inner.line(&format!(
                    "group->ind[(($(0)) * group->rowStride) + {}(&group->rowLength[$(0)], 1)] = {};",
                    backend.atomic("unsigned int", AtomicOp::Add, AtomicMemSpace::Global),
                    lid
                ));
            }
        } else {
            // Bitmask: high-bit-first within each 32-bit word
            let index_type = if sg
                .base
                .groups
                .iter()
                .any(|g| backend.are_64bit_synapse_indices_required(model, g))
            {
                "uint64_t"
            } else {
                "unsigned int"
            };
            let atomic_or = backend.atomic("unsigned int", AtomicOp::Or, AtomicMemSpace::Global);
            if row_mode {
                inner.line(&format!(
                    "const {} rowStartGID = {} * ({})group->rowStride;",
                    index_type, lid, index_type
                ));
                inner.line(&format!(
                    "{}(&group->gp[(rowStartGID + ($(0))) / 32], 0x80000000 >> ((rowStartGID + ($(0))) & 31));",
                    atomic_or
                ));
            } else {
                inner.line(&format!("const {} colStartGID = {};", index_type, lid));
                inner.line(&format!(
                    "{}(&group->gp[(colStartGID + (($(0)) * group->rowStride)) / 32], 0x80000000 >> ((colStartGID + (($(0)) * group->rowStride)) & 31));",
                    atomic_or
                ));
            }
        }
        let inner = inner.finish();
        kernel_init.scope("", |s| s.snippet(&inner));
    }
    kernel_init.write("while(false)");
    conn_subs.add_func(
        "addSynapse",
        1 + archetype.kernel_size.len(),
        kernel_init.finish(),
    );

    let build_code =
        if row_mode { &archetype.connectivity_init.row_build_code } else { &archetype.connectivity_init.col_build_code };
    let needs_rng = code_requires_rng(build_code);
    if needs_rng {
        for (name, replacement) in backend.rng_functions("lrng") {
            conn_subs.add_var(name, replacement);
        }
    }
    let lowered = conn_subs.apply_check_unreplaced(build_code, &context)?;

    if row_mode {
        s.comment("only do this for existing presynaptic neurons");
    } else {
        s.comment("only do this for existing postsynaptic neurons");
    }
    let guard = if row_mode {
        format!("if({} < group->numSrcNeurons)", lid)
    } else {
        format!("if({} < group->numTrgNeurons)", lid)
    };
    s.scope(&guard, |s| {
        if sparse && row_mode {
            s.line(&format!("group->rowLength[{}] = 0;", lid));
        }
        if needs_rng {
            backend.gen_global_rng_skip_ahead(s, "id");
        }
        s.snippet(&lowered);
    });
    Ok(())
}

/// Emit the two-phase `initializeSparse` kernel body.
pub fn gen_initialize_sparse_kernel(
    s: &mut CodeStream,
    merged: &MergedModel,
    backend: &dyn SimtBackend,
    kernel_subs: &Substitutions,
    num_initialize_threads: u64,
    id_start: &mut u64,
) -> GenResult<()> {
    let model = merged.model;
    let block_size = backend.kernel_block_size(Kernel::InitializeSparse);
    let tid = backend.thread_id();

    // Row lengths are staged in shared memory so every postsynaptic thread
    // doesn't re-read them
    s.line(&format!("{}unsigned int shRowLength[{}];", backend.shared_prefix(), block_size));
    if merged.sparse_init.iter().any(|sg| model.is_syn_remap_required(sg.base.archetype())) {
        s.line(&format!(
            "{}unsigned int shRowStart[{}];",
            backend.shared_prefix(),
            block_size + 1
        ));
    }
    s.blank();

    for sg in &merged.sparse_init {
        let padded: Vec<u64> = sg
            .base
            .groups
            .iter()
            .map(|g| backend.padded_size(g.max_connections as u64, Kernel::InitializeSparse))
            .collect();

        gen_parallel_group(
            s,
            kernel_subs,
            "SynapseSparseInit",
            sg.base.index,
            &padded,
            id_start,
            backend,
            &mut |s, pop_subs| {
                let archetype = sg.base.archetype();
                let lid = pop_subs.var("id").to_string();
                let context = format!("sparse init : merged{}", sg.base.index);
                let dynamics = model.is_syn_remap_required(archetype);
                let learn_post = archetype.has_learn_post_code();

                // Lower the per-synapse variable inits up front
                let mut init_subs = Substitutions::with_parent(pop_subs);
                init_subs.add_var("id_pre", format!("((r * {}) + i)", block_size));
                init_subs.add_var("id_post", "group->ind[idx]");
                let mut var_init = CodeStream::new();
                if archetype.is_wu_var_init_required() {
                    for (v, var) in archetype.wu_model.vars.iter().enumerate() {
                        let init_code =
                            archetype.wu_var_initialisers.get(v).cloned().unwrap_or_default();
                        if init_code.is_empty() {
                            continue;
                        }
                        let target = format!("group->{}[idx]", var.name);
                        let code =
                            lower_var_init(&init_code, &target, &init_subs, backend, &context)?;
                        var_init.snippet(&code);
                    }
                }
                let var_init = var_init.finish();

                if archetype.is_wu_init_rng_required() {
                    backend
                        .gen_global_rng_skip_ahead(s, &format!("{} + id", num_initialize_threads));
                }

                s.line(&format!(
                    "const unsigned int numBlocks = (group->numSrcNeurons + {} - 1) / {};",
                    block_size, block_size
                ));
                s.line(&format!("unsigned int idx = {};", lid));
                s.scope("for(unsigned int r = 0; r < numBlocks; r++)", |s| {
                    s.line(&format!(
                        "const unsigned int numRowsInBlock = (r == (numBlocks - 1)) ? ((group->numSrcNeurons - 1) % {}) + 1 : {};",
                        block_size, block_size
                    ));

                    // Stage this block of row lengths
                    backend.gen_shared_mem_barrier(s);
                    s.scope(&format!("if ({} < numRowsInBlock)", tid), |s| {
                        s.line(&format!(
                            "shRowLength[{}] = group->rowLength[(r * {}) + {}];",
                            tid, block_size, tid
                        ));
                    });

                    if dynamics {
                        backend.gen_shared_mem_barrier(s);
                        // Single-lane prefix sum over this block's rows
                        s.scope(&format!("if({} == 0)", tid), |s| {
                            s.line(&format!(
                                "unsigned int rowStart = (r == 0) ? 0 : shRowStart[{}];",
                                block_size
                            ));
                            s.line("shRowStart[0] = rowStart;");
                            s.scope("for(unsigned int i = 0; i < numRowsInBlock; i++)", |s| {
                                s.line("rowStart += shRowLength[i];");
                                s.line("shRowStart[i + 1] = rowStart;");
                            });
                            // Last block writes the total live-synapse count
                            s.scope(
                                &format!("if({} == 0 && (r == (numBlocks - 1)))", lid),
                                |s| {
                                    s.line("group->synRemap[0] = shRowStart[numRowsInBlock];");
                                },
                            );
                        });
                    }

                    backend.gen_shared_mem_barrier(s);
                    s.scope("for(unsigned int i = 0; i < numRowsInBlock; i++)", |s| {
                        s.scope(&format!("if({} < shRowLength[i])", lid), |s| {
                            if !var_init.is_empty() {
                                s.snippet(&var_init);
                            }
                            if learn_post {
                                s.scope("", |s| {
                                    s.line("const unsigned int postIndex = group->ind[idx];");
                                    // Returns the previous length, i.e. the
                                    // insertion point
                                    s.line(&format!(
                                        "const unsigned int colLocation = {}(&group->colLength[postIndex], 1);",
                                        backend.atomic(
                                            "unsigned int",
                                            AtomicOp::Add,
                                            AtomicMemSpace::Global
                                        )
                                    ));
                                    s.line(
                                        "const unsigned int colMajorIndex = (postIndex * group->colStride) + colLocation;",
                                    );
                                    s.line("group->remap[colMajorIndex] = idx;");
                                });
                            }
                            if dynamics {
                                s.scope("", |s| {
                                    s.line(&format!(
                                        "group->synRemap[shRowStart[i] + {} + 1] = idx;",
                                        lid
                                    ));
                                });
                            }
                        });
                        s.line("idx += group->rowStride;");
                    });
                });
                Ok(())
            },
        )?;
    }
    Ok(())
}
