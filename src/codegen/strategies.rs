//! Presynaptic update strategies.
//!
//! Each strategy is one algorithm for parallelising the presynaptic spike
//! pass over a projection. A strategy answers a capability protocol
//! (compatibility, thread count, row stride, shared memory demand) and
//! emits the preamble/update/postamble of its slice of the presynaptic
//! kernel. The registry is scanned in reverse insertion order so strategies
//! registered later — user-supplied ones — win over the built-ins.

use crate::codegen::backend::{AtomicMemSpace, AtomicOp, Kernel, Preferences, SimtBackend};
use crate::codegen::stream::CodeStream;
use crate::merge::SynapseMerged;
use crate::model::{MatrixWeight, NetworkModel, SpanType, SynapseGroup};
use crate::subst::Substitutions;
use crate::utils::errors::{CodegenError, GenResult};

/// A snippet-lowering callback supplied by the kernel emitter; returns the
/// lowered code for the strategy to splice in.
pub type SynapseHandler<'a> =
    dyn Fn(&SynapseMerged, &Substitutions) -> GenResult<String> + 'a;

/// The handlers a strategy drives while emitting one merged group.
pub struct PresynHandlers<'a> {
    /// Lowers the spike-event threshold condition (an expression)
    pub thresh: &'a SynapseHandler<'a>,
    /// Lowers the per-synapse body (weight-update sim or event code)
    pub body: &'a SynapseHandler<'a>,
    /// Lowers the procedural connectivity-generation code
    pub proc_connect: &'a SynapseHandler<'a>,
}

/// One presynaptic update algorithm.
pub trait PresynapticUpdateStrategy: Send + Sync {
    /// Display name, used in trace output.
    fn name(&self) -> &'static str;

    /// Whether this strategy can emit the given projection.
    fn is_compatible(&self, sg: &SynapseGroup, model: &NetworkModel, prefs: &Preferences) -> bool;

    /// Threads this projection contributes to the presynaptic kernel.
    fn num_threads(&self, sg: &SynapseGroup, model: &NetworkModel) -> u64;

    /// Allocated width of one matrix row under this strategy.
    fn row_stride(&self, sg: &SynapseGroup, model: &NetworkModel) -> u32;

    /// Shared-memory words requested per thread (for `shLg` sizing).
    fn shared_memory_per_thread(&self, mg: &SynapseMerged, backend: &dyn SimtBackend) -> u32;

    /// Emitted once per merged group before any spike processing.
    fn gen_preamble(
        &self,
        s: &mut CodeStream,
        model: &NetworkModel,
        mg: &SynapseMerged,
        subs: &Substitutions,
        backend: &dyn SimtBackend,
    );

    /// The spike-processing block, for true spikes or spike-like events.
    #[allow(clippy::too_many_arguments)]
    fn gen_update(
        &self,
        s: &mut CodeStream,
        model: &NetworkModel,
        mg: &SynapseMerged,
        subs: &Substitutions,
        backend: &dyn SimtBackend,
        true_spike: bool,
        handlers: &PresynHandlers,
    ) -> GenResult<()>;

    /// Emitted once per merged group after all spike processing.
    fn gen_postamble(
        &self,
        s: &mut CodeStream,
        model: &NetworkModel,
        mg: &SynapseMerged,
        subs: &Substitutions,
        backend: &dyn SimtBackend,
    );
}

impl std::fmt::Debug for dyn PresynapticUpdateStrategy + '_ {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PresynapticUpdateStrategy").field("name", &self.name()).finish()
    }
}

/// Ordered strategy list; lookup walks in reverse insertion order.
pub struct StrategyRegistry {
    strategies: Vec<Box<dyn PresynapticUpdateStrategy>>,
}

impl StrategyRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self { strategies: Vec::new() }
    }

    /// The built-in strategies in their canonical order.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(PreSpan));
        registry.register(Box::new(PostSpan));
        registry.register(Box::new(PreSpanProcedural));
        registry.register(Box::new(PostSpanBitmask));
        registry
    }

    /// Append a strategy; later registrations take priority.
    pub fn register(&mut self, strategy: Box<dyn PresynapticUpdateStrategy>) {
        self.strategies.push(strategy);
    }

    /// The last-registered compatible strategy for a synapse group.
    pub fn select(
        &self,
        sg: &SynapseGroup,
        model: &NetworkModel,
        prefs: &Preferences,
    ) -> GenResult<&dyn PresynapticUpdateStrategy> {
        self.strategies
            .iter()
            .rev()
            .find(|s| s.is_compatible(sg, model, prefs))
            .map(|s| s.as_ref())
            .ok_or_else(|| CodegenError::no_strategy(&sg.name).into())
    }
}

impl Default for StrategyRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

fn spike_suffix(true_spike: bool) -> &'static str {
    if true_spike {
        ""
    } else {
        "Evnt"
    }
}

/// Bind `$(addToInSyn)` (or the delayed variant) for direct global
/// accumulation.
fn add_input_substitutions(
    subs: &mut Substitutions,
    mg: &SynapseMerged,
    backend: &dyn SimtBackend,
    batch_size: u32,
    post_index: &str,
) {
    let atomic = backend.atomic("scalar", AtomicOp::Add, AtomicMemSpace::Global);
    if mg.base.archetype().dendritic_delay_required {
        subs.add_func(
            "addToInSynDelay",
            2,
            format!(
                "{}(&group->denDelay[{}], $(0))",
                atomic,
                mg.post_den_delay_index(batch_size, post_index, "$(1)")
            ),
        );
    } else {
        subs.add_func(
            "addToInSyn",
            1,
            format!(
                "{}(&group->inSyn[{}], $(0))",
                atomic,
                mg.post_isyn_index(batch_size, post_index)
            ),
        );
    }
}

// ---------------------------------------------------------------------------
// PreSpan
// ---------------------------------------------------------------------------

/// One thread (or a few) per presynaptic spike iterates its sparse row.
/// Wins when presynaptic spike density is low.
pub struct PreSpan;

impl PresynapticUpdateStrategy for PreSpan {
    fn name(&self) -> &'static str {
        "PreSpan"
    }

    fn is_compatible(&self, sg: &SynapseGroup, _model: &NetworkModel, _prefs: &Preferences) -> bool {
        sg.span_type == SpanType::Presynaptic && sg.matrix.is_sparse()
    }

    fn num_threads(&self, sg: &SynapseGroup, model: &NetworkModel) -> u64 {
        let src = model.src_of(sg).map(|n| n.num_neurons).unwrap_or(0);
        src as u64 * sg.num_threads_per_spike as u64
    }

    fn row_stride(&self, sg: &SynapseGroup, _model: &NetworkModel) -> u32 {
        sg.max_connections
    }

    fn shared_memory_per_thread(&self, _mg: &SynapseMerged, _backend: &dyn SimtBackend) -> u32 {
        0
    }

    fn gen_preamble(
        &self,
        _s: &mut CodeStream,
        _model: &NetworkModel,
        _mg: &SynapseMerged,
        _subs: &Substitutions,
        _backend: &dyn SimtBackend,
    ) {
    }

    fn gen_update(
        &self,
        s: &mut CodeStream,
        model: &NetworkModel,
        mg: &SynapseMerged,
        subs: &Substitutions,
        backend: &dyn SimtBackend,
        true_spike: bool,
        handlers: &PresynHandlers,
    ) -> GenResult<()> {
        let batch_size = model.batch_size;
        let suffix = spike_suffix(true_spike);
        let threads_per_spike = mg.base.archetype().num_threads_per_spike;
        let id = subs.var("id").to_string();

        let mut syn_subs = Substitutions::with_parent(subs);
        syn_subs.add_var("id_pre", "preInd");
        syn_subs.add_var("id_post", "ipost");
        syn_subs.add_var("id_syn", "synAddress");
        add_input_substitutions(&mut syn_subs, mg, backend, batch_size, "ipost");
        let body_code = (handlers.body)(mg, &syn_subs)?;

        let thresh_code = if true_spike {
            None
        } else {
            let mut thresh_subs = Substitutions::with_parent(subs);
            thresh_subs.add_var("id_pre", "preInd");
            Some((handlers.thresh)(mg, &thresh_subs)?)
        };

        if threads_per_spike > 1 {
            s.line(&format!("const unsigned int spike = {} / {};", id, threads_per_spike));
            s.line(&format!("const unsigned int thread = {} % {};", id, threads_per_spike));
        } else {
            s.line(&format!("const unsigned int spike = {};", id));
        }
        s.blank();

        s.scope(
            &format!("if (spike < group->srcSpkCnt{}[{}])", suffix, mg.pre_slot(batch_size)),
            |s| {
                s.line(&format!(
                    "const unsigned int preInd = group->srcSpk{}[{}];",
                    suffix,
                    mg.pre_spike_index(batch_size, "spike")
                ));

                let row_loop = |s: &mut CodeStream| {
                    s.line("const unsigned int npost = group->rowLength[preInd];");
                    let loop_header = if threads_per_spike > 1 {
                        format!(
                            "for (unsigned int i = thread; i < npost; i += {})",
                            threads_per_spike
                        )
                    } else {
                        "for (unsigned int i = 0; i < npost; i++)".to_string()
                    };
                    s.scope(&loop_header, |s| {
                        s.line("const unsigned int synAddress = (preInd * group->rowStride) + i;");
                        s.line("const unsigned int ipost = group->ind[synAddress];");
                        s.snippet(&body_code);
                    });
                };

                match &thresh_code {
                    None => row_loop(s),
                    Some(cond) => {
                        // Spike-like event: row runs only where the threshold holds
                        s.scope(&format!("if ({})", cond), row_loop);
                    }
                }
            },
        );
        Ok(())
    }

    fn gen_postamble(
        &self,
        _s: &mut CodeStream,
        _model: &NetworkModel,
        _mg: &SynapseMerged,
        _subs: &Substitutions,
        _backend: &dyn SimtBackend,
    ) {
    }
}

// ---------------------------------------------------------------------------
// PostSpan
// ---------------------------------------------------------------------------

/// One thread per postsynaptic target; the default for dense and common
/// sparse workloads.
pub struct PostSpan;

impl PostSpan {
    /// Accumulate into `shLg` instead of global atomics when the whole
    /// target population fits one block.
    fn use_shared_accumulation(mg: &SynapseMerged, backend: &dyn SimtBackend) -> bool {
        mg.base.archetype().matrix.is_sparse()
            && mg.trg.num_neurons <= backend.kernel_block_size(Kernel::PresynapticUpdate)
    }
}

impl PresynapticUpdateStrategy for PostSpan {
    fn name(&self) -> &'static str {
        "PostSpan"
    }

    fn is_compatible(&self, sg: &SynapseGroup, _model: &NetworkModel, prefs: &Preferences) -> bool {
        sg.span_type == SpanType::Postsynaptic
            && (sg.matrix.is_sparse()
                || sg.matrix.is_dense()
                || (sg.matrix.is_bitmask() && !prefs.enable_bitmask_optimisations))
    }

    fn num_threads(&self, sg: &SynapseGroup, model: &NetworkModel) -> u64 {
        if sg.matrix.is_sparse() {
            sg.max_connections as u64
        } else {
            model.trg_of(sg).map(|n| n.num_neurons).unwrap_or(0) as u64
        }
    }

    fn row_stride(&self, sg: &SynapseGroup, model: &NetworkModel) -> u32 {
        if sg.matrix.is_sparse() {
            sg.max_connections
        } else {
            model.trg_of(sg).map(|n| n.num_neurons).unwrap_or(0)
        }
    }

    fn shared_memory_per_thread(&self, mg: &SynapseMerged, backend: &dyn SimtBackend) -> u32 {
        if Self::use_shared_accumulation(mg, backend) {
            1
        } else {
            0
        }
    }

    fn gen_preamble(
        &self,
        s: &mut CodeStream,
        _model: &NetworkModel,
        mg: &SynapseMerged,
        _subs: &Substitutions,
        backend: &dyn SimtBackend,
    ) {
        if Self::use_shared_accumulation(mg, backend) {
            let tid = backend.thread_id();
            s.scope(&format!("if ({} < group->numTrgNeurons)", tid), |s| {
                s.line(&format!("shLg[{}] = 0;", tid));
            });
            backend.gen_shared_mem_barrier(s);
        }
    }

    fn gen_update(
        &self,
        s: &mut CodeStream,
        model: &NetworkModel,
        mg: &SynapseMerged,
        subs: &Substitutions,
        backend: &dyn SimtBackend,
        true_spike: bool,
        handlers: &PresynHandlers,
    ) -> GenResult<()> {
        let batch_size = model.batch_size;
        let suffix = spike_suffix(true_spike);
        let block_size = backend.kernel_block_size(Kernel::PresynapticUpdate);
        let tid = backend.thread_id();
        let sparse = mg.base.archetype().matrix.is_sparse();
        let bitmask = mg.base.archetype().matrix.is_bitmask();
        let shared = Self::use_shared_accumulation(mg, backend);
        let id = subs.var("id").to_string();

        let ipost = if sparse { "ipost".to_string() } else { id.clone() };
        let mut syn_subs = Substitutions::with_parent(subs);
        syn_subs.add_var("id_pre", format!("shSpk{}[j]", suffix));
        syn_subs.add_var("id_post", ipost.clone());
        syn_subs.add_var("id_syn", "synAddress");
        if shared {
            let shared_atomic = backend.atomic("scalar", AtomicOp::Add, AtomicMemSpace::Shared);
            syn_subs.add_func("addToInSyn", 1, format!("{}(&shLg[{}], $(0))", shared_atomic, ipost));
        } else {
            add_input_substitutions(&mut syn_subs, mg, backend, batch_size, &ipost);
        }
        let body_code = (handlers.body)(mg, &syn_subs)?;

        let thresh_code = if true_spike {
            None
        } else {
            let mut thresh_subs = Substitutions::with_parent(subs);
            thresh_subs.add_var("id_pre", format!("shSpk{}[j]", suffix));
            Some((handlers.thresh)(mg, &thresh_subs)?)
        };

        s.line(&format!(
            "const unsigned int numSpikes = group->srcSpkCnt{}[{}];",
            suffix,
            mg.pre_slot(batch_size)
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
            backend.gen_shared_mem_barrier(s);
            s.scope(&format!("if ({} < numSpikesInBlock)", tid), |s| {
                s.line(&format!(
                    "const unsigned int i = group->srcSpk{}[{}];",
                    suffix,
                    mg.pre_spike_index(batch_size, &format!("(r * {}) + {}", block_size, tid))
                ));
                s.line(&format!("shSpk{}[{}] = i;", suffix, tid));
                if sparse {
                    s.line(&format!("shRowLength[{}] = group->rowLength[i];", tid));
                }
            });
            backend.gen_shared_mem_barrier(s);

            s.comment("loop through all incoming spikes");
            s.scope("for (unsigned int j = 0; j < numSpikesInBlock; j++)", |s| {
                s.comment("only work on existing neurons");
                s.scope(&format!("if ({} < group->rowStride)", id), |s| {
                    let synapse = |s: &mut CodeStream| {
                        if bitmask {
                            s.line(&format!(
                                "const uint64_t gid = (shSpk{}[j] * (uint64_t)group->rowStride) + {};",
                                suffix, id
                            ));
                            s.scope("if (group->gp[gid / 32] & (0x80000000 >> (gid & 31)))", |s| {
                                s.line(&format!(
                                    "const unsigned int synAddress = (shSpk{}[j] * group->rowStride) + {};",
                                    suffix, id
                                ));
                                s.snippet(&body_code);
                            });
                        } else if sparse {
                            s.scope(&format!("if ({} < shRowLength[j])", id), |s| {
                                s.line(&format!(
                                    "const unsigned int synAddress = (shSpk{}[j] * group->rowStride) + {};",
                                    suffix, id
                                ));
                                s.line("const unsigned int ipost = group->ind[synAddress];");
                                s.snippet(&body_code);
                            });
                        } else {
                            s.line(&format!(
                                "const unsigned int synAddress = (shSpk{}[j] * group->rowStride) + {};",
                                suffix, id
                            ));
                            s.snippet(&body_code);
                        }
                    };

                    match &thresh_code {
                        None => synapse(s),
                        Some(cond) => s.scope(&format!("if ({})", cond), synapse),
                    }
                });
            });
        });
        Ok(())
    }

    fn gen_postamble(
        &self,
        s: &mut CodeStream,
        model: &NetworkModel,
        mg: &SynapseMerged,
        _subs: &Substitutions,
        backend: &dyn SimtBackend,
    ) {
        if Self::use_shared_accumulation(mg, backend) {
            let tid = backend.thread_id();
            let atomic = backend.atomic("scalar", AtomicOp::Add, AtomicMemSpace::Global);
            backend.gen_shared_mem_barrier(s);
            s.scope(&format!("if ({} < group->numTrgNeurons)", tid), |s| {
                s.line(&format!(
                    "{}(&group->inSyn[{}], shLg[{}]);",
                    atomic,
                    mg.post_isyn_index(model.batch_size, &tid),
                    tid
                ));
            });
        }
    }
}

// ---------------------------------------------------------------------------
// PreSpanProcedural
// ---------------------------------------------------------------------------

/// Like [`PreSpan`] but connectivity is regenerated on the fly from the
/// row-build snippet; no indices are stored.
pub struct PreSpanProcedural;

impl PresynapticUpdateStrategy for PreSpanProcedural {
    fn name(&self) -> &'static str {
        "PreSpanProcedural"
    }

    fn is_compatible(&self, sg: &SynapseGroup, _model: &NetworkModel, _prefs: &Preferences) -> bool {
        sg.matrix.is_procedural()
            && !sg.connectivity_init.row_build_code.is_empty()
            && matches!(sg.matrix.weight, MatrixWeight::Global)
    }

    fn num_threads(&self, sg: &SynapseGroup, model: &NetworkModel) -> u64 {
        let src = model.src_of(sg).map(|n| n.num_neurons).unwrap_or(0);
        src as u64 * sg.num_threads_per_spike as u64
    }

    fn row_stride(&self, sg: &SynapseGroup, _model: &NetworkModel) -> u32 {
        sg.max_connections
    }

    fn shared_memory_per_thread(&self, _mg: &SynapseMerged, _backend: &dyn SimtBackend) -> u32 {
        0
    }

    fn gen_preamble(
        &self,
        _s: &mut CodeStream,
        _model: &NetworkModel,
        _mg: &SynapseMerged,
        _subs: &Substitutions,
        _backend: &dyn SimtBackend,
    ) {
    }

    fn gen_update(
        &self,
        s: &mut CodeStream,
        model: &NetworkModel,
        mg: &SynapseMerged,
        subs: &Substitutions,
        backend: &dyn SimtBackend,
        true_spike: bool,
        handlers: &PresynHandlers,
    ) -> GenResult<()> {
        let batch_size = model.batch_size;
        let suffix = spike_suffix(true_spike);
        let threads_per_spike = mg.base.archetype().num_threads_per_spike;
        let id = subs.var("id").to_string();

        // Synapse body becomes the $(addSynapse) expansion inside the
        // regenerated row-build code
        let mut syn_subs = Substitutions::with_parent(subs);
        syn_subs.add_var("id_pre", "preInd");
        syn_subs.add_var("id_post", "$(0)");
        add_input_substitutions(&mut syn_subs, mg, backend, batch_size, "($(0))");
        let body_code = (handlers.body)(mg, &syn_subs)?;
        let mut synapse_stream = CodeStream::new();
        synapse_stream.line("do");
        synapse_stream.scope("", |s| s.snippet(&body_code));
        synapse_stream.write("while(false)");

        let mut conn_subs = Substitutions::with_parent(subs);
        conn_subs.add_var("id_pre", "preInd");
        if threads_per_spike > 1 {
            conn_subs.add_var("id_post_begin", "idPostStart");
            conn_subs.add_var("id_thread", "thread");
            conn_subs.add_var("num_threads", threads_per_spike.to_string());
        } else {
            conn_subs.add_var("id_post_begin", "0");
            conn_subs.add_var("id_thread", "0");
            conn_subs.add_var("num_threads", "1");
        }
        conn_subs.add_var("num_pre", "group->numSrcNeurons");
        conn_subs.add_var("num_post", "group->numTrgNeurons");
        conn_subs.add_func(
            "addSynapse",
            1 + mg.base.archetype().kernel_size.len(),
            synapse_stream.finish(),
        );
        let conn_code = (handlers.proc_connect)(mg, &conn_subs)?;

        let thresh_code = if true_spike {
            None
        } else {
            let mut thresh_subs = Substitutions::with_parent(subs);
            thresh_subs.add_var("id_pre", "preInd");
            Some((handlers.thresh)(mg, &thresh_subs)?)
        };

        if threads_per_spike > 1 {
            s.line(&format!("const unsigned int spike = {} / {};", id, threads_per_spike));
            s.line(&format!("const unsigned int thread = {} % {};", id, threads_per_spike));
            s.line(&format!(
                "const unsigned int numPostPerThread = (group->numTrgNeurons + {}) / {};",
                threads_per_spike - 1,
                threads_per_spike
            ));
            s.line("const unsigned int idPostStart = thread * numPostPerThread;");
        } else {
            s.line(&format!("const unsigned int spike = {};", id));
        }
        s.blank();

        s.scope(
            &format!("if (spike < group->srcSpkCnt{}[{}])", suffix, mg.pre_slot(batch_size)),
            |s| {
                s.line(&format!(
                    "const unsigned int preInd = group->srcSpk{}[{}];",
                    suffix,
                    mg.pre_spike_index(batch_size, "spike")
                ));
                if crate::model::code_requires_rng(
                    &mg.base.archetype().connectivity_init.row_build_code,
                ) {
                    // Regeneration must draw the same numbers every timestep,
                    // so the stream is keyed on the presynaptic neuron
                    backend.gen_global_rng_skip_ahead(s, "preInd");
                }
                match &thresh_code {
                    None => s.snippet(&conn_code),
                    Some(cond) => {
                        s.scope(&format!("if ({})", cond), |s| s.snippet(&conn_code));
                    }
                }
            },
        );
        Ok(())
    }

    fn gen_postamble(
        &self,
        _s: &mut CodeStream,
        _model: &NetworkModel,
        _mg: &SynapseMerged,
        _subs: &Substitutions,
        _backend: &dyn SimtBackend,
    ) {
    }
}

// ---------------------------------------------------------------------------
// PostSpanBitmask
// ---------------------------------------------------------------------------

/// PostSpan variant reading a 1-bit-per-synapse bitmask; each thread owns
/// 32 postsynaptic targets accumulated in shared memory.
pub struct PostSpanBitmask;

impl PresynapticUpdateStrategy for PostSpanBitmask {
    fn name(&self) -> &'static str {
        "PostSpanBitmask"
    }

    fn is_compatible(&self, sg: &SynapseGroup, _model: &NetworkModel, prefs: &Preferences) -> bool {
        prefs.enable_bitmask_optimisations
            && sg.span_type == SpanType::Postsynaptic
            && sg.matrix.is_bitmask()
            && !sg.dendritic_delay_required
    }

    fn num_threads(&self, sg: &SynapseGroup, model: &NetworkModel) -> u64 {
        let trg = model.trg_of(sg).map(|n| n.num_neurons).unwrap_or(0) as u64;
        trg.div_ceil(32)
    }

    fn row_stride(&self, sg: &SynapseGroup, model: &NetworkModel) -> u32 {
        // Pad rows to a whole number of 32-bit words
        let trg = model.trg_of(sg).map(|n| n.num_neurons).unwrap_or(0);
        trg.div_ceil(32) * 32
    }

    fn shared_memory_per_thread(&self, _mg: &SynapseMerged, _backend: &dyn SimtBackend) -> u32 {
        32
    }

    fn gen_preamble(
        &self,
        s: &mut CodeStream,
        _model: &NetworkModel,
        _mg: &SynapseMerged,
        _subs: &Substitutions,
        backend: &dyn SimtBackend,
    ) {
        let block_size = backend.kernel_block_size(Kernel::PresynapticUpdate);
        s.comment("each thread accumulates 32 targets; zero its shared slots");
        s.scope("for (unsigned int i = 0; i < 32; i++)", |s| {
            s.line(&format!("shLg[(i * {}) + {}] = 0;", block_size, backend.thread_id()));
        });
        backend.gen_shared_mem_barrier(s);
    }

    fn gen_update(
        &self,
        s: &mut CodeStream,
        model: &NetworkModel,
        mg: &SynapseMerged,
        subs: &Substitutions,
        backend: &dyn SimtBackend,
        true_spike: bool,
        handlers: &PresynHandlers,
    ) -> GenResult<()> {
        let batch_size = model.batch_size;
        let suffix = spike_suffix(true_spike);
        let block_size = backend.kernel_block_size(Kernel::PresynapticUpdate);
        let tid = backend.thread_id();
        let id = subs.var("id").to_string();

        let mut syn_subs = Substitutions::with_parent(subs);
        syn_subs.add_var("id_pre", format!("shSpk{}[j]", suffix));
        syn_subs.add_var("id_post", format!("ibit + ({} * 32)", id));
        syn_subs.add_func(
            "addToInSyn",
            1,
            format!("shLg[(ibit * {}) + {}] += $(0)", block_size, tid),
        );
        let body_code = (handlers.body)(mg, &syn_subs)?;

        let thresh_code = if true_spike {
            None
        } else {
            let mut thresh_subs = Substitutions::with_parent(subs);
            thresh_subs.add_var("id_pre", format!("shSpk{}[j]", suffix));
            Some((handlers.thresh)(mg, &thresh_subs)?)
        };

        s.line(&format!(
            "const unsigned int numSpikes = group->srcSpkCnt{}[{}];",
            suffix,
            mg.pre_slot(batch_size)
        ));
        s.line(&format!(
            "const unsigned int numSpikeBlocks = (numSpikes + {}) / {};",
            block_size - 1,
            block_size
        ));
        s.line("const unsigned int rowWords = group->rowStride / 32;");
        s.scope("for (unsigned int r = 0; r < numSpikeBlocks; r++)", |s| {
            s.line(&format!(
                "const unsigned int numSpikesInBlock = (r == numSpikeBlocks - 1) ? ((numSpikes - 1) % {}) + 1 : {};",
                block_size, block_size
            ));
            backend.gen_shared_mem_barrier(s);
            s.scope(&format!("if ({} < numSpikesInBlock)", tid), |s| {
                s.line(&format!(
                    "shSpk{}[{}] = group->srcSpk{}[{}];",
                    suffix,
                    tid,
                    suffix,
                    mg.pre_spike_index(batch_size, &format!("(r * {}) + {}", block_size, tid))
                ));
            });
            backend.gen_shared_mem_barrier(s);

            s.scope(&format!("if ({} < rowWords)", id), |s| {
                s.scope("for (unsigned int j = 0; j < numSpikesInBlock; j++)", |s| {
                    let word_scan = |s: &mut CodeStream| {
                        s.line(&format!(
                            "uint32_t connectivityWord = group->gp[(shSpk{}[j] * rowWords) + {}];",
                            suffix, id
                        ));
                        s.line("unsigned int ibit = 0;");
                        s.scope("while (connectivityWord != 0)", |s| {
                            s.comment("advance to the next set bit");
                            s.line("const int numLZ = __clz(connectivityWord);");
                            s.line(
                                "connectivityWord = (numLZ == 31) ? 0 : (connectivityWord << (numLZ + 1));",
                            );
                            s.line("ibit += numLZ;");
                            s.snippet(&body_code);
                            s.line("ibit++;");
                        });
                    };

                    match &thresh_code {
                        None => word_scan(s),
                        Some(cond) => s.scope(&format!("if ({})", cond), word_scan),
                    }
                });
            });
        });
        Ok(())
    }

    fn gen_postamble(
        &self,
        s: &mut CodeStream,
        model: &NetworkModel,
        mg: &SynapseMerged,
        subs: &Substitutions,
        backend: &dyn SimtBackend,
    ) {
        let block_size = backend.kernel_block_size(Kernel::PresynapticUpdate);
        let tid = backend.thread_id();
        let id = subs.var("id").to_string();
        let atomic = backend.atomic("scalar", AtomicOp::Add, AtomicMemSpace::Global);
        backend.gen_shared_mem_barrier(s);
        s.comment("flush shared accumulators to the target population");
        s.scope("for (unsigned int i = 0; i < 32; i++)", |s| {
            s.line(&format!("const unsigned int ipost = ({} * 32) + i;", id));
            s.scope("if (ipost < group->numTrgNeurons)", |s| {
                s.line(&format!(
                    "{}(&group->inSyn[{}], shLg[(i * {}) + {}]);",
                    atomic,
                    mg.post_isyn_index(model.batch_size, "ipost"),
                    block_size,
                    tid
                ));
            });
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::backend::Preferences;
    use crate::model::{
        ConnectivityInit, MatrixConnectivity, MatrixType, NetworkModel, PostsynapticModel,
        SynapseGroup, WeightUpdateModel,
    };

    fn model_with_pair() -> NetworkModel {
        let mut model = NetworkModel::new("net", 0.1);
        for (name, n) in [("Pre", 64u32), ("Post", 128u32)] {
            model.neuron_groups.push(crate::model::NeuronGroup {
                name: name.to_string(),
                num_neurons: n,
                model: Default::default(),
                param_values: vec![],
                derived_param_values: vec![],
                var_initialisers: vec![],
                delay_required: false,
                num_delay_slots: 1,
                sim_rng_required: false,
                init_rng_required: false,
                spike_time_required: false,
                prev_spike_time_required: false,
                spike_event_required: false,
                spike_event_time_required: false,
                prev_spike_event_time_required: false,
                spike_recording_enabled: false,
                spike_event_recording_enabled: false,
                true_spike_required: true,
            });
        }
        model
    }

    fn synapse(matrix: MatrixType, span: SpanType) -> SynapseGroup {
        SynapseGroup {
            name: "S".to_string(),
            src: "Pre".to_string(),
            trg: "Post".to_string(),
            matrix,
            span_type: span,
            max_connections: 16,
            max_source_connections: 8,
            delay_steps: 0,
            back_prop_delay_steps: 0,
            dendritic_delay_required: false,
            max_dendritic_delay_timesteps: 1,
            num_threads_per_spike: 1,
            kernel_size: vec![],
            wu_model: WeightUpdateModel {
                name: "StaticPulse".to_string(),
                sim_code: "$(addToInSyn, $(g));".to_string(),
                ..Default::default()
            },
            wu_param_values: vec![],
            wu_derived_param_values: vec![],
            wu_var_initialisers: vec![],
            wu_global_var_values: vec![],
            ps_model: PostsynapticModel::default(),
            ps_param_values: vec![],
            connectivity_init: ConnectivityInit::default(),
        }
    }

    #[test]
    fn test_reverse_order_selection() {
        let model = model_with_pair();
        let prefs = Preferences::default();
        let registry = StrategyRegistry::with_defaults();

        // Bitmask optimisations enabled: the later-registered bitmask
        // strategy beats plain PostSpan
        let sg = synapse(
            MatrixType::new(MatrixConnectivity::Bitmask, MatrixWeight::Global),
            SpanType::Postsynaptic,
        );
        assert_eq!(registry.select(&sg, &model, &prefs).unwrap().name(), "PostSpanBitmask");

        let mut no_opt = prefs.clone();
        no_opt.enable_bitmask_optimisations = false;
        assert_eq!(registry.select(&sg, &model, &no_opt).unwrap().name(), "PostSpan");
    }

    #[test]
    fn test_span_type_selection() {
        let model = model_with_pair();
        let prefs = Preferences::default();
        let registry = StrategyRegistry::with_defaults();

        let sparse = MatrixType::new(MatrixConnectivity::Sparse, MatrixWeight::Individual);
        let post = synapse(sparse, SpanType::Postsynaptic);
        assert_eq!(registry.select(&post, &model, &prefs).unwrap().name(), "PostSpan");

        let pre = synapse(sparse, SpanType::Presynaptic);
        assert_eq!(registry.select(&pre, &model, &prefs).unwrap().name(), "PreSpan");
    }

    #[test]
    fn test_no_strategy_is_fatal_and_names_group() {
        let model = model_with_pair();
        let prefs = Preferences::default();
        let registry = StrategyRegistry::new();
        let sg = synapse(
            MatrixType::new(MatrixConnectivity::Dense, MatrixWeight::Individual),
            SpanType::Postsynaptic,
        );
        let err = registry.select(&sg, &model, &prefs).unwrap_err();
        assert!(format!("{}", err).contains("'S'"));
    }

    #[test]
    fn test_thread_counts() {
        let model = model_with_pair();
        let sparse = synapse(
            MatrixType::new(MatrixConnectivity::Sparse, MatrixWeight::Individual),
            SpanType::Postsynaptic,
        );
        assert_eq!(PostSpan.num_threads(&sparse, &model), 16);

        let dense = synapse(
            MatrixType::new(MatrixConnectivity::Dense, MatrixWeight::Individual),
            SpanType::Postsynaptic,
        );
        assert_eq!(PostSpan.num_threads(&dense, &model), 128);

        let pre = synapse(
            MatrixType::new(MatrixConnectivity::Sparse, MatrixWeight::Individual),
            SpanType::Presynaptic,
        );
        assert_eq!(PreSpan.num_threads(&pre, &model), 64);

        let bitmask = synapse(
            MatrixType::new(MatrixConnectivity::Bitmask, MatrixWeight::Global),
            SpanType::Postsynaptic,
        );
        assert_eq!(PostSpanBitmask.num_threads(&bitmask, &model), 4);
        assert_eq!(PostSpanBitmask.row_stride(&bitmask, &model), 128);
    }
}
