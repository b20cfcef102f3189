//! Code generation: backend abstraction, kernel emitters, merged-struct
//! emission and the host runner.
//!
//! ## Architecture
//!
//! ```text
//! NetworkModel → merge::merge_model → MergedModel
//!                                        │
//!                 ┌──────────────────────┼──────────────────────┐
//!                 ▼                      ▼                      ▼
//!          kernels::* emitters    structs emitter        runner emitter
//!                 └──────────────────────┴──────────────────────┘
//!                                        ▼
//!                                GeneratedSources
//! ```
//!
//! Everything dialect-specific flows through the [`backend::SimtBackend`]
//! hook trait; [`backend::ReferenceBackend`] is the CUDA-flavoured dialect
//! used by the CLI and tests.

pub mod backend;
pub mod kernels;
pub mod runner;
pub mod strategies;
pub mod stream;
pub mod structs;

pub use backend::{
    pad_size, AtomicMemSpace, AtomicOp, Kernel, KernelBlockSizes, Preferences, ReferenceBackend,
    SimtBackend, VarLocation,
};
pub use runner::GeneratedRunner;
pub use strategies::{
    PostSpan, PostSpanBitmask, PreSpan, PreSpanProcedural, PresynHandlers,
    PresynapticUpdateStrategy, StrategyRegistry,
};
pub use stream::CodeStream;

use crate::merge::{merge_model, MergedModel};
use crate::model::NetworkModel;
use crate::subst::Substitutions;
use crate::utils::errors::GenResult;
use tracing::info;

/// Everything the generator produces, keyed by emitted file.
#[derive(Debug)]
pub struct GeneratedSources {
    /// `definitions.h` — the public host API
    pub definitions: String,
    /// `definitionsInternal.h` — merged structs and device internals
    pub definitions_internal: String,
    /// `runner.cc` — allocation, transfer and `stepTime`
    pub runner: String,
    /// `neuronUpdate.cc` — spike-queue reset + neuron update kernels
    pub neuron_update: String,
    /// `synapseUpdate.cc` — the three synapse kernels + dendritic reset
    pub synapse_update: String,
    /// `init.cc` — `initialize` and `initializeSparse`
    pub init: String,
    /// `customUpdate.cc` — one entry point per custom update group
    pub custom_update: String,
}

impl GeneratedSources {
    /// The artifacts as (file name, content) pairs.
    pub fn files(&self) -> Vec<(&'static str, &str)> {
        vec![
            ("definitions.h", self.definitions.as_str()),
            ("definitionsInternal.h", self.definitions_internal.as_str()),
            ("runner.cc", self.runner.as_str()),
            ("neuronUpdate.cc", self.neuron_update.as_str()),
            ("synapseUpdate.cc", self.synapse_update.as_str()),
            ("init.cc", self.init.as_str()),
            ("customUpdate.cc", self.custom_update.as_str()),
        ]
    }
}

fn base_subs() -> Substitutions<'static> {
    let mut subs = Substitutions::new();
    subs.add_var("id", "id");
    subs.add_var("t", "t");
    subs
}

fn file_preamble(s: &mut CodeStream) {
    s.line("#include \"definitionsInternal.h\"");
    s.blank();
}

/// Generate all sources for a model against a backend.
pub fn generate<B: SimtBackend>(model: &NetworkModel, backend: &B) -> GenResult<GeneratedSources> {
    let merged = merge_model(model, backend)?;
    generate_merged(&merged, backend)
}

/// Generate all sources from an existing merged-group plan.
pub fn generate_merged<B: SimtBackend>(
    merged: &MergedModel,
    backend: &B,
) -> GenResult<GeneratedSources> {
    let backend: &dyn SimtBackend = backend;
    let model = merged.model;
    let batch_size = model.batch_size;
    let recording = model.is_recording_in_use();
    let kernel_subs = base_subs();

    // ---- neuronUpdate.cc -------------------------------------------------
    let mut neuron_file = CodeStream::new();
    file_preamble(&mut neuron_file);

    let mut pre_neuron_width = 0;
    {
        let mut body = CodeStream::new();
        kernels::spike_queue::gen_pre_neuron_reset_kernel(
            &mut body,
            merged,
            backend,
            &kernel_subs,
            &mut pre_neuron_width,
        )?;
        let body = body.finish();
        neuron_file.scope(
            &backend.kernel_decl(Kernel::PreNeuronReset.name(), &[("timepoint", "t")]),
            |s| {
                backend.gen_kernel_preamble(s, Kernel::PreNeuronReset, 1);
                s.snippet(&body);
            },
        );
        neuron_file.blank();
    }

    let mut neuron_width = 0;
    {
        let mut body = CodeStream::new();
        kernels::neuron_update::gen_neuron_update_kernel(
            &mut body,
            merged,
            backend,
            &kernel_subs,
            &mut neuron_width,
        )?;
        let body = body.finish();
        let params: &[(&str, &str)] = if recording {
            &[("timepoint", "t"), ("unsigned int", "recordingTimestep")]
        } else {
            &[("timepoint", "t")]
        };
        neuron_file.scope(&backend.kernel_decl(Kernel::NeuronUpdate.name(), params), |s| {
            backend.gen_kernel_preamble(s, Kernel::NeuronUpdate, batch_size);
            s.snippet(&body);
        });
        neuron_file.blank();
    }

    let update_neurons_decl = if recording {
        "void updateNeurons(timepoint t, unsigned int recordingTimestep)"
    } else {
        "void updateNeurons(timepoint t)"
    };
    neuron_file.scope(update_neurons_decl, |s| {
        if pre_neuron_width > 0 {
            backend.gen_kernel_launch(
                s,
                Kernel::PreNeuronReset,
                Kernel::PreNeuronReset.name(),
                pre_neuron_width,
                1,
                &["t"],
            );
        }
        if neuron_width > 0 {
            let args: &[&str] = if recording { &["t", "recordingTimestep"] } else { &["t"] };
            backend.gen_kernel_launch(
                s,
                Kernel::NeuronUpdate,
                Kernel::NeuronUpdate.name(),
                neuron_width,
                batch_size,
                args,
            );
        }
    });

    // ---- synapseUpdate.cc ------------------------------------------------
    let mut synapse_file = CodeStream::new();
    file_preamble(&mut synapse_file);

    let mut pre_synapse_width = 0;
    {
        let mut body = CodeStream::new();
        kernels::spike_queue::gen_pre_synapse_reset_kernel(
            &mut body,
            merged,
            backend,
            &mut pre_synapse_width,
        );
        let body = body.finish();
        synapse_file.scope(&backend.kernel_decl(Kernel::PreSynapseReset.name(), &[]), |s| {
            backend.gen_kernel_preamble(s, Kernel::PreSynapseReset, 1);
            s.snippet(&body);
        });
        synapse_file.blank();
    }

    let mut dynamics_width = 0;
    if !merged.synapse_dynamics.is_empty() {
        let mut body = CodeStream::new();
        kernels::synapse_dynamics::gen_synapse_dynamics_kernel(
            &mut body,
            merged,
            backend,
            &kernel_subs,
            &mut dynamics_width,
        )?;
        let body = body.finish();
        synapse_file.scope(
            &backend.kernel_decl(Kernel::SynapseDynamicsUpdate.name(), &[("timepoint", "t")]),
            |s| {
                backend.gen_kernel_preamble(s, Kernel::SynapseDynamicsUpdate, batch_size);
                s.snippet(&body);
            },
        );
        synapse_file.blank();
    }

    let mut presynaptic_width = 0;
    if !merged.presynaptic_update.is_empty() {
        let mut body = CodeStream::new();
        kernels::presynaptic::gen_presynaptic_update_kernel(
            &mut body,
            merged,
            backend,
            &kernel_subs,
            &mut presynaptic_width,
        )?;
        let body = body.finish();
        synapse_file.scope(
            &backend.kernel_decl(Kernel::PresynapticUpdate.name(), &[("timepoint", "t")]),
            |s| {
                backend.gen_kernel_preamble(s, Kernel::PresynapticUpdate, batch_size);
                s.snippet(&body);
            },
        );
        synapse_file.blank();
    }

    let mut postsynaptic_width = 0;
    if !merged.postsynaptic_update.is_empty() {
        let mut body = CodeStream::new();
        kernels::postsynaptic::gen_postsynaptic_update_kernel(
            &mut body,
            merged,
            backend,
            &kernel_subs,
            &mut postsynaptic_width,
        )?;
        let body = body.finish();
        synapse_file.scope(
            &backend.kernel_decl(Kernel::PostsynapticUpdate.name(), &[("timepoint", "t")]),
            |s| {
                backend.gen_kernel_preamble(s, Kernel::PostsynapticUpdate, batch_size);
                s.snippet(&body);
            },
        );
        synapse_file.blank();
    }

    synapse_file.scope("void updateSynapses(timepoint t)", |s| {
        if pre_synapse_width > 0 {
            backend.gen_kernel_launch(
                s,
                Kernel::PreSynapseReset,
                Kernel::PreSynapseReset.name(),
                pre_synapse_width,
                1,
                &[],
            );
        }
        if dynamics_width > 0 {
            backend.gen_kernel_launch(
                s,
                Kernel::SynapseDynamicsUpdate,
                Kernel::SynapseDynamicsUpdate.name(),
                dynamics_width,
                batch_size,
                &["t"],
            );
        }
        if presynaptic_width > 0 {
            backend.gen_kernel_launch(
                s,
                Kernel::PresynapticUpdate,
                Kernel::PresynapticUpdate.name(),
                presynaptic_width,
                batch_size,
                &["t"],
            );
        }
        if postsynaptic_width > 0 {
            backend.gen_kernel_launch(
                s,
                Kernel::PostsynapticUpdate,
                Kernel::PostsynapticUpdate.name(),
                postsynaptic_width,
                batch_size,
                &["t"],
            );
        }
    });

    // ---- init.cc ---------------------------------------------------------
    let mut init_file = CodeStream::new();
    file_preamble(&mut init_file);

    let mut init_width = 0;
    {
        let mut body = CodeStream::new();
        kernels::init::gen_initialize_kernel(
            &mut body,
            merged,
            backend,
            &kernel_subs,
            &mut init_width,
        )?;
        let body = body.finish();
        init_file.scope(
            &backend.kernel_decl(
                Kernel::Initialize.name(),
                &[("unsigned long long", "deviceRNGSeed")],
            ),
            |s| {
                backend.gen_kernel_preamble(s, Kernel::Initialize, 1);
                s.snippet(&body);
            },
        );
        init_file.blank();
    }

    let mut sparse_init_width = 0;
    if !merged.sparse_init.is_empty() {
        let mut body = CodeStream::new();
        kernels::init::gen_initialize_sparse_kernel(
            &mut body,
            merged,
            backend,
            &kernel_subs,
            init_width,
            &mut sparse_init_width,
        )?;
        let body = body.finish();
        init_file.scope(&backend.kernel_decl(Kernel::InitializeSparse.name(), &[]), |s| {
            backend.gen_kernel_preamble(s, Kernel::InitializeSparse, 1);
            s.snippet(&body);
        });
        init_file.blank();
    }

    init_file.scope("void initialize()", |s| {
        // Bitmasks built on device start from zero
        for sg in &model.synapse_groups {
            if sg.matrix.is_bitmask() && sg.connectivity_init.has_build_code() {
                let src_n = model.src_of(sg).map(|g| g.num_neurons).unwrap_or(0) as u64;
                let stride = backend.row_stride(model, sg) as u64;
                backend.gen_array_zero_body(
                    s,
                    "uint32_t",
                    &format!("gp{}", sg.name),
                    (src_n * stride).div_ceil(32),
                );
            }
        }
        if init_width > 0 {
            backend.gen_kernel_launch(
                s,
                Kernel::Initialize,
                Kernel::Initialize.name(),
                init_width,
                1,
                &["deviceRNGSeed"],
            );
        }
    });
    init_file.scope("void initializeSparse()", |s| {
        s.comment("ship host state before touching the remap structures");
        s.line("copyStateToDevice(true);");
        s.line("copyConnectivityToDevice(true);");
        for sg in &model.synapse_groups {
            if sg.matrix.is_sparse() && sg.has_learn_post_code() {
                let trg_n = model.trg_of(sg).map(|g| g.num_neurons).unwrap_or(0) as u64;
                backend.gen_array_zero_body(
                    s,
                    "unsigned int",
                    &format!("colLength{}", sg.name),
                    trg_n,
                );
            }
        }
        if sparse_init_width > 0 {
            backend.gen_kernel_launch(
                s,
                Kernel::InitializeSparse,
                Kernel::InitializeSparse.name(),
                sparse_init_width,
                1,
                &[],
            );
        }
    });

    // ---- customUpdate.cc -------------------------------------------------
    let mut custom_file = CodeStream::new();
    file_preamble(&mut custom_file);

    let mut update_groups: Vec<String> = model
        .custom_updates
        .iter()
        .map(|c| c.update_group.clone())
        .chain(model.custom_wu_updates.iter().map(|c| c.update_group.clone()))
        .collect();
    update_groups.sort_unstable();
    update_groups.dedup();

    for group in &update_groups {
        let kernel_name = format!("customUpdate{}Kernel", group);
        let mut width = 0;
        {
            let mut body = CodeStream::new();
            kernels::custom_update::gen_custom_update_kernel(
                &mut body,
                merged,
                backend,
                &kernel_subs,
                group,
                &mut width,
            )?;
            kernels::custom_update::gen_custom_wu_update_kernel(
                &mut body,
                merged,
                backend,
                &kernel_subs,
                group,
                &mut width,
            )?;
            let body = body.finish();
            custom_file.scope(&backend.kernel_decl(&kernel_name, &[("timepoint", "t")]), |s| {
                backend.gen_kernel_preamble(s, Kernel::CustomUpdate, 1);
                s.snippet(&body);
            });
            custom_file.blank();
        }

        custom_file.scope(&format!("void update{}()", group), |s| {
            // Host-side batch reductions feed the device update
            for hr in &merged.host_reduction {
                if hr.base.archetype().update_group != *group {
                    continue;
                }
                for cu in &hr.base.groups {
                    let size =
                        model.neuron_group(&cu.target).map(|n| n.num_neurons).unwrap_or(0);
                    s.comment("fold batch copies into batch 0");
                    s.scope(
                        &format!("for(unsigned int b = 1; b < {}; b++)", model.batch_size),
                        |s| {
                            s.scope(&format!("for(unsigned int i = 0; i < {}; i++)", size), |s| {
                                for (r, decl) in cu.model.var_refs.iter().enumerate() {
                                    if decl.access == crate::model::VarAccess::Reduce {
                                        let array =
                                            format!("{}{}", cu.var_references[r].var, cu.target);
                                        s.line(&format!(
                                            "{}[i] += {}[(b * {}) + i];",
                                            array, array, size
                                        ));
                                    }
                                }
                            });
                        },
                    );
                    for (r, decl) in cu.model.var_refs.iter().enumerate() {
                        if decl.access == crate::model::VarAccess::Reduce {
                            s.line(&format!(
                                "push{}{}ToDevice();",
                                cu.var_references[r].var, cu.target
                            ));
                        }
                    }
                }
            }
            if width > 0 {
                backend.gen_kernel_launch(
                    s,
                    Kernel::CustomUpdate,
                    &kernel_name,
                    width,
                    1,
                    &["t"],
                );
            }
        });
        custom_file.blank();
    }

    // ---- runner ----------------------------------------------------------
    let host = runner::generate_runner(merged, backend)?;

    info!(
        neuron_width,
        presynaptic_width,
        postsynaptic_width,
        dynamics_width,
        init_width,
        sparse_init_width,
        "generated kernels"
    );

    Ok(GeneratedSources {
        definitions: host.definitions,
        definitions_internal: host.definitions_internal,
        runner: host.runner,
        neuron_update: neuron_file.finish(),
        synapse_update: synapse_file.finish(),
        init: init_file.finish(),
        custom_update: custom_file.finish(),
    })
}
