//! Host runner emission: allocation, transfer wrappers, and the
//! per-timestep driver.
//!
//! Produces the three host-side artifacts: `definitions.h` (the public
//! API), `definitionsInternal.h` (merged struct layouts and device
//! internals) and `runner.cc` (allocations, push/pull, `stepTime`).

use crate::codegen::backend::{RunnerStreams, SimtBackend, VarLocation};
use crate::codegen::stream::CodeStream;
use crate::codegen::structs;
use crate::merge::MergedModel;
use crate::model::{NetworkModel, NeuronGroup, SynapseGroup};
use crate::utils::errors::GenResult;
use crate::utils::numfmt::{c_float_literal, precise_f32, precise_f64};

/// The three host-side artifacts.
pub struct GeneratedRunner {
    pub definitions: String,
    pub definitions_internal: String,
    pub runner: String,
}

struct RunnerBuilder<'a> {
    model: &'a NetworkModel,
    backend: &'a dyn SimtBackend,
    definitions_var: CodeStream,
    definitions_func: CodeStream,
    definitions_internal_var: CodeStream,
    var_decl: CodeStream,
    var_alloc: CodeStream,
    var_free: CodeStream,
    push_pull: CodeStream,
    getters: CodeStream,
    /// push<X>StateToDevice call lists: (population, push names)
    state_pushes: Vec<(String, Vec<String>)>,
    /// connectivity pushes feeding copyConnectivityToDevice
    connectivity_pushes: Vec<String>,
}

impl<'a> RunnerBuilder<'a> {
    fn new(model: &'a NetworkModel, backend: &'a dyn SimtBackend) -> Self {
        Self {
            model,
            backend,
            definitions_var: CodeStream::new(),
            definitions_func: CodeStream::new(),
            definitions_internal_var: CodeStream::new(),
            var_decl: CodeStream::new(),
            var_alloc: CodeStream::new(),
            var_free: CodeStream::new(),
            push_pull: CodeStream::new(),
            getters: CodeStream::new(),
            state_pushes: Vec::new(),
            connectivity_pushes: Vec::new(),
        }
    }

    fn streams(&mut self) -> RunnerStreams<'_> {
        RunnerStreams {
            definitions_var: &mut self.definitions_var,
            definitions_internal_var: &mut self.definitions_internal_var,
            var_decl: &mut self.var_decl,
            var_alloc: &mut self.var_alloc,
            var_free: &mut self.var_free,
        }
    }

    /// Declare an array and emit its push/pull wrapper pair.
    fn state_array(&mut self, ty: &str, name: &str, count: u64, guarded: bool) {
        let backend = self.backend;
        backend.gen_array(&mut self.streams(), ty, name, count, VarLocation::HostDevice);

        self.definitions_func
            .line(&format!("EXPORT_FUNC void push{}ToDevice(bool uninitialisedOnly = false);", name));
        self.definitions_func.line(&format!("EXPORT_FUNC void pull{}FromDevice();", name));

        self.push_pull.scope(&format!("void push{}ToDevice(bool uninitialisedOnly)", name), |s| {
            if guarded {
                s.scope("if(!uninitialisedOnly)", |s| {
                    backend.gen_array_push_body(s, ty, name, count);
                });
            } else {
                backend.gen_array_push_body(s, ty, name, count);
            }
        });
        self.push_pull.scope(&format!("void pull{}FromDevice()", name), |s| {
            backend.gen_array_pull_body(s, ty, name, count);
        });
    }

    /// Declare a device-only array (no host mirror, no wrappers).
    fn device_array(&mut self, ty: &str, name: &str, count: u64) {
        let backend = self.backend;
        backend.gen_array(&mut self.streams(), ty, name, count, VarLocation::DeviceOnly);
    }

    /// Declare a host+device scalar.
    fn scalar(&mut self, ty: &str, name: &str) {
        let backend = self.backend;
        backend.gen_scalar(&mut self.streams(), ty, name);
    }

    /// Declare an extra global parameter: bare pointers plus
    /// allocate/free/push/pull taking an element count.
    fn extra_global_param(&mut self, ty: &str, name: &str) {
        let backend = self.backend;
        self.definitions_var.line(&format!("EXPORT_VAR {}* {};", ty, name));
        self.definitions_internal_var.line(&format!("EXPORT_VAR {}* d_{};", ty, name));
        self.var_decl.line(&format!("{}* {};", ty, name));
        self.var_decl.line(&format!("{}* d_{};", ty, name));

        self.definitions_func.line(&format!("EXPORT_FUNC void allocate{}(unsigned int count);", name));
        self.definitions_func.line(&format!("EXPORT_FUNC void free{}();", name));
        self.definitions_func
            .line(&format!("EXPORT_FUNC void push{}ToDevice(unsigned int count);", name));
        self.definitions_func
            .line(&format!("EXPORT_FUNC void pull{}FromDevice(unsigned int count);", name));

        self.push_pull.scope(&format!("void allocate{}(unsigned int count)", name), |s| {
            backend.gen_dynamic_array_alloc_body(s, ty, name, "count");
        });
        self.push_pull.scope(&format!("void free{}()", name), |s| {
            backend.gen_dynamic_array_free_body(s, name);
        });
        self.push_pull.scope(&format!("void push{}ToDevice(unsigned int count)", name), |s| {
            backend.gen_dynamic_array_push_body(s, ty, name, "count");
        });
        self.push_pull.scope(&format!("void pull{}FromDevice(unsigned int count)", name), |s| {
            backend.gen_dynamic_array_pull_body(s, ty, name, "count");
        });
    }

    fn device_ty(&self, ty: &str) -> String {
        if ty == "scalar" {
            self.model.precision.name().to_string()
        } else {
            ty.to_string()
        }
    }

    fn gen_neuron_group(&mut self, ng: &NeuronGroup) {
        let model = self.model;
        let backend = self.backend;
        let name = &ng.name;
        let batch = model.batch_size as u64;
        let n = ng.num_neurons as u64;
        let time = model.time_precision.name().to_string();
        let true_slots =
            if ng.delay_required && ng.true_spike_required { ng.delay_slots() as u64 } else { 1 };
        let all_slots = if ng.delay_required { ng.delay_slots() as u64 } else { 1 };

        self.push_pull.comment(&format!("------ {} ------", name));

        // Spike queues
        self.state_array("unsigned int", &format!("glbSpkCnt{}", name), true_slots * batch, false);
        self.state_array("unsigned int", &format!("glbSpk{}", name), true_slots * n * batch, false);
        if ng.spike_event_required {
            self.state_array(
                "unsigned int",
                &format!("glbSpkCntEvnt{}", name),
                all_slots * batch,
                false,
            );
            self.state_array(
                "unsigned int",
                &format!("glbSpkEvnt{}", name),
                all_slots * n * batch,
                false,
            );
        }
        if ng.delay_required {
            self.scalar("unsigned int", &format!("spkQuePtr{}", name));
        }

        // Current-slot spike transfer
        self.definitions_func
            .line(&format!("EXPORT_FUNC void push{}CurrentSpikesToDevice();", name));
        self.definitions_func
            .line(&format!("EXPORT_FUNC void pull{}CurrentSpikesFromDevice();", name));
        self.push_pull.scope(&format!("void push{}CurrentSpikesToDevice()", name), |s| {
            backend.gen_current_spike_push_body(s, ng, false);
        });
        self.push_pull.scope(&format!("void pull{}CurrentSpikesFromDevice()", name), |s| {
            backend.gen_current_spike_pull_body(s, ng, false);
        });
        if ng.spike_event_required {
            self.definitions_func
                .line(&format!("EXPORT_FUNC void push{}CurrentSpikeEventsToDevice();", name));
            self.definitions_func
                .line(&format!("EXPORT_FUNC void pull{}CurrentSpikeEventsFromDevice();", name));
            self.push_pull.scope(&format!("void push{}CurrentSpikeEventsToDevice()", name), |s| {
                backend.gen_current_spike_push_body(s, ng, true);
            });
            self.push_pull.scope(&format!("void pull{}CurrentSpikeEventsFromDevice()", name), |s| {
                backend.gen_current_spike_pull_body(s, ng, true);
            });
        }

        // Current-spike getters applying the delay-slot shift
        self.definitions_func
            .line(&format!("EXPORT_FUNC unsigned int* getCurrent{}Spikes();", name));
        self.definitions_func
            .line(&format!("EXPORT_FUNC unsigned int getCurrent{}SpikeCount();", name));
        self.getters.scope(&format!("unsigned int* getCurrent{}Spikes()", name), |s| {
            if ng.delay_required && ng.true_spike_required {
                s.line(&format!("return glbSpk{} + (spkQuePtr{} * {});", name, name, n));
            } else {
                s.line(&format!("return glbSpk{};", name));
            }
        });
        self.getters.scope(&format!("unsigned int getCurrent{}SpikeCount()", name), |s| {
            if ng.delay_required && ng.true_spike_required {
                s.line(&format!("return glbSpkCnt{}[spkQuePtr{}];", name, name));
            } else {
                s.line(&format!("return glbSpkCnt{}[0];", name));
            }
        });

        // Spike and event times
        for (flag, array) in [
            (ng.spike_time_required, "sT"),
            (ng.prev_spike_time_required, "prevST"),
            (ng.spike_event_time_required, "seT"),
            (ng.prev_spike_event_time_required, "prevSET"),
        ] {
            if flag {
                self.state_array(&time.clone(), &format!("{}{}", array, name), all_slots * n * batch, false);
            }
        }

        // Per-neuron RNG streams live on device only
        if ng.sim_rng_required {
            let rng_ty = backend.population_rng_type().to_string();
            self.device_array(&rng_ty, &format!("rng{}", name), n * batch);
        }

        // Recording buffers are sized when recording is enabled at runtime
        for (flag, array) in [
            (ng.spike_recording_enabled, "recordSpk"),
            (ng.spike_event_recording_enabled, "recordSpkEvnt"),
        ] {
            if flag {
                let full = format!("{}{}", array, name);
                self.definitions_var.line(&format!("EXPORT_VAR uint32_t* {};", full));
                self.definitions_internal_var.line(&format!("EXPORT_VAR uint32_t* d_{};", full));
                self.var_decl.line(&format!("uint32_t* {};", full));
                self.var_decl.line(&format!("uint32_t* d_{};", full));
            }
        }

        // Model state variables
        let mut pushes = Vec::new();
        for var in &ng.model.vars {
            let ty = self.device_ty(&var.ty);
            let full = format!("{}{}", var.name, name);
            self.state_array(&ty, &full, n * batch, true);
            pushes.push(full);
        }
        self.state_pushes.push((name.clone(), pushes));

        for egp in &ng.model.extra_global_params {
            let ty = self.device_ty(&egp.ty);
            self.extra_global_param(&ty, &format!("{}{}", egp.name, name));
        }
    }

    fn gen_synapse_group(&mut self, sg: &SynapseGroup) {
        let model = self.model;
        let backend = self.backend;
        let name = &sg.name;
        let batch = model.batch_size as u64;
        let src_n = model.src_of(sg).map(|g| g.num_neurons).unwrap_or(0) as u64;
        let trg_n = model.trg_of(sg).map(|g| g.num_neurons).unwrap_or(0) as u64;
        let row_stride = backend.row_stride(model, sg) as u64;
        let scalar = model.precision.name().to_string();

        self.push_pull.comment(&format!("------ {} ------", name));

        self.state_array(&scalar, &format!("inSyn{}", name), trg_n * batch, false);
        if sg.dendritic_delay_required {
            self.state_array(
                &scalar,
                &format!("denDelay{}", name),
                sg.max_dendritic_delay_timesteps as u64 * trg_n * batch,
                false,
            );
            self.scalar("unsigned int", &format!("denDelayPtr{}", sg.ps_target_name()));
        }

        if sg.matrix.is_sparse() {
            self.definitions_var
                .line(&format!("EXPORT_VAR const unsigned int maxRowLength{};", name));
            self.var_decl
                .line(&format!("const unsigned int maxRowLength{} = {};", name, row_stride));
            self.state_array("unsigned int", &format!("rowLength{}", name), src_n, false);
            self.state_array("unsigned int", &format!("ind{}", name), src_n * row_stride, false);

            // Host-built connectivity is shipped through one guarded push
            if !sg.connectivity_init.has_build_code() {
                self.definitions_func
                    .line(&format!("EXPORT_FUNC void push{}ConnectivityToDevice();", name));
                self.push_pull.scope(&format!("void push{}ConnectivityToDevice()", name), |s| {
                    backend.gen_array_push_body(s, "unsigned int", &format!("rowLength{}", name), src_n);
                    backend.gen_array_push_body(
                        s,
                        "unsigned int",
                        &format!("ind{}", name),
                        src_n * row_stride,
                    );
                });
                self.connectivity_pushes.push(format!("push{}ConnectivityToDevice();", name));
            }

            if sg.has_learn_post_code() {
                self.state_array("unsigned int", &format!("colLength{}", name), trg_n, false);
                self.state_array(
                    "unsigned int",
                    &format!("remap{}", name),
                    trg_n * sg.max_source_connections as u64,
                    false,
                );
            }
            if model.is_syn_remap_required(sg) {
                self.device_array(
                    "unsigned int",
                    &format!("synRemap{}", name),
                    1 + src_n * row_stride,
                );
            }
        } else if sg.matrix.is_bitmask() {
            let words = (src_n * row_stride).div_ceil(32);
            self.state_array("uint32_t", &format!("gp{}", name), words, false);
            if !sg.connectivity_init.has_build_code() {
                self.definitions_func
                    .line(&format!("EXPORT_FUNC void push{}ConnectivityToDevice();", name));
                self.push_pull.scope(&format!("void push{}ConnectivityToDevice()", name), |s| {
                    backend.gen_array_push_body(s, "uint32_t", &format!("gp{}", name), words);
                });
                self.connectivity_pushes.push(format!("push{}ConnectivityToDevice();", name));
            }
        }

        // Weight-update variables: per-synapse for individual weights,
        // kernel-shaped for kernel weights
        let mut pushes = Vec::new();
        let var_count = if sg.matrix.has_individual_weights() {
            Some(src_n * row_stride * batch)
        } else if !sg.kernel_size.is_empty() {
            Some(sg.kernel_size.iter().map(|&k| k as u64).product::<u64>())
        } else {
            None
        };
        if let Some(count) = var_count {
            for var in &sg.wu_model.vars {
                let ty = self.device_ty(&var.ty);
                let full = format!("{}{}", var.name, name);
                self.state_array(&ty, &full, count, true);
                pushes.push(full);
            }
        }
        pushes.push(format!("inSyn{}", name));
        self.state_pushes.push((name.clone(), pushes));

        for egp in &sg.wu_model.extra_global_params {
            let ty = self.device_ty(&egp.ty);
            self.extra_global_param(&ty, &format!("{}{}", egp.name, name));
        }
    }

    fn gen_rest(&mut self) {
        let model = self.model;
        for cs in &model.current_sources {
            self.push_pull.comment(&format!("------ {} ------", cs.name));
            let n = model
                .neuron_group(&cs.target)
                .map(|g| g.num_neurons)
                .unwrap_or(0) as u64;
            let mut pushes = Vec::new();
            for var in &cs.model.vars {
                let ty = self.device_ty(&var.ty);
                let full = format!("{}{}", var.name, cs.name);
                self.state_array(&ty, &full, n * model.batch_size as u64, true);
                pushes.push(full);
            }
            self.state_pushes.push((cs.name.clone(), pushes));
            for egp in &cs.model.extra_global_params {
                let ty = self.device_ty(&egp.ty);
                self.extra_global_param(&ty, &format!("{}{}", egp.name, cs.name));
            }
        }

        for cu in &model.custom_updates {
            self.push_pull.comment(&format!("------ {} ------", cu.name));
            let n = model.neuron_group(&cu.target).map(|g| g.num_neurons).unwrap_or(0) as u64;
            let count = if cu.batched { n * model.batch_size as u64 } else { n };
            let mut pushes = Vec::new();
            for var in &cu.model.vars {
                let ty = self.device_ty(&var.ty);
                let full = format!("{}{}", var.name, cu.name);
                self.state_array(&ty, &full, count, true);
                pushes.push(full);
            }
            self.state_pushes.push((cu.name.clone(), pushes));
        }

        for cw in &model.custom_wu_updates {
            self.push_pull.comment(&format!("------ {} ------", cw.name));
            let count = match model.synapse_group(&cw.synapse_group) {
                Ok(sg) => {
                    let src = model.src_of(sg).map(|g| g.num_neurons).unwrap_or(0) as u64;
                    src * self.backend.row_stride(model, sg) as u64
                }
                Err(_) => 0,
            };
            let mut pushes = Vec::new();
            for var in &cw.model.vars {
                let ty = self.device_ty(&var.ty);
                let full = format!("{}{}", var.name, cw.name);
                self.state_array(&ty, &full, count, true);
                pushes.push(full);
            }
            self.state_pushes.push((cw.name.clone(), pushes));
        }
    }

    /// Composite state push/pull per population.
    fn gen_state_composites(&mut self) {
        for (pop, pushes) in &self.state_pushes {
            self.definitions_func.line(&format!(
                "EXPORT_FUNC void push{}StateToDevice(bool uninitialisedOnly = false);",
                pop
            ));
            self.definitions_func
                .line(&format!("EXPORT_FUNC void pull{}StateFromDevice();", pop));
            self.push_pull.scope(
                &format!("void push{}StateToDevice(bool uninitialisedOnly)", pop),
                |s| {
                    for name in pushes {
                        s.line(&format!("push{}ToDevice(uninitialisedOnly);", name));
                    }
                },
            );
            self.push_pull.scope(&format!("void pull{}StateFromDevice()", pop), |s| {
                for name in pushes {
                    s.line(&format!("pull{}FromDevice();", name));
                }
            });
        }
    }
}

fn gen_definitions_header(merged: &MergedModel, backend: &dyn SimtBackend) -> CodeStream {
    let model = merged.model;
    let mut s = CodeStream::new();
    s.line("#pragma once");
    s.blank();

    if backend.preferences().dll_export {
        s.line("#ifdef BUILDING_GENERATED_CODE");
        s.line("#define EXPORT_VAR __declspec(dllexport) extern");
        s.line("#define EXPORT_FUNC __declspec(dllexport)");
        s.line("#else");
        s.line("#define EXPORT_VAR __declspec(dllimport) extern");
        s.line("#define EXPORT_FUNC __declspec(dllimport)");
        s.line("#endif");
    } else {
        s.line("#define EXPORT_VAR extern");
        s.line("#define EXPORT_FUNC");
    }
    s.blank();
    backend.gen_definitions_preamble(&mut s);
    s.blank();

    // Timestep and numeric limits, printed exactly
    if model.precision == crate::model::Precision::Float {
        s.line(&format!("#define DT {}", c_float_literal(model.dt, true)));
    } else {
        s.line(&format!("#define DT {}", c_float_literal(model.dt, false)));
    }
    s.line(&format!("typedef {} scalar;", model.precision.name()));
    s.line(&format!("typedef {} timepoint;", model.time_precision.name()));
    match model.precision {
        crate::model::Precision::Float => {
            s.line(&format!("#define SCALAR_MIN {}f", precise_f32(f32::MIN_POSITIVE)));
            s.line(&format!("#define SCALAR_MAX {}f", precise_f32(f32::MAX)));
        }
        crate::model::Precision::Double => {
            s.line(&format!("#define SCALAR_MIN {}", precise_f64(f64::MIN_POSITIVE)));
            s.line(&format!("#define SCALAR_MAX {}", precise_f64(f64::MAX)));
        }
    }
    match model.time_precision {
        crate::model::Precision::Float => {
            s.line(&format!("#define TIME_MIN {}f", precise_f32(f32::MIN_POSITIVE)));
            s.line(&format!("#define TIME_MAX {}f", precise_f32(f32::MAX)));
        }
        crate::model::Precision::Double => {
            s.line(&format!("#define TIME_MIN {}", precise_f64(f64::MIN_POSITIVE)));
            s.line(&format!("#define TIME_MAX {}", precise_f64(f64::MAX)));
        }
    }
    s.blank();

    s.comment("bit tool macros, high-bit-first");
    s.line("#define B(x,i) ((x) & (0x80000000 >> (i))) //!< Extract the bit at the specified position i from x");
    s.line("#define setB(x,i) x= ((x) | (0x80000000 >> (i))) //!< Set the bit at the specified position i in x to 1");
    s.line("#define delB(x,i) x= ((x) & (~(0x80000000 >> (i)))) //!< Set the bit at the specified position i in x to 0");
    s.blank();

    // Convenience spike macros per population
    for ng in &model.neuron_groups {
        let name = &ng.name;
        if ng.delay_required && ng.true_spike_required {
            s.line(&format!("#define spikeCount_{} glbSpkCnt{}[spkQuePtr{}]", name, name, name));
            s.line(&format!(
                "#define spike_{} (glbSpk{} + (spkQuePtr{} * {}))",
                name, name, name, ng.num_neurons
            ));
            s.line(&format!("#define glbSpkShift{} (spkQuePtr{} * {})", name, name, ng.num_neurons));
        } else {
            s.line(&format!("#define spikeCount_{} glbSpkCnt{}[0]", name, name));
            s.line(&format!("#define spike_{} glbSpk{}", name, name));
            s.line(&format!("#define glbSpkShift{} 0", name));
        }
        if ng.spike_event_required {
            if ng.delay_required {
                s.line(&format!(
                    "#define spikeEventCount_{} glbSpkCntEvnt{}[spkQuePtr{}]",
                    name, name, name
                ));
                s.line(&format!(
                    "#define spikeEvent_{} (glbSpkEvnt{} + (spkQuePtr{} * {}))",
                    name, name, name, ng.num_neurons
                ));
            } else {
                s.line(&format!("#define spikeEventCount_{} glbSpkCntEvnt{}[0]", name, name));
                s.line(&format!("#define spikeEvent_{} glbSpkEvnt{}", name, name));
            }
        }
    }
    s.blank();
    s
}

/// Emit the three host-side artifacts.
pub fn generate_runner(merged: &MergedModel, backend: &dyn SimtBackend) -> GenResult<GeneratedRunner> {
    let model = merged.model;
    let recording = model.is_recording_in_use();

    let mut builder = RunnerBuilder::new(model, backend);
    for ng in &model.neuron_groups {
        builder.gen_neuron_group(ng);
    }
    for sg in &model.synapse_groups {
        builder.gen_synapse_group(sg);
    }
    builder.gen_rest();
    builder.gen_state_composites();

    // ---- definitions.h ---------------------------------------------------
    let mut definitions = gen_definitions_header(merged, backend);
    definitions.line("EXPORT_VAR unsigned long long iT;");
    definitions.line("EXPORT_VAR timepoint t;");
    if recording {
        definitions.line("EXPORT_VAR unsigned long long numRecordingTimesteps;");
    }
    definitions.blank();
    definitions.write(builder.definitions_var.str());
    definitions.blank();
    definitions.write(builder.definitions_func.str());
    definitions.blank();
    definitions.line("EXPORT_FUNC void copyStateToDevice(bool uninitialisedOnly = false);");
    definitions.line("EXPORT_FUNC void copyConnectivityToDevice(bool uninitialisedOnly = false);");
    definitions.line("EXPORT_FUNC void copyStateFromDevice();");
    definitions.line("EXPORT_FUNC void copyCurrentSpikesFromDevice();");
    definitions.line("EXPORT_FUNC void copyCurrentSpikeEventsFromDevice();");
    if recording {
        definitions
            .line("EXPORT_FUNC void allocateRecordingBuffers(unsigned long long timesteps);");
        definitions.line("EXPORT_FUNC void pullRecordingBuffersFromDevice();");
    }
    definitions.line("EXPORT_FUNC void allocateMem();");
    definitions.line("EXPORT_FUNC void freeMem();");
    definitions.line("EXPORT_FUNC void stepTime();");
    definitions.blank();
    definitions.comment("Functions generated by backend");
    if recording {
        definitions
            .line("EXPORT_FUNC void updateNeurons(timepoint t, unsigned int recordingTimestep);");
    } else {
        definitions.line("EXPORT_FUNC void updateNeurons(timepoint t);");
    }
    definitions.line("EXPORT_FUNC void updateSynapses(timepoint t);");
    definitions.line("EXPORT_FUNC void initialize();");
    definitions.line("EXPORT_FUNC void initializeSparse();");
    let mut update_groups: Vec<&str> = model
        .custom_updates
        .iter()
        .map(|c| c.update_group.as_str())
        .chain(model.custom_wu_updates.iter().map(|c| c.update_group.as_str()))
        .collect();
    update_groups.sort_unstable();
    update_groups.dedup();
    for group in &update_groups {
        definitions.line(&format!("EXPORT_FUNC void update{}();", group));
    }

    // ---- definitionsInternal.h -------------------------------------------
    let mut internal = CodeStream::new();
    internal.line("#pragma once");
    internal.line("#include \"definitions.h\"");
    internal.blank();
    internal.comment("merged group structures");
    structs::visit_merged_groups(merged, |name, index, fields, count| {
        structs::gen_merged_struct(&mut internal, name, index, fields, count);
    });
    internal.comment("device copies of population arrays");
    internal.write(builder.definitions_internal_var.str());
    internal.line("EXPORT_VAR unsigned long long deviceRNGSeed;");
    if backend.is_global_rng_required(model) {
        internal.line(&format!("EXPORT_VAR {}* d_rng;", backend.global_rng_type()));
    }

    // ---- runner.cc -------------------------------------------------------
    let mut runner = CodeStream::new();
    backend.gen_runner_preamble(&mut runner, model);
    runner.comment("------------------------------------------------------------------------");
    runner.comment("global variables");
    runner.line("unsigned long long iT;");
    runner.line("timepoint t;");
    if recording {
        runner.line("unsigned long long numRecordingTimesteps = 0;");
    }
    runner.line("unsigned long long deviceRNGSeed = 0;");
    if backend.is_global_rng_required(model) {
        runner.line(&format!("{}* d_rng;", backend.global_rng_type()));
    }
    runner.blank();
    runner.comment("------------------------------------------------------------------------");
    runner.comment("state variables");
    runner.write(builder.var_decl.str());
    runner.blank();

    runner.comment("------------------------------------------------------------------------");
    runner.comment("merged group instances, filled once device pointers exist");
    structs::visit_merged_groups(merged, |name, index, _, count| {
        structs::gen_merged_host_decl(&mut runner, name, index, count);
    });
    runner.blank();

    runner.comment("------------------------------------------------------------------------");
    runner.comment("push/pull functions");
    runner.write(builder.push_pull.str());
    runner.blank();
    runner.write(builder.getters.str());
    runner.blank();

    runner.scope("void copyStateToDevice(bool uninitialisedOnly)", |s| {
        for (pop, _) in &builder.state_pushes {
            s.line(&format!("push{}StateToDevice(uninitialisedOnly);", pop));
        }
    });
    runner.scope("void copyConnectivityToDevice(bool uninitialisedOnly)", |s| {
        s.line("(void)uninitialisedOnly;");
        for push in &builder.connectivity_pushes {
            s.line(push);
        }
    });
    runner.scope("void copyStateFromDevice()", |s| {
        for (pop, _) in &builder.state_pushes {
            s.line(&format!("pull{}StateFromDevice();", pop));
        }
    });
    runner.scope("void copyCurrentSpikesFromDevice()", |s| {
        for ng in &model.neuron_groups {
            s.line(&format!("pull{}CurrentSpikesFromDevice();", ng.name));
        }
    });
    runner.scope("void copyCurrentSpikeEventsFromDevice()", |s| {
        for ng in &model.neuron_groups {
            if ng.spike_event_required {
                s.line(&format!("pull{}CurrentSpikeEventsFromDevice();", ng.name));
            }
        }
    });
    runner.blank();

    if recording {
        runner.scope("void allocateRecordingBuffers(unsigned long long timesteps)", |s| {
            s.line("numRecordingTimesteps = timesteps;");
            for ng in &model.neuron_groups {
                let words = format!(
                    "{} * timesteps",
                    (ng.num_neurons as u64).div_ceil(32) * model.batch_size as u64
                );
                if ng.spike_recording_enabled {
                    backend.gen_dynamic_array_alloc_body(
                        s,
                        "uint32_t",
                        &format!("recordSpk{}", ng.name),
                        &words,
                    );
                }
                if ng.spike_event_recording_enabled {
                    backend.gen_dynamic_array_alloc_body(
                        s,
                        "uint32_t",
                        &format!("recordSpkEvnt{}", ng.name),
                        &words,
                    );
                }
            }
        });
        runner.scope("void pullRecordingBuffersFromDevice()", |s| {
            for ng in &model.neuron_groups {
                let words = format!(
                    "{} * numRecordingTimesteps",
                    (ng.num_neurons as u64).div_ceil(32) * model.batch_size as u64
                );
                if ng.spike_recording_enabled {
                    backend.gen_dynamic_array_pull_body(
                        s,
                        "uint32_t",
                        &format!("recordSpk{}", ng.name),
                        &words,
                    );
                }
                if ng.spike_event_recording_enabled {
                    backend.gen_dynamic_array_pull_body(
                        s,
                        "uint32_t",
                        &format!("recordSpkEvnt{}", ng.name),
                        &words,
                    );
                }
            }
        });
        runner.blank();
    }

    runner.scope("void allocateMem()", |s| {
        backend.gen_allocate_mem_preamble(s, model);
        if backend.is_global_rng_required(model) {
            backend.gen_global_rng_alloc_body(s);
        }
        s.blank();
        s.write(builder.var_alloc.str());
        s.blank();
        s.comment("fill and push merged group tables");
        structs::visit_merged_groups(merged, |name, index, fields, count| {
            structs::gen_merged_host_fill(s, name, index, fields, count);
            structs::gen_merged_push_call(s, name, index);
        });
    });
    runner.scope("void freeMem()", |s| {
        s.write(builder.var_free.str());
        if backend.is_global_rng_required(model) {
            backend.gen_global_rng_free_body(s);
        }
    });
    runner.blank();

    runner.scope("void stepTime()", |s| {
        s.comment("synapses consume the spikes produced last timestep");
        s.line("updateSynapses(t);");
        for ng in &model.neuron_groups {
            if ng.delay_required {
                s.line(&format!(
                    "spkQuePtr{} = (spkQuePtr{} + 1) % {};",
                    ng.name,
                    ng.name,
                    ng.delay_slots()
                ));
            }
        }
        if recording {
            s.line("updateNeurons(t, (unsigned int)(iT % numRecordingTimesteps));");
        } else {
            s.line("updateNeurons(t);");
        }
        for sg in &model.synapse_groups {
            if sg.dendritic_delay_required {
                s.line(&format!(
                    "denDelayPtr{} = (denDelayPtr{} + 1) % {};",
                    sg.ps_target_name(),
                    sg.ps_target_name(),
                    sg.max_dendritic_delay_timesteps
                ));
            }
        }
        s.line("iT++;");
        s.line("t = iT * DT;");
        backend.gen_step_time_finalise_preamble(s, model);
    });

    Ok(GeneratedRunner {
        definitions: definitions.finish(),
        definitions_internal: internal.finish(),
        runner: runner.finish(),
    })
}
