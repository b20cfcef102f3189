//! Backend hook surface abstracting the device dialect.
//!
//! The kernel and runner emitters never spell out dialect-specific syntax;
//! everything device-flavoured (atomics, shared memory, barriers, RNG,
//! array transfer) goes through [`SimtBackend`]. One implementation exists
//! per device runtime; [`ReferenceBackend`] is the CUDA-flavoured dialect
//! the crate ships for the CLI and tests.

use crate::codegen::stream::CodeStream;
use crate::codegen::strategies::StrategyRegistry;
use crate::merge::MergeSupport;
use crate::model::{NetworkModel, SynapseGroup};
use serde::{Deserialize, Serialize};

/// The kernels the generator emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kernel {
    NeuronUpdate,
    PresynapticUpdate,
    PostsynapticUpdate,
    SynapseDynamicsUpdate,
    Initialize,
    InitializeSparse,
    PreNeuronReset,
    PreSynapseReset,
    CustomUpdate,
}

impl Kernel {
    /// Emitted function name.
    pub fn name(self) -> &'static str {
        match self {
            Kernel::NeuronUpdate => "updateNeuronsKernel",
            Kernel::PresynapticUpdate => "updatePresynapticKernel",
            Kernel::PostsynapticUpdate => "updatePostsynapticKernel",
            Kernel::SynapseDynamicsUpdate => "updateSynapseDynamicsKernel",
            Kernel::Initialize => "initializeKernel",
            Kernel::InitializeSparse => "initializeSparseKernel",
            Kernel::PreNeuronReset => "preNeuronResetKernel",
            Kernel::PreSynapseReset => "preSynapseResetKernel",
            Kernel::CustomUpdate => "customUpdateKernel",
        }
    }

    pub const ALL: [Kernel; 9] = [
        Kernel::NeuronUpdate,
        Kernel::PresynapticUpdate,
        Kernel::PostsynapticUpdate,
        Kernel::SynapseDynamicsUpdate,
        Kernel::Initialize,
        Kernel::InitializeSparse,
        Kernel::PreNeuronReset,
        Kernel::PreSynapseReset,
        Kernel::CustomUpdate,
    ];
}

/// Atomic read-modify-write operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AtomicOp {
    Add,
    Or,
}

/// Memory space an atomic operates on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AtomicMemSpace {
    Global,
    Shared,
}

/// Where a state array lives and which transfer wrappers it gets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum VarLocation {
    /// Host mirror plus device copy with push/pull wrappers
    #[default]
    HostDevice,
    /// Device only; no host mirror is allocated
    DeviceOnly,
}

/// Per-kernel block sizes; every kernel's thread counts are padded to a
/// multiple of its block size.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelBlockSizes {
    pub neuron_update: u32,
    pub presynaptic_update: u32,
    pub postsynaptic_update: u32,
    pub synapse_dynamics: u32,
    pub initialize: u32,
    pub initialize_sparse: u32,
    pub pre_neuron_reset: u32,
    pub pre_synapse_reset: u32,
    pub custom_update: u32,
}

impl Default for KernelBlockSizes {
    fn default() -> Self {
        Self {
            neuron_update: 32,
            presynaptic_update: 32,
            postsynaptic_update: 32,
            synapse_dynamics: 32,
            initialize: 32,
            initialize_sparse: 32,
            pre_neuron_reset: 32,
            pre_synapse_reset: 32,
            custom_update: 32,
        }
    }
}

impl KernelBlockSizes {
    pub fn get(&self, kernel: Kernel) -> u32 {
        match kernel {
            Kernel::NeuronUpdate => self.neuron_update,
            Kernel::PresynapticUpdate => self.presynaptic_update,
            Kernel::PostsynapticUpdate => self.postsynaptic_update,
            Kernel::SynapseDynamicsUpdate => self.synapse_dynamics,
            Kernel::Initialize => self.initialize,
            Kernel::InitializeSparse => self.initialize_sparse,
            Kernel::PreNeuronReset => self.pre_neuron_reset,
            Kernel::PreSynapseReset => self.pre_synapse_reset,
            Kernel::CustomUpdate => self.custom_update,
        }
    }
}

/// Generation preferences.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preferences {
    /// Let the bitmask presynaptic strategy claim bitmask projections
    #[serde(default = "default_true")]
    pub enable_bitmask_optimisations: bool,
    /// Build-time flag name switching dllexport/dllimport in the header
    #[serde(default)]
    pub dll_export: bool,
    #[serde(default)]
    pub block_sizes: KernelBlockSizes,
}

fn default_true() -> bool {
    true
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            enable_bitmask_optimisations: true,
            dll_export: false,
            block_sizes: KernelBlockSizes::default(),
        }
    }
}

/// Round `n` up to a multiple of `block_size`.
pub fn pad_size(n: u64, block_size: u32) -> u64 {
    let block = block_size as u64;
    n.div_ceil(block) * block
}

/// The streams a runner array definition fans out into.
pub struct RunnerStreams<'a> {
    /// Public header declarations (`EXPORT_VAR`)
    pub definitions_var: &'a mut CodeStream,
    /// Internal header declarations (device copies)
    pub definitions_internal_var: &'a mut CodeStream,
    /// Runner translation-unit definitions
    pub var_decl: &'a mut CodeStream,
    /// Body of `allocateMem`
    pub var_alloc: &'a mut CodeStream,
    /// Body of `freeMem`
    pub var_free: &'a mut CodeStream,
}

/// Device-dialect hooks consumed by the kernel and runner emitters.
pub trait SimtBackend: MergeSupport {
    /// The strategy registry owned by this backend.
    fn strategies(&self) -> &StrategyRegistry;

    /// Generation preferences.
    fn preferences(&self) -> &Preferences;

    /// Name of the atomic function for `ty`, e.g. `"atomicAdd"`.
    fn atomic(&self, ty: &str, op: AtomicOp, space: AtomicMemSpace) -> String;

    /// Expression for the within-block lane id.
    fn thread_id(&self) -> String;

    /// Declaration prefix for block-shared arrays, e.g. `"__shared__ "`.
    fn shared_prefix(&self) -> &str;

    /// Address-space prefix for merged-struct pointers in kernel code.
    fn pointer_prefix(&self) -> &str;

    /// Block size of the given kernel.
    fn kernel_block_size(&self, kernel: Kernel) -> u32;

    /// Pad a per-group thread count to the kernel's block size.
    fn padded_size(&self, n: u64, kernel: Kernel) -> u64 {
        pad_size(n, self.kernel_block_size(kernel))
    }

    /// Emit a block-wide barrier.
    fn gen_shared_mem_barrier(&self, s: &mut CodeStream);

    /// Emit the kernel entry preamble binding `id` (and `batch`).
    fn gen_kernel_preamble(&self, s: &mut CodeStream, kernel: Kernel, batch_size: u32);

    /// The kernel function header for the given function name; the body
    /// follows in a scope.
    fn kernel_decl(&self, name: &str, params: &[(&str, &str)]) -> String;

    /// Allocate the single global initialisation RNG in `allocateMem`.
    fn gen_global_rng_alloc_body(&self, s: &mut CodeStream);

    /// Free the global initialisation RNG in `freeMem`.
    fn gen_global_rng_free_body(&self, s: &mut CodeStream);

    /// Copy a population RNG stream into the register `lrng`.
    fn gen_population_rng_preamble(&self, s: &mut CodeStream, stream_expr: &str);

    /// Write `lrng` back to its stream.
    fn gen_population_rng_postamble(&self, s: &mut CodeStream, stream_expr: &str);

    /// Seed one population RNG stream.
    fn gen_population_rng_init(&self, s: &mut CodeStream, stream_expr: &str, seed: &str, sequence: &str);

    /// Copy the global init RNG and skip ahead by `sequence` streams.
    fn gen_global_rng_skip_ahead(&self, s: &mut CodeStream, sequence: &str);

    /// Device type of the single global initialisation RNG.
    fn global_rng_type(&self) -> &str;

    /// `$(rng__*)` substitutions against the local RNG register.
    fn rng_functions(&self, rng_var: &str) -> Vec<(&'static str, String)>;

    /// Whether `row * rowStride + col` overflows 32 bits for this group.
    fn are_64bit_synapse_indices_required(&self, model: &NetworkModel, sg: &SynapseGroup) -> bool;

    /// Whether a single global device RNG is needed for initialisation.
    fn is_global_rng_required(&self, model: &NetworkModel) -> bool;

    // ---- runner hooks -------------------------------------------------

    /// Declare, allocate and free one state array.
    fn gen_array(&self, r: &mut RunnerStreams, ty: &str, name: &str, count: u64, loc: VarLocation);

    /// Declare one host+device scalar.
    fn gen_scalar(&self, r: &mut RunnerStreams, ty: &str, name: &str);

    /// Body of a `push<Name>ToDevice` wrapper.
    fn gen_array_push_body(&self, s: &mut CodeStream, ty: &str, name: &str, count: u64);

    /// Body of a `pull<Name>FromDevice` wrapper.
    fn gen_array_pull_body(&self, s: &mut CodeStream, ty: &str, name: &str, count: u64);

    /// Push a scalar (e.g. a queue pointer) to its device copy.
    fn gen_scalar_push_body(&self, s: &mut CodeStream, ty: &str, name: &str);

    /// Allocate a host+device array whose length is a runtime expression
    /// (extra global parameters, recording buffers).
    fn gen_dynamic_array_alloc_body(&self, s: &mut CodeStream, ty: &str, name: &str, count: &str);

    /// Free a dynamically allocated array.
    fn gen_dynamic_array_free_body(&self, s: &mut CodeStream, name: &str);

    /// Push a dynamically sized array with an explicit count expression.
    fn gen_dynamic_array_push_body(&self, s: &mut CodeStream, ty: &str, name: &str, count: &str);

    /// Pull a dynamically sized array with an explicit count expression.
    fn gen_dynamic_array_pull_body(&self, s: &mut CodeStream, ty: &str, name: &str, count: &str);

    /// Zero a device array in place.
    fn gen_array_zero_body(&self, s: &mut CodeStream, ty: &str, name: &str, count: u64);

    /// Push the current delay slot's spikes (or spike-like events).
    fn gen_current_spike_push_body(&self, s: &mut CodeStream, ng: &crate::model::NeuronGroup, event: bool);

    /// Pull the current delay slot's spikes (or spike-like events).
    fn gen_current_spike_pull_body(&self, s: &mut CodeStream, ng: &crate::model::NeuronGroup, event: bool);

    /// Dialect includes and helpers at the top of the definitions header.
    fn gen_definitions_preamble(&self, s: &mut CodeStream);

    /// Dialect includes at the top of the runner translation unit.
    fn gen_runner_preamble(&self, s: &mut CodeStream, model: &NetworkModel);

    /// Device setup at the top of `allocateMem`.
    fn gen_allocate_mem_preamble(&self, s: &mut CodeStream, model: &NetworkModel);

    /// Per-step epilogue at the end of `stepTime` (timer collection etc.).
    fn gen_step_time_finalise_preamble(&self, s: &mut CodeStream, model: &NetworkModel);

    /// Launch a kernel over `total` threads.
    #[allow(clippy::too_many_arguments)]
    fn gen_kernel_launch(
        &self,
        s: &mut CodeStream,
        kernel: Kernel,
        name: &str,
        total: u64,
        batch_size: u32,
        args: &[&str],
    );
}

/// The CUDA-flavoured reference dialect.
pub struct ReferenceBackend {
    preferences: Preferences,
    strategies: StrategyRegistry,
}

impl ReferenceBackend {
    pub fn new(preferences: Preferences) -> Self {
        Self { preferences, strategies: StrategyRegistry::with_defaults() }
    }

    /// Replace the strategy registry, e.g. to register a custom strategy.
    pub fn with_strategies(mut self, strategies: StrategyRegistry) -> Self {
        self.strategies = strategies;
        self
    }
}

impl Default for ReferenceBackend {
    fn default() -> Self {
        Self::new(Preferences::default())
    }
}

impl MergeSupport for ReferenceBackend {
    fn var_prefix(&self) -> &str {
        "d_"
    }

    fn population_rng_type(&self) -> &str {
        "curandState"
    }

    fn row_stride(&self, model: &NetworkModel, sg: &SynapseGroup) -> u32 {
        self.strategies
            .select(sg, model, &self.preferences)
            .map(|s| s.row_stride(sg, model))
            .unwrap_or(sg.max_connections)
    }

    fn is_population_rng_initialised_on_device(&self) -> bool {
        true
    }

    fn scalar_address_prefix(&self) -> &str {
        "&"
    }
}

impl SimtBackend for ReferenceBackend {
    fn strategies(&self) -> &StrategyRegistry {
        &self.strategies
    }

    fn preferences(&self) -> &Preferences {
        &self.preferences
    }

    fn atomic(&self, _ty: &str, op: AtomicOp, _space: AtomicMemSpace) -> String {
        match op {
            AtomicOp::Add => "atomicAdd".to_string(),
            AtomicOp::Or => "atomicOr".to_string(),
        }
    }

    fn thread_id(&self) -> String {
        "threadIdx.x".to_string()
    }

    fn shared_prefix(&self) -> &str {
        "__shared__ "
    }

    fn pointer_prefix(&self) -> &str {
        ""
    }

    fn kernel_block_size(&self, kernel: Kernel) -> u32 {
        self.preferences.block_sizes.get(kernel)
    }

    fn gen_shared_mem_barrier(&self, s: &mut CodeStream) {
        s.line("__syncthreads();");
    }

    fn gen_kernel_preamble(&self, s: &mut CodeStream, _kernel: Kernel, batch_size: u32) {
        s.line("const unsigned int id = (blockIdx.x * blockDim.x) + threadIdx.x;");
        if batch_size > 1 {
            s.line("const unsigned int batch = blockIdx.y;");
        }
    }

    fn kernel_decl(&self, name: &str, params: &[(&str, &str)]) -> String {
        let params = params
            .iter()
            .map(|(ty, name)| format!("{} {}", ty, name))
            .collect::<Vec<_>>()
            .join(", ");
        format!("extern \"C\" __global__ void {}({})", name, params)
    }

    fn gen_global_rng_alloc_body(&self, s: &mut CodeStream) {
        s.line("deviceMalloc((void**)&d_rng, sizeof(curandStatePhilox4_32_10_t));");
    }

    fn gen_global_rng_free_body(&self, s: &mut CodeStream) {
        s.line("deviceFree(d_rng);");
    }

    fn gen_population_rng_preamble(&self, s: &mut CodeStream, stream_expr: &str) {
        s.line(&format!("curandState lrng = {};", stream_expr));
    }

    fn gen_population_rng_postamble(&self, s: &mut CodeStream, stream_expr: &str) {
        s.line(&format!("{} = lrng;", stream_expr));
    }

    fn gen_population_rng_init(
        &self,
        s: &mut CodeStream,
        stream_expr: &str,
        seed: &str,
        sequence: &str,
    ) {
        s.line(&format!("curand_init({}, {}, 0, &{});", seed, sequence, stream_expr));
    }

    fn gen_global_rng_skip_ahead(&self, s: &mut CodeStream, sequence: &str) {
        s.line("curandStatePhilox4_32_10_t lrng = d_rng[0];");
        s.line(&format!("skipahead_sequence((unsigned long long)({}), &lrng);", sequence));
    }

    fn global_rng_type(&self) -> &str {
        "curandStatePhilox4_32_10_t"
    }

    fn rng_functions(&self, rng_var: &str) -> Vec<(&'static str, String)> {
        vec![
            ("rng_uniform", format!("curand_uniform(&{})", rng_var)),
            ("rng_normal", format!("curand_normal(&{})", rng_var)),
            ("rng_exponential", format!("-log(curand_uniform(&{}))", rng_var)),
        ]
    }

    fn are_64bit_synapse_indices_required(&self, model: &NetworkModel, sg: &SynapseGroup) -> bool {
        let src = match model.src_of(sg) {
            Ok(src) => src,
            Err(_) => return false,
        };
        (src.num_neurons as u64) * (self.row_stride(model, sg) as u64) > u32::MAX as u64
    }

    fn is_global_rng_required(&self, model: &NetworkModel) -> bool {
        model.neuron_groups.iter().any(|n| n.init_rng_required)
            || model.synapse_groups.iter().any(|s| {
                s.is_wu_init_rng_required()
                    || s.is_procedural_connectivity_rng_required()
                    || crate::model::code_requires_rng(&s.connectivity_init.row_build_code)
                    || crate::model::code_requires_rng(&s.connectivity_init.col_build_code)
            })
    }

    fn gen_array(&self, r: &mut RunnerStreams, ty: &str, name: &str, count: u64, loc: VarLocation) {
        if loc == VarLocation::HostDevice {
            r.definitions_var.line(&format!("EXPORT_VAR {}* {};", ty, name));
        }
        r.definitions_internal_var.line(&format!("EXPORT_VAR {}* d_{};", ty, name));
        if loc == VarLocation::HostDevice {
            r.var_decl.line(&format!("{}* {};", ty, name));
        }
        r.var_decl.line(&format!("{}* d_{};", ty, name));
        if loc == VarLocation::HostDevice {
            r.var_alloc.line(&format!("{} = new {}[{}];", name, ty, count));
        }
        r.var_alloc
            .line(&format!("deviceMalloc((void**)&d_{}, {} * sizeof({}));", name, count, ty));
        if loc == VarLocation::HostDevice {
            r.var_free.line(&format!("delete[] {};", name));
        }
        r.var_free.line(&format!("deviceFree(d_{});", name));
    }

    fn gen_scalar(&self, r: &mut RunnerStreams, ty: &str, name: &str) {
        r.definitions_var.line(&format!("EXPORT_VAR {} {};", ty, name));
        r.definitions_internal_var.line(&format!("EXPORT_VAR __device__ {} d_{};", ty, name));
        r.var_decl.line(&format!("{} {};", ty, name));
        r.var_decl.line(&format!("__device__ {} d_{};", ty, name));
    }

    fn gen_array_push_body(&self, s: &mut CodeStream, ty: &str, name: &str, count: u64) {
        s.line(&format!(
            "deviceMemcpyToDevice(d_{}, {}, {} * sizeof({}));",
            name, name, count, ty
        ));
    }

    fn gen_array_pull_body(&self, s: &mut CodeStream, ty: &str, name: &str, count: u64) {
        s.line(&format!(
            "deviceMemcpyFromDevice({}, d_{}, {} * sizeof({}));",
            name, name, count, ty
        ));
    }

    fn gen_scalar_push_body(&self, s: &mut CodeStream, ty: &str, name: &str) {
        s.line(&format!("deviceMemcpyToSymbol(d_{}, &{}, sizeof({}));", name, name, ty));
    }

    fn gen_dynamic_array_alloc_body(&self, s: &mut CodeStream, ty: &str, name: &str, count: &str) {
        s.line(&format!("{} = new {}[{}];", name, ty, count));
        s.line(&format!("deviceMalloc((void**)&d_{}, {} * sizeof({}));", name, count, ty));
    }

    fn gen_dynamic_array_free_body(&self, s: &mut CodeStream, name: &str) {
        s.line(&format!("delete[] {};", name));
        s.line(&format!("deviceFree(d_{});", name));
    }

    fn gen_dynamic_array_push_body(&self, s: &mut CodeStream, ty: &str, name: &str, count: &str) {
        s.line(&format!(
            "deviceMemcpyToDevice(d_{}, {}, {} * sizeof({}));",
            name, name, count, ty
        ));
    }

    fn gen_dynamic_array_pull_body(&self, s: &mut CodeStream, ty: &str, name: &str, count: &str) {
        s.line(&format!(
            "deviceMemcpyFromDevice({}, d_{}, {} * sizeof({}));",
            name, name, count, ty
        ));
    }

    fn gen_array_zero_body(&self, s: &mut CodeStream, ty: &str, name: &str, count: u64) {
        s.line(&format!("deviceMemset(d_{}, 0, {} * sizeof({}));", name, count, ty));
    }

    fn gen_current_spike_push_body(
        &self,
        s: &mut CodeStream,
        ng: &crate::model::NeuronGroup,
        event: bool,
    ) {
        let suffix = if event { "Evnt" } else { "" };
        let name = &ng.name;
        if ng.delay_required {
            s.line(&format!(
                "const unsigned int spkOffset = spkQuePtr{} * {};",
                name, ng.num_neurons
            ));
            s.line(&format!(
                "deviceMemcpyToDevice(d_glbSpkCnt{}{} + spkQuePtr{}, glbSpkCnt{}{} + spkQuePtr{}, sizeof(unsigned int));",
                suffix, name, name, suffix, name, name
            ));
            s.line(&format!(
                "deviceMemcpyToDevice(d_glbSpk{}{} + spkOffset, glbSpk{}{} + spkOffset, glbSpkCnt{}{}[spkQuePtr{}] * sizeof(unsigned int));",
                suffix, name, suffix, name, suffix, name, name
            ));
        } else {
            s.line(&format!(
                "deviceMemcpyToDevice(d_glbSpkCnt{}{}, glbSpkCnt{}{}, sizeof(unsigned int));",
                suffix, name, suffix, name
            ));
            s.line(&format!(
                "deviceMemcpyToDevice(d_glbSpk{}{}, glbSpk{}{}, glbSpkCnt{}{}[0] * sizeof(unsigned int));",
                suffix, name, suffix, name, suffix, name
            ));
        }
    }

    fn gen_current_spike_pull_body(
        &self,
        s: &mut CodeStream,
        ng: &crate::model::NeuronGroup,
        event: bool,
    ) {
        let suffix = if event { "Evnt" } else { "" };
        let name = &ng.name;
        if ng.delay_required {
            s.line(&format!(
                "const unsigned int spkOffset = spkQuePtr{} * {};",
                name, ng.num_neurons
            ));
            s.line(&format!(
                "deviceMemcpyFromDevice(glbSpkCnt{}{} + spkQuePtr{}, d_glbSpkCnt{}{} + spkQuePtr{}, sizeof(unsigned int));",
                suffix, name, name, suffix, name, name
            ));
            s.line(&format!(
                "deviceMemcpyFromDevice(glbSpk{}{} + spkOffset, d_glbSpk{}{} + spkOffset, glbSpkCnt{}{}[spkQuePtr{}] * sizeof(unsigned int));",
                suffix, name, suffix, name, suffix, name, name
            ));
        } else {
            s.line(&format!(
                "deviceMemcpyFromDevice(glbSpkCnt{}{}, d_glbSpkCnt{}{}, sizeof(unsigned int));",
                suffix, name, suffix, name
            ));
            s.line(&format!(
                "deviceMemcpyFromDevice(glbSpk{}{}, d_glbSpk{}{}, glbSpkCnt{}{}[0] * sizeof(unsigned int));",
                suffix, name, suffix, name, suffix, name
            ));
        }
    }

    fn gen_definitions_preamble(&self, s: &mut CodeStream) {
        s.line("#include <cstdint>");
        s.line("#include <cstddef>");
    }

    fn gen_runner_preamble(&self, s: &mut CodeStream, model: &NetworkModel) {
        s.line("#include \"definitionsInternal.h\"");
        if self.is_global_rng_required(model)
            || model.neuron_groups.iter().any(|n| n.sim_rng_required)
        {
            s.line("#include <curand_kernel.h>");
        }
        s.blank();
    }

    fn gen_allocate_mem_preamble(&self, s: &mut CodeStream, model: &NetworkModel) {
        s.comment("select device and size the heap before any allocation");
        s.line("deviceInit();");
        if model.seed != 0 {
            s.line(&format!("deviceRNGSeed = {}ULL;", model.seed));
        }
    }

    fn gen_step_time_finalise_preamble(&self, s: &mut CodeStream, _model: &NetworkModel) {
        s.line("deviceSynchronise();");
    }

    fn gen_kernel_launch(
        &self,
        s: &mut CodeStream,
        kernel: Kernel,
        name: &str,
        total: u64,
        batch_size: u32,
        args: &[&str],
    ) {
        let block = self.kernel_block_size(kernel) as u64;
        let grid = total.div_ceil(block);
        s.line(&format!(
            "{}<<<dim3({}, {}), dim3({})>>>({});",
            name,
            grid,
            batch_size,
            block,
            args.join(", ")
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pad_size() {
        assert_eq!(pad_size(100, 32), 128);
        assert_eq!(pad_size(250, 32), 256);
        assert_eq!(pad_size(32, 32), 32);
        assert_eq!(pad_size(0, 32), 0);
        assert_eq!(pad_size(1, 64), 64);
    }

    #[test]
    fn test_reference_atomics() {
        let backend = ReferenceBackend::default();
        assert_eq!(backend.atomic("unsigned int", AtomicOp::Add, AtomicMemSpace::Shared), "atomicAdd");
        assert_eq!(backend.atomic("unsigned int", AtomicOp::Or, AtomicMemSpace::Global), "atomicOr");
    }

    #[test]
    fn test_kernel_names() {
        assert_eq!(Kernel::NeuronUpdate.name(), "updateNeuronsKernel");
        assert_eq!(Kernel::ALL.len(), 9);
    }
}
