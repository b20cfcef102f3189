//! Integration tests for the full generation pipeline.

use spikegen::codegen::{pad_size, ReferenceBackend};
use spikegen::frontend::{
    common_type, parse_numeric, promoted_type, scan_source, NumericType, TokenKind, TypeContext,
};
use spikegen::merge::merge_model;
use spikegen::model::{
    ConnectivityInit, MatrixConnectivity, MatrixType, MatrixWeight, NetworkModel, NeuronGroup,
    NeuronModel, PostsynapticModel, SpanType, SynapseGroup, Variable, WeightUpdateModel,
};
use spikegen::subst::Substitutions;

fn lif_model() -> NeuronModel {
    NeuronModel {
        name: "LIF".to_string(),
        param_names: vec!["tau".to_string()],
        vars: vec![Variable::new("V", "scalar")],
        sim_code: "$(V) += ($(Isyn) - $(V)) * DT / $(tau);".to_string(),
        threshold_condition_code: "$(V) >= 1.0".to_string(),
        reset_code: "$(V) = 0.0;".to_string(),
        ..Default::default()
    }
}

fn neuron_group(name: &str, n: u32, model: NeuronModel) -> NeuronGroup {
    NeuronGroup {
        name: name.to_string(),
        num_neurons: n,
        param_values: vec![20.0; model.param_names.len()],
        derived_param_values: vec![],
        var_initialisers: vec![String::new(); model.vars.len()],
        model,
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
    }
}

fn static_pulse() -> WeightUpdateModel {
    WeightUpdateModel {
        name: "StaticPulse".to_string(),
        vars: vec![Variable::new("g", "scalar")],
        sim_code: "$(addToInSyn, $(g));".to_string(),
        ..Default::default()
    }
}

fn synapse_group(name: &str, src: &str, trg: &str, matrix: MatrixType) -> SynapseGroup {
    SynapseGroup {
        name: name.to_string(),
        src: src.to_string(),
        trg: trg.to_string(),
        matrix,
        span_type: SpanType::Postsynaptic,
        max_connections: 16,
        max_source_connections: 16,
        delay_steps: 0,
        back_prop_delay_steps: 0,
        dendritic_delay_required: false,
        max_dendritic_delay_timesteps: 1,
        num_threads_per_spike: 1,
        kernel_size: vec![],
        wu_model: static_pulse(),
        wu_param_values: vec![],
        wu_derived_param_values: vec![],
        wu_var_initialisers: vec!["$(value) = 0.1;".to_string()],
        wu_global_var_values: vec![],
        ps_model: PostsynapticModel::default(),
        ps_param_values: vec![],
        connectivity_init: ConnectivityInit::default(),
    }
}

// ---------------------------------------------------------------------------
// Scenario A: single population, no threshold
// ---------------------------------------------------------------------------

#[test]
fn test_no_threshold_skips_staging_and_compaction() {
    let mut model = NetworkModel::new("net", 0.1);
    let mut lif = lif_model();
    lif.threshold_condition_code.clear();
    lif.reset_code.clear();
    model.neuron_groups.push(neuron_group("Pop", 100, lif));

    let backend = ReferenceBackend::default();
    let sources = spikegen::generate(&model, &backend).unwrap();

    // No spike staging array, no compaction counter
    assert!(!sources.neuron_update.contains("shSpk["));
    assert!(!sources.neuron_update.contains("shSpkCount"));

    // Spike push functions are still declared; arrays hold one count and
    // one id slot per neuron
    assert!(sources.definitions.contains("void pushglbSpkCntPopToDevice"));
    assert!(sources.runner.contains("glbSpkCntPop = new unsigned int[1];"));
    assert!(sources.runner.contains("glbSpkPop = new unsigned int[100];"));
}

// ---------------------------------------------------------------------------
// Scenario B: two same-model populations share one merged group
// ---------------------------------------------------------------------------

#[test]
fn test_same_model_populations_merge() {
    let mut model = NetworkModel::new("net", 0.1);
    model.neuron_groups.push(neuron_group("Exc", 100, lif_model()));
    model.neuron_groups.push(neuron_group("Inh", 250, lif_model()));

    let backend = ReferenceBackend::default();
    let merged = merge_model(&model, &backend).unwrap();
    assert_eq!(merged.neuron_update.len(), 1);
    assert_eq!(merged.neuron_update[0].base.len(), 2);

    // pad(100,32) + pad(250,32) = 128 + 256 = 384
    assert_eq!(pad_size(100, 32) + pad_size(250, 32), 384);
    let sources = spikegen::generate(&model, &backend).unwrap();
    assert!(sources.neuron_update.contains("if(id < 384)"), "{}", sources.neuron_update);
    assert!(!sources.definitions_internal.contains("MergedNeuronUpdateGroup1"));
}

#[test]
fn test_range_tests_partition_launch_width() {
    let mut model = NetworkModel::new("net", 0.1);
    model.neuron_groups.push(neuron_group("A", 100, lif_model()));
    // A structurally different second group: extra state variable
    let mut other = lif_model();
    other.name = "LIF2".to_string();
    other.vars.push(Variable::new("U", "scalar"));
    let mut b = neuron_group("B", 60, other);
    b.var_initialisers.push(String::new());
    model.neuron_groups.push(b);

    let backend = ReferenceBackend::default();
    let sources = spikegen::generate(&model, &backend).unwrap();

    // Two merged groups: [0, 128) and [128, 192)
    assert!(sources.neuron_update.contains("if(id < 128)"));
    assert!(sources.neuron_update.contains("if(id >= 128 && id < 192)"));
    assert!(sources.neuron_update.contains("updateNeuronsKernel<<<dim3(6, 1), dim3(32)>>>"));
}

// ---------------------------------------------------------------------------
// Scenario C: sparse projection without learning or dynamics
// ---------------------------------------------------------------------------

#[test]
fn test_plain_sparse_projection_has_no_remap_structures() {
    let mut model = NetworkModel::new("net", 0.1);
    model.neuron_groups.push(neuron_group("Pre", 100, lif_model()));
    model.neuron_groups.push(neuron_group("Post", 100, lif_model()));
    let mut sg = synapse_group(
        "S",
        "Pre",
        "Post",
        MatrixType::new(MatrixConnectivity::Sparse, MatrixWeight::Individual),
    );
    sg.max_source_connections = 24;
    model.synapse_groups.push(sg);

    let backend = ReferenceBackend::default();
    let merged = merge_model(&model, &backend).unwrap();
    assert!(merged.postsynaptic_update.is_empty());
    assert!(merged.synapse_dynamics.is_empty());

    let sources = spikegen::generate(&model, &backend).unwrap();
    assert!(!sources.runner.contains("synRemapS"));
    assert!(!sources.runner.contains("colLengthS"));
    assert!(!sources.runner.contains("remapS"));

    // Postsynaptic thread count for sparse matrices is the max column length
    assert_eq!(
        spikegen::codegen::kernels::postsynaptic::num_postsynaptic_update_threads(
            &model.synapse_groups[0],
            &model
        ),
        24
    );
}

// ---------------------------------------------------------------------------
// Scenario D/E: scanner literals and the numeric lattice
// ---------------------------------------------------------------------------

#[test]
fn test_scalar_literal_classification() {
    let float_ctx = TypeContext::for_model(NumericType::Float, NumericType::Double);
    let double_ctx = TypeContext::for_model(NumericType::Double, NumericType::Double);

    assert_eq!(scan_source("1.5", &float_ctx).unwrap()[0].kind, TokenKind::FloatNumber);
    assert_eq!(scan_source("1.5", &double_ctx).unwrap()[0].kind, TokenKind::DoubleNumber);
    assert_eq!(scan_source("1.5f", &double_ctx).unwrap()[0].kind, TokenKind::FloatNumber);
    assert!(scan_source("0x1.5", &float_ctx).is_err());
}

#[test]
fn test_usual_arithmetic_conversions() {
    assert_eq!(common_type(NumericType::Uint32, NumericType::Int32), NumericType::Uint32);
    assert_eq!(promoted_type(NumericType::Uint8), NumericType::Int32);
    // Round-trip through the canonical name
    for ty in [NumericType::Uint16, NumericType::Float, NumericType::Bool] {
        assert_eq!(parse_numeric(ty.name()).unwrap(), ty);
    }
}

// ---------------------------------------------------------------------------
// Scenario F: delay configuration splits merged update groups
// ---------------------------------------------------------------------------

#[test]
fn test_delay_steps_split_presynaptic_groups() {
    let mut model = NetworkModel::new("net", 0.1);
    let mut pre = neuron_group("Pre", 100, lif_model());
    pre.delay_required = true;
    pre.num_delay_slots = 3;
    model.neuron_groups.push(pre);
    model.neuron_groups.push(neuron_group("Post", 100, lif_model()));

    for delay in 0..3u32 {
        let mut sg = synapse_group(
            &format!("S{}", delay),
            "Pre",
            "Post",
            MatrixType::new(MatrixConnectivity::Sparse, MatrixWeight::Individual),
        );
        sg.delay_steps = delay;
        model.synapse_groups.push(sg);
    }

    let backend = ReferenceBackend::default();
    let merged = merge_model(&model, &backend).unwrap();
    assert_eq!(merged.presynaptic_update.len(), 3);
}

// ---------------------------------------------------------------------------
// Property 6: substitution idempotence
// ---------------------------------------------------------------------------

#[test]
fn test_substitution_idempotence() {
    let mut subs = Substitutions::new();
    subs.add_var("V", "lV");
    let once = subs.apply("$(V) += 1.0f;");
    assert_eq!(once, "lV += 1.0f;");
    assert_eq!(subs.apply(&once), once);
    assert_eq!(subs.apply_check_unreplaced(&once, "idempotence").unwrap(), once);
}

// ---------------------------------------------------------------------------
// Property 7: stepTime ordering
// ---------------------------------------------------------------------------

#[test]
fn test_step_time_ordering() {
    let mut model = NetworkModel::new("net", 0.1);
    let mut pre = neuron_group("Pre", 100, lif_model());
    pre.delay_required = true;
    pre.num_delay_slots = 5;
    model.neuron_groups.push(pre);
    model.neuron_groups.push(neuron_group("Post", 100, lif_model()));
    let mut sg = synapse_group(
        "S",
        "Pre",
        "Post",
        MatrixType::new(MatrixConnectivity::Sparse, MatrixWeight::Individual),
    );
    sg.dendritic_delay_required = true;
    sg.max_dendritic_delay_timesteps = 8;
    model.synapse_groups.push(sg);

    let backend = ReferenceBackend::default();
    let sources = spikegen::generate(&model, &backend).unwrap();

    let step = &sources.runner[sources.runner.find("void stepTime()").unwrap()..];
    let synapses = step.find("updateSynapses(t);").unwrap();
    let queue = step.find("spkQuePtrPre = (spkQuePtrPre + 1) % 5;").unwrap();
    let neurons = step.find("updateNeurons(t").unwrap();
    let dendritic = step.find("denDelayPtrS = (denDelayPtrS + 1) % 8;").unwrap();
    let advance = step.find("iT++;").unwrap();

    assert!(synapses < queue);
    assert!(queue < neurons);
    assert!(neurons < dendritic);
    assert!(dendritic < advance);
}

// ---------------------------------------------------------------------------
// Property 8: learn-post emits the column remap structures
// ---------------------------------------------------------------------------

#[test]
fn test_learn_post_emits_column_structures() {
    let mut model = NetworkModel::new("net", 0.1);
    model.neuron_groups.push(neuron_group("Pre", 100, lif_model()));
    model.neuron_groups.push(neuron_group("Post", 50, lif_model()));
    let mut sg = synapse_group(
        "Plastic",
        "Pre",
        "Post",
        MatrixType::new(MatrixConnectivity::Sparse, MatrixWeight::Individual),
    );
    sg.max_source_connections = 32;
    sg.wu_model.learn_post_code = "$(g) += 0.01;".to_string();
    model.synapse_groups.push(sg);

    let backend = ReferenceBackend::default();
    let sources = spikegen::generate(&model, &backend).unwrap();

    assert!(sources.runner.contains("colLengthPlastic = new unsigned int[50];"));
    // remap is numTrgNeurons x maxSourceConnections
    assert!(sources.runner.contains("remapPlastic = new unsigned int[1600];"));
    assert!(sources.synapse_update.contains("group->remap[(shSpk[j] * group->colStride)"));
}

// ---------------------------------------------------------------------------
// Property 9: delayed populations get a queue pointer
// ---------------------------------------------------------------------------

#[test]
fn test_delayed_population_queue_pointer() {
    let mut model = NetworkModel::new("net", 0.1);
    let mut pop = neuron_group("Delayed", 100, lif_model());
    pop.delay_required = true;
    pop.num_delay_slots = 7;
    model.neuron_groups.push(pop);

    let backend = ReferenceBackend::default();
    let sources = spikegen::generate(&model, &backend).unwrap();

    assert!(sources.definitions.contains("EXPORT_VAR unsigned int spkQuePtrDelayed;"));
    assert!(sources.runner.contains("spkQuePtrDelayed = (spkQuePtrDelayed + 1) % 7;"));
    // Spike arrays carry all delay slots
    assert!(sources.runner.contains("glbSpkCntDelayed = new unsigned int[7];"));
    assert!(sources.runner.contains("glbSpkDelayed = new unsigned int[700];"));
    // The reset kernel advances the device copy modulo the slot count
    assert!(sources
        .neuron_update
        .contains("*group->spkQuePtr = (*group->spkQuePtr + 1) % 7;"));
}

// ---------------------------------------------------------------------------
// Full pipeline smoke tests
// ---------------------------------------------------------------------------

fn rich_model() -> NetworkModel {
    let mut model = NetworkModel::new("rich", 0.1);

    let mut input = neuron_group("Input", 64, lif_model());
    input.spike_recording_enabled = true;
    model.neuron_groups.push(input);

    let mut hidden = neuron_group("Hidden", 128, lif_model());
    hidden.delay_required = true;
    hidden.num_delay_slots = 4;
    hidden.spike_time_required = true;
    hidden.prev_spike_time_required = true;
    model.neuron_groups.push(hidden);

    model.neuron_groups.push(neuron_group("Output", 32, lif_model()));

    let mut feedforward = synapse_group(
        "InputHidden",
        "Input",
        "Hidden",
        MatrixType::new(MatrixConnectivity::Sparse, MatrixWeight::Individual),
    );
    feedforward.connectivity_init = ConnectivityInit {
        name: "FixedProbability".to_string(),
        param_names: vec!["prob".to_string()],
        param_values: vec![0.1],
        row_build_code: concat!(
            "const scalar u = $(rng_uniform);\n",
            "if (u < $(prob)) {\n",
            "    $(addSynapse, $(id_post_begin));\n",
            "}\n"
        )
        .to_string(),
        col_build_code: String::new(),
        host_init_rng_required: false,
    };
    feedforward.wu_var_initialisers = vec!["$(value) = $(rng_uniform) * 0.01;".to_string()];
    model.synapse_groups.push(feedforward);

    let mut plastic = synapse_group(
        "HiddenOutput",
        "Hidden",
        "Output",
        MatrixType::new(MatrixConnectivity::Sparse, MatrixWeight::Individual),
    );
    plastic.wu_model.learn_post_code = "$(g) += 0.001;".to_string();
    plastic.wu_model.synapse_dynamics_code = "$(addToInSyn, $(g) * 0.0001);".to_string();
    model.synapse_groups.push(plastic);

    let dense = synapse_group(
        "OutputHidden",
        "Output",
        "Hidden",
        MatrixType::new(MatrixConnectivity::Dense, MatrixWeight::Individual),
    );
    model.synapse_groups.push(dense);

    model
}

#[test]
fn test_full_generation_pipeline() {
    let model = rich_model();
    let backend = ReferenceBackend::default();
    let sources = spikegen::generate(&model, &backend).unwrap();

    // Every artifact has content
    for (name, content) in sources.files() {
        assert!(!content.is_empty(), "{} is empty", name);
    }

    // Device structs exist for each purpose in play
    assert!(sources.definitions_internal.contains("struct MergedNeuronUpdateGroup0"));
    assert!(sources.definitions_internal.contains("struct MergedPresynapticUpdateGroup0"));
    assert!(sources.definitions_internal.contains("struct MergedPostsynapticUpdateGroup0"));
    assert!(sources.definitions_internal.contains("struct MergedSynapseDynamicsGroup0"));
    assert!(sources.definitions_internal.contains("struct MergedSynapseSparseInitGroup0"));

    // Spike staging and compaction are present (thresholds exist)
    assert!(sources.neuron_update.contains("shSpk"));
    assert!(sources.neuron_update.contains("atomicAdd(&shSpkCount, 1)"));
    assert!(sources.neuron_update.contains("__syncthreads();"));

    // Sparse init builds the remap structures
    assert!(sources.init.contains("group->synRemap[0] = shRowStart[numRowsInBlock];"));
    assert!(sources.init.contains("group->remap[colMajorIndex] = idx;"));

    // Recording copies words out per 32 lanes
    assert!(sources.neuron_update.contains("numRecordingWords"));
    assert!(sources.definitions.contains("allocateRecordingBuffers"));

    // Procedural RNG skipped into connectivity build
    assert!(sources.init.contains("curand_uniform"));
}

#[test]
fn test_merged_kernel_body_is_shared_across_members() {
    // Two structurally identical projections: one merged group, one struct
    let mut model = NetworkModel::new("net", 0.1);
    model.neuron_groups.push(neuron_group("A", 100, lif_model()));
    model.neuron_groups.push(neuron_group("B", 100, lif_model()));
    model.neuron_groups.push(neuron_group("C", 100, lif_model()));
    model.synapse_groups.push(synapse_group(
        "AB",
        "A",
        "B",
        MatrixType::new(MatrixConnectivity::Dense, MatrixWeight::Individual),
    ));
    model.synapse_groups.push(synapse_group(
        "AC",
        "A",
        "C",
        MatrixType::new(MatrixConnectivity::Dense, MatrixWeight::Individual),
    ));

    let backend = ReferenceBackend::default();
    let merged = merge_model(&model, &backend).unwrap();
    assert_eq!(merged.presynaptic_update.len(), 1);
    assert_eq!(merged.presynaptic_update[0].base.len(), 2);

    let sources = spikegen::generate(&model, &backend).unwrap();
    // One kernel body; the two members differ only in the field table
    assert_eq!(sources.synapse_update.matches("const unsigned int numSpikes =").count(), 1);
    // Dense PostSpan rows stride over the whole target population
    assert!(sources
        .runner
        .contains("= {100, 100, 100, d_glbSpkCntA, d_glbSpkA, d_inSynAB, d_gAB};"));
    assert!(sources
        .runner
        .contains("= {100, 100, 100, d_glbSpkCntA, d_glbSpkA, d_inSynAC, d_gAC};"));
}

#[test]
fn test_heterogeneous_parameters_become_fields() {
    let mut model = NetworkModel::new("net", 0.1);
    let mut a = neuron_group("A", 100, lif_model());
    a.param_values = vec![20.0];
    let mut b = neuron_group("B", 100, lif_model());
    b.param_values = vec![10.0];
    model.neuron_groups.push(a);
    model.neuron_groups.push(b);

    let backend = ReferenceBackend::default();
    let merged = merge_model(&model, &backend).unwrap();
    assert_eq!(merged.neuron_update.len(), 1);
    assert!(merged.neuron_update[0].het_params[0]);
    assert_eq!(merged.neuron_update[0].param_ref(0), "group->tau");

    let sources = spikegen::generate(&model, &backend).unwrap();
    assert!(sources.definitions_internal.contains("float tau;"));
    // Homogeneous case inlines the literal instead
    let mut homogeneous = NetworkModel::new("net2", 0.1);
    homogeneous.neuron_groups.push(neuron_group("A", 100, lif_model()));
    homogeneous.neuron_groups.push(neuron_group("B", 100, lif_model()));
    let merged = merge_model(&homogeneous, &backend).unwrap();
    assert!(!merged.neuron_update[0].het_params[0]);
    assert_eq!(merged.neuron_update[0].param_ref(0), "(20.0f)");
}

#[test]
fn test_missing_strategy_is_fatal() {
    let mut model = NetworkModel::new("net", 0.1);
    model.neuron_groups.push(neuron_group("Pre", 10, lif_model()));
    model.neuron_groups.push(neuron_group("Post", 10, lif_model()));
    // Presynaptic span over a dense matrix matches no built-in strategy
    let mut sg = synapse_group(
        "Odd",
        "Pre",
        "Post",
        MatrixType::new(MatrixConnectivity::Dense, MatrixWeight::Individual),
    );
    sg.span_type = SpanType::Presynaptic;
    model.synapse_groups.push(sg);

    let backend = ReferenceBackend::default();
    let err = spikegen::generate(&model, &backend).unwrap_err();
    assert!(format!("{}", err).contains("Odd"));
}

#[test]
fn test_unresolved_substitution_carries_context() {
    let mut model = NetworkModel::new("net", 0.1);
    let mut lif = lif_model();
    lif.sim_code = "$(V) += $(undeclared);".to_string();
    model.neuron_groups.push(neuron_group("Pop", 10, lif));

    let backend = ReferenceBackend::default();
    let err = spikegen::generate(&model, &backend).unwrap_err();
    let message = format!("{}", err);
    assert!(message.contains("$(undeclared)"), "{}", message);
    assert!(message.contains("neuron update : merged0"), "{}", message);
}

#[test]
fn test_bitmask_strategy_emits_word_scan() {
    let mut model = NetworkModel::new("net", 0.1);
    model.neuron_groups.push(neuron_group("Pre", 64, lif_model()));
    model.neuron_groups.push(neuron_group("Post", 64, lif_model()));
    let mut sg = synapse_group(
        "Mask",
        "Pre",
        "Post",
        MatrixType::new(MatrixConnectivity::Bitmask, MatrixWeight::Global),
    );
    sg.wu_model.vars = vec![Variable::new("g", "scalar")];
    sg.wu_var_initialisers = vec![String::new()];
    sg.wu_global_var_values = vec![0.05];
    model.synapse_groups.push(sg);

    let backend = ReferenceBackend::default();
    let sources = spikegen::generate(&model, &backend).unwrap();

    // PostSpanBitmask: shLg accumulators plus the count-leading-zeros scan
    assert!(sources.synapse_update.contains("shLg["));
    assert!(sources.synapse_update.contains("__clz(connectivityWord)"));
    // Global weight inlined as a literal
    assert!(sources.synapse_update.contains("(0.05f)"));
}

#[test]
fn test_event_projection_uses_event_queues() {
    let mut model = NetworkModel::new("net", 0.1);
    let mut pre = neuron_group("Pre", 32, lif_model());
    pre.spike_event_required = true;
    model.neuron_groups.push(pre);
    model.neuron_groups.push(neuron_group("Post", 32, lif_model()));

    let mut sg = synapse_group(
        "Graded",
        "Pre",
        "Post",
        MatrixType::new(MatrixConnectivity::Dense, MatrixWeight::Global),
    );
    sg.wu_model = WeightUpdateModel {
        name: "Graded".to_string(),
        vars: vec![Variable::new("g", "scalar")],
        event_code: "$(addToInSyn, $(g));".to_string(),
        event_threshold_condition_code: "$(V_pre) > 0.5".to_string(),
        ..Default::default()
    };
    sg.wu_global_var_values = vec![0.01];
    sg.wu_var_initialisers = vec![String::new()];
    model.synapse_groups.push(sg);

    let backend = ReferenceBackend::default();
    let sources = spikegen::generate(&model, &backend).unwrap();

    // Neuron kernel stages events on lane 1; synapse kernel drains them
    assert!(sources.neuron_update.contains("shSpkEvntCount"));
    assert!(sources.synapse_update.contains("srcSpkCntEvnt"));
    assert!(sources.runner.contains("glbSpkCntEvntPre"));
    assert!(sources.definitions.contains("spikeEventCount_Pre"));
}

#[test]
fn test_model_serde_round_trip() {
    let model = rich_model();
    let json = serde_json::to_string_pretty(&model).unwrap();
    let back: NetworkModel = serde_json::from_str(&json).unwrap();
    assert_eq!(model, back);
}
