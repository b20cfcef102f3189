//! Benchmarks for the generation pipeline.
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use spikegen::codegen::ReferenceBackend;
use spikegen::merge::merge_model;
use spikegen::model::{
    ConnectivityInit, MatrixConnectivity, MatrixType, MatrixWeight, NetworkModel, NeuronGroup,
    NeuronModel, PostsynapticModel, SpanType, SynapseGroup, Variable, WeightUpdateModel,
};

fn balanced_network(populations: usize) -> NetworkModel {
    let mut model = NetworkModel::new("bench", 0.1);

    let lif = NeuronModel {
        name: "LIF".to_string(),
        param_names: vec!["tau".to_string()],
        vars: vec![Variable::new("V", "scalar")],
        sim_code: "$(V) += ($(Isyn) - $(V)) * DT / $(tau);".to_string(),
        threshold_condition_code: "$(V) >= 1.0".to_string(),
        reset_code: "$(V) = 0.0;".to_string(),
        ..Default::default()
    };

    for i in 0..populations {
        model.neuron_groups.push(NeuronGroup {
            name: format!("Pop{}", i),
            num_neurons: 100 + (i as u32 % 4) * 50,
            model: lif.clone(),
            param_values: vec![20.0],
            derived_param_values: vec![],
            var_initialisers: vec!["$(value) = 0.0;".to_string()],
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

    let pulse = WeightUpdateModel {
        name: "StaticPulse".to_string(),
        vars: vec![Variable::new("g", "scalar")],
        sim_code: "$(addToInSyn, $(g));".to_string(),
        ..Default::default()
    };
    for i in 0..populations {
        let j = (i + 1) % populations;
        model.synapse_groups.push(SynapseGroup {
            name: format!("Syn{}", i),
            src: format!("Pop{}", i),
            trg: format!("Pop{}", j),
            matrix: MatrixType::new(MatrixConnectivity::Sparse, MatrixWeight::Individual),
            span_type: SpanType::Postsynaptic,
            max_connections: 32,
            max_source_connections: 32,
            delay_steps: 0,
            back_prop_delay_steps: 0,
            dendritic_delay_required: false,
            max_dendritic_delay_timesteps: 1,
            num_threads_per_spike: 1,
            kernel_size: vec![],
            wu_model: pulse.clone(),
            wu_param_values: vec![],
            wu_derived_param_values: vec![],
            wu_var_initialisers: vec!["$(value) = 0.01;".to_string()],
            wu_global_var_values: vec![],
            ps_model: PostsynapticModel::default(),
            ps_param_values: vec![],
            connectivity_init: ConnectivityInit::default(),
        });
    }
    model
}

/// Benchmark the group-merging planner.
fn bench_merge(c: &mut Criterion) {
    let model = balanced_network(64);
    let backend = ReferenceBackend::default();
    c.bench_function("merge_64_populations", |b| {
        b.iter(|| merge_model(black_box(&model), &backend).unwrap())
    });
}

/// Benchmark the full generation pipeline.
fn bench_generate(c: &mut Criterion) {
    let model = balanced_network(16);
    let backend = ReferenceBackend::default();
    c.bench_function("generate_16_populations", |b| {
        b.iter(|| spikegen::generate(black_box(&model), &backend).unwrap())
    });
}

criterion_group!(benches, bench_merge, bench_generate);
criterion_main!(benches);
