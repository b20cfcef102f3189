//! Presynaptic update kernel: spike propagation through the selected
//! update strategy.

use crate::codegen::backend::{Kernel, SimtBackend};
use crate::codegen::kernels::{add_wu_substitutions, gen_parallel_group, gen_synapse_index_calculation};
use crate::codegen::strategies::PresynHandlers;
use crate::codegen::stream::CodeStream;
use crate::merge::{MergedModel, SynapseMerged};
use crate::model::SpanType;
use crate::subst::Substitutions;
use crate::utils::errors::GenResult;
use tracing::debug;

/// Emit the presynaptic update kernel body.
pub fn gen_presynaptic_update_kernel(
    s: &mut CodeStream,
    merged: &MergedModel,
    backend: &dyn SimtBackend,
    kernel_subs: &Substitutions,
    id_start: &mut u64,
) -> GenResult<()> {
    let model = merged.model;
    let block_size = backend.kernel_block_size(Kernel::PresynapticUpdate);
    let prefs = backend.preferences();

    // Size the shared accumulation array to the hungriest strategy
    let mut max_shared_per_thread = 0;
    for sg in &merged.presynaptic_update {
        let strategy = backend.strategies().select(sg.base.archetype(), model, prefs)?;
        max_shared_per_thread =
            max_shared_per_thread.max(strategy.shared_memory_per_thread(sg, backend));
    }
    if max_shared_per_thread > 0 {
        s.line(&format!(
            "{}{} shLg[{}];",
            backend.shared_prefix(),
            model.precision.name(),
            max_shared_per_thread * block_size
        ));
    }
    if merged.presynaptic_update.iter().any(|sg| {
        sg.base.archetype().span_type == SpanType::Postsynaptic
            && sg.base.archetype().matrix.is_sparse()
    }) {
        s.line(&format!("{}unsigned int shRowLength[{}];", backend.shared_prefix(), block_size));
    }
    if merged
        .presynaptic_update
        .iter()
        .any(|sg| sg.base.archetype().is_true_spike_required())
    {
        s.line(&format!("{}unsigned int shSpk[{}];", backend.shared_prefix(), block_size));
    }
    if merged
        .presynaptic_update
        .iter()
        .any(|sg| sg.base.archetype().is_spike_event_required())
    {
        s.line(&format!("{}unsigned int shSpkEvnt[{}];", backend.shared_prefix(), block_size));
    }
    s.blank();

    for sg in &merged.presynaptic_update {
        let strategy = backend.strategies().select(sg.base.archetype(), model, prefs)?;
        debug!(
            strategy = strategy.name(),
            group = sg.base.index,
            "selected presynaptic update strategy"
        );

        let padded: Vec<u64> = sg
            .base
            .groups
            .iter()
            .map(|member| {
                backend.padded_size(strategy.num_threads(member, model), Kernel::PresynapticUpdate)
            })
            .collect();

        gen_parallel_group(
            s,
            kernel_subs,
            "PresynapticUpdate",
            sg.base.index,
            &padded,
            id_start,
            backend,
            &mut |s, pop_subs| {
                gen_synapse_index_calculation(s, sg, model.batch_size);

                strategy.gen_preamble(s, model, sg, pop_subs, backend);

                let thresh = thresh_handler(model);
                let proc_connect = proc_connect_handler(backend);

                // Spike-like events first, then true spikes
                if sg.base.archetype().is_spike_event_required() {
                    let body = code_handler(model, backend, |mg: &SynapseMerged| {
                        mg.base.archetype().wu_model.event_code.clone()
                    });
                    let handlers =
                        PresynHandlers { thresh: &thresh, body: &body, proc_connect: &proc_connect };
                    s.line("{");
                    s.indent();
                    strategy.gen_update(s, model, sg, pop_subs, backend, false, &handlers)?;
                    s.dedent();
                    s.line("}");
                }
                if sg.base.archetype().is_true_spike_required() {
                    let body = code_handler(model, backend, |mg: &SynapseMerged| {
                        mg.base.archetype().wu_model.sim_code.clone()
                    });
                    let handlers =
                        PresynHandlers { thresh: &thresh, body: &body, proc_connect: &proc_connect };
                    s.line("{");
                    s.indent();
                    strategy.gen_update(s, model, sg, pop_subs, backend, true, &handlers)?;
                    s.dedent();
                    s.line("}");
                }
                s.blank();

                strategy.gen_postamble(s, model, sg, pop_subs, backend);
                Ok(())
            },
        )?;
    }
    Ok(())
}

/// Handler lowering a weight-update snippet with the full substitution set.
fn code_handler<'a>(
    model: &'a crate::model::NetworkModel,
    backend: &'a dyn SimtBackend,
    select: impl Fn(&SynapseMerged) -> String + 'a,
) -> impl Fn(&SynapseMerged, &Substitutions) -> GenResult<String> + 'a {
    move |mg, subs| {
        let mut wu_subs = Substitutions::with_parent(subs);
        wu_subs.add_var("t", "t");
        let syn_index = subs.get_var("id_syn").map(|s| s.to_string());
        add_wu_substitutions(&mut wu_subs, mg, model, syn_index.as_deref());
        if mg.base.archetype().matrix.is_procedural() {
            for (name, replacement) in backend.rng_functions("lrng") {
                wu_subs.add_var(name, replacement);
            }
        }
        Ok(wu_subs.apply_check_unreplaced(&select(mg), &mg.context_label("presynaptic update"))?)
    }
}

/// Handler lowering the spike-event threshold condition.
fn thresh_handler(
    model: &crate::model::NetworkModel,
) -> impl Fn(&SynapseMerged, &Substitutions) -> GenResult<String> + '_ {
    move |mg, subs| {
        let mut wu_subs = Substitutions::with_parent(subs);
        wu_subs.add_var("t", "t");
        add_wu_substitutions(&mut wu_subs, mg, model, None);
        Ok(wu_subs.apply_check_unreplaced(
            &mg.base.archetype().wu_model.event_threshold_condition_code,
            &mg.context_label("event threshold"),
        )?)
    }
}

/// Handler lowering the procedural connectivity-generation snippet.
fn proc_connect_handler(
    backend: &dyn SimtBackend,
) -> impl Fn(&SynapseMerged, &Substitutions) -> GenResult<String> + '_ {
    move |mg, subs| {
        let mut conn_subs = Substitutions::with_parent(subs);
        let archetype = mg.base.archetype();
        for (i, name) in archetype.connectivity_init.param_names.iter().enumerate() {
            conn_subs.add_var(name.clone(), mg.conn_param_ref(i));
        }
        if crate::model::code_requires_rng(&archetype.connectivity_init.row_build_code) {
            for (name, replacement) in backend.rng_functions("lrng") {
                conn_subs.add_var(name, replacement);
            }
        }
        Ok(conn_subs.apply_check_unreplaced(
            &archetype.connectivity_init.row_build_code,
            &mg.context_label("procedural connectivity"),
        )?)
    }
}
