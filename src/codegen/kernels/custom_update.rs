//! Custom update kernels: user snippets run on demand against neuron- or
//! synapse-shaped state.

use crate::codegen::backend::{Kernel, SimtBackend};
use crate::codegen::kernels::gen_parallel_group;
use crate::codegen::stream::CodeStream;
use crate::merge::{CustomUpdateMerged, CustomWuUpdateMerged, MergedModel};
use crate::model::{NetworkModel, VarAccess};
use crate::subst::Substitutions;
use crate::utils::errors::GenResult;

/// Threads a synapse-shaped custom update contributes, using the same
/// conservative bound as the dynamics kernel.
pub fn num_custom_wu_update_threads(
    cw: &crate::model::CustomWuUpdate,
    model: &NetworkModel,
) -> u64 {
    match model.synapse_group(&cw.synapse_group) {
        Ok(sg) => {
            let src = model.src_of(sg).map(|n| n.num_neurons).unwrap_or(0) as u64;
            if sg.matrix.is_sparse() {
                src * sg.max_connections as u64
            } else {
                let trg = model.trg_of(sg).map(|n| n.num_neurons).unwrap_or(0) as u64;
                src * trg
            }
        }
        Err(_) => 0,
    }
}

/// Emit the custom update kernel body for one update group name.
pub fn gen_custom_update_kernel(
    s: &mut CodeStream,
    merged: &MergedModel,
    backend: &dyn SimtBackend,
    kernel_subs: &Substitutions,
    update_group: &str,
    id_start: &mut u64,
) -> GenResult<()> {
    let model = merged.model;

    for cg in merged
        .custom_update
        .iter()
        .filter(|cg| cg.base.archetype().update_group == update_group)
    {
        let padded: Vec<u64> = cg
            .base
            .groups
            .iter()
            .map(|g| {
                let size = model
                    .neuron_group(&g.target)
                    .map(|n| n.num_neurons)
                    .unwrap_or(0) as u64;
                backend.padded_size(size, Kernel::CustomUpdate)
            })
            .collect();

        gen_parallel_group(
            s,
            kernel_subs,
            "CustomUpdate",
            cg.base.index,
            &padded,
            id_start,
            backend,
            &mut |s, pop_subs| {
                let lid = pop_subs.var("id").to_string();
                let update_code = lower_custom_update(cg, model, pop_subs, &lid)?;
                s.comment("only do this for existing neurons");
                s.scope(&format!("if({} < group->size)", lid), |s| {
                    s.snippet(&update_code);
                });
                Ok(())
            },
        )?;
    }
    Ok(())
}

/// Emit the synapse-shaped custom update kernel body for one update group.
pub fn gen_custom_wu_update_kernel(
    s: &mut CodeStream,
    merged: &MergedModel,
    backend: &dyn SimtBackend,
    kernel_subs: &Substitutions,
    update_group: &str,
    id_start: &mut u64,
) -> GenResult<()> {
    let model = merged.model;

    for cg in merged
        .custom_wu_update
        .iter()
        .filter(|cg| cg.base.archetype().update_group == update_group)
    {
        let padded: Vec<u64> = cg
            .base
            .groups
            .iter()
            .map(|g| backend.padded_size(num_custom_wu_update_threads(g, model), Kernel::CustomUpdate))
            .collect();

        gen_parallel_group(
            s,
            kernel_subs,
            "CustomWUUpdate",
            cg.base.index,
            &padded,
            id_start,
            backend,
            &mut |s, pop_subs| {
                let sparse = cg.synapse.matrix.is_sparse();
                let lid = pop_subs.var("id").to_string();

                let guard = if sparse {
                    format!("if ({} < group->synRemap[0])", lid)
                } else {
                    format!("if ({} < (group->numSrcNeurons * group->numTrgNeurons))", lid)
                };
                let body = lower_custom_wu_update(cg, model, pop_subs, &lid, sparse)?;
                s.scope(&guard, |s| {
                    if sparse {
                        s.line(&format!("const unsigned int s = group->synRemap[1 + {}];", lid));
                    }
                    s.snippet(&body);
                });
                Ok(())
            },
        )?;
    }
    Ok(())
}

/// Lower one neuron-shaped custom update: locals in, snippet, write-back.
/// REDUCE targets are never declared, so a snippet that forgets to assign
/// them trips a compiler warning in the generated source.
fn lower_custom_update(
    cg: &CustomUpdateMerged,
    model: &NetworkModel,
    pop_subs: &Substitutions,
    lid: &str,
) -> GenResult<String> {
    let archetype = cg.base.archetype();
    let scalar = model.precision.name();
    let mut s = CodeStream::new();
    let mut subs = Substitutions::with_parent(pop_subs);
    subs.add_var("t", "t");

    for var in &archetype.model.vars {
        let ty = if var.ty == "scalar" { scalar } else { &var.ty };
        if var.access != VarAccess::Reduce {
            s.line(&format!("{} l{} = group->{}[{}];", ty, var.name, var.name, lid));
        }
        subs.add_var(var.name.clone(), format!("l{}", var.name));
    }
    for decl in &archetype.model.var_refs {
        let ty = if decl.ty == "scalar" { scalar } else { &decl.ty };
        if decl.access != VarAccess::Reduce {
            s.line(&format!("{} l{} = group->{}[{}];", ty, decl.name, decl.name, lid));
        }
        subs.add_var(decl.name.clone(), format!("l{}", decl.name));
    }
    for (i, name) in archetype.model.param_names.iter().enumerate() {
        subs.add_var(name.clone(), cg.param_ref(i));
    }
    for egp in &archetype.model.extra_global_params {
        subs.add_var(egp.name.clone(), format!("group->{}", egp.name));
    }

    let code = subs.apply_check_unreplaced(&archetype.model.update_code, &cg.context_label())?;
    s.snippet(&code);

    for var in &archetype.model.vars {
        if var.access != VarAccess::ReadOnly {
            s.line(&format!("group->{}[{}] = l{};", var.name, lid, var.name));
        }
    }
    for decl in &archetype.model.var_refs {
        if decl.access != VarAccess::ReadOnly {
            s.line(&format!("group->{}[{}] = l{};", decl.name, lid, decl.name));
        }
    }
    Ok(s.finish())
}

/// Lower one synapse-shaped custom update, including transpose write-back.
fn lower_custom_wu_update(
    cg: &CustomWuUpdateMerged,
    model: &NetworkModel,
    pop_subs: &Substitutions,
    lid: &str,
    sparse: bool,
) -> GenResult<String> {
    let archetype = cg.base.archetype();
    let scalar = model.precision.name();
    let mut s = CodeStream::new();
    let mut subs = Substitutions::with_parent(pop_subs);
    subs.add_var("t", "t");

    let syn = if sparse { "s".to_string() } else { lid.to_string() };
    if sparse {
        subs.add_var("id_pre", "(s / group->rowStride)");
        subs.add_var("id_post", "group->ind[s]");
        subs.add_var("id_syn", "s");
    } else {
        subs.add_var("id_pre", format!("({} / group->rowStride)", lid));
        subs.add_var("id_post", format!("({} % group->rowStride)", lid));
        subs.add_var("id_syn", lid);
    }

    for var in &archetype.model.vars {
        let ty = if var.ty == "scalar" { scalar } else { &var.ty };
        if var.access != VarAccess::Reduce {
            s.line(&format!("{} l{} = group->{}[{}];", ty, var.name, var.name, syn));
        }
        subs.add_var(var.name.clone(), format!("l{}", var.name));
    }
    for decl in &archetype.model.var_refs {
        let ty = if decl.ty == "scalar" { scalar } else { &decl.ty };
        if decl.access != VarAccess::Reduce {
            s.line(&format!("{} l{} = group->{}[{}];", ty, decl.name, decl.name, syn));
        }
        subs.add_var(decl.name.clone(), format!("l{}", decl.name));
    }
    for (i, name) in archetype.model.param_names.iter().enumerate() {
        subs.add_var(name.clone(), cg.param_ref(i));
    }

    let code = subs.apply_check_unreplaced(&archetype.model.update_code, &cg.context_label())?;
    s.snippet(&code);

    for var in &archetype.model.vars {
        if var.access != VarAccess::ReadOnly {
            s.line(&format!("group->{}[{}] = l{};", var.name, syn, var.name));
        }
    }
    for (r, decl) in archetype.model.var_refs.iter().enumerate() {
        if decl.access != VarAccess::ReadOnly {
            s.line(&format!("group->{}[{}] = l{};", decl.name, syn, decl.name));
        }
        if archetype.var_references[r].transpose_var.is_some() {
            s.comment("mirror into the transposed variable");
            s.line(&format!(
                "group->{}Transpose[({} * group->numSrcNeurons) + {}] = l{};",
                decl.name,
                subs.var("id_post"),
                subs.var("id_pre"),
                decl.name
            ));
        }
    }
    Ok(s.finish())
}
