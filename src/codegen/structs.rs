//! Merged-struct emission: device struct definitions, host instance
//! arrays, and the push-to-device trampolines.

use crate::codegen::stream::CodeStream;
use crate::merge::{Field, MergedModel};

/// Visit every merged group with a device struct, in emission order.
pub fn visit_merged_groups(
    merged: &MergedModel,
    mut f: impl FnMut(&'static str, usize, &[Field], usize),
) {
    for g in &merged.neuron_update {
        f("NeuronUpdate", g.base.index, &g.base.fields, g.base.len());
    }
    for g in &merged.spike_queue_update {
        f("NeuronSpikeQueueUpdate", g.base.index, &g.base.fields, g.base.len());
    }
    for g in &merged.dendritic_delay_update {
        f("SynapseDendriticDelayUpdate", g.base.index, &g.base.fields, g.base.len());
    }
    for g in &merged.presynaptic_update {
        f("PresynapticUpdate", g.base.index, &g.base.fields, g.base.len());
    }
    for g in &merged.postsynaptic_update {
        f("PostsynapticUpdate", g.base.index, &g.base.fields, g.base.len());
    }
    for g in &merged.synapse_dynamics {
        f("SynapseDynamics", g.base.index, &g.base.fields, g.base.len());
    }
    for g in &merged.neuron_init {
        f("NeuronInit", g.base.index, &g.base.fields, g.base.len());
    }
    for g in &merged.dense_init {
        f("SynapseDenseInit", g.base.index, &g.base.fields, g.base.len());
    }
    for g in &merged.connectivity_init {
        f("SynapseConnectivityInit", g.base.index, &g.base.fields, g.base.len());
    }
    for g in &merged.sparse_init {
        f("SynapseSparseInit", g.base.index, &g.base.fields, g.base.len());
    }
    for g in &merged.custom_update {
        f("CustomUpdate", g.base.index, &g.base.fields, g.base.len());
    }
    for g in &merged.custom_wu_update {
        f("CustomWUUpdate", g.base.index, &g.base.fields, g.base.len());
    }
}

/// Emit the device-side struct definition, device array declaration and
/// push-trampoline declaration for one merged group.
pub fn gen_merged_struct(
    s: &mut CodeStream,
    name: &str,
    index: usize,
    fields: &[Field],
    count: usize,
) {
    s.decl_scope(&format!("struct Merged{}Group{}", name, index), |s| {
        for field in fields {
            s.line(&format!("{} {};", field.ty, field.name));
        }
    });
    s.line(&format!(
        "EXPORT_VAR __device__ struct Merged{}Group{} d_merged{}Group{}[{}];",
        name, index, name, index, count
    ));
    s.line(&format!(
        "EXPORT_FUNC void pushMerged{}Group{}ToDevice(const struct Merged{}Group{} *group);",
        name, index, name, index
    ));
    s.blank();
}

/// Emit the host instance array declaration; values are filled at
/// `allocateMem` time once device pointers exist.
pub fn gen_merged_host_decl(s: &mut CodeStream, name: &str, index: usize, count: usize) {
    s.line(&format!("struct Merged{}Group{} merged{}Group{}[{}];", name, index, name, index, count));
}

/// Fill the host instance array from the field resolvers.
pub fn gen_merged_host_fill(
    s: &mut CodeStream,
    name: &str,
    index: usize,
    fields: &[Field],
    count: usize,
) {
    for member in 0..count {
        let values: Vec<String> = fields.iter().map(|f| f.value(member)).collect();
        s.line(&format!(
            "merged{}Group{}[{}] = {{{}}};",
            name,
            index,
            member,
            values.join(", ")
        ));
    }
}

/// The `allocateMem` call pushing one merged group's host array to device.
pub fn gen_merged_push_call(s: &mut CodeStream, name: &str, index: usize) {
    s.line(&format!("pushMerged{}Group{}ToDevice(merged{}Group{});", name, index, name, index));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merge::Field;

    fn fields() -> Vec<Field> {
        vec![
            Field {
                ty: "unsigned int".to_string(),
                name: "numNeurons".to_string(),
                resolve: Box::new(|m| [100, 250][m].to_string()),
            },
            Field {
                ty: "float*".to_string(),
                name: "V".to_string(),
                resolve: Box::new(|m| format!("d_V{}", ["Exc", "Inh"][m])),
            },
        ]
    }

    #[test]
    fn test_struct_definition() {
        let mut s = CodeStream::new();
        gen_merged_struct(&mut s, "NeuronUpdate", 0, &fields(), 2);
        let out = s.finish();
        assert!(out.contains("struct MergedNeuronUpdateGroup0 {"));
        assert!(out.contains("unsigned int numNeurons;"));
        assert!(out.contains("float* V;"));
        assert!(out.contains("pushMergedNeuronUpdateGroup0ToDevice"));
        assert!(out.contains("d_mergedNeuronUpdateGroup0[2]"));
    }

    #[test]
    fn test_host_array_resolves_members() {
        let mut s = CodeStream::new();
        gen_merged_host_fill(&mut s, "NeuronUpdate", 0, &fields(), 2);
        let out = s.finish();
        assert!(out.contains("mergedNeuronUpdateGroup0[0] = {100, d_VExc};"));
        assert!(out.contains("mergedNeuronUpdateGroup0[1] = {250, d_VInh};"));
    }
}
