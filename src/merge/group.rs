//! Generic merged-group machinery.
//!
//! A merged group is an ordered set of model entities whose structural
//! fingerprints match; member 0 is the archetype whose properties decide
//! the emitted code shape. Fields record everything that varies across
//! members — pointer bases, heterogeneous parameter values, sizes — as a
//! resolver from member index to a host-side initialiser expression.

use std::fmt;

/// One field of a merged group's device struct.
pub struct Field {
    /// Device-side declaration type, e.g. `"unsigned int*"` or `"scalar"`
    pub ty: String,
    /// Field name within the struct
    pub name: String,
    /// Pure function from member index to the host initialiser expression
    pub resolve: Box<dyn Fn(usize) -> String + Send + Sync>,
}

impl Field {
    /// The host initialiser expression for the given member.
    pub fn value(&self, member: usize) -> String {
        (self.resolve)(member)
    }
}

impl fmt::Debug for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Field").field("ty", &self.ty).field("name", &self.name).finish()
    }
}

/// Common state of every merged group: members plus the field table.
pub struct GroupMergedBase<'m, G> {
    /// Index of this merged group within its purpose
    pub index: usize,
    /// Members; index 0 is the archetype
    pub groups: Vec<&'m G>,
    /// Struct fields, in declaration order
    pub fields: Vec<Field>,
}

impl<'m, G> GroupMergedBase<'m, G> {
    pub fn new(index: usize, groups: Vec<&'m G>) -> Self {
        assert!(!groups.is_empty(), "merged group must have at least one member");
        Self { index, groups, fields: Vec::new() }
    }

    /// The member whose properties determine the emitted code structure.
    pub fn archetype(&self) -> &'m G {
        self.groups[0]
    }

    /// Number of members.
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Add a struct field with its per-member resolver.
    pub fn add_field(
        &mut self,
        ty: impl Into<String>,
        name: impl Into<String>,
        resolve: impl Fn(usize) -> String + Send + Sync + 'static,
    ) {
        self.fields.push(Field { ty: ty.into(), name: name.into(), resolve: Box::new(resolve) });
    }

    /// Add a pointer field resolving to the device copy of a per-member
    /// host array, e.g. `d_VExc` for member `Exc`.
    pub fn add_pointer_field(
        &mut self,
        ty: impl Into<String>,
        name: impl Into<String>,
        var_prefix: &str,
        host_name: impl Fn(usize) -> String + Send + Sync + 'static,
    ) {
        let prefix = var_prefix.to_string();
        self.add_field(ty, name, move |m| format!("{}{}", prefix, host_name(m)));
    }
}

impl<'m, G> fmt::Debug for GroupMergedBase<'m, G> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GroupMergedBase")
            .field("index", &self.index)
            .field("members", &self.groups.len())
            .field("fields", &self.fields)
            .finish()
    }
}

/// Whether parameter `idx` differs from the archetype's across any member.
pub fn is_value_heterogeneous<G>(
    groups: &[&G],
    idx: usize,
    get: impl Fn(&G) -> &[f64],
) -> bool {
    let archetype = get(groups[0]);
    groups.iter().any(|g| {
        let values = get(g);
        values.get(idx) != archetype.get(idx)
    })
}

/// Heterogeneity mask over a parameter list.
pub fn heterogeneous_mask<G>(
    groups: &[&G],
    count: usize,
    get: impl Fn(&G) -> &[f64] + Copy,
) -> Vec<bool> {
    (0..count).map(|i| is_value_heterogeneous(groups, i, get)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fake {
        name: &'static str,
        params: Vec<f64>,
    }

    #[test]
    fn test_archetype_is_first_member() {
        let a = Fake { name: "a", params: vec![1.0] };
        let b = Fake { name: "b", params: vec![1.0] };
        let merged = GroupMergedBase::new(0, vec![&a, &b]);
        assert_eq!(merged.archetype().name, "a");
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn test_field_resolution() {
        let a = Fake { name: "a", params: vec![] };
        let mut merged = GroupMergedBase::new(3, vec![&a]);
        let names = vec!["glbSpkCntA".to_string()];
        merged.add_pointer_field("unsigned int*", "spkCnt", "d_", move |m| names[m].clone());
        assert_eq!(merged.fields[0].value(0), "d_glbSpkCntA");
        assert_eq!(merged.fields[0].name, "spkCnt");
    }

    #[test]
    fn test_heterogeneous_mask() {
        let a = Fake { name: "a", params: vec![1.0, 2.0] };
        let b = Fake { name: "b", params: vec![1.0, 3.0] };
        let groups = vec![&a, &b];
        let mask = heterogeneous_mask(&groups, 2, |g: &Fake| g.params.as_slice());
        assert_eq!(mask, vec![false, true]);
    }
}
