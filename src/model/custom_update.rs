//! Custom update hooks run on demand against neuron or synapse state.

use crate::model::neuron::{ExtraGlobalParam, VarAccess, Variable};
use serde::{Deserialize, Serialize};

/// A custom update model: an update snippet, its own variables, and
/// references into the state it operates on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct CustomUpdateModel {
    pub name: String,
    #[serde(default)]
    pub param_names: Vec<String>,
    #[serde(default)]
    pub vars: Vec<Variable>,
    #[serde(default)]
    pub var_refs: Vec<VarRefDecl>,
    #[serde(default)]
    pub extra_global_params: Vec<ExtraGlobalParam>,
    #[serde(default)]
    pub update_code: String,
}

/// Declaration of a variable reference in a custom update model.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VarRefDecl {
    pub name: String,
    pub ty: String,
    #[serde(default)]
    pub access: VarAccess,
}

/// A bound variable reference: which target variable the declaration
/// resolves to, and optionally a transpose target for synapse-shaped
/// references.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VarRef {
    /// The referenced variable's name in the target group
    pub var: String,
    /// For custom WU updates: variable written with transposed indices
    #[serde(default)]
    pub transpose_var: Option<String>,
}

/// A custom update over a neuron-shaped variable set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomUpdate {
    pub name: String,
    /// Updates sharing a group name launch together from one entry point
    pub update_group: String,
    /// Neuron group whose variables the references resolve against
    pub target: String,
    pub model: CustomUpdateModel,
    #[serde(default)]
    pub param_values: Vec<f64>,
    /// Bindings parallel to `model.var_refs`
    #[serde(default)]
    pub var_references: Vec<VarRef>,
    /// Init snippets parallel to `model.vars`
    #[serde(default)]
    pub var_initialisers: Vec<String>,
    /// Whether the update runs per batch or once across batches
    #[serde(default)]
    pub batched: bool,
}

impl CustomUpdate {
    /// Whether any reference is a reduction target.
    pub fn has_reduction(&self) -> bool {
        self.model.var_refs.iter().any(|r| r.access == VarAccess::Reduce)
    }
}

/// A custom update over a synapse group's weight-update variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomWuUpdate {
    pub name: String,
    pub update_group: String,
    /// Synapse group whose variables the references resolve against
    pub synapse_group: String,
    pub model: CustomUpdateModel,
    #[serde(default)]
    pub param_values: Vec<f64>,
    /// Bindings parallel to `model.var_refs`
    #[serde(default)]
    pub var_references: Vec<VarRef>,
    #[serde(default)]
    pub var_initialisers: Vec<String>,
    #[serde(default)]
    pub batched: bool,
}

impl CustomWuUpdate {
    /// Whether any reference carries a transpose target.
    pub fn has_transpose(&self) -> bool {
        self.var_references.iter().any(|r| r.transpose_var.is_some())
    }
}
