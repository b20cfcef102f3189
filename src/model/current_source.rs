//! Current sources injecting input into neuron populations.

use crate::model::neuron::{ExtraGlobalParam, Variable};
use serde::{Deserialize, Serialize};

/// A current source model: an injection snippet plus declarations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct CurrentSourceModel {
    pub name: String,
    #[serde(default)]
    pub param_names: Vec<String>,
    #[serde(default)]
    pub derived_param_names: Vec<String>,
    #[serde(default)]
    pub vars: Vec<Variable>,
    #[serde(default)]
    pub extra_global_params: Vec<ExtraGlobalParam>,
    /// Run per neuron per timestep; contributes through `$(injectCurrent, x)`
    #[serde(default)]
    pub injection_code: String,
}

/// A current source bound to one neuron population.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentSource {
    pub name: String,
    /// Name of the neuron group receiving the current
    pub target: String,
    pub model: CurrentSourceModel,
    #[serde(default)]
    pub param_values: Vec<f64>,
    #[serde(default)]
    pub derived_param_values: Vec<f64>,
    /// Init snippets parallel to `model.vars`
    #[serde(default)]
    pub var_initialisers: Vec<String>,
}
