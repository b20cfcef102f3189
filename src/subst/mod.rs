//! Stacked substitution environments for lowering user snippets.
//!
//! Snippet code refers to model state through `$(name)` forms; the code
//! generator binds each name to a backend expression string before the
//! snippet is spliced into a kernel. Two kinds of entry exist:
//!
//! - *variable*: `$(V)` → `l_V`
//! - *function*: `$(addToInSyn, x)` → a template in which `$(0)` expands to
//!   the supplied argument
//!
//! Environments stack: each emission scope pushes a child environment whose
//! lookups fall back to the parent, and the child is dropped when the scope
//! closes. After all known names are bound, any surviving `$( … )` form is a
//! fatal error carrying the lowering context.

use crate::utils::errors::SubstitutionError;
use std::collections::HashMap;

/// A function-like substitution: fixed arity plus a template containing
/// `$(0)` … `$(arity-1)` placeholders.
#[derive(Debug, Clone)]
struct FuncSubstitution {
    arity: usize,
    template: String,
}

/// A stacked name → expression map applied to snippet code.
#[derive(Debug, Default)]
pub struct Substitutions<'p> {
    parent: Option<&'p Substitutions<'p>>,
    vars: HashMap<String, String>,
    funcs: HashMap<String, FuncSubstitution>,
}

impl<'p> Substitutions<'p> {
    /// An empty root environment.
    pub fn new() -> Self {
        Self::default()
    }

    /// A child environment whose lookups fall back to `parent`.
    pub fn with_parent(parent: &'p Substitutions<'p>) -> Self {
        Self { parent: Some(parent), vars: HashMap::new(), funcs: HashMap::new() }
    }

    /// Bind `$(name)` to a replacement expression.
    ///
    /// Panics if `name` is already bound in this environment; shadowing an
    /// outer binding is fine, rebinding within one scope is a generator bug.
    pub fn add_var(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let previous = self.vars.insert(name.clone(), value.into());
        assert!(previous.is_none(), "duplicate variable substitution '{}'", name);
    }

    /// Bind `$(name)` to a replacement, replacing any binding in this
    /// environment.
    pub fn add_var_override(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(name.into(), value.into());
    }

    /// Bind `$(name, a0, …)` to a template with `$(0)` … placeholders.
    pub fn add_func(
        &mut self,
        name: impl Into<String>,
        arity: usize,
        template: impl Into<String>,
    ) {
        let name = name.into();
        let previous =
            self.funcs.insert(name.clone(), FuncSubstitution { arity, template: template.into() });
        assert!(previous.is_none(), "duplicate function substitution '{}'", name);
    }

    /// Whether `name` has a variable binding in this environment or any parent.
    pub fn has_var(&self, name: &str) -> bool {
        self.get_var(name).is_some()
    }

    /// Look up a variable binding, walking the chain innermost-out.
    pub fn get_var(&self, name: &str) -> Option<&str> {
        match self.vars.get(name) {
            Some(value) => Some(value),
            None => self.parent.and_then(|p| p.get_var(name)),
        }
    }

    /// The replacement bound to `name`; the binding must exist.
    pub fn var(&self, name: &str) -> &str {
        self.get_var(name)
            .unwrap_or_else(|| panic!("no substitution bound for '{}'", name))
    }

    /// Apply this environment's substitutions, then the parent's.
    ///
    /// Functions are applied before variables so that argument text spliced
    /// from a template is still visible to the variable pass. Unknown forms
    /// and arity mismatches are left in place for
    /// [`Substitutions::apply_check_unreplaced`] to report.
    pub fn apply(&self, code: &str) -> String {
        let mut code = self.apply_funcs(code);
        code = self.apply_vars(&code);
        match self.parent {
            Some(parent) => parent.apply(&code),
            None => code,
        }
    }

    /// Apply all substitutions and fail if any `$( … )` form remains,
    /// labelling the error with `context`.
    pub fn apply_check_unreplaced(
        &self,
        code: &str,
        context: &str,
    ) -> Result<String, SubstitutionError> {
        let code = self.apply(code);
        match find_form(&code, 0) {
            Some((start, end)) => Err(SubstitutionError {
                form: code[start..end].to_string(),
                context: context.to_string(),
            }),
            None => Ok(code),
        }
    }

    fn apply_vars(&self, code: &str) -> String {
        let mut code = code.to_string();
        for (name, value) in &self.vars {
            code = code.replace(&format!("$({})", name), value);
        }
        code
    }

    fn apply_funcs(&self, code: &str) -> String {
        let mut out = code.to_string();
        for (name, func) in &self.funcs {
            out = substitute_func_calls(&out, name, func);
        }
        out
    }
}

/// Replace every well-formed `$(name, …)` call of matching arity.
fn substitute_func_calls(code: &str, name: &str, func: &FuncSubstitution) -> String {
    let needle = format!("$({}", name);
    let mut out = String::with_capacity(code.len());
    let mut rest = code;

    while let Some(pos) = rest.find(&needle) {
        let after_name = pos + needle.len();
        // Require a call form: the name must be followed by a comma (or a
        // bare close paren for zero-arity functions like $(emit_spike))
        let call = rest[after_name..].trim_start().as_bytes().first().copied();
        let is_call = match call {
            Some(b',') => func.arity > 0,
            Some(b')') => func.arity == 0,
            _ => false,
        };
        if !is_call {
            out.push_str(&rest[..after_name]);
            rest = &rest[after_name..];
            continue;
        }

        match parse_call(&rest[pos..]) {
            Some((args, len)) if args.len() == func.arity => {
                out.push_str(&rest[..pos]);
                let mut expansion = func.template.clone();
                for (i, arg) in args.iter().enumerate() {
                    expansion = expansion.replace(&format!("$({})", i), arg.trim());
                }
                out.push_str(&expansion);
                rest = &rest[pos + len..];
            }
            _ => {
                // Arity mismatch or malformed call: leave for the
                // check-unreplaced pass
                out.push_str(&rest[..after_name]);
                rest = &rest[after_name..];
            }
        }
    }
    out.push_str(rest);
    out
}

/// Parse `$(name, a, b)` starting at the `$`; returns the argument list and
/// the byte length of the whole form. Parenthesis depth is honoured so
/// nested `$( … )` forms survive inside arguments.
fn parse_call(form: &str) -> Option<(Vec<String>, usize)> {
    let bytes = form.as_bytes();
    debug_assert!(form.starts_with("$("));

    let mut depth = 0usize;
    let mut args = Vec::new();
    let mut current_start = None;
    for (i, &b) in bytes.iter().enumerate().skip(1) {
        match b {
            b'(' => {
                depth += 1;
                if depth == 1 {
                    current_start = None;
                }
            }
            b')' => {
                depth -= 1;
                if depth == 0 {
                    if let Some(start) = current_start {
                        args.push(form[start..i].to_string());
                    }
                    return Some((args, i + 1));
                }
            }
            b',' if depth == 1 => {
                if let Some(start) = current_start {
                    args.push(form[start..i].to_string());
                }
                current_start = Some(i + 1);
            }
            _ => {
                // First comma at depth 1 starts the argument list; text
                // before it is the function name
            }
        }
    }
    None
}

/// Find the next `$( … )` form at or after `from`; returns its byte range.
fn find_form(code: &str, from: usize) -> Option<(usize, usize)> {
    let start = code[from..].find("$(")? + from;
    let bytes = code.as_bytes();
    let mut depth = 0usize;
    for (i, &b) in bytes.iter().enumerate().skip(start + 1) {
        match b {
            b'(' => depth += 1,
            b')' => {
                depth -= 1;
                if depth == 0 {
                    return Some((start, i + 1));
                }
            }
            _ => {}
        }
    }
    // Unterminated form: report to end of code
    Some((start, code.len()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_var_substitution() {
        let mut subs = Substitutions::new();
        subs.add_var("V", "l_V");
        subs.add_var("Vthresh", "group->Vthresh");
        assert_eq!(subs.apply("$(V) >= $(Vthresh)"), "l_V >= group->Vthresh");
    }

    #[test]
    fn test_parent_fallback_and_shadowing() {
        let mut outer = Substitutions::new();
        outer.add_var("id", "id");
        outer.add_var("t", "t");

        let mut inner = Substitutions::with_parent(&outer);
        inner.add_var("id", "n");

        assert_eq!(inner.apply("$(id) @ $(t)"), "n @ t");
        assert_eq!(inner.var("t"), "t");
        assert!(inner.has_var("id"));
    }

    #[test]
    fn test_func_substitution() {
        let mut subs = Substitutions::new();
        subs.add_func("addToInSyn", 1, "atomicAdd(&group->inSyn[ipost], $(0))");
        assert_eq!(
            subs.apply("$(addToInSyn, g * 2.0f);"),
            "atomicAdd(&group->inSyn[ipost], g * 2.0f);"
        );
    }

    #[test]
    fn test_func_with_nested_forms() {
        let mut subs = Substitutions::new();
        subs.add_func("addSynapse", 1, "ind[idx] = $(0);");
        subs.add_var("target", "j");
        assert_eq!(subs.apply("$(addSynapse, $(target) + 1)"), "ind[idx] = j + 1;");
    }

    #[test]
    fn test_multi_arg_func() {
        let mut subs = Substitutions::new();
        subs.add_func("addToInSynDelay", 2, "atomicAdd(&denDelay[($(1)) * stride], $(0))");
        assert_eq!(
            subs.apply("$(addToInSynDelay, w, d);"),
            "atomicAdd(&denDelay[(d) * stride], w);"
        );
    }

    #[test]
    fn test_zero_arity_func() {
        let mut subs = Substitutions::new();
        subs.add_func("emit_spike", 0, "shSpk[shSpkCount++] = id");
        assert_eq!(subs.apply("$(emit_spike);"), "shSpk[shSpkCount++] = id;");
    }

    #[test]
    fn test_arity_mismatch_left_unreplaced() {
        let mut subs = Substitutions::new();
        subs.add_func("addToInSyn", 1, "f($(0))");
        let out = subs.apply("$(addToInSyn, a, b)");
        assert!(out.contains("$(addToInSyn"));
        assert!(subs.apply_check_unreplaced("$(addToInSyn, a, b)", "test").is_err());
    }

    #[test]
    fn test_check_unreplaced() {
        let mut subs = Substitutions::new();
        subs.add_var("V", "l_V");

        let err = subs.apply_check_unreplaced("$(V) + $(unknown)", "custom update : merged7");
        let err = err.unwrap_err();
        assert_eq!(err.form, "$(unknown)");
        assert_eq!(err.context, "custom update : merged7");
    }

    #[test]
    fn test_idempotent_on_clean_code() {
        let subs = Substitutions::new();
        let code = "l_V += (Isyn - l_V) * DT;";
        assert_eq!(subs.apply(code), code);
        assert_eq!(subs.apply_check_unreplaced(code, "noop").unwrap(), code);
    }
}
