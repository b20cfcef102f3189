//! Frontend: scanner and numeric type system for user snippets.
//!
//! User-authored model fragments (neuron sim code, weight update rules,
//! connectivity builders) are C-flavoured text. This module lexes them and
//! supplies the numeric type lattice used when lowering literals:
//!
//! ```text
//! $(V) += ($(Isyn) - $(V)) * DT / $(tau);
//! if ($(V) >= $(Vthresh)) { $(emit_spike); }
//! ```
//!
//! Scanning is driven by a [`types::TypeContext`] so that the model's
//! `scalar` precision decides the type of un-suffixed floating literals.

pub mod scanner;
pub mod token;
pub mod types;

// Re-exports
pub use scanner::{scan_source, scan_source_with, CollectingErrorHandler, ErrorHandler};
pub use token::{Token, TokenKind};
pub use types::{common_type, parse_numeric, promoted_type, NumericType, TypeContext};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_simple_snippet() {
        let context = TypeContext::for_model(NumericType::Float, NumericType::Double);
        let tokens = scan_source("V += (Isyn - V) * DT / tau;", &context).unwrap();
        assert!(tokens.iter().any(|t| t.kind == TokenKind::PlusEqual));
        assert!(tokens.last().unwrap().is_eof());
    }
}
