//! Expressions behind function-valued parameters.

use meval::{Context, ContextProvider, Expr};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;

/// A parsed rate-law expression.
///
/// Serialized as its source text and re-parsed on load.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Formula {
    source: String,
    expr: Expr,
}

struct Recorder<'a>(&'a RefCell<Vec<String>>);

impl ContextProvider for Recorder<'_> {
    fn get_var(&self, name: &str) -> Option<f64> {
        let mut names = self.0.borrow_mut();
        if !names.iter().any(|n| n == name) {
            names.push(name.to_string());
        }
        Some(1.0)
    }
}

impl Formula {
    pub fn parse(source: &str) -> Result<Self, meval::Error> {
        let expr: Expr = source.parse()?;
        Ok(Self {
            source: source.to_string(),
            expr,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Names of the free variables, in order of first use.
    ///
    /// Builtin constants such as `pi` are not reported.
    pub fn variables(&self) -> Vec<String> {
        let names = RefCell::new(Vec::new());
        let builtins = Context::new();
        // The value is irrelevant: every variable lookup is recorded. Builtin
        // functions must resolve or evaluation stops at the first call.
        let _ = self.expr.eval_with_context((Recorder(&names), &builtins));
        names
            .into_inner()
            .into_iter()
            .filter(|name| builtins.get_var(name).is_none())
            .collect()
    }

    /// Evaluate with `ctx` binding the free variables.
    pub fn eval<C: ContextProvider>(&self, ctx: C) -> Result<f64, meval::Error> {
        self.expr.eval_with_context((ctx, Context::new()))
    }
}

impl TryFrom<String> for Formula {
    type Error = meval::Error;

    fn try_from(source: String) -> Result<Self, Self::Error> {
        Self::parse(&source)
    }
}

impl From<Formula> for String {
    fn from(formula: Formula) -> Self {
        formula.source
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Vars(&'static [(&'static str, f64)]);

    impl ContextProvider for Vars {
        fn get_var(&self, name: &str) -> Option<f64> {
            self.0.iter().find(|(n, _)| *n == name).map(|&(_, v)| v)
        }
    }

    #[test]
    fn test_variables_skip_builtins() {
        let formula = Formula::parse("k1*exp(-Atot/K) + pi*k1").unwrap();
        assert_eq!(formula.variables(), vec!["k1", "Atot", "K"]);
    }

    #[test]
    fn test_variables_after_function_calls() {
        let formula = Formula::parse("exp(-k1)*Atot").unwrap();
        assert_eq!(formula.variables(), vec!["k1", "Atot"]);

        let formula = Formula::parse("sqrt(ln(K))+max(Atot, Btot)/k2").unwrap();
        assert_eq!(formula.variables(), vec!["K", "Atot", "Btot", "k2"]);
    }

    #[test]
    fn test_eval_with_bindings() {
        let formula = Formula::parse("k1*Atot/(K+Atot)").unwrap();
        let val = formula
            .eval(Vars(&[("k1", 2.0), ("Atot", 3.0), ("K", 1.0)]))
            .unwrap();
        assert!((val - 1.5).abs() < 1e-12);
        assert!(formula.eval(Vars(&[("k1", 2.0)])).is_err());
    }
}
