// Copyright 2025 Farcall contributors.
// This file is dual-licensed as Apache-2.0 or GPL-3.0.
// see LICENSE for license details.

//! Validation caps enforced by the dispatcher on incoming chains.

use crate::error::ErrorValue;
use crate::ops::{Op, OpChain};

/// Caps on what a single chain may ask the host to do.
#[derive(Debug, Clone, Copy)]
pub struct Limits {
    /// Maximum number of operations in one chain.
    pub max_depth: usize,
    /// Maximum number of arguments in one apply.
    pub max_args: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Limits {
            max_depth: 50,
            max_args: 100,
        }
    }
}

impl Limits {
    /// Validate a chain against the caps. A chain of exactly `max_depth`
    /// operations passes; one more fails.
    pub fn validate_chain(&self, chain: &OpChain) -> Result<(), ErrorValue> {
        if chain.len() > self.max_depth {
            return Err(ErrorValue::range_error(format!(
                "operation chain length {} exceeds the maximum depth of {}",
                chain.len(),
                self.max_depth
            )));
        }
        for op in &chain.ops {
            if let Op::Apply { args } = op {
                if args.len() > self.max_args {
                    return Err(ErrorValue::range_error(format!(
                        "apply with {} arguments exceeds the maximum of {}",
                        args.len(),
                        self.max_args
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    #[test]
    fn depth_is_an_inclusive_cap() {
        let limits = Limits::default();
        let at_cap = OpChain::from_ops(vec![Op::get("x"); 50]);
        assert!(limits.validate_chain(&at_cap).is_ok());
        let over = OpChain::from_ops(vec![Op::get("x"); 51]);
        let err = limits.validate_chain(&over).unwrap_err();
        assert_eq!(err.name, "RangeError");
    }

    #[test]
    fn arity_is_an_inclusive_cap() {
        let limits = Limits::default();
        let at_cap = OpChain::from_ops(vec![Op::apply(vec![Value::Null; 100])]);
        assert!(limits.validate_chain(&at_cap).is_ok());
        let over = OpChain::from_ops(vec![Op::apply(vec![Value::Null; 101])]);
        assert!(limits.validate_chain(&over).is_err());
    }
}
