// SPDX-License-Identifier: MIT OR Apache-2.0
//! Numeric nodes.

use crate::error::{ProductionError, RegistryError};
use crate::evaluation::Arguments;
use crate::node::{NodeCategory, NodeRegistry, NodeType};
use crate::port::{InputDecl, OutputDecl, PropertyDecl};
use crate::value::{Value, ValueKind};

/// Create the math node registry
pub fn create_math_registry() -> Result<NodeRegistry, RegistryError> {
    let mut registry = NodeRegistry::new();

    registry.register(
        NodeType::new("constant", "Constant", NodeCategory::Math)
            .with_description("Constant number")
            .property(PropertyDecl::new("value", ValueKind::Float).with_default(0.0))
            .output(OutputDecl::new("out", ValueKind::Float, &["value"], constant)),
    )?;

    registry.register(
        NodeType::new("scale", "Scale", NodeCategory::Math)
            .with_description("Multiply the input by a factor")
            .property(PropertyDecl::new("factor", ValueKind::Float).with_default(2.0))
            .input(InputDecl::single("in", ValueKind::Float).required())
            .output(OutputDecl::new("out", ValueKind::Float, &["in", "factor"], scale)),
    )?;

    registry.register(
        NodeType::new("sum", "Sum", NodeCategory::Math)
            .with_description("Add every connected term")
            .input(InputDecl::many("terms", ValueKind::Float))
            .output(OutputDecl::new("total", ValueKind::Float, &["terms"], sum))
            .output(OutputDecl::new("count", ValueKind::Int, &["terms"], count).uncached()),
    )?;

    registry.register(
        NodeType::new("divide", "Divide", NodeCategory::Math)
            .with_description("Divide the numerator by the denominator")
            .input(InputDecl::single("numerator", ValueKind::Float).required())
            .input(InputDecl::single("denominator", ValueKind::Float).required())
            .output(OutputDecl::new(
                "quotient",
                ValueKind::Float,
                &["numerator", "denominator"],
                divide,
            )),
    )?;

    // Unset `fraction` is derived from the other two properties
    registry.register(
        NodeType::new("ratio", "Ratio", NodeCategory::Math)
            .with_description("Fraction expressed as a percentage")
            .property(PropertyDecl::new("numerator", ValueKind::Float).with_default(1.0))
            .property(PropertyDecl::new("denominator", ValueKind::Float).with_default(1.0))
            .property(
                PropertyDecl::new("fraction", ValueKind::Float)
                    .with_derived_default(&["numerator", "denominator"], divide),
            )
            .output(OutputDecl::new("percent", ValueKind::Float, &["fraction"], percent)),
    )?;

    Ok(registry)
}

fn constant(args: &Arguments) -> Result<Value, ProductionError> {
    Ok(Value::Float(args.float("value")?))
}

fn scale(args: &Arguments) -> Result<Value, ProductionError> {
    Ok(Value::Float(args.float("in")? * args.float("factor")?))
}

fn sum(args: &Arguments) -> Result<Value, ProductionError> {
    let mut total = 0.0;
    for term in args.list("terms")? {
        total += term
            .as_float()
            .ok_or_else(|| ProductionError::new(format!("cannot add {}", term.kind_name())))?;
    }
    Ok(Value::Float(total))
}

fn count(args: &Arguments) -> Result<Value, ProductionError> {
    let terms = args.list("terms")?.len();
    Ok(Value::Int(i64::try_from(terms).unwrap_or(i64::MAX)))
}

fn divide(args: &Arguments) -> Result<Value, ProductionError> {
    let denominator = args.float("denominator")?;
    if denominator == 0.0 {
        return Err(ProductionError::new("division by zero"));
    }
    Ok(Value::Float(args.float("numerator")? / denominator))
}

fn percent(args: &Arguments) -> Result<Value, ProductionError> {
    Ok(Value::Float(args.float("fraction")? * 100.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeId;

    fn args(values: &[(&str, Value)]) -> Arguments {
        let mut args = Arguments::new(NodeId::new());
        for (name, value) in values {
            args.insert(*name, value.clone());
        }
        args
    }

    #[test]
    fn test_math_registry() {
        let registry = create_math_registry().unwrap();
        assert_eq!(registry.types().count(), 5);
        assert!(registry.get("sum").unwrap().find_output("count").is_some_and(|o| !o.cacheable));
        assert!(registry.get("ratio").unwrap().find_output("_properties").is_some());
    }

    #[test]
    fn test_sum_widens_integers() {
        let terms = Value::List(vec![Value::Int(2), Value::Float(0.5)]);
        assert_eq!(sum(&args(&[("terms", terms)])).unwrap(), Value::Float(2.5));
        assert_eq!(sum(&args(&[("terms", Value::List(vec![]))])).unwrap(), Value::Float(0.0));
    }

    #[test]
    fn test_divide_by_zero() {
        let err = divide(&args(&[
            ("numerator", Value::Float(1.0)),
            ("denominator", Value::Float(0.0)),
        ]))
        .unwrap_err();
        assert_eq!(err, ProductionError::new("division by zero"));
    }

    #[test]
    fn test_scale_of_nil_fails() {
        let err = scale(&args(&[("in", Value::Nil), ("factor", Value::Float(2.0))])).unwrap_err();
        assert_eq!(err, ProductionError::new("argument 'in' expected number, got nil"));
    }
}
