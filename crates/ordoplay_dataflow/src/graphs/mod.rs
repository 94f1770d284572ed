// SPDX-License-Identifier: MIT OR Apache-2.0
//! Built-in node type sets.

pub mod asset;
pub mod math;

use crate::error::RegistryError;
use crate::node::NodeRegistry;

/// Registry with every built-in node type
pub fn create_builtin_registry() -> Result<NodeRegistry, RegistryError> {
    let mut registry = math::create_math_registry()?;
    registry.extend(asset::create_asset_registry()?)?;
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_registry() {
        let registry = create_builtin_registry().unwrap();
        for id in ["constant", "scale", "sum", "divide", "ratio", "resource", "collection"] {
            assert!(registry.get(id).is_some(), "missing {id}");
        }
    }
}
