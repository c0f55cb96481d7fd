use anyhow::Result;

use super::instance::Instance;
use super::variant::{Variant, VariantMap};

/// Embedded script that an object delegates its events to.
///
/// The object asks `has_function` once per event when it is built, so a
/// host must not gain or lose functions afterwards.
pub trait ScriptHost {
    fn name(&self) -> &str;

    fn has_function(&self, function: &str) -> bool;

    fn call(&self, function: &str, instance: &mut Instance, args: &VariantMap) -> Result<Variant>;
}
