//! Data-mapper type bindings
//!
//! Both ends of an RPC call tag every value with a type name; a binding
//! proves the local process knows that name and can decode its shape. A
//! value naming an unbound type, or one whose document does not fit the
//! bound type, is an `UnmappableType` failure on whichever side notices
//! first. Bindings carry owner tokens so a module's types vanish with it.

use std::sync::Arc;

use armada_api::{model::OwnerToken, rpc::RpcValue};
use dashmap::DashMap;
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use tracing::debug;

use super::RpcError;

struct MapperBinding {
    owner: OwnerToken,
    validate: Arc<dyn Fn(&Value) -> Result<(), String> + Send + Sync>,
}

/// Type-name-keyed registry of value bindings
pub struct DataMapperRegistry {
    bindings: DashMap<String, MapperBinding>,
}

impl DataMapperRegistry {
    pub fn new() -> Self {
        Self {
            bindings: DashMap::new(),
        }
    }

    /// Bind `type_name` to the shape of `T` under `owner`. Re-binding a
    /// name replaces the previous binding.
    pub fn register_binding<T>(&self, owner: OwnerToken, type_name: impl Into<String>)
    where
        T: DeserializeOwned + 'static,
    {
        let type_name = type_name.into();
        debug!(type_name = %type_name, owner = %owner, "registered data mapper binding");
        let validate: Arc<dyn Fn(&Value) -> Result<(), String> + Send + Sync> =
            Arc::new(|value: &Value| {
                serde_json::from_value::<T>(value.clone())
                    .map(|_| ())
                    .map_err(|error| error.to_string())
            });
        self.bindings
            .insert(type_name, MapperBinding { owner, validate });
    }

    /// Bind the plain value types every node understands.
    pub fn register_standard_bindings(&self, owner: OwnerToken) {
        self.register_binding::<String>(owner, "string");
        self.register_binding::<bool>(owner, "bool");
        self.register_binding::<i64>(owner, "int");
        self.register_binding::<f64>(owner, "double");
        // Escape hatch for callers shipping free-form documents
        self.register_binding::<Value>(owner, "json");
    }

    /// Remove every binding registered under `owner`.
    pub fn unregister_bindings(&self, owner: OwnerToken) -> usize {
        let before = self.bindings.len();
        self.bindings.retain(|_, binding| binding.owner != owner);
        before - self.bindings.len()
    }

    pub fn binding_count(&self, owner: OwnerToken) -> usize {
        self.bindings
            .iter()
            .filter(|entry| entry.value().owner == owner)
            .count()
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.bindings.contains_key(type_name)
    }

    /// Check that `value` names a bound type and fits its shape.
    pub fn check(&self, type_name: &str, value: &Value) -> Result<(), RpcError> {
        let Some(binding) = self.bindings.get(type_name) else {
            return Err(RpcError::UnmappableType(format!(
                "type '{}' is not registered with the data mapper",
                type_name
            )));
        };
        (binding.validate)(value).map_err(|reason| {
            RpcError::UnmappableType(format!(
                "value does not fit registered type '{}': {}",
                type_name, reason
            ))
        })
    }

    /// Serialize `value` as a tagged RPC value, enforcing that the tag is
    /// a bound type on this side.
    pub fn encode<T: Serialize>(&self, type_name: &str, value: &T) -> Result<RpcValue, RpcError> {
        let encoded = serde_json::to_value(value).map_err(|error| {
            RpcError::UnmappableType(format!(
                "failed to serialize value of type '{}': {}",
                type_name, error
            ))
        })?;
        self.check(type_name, &encoded)?;
        Ok(RpcValue::new(type_name, encoded))
    }
}

impl Default for DataMapperRegistry {
    fn default() -> Self {
        Self::new()
    }
}
