//! Name-indexed table of variable getter/setter functions.
//!
//! Conditional and packet-parsing nodes refer to accessors by a stable
//! string name. The table is built explicitly at startup by whoever owns
//! the graph — no attribute scanning, no runtime type inspection — and
//! the listing methods exist so a graph-construction surface can offer
//! the available names.

use std::collections::HashMap;
use std::sync::Arc;

use squall_proto::Frame;
use tracing::debug;

use crate::context::{RuntimeContext, Value};
use crate::error::NodeError;

/// Getter: read a value out of the context.
pub type GetterFn = Arc<dyn Fn(&RuntimeContext) -> Option<Value> + Send + Sync>;

/// Setter: extract from the triggering payload into the context.
pub type SetterFn =
    Arc<dyn Fn(&RuntimeContext, Option<&Frame>) -> Result<(), NodeError> + Send + Sync>;

/// Listing entry describing one registered accessor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessorInfo {
    /// Stable registered name.
    pub name: String,
    /// Human-readable description for construction surfaces.
    pub description: String,
}

/// Registry of named getters and setters.
#[derive(Default)]
pub struct AccessorRegistry {
    getters: HashMap<String, (AccessorInfo, GetterFn)>,
    setters: HashMap<String, (AccessorInfo, SetterFn)>,
}

impl AccessorRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a getter under `name`, replacing any previous entry.
    pub fn register_getter(
        &mut self,
        name: impl Into<String>,
        description: impl Into<String>,
        getter: GetterFn,
    ) {
        let info = AccessorInfo { name: name.into(), description: description.into() };
        self.getters.insert(info.name.clone(), (info, getter));
    }

    /// Register a setter under `name`, replacing any previous entry.
    pub fn register_setter(
        &mut self,
        name: impl Into<String>,
        description: impl Into<String>,
        setter: SetterFn,
    ) {
        let info = AccessorInfo { name: name.into(), description: description.into() };
        self.setters.insert(info.name.clone(), (info, setter));
    }

    /// Invoke a getter by name.
    pub fn invoke_getter(
        &self,
        name: &str,
        ctx: &RuntimeContext,
    ) -> Result<Option<Value>, NodeError> {
        let (_, getter) =
            self.getters.get(name).ok_or_else(|| NodeError::UnknownAccessor(name.to_string()))?;
        Ok(getter(ctx))
    }

    /// Invoke a setter by name against the triggering payload.
    pub fn invoke_setter(
        &self,
        name: &str,
        ctx: &RuntimeContext,
        frame: Option<&Frame>,
    ) -> Result<(), NodeError> {
        let (_, setter) =
            self.setters.get(name).ok_or_else(|| NodeError::UnknownAccessor(name.to_string()))?;
        setter(ctx, frame)
    }

    /// All registered getters, for listing.
    #[must_use]
    pub fn getters(&self) -> Vec<AccessorInfo> {
        self.getters.values().map(|(info, _)| info.clone()).collect()
    }

    /// All registered setters, for listing.
    #[must_use]
    pub fn setters(&self) -> Vec<AccessorInfo> {
        self.setters.values().map(|(info, _)| info.clone()).collect()
    }

    /// Log the registry size, mirroring a startup summary line.
    pub fn log_summary(&self) {
        debug!(
            getters = self.getters.len(),
            setters = self.setters.len(),
            "accessor registry initialized"
        );
    }
}

impl std::fmt::Debug for AccessorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessorRegistry")
            .field("getters", &self.getters.len())
            .field("setters", &self.setters.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> AccessorRegistry {
        let mut registry = AccessorRegistry::new();
        registry.register_getter(
            "hp",
            "current hit points",
            Arc::new(|ctx| ctx.get("hp")),
        );
        registry.register_setter(
            "parse_hp",
            "read hp from the payload",
            Arc::new(|ctx, frame| {
                let Some(frame) = frame else {
                    return Err(NodeError::Handler("no packet to parse".into()));
                };
                let mut frame = frame.clone();
                let hp = frame
                    .read_u32()
                    .map_err(|e| NodeError::Handler(e.to_string()))?;
                ctx.set("hp", Value::Int(i64::from(hp)));
                Ok(())
            }),
        );
        registry
    }

    #[test]
    fn getter_round_trip() {
        let registry = registry();
        let ctx = RuntimeContext::default();
        ctx.set("hp", Value::Int(80));

        let value = registry.invoke_getter("hp", &ctx).unwrap();
        assert_eq!(value, Some(Value::Int(80)));
    }

    #[test]
    fn setter_extracts_from_payload() {
        let registry = registry();
        let ctx = RuntimeContext::default();

        let mut frame = Frame::new();
        frame.write_u32(123).unwrap();
        let frame = Frame::decode(&frame.encode()).unwrap();

        registry.invoke_setter("parse_hp", &ctx, Some(&frame)).unwrap();
        assert_eq!(ctx.get("hp"), Some(Value::Int(123)));
    }

    #[test]
    fn unknown_names_are_reported() {
        let registry = registry();
        let ctx = RuntimeContext::default();

        let err = registry.invoke_getter("missing", &ctx).unwrap_err();
        assert!(matches!(err, NodeError::UnknownAccessor(name) if name == "missing"));
        let err = registry.invoke_setter("missing", &ctx, None).unwrap_err();
        assert!(matches!(err, NodeError::UnknownAccessor(_)));
    }

    #[test]
    fn listing_exposes_registered_names() {
        let registry = registry();
        let getters = registry.getters();
        assert_eq!(getters.len(), 1);
        assert_eq!(getters[0].name, "hp");
        assert_eq!(registry.setters().len(), 1);
    }
}
