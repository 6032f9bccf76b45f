//! Variable values and scopes.

use std::{any::Any, collections::BTreeMap, fmt, sync::Arc};

use crate::{actor::InstanceHandle, error::ActivityError};

/// Protocol client exposed by an actor instance. Opaque to the core;
/// protocol activity nodes downcast it.
pub type ActivityObject = Arc<dyn Any + Send + Sync>;

/// A variable value.
#[derive(Clone, Default)]
pub enum Value {
    /// Absent value.
    #[default]
    Null,
    /// Boolean.
    Bool(bool),
    /// Signed integer.
    Int(i64),
    /// Floating point.
    Float(f64),
    /// String.
    Str(String),
    /// A checked-out or bound actor instance.
    Instance(InstanceHandle),
    /// Opaque payload (raw protocol events and the like).
    Object(ActivityObject),
}

impl Value {
    /// Name of the variant, for error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Str(_) => "string",
            Self::Instance(_) => "instance",
            Self::Object(_) => "object",
        }
    }

    /// Truthiness used by conditions: null, false, zero and the empty string
    /// are false.
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Null => false,
            Self::Bool(b) => *b,
            Self::Int(i) => *i != 0,
            Self::Float(f) => *f != 0.0,
            Self::Str(s) => !s.is_empty(),
            Self::Instance(_) | Self::Object(_) => true,
        }
    }

    /// Numeric view.
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Numeric view, or a type error.
    pub fn to_f64(&self) -> Result<f64, ActivityError> {
        self.as_f64()
            .ok_or_else(|| ActivityError::Type(format!("expected number, got {}", self.type_name())))
    }

    /// String view.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Instance view.
    pub fn as_instance(&self) -> Option<&InstanceHandle> {
        match self {
            Self::Instance(h) => Some(h),
            _ => None,
        }
    }

    /// Downcast an `Object` payload.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        match self {
            Self::Object(obj) => obj.downcast_ref::<T>(),
            _ => None,
        }
    }

    /// Wrap an arbitrary payload.
    pub fn object<T: Any + Send + Sync>(payload: T) -> Self {
        Self::Object(Arc::new(payload))
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::Instance(a), Self::Instance(b)) => a == b,
            (Self::Object(a), Self::Object(b)) => Arc::ptr_eq(a, b),
            (a, b) => match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => x == y,
                _ => false,
            },
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("Null"),
            Self::Bool(b) => write!(f, "Bool({b})"),
            Self::Int(i) => write!(f, "Int({i})"),
            Self::Float(x) => write!(f, "Float({x})"),
            Self::Str(s) => write!(f, "Str({s:?})"),
            Self::Instance(h) => write!(f, "Instance({})", h.id()),
            Self::Object(_) => f.write_str("Object(..)"),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::Str(s) => f.write_str(s),
            Self::Instance(h) => f.write_str(h.id()),
            Self::Object(_) => f.write_str("<object>"),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

impl From<InstanceHandle> for Value {
    fn from(v: InstanceHandle) -> Self {
        Self::Instance(v)
    }
}

/// Stack of variable frames. Lookups search innermost first.
///
/// An activity run starts with one frame holding a copy of the model's global
/// variables. `Triggered` bodies push a frame with the event's arguments and
/// pop it on exit; `Call` shares the caller's stack. New variables assigned
/// with [`Variables::set`] land in the outermost frame.
#[derive(Debug, Clone)]
pub struct Variables {
    frames: Vec<BTreeMap<String, Value>>,
}

impl Variables {
    /// One empty frame.
    pub fn new() -> Self {
        Self { frames: vec![BTreeMap::new()] }
    }

    /// One frame with the given bindings.
    pub fn from_frame(frame: BTreeMap<String, Value>) -> Self {
        Self { frames: vec![frame] }
    }

    /// Look a variable up, innermost frame first.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.frames.iter().rev().find_map(|frame| frame.get(name))
    }

    /// Look a variable up or fail.
    pub fn require(&self, name: &str) -> Result<&Value, ActivityError> {
        self.get(name).ok_or_else(|| ActivityError::UnknownVariable(name.to_string()))
    }

    /// True if any frame binds `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Assign: overwrite the innermost existing binding, otherwise bind in the
    /// outermost frame so the variable outlives nested event frames.
    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        let name = name.into();
        if let Some(frame) = self.frames.iter_mut().rev().find(|f| f.contains_key(&name)) {
            frame.insert(name, value);
        } else if let Some(base) = self.frames.first_mut() {
            base.insert(name, value);
        }
    }

    /// Bind in the innermost frame, shadowing outer bindings.
    pub fn define(&mut self, name: impl Into<String>, value: Value) {
        if let Some(frame) = self.frames.last_mut() {
            frame.insert(name.into(), value);
        }
    }

    /// Push a frame.
    pub fn push_frame(&mut self, frame: BTreeMap<String, Value>) {
        self.frames.push(frame);
    }

    /// Pop the innermost frame. The outermost frame is never popped.
    pub fn pop_frame(&mut self) -> Option<BTreeMap<String, Value>> {
        if self.frames.len() > 1 { self.frames.pop() } else { None }
    }

    /// Number of frames.
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Flattened view, inner bindings shadowing outer ones.
    pub fn flatten(&self) -> BTreeMap<String, Value> {
        let mut out = BTreeMap::new();
        for frame in &self.frames {
            for (k, v) in frame {
                out.insert(k.clone(), v.clone());
            }
        }
        out
    }
}

impl Default for Variables {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inner_frame_shadows_outer() {
        let mut vars = Variables::new();
        vars.define("x", Value::Int(1));
        vars.push_frame(BTreeMap::from([("x".to_string(), Value::Int(2))]));
        assert_eq!(vars.get("x"), Some(&Value::Int(2)));

        vars.pop_frame();
        assert_eq!(vars.get("x"), Some(&Value::Int(1)));
    }

    #[test]
    fn set_updates_existing_outer_binding() {
        let mut vars = Variables::new();
        vars.define("count", Value::Int(0));
        vars.push_frame(BTreeMap::new());
        vars.set("count", Value::Int(5));
        vars.define("local", Value::Null);
        vars.set("fresh", Value::Bool(true));
        vars.pop_frame();

        assert_eq!(vars.get("count"), Some(&Value::Int(5)));
        assert!(vars.contains("fresh"));
        assert!(!vars.contains("local"));
    }

    #[test]
    fn outermost_frame_is_never_popped() {
        let mut vars = Variables::new();
        assert!(vars.pop_frame().is_none());
        assert_eq!(vars.depth(), 1);
    }

    #[test]
    fn numeric_equality_crosses_int_and_float() {
        assert_eq!(Value::Int(3), Value::Float(3.0));
        assert_ne!(Value::Int(3), Value::Str("3".into()));
    }

    #[test]
    fn truthiness() {
        assert!(!Value::Null.is_truthy());
        assert!(!Value::Str(String::new()).is_truthy());
        assert!(Value::Float(0.5).is_truthy());
    }

    #[test]
    fn objects_downcast() {
        let v = Value::object(42u32);
        assert_eq!(v.downcast_ref::<u32>(), Some(&42));
        assert!(v.downcast_ref::<String>().is_none());
    }
}
