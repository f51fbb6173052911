//! Per-invocation runtime context for one triggered chain.
//!
//! Each trigger match gets a fresh context. The same context instance is
//! shared by reference across the whole chain spawned from that match —
//! including detached continuations — and never across chains; it is
//! dropped when the chain and its continuations finish.

use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use squall_proto::Frame;

/// A typed value stored in the context variable map.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Signed integer.
    Int(i64),
    /// Floating point.
    Float(f64),
    /// Boolean flag.
    Bool(bool),
    /// UTF-8 string.
    Str(String),
    /// Raw bytes.
    Bytes(Vec<u8>),
}

impl Value {
    /// Integer value, if this is an `Int`.
    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Boolean value, if this is a `Bool`.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// String slice, if this is a `Str`.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(v) => Some(v),
            _ => None,
        }
    }

    /// Float value, if this is a `Float`.
    #[must_use]
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Str(v) => f.write_str(v),
            Self::Bytes(v) => write!(f, "{} bytes", v.len()),
        }
    }
}

/// Summary of recorded metric samples.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricSummary {
    /// Number of samples.
    pub count: usize,
    /// Smallest sample.
    pub min: f64,
    /// Largest sample.
    pub max: f64,
    /// Arithmetic mean.
    pub average: f64,
}

/// Scratch store passed through a node-execution chain.
///
/// All mutation goes through short critical sections on internal mutexes;
/// detached continuations and the triggering chain may touch the same
/// context concurrently.
#[derive(Debug)]
pub struct RuntimeContext {
    packet: Mutex<Option<Frame>>,
    vars: Mutex<HashMap<String, Value>>,
    timers: Mutex<HashMap<String, Instant>>,
    metrics: Mutex<HashMap<String, Vec<f64>>>,
}

impl RuntimeContext {
    /// Create a context for one trigger invocation.
    #[must_use]
    pub fn new(packet: Option<Frame>) -> Self {
        Self {
            packet: Mutex::new(packet),
            vars: Mutex::new(HashMap::new()),
            timers: Mutex::new(HashMap::new()),
            metrics: Mutex::new(HashMap::new()),
        }
    }

    /// The packet that triggered this chain, if any.
    #[must_use]
    pub fn packet(&self) -> Option<Frame> {
        self.lock_packet().clone()
    }

    /// Replace the triggering packet.
    pub fn set_packet(&self, packet: Option<Frame>) {
        *self.lock_packet() = packet;
    }

    /// Store a typed value.
    pub fn set(&self, key: impl Into<String>, value: Value) {
        self.lock_vars().insert(key.into(), value);
    }

    /// Fetch a value by key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Value> {
        self.lock_vars().get(key).cloned()
    }

    /// Whether a key is present.
    #[must_use]
    pub fn has(&self, key: &str) -> bool {
        self.lock_vars().contains_key(key)
    }

    /// Integer value or a default when absent or mistyped.
    #[must_use]
    pub fn int_or(&self, key: &str, default: i64) -> i64 {
        self.get(key).and_then(|v| v.as_int()).unwrap_or(default)
    }

    /// Set a boolean flag.
    pub fn set_flag(&self, name: &str) {
        self.set(name, Value::Bool(true));
    }

    /// Clear a boolean flag.
    pub fn clear_flag(&self, name: &str) {
        self.set(name, Value::Bool(false));
    }

    /// Whether a flag is set.
    #[must_use]
    pub fn is_flag_set(&self, name: &str) -> bool {
        self.get(name).and_then(|v| v.as_bool()).unwrap_or(false)
    }

    /// Add `delta` to an integer counter, returning the new value.
    /// Missing or mistyped counters start from zero.
    pub fn increment(&self, key: &str, delta: i64) -> i64 {
        let mut vars = self.lock_vars();
        let current = vars.get(key).and_then(Value::as_int).unwrap_or(0);
        let updated = current + delta;
        vars.insert(key.to_string(), Value::Int(updated));
        updated
    }

    /// Counter value, zero when absent.
    #[must_use]
    pub fn counter(&self, key: &str) -> i64 {
        self.int_or(key, 0)
    }

    /// Start (or restart) a named stopwatch.
    pub fn start_timer(&self, name: &str) {
        self.lock_timers().insert(name.to_string(), Instant::now());
    }

    /// Elapsed time on a named stopwatch.
    #[must_use]
    pub fn elapsed(&self, name: &str) -> Option<Duration> {
        self.lock_timers().get(name).map(Instant::elapsed)
    }

    /// Record one metric sample.
    pub fn record_metric(&self, name: &str, value: f64) {
        self.lock_metrics().entry(name.to_string()).or_default().push(value);
    }

    /// Summary of all samples recorded under `name`.
    #[must_use]
    pub fn metric_summary(&self, name: &str) -> Option<MetricSummary> {
        let metrics = self.lock_metrics();
        let samples = metrics.get(name)?;
        if samples.is_empty() {
            return None;
        }
        let min = samples.iter().copied().fold(f64::INFINITY, f64::min);
        let max = samples.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let average = samples.iter().sum::<f64>() / samples.len() as f64;
        Some(MetricSummary { count: samples.len(), min, max, average })
    }

    fn lock_packet(&self) -> std::sync::MutexGuard<'_, Option<Frame>> {
        match self.packet.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn lock_vars(&self) -> std::sync::MutexGuard<'_, HashMap<String, Value>> {
        match self.vars.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn lock_timers(&self) -> std::sync::MutexGuard<'_, HashMap<String, Instant>> {
        match self.timers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn lock_metrics(&self) -> std::sync::MutexGuard<'_, HashMap<String, Vec<f64>>> {
        match self.metrics.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Default for RuntimeContext {
    fn default() -> Self {
        Self::new(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_values_round_trip() {
        let ctx = RuntimeContext::default();
        ctx.set("hp", Value::Int(100));
        ctx.set("name", Value::Str("bot-3".into()));

        assert_eq!(ctx.get("hp"), Some(Value::Int(100)));
        assert_eq!(ctx.get("name").and_then(|v| v.as_str().map(String::from)), Some("bot-3".into()));
        assert!(ctx.has("hp"));
        assert!(!ctx.has("mp"));
        assert_eq!(ctx.int_or("mp", 50), 50);
    }

    #[test]
    fn flags_and_counters() {
        let ctx = RuntimeContext::default();
        assert!(!ctx.is_flag_set("ready"));
        ctx.set_flag("ready");
        assert!(ctx.is_flag_set("ready"));
        ctx.clear_flag("ready");
        assert!(!ctx.is_flag_set("ready"));

        assert_eq!(ctx.increment("sent", 1), 1);
        assert_eq!(ctx.increment("sent", 2), 3);
        assert_eq!(ctx.counter("sent"), 3);
        assert_eq!(ctx.counter("missing"), 0);
    }

    #[test]
    fn metric_summary_aggregates() {
        let ctx = RuntimeContext::default();
        assert_eq!(ctx.metric_summary("rtt"), None);

        ctx.record_metric("rtt", 10.0);
        ctx.record_metric("rtt", 30.0);
        ctx.record_metric("rtt", 20.0);

        let summary = ctx.metric_summary("rtt").unwrap();
        assert_eq!(summary.count, 3);
        assert!((summary.min - 10.0).abs() < f64::EPSILON);
        assert!((summary.max - 30.0).abs() < f64::EPSILON);
        assert!((summary.average - 20.0).abs() < f64::EPSILON);
    }

    #[test]
    fn timers_measure_elapsed() {
        let ctx = RuntimeContext::default();
        assert_eq!(ctx.elapsed("t"), None);
        ctx.start_timer("t");
        assert!(ctx.elapsed("t").is_some());
    }
}
