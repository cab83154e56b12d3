//! Generated pipeline steps and the post-processing applied to them.

use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;
use serde_yaml::{Mapping, Value};

/// One entry of the generated pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// Plain barrier, serialized as the bare string `wait`.
    Wait,
    /// Barrier that still lets later steps run after an upstream failure.
    WaitContinueOnFailure,
    /// Manual approval gate.
    Block(Mapping),
    /// Command or trigger step.
    Command(Mapping),
}

impl Step {
    /// Wait marker for the stair following one with `continue_on_failure`.
    pub fn wait(continue_on_failure: bool) -> Self {
        if continue_on_failure {
            Step::WaitContinueOnFailure
        } else {
            Step::Wait
        }
    }

    pub fn is_wait(&self) -> bool {
        matches!(self, Step::Wait | Step::WaitContinueOnFailure)
    }

    pub fn as_command(&self) -> Option<&Mapping> {
        match self {
            Step::Command(step) => Some(step),
            _ => None,
        }
    }

    pub fn label(&self) -> Option<&str> {
        self.as_command()?.get("label")?.as_str()
    }

    /// Env of a command step, wherever it lives (`env` or `build.env`).
    pub fn env(&self) -> Option<&Mapping> {
        let step = self.as_command()?;
        match step.get("env") {
            Some(env) => env.as_mapping(),
            None => step.get("build")?.get("env")?.as_mapping(),
        }
    }

    /// Env value `name` as a string, if present.
    pub fn env_var(&self, name: &str) -> Option<&str> {
        self.env()?.get(name)?.as_str()
    }
}

impl Serialize for Step {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Step::Wait => serializer.serialize_str("wait"),
            Step::WaitContinueOnFailure => {
                let mut map = serializer.serialize_map(Some(2))?;
                map.serialize_entry("wait", &())?;
                map.serialize_entry("continue_on_failure", &true)?;
                map.end()
            }
            Step::Block(step) | Step::Command(step) => step.serialize(serializer),
        }
    }
}

/// Mapping key for a string.
pub(crate) fn key(name: &str) -> Value {
    Value::String(name.to_string())
}

/// Recursively merge `overrides` into `base`.
///
/// A non-empty mapping merges into an existing mapping; any other value,
/// including an empty mapping, replaces what was there.
pub fn merge_overrides(base: &mut Mapping, overrides: &Mapping) {
    for (name, value) in overrides {
        if let Value::Mapping(nested) = value {
            if !nested.is_empty() {
                if let Some(Value::Mapping(existing)) = base.get_mut(name) {
                    merge_overrides(existing, nested);
                    continue;
                }
            }
        }
        base.insert(name.clone(), value.clone());
    }
}

/// Move `env` under `build.env` for steps that trigger another pipeline.
///
/// Trigger steps take their environment from the `build` attributes of the
/// triggered build. Non-trigger steps are left alone.
pub fn rewrite_trigger_env(step: &mut Mapping) {
    if !step.contains_key("trigger") {
        return;
    }
    let Some(env) = step.remove("env") else {
        return;
    };

    let mut wrapped = Mapping::new();
    let mut build = Mapping::new();
    build.insert(key("env"), env);
    wrapped.insert(key("build"), Value::Mapping(build));

    if !matches!(step.get("build"), Some(Value::Mapping(_))) {
        step.insert(key("build"), Value::Mapping(Mapping::new()));
    }
    merge_overrides(step, &wrapped);
}
