//! Utility nodes: variables, timing, statistics, events and pool access.

use std::{collections::BTreeSet, time::Duration};

use async_trait::async_trait;
use tracing::{debug, info, trace, warn};

use super::{ActivityNode, ActivityRun, Flow, ResolveScope, boxed};
use crate::{
    element::Element,
    error::{ActivityError, ConfigError},
    expr::Expression,
    name::QualifiedName,
    registry::NodeRegistry,
    value::Value,
};

/// `<Set variable value>`
struct Set {
    name: QualifiedName,
    variable: String,
    value: Expression,
}

#[async_trait]
impl ActivityNode for Set {
    fn type_name(&self) -> &QualifiedName {
        &self.name
    }

    async fn execute(&self, run: &mut ActivityRun) -> Result<Flow, ActivityError> {
        let value = run.eval(&self.value)?;
        run.variables_mut().set(self.variable.clone(), value);
        Ok(Flow::Next)
    }
}

/// `<Delay durationMs>`: sleep on the environment clock.
struct Delay {
    name: QualifiedName,
    duration: Duration,
}

#[async_trait]
impl ActivityNode for Delay {
    fn type_name(&self) -> &QualifiedName {
        &self.name
    }

    async fn execute(&self, run: &mut ActivityRun) -> Result<Flow, ActivityError> {
        let model = run.model();
        if model.is_terminating() {
            return Err(ActivityError::Terminated);
        }
        tokio::select! {
            () = model.env().sleep(self.duration) => Ok(Flow::Next),
            () = model.terminated() => Err(ActivityError::Terminated),
        }
    }
}

/// `<Sample bucket value>`
struct Sample {
    name: QualifiedName,
    bucket: String,
    value: Expression,
}

#[async_trait]
impl ActivityNode for Sample {
    fn type_name(&self) -> &QualifiedName {
        &self.name
    }

    fn resolve(&self, scope: &ResolveScope<'_>) -> Result<(), ConfigError> {
        scope.model().buckets().require(&self.bucket).map(|_| ())
    }

    async fn execute(&self, run: &mut ActivityRun) -> Result<Flow, ActivityError> {
        let value = run.eval(&self.value)?.to_f64()?;
        run.model().sample(&self.bucket, value)?;
        Ok(Flow::Next)
    }
}

/// `<Increment counter by>`
struct Increment {
    name: QualifiedName,
    counter: String,
    by: u64,
}

#[async_trait]
impl ActivityNode for Increment {
    fn type_name(&self) -> &QualifiedName {
        &self.name
    }

    async fn execute(&self, run: &mut ActivityRun) -> Result<Flow, ActivityError> {
        let value = run.model().increment(&self.counter, self.by)?;
        trace!(counter = %self.counter, value, "counter incremented");
        Ok(Flow::Next)
    }
}

/// `<Raise event actor actorName><Arg name value/>...</Raise>`
struct Raise {
    name: QualifiedName,
    event: String,
    actor: Option<String>,
    actor_name: String,
    args: Vec<(String, Expression)>,
}

impl Raise {
    fn from_element(element: &Element) -> Result<Self, ConfigError> {
        let mut seen = BTreeSet::new();
        let mut args = Vec::new();
        for child in element.children() {
            if !child.name().is_core("Arg") {
                return Err(element.structure(format!("unexpected child <{}>", child.local_name())));
            }
            let name = child.required_attr("name")?.to_string();
            if !seen.insert(name.clone()) {
                return Err(ConfigError::Duplicate { kind: "event argument", name });
            }
            args.push((name, Expression::parse(child.required_attr("value")?)?));
        }
        Ok(Self {
            name: element.name().clone(),
            event: element.required_attr("event")?.to_string(),
            actor: element.attr("actor").map(str::to_string),
            actor_name: element.attr("actorName").unwrap_or("actor").to_string(),
            args,
        })
    }
}

#[async_trait]
impl ActivityNode for Raise {
    fn type_name(&self) -> &QualifiedName {
        &self.name
    }

    fn resolve(&self, scope: &ResolveScope<'_>) -> Result<(), ConfigError> {
        scope.model().events().register(&self.event);
        Ok(())
    }

    async fn execute(&self, run: &mut ActivityRun) -> Result<Flow, ActivityError> {
        let origin = match &self.actor {
            Some(variable) => match run.variables().require(variable)? {
                Value::Instance(handle) => Some((self.actor_name.as_str(), handle.clone())),
                other => {
                    return Err(ActivityError::Type(format!(
                        "`{variable}` holds {}, expected an instance",
                        other.type_name()
                    )));
                },
            },
            None => None,
        };
        let args = self
            .args
            .iter()
            .map(|(name, value)| run.eval(value).map(|v| (name.clone(), v)))
            .collect::<Result<Vec<_>, _>>()?;

        let outcome = run.model().trigger(&self.event, origin, args)?;
        debug!(event = %self.event, handlers = outcome.handlers, "raised");
        Ok(Flow::Next)
    }
}

/// `<Allocate actor variable exclusive position>`: check an instance out of
/// an actor's free pool and bind it. Without `position` a free instance is
/// picked with the environment's RNG.
struct Allocate {
    name: QualifiedName,
    actor: String,
    variable: String,
    exclusive: bool,
    position: Option<Expression>,
}

#[async_trait]
impl ActivityNode for Allocate {
    fn type_name(&self) -> &QualifiedName {
        &self.name
    }

    fn resolve(&self, scope: &ResolveScope<'_>) -> Result<(), ConfigError> {
        scope.model().actors().require(&self.actor).map(|_| ())
    }

    async fn execute(&self, run: &mut ActivityRun) -> Result<Flow, ActivityError> {
        let population = run.model().actors().require(&self.actor)?;
        let handle = match &self.position {
            Some(position) => {
                let position = match run.eval(position)? {
                    Value::Int(p) => usize::try_from(p)
                        .map_err(|_| ActivityError::Type(format!("negative pool position {p}")))?,
                    other => {
                        return Err(ActivityError::Type(format!(
                            "pool position must be an int, got {}",
                            other.type_name()
                        )));
                    },
                };
                population.get_free_individual(position, self.exclusive)?
            },
            None => population.checkout_random(run.model().env().as_ref(), self.exclusive)?,
        };
        debug!(actor = %self.actor, instance = handle.id(), exclusive = self.exclusive, "allocated");
        run.variables_mut().set(self.variable.clone(), Value::Instance(handle));
        Ok(Flow::Next)
    }
}

/// `<Release variable>`: return an exclusively allocated instance.
struct Release {
    name: QualifiedName,
    variable: String,
}

#[async_trait]
impl ActivityNode for Release {
    fn type_name(&self) -> &QualifiedName {
        &self.name
    }

    async fn execute(&self, run: &mut ActivityRun) -> Result<Flow, ActivityError> {
        let handle = match run.variables().require(&self.variable)? {
            Value::Instance(handle) => handle.clone(),
            other => {
                return Err(ActivityError::Type(format!(
                    "`{}` holds {}, expected an instance",
                    self.variable,
                    other.type_name()
                )));
            },
        };
        let population = run.model().actors().require(handle.actor())?;
        population.return_individual(&handle)?;
        run.variables_mut().set(self.variable.clone(), Value::Null);
        Ok(Flow::Next)
    }
}

#[derive(Debug, Clone, Copy)]
enum LogLevel {
    Debug,
    Info,
    Warn,
}

/// `<Log message level>`
struct Log {
    name: QualifiedName,
    message: Expression,
    level: LogLevel,
}

#[async_trait]
impl ActivityNode for Log {
    fn type_name(&self) -> &QualifiedName {
        &self.name
    }

    async fn execute(&self, run: &mut ActivityRun) -> Result<Flow, ActivityError> {
        let message = run.eval(&self.message)?;
        let activity = run.activity();
        match self.level {
            LogLevel::Debug => debug!(activity, "{message}"),
            LogLevel::Info => info!(activity, "{message}"),
            LogLevel::Warn => warn!(activity, "{message}"),
        }
        Ok(Flow::Next)
    }
}

pub(super) fn register(registry: &mut NodeRegistry) {
    registry.insert_activity_node(QualifiedName::core("Set"), |element, _| {
        Ok(boxed(Set {
            name: element.name().clone(),
            variable: element.required_attr("variable")?.to_string(),
            value: Expression::parse(element.required_attr("value")?)?,
        }))
    });
    registry.insert_activity_node(QualifiedName::core("Delay"), |element, _| {
        let duration = element
            .attr_duration_ms("durationMs")?
            .ok_or_else(|| ConfigError::MissingAttribute {
                element: element.local_name().to_string(),
                attribute: "durationMs".to_string(),
            })?;
        Ok(boxed(Delay { name: element.name().clone(), duration }))
    });
    registry.insert_activity_node(QualifiedName::core("Sample"), |element, _| {
        Ok(boxed(Sample {
            name: element.name().clone(),
            bucket: element.required_attr("bucket")?.to_string(),
            value: Expression::parse(element.required_attr("value")?)?,
        }))
    });
    registry.insert_activity_node(QualifiedName::core("Increment"), |element, _| {
        Ok(boxed(Increment {
            name: element.name().clone(),
            counter: element.required_attr("counter")?.to_string(),
            by: element.attr_or("by", 1)?,
        }))
    });
    registry.insert_activity_node(QualifiedName::core("Raise"), |element, _| {
        Ok(boxed(Raise::from_element(element)?))
    });
    registry.insert_activity_node(QualifiedName::core("Allocate"), |element, _| {
        Ok(boxed(Allocate {
            name: element.name().clone(),
            actor: element.required_attr("actor")?.to_string(),
            variable: element.required_attr("variable")?.to_string(),
            exclusive: element.attr_bool("exclusive", true)?,
            position: element.attr("position").map(Expression::parse).transpose()?,
        }))
    });
    registry.insert_activity_node(QualifiedName::core("Release"), |element, _| {
        Ok(boxed(Release {
            name: element.name().clone(),
            variable: element.required_attr("variable")?.to_string(),
        }))
    });
    registry.insert_activity_node(QualifiedName::core("Log"), |element, _| {
        let level = match element.attr("level").unwrap_or("info") {
            "debug" => LogLevel::Debug,
            "info" => LogLevel::Info,
            "warn" => LogLevel::Warn,
            other => return Err(element.invalid("level", other, "expected debug, info or warn")),
        };
        Ok(boxed(Log {
            name: element.name().clone(),
            message: Expression::parse(element.required_attr("message")?)?,
            level,
        }))
    });
}
