//! Declaration nodes: the root `<Model>`, containers, variables, events and
//! buckets.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use tracing::debug;
use tumult_stats::{Bucket, FilterMode, OutlierFilter};

use crate::{
    element::Element,
    error::{ConfigError, CoreError},
    expr::Expression,
    name::QualifiedName,
    node::{NodeContext, SimulationNode},
    registry::NodeRegistry,
};

/// `<Model>`, `<Actors>`, `<Activities>`, `<Events>`, `<Buckets>`,
/// `<Variables>`: structure only.
struct Container {
    name: QualifiedName,
}

#[async_trait]
impl SimulationNode for Container {
    fn type_name(&self) -> &QualifiedName {
        &self.name
    }
}

/// `<Variable name value>`: bound into the globals at `initialize`. The value
/// may refer to variables declared before it.
struct VariableDecl {
    name: QualifiedName,
    variable: String,
    value: Expression,
}

#[async_trait]
impl SimulationNode for VariableDecl {
    fn type_name(&self) -> &QualifiedName {
        &self.name
    }

    async fn initialize(&self, ctx: &NodeContext<'_>) -> Result<(), CoreError> {
        let value = self.value.eval(&ctx.model.fresh_scope())?;
        debug!(variable = %self.variable, %value, "global bound");
        ctx.model.set_global(&self.variable, value)?;
        Ok(())
    }
}

/// `<Event name>`
struct EventDecl {
    name: QualifiedName,
    event: String,
}

#[async_trait]
impl SimulationNode for EventDecl {
    fn type_name(&self) -> &QualifiedName {
        &self.name
    }

    async fn initialize(&self, ctx: &NodeContext<'_>) -> Result<(), CoreError> {
        ctx.model.ensure_alive()?;
        if ctx.model.events().get(&self.event).is_some() {
            return Err(ConfigError::Duplicate { kind: "event", name: self.event.clone() }.into());
        }
        ctx.model.events().register(&self.event);
        Ok(())
    }
}

/// `<Bucket id bucketTimeMs>` with an optional
/// `<OutlierRemoval windowSize threshold mode>` child.
struct BucketDecl {
    name: QualifiedName,
    id: String,
    bucket_time: Option<Duration>,
    filter: Option<OutlierFilter>,
}

impl BucketDecl {
    fn from_element(element: &Element) -> Result<Self, ConfigError> {
        let mut filter = None;
        for child in element.children() {
            if !child.name().is_core("OutlierRemoval") || filter.is_some() {
                return Err(element.structure(format!("unexpected child <{}>", child.local_name())));
            }
            let mode = match child.attr("mode").unwrap_or("discard") {
                "discard" => FilterMode::Discard,
                "smooth" => FilterMode::Smooth,
                other => return Err(child.invalid("mode", other, "expected discard or smooth")),
            };
            filter = Some(OutlierFilter::new(
                child.required_parse("windowSize")?,
                child.required_parse("threshold")?,
                mode,
            )?);
        }

        let bucket_time = element.attr_duration_ms("bucketTimeMs")?;
        if bucket_time.is_some_and(|t| t.is_zero()) {
            return Err(element.invalid("bucketTimeMs", "0", "must be positive"));
        }
        Ok(Self {
            name: element.name().clone(),
            id: element.required_attr("id")?.to_string(),
            bucket_time,
            filter,
        })
    }
}

#[async_trait]
impl SimulationNode for BucketDecl {
    fn type_name(&self) -> &QualifiedName {
        &self.name
    }

    fn owns_subtree(&self) -> bool {
        true
    }

    async fn initialize(&self, ctx: &NodeContext<'_>) -> Result<(), CoreError> {
        let bucket_time = self.bucket_time.unwrap_or(ctx.model.config().bucket_time);
        let mut bucket = Bucket::new(self.id.clone(), bucket_time).map_err(ConfigError::from)?;
        if let Some(filter) = &self.filter {
            bucket = bucket.with_outlier_filter(filter.clone());
        }
        ctx.model.register_bucket(Arc::new(bucket))
    }

    async fn finalize(&self, ctx: &NodeContext<'_>) -> Result<(), CoreError> {
        if let Some(bucket) = ctx.model.buckets().get(&self.id) {
            bucket.flush();
            debug!(bucket = %self.id, samples = bucket.sample_count(), "bucket flushed");
        }
        Ok(())
    }
}

pub(crate) fn register(registry: &mut NodeRegistry) {
    for local in ["Model", "Actors", "Activities", "Events", "Buckets", "Variables"] {
        registry.insert_node(QualifiedName::core(local), |element, _| {
            Ok(Arc::new(Container { name: element.name().clone() }) as Arc<dyn SimulationNode>)
        });
    }
    registry.insert_node(QualifiedName::core("Variable"), |element, _| {
        Ok(Arc::new(VariableDecl {
            name: element.name().clone(),
            variable: element.required_attr("name")?.to_string(),
            value: Expression::parse(element.required_attr("value")?)?,
        }) as Arc<dyn SimulationNode>)
    });
    registry.insert_node(QualifiedName::core("Event"), |element, _| {
        Ok(Arc::new(EventDecl {
            name: element.name().clone(),
            event: element.required_attr("name")?.to_string(),
        }) as Arc<dyn SimulationNode>)
    });
    registry.insert_node(QualifiedName::core("Bucket"), |element, _| {
        Ok(Arc::new(BucketDecl::from_element(element)?) as Arc<dyn SimulationNode>)
    });
}
