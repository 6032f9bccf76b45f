//! Structural nodes: `Start`, `Conditional`, `While`, `Call`, `GoTo`.

use async_trait::async_trait;

use super::{ActivityNode, ActivityRun, Flow, ResolveScope, Sequence, boxed};
use crate::{
    element::Element,
    error::{ActivityError, ConfigError},
    expr::Expression,
    name::QualifiedName,
    registry::{BuildContext, NodeRegistry},
};

/// Entry marker; does nothing.
struct Start {
    name: QualifiedName,
}

#[async_trait]
impl ActivityNode for Start {
    fn type_name(&self) -> &QualifiedName {
        &self.name
    }

    async fn execute(&self, _run: &mut ActivityRun) -> Result<Flow, ActivityError> {
        Ok(Flow::Next)
    }
}

/// One candidate of a conditional. `condition` is `None` for `Otherwise`.
struct Branch {
    condition: Option<Expression>,
    body: Sequence,
}

/// First matching `Try` wins; `Otherwise` runs if reached.
struct Conditional {
    name: QualifiedName,
    branches: Vec<Branch>,
}

impl Conditional {
    fn from_element(element: &Element, ctx: &BuildContext<'_>) -> Result<Self, ConfigError> {
        let mut branches = Vec::with_capacity(element.children().len());
        for child in element.children() {
            if branches.last().is_some_and(|b: &Branch| b.condition.is_none()) {
                return Err(element.structure("<Otherwise> must be the last candidate"));
            }
            let condition = if child.name().is_core("Try") {
                Some(Expression::parse(child.required_attr("condition")?)?)
            } else if child.name().is_core("Otherwise") {
                None
            } else {
                return Err(element.structure(format!("unexpected child <{}>", child.local_name())));
            };
            branches.push(Branch { condition, body: ctx.parse_sequence(child.children())? });
        }
        if branches.is_empty() {
            return Err(element.structure("needs at least one <Try> or <Otherwise>"));
        }
        Ok(Self { name: element.name().clone(), branches })
    }
}

#[async_trait]
impl ActivityNode for Conditional {
    fn type_name(&self) -> &QualifiedName {
        &self.name
    }

    fn resolve(&self, scope: &ResolveScope<'_>) -> Result<(), ConfigError> {
        self.branches.iter().try_for_each(|b| b.body.resolve(scope.model(), Some(scope)))
    }

    async fn execute(&self, run: &mut ActivityRun) -> Result<Flow, ActivityError> {
        for branch in &self.branches {
            let taken = match &branch.condition {
                Some(condition) => run.eval_bool(condition)?,
                None => true,
            };
            if taken {
                return branch.body.execute(run).await;
            }
        }
        Ok(Flow::Next)
    }
}

/// Loop while the condition holds; zero iterations is fine.
struct While {
    name: QualifiedName,
    condition: Expression,
    body: Sequence,
}

#[async_trait]
impl ActivityNode for While {
    fn type_name(&self) -> &QualifiedName {
        &self.name
    }

    fn resolve(&self, scope: &ResolveScope<'_>) -> Result<(), ConfigError> {
        self.body.resolve(scope.model(), Some(scope))
    }

    async fn execute(&self, run: &mut ActivityRun) -> Result<Flow, ActivityError> {
        loop {
            if run.model().is_terminating() {
                return Err(ActivityError::Terminated);
            }
            if !run.eval_bool(&self.condition)? {
                return Ok(Flow::Next);
            }
            if let jump @ Flow::Jump(_) = self.body.execute(run).await? {
                return Ok(jump);
            }
            // A body without suspension points must not starve other runs.
            tokio::task::yield_now().await;
        }
    }
}

/// Run another activity to completion in the caller's scope.
struct Call {
    name: QualifiedName,
    activity: String,
}

#[async_trait]
impl ActivityNode for Call {
    fn type_name(&self) -> &QualifiedName {
        &self.name
    }

    fn resolve(&self, scope: &ResolveScope<'_>) -> Result<(), ConfigError> {
        scope.model().activities().require(&self.activity).map(|_| ())
    }

    async fn execute(&self, run: &mut ActivityRun) -> Result<Flow, ActivityError> {
        let callee = run.model().activities().require(&self.activity)?;
        callee.call(run).await?;
        Ok(Flow::Next)
    }
}

/// Unconditional jump.
struct GoTo {
    name: QualifiedName,
    target: String,
}

#[async_trait]
impl ActivityNode for GoTo {
    fn type_name(&self) -> &QualifiedName {
        &self.name
    }

    fn resolve(&self, scope: &ResolveScope<'_>) -> Result<(), ConfigError> {
        if scope.label_visible(&self.target) {
            Ok(())
        } else {
            Err(ConfigError::Unresolved { kind: "node label", name: self.target.clone() })
        }
    }

    async fn execute(&self, _run: &mut ActivityRun) -> Result<Flow, ActivityError> {
        Ok(Flow::Jump(self.target.clone()))
    }
}

pub(super) fn register(registry: &mut NodeRegistry) {
    registry.insert_activity_node(QualifiedName::core("Start"), |element, _| {
        Ok(boxed(Start { name: element.name().clone() }))
    });
    registry.insert_activity_node(QualifiedName::core("Conditional"), |element, ctx| {
        Ok(boxed(Conditional::from_element(element, ctx)?))
    });
    registry.insert_activity_node(QualifiedName::core("While"), |element, ctx| {
        Ok(boxed(While {
            name: element.name().clone(),
            condition: Expression::parse(element.required_attr("condition")?)?,
            body: ctx.parse_sequence(element.children())?,
        }))
    });
    registry.insert_activity_node(QualifiedName::core("Call"), |element, _| {
        Ok(boxed(Call {
            name: element.name().clone(),
            activity: element.required_attr("activity")?.to_string(),
        }))
    });
    registry.insert_activity_node(QualifiedName::core("GoTo"), |element, _| {
        Ok(boxed(GoTo { name: element.name().clone(), target: element.required_attr("target")?.to_string() }))
    });
}
