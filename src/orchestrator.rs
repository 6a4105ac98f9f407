//! Named tasks with explicitly ordered dependencies.
//!
//! The orchestrator is deliberately not a dependency solver: running a task
//! runs its dependencies in exactly the order they were declared, each one
//! fully completing before the next starts, and then the task itself. Stages
//! share the output tree, so the declared order is what makes a build correct.

use std::borrow::Cow;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Instant;

use tracing::Level;
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::config::BuildConfig;
use crate::error::BuildError;
use crate::io::{as_overhead, task_style};

/// Result of a single task action.
pub type TaskResult = anyhow::Result<()>;

type Action = Arc<dyn Fn(&Context<'_>) -> TaskResult + Send + Sync>;

/// Live-reload side effect signalled after a task completes successfully.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reload {
    /// Full page reload.
    Page,
    /// Swap stylesheets in place without reloading.
    Styles,
}

/// Receiver of task side effects, usually the live-reload channel.
pub trait Notifier: Send + Sync {
    fn reload(&self, kind: Reload);
    fn error(&self, message: &str);
}

/// A named unit of build work.
pub struct Task {
    name: Cow<'static, str>,
    depends_on: Vec<Cow<'static, str>>,
    reload: Option<Reload>,
    action: Action,
}

impl Task {
    pub fn new<F>(name: impl Into<Cow<'static, str>>, action: F) -> Self
    where
        F: Fn(&Context<'_>) -> TaskResult + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            depends_on: Vec::new(),
            reload: None,
            action: Arc::new(action),
        }
    }

    /// A task without an action of its own, which only runs its dependencies.
    pub fn sequence<I, S>(name: impl Into<Cow<'static, str>>, depends_on: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Cow<'static, str>>,
    {
        Self::new(name, |_| Ok(())).depends_on(depends_on)
    }

    pub fn depends_on<I, S>(mut self, depends_on: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Cow<'static, str>>,
    {
        self.depends_on = depends_on.into_iter().map(Into::into).collect();
        self
    }

    pub fn reload(mut self, kind: Reload) -> Self {
        self.reload = Some(kind);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dependencies(&self) -> impl Iterator<Item = &str> {
        self.depends_on.iter().map(AsRef::as_ref)
    }
}

impl Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.name)
            .field("depends_on", &self.depends_on)
            .field("reload", &self.reload)
            .finish_non_exhaustive()
    }
}

/// The context passed to every task action.
pub struct Context<'a> {
    /// Immutable build configuration.
    pub config: &'a BuildConfig,
    orchestrator: &'a Orchestrator,
}

impl Context<'_> {
    /// Runs another registered task, including its dependencies.
    pub fn run(&self, name: &str) -> Result<(), BuildError> {
        self.orchestrator.run(name)
    }

    /// Surfaces an error to the developer without failing the caller.
    pub fn report(&self, error: &BuildError) {
        self.orchestrator.report(error);
    }
}

/// Registry of tasks and the routine that runs them.
pub struct Orchestrator {
    config: Arc<BuildConfig>,
    tasks: Vec<Task>,
    default: Option<Cow<'static, str>>,
    notifier: Option<Arc<dyn Notifier>>,
}

impl Orchestrator {
    pub fn new(config: Arc<BuildConfig>) -> Self {
        Self {
            config,
            tasks: Vec::new(),
            default: None,
            notifier: None,
        }
    }

    pub fn config(&self) -> &BuildConfig {
        &self.config
    }

    /// Attaches the receiver of reload signals and error notifications.
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Adds a task to the registry.
    pub fn register(&mut self, task: Task) -> Result<(), BuildError> {
        if self.get(task.name()).is_some() {
            return Err(BuildError::DuplicateTask(task.name().to_string()));
        }

        self.tasks.push(task);
        Ok(())
    }

    /// Designates the task started by [`Orchestrator::run_default`].
    pub fn set_default(&mut self, name: impl Into<Cow<'static, str>>) -> Result<(), BuildError> {
        let name = name.into();
        if self.get(&name).is_none() {
            return Err(BuildError::UnknownTask(name.into_owned()));
        }

        self.default = Some(name);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Task> {
        self.tasks.iter().find(|task| task.name == name)
    }

    /// Registered task names in registration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tasks.iter().map(Task::name)
    }

    /// Resolves the exact sequence of tasks `run(name)` would execute.
    ///
    /// Every name reachable from `name` is validated before anything runs, so
    /// an unknown dependency anywhere in the chain fails without side effects.
    pub fn plan(&self, name: &str) -> Result<Vec<&Task>, BuildError> {
        let mut plan = Vec::new();
        let mut stack = Vec::new();
        self.plan_into(name, &mut stack, &mut plan)?;
        Ok(plan)
    }

    fn plan_into<'a>(
        &'a self,
        name: &str,
        stack: &mut Vec<String>,
        plan: &mut Vec<&'a Task>,
    ) -> Result<(), BuildError> {
        let task = self
            .get(name)
            .ok_or_else(|| BuildError::UnknownTask(name.to_string()))?;

        if stack.iter().any(|visited| visited == name) {
            stack.push(name.to_string());
            return Err(BuildError::Cycle(std::mem::take(stack)));
        }

        stack.push(name.to_string());
        for dependency in task.dependencies() {
            self.plan_into(dependency, stack, plan)?;
        }
        stack.pop();

        plan.push(task);
        Ok(())
    }

    /// Runs the dependencies of `name` in declared order, then `name` itself.
    ///
    /// Fails fast: the first failing task stops the sequence.
    pub fn run(&self, name: &str) -> Result<(), BuildError> {
        let plan = self.plan(name)?;
        let s = Instant::now();

        for task in plan {
            self.execute(task)?;
        }

        tracing::info!("finished '{name}' {}", as_overhead(s));
        Ok(())
    }

    /// Runs the designated default task.
    ///
    /// In development mode the default task serves and watches, so this call
    /// only returns when that loop stops.
    pub fn run_default(&self) -> Result<(), BuildError> {
        match &self.default {
            Some(name) => self.run(name),
            None => Err(BuildError::UnknownTask("default".to_string())),
        }
    }

    /// A context for running tasks from outside a task action.
    pub fn context(&self) -> Context<'_> {
        Context {
            config: &self.config,
            orchestrator: self,
        }
    }

    fn execute(&self, task: &Task) -> Result<(), BuildError> {
        let span = tracing::span!(Level::INFO, "task", name = task.name());
        span.pb_set_style(&task_style());
        span.pb_set_message(&format!("Running {}", task.name()));
        let _enter = span.enter();

        let context = self.context();

        let s = Instant::now();
        let result = match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            (task.action)(&context)
        })) {
            Ok(result) => result,
            Err(panic) => {
                let msg = if let Some(s) = panic.downcast_ref::<&str>() {
                    format!("Task panicked: {s}")
                } else if let Some(s) = panic.downcast_ref::<String>() {
                    format!("Task panicked: {s}")
                } else {
                    String::from("Task panicked with unknown payload")
                };

                Err(anyhow::anyhow!(msg))
            }
        };

        result.map_err(|source| BuildError::Task {
            name: task.name().to_string(),
            source,
        })?;

        tracing::debug!("'{}' done {}", task.name(), as_overhead(s));

        if let (Some(kind), Some(notifier)) = (task.reload, &self.notifier) {
            notifier.reload(kind);
        }

        Ok(())
    }

    /// Logs an error and forwards it to the attached notifier.
    pub fn report(&self, error: &BuildError) {
        tracing::error!("{error}");

        if let Some(notifier) = &self.notifier {
            notifier.error(&error.to_string());
        }
    }
}
