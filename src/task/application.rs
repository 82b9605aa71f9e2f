//! A minimal task host: datastores, data tasks, plain tasks and invocation.

use super::data_task::DataTask;
use super::graph::{execution_order, find_cycle, Prerequisites};
use super::timestamp::Timestamp;
use crate::adapter::{Adapter, Data};
use crate::error::{Error, Result};
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info};

type DataAction = Box<dyn FnMut(&Data) -> Result<()>>;
type PlainAction = Box<dyn FnMut() -> Result<()>>;

enum Work {
    Plain(PlainAction),
    Data { task: DataTask, action: DataAction },
}

struct Task {
    /// Datastore the task was defined in; prerequisites resolve there first.
    scope: Option<String>,
    prerequisites: Vec<String>,
    work: Work,
}

/// Registry of tasks. Data tasks are named `store:name`.
#[derive(Default)]
pub struct Application {
    stores: HashMap<String, Arc<dyn Adapter>>,
    tasks: HashMap<String, Task>,
    /// Task names in definition order.
    defined: Vec<String>,
}

impl Application {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `adapter` under `name`, replacing any earlier registration.
    pub fn datastore(&mut self, name: impl Into<String>, adapter: Arc<dyn Adapter>) {
        self.stores.insert(name.into(), adapter);
    }

    pub fn store(&self, name: &str) -> Option<&Arc<dyn Adapter>> {
        self.stores.get(name)
    }

    /// Define a task building `name` in `store`. Returns the task name.
    pub fn data<F>(
        &mut self,
        store: &str,
        name: &str,
        prerequisites: &[&str],
        action: F,
    ) -> Result<String>
    where
        F: FnMut(&Data) -> Result<()> + 'static,
    {
        let adapter = self
            .stores
            .get(store)
            .ok_or_else(|| Error::Configuration(format!("no datastore `{store}`")))?;
        let task = DataTask::new(Data::new(name, Arc::clone(adapter)));
        let full = format!("{store}:{name}");
        self.define(
            full.clone(),
            Some(store.to_string()),
            prerequisites,
            Work::Data {
                task,
                action: Box::new(action),
            },
        );
        Ok(full)
    }

    /// Define a task that runs every time it is invoked.
    pub fn task<F>(&mut self, name: &str, prerequisites: &[&str], action: F)
    where
        F: FnMut() -> Result<()> + 'static,
    {
        self.define(
            name.to_string(),
            None,
            prerequisites,
            Work::Plain(Box::new(action)),
        );
    }

    fn define(&mut self, name: String, scope: Option<String>, prerequisites: &[&str], work: Work) {
        let task = Task {
            scope,
            prerequisites: prerequisites.iter().map(|p| p.to_string()).collect(),
            work,
        };
        if self.tasks.insert(name.clone(), task).is_none() {
            self.defined.push(name);
        }
    }

    /// Resolve `name` as seen from `scope`: `scope:name` first, then `name`.
    pub fn resolve(&self, name: &str, scope: Option<&str>) -> Result<String> {
        if let Some(scope) = scope {
            let scoped = format!("{scope}:{name}");
            if self.tasks.contains_key(&scoped) {
                return Ok(scoped);
            }
        }
        if self.tasks.contains_key(name) {
            return Ok(name.to_string());
        }
        Err(Error::TaskNotFound(name.to_string()))
    }

    /// Whether `name` would run if invoked now, looking at its current
    /// prerequisites without running them.
    pub fn needed(&self, name: &str) -> Result<bool> {
        let name = self.resolve(name, None)?;
        let task = &self.tasks[&name];
        match &task.work {
            Work::Plain(_) => Ok(true),
            Work::Data { task: data_task, .. } => {
                let mut stamps = Vec::with_capacity(task.prerequisites.len());
                for prereq in &task.prerequisites {
                    let prereq = self.resolve(prereq, task.scope.as_deref())?;
                    stamps.push(self.current_timestamp(&prereq)?);
                }
                data_task.needed(&stamps)
            }
        }
    }

    fn current_timestamp(&self, name: &str) -> Result<Timestamp> {
        match &self.tasks[name].work {
            Work::Plain(_) => Ok(Timestamp::At(Utc::now())),
            Work::Data { task, .. } => task.timestamp(),
        }
    }

    /// Run `target` and whatever it depends on. Each task's need is evaluated
    /// once, after its prerequisites ran. Returns the tasks whose actions ran.
    pub fn invoke(&mut self, target: &str) -> Result<Vec<String>> {
        let target = self.resolve(target, None)?;
        let graph = self.reachable(&target)?;
        if let Some(cycle) = find_cycle(&target, &graph) {
            return Err(Error::CycleDetected(cycle));
        }

        let nodes: Vec<String> = self
            .defined
            .iter()
            .filter(|n| graph.contains_key(*n))
            .cloned()
            .collect();
        let order = execution_order(&nodes, &graph)?;
        info!(target = %target, tasks = order.len(), "invoking");

        let mut stamps: HashMap<String, Timestamp> = HashMap::new();
        let mut ran = Vec::new();
        for name in order {
            let prereq_stamps: Vec<Timestamp> = graph[&name]
                .iter()
                .filter_map(|p| stamps.get(p).copied())
                .collect();

            let Some(task) = self.tasks.get_mut(&name) else {
                return Err(Error::TaskNotFound(name));
            };
            let stamp = match &mut task.work {
                Work::Plain(action) => {
                    debug!(task = %name, "running");
                    action()?;
                    ran.push(name.clone());
                    Timestamp::At(Utc::now())
                }
                Work::Data { task, action } => {
                    if task.needed(&prereq_stamps)? {
                        debug!(task = %name, "running");
                        action(task.data())?;
                        ran.push(name.clone());
                    } else {
                        debug!(task = %name, "up to date");
                    }
                    task.timestamp()?
                }
            };
            stamps.insert(name, stamp);
        }
        Ok(ran)
    }

    /// Resolved prerequisite edges of every task reachable from `target`.
    fn reachable(&self, target: &str) -> Result<Prerequisites> {
        let mut graph = Prerequisites::new();
        let mut seen = HashSet::new();
        let mut pending = vec![target.to_string()];

        while let Some(name) = pending.pop() {
            if !seen.insert(name.clone()) {
                continue;
            }
            let task = self
                .tasks
                .get(&name)
                .ok_or_else(|| Error::TaskNotFound(name.clone()))?;
            let mut edges = Vec::with_capacity(task.prerequisites.len());
            for prereq in &task.prerequisites {
                let resolved = self.resolve(prereq, task.scope.as_deref())?;
                pending.push(resolved.clone());
                edges.push(resolved);
            }
            graph.insert(name, edges);
        }
        Ok(graph)
    }
}
