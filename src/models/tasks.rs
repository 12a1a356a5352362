use serde::Serialize;

use crate::settings::TaskConfig;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Task {
    pub id: String,
    pub title: String,
    pub reward_in_cents: i64,
}

#[derive(Clone, Debug, Default)]
pub struct TaskCatalog {
    tasks: Vec<Task>,
}

impl TaskCatalog {
    pub fn new(tasks: Vec<Task>) -> Self {
        Self { tasks }
    }

    pub fn get(&self, task_id: &str) -> Option<&Task> {
        self.tasks.iter().find(|task| task.id == task_id)
    }

    pub fn all(&self) -> &[Task] {
        &self.tasks
    }
}

impl From<&[TaskConfig]> for TaskCatalog {
    fn from(configs: &[TaskConfig]) -> Self {
        let tasks = configs
            .iter()
            .map(|c| Task {
                id: c.id.clone(),
                title: c.title.clone(),
                reward_in_cents: c.reward_in_cents,
            })
            .collect();

        Self::new(tasks)
    }
}
