use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::InProgress => write!(f, "in progress"),
            TaskStatus::Completed => write!(f, "completed"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct Task {
    pub id: String,
    pub task_name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub animal_type: Option<String>,
    #[serde(default)]
    pub due_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub priority: Option<TaskPriority>,
}

impl Task {
    pub fn is_completed(&self) -> bool {
        self.status == TaskStatus::Completed
    }
}

/// Fields a user supplies when creating or editing a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct TaskInput {
    pub task_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub animal_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<TaskPriority>,
}

impl TaskInput {
    pub fn new(task_name: impl Into<String>) -> Self {
        Self {
            task_name: task_name.into(),
            ..Self::default()
        }
    }

    /// Build a local task from this input, for optimistic display.
    pub fn into_task(self, id: String) -> Task {
        Task {
            id,
            task_name: self.task_name,
            description: self.description,
            animal_type: self.animal_type,
            due_date: self.due_date,
            status: TaskStatus::Pending,
            priority: self.priority,
        }
    }

    /// Overwrite the editable fields of an existing task.
    pub fn apply_to(&self, task: &mut Task) {
        task.task_name = self.task_name.clone();
        task.description = self.description.clone();
        task.animal_type = self.animal_type.clone();
        task.due_date = self.due_date;
        task.priority = self.priority;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_tolerates_sparse_server_json() {
        let json = r#"{"id":"7","task_name":"Feed","extra_field":true}"#;
        let task: Task = serde_json::from_str(json).unwrap();
        assert_eq!(task.task_name, "Feed");
        assert_eq!(task.status, TaskStatus::Pending);
        assert!(task.due_date.is_none());
    }

    #[test]
    fn test_status_wire_format() {
        assert_eq!(
            serde_json::to_string(&TaskStatus::InProgress).unwrap(),
            "\"in_progress\""
        );
    }

    #[test]
    fn test_input_skips_empty_fields() {
        let json = serde_json::to_value(TaskInput::new("Feed")).unwrap();
        assert_eq!(json, serde_json::json!({"task_name": "Feed"}));
    }
}
