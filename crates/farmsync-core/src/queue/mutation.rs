//! Typed mutations.
//!
//! The UI never hands raw JSON to the queue. It builds a `Mutation`, whose
//! variant fixes the entity type, action, endpoint, method and payload shape.

use serde::Serialize;
use serde_json::{json, Value};

use super::item::{EntityType, HttpMethod, SyncAction};
use crate::models::{CheckupInput, TaskInput, TaskStatus, VaccinationInput};

#[derive(Debug, Clone, PartialEq)]
pub enum TaskMutation {
    Create(TaskInput),
    Update { id: String, changes: TaskInput },
    SetStatus { id: String, status: TaskStatus },
    Delete { id: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum VaccinationMutation {
    Create(VaccinationInput),
    Update { id: String, changes: VaccinationInput },
    Delete { id: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum CheckupMutation {
    Create(CheckupInput),
    Update { id: String, changes: CheckupInput },
    Delete { id: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    Task(TaskMutation),
    Vaccination(VaccinationMutation),
    Checkup(CheckupMutation),
}

fn to_payload<T: Serialize>(input: &T) -> Option<Value> {
    // Plain data structs; serialization cannot fail
    serde_json::to_value(input).ok()
}

impl Mutation {
    pub fn entity_type(&self) -> EntityType {
        match self {
            Mutation::Task(_) => EntityType::Task,
            Mutation::Vaccination(_) => EntityType::Vaccination,
            Mutation::Checkup(_) => EntityType::Checkup,
        }
    }

    fn collection(&self) -> &'static str {
        match self {
            Mutation::Task(_) => "/tasks",
            Mutation::Vaccination(_) => "/vaccinations",
            Mutation::Checkup(_) => "/checkups",
        }
    }

    /// Id of the entity this mutation targets, if it already exists.
    pub fn target_id(&self) -> Option<&str> {
        match self {
            Mutation::Task(TaskMutation::Create(_))
            | Mutation::Vaccination(VaccinationMutation::Create(_))
            | Mutation::Checkup(CheckupMutation::Create(_)) => None,
            Mutation::Task(TaskMutation::Update { id, .. })
            | Mutation::Task(TaskMutation::SetStatus { id, .. })
            | Mutation::Task(TaskMutation::Delete { id })
            | Mutation::Vaccination(VaccinationMutation::Update { id, .. })
            | Mutation::Vaccination(VaccinationMutation::Delete { id })
            | Mutation::Checkup(CheckupMutation::Update { id, .. })
            | Mutation::Checkup(CheckupMutation::Delete { id }) => Some(id.as_str()),
        }
    }

    pub fn action(&self) -> SyncAction {
        match self {
            Mutation::Task(TaskMutation::Create(_))
            | Mutation::Vaccination(VaccinationMutation::Create(_))
            | Mutation::Checkup(CheckupMutation::Create(_)) => SyncAction::Create,
            Mutation::Task(TaskMutation::Delete { .. })
            | Mutation::Vaccination(VaccinationMutation::Delete { .. })
            | Mutation::Checkup(CheckupMutation::Delete { .. }) => SyncAction::Delete,
            _ => SyncAction::Update,
        }
    }

    pub fn method(&self) -> HttpMethod {
        match self {
            Mutation::Task(TaskMutation::SetStatus { .. }) => HttpMethod::Patch,
            _ => match self.action() {
                SyncAction::Create => HttpMethod::Post,
                SyncAction::Update => HttpMethod::Put,
                SyncAction::Delete => HttpMethod::Delete,
            },
        }
    }

    pub fn endpoint(&self) -> String {
        match self.target_id() {
            Some(id) => format!("{}/{}", self.collection(), id),
            None => self.collection().to_string(),
        }
    }

    pub fn payload(&self) -> Option<Value> {
        match self {
            Mutation::Task(TaskMutation::Create(input))
            | Mutation::Task(TaskMutation::Update { changes: input, .. }) => to_payload(input),
            Mutation::Task(TaskMutation::SetStatus { status, .. }) => {
                Some(json!({ "status": status }))
            }
            Mutation::Vaccination(VaccinationMutation::Create(input))
            | Mutation::Vaccination(VaccinationMutation::Update { changes: input, .. }) => {
                to_payload(input)
            }
            Mutation::Checkup(CheckupMutation::Create(input))
            | Mutation::Checkup(CheckupMutation::Update { changes: input, .. }) => {
                to_payload(input)
            }
            Mutation::Task(TaskMutation::Delete { .. })
            | Mutation::Vaccination(VaccinationMutation::Delete { .. })
            | Mutation::Checkup(CheckupMutation::Delete { .. }) => None,
        }
    }
}
