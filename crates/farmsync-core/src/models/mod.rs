//! Data models for farm entities.
//!
//! - `Task`: a farm chore with an optional due date
//! - `Vaccination`, `Checkup`: animal health schedule entries
//! - `Veterinarian`: vet directory reference data
//!
//! The `*Input` types carry the user-editable fields sent to the server.

pub mod health;
pub mod task;

pub use health::{Checkup, CheckupInput, Vaccination, VaccinationInput, Veterinarian};
pub use task::{Task, TaskInput, TaskPriority, TaskStatus};
