use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct Vaccination {
    pub id: String,
    pub animal_name: String,
    #[serde(default)]
    pub animal_type: Option<String>,
    pub vaccine_name: String,
    pub due_date: DateTime<Utc>,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct VaccinationInput {
    pub animal_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub animal_type: Option<String>,
    pub vaccine_name: String,
    pub due_date: DateTime<Utc>,
}

impl VaccinationInput {
    pub fn into_vaccination(self, id: String) -> Vaccination {
        Vaccination {
            id,
            animal_name: self.animal_name,
            animal_type: self.animal_type,
            vaccine_name: self.vaccine_name,
            due_date: self.due_date,
            status: None,
        }
    }

    pub fn apply_to(&self, vaccination: &mut Vaccination) {
        vaccination.animal_name = self.animal_name.clone();
        vaccination.animal_type = self.animal_type.clone();
        vaccination.vaccine_name = self.vaccine_name.clone();
        vaccination.due_date = self.due_date;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct Checkup {
    pub id: String,
    pub animal_name: String,
    #[serde(default)]
    pub animal_type: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub vet_name: Option<String>,
    pub scheduled_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct CheckupInput {
    pub animal_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub animal_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vet_name: Option<String>,
    pub scheduled_at: DateTime<Utc>,
}

impl CheckupInput {
    pub fn into_checkup(self, id: String) -> Checkup {
        Checkup {
            id,
            animal_name: self.animal_name,
            animal_type: self.animal_type,
            reason: self.reason,
            vet_name: self.vet_name,
            scheduled_at: self.scheduled_at,
        }
    }

    pub fn apply_to(&self, checkup: &mut Checkup) {
        checkup.animal_name = self.animal_name.clone();
        checkup.animal_type = self.animal_type.clone();
        checkup.reason = self.reason.clone();
        checkup.vet_name = self.vet_name.clone();
        checkup.scheduled_at = self.scheduled_at;
    }
}

/// Vet directory entry (reference data, read-only on the client).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct Veterinarian {
    pub id: String,
    pub name: String,
    pub city: String,
    #[serde(default)]
    pub animal_types: Vec<String>,
    #[serde(default)]
    pub phone: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vaccination_parses_rfc3339_due_date() {
        let json = r#"{
            "id": "v1",
            "animal_name": "Daisy",
            "vaccine_name": "FMD",
            "due_date": "2026-11-01T08:00:00Z"
        }"#;
        let v: Vaccination = serde_json::from_str(json).unwrap();
        assert_eq!(v.due_date.to_rfc3339(), "2026-11-01T08:00:00+00:00");
        assert!(v.animal_type.is_none());
    }

    #[test]
    fn test_checkup_input_apply_keeps_id() {
        let at = Utc::now();
        let mut checkup = CheckupInput {
            animal_name: "Old".into(),
            animal_type: None,
            reason: None,
            vet_name: None,
            scheduled_at: at,
        }
        .into_checkup("c9".into());

        let edit = CheckupInput {
            animal_name: "Bessie".into(),
            animal_type: Some("cattle".into()),
            reason: Some("limp".into()),
            vet_name: None,
            scheduled_at: at,
        };
        edit.apply_to(&mut checkup);

        assert_eq!(checkup.id, "c9");
        assert_eq!(checkup.animal_name, "Bessie");
        assert_eq!(checkup.reason.as_deref(), Some("limp"));
    }
}
