//! Persisted key layout.

pub const TASKS: &str = "@offline_tasks";
pub const VACCINATIONS: &str = "@offline_vaccinations";
pub const CHECKUPS: &str = "@offline_checkups";
pub const SYNC_QUEUE: &str = "@sync_queue";
pub const LAST_SYNC: &str = "@last_sync";

/// Prefix for per-parameter reference data keys.
pub const VETS_PREFIX: &str = "@offline_vets_";

/// Fixed keys cleared on logout. Reference-data keys are matched by prefix.
pub const FIXED: [&str; 5] = [TASKS, VACCINATIONS, CHECKUPS, SYNC_QUEUE, LAST_SYNC];

/// Reference-data key for the vet directory of a city and animal type.
pub fn vets(city: &str, animal_type: &str) -> String {
    format!(
        "{}{}_{}",
        VETS_PREFIX,
        city.trim().to_lowercase(),
        animal_type.trim().to_lowercase()
    )
}

/// True for every key this subsystem writes.
pub fn is_namespaced(key: &str) -> bool {
    FIXED.contains(&key) || key.starts_with(VETS_PREFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vets_key_is_normalized() {
        assert_eq!(vets(" Nairobi ", "Cattle"), "@offline_vets_nairobi_cattle");
    }

    #[test]
    fn test_is_namespaced() {
        assert!(is_namespaced(SYNC_QUEUE));
        assert!(is_namespaced(&vets("kisumu", "goats")));
        assert!(!is_namespaced("@theme"));
    }
}
