use crate::LabError;
use labmachine_schema::VolumeStatus;

pub fn validate_volume_transition(from: VolumeStatus, to: VolumeStatus) -> Result<(), LabError> {
    let valid = from == to
        || matches!(
            (from, to),
            (VolumeStatus::Creating, VolumeStatus::Available)
                | (
                    VolumeStatus::Available | VolumeStatus::Detached,
                    VolumeStatus::Attached
                )
                | (VolumeStatus::Attached, VolumeStatus::Detached)
                | (
                    VolumeStatus::Available | VolumeStatus::Attached | VolumeStatus::Detached,
                    VolumeStatus::Deleting
                )
        );

    if valid {
        Ok(())
    } else {
        Err(LabError::InvalidTransition { from, to })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_transitions() {
        use VolumeStatus::{Attached, Available, Creating, Deleting, Detached};
        assert!(validate_volume_transition(Creating, Available).is_ok());
        assert!(validate_volume_transition(Available, Attached).is_ok());
        assert!(validate_volume_transition(Attached, Detached).is_ok());
        assert!(validate_volume_transition(Detached, Attached).is_ok());
        assert!(validate_volume_transition(Available, Deleting).is_ok());
        assert!(validate_volume_transition(Attached, Deleting).is_ok());
        assert!(validate_volume_transition(Detached, Deleting).is_ok());
        assert!(validate_volume_transition(Attached, Attached).is_ok()); // idempotent refresh
    }

    #[test]
    fn invalid_transitions() {
        use VolumeStatus::{Attached, Available, Creating, Deleting, Detached};
        assert!(validate_volume_transition(Creating, Attached).is_err());
        assert!(validate_volume_transition(Creating, Deleting).is_err());
        assert!(validate_volume_transition(Deleting, Available).is_err());
        assert!(validate_volume_transition(Deleting, Attached).is_err());
        assert!(validate_volume_transition(Detached, Available).is_err());
        assert!(validate_volume_transition(Available, Creating).is_err());
    }

    #[test]
    fn error_names_both_states() {
        let err =
            validate_volume_transition(VolumeStatus::Deleting, VolumeStatus::Attached).unwrap_err();
        assert_eq!(err.to_string(), "invalid volume transition: deleting -> attached");
    }
}
