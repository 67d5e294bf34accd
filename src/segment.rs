//! Customer segment classification.

use serde::{Deserialize, Serialize};

use crate::state::ContactProfile;

/// Behavioral customer category. Drives menu copy and the planning profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Segment {
    New,
    Existing,
    ReturningBroadcast,
    Weekend,
}

impl std::fmt::Display for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::New => "new",
            Self::Existing => "existing",
            Self::ReturningBroadcast => "returning_broadcast",
            Self::Weekend => "weekend",
        };
        write!(f, "{s}")
    }
}

/// Classify a contact. Total and deterministic, evaluated fresh on every
/// message; the precedence weekend > returning_broadcast > existing > new is
/// load-bearing. The result is written back to the contact as a self-healing
/// cache but never read as a source of truth.
pub fn classify(contact: &ContactProfile) -> Segment {
    if contact.weekend {
        Segment::Weekend
    } else if contact.returning_broadcast {
        Segment::ReturningBroadcast
    } else if contact.customer_since.is_some()
        || contact.has_paid_lesson
        || contact.has_completed_intake
        || contact.trial_lesson_completed
        || contact.lesson_booked
    {
        Segment::Existing
    } else {
        Segment::New
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contact() -> ContactProfile {
        ContactProfile::default()
    }

    #[test]
    fn blank_contact_is_new() {
        assert_eq!(classify(&contact()), Segment::New);
    }

    #[test]
    fn any_history_flag_makes_existing() {
        for set in [
            |c: &mut ContactProfile| c.customer_since = Some("2025-01-01".into()),
            |c: &mut ContactProfile| c.has_paid_lesson = true,
            |c: &mut ContactProfile| c.has_completed_intake = true,
            |c: &mut ContactProfile| c.trial_lesson_completed = true,
            |c: &mut ContactProfile| c.lesson_booked = true,
        ] {
            let mut c = contact();
            set(&mut c);
            assert_eq!(classify(&c), Segment::Existing);
        }
    }

    #[test]
    fn precedence_under_simultaneous_flags() {
        // All flags set at once: weekend wins.
        let mut c = contact();
        c.weekend = true;
        c.returning_broadcast = true;
        c.has_paid_lesson = true;
        c.customer_since = Some("2024-09-01".into());
        assert_eq!(classify(&c), Segment::Weekend);

        // Weekend off: broadcast beats existing.
        c.weekend = false;
        assert_eq!(classify(&c), Segment::ReturningBroadcast);

        // Broadcast off: existing.
        c.returning_broadcast = false;
        assert_eq!(classify(&c), Segment::Existing);
    }
}
