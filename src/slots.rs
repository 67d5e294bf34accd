//! Planning profiles and candidate-slot generation.
//!
//! A profile bundles the scheduling constraints for a segment; candidates
//! are generated on the profile grid against the calendar's busy intervals.
//! When the calendar is unavailable the engine degrades to a locally
//! generated, non-authoritative candidate set — never a hard failure.

use chrono::{DateTime, Datelike, Duration, FixedOffset, Timelike, Weekday};

use crate::calendar::BusyInterval;
use crate::i18n::Lang;
use crate::segment::Segment;
use crate::state::{CandidateSlot, LessonType};

/// Maximum number of candidates shown per page.
pub const PAGE_SIZE: usize = 8;

const WEEKDAYS: &[Weekday] = &[
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
];
const WEEKEND: &[Weekday] = &[Weekday::Sat, Weekday::Sun];

/// Immutable scheduling constraint bundle.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanningProfile {
    pub earliest_hour: u32,
    pub latest_hour: u32,
    pub min_lead_minutes: i64,
    pub buffer_before_minutes: i64,
    pub buffer_after_minutes: i64,
    pub days_ahead: i64,
    pub granularity_minutes: i64,
    pub allowed_weekdays: &'static [Weekday],
}

/// Select the profile for a segment. Precedence mirrors the segment
/// classifier; lesson duration comes from the lesson type, not the profile.
pub fn profile_for(segment: Segment) -> PlanningProfile {
    match segment {
        Segment::New => PlanningProfile {
            earliest_hour: 10,
            latest_hour: 20,
            min_lead_minutes: 720,
            buffer_before_minutes: 15,
            buffer_after_minutes: 15,
            days_ahead: 10,
            granularity_minutes: 30,
            allowed_weekdays: WEEKDAYS,
        },
        Segment::Existing | Segment::ReturningBroadcast => PlanningProfile {
            earliest_hour: 9,
            latest_hour: 21,
            min_lead_minutes: 360,
            buffer_before_minutes: 10,
            buffer_after_minutes: 10,
            days_ahead: 14,
            granularity_minutes: 30,
            allowed_weekdays: WEEKDAYS,
        },
        Segment::Weekend => PlanningProfile {
            earliest_hour: 10,
            latest_hour: 18,
            min_lead_minutes: 180,
            buffer_before_minutes: 10,
            buffer_after_minutes: 10,
            days_ahead: 7,
            granularity_minutes: 30,
            allowed_weekdays: WEEKEND,
        },
    }
}

fn overlaps(
    start: DateTime<FixedOffset>,
    end: DateTime<FixedOffset>,
    busy: &[BusyInterval],
) -> bool {
    busy.iter().any(|b| start < b.end && b.start < end)
}

/// Dutch/English label like `wo 2 sep 14:00`.
pub fn slot_label(start: &DateTime<FixedOffset>, lang: Lang) -> String {
    let (day, month) = match lang {
        Lang::Nl => {
            let day = match start.weekday() {
                Weekday::Mon => "ma",
                Weekday::Tue => "di",
                Weekday::Wed => "wo",
                Weekday::Thu => "do",
                Weekday::Fri => "vr",
                Weekday::Sat => "za",
                Weekday::Sun => "zo",
            };
            let month = [
                "jan", "feb", "mrt", "apr", "mei", "jun", "jul", "aug", "sep", "okt", "nov", "dec",
            ][start.month0() as usize];
            (day, month)
        }
        Lang::En => {
            let day = match start.weekday() {
                Weekday::Mon => "Mon",
                Weekday::Tue => "Tue",
                Weekday::Wed => "Wed",
                Weekday::Thu => "Thu",
                Weekday::Fri => "Fri",
                Weekday::Sat => "Sat",
                Weekday::Sun => "Sun",
            };
            let month = [
                "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
            ][start.month0() as usize];
            (day, month)
        }
    };
    format!(
        "{day} {} {month} {:02}:{:02}",
        start.day(),
        start.hour(),
        start.minute()
    )
}

/// Generate every free candidate on the profile grid within the horizon.
pub fn generate(
    profile: &PlanningProfile,
    lesson_type: LessonType,
    busy: &[BusyInterval],
    now: DateTime<FixedOffset>,
    lang: Lang,
) -> Vec<CandidateSlot> {
    let duration = Duration::minutes(lesson_type.duration_minutes());
    let lead = Duration::minutes(profile.min_lead_minutes);
    let buffer_before = Duration::minutes(profile.buffer_before_minutes);
    let buffer_after = Duration::minutes(profile.buffer_after_minutes);
    let earliest_start = now + lead;

    let mut out = Vec::new();
    for day_offset in 0..=profile.days_ahead {
        let date = (now + Duration::days(day_offset)).date_naive();
        if !profile.allowed_weekdays.contains(&date.weekday()) {
            continue;
        }

        let mut minute = profile.earliest_hour as i64 * 60;
        let last_start = profile.latest_hour as i64 * 60 - duration.num_minutes();
        while minute <= last_start {
            let time = chrono::NaiveTime::from_hms_opt(
                (minute / 60) as u32,
                (minute % 60) as u32,
                0,
            );
            minute += profile.granularity_minutes;
            let Some(time) = time else { continue };
            let Some(start) = date
                .and_time(time)
                .and_local_timezone(*now.offset())
                .single()
            else {
                continue;
            };
            let end = start + duration;

            if start < earliest_start {
                continue;
            }
            if overlaps(start - buffer_before, end + buffer_after, busy) {
                continue;
            }

            out.push(CandidateSlot {
                start,
                end,
                label: slot_label(&start, lang),
            });
        }
    }
    out
}

/// Locally generated fallback when the calendar is unreachable. A narrower
/// window than the real profile keeps un-checked proposals easy to honor.
pub fn fallback(
    lesson_type: LessonType,
    segment: Segment,
    now: DateTime<FixedOffset>,
    lang: Lang,
) -> Vec<CandidateSlot> {
    let mut profile = profile_for(segment);
    match lesson_type {
        LessonType::Trial => {
            profile.earliest_hour = 17;
            profile.latest_hour = 19;
        }
        _ => {
            profile.earliest_hour = 14;
            profile.latest_hour = 19;
        }
    }
    generate(&profile, lesson_type, &[], now, lang)
}

/// Keep only slots matching the customer's stated day/daypart preferences.
/// An over-strict filter that empties the list falls back to the full set.
pub fn filter_by_preferences(slots: Vec<CandidateSlot>, preferences: &str) -> Vec<CandidateSlot> {
    let prefs = preferences.to_lowercase();

    let mut days: Vec<Weekday> = Vec::new();
    let day_words: &[(&str, Weekday)] = &[
        ("maandag", Weekday::Mon),
        ("monday", Weekday::Mon),
        ("dinsdag", Weekday::Tue),
        ("tuesday", Weekday::Tue),
        ("woensdag", Weekday::Wed),
        ("wednesday", Weekday::Wed),
        ("donderdag", Weekday::Thu),
        ("thursday", Weekday::Thu),
        ("vrijdag", Weekday::Fri),
        ("friday", Weekday::Fri),
        ("zaterdag", Weekday::Sat),
        ("saturday", Weekday::Sat),
        ("zondag", Weekday::Sun),
        ("sunday", Weekday::Sun),
    ];
    for (word, day) in day_words {
        if prefs.contains(word) && !days.contains(day) {
            days.push(*day);
        }
    }

    let morning = prefs.contains("ochtend") || prefs.contains("morning");
    let afternoon = prefs.contains("middag") || prefs.contains("afternoon");
    let evening = prefs.contains("avond") || prefs.contains("evening");
    let any_daypart = morning || afternoon || evening;

    let filtered: Vec<CandidateSlot> = slots
        .iter()
        .filter(|s| {
            if !days.is_empty() && !days.contains(&s.start.weekday()) {
                return false;
            }
            if any_daypart {
                let h = s.start.hour();
                let hit = (morning && h < 12)
                    || (afternoon && (12..17).contains(&h))
                    || (evening && h >= 17);
                if !hit {
                    return false;
                }
            }
            true
        })
        .cloned()
        .collect();

    if filtered.is_empty() { slots } else { filtered }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn tz() -> FixedOffset {
        FixedOffset::east_opt(2 * 3600).unwrap()
    }

    // Tuesday 2026-09-01 09:00 +02:00.
    fn now() -> DateTime<FixedOffset> {
        tz().with_ymd_and_hms(2026, 9, 1, 9, 0, 0).unwrap()
    }

    #[test]
    fn profiles_match_segments() {
        assert_eq!(profile_for(Segment::New).min_lead_minutes, 720);
        assert_eq!(profile_for(Segment::Existing).days_ahead, 14);
        assert_eq!(
            profile_for(Segment::ReturningBroadcast),
            profile_for(Segment::Existing)
        );
        assert_eq!(profile_for(Segment::Weekend).allowed_weekdays, WEEKEND);
    }

    #[test]
    fn generated_slots_respect_hours_lead_and_weekdays() {
        let profile = profile_for(Segment::New);
        let slots = generate(&profile, LessonType::Regular, &[], now(), Lang::Nl);
        assert!(!slots.is_empty());
        for slot in &slots {
            assert!(slot.start >= now() + Duration::minutes(720));
            assert!(slot.start.hour() >= 10);
            assert!(slot.end.hour() <= 20);
            assert!(WEEKDAYS.contains(&slot.start.weekday()));
            assert_eq!(slot.end - slot.start, Duration::minutes(60));
        }
    }

    #[test]
    fn weekend_profile_yields_weekend_days_only() {
        let profile = profile_for(Segment::Weekend);
        let slots = generate(&profile, LessonType::Regular, &[], now(), Lang::Nl);
        assert!(!slots.is_empty());
        assert!(slots.iter().all(|s| WEEKEND.contains(&s.start.weekday())));
    }

    #[test]
    fn busy_intervals_block_slots_including_buffers() {
        let profile = profile_for(Segment::Existing);
        // Busy block Wednesday 14:00–15:00.
        let busy = vec![BusyInterval {
            start: tz().with_ymd_and_hms(2026, 9, 2, 14, 0, 0).unwrap(),
            end: tz().with_ymd_and_hms(2026, 9, 2, 15, 0, 0).unwrap(),
        }];
        let slots = generate(&profile, LessonType::Regular, &busy, now(), Lang::Nl);
        // 13:00 start would end 14:00, inside the 10-minute buffer.
        for blocked_hour in [13, 14] {
            let blocked = tz()
                .with_ymd_and_hms(2026, 9, 2, blocked_hour, 0, 0)
                .unwrap();
            assert!(
                !slots.iter().any(|s| s.start == blocked),
                "{blocked_hour}:00 should be blocked"
            );
        }
        let free = tz().with_ymd_and_hms(2026, 9, 2, 16, 0, 0).unwrap();
        assert!(slots.iter().any(|s| s.start == free));
    }

    #[test]
    fn trial_lessons_are_half_hour() {
        let profile = profile_for(Segment::New);
        let slots = generate(&profile, LessonType::Trial, &[], now(), Lang::Nl);
        assert!(slots.iter().all(|s| s.end - s.start == Duration::minutes(30)));
    }

    #[test]
    fn preference_filter_keeps_matching_days_and_dayparts() {
        let profile = profile_for(Segment::Existing);
        let slots = generate(&profile, LessonType::Regular, &[], now(), Lang::Nl);
        let filtered = filter_by_preferences(slots, "het liefst woensdagmiddag");
        assert!(!filtered.is_empty());
        for slot in &filtered {
            assert_eq!(slot.start.weekday(), Weekday::Wed);
            assert!((12..17).contains(&slot.start.hour()));
        }
    }

    #[test]
    fn empty_filter_result_falls_back_to_full_set() {
        let profile = profile_for(Segment::Weekend);
        let slots = generate(&profile, LessonType::Regular, &[], now(), Lang::Nl);
        // Weekend profile has no Monday slots; filter must not empty the list.
        let filtered = filter_by_preferences(slots.clone(), "maandag");
        assert_eq!(filtered, slots);
    }

    #[test]
    fn fallback_never_fails_and_narrows_hours() {
        let slots = fallback(LessonType::Trial, Segment::New, now(), Lang::Nl);
        assert!(!slots.is_empty());
        assert!(slots.iter().all(|s| (17..19).contains(&s.start.hour())));
    }

    #[test]
    fn labels_are_localized() {
        let start = tz().with_ymd_and_hms(2026, 9, 2, 14, 0, 0).unwrap();
        assert_eq!(slot_label(&start, Lang::Nl), "wo 2 sep 14:00");
        assert_eq!(slot_label(&start, Lang::En), "Wed 2 Sep 14:00");
    }
}
