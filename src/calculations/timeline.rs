//! Timeline interpretation: fail back-annotation, counting, cycle times and
//! the teleop cycle estimator. Every function expects events in play order
//! (decreasing `time`), as returned by [`crate::model::parse_timeline`].

use super::utility::median;
use crate::model::{ActionType, TimelineEvent};
use crate::schema::EventFilter;
use crate::schema::OneOrMany;
use crate::schema::totals::{ExpectedMeasure, ExpectedSpec};
use std::collections::BTreeMap;

/// Estimate reported when a teleop phase contains no complete cycle.
pub const NO_CYCLE_TIME: f64 = 135.0;

/// Rewrites the event following each `fail` to its failed variant.
pub fn annotate_fails(timeline: &mut [TimelineEvent], mapping: &BTreeMap<ActionType, ActionType>) {
    for i in 1..timeline.len() {
        if timeline[i - 1].action_type != ActionType::Fail {
            continue;
        }
        if let Some(failed) = mapping.get(&timeline[i].action_type) {
            timeline[i].action_type = *failed;
        }
    }
}

pub fn filter<'a>(timeline: &'a [TimelineEvent], filter: &EventFilter) -> Vec<&'a TimelineEvent> {
    timeline.iter().filter(|e| filter.matches(e)).collect()
}

pub fn count(timeline: &[TimelineEvent], event_filter: &EventFilter) -> usize {
    timeline.iter().filter(|e| event_filter.matches(e)).count()
}

/// Sum of the gaps between each `start` and the next `end` that are at least
/// `minimum_time` long. With `close_at_end`, a start left open runs to time 0.
pub fn cycle_time(
    timeline: &[TimelineEvent],
    start: ActionType,
    end: &OneOrMany<ActionType>,
    minimum_time: i64,
    close_at_end: bool,
) -> i64 {
    let mut total = 0;
    let mut open: Option<i64> = None;
    for event in timeline {
        match open {
            None if event.action_type == start => open = Some(event.time),
            Some(started) if end.contains(&event.action_type) => {
                let gap = started - event.time;
                if gap >= minimum_time {
                    total += gap;
                }
                open = None;
            }
            _ => {}
        }
    }
    if let (Some(started), true) = (open, close_at_end) {
        if started >= minimum_time {
            total += started;
        }
    }
    total
}

/// Median gap between consecutive matching events, rounded; 0 with fewer than two.
pub fn median_cycle(timeline: &[TimelineEvent], event_filter: &EventFilter) -> i64 {
    let matching = filter(timeline, event_filter);
    if matching.len() < 2 {
        return 0;
    }
    let gaps: Vec<f64> = matching
        .windows(2)
        .map(|pair| (pair[0].time - pair[1].time) as f64)
        .collect();
    median(&gaps, None).round() as i64
}

/// Weighted teleop cycle count, or the cycle time it implies.
pub fn expected(timeline: &[TimelineEvent], spec: &ExpectedSpec) -> f64 {
    let first = timeline.iter().position(|e| e.in_teleop);
    let last = timeline.iter().rposition(|e| e.in_teleop);
    let teleop: Vec<&TimelineEvent> = match (first, last) {
        (Some(first), Some(last)) => timeline[first..=last]
            .iter()
            .filter(|e| e.action_type != ActionType::ToTeleop)
            .collect(),
        _ => Vec::new(),
    };

    let is_score = |e: &&TimelineEvent| spec.score_actions.contains(&e.action_type);
    let is_ferry = |e: &&TimelineEvent| spec.ferry_actions.contains(&e.action_type);

    let mut cycles = 0.0;
    for (i, event) in teleop.iter().enumerate() {
        let Some(weight) = spec.intake_weights.get(&event.action_type) else {
            continue;
        };
        let mut next = teleop.get(i + 1);
        if next.is_some_and(|e| e.action_type == ActionType::Fail) {
            next = teleop.get(i + 2);
        }
        match next {
            Some(e) if is_score(e) => cycles += weight.normal,
            Some(e) if is_ferry(e) => cycles += weight.ferry,
            _ => {}
        }
    }
    if spec.count_first_score && teleop.first().is_some_and(is_score) {
        cycles += 1.0;
    }

    match spec.measure {
        ExpectedMeasure::Cycles => cycles,
        ExpectedMeasure::CycleTime => {
            if cycles == 0.0 {
                return NO_CYCLE_TIME;
            }
            let duration = match (teleop.first(), teleop.last()) {
                (Some(first), Some(last)) => (first.time - last.time) as f64,
                _ => 0.0,
            };
            duration / cycles
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::totals::IntakeWeight;
    use ActionType::*;

    #[test]
    fn test_annotate_fails_rewrites_next_event() {
        let mut timeline = events(&[(140, Fail, false), (138, ScoreSpeaker, false), (130, ScoreSpeaker, false)]);
        let mapping = BTreeMap::from([(ScoreSpeaker, ScoreFailSpeaker)]);
        annotate_fails(&mut timeline, &mapping);
        assert_eq!(timeline[1].action_type, ScoreFailSpeaker);
        assert_eq!(timeline[2].action_type, ScoreSpeaker);
    }

    #[test]
    fn test_annotate_fails_leaves_unmapped_kinds() {
        let mut timeline = events(&[(140, Fail, false), (138, Ferry, false)]);
        let mapping = BTreeMap::from([(ScoreSpeaker, ScoreFailSpeaker)]);
        annotate_fails(&mut timeline, &mapping);
        assert_eq!(timeline[1].action_type, Ferry);
    }

    #[test]
    fn test_count_with_filter() {
        let timeline = events(&[(140, ScoreSpeaker, false), (100, ScoreSpeaker, true), (90, ScoreAmp, true)]);
        let teleop_speaker = EventFilter {
            action_type: Some(OneOrMany::One(ScoreSpeaker)),
            in_teleop: Some(true),
            time: None,
        };
        assert_eq!(count(&timeline, &teleop_speaker), 1);
        assert_eq!(count(&timeline, &EventFilter::default()), 3);
    }

    #[test]
    fn test_incap_cycle_time() {
        let timeline = events(&[
            (100, StartIncap, true),
            (90, EndIncap, true),
            (60, StartIncap, true),
            (58, EndIncap, true),
            (20, StartIncap, true),
        ]);
        let end = OneOrMany::One(EndIncap);
        assert_eq!(cycle_time(&timeline, StartIncap, &end, 0, false), 12);
        assert_eq!(cycle_time(&timeline, StartIncap, &end, 5, false), 10);
        assert_eq!(cycle_time(&timeline, StartIncap, &end, 5, true), 30);
    }

    #[test]
    fn test_cycle_time_with_several_end_kinds() {
        let timeline = events(&[
            (120, IntakeCenter, true),
            (112, ScoreAmp, true),
            (100, IntakeCenter, true),
            (95, Ferry, true),
            (90, ScoreSpeaker, true),
            (80, IntakeCenter, true),
            (79, ScoreTrap, true),
            (70, ScoreAmp, true),
        ]);
        let end = OneOrMany::Many(vec![ScoreSpeaker, ScoreAmp]);
        // 8 + 10 + 10; ferry and trap never close a cycle
        assert_eq!(cycle_time(&timeline, IntakeCenter, &end, 0, false), 28);
        assert_eq!(cycle_time(&timeline, IntakeCenter, &end, 9, false), 20);
    }

    #[test]
    fn test_median_cycle() {
        let filter = EventFilter {
            action_type: Some(OneOrMany::Many(vec![ScoreSpeaker, ScoreAmp])),
            ..EventFilter::default()
        };
        let timeline = events(&[(120, ScoreSpeaker, true), (100, ScoreAmp, true), (70, ScoreSpeaker, true)]);
        // gaps 20 and 30
        assert_eq!(median_cycle(&timeline, &filter), 25);
        assert_eq!(median_cycle(&timeline[..1], &filter), 0);
    }

    #[test]
    fn test_expected_cycles_and_time() {
        let timeline = events(&[
            (145, ScoreSpeaker, false),
            (135, ToTeleop, true),
            (130, ScoreSpeaker, true),
            (120, IntakeCenter, true),
            (110, ScoreSpeaker, true),
            (100, IntakeFar, true),
            (95, Fail, true),
            (90, ScoreAmp, true),
            (80, IntakeFar, true),
            (70, Ferry, true),
        ]);
        let mut spec = spec(ExpectedMeasure::Cycles);
        // center→score 1.0, far→fail→score 1.0, far→ferry 0.5, opening score 1.0
        assert_eq!(expected(&timeline, &spec), 3.5);

        spec.measure = ExpectedMeasure::CycleTime;
        // teleop spans 130 → 70
        assert_eq!(expected(&timeline, &spec), 60.0 / 3.5);
    }

    #[test]
    fn test_expected_no_cycles() {
        let timeline = events(&[(135, ToTeleop, true), (120, IntakeCenter, true)]);
        assert_eq!(expected(&timeline, &spec(ExpectedMeasure::CycleTime)), NO_CYCLE_TIME);
        assert_eq!(expected(&[], &spec(ExpectedMeasure::Cycles)), 0.0);
    }

    fn events(spec: &[(i64, ActionType, bool)]) -> Vec<TimelineEvent> {
        spec.iter()
            .map(|(time, action_type, in_teleop)| TimelineEvent {
                time: *time,
                action_type: *action_type,
                in_teleop: *in_teleop,
            })
            .collect()
    }

    fn spec(measure: ExpectedMeasure) -> ExpectedSpec {
        let weight = |normal, ferry| IntakeWeight { normal, ferry };
        ExpectedSpec {
            measure,
            score_actions: vec![ScoreSpeaker, ScoreAmp],
            ferry_actions: vec![Ferry, Drop],
            intake_weights: BTreeMap::from([
                (IntakeCenter, weight(1.0, 0.5)),
                (IntakeFar, weight(1.0, 0.5)),
            ]),
            count_first_score: true,
        }
    }
}
