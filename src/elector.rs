//! Per-host alarm election (§4.1): pick the one trace-id among candidate
//! groups that is worth investigating.

use std::collections::BTreeMap;

use crate::model::{RawAlarm, ThreatSeverity};

#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord)]
struct GroupScore {
    unique_alarm_names: usize,
    high_count: usize,
    med_count: usize,
    low_count: usize,
}

fn score_group(alarms: &[RawAlarm]) -> GroupScore {
    let mut names = std::collections::HashSet::new();
    let mut high = 0;
    let mut med = 0;
    let mut low = 0;
    for alarm in alarms {
        let trimmed = alarm.alarm_name.trim();
        if !trimmed.is_empty() {
            names.insert(trimmed.to_string());
        }
        match alarm.threat_severity {
            ThreatSeverity::High => high += 1,
            ThreatSeverity::Medium => med += 1,
            ThreatSeverity::Low => low += 1,
            ThreatSeverity::Unknown => {}
        }
    }
    GroupScore {
        unique_alarm_names: names.len(),
        high_count: high,
        med_count: med,
        low_count: low,
    }
}

/// Elects the winning trace-id for one host, applying the four ordered
/// rules from §4.1. `BTreeMap` keeps iteration sorted by trace-id so the
/// final tiebreak ("arbitrary but deterministic") is reproducible.
pub fn elect(candidates: &BTreeMap<String, Vec<RawAlarm>>) -> Option<String> {
    let non_empty: BTreeMap<&String, &Vec<RawAlarm>> = candidates
        .iter()
        .filter(|(_, alarms)| !alarms.is_empty())
        .collect();

    if non_empty.is_empty() {
        return None;
    }
    if non_empty.len() == 1 {
        return non_empty.keys().next().map(|s| s.to_string());
    }

    let scored: BTreeMap<&String, GroupScore> = non_empty
        .iter()
        .map(|(trace_id, alarms)| (*trace_id, score_group(alarms)))
        .collect();

    let max_unique = scored
        .values()
        .map(|s| s.unique_alarm_names)
        .max()
        .unwrap_or(0);

    let mut tied: Vec<&String> = scored
        .iter()
        .filter(|(_, s)| s.unique_alarm_names == max_unique)
        .map(|(trace_id, _)| *trace_id)
        .collect();
    tied.sort();

    if tied.len() == 1 {
        return Some(tied[0].clone());
    }

    tied.sort_by(|a, b| {
        let sa = &scored[a];
        let sb = &scored[b];
        sb.high_count
            .cmp(&sa.high_count)
            .then(sb.med_count.cmp(&sa.med_count))
            .then(sb.low_count.cmp(&sa.low_count))
            .then(a.cmp(b))
    });

    tied.first().map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alarm(trace: &str, name: &str, sev: &str) -> RawAlarm {
        RawAlarm {
            trace_id: trace.to_string(),
            alarm_name: name.to_string(),
            threat_severity: ThreatSeverity::parse(sev),
            ..Default::default()
        }
    }

    #[test]
    fn empty_groups_are_dropped() {
        let mut candidates = BTreeMap::new();
        candidates.insert("T1".to_string(), vec![]);
        candidates.insert("T2".to_string(), vec![alarm("T2", "mal", "HIGH")]);
        assert_eq!(elect(&candidates), Some("T2".to_string()));
    }

    #[test]
    fn single_remaining_group_wins_without_scoring() {
        let mut candidates = BTreeMap::new();
        candidates.insert("T1".to_string(), vec![alarm("T1", "x", "LOW")]);
        assert_eq!(elect(&candidates), Some("T1".to_string()));
    }

    // S4 — tie on unique-name-count broken by severity counts.
    #[test]
    fn tie_broken_by_severity_high_then_medium_then_low() {
        let mut candidates = BTreeMap::new();
        candidates.insert(
            "A".to_string(),
            vec![
                alarm("A", "n1", "HIGH"),
                alarm("A", "n2", "HIGH"),
            ],
        );
        candidates.insert(
            "B".to_string(),
            vec![
                alarm("B", "n1", "HIGH"),
                alarm("B", "n2", "MEDIUM"),
                alarm("B", "n2", "MEDIUM"),
                alarm("B", "n2", "MEDIUM"),
            ],
        );
        assert_eq!(elect(&candidates), Some("A".to_string()));
    }

    #[test]
    fn final_tiebreak_is_deterministic_lexicographic() {
        let mut candidates = BTreeMap::new();
        candidates.insert("Z".to_string(), vec![alarm("Z", "n1", "HIGH")]);
        candidates.insert("A".to_string(), vec![alarm("A", "n1", "HIGH")]);
        assert_eq!(elect(&candidates), Some("A".to_string()));
    }

    #[test]
    fn no_candidates_returns_none() {
        let candidates: BTreeMap<String, Vec<RawAlarm>> = BTreeMap::new();
        assert_eq!(elect(&candidates), None);
    }
}
