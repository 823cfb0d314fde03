//! Reverse status mapping (tracker status name → Ralph [`TaskStatus`]),
//! spec §4.H: explicit `reverseStatusMap`, else inverted `statusMap`
//! (case-insensitive), else a keyword heuristic, else `pending`.

use std::collections::HashMap;

use oplog::TaskStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReverseMapSource {
    Explicit,
    InvertedStatusMap,
    Heuristic,
    Default,
}

pub fn reverse_map_status(
    remote_status: &str,
    reverse_status_map: Option<&HashMap<String, String>>,
    status_map: &HashMap<String, String>,
) -> (TaskStatus, ReverseMapSource) {
    let needle = remote_status.to_lowercase();

    if let Some(map) = reverse_status_map {
        if let Some(hit) = map.get(remote_status).or_else(|| find_case_insensitive(map, &needle)) {
            if let Some(status) = parse_status(hit) {
                return (status, ReverseMapSource::Explicit);
            }
        }
    }

    for (ralph_status, tracker_status) in status_map {
        if tracker_status.to_lowercase() == needle {
            if let Some(status) = parse_status(ralph_status) {
                return (status, ReverseMapSource::InvertedStatusMap);
            }
        }
    }

    if let Some(status) = heuristic_match(&needle) {
        return (status, ReverseMapSource::Heuristic);
    }

    (TaskStatus::Pending, ReverseMapSource::Default)
}

fn find_case_insensitive<'a>(map: &'a HashMap<String, String>, needle: &str) -> Option<&'a String> {
    map.iter().find(|(k, _)| k.to_lowercase() == needle).map(|(_, v)| v)
}

fn heuristic_match(needle: &str) -> Option<TaskStatus> {
    if ["done", "closed", "resolved"].iter().any(|kw| needle.contains(kw)) {
        Some(TaskStatus::Done)
    } else if ["progress", "active"].iter().any(|kw| needle.contains(kw)) {
        Some(TaskStatus::InProgress)
    } else if needle.contains("review") {
        Some(TaskStatus::Review)
    } else if needle.contains("blocked") {
        Some(TaskStatus::Blocked)
    } else {
        None
    }
}

fn parse_status(raw: &str) -> Option<TaskStatus> {
    match raw.to_lowercase().as_str() {
        "discovered" => Some(TaskStatus::Discovered),
        "pending" => Some(TaskStatus::Pending),
        "in_progress" | "in-progress" => Some(TaskStatus::InProgress),
        "blocked" => Some(TaskStatus::Blocked),
        "review" => Some(TaskStatus::Review),
        "done" => Some(TaskStatus::Done),
        "cancelled" | "canceled" => Some(TaskStatus::Cancelled),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_reverse_map_wins() {
        let mut reverse = HashMap::new();
        reverse.insert("In Review".to_string(), "review".to_string());
        let (status, source) = reverse_map_status("In Review", Some(&reverse), &HashMap::new());
        assert_eq!(status, TaskStatus::Review);
        assert_eq!(source, ReverseMapSource::Explicit);
    }

    #[test]
    fn inverted_status_map_is_case_insensitive() {
        let mut status_map = HashMap::new();
        status_map.insert("done".to_string(), "Closed".to_string());
        let (status, source) = reverse_map_status("closed", None, &status_map);
        assert_eq!(status, TaskStatus::Done);
        assert_eq!(source, ReverseMapSource::InvertedStatusMap);
    }

    #[test]
    fn heuristic_keyword_match() {
        let (status, source) = reverse_map_status("In Progress", None, &HashMap::new());
        assert_eq!(status, TaskStatus::InProgress);
        assert_eq!(source, ReverseMapSource::Heuristic);
    }

    #[test]
    fn unrecognized_status_defaults_to_pending() {
        let (status, source) = reverse_map_status("triage", None, &HashMap::new());
        assert_eq!(status, TaskStatus::Pending);
        assert_eq!(source, ReverseMapSource::Default);
    }
}
