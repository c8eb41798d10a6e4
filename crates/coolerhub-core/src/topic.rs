//! Topic router.
//!
//! Maps transport topic strings to semantic routes and back. Two dialects are
//! supported and kept isomorphic:
//!
//! ```text
//! slash (MQTT)           water_coolers/{id}/readings/response   wildcards + #
//! dot (topic exchange)   water_coolers.{id}.readings.response   wildcards * #
//! ```
//!
//! Every function here is pure. Topics outside the grammar parse to `None`;
//! callers ignore them without logging an error, since shared transport
//! scopes carry unrelated traffic.

use serde::{Deserialize, Serialize};

use crate::config::topics::{COMMANDS, COOLERS, DATA, LIST, READINGS, RESPONSE, STATUS};

/// Topic naming scheme of a transport binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TopicDialect {
    /// `a/b/c`, wildcards `+` (one level) and `#` (any number of levels).
    Slash,
    /// `a.b.c`, wildcards `*` (one word) and `#` (any number of words).
    Dot,
}

impl TopicDialect {
    pub fn separator(self) -> char {
        match self {
            TopicDialect::Slash => '/',
            TopicDialect::Dot => '.',
        }
    }

    /// Single-level wildcard token.
    pub fn single_wildcard(self) -> &'static str {
        match self {
            TopicDialect::Slash => "+",
            TopicDialect::Dot => "*",
        }
    }

    /// Multi-level wildcard token (the same in both dialects).
    pub fn multi_wildcard(self) -> &'static str {
        "#"
    }
}

/// Top-level topic scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    WaterCoolers,
    Commands,
}

/// Semantic meaning of a topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TopicKind {
    Reading,
    ReadingResponse,
    DataQuery,
    DataResponse,
    ListQuery,
    ListResponse,
    Command,
    StatusQuery,
}

impl TopicKind {
    pub fn scope(self) -> Scope {
        match self {
            TopicKind::Command | TopicKind::StatusQuery => Scope::Commands,
            _ => Scope::WaterCoolers,
        }
    }

    /// Kind of the response answering this request, if it has one.
    pub fn response_kind(self) -> Option<TopicKind> {
        match self {
            TopicKind::Reading => Some(TopicKind::ReadingResponse),
            TopicKind::DataQuery => Some(TopicKind::DataResponse),
            TopicKind::ListQuery => Some(TopicKind::ListResponse),
            _ => None,
        }
    }

    /// Whether topics of this kind embed a device id.
    pub fn has_device_id(self) -> bool {
        !matches!(self, TopicKind::ListQuery | TopicKind::ListResponse)
    }
}

/// A classified topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub scope: Scope,
    pub kind: TopicKind,
    /// Absent for list topics and the broadcast status query.
    pub device_id: Option<String>,
    /// Trailing action segment of command topics (`commands/{id}/power`).
    pub action: Option<String>,
    pub dialect: TopicDialect,
}

impl Route {
    fn new(kind: TopicKind, device_id: Option<&str>, dialect: TopicDialect) -> Self {
        Self {
            scope: kind.scope(),
            kind,
            device_id: device_id.map(str::to_string),
            action: None,
            dialect,
        }
    }

    fn with_action(mut self, action: &str) -> Self {
        self.action = Some(action.to_string());
        self
    }
}

/// Guess the dialect of a concrete topic or pattern.
pub fn detect_dialect(topic: &str) -> TopicDialect {
    if topic.contains('/') {
        TopicDialect::Slash
    } else if topic.contains('.') {
        TopicDialect::Dot
    } else {
        TopicDialect::Slash
    }
}

/// Whether `id` can be embedded in a topic of either dialect.
pub fn is_valid_device_id(id: &str) -> bool {
    !id.is_empty()
        && id != LIST
        && id != STATUS
        && !id.contains(['/', '.', '+', '*', '#'])
}

/// Classify a topic.
///
/// Returns `None` for anything outside the grammar.
pub fn parse_topic(topic: &str) -> Option<Route> {
    let dialect = detect_dialect(topic);
    let segments: Vec<&str> = topic.split(dialect.separator()).collect();
    if segments.iter().any(|s| s.is_empty()) {
        return None;
    }

    let route = match segments.as_slice() {
        [COOLERS, LIST] => Route::new(TopicKind::ListQuery, None, dialect),
        [COOLERS, LIST, RESPONSE] => Route::new(TopicKind::ListResponse, None, dialect),
        [COOLERS, id, READINGS] => Route::new(TopicKind::Reading, Some(id), dialect),
        [COOLERS, id, READINGS, RESPONSE] => {
            Route::new(TopicKind::ReadingResponse, Some(id), dialect)
        }
        [COOLERS, id, DATA] => Route::new(TopicKind::DataQuery, Some(id), dialect),
        [COOLERS, id, DATA, RESPONSE] => Route::new(TopicKind::DataResponse, Some(id), dialect),
        // Status reports go out on the response topic; nothing inbound lives there.
        [COMMANDS, .., RESPONSE] => return None,
        [COMMANDS, STATUS] => Route::new(TopicKind::StatusQuery, None, dialect),
        [COMMANDS, id, STATUS] => Route::new(TopicKind::StatusQuery, Some(id), dialect),
        [COMMANDS, id] => Route::new(TopicKind::Command, Some(id), dialect),
        [COMMANDS, id, action] => Route::new(TopicKind::Command, Some(id), dialect).with_action(action),
        _ => return None,
    };

    match route.device_id.as_deref() {
        Some(id) if !is_valid_device_id(id) => None,
        _ => Some(route),
    }
}

/// Build the topic of `kind` for `device_id` in `dialect`.
///
/// `device_id` is ignored for list topics. An empty id on a status query
/// yields the broadcast status topic.
pub fn kind_to_topic(kind: TopicKind, device_id: &str, dialect: TopicDialect) -> String {
    let segments: Vec<&str> = match kind {
        TopicKind::Reading => vec![COOLERS, device_id, READINGS],
        TopicKind::ReadingResponse => vec![COOLERS, device_id, READINGS, RESPONSE],
        TopicKind::DataQuery => vec![COOLERS, device_id, DATA],
        TopicKind::DataResponse => vec![COOLERS, device_id, DATA, RESPONSE],
        TopicKind::ListQuery => vec![COOLERS, LIST],
        TopicKind::ListResponse => vec![COOLERS, LIST, RESPONSE],
        TopicKind::Command => vec![COMMANDS, device_id],
        TopicKind::StatusQuery if device_id.is_empty() => vec![COMMANDS, STATUS],
        TopicKind::StatusQuery => vec![COMMANDS, device_id, STATUS],
    };
    join(&segments, dialect)
}

/// Command topic carrying the action segment, e.g. `commands/c1/power`.
pub fn command_topic(device_id: &str, action: &str, dialect: TopicDialect) -> String {
    join(&[COMMANDS, device_id, action], dialect)
}

fn join(segments: &[&str], dialect: TopicDialect) -> String {
    let mut sep = [0u8; 4];
    segments.join(dialect.separator().encode_utf8(&mut sep))
}

/// Rewrite a topic or pattern into `target` dialect.
///
/// Wildcards are translated token for token (`+` ↔ `*`, `#` ↔ `#`), so the
/// translation is lossless in both directions.
pub fn to_dialect(topic: &str, target: TopicDialect) -> String {
    let source = detect_dialect(topic);
    if source == target {
        return topic.to_string();
    }
    let segments: Vec<&str> = topic
        .split(source.separator())
        .map(|segment| {
            if segment == source.single_wildcard() {
                target.single_wildcard()
            } else if segment == source.multi_wildcard() {
                target.multi_wildcard()
            } else {
                segment
            }
        })
        .collect();
    join(&segments, target)
}

/// Whether a concrete topic matches a subscription pattern.
///
/// The pattern is first rewritten into the topic's dialect. `#` matches zero
/// or more levels wherever it appears, which covers the trailing-only MQTT
/// form and the anywhere form of topic exchanges.
pub fn topic_matches(pattern: &str, topic: &str) -> bool {
    let dialect = detect_dialect(topic);
    let pattern = to_dialect(pattern, dialect);
    let pattern: Vec<&str> = pattern.split(dialect.separator()).collect();
    let topic: Vec<&str> = topic.split(dialect.separator()).collect();
    segments_match(&pattern, &topic, dialect)
}

fn segments_match(pattern: &[&str], topic: &[&str], dialect: TopicDialect) -> bool {
    match pattern.split_first() {
        None => topic.is_empty(),
        Some((head, rest)) if *head == dialect.multi_wildcard() => {
            (0..=topic.len()).any(|skip| segments_match(rest, &topic[skip..], dialect))
        }
        Some((head, rest)) => match topic.split_first() {
            Some((first, remaining)) => {
                (*head == dialect.single_wildcard() || head == first)
                    && segments_match(rest, remaining, dialect)
            }
            None => false,
        },
    }
}

/// Response topic for a request topic: `X` → `X/response` or `X.response`.
pub fn response_topic(request_topic: &str) -> String {
    let dialect = detect_dialect(request_topic);
    format!("{}{}{}", request_topic, dialect.separator(), RESPONSE)
}

/// Request topic a response topic answers, if it is one.
pub fn request_topic(response_topic: &str) -> Option<String> {
    let dialect = detect_dialect(response_topic);
    let suffix = format!("{}{}", dialect.separator(), RESPONSE);
    response_topic
        .strip_suffix(suffix.as_str())
        .filter(|request| !request.is_empty())
        .map(str::to_string)
}

/// Patterns a hub subscribes to in order to see every protocol topic.
pub fn hub_patterns(dialect: TopicDialect) -> Vec<String> {
    let multi = dialect.multi_wildcard();
    vec![
        join(&[COOLERS, multi], dialect),
        join(&[COMMANDS, multi], dialect),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_KINDS: [TopicKind; 8] = [
        TopicKind::Reading,
        TopicKind::ReadingResponse,
        TopicKind::DataQuery,
        TopicKind::DataResponse,
        TopicKind::ListQuery,
        TopicKind::ListResponse,
        TopicKind::Command,
        TopicKind::StatusQuery,
    ];

    #[test]
    fn test_parse_slash_topics() {
        let route = parse_topic("water_coolers/cooler_001/readings").unwrap();
        assert_eq!(route.kind, TopicKind::Reading);
        assert_eq!(route.device_id.as_deref(), Some("cooler_001"));
        assert_eq!(route.scope, Scope::WaterCoolers);
        assert_eq!(route.dialect, TopicDialect::Slash);

        let route = parse_topic("commands/cooler_001/power").unwrap();
        assert_eq!(route.kind, TopicKind::Command);
        assert_eq!(route.action.as_deref(), Some("power"));
        assert_eq!(route.scope, Scope::Commands);
    }

    #[test]
    fn test_parse_dot_topics() {
        let route = parse_topic("water_coolers.c1.readings.response").unwrap();
        assert_eq!(route.kind, TopicKind::ReadingResponse);
        assert_eq!(route.device_id.as_deref(), Some("c1"));
        assert_eq!(route.dialect, TopicDialect::Dot);

        let route = parse_topic("water_coolers.list.response").unwrap();
        assert_eq!(route.kind, TopicKind::ListResponse);
        assert!(route.device_id.is_none());
    }

    #[test]
    fn test_status_queries() {
        let route = parse_topic("commands/status").unwrap();
        assert_eq!(route.kind, TopicKind::StatusQuery);
        assert!(route.device_id.is_none());

        let route = parse_topic("commands/c1/status").unwrap();
        assert_eq!(route.kind, TopicKind::StatusQuery);
        assert_eq!(route.device_id.as_deref(), Some("c1"));

        assert!(parse_topic("commands/status/response").is_none());
    }

    #[test]
    fn test_unrecognized_topics() {
        for topic in [
            "",
            "water_coolers",
            "water_coolers/c1",
            "water_coolers/c1/unknown",
            "water_coolers//readings",
            "sensors/c1/readings",
            "commands",
            "commands/c1/power/extra/deep",
            "water_coolers/list/readings",
        ] {
            assert!(parse_topic(topic).is_none(), "{} should be unrecognized", topic);
        }
    }

    #[test]
    fn test_kind_to_topic_round_trips_in_both_dialects() {
        for dialect in [TopicDialect::Slash, TopicDialect::Dot] {
            for kind in ALL_KINDS {
                let topic = kind_to_topic(kind, "c1", dialect);
                let route = parse_topic(&topic).unwrap();
                assert_eq!(route.kind, kind, "{}", topic);
                assert_eq!(route.dialect, dialect);
                if kind.has_device_id() {
                    assert_eq!(route.device_id.as_deref(), Some("c1"));
                }
            }
        }
    }

    #[test]
    fn test_dialect_translation_is_lossless() {
        let dot = to_dialect("water_coolers/+/readings/#", TopicDialect::Dot);
        assert_eq!(dot, "water_coolers.*.readings.#");
        assert_eq!(to_dialect(&dot, TopicDialect::Slash), "water_coolers/+/readings/#");
        assert_eq!(
            to_dialect("commands/c1/power", TopicDialect::Slash),
            "commands/c1/power"
        );
    }

    #[test]
    fn test_wildcard_matching() {
        assert!(topic_matches("water_coolers/+/readings", "water_coolers/c1/readings"));
        assert!(!topic_matches("water_coolers/+/readings", "water_coolers/c1/readings/response"));
        assert!(topic_matches("water_coolers/#", "water_coolers/c1/readings/response"));
        assert!(topic_matches("water_coolers/#", "water_coolers"));
        assert!(topic_matches("commands/#", "commands.c1.power"));
        assert!(topic_matches("water_coolers.*.data.response", "water_coolers.c1.data.response"));
        assert!(topic_matches("#.response", "water_coolers.c1.data.response"));
        assert!(!topic_matches("commands/+", "commands/c1/power"));
    }

    #[test]
    fn test_response_correlation() {
        assert_eq!(response_topic("water_coolers/c1/data"), "water_coolers/c1/data/response");
        assert_eq!(response_topic("water_coolers.c1.data"), "water_coolers.c1.data.response");
        assert_eq!(
            request_topic("water_coolers.c1.data.response").as_deref(),
            Some("water_coolers.c1.data")
        );
        assert!(request_topic("water_coolers/c1/data").is_none());

        for dialect in [TopicDialect::Slash, TopicDialect::Dot] {
            for kind in ALL_KINDS {
                if let Some(response_kind) = kind.response_kind() {
                    assert_eq!(
                        response_topic(&kind_to_topic(kind, "c1", dialect)),
                        kind_to_topic(response_kind, "c1", dialect)
                    );
                }
            }
        }
    }

    #[test]
    fn test_device_id_validation() {
        assert!(is_valid_device_id("cooler_001"));
        assert!(!is_valid_device_id(""));
        assert!(!is_valid_device_id("a.b"));
        assert!(!is_valid_device_id("a/b"));
        assert!(!is_valid_device_id("+"));
        assert!(!is_valid_device_id("list"));
    }

    #[test]
    fn test_hub_patterns() {
        assert_eq!(
            hub_patterns(TopicDialect::Dot),
            vec!["water_coolers.#".to_string(), "commands.#".to_string()]
        );
    }
}
