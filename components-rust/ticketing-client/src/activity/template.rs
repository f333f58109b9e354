//! Activity feed text rendering.
//!
//! Feed entries arrive with a server-written `template_text` such as
//! `"{user_name} bought {ticket_quantity} ticket{ticket_quantity|plural:s}"`.
//! [`render`] turns it into ordered [`Segment`]s without touching the
//! network; [`resolve`] then attaches display names and link labels.

use crate::model::{ActivityItem, EventId, UserId};
use crate::user::DisplayNames;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::sync::OnceLock;
use thiserror::Error;

const EVENT_DATE_FORMAT: &str = "%b %-d, %Y";

/// What to do with a known token whose data field is missing.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PlaceholderPolicy {
    /// Keep the `{token}` text as it appears in the template.
    #[default]
    LeaveLiteral,
    /// Fail with [`TemplateError::MissingField`].
    Strict,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("no data for placeholder {token}")]
    MissingField { token: String },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Segment {
    Text(String),
    User(UserId),
    FollowedUser(UserId),
    Event { event_id: EventId, title: String },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Inline {
    Text(String),
    UserLink { user_id: UserId, label: String },
    EventLink { event_id: EventId, label: String },
}

impl Display for Inline {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Inline::Text(text) => write!(f, "{text}"),
            Inline::UserLink { label, .. } | Inline::EventLink { label, .. } => {
                write!(f, "{label}")
            }
        }
    }
}

enum Expansion {
    Segment(Segment),
    Missing,
    Unknown,
}

fn token_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\{([a-z_]+)(?:\|plural:([^{}]*))?\}").expect("token pattern compiles")
    })
}

fn text(value: impl ToString) -> Expansion {
    Expansion::Segment(Segment::Text(value.to_string()))
}

fn expand(name: &str, plural_suffix: Option<&str>, item: &ActivityItem) -> Expansion {
    if let Some(suffix) = plural_suffix {
        return match (name, item.ticket_quantity) {
            ("ticket_quantity", Some(quantity)) if quantity > 1 => text(suffix),
            ("ticket_quantity", Some(_)) => text(""),
            ("ticket_quantity", None) => Expansion::Missing,
            _ => Expansion::Unknown,
        };
    }

    let segment = match name {
        "user_name" => item.user_id.map(Segment::User),
        "followed_user_name" => item.reference_id_1.map(Segment::FollowedUser),
        "event_name" => match (&item.event_title, item.reference_id_1) {
            (Some(title), Some(event_id)) => Some(Segment::Event {
                event_id,
                title: title.clone(),
            }),
            _ => None,
        },
        "event_date" => item
            .event_date
            .map(|date| Segment::Text(date.format(EVENT_DATE_FORMAT).to_string())),
        "ticket_quantity" => item.ticket_quantity.map(|q| Segment::Text(q.to_string())),
        "review_rating" => item.review_rating.map(|r| Segment::Text(r.to_string())),
        "achievement_name" => item.achievement_name.clone().map(Segment::Text),
        _ => return Expansion::Unknown,
    };

    segment.map(Expansion::Segment).unwrap_or(Expansion::Missing)
}

fn push_text(segments: &mut Vec<Segment>, value: &str) {
    if value.is_empty() {
        return;
    }
    match segments.last_mut() {
        Some(Segment::Text(previous)) => previous.push_str(value),
        _ => segments.push(Segment::Text(value.to_string())),
    }
}

fn push_segment(segments: &mut Vec<Segment>, segment: Segment) {
    match segment {
        Segment::Text(value) => push_text(segments, &value),
        other => segments.push(other),
    }
}

/// Splits `template` into segments in order of appearance. Adjacent text is
/// merged. Unknown token names are always kept literally.
pub fn render(
    template: &str,
    item: &ActivityItem,
    policy: PlaceholderPolicy,
) -> Result<Vec<Segment>, TemplateError> {
    let mut segments = Vec::new();
    let mut last = 0;

    for captures in token_pattern().captures_iter(template) {
        let (Some(whole), Some(name)) = (captures.get(0), captures.get(1)) else {
            continue;
        };
        push_text(&mut segments, &template[last..whole.start()]);

        let plural_suffix = captures.get(2).map(|m| m.as_str());
        match expand(name.as_str(), plural_suffix, item) {
            Expansion::Segment(segment) => push_segment(&mut segments, segment),
            Expansion::Unknown => push_text(&mut segments, whole.as_str()),
            Expansion::Missing => match policy {
                PlaceholderPolicy::LeaveLiteral => push_text(&mut segments, whole.as_str()),
                PlaceholderPolicy::Strict => {
                    return Err(TemplateError::MissingField {
                        token: whole.as_str().to_string(),
                    })
                }
            },
        }

        last = whole.end();
    }

    push_text(&mut segments, &template[last..]);
    Ok(segments)
}

/// Users the segments refer to, first appearance order, without duplicates.
/// Handy for a bulk fetch before resolving a whole feed.
pub fn referenced_users(segments: &[Segment]) -> Vec<UserId> {
    let mut user_ids = Vec::new();
    for segment in segments {
        if let Segment::User(user_id) | Segment::FollowedUser(user_id) = segment {
            if !user_ids.contains(user_id) {
                user_ids.push(*user_id);
            }
        }
    }
    user_ids
}

pub fn resolve(
    segments: &[Segment],
    names: &impl DisplayNames,
    viewer_id: Option<UserId>,
) -> Vec<Inline> {
    segments
        .iter()
        .map(|segment| match segment {
            Segment::Text(value) => Inline::Text(value.clone()),
            Segment::FollowedUser(user_id) if Some(*user_id) == viewer_id => {
                Inline::Text("you".to_string())
            }
            Segment::User(user_id) | Segment::FollowedUser(user_id) => Inline::UserLink {
                user_id: *user_id,
                label: names.display_name(*user_id),
            },
            Segment::Event { event_id, title } => Inline::EventLink {
                event_id: *event_id,
                label: title.clone(),
            },
        })
        .collect()
}

/// Renders the item's own template and resolves it in one go.
pub fn render_activity(
    item: &ActivityItem,
    names: &impl DisplayNames,
    viewer_id: Option<UserId>,
    policy: PlaceholderPolicy,
) -> Result<Vec<Inline>, TemplateError> {
    let segments = render(&item.template_text, item, policy)?;
    Ok(resolve(&segments, names, viewer_id))
}

pub fn to_plain_text(inlines: &[Inline]) -> String {
    inlines.iter().map(|inline| inline.to_string()).collect()
}
