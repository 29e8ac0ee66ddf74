// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Topic and filter tokenizers.
//!
//! Topics are split on `/`. Empty segments are legal, so `a//b`, `/a` and
//! `a/` all tokenize. Wildcards are only meaningful in subscription filters;
//! a published topic must not contain them at all.

use crate::error::{Error, ErrorKind};

/// One level of a subscription filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterToken {
    /// Literal segment, possibly empty.
    Segment(String),

    /// `+`, matches exactly one segment.
    SingleWildcard,

    /// `#`, matches zero or more trailing segments. Only valid as the last
    /// segment of a filter.
    MultiWildcard,
}

/// Split a published topic into its segments.
///
/// Rules are defined in `MQTT chapter-4.7 Topic Names and Topic Filters`.
///
/// # Errors
///
/// Returns an `InvalidInput` error if the topic is empty or contains a
/// wildcard character.
///
/// ```
/// use luoshen::topic::tokenize_topic;
/// assert!(tokenize_topic("sensors/temp").is_ok());
/// assert!(tokenize_topic("sensors/+/temp").is_err());
/// assert!(tokenize_topic("").is_err());
/// ```
pub fn tokenize_topic(topic: &str) -> Result<Vec<String>, Error> {
    if topic.is_empty() {
        return Err(Error::new(ErrorKind::InvalidInput, "Topic is empty"));
    }
    if topic.contains(|c| c == '+' || c == '#') {
        return Err(Error::from_string(
            ErrorKind::InvalidInput,
            format!("Topic contains wildcard characters: {topic:?}"),
        ));
    }
    Ok(topic.split('/').map(ToString::to_string).collect())
}

/// Split a subscription filter into tokens, validating wildcard placement.
///
/// # Errors
///
/// Returns an `InvalidInput` error if the filter is empty, if `#` is used
/// anywhere but as the whole last segment, or if `+` is only part of a
/// segment.
///
/// ```
/// use luoshen::topic::tokenize_filter;
/// assert!(tokenize_filter("sport/tennis/player/#").is_ok());
/// assert!(tokenize_filter("sport/tennis/player#").is_err());
/// assert!(tokenize_filter("#").is_ok());
/// assert!(tokenize_filter("sport/#/player").is_err());
/// assert!(tokenize_filter("+").is_ok());
/// assert!(tokenize_filter("sport+").is_err());
/// ```
pub fn tokenize_filter(filter: &str) -> Result<Vec<FilterToken>, Error> {
    if filter.is_empty() {
        return Err(Error::new(ErrorKind::InvalidInput, "Filter is empty"));
    }
    let segments: Vec<&str> = filter.split('/').collect();
    let last = segments.len() - 1;
    let mut tokens = Vec::with_capacity(segments.len());
    for (index, segment) in segments.into_iter().enumerate() {
        let token = match segment {
            "+" => FilterToken::SingleWildcard,
            "#" => {
                if index != last {
                    return Err(Error::from_string(
                        ErrorKind::InvalidInput,
                        format!("'#' must be the last segment in filter: {filter:?}"),
                    ));
                }
                FilterToken::MultiWildcard
            }
            _ => {
                if segment.contains(|c| c == '+' || c == '#') {
                    return Err(Error::from_string(
                        ErrorKind::InvalidInput,
                        format!("Wildcard inside segment in filter: {filter:?}"),
                    ));
                }
                FilterToken::Segment(segment.to_string())
            }
        };
        tokens.push(token);
    }
    Ok(tokens)
}

/// Check whether `topic` matches `filter` under MQTT wildcard semantics.
///
/// A filter starting with a wildcard never matches a topic starting with
/// `$`, so `#` does not expose the `$SYS` tree.
///
/// ```
/// use luoshen::topic::filter_matches;
/// assert!(filter_matches("a/#", "a"));
/// assert!(filter_matches("a/+/c", "a//c"));
/// assert!(!filter_matches("a/+/c", "a/c"));
/// assert!(!filter_matches("#", "$SYS/uptime"));
/// ```
#[must_use]
pub fn filter_matches(filter: &str, topic: &str) -> bool {
    let Ok(tokens) = tokenize_filter(filter) else {
        return false;
    };
    if topic.starts_with('$')
        && matches!(
            tokens.first(),
            Some(FilterToken::SingleWildcard | FilterToken::MultiWildcard)
        )
    {
        return false;
    }
    let segments: Vec<&str> = topic.split('/').collect();
    tokens_match(&tokens, &segments)
}

fn tokens_match(tokens: &[FilterToken], segments: &[&str]) -> bool {
    match tokens.split_first() {
        None => segments.is_empty(),
        Some((FilterToken::MultiWildcard, _)) => true,
        Some((FilterToken::SingleWildcard, rest)) => {
            !segments.is_empty() && tokens_match(rest, &segments[1..])
        }
        Some((FilterToken::Segment(literal), rest)) => segments
            .first()
            .is_some_and(|segment| segment == literal && tokens_match(rest, &segments[1..])),
    }
}
