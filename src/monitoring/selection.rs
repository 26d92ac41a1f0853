// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Season/episode selection input and its validation.
//!
//! A selection is user input: `[{season: 1}, {season: 2, episodes: [1, 3]}]`.
//! Missing `episodes` means the entire season. Validation reports every
//! problem found, not just the first.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::str::FromStr;
use thiserror::Error;

/// One entry of a user's selection, as received.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpisodeSelection {
    pub season: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub episodes: Option<Vec<i64>>,
}

impl EpisodeSelection {
    pub fn season(season: i64) -> Self {
        Self {
            season,
            episodes: None,
        }
    }

    pub fn episodes(season: i64, episodes: Vec<i64>) -> Self {
        Self {
            season,
            episodes: Some(episodes),
        }
    }
}

/// Parses `N` or `N:e,e,...` (e.g. `2:1,3,5`).
impl FromStr for EpisodeSelection {
    type Err = SelectionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let unparseable = || SelectionError::Unparseable(s.to_string());
        let (season, episodes) = match s.split_once(':') {
            Some((season, episodes)) => (season, Some(episodes)),
            None => (s, None),
        };

        let season = season.trim().parse::<i64>().map_err(|_| unparseable())?;
        let episodes = match episodes {
            None => None,
            Some(list) if list.trim().is_empty() => Some(Vec::new()),
            Some(list) => Some(
                list.split(',')
                    .map(|e| e.trim().parse::<i64>().map_err(|_| unparseable()))
                    .collect::<Result<Vec<_>, _>>()?,
            ),
        };

        Ok(Self { season, episodes })
    }
}

/// A validated selection entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeasonSelection {
    pub season: u32,
    /// `None` means the whole season.
    pub episodes: Option<Vec<u32>>,
}

impl SeasonSelection {
    pub fn is_whole_season(&self) -> bool {
        self.episodes.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectionError {
    #[error("season {0} is selected more than once")]
    DuplicateSeason(i64),

    #[error("season number {0} is negative")]
    NegativeSeason(i64),

    #[error("season {season}: episode number {episode} must be positive")]
    NonPositiveEpisode { season: i64, episode: i64 },

    #[error("season {season}: episode {episode} is listed more than once")]
    DuplicateEpisode { season: i64, episode: i64 },

    #[error("season {0}: episode list is empty")]
    EmptyEpisodeList(i64),

    #[error("cannot parse selection '{0}' (expected N or N:e,e,...)")]
    Unparseable(String),
}

/// Every problem found in one selection batch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid selection: {}", .0.iter().map(|e| e.to_string()).collect::<Vec<_>>().join("; "))]
pub struct SelectionErrors(pub Vec<SelectionError>);

/// Validate a selection batch, returning typed entries or every error found.
pub fn validate_selection(selection: &[EpisodeSelection]) -> Result<Vec<SeasonSelection>, SelectionErrors> {
    let mut errors = Vec::new();
    let mut seen_seasons = HashSet::new();
    let mut validated = Vec::with_capacity(selection.len());

    for entry in selection {
        let mut entry_ok = true;

        if entry.season < 0 {
            errors.push(SelectionError::NegativeSeason(entry.season));
            entry_ok = false;
        } else if !seen_seasons.insert(entry.season) {
            errors.push(SelectionError::DuplicateSeason(entry.season));
            entry_ok = false;
        }

        let episodes = match &entry.episodes {
            None => None,
            Some(list) if list.is_empty() => {
                errors.push(SelectionError::EmptyEpisodeList(entry.season));
                entry_ok = false;
                None
            }
            Some(list) => {
                let mut seen = HashSet::new();
                let mut episodes = Vec::with_capacity(list.len());
                for &episode in list {
                    if episode <= 0 {
                        errors.push(SelectionError::NonPositiveEpisode {
                            season: entry.season,
                            episode,
                        });
                        entry_ok = false;
                    } else if !seen.insert(episode) {
                        errors.push(SelectionError::DuplicateEpisode {
                            season: entry.season,
                            episode,
                        });
                        entry_ok = false;
                    } else {
                        episodes.push(episode);
                    }
                }
                Some(episodes)
            }
        };

        if entry_ok {
            match to_season_selection(entry.season, episodes) {
                Some(validated_entry) => validated.push(validated_entry),
                None => errors.push(SelectionError::Unparseable(format!("season {}", entry.season))),
            }
        }
    }

    if errors.is_empty() {
        Ok(validated)
    } else {
        Err(SelectionErrors(errors))
    }
}

/// Narrow to `u32`; `None` if a number is out of range.
fn to_season_selection(season: i64, episodes: Option<Vec<i64>>) -> Option<SeasonSelection> {
    let season = u32::try_from(season).ok()?;
    let episodes = match episodes {
        None => None,
        Some(list) => Some(
            list.into_iter()
                .map(|e| u32::try_from(e).ok())
                .collect::<Option<Vec<_>>>()?,
        ),
    };
    Some(SeasonSelection { season, episodes })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_selection() {
        let selection = vec![
            EpisodeSelection::season(1),
            EpisodeSelection::episodes(2, vec![3, 1]),
            EpisodeSelection::season(0),
        ];
        let validated = validate_selection(&selection).unwrap();
        assert_eq!(validated.len(), 3);
        assert!(validated[0].is_whole_season());
        assert_eq!(validated[1].episodes, Some(vec![3, 1]));
    }

    #[test]
    fn test_each_problem_reported() {
        let selection = vec![
            EpisodeSelection::season(1),
            EpisodeSelection::season(1),
            EpisodeSelection::season(-2),
            EpisodeSelection::episodes(3, vec![0, 2, 2]),
            EpisodeSelection::episodes(4, vec![]),
        ];

        let SelectionErrors(errors) = validate_selection(&selection).unwrap_err();
        assert_eq!(
            errors,
            vec![
                SelectionError::DuplicateSeason(1),
                SelectionError::NegativeSeason(-2),
                SelectionError::NonPositiveEpisode { season: 3, episode: 0 },
                SelectionError::DuplicateEpisode { season: 3, episode: 2 },
                SelectionError::EmptyEpisodeList(4),
            ]
        );
    }

    #[test]
    fn test_error_message_lists_all() {
        let err = validate_selection(&[EpisodeSelection::season(-1), EpisodeSelection::episodes(2, vec![-3])])
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("season number -1 is negative"));
        assert!(msg.contains("episode number -3 must be positive"));
    }

    #[test]
    fn test_parse_selection() {
        assert_eq!("3".parse::<EpisodeSelection>().unwrap(), EpisodeSelection::season(3));
        assert_eq!(
            "2:1, 4,5".parse::<EpisodeSelection>().unwrap(),
            EpisodeSelection::episodes(2, vec![1, 4, 5])
        );
        assert_eq!(
            "1:".parse::<EpisodeSelection>().unwrap(),
            EpisodeSelection::episodes(1, vec![])
        );
        assert!(matches!(
            "one".parse::<EpisodeSelection>(),
            Err(SelectionError::Unparseable(_))
        ));
        assert!("1:a".parse::<EpisodeSelection>().is_err());
    }
}
