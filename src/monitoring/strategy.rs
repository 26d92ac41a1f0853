// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Pure monitoring decisions. No I/O.

use std::collections::HashSet;

use super::selection::SeasonSelection;
use crate::backends::models::{Episode, SeasonState};

/// Season number reserved for specials.
pub const SPECIALS_SEASON: u32 = 0;

/// Compute the series-level season list for a monitor request.
///
/// Without a selection every regular season is monitored and specials keep
/// their current flag. With a selection the result is a full replace: listed
/// seasons are monitored, every other season (specials included) is not.
pub fn determine_monitoring_strategy(
    seasons: &[SeasonState],
    selection: Option<&[SeasonSelection]>,
) -> Vec<SeasonState> {
    match selection {
        None => seasons
            .iter()
            .map(|s| {
                let mut s = s.clone();
                if s.season_number != SPECIALS_SEASON {
                    s.monitored = true;
                }
                s
            })
            .collect(),
        Some(selection) => {
            let wanted: HashSet<u32> = selection.iter().map(|s| s.season).collect();
            seasons
                .iter()
                .map(|s| {
                    let mut s = s.clone();
                    s.monitored = wanted.contains(&s.season_number);
                    s
                })
                .collect()
        }
    }
}

/// True if any regular-season episode is still monitored. Specials never count.
pub fn has_remaining_monitored_content(episodes: &[Episode]) -> bool {
    episodes
        .iter()
        .any(|e| e.season_number != SPECIALS_SEASON && e.monitored)
}

/// Episode ids to flip within one season.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EpisodePlan {
    pub monitor: Vec<u64>,
    pub unmonitor: Vec<u64>,
    /// Requested episode numbers the season doesn't have.
    pub missing: Vec<u32>,
}

/// Plan episode monitoring for one season.
///
/// `wanted = None` monitors every episode. Otherwise exactly the listed
/// episodes are monitored and the rest of the season is unmonitored.
/// Episodes already in the target state are left out.
pub fn plan_episode_monitoring(episodes: &[Episode], wanted: Option<&[u32]>) -> EpisodePlan {
    let mut plan = EpisodePlan::default();

    match wanted {
        None => {
            plan.monitor = episodes
                .iter()
                .filter(|e| !e.monitored)
                .map(|e| e.id)
                .collect();
        }
        Some(numbers) => {
            let wanted: HashSet<u32> = numbers.iter().copied().collect();
            for episode in episodes {
                let should_monitor = wanted.contains(&episode.episode_number);
                if should_monitor && !episode.monitored {
                    plan.monitor.push(episode.id);
                } else if !should_monitor && episode.monitored {
                    plan.unmonitor.push(episode.id);
                }
            }
            let present: HashSet<u32> = episodes.iter().map(|e| e.episode_number).collect();
            plan.missing = numbers
                .iter()
                .copied()
                .filter(|n| !present.contains(n))
                .collect();
        }
    }

    plan
}

/// Episodes an unmonitor entry targets: the listed ones, or the whole season.
pub fn select_target_episodes<'a>(episodes: &'a [Episode], wanted: Option<&[u32]>) -> Vec<&'a Episode> {
    match wanted {
        None => episodes.iter().collect(),
        Some(numbers) => episodes
            .iter()
            .filter(|e| numbers.contains(&e.episode_number))
            .collect(),
    }
}
