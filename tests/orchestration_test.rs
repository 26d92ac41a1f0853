// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! End-to-end orchestration against an in-memory series manager.
//!
//! Each test drives [`SeriesOrchestrator`] through a real [`SeriesClient`]
//! and [`RequestExecutor`](arrgate::http::RequestExecutor); only the HTTP
//! transport is faked.

mod common;

use std::sync::Arc;
use std::time::Duration;

use arrgate::backends::models::QueueItem;
use arrgate::clock::InstantSleeper;
use arrgate::monitoring::{
    ChangeAction, EpisodeSelection, MonitorRequest, MonitoringChange, SeriesOrchestrator, UnmonitorRequest,
};
use arrgate::utils::OperationContext;

use common::{episode, season_states, series_client, series_record, FakeSeriesManager};

const TVDB_ID: u64 = 121361;

fn orchestrator(fake: &Arc<FakeSeriesManager>) -> (SeriesOrchestrator, Arc<InstantSleeper>) {
    let sleeper = Arc::new(InstantSleeper::new());
    let client = series_client(fake.clone());
    let orchestrator = SeriesOrchestrator::new(Arc::new(client)).with_sleeper(sleeper.clone());
    (orchestrator, sleeper)
}

fn queue_item(id: u64, series_id: u64, episode_id: u64) -> QueueItem {
    QueueItem {
        id,
        series_id: Some(series_id),
        episode_id: Some(episode_id),
        movie_id: None,
        title: None,
        status: Some("downloading".to_string()),
    }
}

// =============================================================================
// Monitor and download
// =============================================================================

#[tokio::test]
async fn test_monitor_new_series_single_season() {
    let fake = FakeSeriesManager::new().with_lookup(
        series_record(None, TVDB_ID, "Example Show", season_states(&[(0, false), (1, false), (2, false)])),
        vec![
            episode(11, 0, 1, 1, false),
            episode(12, 0, 1, 2, false),
            episode(21, 0, 2, 1, false),
        ],
    );
    let (orchestrator, _) = orchestrator(&fake);
    let request = MonitorRequest::new(TVDB_ID).with_selection(vec![EpisodeSelection::season(1)]);

    let outcome = orchestrator
        .monitor_and_download(&OperationContext::new(), request)
        .await;

    assert!(outcome.success, "{:?}", outcome.error);
    assert!(outcome.series_added);
    assert!(outcome.search_triggered);
    assert_eq!(
        outcome.changes,
        vec![MonitoringChange::season(1, None, ChangeAction::Monitored)]
    );
    assert!(outcome.warnings.is_empty(), "{:?}", outcome.warnings);

    // Only season 1 is monitored at series level
    let library = fake.library();
    assert_eq!(library.len(), 1);
    let monitored: Vec<u32> = library[0]
        .seasons
        .iter()
        .filter(|s| s.monitored)
        .map(|s| s.season_number)
        .collect();
    assert_eq!(monitored, vec![1]);
    assert_eq!(library[0].quality_profile_id, Some(1));
    assert_eq!(library[0].root_folder_path.as_deref(), Some("/tv"));

    // Episode flags follow the selection
    let episodes = fake.episodes();
    assert!(episodes.iter().filter(|e| e.season_number == 1).all(|e| e.monitored));
    assert!(episodes.iter().filter(|e| e.season_number == 2).all(|e| !e.monitored));

    // Whole-season selection triggers a series search
    let commands = fake.commands();
    assert_eq!(commands.len(), 1);
    assert_eq!(commands[0]["name"], "SeriesSearch");
}

#[tokio::test]
async fn test_monitor_specific_episodes_searches_only_those() {
    let fake = FakeSeriesManager::new().with_lookup(
        series_record(None, TVDB_ID, "Example Show", season_states(&[(1, false)])),
        vec![
            episode(11, 0, 1, 1, false),
            episode(12, 0, 1, 2, false),
            episode(13, 0, 1, 3, false),
        ],
    );
    let (orchestrator, _) = orchestrator(&fake);
    let request = MonitorRequest::new(TVDB_ID).with_selection(vec![EpisodeSelection::episodes(1, vec![1, 3])]);

    let outcome = orchestrator
        .monitor_and_download(&OperationContext::new(), request)
        .await;

    assert!(outcome.success);
    let commands = fake.commands();
    assert_eq!(commands[0]["name"], "EpisodeSearch");
    assert_eq!(commands[0]["episodeIds"], serde_json::json!([11, 13]));

    let monitored: Vec<u32> = fake
        .episodes()
        .iter()
        .filter(|e| e.monitored)
        .map(|e| e.episode_number)
        .collect();
    assert_eq!(monitored, vec![1, 3]);
}

#[tokio::test]
async fn test_monitor_existing_fully_monitored_series_only_searches() {
    let fake = FakeSeriesManager::new().with_series(
        series_record(Some(5), TVDB_ID, "Example Show", season_states(&[(0, false), (1, true)])),
        vec![episode(11, 5, 1, 1, true)],
    );
    let (orchestrator, _) = orchestrator(&fake);

    let outcome = orchestrator
        .monitor_and_download(&OperationContext::new(), MonitorRequest::new(TVDB_ID))
        .await;

    assert!(outcome.success);
    assert!(!outcome.series_added);
    assert!(outcome.search_triggered);
    assert!(outcome.changes.is_empty());
    assert_eq!(
        fake.log(),
        vec!["GET /api/v3/series", "POST /api/v3/command"]
    );
}

#[tokio::test]
async fn test_invalid_selection_sends_nothing() {
    let fake = FakeSeriesManager::new();
    let (orchestrator, _) = orchestrator(&fake);
    let request = MonitorRequest::new(TVDB_ID).with_selection(vec![
        EpisodeSelection::season(-1),
        EpisodeSelection::episodes(2, vec![1, 1]),
    ]);

    let outcome = orchestrator
        .monitor_and_download(&OperationContext::new(), request)
        .await;

    assert!(!outcome.success);
    let error = outcome.error.unwrap();
    assert!(error.contains("negative"));
    assert!(error.contains("more than once"));
    assert!(fake.log().is_empty());
}

// =============================================================================
// Unmonitor and delete
// =============================================================================

#[tokio::test]
async fn test_unmonitor_last_episodes_cascades_to_series_delete() {
    let fake = FakeSeriesManager::new().with_series(
        series_record(Some(5), TVDB_ID, "Example Show", season_states(&[(0, false), (1, true)])),
        vec![episode(11, 5, 1, 1, true), episode(12, 5, 1, 2, true)],
    );
    let (orchestrator, sleeper) = orchestrator(&fake);
    let mut request =
        UnmonitorRequest::new(TVDB_ID).with_selection(vec![EpisodeSelection::episodes(1, vec![1, 2])]);
    request.delete_files = true;

    let outcome = orchestrator
        .unmonitor_and_delete(&OperationContext::new(), request)
        .await;

    assert!(outcome.success, "{:?}", outcome.error);
    assert_eq!(
        outcome.changes,
        vec![
            MonitoringChange::season(1, Some(vec![1, 2]), ChangeAction::Unmonitored),
            MonitoringChange::season(1, None, ChangeAction::UnmonitoredSeason),
            MonitoringChange::series(ChangeAction::DeletedSeries),
        ]
    );
    assert!(outcome.series_deleted);
    assert!(fake.library().is_empty());
    assert!(fake.log().contains(&"deleteFiles=true".to_string()));

    // The re-check waited before looking
    assert_eq!(sleeper.requested().first(), Some(&Duration::from_secs(3)));
}

#[tokio::test]
async fn test_unmonitor_part_of_season_keeps_everything_else() {
    let mut with_file = episode(11, 5, 1, 1, true);
    with_file.has_file = true;
    with_file.episode_file_id = Some(900);

    let fake = FakeSeriesManager::new()
        .with_series(
            series_record(Some(5), TVDB_ID, "Example Show", season_states(&[(1, true), (2, true)])),
            vec![with_file, episode(12, 5, 1, 2, true), episode(21, 5, 2, 1, true)],
        )
        .with_queue(vec![queue_item(70, 5, 11), queue_item(71, 5, 21)]);
    let (orchestrator, _) = orchestrator(&fake);
    let request = UnmonitorRequest::new(TVDB_ID).with_selection(vec![EpisodeSelection::episodes(1, vec![1])]);

    let outcome = orchestrator
        .unmonitor_and_delete(&OperationContext::new(), request)
        .await;

    assert!(outcome.success);
    assert!(!outcome.series_deleted);
    assert!(outcome.has_change(ChangeAction::DeletedFiles));
    assert!(outcome.has_change(ChangeAction::Unmonitored));
    assert!(!outcome.has_change(ChangeAction::UnmonitoredSeason));

    // Only the download for the targeted episode was cancelled
    let queue = fake.queue();
    assert_eq!(queue.len(), 1);
    assert_eq!(queue[0].id, 71);

    let episodes = fake.episodes();
    let first = episodes.iter().find(|e| e.id == 11).unwrap();
    assert!(!first.monitored);
    assert!(!first.has_file);
    assert!(episodes.iter().find(|e| e.id == 12).unwrap().monitored);
    assert_eq!(fake.library().len(), 1);
}

#[tokio::test]
async fn test_unmonitor_whole_season_leaves_other_seasons() {
    let fake = FakeSeriesManager::new().with_series(
        series_record(Some(5), TVDB_ID, "Example Show", season_states(&[(1, true), (2, true)])),
        vec![episode(11, 5, 1, 1, true), episode(21, 5, 2, 1, true)],
    );
    let (orchestrator, _) = orchestrator(&fake);
    let request = UnmonitorRequest::new(TVDB_ID).with_selection(vec![EpisodeSelection::season(1)]);

    let outcome = orchestrator
        .unmonitor_and_delete(&OperationContext::new(), request)
        .await;

    assert!(outcome.success);
    assert_eq!(
        outcome.changes,
        vec![
            MonitoringChange::season(1, None, ChangeAction::Unmonitored),
            MonitoringChange::season(1, None, ChangeAction::UnmonitoredSeason),
        ]
    );
    let library = fake.library();
    assert!(!library[0].seasons[0].monitored);
    assert!(library[0].seasons[1].monitored);
}

#[tokio::test]
async fn test_unmonitor_without_selection_removes_series_and_downloads() {
    let fake = FakeSeriesManager::new()
        .with_series(
            series_record(Some(5), TVDB_ID, "Example Show", season_states(&[(1, true)])),
            vec![episode(11, 5, 1, 1, true)],
        )
        .with_queue(vec![queue_item(70, 5, 11), queue_item(80, 9, 99)]);
    let (orchestrator, _) = orchestrator(&fake);

    let outcome = orchestrator
        .unmonitor_and_delete(&OperationContext::new(), UnmonitorRequest::new(TVDB_ID))
        .await;

    assert!(outcome.success);
    assert_eq!(outcome.changes, vec![MonitoringChange::series(ChangeAction::DeletedSeries)]);
    assert!(fake.library().is_empty());
    // Other series' downloads are untouched
    let queue = fake.queue();
    assert_eq!(queue.len(), 1);
    assert_eq!(queue[0].id, 80);
}

#[tokio::test]
async fn test_unmonitor_unknown_series_fails() {
    let fake = FakeSeriesManager::new();
    let (orchestrator, _) = orchestrator(&fake);

    let outcome = orchestrator
        .unmonitor_and_delete(&OperationContext::new(), UnmonitorRequest::new(42))
        .await;

    assert!(!outcome.success);
    assert_eq!(outcome.error.as_deref(), Some("series 42 was not found"));
    assert!(outcome.changes.is_empty());
}
