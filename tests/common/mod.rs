// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Shared fakes for integration tests. No network: every backend is an
//! in-process [`HttpTransport`].

#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use arrgate::auth::AuthStrategy;
use arrgate::backends::models::{Episode, QueueItem, SeasonState, Series};
use arrgate::backends::SeriesClient;
use arrgate::clock::InstantSleeper;
use arrgate::config::ClientConfig;
use arrgate::errors::TransportError;
use arrgate::http::{AttemptEvent, CallEvent, HttpRequest, HttpResponse, HttpTransport, RequestExecutor, RequestObserver};
use arrgate::locks::resilient_lock;
use arrgate::types::{BackendKind, HttpMethod};

pub const SERIES_URL: &str = "http://series.test:8989";

// =============================================================================
// SCRIPTED TRANSPORT
// =============================================================================

/// Replays canned responses in order, recording every request.
pub struct Scripted {
    responses: Mutex<VecDeque<Result<HttpResponse, TransportError>>>,
    sent: Mutex<Vec<HttpRequest>>,
}

impl Scripted {
    pub fn new(responses: Vec<Result<HttpResponse, TransportError>>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into()),
            sent: Mutex::new(Vec::new()),
        })
    }

    pub fn sent(&self) -> Vec<HttpRequest> {
        resilient_lock(&self.sent).clone()
    }
}

#[async_trait]
impl HttpTransport for Scripted {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        resilient_lock(&self.sent).push(request);
        resilient_lock(&self.responses)
            .pop_front()
            .unwrap_or_else(|| Ok(HttpResponse::json(500, "script exhausted")))
    }
}

// =============================================================================
// OBSERVER
// =============================================================================

#[derive(Default)]
pub struct Recorder {
    pub attempts: Mutex<Vec<AttemptEvent>>,
    pub calls: Mutex<Vec<CallEvent>>,
}

impl Recorder {
    pub fn attempts(&self) -> Vec<AttemptEvent> {
        resilient_lock(&self.attempts).clone()
    }

    pub fn calls(&self) -> Vec<CallEvent> {
        resilient_lock(&self.calls).clone()
    }
}

impl RequestObserver for Recorder {
    fn on_attempt(&self, event: &AttemptEvent) {
        resilient_lock(&self.attempts).push(event.clone());
    }

    fn on_call(&self, event: &CallEvent) {
        resilient_lock(&self.calls).push(event.clone());
    }
}

// =============================================================================
// IN-MEMORY SERIES MANAGER
// =============================================================================

#[derive(Default)]
struct SeriesState {
    library: Vec<Series>,
    lookup: Vec<Series>,
    /// Episodes keyed by TVDB id until the series is added.
    pending_episodes: HashMap<u64, Vec<Episode>>,
    episodes: Vec<Episode>,
    queue: Vec<QueueItem>,
    commands: Vec<Value>,
    next_id: u64,
    log: Vec<String>,
}

/// Enough of the series manager's `/api/v3` surface to drive orchestration.
#[derive(Default)]
pub struct FakeSeriesManager {
    state: Mutex<SeriesState>,
}

pub fn season_states(numbers: &[(u32, bool)]) -> Vec<SeasonState> {
    numbers.iter().map(|&(n, m)| SeasonState::new(n, m)).collect()
}

pub fn series_record(id: Option<u64>, tvdb_id: u64, title: &str, seasons: Vec<SeasonState>) -> Series {
    Series {
        id,
        title: title.to_string(),
        tvdb_id,
        monitored: id.is_some(),
        quality_profile_id: None,
        root_folder_path: None,
        seasons,
        add_options: None,
        extra: Default::default(),
    }
}

pub fn episode(id: u64, series_id: u64, season: u32, number: u32, monitored: bool) -> Episode {
    Episode {
        id,
        series_id,
        season_number: season,
        episode_number: number,
        title: None,
        monitored,
        has_file: false,
        episode_file_id: None,
    }
}

impl FakeSeriesManager {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(SeriesState {
                next_id: 1,
                ..Default::default()
            }),
        })
    }

    /// A series the metadata source knows but the library doesn't have yet.
    pub fn with_lookup(self: Arc<Self>, series: Series, episodes: Vec<Episode>) -> Arc<Self> {
        {
            let mut state = resilient_lock(&self.state);
            state.pending_episodes.insert(series.tvdb_id, episodes);
            state.lookup.push(series);
        }
        self
    }

    /// A series already in the library.
    pub fn with_series(self: Arc<Self>, series: Series, episodes: Vec<Episode>) -> Arc<Self> {
        {
            let mut state = resilient_lock(&self.state);
            if let Some(id) = series.id {
                state.next_id = state.next_id.max(id + 1);
            }
            state.library.push(series);
            state.episodes.extend(episodes);
        }
        self
    }

    pub fn with_queue(self: Arc<Self>, queue: Vec<QueueItem>) -> Arc<Self> {
        resilient_lock(&self.state).queue = queue;
        self
    }

    pub fn library(&self) -> Vec<Series> {
        resilient_lock(&self.state).library.clone()
    }

    pub fn episodes(&self) -> Vec<Episode> {
        resilient_lock(&self.state).episodes.clone()
    }

    pub fn queue(&self) -> Vec<QueueItem> {
        resilient_lock(&self.state).queue.clone()
    }

    pub fn commands(&self) -> Vec<Value> {
        resilient_lock(&self.state).commands.clone()
    }

    /// `METHOD /path` for every request received.
    pub fn log(&self) -> Vec<String> {
        resilient_lock(&self.state).log.clone()
    }

    fn handle(&self, request: &HttpRequest) -> HttpResponse {
        let url = match url::Url::parse(&request.url) {
            Ok(url) => url,
            Err(_) => return HttpResponse::json(400, r#"{"message":"bad url"}"#),
        };
        let query: HashMap<String, String> = url.query_pairs().into_owned().collect();
        let path = url.path().to_string();
        let segments: Vec<&str> = path.trim_start_matches("/api/v3/").split('/').collect();

        let mut state = resilient_lock(&self.state);
        state.log.push(format!("{} {}", request.method, path));

        let id_param = |name: &str| query.get(name).and_then(|v| v.parse::<u64>().ok());

        let reply = match (request.method, segments.as_slice()) {
            (HttpMethod::Get, ["system", "status"]) => json!({ "appName": "Sonarr", "version": "4.0.1.929" }),
            (HttpMethod::Get, ["qualityprofile"]) => json!([{ "id": 1, "name": "Any" }]),
            (HttpMethod::Get, ["rootfolder"]) => json!([{ "id": 1, "path": "/tv" }]),

            (HttpMethod::Get, ["series"]) => {
                let tvdb = id_param("tvdbId");
                let found: Vec<&Series> = state
                    .library
                    .iter()
                    .filter(|s| tvdb.map_or(true, |t| s.tvdb_id == t))
                    .collect();
                json!(found)
            }
            (HttpMethod::Get, ["series", "lookup"]) => {
                let term = query.get("term").cloned().unwrap_or_default();
                let tvdb = term.strip_prefix("tvdb:").and_then(|t| t.parse::<u64>().ok());
                let found: Vec<&Series> = state
                    .lookup
                    .iter()
                    .filter(|s| tvdb.map_or_else(|| s.title.to_lowercase().contains(&term.to_lowercase()), |t| s.tvdb_id == t))
                    .collect();
                json!(found)
            }
            (HttpMethod::Post, ["series"]) => {
                let Some(mut series) = body_as::<Series>(request) else {
                    return HttpResponse::json(400, r#"{"message":"invalid series"}"#);
                };
                let id = state.next_id;
                state.next_id += 1;
                series.id = Some(id);
                series.add_options = None;
                let mut episodes = state.pending_episodes.remove(&series.tvdb_id).unwrap_or_default();
                for e in episodes.iter_mut() {
                    e.series_id = id;
                }
                state.episodes.extend(episodes);
                state.library.push(series.clone());
                json!(series)
            }
            (HttpMethod::Put, ["series", id]) => {
                let Some(series) = body_as::<Series>(request) else {
                    return HttpResponse::json(400, r#"{"message":"invalid series"}"#);
                };
                let id = id.parse::<u64>().unwrap_or(0);
                match state.library.iter_mut().find(|s| s.id == Some(id)) {
                    Some(slot) => {
                        *slot = series.clone();
                        json!(series)
                    }
                    None => return not_found(),
                }
            }
            (HttpMethod::Delete, ["series", id]) => {
                let id = id.parse::<u64>().unwrap_or(0);
                let before = state.library.len();
                state.library.retain(|s| s.id != Some(id));
                if state.library.len() == before {
                    return not_found();
                }
                state.episodes.retain(|e| e.series_id != id);
                state
                    .log
                    .push(format!("deleteFiles={}", query.get("deleteFiles").cloned().unwrap_or_default()));
                return empty();
            }

            (HttpMethod::Get, ["episode"]) => {
                let series_id = id_param("seriesId");
                let season = id_param("seasonNumber");
                let found: Vec<&Episode> = state
                    .episodes
                    .iter()
                    .filter(|e| series_id.map_or(true, |id| e.series_id == id))
                    .filter(|e| season.map_or(true, |n| u64::from(e.season_number) == n))
                    .collect();
                json!(found)
            }
            (HttpMethod::Put, ["episode", "monitor"]) => {
                let body = request.body.clone().unwrap_or(Value::Null);
                let ids: Vec<u64> = body["episodeIds"]
                    .as_array()
                    .map(|a| a.iter().filter_map(|v| v.as_u64()).collect())
                    .unwrap_or_default();
                let monitored = body["monitored"].as_bool().unwrap_or(false);
                for e in state.episodes.iter_mut().filter(|e| ids.contains(&e.id)) {
                    e.monitored = monitored;
                }
                return empty();
            }
            (HttpMethod::Delete, ["episodefile", id]) => {
                let file_id = id.parse::<u64>().unwrap_or(0);
                match state.episodes.iter_mut().find(|e| e.episode_file_id == Some(file_id)) {
                    Some(e) => {
                        e.has_file = false;
                        e.episode_file_id = None;
                        return empty();
                    }
                    None => return not_found(),
                }
            }

            (HttpMethod::Get, ["queue"]) => {
                let total = state.queue.len();
                let page = id_param("page").unwrap_or(1);
                let records = if page == 1 { state.queue.clone() } else { Vec::new() };
                json!({ "page": page, "pageSize": 100, "totalRecords": total, "records": records })
            }
            (HttpMethod::Delete, ["queue", id]) => {
                let id = id.parse::<u64>().unwrap_or(0);
                state.queue.retain(|q| q.id != id);
                return empty();
            }

            (HttpMethod::Post, ["command"]) => {
                let body = request.body.clone().unwrap_or(Value::Null);
                state.commands.push(body.clone());
                json!({ "id": 1000 + state.commands.len(), "name": body["name"], "status": "queued" })
            }

            _ => return not_found(),
        };

        HttpResponse::json(200, reply.to_string())
    }
}

fn body_as<T: serde::de::DeserializeOwned>(request: &HttpRequest) -> Option<T> {
    request
        .body
        .clone()
        .and_then(|body| serde_json::from_value(body).ok())
}

fn not_found() -> HttpResponse {
    HttpResponse::json(404, r#"{"message":"NotFound"}"#)
}

fn empty() -> HttpResponse {
    HttpResponse::json(200, "")
}

#[async_trait]
impl HttpTransport for FakeSeriesManager {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        Ok(self.handle(&request))
    }
}

// =============================================================================
// CLIENT BUILDERS
// =============================================================================

pub fn series_config() -> ClientConfig {
    ClientConfig::new(BackendKind::SeriesManager, SERIES_URL).expect("valid test config")
}

/// An executor with an instant sleeper and a recorder attached.
pub fn executor_with(
    config: &ClientConfig,
    auth: AuthStrategy,
    transport: Arc<dyn HttpTransport>,
) -> (RequestExecutor, Arc<InstantSleeper>, Arc<Recorder>) {
    let sleeper = Arc::new(InstantSleeper::new());
    let recorder = Arc::new(Recorder::default());
    let executor = RequestExecutor::new(config, auth, transport)
        .with_sleeper(sleeper.clone())
        .with_observer(recorder.clone());
    (executor, sleeper, recorder)
}

pub fn series_client(transport: Arc<dyn HttpTransport>) -> SeriesClient {
    let config = series_config();
    let (executor, _, _) = executor_with(&config, AuthStrategy::api_key_header("test-key"), transport);
    SeriesClient::with_executor(config, executor)
}
