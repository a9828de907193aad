use std::collections::HashMap;
use std::sync::Arc;

use regex::Regex;
use tokio::sync::{watch, Mutex};

use crate::dispatcher::RunCounters;
use crate::normalizer::clean_response;
use crate::transport::{ProbeMethod, Transport, TransportError};

/// Default path fragment that should never exist on a sane server.
pub const DEFAULT_FAIL_CASE: &str = "thereIsNoWayThat-You-CanBeThere";

/// How not-found responses are recognized for one (directory, kind,
/// extension) scope.
#[derive(Clone, Debug)]
pub enum BaseMode {
    /// The server answers misses with a non-200 status; classify on status
    /// alone.
    StatusOnly,
    /// The server answers misses with a stable 200 page; classify by exact
    /// comparison against the normalized body.
    Content { body: String },
    /// The miss page varies but a learned pattern matches it.
    Regex { pattern: Regex },
    /// The miss page varies and no pattern matches; best-effort body
    /// comparison, results are flagged low-confidence.
    Heuristic { body: String },
}

#[derive(Clone, Debug)]
pub struct BaseCase {
    pub probe_url: String,
    pub fail_status: u16,
    pub is_dir: bool,
    pub ext: String,
    pub mode: BaseMode,
}

impl BaseCase {
    pub fn status_only(&self) -> bool {
        matches!(self.mode, BaseMode::StatusOnly)
    }

    pub fn content_analysis(&self) -> bool {
        matches!(self.mode, BaseMode::Content { .. } | BaseMode::Heuristic { .. })
    }

    pub fn use_regex(&self) -> bool {
        matches!(self.mode, BaseMode::Regex { .. })
    }

    pub fn low_confidence(&self) -> bool {
        matches!(self.mode, BaseMode::Heuristic { .. })
    }

    pub fn body(&self) -> Option<&str> {
        match &self.mode {
            BaseMode::Content { body } | BaseMode::Heuristic { body } => Some(body),
            _ => None,
        }
    }
}

type CacheKey = (String, bool, String);

enum CacheSlot {
    Ready(Arc<BaseCase>),
    Pending(watch::Receiver<bool>),
}

enum Claim {
    Ready(Arc<BaseCase>),
    Wait(watch::Receiver<bool>),
    Derive(watch::Sender<bool>),
}

/// Learns and caches one base case per (directory, dir-or-file, extension)
/// scope. Concurrent requests for the same scope collapse into a single
/// derivation; the rest wait on it.
pub struct BaseCaseOracle {
    transport: Arc<dyn Transport>,
    counters: Arc<RunCounters>,
    first_part: String,
    fail_case: String,
    regexes: Vec<Regex>,
    cache: Mutex<HashMap<CacheKey, CacheSlot>>,
}

impl BaseCaseOracle {
    pub fn new(
        transport: Arc<dyn Transport>,
        counters: Arc<RunCounters>,
        first_part: String,
        fail_case: String,
        regexes: Vec<Regex>,
    ) -> Self {
        Self {
            transport,
            counters,
            first_part,
            fail_case,
            regexes,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn fail_case(&self) -> &str {
        &self.fail_case
    }

    /// Base case for directory probes under `dir`.
    pub async fn for_dirs(&self, dir: &str) -> Result<Arc<BaseCase>, TransportError> {
        let probe_path = format!("{}{}/", dir, self.fail_case);
        self.get_or_create((dir.to_string(), true, String::new()), probe_path, true, "")
            .await
    }

    /// Base case for file probes under `dir` with extension suffix `ext`
    /// ("" for the blank extension).
    pub async fn for_files(&self, dir: &str, ext: &str) -> Result<Arc<BaseCase>, TransportError> {
        let probe_path = format!("{}{}{}", dir, self.fail_case, ext);
        self.get_or_create(
            (dir.to_string(), false, ext.to_string()),
            probe_path,
            false,
            ext,
        )
        .await
    }

    /// Base case for URL-fuzz probes, where the miss marker is substituted
    /// into the template instead of appended to a directory.
    pub async fn for_fuzz(&self, probe_path: &str) -> Result<Arc<BaseCase>, TransportError> {
        self.get_or_create(
            (format!("fuzz:{probe_path}"), false, String::new()),
            probe_path.to_string(),
            false,
            "",
        )
        .await
    }

    async fn get_or_create(
        &self,
        key: CacheKey,
        probe_path: String,
        is_dir: bool,
        ext: &str,
    ) -> Result<Arc<BaseCase>, TransportError> {
        loop {
            let claim = {
                let mut cache = self.cache.lock().await;
                match cache.get(&key) {
                    Some(CacheSlot::Ready(base)) => Claim::Ready(base.clone()),
                    Some(CacheSlot::Pending(rx)) => Claim::Wait(rx.clone()),
                    None => {
                        let (tx, rx) = watch::channel(false);
                        cache.insert(key.clone(), CacheSlot::Pending(rx));
                        Claim::Derive(tx)
                    }
                }
            };

            match claim {
                Claim::Ready(base) => return Ok(base),
                Claim::Wait(mut rx) => {
                    // a change means ready, a closed channel means the
                    // deriver failed; either way re-check the cache
                    let _ = rx.changed().await;
                }
                Claim::Derive(tx) => {
                    let outcome = self.derive(&probe_path, is_dir, ext).await;
                    let mut cache = self.cache.lock().await;
                    match outcome {
                        Ok(base) => {
                            let base = Arc::new(base);
                            cache.insert(key, CacheSlot::Ready(base.clone()));
                            self.counters.base_case_produced();
                            let _ = tx.send(true);
                            return Ok(base);
                        }
                        Err(err) => {
                            // not cached so a later request can retry
                            cache.remove(&key);
                            drop(tx);
                            return Err(err);
                        }
                    }
                }
            }
        }
    }

    async fn derive(
        &self,
        probe_path: &str,
        is_dir: bool,
        ext: &str,
    ) -> Result<BaseCase, TransportError> {
        let probe_url = format!("{}{}", self.first_part, probe_path);

        let first = self.transport.send(ProbeMethod::Get, &probe_url).await?;
        self.counters.probe_done();

        if first.status != 200 {
            tracing::debug!(probe_url, status = first.status, "status-only base case");
            return Ok(BaseCase {
                probe_url,
                fail_status: first.status,
                is_dir,
                ext: ext.to_string(),
                mode: BaseMode::StatusOnly,
            });
        }

        // soft 404: sample twice more and see whether the miss page is stable
        let second = self.transport.send(ProbeMethod::Get, &probe_url).await?;
        self.counters.probe_done();
        let third = self.transport.send(ProbeMethod::Get, &probe_url).await?;
        self.counters.probe_done();

        let cleaned: Vec<String> = [&first, &second, &third]
            .iter()
            .map(|resp| clean_response(&resp.body, probe_path))
            .collect();

        if cleaned[0] == cleaned[1] && cleaned[1] == cleaned[2] {
            tracing::debug!(probe_url, "content base case");
            return Ok(BaseCase {
                probe_url,
                fail_status: 200,
                is_dir,
                ext: ext.to_string(),
                mode: BaseMode::Content {
                    body: cleaned.into_iter().next().unwrap_or_default(),
                },
            });
        }

        for pattern in &self.regexes {
            let hits = [&first, &second, &third]
                .iter()
                .all(|resp| pattern.is_match(&resp.body));
            if hits {
                tracing::debug!(probe_url, pattern = pattern.as_str(), "regex base case");
                return Ok(BaseCase {
                    probe_url,
                    fail_status: 200,
                    is_dir,
                    ext: ext.to_string(),
                    mode: BaseMode::Regex {
                        pattern: pattern.clone(),
                    },
                });
            }
        }

        tracing::warn!(
            probe_url,
            "miss page is unstable and no fail-case regex matches; \
             classification for this scope is low-confidence"
        );
        Ok(BaseCase {
            probe_url,
            fail_status: 200,
            is_dir,
            ext: ext.to_string(),
            mode: BaseMode::Heuristic {
                body: cleaned.into_iter().last().unwrap_or_default(),
            },
        })
    }
}
