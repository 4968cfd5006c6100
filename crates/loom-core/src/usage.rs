//! Usage Ledger (spec §4.7, component F): per-provider/per-model token and
//! cost totals, persisted under `~/.loom/usages/aggregates.json`, plus a
//! pricing catalog grounded in the teacher's OpenRouter pricing cache
//! (static table + TTL-refreshed HTTP fetch).

use crate::error::Result;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

const CATALOG_TTL: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct TokenTotals {
    pub in_tokens: u64,
    pub out_tokens: u64,
    pub cost_usd: f64,
}

impl TokenTotals {
    fn add(&mut self, in_tokens: u64, out_tokens: u64, cost_usd: f64) {
        self.in_tokens += in_tokens;
        self.out_tokens += out_tokens;
        self.cost_usd += cost_usd;
    }
}

/// Full aggregate snapshot for one scope (project or global).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsageTotals {
    pub total: TokenTotals,
    pub by_provider: HashMap<String, TokenTotals>,
    pub by_model: HashMap<String, TokenTotals>,
}

impl UsageTotals {
    fn record(&mut self, provider: &str, model: &str, in_tokens: u64, out_tokens: u64, cost_usd: f64) {
        self.total.add(in_tokens, out_tokens, cost_usd);
        self.by_provider
            .entry(provider.to_string())
            .or_default()
            .add(in_tokens, out_tokens, cost_usd);
        self.by_model
            .entry(model.to_string())
            .or_default()
            .add(in_tokens, out_tokens, cost_usd);
    }

    /// Spec §8 property 6: totals must stay internally consistent.
    pub fn is_consistent(&self) -> bool {
        let provider_in: u64 = self.by_provider.values().map(|t| t.in_tokens).sum();
        let provider_out: u64 = self.by_provider.values().map(|t| t.out_tokens).sum();
        let model_in: u64 = self.by_model.values().map(|t| t.in_tokens).sum();
        let model_out: u64 = self.by_model.values().map(|t| t.out_tokens).sum();
        self.total.in_tokens == provider_in
            && self.total.in_tokens == model_in
            && self.total.out_tokens == provider_out
            && self.total.out_tokens == model_out
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct AggregateFile {
    global: UsageTotals,
    #[serde(default)]
    projects: HashMap<String, UsageTotals>,
}

/// Per-million-token pricing for one model.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ModelPricing {
    pub in_per_million: f64,
    pub out_per_million: f64,
}

fn static_pricing_table() -> HashMap<&'static str, ModelPricing> {
    let mut m = HashMap::new();
    m.insert("gpt-4o", ModelPricing { in_per_million: 2.50, out_per_million: 10.00 });
    m.insert("gpt-4o-mini", ModelPricing { in_per_million: 0.15, out_per_million: 0.60 });
    m.insert("claude-3-5-sonnet", ModelPricing { in_per_million: 3.00, out_per_million: 15.00 });
    m.insert("claude-3-5-haiku", ModelPricing { in_per_million: 0.80, out_per_million: 4.00 });
    m
}

struct CatalogState {
    entries: HashMap<String, ModelPricing>,
    fetched_at: Option<SystemTime>,
}

/// Dynamic pricing catalog: static defaults plus an optional HTTP-fetched
/// overlay, refreshed at most once per `CATALOG_TTL` (stale-while-revalidate:
/// a stale entry is still served while a refresh is attempted).
pub struct PricingCatalog {
    client: reqwest::Client,
    catalog_url: Option<String>,
    state: Mutex<CatalogState>,
}

impl Default for PricingCatalog {
    fn default() -> Self {
        Self::new(None)
    }
}

impl PricingCatalog {
    pub fn new(catalog_url: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            catalog_url,
            state: Mutex::new(CatalogState {
                entries: static_pricing_table()
                    .into_iter()
                    .map(|(k, v)| (k.to_string(), v))
                    .collect(),
                fetched_at: None,
            }),
        }
    }

    pub fn price_for(&self, model: &str) -> Option<ModelPricing> {
        self.state.lock().entries.get(model).copied()
    }

    fn is_stale(&self) -> bool {
        match self.state.lock().fetched_at {
            None => true,
            Some(t) => SystemTime::now().duration_since(t).unwrap_or(Duration::ZERO) > CATALOG_TTL,
        }
    }

    /// Refresh from `catalog_url` if configured and the cache is stale.
    /// Failures are swallowed: the static/previous entries remain in force.
    pub async fn refresh_if_stale(&self) {
        let Some(url) = self.catalog_url.clone() else { return };
        if !self.is_stale() {
            return;
        }
        if let Ok(resp) = self.client.get(&url).send().await {
            if let Ok(fetched) = resp.json::<HashMap<String, ModelPricing>>().await {
                let mut state = self.state.lock();
                state.entries.extend(fetched);
                state.fetched_at = Some(SystemTime::now());
            }
        }
    }

    pub fn cost_usd(&self, model: &str, in_tokens: u64, out_tokens: u64) -> f64 {
        match self.price_for(model) {
            Some(p) => {
                (in_tokens as f64 / 1_000_000.0) * p.in_per_million
                    + (out_tokens as f64 / 1_000_000.0) * p.out_per_million
            }
            None => 0.0,
        }
    }
}

/// Single-file, single-mutex-guarded ledger. Every mutation is a full
/// load→modify→write cycle so concurrent processes never interleave writes
/// (spec §4.7). A corrupt file is treated as an empty ledger rather than a
/// hard error, since usage accounting must never block the agent loop.
pub struct UsageLedger {
    path: PathBuf,
    pricing: PricingCatalog,
    write_lock: Mutex<()>,
}

impl UsageLedger {
    pub fn new(path: impl Into<PathBuf>, pricing: PricingCatalog) -> Self {
        Self {
            path: path.into(),
            pricing,
            write_lock: Mutex::new(()),
        }
    }

    fn load(&self) -> AggregateFile {
        std::fs::read_to_string(&self.path)
            .ok()
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default()
    }

    fn store(&self, file: &AggregateFile) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_string_pretty(file)?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// Record one usage frame against both the global ledger and, when
    /// provided, a project-scoped one.
    pub async fn record(
        &self,
        project: Option<&str>,
        provider: &str,
        model: &str,
        in_tokens: u64,
        out_tokens: u64,
    ) -> Result<TokenTotals> {
        self.pricing.refresh_if_stale().await;
        let cost = self.pricing.cost_usd(model, in_tokens, out_tokens);

        let _guard = self.write_lock.lock();
        let mut file = self.load();
        file.global.record(provider, model, in_tokens, out_tokens, cost);
        if let Some(project) = project {
            file.projects
                .entry(project.to_string())
                .or_default()
                .record(provider, model, in_tokens, out_tokens, cost);
        }
        self.store(&file)?;
        Ok(TokenTotals { in_tokens, out_tokens, cost_usd: cost })
    }

    pub fn global_totals(&self) -> UsageTotals {
        self.load().global
    }

    pub fn project_totals(&self, project: &str) -> UsageTotals {
        self.load().projects.get(project).cloned().unwrap_or_default()
    }
}

pub fn resolve_ledger_path(home: &Path) -> PathBuf {
    home.join(".loom").join("usages").join("aggregates.json")
}
