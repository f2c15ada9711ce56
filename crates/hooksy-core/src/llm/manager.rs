//! Provider fallback chain, response cache, rate limiter, and daily budget.
//!
//! Each provider call is wrapped in its own `tokio::time::timeout`, the same
//! per-call timeout discipline the kernel's hook registry uses for
//! `emit_and_collect`: a slow provider is skipped, not allowed to stall the
//! whole inspection.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use lru::LruCache;
use std::num::NonZeroUsize;
use tracing::{debug, warn};

use crate::errors::LlmError;
use crate::llm::provider::{AnalysisRequest, AnalysisResponse, LlmProvider};

struct TokenBucketState {
    tokens: f64,
    last_refill: std::time::Instant,
}

struct BudgetState {
    day: NaiveDate,
    spent_usd: f64,
}

/// Owns the provider fallback chain plus cross-cutting cache/limits.
pub struct LlmManager {
    providers: Vec<Arc<dyn LlmProvider>>,
    cache: Mutex<LruCache<String, (AnalysisResponse, std::time::Instant)>>,
    cache_ttl: Duration,
    call_timeout: Duration,
    rate_limit_per_minute: u32,
    burst: u32,
    bucket: Mutex<TokenBucketState>,
    daily_budget_usd: f64,
    budget: Mutex<BudgetState>,
}

impl LlmManager {
    pub fn new(
        providers: Vec<Arc<dyn LlmProvider>>,
        cache_ttl: Duration,
        rate_limit_per_minute: u32,
        burst: u32,
        daily_budget_usd: f64,
    ) -> Self {
        let capacity = if burst > 0 {
            burst as f64
        } else {
            rate_limit_per_minute as f64
        };
        Self {
            providers,
            cache: Mutex::new(LruCache::new(NonZeroUsize::new(256).unwrap())),
            cache_ttl,
            call_timeout: Duration::from_secs(5),
            rate_limit_per_minute,
            burst,
            bucket: Mutex::new(TokenBucketState {
                tokens: capacity,
                last_refill: std::time::Instant::now(),
            }),
            daily_budget_usd,
            budget: Mutex::new(BudgetState {
                day: Utc::now().date_naive(),
                spent_usd: 0.0,
            }),
        }
    }

    /// Single shared token bucket across every provider: capacity is the
    /// configured burst (falling back to the per-minute rate when no burst
    /// is set), refilled continuously at `rate_limit_per_minute / 60` tokens
    /// per second.
    fn check_rate_limit(&self) -> Result<(), LlmError> {
        if self.rate_limit_per_minute == 0 {
            return Ok(());
        }
        let capacity = if self.burst > 0 {
            self.burst as f64
        } else {
            self.rate_limit_per_minute as f64
        };
        let refill_per_sec = self.rate_limit_per_minute as f64 / 60.0;
        let mut state = self.bucket.lock().unwrap();
        let elapsed = state.last_refill.elapsed().as_secs_f64();
        state.tokens = (state.tokens + elapsed * refill_per_sec).min(capacity);
        state.last_refill = std::time::Instant::now();
        if state.tokens < 1.0 {
            return Err(LlmError::RateLimited);
        }
        state.tokens -= 1.0;
        Ok(())
    }

    /// Whether `cost` can still be spent today without exceeding the daily
    /// budget. Doesn't record anything — callers record only after a call
    /// actually succeeds, so a provider that's merely unaffordable (and
    /// never attempted) doesn't pollute the spend ledger.
    fn can_afford(&self, cost: f64) -> bool {
        if self.daily_budget_usd <= 0.0 {
            return true;
        }
        let mut state = self.budget.lock().unwrap();
        let today = Utc::now().date_naive();
        if state.day != today {
            state.day = today;
            state.spent_usd = 0.0;
        }
        state.spent_usd + cost <= self.daily_budget_usd
    }

    fn record_spend(&self, cost: f64) {
        if self.daily_budget_usd <= 0.0 {
            return;
        }
        let mut state = self.budget.lock().unwrap();
        let today = Utc::now().date_naive();
        if state.day != today {
            state.day = today;
            state.spent_usd = 0.0;
        }
        state.spent_usd += cost;
    }

    /// Run `request` through the fallback chain, consulting the cache first.
    /// `cache_key` should uniquely identify the request's semantic content
    /// (e.g. tool name + normalized input), not the full prompt text.
    pub async fn analyze(
        &self,
        request: AnalysisRequest,
        cache_key: &str,
    ) -> Result<AnalysisResponse, LlmError> {
        if self.providers.is_empty() {
            return Err(LlmError::NoProviders);
        }

        if let Some((cached, inserted_at)) = self.cache.lock().unwrap().get(cache_key).cloned() {
            if inserted_at.elapsed() < self.cache_ttl {
                debug!(key = cache_key, "llm analysis cache hit");
                return Ok(AnalysisResponse { cached: true, ..cached });
            }
        }

        self.check_rate_limit()?;

        let mut last_error = None;
        let mut budget_blocked = false;
        for provider in &self.providers {
            if !provider.available() {
                continue;
            }
            let cost = provider.estimate_cost(&request);
            if !self.can_afford(cost) {
                budget_blocked = true;
                continue;
            }
            let fut = provider.analyze(request.clone());
            match tokio::time::timeout(self.call_timeout, fut).await {
                Ok(Ok(response)) => {
                    self.record_spend(cost);
                    self.cache
                        .lock()
                        .unwrap()
                        .put(cache_key.to_string(), (response.clone(), std::time::Instant::now()));
                    return Ok(response);
                }
                Ok(Err(e)) => {
                    warn!(provider = provider.name(), error = %e, "llm provider call failed, trying next");
                    last_error = Some(e);
                }
                Err(_) => {
                    warn!(provider = provider.name(), "llm provider call timed out, trying next");
                    last_error = Some(LlmError::Timeout {
                        provider: provider.name().to_string(),
                    });
                }
            }
        }

        match last_error {
            Some(e) => Err(e),
            None if budget_blocked => Err(LlmError::BudgetExceeded),
            None => Err(LlmError::NoProviders),
        }
    }

    /// Dispatch to at most two providers and require both to agree on the
    /// leading decision keyword before accepting the verdict; used when
    /// `cross_validate` is set for higher-stakes triggers.
    pub async fn analyze_cross_validated(
        &self,
        request: AnalysisRequest,
        cache_key: &str,
    ) -> Result<AnalysisResponse, LlmError> {
        if self.providers.len() < 2 {
            return self.analyze(request, cache_key).await;
        }

        self.check_rate_limit()?;

        let mut responses = Vec::new();
        let mut budget_blocked = false;
        for provider in self.providers.iter().take(2) {
            if !provider.available() {
                continue;
            }
            let cost = provider.estimate_cost(&request);
            if !self.can_afford(cost) {
                budget_blocked = true;
                continue;
            }
            let fut = provider.analyze(request.clone());
            match tokio::time::timeout(self.call_timeout, fut).await {
                Ok(Ok(response)) => {
                    self.record_spend(cost);
                    responses.push(response);
                }
                Ok(Err(e)) => warn!(provider = provider.name(), error = %e, "cross-validation call failed"),
                Err(_) => warn!(provider = provider.name(), "cross-validation call timed out"),
            }
        }

        if responses.is_empty() {
            return Err(if budget_blocked {
                LlmError::BudgetExceeded
            } else {
                LlmError::NoProviders
            });
        }
        if responses.len() == 1 {
            return Ok(responses.into_iter().next().unwrap());
        }

        let keyword = |text: &str| -> String {
            text.trim()
                .split(':')
                .next()
                .unwrap_or("")
                .trim()
                .to_ascii_uppercase()
        };
        let first_keyword = keyword(&responses[0].text);
        let second_keyword = keyword(&responses[1].text);

        if first_keyword == second_keyword {
            Ok(responses.into_iter().next().unwrap())
        } else {
            // Disagreement escalates to the more conservative verdict.
            let rank = |k: &str| match k {
                "DENY" => 2,
                "ASK" => 1,
                _ => 0,
            };
            responses.sort_by_key(|r| std::cmp::Reverse(rank(&keyword(&r.text))));
            Ok(responses.into_iter().next().unwrap())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::provider::LlmProvider;
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedProvider {
        name: &'static str,
        text: &'static str,
        calls: AtomicUsize,
    }

    impl LlmProvider for FixedProvider {
        fn name(&self) -> &str {
            self.name
        }

        fn analyze(
            &self,
            _request: AnalysisRequest,
        ) -> Pin<Box<dyn Future<Output = Result<AnalysisResponse, LlmError>> + Send + '_>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let text = self.text.to_string();
            let name = self.name.to_string();
            Box::pin(async move {
                Ok(AnalysisResponse {
                    text,
                    provider: name.clone(),
                    model: "fixed".to_string(),
                    confidence: 0.9,
                    cached: false,
                })
            })
        }
    }

    struct FailingProvider;

    impl LlmProvider for FailingProvider {
        fn name(&self) -> &str {
            "failing"
        }

        fn analyze(
            &self,
            _request: AnalysisRequest,
        ) -> Pin<Box<dyn Future<Output = Result<AnalysisResponse, LlmError>> + Send + '_>> {
            Box::pin(async {
                Err(LlmError::Provider {
                    provider: "failing".to_string(),
                    message: "boom".to_string(),
                })
            })
        }
    }

    fn request() -> AnalysisRequest {
        AnalysisRequest {
            system_prompt: "sys".to_string(),
            user_prompt: "user".to_string(),
            max_tokens: 64,
        }
    }

    #[tokio::test]
    async fn no_providers_is_an_error() {
        let manager = LlmManager::new(vec![], Duration::from_secs(60), 0, 0, 0.0);
        let err = manager.analyze(request(), "key").await.unwrap_err();
        assert!(matches!(err, LlmError::NoProviders));
    }

    #[tokio::test]
    async fn falls_back_to_second_provider_on_failure() {
        let providers: Vec<Arc<dyn LlmProvider>> = vec![
            Arc::new(FailingProvider),
            Arc::new(FixedProvider {
                name: "good",
                text: "ALLOW: looks fine",
                calls: AtomicUsize::new(0),
            }),
        ];
        let manager = LlmManager::new(providers, Duration::from_secs(60), 0, 0, 0.0);
        let response = manager.analyze(request(), "key").await.unwrap();
        assert_eq!(response.provider, "good");
    }

    #[tokio::test]
    async fn cache_hit_avoids_second_provider_call() {
        let provider = Arc::new(FixedProvider {
            name: "p",
            text: "ALLOW: ok",
            calls: AtomicUsize::new(0),
        });
        let providers: Vec<Arc<dyn LlmProvider>> = vec![provider.clone()];
        let manager = LlmManager::new(providers, Duration::from_secs(60), 0, 0, 0.0);
        manager.analyze(request(), "key").await.unwrap();
        manager.analyze(request(), "key").await.unwrap();
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn zero_budget_never_blocks() {
        let providers: Vec<Arc<dyn LlmProvider>> = vec![Arc::new(FixedProvider {
            name: "p",
            text: "ALLOW: ok",
            calls: AtomicUsize::new(0),
        })];
        let manager = LlmManager::new(providers, Duration::from_secs(60), 0, 0, 0.0);
        assert!(manager.analyze(request(), "a").await.is_ok());
        assert!(manager.analyze(request(), "b").await.is_ok());
    }

    #[tokio::test]
    async fn exhausted_budget_blocks_further_calls() {
        let providers: Vec<Arc<dyn LlmProvider>> = vec![Arc::new(FixedProvider {
            name: "p",
            text: "ALLOW: ok",
            calls: AtomicUsize::new(0),
        })];
        let manager = LlmManager::new(providers, Duration::from_secs(60), 0, 0, 0.005);
        let err = manager.analyze(request(), "unique-key").await.unwrap_err();
        assert!(matches!(err, LlmError::BudgetExceeded));
    }

    #[tokio::test]
    async fn token_bucket_allows_burst_then_rate_limits() {
        let providers: Vec<Arc<dyn LlmProvider>> = vec![Arc::new(FixedProvider {
            name: "p",
            text: "ALLOW: ok",
            calls: AtomicUsize::new(0),
        })];
        let manager = LlmManager::new(providers, Duration::from_secs(60), 60, 2, 0.0);
        assert!(manager.analyze(request(), "a").await.is_ok());
        assert!(manager.analyze(request(), "b").await.is_ok());
        let err = manager.analyze(request(), "c").await.unwrap_err();
        assert!(matches!(err, LlmError::RateLimited));
    }

    #[tokio::test]
    async fn cross_validation_agrees_on_matching_keyword() {
        let providers: Vec<Arc<dyn LlmProvider>> = vec![
            Arc::new(FixedProvider {
                name: "a",
                text: "DENY: risky",
                calls: AtomicUsize::new(0),
            }),
            Arc::new(FixedProvider {
                name: "b",
                text: "DENY: also risky",
                calls: AtomicUsize::new(0),
            }),
        ];
        let manager = LlmManager::new(providers, Duration::from_secs(60), 0, 0, 0.0);
        let response = manager.analyze_cross_validated(request(), "key").await.unwrap();
        assert!(response.text.starts_with("DENY"));
    }

    #[tokio::test]
    async fn cross_validation_disagreement_escalates_to_deny() {
        let providers: Vec<Arc<dyn LlmProvider>> = vec![
            Arc::new(FixedProvider {
                name: "a",
                text: "ALLOW: fine",
                calls: AtomicUsize::new(0),
            }),
            Arc::new(FixedProvider {
                name: "b",
                text: "DENY: risky",
                calls: AtomicUsize::new(0),
            }),
        ];
        let manager = LlmManager::new(providers, Duration::from_secs(60), 0, 0, 0.0);
        let response = manager.analyze_cross_validated(request(), "key").await.unwrap();
        assert!(response.text.starts_with("DENY"));
    }
}
