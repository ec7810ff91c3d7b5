use std::time::Instant;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{
    AnalyticsError, AnalyticsResult, CostScope, CostSource, DelegatedSession, retry::with_retry,
};
use crate::{
    config::{AnalyticsConfig, RetryConfig},
    db::DateRange,
    models::DailyCost,
    observability::metrics,
};

/// Header carrying the role a request is made on behalf of.
const DELEGATED_ROLE_HEADER: &str = "x-delegated-role";

#[derive(Debug, Serialize)]
struct TimePeriod {
    start: NaiveDate,
    end: NaiveDate,
}

impl From<DateRange> for TimePeriod {
    fn from(range: DateRange) -> Self {
        Self {
            start: range.start,
            end: range.end,
        }
    }
}

#[derive(Debug, Serialize)]
struct DailyCostRequest<'a> {
    scope: &'a CostScope,
    time_period: TimePeriod,
}

#[derive(Debug, Serialize)]
struct TotalSpendRequest {
    time_period: TimePeriod,
}

#[derive(Debug, Deserialize)]
struct CostAmount {
    amount: Decimal,
    #[serde(default)]
    unit: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DailyCostEntry {
    date: NaiveDate,
    #[serde(flatten)]
    cost: CostAmount,
}

#[derive(Debug, Deserialize)]
struct DailyCostResponse {
    results: Vec<DailyCostEntry>,
}

#[derive(Debug, Deserialize)]
struct TotalSpendResponse {
    total: CostAmount,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
}

/// Cost source backed by a JSON-over-HTTP analytics API.
#[derive(Clone)]
pub struct HttpCostSource {
    http_client: Client,
    base_url: String,
    currency: String,
    retry_config: RetryConfig,
}

impl HttpCostSource {
    pub fn from_config(config: &AnalyticsConfig) -> AnalyticsResult<Self> {
        let base_url = config.base_url.clone().ok_or_else(|| {
            AnalyticsError::NotConfigured("analytics.base_url is not set".to_string())
        })?;

        let http_client = Client::builder().timeout(config.timeout()).build()?;

        Ok(Self::with_client(
            http_client,
            base_url,
            config.currency.clone(),
            config.retry.clone(),
        ))
    }

    pub fn with_client(
        http_client: Client,
        base_url: impl Into<String>,
        currency: impl Into<String>,
        retry_config: RetryConfig,
    ) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }

        Self {
            http_client,
            base_url,
            currency: currency.into(),
            retry_config,
        }
    }

    async fn post<B, T>(
        &self,
        operation: &str,
        path: &str,
        session: &DelegatedSession,
        body: &B,
    ) -> AnalyticsResult<T>
    where
        B: Serialize + Sync,
        T: serde::de::DeserializeOwned,
    {
        if session.is_expired_at(Utc::now()) {
            return Err(AnalyticsError::Session {
                role: session.role.clone(),
                message: "session has expired".to_string(),
            });
        }

        let url = format!("{}{}", self.base_url, path);
        let started = Instant::now();

        let result = with_retry(&self.retry_config, operation, || {
            self.http_client
                .post(&url)
                .bearer_auth(session.token())
                .header(DELEGATED_ROLE_HEADER, &session.role)
                .json(body)
                .send()
        })
        .await;

        let response = match result {
            Ok(response) => response,
            Err(e) => {
                metrics::record_analytics_request(
                    operation,
                    "error",
                    started.elapsed().as_secs_f64(),
                );
                return Err(e.into());
            }
        };

        let status = response.status();
        let text = response.text().await?;
        metrics::record_analytics_request(
            operation,
            if status.is_success() { "success" } else { "error" },
            started.elapsed().as_secs_f64(),
        );

        if !status.is_success() {
            let message = serde_json::from_str::<ErrorBody>(&text)
                .map(|body| body.error.message)
                .unwrap_or(text);
            return Err(AnalyticsError::Api {
                status: status.as_u16(),
                message,
            });
        }

        serde_json::from_str(&text).map_err(|e| AnalyticsError::InvalidResponse(e.to_string()))
    }

    fn check_unit(&self, unit: Option<&str>) {
        if let Some(unit) = unit
            && !unit.eq_ignore_ascii_case(&self.currency)
        {
            tracing::warn!(
                expected = %self.currency,
                reported = %unit,
                "Analytics source reported an unexpected currency"
            );
        }
    }
}

#[async_trait]
impl CostSource for HttpCostSource {
    async fn daily_costs(
        &self,
        session: &DelegatedSession,
        scope: &CostScope,
        range: DateRange,
    ) -> AnalyticsResult<Vec<DailyCost>> {
        if range.is_empty_half_open() {
            return Ok(Vec::new());
        }

        let response: DailyCostResponse = self
            .post(
                "daily_costs",
                "/v1/cost/daily",
                session,
                &DailyCostRequest {
                    scope,
                    time_period: range.into(),
                },
            )
            .await?;

        let mut costs = Vec::with_capacity(response.results.len());
        for entry in response.results {
            if entry.date < range.start || entry.date >= range.end {
                return Err(AnalyticsError::InvalidResponse(format!(
                    "day {} is outside the requested range {}..{}",
                    entry.date, range.start, range.end
                )));
            }
            self.check_unit(entry.cost.unit.as_deref());
            costs.push(DailyCost {
                date: entry.date,
                amount: entry.cost.amount,
            });
        }

        Ok(costs)
    }

    async fn total_spend(
        &self,
        session: &DelegatedSession,
        range: DateRange,
    ) -> AnalyticsResult<Decimal> {
        let response: TotalSpendResponse = self
            .post(
                "total_spend",
                "/v1/cost/total",
                session,
                &TotalSpendRequest {
                    time_period: range.into(),
                },
            )
            .await?;

        self.check_unit(response.total.unit.as_deref());
        Ok(response.total.amount)
    }
}
