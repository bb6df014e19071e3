// src/services/schedule.rs

//! Cargo schedule fetching from the airport site.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Local, NaiveDate, NaiveTime};
use reqwest::Client;

use crate::error::{AppError, Result};
use crate::models::{Direction, FetcherConfig, RawRow, yyyymmdd};
use crate::services::parse::{parse_schedule, reports_no_registered_data};
use crate::utils::http;

/// Whole-day window requested from the site.
const START_TIME: &str = "0000";
const END_TIME: &str = "2359";

/// Source of raw schedule rows for one day.
#[async_trait]
pub trait ScheduleSource: Send + Sync {
    /// Fetch the published rows for one airport, day and direction.
    ///
    /// An empty schedule is `Ok(vec![])`. Transport failures are
    /// [`AppError::Fetch`]; unusable responses are [`AppError::Parse`].
    async fn fetch(&self, airport: &str, date: NaiveDate, direction: Direction)
    -> Result<Vec<RawRow>>;
}

/// Client for the Incheon airport cargo schedule endpoints.
pub struct AirportScheduleClient {
    config: Arc<FetcherConfig>,
    client: Client,
}

impl AirportScheduleClient {
    /// Create a new client with the given configuration.
    pub fn new(config: Arc<FetcherConfig>) -> Result<Self> {
        let client = http::create_async_client(&config)?;
        Ok(Self { config, client })
    }

    /// Query string the site expects for one day.
    pub fn query_params(
        &self,
        airport: &str,
        date: NaiveDate,
        now: NaiveTime,
    ) -> Vec<(&'static str, String)> {
        let day = date.format(yyyymmdd::FORMAT).to_string();
        let tomorrow = (date + Duration::days(1))
            .format(yyyymmdd::FORMAT)
            .to_string();

        vec![
            ("curDate", day.clone()),
            ("startTime", START_TIME.into()),
            ("airPort", airport.into()),
            ("endTime", END_TIME.into()),
            ("todayDate", day.clone()),
            ("tomorrowDate", tomorrow),
            ("todayTime", now.format("%H%M").to_string()),
            ("curStime", START_TIME.into()),
            ("curEtime", END_TIME.into()),
            ("siteId", self.config.site_id.clone()),
            ("langSe", self.config.lang.clone()),
            ("scheduleListLength", "2".into()),
            ("termId", String::new()),
            ("daySel", day),
            ("fromTime", START_TIME.into()),
            ("toTime", END_TIME.into()),
            ("airport", airport.into()),
            ("airline", String::new()),
            ("airplane", String::new()),
        ]
    }

    async fn get_page(
        &self,
        url: &str,
        params: &[(&'static str, String)],
        context: &str,
    ) -> Result<String> {
        let url = url::Url::parse_with_params(url, params)?;
        log::debug!("GET {}", url);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| AppError::fetch(context, e))?;

        response.text().await.map_err(|e| AppError::fetch(context, e))
    }
}

#[async_trait]
impl ScheduleSource for AirportScheduleClient {
    async fn fetch(
        &self,
        airport: &str,
        date: NaiveDate,
        direction: Direction,
    ) -> Result<Vec<RawRow>> {
        let context = format!(
            "{} {} {}",
            direction,
            airport,
            date.format(yyyymmdd::FORMAT)
        );
        let params = self.query_params(airport, date, Local::now().time());

        let mut body = self
            .get_page(self.config.endpoint(direction), &params, &context)
            .await?;

        if reports_no_registered_data(&body) {
            log::info!("{}: endpoint has no data, trying schedule page", context);
            body = self
                .get_page(self.config.fallback_endpoint(direction), &params, &context)
                .await?;
        }

        parse_schedule(&body, &context)
    }
}
