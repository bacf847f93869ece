use std::time::Duration;

use chrono::{NaiveDate, NaiveTime};
use coinsnap_core::{EtlError, RawResponse};
use reqwest::{Client, StatusCode};
use tracing::info;

/// One-shot fetcher for the market-data API.
///
/// Performs exactly one GET per call: a 200 answer is decoded as JSON, any
/// other status fails with the status code attached. No retry, no partial
/// result.
pub struct Fetcher {
    client: Client,
}

impl Fetcher {
    pub fn new() -> Result<Self, EtlError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| EtlError::Connection(e.to_string()))?;
        Ok(Self { client })
    }

    pub async fn fetch(&self, url: &str) -> Result<RawResponse, EtlError> {
        info!("fetching {}", url);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| EtlError::Connection(e.to_string()))?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(EtlError::Fetch {
                status: status.as_u16(),
            });
        }

        response
            .json::<RawResponse>()
            .await
            .map_err(|e| EtlError::Schema(format!("body is not the expected JSON object: {e}")))
    }
}

/// URL of the asset-listing endpoint.
pub fn assets_url(base: &str) -> String {
    format!("{}/assets", base.trim_end_matches('/'))
}

/// URL of the per-asset history endpoint with interval and millisecond
/// epoch bounds.
pub fn history_url(base: &str, asset: &str, interval: &str, start: i64, end: i64) -> String {
    format!(
        "{}/assets/{}/history?interval={}&start={}&end={}",
        base.trim_end_matches('/'),
        asset,
        interval,
        start,
        end
    )
}

/// Convert two date strings under `format` to millisecond epoch bounds
/// (start of day, UTC). Pure helper; fails with `Format` if either string
/// does not match.
pub fn date_range_millis(start: &str, end: &str, format: &str) -> Result<(i64, i64), EtlError> {
    Ok((date_millis(start, format)?, date_millis(end, format)?))
}

fn date_millis(value: &str, format: &str) -> Result<i64, EtlError> {
    let date = NaiveDate::parse_from_str(value, format).map_err(|_| EtlError::Format {
        value: value.to_string(),
        format: format.to_string(),
    })?;
    Ok(date.and_time(NaiveTime::MIN).and_utc().timestamp_millis())
}
