// src/collect/company.rs
//! OpenCorporates company search. The API token is optional; anonymous
//! requests are rate limited upstream.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Deserialize;

use super::{require_query, send_text, Collector, RawItem};
use crate::registry::{DataSource, SourceKind};

pub const DEFAULT_ENDPOINT: &str = "https://api.opencorporates.com/v0.4/companies/search";

#[derive(Debug, Deserialize)]
struct SearchResponse {
    results: Results,
}

#[derive(Debug, Deserialize)]
struct Results {
    #[serde(default)]
    companies: Vec<Wrapper>,
}

#[derive(Debug, Deserialize)]
struct Wrapper {
    company: Company,
}

#[derive(Debug, Deserialize, serde::Serialize)]
struct Company {
    name: String,
    company_number: Option<String>,
    jurisdiction_code: Option<String>,
    incorporation_date: Option<String>,
    company_type: Option<String>,
    current_status: Option<String>,
    registered_address_in_full: Option<String>,
    opencorporates_url: Option<String>,
}

pub fn parse_company_search(body: &str) -> Result<Vec<RawItem>> {
    let resp: SearchResponse =
        serde_json::from_str(body).context("parsing opencorporates json")?;

    Ok(resp
        .results
        .companies
        .into_iter()
        .map(|w| {
            let c = w.company;
            let facts: Vec<String> = [
                c.company_type.as_deref().map(|t| format!("Type: {t}")),
                c.current_status.as_deref().map(|s| format!("Status: {s}")),
                c.jurisdiction_code.as_deref().map(|j| format!("Jurisdiction: {j}")),
                c.registered_address_in_full
                    .as_deref()
                    .map(|a| format!("Address: {a}")),
            ]
            .into_iter()
            .flatten()
            .collect();

            let external_id = match (&c.jurisdiction_code, &c.company_number) {
                (Some(j), Some(n)) => Some(format!("{j}/{n}")),
                _ => c.opencorporates_url.clone(),
            };
            let published_at = c
                .incorporation_date
                .as_deref()
                .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|d| d.and_utc());

            RawItem {
                external_id,
                title: c.name.clone(),
                text: facts.join("; "),
                url: c.opencorporates_url.clone(),
                author: None,
                published_at,
                raw: serde_json::to_value(&c).unwrap_or_default(),
            }
        })
        .collect())
}

pub struct OpenCorporatesCollector {
    client: reqwest::Client,
}

impl OpenCorporatesCollector {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Collector for OpenCorporatesCollector {
    fn kind(&self) -> SourceKind {
        SourceKind::CompanyRegistry
    }

    async fn collect(&self, source: &DataSource) -> Result<Vec<RawItem>> {
        let endpoint = source.endpoint.as_deref().unwrap_or(DEFAULT_ENDPOINT);
        let token = source.credential();

        let mut out = Vec::new();
        for term in require_query(source)? {
            let mut req = self
                .client
                .get(endpoint)
                .query(&[("q", term.as_str()), ("per_page", "100")]);
            if let Some(t) = &token {
                req = req.query(&[("api_token", t.as_str())]);
            }
            let body = send_text(req, "opencorporates").await?;
            out.extend(parse_company_search(&body)?);
        }
        tracing::debug!(source_id = %source.id, n = out.len(), "company search done");
        Ok(out)
    }
}
