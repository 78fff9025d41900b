use std::collections::BTreeMap;

use alloy::primitives::{Address, B256};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};

use crate::{
    event::{Event, EventArgs},
    sink::{Sink, SinkError, SinkKind},
    types::ChainId,
};

/// Optional per-webhook predicates. Every predicate that is set must hold for the webhook to
/// receive an event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookFilter {
    pub contract_address: Option<Address>,
    pub event_types: Option<Vec<String>>,
    pub block_numbers: Option<Vec<u64>>,
    /// Argument name to expected rendered value.
    pub data_fields: Option<BTreeMap<String, String>>,
    /// Inclusive lower bound on the time the event was observed.
    pub after: Option<DateTime<Utc>>,
    /// Inclusive upper bound on the time the event was observed.
    pub before: Option<DateTime<Utc>>,
}

impl WebhookFilter {
    #[must_use]
    pub fn matches(&self, event: &Event) -> bool {
        if self.contract_address.is_some_and(|address| address != event.contract_address) {
            return false;
        }
        if let Some(types) = &self.event_types
            && !types.iter().any(|event_type| *event_type == event.event_type)
        {
            return false;
        }
        if let Some(blocks) = &self.block_numbers
            && !blocks.contains(&event.block_number)
        {
            return false;
        }
        if let Some(fields) = &self.data_fields {
            let all_match = fields.iter().all(|(name, expected)| {
                event.args.get(name).is_some_and(|value| value.render() == *expected)
            });
            if !all_match {
                return false;
            }
        }
        if self.after.is_some_and(|after| event.observed_at < after) {
            return false;
        }
        if self.before.is_some_and(|before| event.observed_at > before) {
            return false;
        }
        true
    }
}

/// Webhook body: `data` carries the decoded arguments, the log coordinates sit beside it.
#[derive(Serialize)]
struct Payload<'a> {
    event_type: &'a str,
    data: &'a EventArgs,
    chain_id: ChainId,
    contract_address: Address,
    block_number: u64,
    tx_hash: B256,
    log_index: u64,
}

impl<'a> From<&'a Event> for Payload<'a> {
    fn from(event: &'a Event) -> Self {
        Self {
            event_type: &event.event_type,
            data: &event.args,
            chain_id: event.chain_id,
            contract_address: event.contract_address,
            block_number: event.block_number,
            tx_hash: event.tx_hash,
            log_index: event.log_index,
        }
    }
}

/// Posts each event as JSON to a fixed URL.
///
/// Any non-2xx response is a failure; there are no retries.
#[derive(Debug, Clone)]
pub struct WebhookSink {
    name: String,
    url: Url,
    filter: WebhookFilter,
    client: Client,
}

impl WebhookSink {
    #[must_use]
    pub fn new(name: impl Into<String>, url: Url) -> Self {
        Self::with_client(name, url, Client::new())
    }

    /// Shares `client`'s connection pool with other sinks.
    #[must_use]
    pub fn with_client(name: impl Into<String>, url: Url, client: Client) -> Self {
        Self { name: name.into(), url, filter: WebhookFilter::default(), client }
    }

    #[must_use]
    pub fn filter(mut self, filter: WebhookFilter) -> Self {
        self.filter = filter;
        self
    }

    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl Sink for WebhookSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> SinkKind {
        SinkKind::Webhook
    }

    fn accepts(&self, event: &Event) -> bool {
        self.filter.matches(event)
    }

    async fn notify(&self, event: &Event) -> Result<(), SinkError> {
        let payload = Payload::from(event);
        let response = self.client.post(self.url.clone()).json(&payload).send().await?;

        let status = response.status();
        if !status.is_success() {
            warn!(sink = %self.name, status = %status, "Webhook rejected event");
            return Err(SinkError::Status(status));
        }
        trace!(sink = %self.name, event_id = %event.short_id(), "Webhook delivered");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::sample_event;
    use chrono::TimeDelta;

    #[test]
    fn empty_filter_matches_everything() {
        assert!(WebhookFilter::default().matches(&sample_event(1, 0)));
    }

    #[test]
    fn every_set_predicate_must_hold() {
        let event = sample_event(12, 0);
        let filter = WebhookFilter {
            contract_address: Some(event.contract_address),
            event_types: Some(vec!["Approval".into(), "Transfer".into()]),
            block_numbers: Some(vec![11, 12]),
            ..WebhookFilter::default()
        };
        assert!(filter.matches(&event));

        let wrong_block = WebhookFilter { block_numbers: Some(vec![13]), ..filter.clone() };
        assert!(!wrong_block.matches(&event));

        let wrong_type = WebhookFilter { event_types: Some(vec!["Approval".into()]), ..filter };
        assert!(!wrong_type.matches(&event));
    }

    #[test]
    fn data_fields_compare_rendered_values() {
        let event = sample_event(1, 0);
        let value = event.args.get("value").unwrap().render();

        let mut fields = BTreeMap::from([("value".to_owned(), value)]);
        let filter =
            WebhookFilter { data_fields: Some(fields.clone()), ..WebhookFilter::default() };
        assert!(filter.matches(&event));

        fields.insert("missing".into(), "1".into());
        let filter = WebhookFilter { data_fields: Some(fields), ..WebhookFilter::default() };
        assert!(!filter.matches(&event));
    }

    #[test]
    fn time_bounds_are_inclusive() {
        let event = sample_event(1, 0);
        let at = event.observed_at;
        let second = TimeDelta::seconds(1);

        let around =
            WebhookFilter { after: Some(at), before: Some(at), ..WebhookFilter::default() };
        assert!(around.matches(&event));

        let later = WebhookFilter { after: Some(at + second), ..WebhookFilter::default() };
        assert!(!later.matches(&event));

        let earlier = WebhookFilter { before: Some(at - second), ..WebhookFilter::default() };
        assert!(!earlier.matches(&event));
    }

    #[test]
    fn payload_data_is_the_argument_map() {
        let event = sample_event(12, 3);
        let json = serde_json::to_value(Payload::from(&event)).unwrap();

        assert_eq!(json["event_type"], "Transfer");
        assert!(json["data"]["from"].is_string());
        assert_eq!(json["data"]["value"], "42");
        assert!(json["data"].get("args").is_none());
        assert_eq!(json["block_number"], 12);
        assert_eq!(json["log_index"], 3);
    }

    #[test]
    fn filter_deserializes_from_partial_toml() {
        let filter: WebhookFilter =
            toml::from_str("event_types = [\"Transfer\"]\nblock_numbers = [5]").unwrap();

        assert_eq!(filter.event_types, Some(vec!["Transfer".to_owned()]));
        assert_eq!(filter.block_numbers, Some(vec![5]));
        assert_eq!(filter.contract_address, None);
    }
}
