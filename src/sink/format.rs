//! Human-readable renderings of an [`Event`].

use std::fmt::Write as _;

use serde::Serialize;

use crate::{event::Event, source::networks};

/// Multi-line plain-text description of an event.
///
/// ```text
/// Transfer #1a2b3c4d on chain 1
/// Block: 12 (log 4, tx 3)
/// Transaction: 0x1111…
/// Contract: 0x0000…00aA
/// Block hash: 0xbbbb…
/// from: 0x1000…
/// value: 42
/// ```
#[must_use]
pub fn humanize(event: &Event) -> String {
    let mut text =
        format!("{} #{} on chain {}\n", event.event_type, event.short_id(), event.chain_id);
    let _ = writeln!(
        text,
        "Block: {} (log {}, tx {})",
        event.block_number, event.log_index, event.tx_index
    );
    let _ = writeln!(text, "Transaction: {}", event.tx_hash);
    let _ = writeln!(text, "Contract: {}", event.contract_address);
    let _ = write!(text, "Block hash: {}", event.block_hash);
    for arg in event.args.iter() {
        let _ = write!(text, "\n{}: {}", arg.name, arg.value.render());
    }
    text
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
    pub inline: bool,
}

/// A rich chat message: title, colored side bar and a list of fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Embed {
    pub title: String,
    pub description: String,
    pub color: u32,
    pub timestamp: String,
    pub fields: Vec<EmbedField>,
}

/// Discord rejects embeds with a field value longer than this many characters.
pub const MAX_FIELD_VALUE: usize = 1024;

impl Embed {
    fn field(&mut self, name: impl Into<String>, value: impl Into<String>, inline: bool) {
        let value = clip(value.into(), MAX_FIELD_VALUE);
        self.fields.push(EmbedField { name: name.into(), value, inline });
    }
}

/// Cuts `text` to at most `limit` characters, ending with `…` when shortened.
fn clip(text: String, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text;
    }
    let mut clipped: String = text.chars().take(limit.saturating_sub(1)).collect();
    clipped.push('…');
    clipped
}

/// Builds the chat embed for `event`, colored and titled from the source's display metadata.
///
/// Contract, transaction and block values link to the chain's explorer when it is known.
#[must_use]
pub fn embed(event: &Event) -> Embed {
    let display = &event.display;
    let mut embed = Embed {
        title: format!("New {} {} Event", display.name, event.event_type),
        description: display.description.clone(),
        color: display.color,
        timestamp: event.observed_at.to_rfc3339(),
        fields: vec![],
    };

    let explorer = networks::network(event.chain_id).map(|network| network.explorer);
    let link = |path: String, text: String| match explorer {
        Some(explorer) => format!("[{text}](https://{explorer}/{path})"),
        None => text,
    };

    let contract = event.contract_address.to_string();
    let tx_hash = event.tx_hash.to_string();
    embed.field("Contract Address", link(format!("address/{contract}"), contract), false);
    embed.field("Transaction Hash", link(format!("tx/{tx_hash}"), tx_hash), false);
    embed.field(
        "Block Number",
        link(format!("block/{}", event.block_number), event.block_number.to_string()),
        true,
    );
    embed.field("Transaction Index", event.tx_index.to_string(), true);
    embed.field("Log Index", event.log_index.to_string(), true);
    for arg in event.args.iter() {
        let value = clip(arg.value.render(), MAX_FIELD_VALUE - 2);
        embed.field(arg.name.clone(), format!("`{value}`"), false);
    }
    embed
}
