//! Chat text for engine replies, lookups and progress notices.
//!
//! Output is Telegram-flavoured Markdown; the channel falls back to plain
//! text when Telegram refuses to parse it.

use rust_decimal::Decimal;

use crate::conversation::{DeploySummary, KeyPurpose, Progress, Prompt, Reply};
use crate::error::GatewayError;
use crate::gateway::{DeployResult, FeeDistribution};

/// Longest JSON payload shown for a lookup.
pub const MAX_PAYLOAD_CHARS: usize = 1000;
/// Pool ids and tx hashes are cut to this many characters.
pub const SHORT_ID_CHARS: usize = 20;

const BASESCAN_ADDRESS_URL: &str = "https://basescan.org/address";

const COMMAND_LIST: &str = concat!(
    "  /deploy — Deploy a new token\n",
    "  /simulate — Simulate a deploy\n",
    "  /portfolio — Check your portfolio\n",
    "  /fees — View claimable fees\n",
    "  /claimfees — Claim your fees\n",
    "  /token <address> — Look up a token\n",
    "  /setkey — Update your Bankr API key\n",
    "  /cancel — Cancel current action",
);

pub fn help() -> String {
    format!("👾 *bantrat — Commands*\n\n{COMMAND_LIST}")
}

pub fn unknown_command(name: &str) -> String {
    format!("🤔 I don't know `{name}`. Use /help to see what I can do.")
}

pub fn token_usage() -> String {
    "Usage: `/token <contract_address>`".to_string()
}

pub fn invalid_address() -> String {
    "❌ That doesn't look like a contract address.\n\nUsage: `/token <contract_address>`"
        .to_string()
}

pub fn missing_credential() -> String {
    "🔑 You haven't set your Bankr API key yet.\n\nUse /setkey to add it and get started!"
        .to_string()
}

pub fn internal_error(error: &dyn std::fmt::Display) -> String {
    format!("⚠️ Something went wrong on our side: {error}\n\nPlease try again.")
}

/// Render one engine reply.
pub fn reply(reply: &Reply) -> String {
    match reply {
        Reply::Prompt(prompt) => self::prompt(prompt),
        Reply::WelcomeBack => format!(
            "👾 *bantrat*\n\nWelcome back! Your Bankr API key is already set.\n\n\
             Commands:\n{COMMAND_LIST}"
        ),
        Reply::InvalidKeyFormat => {
            "❌ That doesn't look like a valid Bankr API key.\n\
             It should start with `bk_`. Please try again."
                .to_string()
        }
        Reply::KeyRejected { reason } => {
            format!("❌ Invalid API key ({reason}). Please check and try again.")
        }
        Reply::KeySaved => {
            "✅ *API key saved!* You're all set.\n\nUse /help to see what I can do.".to_string()
        }
        Reply::MissingCredential => missing_credential(),
        Reply::Cancelled { had_session: true } => "❌ Cancelled.".to_string(),
        Reply::Cancelled { had_session: false } => "Nothing to cancel.".to_string(),
        Reply::DeployAborted => "❌ Deploy cancelled.".to_string(),
        Reply::Deployed { name, result } => deployed(name, result),
        Reply::DeployFailed { name, error } => deploy_failed(name, error),
        Reply::NoSession => {
            "🤔 I'm not waiting on anything from you right now.\n\nUse /help to see what I can do."
                .to_string()
        }
    }
}

fn prompt(prompt: &Prompt) -> String {
    match prompt {
        Prompt::ApiKey {
            purpose: KeyPurpose::Register,
        } => "👾 *Welcome to bantrat!*\n\n\
              Your on-chain security sentinel. Deploy tokens, scan fees, protect the claw.\n\n\
              To get started, I need your *Bankr API key*.\n\n\
              👉 Get one at [bankr.bot/api](https://bankr.bot/api) and make sure \
              *Agent API access* is enabled.\n\n\
              Send your API key now:"
            .to_string(),
        Prompt::ApiKey {
            purpose: KeyPurpose::Update,
        } => "🔑 Send your new Bankr API key now.\n\n⚠️ Keep it private. Don't share it with anyone."
            .to_string(),
        Prompt::TokenName {
            simulate_only: false,
        } => "🚀 *Token Deploy*\n\nWhat's the token name?".to_string(),
        Prompt::TokenName {
            simulate_only: true,
        } => "🔬 *Simulate Deploy*\n\nWhat's the token name?".to_string(),
        Prompt::TokenSymbol => {
            "Token symbol? (e.g. CLAW) or type `skip` to auto-generate".to_string()
        }
        Prompt::TokenDescription => "Short description? Or type `skip`".to_string(),
        Prompt::TokenImage => "Image URL? Or type `skip`".to_string(),
        Prompt::Confirm(summary) => confirm_summary(summary),
    }
}

fn confirm_summary(summary: &DeploySummary) -> String {
    let banner = if summary.simulate_only {
        "[SIMULATE] "
    } else {
        ""
    };
    format!(
        "*{banner}Ready to deploy:*\n\n\
         \x20 Name: `{}`\n\
         \x20 Symbol: `{}`\n\
         \x20 Description: {}\n\
         \x20 Image: {}\n\n\
         Type `confirm` to proceed or /cancel to abort.",
        summary.name,
        summary.symbol.as_deref().unwrap_or("auto"),
        summary.description.as_deref().unwrap_or("_none_"),
        summary.image.as_deref().unwrap_or("_none_"),
    )
}

fn deployed(name: &str, result: &DeployResult) -> String {
    if result.simulated {
        return format!(
            "🔬 Simulated *{name}*\n\n  Contract: `{}`",
            result.token_address
        );
    }

    let mut msg = format!(
        "✅ Deployed *{name}*\n\n  Contract: `{}`\n",
        result.token_address
    );
    if let Some(pool_id) = &result.pool_id {
        msg.push_str(&format!("  Pool ID: `{}`\n", shorten(pool_id, SHORT_ID_CHARS)));
    }
    if let Some(tx_hash) = &result.tx_hash {
        msg.push_str(&format!("  TX: `{}`\n", shorten(tx_hash, SHORT_ID_CHARS)));
    }
    if let Some(chain) = &result.chain {
        msg.push_str(&format!("  Chain: {chain}\n"));
    }
    if let Some(dist) = result.fee_distribution.as_ref().filter(|d| !d.0.is_empty()) {
        msg.push_str(&format!("\n*Fee Distribution:*\n{}\n", fee_distribution(dist)));
    }
    msg.push_str(&format!(
        "\n🔍 [View on Basescan]({BASESCAN_ADDRESS_URL}/{})",
        result.token_address
    ));
    msg
}

fn deploy_failed(name: &str, error: &GatewayError) -> String {
    match error {
        e if e.is_transport() => format!(
            "⚠️ Lost contact with Bankr while deploying *{name}* ({e}).\n\n\
             The deploy may or may not have gone through. \
             Check /portfolio before trying again."
        ),
        GatewayError::UnexpectedResponse(detail) => {
            format!("⚠️ Unexpected response from Bankr: {detail}")
        }
        e => format!("❌ Error: {e}"),
    }
}

/// One line per fee recipient: role, percentage and shortened address.
pub fn fee_distribution(dist: &FeeDistribution) -> String {
    dist.iter()
        .map(|(role, share)| {
            let pct = Decimal::new(i64::from(share.bps), 2).normalize();
            format!(
                "  • {}: {pct}% → `{}`",
                capitalize(role),
                shorten(&share.address, 10)
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Result of a stateless API call, shown as truncated JSON.
pub fn payload(title: &str, value: &serde_json::Value) -> String {
    format!(
        "{title}\n\n```\n{}\n```",
        truncate(&value.to_string(), MAX_PAYLOAD_CHARS)
    )
}

/// A failed stateless API call.
pub fn gateway_error(error: &GatewayError) -> String {
    match error {
        GatewayError::Auth(reason) => {
            format!("❌ Bankr rejected your API key ({reason}). Use /setkey to update it.")
        }
        e => format!("❌ Error: {e}"),
    }
}

pub fn progress(progress: Progress) -> String {
    match progress {
        Progress::VerifyingKey => "⏳ Verifying your API key...".to_string(),
        Progress::Deploying {
            simulate_only: false,
        } => "⏳ Deploying... please wait.".to_string(),
        Progress::Deploying {
            simulate_only: true,
        } => "⏳ Simulating... please wait.".to_string(),
    }
}

/// Cut to `max` characters, marking the cut with `...`.
pub fn shorten(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let cut: String = text.chars().take(max).collect();
    format!("{cut}...")
}

/// Cut to at most `max` characters.
fn truncate(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
