//! Slash-command parsing.
//!
//! Anything that does not start with `/` is handed to the conversation
//! engine untouched.

/// One parsed inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    SetKey,
    Deploy,
    Simulate,
    Portfolio,
    Fees,
    ClaimFees,
    /// `/token <address>`; `None` when the address was omitted.
    Token(Option<String>),
    Help,
    Cancel,
    /// A slash command we don't know, without its `@bot` suffix.
    Unknown(String),
    /// Free text for the active conversation.
    Text(String),
}

impl Command {
    /// Parse message content into a Command.
    pub fn parse(content: &str) -> Self {
        let trimmed = content.trim();
        if !trimmed.starts_with('/') {
            return Command::Text(content.to_string());
        }

        let mut parts = trimmed.split_whitespace();
        let head = parts.next().unwrap_or_default();
        // Group chats address commands as `/deploy@bantrat_bot`
        let name = head.split('@').next().unwrap_or(head).to_lowercase();

        match name.as_str() {
            "/start" => Command::Start,
            "/setkey" => Command::SetKey,
            "/deploy" => Command::Deploy,
            "/simulate" => Command::Simulate,
            "/portfolio" => Command::Portfolio,
            "/fees" => Command::Fees,
            "/claimfees" => Command::ClaimFees,
            "/token" => Command::Token(parts.next().map(str::to_string)),
            "/help" | "/?" => Command::Help,
            "/cancel" => Command::Cancel,
            _ => Command::Unknown(name),
        }
    }
}

/// Addresses are interpolated into the request path, so only hex-ish
/// identifiers are accepted.
pub fn is_plausible_address(address: &str) -> bool {
    !address.is_empty() && address.len() <= 128 && address.chars().all(|c| c.is_ascii_alphanumeric())
}
