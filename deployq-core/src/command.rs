//! Chat text → queue intent.
//!
//! Every command starts with `deploy`, matched case-insensitively:
//!
//!   deploy help
//!   deploy add [metadata]
//!   deploy done | complete | donzo
//!   deploy current | who's deploying | who's at bat
//!   deploy next | who's next | who's on first | who's on deck
//!   deploy remove | kick <nick | me>
//!   deploy list
//!   deploy dump | debug
//!   deploy ping

/// What a chat message asks the queue to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    Help,
    Join { metadata: String },
    Finish,
    WhoNow,
    WhoNext,
    /// `target` is the raw argument; `me` means the caller.
    Remove { target: String },
    List,
    Dump,
    Ping,
}

impl Intent {
    /// Parse the text addressed to the bot. `None` if it isn't a deploy
    /// command.
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        let (head, rest) = split_word(text);
        if !head.eq_ignore_ascii_case("deploy") {
            return None;
        }

        let (keyword, args) = split_word(rest);
        let intent = match keyword.to_lowercase().as_str() {
            "help" => Self::Help,
            "add" => Self::Join {
                metadata: args.to_string(),
            },
            "done" | "complete" | "donzo" => Self::Finish,
            "current" => Self::WhoNow,
            "next" => Self::WhoNext,
            "who's" | "whos" | "who\u{2019}s" => parse_whos(args)?,
            "remove" | "kick" if !args.is_empty() => Self::Remove {
                target: args.to_string(),
            },
            "list" => Self::List,
            "dump" | "debug" => Self::Dump,
            "ping" => Self::Ping,
            _ => return None,
        };
        Some(intent)
    }
}

fn parse_whos(args: &str) -> Option<Intent> {
    let phrase = args.split_whitespace().collect::<Vec<_>>().join(" ");
    match phrase.to_lowercase().as_str() {
        "deploying" | "at bat" => Some(Intent::WhoNow),
        "next" | "on first" | "on deck" => Some(Intent::WhoNext),
        _ => None,
    }
}

/// Split off the first whitespace-delimited word; the remainder is trimmed.
fn split_word(text: &str) -> (&str, &str) {
    match text.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (text, ""),
    }
}
