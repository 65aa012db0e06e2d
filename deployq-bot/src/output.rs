//! Chat output: splits long or multi-line responses into IRC-sized lines
//! and paces them so the server's flood protection stays quiet.

use std::time::Duration;

use crate::client::ClientHandle;

/// Longest PRIVMSG body we send (servers cap the full line at 512 bytes).
const MAX_LINE: usize = 400;
/// Pause between consecutive lines of one response.
const LINE_DELAY: Duration = Duration::from_millis(100);

/// Post `text` to `target`, one IRC line per text line.
pub async fn say(handle: &ClientHandle, target: &str, text: &str) -> anyhow::Result<()> {
    send_lines(handle, target, wrap_lines(text, MAX_LINE)).await
}

/// Post `text` addressed to `nick` (`nick: text`). In a private message the
/// address is implied, so the prefix is dropped.
pub async fn reply(
    handle: &ClientHandle,
    target: &str,
    nick: &str,
    text: &str,
) -> anyhow::Result<()> {
    let text = if target == nick {
        text.to_string()
    } else {
        format!("{nick}: {text}")
    };
    say(handle, target, &text).await
}

async fn send_lines(handle: &ClientHandle, target: &str, lines: Vec<String>) -> anyhow::Result<()> {
    let count = lines.len();
    for (i, line) in lines.into_iter().enumerate() {
        handle.privmsg(target, &line).await?;
        if i + 1 < count {
            tokio::time::sleep(LINE_DELAY).await;
        }
    }
    Ok(())
}

/// Wrap text into lines of at most `max_len` bytes, breaking on word
/// boundaries. Blank lines are dropped since IRC can't carry them.
fn wrap_lines(text: &str, max_len: usize) -> Vec<String> {
    let mut result = Vec::new();
    for line in text.lines() {
        if line.trim().is_empty() {
            continue;
        }
        if line.len() <= max_len {
            result.push(line.to_string());
            continue;
        }
        let mut current = String::new();
        for word in line.split_whitespace() {
            if !current.is_empty() && current.len() + word.len() + 1 > max_len {
                result.push(std::mem::take(&mut current));
            }
            if !current.is_empty() {
                current.push(' ');
            }
            current.push_str(word);
        }
        if !current.is_empty() {
            result.push(current);
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_lines_pass_through() {
        assert_eq!(wrap_lines("one\ntwo", 400), ["one", "two"]);
    }

    #[test]
    fn blank_lines_dropped() {
        assert_eq!(wrap_lines("[\n\n]", 400), ["[", "]"]);
    }

    #[test]
    fn long_line_breaks_on_words() {
        let lines = wrap_lines("aaa bbb ccc ddd", 7);
        assert_eq!(lines, ["aaa bbb", "ccc ddd"]);
        assert!(lines.iter().all(|l| l.len() <= 7));
    }

    #[test]
    fn oversized_word_kept_whole() {
        assert_eq!(wrap_lines("tiny enormousword end", 6), ["tiny", "enormousword", "end"]);
    }
}
