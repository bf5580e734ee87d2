//! IRC line parsing and command formatting (RFC 1459 / IRCv3 message syntax).

/// CTCP delimiter byte.
pub const CTCP_DELIM: char = '\x01';

/// Protocol limit for one line, CRLF included.
pub const MAX_LINE_BYTES: usize = 512;

/// Room left for the `:nick!user@host ` prefix the server adds when relaying.
const RELAY_PREFIX_RESERVE: usize = 100;

/// Longest channel name accepted as a destination.
pub const MAX_CHANNEL_LEN: usize = 50;

/// A parsed IRC line: `[@tags] [:prefix] COMMAND params... [:trailing]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    /// Source of the message (`nick!user@host` or a server name).
    pub prefix: Option<String>,
    /// Command or three-digit numeric, upper-cased.
    pub command: String,
    /// Middle parameters followed by the trailing parameter, if any.
    pub params: Vec<String>,
}

impl Line {
    /// Parse a raw line without its CRLF terminator.
    ///
    /// Message tags are skipped. Returns `None` for blank or malformed lines.
    pub fn parse(raw: &str) -> Option<Self> {
        let mut rest = raw.trim_end_matches(['\r', '\n']);

        if rest.starts_with('@') {
            let (_, after) = rest.split_once(' ')?;
            rest = after.trim_start();
        }

        let prefix = if let Some(stripped) = rest.strip_prefix(':') {
            let (prefix, after) = stripped.split_once(' ')?;
            rest = after.trim_start();
            Some(prefix.to_owned())
        } else {
            None
        };

        let (command, mut rest) = match rest.split_once(' ') {
            Some((command, after)) => (command, after),
            None => (rest, ""),
        };
        if command.is_empty() {
            return None;
        }

        let mut params = Vec::new();
        loop {
            rest = rest.trim_start_matches(' ');
            if rest.is_empty() {
                break;
            }
            if let Some(trailing) = rest.strip_prefix(':') {
                params.push(trailing.to_owned());
                break;
            }
            match rest.split_once(' ') {
                Some((param, after)) => {
                    params.push(param.to_owned());
                    rest = after;
                }
                None => {
                    params.push(rest.to_owned());
                    break;
                }
            }
        }

        Some(Self {
            prefix,
            command: command.to_ascii_uppercase(),
            params,
        })
    }

    /// Nick portion of the prefix, if the prefix is a user mask.
    pub fn source_nick(&self) -> Option<&str> {
        self.prefix
            .as_deref()
            .map(|prefix| prefix.split('!').next().unwrap_or(prefix))
    }

    /// Parameter at `index`, or an empty string.
    pub fn param(&self, index: usize) -> &str {
        self.params.get(index).map_or("", String::as_str)
    }
}

/// Whether a target names a channel rather than a nick.
pub fn is_channel(target: &str) -> bool {
    target.starts_with(['#', '&', '+', '!'])
}

/// Whether `name` can be used verbatim as a `JOIN`/`PRIVMSG` target.
///
/// It must carry a channel prefix and contain no space, comma, BELL or
/// other control character.
pub fn is_valid_channel(name: &str) -> bool {
    is_channel(name)
        && name.len() > 1
        && name.len() <= MAX_CHANNEL_LEN
        && !name.chars().any(|c| matches!(c, ' ' | ',') || c.is_control())
}

/// Extract the body of a CTCP message (`\x01BODY\x01`).
pub fn ctcp_body(text: &str) -> Option<&str> {
    let inner = text.strip_prefix(CTCP_DELIM)?;
    Some(inner.strip_suffix(CTCP_DELIM).unwrap_or(inner))
}

/// Wrap a body in CTCP delimiters.
pub fn ctcp(body: &str) -> String {
    format!("{CTCP_DELIM}{body}{CTCP_DELIM}")
}

/// Strip characters that would terminate or split a protocol line.
pub fn sanitize(text: &str) -> String {
    text.chars().filter(|c| !matches!(c, '\r' | '\n' | '\0')).collect()
}

/// `NICK` command.
pub fn nick(nick: &str) -> String {
    format!("NICK {}", sanitize(nick))
}

/// `USER` command.
pub fn user(username: &str, realname: &str) -> String {
    format!("USER {} 0 * :{}", sanitize(username), sanitize(realname))
}

/// `JOIN` command.
pub fn join(channel: &str) -> String {
    format!("JOIN {}", sanitize(channel))
}

/// `PRIVMSG` command.
pub fn privmsg(target: &str, text: &str) -> String {
    format!("PRIVMSG {} :{}", sanitize(target), sanitize(text))
}

/// One or more `PRIVMSG` commands carrying `text`, split at character
/// boundaries so every relayed line stays within [`MAX_LINE_BYTES`].
pub fn privmsg_lines(target: &str, text: &str) -> Vec<String> {
    let target = sanitize(target);
    let text = sanitize(text);
    // "PRIVMSG " + target + " :" + CRLF
    let budget = MAX_LINE_BYTES
        .saturating_sub(RELAY_PREFIX_RESERVE)
        .saturating_sub("PRIVMSG  :\r\n".len())
        .saturating_sub(target.len());

    split_at_boundaries(&text, budget)
        .into_iter()
        .map(|chunk| format!("PRIVMSG {target} :{chunk}"))
        .collect()
}

/// Split `text` into pieces of at most `max_bytes`, never inside a character.
///
/// A single character wider than `max_bytes` becomes its own piece.
pub fn split_at_boundaries(text: &str, max_bytes: usize) -> Vec<&str> {
    let mut pieces = Vec::new();
    let mut rest = text;
    while rest.len() > max_bytes {
        let cut = match (1..=max_bytes).rev().find(|i| rest.is_char_boundary(*i)) {
            Some(cut) => cut,
            None => rest.chars().next().map_or(rest.len(), char::len_utf8),
        };
        let (head, tail) = rest.split_at(cut);
        pieces.push(head);
        rest = tail;
    }
    if !rest.is_empty() || pieces.is_empty() {
        pieces.push(rest);
    }
    pieces
}

/// `NOTICE` command.
pub fn notice(target: &str, text: &str) -> String {
    format!("NOTICE {} :{}", sanitize(target), sanitize(text))
}

/// `PING` command.
pub fn ping(token: &str) -> String {
    format!("PING :{}", sanitize(token))
}

/// `PONG` command.
pub fn pong(token: &str) -> String {
    format!("PONG :{}", sanitize(token))
}

/// `QUIT` command.
pub fn quit(reason: &str) -> String {
    format!("QUIT :{}", sanitize(reason))
}
