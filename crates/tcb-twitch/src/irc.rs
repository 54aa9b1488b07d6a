//! Minimal IRC line parsing for Twitch chat (IRCv3 tags included).

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IrcMessage {
    pub tags: Vec<(String, String)>,
    pub prefix: Option<String>,
    pub command: String,
    pub params: Vec<String>,
}

impl IrcMessage {
    /// Parse one line (without the trailing CRLF). Returns `None` for blank
    /// or command-less lines.
    pub fn parse(line: &str) -> Option<Self> {
        let mut rest = line.trim_end_matches(['\r', '\n']);
        let mut msg = IrcMessage::default();

        if let Some(after) = rest.strip_prefix('@') {
            let (raw_tags, tail) = after.split_once(' ')?;
            msg.tags = raw_tags
                .split(';')
                .filter(|t| !t.is_empty())
                .map(|t| match t.split_once('=') {
                    Some((k, v)) => (k.to_string(), unescape_tag(v)),
                    None => (t.to_string(), String::new()),
                })
                .collect();
            rest = tail.trim_start();
        }

        if let Some(after) = rest.strip_prefix(':') {
            let (prefix, tail) = after.split_once(' ')?;
            msg.prefix = Some(prefix.to_string());
            rest = tail.trim_start();
        }

        let (command, mut rest) = match rest.split_once(' ') {
            Some((c, tail)) => (c, tail),
            None => (rest, ""),
        };
        if command.is_empty() {
            return None;
        }
        msg.command = command.to_uppercase();

        while !rest.is_empty() {
            if let Some(trailing) = rest.strip_prefix(':') {
                msg.params.push(trailing.to_string());
                break;
            }
            match rest.split_once(' ') {
                Some((p, tail)) => {
                    if !p.is_empty() {
                        msg.params.push(p.to_string());
                    }
                    rest = tail;
                }
                None => {
                    msg.params.push(rest.to_string());
                    break;
                }
            }
        }
        Some(msg)
    }

    /// Nick part of the prefix (`nick!user@host`).
    pub fn nick(&self) -> Option<&str> {
        let prefix = self.prefix.as_deref()?;
        Some(prefix.split('!').next().unwrap_or(prefix))
    }

    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn param(&self, idx: usize) -> Option<&str> {
        self.params.get(idx).map(String::as_str)
    }

    pub fn trailing(&self) -> Option<&str> {
        self.params.last().map(String::as_str)
    }

    /// First parameter as a channel name, if it is one.
    pub fn channel(&self) -> Option<&str> {
        self.param(0).and_then(|p| p.strip_prefix('#'))
    }
}

/// Split a WebSocket text frame into IRC lines.
pub fn lines(frame: &str) -> impl Iterator<Item = &str> {
    frame
        .split('\n')
        .map(|l| l.trim_end_matches('\r'))
        .filter(|l| !l.is_empty())
}

fn unescape_tag(v: &str) -> String {
    let mut out = String::with_capacity(v.len());
    let mut chars = v.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some(':') => out.push(';'),
            Some('s') => out.push(' '),
            Some('\\') => out.push('\\'),
            Some('r') => out.push('\r'),
            Some('n') => out.push('\n'),
            Some(other) => out.push(other),
            None => {}
        }
    }
    out
}
