//! Per-channel wire formats for notification payloads.

use serde_json::json;

use super::Payload;

const COLOR_UP: u32 = 0x5cdd8b;
const COLOR_DOWN: u32 = 0xdc3545;
const LOG_TAIL_CHARS: usize = 1000;

pub(super) fn dingtalk_body(p: &Payload) -> Result<Vec<u8>, serde_json::Error> {
    let title = title_for(p);
    let text = markdown_body(&title, p);
    serde_json::to_vec(&json!({
        "msgtype": "markdown",
        "markdown": { "title": title, "text": text },
    }))
}

pub(super) fn wechat_body(p: &Payload) -> Result<Vec<u8>, serde_json::Error> {
    let title = title_for(p);
    let text = markdown_body(&title, p);
    serde_json::to_vec(&json!({
        "msgtype": "markdown",
        "markdown": { "content": text },
    }))
}

pub(super) fn discord_body(p: &Payload) -> Result<Vec<u8>, serde_json::Error> {
    let title = title_for(p);
    let description = markdown_body(&title, p);
    let color = if str_field(p, "current") == Some("down") {
        COLOR_DOWN
    } else {
        COLOR_UP
    };
    serde_json::to_vec(&json!({
        "username": "Uptime Chopper",
        "embeds": [{
            "title": title,
            "description": description,
            "color": color,
            "timestamp": p.at.to_rfc3339(),
        }],
    }))
}

fn title_for(p: &Payload) -> String {
    let label = match p.kind.as_str() {
        super::EVENT_STATUS_CHANGED => "Status Changed",
        super::EVENT_REMEDIATED => "Remediated",
        super::EVENT_ERROR => "Error",
        other => other,
    };
    format!("Monitor Alert: {label}")
}

fn markdown_body(title: &str, p: &Payload) -> String {
    let mut out = format!("## {title}\n");

    if let Some(name) = str_field(p, "monitorName") {
        out.push_str(&format!("- **Monitor**: {name}\n"));
    }
    if let Some(target) = str_field(p, "target") {
        out.push_str(&format!("- **Target**: {target}\n"));
    }
    if let Some(current) = str_field(p, "current") {
        let dot = if current == "up" { "🟢" } else { "🔴" };
        out.push_str(&format!("- **Status**: {dot} {current}\n"));
    }
    out.push_str(&format!("- **Time**: {}\n", p.at.format("%Y-%m-%d %H:%M:%S")));
    if let Some(message) = str_field(p, "message") {
        out.push_str(&format!("- **Message**: {message}\n"));
    }
    if let Some(latency) = p.data.get("latencyMs").and_then(|v| v.as_i64()) {
        out.push_str(&format!("- **Latency**: {latency}ms\n"));
    }
    if let Some(action) = str_field(p, "action") {
        match p.data.get("attempt").and_then(|v| v.as_u64()) {
            Some(attempt) => out.push_str(&format!("- **Action**: {action} (attempt {attempt})\n")),
            None => out.push_str(&format!("- **Action**: {action}\n")),
        }
    }

    if let Some(logs) = &p.logs {
        out.push_str("\n**Container Logs**:\n```\n");
        let (tail, sliced) = tail_chars(&logs.content, LOG_TAIL_CHARS);
        if sliced {
            out.push_str("...(truncated)...\n");
        }
        out.push_str(tail);
        out.push_str("\n```\n");
    }

    out
}

fn str_field<'a>(p: &'a Payload, key: &str) -> Option<&'a str> {
    p.data.get(key).and_then(|v| v.as_str())
}

/// The last `n` characters of `s`, with a flag saying whether anything was
/// cut. Slices on char boundaries.
fn tail_chars(s: &str, n: usize) -> (&str, bool) {
    let count = s.chars().count();
    if count <= n {
        return (s, false);
    }
    let start = s
        .char_indices()
        .nth(count - n)
        .map(|(i, _)| i)
        .unwrap_or(0);
    (&s[start..], true)
}
