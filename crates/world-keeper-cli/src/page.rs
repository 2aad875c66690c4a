//! HTML for the status page and error responses.

use std::fmt::Write;

use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use world_keeper_core::config::Http;
use world_keeper_process::{ServerState, ServerStatus};
use world_keeper_storage::RecordSummary;

const STYLE: &str = r#"
body { font-family: Arial, sans-serif; max-width: 860px; margin: 0 auto; padding: 20px; text-align: center; }
.status { padding: 20px; background-color: #e8f5e9; border-radius: 10px; margin: 20px 0; }
.status.down { background-color: #ffebee; }
h1 { color: #2e7d32; }
table { margin: 0 auto; border-collapse: collapse; }
td, th { padding: 4px 10px; border-bottom: 1px solid #ddd; }
pre { text-align: left; background: #f5f5f5; padding: 10px; overflow-x: auto; }
form { display: inline; }
"#;

pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

pub fn timestamp(at: OffsetDateTime) -> String {
    at.format(&Rfc3339).unwrap_or_else(|_| at.unix_timestamp().to_string())
}

fn state_line(state: &ServerState) -> String {
    match state {
        ServerState::Starting => "Starting".to_string(),
        ServerState::Running { pid } => format!("Running (pid {pid})"),
        ServerState::Exited { code: Some(code) } => format!("Stopped with exit code {code}"),
        ServerState::Exited { code: None } => "Stopped by signal".to_string(),
        ServerState::NotFound { .. } => {
            "Not installed (development mode, server executable not found)".to_string()
        }
        ServerState::SpawnFailed { reason } => format!("Failed to start: {reason}"),
    }
}

fn layout(title: &str, body: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html>\n<head>\n<title>{}</title>\n<style>{STYLE}</style>\n</head>\n<body>\n{body}</body>\n</html>\n",
        escape(title)
    )
}

pub fn index(http: &Http, status: &ServerStatus, backups: &[RecordSummary]) -> String {
    let mut body = String::new();
    let running = matches!(status.state, ServerState::Running { .. });
    let _ = writeln!(body, "<h1>Minecraft Bedrock Server</h1>");
    let _ = writeln!(
        body,
        "<div class=\"status{}\">\n<h2>Server Status: {}</h2>",
        if running { "" } else { " down" },
        escape(&state_line(&status.state))
    );
    let _ = writeln!(body, "<p>Game port: {}</p>", http.game_port);
    let _ = writeln!(
        body,
        "<p>Connect using the server address:</p>\n<code>{}</code>\n</div>",
        escape(&http.public_address)
    );

    let _ = writeln!(body, "<p>To connect from Minecraft Bedrock Edition:</p>");
    let _ = writeln!(body, "<ol style=\"text-align: left; display: inline-block;\">");
    for step in [
        "Open Minecraft".to_string(),
        "Click \"Play\"".to_string(),
        "Go to \"Servers\" tab".to_string(),
        "Click \"Add Server\"".to_string(),
        "Enter any name you want".to_string(),
        "For the address, enter the server address shown above".to_string(),
        format!("For the port, enter {}", http.game_port),
        "Click \"Save\" and then connect to your server!".to_string(),
    ] {
        let _ = writeln!(body, "<li>{}</li>", escape(&step));
    }
    let _ = writeln!(body, "</ol>");

    let _ = writeln!(body, "<h2>World Backups</h2>");
    let _ = writeln!(
        body,
        "<form method=\"post\" action=\"/backups\"><button type=\"submit\">Create backup now</button></form>"
    );
    if backups.is_empty() {
        let _ = writeln!(body, "<p>No backups available.</p>");
    } else {
        let _ = writeln!(
            body,
            "<table>\n<tr><th>Backup</th><th>Created</th><th>Size</th><th></th></tr>"
        );
        for backup in backups {
            let id = escape(&backup.id);
            let _ = writeln!(
                body,
                "<tr><td>{}</td><td>{}</td><td>{}</td><td><a href=\"/backups/{id}/download\">Download</a> \
                 <form method=\"post\" action=\"/backups/{id}/restore\" \
                 onsubmit=\"return confirm('Replace the live world with this backup?');\">\
                 <button type=\"submit\">Restore</button></form></td></tr>",
                escape(&backup.filename),
                timestamp(backup.created_at),
                human_size(backup.size_bytes),
            );
        }
        let _ = writeln!(body, "</table>");
    }

    if !status.recent_output.is_empty() {
        let _ = writeln!(body, "<h2>Recent server output</h2>\n<pre>");
        for line in &status.recent_output {
            let _ = writeln!(body, "{}", escape(line));
        }
        let _ = writeln!(body, "</pre>");
    }

    layout("Minecraft Bedrock Server Status", &body)
}

pub fn error(status: u16, reason: &str, message: &str) -> String {
    let body = format!(
        "<h1>{status} {}</h1>\n<p>{}</p>\n<p><a href=\"/\">Back to status</a></p>\n",
        escape(reason),
        escape(message)
    );
    layout(reason, &body)
}

pub fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}
