//! HTML status page served at `/`.

use std::fmt::Write as _;

/// Scheme for the advertised WebSocket URL: `wss` behind a TLS-terminating
/// proxy (`X-Forwarded-Proto: https`), `ws` otherwise.
pub fn ws_scheme(forwarded_proto: Option<&str>) -> &'static str {
    match forwarded_proto {
        Some(proto) if proto.eq_ignore_ascii_case("https") => "wss",
        _ => "ws",
    }
}

/// Render the status page.
pub fn render_status_page(ws_url: &str, connections: usize, uptime_secs: u64) -> String {
    let ws_url = escape_html(ws_url);
    let mut page = String::with_capacity(1024);
    page.push_str(
        "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n\
         <title>Periyar Scale Server</title>\n<style>\n\
         body { font-family: Arial, sans-serif; max-width: 800px; margin: 50px auto; padding: 20px; }\n\
         .status { background: #2ecc71; color: white; padding: 20px; border-radius: 10px; }\n\
         .info { background: #f8f9fa; padding: 20px; border-radius: 10px; margin-top: 20px; }\n\
         code, pre { background: #333; color: #0f0; padding: 2px 6px; border-radius: 3px; }\n\
         </style>\n</head>\n<body>\n\
         <div class=\"status\">\n<h1>Periyar Scale WebSocket Server</h1>\n\
         <p>Server is running and ready to accept connections.</p>\n</div>\n",
    );
    let _ = write!(
        page,
        "<div class=\"info\">\n<h2>Connection Information</h2>\n\
         <p><strong>WebSocket URL:</strong> <code>{ws_url}</code></p>\n\
         <p><strong>Active Connections:</strong> {connections}</p>\n\
         <p><strong>Server Uptime:</strong> {uptime_secs} seconds</p>\n\
         <h3>How to Connect</h3>\n\
         <p>Use this WebSocket URL in your dashboard or scale firmware:</p>\n\
         <pre>{ws_url}</pre>\n</div>\n</body>\n</html>\n"
    );
    page
}

fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
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
