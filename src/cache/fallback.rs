//! Responses synthesized when neither the network nor a cache can answer.

use crate::net::Response;

const UNAVAILABLE_TEXT: &str = "Offline content not available";

/// Plain-text 503 returned by the cache-first strategy on unrecoverable failure.
pub fn unavailable() -> Response {
  Response::new(503, UNAVAILABLE_TEXT).with_header("Content-Type", "text/plain; charset=utf-8")
}

/// JSON 503 returned by the network-first strategy for non-navigation requests.
pub fn offline_json() -> Response {
  let body = serde_json::json!({
    "error": "Offline",
    "message": "This feature requires an internet connection",
  });

  Response::new(503, body.to_string()).with_header("Content-Type", "application/json")
}

/// Self-contained offline document: inline styles only, no external references.
pub fn offline_page(app_name: &str) -> Response {
  let html = OFFLINE_PAGE_TEMPLATE.replace("{app_name}", &escape_html(app_name));
  Response::new(200, html).with_header("Content-Type", "text/html")
}

fn escape_html(s: &str) -> String {
  s.replace('&', "&amp;")
    .replace('<', "&lt;")
    .replace('>', "&gt;")
    .replace('"', "&quot;")
}

const OFFLINE_PAGE_TEMPLATE: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="utf-8">
  <meta name="viewport" content="width=device-width, initial-scale=1">
  <title>{app_name} - Offline</title>
  <style>
    body {
      font-family: 'Inter', sans-serif;
      display: flex;
      flex-direction: column;
      justify-content: center;
      align-items: center;
      height: 100vh;
      margin: 0;
      background: linear-gradient(135deg, #667eea 0%, #764ba2 100%);
      color: white;
      text-align: center;
      padding: 2rem;
    }
    h1 { margin-bottom: 1rem; }
    p { margin-bottom: 2rem; opacity: 0.9; }
    button {
      background: rgba(255,255,255,0.2);
      border: 1px solid rgba(255,255,255,0.3);
      color: white;
      padding: 0.75rem 1.5rem;
      border-radius: 0.5rem;
      cursor: pointer;
    }
  </style>
</head>
<body>
  <h1>You're Offline</h1>
  <p>{app_name} requires an internet connection to access the latest medical terminology data.</p>
  <button onclick="location.reload()">Try Again</button>
</body>
</html>
"#;
