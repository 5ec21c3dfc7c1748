//! REST helpers.

use serde_json::Value;

use crate::CliError;

pub async fn ping(base_url: &str) -> Result<(), CliError> {
    let response = reqwest::get(format!("{base_url}/healthz")).await?;
    let status = response.status();
    if !status.is_success() {
        return Err(CliError::ServerError {
            context: format!("HTTP {}", status.as_u16()),
            message: "health check failed".to_owned(),
        });
    }
    println!("ok");
    Ok(())
}

pub async fn request(base_url: &str, method: reqwest::Method, path: &str, body: Option<Value>) -> Result<Value, CliError> {
    let client = reqwest::Client::new();
    let request = client.request(method, format!("{base_url}{path}"));
    let request = if let Some(json) = body { request.json(&json) } else { request };

    let response = request.send().await?;
    let status = response.status();
    let value = response.json::<Value>().await.unwrap_or(Value::Null);

    if !status.is_success() {
        let message = value.get("error").and_then(Value::as_str).map_or_else(|| value.to_string(), ToOwned::to_owned);
        return Err(CliError::ServerError { context: format!("HTTP {} {path}", status.as_u16()), message });
    }
    Ok(value)
}

/// The room's saved snapshot, `null` when it was never saved.
pub async fn fetch_canvas(base_url: &str, room_id: &str) -> Result<Value, CliError> {
    let body = request(base_url, reqwest::Method::GET, &format!("/api/rooms/{room_id}/canvas"), None).await?;
    body.get("canvasData").cloned().ok_or(CliError::MissingField("canvasData"))
}

pub fn print_json(value: &Value) -> Result<(), CliError> {
    let rendered = serde_json::to_string_pretty(value)?;
    println!("{rendered}");
    Ok(())
}
