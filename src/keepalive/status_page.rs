//! Diagnostic page summarizing the keepalive registries.
//!
//! Served directly at `GET /output_keepalived_trace`, bypassing the JSON
//! dispatch pipeline.

use axum::extract::State;
use axum::response::Html;

use crate::api::dispatch::DispatchState;
use crate::keepalive::registry::{RegistrySnapshot, ServiceSnapshot};

pub(crate) async fn status_page(State(state): State<DispatchState>) -> Html<String> {
    Html(render(&state.keepalive.snapshot()))
}

fn render(snapshot: &RegistrySnapshot) -> String {
    let mut page = String::with_capacity(4096);
    page.push_str("<html><head><title>keepalive trace</title></head><body>");
    page.push_str(&format!(
        "<h2>{} @ {}</h2>",
        escape(&snapshot.service_name),
        escape(&snapshot.service_address)
    ));
    page.push_str(&format!(
        "<p>query time: {} | secondary: {} | period: {}s | timeout: {}s | receiver keep: {}s</p>",
        snapshot.query_time,
        escape(&snapshot.secondary_service_address),
        snapshot.check_period_secs,
        snapshot.check_timeout_secs,
        snapshot.receiver_keep_secs,
    ));
    push_group(&mut page, "Configured services", &snapshot.configured);
    push_group(&mut page, "Announced services", &snapshot.announced);

    page.push_str("<h3>Trace addresses</h3><table border=\"1\">");
    page.push_str("<tr><th>service</th><th>address</th></tr>");
    for trace in &snapshot.traced {
        page.push_str(&format!(
            "<tr><td>{}</td><td>{}</td></tr>",
            escape(&trace.service_name),
            escape(&trace.address)
        ));
    }
    page.push_str("</table></body></html>");
    page
}

fn push_group(page: &mut String, title: &str, group: &[ServiceSnapshot]) {
    page.push_str(&format!("<h3>{}</h3><table border=\"1\">", title));
    page.push_str(
        "<tr><th>service</th><th>address</th><th>health</th>\
         <th>call count</th><th>last receive</th></tr>",
    );
    for service in group {
        for entry in &service.addresses {
            let address = match &entry.secondary {
                Some(secondary) => format!(
                    "{} <label style=\"color:red\">{}</label>",
                    escape(&entry.address),
                    escape(secondary)
                ),
                None => escape(&entry.address),
            };
            let health = if entry.on_secondary && entry.health == 1 {
                "<label style=\"color:red\">1</label>".to_string()
            } else {
                entry.health.to_string()
            };
            page.push_str(&format!(
                "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>",
                escape(&service.service_name),
                address,
                health,
                entry.call_count,
                entry.receive_time,
            ));
        }
    }
    page.push_str("</table>");
}

fn escape(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}
