//! Common handlers mounted by the bundled servers.

use axum::{
    http::header,
    response::{Html, IntoResponse},
    Json,
};

use crate::version;

/// A labelled link listed on the root page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    pub label: String,
    pub href: String,
}

impl Link {
    pub fn new(label: impl Into<String>, href: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            href: href.into(),
        }
    }
}

/// Render the root page body: a welcome line, then the links, if any.
pub fn root_page(service_name: &str, links: &[Link]) -> String {
    let mut body = format!("Welcome to {}", escape(service_name));

    if !links.is_empty() {
        body.push_str("<br><br>Links:<br>");
        for link in links {
            body.push_str(&format!(
                "<a href=\"{}\">{}</a><br>",
                escape(&link.href),
                escape(&link.label)
            ));
        }
    }

    body
}

/// Handler for `/` answering with [`root_page`].
pub fn root_handler(
    service_name: impl Into<String>,
    links: Vec<Link>,
) -> impl Fn() -> std::future::Ready<Html<String>> + Clone + Send + Sync + 'static {
    let body = root_page(&service_name.into(), &links);
    move || std::future::ready(Html(body.clone()))
}

/// Handler for `/version` answering with the build info as JSON.
pub async fn version_handler() -> impl IntoResponse {
    (
        [(header::CACHE_CONTROL, "no-cache")],
        Json(version::info()),
    )
}

fn escape(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
