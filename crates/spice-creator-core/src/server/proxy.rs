use std::net::SocketAddr;

use tracing::debug;

use super::http::{Request, Response};

const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-connection",
    "transfer-encoding",
    "upgrade",
    "te",
    "trailer",
    "host",
    "content-length",
];

fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP.iter().any(|h| h.eq_ignore_ascii_case(name))
}

/// Forward `request` to the delegate server.
///
/// A delegate 404 becomes a local 404 page; any transport error (for
/// example a delegate that went away with its context) becomes a 502.
pub async fn forward(client: &reqwest::Client, delegate: SocketAddr, request: &Request) -> Response {
    let url = format!("http://{}{}", delegate, request.target);
    let method = match reqwest::Method::from_bytes(request.method.as_bytes()) {
        Ok(method) => method,
        Err(_) => return Response::text(405, "Method Not Allowed"),
    };

    let mut builder = client.request(method, &url);
    for (name, value) in request.headers.iter().filter(|(n, _)| !is_hop_by_hop(n)) {
        builder = builder.header(name.as_str(), value.as_str());
    }
    if !request.body.is_empty() {
        builder = builder.body(request.body.clone());
    }

    let upstream = match builder.send().await {
        Ok(upstream) => upstream,
        Err(e) => {
            debug!(url = %url, error = %e, "proxy request failed");
            return Response::text(502, "Proxy Error");
        }
    };

    let status = upstream.status().as_u16();
    if status == 404 {
        return Response::html(404, "<h1>Not found</h1>");
    }

    let headers: Vec<(String, String)> = upstream
        .headers()
        .iter()
        .filter(|(name, _)| !is_hop_by_hop(name.as_str()))
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect();

    match upstream.bytes().await {
        Ok(body) => Response {
            status,
            headers,
            body: body.to_vec(),
        },
        Err(e) => {
            debug!(url = %url, error = %e, "proxy body failed");
            Response::text(502, "Proxy Error")
        }
    }
}
